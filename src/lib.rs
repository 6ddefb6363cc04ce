use tracing::level_filters::LevelFilter;

mod formula;
pub use formula::*;

mod smiles;
pub use smiles::*;

mod interpret;
pub use interpret::*;

mod catalogue;
pub use catalogue::*;

mod validate;
pub use validate::*;

mod report;
pub use report::*;

mod config;
pub use config::*;

/// Installs a global `tracing` subscriber that prints to stderr at `level`.
///
/// An unrecognized level falls back to `info`. Calling this more than once is harmless;
/// only the first subscriber is kept.
pub fn init_logging(level: &str) {
    let max_level = level.trim().parse::<LevelFilter>().unwrap_or(LevelFilter::INFO);
    let _ = tracing_subscriber::fmt()
        .with_max_level(max_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
