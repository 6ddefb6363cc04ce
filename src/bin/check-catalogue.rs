use anyhow::{Context, Result};
use molcheck::*;
use std::process::ExitCode;
use std::time::Instant;
use tracing::*;

fn load_entries(config: &Config) -> Result<Vec<CatalogueEntry>> {
    match &config.catalogue {
        Some(path) => load_catalogue(path)
            .with_context(|| format!("Could not load catalogue {}", path.display())),
        None => {
            info!("Using the bundled catalogue");
            Ok(bundled_catalogue().to_vec())
        }
    }
}

/// Runs the whole check. `Ok(true)` means every entry was valid.
fn run(config: &Config) -> Result<bool> {
    let entries = load_entries(config)?;
    let timed;
    let interpreter: &dyn StructureInterpreter = match config.timeout {
        Some(limit) => {
            timed = WithTimeout::new(SmilesInterpreter, limit);
            &timed
        }
        None => &SmilesInterpreter,
    };

    println!("Validating {} catalogue entries...\n", entries.len());
    let started = Instant::now();
    let report = validate_all_parallel(&entries, interpreter, config.jobs);
    debug!("Validation took {:?}", started.elapsed());

    if !config.quiet {
        let total = report.outcomes().len();
        for (i, validated) in report.outcomes().iter().enumerate() {
            println!("{}", render_progress(i + 1, total, validated));
        }
    }

    let summary = report.summary();
    println!("\n{summary}");

    if report.is_all_valid() {
        println!("\nAll entries are valid.");
        return Ok(true);
    }

    if !config.quiet {
        print!("{}", render_details(&report));
    }
    write_report(&report, &config.report_path, config.report_format)?;
    println!(
        "\nDetailed report saved to {}",
        config.report_path.display()
    );
    Ok(false)
}

fn main() -> ExitCode {
    let config = match Config::from_env().and_then(|c| c.with_args(std::env::args().skip(1))) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}\n\n{USAGE}");
            return ExitCode::from(2);
        }
    };
    if config.show_help {
        println!("{USAGE}");
        return ExitCode::SUCCESS;
    }
    init_logging(&config.log_level);

    match run(&config) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            error!("{e:#}");
            eprintln!("Error: {e:#}");
            ExitCode::from(2)
        }
    }
}
