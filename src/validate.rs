use crate::{canonicalize, CatalogueEntry, ElementCount, StructureInterpreter, ValidationReport};
use rayon::prelude::*;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use tracing::*;

/// What checking one catalogue entry found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    /// The authored formula matches the structure.
    Valid,
    /// The interpreter could not read the structure, so nothing was compared.
    ParseFailure { reason: String },
    /// Both sides parsed but the element counts differ.
    Mismatch {
        expected: ElementCount,
        actual: ElementCount,
    },
}

impl ValidationOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationOutcome::Valid)
    }

    /// Name used for the outcome in reports.
    pub fn kind(&self) -> &'static str {
        match self {
            ValidationOutcome::Valid => "valid",
            ValidationOutcome::ParseFailure { .. } => "parse_failure",
            ValidationOutcome::Mismatch { .. } => "mismatch",
        }
    }
}

/// An outcome together with the entry it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedEntry {
    pub entry: CatalogueEntry,
    pub outcome: ValidationOutcome,
}

impl ValidatedEntry {
    pub fn name(&self) -> &str {
        &self.entry.name
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Checks one entry: interprets its structure and compares the derived formula with
/// the authored one.
///
/// This never fails. An interpreter error, or an interpreter panic, becomes a
/// [`ValidationOutcome::ParseFailure`] for this entry.
pub fn validate<I>(entry: &CatalogueEntry, interpreter: &I) -> ValidationOutcome
where
    I: StructureInterpreter + ?Sized,
{
    let interpreted = panic::catch_unwind(AssertUnwindSafe(|| {
        interpreter.interpret(&entry.structural_notation)
    }));

    let derived = match interpreted {
        Ok(Ok(derived)) => derived,
        Ok(Err(e)) => {
            return ValidationOutcome::ParseFailure {
                reason: e.to_string(),
            }
        }
        Err(payload) => {
            return ValidationOutcome::ParseFailure {
                reason: format!("Interpreter crashed: {}", panic_message(payload)),
            }
        }
    };

    let expected = canonicalize(&entry.authored_formula);
    let actual = canonicalize(&derived);
    if expected == actual {
        ValidationOutcome::Valid
    } else {
        ValidationOutcome::Mismatch { expected, actual }
    }
}

fn validate_entry<I>(entry: &CatalogueEntry, interpreter: &I) -> ValidatedEntry
where
    I: StructureInterpreter + ?Sized,
{
    let outcome = validate(entry, interpreter);
    match &outcome {
        ValidationOutcome::Valid => debug!("{} is valid", entry.name),
        ValidationOutcome::ParseFailure { reason } => {
            warn!("{}: could not interpret {}: {reason}", entry.name, entry.structural_notation)
        }
        ValidationOutcome::Mismatch { expected, actual } => {
            warn!("{}: formula mismatch, expected {expected}, got {actual}", entry.name)
        }
    }
    ValidatedEntry {
        entry: entry.clone(),
        outcome,
    }
}

fn log_summary(report: &ValidationReport) {
    let summary = report.summary();
    info!(
        "Validated {} entries: {} valid, {} parse failures, {} mismatches",
        summary.total, summary.valid, summary.parse_failures, summary.mismatches
    );
}

/// Checks every entry, one after another, keeping catalogue order.
pub fn validate_all<I>(entries: &[CatalogueEntry], interpreter: &I) -> ValidationReport
where
    I: StructureInterpreter + ?Sized,
{
    let outcomes = entries
        .iter()
        .map(|entry| validate_entry(entry, interpreter))
        .collect();
    let report = ValidationReport::new(outcomes);
    log_summary(&report);
    report
}

/// Checks entries on a pool of `jobs` worker threads.
///
/// Every entry's outcome lands in the slot with the entry's index, so the report is
/// in catalogue order no matter which worker finished first. With `jobs <= 1`, or if
/// the pool cannot be built, this is [`validate_all`].
pub fn validate_all_parallel<I>(
    entries: &[CatalogueEntry],
    interpreter: &I,
    jobs: usize,
) -> ValidationReport
where
    I: StructureInterpreter + ?Sized,
{
    if jobs <= 1 {
        return validate_all(entries, interpreter);
    }
    let pool = match rayon::ThreadPoolBuilder::new().num_threads(jobs).build() {
        Ok(pool) => pool,
        Err(e) => {
            warn!("Failed to start {jobs} workers, validating sequentially: {e}");
            return validate_all(entries, interpreter);
        }
    };

    debug!("Validating {} entries on {jobs} workers", entries.len());
    let outcomes: Vec<ValidatedEntry> = pool.install(|| {
        entries
            .par_iter()
            .map(|entry| validate_entry(entry, interpreter))
            .collect()
    });
    let report = ValidationReport::new(outcomes);
    log_summary(&report);
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{init_logging, InterpretError, SmilesInterpreter, WithTimeout};
    use std::time::Duration;

    /// Answers with a fixed formula per notation, rejecting anything starting with '!'.
    fn oracle(notation: &str) -> Result<String, InterpretError> {
        match notation.strip_prefix('!') {
            Some(reason) => Err(InterpretError::Rejected(reason.to_string())),
            None => Ok(notation.to_string()),
        }
    }

    fn counts(pairs: &[(&str, usize)]) -> ElementCount {
        pairs.iter().map(|&(symbol, count)| (symbol, count)).collect()
    }

    #[test]
    fn test_water_is_valid() {
        let entry = CatalogueEntry::new("Water", "H₂O", "H2O");
        assert_eq!(validate(&entry, &oracle), ValidationOutcome::Valid);
    }

    #[test]
    fn test_mismatch_reports_both_counts() {
        let entry = CatalogueEntry::new("Bad", "C₂H₆O", "C2H4O");
        assert_eq!(
            validate(&entry, &oracle),
            ValidationOutcome::Mismatch {
                expected: counts(&[("C", 2), ("H", 6), ("O", 1)]),
                actual: counts(&[("C", 2), ("H", 4), ("O", 1)]),
            }
        );
    }

    #[test]
    fn test_interpreter_rejection() {
        let entry = CatalogueEntry::new("Broken", "CH₄", "!unclosed ring");
        let outcome = validate(&entry, &oracle);
        assert_eq!(
            outcome,
            ValidationOutcome::ParseFailure {
                reason: "unclosed ring".to_string()
            }
        );
        assert_eq!(outcome.kind(), "parse_failure");
        assert!(!outcome.is_valid());
    }

    #[test]
    fn test_empty_authored_formula_is_a_mismatch() {
        let entry = CatalogueEntry::new("Blank", "?", "CH4");
        assert!(matches!(
            validate(&entry, &oracle),
            ValidationOutcome::Mismatch { expected, .. } if expected.is_empty()
        ));
    }

    #[test]
    fn test_interpreter_panic_is_isolated() {
        init_logging("error");
        let panicking = |notation: &str| -> Result<String, InterpretError> {
            if notation == "boom" {
                panic!("interpreter exploded");
            }
            Ok(notation.to_string())
        };
        let entries = vec![
            CatalogueEntry::new("Before", "CH₄", "CH4"),
            CatalogueEntry::new("Boom", "CH₄", "boom"),
            CatalogueEntry::new("After", "H₂O", "H2O"),
        ];
        let report = validate_all(&entries, &panicking);
        let outcomes: Vec<_> = report.outcomes().iter().map(|o| &o.outcome).collect();
        assert_eq!(outcomes[0], &ValidationOutcome::Valid);
        assert_eq!(
            outcomes[1],
            &ValidationOutcome::ParseFailure {
                reason: "Interpreter crashed: interpreter exploded".to_string()
            }
        );
        assert_eq!(outcomes[2], &ValidationOutcome::Valid);
    }

    fn five_entries() -> Vec<CatalogueEntry> {
        vec![
            CatalogueEntry::new("Water", "H₂O", "H2O"),
            CatalogueEntry::new("Ethanol", "C₂H₆O", "C2H6O"),
            CatalogueEntry::new("Broken", "CH₄", "!bad structure"),
            CatalogueEntry::new("Bad", "C₂H₆O", "C2H4O"),
            CatalogueEntry::new("Ammonium", "H₄N⁺", "H4N+"),
        ]
    }

    #[test]
    fn test_failures_do_not_stop_the_batch() {
        init_logging("info");
        let report = validate_all(&five_entries(), &oracle);
        let names: Vec<&str> = report.outcomes().iter().map(|o| o.name()).collect();
        assert_eq!(names, ["Water", "Ethanol", "Broken", "Bad", "Ammonium"]);

        let kinds: Vec<&str> = report.outcomes().iter().map(|o| o.outcome.kind()).collect();
        assert_eq!(kinds, ["valid", "valid", "parse_failure", "mismatch", "valid"]);

        let summary = report.summary();
        assert_eq!(summary.total, 5);
        assert_eq!(summary.parse_failures, 1);
        assert_eq!(summary.valid + summary.mismatches, 4);
    }

    #[test]
    fn test_timeout_fails_only_the_slow_entry() {
        let stalls_on_slow = |notation: &str| -> Result<String, InterpretError> {
            if notation == "slow" {
                std::thread::sleep(Duration::from_millis(2000));
            }
            Ok(notation.to_string())
        };
        let limit = Duration::from_millis(200);
        let interpreter = WithTimeout::new(stalls_on_slow, limit);
        let entries = vec![
            CatalogueEntry::new("Water", "H₂O", "H2O"),
            CatalogueEntry::new("Stalled", "CH₄", "slow"),
            CatalogueEntry::new("Bad", "C₂H₆O", "C2H4O"),
            CatalogueEntry::new("Ethanol", "C₂H₆O", "C2H6O"),
        ];
        let report = validate_all_parallel(&entries, &interpreter, 2);
        let kinds: Vec<&str> = report.outcomes().iter().map(|o| o.outcome.kind()).collect();
        assert_eq!(kinds, ["valid", "parse_failure", "mismatch", "valid"]);
        assert_eq!(report.outcomes()[1].name(), "Stalled");
        assert_eq!(
            report.outcomes()[1].outcome,
            ValidationOutcome::ParseFailure {
                reason: InterpretError::TimedOut(limit).to_string()
            }
        );
        assert_eq!(report.summary().parse_failures, 1);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let entries: Vec<CatalogueEntry> = five_entries().into_iter().cycle().take(200).collect();
        let sequential = validate_all(&entries, &oracle);
        let parallel = validate_all_parallel(&entries, &oracle, 8);
        assert_eq!(sequential, parallel);
        assert_eq!(validate_all_parallel(&entries, &oracle, 1), sequential);
    }

    #[test]
    fn test_empty_batch() {
        let report = validate_all_parallel(&[], &oracle, 4);
        assert!(report.outcomes().is_empty());
        assert_eq!(report.summary().total, 0);
    }

    #[test]
    fn test_with_smiles_interpreter() {
        let entries = vec![
            CatalogueEntry::new("Ethanol", "C₂H₆O", "CCO"),
            CatalogueEntry::new("Acetylkolin", "C₇H₁₆NO₂⁺", "CC(=O)OCC[N+](C)(C)C"),
            CatalogueEntry::new("Cellulose", "(C₆H₁₀O₅)ₙ", "C(C1C(C(C(C(O1)O)O)O)O)O"),
            CatalogueEntry::new("Benzen", "C₆H₆", "c1ccccc1"),
            CatalogueEntry::new("Broken", "C₆H₆", "c1cccc"),
        ];
        let report = validate_all(&entries, &SmilesInterpreter);
        let kinds: Vec<&str> = report.outcomes().iter().map(|o| o.outcome.kind()).collect();
        // The structure given for cellulose is a single glucose, one water too many.
        assert_eq!(kinds, ["valid", "valid", "mismatch", "valid", "parse_failure"]);
    }
}
