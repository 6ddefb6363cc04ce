//! The seam between the pipeline and whatever turns structures into formulas.

use crate::SmilesError;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::*;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InterpretError {
    #[error("{0}")]
    Rejected(String),
    #[error("Interpreter did not answer within {0:?}")]
    TimedOut(Duration),
    #[error("Interpreter crashed: {0}")]
    Crashed(String),
}

impl From<SmilesError> for InterpretError {
    fn from(error: SmilesError) -> Self {
        InterpretError::Rejected(error.to_string())
    }
}

/// Turns a structural notation string into a derived molecular formula.
///
/// Implementations are shared between worker threads, so they must be `Send + Sync`.
pub trait StructureInterpreter: Send + Sync {
    fn interpret(&self, notation: &str) -> Result<String, InterpretError>;
}

impl<F> StructureInterpreter for F
where
    F: Fn(&str) -> Result<String, InterpretError> + Send + Sync,
{
    fn interpret(&self, notation: &str) -> Result<String, InterpretError> {
        self(notation)
    }
}

/// Gives up on calls to the wrapped interpreter after a deadline.
///
/// Each call runs on its own thread. A call that misses the deadline is reported as
/// [`InterpretError::TimedOut`] and its thread is left to finish in the background;
/// a call that panics is reported as [`InterpretError::Crashed`]. Threads still running
/// are counted by [`WithTimeout::running`] and logged whenever a call times out.
pub struct WithTimeout<I> {
    inner: Arc<I>,
    limit: Duration,
    running: Arc<AtomicUsize>,
}

/// Decrements the running-call count when the call's thread finishes, panicking or not.
struct RunningCall(Arc<AtomicUsize>);

impl Drop for RunningCall {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl<I: StructureInterpreter + 'static> WithTimeout<I> {
    pub fn new(inner: I, limit: Duration) -> Self {
        Self {
            inner: Arc::new(inner),
            limit,
            running: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn limit(&self) -> Duration {
        self.limit
    }

    /// Calls whose threads have not finished yet, abandoned ones included.
    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }
}

impl<I: StructureInterpreter + 'static> StructureInterpreter for WithTimeout<I> {
    fn interpret(&self, notation: &str) -> Result<String, InterpretError> {
        let (tx, rx) = mpsc::channel();
        let inner = Arc::clone(&self.inner);
        let owned = notation.to_string();
        self.running.fetch_add(1, Ordering::SeqCst);
        let call = RunningCall(Arc::clone(&self.running));
        thread::Builder::new()
            .name("interpreter".to_string())
            .spawn(move || {
                let _call = call;
                // The receiver is gone once the deadline has passed.
                let _ = tx.send(inner.interpret(&owned));
            })
            .map_err(|e| InterpretError::Crashed(format!("Failed to spawn interpreter: {e}")))?;

        match rx.recv_timeout(self.limit) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "Interpreter timed out after {:?} on {notation}, {} calls still running",
                    self.limit,
                    self.running()
                );
                Err(InterpretError::TimedOut(self.limit))
            }
            Err(RecvTimeoutError::Disconnected) => Err(InterpretError::Crashed(format!(
                "interpreter thread exited without an answer for {notation}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SmilesInterpreter;

    fn slow(notation: &str) -> Result<String, InterpretError> {
        thread::sleep(Duration::from_millis(500));
        Ok(notation.to_string())
    }

    fn crashing(_: &str) -> Result<String, InterpretError> {
        panic!("boom")
    }

    #[test]
    fn test_closure_interpreter() {
        let echo = |notation: &str| -> Result<String, InterpretError> { Ok(notation.to_uppercase()) };
        assert_eq!(echo.interpret("h2o"), Ok("H2O".to_string()));
    }

    #[test]
    fn test_smiles_errors_become_rejections() {
        let error = InterpretError::from(SmilesError::UnclosedBracket(3));
        assert_eq!(
            error,
            InterpretError::Rejected("Unclosed bracket '[' at position 3".to_string())
        );
    }

    #[test]
    fn test_timeout_passes_fast_answers_through() {
        let interpreter = WithTimeout::new(SmilesInterpreter, Duration::from_secs(5));
        assert_eq!(interpreter.interpret("CCO"), Ok("C2H6O".to_string()));
        assert!(matches!(
            interpreter.interpret("C1CC"),
            Err(InterpretError::Rejected(_))
        ));
    }

    #[test]
    fn test_timeout_gives_up() {
        let interpreter = WithTimeout::new(slow, Duration::from_millis(20));
        assert_eq!(
            interpreter.interpret("CCO"),
            Err(InterpretError::TimedOut(Duration::from_millis(20)))
        );
    }

    #[test]
    fn test_abandoned_calls_are_counted() {
        let interpreter = WithTimeout::new(slow, Duration::from_millis(20));
        assert_eq!(interpreter.running(), 0);
        assert!(interpreter.interpret("CCO").is_err());
        assert_eq!(interpreter.running(), 1);
        thread::sleep(Duration::from_millis(1500));
        assert_eq!(interpreter.running(), 0);
    }

    #[test]
    fn test_timeout_reports_crashes() {
        let interpreter = WithTimeout::new(crashing, Duration::from_secs(5));
        assert!(matches!(
            interpreter.interpret("CCO"),
            Err(InterpretError::Crashed(_))
        ));
        thread::sleep(Duration::from_millis(100));
        assert_eq!(interpreter.running(), 0);
    }

    #[test]
    fn test_trait_object() {
        let interpreter: &dyn StructureInterpreter = &SmilesInterpreter;
        assert_eq!(interpreter.interpret("O"), Ok("H2O".to_string()));
    }
}
