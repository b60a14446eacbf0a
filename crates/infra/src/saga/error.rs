use core::fmt;

/// Why a compensating action did not complete.
#[derive(Debug)]
pub enum RollbackError<E> {
    Failed(E),
    Panicked(String),
}

impl<E: fmt::Display> fmt::Display for RollbackError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RollbackError::Failed(err) => write!(f, "{err}"),
            RollbackError::Panicked(msg) => write!(f, "compensation panicked: {msg}"),
        }
    }
}

/// A compensation that failed during rollback.
#[derive(Debug)]
pub struct RollbackFailure<E> {
    pub step: String,
    pub error: RollbackError<E>,
}

/// Result of the rollback that follows a failed step.
#[derive(Debug)]
pub enum RollbackOutcome<E> {
    /// Every executed step was compensated.
    Complete,
    /// Some compensations failed; the listed effects may still be in place.
    Partial(Vec<RollbackFailure<E>>),
}

impl<E> RollbackOutcome<E> {
    pub fn is_complete(&self) -> bool {
        matches!(self, RollbackOutcome::Complete)
    }
}

/// A forward action failed; carries the original error and the rollback result.
#[derive(Debug)]
pub struct StepFailure<E> {
    pub step: String,
    pub error: E,
    pub rollback: RollbackOutcome<E>,
}

impl<E: fmt::Display> fmt::Display for StepFailure<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "step '{}' failed: {}; ", self.step, self.error)?;
        match &self.rollback {
            RollbackOutcome::Complete => write!(f, "rollback fully succeeded"),
            RollbackOutcome::Partial(failures) => {
                write!(f, "rollback incomplete, manual cleanup may be required (")?;
                for (i, failure) in failures.iter().enumerate() {
                    if i > 0 {
                        write!(f, "; ")?;
                    }
                    write!(f, "{}: {}", failure.step, failure.error)?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Transaction coordinator error.
#[derive(Debug)]
pub enum TransactionError<E> {
    /// `execute`, `add_step` or `reset` was called while a run is active.
    AlreadyRunning,
    /// A step with the same name is already registered.
    DuplicateStep(String),
    /// A forward action failed and rollback ran.
    StepFailed(Box<StepFailure<E>>),
}

impl<E> TransactionError<E> {
    pub fn failed_step(&self) -> Option<&str> {
        match self {
            TransactionError::StepFailed(failure) => Some(&failure.step),
            _ => None,
        }
    }

    /// The forward action's original error.
    pub fn step_error(&self) -> Option<&E> {
        match self {
            TransactionError::StepFailed(failure) => Some(&failure.error),
            _ => None,
        }
    }

    pub fn rollback(&self) -> Option<&RollbackOutcome<E>> {
        match self {
            TransactionError::StepFailed(failure) => Some(&failure.rollback),
            _ => None,
        }
    }

    /// Whether some effects may have survived the rollback.
    pub fn requires_manual_cleanup(&self) -> bool {
        self.rollback().is_some_and(|r| !r.is_complete())
    }
}

impl<E: fmt::Display> fmt::Display for TransactionError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionError::AlreadyRunning => write!(f, "transaction is already running"),
            TransactionError::DuplicateStep(name) => write!(f, "duplicate step name '{name}'"),
            TransactionError::StepFailed(failure) => write!(f, "transaction failed: {failure}"),
        }
    }
}

impl<E> std::error::Error for TransactionError<E>
where
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransactionError::StepFailed(failure) => Some(&failure.error),
            _ => None,
        }
    }
}
