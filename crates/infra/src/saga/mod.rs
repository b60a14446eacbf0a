//! Saga-style transaction coordinator.
//!
//! A transaction is an ordered list of [`Step`]s. Steps run strictly in the
//! order they were added. When a forward action fails, every step that already
//! completed is compensated in reverse order. A failing (or panicking)
//! compensation is recorded and the remaining compensations still run.
//!
//! ```text
//! Idle ──execute──▶ Running ──▶ Completed
//!                      │
//!                      ├──▶ RolledBack            (every compensation succeeded)
//!                      ├──▶ PartiallyRolledBack   (manual cleanup may be required)
//!                      └──▶ Abandoned             (the run was dropped mid-flight)
//! ```
//!
//! Only one `execute` may be active per coordinator; `add_step` and `reset`
//! are refused while it runs.

mod error;
mod step;

pub use error::{RollbackError, RollbackFailure, RollbackOutcome, StepFailure, TransactionError};
pub use step::{Step, StepFuture};

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use step::Action;

/// Lifecycle state of a [`TransactionCoordinator`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    Idle,
    Running,
    Completed,
    RolledBack,
    PartiallyRolledBack,
    Abandoned,
}

struct Inner<'a, E> {
    pending: Vec<Step<'a, E>>,
    executed: Vec<String>,
    state: TransactionState,
}

/// Runs steps in order and compensates completed ones on failure.
pub struct TransactionCoordinator<'a, E> {
    label: String,
    inner: Mutex<Inner<'a, E>>,
    running: AtomicBool,
}

impl<E> core::fmt::Debug for TransactionCoordinator<'_, E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let inner = self.lock();
        f.debug_struct("TransactionCoordinator")
            .field("label", &self.label)
            .field("state", &inner.state)
            .field("pending", &inner.pending.len())
            .field("executed", &inner.executed)
            .finish()
    }
}

impl<'a, E> TransactionCoordinator<'a, E>
where
    E: core::fmt::Display + 'a,
{
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            inner: Mutex::new(Inner {
                pending: Vec::new(),
                executed: Vec::new(),
                state: TransactionState::Idle,
            }),
            running: AtomicBool::new(false),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Append a step. Names must be unique within the transaction.
    pub fn add_step(&self, step: Step<'a, E>) -> Result<(), TransactionError<E>> {
        if self.running.load(Ordering::Acquire) {
            return Err(TransactionError::AlreadyRunning);
        }
        let mut inner = self.lock();
        let taken = inner.pending.iter().any(|s| s.name == step.name)
            || inner.executed.iter().any(|name| *name == step.name);
        if taken {
            return Err(TransactionError::DuplicateStep(step.name));
        }
        inner.pending.push(step);
        Ok(())
    }

    /// Run every pending step; on failure compensate executed steps in reverse order.
    pub async fn execute(&self) -> Result<(), TransactionError<E>> {
        let _guard = RunGuard::acquire(self)?;

        let steps = {
            let mut inner = self.lock();
            inner.state = TransactionState::Running;
            inner.executed.clear();
            std::mem::take(&mut inner.pending)
        };
        info!(transaction = %self.label, steps = steps.len(), "transaction started");

        let mut undo: Vec<(String, Action<'a, E>)> = Vec::with_capacity(steps.len());
        for Step {
            name,
            forward,
            compensate,
        } in steps
        {
            debug!(transaction = %self.label, step = %name, "executing step");
            match forward().await {
                Ok(()) => {
                    self.lock().executed.push(name.clone());
                    undo.push((name, compensate));
                }
                Err(error) => {
                    warn!(
                        transaction = %self.label,
                        step = %name,
                        error = %error,
                        compensations = undo.len(),
                        "step failed, rolling back"
                    );
                    let failures = self.roll_back(undo).await;
                    let rollback = if failures.is_empty() {
                        info!(transaction = %self.label, "rollback fully succeeded");
                        self.lock().state = TransactionState::RolledBack;
                        RollbackOutcome::Complete
                    } else {
                        error!(
                            transaction = %self.label,
                            failed_compensations = failures.len(),
                            "rollback incomplete, manual cleanup may be required"
                        );
                        self.lock().state = TransactionState::PartiallyRolledBack;
                        RollbackOutcome::Partial(failures)
                    };
                    return Err(TransactionError::StepFailed(Box::new(StepFailure {
                        step: name,
                        error,
                        rollback,
                    })));
                }
            }
        }

        self.lock().state = TransactionState::Completed;
        info!(transaction = %self.label, "transaction completed");
        Ok(())
    }

    /// Drop pending steps and history and return to `Idle`.
    pub fn reset(&self) -> Result<(), TransactionError<E>> {
        if self.running.load(Ordering::Acquire) {
            return Err(TransactionError::AlreadyRunning);
        }
        let mut inner = self.lock();
        inner.pending.clear();
        inner.executed.clear();
        inner.state = TransactionState::Idle;
        Ok(())
    }

    pub fn state(&self) -> TransactionState {
        self.lock().state
    }

    /// Names of the steps whose forward action completed in the current or last run.
    pub fn executed_steps(&self) -> Vec<String> {
        self.lock().executed.clone()
    }

    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }

    async fn roll_back(&self, undo: Vec<(String, Action<'a, E>)>) -> Vec<RollbackFailure<E>> {
        let mut failures = Vec::new();

        for (name, compensate) in undo.into_iter().rev() {
            let outcome = AssertUnwindSafe(async move { compensate().await })
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(())) => {
                    debug!(transaction = %self.label, step = %name, "compensated step");
                }
                Ok(Err(err)) => {
                    error!(transaction = %self.label, step = %name, error = %err, "compensation failed");
                    failures.push(RollbackFailure {
                        step: name,
                        error: RollbackError::Failed(err),
                    });
                }
                Err(panic) => {
                    let message = panic_message(&*panic);
                    error!(transaction = %self.label, step = %name, panic = %message, "compensation panicked");
                    failures.push(RollbackFailure {
                        step: name,
                        error: RollbackError::Panicked(message),
                    });
                }
            }
        }
        failures
    }
}

impl<'a, E> TransactionCoordinator<'a, E> {
    fn lock(&self) -> MutexGuard<'_, Inner<'a, E>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Holds the single-run flag; clears it even if `execute` is dropped or unwinds.
struct RunGuard<'c, 'a, E> {
    coordinator: &'c TransactionCoordinator<'a, E>,
}

impl<'c, 'a, E> RunGuard<'c, 'a, E> {
    fn acquire(coordinator: &'c TransactionCoordinator<'a, E>) -> Result<Self, TransactionError<E>> {
        coordinator
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| TransactionError::AlreadyRunning)?;
        Ok(Self { coordinator })
    }
}

impl<E> Drop for RunGuard<'_, '_, E> {
    fn drop(&mut self) {
        {
            let mut inner = self.coordinator.lock();
            if inner.state == TransactionState::Running {
                warn!(
                    transaction = %self.coordinator.label,
                    executed = ?inner.executed,
                    "transaction abandoned mid-run, executed steps were not compensated"
                );
                inner.state = TransactionState::Abandoned;
            }
        }
        self.coordinator.running.store(false, Ordering::Release);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::sync::Notify;

    type Log = Mutex<Vec<String>>;

    fn push(log: &Log, entry: String) {
        log.lock().unwrap().push(entry);
    }

    fn recording_step<'a>(name: &'static str, log: &'a Log, fail: bool) -> Step<'a, String> {
        Step::new(
            name,
            move || async move {
                push(log, format!("do {name}"));
                if fail {
                    Err(format!("{name} exploded"))
                } else {
                    Ok(())
                }
            },
            move || async move {
                push(log, format!("undo {name}"));
                Ok(())
            },
        )
    }

    #[tokio::test]
    async fn completed_run_never_compensates() {
        let log = Log::default();
        let tx = TransactionCoordinator::new("happy");
        tx.add_step(recording_step("a", &log, false)).unwrap();
        tx.add_step(recording_step("b", &log, false)).unwrap();

        tx.execute().await.unwrap();

        assert_eq!(tx.state(), TransactionState::Completed);
        assert_eq!(tx.executed_steps(), vec!["a", "b"]);
        assert_eq!(tx.pending_len(), 0);
        assert_eq!(*log.lock().unwrap(), vec!["do a", "do b"]);
    }

    #[tokio::test]
    async fn failure_compensates_executed_steps_in_reverse() {
        let log = Log::default();
        let tx = TransactionCoordinator::new("three-steps");
        tx.add_step(recording_step("A", &log, false)).unwrap();
        tx.add_step(recording_step("B", &log, false)).unwrap();
        tx.add_step(recording_step("C", &log, true)).unwrap();

        let err = tx.execute().await.unwrap_err();

        assert_eq!(*log.lock().unwrap(), vec!["do A", "do B", "do C", "undo B", "undo A"]);
        assert_eq!(err.failed_step(), Some("C"));
        assert_eq!(err.step_error().map(String::as_str), Some("C exploded"));
        assert!(err.to_string().contains("rollback fully succeeded"));
        assert_eq!(tx.state(), TransactionState::RolledBack);
        assert_eq!(tx.executed_steps(), vec!["A", "B"]);
    }

    #[tokio::test]
    async fn failing_compensation_does_not_stop_rollback() {
        let log = Log::default();
        let tx = TransactionCoordinator::new("partial");
        tx.add_step(recording_step("A", &log, false)).unwrap();
        {
            let log = &log;
            tx.add_step(Step::new(
                "B",
                move || async move {
                    push(log, "do B".to_string());
                    Ok(())
                },
                || async { Err("bucket unreachable".to_string()) },
            ))
            .unwrap();
        }
        tx.add_step(recording_step("C", &log, true)).unwrap();

        let err = tx.execute().await.unwrap_err();

        assert_eq!(*log.lock().unwrap(), vec!["do A", "do B", "do C", "undo A"]);
        assert!(err.requires_manual_cleanup());
        match err.rollback() {
            Some(RollbackOutcome::Partial(failures)) => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].step, "B");
            }
            other => panic!("expected partial rollback, got {other:?}"),
        }
        assert!(err.to_string().contains("manual cleanup may be required"));
        assert_eq!(tx.state(), TransactionState::PartiallyRolledBack);
    }

    fn explode() -> Result<(), String> {
        panic!("compensation bug")
    }

    #[tokio::test]
    async fn panicking_compensation_is_contained() {
        let log = Log::default();
        let tx = TransactionCoordinator::new("panics");
        tx.add_step(recording_step("A", &log, false)).unwrap();
        tx.add_step(Step::new(
            "B",
            || async { Ok(()) },
            || async { explode() },
        ))
        .unwrap();
        tx.add_step(recording_step("C", &log, true)).unwrap();

        let err = tx.execute().await.unwrap_err();

        assert!(log.lock().unwrap().contains(&"undo A".to_string()));
        assert!(err.to_string().contains("compensation panicked: compensation bug"));
        assert_eq!(tx.state(), TransactionState::PartiallyRolledBack);
    }

    #[tokio::test]
    async fn first_step_failure_has_nothing_to_compensate() {
        let log = Log::default();
        let tx = TransactionCoordinator::new("first");
        tx.add_step(recording_step("A", &log, true)).unwrap();
        tx.add_step(recording_step("B", &log, false)).unwrap();

        let err = tx.execute().await.unwrap_err();

        assert_eq!(*log.lock().unwrap(), vec!["do A"]);
        assert!(err.rollback().is_some_and(RollbackOutcome::is_complete));
    }

    #[test]
    fn duplicate_step_names_are_rejected() {
        let log = Log::default();
        let tx = TransactionCoordinator::new("dupes");
        tx.add_step(recording_step("upload", &log, false)).unwrap();

        let err = tx.add_step(recording_step("upload", &log, false)).unwrap_err();
        assert!(matches!(err, TransactionError::DuplicateStep(ref name) if name == "upload"));
        assert_eq!(tx.pending_len(), 1);
    }

    #[tokio::test]
    async fn structural_changes_are_refused_while_running() {
        let release = Notify::new();
        let tx = TransactionCoordinator::new("busy");
        {
            let release = &release;
            tx.add_step(Step::without_compensation("wait", move || async move {
                release.notified().await;
                Ok::<(), String>(())
            }))
            .unwrap();
        }

        let (first, (second, added, reset)) = tokio::join!(tx.execute(), async {
            let second = tx.execute().await;
            let added = tx.add_step(Step::without_compensation("late", || async { Ok(()) }));
            let reset = tx.reset();
            release.notify_one();
            (second, added, reset)
        });

        assert!(first.is_ok());
        assert!(matches!(second, Err(TransactionError::AlreadyRunning)));
        assert!(matches!(added, Err(TransactionError::AlreadyRunning)));
        assert!(matches!(reset, Err(TransactionError::AlreadyRunning)));
        assert_eq!(tx.state(), TransactionState::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_run_is_abandoned_and_reusable_after_reset() {
        let log = Log::default();
        let tx = TransactionCoordinator::new("timeout");
        tx.add_step(recording_step("A", &log, false)).unwrap();
        tx.add_step(Step::without_compensation("slow", || async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }))
        .unwrap();

        let timed_out = tokio::time::timeout(Duration::from_secs(1), tx.execute()).await;
        assert!(timed_out.is_err());
        assert_eq!(tx.state(), TransactionState::Abandoned);
        assert_eq!(tx.executed_steps(), vec!["A"]);

        tx.reset().unwrap();
        assert_eq!(tx.state(), TransactionState::Idle);
        tx.add_step(recording_step("B", &log, false)).unwrap();
        tx.execute().await.unwrap();
        assert_eq!(tx.executed_steps(), vec!["B"]);
    }
}
