use std::future::Future;

use futures_util::future::BoxFuture;

/// Future returned by a step's forward or compensating action.
pub type StepFuture<'a, E> = BoxFuture<'a, Result<(), E>>;

pub(crate) type Action<'a, E> = Box<dyn FnOnce() -> StepFuture<'a, E> + Send + 'a>;

/// A named unit of work paired with the action that undoes it.
///
/// Both actions run at most once. Shared state between the two (for example
/// the list of files the forward action actually uploaded) lives outside the
/// step and is borrowed by both closures.
pub struct Step<'a, E> {
    pub(crate) name: String,
    pub(crate) forward: Action<'a, E>,
    pub(crate) compensate: Action<'a, E>,
}

impl<'a, E: 'a> Step<'a, E> {
    pub fn new<F, FFut, C, CFut>(name: impl Into<String>, forward: F, compensate: C) -> Self
    where
        F: FnOnce() -> FFut + Send + 'a,
        FFut: Future<Output = Result<(), E>> + Send + 'a,
        C: FnOnce() -> CFut + Send + 'a,
        CFut: Future<Output = Result<(), E>> + Send + 'a,
    {
        Self {
            name: name.into(),
            forward: Box::new(move || Box::pin(forward())),
            compensate: Box::new(move || Box::pin(compensate())),
        }
    }

    /// A step whose effect needs no undo (typically the last one).
    pub fn without_compensation<F, FFut>(name: impl Into<String>, forward: F) -> Self
    where
        F: FnOnce() -> FFut + Send + 'a,
        FFut: Future<Output = Result<(), E>> + Send + 'a,
        E: Send,
    {
        Self::new(name, forward, || async { Ok(()) })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<E> core::fmt::Debug for Step<'_, E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Step").field("name", &self.name).finish_non_exhaustive()
    }
}
