//! Scripted failures for the in-memory adapters.
//!
//! A [`FaultRule`] names an operation, optionally a path (or key) fragment,
//! how many matching calls to let through first and how many to fail.
//! Rules are evaluated in registration order; the first one that fires wins.

use std::sync::{Mutex, PoisonError};

use forgepress_core::Fault;

/// A scripted failure for operation kind `Op`.
#[derive(Debug, Clone)]
pub struct FaultRule<Op> {
    op: Op,
    target: Option<String>,
    skip: u32,
    remaining: Option<u32>,
    fault: Fault,
}

impl<Op> FaultRule<Op> {
    /// Fail every call of `op` with `fault`.
    pub fn new(op: Op, fault: Fault) -> Self {
        Self {
            op,
            target: None,
            skip: 0,
            remaining: None,
            fault,
        }
    }

    /// Only match calls where some target contains `fragment`.
    pub fn on(mut self, fragment: impl Into<String>) -> Self {
        self.target = Some(fragment.into());
        self
    }

    /// Let the first `calls` matching calls succeed.
    pub fn after(mut self, calls: u32) -> Self {
        self.skip = calls;
        self
    }

    /// Fire at most `times` times, then let calls through again.
    pub fn times(mut self, times: u32) -> Self {
        self.remaining = Some(times);
        self
    }

    fn matches(&self, op: &Op, targets: &[&str]) -> bool
    where
        Op: PartialEq,
    {
        if self.op != *op {
            return false;
        }
        match &self.target {
            None => true,
            Some(fragment) => targets.iter().any(|t| t.contains(fragment.as_str())),
        }
    }
}

/// Ordered set of [`FaultRule`]s consulted on every adapter call.
#[derive(Debug)]
pub(crate) struct FaultPlan<Op> {
    rules: Mutex<Vec<FaultRule<Op>>>,
}

impl<Op> Default for FaultPlan<Op> {
    fn default() -> Self {
        Self {
            rules: Mutex::new(Vec::new()),
        }
    }
}

impl<Op: PartialEq> FaultPlan<Op> {
    pub(crate) fn push(&self, rule: FaultRule<Op>) {
        self.rules
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(rule);
    }

    pub(crate) fn clear(&self) {
        self.rules.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    /// Consume one firing of the first matching rule, if any.
    pub(crate) fn check(&self, op: Op, targets: &[&str]) -> Result<(), Fault> {
        let mut rules = self.rules.lock().unwrap_or_else(PoisonError::into_inner);

        for rule in rules.iter_mut() {
            if !rule.matches(&op, targets) || rule.remaining == Some(0) {
                continue;
            }
            if rule.skip > 0 {
                rule.skip -= 1;
                continue;
            }
            if let Some(remaining) = rule.remaining.as_mut() {
                *remaining -= 1;
            }
            return Err(rule.fault.clone());
        }
        Ok(())
    }
}
