//! Suspendable-operation adapter.
//!
//! A test, setup, or teardown body that needs to pause across scheduler ticks
//! is expressed as a [`StepSequence`]: an iterator whose items are either a
//! suspension request, a yielded value, or a failure. [`StepHandle`] wraps
//! such a sequence so the execution engine can drive it one step per resume,
//! honor every suspension request unchanged, capture any failure without
//! rethrowing it, and optionally extract a typed value yielded mid-sequence.
//!
//! This is what lets the engine treat a one-shot synchronous method and a
//! multi-step body uniformly: the latter is wrapped in a handle, the former
//! invoked directly inside a local failure boundary.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use crate::failure::TestFailure;

/// A suspension request yielded by a body and honored by the driver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Suspend {
    /// Resume on the driver's next tick.
    NextTick,
    /// Resume after the given number of further ticks have elapsed.
    Ticks(u32),
    /// Resume once the given wall-clock delay has elapsed.
    Seconds(f64),
}

/// One step of a suspendable body.
pub enum Step {
    /// Pause; the scheduler resumes the sequence later.
    Pause(Suspend),
    /// Yield a value; a value matching the handle's target type completes it.
    Yield(Box<dyn Any>),
}

impl Step {
    /// Convenience for the common "give control back until next tick" step.
    pub fn next_tick() -> StepResult {
        Ok(Step::Pause(Suspend::NextTick))
    }

    /// Yield a typed value to the driving handle.
    pub fn yield_value<T: Any>(value: T) -> StepResult {
        Ok(Step::Yield(Box::new(value)))
    }
}

pub type StepResult = Result<Step, TestFailure>;

/// A suspendable body: yields steps until exhausted.
pub type StepSequence = Box<dyn Iterator<Item = StepResult>>;

/// Outcome of resuming a [`StepHandle`] once.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepState {
    /// The sequence suspended; resume again after honoring the request.
    Pending(Suspend),
    /// The sequence is complete (ran out, yielded a matching value, or failed).
    Finished,
}

/// Drives a [`StepSequence`] step by step on behalf of the scheduler.
///
/// The handle stops driving the sequence as soon as it fails or yields a
/// value whose runtime type matches `T`. A stored failure is never rethrown
/// by `resume`; the scheduler inspects [`StepHandle::failure`] after the
/// handle finishes. Reading [`StepHandle::value`] while a failure is stored
/// surfaces that failure instead of returning a default.
pub struct StepHandle<T> {
    sequence: Option<StepSequence>,
    value: Option<T>,
    failure: Option<TestFailure>,
}

impl<T: Any> StepHandle<T> {
    pub fn new(sequence: StepSequence) -> Self {
        Self {
            sequence: Some(sequence),
            value: None,
            failure: None,
        }
    }

    /// Drives the sequence by exactly one step.
    ///
    /// A panic inside the step is contained here and stored as the handle's
    /// failure, exactly like an `Err` item.
    pub fn resume(&mut self) -> StepState {
        let Some(sequence) = self.sequence.as_mut() else {
            return StepState::Finished;
        };

        let item = panic::catch_unwind(AssertUnwindSafe(|| sequence.next()));
        match item {
            Err(payload) => {
                self.failure = Some(TestFailure::from_panic(payload));
                self.sequence = None;
                StepState::Finished
            }
            Ok(None) => {
                self.sequence = None;
                StepState::Finished
            }
            Ok(Some(Err(failure))) => {
                self.failure = Some(failure);
                self.sequence = None;
                StepState::Finished
            }
            Ok(Some(Ok(Step::Pause(suspend)))) => StepState::Pending(suspend),
            Ok(Some(Ok(Step::Yield(yielded)))) => match yielded.downcast::<T>() {
                Ok(value) => {
                    self.value = Some(*value);
                    self.sequence = None;
                    StepState::Finished
                }
                // A yield the handle has no use for is surfaced to the
                // scheduler unchanged, as a plain next-tick suspension.
                Err(_) => StepState::Pending(Suspend::NextTick),
            },
        }
    }

    pub fn finished(&self) -> bool {
        self.sequence.is_none()
    }

    pub fn failure(&self) -> Option<&TestFailure> {
        self.failure.as_ref()
    }

    pub fn take_failure(&mut self) -> Option<TestFailure> {
        self.failure.take()
    }

    /// The typed value yielded mid-sequence, if any.
    ///
    /// Fails on access when the sequence failed, so a stored failure can
    /// never be mistaken for "no value yielded".
    pub fn value(&self) -> Result<Option<&T>, TestFailure> {
        if let Some(failure) = &self.failure {
            return Err(failure.clone());
        }
        Ok(self.value.as_ref())
    }
}
