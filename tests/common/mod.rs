//! Shared fixture kit for the integration tests.

#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use testudo::{Catalog, Registry, Runner, TestFailure};

/// A shared, append-only record of lifecycle events.
pub type Trace = Rc<RefCell<Vec<String>>>;

pub fn trace() -> Trace {
    Rc::new(RefCell::new(Vec::new()))
}

pub fn recorded(trace: &Trace) -> Vec<String> {
    trace.borrow().clone()
}

/// A fixture that appends every lifecycle call to a shared trace.
pub struct Recorder {
    pub trace: Trace,
}

impl Recorder {
    pub fn log(&mut self, event: &str) {
        self.trace.borrow_mut().push(event.to_string());
    }
}

/// Factory for registering [`Recorder`] fixtures against a shared trace.
pub fn recorder_factory(trace: &Trace) -> impl Fn() -> Result<Recorder, TestFailure> + 'static {
    let trace = trace.clone();
    move || {
        Ok(Recorder {
            trace: trace.clone(),
        })
    }
}

/// Enables everything in the registry and drives a run to completion.
pub fn run_all(registry: &Registry) -> Runner {
    let mut catalog = Catalog::discover(registry);
    catalog.set_all(true);
    let mut runner = Runner::new(catalog);
    runner.run_to_completion();
    runner
}
