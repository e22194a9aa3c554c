//! Testudo failure taxonomy.
//!
//! Every way a lifecycle method can go wrong is represented by [`TestFailure`].
//! Assertion failures are the expected, informative kind; anything else that
//! escapes a method body (including a panic) is converted into the
//! `Unexpected` variant. The execution engine is the only sanctioned catcher:
//! failures are downgraded to reports at the method boundary and never abort
//! the run.

use std::any::Any;

use miette::Diagnostic;
use thiserror::Error;

/// Unified failure type for all lifecycle method outcomes.
#[derive(Debug, Clone, PartialEq, Error, Diagnostic)]
pub enum TestFailure {
    /// Raised by the assertion library when a check does not hold.
    #[error("AssertionFailure: {message}")]
    #[diagnostic(code(testudo::assertion))]
    Assertion { message: String },

    /// Any other failure escaping a method body, e.g. a caught panic.
    #[error("UnexpectedFailure: {message}")]
    #[diagnostic(code(testudo::unexpected))]
    Unexpected { message: String },

    /// A fixture could not be constructed.
    #[error("InstantiationError: could not construct fixture [{fixture}]: {message}")]
    #[diagnostic(
        code(testudo::instantiation),
        help("fixture factories must return Ok for the run to reach the fixture's methods")
    )]
    Instantiation { fixture: String, message: String },
}

impl TestFailure {
    pub fn assertion(message: impl Into<String>) -> Self {
        TestFailure::Assertion {
            message: message.into(),
        }
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        TestFailure::Unexpected {
            message: message.into(),
        }
    }

    pub fn instantiation(fixture: impl Into<String>, message: impl Into<String>) -> Self {
        TestFailure::Instantiation {
            fixture: fixture.into(),
            message: message.into(),
        }
    }

    /// Converts a payload recovered by `catch_unwind` into a failure.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "panic with non-string payload".to_string()
        };
        TestFailure::Unexpected {
            message: format!("panicked: {}", message),
        }
    }

    /// True for failures produced by the assertion library.
    pub fn is_assertion(&self) -> bool {
        matches!(self, TestFailure::Assertion { .. })
    }
}
