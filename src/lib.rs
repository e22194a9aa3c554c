//! Testudo: a fixture-based, tick-driven test orchestration engine.
//!
//! Fixtures and their lifecycle methods are declared through a [`Registry`],
//! snapshotted into a [`Catalog`], filtered by a persisted selection, and
//! executed by a cooperative [`Runner`] driven one tick at a time by the host.
//! Test bodies may be plain synchronous functions or suspendable step
//! sequences that pause across ticks; failures are contained per entry, so a
//! run always reaches its summary.
//!
//! A minimal run looks like:
//!
//! ```
//! use testudo::{assert, Catalog, Registry, Runner, TestFailure};
//!
//! #[derive(Default)]
//! struct Math;
//!
//! impl Math {
//!     fn adds(&mut self) -> Result<(), TestFailure> {
//!         assert::is_true(2 + 2 == 4, "arithmetic holds")
//!     }
//! }
//!
//! let mut registry = Registry::new();
//! registry.test_fixture::<Math>("Math").test("adds", Math::adds);
//!
//! let mut catalog = Catalog::discover(&registry);
//! catalog.set_all(true);
//!
//! let mut runner = Runner::new(catalog);
//! runner.run_to_completion();
//! assert_eq!(runner.exit_code(), 0);
//! ```

pub mod assert;
pub mod catalog;
pub mod failure;
pub mod report;
pub mod runner;
pub mod selection;
pub mod suspend;

pub use catalog::{
    AssemblyEntry, AssemblyGroup, Catalog, FixtureCell, FixtureEntry, FixtureHandle, LogEntry,
    Registry, Severity, TestEntry, TestGroup, TestState,
};
pub use failure::TestFailure;
pub use report::{ReportLog, RunReport};
pub use runner::{LogHub, RunPhase, Runner, FLOW_MARKER};
pub use suspend::{Step, StepHandle, StepResult, StepSequence, StepState, Suspend};
