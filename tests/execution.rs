//! End-to-end runs through the execution engine: lifecycle ordering, failure
//! containment, suspension, log capture, and status codes.

mod common;

use common::{recorded, recorder_factory, run_all, trace, Recorder};
use testudo::suspend::Step;
use testudo::{
    Catalog, FixtureCell, LogHub, Registry, Runner, Severity, StepSequence, Suspend, TestFailure,
    TestState, FLOW_MARKER,
};

use std::cell::RefCell;
use std::rc::Rc;

// ============================================================================
// LIFECYCLE ORDERING
// ============================================================================

#[test]
fn passing_run_reports_all_passed() {
    let t = trace();
    let mut registry = Registry::new();
    registry
        .test_fixture_with("Math", recorder_factory(&t))
        .test("adds", |r: &mut Recorder| {
            r.log("adds");
            Ok(())
        })
        .test("subtracts", |r: &mut Recorder| {
            r.log("subtracts");
            Ok(())
        });

    let runner = run_all(&registry);
    assert_eq!(runner.exit_code(), 0);
    assert_eq!(runner.tests_completed(), 2);
    assert_eq!(runner.summary(), Some("All 2 Tests Passed"));
    assert_eq!(recorded(&t), ["adds", "subtracts"]);

    let group = &runner.catalog().tests[0];
    assert_eq!(group.fixture.state, TestState::Passed);
    assert!(group.tests.iter().all(|t| t.state == TestState::Passed));
}

#[test]
fn setups_run_in_reverse_declaration_order() {
    let t = trace();
    let mut registry = Registry::new();
    registry
        .test_fixture_with("Ordered", recorder_factory(&t))
        .setup("base", |r: &mut Recorder| {
            r.log("base");
            Ok(())
        })
        .setup("derived", |r: &mut Recorder| {
            r.log("derived");
            Ok(())
        })
        .test("body", |r: &mut Recorder| {
            r.log("body");
            Ok(())
        });

    let runner = run_all(&registry);
    assert_eq!(runner.exit_code(), 0);
    assert_eq!(recorded(&t), ["derived", "base", "body"]);
}

#[test]
fn teardowns_run_in_declaration_order_even_after_a_failing_body() {
    let t = trace();
    let mut registry = Registry::new();
    registry
        .test_fixture_with("Cleanup", recorder_factory(&t))
        .test("fails", |_r: &mut Recorder| {
            Err(TestFailure::assertion("nope"))
        })
        .teardown("first", |r: &mut Recorder| {
            r.log("first");
            Ok(())
        })
        .teardown("second", |r: &mut Recorder| {
            r.log("second");
            Ok(())
        });

    let runner = run_all(&registry);
    assert_eq!(runner.exit_code(), 2);
    assert_eq!(runner.failed_test_count(), 1);
    assert_eq!(recorded(&t), ["first", "second"]);
}

#[test]
fn each_test_gets_a_fresh_fixture_instance() {
    #[derive(Default)]
    struct Counter {
        calls: u32,
    }
    impl Counter {
        fn bump(&mut self) -> Result<(), TestFailure> {
            self.calls += 1;
            if self.calls == 1 {
                Ok(())
            } else {
                Err(TestFailure::assertion("instance was shared across tests"))
            }
        }
    }

    let mut registry = Registry::new();
    registry
        .test_fixture::<Counter>("Isolated")
        .test("first", Counter::bump)
        .test("second", Counter::bump);

    let runner = run_all(&registry);
    assert_eq!(runner.exit_code(), 0);
    assert_eq!(runner.tests_completed(), 2);
}

// ============================================================================
// FAILURE SEMANTICS
// ============================================================================

#[test]
fn setup_failure_skips_the_body_but_still_runs_teardowns() {
    let t = trace();
    let mut registry = Registry::new();
    registry
        .test_fixture_with("Guarded", recorder_factory(&t))
        .setup("broken", |_r: &mut Recorder| {
            Err(TestFailure::unexpected("no database"))
        })
        .test("body", |r: &mut Recorder| {
            r.log("body");
            Ok(())
        })
        .teardown("cleanup", |r: &mut Recorder| {
            r.log("cleanup");
            Ok(())
        });

    let runner = run_all(&registry);
    assert_eq!(runner.failed_setup_count(), 1);
    assert_eq!(runner.failed_test_count(), 1);
    assert_eq!(recorded(&t), ["cleanup"]);

    let entry = &runner.catalog().tests[0].tests[0];
    assert_eq!(entry.setup_state, TestState::Failed);
    assert_eq!(entry.state, TestState::Failed);
    assert_eq!(entry.teardown_state, TestState::Passed);
}

#[test]
fn teardown_failure_invalidates_a_passing_test() {
    let mut registry = Registry::new();
    registry
        .test_fixture_with("Fragile", recorder_factory(&trace()))
        .test("passes", |_r: &mut Recorder| Ok(()))
        .teardown("leaks", |_r: &mut Recorder| {
            Err(TestFailure::unexpected("resource leak"))
        });

    let runner = run_all(&registry);
    assert_eq!(runner.failed_teardown_count(), 1);
    assert_eq!(runner.failed_test_count(), 1);
    assert_eq!(runner.exit_code(), 2);

    let entry = &runner.catalog().tests[0].tests[0];
    assert_eq!(entry.state, TestState::Failed);
    assert_eq!(entry.teardown_state, TestState::Failed);
    assert!(runner.reports().failed_tests[0]
        .message()
        .contains("Teardown Failed"));
}

#[test]
fn failures_are_isolated_per_test() {
    let mut registry = Registry::new();
    registry
        .test_fixture_with("Mixed", recorder_factory(&trace()))
        .test("fails", |_r: &mut Recorder| {
            Err(TestFailure::assertion("broken"))
        })
        .test("passes", |_r: &mut Recorder| Ok(()));

    let runner = run_all(&registry);
    assert_eq!(runner.tests_completed(), 2);
    assert_eq!(runner.failed_test_count(), 1);
    assert_eq!(runner.reports().passed.len(), 1);
    assert_eq!(runner.exit_code(), 2);

    let summary = runner.summary().unwrap();
    assert!(summary.starts_with("2 Tests Run, 1 Tests Failed, 1 Tests Passed"));
    assert!(summary.contains("Failed Tests:\n1. Fixture: [Mixed] Test: [fails]"));
}

#[test]
fn a_panicking_body_is_contained_as_a_failure() {
    let mut registry = Registry::new();
    registry
        .test_fixture_with("Panics", recorder_factory(&trace()))
        .test("explodes", |_r: &mut Recorder| -> Result<(), TestFailure> {
            panic!("index out of bounds")
        })
        .test("survives", |_r: &mut Recorder| Ok(()));

    let runner = run_all(&registry);
    assert_eq!(runner.tests_completed(), 2);
    assert_eq!(runner.failed_test_count(), 1);
    assert!(runner.reports().failed_tests[0]
        .message()
        .contains("panicked: index out of bounds"));
}

#[test]
fn instantiation_failure_is_contained_per_fixture() {
    let mut registry = Registry::new();
    registry
        .test_fixture_with("Broken", || -> Result<Recorder, TestFailure> {
            Err(TestFailure::unexpected("no display"))
        })
        .test("never_runs", |_r: &mut Recorder| Ok(()));
    registry
        .test_fixture_with("Healthy", recorder_factory(&trace()))
        .test("runs", |_r: &mut Recorder| Ok(()));

    let runner = run_all(&registry);
    assert_eq!(runner.tests_completed(), 2);
    assert_eq!(runner.failed_setup_count(), 1);
    assert_eq!(runner.failed_test_count(), 1);
    assert_eq!(runner.reports().passed.len(), 1);

    let report = runner.reports().failed_setups[0].message();
    assert!(report.contains("Fixture: [Broken]"));
    assert!(report.contains("InstantiationError"));
}

// ============================================================================
// ASSEMBLY STAGES
// ============================================================================

#[test]
fn assembly_setups_bracket_the_test_stage() {
    let t = trace();
    let mut registry = Registry::new();
    registry
        .assembly_fixture_with("World", recorder_factory(&t))
        .setup("boot", |r: &mut Recorder| {
            r.log("boot");
            Ok(())
        })
        .teardown("shutdown", |r: &mut Recorder| {
            r.log("shutdown");
            Ok(())
        });
    registry
        .test_fixture_with("Suite", recorder_factory(&t))
        .test("body", |r: &mut Recorder| {
            r.log("body");
            Ok(())
        });

    let runner = run_all(&registry);
    assert_eq!(runner.exit_code(), 0);
    assert_eq!(recorded(&t), ["boot", "body", "shutdown"]);
}

#[test]
fn assembly_setup_failure_still_lets_tests_run() {
    let mut registry = Registry::new();
    registry
        .assembly_fixture_with("World", recorder_factory(&trace()))
        .setup("boot", |_r: &mut Recorder| {
            Err(TestFailure::unexpected("port in use"))
        });
    registry
        .test_fixture_with("Suite", recorder_factory(&trace()))
        .test("body", |_r: &mut Recorder| Ok(()));

    let runner = run_all(&registry);
    assert_eq!(runner.failed_setup_count(), 1);
    assert_eq!(runner.failed_test_count(), 0);
    assert_eq!(runner.tests_completed(), 1);
    // No test failed, so setup failures dominate the status code.
    assert_eq!(runner.exit_code(), 1);
}

#[test]
fn assembly_teardown_failure_yields_its_own_status_code() {
    let mut registry = Registry::new();
    registry
        .assembly_fixture_with("World", recorder_factory(&trace()))
        .teardown("shutdown", |_r: &mut Recorder| {
            Err(TestFailure::unexpected("zombie process"))
        });
    registry
        .test_fixture_with("Suite", recorder_factory(&trace()))
        .test("body", |_r: &mut Recorder| Ok(()));

    let runner = run_all(&registry);
    assert_eq!(runner.failed_teardown_count(), 1);
    assert_eq!(runner.exit_code(), 3);
}

#[test]
fn failing_assembly_constructor_marks_every_entry_failed() {
    let mut registry = Registry::new();
    registry
        .assembly_fixture_with("World", || -> Result<Recorder, TestFailure> {
            Err(TestFailure::unexpected("headless host"))
        })
        .setup("boot", |_r: &mut Recorder| Ok(()))
        .setup("warm_cache", |_r: &mut Recorder| Ok(()));

    let runner = run_all(&registry);
    assert_eq!(runner.failed_setup_count(), 2);
    assert_eq!(runner.exit_code(), 1);
    let group = &runner.catalog().assembly_setups[0];
    assert!(group.entries.iter().all(|e| e.state == TestState::Failed));
}

// ============================================================================
// SELECTION AND SCHEDULING
// ============================================================================

#[test]
fn disabled_tests_are_skipped_entirely() {
    let t = trace();
    let mut registry = Registry::new();
    registry
        .test_fixture_with("Partial", recorder_factory(&t))
        .test("enabled", |r: &mut Recorder| {
            r.log("enabled");
            Ok(())
        })
        .test("disabled", |r: &mut Recorder| {
            r.log("disabled");
            Ok(())
        });

    let mut catalog = Catalog::discover(&registry);
    catalog.tests[0].fixture.will_run = true;
    catalog.tests[0].tests[0].will_run = true;

    let mut runner = Runner::new(catalog);
    runner.run_to_completion();
    assert_eq!(runner.tests_completed(), 1);
    assert_eq!(recorded(&t), ["enabled"]);
    assert_eq!(
        runner.catalog().tests[0].tests[1].state,
        TestState::None
    );
}

#[test]
fn suspendable_test_spans_multiple_ticks() {
    let t = trace();
    let mut registry = Registry::new();
    registry
        .test_fixture_with("Waits", recorder_factory(&t))
        .suspendable_test("waits_two_ticks", |cell: FixtureCell<Recorder>| -> StepSequence {
            let mut started = false;
            Box::new(std::iter::from_fn(move || {
                if !started {
                    started = true;
                    if let Err(failure) = cell.with(|r| r.log("started")) {
                        return Some(Err(failure));
                    }
                    return Some(Ok(Step::Pause(Suspend::Ticks(2))));
                }
                if let Err(failure) = cell.with(|r| r.log("resumed")) {
                    return Some(Err(failure));
                }
                None
            }))
        });

    let mut catalog = Catalog::discover(&registry);
    catalog.set_all(true);
    let mut runner = Runner::new(catalog);
    runner.start();

    let mut ticks = 0;
    while !runner.finished() {
        runner.tick();
        ticks += 1;
        assert!(ticks < 50, "run never finished");
    }

    assert_eq!(runner.exit_code(), 0);
    assert!(ticks >= 4, "suspension was not honored across ticks");
    assert_eq!(recorded(&t), ["started", "resumed"]);
}

#[test]
fn completion_callbacks_fire_once_per_run() {
    let fired = Rc::new(RefCell::new(0));
    let mut registry = Registry::new();
    registry
        .test_fixture_with("Tiny", recorder_factory(&trace()))
        .test("passes", |_r: &mut Recorder| Ok(()));

    let mut catalog = Catalog::discover(&registry);
    catalog.set_all(true);
    let mut runner = Runner::new(catalog);
    let count = fired.clone();
    runner.on_finished(move || *count.borrow_mut() += 1);
    runner.run_to_completion();

    assert_eq!(*fired.borrow(), 1);
    assert!(runner.finished());
}

// ============================================================================
// LOG CAPTURE
// ============================================================================

#[test]
fn logs_attach_to_the_running_test_and_its_fixture() {
    let slot: Rc<RefCell<Option<LogHub>>> = Rc::new(RefCell::new(None));
    let hub_slot = slot.clone();

    #[derive(Default)]
    struct Noisy;

    let mut registry = Registry::new();
    registry
        .test_fixture::<Noisy>("Noisy")
        .test("chatters", move |_f: &mut Noisy| {
            let hub = hub_slot.borrow().clone().unwrap();
            hub.emit("plain message", None, Severity::Info);
            hub.emit("broken invariant", Some("stack trace here"), Severity::Error);
            hub.emit(
                &format!("{} Failed Something", FLOW_MARKER),
                Some("hidden trace"),
                Severity::Error,
            );
            Ok(())
        });

    let mut catalog = Catalog::discover(&registry);
    catalog.set_all(true);
    let mut runner = Runner::new(catalog);
    *slot.borrow_mut() = Some(runner.log_hub());
    runner.run_to_completion();

    let group = &runner.catalog().tests[0];
    let logs = &group.tests[0].logs;
    assert!(logs.iter().any(|l| l.message == "plain message"));
    // Error traces are attached below the message.
    assert!(logs
        .iter()
        .any(|l| l.message == "broken invariant\n\nstack trace here"));
    // Control-flow reporting keeps its trace out of the record.
    assert!(logs
        .iter()
        .any(|l| l.message.contains("Failed Something") && !l.message.contains("hidden trace")));
    assert!(group
        .fixture
        .logs
        .iter()
        .any(|l| l.message == "plain message"));
}
