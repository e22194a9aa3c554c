//! Execution engine.
//!
//! The runner walks the catalog as a cooperative scheduler: assembly setups,
//! then enabled fixtures and their enabled tests (per-test setup → test →
//! per-test teardown), then assembly teardowns, then a summary. The whole run
//! is planned as a flat job list executed by [`Runner::tick`], the resume
//! point for an external driver. Synchronous methods drain within a tick;
//! a suspendable method installs a [`StepHandle`] that is resumed exactly
//! once per tick after its suspension request has been honored.
//!
//! Failures never escape a stage loop: every method runs inside a local
//! failure boundary and a failure is recorded as a report, so one failing
//! fixture cannot prevent any other fixture from running. A run always
//! reaches the reporting stage.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::catalog::{
    AssemblyGroup, Catalog, FixtureHandle, LogEntry, MethodBody, Severity, SuspendBody, SyncBody,
    TestState,
};
use crate::failure::TestFailure;
use crate::report::{ReportLog, RunReport};
use crate::suspend::{StepHandle, StepState, Suspend};

/// Prefix on the engine's own failure announcements. Log messages carrying it
/// are control-flow reporting and are exempt from trace attachment.
pub const FLOW_MARKER: &str = "TestFlowFailure:";

/// The strictly sequential stages of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    RunningAssemblySetups,
    RunningTests,
    RunningAssemblyTeardowns,
    Reporting,
    Finished,
}

// ============================================================================
// LOG HUB - the host-facing log sink
// ============================================================================

struct PendingLog {
    message: String,
    trace: Option<String>,
    severity: Severity,
}

#[derive(Default)]
struct HubState {
    capture: bool,
    pending: Vec<PendingLog>,
    echo: Option<Rc<dyn Fn(&str, Severity)>>,
}

/// The log sink the host (and the engine itself) writes to.
///
/// Capture is active only while the test stage runs; messages emitted while
/// a test executes are attached to that test and its fixture. An optional
/// echo sink forwards every message to a console regardless of capture.
#[derive(Clone, Default)]
pub struct LogHub {
    state: Rc<RefCell<HubState>>,
}

impl LogHub {
    /// Receives one `(message, trace, severity)` triple.
    pub fn emit(&self, message: &str, trace: Option<&str>, severity: Severity) {
        let echo = self.state.borrow().echo.clone();
        if let Some(echo) = echo {
            echo(message, severity);
        }
        let mut state = self.state.borrow_mut();
        if state.capture {
            state.pending.push(PendingLog {
                message: message.to_string(),
                trace: trace.map(str::to_string),
                severity,
            });
        }
    }

    /// Forwards every emitted message to the given sink.
    pub fn set_echo(&self, echo: impl Fn(&str, Severity) + 'static) {
        self.state.borrow_mut().echo = Some(Rc::new(echo));
    }

    fn set_capture(&self, on: bool) {
        let mut state = self.state.borrow_mut();
        state.capture = on;
        if !on {
            state.pending.clear();
        }
    }

    fn drain(&self) -> Vec<PendingLog> {
        std::mem::take(&mut self.state.borrow_mut().pending)
    }
}

// ============================================================================
// JOB PLAN
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AsmStage {
    Setup,
    Teardown,
}

#[derive(Debug, Clone, Copy)]
enum Job {
    EnterPhase(RunPhase),
    InstantiateAssembly { stage: AsmStage, group: usize },
    RunAssembly { stage: AsmStage, group: usize, entry: usize },
    BeginFixture { group: usize },
    BeginTest { group: usize, test: usize },
    RunSetup { group: usize, test: usize, setup: usize },
    RunBody { group: usize, test: usize },
    RunTeardown { group: usize, test: usize, teardown: usize },
    EndTest { group: usize, test: usize },
    EndFixture { group: usize },
    Report,
}

/// Where a suspended step's outcome must be delivered.
#[derive(Debug, Clone, Copy)]
enum StepCtx {
    Assembly { stage: AsmStage, group: usize, entry: usize },
    Setup { group: usize, test: usize, setup: usize },
    Body { group: usize, test: usize },
    Teardown { group: usize, test: usize, teardown: usize },
}

enum Wait {
    Ready,
    Ticks(u32),
    Until(Instant),
}

fn wait_for(suspend: Suspend) -> Wait {
    match suspend {
        Suspend::NextTick => Wait::Ready,
        Suspend::Ticks(n) => Wait::Ticks(n),
        Suspend::Seconds(s) => Wait::Until(Instant::now() + Duration::from_secs_f64(s)),
    }
}

struct ActiveStep {
    handle: StepHandle<()>,
    ctx: StepCtx,
    wait: Wait,
}

// ============================================================================
// RUNNER
// ============================================================================

/// The cooperative execution engine. Owns the catalog for the duration of a
/// run; construct with an injected catalog, call [`Runner::start`], then
/// drive with [`Runner::tick`] (or [`Runner::run_to_completion`] headless).
pub struct Runner {
    catalog: Catalog,
    phase: RunPhase,
    jobs: VecDeque<Job>,
    active: Option<ActiveStep>,
    instance: Option<FixtureHandle>,
    reports: ReportLog,
    tests_completed: usize,
    summary: Option<String>,
    hub: LogHub,
    current_group: Option<usize>,
    current_test: Option<usize>,
    fixture_error: bool,
    body_passed: bool,
    on_finished: Vec<Box<dyn FnMut()>>,
}

impl Runner {
    pub fn new(catalog: Catalog) -> Self {
        Self {
            catalog,
            phase: RunPhase::Idle,
            jobs: VecDeque::new(),
            active: None,
            instance: None,
            reports: ReportLog::default(),
            tests_completed: 0,
            summary: None,
            hub: LogHub::default(),
            current_group: None,
            current_test: None,
            fixture_error: false,
            body_passed: false,
            on_finished: Vec::new(),
        }
    }

    // ------------------------------------------------------------------
    // External interface
    // ------------------------------------------------------------------

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Mutable catalog access for `will_run` toggles between runs. Run-state
    /// fields belong to the engine; do not rebuild the catalog mid-run.
    pub fn catalog_mut(&mut self) -> &mut Catalog {
        &mut self.catalog
    }

    pub fn into_catalog(self) -> Catalog {
        self.catalog
    }

    pub fn log_hub(&self) -> LogHub {
        self.hub.clone()
    }

    /// Registers a zero-payload completion notification, fired once per run
    /// after the summary is built.
    pub fn on_finished(&mut self, callback: impl FnMut() + 'static) {
        self.on_finished.push(Box::new(callback));
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn finished(&self) -> bool {
        self.phase == RunPhase::Finished
    }

    pub fn tests_completed(&self) -> usize {
        self.tests_completed
    }

    pub fn failed_test_count(&self) -> usize {
        self.reports.failed_tests.len()
    }

    pub fn failed_setup_count(&self) -> usize {
        self.reports.failed_setups.len()
    }

    pub fn failed_teardown_count(&self) -> usize {
        self.reports.failed_teardowns.len()
    }

    pub fn reports(&self) -> &ReportLog {
        &self.reports
    }

    /// The rendered summary, available once the run reached reporting.
    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref()
    }

    /// Machine-readable status for headless drivers. `0` all passed; test
    /// failures take precedence as `2`, then setup failures as `1`, then
    /// teardown failures as `3`.
    pub fn exit_code(&self) -> i32 {
        if !self.reports.failed_tests.is_empty() {
            2
        } else if !self.reports.failed_setups.is_empty() {
            1
        } else if !self.reports.failed_teardowns.is_empty() {
            3
        } else {
            0
        }
    }

    /// Resets the report collections and plans the run. The failure-report
    /// lists are reset here, exactly once per run.
    pub fn start(&mut self) {
        if !matches!(self.phase, RunPhase::Idle | RunPhase::Finished) {
            return;
        }
        self.reports.reset();
        self.tests_completed = 0;
        self.summary = None;
        self.active = None;
        self.instance = None;
        self.current_group = None;
        self.current_test = None;
        self.plan();
        self.phase = RunPhase::RunningAssemblySetups;
    }

    /// One resume from the external driver. An active suspended step waits
    /// out its suspension request, then advances exactly one step; otherwise
    /// jobs drain until a suspendable body suspends or the plan is exhausted.
    pub fn tick(&mut self) {
        if matches!(self.phase, RunPhase::Idle | RunPhase::Finished) {
            return;
        }
        if self.active.is_some() {
            self.tick_active();
        } else {
            self.drain_jobs();
        }
    }

    /// Drives the run to the finished state. A step that never completes
    /// stalls here indefinitely; there is no watchdog.
    pub fn run_to_completion(&mut self) {
        if self.phase == RunPhase::Idle {
            self.start();
        }
        while !self.finished() {
            self.tick();
            if let Some(active) = &self.active {
                if let Wait::Until(deadline) = active.wait {
                    let now = Instant::now();
                    if deadline > now {
                        std::thread::sleep((deadline - now).min(Duration::from_millis(5)));
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Planning
    // ------------------------------------------------------------------

    fn plan(&mut self) {
        self.jobs.clear();

        self.jobs
            .push_back(Job::EnterPhase(RunPhase::RunningAssemblySetups));
        for group in 0..self.catalog.assembly_setups.len() {
            self.plan_assembly(AsmStage::Setup, group);
        }

        self.jobs.push_back(Job::EnterPhase(RunPhase::RunningTests));
        for group in 0..self.catalog.tests.len() {
            if !self.catalog.tests[group].fixture.will_run {
                continue;
            }
            self.jobs.push_back(Job::BeginFixture { group });
            for test in 0..self.catalog.tests[group].tests.len() {
                if !self.catalog.tests[group].tests[test].will_run {
                    continue;
                }
                self.jobs.push_back(Job::BeginTest { group, test });
                // Reverse declaration order: a derived fixture's own setup
                // runs before an inherited base setup.
                for setup in (0..self.catalog.tests[group].setups.len()).rev() {
                    self.jobs.push_back(Job::RunSetup { group, test, setup });
                }
                self.jobs.push_back(Job::RunBody { group, test });
                for teardown in 0..self.catalog.tests[group].teardowns.len() {
                    self.jobs.push_back(Job::RunTeardown {
                        group,
                        test,
                        teardown,
                    });
                }
                self.jobs.push_back(Job::EndTest { group, test });
            }
            self.jobs.push_back(Job::EndFixture { group });
        }

        self.jobs
            .push_back(Job::EnterPhase(RunPhase::RunningAssemblyTeardowns));
        for group in 0..self.catalog.assembly_teardowns.len() {
            self.plan_assembly(AsmStage::Teardown, group);
        }

        self.jobs.push_back(Job::Report);
    }

    fn plan_assembly(&mut self, stage: AsmStage, group: usize) {
        self.jobs.push_back(Job::InstantiateAssembly { stage, group });
        let entries = self.asm_group(stage, group).entries.len();
        for entry in 0..entries {
            self.jobs.push_back(Job::RunAssembly { stage, group, entry });
        }
    }

    // ------------------------------------------------------------------
    // Tick internals
    // ------------------------------------------------------------------

    fn tick_active(&mut self) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        match active.wait {
            Wait::Ticks(ref mut remaining) if *remaining > 0 => {
                *remaining -= 1;
                return;
            }
            Wait::Until(deadline) if Instant::now() < deadline => return,
            _ => {}
        }
        active.wait = Wait::Ready;
        match active.handle.resume() {
            StepState::Pending(suspend) => {
                active.wait = wait_for(suspend);
            }
            StepState::Finished => {
                if let Some(mut done) = self.active.take() {
                    let failure = done.handle.take_failure();
                    self.finish_step(done.ctx, failure);
                }
            }
        }
        self.attach_captured_logs();
    }

    fn drain_jobs(&mut self) {
        while let Some(job) = self.jobs.pop_front() {
            let suspended = self.execute(job);
            self.attach_captured_logs();
            if suspended || self.finished() {
                return;
            }
        }
    }

    fn execute(&mut self, job: Job) -> bool {
        match job {
            Job::EnterPhase(phase) => {
                self.phase = phase;
                match phase {
                    RunPhase::RunningTests => self.hub.set_capture(true),
                    RunPhase::RunningAssemblyTeardowns => {
                        self.hub.set_capture(false);
                        self.current_group = None;
                        self.current_test = None;
                    }
                    _ => {}
                }
                false
            }
            Job::InstantiateAssembly { stage, group } => {
                self.instantiate_assembly(stage, group);
                false
            }
            Job::RunAssembly { stage, group, entry } => self.run_assembly(stage, group, entry),
            Job::BeginFixture { group } => {
                self.current_group = Some(group);
                self.fixture_error = false;
                self.catalog.tests[group].fixture.state = TestState::InProgress;
                false
            }
            Job::BeginTest { group, test } => {
                self.begin_test(group, test);
                false
            }
            Job::RunSetup { group, test, setup } => self.run_setup(group, test, setup),
            Job::RunBody { group, test } => self.run_body(group, test),
            Job::RunTeardown {
                group,
                test,
                teardown,
            } => self.run_teardown(group, test, teardown),
            Job::EndTest { group, test } => {
                self.end_test(group, test);
                false
            }
            Job::EndFixture { group } => {
                self.catalog.tests[group].fixture.state = if self.fixture_error {
                    TestState::Failed
                } else {
                    TestState::Passed
                };
                self.current_group = None;
                false
            }
            Job::Report => {
                self.report();
                false
            }
        }
    }

    // ------------------------------------------------------------------
    // Assembly stages
    // ------------------------------------------------------------------

    fn asm_group(&mut self, stage: AsmStage, group: usize) -> &mut AssemblyGroup {
        match stage {
            AsmStage::Setup => &mut self.catalog.assembly_setups[group],
            AsmStage::Teardown => &mut self.catalog.assembly_teardowns[group],
        }
    }

    fn stage_label(stage: AsmStage) -> &'static str {
        match stage {
            AsmStage::Setup => "Assembly Setup",
            AsmStage::Teardown => "Assembly Teardown",
        }
    }

    /// Constructs the fixture once per group. A failing constructor marks
    /// every entry of the group failed and the group's method jobs are
    /// dropped; the run continues with the next fixture.
    fn instantiate_assembly(&mut self, stage: AsmStage, group: usize) {
        let result = self.asm_group(stage, group).fixture.instantiate();
        match result {
            Ok(instance) => {
                self.instance = Some(instance);
            }
            Err(failure) => {
                self.instance = None;
                let error = failure.to_string();
                let fixture_name = self.asm_group(stage, group).fixture.name.clone();
                self.hub.emit(&error, None, Severity::Error);

                let entry_count = self.asm_group(stage, group).entries.len();
                for entry in 0..entry_count {
                    let entry_name = {
                        let e = &mut self.asm_group(stage, group).entries[entry];
                        e.state = TestState::Failed;
                        e.name.clone()
                    };
                    self.push_assembly_failure(stage, &fixture_name, &entry_name, &error);
                    self.hub.emit(
                        &format!(
                            "{} Failed {} [{}] on [{}]",
                            FLOW_MARKER,
                            Self::stage_label(stage),
                            entry_name,
                            fixture_name
                        ),
                        None,
                        Severity::Error,
                    );
                }

                // Drop this group's method jobs; nothing can run without an
                // instance.
                while matches!(
                    self.jobs.front(),
                    Some(Job::RunAssembly { stage: s, group: g, .. }) if *s == stage && *g == group
                ) {
                    self.jobs.pop_front();
                }
            }
        }
    }

    fn run_assembly(&mut self, stage: AsmStage, group: usize, entry: usize) -> bool {
        let Some(instance) = self.instance.clone() else {
            return false;
        };
        let (entry_name, fixture_name, body) = {
            let g = self.asm_group(stage, group);
            let e = &mut g.entries[entry];
            e.state = TestState::InProgress;
            (e.name.clone(), g.fixture.name.clone(), e.body.clone())
        };
        self.hub.emit(
            &format!(
                "Running {} [{}] on [{}]",
                Self::stage_label(stage),
                entry_name,
                fixture_name
            ),
            None,
            Severity::Info,
        );

        match body {
            MethodBody::Sync(body) => {
                let outcome = invoke_sync(&body, &instance);
                self.finish_assembly(stage, group, entry, outcome.err());
                false
            }
            MethodBody::Suspendable(body) => self.begin_suspendable(
                &body,
                &instance,
                StepCtx::Assembly { stage, group, entry },
            ),
        }
    }

    fn finish_assembly(
        &mut self,
        stage: AsmStage,
        group: usize,
        entry: usize,
        failure: Option<TestFailure>,
    ) {
        let (entry_name, fixture_name) = {
            let g = self.asm_group(stage, group);
            (g.entries[entry].name.clone(), g.fixture.name.clone())
        };
        match failure {
            Some(failure) => {
                let error = failure.to_string();
                self.asm_group(stage, group).entries[entry].state = TestState::Failed;
                self.push_assembly_failure(stage, &fixture_name, &entry_name, &error);
                self.hub.emit(&error, None, Severity::Error);
                self.hub.emit(
                    &format!(
                        "{} Failed {} [{}] on [{}]",
                        FLOW_MARKER,
                        Self::stage_label(stage),
                        entry_name,
                        fixture_name
                    ),
                    None,
                    Severity::Error,
                );
            }
            None => {
                self.asm_group(stage, group).entries[entry].state = TestState::Passed;
                self.hub.emit(
                    &format!(
                        "Finished {} [{}] on [{}]",
                        Self::stage_label(stage),
                        entry_name,
                        fixture_name
                    ),
                    None,
                    Severity::Info,
                );
            }
        }
    }

    fn push_assembly_failure(&mut self, stage: AsmStage, fixture: &str, method: &str, error: &str) {
        match stage {
            AsmStage::Setup => self.reports.failed_setups.push(RunReport::FailedSetup {
                fixture: fixture.to_string(),
                setup: method.to_string(),
                test: method.to_string(),
                error: error.to_string(),
            }),
            AsmStage::Teardown => self
                .reports
                .failed_teardowns
                .push(RunReport::FailedTeardown {
                    fixture: fixture.to_string(),
                    teardown: method.to_string(),
                    test: method.to_string(),
                    error: error.to_string(),
                }),
        }
    }

    // ------------------------------------------------------------------
    // Test stage
    // ------------------------------------------------------------------

    fn begin_test(&mut self, group: usize, test: usize) {
        self.current_test = Some(test);
        self.body_passed = false;
        let (fixture_name, test_name) = {
            let g = &mut self.catalog.tests[group];
            g.tests[test].state = TestState::InProgress;
            (g.fixture.name.clone(), g.tests[test].name.clone())
        };

        // One fresh instance per test, never shared across tests.
        match self.catalog.tests[group].fixture.instantiate() {
            Ok(instance) => {
                self.instance = Some(instance);
            }
            Err(failure) => {
                // Contained as a per-test setup failure; the body is skipped
                // and, with no instance, the teardowns are too.
                self.instance = None;
                let error = failure.to_string();
                self.catalog.tests[group].tests[test].setup_state = TestState::Failed;
                self.fixture_error = true;
                self.reports.failed_setups.push(RunReport::FailedSetup {
                    fixture: fixture_name.clone(),
                    setup: "constructor".to_string(),
                    test: test_name.clone(),
                    error: error.clone(),
                });
                self.hub.emit(&error, None, Severity::Error);
                self.hub.emit(
                    &format!(
                        "{} Failed Setup [constructor] on [{}]",
                        FLOW_MARKER, fixture_name
                    ),
                    None,
                    Severity::Error,
                );
                self.jobs.retain(|job| {
                    !matches!(
                        job,
                        Job::RunSetup { group: g, test: t, .. }
                        | Job::RunTeardown { group: g, test: t, .. }
                        if *g == group && *t == test
                    )
                });
            }
        }
    }

    fn run_setup(&mut self, group: usize, test: usize, setup: usize) -> bool {
        let Some(instance) = self.instance.clone() else {
            return false;
        };
        let (fixture_name, setup_name, body) = {
            let g = &mut self.catalog.tests[group];
            // Failure is sticky: a later setup's success must not clear it.
            if g.tests[test].setup_state != TestState::Failed {
                g.tests[test].setup_state = TestState::InProgress;
            }
            (
                g.fixture.name.clone(),
                g.setups[setup].name.clone(),
                g.setups[setup].body.clone(),
            )
        };
        self.hub.emit(
            &format!("Running Setup [{}] on [{}]", setup_name, fixture_name),
            None,
            Severity::Info,
        );

        match body {
            MethodBody::Sync(body) => {
                let outcome = invoke_sync(&body, &instance);
                self.finish_setup(group, test, setup, outcome.err());
                false
            }
            MethodBody::Suspendable(body) => {
                self.begin_suspendable(&body, &instance, StepCtx::Setup { group, test, setup })
            }
        }
    }

    fn finish_setup(&mut self, group: usize, test: usize, setup: usize, failure: Option<TestFailure>) {
        let (fixture_name, setup_name, test_name) = {
            let g = &self.catalog.tests[group];
            (
                g.fixture.name.clone(),
                g.setups[setup].name.clone(),
                g.tests[test].name.clone(),
            )
        };
        match failure {
            Some(failure) => {
                let error = failure.to_string();
                self.catalog.tests[group].tests[test].setup_state = TestState::Failed;
                self.fixture_error = true;
                self.reports.failed_setups.push(RunReport::FailedSetup {
                    fixture: fixture_name.clone(),
                    setup: setup_name.clone(),
                    test: test_name,
                    error: error.clone(),
                });
                self.hub.emit(&error, None, Severity::Error);
                self.hub.emit(
                    &format!("{} Failed Setup [{}] on [{}]", FLOW_MARKER, setup_name, fixture_name),
                    None,
                    Severity::Error,
                );
            }
            None => {
                let state = &mut self.catalog.tests[group].tests[test].setup_state;
                if *state != TestState::Failed {
                    *state = TestState::Passed;
                }
                self.hub.emit(
                    &format!("Finished Setup [{}] on [{}]", setup_name, fixture_name),
                    None,
                    Severity::Info,
                );
            }
        }
    }

    fn run_body(&mut self, group: usize, test: usize) -> bool {
        // No setups declared: setup passes trivially.
        {
            let state = &mut self.catalog.tests[group].tests[test].setup_state;
            if *state == TestState::None {
                *state = TestState::Passed;
            }
        }

        let (fixture_name, test_name) = {
            let g = &self.catalog.tests[group];
            (g.fixture.name.clone(), g.tests[test].name.clone())
        };

        if self.catalog.tests[group].tests[test].setup_state != TestState::Passed {
            // Setup failed: the body never runs, but the test is reported.
            self.catalog.tests[group].tests[test].state = TestState::Failed;
            self.reports.failed_tests.push(RunReport::FailedTest {
                fixture: fixture_name.clone(),
                test: test_name.clone(),
                error: format!("{} Setup Failed", FLOW_MARKER),
            });
            self.hub.emit(
                &format!("{} Failed Test [{}] on [{}]", FLOW_MARKER, test_name, fixture_name),
                None,
                Severity::Error,
            );
            return false;
        }

        let Some(instance) = self.instance.clone() else {
            return false;
        };
        self.hub.emit(
            &format!("Running Test [{}] on [{}]", test_name, fixture_name),
            None,
            Severity::Info,
        );

        let body = self.catalog.tests[group].tests[test].body.clone();
        match body {
            MethodBody::Sync(body) => {
                let outcome = invoke_sync(&body, &instance);
                self.finish_body(group, test, outcome.err());
                false
            }
            MethodBody::Suspendable(body) => {
                self.begin_suspendable(&body, &instance, StepCtx::Body { group, test })
            }
        }
    }

    fn finish_body(&mut self, group: usize, test: usize, failure: Option<TestFailure>) {
        match failure {
            Some(failure) => {
                let (fixture_name, test_name) = {
                    let g = &self.catalog.tests[group];
                    (g.fixture.name.clone(), g.tests[test].name.clone())
                };
                let error = failure.to_string();
                self.catalog.tests[group].tests[test].state = TestState::Failed;
                self.fixture_error = true;
                self.reports.failed_tests.push(RunReport::FailedTest {
                    fixture: fixture_name.clone(),
                    test: test_name.clone(),
                    error: error.clone(),
                });
                self.hub.emit(&error, None, Severity::Error);
                self.hub.emit(
                    &format!("{} Failed Test [{}] on [{}]", FLOW_MARKER, test_name, fixture_name),
                    None,
                    Severity::Error,
                );
            }
            None => {
                self.body_passed = true;
            }
        }
    }

    fn run_teardown(&mut self, group: usize, test: usize, teardown: usize) -> bool {
        let Some(instance) = self.instance.clone() else {
            return false;
        };
        let (fixture_name, teardown_name, body) = {
            let g = &mut self.catalog.tests[group];
            if g.tests[test].teardown_state != TestState::Failed {
                g.tests[test].teardown_state = TestState::InProgress;
            }
            (
                g.fixture.name.clone(),
                g.teardowns[teardown].name.clone(),
                g.teardowns[teardown].body.clone(),
            )
        };
        self.hub.emit(
            &format!("Running Teardown [{}] on [{}]", teardown_name, fixture_name),
            None,
            Severity::Info,
        );

        match body {
            MethodBody::Sync(body) => {
                let outcome = invoke_sync(&body, &instance);
                self.finish_teardown(group, test, teardown, outcome.err());
                false
            }
            MethodBody::Suspendable(body) => self.begin_suspendable(
                &body,
                &instance,
                StepCtx::Teardown { group, test, teardown },
            ),
        }
    }

    fn finish_teardown(
        &mut self,
        group: usize,
        test: usize,
        teardown: usize,
        failure: Option<TestFailure>,
    ) {
        let (fixture_name, teardown_name, test_name) = {
            let g = &self.catalog.tests[group];
            (
                g.fixture.name.clone(),
                g.teardowns[teardown].name.clone(),
                g.tests[test].name.clone(),
            )
        };
        match failure {
            Some(failure) => {
                let error = failure.to_string();
                self.catalog.tests[group].tests[test].teardown_state = TestState::Failed;
                self.fixture_error = true;
                self.reports.failed_teardowns.push(RunReport::FailedTeardown {
                    fixture: fixture_name.clone(),
                    teardown: teardown_name.clone(),
                    test: test_name.clone(),
                    error: error.clone(),
                });
                self.hub.emit(&error, None, Severity::Error);
                self.hub.emit(
                    &format!(
                        "{} Failed Teardown [{}] on [{}]",
                        FLOW_MARKER, teardown_name, fixture_name
                    ),
                    None,
                    Severity::Error,
                );

                // A teardown failure invalidates an otherwise-passing test.
                if self.body_passed && self.catalog.tests[group].tests[test].state != TestState::Failed
                {
                    self.catalog.tests[group].tests[test].state = TestState::Failed;
                    self.reports.failed_tests.push(RunReport::FailedTest {
                        fixture: fixture_name.clone(),
                        test: test_name.clone(),
                        error: format!("{} Teardown Failed", FLOW_MARKER),
                    });
                    self.hub.emit(
                        &format!(
                            "{} Failed Test [{}] on [{}]",
                            FLOW_MARKER, test_name, fixture_name
                        ),
                        None,
                        Severity::Error,
                    );
                }
            }
            None => {
                let state = &mut self.catalog.tests[group].tests[test].teardown_state;
                if *state != TestState::Failed {
                    *state = TestState::Passed;
                }
                self.hub.emit(
                    &format!("Finished Teardown [{}] on [{}]", teardown_name, fixture_name),
                    None,
                    Severity::Info,
                );
            }
        }
    }

    fn end_test(&mut self, group: usize, test: usize) {
        let (fixture_name, test_name) = {
            let g = &mut self.catalog.tests[group];
            let entry = &mut g.tests[test];
            // No teardown declared (or none reachable): passes trivially.
            if entry.teardown_state == TestState::None {
                entry.teardown_state = TestState::Passed;
            }
            (g.fixture.name.clone(), g.tests[test].name.clone())
        };

        if self.catalog.tests[group].tests[test].state != TestState::Failed {
            self.catalog.tests[group].tests[test].state = TestState::Passed;
            self.reports.passed.push(RunReport::Passed {
                fixture: fixture_name.clone(),
                test: test_name.clone(),
            });
            self.hub.emit(
                &format!("Passed Test [{}] on [{}]", test_name, fixture_name),
                None,
                Severity::Info,
            );
        }

        self.attach_captured_logs();
        self.tests_completed += 1;
        self.current_test = None;
        self.instance = None;
    }

    // ------------------------------------------------------------------
    // Reporting
    // ------------------------------------------------------------------

    fn report(&mut self) {
        self.hub.set_capture(false);
        self.phase = RunPhase::Reporting;
        self.summary = Some(self.reports.render_summary(self.tests_completed));
        self.phase = RunPhase::Finished;
        for callback in &mut self.on_finished {
            callback();
        }
    }

    // ------------------------------------------------------------------
    // Suspendable bodies and log capture
    // ------------------------------------------------------------------

    fn begin_suspendable(
        &mut self,
        body: &SuspendBody,
        instance: &FixtureHandle,
        ctx: StepCtx,
    ) -> bool {
        let creation = panic::catch_unwind(AssertUnwindSafe(|| body(instance)));
        match creation {
            Err(payload) => {
                self.finish_step(ctx, Some(TestFailure::from_panic(payload)));
                false
            }
            Ok(sequence) => {
                let mut handle: StepHandle<()> = StepHandle::new(sequence);
                // Mirrors starting a coroutine: run to the first suspension.
                match handle.resume() {
                    StepState::Pending(suspend) => {
                        self.active = Some(ActiveStep {
                            handle,
                            ctx,
                            wait: wait_for(suspend),
                        });
                        true
                    }
                    StepState::Finished => {
                        let failure = handle.take_failure();
                        self.finish_step(ctx, failure);
                        false
                    }
                }
            }
        }
    }

    fn finish_step(&mut self, ctx: StepCtx, failure: Option<TestFailure>) {
        match ctx {
            StepCtx::Assembly { stage, group, entry } => {
                self.finish_assembly(stage, group, entry, failure)
            }
            StepCtx::Setup { group, test, setup } => self.finish_setup(group, test, setup, failure),
            StepCtx::Body { group, test } => self.finish_body(group, test, failure),
            StepCtx::Teardown { group, test, teardown } => {
                self.finish_teardown(group, test, teardown, failure)
            }
        }
    }

    /// Moves captured log triples onto the current test and fixture entries.
    /// Error-severity messages get their trace attached below the message,
    /// unless the message is the engine's own control-flow reporting.
    fn attach_captured_logs(&mut self) {
        let pending = self.hub.drain();
        if pending.is_empty() {
            return;
        }
        let Some(group) = self.current_group else {
            return;
        };
        for log in pending {
            let mut message = log.message;
            if let Some(trace) = log.trace {
                let show_trace =
                    log.severity == Severity::Error && !message.contains(FLOW_MARKER);
                if show_trace {
                    message.push_str("\n\n");
                    message.push_str(&trace);
                }
            }
            let entry = LogEntry {
                message,
                severity: log.severity,
            };
            let g = &mut self.catalog.tests[group];
            g.fixture.logs.push(entry.clone());
            if let Some(test) = self.current_test {
                g.tests[test].logs.push(entry);
            }
        }
    }
}

fn invoke_sync(body: &SyncBody, instance: &FixtureHandle) -> Result<(), TestFailure> {
    match panic::catch_unwind(AssertUnwindSafe(|| body(instance))) {
        Ok(result) => result,
        Err(payload) => Err(TestFailure::from_panic(payload)),
    }
}
