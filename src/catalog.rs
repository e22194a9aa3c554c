//! Fixture/method catalog.
//!
//! Fixtures and lifecycle methods are declared up front through a [`Registry`]
//! (an explicit registration step; there is no ambient reflection), and
//! [`Catalog::discover`] snapshots the registry into a fresh graph of entries
//! carrying `will_run` flags and per-run state. Discovery never survives a
//! rebuild: calling `discover` again replaces every entry, so callers holding
//! a reference to a prior entry are holding stale state. The catalog
//! exclusively owns its entries; the execution engine mutates run-state in
//! place and the selection layer toggles `will_run`, both through the catalog.

use std::any::Any;
use std::cell::RefCell;
use std::marker::PhantomData;
use std::rc::Rc;

use crate::failure::TestFailure;
use crate::suspend::StepSequence;

// ============================================================================
// RUN-STATE AND LOGS
// ============================================================================

/// Per-entry run state. `None` is the rest state before a run; it is never a
/// valid terminal state for an entry that was actually run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TestState {
    #[default]
    None,
    InProgress,
    Failed,
    Passed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// One captured log message, attached to the test and fixture that were
/// executing when it was emitted.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub message: String,
    pub severity: Severity,
}

// ============================================================================
// METHOD BODIES
// ============================================================================

/// A live fixture instance, shared between the scheduler and the suspendable
/// bodies that captured it.
pub type FixtureHandle = Rc<RefCell<Box<dyn Any>>>;

pub type FixtureFactory = Rc<dyn Fn() -> Result<Box<dyn Any>, TestFailure>>;
pub type SyncBody = Rc<dyn Fn(&FixtureHandle) -> Result<(), TestFailure>>;
pub type SuspendBody = Rc<dyn Fn(&FixtureHandle) -> StepSequence>;

/// The declared shape of a lifecycle method. Suspendable bodies are driven
/// through the step adapter; sync bodies are invoked directly inside a local
/// failure boundary.
#[derive(Clone)]
pub enum MethodBody {
    Sync(SyncBody),
    Suspendable(SuspendBody),
}

/// Typed access to the current fixture instance from inside a suspendable
/// body. The untyped handle is downcast on every access so a mismatch
/// surfaces as a failure instead of corrupting the run.
pub struct FixtureCell<F> {
    handle: FixtureHandle,
    _marker: PhantomData<F>,
}

impl<F> Clone for FixtureCell<F> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle.clone(),
            _marker: PhantomData,
        }
    }
}

impl<F: Any> FixtureCell<F> {
    fn new(handle: FixtureHandle) -> Self {
        Self {
            handle,
            _marker: PhantomData,
        }
    }

    /// Runs `op` against the fixture instance.
    pub fn with<R>(&self, op: impl FnOnce(&mut F) -> R) -> Result<R, TestFailure> {
        let mut guard = self.handle.borrow_mut();
        let fixture = guard
            .downcast_mut::<F>()
            .ok_or_else(|| TestFailure::unexpected("fixture instance has a different type"))?;
        Ok(op(fixture))
    }
}

fn wrap_sync<F: Any>(body: impl Fn(&mut F) -> Result<(), TestFailure> + 'static) -> SyncBody {
    Rc::new(move |handle: &FixtureHandle| {
        let mut guard = handle.borrow_mut();
        let fixture = guard
            .downcast_mut::<F>()
            .ok_or_else(|| TestFailure::unexpected("fixture instance has a different type"))?;
        body(fixture)
    })
}

fn wrap_suspendable<F: Any>(body: impl Fn(FixtureCell<F>) -> StepSequence + 'static) -> SuspendBody {
    Rc::new(move |handle: &FixtureHandle| body(FixtureCell::new(handle.clone())))
}

// ============================================================================
// REGISTRY - explicit registration step
// ============================================================================

#[derive(Clone, Copy, PartialEq, Eq)]
enum FixtureKind {
    Assembly,
    Test,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum MethodRole {
    AssemblySetup,
    AssemblyTeardown,
    TestSetup,
    Test,
    TestTeardown,
}

struct MethodSpec {
    name: String,
    role: MethodRole,
    body: MethodBody,
}

struct FixtureSpec {
    name: String,
    kind: FixtureKind,
    factory: FixtureFactory,
    // Declaration order is registration order.
    methods: Vec<MethodSpec>,
}

/// The set of declared fixtures, in declaration order.
#[derive(Default)]
pub struct Registry {
    fixtures: Vec<FixtureSpec>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares an assembly fixture: its setups/teardowns run once per run,
    /// independent of individual tests.
    pub fn assembly_fixture<F: Any + Default>(&mut self, name: &str) -> AssemblyScope<'_, F> {
        self.assembly_fixture_with(name, || Ok(F::default()))
    }

    /// Declares an assembly fixture with an explicit, fallible constructor.
    pub fn assembly_fixture_with<F: Any>(
        &mut self,
        name: &str,
        factory: impl Fn() -> Result<F, TestFailure> + 'static,
    ) -> AssemblyScope<'_, F> {
        self.push_fixture(name, FixtureKind::Assembly, factory);
        AssemblyScope {
            spec: self.fixtures.last_mut().expect("fixture was just pushed"),
            _marker: PhantomData,
        }
    }

    /// Declares a test fixture: a grouping of tests sharing a type, with one
    /// fresh instance constructed per test.
    pub fn test_fixture<F: Any + Default>(&mut self, name: &str) -> TestScope<'_, F> {
        self.test_fixture_with(name, || Ok(F::default()))
    }

    /// Declares a test fixture with an explicit, fallible constructor.
    pub fn test_fixture_with<F: Any>(
        &mut self,
        name: &str,
        factory: impl Fn() -> Result<F, TestFailure> + 'static,
    ) -> TestScope<'_, F> {
        self.push_fixture(name, FixtureKind::Test, factory);
        TestScope {
            spec: self.fixtures.last_mut().expect("fixture was just pushed"),
            _marker: PhantomData,
        }
    }

    fn push_fixture<F: Any>(
        &mut self,
        name: &str,
        kind: FixtureKind,
        factory: impl Fn() -> Result<F, TestFailure> + 'static,
    ) {
        let factory: FixtureFactory =
            Rc::new(move || factory().map(|fixture| Box::new(fixture) as Box<dyn Any>));
        self.fixtures.push(FixtureSpec {
            name: name.to_string(),
            kind,
            factory,
            methods: Vec::new(),
        });
    }
}

/// Binds assembly-level lifecycle methods to the fixture being declared.
pub struct AssemblyScope<'r, F> {
    spec: &'r mut FixtureSpec,
    _marker: PhantomData<F>,
}

impl<'r, F: Any> AssemblyScope<'r, F> {
    pub fn setup(self, name: &str, body: impl Fn(&mut F) -> Result<(), TestFailure> + 'static) -> Self {
        self.push(name, MethodRole::AssemblySetup, MethodBody::Sync(wrap_sync(body)))
    }

    pub fn suspendable_setup(
        self,
        name: &str,
        body: impl Fn(FixtureCell<F>) -> StepSequence + 'static,
    ) -> Self {
        self.push(
            name,
            MethodRole::AssemblySetup,
            MethodBody::Suspendable(wrap_suspendable(body)),
        )
    }

    pub fn teardown(
        self,
        name: &str,
        body: impl Fn(&mut F) -> Result<(), TestFailure> + 'static,
    ) -> Self {
        self.push(name, MethodRole::AssemblyTeardown, MethodBody::Sync(wrap_sync(body)))
    }

    pub fn suspendable_teardown(
        self,
        name: &str,
        body: impl Fn(FixtureCell<F>) -> StepSequence + 'static,
    ) -> Self {
        self.push(
            name,
            MethodRole::AssemblyTeardown,
            MethodBody::Suspendable(wrap_suspendable(body)),
        )
    }

    fn push(self, name: &str, role: MethodRole, body: MethodBody) -> Self {
        self.spec.methods.push(MethodSpec {
            name: name.to_string(),
            role,
            body,
        });
        self
    }
}

/// Binds per-test lifecycle methods and tests to the fixture being declared.
pub struct TestScope<'r, F> {
    spec: &'r mut FixtureSpec,
    _marker: PhantomData<F>,
}

impl<'r, F: Any> TestScope<'r, F> {
    pub fn setup(self, name: &str, body: impl Fn(&mut F) -> Result<(), TestFailure> + 'static) -> Self {
        self.push(name, MethodRole::TestSetup, MethodBody::Sync(wrap_sync(body)))
    }

    pub fn suspendable_setup(
        self,
        name: &str,
        body: impl Fn(FixtureCell<F>) -> StepSequence + 'static,
    ) -> Self {
        self.push(
            name,
            MethodRole::TestSetup,
            MethodBody::Suspendable(wrap_suspendable(body)),
        )
    }

    pub fn test(self, name: &str, body: impl Fn(&mut F) -> Result<(), TestFailure> + 'static) -> Self {
        self.push(name, MethodRole::Test, MethodBody::Sync(wrap_sync(body)))
    }

    pub fn suspendable_test(
        self,
        name: &str,
        body: impl Fn(FixtureCell<F>) -> StepSequence + 'static,
    ) -> Self {
        self.push(
            name,
            MethodRole::Test,
            MethodBody::Suspendable(wrap_suspendable(body)),
        )
    }

    pub fn teardown(
        self,
        name: &str,
        body: impl Fn(&mut F) -> Result<(), TestFailure> + 'static,
    ) -> Self {
        self.push(name, MethodRole::TestTeardown, MethodBody::Sync(wrap_sync(body)))
    }

    pub fn suspendable_teardown(
        self,
        name: &str,
        body: impl Fn(FixtureCell<F>) -> StepSequence + 'static,
    ) -> Self {
        self.push(
            name,
            MethodRole::TestTeardown,
            MethodBody::Suspendable(wrap_suspendable(body)),
        )
    }

    fn push(self, name: &str, role: MethodRole, body: MethodBody) -> Self {
        self.spec.methods.push(MethodSpec {
            name: name.to_string(),
            role,
            body,
        });
        self
    }
}

// ============================================================================
// CATALOG ENTRIES
// ============================================================================

/// One discovered fixture, in either its setup, teardown, or test role.
pub struct FixtureEntry {
    pub will_run: bool,
    pub state: TestState,
    pub name: String,
    pub logs: Vec<LogEntry>,
    pub(crate) factory: FixtureFactory,
}

impl FixtureEntry {
    /// Constructs a fresh instance, containing factory panics.
    pub(crate) fn instantiate(&self) -> Result<FixtureHandle, TestFailure> {
        let factory = self.factory.clone();
        let result =
            std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || factory()));
        let instance = match result {
            Ok(Ok(instance)) => instance,
            Ok(Err(failure)) => {
                return Err(TestFailure::instantiation(&self.name, failure.to_string()))
            }
            Err(payload) => {
                return Err(TestFailure::instantiation(
                    &self.name,
                    TestFailure::from_panic(payload).to_string(),
                ))
            }
        };
        Ok(Rc::new(RefCell::new(instance)))
    }
}

/// An assembly-level setup or teardown method.
pub struct AssemblyEntry {
    pub state: TestState,
    pub name: String,
    pub logs: Vec<LogEntry>,
    pub(crate) body: MethodBody,
}

/// One test method, with independent setup/teardown state.
pub struct TestEntry {
    pub will_run: bool,
    pub state: TestState,
    pub setup_state: TestState,
    pub teardown_state: TestState,
    pub name: String,
    pub logs: Vec<LogEntry>,
    pub(crate) body: MethodBody,
}

/// A per-test setup or teardown method, shared by every test of the fixture.
pub struct LifecycleMethod {
    pub name: String,
    pub(crate) body: MethodBody,
}

pub struct AssemblyGroup {
    pub fixture: FixtureEntry,
    pub entries: Vec<AssemblyEntry>,
}

pub struct TestGroup {
    pub fixture: FixtureEntry,
    /// Declaration order; the engine runs these in reverse.
    pub setups: Vec<LifecycleMethod>,
    /// Declaration order; the engine runs these as declared.
    pub teardowns: Vec<LifecycleMethod>,
    pub tests: Vec<TestEntry>,
}

/// The in-memory registry snapshot the engine walks.
///
/// Note that an assembly fixture produces two distinct [`FixtureEntry`]
/// values, one keying its setups and one its teardowns, so the two roles
/// track state independently.
#[derive(Default)]
pub struct Catalog {
    pub assembly_setups: Vec<AssemblyGroup>,
    pub assembly_teardowns: Vec<AssemblyGroup>,
    pub tests: Vec<TestGroup>,
    /// Number of tests enabled by the last selection restore.
    pub tests_to_run: usize,
}

impl Catalog {
    /// Builds a fresh catalog from the registry. Assembly fixtures default to
    /// `will_run = true` (they are not individually toggled); test fixtures
    /// and tests default to `will_run = false` until a selection enables them.
    pub fn discover(registry: &Registry) -> Catalog {
        let mut catalog = Catalog::default();

        for spec in &registry.fixtures {
            match spec.kind {
                FixtureKind::Assembly => {
                    let setups = spec
                        .methods
                        .iter()
                        .filter(|m| m.role == MethodRole::AssemblySetup)
                        .map(assembly_entry)
                        .collect();
                    let teardowns = spec
                        .methods
                        .iter()
                        .filter(|m| m.role == MethodRole::AssemblyTeardown)
                        .map(assembly_entry)
                        .collect();
                    catalog.assembly_setups.push(AssemblyGroup {
                        fixture: fixture_entry(spec, true),
                        entries: setups,
                    });
                    catalog.assembly_teardowns.push(AssemblyGroup {
                        fixture: fixture_entry(spec, true),
                        entries: teardowns,
                    });
                }
                FixtureKind::Test => {
                    let group = TestGroup {
                        fixture: fixture_entry(spec, false),
                        setups: lifecycle_methods(spec, MethodRole::TestSetup),
                        teardowns: lifecycle_methods(spec, MethodRole::TestTeardown),
                        tests: spec
                            .methods
                            .iter()
                            .filter(|m| m.role == MethodRole::Test)
                            .map(|m| TestEntry {
                                will_run: false,
                                state: TestState::None,
                                setup_state: TestState::None,
                                teardown_state: TestState::None,
                                name: m.name.clone(),
                                logs: Vec::new(),
                                body: m.body.clone(),
                            })
                            .collect(),
                    };
                    catalog.tests.push(group);
                }
            }
        }

        catalog
    }

    /// Flips every test fixture and every test to the given state.
    pub fn set_all(&mut self, on: bool) {
        for group in &mut self.tests {
            group.fixture.will_run = on;
            for test in &mut group.tests {
                test.will_run = on;
            }
        }
    }

    /// Number of tests currently enabled.
    pub fn enabled_test_count(&self) -> usize {
        self.tests
            .iter()
            .filter(|group| group.fixture.will_run)
            .map(|group| group.tests.iter().filter(|t| t.will_run).count())
            .sum()
    }
}

fn fixture_entry(spec: &FixtureSpec, will_run: bool) -> FixtureEntry {
    FixtureEntry {
        will_run,
        state: TestState::None,
        name: spec.name.clone(),
        logs: Vec::new(),
        factory: spec.factory.clone(),
    }
}

fn assembly_entry(method: &MethodSpec) -> AssemblyEntry {
    AssemblyEntry {
        state: TestState::None,
        name: method.name.clone(),
        logs: Vec::new(),
        body: method.body.clone(),
    }
}

fn lifecycle_methods(spec: &FixtureSpec, role: MethodRole) -> Vec<LifecycleMethod> {
    spec.methods
        .iter()
        .filter(|m| m.role == role)
        .map(|m| LifecycleMethod {
            name: m.name.clone(),
            body: m.body.clone(),
        })
        .collect()
}
