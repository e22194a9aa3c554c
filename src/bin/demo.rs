//! Demonstration runner for the testudo engine.
//!
//! Registers a handful of example fixtures (a sync arithmetic fixture, a
//! suspendable physics-style fixture, and an assembly fixture), applies a
//! selection, and drives the engine to completion, streaming the engine log
//! and exiting with the run's status code.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use testudo::{assert, selection, Catalog, FixtureCell, Registry, Runner, Severity, StepSequence, TestFailure};
use testudo::suspend::Step;

#[derive(Debug, Parser)]
#[command(
    name = "testudo-demo",
    version,
    about = "Runs the bundled demonstration fixtures through the testudo engine."
)]
struct DemoArgs {
    /// Enable every discovered fixture and test, even when a selection file
    /// is also given.
    #[arg(long)]
    all: bool,

    /// Restore a persisted selection from this file instead of running
    /// everything.
    #[arg(long, value_name = "FILE")]
    selection: Option<PathBuf>,

    /// Write the effective selection back to this file before running.
    #[arg(long, value_name = "FILE")]
    save_selection: Option<PathBuf>,

    /// List discovered fixtures and tests, then exit.
    #[arg(long)]
    list: bool,

    /// Suppress the live engine log; print only the summary.
    #[arg(long)]
    quiet: bool,
}

// Color constants for terminal output
const RESET: &str = "\x1b[0m";
const RED: &str = "\x1b[31m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";

fn colorize(text: &str, color: &str, enabled: bool) -> String {
    if enabled {
        format!("{}{}{}", color, text, RESET)
    } else {
        text.to_string()
    }
}

// ============================================================================
// DEMO FIXTURES
// ============================================================================

#[derive(Default)]
struct Simulation;

impl Simulation {
    fn boot(&mut self) -> Result<(), TestFailure> {
        Ok(())
    }

    fn shutdown(&mut self) -> Result<(), TestFailure> {
        Ok(())
    }
}

#[derive(Default)]
struct Arithmetic {
    left: i64,
    right: i64,
}

impl Arithmetic {
    fn prepare(&mut self) -> Result<(), TestFailure> {
        self.left = 6;
        self.right = 7;
        Ok(())
    }

    fn multiplies(&mut self) -> Result<(), TestFailure> {
        assert::are_equal(Some(&42), Some(&(self.left * self.right)), "product")
    }

    fn divides(&mut self) -> Result<(), TestFailure> {
        assert::are_equal(Some(&0), Some(&(self.left / self.right)), "integer quotient")
    }

    fn cleanup(&mut self) -> Result<(), TestFailure> {
        self.left = 0;
        self.right = 0;
        Ok(())
    }
}

/// A body dropped from a height, integrated one step per engine tick.
#[derive(Default)]
struct FallingBody {
    height: f64,
    velocity: f64,
}

impl FallingBody {
    const GRAVITY: f64 = -9.81;
    const STEP_SECONDS: f64 = 0.1;

    fn release(&mut self) -> Result<(), TestFailure> {
        self.height = 10.0;
        self.velocity = 0.0;
        Ok(())
    }

    /// Advances the simulation; true once the body has hit the ground.
    fn step(&mut self) -> bool {
        self.velocity += Self::GRAVITY * Self::STEP_SECONDS;
        self.height += self.velocity * Self::STEP_SECONDS;
        if self.height <= 0.0 {
            self.height = 0.0;
            self.velocity = 0.0;
            return true;
        }
        false
    }
}

fn settles_on_the_ground(cell: FixtureCell<FallingBody>) -> StepSequence {
    let mut remaining = 100;
    Box::new(std::iter::from_fn(move || {
        if remaining == 0 {
            return Some(Err(TestFailure::assertion(
                "body never reached the ground",
            )));
        }
        remaining -= 1;
        let landed = match cell.with(FallingBody::step) {
            Ok(landed) => landed,
            Err(failure) => return Some(Err(failure)),
        };
        if landed {
            let at_rest = match cell.with(|body| body.velocity.abs() < f64::EPSILON) {
                Ok(at_rest) => at_rest,
                Err(failure) => return Some(Err(failure)),
            };
            return match assert::is_true(at_rest, "body should be at rest on the ground") {
                Ok(()) => None,
                Err(failure) => Some(Err(failure)),
            };
        }
        Some(Step::next_tick())
    }))
}

fn demo_registry() -> Registry {
    let mut registry = Registry::new();
    registry
        .assembly_fixture::<Simulation>("Simulation")
        .setup("boot", Simulation::boot)
        .teardown("shutdown", Simulation::shutdown);
    registry
        .test_fixture::<Arithmetic>("Arithmetic")
        .setup("prepare", Arithmetic::prepare)
        .test("multiplies", Arithmetic::multiplies)
        .test("divides", Arithmetic::divides)
        .teardown("cleanup", Arithmetic::cleanup);
    registry
        .test_fixture::<FallingBody>("FallingBody")
        .setup("release", FallingBody::release)
        .suspendable_test("settles_on_the_ground", settles_on_the_ground);
    registry
}

// ============================================================================
// ENTRY POINT
// ============================================================================

fn main() -> ExitCode {
    let args = DemoArgs::parse();
    let use_colors = atty::is(atty::Stream::Stdout);

    let registry = demo_registry();
    let mut catalog = Catalog::discover(&registry);

    if args.list {
        list_catalog(&catalog);
        return ExitCode::SUCCESS;
    }

    match &args.selection {
        Some(path) => {
            let text = match fs::read_to_string(path) {
                Ok(text) => text,
                Err(err) => {
                    eprintln!("could not read selection file {}: {}", path.display(), err);
                    return ExitCode::FAILURE;
                }
            };
            let enabled = selection::restore(&mut catalog, &text);
            if enabled == 0 && !args.all {
                eprintln!("selection enabled no tests");
            }
        }
        None => catalog.set_all(true),
    }
    if args.all {
        catalog.set_all(true);
    }

    if let Some(path) = &args.save_selection {
        if let Err(err) = fs::write(path, selection::persist(&catalog)) {
            eprintln!("could not write selection file {}: {}", path.display(), err);
            return ExitCode::FAILURE;
        }
    }

    let mut runner = Runner::new(catalog);
    if !args.quiet {
        runner.log_hub().set_echo(move |message, severity| {
            let line = match severity {
                Severity::Info => message.to_string(),
                Severity::Warning => colorize(message, YELLOW, use_colors),
                Severity::Error => colorize(message, RED, use_colors),
            };
            println!("{}", line);
        });
    }
    runner.run_to_completion();

    let summary = runner.summary().unwrap_or("run did not finish").to_string();
    let color = if runner.exit_code() == 0 { GREEN } else { RED };
    println!("\n{}", colorize(&summary, color, use_colors));

    ExitCode::from(runner.exit_code() as u8)
}

fn list_catalog(catalog: &Catalog) {
    for group in &catalog.tests {
        println!("Fixture: {}", group.fixture.name);
        for test in &group.tests {
            println!("  - {}", test.name);
        }
    }
}
