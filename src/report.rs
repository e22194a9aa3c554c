//! Run reports and summary rendering.
//!
//! Every outcome the engine records is a [`RunReport`] rendering to a
//! one-line message. Failed reports are collected into three ordered lists
//! (setups, tests, teardowns) that are reset once at the start of each run;
//! the summary renderer consumes them at the end.

/// One recorded outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum RunReport {
    Passed {
        fixture: String,
        test: String,
    },
    FailedSetup {
        fixture: String,
        setup: String,
        test: String,
        error: String,
    },
    FailedTest {
        fixture: String,
        test: String,
        error: String,
    },
    FailedTeardown {
        fixture: String,
        teardown: String,
        test: String,
        error: String,
    },
}

impl RunReport {
    /// Renders the one-line message for this report.
    pub fn message(&self) -> String {
        match self {
            RunReport::Passed { fixture, test } => {
                format!("Fixture: [{}] Test: [{}]", fixture, test)
            }
            RunReport::FailedSetup {
                fixture,
                setup,
                test,
                error,
            } => format!(
                "Fixture: [{}] Setup: [{}] on Test: [{}] Error: {}",
                fixture, setup, test, error
            ),
            RunReport::FailedTest {
                fixture,
                test,
                error,
            } => format!("Fixture: [{}] Test: [{}] Error: {}", fixture, test, error),
            RunReport::FailedTeardown {
                fixture,
                teardown,
                test,
                error,
            } => format!(
                "Fixture: [{}] Teardown: [{}] on Test: [{}] Error: {}",
                fixture, teardown, test, error
            ),
        }
    }
}

/// The per-run report collections.
#[derive(Debug, Default)]
pub struct ReportLog {
    pub passed: Vec<RunReport>,
    pub failed_setups: Vec<RunReport>,
    pub failed_tests: Vec<RunReport>,
    pub failed_teardowns: Vec<RunReport>,
}

impl ReportLog {
    /// Resets all collections; called exactly once per run, at stage entry.
    pub fn reset(&mut self) {
        self.passed.clear();
        self.failed_setups.clear();
        self.failed_tests.clear();
        self.failed_teardowns.clear();
    }

    pub fn any_failed(&self) -> bool {
        !self.failed_setups.is_empty()
            || !self.failed_tests.is_empty()
            || !self.failed_teardowns.is_empty()
    }

    /// Builds the aggregate summary: a single all-pass line, or the counts
    /// followed by numbered sections of one-line messages for failed setups,
    /// tests, and teardowns in that order.
    pub fn render_summary(&self, tests_completed: usize) -> String {
        let failed_tests = self.failed_tests.len();
        if !self.any_failed() {
            return format!("All {} Tests Passed", tests_completed);
        }

        let mut out = format!(
            "{} Tests Run, {} Tests Failed, {} Tests Passed, {} Setups Failed, {} Teardowns Failed\n",
            tests_completed,
            failed_tests,
            tests_completed - failed_tests,
            self.failed_setups.len(),
            self.failed_teardowns.len(),
        );

        if !self.failed_setups.is_empty() {
            out.push_str(&section("Failed Setups", &self.failed_setups));
        }
        if !self.failed_tests.is_empty() {
            out.push_str(&section("Failed Tests", &self.failed_tests));
        }
        if !self.failed_teardowns.is_empty() {
            out.push_str(&section("Failed Teardowns", &self.failed_teardowns));
        }

        out
    }
}

fn section(title: &str, reports: &[RunReport]) -> String {
    let mut out = format!("\n{}:\n", title);
    for (index, report) in reports.iter().enumerate() {
        out.push_str(&format!("{}. {}\n", index + 1, report.message()));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed_setup() -> RunReport {
        RunReport::FailedSetup {
            fixture: "Math".to_string(),
            setup: "prepare".to_string(),
            test: "adds".to_string(),
            error: "AssertionFailure: boom".to_string(),
        }
    }

    #[test]
    fn all_pass_renders_single_line() {
        let log = ReportLog::default();
        assert_eq!(log.render_summary(3), "All 3 Tests Passed");
    }

    #[test]
    fn failure_summary_counts_and_sections() {
        let mut log = ReportLog::default();
        log.failed_setups.push(failed_setup());
        log.failed_tests.push(RunReport::FailedTest {
            fixture: "Math".to_string(),
            test: "adds".to_string(),
            error: "AssertionFailure: boom".to_string(),
        });

        let summary = log.render_summary(4);
        assert!(summary
            .starts_with("4 Tests Run, 1 Tests Failed, 3 Tests Passed, 1 Setups Failed, 0 Teardowns Failed"));
        assert!(summary.contains("Failed Setups:\n1. Fixture: [Math] Setup: [prepare] on Test: [adds]"));
        assert!(summary.contains("Failed Tests:\n1. Fixture: [Math] Test: [adds]"));
        assert!(!summary.contains("Failed Teardowns:"));
    }

    #[test]
    fn reset_clears_every_list() {
        let mut log = ReportLog::default();
        log.failed_setups.push(failed_setup());
        log.passed.push(RunReport::Passed {
            fixture: "Math".to_string(),
            test: "adds".to_string(),
        });
        log.reset();
        assert!(!log.any_failed());
        assert!(log.passed.is_empty());
    }
}
