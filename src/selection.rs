//! Selection persistence.
//!
//! The enabled/disabled state of the catalog is written out as a compact
//! line-oriented text format and restored by name-matching against a freshly
//! rebuilt catalog: one record per enabled fixture,
//! `"<fixture>|<comma-joined enabled test names>|\n"`. Disabled fixtures are
//! omitted entirely, so after a round trip a fixture explicitly turned off is
//! indistinguishable from one never discovered. Restoration is best-effort:
//! names that no longer match anything (renamed or removed since the string
//! was written) are silently ignored.

use crate::catalog::Catalog;

const FIELD_SEPARATOR: char = '|';
const NAME_SEPARATOR: char = ',';

/// Serializes the `will_run` flags of the test catalog.
pub fn persist(catalog: &Catalog) -> String {
    let mut out = String::new();
    for group in &catalog.tests {
        if !group.fixture.will_run {
            continue;
        }
        let names: Vec<&str> = group
            .tests
            .iter()
            .filter(|test| test.will_run)
            .map(|test| test.name.as_str())
            .collect();
        out.push_str(&group.fixture.name);
        out.push(FIELD_SEPARATOR);
        out.push_str(&names.join(&NAME_SEPARATOR.to_string()));
        out.push(FIELD_SEPARATOR);
        out.push('\n');
    }
    out
}

/// Re-applies a persisted selection to the catalog by exact name match,
/// returning the number of tests enabled. The count is also stored on the
/// catalog for the presentation layer.
pub fn restore(catalog: &mut Catalog, text: &str) -> usize {
    let mut tests_to_run = 0;

    for line in text.split('\n') {
        let mut fields = line.split(FIELD_SEPARATOR);
        let Some(fixture_name) = fields.next() else {
            continue;
        };
        let Some(test_field) = fields.next() else {
            continue;
        };
        let Some(group) = catalog
            .tests
            .iter_mut()
            .find(|group| group.fixture.name == fixture_name)
        else {
            continue;
        };

        group.fixture.will_run = true;
        for test_name in test_field.split(NAME_SEPARATOR) {
            if let Some(test) = group.tests.iter_mut().find(|test| test.name == test_name) {
                if !test.will_run {
                    test.will_run = true;
                    tests_to_run += 1;
                }
            }
        }
    }

    catalog.tests_to_run = tests_to_run;
    tests_to_run
}
