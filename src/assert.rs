//! Assertion primitives.
//!
//! Each check takes the value(s) under test and an optional message and fails
//! with [`TestFailure::Assertion`] when its condition does not hold. Checks
//! are fail-fast: propagate the `Err` out of the test body with `?` and let
//! the execution engine catch and classify it. Do not call these outside
//! registered fixture methods.
//!
//! Absence is modelled with `Option`: the null checks of the original design
//! become [`is_some`] / [`is_none`], and the null-tolerant emptiness variants
//! take `Option<&C>`.

use std::fmt::Debug;

use crate::failure::TestFailure;

/// Containers whose emptiness is decided by element count.
///
/// Strings count as containers of characters, so a single family of
/// emptiness checks covers both strings and collections.
pub trait Count {
    fn count(&self) -> usize;
}

impl Count for str {
    fn count(&self) -> usize {
        self.len()
    }
}

impl Count for String {
    fn count(&self) -> usize {
        self.len()
    }
}

impl<T> Count for [T] {
    fn count(&self) -> usize {
        self.len()
    }
}

impl<T> Count for Vec<T> {
    fn count(&self) -> usize {
        self.len()
    }
}

fn fail(message: String, suffix: &str) -> Result<(), TestFailure> {
    if suffix.is_empty() {
        Err(TestFailure::assertion(message))
    } else {
        Err(TestFailure::assertion(format!("{}; {}", message, suffix)))
    }
}

// ============================================================================
// PRESENCE CHECKS
// ============================================================================

/// Fails when the value is `None`.
pub fn is_some<T>(value: &Option<T>, message: &str) -> Result<(), TestFailure> {
    match value {
        Some(_) => Ok(()),
        None => fail("Expected value to not be None".to_string(), message),
    }
}

/// Fails when the value is `Some`.
pub fn is_none<T: Debug>(value: &Option<T>, message: &str) -> Result<(), TestFailure> {
    match value {
        None => Ok(()),
        Some(inner) => fail(format!("Expected [{:?}] to be None", inner), message),
    }
}

// ============================================================================
// CONDITIONS
// ============================================================================

/// Fails when the condition is false.
pub fn is_true(condition: bool, message: &str) -> Result<(), TestFailure> {
    if condition {
        Ok(())
    } else {
        fail("Expected True but was False".to_string(), message)
    }
}

/// Fails when the condition is true.
pub fn is_false(condition: bool, message: &str) -> Result<(), TestFailure> {
    if condition {
        fail("Expected False but was True".to_string(), message)
    } else {
        Ok(())
    }
}

// ============================================================================
// EQUALITY
// ============================================================================

/// Fails when the actual value is not equal to the expected value.
///
/// Both-absent counts as equal; a single absent side never equals a present
/// one; otherwise defers to `PartialEq`.
pub fn are_equal<T: PartialEq + Debug>(
    expected: Option<&T>,
    actual: Option<&T>,
    message: &str,
) -> Result<(), TestFailure> {
    match (expected, actual) {
        (None, None) => Ok(()),
        (None, Some(actual)) => fail(
            format!("Expected [{:?}] to be Equal to None", actual),
            message,
        ),
        (Some(expected), None) => fail(
            format!("Expected None to be Equal to [{:?}]", expected),
            message,
        ),
        (Some(expected), Some(actual)) => {
            if expected == actual {
                Ok(())
            } else {
                fail(
                    format!("Expected [{:?}] to be Equal to [{:?}]", actual, expected),
                    message,
                )
            }
        }
    }
}

/// Fails when the actual value is equal to the expected value.
pub fn are_not_equal<T: PartialEq + Debug>(
    expected: Option<&T>,
    actual: Option<&T>,
    message: &str,
) -> Result<(), TestFailure> {
    match (expected, actual) {
        (None, None) => fail("Expected None to Not be Equal to None".to_string(), message),
        (None, Some(_)) | (Some(_), None) => Ok(()),
        (Some(expected), Some(actual)) => {
            if expected == actual {
                fail(
                    format!("Expected [{:?}] to Not be Equal to [{:?}]", actual, expected),
                    message,
                )
            } else {
                Ok(())
            }
        }
    }
}

// ============================================================================
// EMPTINESS
// ============================================================================

/// Fails when the container holds any element.
pub fn is_empty<C: Count + ?Sized>(container: &C, message: &str) -> Result<(), TestFailure> {
    let count = container.count();
    if count > 0 {
        fail(
            format!("Expected container to be Empty but had [{}] elements", count),
            message,
        )
    } else {
        Ok(())
    }
}

/// Fails when the container is present and holds any element.
pub fn is_empty_or_none<C: Count + ?Sized>(
    container: Option<&C>,
    message: &str,
) -> Result<(), TestFailure> {
    match container {
        None => Ok(()),
        Some(container) => {
            let count = container.count();
            if count > 0 {
                fail(
                    format!(
                        "Expected container to be Empty or None but had [{}] elements",
                        count
                    ),
                    message,
                )
            } else {
                Ok(())
            }
        }
    }
}

/// Fails when the container holds no elements.
pub fn is_not_empty<C: Count + ?Sized>(container: &C, message: &str) -> Result<(), TestFailure> {
    if container.count() == 0 {
        fail("Expected container to not be Empty".to_string(), message)
    } else {
        Ok(())
    }
}

/// Fails when the container is absent or holds no elements.
pub fn is_not_empty_or_none<C: Count + ?Sized>(
    container: Option<&C>,
    message: &str,
) -> Result<(), TestFailure> {
    match container {
        None => fail("Expected None to not be Empty or None".to_string(), message),
        Some(container) => {
            if container.count() == 0 {
                fail(
                    "Expected container to not be Empty or None but was Empty".to_string(),
                    message,
                )
            } else {
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_treats_both_none_as_equal() {
        assert!(are_equal::<i32>(None, None, "").is_ok());
    }

    #[test]
    fn equality_rejects_single_none() {
        assert!(are_equal(None, Some(&5), "").is_err());
        assert!(are_equal(Some(&5), None, "").is_err());
    }

    #[test]
    fn equality_defers_to_partial_eq() {
        assert!(are_equal(Some(&"x"), Some(&"x"), "").is_ok());
        assert!(are_equal(Some(&"x"), Some(&"y"), "").is_err());
    }

    #[test]
    fn inequality_mirrors_equality() {
        assert!(are_not_equal::<i32>(None, None, "").is_err());
        assert!(are_not_equal(None, Some(&5), "").is_ok());
        assert!(are_not_equal(Some(&1), Some(&2), "").is_ok());
        assert!(are_not_equal(Some(&2), Some(&2), "").is_err());
    }

    #[test]
    fn conditions_report_direction() {
        let err = is_true(false, "context").unwrap_err();
        assert!(err.to_string().contains("Expected True but was False"));
        assert!(err.to_string().contains("context"));
        assert!(is_false(false, "").is_ok());
    }

    #[test]
    fn empty_collections_pass() {
        let empty: Vec<i32> = vec![];
        assert!(is_empty(&empty, "").is_ok());
        assert!(is_empty(&[1][..], "").is_err());
        assert!(is_not_empty(&[1][..], "").is_ok());
        assert!(is_not_empty(&empty, "").is_err());
    }

    #[test]
    fn strings_count_as_containers() {
        assert!(is_empty("", "").is_ok());
        assert!(is_empty("x", "").is_err());
        assert!(is_not_empty("x", "").is_ok());
    }

    #[test]
    fn none_tolerant_variants() {
        assert!(is_empty_or_none::<str>(None, "").is_ok());
        assert!(is_empty_or_none(Some(""), "").is_ok());
        assert!(is_empty_or_none(Some("x"), "").is_err());
        assert!(is_not_empty_or_none::<str>(None, "").is_err());
        assert!(is_not_empty_or_none(Some("x"), "").is_ok());
        assert!(is_not_empty_or_none(Some(""), "").is_err());
    }

    #[test]
    fn presence_checks() {
        assert!(is_some(&Some(1), "").is_ok());
        assert!(is_some::<i32>(&None, "").is_err());
        assert!(is_none::<i32>(&None, "").is_ok());
        assert!(is_none(&Some(1), "").is_err());
    }

    #[test]
    fn failures_are_assertions() {
        assert!(is_true(false, "").unwrap_err().is_assertion());
    }
}
