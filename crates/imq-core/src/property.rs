//! Property results and the checker trait.

use serde::Serialize;

use crate::counterexample::Counterexample;

/// Outcome of checking a single named property.
#[derive(Debug, Clone, Serialize)]
pub struct PropertyResult {
    /// Property name, e.g. `NoDuplicates`.
    pub name: &'static str,
    /// Whether the property held.
    pub holds: bool,
    /// Human-readable description of the violation.
    pub violation: Option<String>,
    /// Failure path, when the checker could reconstruct one.
    #[serde(skip)]
    pub counterexample: Option<Counterexample>,
}

impl PropertyResult {
    /// A property that held.
    #[must_use]
    pub fn pass(name: &'static str) -> Self {
        Self {
            name,
            holds: true,
            violation: None,
            counterexample: None,
        }
    }

    /// A property that was violated.
    #[must_use]
    pub fn fail(
        name: &'static str,
        violation: impl Into<String>,
        counterexample: Option<Counterexample>,
    ) -> Self {
        Self {
            name,
            holds: false,
            violation: Some(violation.into()),
            counterexample,
        }
    }

    /// One-line summary, e.g. `[FAIL] NoDuplicates: element 7 popped twice`.
    #[must_use]
    pub fn summary(&self) -> String {
        match &self.violation {
            None => format!("[PASS] {}", self.name),
            Some(v) => format!("[FAIL] {}: {}", self.name, v),
        }
    }
}

/// A set of properties that can be checked against some state.
pub trait PropertyChecker {
    /// Check every property and return one result per property.
    fn check_all(&self) -> Vec<PropertyResult>;

    /// True if every property holds.
    fn all_hold(&self) -> bool {
        self.check_all().iter().all(|r| r.holds)
    }

    /// The first violated property, if any.
    fn first_violation(&self) -> Option<PropertyResult> {
        self.check_all().into_iter().find(|r| !r.holds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Vec<PropertyResult>);

    impl PropertyChecker for Fixed {
        fn check_all(&self) -> Vec<PropertyResult> {
            self.0.clone()
        }
    }

    #[test]
    fn test_all_hold() {
        let checker = Fixed(vec![PropertyResult::pass("A"), PropertyResult::pass("B")]);
        assert!(checker.all_hold());
        assert!(checker.first_violation().is_none());
    }

    #[test]
    fn test_first_violation() {
        let checker = Fixed(vec![
            PropertyResult::pass("A"),
            PropertyResult::fail("B", "broken", None),
            PropertyResult::fail("C", "also broken", None),
        ]);
        assert!(!checker.all_hold());
        let first = checker.first_violation().unwrap();
        assert_eq!(first.name, "B");
        assert_eq!(first.summary(), "[FAIL] B: broken");
    }
}
