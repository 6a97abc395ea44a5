use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures originating in a discovery backend.
#[derive(Clone, Debug, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum DiscoveryError {
    /// Resolving the instance set failed.
    #[error("discovery resolution failed: {0}")]
    Resolution(String),

    /// Publishing or withdrawing an advertisement failed.
    #[error("discovery registration failed: {0}")]
    Registration(String),
}

/// One observation of a service's instance set: either the complete current
/// set of instance identifiers, or a resolution failure.
///
/// The instance list is canonicalised at construction (sorted, duplicates
/// removed), so two events built from the same set compare equal regardless
/// of input order. An empty set is a legal observation, distinct from a
/// failure.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    result: Result<Vec<String>, DiscoveryError>,
}

impl Event {
    /// A successful observation of `instances`.
    pub fn instances<I, S>(instances: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut instances: Vec<String> = instances.into_iter().map(Into::into).collect();
        instances.sort();
        instances.dedup();
        Self {
            result: Ok(instances),
        }
    }

    /// A resolution failure.
    pub fn failure(err: DiscoveryError) -> Self {
        Self { result: Err(err) }
    }

    pub fn as_result(&self) -> Result<&[String], &DiscoveryError> {
        match &self.result {
            Ok(instances) => Ok(instances),
            Err(err) => Err(err),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.result.is_err()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instances_are_canonicalised() {
        let event = Event::instances(["b", "a", "b", "c", "a"]);
        assert_eq!(event.as_result().unwrap(), ["a", "b", "c"]);
    }

    #[test]
    fn test_equal_sets_compare_equal() {
        let a = Event::instances(["x", "y"]);
        let b = Event::instances(["y", "x", "y"]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_empty_set_is_not_a_failure() {
        let event = Event::instances(Vec::<String>::new());
        assert!(!event.is_failure());
        assert!(event.as_result().unwrap().is_empty());
    }

    #[test]
    fn test_failure_event() {
        let event = Event::failure(DiscoveryError::Resolution("dns timeout".into()));
        assert!(event.is_failure());
        assert!(event.as_result().is_err());
    }
}
