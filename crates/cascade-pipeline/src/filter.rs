//! Filters: named, ordered sets of [`Condition`]s combined by AND.
//!
//! The same type gates whole events and individual particles; what differs is
//! the [`FeatureSource`] it is evaluated against.

use serde::{Deserialize, Serialize};

use cascade_types::Result;

use crate::condition::{Condition, FeatureSource};

/// An ordered conjunction of conditions. An empty filter accepts everything.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    name: String,
    #[serde(default)]
    conditions: Vec<Condition>,
}

/// Filter applied to whole events.
pub type EventFilter = Filter;

/// Filter applied to the particles of an accepted event.
pub type ParticleFilter = Filter;

impl Filter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            conditions: Vec::new(),
        }
    }

    /// The canonical accept-everything filter.
    pub fn accept_all() -> Self {
        Self::new("All")
    }

    /// Builder-style append.
    pub fn with(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn push(&mut self, condition: Condition) {
        self.conditions.push(condition);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Short-circuit AND over all conditions.
    ///
    /// Extraction errors propagate: a filter that cannot evaluate one of its
    /// conditions does not get to answer `false`.
    pub fn accept<S: FeatureSource + ?Sized>(&self, item: &S) -> Result<bool> {
        for condition in &self.conditions {
            if !condition.accept(item)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// `name: c1 && c2`, or just the name for an empty filter.
    pub fn describe(&self) -> String {
        if self.conditions.is_empty() {
            return self.name.clone();
        }
        let body = self
            .conditions
            .iter()
            .map(Condition::describe)
            .collect::<Vec<_>>()
            .join(" && ");
        format!("{}: {}", self.name, body)
    }
}
