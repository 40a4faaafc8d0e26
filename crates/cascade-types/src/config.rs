//! Typed configuration: a shared key → value store, per-task schemas of
//! declared defaults, and the bound view each task reads after `configure()`.
//!
//! Keys in the shared [`Configuration`] are scoped by task name
//! (`"<task>.<key>"`). A task declares the keys it recognises together with
//! their defaults in a [`ConfigSchema`]; [`ConfigSchema::bind`] then resolves
//! every declared key once, checking types, and yields a [`TaskConfig`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{CascadeError, Result};

/// A scalar configuration value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    Real(f64),
    Text(String),
}

impl ConfigValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            ConfigValue::Bool(_) => "bool",
            ConfigValue::Int(_) => "int",
            ConfigValue::Real(_) => "real",
            ConfigValue::Text(_) => "text",
        }
    }

    /// Coerce `self` to the type of `declared`. Integers widen to reals;
    /// every other mismatch is rejected.
    fn coerce_to(&self, declared: &ConfigValue) -> Option<ConfigValue> {
        match (declared, self) {
            (ConfigValue::Bool(_), ConfigValue::Bool(_))
            | (ConfigValue::Int(_), ConfigValue::Int(_))
            | (ConfigValue::Real(_), ConfigValue::Real(_))
            | (ConfigValue::Text(_), ConfigValue::Text(_)) => Some(self.clone()),
            (ConfigValue::Real(_), ConfigValue::Int(i)) => Some(ConfigValue::Real(*i as f64)),
            _ => None,
        }
    }
}

impl From<bool> for ConfigValue {
    fn from(v: bool) -> Self {
        ConfigValue::Bool(v)
    }
}

impl From<i64> for ConfigValue {
    fn from(v: i64) -> Self {
        ConfigValue::Int(v)
    }
}

impl From<f64> for ConfigValue {
    fn from(v: f64) -> Self {
        ConfigValue::Real(v)
    }
}

impl From<&str> for ConfigValue {
    fn from(v: &str) -> Self {
        ConfigValue::Text(v.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(v: String) -> Self {
        ConfigValue::Text(v)
    }
}

// ---------------------------------------------------------------------------
// Configuration: the shared, read-only store
// ---------------------------------------------------------------------------

/// Shared configuration handed to every task at `configure()` time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Configuration {
    values: BTreeMap<String, ConfigValue>,
}

impl Configuration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a key.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<ConfigValue>) -> &mut Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.values.get(key)
    }

    pub fn has(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Value for `key`, or `default` when absent.
    pub fn get_or(&self, key: &str, default: ConfigValue) -> ConfigValue {
        self.values.get(key).cloned().unwrap_or(default)
    }

    /// Keys carrying the `"<task>."` scope.
    pub fn scoped_keys<'a>(&'a self, task: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.values.keys().filter_map(move |k| {
            k.strip_prefix(task)
                .and_then(|rest| rest.strip_prefix('.'))
        })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl FromIterator<(String, ConfigValue)> for Configuration {
    fn from_iter<I: IntoIterator<Item = (String, ConfigValue)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// ConfigSchema: declared keys and defaults
// ---------------------------------------------------------------------------

/// Options a task recognises, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct ConfigSchema {
    entries: Vec<(String, ConfigValue)>,
}

impl ConfigSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare `key` with its default. Re-declaring replaces the default.
    pub fn declare(&mut self, key: impl Into<String>, default: impl Into<ConfigValue>) -> &mut Self {
        let key = key.into();
        let default = default.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = default,
            None => self.entries.push((key, default)),
        }
        self
    }

    pub fn is_declared(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// Resolve every declared key for `task` against `config`.
    ///
    /// Fails on the first override whose type does not match the declared
    /// default. Task-scoped keys that were never declared are reported as
    /// warnings and otherwise ignored.
    pub fn bind(&self, task: &str, config: &Configuration) -> Result<TaskConfig> {
        let mut values = BTreeMap::new();
        for (key, default) in &self.entries {
            let scoped = format!("{task}.{key}");
            let value = match config.get(&scoped) {
                Some(given) => given.coerce_to(default).ok_or_else(|| CascadeError::ConfigType {
                    key: scoped.clone(),
                    expected: default.type_name(),
                    found: given.type_name(),
                })?,
                None => default.clone(),
            };
            values.insert(key.clone(), value);
        }

        for key in config.scoped_keys(task) {
            if !self.is_declared(key) {
                tracing::warn!(task = %task, key = %key, "Ignoring undeclared configuration key");
            }
        }

        Ok(TaskConfig {
            task: task.to_string(),
            values,
        })
    }
}

// ---------------------------------------------------------------------------
// TaskConfig: bound values for one task
// ---------------------------------------------------------------------------

/// Concrete, type-checked option values for a single task.
#[derive(Debug, Clone, Default)]
pub struct TaskConfig {
    task: String,
    values: BTreeMap<String, ConfigValue>,
}

impl TaskConfig {
    pub fn task(&self) -> &str {
        &self.task
    }

    pub fn get(&self, key: &str) -> Result<&ConfigValue> {
        self.values.get(key).ok_or_else(|| CascadeError::Config {
            key: format!("{}.{}", self.task, key),
            message: "key was never declared".into(),
        })
    }

    pub fn bool(&self, key: &str) -> Result<bool> {
        match self.get(key)? {
            ConfigValue::Bool(b) => Ok(*b),
            other => Err(self.mismatch(key, "bool", other)),
        }
    }

    pub fn int(&self, key: &str) -> Result<i64> {
        match self.get(key)? {
            ConfigValue::Int(i) => Ok(*i),
            other => Err(self.mismatch(key, "int", other)),
        }
    }

    /// Integer option that must not be negative.
    pub fn count(&self, key: &str) -> Result<usize> {
        let value = self.int(key)?;
        usize::try_from(value).map_err(|_| CascadeError::Config {
            key: format!("{}.{}", self.task, key),
            message: format!("expected a non-negative count, got {value}"),
        })
    }

    pub fn real(&self, key: &str) -> Result<f64> {
        match self.get(key)? {
            ConfigValue::Real(r) => Ok(*r),
            ConfigValue::Int(i) => Ok(*i as f64),
            other => Err(self.mismatch(key, "real", other)),
        }
    }

    pub fn text(&self, key: &str) -> Result<&str> {
        match self.get(key)? {
            ConfigValue::Text(s) => Ok(s),
            other => Err(self.mismatch(key, "text", other)),
        }
    }

    fn mismatch(&self, key: &str, expected: &'static str, found: &ConfigValue) -> CascadeError {
        CascadeError::ConfigType {
            key: format!("{}.{}", self.task, key),
            expected,
            found: found.type_name(),
        }
    }
}
