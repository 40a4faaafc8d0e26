//! Task-tree validation: lint rules and diagnostics.
//!
//! Call [`validate`] for advisory diagnostics or [`validate_or_raise`] to fail
//! on the first `Error`-severity issue. The executor runs it between
//! configure and initialize.

use std::collections::HashMap;

use cascade_types::{CascadeError, Result};

use crate::task::Task;

// ---------------------------------------------------------------------------
// Diagnostic types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub rule: String,
    pub severity: Severity,
    pub message: String,
    pub task: Option<String>,
    pub fix: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

// ---------------------------------------------------------------------------
// LintRule trait
// ---------------------------------------------------------------------------

pub trait LintRule {
    fn name(&self) -> &str;
    fn apply(&self, root: &Task) -> Vec<Diagnostic>;
}

fn all_tasks(root: &Task) -> Vec<&Task> {
    let mut tasks = Vec::new();
    root.walk(&mut |task, _| tasks.push(task));
    tasks
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

struct NonEmptyNameRule;
impl LintRule for NonEmptyNameRule {
    fn name(&self) -> &str { "non_empty_name" }
    fn apply(&self, root: &Task) -> Vec<Diagnostic> {
        all_tasks(root)
            .into_iter()
            .filter(|t| t.name().trim().is_empty())
            .map(|t| Diagnostic {
                rule: self.name().into(),
                severity: Severity::Error,
                message: format!("A '{}' task has an empty name", t.handler_type()),
                task: None,
                fix: Some("Give every task a name; options are scoped by it".into()),
            })
            .collect()
    }
}

/// Options (`"<task>.<key>"`) and result groups are keyed by task name, so
/// two tasks with one name would read each other's settings.
struct UniqueNameRule;
impl LintRule for UniqueNameRule {
    fn name(&self) -> &str { "unique_name" }
    fn apply(&self, root: &Task) -> Vec<Diagnostic> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        let mut order = Vec::new();
        for task in all_tasks(root) {
            let count = counts.entry(task.name()).or_insert(0);
            if *count == 0 {
                order.push(task.name());
            }
            *count += 1;
        }
        order
            .into_iter()
            .filter(|name| !name.trim().is_empty() && counts[name] > 1)
            .map(|name| Diagnostic {
                rule: self.name().into(),
                severity: Severity::Error,
                message: format!("Task name '{name}' is used {} times", counts[name]),
                task: Some(name.to_string()),
                fix: Some(format!("Rename all but one '{name}' task")),
            })
            .collect()
    }
}

struct EventFilterRule;
impl LintRule for EventFilterRule {
    fn name(&self) -> &str { "event_filter_present" }
    fn apply(&self, root: &Task) -> Vec<Diagnostic> {
        let mut diags = Vec::new();
        for task in all_tasks(root) {
            let Some(selection) = task.selection() else {
                continue;
            };
            if selection.event_filters().is_empty() {
                diags.push(Diagnostic {
                    rule: self.name().into(),
                    severity: Severity::Error,
                    message: format!("Task '{}' selects events but has no event filter", task.name()),
                    task: Some(task.name().to_string()),
                    fix: Some("Add at least the accept-all filter".into()),
                });
            }
            if selection.particle_filters().is_empty() {
                diags.push(Diagnostic {
                    rule: self.name().into(),
                    severity: Severity::Info,
                    message: format!("Task '{}' has no particle filter; particle counters stay empty", task.name()),
                    task: Some(task.name().to_string()),
                    fix: None,
                });
            }
        }
        diags
    }
}

struct DriverHasChildrenRule;
impl LintRule for DriverHasChildrenRule {
    fn name(&self) -> &str { "driver_has_children" }
    fn apply(&self, root: &Task) -> Vec<Diagnostic> {
        all_tasks(root)
            .into_iter()
            .filter(|t| t.children().is_empty())
            .filter(|t| t.manages_children() || matches!(t.handler_type(), "iterator" | "sequence"))
            .map(|t| Diagnostic {
                rule: self.name().into(),
                severity: Severity::Warning,
                message: format!("'{}' task '{}' has no children to drive", t.handler_type(), t.name()),
                task: Some(t.name().to_string()),
                fix: Some("Add the analysis tasks as children".into()),
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Run every built-in rule and return all diagnostics.
pub fn validate(root: &Task) -> Vec<Diagnostic> {
    let rules: Vec<Box<dyn LintRule>> = vec![
        Box::new(NonEmptyNameRule),
        Box::new(UniqueNameRule),
        Box::new(EventFilterRule),
        Box::new(DriverHasChildrenRule),
    ];
    rules.iter().flat_map(|r| r.apply(root)).collect()
}

/// Like [`validate`], but fails when any diagnostic is an `Error`.
pub fn validate_or_raise(root: &Task) -> Result<Vec<Diagnostic>> {
    let diagnostics = validate(root);
    let errors: Vec<_> = diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .map(|d| d.message.clone())
        .collect();
    if !errors.is_empty() {
        return Err(CascadeError::Validation(errors.join("; ")));
    }
    Ok(diagnostics)
}
