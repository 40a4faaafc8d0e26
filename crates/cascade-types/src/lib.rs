//! Shared types, errors and the status register for the Cascade batch engine.
//!
//! This crate provides the foundational types used across the other Cascade crates:
//! - `CascadeError`: unified error taxonomy, each variant classified by [`Status`]
//! - `Status` / `StatusRegister`: the shared signal every task consults to decide
//!   whether iteration continues
//! - [`config`]: typed configuration store with declare-then-bind semantics

pub mod config;

use serde::{Deserialize, Serialize};

pub use config::{ConfigSchema, ConfigValue, Configuration, TaskConfig};

/// Unified error type for all Cascade subsystems.
#[derive(Debug, thiserror::Error)]
pub enum CascadeError {
    // === Usage / configuration errors ===
    #[error("Configuration error for '{key}': {message}")]
    Config { key: String, message: String },

    #[error("Configuration key '{key}' expects {expected}, got {found}")]
    ConfigType {
        key: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("Task '{task}' has no {kind} filter")]
    MissingFilter { task: String, kind: &'static str },

    #[error("No input files matched {selection}")]
    NoInputFiles { selection: String },

    #[error("Pipeline validation failed: {0}")]
    Validation(String),

    // === Lifecycle contract ===
    #[error("Task '{task}' cannot {operation} while {state}")]
    Lifecycle {
        task: String,
        operation: &'static str,
        state: String,
    },

    // === Resource exhaustion ===
    #[error("Pool exhausted: cannot grow beyond {capacity} items")]
    PoolExhausted { capacity: usize },

    // === Contract violations ===
    #[error("Feature {category}[{selector}] out of range (table holds {available})")]
    FeatureOutOfRange {
        category: String,
        selector: usize,
        available: usize,
    },

    #[error("Acceptance index ({event_filter}, {particle_filter}) outside {rows}x{columns} table")]
    AcceptanceIndex {
        event_filter: usize,
        particle_filter: usize,
        rows: usize,
        columns: usize,
    },

    // === Data errors ===
    #[error("Result group '{0}' not found")]
    GroupNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl CascadeError {
    /// The status a task reports when one of its operations fails with this error.
    pub fn status(&self) -> Status {
        match self {
            CascadeError::PoolExhausted { .. }
            | CascadeError::FeatureOutOfRange { .. }
            | CascadeError::AcceptanceIndex { .. }
            | CascadeError::Lifecycle { .. } => Status::Fatal,
            _ => Status::Error,
        }
    }

    /// Coarse classification used when recording an [`Incident`].
    pub fn incident_kind(&self) -> IncidentKind {
        match self {
            CascadeError::Config { .. }
            | CascadeError::ConfigType { .. }
            | CascadeError::MissingFilter { .. }
            | CascadeError::NoInputFiles { .. }
            | CascadeError::Validation(_) => IncidentKind::Usage,
            CascadeError::PoolExhausted { .. } => IncidentKind::Exhausted,
            CascadeError::FeatureOutOfRange { .. }
            | CascadeError::AcceptanceIndex { .. }
            | CascadeError::Lifecycle { .. } => IncidentKind::Contract,
            CascadeError::GroupNotFound(_)
            | CascadeError::Io(_)
            | CascadeError::Json(_)
            | CascadeError::Other(_) => IncidentKind::Data,
        }
    }

    /// Returns `true` if the error must halt the whole pipeline.
    pub fn is_fatal(&self) -> bool {
        self.status() == Status::Fatal
    }
}

/// A convenience alias for `Result<T, CascadeError>`.
pub type Result<T> = std::result::Result<T, CascadeError>;

// ---------------------------------------------------------------------------
// Status: the shared Ok/Warning/EndOfData/Error/Fatal signal
// ---------------------------------------------------------------------------

/// Status reported by a task after each operation.
///
/// Variants are ordered by severity; the register only ever escalates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Ok,
    Warning,
    EndOfData,
    Error,
    Fatal,
}

impl Status {
    /// Only `Ok` lets a driver keep going.
    pub fn is_ok(self) -> bool {
        self == Status::Ok
    }

    /// `EndOfData` is a normal termination, everything above it is a failure.
    pub fn is_failure(self) -> bool {
        self >= Status::Error
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Status::Ok => "ok",
            Status::Warning => "warning",
            Status::EndOfData => "end_of_data",
            Status::Error => "error",
            Status::Fatal => "fatal",
        };
        f.write_str(name)
    }
}

/// What kind of condition moved the register away from `Ok`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentKind {
    Usage,
    Data,
    Exhausted,
    Contract,
    EndOfData,
    Warning,
}

/// The first report that established the register's current status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub task: String,
    pub kind: IncidentKind,
    pub message: String,
}

// ---------------------------------------------------------------------------
// StatusRegister
// ---------------------------------------------------------------------------

/// Per-pipeline status signal.
///
/// Owned by the run context rather than being process-global, so independent
/// pipelines in one process never observe each other's status.
#[derive(Debug, Clone)]
pub struct StatusRegister {
    status: Status,
    incident: Option<Incident>,
}

impl StatusRegister {
    pub fn new() -> Self {
        Self {
            status: Status::Ok,
            incident: None,
        }
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn is_ok(&self) -> bool {
        self.status.is_ok()
    }

    pub fn incident(&self) -> Option<&Incident> {
        self.incident.as_ref()
    }

    /// Escalate to `status` without attaching a reason. Lower severities are ignored.
    pub fn raise(&mut self, status: Status) {
        if status > self.status {
            self.status = status;
        }
    }

    /// Escalate and remember why. The incident is replaced only when the
    /// severity actually increases.
    pub fn report(&mut self, status: Status, incident: Incident) {
        if status > self.status {
            self.status = status;
            self.incident = Some(incident);
        }
    }

    /// Record a failed operation of `task`.
    pub fn report_error(&mut self, task: &str, error: &CascadeError) -> Status {
        let status = error.status();
        self.report(
            status,
            Incident {
                task: task.to_string(),
                kind: error.incident_kind(),
                message: error.to_string(),
            },
        );
        status
    }

    /// Signal normal exhaustion of the input stream.
    pub fn end_of_data(&mut self, task: &str) {
        self.report(
            Status::EndOfData,
            Incident {
                task: task.to_string(),
                kind: IncidentKind::EndOfData,
                message: "end of data".into(),
            },
        );
    }

    /// Back to `Ok`; called once at the start of every run.
    pub fn reset(&mut self) {
        self.status = Status::Ok;
        self.incident = None;
    }
}

impl Default for StatusRegister {
    fn default() -> Self {
        Self::new()
    }
}
