//! Per-run state threaded through every lifecycle call.
//!
//! A [`RunContext`] owns everything that would otherwise be process-global:
//! the status register, the current event, the result store, the loop
//! position and the file currently being processed. Two pipelines with two
//! contexts never observe each other.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use cascade_types::{Incident, Result, Status, StatusRegister};

use crate::checkpoint::{save_manifest, CheckpointManifest};
use crate::event::Event;
use crate::results::{MemoryResultStore, ResultStore};

/// Position of the event loop, published by the iterator before each unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopCursor {
    /// Index of the unit being processed; after the loop, units completed.
    pub unit: u64,
    pub sub_bunch: usize,
    pub bunch: usize,
}

/// Input and output paths of the file being processed by a file loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileBinding {
    pub input: String,
    pub output: String,
}

impl FileBinding {
    /// Bind `input` and derive the output path by appending `suffix` to its stem.
    pub fn for_input(input: impl Into<String>, suffix: &str) -> Self {
        let input = input.into();
        let path = Path::new(&input);
        let stem = if path.extension().is_some_and(|e| e == "json") {
            path.with_extension("")
        } else {
            path.to_path_buf()
        };
        let output = format!("{}{suffix}", stem.display());
        Self { input, output }
    }
}

pub struct RunContext {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    register: StatusRegister,
    event: Event,
    store: Box<dyn ResultStore>,
    cursor: LoopCursor,
    file: Option<FileBinding>,
    checkpoint_dir: Option<PathBuf>,
    checkpoints: Vec<CheckpointManifest>,
}

impl RunContext {
    pub fn new(store: impl ResultStore + 'static) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            register: StatusRegister::new(),
            event: Event::default(),
            store: Box::new(store),
            cursor: LoopCursor::default(),
            file: None,
            checkpoint_dir: None,
            checkpoints: Vec::new(),
        }
    }

    /// A context backed by a fresh [`MemoryResultStore`].
    pub fn in_memory() -> Self {
        Self::new(MemoryResultStore::new())
    }

    /// Persist checkpoint manifests under `dir` in addition to keeping them in memory.
    pub fn with_checkpoint_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.checkpoint_dir = Some(dir.into());
        self
    }

    pub fn with_event(mut self, event: Event) -> Self {
        self.event = event;
        self
    }

    /// Start a new run: fresh id, clock, status and loop position.
    pub fn begin_run(&mut self) {
        self.run_id = Uuid::new_v4();
        self.started_at = Utc::now();
        self.register.reset();
        self.cursor = LoopCursor::default();
        self.file = None;
        self.checkpoints.clear();
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    // -- status --------------------------------------------------------------

    pub fn status(&self) -> Status {
        self.register.status()
    }

    pub fn is_ok(&self) -> bool {
        self.register.is_ok()
    }

    pub fn incident(&self) -> Option<&Incident> {
        self.register.incident()
    }

    pub fn register(&self) -> &StatusRegister {
        &self.register
    }

    pub fn register_mut(&mut self) -> &mut StatusRegister {
        &mut self.register
    }

    // -- event ---------------------------------------------------------------

    pub fn event(&self) -> &Event {
        &self.event
    }

    /// Only the event source should fill the event; everything else reads it.
    pub fn event_mut(&mut self) -> &mut Event {
        &mut self.event
    }

    // -- results -------------------------------------------------------------

    pub fn store(&self) -> &dyn ResultStore {
        self.store.as_ref()
    }

    pub fn store_mut(&mut self) -> &mut dyn ResultStore {
        self.store.as_mut()
    }

    // -- loop position -------------------------------------------------------

    pub fn cursor(&self) -> LoopCursor {
        self.cursor
    }

    pub fn set_cursor(&mut self, cursor: LoopCursor) {
        self.cursor = cursor;
    }

    // -- file binding --------------------------------------------------------

    pub fn file(&self) -> Option<&FileBinding> {
        self.file.as_ref()
    }

    pub fn bind_file(&mut self, binding: FileBinding) {
        self.file = Some(binding);
    }

    pub fn unbind_file(&mut self) {
        self.file = None;
    }

    // -- checkpoints ---------------------------------------------------------

    /// Remember a completed partial export and persist its manifest.
    pub fn record_checkpoint(&mut self, manifest: CheckpointManifest) -> Result<()> {
        if let Some(dir) = &self.checkpoint_dir {
            save_manifest(&manifest, dir)?;
        }
        self.checkpoints.push(manifest);
        Ok(())
    }

    pub fn checkpoints(&self) -> &[CheckpointManifest] {
        &self.checkpoints
    }

    pub fn last_checkpoint(&self) -> Option<&CheckpointManifest> {
        self.checkpoints.last()
    }
}
