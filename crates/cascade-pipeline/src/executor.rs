//! Batch executor: the five-phase run of a task tree.
//!
//! configure → validate → initialize → execute → finalize/clear. Finalize and
//! clear always run on whatever was started, even after Error or Fatal.

use std::time::Instant;

use serde::Serialize;

use cascade_types::{Configuration, Incident, Result, Status};

use crate::checkpoint::CheckpointManifest;
use crate::context::RunContext;
use crate::task::Task;
use crate::validation::validate_or_raise;

/// Outcome of one [`BatchExecutor::run`].
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub status: Status,
    pub incident: Option<Incident>,
    /// Units completed by the event loop, if any.
    pub units: u64,
    /// Last partial export written before the run ended. Output produced
    /// after it by a failed run is not trustworthy.
    pub last_checkpoint: Option<CheckpointManifest>,
    pub started_at: String,
    pub duration_ms: u64,
}

impl RunSummary {
    /// Normal completion: Ok, or the input ran out.
    pub fn succeeded(&self) -> bool {
        !self.status.is_failure() && self.status != Status::Warning
    }
}

pub struct BatchExecutor {
    config: Configuration,
}

impl BatchExecutor {
    pub fn new(config: Configuration) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    /// Run `root` to completion against `ctx`.
    ///
    /// Usage and data failures end up in the summary's status and incident.
    /// `Err` is returned only for lifecycle misuse.
    pub fn run(&self, root: &mut Task, ctx: &mut RunContext) -> Result<RunSummary> {
        ctx.begin_run();
        let clock = Instant::now();
        tracing::info!(run_id = %ctx.run_id(), root = %root.name(), "Run started");

        // Phase 1: Configure
        if let Err(err) = root.configure(&self.config) {
            if err.is_fatal() {
                return Err(err);
            }
            ctx.register_mut().report_error(root.name(), &err);
            tracing::error!(error = %err, "Configuration rejected");
            return Ok(self.summarize(ctx, clock));
        }

        // Phase 2: Validate
        match validate_or_raise(root) {
            Ok(diagnostics) => {
                for d in &diagnostics {
                    tracing::warn!(rule = %d.rule, task = ?d.task, "{}", d.message);
                }
            }
            Err(err) => {
                ctx.register_mut().report_error(root.name(), &err);
                tracing::error!(error = %err, "Validation failed");
                return Ok(self.summarize(ctx, clock));
            }
        }

        // Phase 3: Initialize
        root.initialize(ctx)?;

        // Phase 4: Execute
        if ctx.is_ok() {
            root.execute(ctx)?;
        }

        // Phase 5: Finalize and release
        root.finalize(ctx)?;
        root.clear(ctx)?;

        let summary = self.summarize(ctx, clock);
        tracing::info!(
            run_id = %summary.run_id,
            status = %summary.status,
            units = summary.units,
            duration_ms = summary.duration_ms,
            "Run finished"
        );
        Ok(summary)
    }

    fn summarize(&self, ctx: &RunContext, clock: Instant) -> RunSummary {
        RunSummary {
            run_id: ctx.run_id().to_string(),
            status: ctx.status(),
            incident: ctx.incident().cloned(),
            units: ctx.cursor().unit,
            last_checkpoint: ctx.last_checkpoint().cloned(),
            started_at: ctx.started_at().to_rfc3339(),
            duration_ms: clock.elapsed().as_millis() as u64,
        }
    }
}
