//! Per-event loop with bunch / sub-bunch bookkeeping and partial export.

use cascade_types::{CascadeError, ConfigSchema, Result, Status, TaskConfig};

use crate::checkpoint::CheckpointManifest;
use crate::context::{LoopCursor, RunContext};
use crate::task::{Children, TaskHandler};

/// Loop extent resolved from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BunchPlan {
    pub units_per_sub_bunch: u64,
    pub sub_bunches_per_bunch: usize,
    pub bunches: usize,
    /// 0 means the full `bunches × sub_bunches × units` product.
    pub requested_units: u64,
    pub partial_export: bool,
    pub single_segment: bool,
    pub final_export: bool,
    pub output_name: String,
}

impl Default for BunchPlan {
    fn default() -> Self {
        Self {
            units_per_sub_bunch: 1000,
            sub_bunches_per_bunch: 1,
            bunches: 1,
            requested_units: 0,
            partial_export: false,
            single_segment: false,
            final_export: true,
            output_name: "run".into(),
        }
    }
}

impl BunchPlan {
    fn declare(schema: &mut ConfigSchema) {
        let d = Self::default();
        schema
            .declare("units_per_sub_bunch", d.units_per_sub_bunch as i64)
            .declare("sub_bunches_per_bunch", d.sub_bunches_per_bunch as i64)
            .declare("bunches", d.bunches as i64)
            .declare("requested_units", d.requested_units as i64)
            .declare("partial_export", d.partial_export)
            .declare("single_segment", d.single_segment)
            .declare("final_export", d.final_export)
            .declare("output_name", d.output_name);
    }

    fn from_config(config: &TaskConfig) -> Result<Self> {
        let mut plan = Self {
            units_per_sub_bunch: config.count("units_per_sub_bunch")? as u64,
            sub_bunches_per_bunch: config.count("sub_bunches_per_bunch")?,
            bunches: config.count("bunches")?,
            requested_units: config.count("requested_units")? as u64,
            partial_export: config.bool("partial_export")?,
            single_segment: config.bool("single_segment")?,
            final_export: config.bool("final_export")?,
            output_name: config.text("output_name")?.to_string(),
        };
        for (key, value) in [
            ("units_per_sub_bunch", plan.units_per_sub_bunch as usize),
            ("sub_bunches_per_bunch", plan.sub_bunches_per_bunch),
            ("bunches", plan.bunches),
        ] {
            if value == 0 {
                return Err(CascadeError::Config {
                    key: format!("{}.{key}", config.task()),
                    message: "must be at least 1".into(),
                });
            }
        }
        if plan.single_segment {
            plan.sub_bunches_per_bunch = 1;
            plan.bunches = 1;
            plan.requested_units = plan.units_per_sub_bunch;
        }
        if plan.checked_period().is_none() {
            return Err(CascadeError::Config {
                key: format!("{}.bunches", config.task()),
                message: "bunches × sub_bunches_per_bunch × units_per_sub_bunch overflows".into(),
            });
        }
        Ok(plan)
    }

    fn checked_period(&self) -> Option<u64> {
        (self.bunches as u64)
            .checked_mul(self.sub_bunches_per_bunch as u64)?
            .checked_mul(self.units_per_sub_bunch)
    }

    /// `bunches × sub_bunches_per_bunch × units_per_sub_bunch`, saturating.
    /// Configured plans never saturate.
    pub fn period(&self) -> u64 {
        self.checked_period().unwrap_or(u64::MAX)
    }

    pub fn requested(&self) -> u64 {
        if self.requested_units == 0 {
            self.period()
        } else {
            self.requested_units
        }
    }

    /// Result path for the partial export of `(bunch, sub_bunch)`.
    pub fn partial_path(&self, bunch: usize, sub_bunch: usize) -> String {
        format!("{}_B{bunch}_S{sub_bunch}", self.output_name)
    }
}

/// Drives its children once per unit until the requested total, end of
/// data, or any non-Ok status.
#[derive(Debug, Default)]
pub struct EventIterator {
    plan: BunchPlan,
    unit: u64,
    sub_bunch: usize,
    bunch: usize,
}

impl EventIterator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn plan(&self) -> &BunchPlan {
        &self.plan
    }

    fn cursor(&self) -> LoopCursor {
        LoopCursor {
            unit: self.unit,
            sub_bunch: self.sub_bunch,
            bunch: self.bunch,
        }
    }

    /// Export every child, record the manifest, then advance the sub-bunch.
    /// Returns `false` once the bunches are exhausted.
    fn checkpoint(&mut self, ctx: &mut RunContext, children: &mut Children<'_>) -> Result<bool> {
        let path = self.plan.partial_path(self.bunch, self.sub_bunch);
        tracing::info!(
            unit = self.unit,
            bunch = self.bunch,
            sub_bunch = self.sub_bunch,
            path = %path,
            "Partial export"
        );
        children.save_partial(ctx, &path)?;
        if !ctx.is_ok() {
            return Ok(false);
        }
        let manifest = CheckpointManifest::new(
            ctx.run_id().to_string(),
            self.unit,
            self.bunch,
            self.sub_bunch,
            path,
            children.group_names(),
        );
        ctx.record_checkpoint(manifest)?;

        self.sub_bunch += 1;
        if self.sub_bunch == self.plan.sub_bunches_per_bunch {
            self.sub_bunch = 0;
            self.bunch += 1;
            if self.bunch == self.plan.bunches {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl TaskHandler for EventIterator {
    fn handler_type(&self) -> &str {
        "iterator"
    }

    fn declare(&self, schema: &mut ConfigSchema) {
        BunchPlan::declare(schema);
    }

    fn configure(&mut self, config: &TaskConfig) -> Result<()> {
        self.plan = BunchPlan::from_config(config)?;
        Ok(())
    }

    fn initialize(&mut self, ctx: &mut RunContext) -> Result<()> {
        self.unit = 0;
        self.sub_bunch = 0;
        self.bunch = 0;
        ctx.set_cursor(self.cursor());
        Ok(())
    }

    fn execute(&mut self, ctx: &mut RunContext, children: &mut Children<'_>) -> Result<Status> {
        let requested = self.plan.requested();
        let period = self.plan.period();
        tracing::info!(
            requested,
            units_per_sub_bunch = self.plan.units_per_sub_bunch,
            sub_bunches = self.plan.sub_bunches_per_bunch,
            bunches = self.plan.bunches,
            "Event loop started"
        );

        while self.unit < requested {
            ctx.set_cursor(self.cursor());
            children.execute(ctx)?;
            if !ctx.is_ok() {
                tracing::info!(unit = self.unit, status = %ctx.status(), "Event loop stopped");
                break;
            }
            self.unit += 1;
            if self.unit % 1000 == 0 {
                tracing::debug!(unit = self.unit, "Progress");
            }
            if self.plan.partial_export && self.unit % period == 0 && !self.checkpoint(ctx, children)? {
                break;
            }
        }

        ctx.set_cursor(self.cursor());
        tracing::info!(units = self.unit, "Event loop finished");
        Ok(ctx.status())
    }

    fn finalize(&mut self, ctx: &mut RunContext, children: &mut Children<'_>) -> Result<()> {
        if self.plan.final_export && ctx.status().is_failure() {
            tracing::warn!(status = %ctx.status(), path = %self.plan.output_name, "Run failed, final export skipped");
        } else if self.plan.final_export {
            let path = self.plan.output_name.clone();
            children.export(ctx, &path)?;
        }
        Ok(())
    }
}
