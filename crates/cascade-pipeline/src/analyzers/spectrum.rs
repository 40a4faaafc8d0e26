//! Filtered transverse-momentum spectra.
//!
//! For every (event filter, particle filter) pair the analyzer fills a pT
//! histogram `pt.<event>.<particle>`. Acceptance counts are kept alongside as
//! `events.<event>` and `particles.<event>.<particle>` counters, updated with
//! every accepted event so that partial exports normalise as well as the
//! final one. The derived pass reads them back from an exported file alone. Derived
//! statistics are the per-event spectrum `dndpt.<event>.<particle>` and the
//! mean pT `mean_pt.<event>.<particle>`.

use std::sync::Arc;

use cascade_types::{CascadeError, ConfigSchema, Result, Status, TaskConfig};

use crate::context::RunContext;
use crate::filter::{EventFilter, ParticleFilter};
use crate::results::{Histogram, ResultGroup};
use crate::selection::EventSelection;
use crate::task::{Children, TaskHandler};

#[derive(Debug, Clone, Copy, PartialEq)]
struct Binning {
    bins: usize,
    pt_min: f64,
    pt_max: f64,
}

/// Statistic keys indexed by filter position, laid out at initialize.
#[derive(Debug, Default)]
struct Keys {
    events: Vec<String>,
    particles: Vec<Vec<String>>,
    histograms: Vec<Vec<String>>,
}

pub struct SpectrumAnalyzer {
    selection: EventSelection,
    group: ResultGroup,
    binning: Binning,
    keys: Keys,
}

impl SpectrumAnalyzer {
    /// `name` becomes the result group name; use the task name.
    pub fn new(
        name: impl Into<String>,
        event_filters: Vec<Arc<EventFilter>>,
        particle_filters: Vec<Arc<ParticleFilter>>,
    ) -> Self {
        Self {
            selection: EventSelection::new(event_filters, particle_filters),
            group: ResultGroup::new(name),
            binning: Binning {
                bins: 40,
                pt_min: 0.0,
                pt_max: 4.0,
            },
            keys: Keys::default(),
        }
    }

    fn pairs(&self) -> Vec<(usize, String, usize, String)> {
        let mut out = Vec::new();
        for (i, ef) in self.selection.event_filters().iter().enumerate() {
            for (j, pf) in self.selection.particle_filters().iter().enumerate() {
                out.push((i, ef.name().to_string(), j, pf.name().to_string()));
            }
        }
        out
    }

    pub fn histogram_key(event_filter: &str, particle_filter: &str) -> String {
        format!("pt.{event_filter}.{particle_filter}")
    }
}

fn missing(group: &ResultGroup, key: &str) -> CascadeError {
    CascadeError::Other(format!("group '{}' has no statistic '{key}'", group.name()))
}

fn bump(group: &mut ResultGroup, key: &str) -> Result<()> {
    let value = group.counter(key).ok_or_else(|| missing(group, key))?;
    group.set_counter(key, value + 1.0);
    Ok(())
}

impl TaskHandler for SpectrumAnalyzer {
    fn handler_type(&self) -> &str {
        "spectrum"
    }

    fn declare(&self, schema: &mut ConfigSchema) {
        schema
            .declare("bins", 40i64)
            .declare("pt_min", 0.0)
            .declare("pt_max", 4.0);
    }

    fn configure(&mut self, config: &TaskConfig) -> Result<()> {
        self.binning = Binning {
            bins: config.count("bins")?,
            pt_min: config.real("pt_min")?,
            pt_max: config.real("pt_max")?,
        };
        // Reject bad binning now rather than at the first initialize.
        Histogram::new(self.binning.bins, self.binning.pt_min, self.binning.pt_max)?;
        Ok(())
    }

    fn initialize(&mut self, _ctx: &mut RunContext) -> Result<()> {
        self.group.clear();
        let template = Histogram::new(self.binning.bins, self.binning.pt_min, self.binning.pt_max)?;
        let mut keys = Keys::default();
        for ef in self.selection.event_filters() {
            let key = format!("events.{}", ef.name());
            self.group.add_counter(key.clone());
            keys.events.push(key);
            keys.particles.push(Vec::new());
            keys.histograms.push(Vec::new());
        }
        for (i, ef, _, pf) in self.pairs() {
            let histogram = Self::histogram_key(&ef, &pf);
            let counter = format!("particles.{ef}.{pf}");
            self.group.add_histogram(histogram.clone(), template.clone());
            self.group.add_counter(counter.clone());
            keys.histograms[i].push(histogram);
            keys.particles[i].push(counter);
        }
        self.keys = keys;
        Ok(())
    }

    fn execute(&mut self, ctx: &mut RunContext, _children: &mut Children<'_>) -> Result<Status> {
        let event = ctx.event();
        let accepted = self.selection.accepting_event_filters(event)?;
        for &i in &accepted {
            self.selection.increment_events_accepted(i)?;
            bump(&mut self.group, &self.keys.events[i])?;
        }
        if accepted.is_empty() || self.selection.particle_filters().is_empty() {
            return Ok(Status::Ok);
        }

        for particle in event.particles() {
            let passing = self.selection.accepting_particle_filters(particle)?;
            if passing.is_empty() {
                continue;
            }
            let pt = particle.pt();
            for &i in &accepted {
                for &j in &passing {
                    self.selection.increment_particles_accepted(i, j)?;
                    bump(&mut self.group, &self.keys.particles[i][j])?;
                    let key = &self.keys.histograms[i][j];
                    match self.group.histogram_mut(key) {
                        Some(histogram) => histogram.fill(pt),
                        None => return Err(missing(&self.group, key)),
                    }
                }
            }
        }
        Ok(Status::Ok)
    }

    fn finalize(&mut self, _ctx: &mut RunContext, _children: &mut Children<'_>) -> Result<()> {
        tracing::info!(
            group = %self.group.name(),
            events = self.selection.events_accepted(0).unwrap_or(0),
            "Spectra finalized"
        );
        Ok(())
    }

    fn selection(&self) -> Option<&EventSelection> {
        Some(&self.selection)
    }

    fn selection_mut(&mut self) -> Option<&mut EventSelection> {
        Some(&mut self.selection)
    }

    fn results(&self) -> Option<&ResultGroup> {
        Some(&self.group)
    }

    fn results_mut(&mut self) -> Option<&mut ResultGroup> {
        Some(&mut self.group)
    }

    fn create_derived(&mut self, _ctx: &mut RunContext) -> Result<()> {
        for (_, ef, _, pf) in self.pairs() {
            let source = Self::histogram_key(&ef, &pf);
            let empty = self
                .group
                .histogram(&source)
                .ok_or_else(|| missing(&self.group, &source))?
                .empty_like();
            self.group.add_histogram(format!("dndpt.{ef}.{pf}"), empty);
            self.group.add_counter(format!("mean_pt.{ef}.{pf}"));
        }
        Ok(())
    }

    fn calculate_derived(&mut self, _ctx: &mut RunContext) -> Result<()> {
        for (_, ef, _, pf) in self.pairs() {
            let events_key = format!("events.{ef}");
            let events = self.group.counter(&events_key).ok_or_else(|| missing(&self.group, &events_key))?;
            let source = Self::histogram_key(&ef, &pf);
            let mut density = self
                .group
                .histogram(&source)
                .ok_or_else(|| missing(&self.group, &source))?
                .clone();
            let mean = density.mean().unwrap_or(0.0);
            if !density.normalize_per_event(events) {
                tracing::warn!(event_filter = %ef, "No accepted events, derived spectrum left empty");
                density.reset();
            }
            self.group.add_histogram(format!("dndpt.{ef}.{pf}"), density);
            self.group.set_counter(&format!("mean_pt.{ef}.{pf}"), mean);
        }
        Ok(())
    }

    fn clear(&mut self) {
        self.selection.reset();
    }
}
