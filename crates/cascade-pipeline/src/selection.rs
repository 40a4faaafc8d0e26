//! Event and particle selection with acceptance bookkeeping.
//!
//! An [`EventSelection`] is the capability an analysis task exposes when it
//! filters events (and optionally the particles of accepted events). Filters
//! are shared with other tasks through `Arc`; the acceptance counters are
//! owned and reset by the task core at every `initialize()`.

use std::sync::Arc;

use cascade_types::{CascadeError, Result};

use crate::condition::FeatureSource;
use crate::filter::{EventFilter, Filter, ParticleFilter};

#[derive(Debug, Clone)]
pub struct EventSelection {
    event_filters: Vec<Arc<EventFilter>>,
    particle_filters: Vec<Arc<ParticleFilter>>,
    events_accepted: Vec<u64>,
    /// Row-major `[event_filter][particle_filter]`.
    particles_accepted: Vec<u64>,
}

impl EventSelection {
    pub fn new(event_filters: Vec<Arc<EventFilter>>, particle_filters: Vec<Arc<ParticleFilter>>) -> Self {
        let mut selection = Self {
            event_filters,
            particle_filters,
            events_accepted: Vec::new(),
            particles_accepted: Vec::new(),
        };
        selection.reset();
        selection
    }

    pub fn event_filters(&self) -> &[Arc<EventFilter>] {
        &self.event_filters
    }

    pub fn particle_filters(&self) -> &[Arc<ParticleFilter>] {
        &self.particle_filters
    }

    /// Size the counter tables to the filter lists and zero them.
    pub fn reset(&mut self) {
        let rows = self.event_filters.len();
        let columns = self.particle_filters.len();
        self.events_accepted.clear();
        self.events_accepted.resize(rows, 0);
        self.particles_accepted.clear();
        self.particles_accepted.resize(rows * columns, 0);
    }

    /// Usage check performed at `initialize()`: a task that selects events
    /// must have at least one event filter.
    pub fn validate(&self, task: &str) -> Result<()> {
        if self.event_filters.is_empty() {
            return Err(CascadeError::MissingFilter {
                task: task.to_string(),
                kind: "event",
            });
        }
        Ok(())
    }

    fn index_error(&self, event_filter: usize, particle_filter: usize) -> CascadeError {
        CascadeError::AcceptanceIndex {
            event_filter,
            particle_filter,
            rows: self.event_filters.len(),
            columns: self.particle_filters.len(),
        }
    }

    pub fn increment_events_accepted(&mut self, event_filter: usize) -> Result<()> {
        match self.events_accepted.get_mut(event_filter) {
            Some(count) => {
                *count += 1;
                Ok(())
            }
            None => Err(self.index_error(event_filter, 0)),
        }
    }

    pub fn increment_particles_accepted(&mut self, event_filter: usize, particle_filter: usize) -> Result<()> {
        let columns = self.particle_filters.len();
        if event_filter >= self.event_filters.len() || particle_filter >= columns {
            return Err(self.index_error(event_filter, particle_filter));
        }
        self.particles_accepted[event_filter * columns + particle_filter] += 1;
        Ok(())
    }

    pub fn events_accepted(&self, event_filter: usize) -> Result<u64> {
        self.events_accepted
            .get(event_filter)
            .copied()
            .ok_or_else(|| self.index_error(event_filter, 0))
    }

    pub fn particles_accepted(&self, event_filter: usize, particle_filter: usize) -> Result<u64> {
        let columns = self.particle_filters.len();
        if event_filter >= self.event_filters.len() || particle_filter >= columns {
            return Err(self.index_error(event_filter, particle_filter));
        }
        Ok(self.particles_accepted[event_filter * columns + particle_filter])
    }

    /// Indices of the event filters that accept `event`.
    pub fn accepting_event_filters<S: FeatureSource + ?Sized>(&self, event: &S) -> Result<Vec<usize>> {
        accepting(&self.event_filters, event)
    }

    /// Indices of the particle filters that accept `particle`.
    pub fn accepting_particle_filters<S: FeatureSource + ?Sized>(&self, particle: &S) -> Result<Vec<usize>> {
        accepting(&self.particle_filters, particle)
    }
}

fn accepting<S: FeatureSource + ?Sized>(filters: &[Arc<Filter>], item: &S) -> Result<Vec<usize>> {
    let mut accepted = Vec::new();
    for (i, filter) in filters.iter().enumerate() {
        if filter.accept(item)? {
            accepted.push(i);
        }
    }
    Ok(accepted)
}
