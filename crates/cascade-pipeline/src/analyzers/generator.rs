//! Seeded synthetic event source.
//!
//! Fills the run context's event once per unit: a multiplicity drawn
//! uniformly around a configured mean, centrality and impact parameter, and
//! identified hadrons with an exponential pT spectrum.

use std::f64::consts::PI;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use cascade_types::{CascadeError, ConfigSchema, Result, Status, TaskConfig};

use crate::context::RunContext;
use crate::event::property;
use crate::task::{Children, TaskHandler};

/// `(pdg, charge, mass in GeV)` of the species the source emits.
const SPECIES: [(i32, i32, f64); 6] = [
    (211, 1, 0.13957),
    (-211, -1, 0.13957),
    (321, 1, 0.49368),
    (-321, -1, 0.49368),
    (2212, 1, 0.93827),
    (-2212, -1, 0.93827),
];

/// Largest impact parameter, in fm, mapped to 100% centrality.
const MAX_IMPACT_PARAMETER: f64 = 15.0;

#[derive(Debug, Clone)]
struct SourceOptions {
    seed: u64,
    mean_multiplicity: f64,
    pt_slope: f64,
    eta_max: f64,
    max_events: u64,
    particle_capacity: usize,
    particle_ceiling: usize,
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self {
            seed: 1234,
            mean_multiplicity: 20.0,
            pt_slope: 0.5,
            eta_max: 1.0,
            max_events: 0,
            particle_capacity: 64,
            particle_ceiling: 0,
        }
    }
}

pub struct SyntheticSource {
    options: SourceOptions,
    rng: StdRng,
    produced: u64,
}

impl SyntheticSource {
    pub fn new() -> Self {
        let options = SourceOptions::default();
        Self {
            rng: StdRng::seed_from_u64(options.seed),
            options,
            produced: 0,
        }
    }

    /// Events generated in the current run.
    pub fn produced(&self) -> u64 {
        self.produced
    }
}

impl Default for SyntheticSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskHandler for SyntheticSource {
    fn handler_type(&self) -> &str {
        "synthetic_source"
    }

    fn declare(&self, schema: &mut ConfigSchema) {
        let d = SourceOptions::default();
        schema
            .declare("seed", d.seed as i64)
            .declare("mean_multiplicity", d.mean_multiplicity)
            .declare("pt_slope", d.pt_slope)
            .declare("eta_max", d.eta_max)
            .declare("max_events", d.max_events as i64)
            .declare("particle_capacity", d.particle_capacity as i64)
            .declare("particle_ceiling", d.particle_ceiling as i64);
    }

    fn configure(&mut self, config: &TaskConfig) -> Result<()> {
        self.options = SourceOptions {
            seed: config.count("seed")? as u64,
            mean_multiplicity: config.real("mean_multiplicity")?.max(0.0),
            pt_slope: config.real("pt_slope")?,
            eta_max: config.real("eta_max")?.abs(),
            max_events: config.count("max_events")? as u64,
            particle_capacity: config.count("particle_capacity")?,
            particle_ceiling: config.count("particle_ceiling")?,
        };
        if self.options.pt_slope <= 0.0 {
            return Err(CascadeError::Config {
                key: format!("{}.pt_slope", config.task()),
                message: "must be positive".into(),
            });
        }
        Ok(())
    }

    fn initialize(&mut self, ctx: &mut RunContext) -> Result<()> {
        self.rng = StdRng::seed_from_u64(self.options.seed);
        self.produced = 0;
        let ceiling = (self.options.particle_ceiling > 0).then_some(self.options.particle_ceiling);
        ctx.event_mut()
            .reserve_particles(self.options.particle_capacity, ceiling);
        Ok(())
    }

    fn execute(&mut self, ctx: &mut RunContext, _children: &mut Children<'_>) -> Result<Status> {
        if self.options.max_events > 0 && self.produced >= self.options.max_events {
            return Ok(Status::EndOfData);
        }
        let opts = &self.options;
        let rng = &mut self.rng;
        let event = ctx.event_mut();
        event.reset(self.produced);

        let multiplicity = rng.gen_range(0.0..=2.0 * opts.mean_multiplicity).round() as usize;
        let centrality: f64 = rng.gen_range(0.0..100.0);
        event.set_property(property::MULTIPLICITY, multiplicity as f64)?;
        event.set_property(property::CENTRALITY, centrality)?;
        event.set_property(
            property::IMPACT_PARAMETER,
            (centrality / 100.0).sqrt() * MAX_IMPACT_PARAMETER,
        )?;

        for _ in 0..multiplicity {
            let (pdg, charge, mass) = SPECIES[rng.gen_range(0..SPECIES.len())];
            let u: f64 = rng.gen_range(f64::EPSILON..1.0);
            let pt = -opts.pt_slope * u.ln();
            let eta = if opts.eta_max > 0.0 {
                rng.gen_range(-opts.eta_max..opts.eta_max)
            } else {
                0.0
            };
            let phi = rng.gen_range(0.0..2.0 * PI);
            event.add_particle()?.set(pdg, charge, mass, pt, eta, phi);
        }

        self.produced += 1;
        tracing::trace!(event = self.produced, multiplicity, "Event generated");
        Ok(Status::Ok)
    }

    fn clear(&mut self) {
        self.produced = 0;
    }
}
