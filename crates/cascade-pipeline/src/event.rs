//! Reference event model: an event-level property table plus a pooled list
//! of particles, both readable by filters through [`FeatureSource`].

use cascade_types::{CascadeError, Result};

use crate::condition::{FeatureCategory, FeatureSource};
use crate::pool::Pool;

/// Selectors into the kinematic table of a [`Particle`].
pub mod kinematic {
    pub const PT: usize = 0;
    pub const ETA: usize = 1;
    pub const RAPIDITY: usize = 2;
    pub const PHI: usize = 3;
    pub const ENERGY: usize = 4;
    pub const MASS: usize = 5;
    pub const COUNT: usize = 6;
}

/// Selectors into the property table of an [`Event`].
pub mod property {
    pub const MULTIPLICITY: usize = 0;
    pub const CENTRALITY: usize = 1;
    pub const IMPACT_PARAMETER: usize = 2;
    pub const COUNT: usize = 3;
}

fn out_of_range(category: FeatureCategory, selector: usize, available: usize) -> CascadeError {
    CascadeError::FeatureOutOfRange {
        category: category.to_string(),
        selector,
        available,
    }
}

// ---------------------------------------------------------------------------
// Particle
// ---------------------------------------------------------------------------

/// A particle stored as a four-momentum plus identity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Particle {
    pub pdg: i32,
    pub charge: i32,
    pub px: f64,
    pub py: f64,
    pub pz: f64,
    pub e: f64,
}

impl Particle {
    /// Overwrite this particle in place from `(pT, η, φ)` and a rest mass.
    pub fn set(&mut self, pdg: i32, charge: i32, mass: f64, pt: f64, eta: f64, phi: f64) {
        self.pdg = pdg;
        self.charge = charge;
        self.px = pt * phi.cos();
        self.py = pt * phi.sin();
        self.pz = pt * eta.sinh();
        let p2 = self.px * self.px + self.py * self.py + self.pz * self.pz;
        self.e = (p2 + mass * mass).sqrt();
    }

    pub fn pt(&self) -> f64 {
        self.px.hypot(self.py)
    }

    pub fn p(&self) -> f64 {
        (self.px * self.px + self.py * self.py + self.pz * self.pz).sqrt()
    }

    /// Pseudorapidity. Zero for a particle with no transverse momentum.
    pub fn eta(&self) -> f64 {
        let pt = self.pt();
        if pt == 0.0 {
            return 0.0;
        }
        (self.pz / pt).asinh()
    }

    pub fn rapidity(&self) -> f64 {
        let num = self.e + self.pz;
        let den = self.e - self.pz;
        if num <= 0.0 || den <= 0.0 {
            return 0.0;
        }
        0.5 * (num / den).ln()
    }

    pub fn phi(&self) -> f64 {
        self.py.atan2(self.px)
    }

    pub fn mass(&self) -> f64 {
        let m2 = self.e * self.e - self.p().powi(2);
        if m2 > 0.0 {
            m2.sqrt()
        } else {
            0.0
        }
    }
}

impl FeatureSource for Particle {
    fn feature(&self, category: FeatureCategory, selector: usize) -> Result<f64> {
        match (category, selector) {
            (FeatureCategory::Kinematic, kinematic::PT) => Ok(self.pt()),
            (FeatureCategory::Kinematic, kinematic::ETA) => Ok(self.eta()),
            (FeatureCategory::Kinematic, kinematic::RAPIDITY) => Ok(self.rapidity()),
            (FeatureCategory::Kinematic, kinematic::PHI) => Ok(self.phi()),
            (FeatureCategory::Kinematic, kinematic::ENERGY) => Ok(self.e),
            (FeatureCategory::Kinematic, kinematic::MASS) => Ok(self.mass()),
            (FeatureCategory::Kinematic, _) => Err(out_of_range(category, selector, kinematic::COUNT)),
            (FeatureCategory::Charge, 0) => Ok(f64::from(self.charge)),
            (FeatureCategory::Species, 0) => Ok(f64::from(self.pdg)),
            (FeatureCategory::Charge | FeatureCategory::Species, _) => {
                Err(out_of_range(category, selector, 1))
            }
            // Particles carry no event-level table.
            (FeatureCategory::Global, _) => Err(out_of_range(category, selector, 0)),
        }
    }
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// One processing unit of the reference domain.
///
/// The particle pool is rewound by [`Event::reset`] instead of being
/// reallocated, so steady-state event generation does not touch the heap.
#[derive(Debug)]
pub struct Event {
    index: u64,
    properties: Vec<f64>,
    particles: Pool<Particle>,
}

impl Event {
    /// An event with `n_properties` global slots and `capacity` pre-built particles.
    pub fn new(n_properties: usize, capacity: usize) -> Self {
        Self {
            index: 0,
            properties: vec![0.0; n_properties],
            particles: Pool::with_capacity(capacity),
        }
    }

    /// Rebuild the particle pool, e.g. when a generator knows its typical multiplicity.
    pub fn reserve_particles(&mut self, capacity: usize, ceiling: Option<usize>) {
        let mut pool = Pool::with_capacity(capacity);
        if let Some(max) = ceiling {
            pool = pool.with_ceiling(max);
        }
        self.particles = pool;
    }

    /// Start a new event: zero the property table and rewind the pool.
    pub fn reset(&mut self, index: u64) {
        self.index = index;
        self.properties.iter_mut().for_each(|p| *p = 0.0);
        self.particles.reset();
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn property(&self, slot: usize) -> Result<f64> {
        self.properties
            .get(slot)
            .copied()
            .ok_or_else(|| out_of_range(FeatureCategory::Global, slot, self.properties.len()))
    }

    pub fn set_property(&mut self, slot: usize, value: f64) -> Result<()> {
        let available = self.properties.len();
        let cell = self
            .properties
            .get_mut(slot)
            .ok_or_else(|| out_of_range(FeatureCategory::Global, slot, available))?;
        *cell = value;
        Ok(())
    }

    pub fn properties(&self) -> &[f64] {
        &self.properties
    }

    /// Check out the next pooled particle for filling.
    pub fn add_particle(&mut self) -> Result<&mut Particle> {
        self.particles.next_mut()
    }

    pub fn particles(&self) -> impl Iterator<Item = &Particle> {
        self.particles.iter()
    }

    pub fn multiplicity(&self) -> usize {
        self.particles.size()
    }

    pub fn pool(&self) -> &Pool<Particle> {
        &self.particles
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::new(property::COUNT, 0)
    }
}

impl FeatureSource for Event {
    fn feature(&self, category: FeatureCategory, selector: usize) -> Result<f64> {
        match category {
            FeatureCategory::Global => self.property(selector),
            _ => Err(out_of_range(category, selector, 0)),
        }
    }
}
