//! Reference analysis tasks for the synthetic event domain.

pub mod generator;
pub mod spectrum;

pub use generator::SyntheticSource;
pub use spectrum::SpectrumAnalyzer;
