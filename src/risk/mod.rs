// Emission risk controls
pub mod emission;

pub use emission::{EmissionBlock, EmissionLimiter, EmissionLimits};
