//! Conditional adversarial models

pub mod model;
pub mod samples;

pub use model::{AdversarialModel, Player};
pub use samples::{Batch, Sample, SampleArranger};
