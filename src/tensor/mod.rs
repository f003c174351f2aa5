//! Execution context and random sources for tensors built by the crate

pub mod devices;
pub mod sampler;

pub use devices::{streams, ExecutionContext};
pub use sampler::Sampler;
