//! Neural network components

pub mod layers;
pub mod losses;
pub mod models;

pub use layers::{mlp_specs, Dense, Initializer, Layer, LayerSpec};
pub use losses::{AdversarialLoss, LossKind, Reduction};
pub use models::{Architecture, HeadActivation, OutputHead, Sequential, SequentialBuilder};
