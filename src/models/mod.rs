//! Heterogeneous GNN encoder, its checkpoint format and single-order inference

pub mod checkpoint;
pub mod encoder;
pub mod inference;
pub mod layers;

pub use encoder::{FeatureScaler, HeteroEncoder, ModelSchema};
pub use inference::FraudScorer;
pub use layers::LayerVariant;
