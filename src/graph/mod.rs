pub mod builder;
pub mod schema;
pub mod split;
pub mod tensors;
pub mod typed;

pub use builder::build;
pub use schema::{NodeType, Relation};
pub use split::{split, SplitConfig, SplitReport};
pub use tensors::{EdgeTensors, GraphTensors};
pub use typed::{
    EdgeIndex, FeatureMatrix, FeatureSchema, IdMap, Partition, Partitions, TypedGraph,
};
