//! Type definitions for the fraud graph pipeline

pub mod order;
pub mod score;

pub use order::{OrderId, OrderRecord};
pub use score::ScoreResponse;
