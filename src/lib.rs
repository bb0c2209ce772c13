//! Order Fraud Graph Pipeline Library
//!
//! Builds a heterogeneous user/order/payment graph from relational tables,
//! trains a graph neural network to flag fraudulent orders, and scores
//! single incoming orders over NATS.

pub mod adapter;
pub mod config;
pub mod consumer;
pub mod error;
pub mod graph;
pub mod loader;
pub mod metrics;
pub mod models;
pub mod producer;
pub mod synthetic;
pub mod training;
pub mod types;

pub use adapter::MiniGraphAdapter;
pub use config::AppConfig;
pub use consumer::OrderConsumer;
pub use error::{FraudError, Result};
pub use graph::{build, split, TypedGraph};
pub use loader::Tables;
pub use models::{FraudScorer, HeteroEncoder};
pub use producer::ScoreProducer;
pub use training::{Trainer, TrainingReport};
pub use types::{OrderId, OrderRecord, ScoreResponse};
