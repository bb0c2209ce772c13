//! Score responses published for each scored order

use super::order::OrderId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of scoring one order. On failure the probability and flag are
/// absent and `error` says why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreResponse {
    pub order_id: OrderId,

    /// Probability of fraud (0.0 - 1.0)
    pub fraud_probability: Option<f64>,

    /// Probability at or above the operating threshold
    pub is_fraud: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Scoring timestamp
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl ScoreResponse {
    pub fn scored(order_id: OrderId, probability: f64, threshold: f64) -> Self {
        Self {
            order_id,
            fraud_probability: Some(probability),
            is_fraud: Some(probability >= threshold),
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failed(order_id: OrderId, error: impl Into<String>) -> Self {
        Self {
            order_id,
            fraud_probability: None,
            is_fraud: None,
            error: Some(error.into()),
            timestamp: Utc::now(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}
