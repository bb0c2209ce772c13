//! Error taxonomy for graph construction, modeling and checkpointing.
//!
//! Construction-time errors (`Schema`, `Referential`, `Parse`, `EmptyTable`)
//! are fatal and propagate to the caller. Degraded-but-usable conditions are
//! not errors: they are carried as status values (`LayerVariant`,
//! `MetricStatus`, `SplitReport`) and logged.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, FraudError>;

#[derive(Error, Debug)]
pub enum FraudError {
    #[error("table '{table}' is missing required column '{column}'")]
    Schema { table: String, column: String },

    #[error("relation '{relation}' references unknown id '{id}'")]
    Referential { relation: String, id: String },

    #[error("{partition} partition contains no positive examples")]
    Imbalance { partition: String },

    #[error("invalid split: {0}")]
    InvalidSplit(String),

    #[error("table '{table}' column '{column}' row {row}: cannot parse '{value}' as a number")]
    Parse {
        table: String,
        column: String,
        row: usize,
        value: String,
    },

    #[error("table '{0}' has no rows")]
    EmptyTable(String),

    #[error("structural mismatch: {0}")]
    StructuralMismatch(String),

    #[error("checkpoint not found at {}", .0.display())]
    CheckpointMissing(PathBuf),

    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("safetensors error: {0}")]
    Safetensors(#[from] safetensors::SafeTensorError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl FraudError {
    pub(crate) fn schema(table: &str, column: &str) -> Self {
        FraudError::Schema {
            table: table.to_string(),
            column: column.to_string(),
        }
    }

    /// True for errors raised while turning tables into a graph.
    pub fn is_construction_error(&self) -> bool {
        matches!(
            self,
            FraudError::Schema { .. }
                | FraudError::Referential { .. }
                | FraudError::Parse { .. }
                | FraudError::EmptyTable(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = FraudError::schema("orders", "is_fraud");
        assert_eq!(
            err.to_string(),
            "table 'orders' is missing required column 'is_fraud'"
        );
        assert!(err.is_construction_error());

        let err = FraudError::StructuralMismatch("payment categories differ".to_string());
        assert!(!err.is_construction_error());
    }
}
