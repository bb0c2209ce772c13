//! Single-order inference on top of a trained encoder

use super::checkpoint;
use super::encoder::{HeteroEncoder, ModelSchema};
use crate::adapter::MiniGraphAdapter;
use crate::error::{FraudError, Result};
use crate::graph::{FeatureSchema, GraphTensors};
use crate::types::{OrderId, OrderRecord, ScoreResponse};
use candle_core::Device;
use std::path::Path;
use tracing::{debug, info, warn};

/// Read-only scorer; share it behind an `Arc` across tasks.
pub struct FraudScorer {
    encoder: HeteroEncoder,
    adapter: MiniGraphAdapter,
    threshold: f64,
}

impl FraudScorer {
    /// Load a checkpoint and rebuild the encoder it describes.
    pub fn load<P: AsRef<Path>>(path: P, threshold: f64) -> Result<Self> {
        let encoder = checkpoint::load(path, &Device::Cpu)?;
        Ok(Self::from_encoder(encoder, threshold))
    }

    /// Like `load`, but fail before building anything if the checkpoint's
    /// feature layout or payment categories differ from `expected`.
    pub fn load_expecting<P: AsRef<Path>>(
        path: P,
        threshold: f64,
        expected: &FeatureSchema,
    ) -> Result<Self> {
        let path = path.as_ref();
        checkpoint::read_schema(path)?.ensure_features_match(expected)?;
        Self::load(path, threshold)
    }

    pub fn from_encoder(encoder: HeteroEncoder, threshold: f64) -> Self {
        let adapter = MiniGraphAdapter::new(encoder.schema().features.clone());
        info!(
            variant = ?encoder.variant(),
            threshold = threshold,
            categories = ?adapter.schema().payment_categories,
            "Fraud scorer ready"
        );
        Self {
            encoder,
            adapter,
            threshold,
        }
    }

    /// Score one order. Failures are reported in the response, never raised.
    pub fn score(&self, record: &OrderRecord) -> ScoreResponse {
        let order_id = record.order_id.clone().unwrap_or_else(OrderId::unknown);
        match self.probability(record) {
            Ok(p) => {
                debug!(order_id = %order_id, probability = p, "Order scored");
                ScoreResponse::scored(order_id, p, self.threshold)
            }
            Err(e) => {
                warn!(order_id = %order_id, error = %e, "Scoring failed");
                ScoreResponse::failed(order_id, e.to_string())
            }
        }
    }

    /// Fraud probability of one order.
    pub fn probability(&self, record: &OrderRecord) -> Result<f64> {
        let graph = self.adapter.to_mini_graph(record);
        let tensors = GraphTensors::from_graph(&graph, self.encoder.device())?;
        let probs = self.encoder.predict_proba(&tensors)?;
        probs
            .first()
            .map(|&p| p as f64)
            .ok_or_else(|| FraudError::StructuralMismatch("encoder produced no order score".into()))
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn schema(&self) -> &ModelSchema {
        self.encoder.schema()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;
    use crate::graph::build;
    use crate::synthetic::{generate, SyntheticConfig};

    fn scorer() -> FraudScorer {
        let tables = generate(&SyntheticConfig {
            users: 8,
            payments: 8,
            orders: 20,
            ..SyntheticConfig::default()
        })
        .unwrap();
        let graph = build(&tables).unwrap();
        let config = ModelConfig {
            hidden: 8,
            num_heads: 2,
            ..ModelConfig::default()
        };
        let encoder = HeteroEncoder::new(&config, &graph, &Device::Cpu).unwrap();
        FraudScorer::from_encoder(encoder, 0.5)
    }

    #[test]
    fn test_score_all_zero_order() {
        let response = scorer().score(&OrderRecord::new(42i64));

        assert_eq!(response.order_id, OrderId::Number(42));
        let p = response.fraud_probability.unwrap();
        assert!((0.0..=1.0).contains(&p));
        assert_eq!(response.is_fraud, Some(p >= 0.5));
        assert!(response.error.is_none());
    }

    #[test]
    fn test_score_without_id_echoes_unknown() {
        let response = scorer().score(&OrderRecord::default());
        assert_eq!(response.order_id, OrderId::unknown());
        assert!(response.fraud_probability.is_some());
    }

    #[test]
    fn test_load_expecting_rejects_other_categories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.safetensors");
        let s = scorer();
        checkpoint::save(&s.encoder, &path).unwrap();

        let mut expected = s.schema().features.clone();
        expected.payment_categories.push("crypto".to_string());
        let result = FraudScorer::load_expecting(&path, 0.5, &expected);
        assert!(matches!(result, Err(FraudError::StructuralMismatch(_))));

        let ok = FraudScorer::load_expecting(&path, 0.5, &s.schema().features).unwrap();
        let record = OrderRecord::new("x");
        assert_eq!(ok.probability(&record).unwrap(), s.probability(&record).unwrap());
    }
}
