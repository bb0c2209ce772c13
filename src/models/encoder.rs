//! Heterogeneous graph encoder producing one fraud logit per order.

use super::layers::{HeteroAttentionLayer, LayerVariant, NodeStates, PerTypeDense, Projection};
use crate::config::ModelConfig;
use crate::error::{FraudError, Result};
use crate::graph::{FeatureMatrix, FeatureSchema, GraphTensors, NodeType, Partition, TypedGraph};
use candle_core::{DType, Device, Tensor};
use candle_nn::{linear, Linear, Module, VarBuilder, VarMap};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

const MIN_STD: f32 = 1e-6;

/// Column-wise standardization fitted on the training graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureScaler {
    pub mean: Vec<f32>,
    pub std: Vec<f32>,
}

impl FeatureScaler {
    pub fn fit(matrix: &FeatureMatrix) -> Self {
        let rows: Vec<usize> = (0..matrix.rows()).collect();
        Self::fit_rows(matrix, &rows)
    }

    /// Fit on a subset of rows only.
    pub fn fit_rows(matrix: &FeatureMatrix, rows: &[usize]) -> Self {
        let width = matrix.width();
        if rows.is_empty() {
            return Self::identity(width);
        }
        let n = rows.len() as f64;
        let mut mean = Vec::with_capacity(width);
        let mut std = Vec::with_capacity(width);
        for col in 0..width {
            let values = rows.iter().map(|&r| matrix.row(r)[col] as f64);
            let m = values.clone().sum::<f64>() / n;
            let var = values.map(|v| (v - m).powi(2)).sum::<f64>() / n;
            let s = var.sqrt() as f32;
            mean.push(m as f32);
            std.push(if s < MIN_STD { 1.0 } else { s });
        }
        Self { mean, std }
    }

    pub fn identity(width: usize) -> Self {
        Self {
            mean: vec![0.0; width],
            std: vec![1.0; width],
        }
    }

    pub fn width(&self) -> usize {
        self.mean.len()
    }

    fn apply(&self, xs: &Tensor) -> Result<Tensor> {
        if self.width() == 0 {
            return Ok(xs.clone());
        }
        let mean = Tensor::from_slice(&self.mean, (1, self.width()), xs.device())?;
        let std = Tensor::from_slice(&self.std, (1, self.width()), xs.device())?;
        Ok(xs.broadcast_sub(&mean)?.broadcast_div(&std)?)
    }
}

/// Everything needed to rebuild an encoder: hyper-parameters, the chosen
/// variant, the feature layout and the fitted scalers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSchema {
    pub hidden: usize,
    pub num_heads: usize,
    pub num_layers: usize,
    pub negative_slope: f64,
    pub variant: LayerVariant,
    #[serde(default)]
    pub degraded_reason: Option<String>,
    pub features: FeatureSchema,
    pub scalers: BTreeMap<NodeType, FeatureScaler>,
}

impl ModelSchema {
    /// Schema for a training graph; runs the variant capability check.
    ///
    /// On a split graph the order scaler sees training orders only.
    pub fn for_graph(config: &ModelConfig, graph: &TypedGraph) -> Self {
        let features = graph.feature_schema();
        let (variant, degraded_reason) = LayerVariant::select(config, &features);
        let train_orders = graph
            .partitions()
            .map(|p| p.indices(Partition::Train))
            .filter(|rows| !rows.is_empty());
        let scalers = NodeType::ALL
            .iter()
            .map(|&t| {
                let scaler = match (graph.features(t), &train_orders) {
                    (Some(m), Some(rows)) if t == NodeType::Order => FeatureScaler::fit_rows(m, rows),
                    (Some(m), _) => FeatureScaler::fit(m),
                    (None, _) => FeatureScaler::identity(0),
                };
                (t, scaler)
            })
            .collect();

        Self {
            hidden: config.hidden,
            num_heads: config.num_heads,
            num_layers: config.num_layers,
            negative_slope: config.negative_slope,
            variant,
            degraded_reason,
            features,
            scalers,
        }
    }

    /// Fails when `other` disagrees on the feature layout or categories.
    pub fn ensure_features_match(&self, other: &FeatureSchema) -> Result<()> {
        if self.features.payment_categories != other.payment_categories {
            return Err(FraudError::StructuralMismatch(format!(
                "payment categories differ: model has {:?}, caller has {:?}",
                self.features.payment_categories, other.payment_categories
            )));
        }
        for node_type in NodeType::ALL {
            if self.features.columns(node_type) != other.columns(node_type) {
                return Err(FraudError::StructuralMismatch(format!(
                    "{} columns differ: model has {:?}, caller has {:?}",
                    node_type,
                    self.features.columns(node_type),
                    other.columns(node_type)
                )));
            }
        }
        Ok(())
    }
}

enum Body {
    Attention(Vec<HeteroAttentionLayer>),
    Dense(PerTypeDense),
}

/// Heterogeneous GNN encoder with its parameters held in a `VarMap`.
pub struct HeteroEncoder {
    schema: ModelSchema,
    projections: BTreeMap<NodeType, Projection>,
    body: Body,
    head: Linear,
    varmap: VarMap,
    device: Device,
}

impl HeteroEncoder {
    /// Fresh encoder sized from a training graph.
    pub fn new(config: &ModelConfig, graph: &TypedGraph, device: &Device) -> Result<Self> {
        let schema = ModelSchema::for_graph(config, graph);
        if let Some(reason) = &schema.degraded_reason {
            warn!(
                reason = %reason,
                "Relational attention unavailable, falling back to per-type dense layers"
            );
        }
        let encoder = Self::from_schema(schema, device)?;
        info!(
            variant = ?encoder.variant(),
            hidden = encoder.schema.hidden,
            parameters = encoder.parameter_count(),
            "Encoder initialized"
        );
        Ok(encoder)
    }

    /// Encoder with freshly initialized parameters for a given schema.
    pub fn from_schema(schema: ModelSchema, device: &Device) -> Result<Self> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let hidden = schema.hidden;

        let mut projections = BTreeMap::new();
        for node_type in NodeType::ALL {
            let width = schema.features.width(node_type);
            let proj = Projection::new(width, hidden, vb.pp("proj").pp(node_type.as_str()))?;
            projections.insert(node_type, proj);
        }

        let body = match schema.variant {
            LayerVariant::RelationalAttention => {
                if schema.num_heads == 0 || hidden % schema.num_heads != 0 {
                    return Err(FraudError::StructuralMismatch(format!(
                        "hidden width {} cannot be split into {} heads",
                        hidden, schema.num_heads
                    )));
                }
                let layers = (0..schema.num_layers)
                    .map(|l| {
                        HeteroAttentionLayer::new(
                            hidden,
                            schema.num_heads,
                            schema.negative_slope,
                            vb.pp(format!("layer{}", l)),
                        )
                    })
                    .collect::<candle_core::Result<Vec<_>>>()?;
                Body::Attention(layers)
            }
            LayerVariant::PerTypeDense => {
                Body::Dense(PerTypeDense::new(hidden, schema.negative_slope, vb.clone())?)
            }
        };

        let head = linear(hidden, 1, vb.pp("head"))?;

        Ok(Self {
            schema,
            projections,
            body,
            head,
            varmap,
            device: device.clone(),
        })
    }

    /// Logits for every order node, shape `(orders,)`.
    pub fn forward(&self, graph: &GraphTensors) -> Result<Tensor> {
        let mut states = NodeStates::new();
        for node_type in NodeType::ALL {
            let xs = graph.features(node_type).ok_or_else(|| {
                FraudError::StructuralMismatch(format!("graph has no {} features", node_type))
            })?;
            let width = xs.dim(1)?;
            let expected = self.schema.features.width(node_type);
            if width != expected {
                return Err(FraudError::StructuralMismatch(format!(
                    "{} features have width {}, model expects {}",
                    node_type, width, expected
                )));
            }
            let xs = match self.schema.scalers.get(&node_type) {
                Some(scaler) => scaler.apply(xs)?,
                None => xs.clone(),
            };
            if let Some(proj) = self.projections.get(&node_type) {
                states.insert(node_type, proj.forward(&xs)?);
            }
        }

        let states = match &self.body {
            Body::Attention(layers) => {
                let mut states = states;
                for layer in layers {
                    states = layer.forward(&states, graph)?;
                }
                states
            }
            Body::Dense(dense) => dense.forward(&states)?,
        };

        let orders = states.get(&NodeType::Order).ok_or_else(|| {
            FraudError::StructuralMismatch("no order states after message passing".to_string())
        })?;
        Ok(self.head.forward(orders)?.squeeze(1)?)
    }

    /// Fraud probabilities for every order node.
    pub fn predict_proba(&self, graph: &GraphTensors) -> Result<Vec<f32>> {
        let logits = self.forward(graph)?.to_vec1::<f32>()?;
        Ok(logits.into_iter().map(sigmoid).collect())
    }

    pub fn schema(&self) -> &ModelSchema {
        &self.schema
    }

    pub fn variant(&self) -> LayerVariant {
        self.schema.variant
    }

    /// Why the attention variant was not used, if it was not.
    pub fn degraded_reason(&self) -> Option<&str> {
        self.schema.degraded_reason.as_deref()
    }

    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn parameter_count(&self) -> usize {
        self.varmap.all_vars().iter().map(|v| v.elem_count()).sum()
    }
}

pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{EdgeIndex, IdMap, Relation};

    fn tiny_graph(order_edges: bool) -> TypedGraph {
        let mut id_maps = BTreeMap::new();
        let mut features = BTreeMap::new();
        let widths = [(NodeType::User, 3), (NodeType::Order, 2), (NodeType::Payment, 2)];
        for (t, w) in widths {
            let mut ids = IdMap::new();
            ids.insert("a");
            ids.insert("b");
            id_maps.insert(t, ids);
            let columns = (0..w).map(|i| format!("c{}", i)).collect();
            let data = (0..2 * w).map(|i| i as f32).collect();
            features.insert(t, FeatureMatrix::new(columns, 2, data).unwrap());
        }
        let mut edges = BTreeMap::new();
        if order_edges {
            let places = EdgeIndex::from_pairs(&[(0, 0)]);
            edges.insert(Relation::PlacedBy, places.reversed());
            edges.insert(Relation::Places, places);
        }
        TypedGraph::from_parts(id_maps, features, edges, Some(vec![0, 1]), Vec::new()).unwrap()
    }

    fn small_config() -> ModelConfig {
        ModelConfig {
            hidden: 8,
            num_heads: 2,
            ..ModelConfig::default()
        }
    }

    #[test]
    fn test_scaler_constant_column() {
        let m = FeatureMatrix::new(vec!["a".into(), "b".into()], 2, vec![5.0, 1.0, 5.0, 3.0])
            .unwrap();
        let s = FeatureScaler::fit(&m);
        assert_eq!(s.mean, vec![5.0, 2.0]);
        assert_eq!(s.std, vec![1.0, 1.0]);
    }

    #[test]
    fn test_order_scaler_fit_on_training_rows() {
        use crate::graph::Partitions;

        let graph = tiny_graph(true)
            .with_partitions(Partitions::from_assignment(&[Partition::Train, Partition::Test]))
            .unwrap();
        let schema = ModelSchema::for_graph(&small_config(), &graph);

        // Order rows are [0, 1] and [2, 3]; only the first is training data.
        let order = &schema.scalers[&NodeType::Order];
        assert_eq!(order.mean, vec![0.0, 1.0]);
        assert_eq!(order.std, vec![1.0, 1.0]);
        // Other types still use every row.
        assert_eq!(schema.scalers[&NodeType::User].mean, vec![1.5, 2.5, 3.5]);
    }

    #[test]
    fn test_forward_finite_for_isolated_order() {
        let graph = tiny_graph(true);
        let encoder = HeteroEncoder::new(&small_config(), &graph, &Device::Cpu).unwrap();
        let tensors = GraphTensors::from_graph(&graph, &Device::Cpu).unwrap();

        // Order 1 has no incoming edges.
        let probs = encoder.predict_proba(&tensors).unwrap();
        assert_eq!(probs.len(), 2);
        assert!(probs.iter().all(|p| p.is_finite() && (0.0..=1.0).contains(p)));
    }

    #[test]
    fn test_degraded_variant_recorded() {
        let graph = tiny_graph(true);
        let config = ModelConfig {
            relational_attention: false,
            ..small_config()
        };
        let encoder = HeteroEncoder::new(&config, &graph, &Device::Cpu).unwrap();
        assert_eq!(encoder.variant(), LayerVariant::PerTypeDense);
        assert!(encoder.degraded_reason().is_some());

        let tensors = GraphTensors::from_graph(&graph, &Device::Cpu).unwrap();
        assert_eq!(encoder.forward(&tensors).unwrap().dims(), &[2]);
    }

    #[test]
    fn test_width_mismatch_rejected() {
        let graph = tiny_graph(false);
        let encoder = HeteroEncoder::new(&small_config(), &graph, &Device::Cpu).unwrap();

        let mut schema = encoder.schema().clone();
        schema
            .features
            .columns
            .insert(NodeType::Order, vec!["only".to_string()]);
        let narrow = HeteroEncoder::from_schema(schema, &Device::Cpu).unwrap();
        let tensors = GraphTensors::from_graph(&graph, &Device::Cpu).unwrap();
        assert!(matches!(
            narrow.forward(&tensors),
            Err(FraudError::StructuralMismatch(_))
        ));
    }
}
