//! Message-passing layers of the heterogeneous encoder.

use crate::config::ModelConfig;
use crate::graph::{EdgeTensors, FeatureSchema, GraphTensors, NodeType, Relation};
use candle_core::{DType, Result, Tensor};
use candle_nn::{linear, Init, Linear, Module, VarBuilder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-type node states, keyed by node type.
pub type NodeStates = BTreeMap<NodeType, Tensor>;

/// Which message-passing body the encoder runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerVariant {
    /// Multi-head attention per relation with synchronous rounds.
    RelationalAttention,
    /// Stacked per-type dense layers; graph structure is ignored.
    PerTypeDense,
}

impl LayerVariant {
    /// Capability check run before any parameters are created.
    ///
    /// Returns the variant and, when falling back, the reason.
    pub fn select(config: &ModelConfig, schema: &FeatureSchema) -> (LayerVariant, Option<String>) {
        let reason = if !config.relational_attention {
            Some("relational attention disabled in configuration".to_string())
        } else if config.num_heads == 0 {
            Some("num_heads is zero".to_string())
        } else if config.hidden % config.num_heads != 0 {
            Some(format!(
                "hidden width {} is not divisible by {} heads",
                config.hidden, config.num_heads
            ))
        } else {
            Relation::ALL
                .iter()
                .flat_map(|r| [r.source(), r.target()])
                .find(|t| !schema.columns.contains_key(t))
                .map(|t| format!("no input width recorded for node type '{}'", t))
        };

        match reason {
            None => (LayerVariant::RelationalAttention, None),
            Some(reason) => (LayerVariant::PerTypeDense, Some(reason)),
        }
    }
}

pub fn leaky_relu(xs: &Tensor, negative_slope: f64) -> Result<Tensor> {
    let zeros = xs.zeros_like()?;
    xs.maximum(&zeros)?
        .add(&xs.minimum(&zeros)?.affine(negative_slope, 0.)?)
}

/// Type-specific input projection to the hidden width.
///
/// A type with no feature columns gets a learned bias row instead.
#[derive(Debug, Clone)]
pub enum Projection {
    Dense(Linear),
    BiasOnly(Tensor),
}

impl Projection {
    pub fn new(in_dim: usize, hidden: usize, vb: VarBuilder) -> Result<Self> {
        if in_dim == 0 {
            let bias = vb.get_with_hints(hidden, "bias", Init::Const(0.))?;
            Ok(Projection::BiasOnly(bias))
        } else {
            Ok(Projection::Dense(linear(in_dim, hidden, vb)?))
        }
    }

    pub fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        match self {
            Projection::Dense(layer) => layer.forward(xs),
            Projection::BiasOnly(bias) => {
                let rows = xs.dim(0)?;
                bias.unsqueeze(0)?.broadcast_as((rows, bias.dim(0)?))?.contiguous()
            }
        }
    }
}

/// Scaled dot-product attention over one relation's edges.
#[derive(Debug, Clone)]
pub struct RelationAttention {
    key: Linear,
    query: Linear,
    value: Linear,
    num_heads: usize,
    head_dim: usize,
}

impl RelationAttention {
    pub fn new(hidden: usize, num_heads: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            key: linear(hidden, hidden, vb.pp("key"))?,
            query: linear(hidden, hidden, vb.pp("query"))?,
            value: linear(hidden, hidden, vb.pp("value"))?,
            num_heads,
            head_dim: hidden / num_heads,
        })
    }

    /// Aggregated messages for every target node, `(n_dst, hidden)`.
    ///
    /// Targets without incoming edges receive zeros.
    pub fn forward(&self, src: &Tensor, dst: &Tensor, edges: &EdgeTensors) -> Result<Tensor> {
        let n_edges = edges.len();
        let n_dst = dst.dim(0)?;
        let hidden = self.num_heads * self.head_dim;
        let shape = (n_edges, self.num_heads, self.head_dim);

        let src_states = src.index_select(&edges.src, 0)?;
        let dst_states = dst.index_select(&edges.dst, 0)?;
        let k = self.key.forward(&src_states)?.reshape(shape)?;
        let q = self.query.forward(&dst_states)?.reshape(shape)?;
        let v = self.value.forward(&src_states)?.reshape(shape)?;

        let scale = 1.0 / (self.head_dim as f64).sqrt();
        let scores = k.mul(&q)?.sum(2)?.affine(scale, 0.)?;

        let shift = neighborhood_max(&scores, &edges.dst_host, n_dst, self.num_heads)?;
        let weights = scores.sub(&shift)?.exp()?;
        let denom = Tensor::zeros((n_dst, self.num_heads), DType::F32, src.device())?
            .index_add(&edges.dst, &weights, 0)?
            .index_select(&edges.dst, 0)?;
        let alpha = weights.div(&denom)?;

        let messages = v
            .broadcast_mul(&alpha.unsqueeze(2)?)?
            .reshape((n_edges, hidden))?;
        Tensor::zeros((n_dst, hidden), DType::F32, src.device())?.index_add(&edges.dst, &messages, 0)
    }
}

/// Per-edge copy of the maximum score within the edge's target neighborhood.
fn neighborhood_max(
    scores: &Tensor,
    dst: &[u32],
    n_dst: usize,
    num_heads: usize,
) -> Result<Tensor> {
    let rows = scores.to_vec2::<f32>()?;
    let mut max = vec![f32::NEG_INFINITY; n_dst * num_heads];
    for (row, &d) in rows.iter().zip(dst) {
        for (h, &s) in row.iter().enumerate() {
            let slot = &mut max[d as usize * num_heads + h];
            *slot = slot.max(s);
        }
    }
    let per_edge: Vec<f32> = dst
        .iter()
        .flat_map(|&d| {
            let start = d as usize * num_heads;
            max[start..start + num_heads].to_vec()
        })
        .collect();
    Tensor::from_vec(per_edge, (dst.len(), num_heads), scores.device())
}

/// One synchronous round of heterogeneous message passing.
#[derive(Debug, Clone)]
pub struct HeteroAttentionLayer {
    relations: BTreeMap<Relation, RelationAttention>,
    skip: BTreeMap<NodeType, Linear>,
    negative_slope: f64,
}

impl HeteroAttentionLayer {
    pub fn new(hidden: usize, num_heads: usize, negative_slope: f64, vb: VarBuilder) -> Result<Self> {
        let mut relations = BTreeMap::new();
        for relation in Relation::ALL {
            let attn = RelationAttention::new(hidden, num_heads, vb.pp(relation.as_str()))?;
            relations.insert(relation, attn);
        }
        let mut skip = BTreeMap::new();
        for node_type in NodeType::ALL {
            let vb = vb.pp("skip").pp(node_type.as_str());
            skip.insert(node_type, linear(hidden, hidden, vb)?);
        }
        Ok(Self {
            relations,
            skip,
            negative_slope,
        })
    }

    /// Every type reads the previous round's states of its neighbors.
    pub fn forward(&self, states: &NodeStates, graph: &GraphTensors) -> Result<NodeStates> {
        let mut next = NodeStates::new();
        for (&node_type, own) in states {
            let Some(skip) = self.skip.get(&node_type) else {
                continue;
            };
            let mut acc = skip.forward(own)?;
            for relation in Relation::incoming(node_type) {
                let (Some(edges), Some(attn), Some(src)) = (
                    graph.edges(relation),
                    self.relations.get(&relation),
                    states.get(&relation.source()),
                ) else {
                    continue;
                };
                acc = acc.add(&attn.forward(src, own, edges)?)?;
            }
            next.insert(node_type, leaky_relu(&acc, self.negative_slope)?);
        }
        Ok(next)
    }
}

/// Structure-free body: two dense layers per node type.
#[derive(Debug, Clone)]
pub struct PerTypeDense {
    layers: Vec<BTreeMap<NodeType, Linear>>,
    negative_slope: f64,
}

impl PerTypeDense {
    pub const DEPTH: usize = 2;

    pub fn new(hidden: usize, negative_slope: f64, vb: VarBuilder) -> Result<Self> {
        let mut layers = Vec::with_capacity(Self::DEPTH);
        for depth in 0..Self::DEPTH {
            let mut per_type = BTreeMap::new();
            for node_type in NodeType::ALL {
                let vb = vb.pp(format!("dense{}", depth)).pp(node_type.as_str());
                per_type.insert(node_type, linear(hidden, hidden, vb)?);
            }
            layers.push(per_type);
        }
        Ok(Self {
            layers,
            negative_slope,
        })
    }

    pub fn forward(&self, states: &NodeStates) -> Result<NodeStates> {
        let mut current = states.clone();
        for per_type in &self.layers {
            let mut next = NodeStates::new();
            for (node_type, xs) in &current {
                if let Some(layer) = per_type.get(node_type) {
                    next.insert(*node_type, leaky_relu(&layer.forward(xs)?, self.negative_slope)?);
                }
            }
            current = next;
        }
        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use candle_nn::VarMap;

    fn schema() -> FeatureSchema {
        let mut columns = BTreeMap::new();
        for t in NodeType::ALL {
            columns.insert(t, vec!["x".to_string()]);
        }
        FeatureSchema {
            columns,
            payment_categories: Vec::new(),
        }
    }

    #[test]
    fn test_variant_select() {
        let config = ModelConfig::default();
        let (variant, reason) = LayerVariant::select(&config, &schema());
        assert_eq!(variant, LayerVariant::RelationalAttention);
        assert!(reason.is_none());

        let odd = ModelConfig {
            hidden: 10,
            num_heads: 4,
            ..ModelConfig::default()
        };
        let (variant, reason) = LayerVariant::select(&odd, &schema());
        assert_eq!(variant, LayerVariant::PerTypeDense);
        assert!(reason.unwrap().contains("divisible"));

        let mut partial = schema();
        partial.columns.remove(&NodeType::Payment);
        let (variant, _) = LayerVariant::select(&config, &partial);
        assert_eq!(variant, LayerVariant::PerTypeDense);
    }

    #[test]
    fn test_leaky_relu() {
        let xs = Tensor::new(&[-2.0f32, 0.0, 3.0], &Device::Cpu).unwrap();
        let ys = leaky_relu(&xs, 0.1).unwrap().to_vec1::<f32>().unwrap();
        assert!((ys[0] + 0.2).abs() < 1e-6);
        assert_eq!(ys[1], 0.0);
        assert_eq!(ys[2], 3.0);
    }

    #[test]
    fn test_attention_leaves_unreached_targets_zero() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let attn = RelationAttention::new(4, 2, vb).unwrap();

        // Two sources feeding target 0, nothing feeding target 1.
        let src = Tensor::new(&[[1.0f32, 0.0, 0.0, 1.0], [0.5, 0.5, 0.5, 0.5]], &device).unwrap();
        let dst = Tensor::ones((2, 4), DType::F32, &device).unwrap();
        let edges = EdgeTensors {
            src: Tensor::new(&[0u32, 1], &device).unwrap(),
            dst: Tensor::new(&[0u32, 0], &device).unwrap(),
            dst_host: vec![0, 0],
        };

        let out = attn.forward(&src, &dst, &edges).unwrap();
        assert_eq!(out.dims(), &[2, 4]);
        let rows = out.to_vec2::<f32>().unwrap();
        assert!(rows[0].iter().all(|v| v.is_finite()));
        assert!(rows[1].iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_bias_only_projection() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let proj = Projection::new(0, 8, vb).unwrap();

        let xs = Tensor::zeros((3, 0), DType::F32, &device).unwrap();
        assert_eq!(proj.forward(&xs).unwrap().dims(), &[3, 8]);
    }
}
