//! Index-based tensor view of a `TypedGraph`, the only form the encoder sees.

use super::schema::{NodeType, Relation};
use super::typed::TypedGraph;
use crate::error::Result;
use candle_core::{Device, Tensor};
use std::collections::BTreeMap;

/// Edge endpoints of one relation on the device, plus a host copy of the
/// destinations for the per-neighborhood softmax shift.
#[derive(Debug, Clone)]
pub struct EdgeTensors {
    pub src: Tensor,
    pub dst: Tensor,
    pub dst_host: Vec<u32>,
}

impl EdgeTensors {
    pub fn len(&self) -> usize {
        self.dst_host.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dst_host.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct GraphTensors {
    features: BTreeMap<NodeType, Tensor>,
    node_counts: BTreeMap<NodeType, usize>,
    edges: BTreeMap<Relation, EdgeTensors>,
}

impl GraphTensors {
    /// Features as `(nodes, width)` f32 tensors; edges as u32 index tensors.
    /// Relations without edges are left out.
    pub fn from_graph(graph: &TypedGraph, device: &Device) -> Result<Self> {
        let mut features = BTreeMap::new();
        let mut node_counts = BTreeMap::new();
        for node_type in NodeType::ALL {
            let Some(matrix) = graph.features(node_type) else {
                continue;
            };
            let t = Tensor::from_slice(matrix.data(), (matrix.rows(), matrix.width()), device)?;
            features.insert(node_type, t);
            node_counts.insert(node_type, matrix.rows());
        }

        let mut edges = BTreeMap::new();
        for relation in Relation::ALL {
            let Some(index) = graph.edges(relation) else {
                continue;
            };
            if index.is_empty() {
                continue;
            }
            edges.insert(
                relation,
                EdgeTensors {
                    src: Tensor::from_slice(index.src(), index.len(), device)?,
                    dst: Tensor::from_slice(index.dst(), index.len(), device)?,
                    dst_host: index.dst().to_vec(),
                },
            );
        }

        Ok(Self {
            features,
            node_counts,
            edges,
        })
    }

    pub fn features(&self, node_type: NodeType) -> Option<&Tensor> {
        self.features.get(&node_type)
    }

    pub fn node_count(&self, node_type: NodeType) -> usize {
        self.node_counts.get(&node_type).copied().unwrap_or(0)
    }

    pub fn edges(&self, relation: Relation) -> Option<&EdgeTensors> {
        self.edges.get(&relation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::typed::{EdgeIndex, FeatureMatrix, IdMap};

    #[test]
    fn test_from_graph_shapes() {
        let mut features = BTreeMap::new();
        let mut id_maps = BTreeMap::new();
        for (t, n) in [(NodeType::User, 2), (NodeType::Order, 3), (NodeType::Payment, 1)] {
            features.insert(t, FeatureMatrix::zeros(vec!["a".into(), "b".into()], n));
            let mut ids = IdMap::new();
            for i in 0..n {
                ids.insert(&i.to_string());
            }
            id_maps.insert(t, ids);
        }
        let mut edges = BTreeMap::new();
        edges.insert(Relation::Places, EdgeIndex::from_pairs(&[(0, 0), (1, 2)]));
        edges.insert(Relation::Uses, EdgeIndex::default());
        let graph = TypedGraph::from_parts(id_maps, features, edges, None, Vec::new()).unwrap();

        let tensors = GraphTensors::from_graph(&graph, &Device::Cpu).unwrap();
        assert_eq!(tensors.features(NodeType::Order).unwrap().dims(), &[3, 2]);
        assert_eq!(tensors.node_count(NodeType::User), 2);
        let places = tensors.edges(Relation::Places).unwrap();
        assert_eq!(places.len(), 2);
        assert_eq!(places.dst_host, vec![0, 2]);
        assert!(tensors.edges(Relation::Uses).is_none());
    }
}
