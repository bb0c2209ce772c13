//! The typed (heterogeneous) graph and its parts.
//!
//! A `TypedGraph` is write-once: builders assemble the parts and hand them
//! over through `from_parts`, after which only read accessors exist.
//! Attaching partitions consumes the graph and returns a new one.

use super::schema::{NodeType, Relation};
use crate::error::{FraudError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Bijection from external identifiers to dense indices, in first-seen order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IdMap {
    index: HashMap<String, usize>,
    ids: Vec<String>,
}

impl IdMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an id, returning its index and whether it was new.
    pub fn insert(&mut self, id: &str) -> (usize, bool) {
        if let Some(&idx) = self.index.get(id) {
            return (idx, false);
        }
        let idx = self.ids.len();
        self.index.insert(id.to_string(), idx);
        self.ids.push(id.to_string());
        (idx, true)
    }

    pub fn get(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn id(&self, idx: usize) -> Option<&str> {
        self.ids.get(idx).map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Row-major numeric features for one node type.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    columns: Vec<String>,
    rows: usize,
    data: Vec<f32>,
}

impl FeatureMatrix {
    pub fn new(columns: Vec<String>, rows: usize, data: Vec<f32>) -> Result<Self> {
        if data.len() != rows * columns.len() {
            return Err(FraudError::StructuralMismatch(format!(
                "feature data has {} values, expected {} rows x {} columns",
                data.len(),
                rows,
                columns.len()
            )));
        }
        Ok(Self {
            columns,
            rows,
            data,
        })
    }

    pub fn zeros(columns: Vec<String>, rows: usize) -> Self {
        let data = vec![0.0; rows * columns.len()];
        Self {
            columns,
            rows,
            data,
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn row(&self, idx: usize) -> &[f32] {
        let w = self.width();
        &self.data[idx * w..(idx + 1) * w]
    }

    pub(crate) fn set(&mut self, row: usize, col: usize, value: f32) {
        let w = self.width();
        self.data[row * w + col] = value;
    }
}

/// Directed edges of one relation as parallel source/destination indices.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EdgeIndex {
    src: Vec<u32>,
    dst: Vec<u32>,
}

impl EdgeIndex {
    pub fn from_pairs(pairs: &[(usize, usize)]) -> Self {
        let (src, dst): (Vec<u32>, Vec<u32>) = pairs.iter().map(|&(s, d)| (s as u32, d as u32)).unzip();
        Self { src, dst }
    }

    /// The same edges with source and destination swapped.
    pub fn reversed(&self) -> Self {
        Self {
            src: self.dst.clone(),
            dst: self.src.clone(),
        }
    }

    pub fn src(&self) -> &[u32] {
        &self.src
    }

    pub fn dst(&self) -> &[u32] {
        &self.dst
    }

    pub fn len(&self) -> usize {
        self.src.len()
    }

    pub fn is_empty(&self) -> bool {
        self.src.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Partition {
    Train,
    Val,
    Test,
}

impl Partition {
    pub const ALL: [Partition; 3] = [Partition::Train, Partition::Val, Partition::Test];

    pub fn as_str(&self) -> &'static str {
        match self {
            Partition::Train => "train",
            Partition::Val => "val",
            Partition::Test => "test",
        }
    }
}

/// Train/val/test masks over the order index space.
///
/// Built from one partition label per order, so the masks are disjoint and
/// exhaustive by construction.
#[derive(Debug, Clone, PartialEq)]
pub struct Partitions {
    train: Vec<bool>,
    val: Vec<bool>,
    test: Vec<bool>,
}

impl Partitions {
    pub fn from_assignment(assignment: &[Partition]) -> Self {
        let mask = |p: Partition| assignment.iter().map(|&a| a == p).collect::<Vec<_>>();
        Self {
            train: mask(Partition::Train),
            val: mask(Partition::Val),
            test: mask(Partition::Test),
        }
    }

    pub fn mask(&self, partition: Partition) -> &[bool] {
        match partition {
            Partition::Train => &self.train,
            Partition::Val => &self.val,
            Partition::Test => &self.test,
        }
    }

    pub fn indices(&self, partition: Partition) -> Vec<usize> {
        self.mask(partition)
            .iter()
            .enumerate()
            .filter_map(|(i, &m)| m.then_some(i))
            .collect()
    }

    pub fn count(&self, partition: Partition) -> usize {
        self.mask(partition).iter().filter(|&&m| m).count()
    }

    pub fn len(&self) -> usize {
        self.train.len()
    }

    pub fn is_empty(&self) -> bool {
        self.train.is_empty()
    }
}

/// Column layout of every node type plus the payment category list.
///
/// This is the single descriptor shared by the encoder, the checkpoint and
/// the single-order adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub columns: BTreeMap<NodeType, Vec<String>>,
    pub payment_categories: Vec<String>,
}

impl FeatureSchema {
    pub fn width(&self, node_type: NodeType) -> usize {
        self.columns.get(&node_type).map(|c| c.len()).unwrap_or(0)
    }

    pub fn columns(&self, node_type: NodeType) -> &[String] {
        self.columns
            .get(&node_type)
            .map(|c| c.as_slice())
            .unwrap_or(&[])
    }

    pub fn category_index(&self, category: &str) -> Option<usize> {
        self.payment_categories.iter().position(|c| c == category)
    }

    /// Column name used for a one-hot payment category.
    pub fn payment_column(category: &str) -> String {
        format!("payment_type={}", category)
    }
}

#[derive(Debug, Clone)]
pub struct TypedGraph {
    id_maps: BTreeMap<NodeType, IdMap>,
    features: BTreeMap<NodeType, FeatureMatrix>,
    edges: BTreeMap<Relation, EdgeIndex>,
    labels: Option<Vec<u8>>,
    partitions: Option<Partitions>,
    payment_categories: Vec<String>,
}

impl TypedGraph {
    pub(crate) fn from_parts(
        id_maps: BTreeMap<NodeType, IdMap>,
        features: BTreeMap<NodeType, FeatureMatrix>,
        edges: BTreeMap<Relation, EdgeIndex>,
        labels: Option<Vec<u8>>,
        payment_categories: Vec<String>,
    ) -> Result<Self> {
        let graph = Self::assemble(id_maps, features, edges, labels, payment_categories);
        graph.validate()?;
        Ok(graph)
    }

    /// Unvalidated constructor for callers that build the parts consistent
    /// by construction.
    pub(crate) fn assemble(
        id_maps: BTreeMap<NodeType, IdMap>,
        features: BTreeMap<NodeType, FeatureMatrix>,
        edges: BTreeMap<Relation, EdgeIndex>,
        labels: Option<Vec<u8>>,
        payment_categories: Vec<String>,
    ) -> Self {
        Self {
            id_maps,
            features,
            edges,
            labels,
            partitions: None,
            payment_categories,
        }
    }

    /// Attach train/val/test masks.
    pub fn with_partitions(mut self, partitions: Partitions) -> Result<Self> {
        let orders = self.node_count(NodeType::Order);
        if partitions.len() != orders {
            return Err(FraudError::InvalidSplit(format!(
                "partition masks cover {} orders, graph has {}",
                partitions.len(),
                orders
            )));
        }
        self.partitions = Some(partitions);
        Ok(self)
    }

    pub fn node_count(&self, node_type: NodeType) -> usize {
        self.features.get(&node_type).map(|f| f.rows()).unwrap_or(0)
    }

    pub fn feature_width(&self, node_type: NodeType) -> usize {
        self.features.get(&node_type).map(|f| f.width()).unwrap_or(0)
    }

    pub fn features(&self, node_type: NodeType) -> Option<&FeatureMatrix> {
        self.features.get(&node_type)
    }

    pub fn edges(&self, relation: Relation) -> Option<&EdgeIndex> {
        self.edges.get(&relation)
    }

    pub fn id_map(&self, node_type: NodeType) -> Option<&IdMap> {
        self.id_maps.get(&node_type)
    }

    /// Fraud labels of order nodes; absent on inference graphs.
    pub fn labels(&self) -> Option<&[u8]> {
        self.labels.as_deref()
    }

    pub fn partitions(&self) -> Option<&Partitions> {
        self.partitions.as_ref()
    }

    pub fn payment_categories(&self) -> &[String] {
        &self.payment_categories
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(|e| e.len()).sum()
    }

    pub fn positive_count(&self) -> usize {
        self.labels
            .as_ref()
            .map(|l| l.iter().filter(|&&y| y == 1).count())
            .unwrap_or(0)
    }

    /// Fraction of orders labelled fraud.
    pub fn fraud_ratio(&self) -> f64 {
        let n = self.node_count(NodeType::Order);
        if n == 0 {
            return 0.0;
        }
        self.positive_count() as f64 / n as f64
    }

    pub fn feature_schema(&self) -> FeatureSchema {
        let columns = NodeType::ALL
            .iter()
            .map(|&t| {
                let cols = self
                    .features
                    .get(&t)
                    .map(|f| f.columns().to_vec())
                    .unwrap_or_default();
                (t, cols)
            })
            .collect();
        FeatureSchema {
            columns,
            payment_categories: self.payment_categories.clone(),
        }
    }

    /// Check every structural invariant of the graph.
    pub fn validate(&self) -> Result<()> {
        for node_type in NodeType::ALL {
            let rows = self.node_count(node_type);
            if let Some(map) = self.id_maps.get(&node_type) {
                if map.len() != rows {
                    return Err(FraudError::StructuralMismatch(format!(
                        "{} has {} feature rows but {} ids",
                        node_type,
                        rows,
                        map.len()
                    )));
                }
            }
        }

        for (relation, edges) in &self.edges {
            let src_n = self.node_count(relation.source());
            let dst_n = self.node_count(relation.target());
            let in_range = edges
                .src()
                .iter()
                .zip(edges.dst())
                .all(|(&s, &d)| (s as usize) < src_n && (d as usize) < dst_n);
            if !in_range {
                return Err(FraudError::StructuralMismatch(format!(
                    "relation {} has an endpoint outside [0, {}) x [0, {})",
                    relation, src_n, dst_n
                )));
            }
        }

        if let Some(labels) = &self.labels {
            let orders = self.node_count(NodeType::Order);
            if labels.len() != orders {
                return Err(FraudError::StructuralMismatch(format!(
                    "{} labels for {} orders",
                    labels.len(),
                    orders
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_map_first_seen_order() {
        let mut map = IdMap::new();
        assert_eq!(map.insert("b"), (0, true));
        assert_eq!(map.insert("a"), (1, true));
        assert_eq!(map.insert("b"), (0, false));
        assert_eq!(map.len(), 2);
        assert_eq!(map.get("a"), Some(1));
        assert_eq!(map.id(0), Some("b"));
        assert_eq!(map.get("zzz"), None);
    }

    #[test]
    fn test_feature_matrix_shape_checked() {
        let cols = vec!["a".to_string(), "b".to_string()];
        assert!(FeatureMatrix::new(cols.clone(), 2, vec![1.0; 3]).is_err());

        let m = FeatureMatrix::new(cols, 2, vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(m.row(1), &[3.0, 4.0]);
        assert_eq!(m.width(), 2);
    }

    #[test]
    fn test_partitions_disjoint_and_exhaustive() {
        let assignment = [
            Partition::Train,
            Partition::Test,
            Partition::Val,
            Partition::Train,
        ];
        let p = Partitions::from_assignment(&assignment);

        assert_eq!(p.indices(Partition::Train), vec![0, 3]);
        assert_eq!(p.count(Partition::Val), 1);
        for i in 0..assignment.len() {
            let hits = Partition::ALL.iter().filter(|&&part| p.mask(part)[i]).count();
            assert_eq!(hits, 1);
        }
    }

    #[test]
    fn test_validate_rejects_out_of_range_edge() {
        let mut features = BTreeMap::new();
        for t in NodeType::ALL {
            features.insert(t, FeatureMatrix::zeros(vec!["x".to_string()], 1));
        }
        let mut edges = BTreeMap::new();
        edges.insert(Relation::Places, EdgeIndex::from_pairs(&[(0, 3)]));

        let result = TypedGraph::from_parts(BTreeMap::new(), features, edges, None, Vec::new());
        assert!(matches!(result, Err(FraudError::StructuralMismatch(_))));
    }
}
