//! Stratified train/val/test split over order nodes.

use super::typed::{Partition, Partitions, TypedGraph};
use crate::error::{FraudError, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitConfig {
    pub test_fraction: f64,
    pub val_fraction: f64,
    pub seed: u64,
    /// Fail instead of warning when a partition has no positives.
    pub require_positives: bool,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            test_fraction: 0.2,
            val_fraction: 0.1,
            seed: 42,
            require_positives: false,
        }
    }
}

impl SplitConfig {
    fn validate(&self) -> Result<()> {
        let in_range = |f: f64| (0.0..1.0).contains(&f);
        if !in_range(self.test_fraction) || !in_range(self.val_fraction) {
            return Err(FraudError::InvalidSplit(format!(
                "fractions must lie in [0, 1), got test={} val={}",
                self.test_fraction, self.val_fraction
            )));
        }
        if self.test_fraction + self.val_fraction >= 1.0 {
            return Err(FraudError::InvalidSplit(format!(
                "test + val must be below 1, got {}",
                self.test_fraction + self.val_fraction
            )));
        }
        Ok(())
    }
}

/// Per-partition counts and the partitions that ended up without positives.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SplitReport {
    pub train: (usize, usize),
    pub val: (usize, usize),
    pub test: (usize, usize),
    pub missing_positives: Vec<Partition>,
}

impl SplitReport {
    /// `(orders, positives)` for a partition.
    pub fn counts(&self, partition: Partition) -> (usize, usize) {
        match partition {
            Partition::Train => self.train,
            Partition::Val => self.val,
            Partition::Test => self.test,
        }
    }

    pub fn is_degraded(&self) -> bool {
        !self.missing_positives.is_empty()
    }
}

/// Attach stratified partitions to a labelled graph.
///
/// Test is carved first; validation is carved from the remainder with the
/// fraction rescaled by `1 - test_fraction`. Both carves are per class with
/// `round(fraction * class_count)` members.
pub fn split(graph: TypedGraph, config: &SplitConfig) -> Result<(TypedGraph, SplitReport)> {
    config.validate()?;
    let labels = graph
        .labels()
        .ok_or_else(|| FraudError::InvalidSplit("graph has no order labels".to_string()))?;

    let assignment = assign(labels, config);
    let report = report(labels, &assignment);

    for &partition in &report.missing_positives {
        if config.require_positives {
            return Err(FraudError::Imbalance {
                partition: partition.as_str().to_string(),
            });
        }
        warn!(
            partition = partition.as_str(),
            orders = report.counts(partition).0,
            "Partition has no fraud examples"
        );
    }

    info!(
        train = report.train.0,
        val = report.val.0,
        test = report.test.0,
        seed = config.seed,
        "Split orders"
    );

    let graph = graph.with_partitions(Partitions::from_assignment(&assignment))?;
    Ok((graph, report))
}

fn assign(labels: &[u8], config: &SplitConfig) -> Vec<Partition> {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut assignment = vec![Partition::Train; labels.len()];
    let val_of_rest = config.val_fraction / (1.0 - config.test_fraction);

    for class in [0u8, 1u8] {
        let mut members: Vec<usize> = labels
            .iter()
            .enumerate()
            .filter_map(|(i, &y)| (y == class).then_some(i))
            .collect();
        members.shuffle(&mut rng);

        let n_test = carve(config.test_fraction, members.len());
        let n_val = carve(val_of_rest, members.len() - n_test);
        for &i in &members[..n_test] {
            assignment[i] = Partition::Test;
        }
        for &i in &members[n_test..n_test + n_val] {
            assignment[i] = Partition::Val;
        }
    }
    assignment
}

fn carve(fraction: f64, n: usize) -> usize {
    ((fraction * n as f64).round() as usize).min(n)
}

fn report(labels: &[u8], assignment: &[Partition]) -> SplitReport {
    let counts = |p: Partition| {
        assignment
            .iter()
            .zip(labels)
            .filter(|&(&a, _)| a == p)
            .fold((0, 0), |(n, pos), (_, &y)| (n + 1, pos + usize::from(y == 1)))
    };
    let mut report = SplitReport {
        train: counts(Partition::Train),
        val: counts(Partition::Val),
        test: counts(Partition::Test),
        missing_positives: Vec::new(),
    };
    report.missing_positives = Partition::ALL
        .into_iter()
        .filter(|&p| report.counts(p).1 == 0)
        .collect();
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::schema::NodeType;
    use crate::graph::typed::{FeatureMatrix, IdMap};
    use std::collections::BTreeMap;

    fn labelled_graph(n: usize, positives: usize) -> TypedGraph {
        let mut ids = IdMap::new();
        for i in 0..n {
            ids.insert(&format!("o{}", i));
        }
        let labels = (0..n).map(|i| u8::from(i < positives)).collect();
        let mut id_maps = BTreeMap::new();
        id_maps.insert(NodeType::Order, ids);
        let mut features = BTreeMap::new();
        features.insert(NodeType::Order, FeatureMatrix::zeros(Vec::new(), n));
        TypedGraph::from_parts(id_maps, features, BTreeMap::new(), Some(labels), Vec::new())
            .unwrap()
    }

    #[test]
    fn test_stratified_counts() {
        let graph = labelled_graph(200, 10);
        let (graph, report) = split(graph, &SplitConfig::default()).unwrap();

        assert_eq!(report.test, (40, 2));
        assert_eq!(report.val, (20, 1));
        assert_eq!(report.train, (140, 7));
        assert!(!report.is_degraded());

        let partitions = graph.partitions().unwrap();
        assert_eq!(partitions.count(Partition::Train), 140);
        for i in 0..200 {
            let hits = Partition::ALL
                .iter()
                .filter(|&&p| partitions.mask(p)[i])
                .count();
            assert_eq!(hits, 1);
        }
    }

    #[test]
    fn test_split_is_deterministic_per_seed() {
        let config = SplitConfig::default();
        let (a, _) = split(labelled_graph(50, 5), &config).unwrap();
        let (b, _) = split(labelled_graph(50, 5), &config).unwrap();
        assert_eq!(a.partitions(), b.partitions());

        let other = SplitConfig {
            seed: 7,
            ..SplitConfig::default()
        };
        let (c, _) = split(labelled_graph(50, 5), &other).unwrap();
        assert_ne!(a.partitions(), c.partitions());
    }

    #[test]
    fn test_missing_positives_reported() {
        let (_, report) = split(labelled_graph(30, 1), &SplitConfig::default()).unwrap();

        assert!(report.missing_positives.contains(&Partition::Val));
        assert!(report.missing_positives.contains(&Partition::Test));
        assert_eq!(report.train.1, 1);
    }

    #[test]
    fn test_require_positives_fails() {
        let config = SplitConfig {
            require_positives: true,
            ..SplitConfig::default()
        };
        let result = split(labelled_graph(30, 1), &config);
        assert!(matches!(result, Err(FraudError::Imbalance { .. })));
    }

    #[test]
    fn test_invalid_fractions() {
        let config = SplitConfig {
            test_fraction: 0.6,
            val_fraction: 0.5,
            ..SplitConfig::default()
        };
        let result = split(labelled_graph(10, 2), &config);
        assert!(matches!(result, Err(FraudError::InvalidSplit(_))));
    }
}
