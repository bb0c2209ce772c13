//! Single-order graph adapter.
//!
//! Turns one incoming order into a three-node graph with the same schema as
//! the training graph: one user, one order and one payment, joined by one
//! edge of each relation. Column layout and payment categories come from the
//! persisted `FeatureSchema`, so the adapter never drifts from the model.

use crate::graph::{EdgeIndex, FeatureMatrix, FeatureSchema, IdMap, NodeType, Relation, TypedGraph};
use crate::types::OrderRecord;
use std::collections::BTreeMap;
use tracing::debug;

pub struct MiniGraphAdapter {
    schema: FeatureSchema,
}

impl MiniGraphAdapter {
    pub fn new(schema: FeatureSchema) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    /// Build the mini-graph. Missing fields become 0; an unknown payment
    /// category leaves the payment row all zero. Never fails.
    pub fn to_mini_graph(&self, record: &OrderRecord) -> TypedGraph {
        let order_id = record
            .order_id
            .as_ref()
            .map(|id| id.to_string())
            .unwrap_or_else(|| "unknown".to_string());

        let mut id_maps = BTreeMap::new();
        let mut features = BTreeMap::new();
        for node_type in NodeType::ALL {
            let mut ids = IdMap::new();
            match node_type {
                NodeType::Order => ids.insert(&order_id),
                other => ids.insert(other.as_str()),
            };
            id_maps.insert(node_type, ids);

            let row = match node_type {
                NodeType::Payment => self.payment_row(record),
                _ => self.numeric_row(node_type, record),
            };
            features.insert(node_type, row);
        }

        let single = EdgeIndex::from_pairs(&[(0, 0)]);
        let edges = Relation::ALL
            .into_iter()
            .map(|r| (r, single.clone()))
            .collect();

        TypedGraph::assemble(
            id_maps,
            features,
            edges,
            None,
            self.schema.payment_categories.clone(),
        )
    }

    fn numeric_row(&self, node_type: NodeType, record: &OrderRecord) -> FeatureMatrix {
        let columns = self.schema.columns(node_type).to_vec();
        let mut row = FeatureMatrix::zeros(columns, 1);
        for (col, name) in self.schema.columns(node_type).iter().enumerate() {
            if let Some(value) = record.feature(name) {
                row.set(0, col, value as f32);
            }
        }
        row
    }

    fn payment_row(&self, record: &OrderRecord) -> FeatureMatrix {
        let columns = self.schema.columns(NodeType::Payment).to_vec();
        let width = columns.len();
        let mut row = FeatureMatrix::zeros(columns, 1);

        let category = match (&record.payment_type, record.payment_type_idx) {
            (Some(name), _) => self.schema.category_index(name),
            (None, Some(idx)) => usize::try_from(idx)
                .ok()
                .filter(|&i| i < self.schema.payment_categories.len()),
            (None, None) => None,
        };
        match category.filter(|&c| c < width) {
            Some(c) => row.set(0, c, 1.0),
            None => debug!(
                payment_type = ?record.payment_type,
                payment_type_idx = ?record.payment_type_idx,
                "Payment category not recognized, using an all-zero row"
            ),
        }
        row
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OrderId;

    fn schema() -> FeatureSchema {
        let mut columns = BTreeMap::new();
        columns.insert(
            NodeType::User,
            vec!["age".into(), "account_age_days".into(), "total_past_orders".into()],
        );
        columns.insert(NodeType::Order, vec!["order_amount".into(), "num_items".into()]);
        let categories: Vec<String> = vec!["credit_card".into(), "paypal".into()];
        columns.insert(
            NodeType::Payment,
            categories.iter().map(|c| FeatureSchema::payment_column(c)).collect(),
        );
        FeatureSchema {
            columns,
            payment_categories: categories,
        }
    }

    #[test]
    fn test_empty_record_yields_valid_graph() {
        let adapter = MiniGraphAdapter::new(schema());
        let graph = adapter.to_mini_graph(&OrderRecord::default());

        assert!(graph.validate().is_ok());
        for node_type in NodeType::ALL {
            assert_eq!(graph.node_count(node_type), 1);
            let f = graph.features(node_type).unwrap();
            assert!(f.data().iter().all(|&v| v == 0.0));
        }
        for relation in Relation::ALL {
            let e = graph.edges(relation).unwrap();
            assert_eq!((e.src(), e.dst()), (&[0u32][..], &[0u32][..]));
        }
        assert_eq!(graph.id_map(NodeType::Order).unwrap().id(0), Some("unknown"));
    }

    #[test]
    fn test_fields_fill_schema_columns() {
        let adapter = MiniGraphAdapter::new(schema());
        let record = OrderRecord {
            order_id: Some(OrderId::Number(9)),
            user_age: Some(40.0),
            user_total_orders: Some(3.0),
            order_amount: Some(99.0),
            payment_type: Some("paypal".into()),
            ..OrderRecord::default()
        };
        let graph = adapter.to_mini_graph(&record);

        assert_eq!(graph.features(NodeType::User).unwrap().row(0), &[40.0, 0.0, 3.0]);
        assert_eq!(graph.features(NodeType::Order).unwrap().row(0), &[99.0, 0.0]);
        assert_eq!(graph.features(NodeType::Payment).unwrap().row(0), &[0.0, 1.0]);
    }

    #[test]
    fn test_payment_index_and_out_of_range() {
        let adapter = MiniGraphAdapter::new(schema());

        let by_idx = OrderRecord {
            payment_type_idx: Some(0),
            ..OrderRecord::default()
        };
        let graph = adapter.to_mini_graph(&by_idx);
        assert_eq!(graph.features(NodeType::Payment).unwrap().row(0), &[1.0, 0.0]);

        for record in [
            OrderRecord {
                payment_type_idx: Some(7),
                ..OrderRecord::default()
            },
            OrderRecord {
                payment_type_idx: Some(-1),
                ..OrderRecord::default()
            },
            OrderRecord {
                payment_type: Some("crypto".into()),
                payment_type_idx: Some(0),
                ..OrderRecord::default()
            },
        ] {
            let graph = adapter.to_mini_graph(&record);
            assert_eq!(graph.features(NodeType::Payment).unwrap().row(0), &[0.0, 0.0]);
        }
    }
}
