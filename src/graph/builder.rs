//! Builds a `TypedGraph` from the users, orders and payments tables.

use super::schema::{NodeType, Relation};
use super::typed::{EdgeIndex, FeatureMatrix, FeatureSchema, IdMap, TypedGraph};
use crate::error::{FraudError, Result};
use crate::loader::{
    Table, Tables, IS_FRAUD, ORDERS, ORDER_FEATURE_COLUMNS, ORDER_ID, PAYMENT_ID, PAYMENT_TYPE,
    USER_FEATURE_COLUMNS, USER_ID,
};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::{debug, info, warn};

/// Ids, features and the source rows kept for one node table.
struct NodeTable {
    ids: IdMap,
    features: FeatureMatrix,
    kept_rows: Vec<usize>,
}

/// Build the heterogeneous order graph.
///
/// Fails on missing required columns, unparsable numbers, an empty orders
/// table, or orders that reference unknown users or payments. Missing
/// optional feature columns only narrow the feature matrices.
pub fn build(tables: &Tables) -> Result<TypedGraph> {
    tables.validate()?;
    if tables.orders.is_empty() {
        return Err(FraudError::EmptyTable(ORDERS.to_string()));
    }

    let users = numeric_node_table(&tables.users, USER_ID, &USER_FEATURE_COLUMNS)?;
    let orders = numeric_node_table(&tables.orders, ORDER_ID, &ORDER_FEATURE_COLUMNS)?;
    let (payments, categories) = payment_node_table(&tables.payments)?;

    let label_idx = tables.orders.require_column(IS_FRAUD)?;
    let labels = orders
        .kept_rows
        .iter()
        .map(|&row| parse_label(&tables.orders, row, label_idx))
        .collect::<Result<Vec<u8>>>()?;

    let places = relation_edges(
        &tables.orders,
        USER_ID,
        &users.ids,
        ORDER_ID,
        &orders.ids,
        Relation::Places,
    )?;
    let uses = relation_edges(
        &tables.orders,
        ORDER_ID,
        &orders.ids,
        PAYMENT_ID,
        &payments.ids,
        Relation::Uses,
    )?;

    let mut edges = BTreeMap::new();
    edges.insert(Relation::PlacedBy, places.reversed());
    edges.insert(Relation::Places, places);
    edges.insert(Relation::UsedBy, uses.reversed());
    edges.insert(Relation::Uses, uses);

    let mut id_maps = BTreeMap::new();
    let mut features = BTreeMap::new();
    for (node_type, table) in [
        (NodeType::User, users),
        (NodeType::Order, orders),
        (NodeType::Payment, payments),
    ] {
        id_maps.insert(node_type, table.ids);
        features.insert(node_type, table.features);
    }

    let graph = TypedGraph::from_parts(id_maps, features, edges, Some(labels), categories)?;

    info!(
        users = graph.node_count(NodeType::User),
        orders = graph.node_count(NodeType::Order),
        payments = graph.node_count(NodeType::Payment),
        edges = graph.edge_count(),
        payment_categories = graph.payment_categories().len(),
        fraud_ratio = graph.fraud_ratio(),
        "Built heterogeneous order graph"
    );

    Ok(graph)
}

/// Id map plus the numeric columns that are present, first row per id wins.
fn numeric_node_table(table: &Table, id_column: &str, wanted: &[&str]) -> Result<NodeTable> {
    let id_idx = table.require_column(id_column)?;
    let present: Vec<(&str, usize)> = wanted
        .iter()
        .filter_map(|&c| table.column_index(c).map(|idx| (c, idx)))
        .collect();

    let mut ids = IdMap::new();
    let mut kept_rows = Vec::with_capacity(table.len());
    let mut data = Vec::with_capacity(table.len() * present.len());
    for row in 0..table.len() {
        let (_, is_new) = ids.insert(table.cell(row, id_idx));
        if !is_new {
            continue;
        }
        kept_rows.push(row);
        for &(column, idx) in &present {
            data.push(parse_number(table, column, row, idx)?);
        }
    }
    warn_duplicates(table, kept_rows.len());

    let columns = present.iter().map(|(c, _)| c.to_string()).collect();
    let features = FeatureMatrix::new(columns, ids.len(), data)?;
    Ok(NodeTable {
        ids,
        features,
        kept_rows,
    })
}

/// Payments one-hot encoded over the observed `payment_type` values.
fn payment_node_table(table: &Table) -> Result<(NodeTable, Vec<String>)> {
    let id_idx = table.require_column(PAYMENT_ID)?;
    let type_idx = table.require_column(PAYMENT_TYPE)?;

    let mut ids = IdMap::new();
    let mut kept_rows = Vec::with_capacity(table.len());
    for row in 0..table.len() {
        if ids.insert(table.cell(row, id_idx)).1 {
            kept_rows.push(row);
        }
    }
    warn_duplicates(table, kept_rows.len());

    let categories: Vec<String> = kept_rows
        .iter()
        .map(|&row| table.cell(row, type_idx).to_string())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let columns = categories
        .iter()
        .map(|c| FeatureSchema::payment_column(c))
        .collect();
    let mut features = FeatureMatrix::zeros(columns, ids.len());
    for (node, &row) in kept_rows.iter().enumerate() {
        let category = table.cell(row, type_idx);
        if let Some(col) = categories.iter().position(|c| c == category) {
            features.set(node, col, 1.0);
        }
    }

    debug!(categories = ?categories, "Encoded payment types");
    Ok((
        NodeTable {
            ids,
            features,
            kept_rows,
        },
        categories,
    ))
}

/// Deduplicated edges between two id columns of the orders table.
fn relation_edges(
    orders: &Table,
    src_column: &str,
    src_ids: &IdMap,
    dst_column: &str,
    dst_ids: &IdMap,
    relation: Relation,
) -> Result<EdgeIndex> {
    let src_idx = orders.require_column(src_column)?;
    let dst_idx = orders.require_column(dst_column)?;

    let mut seen = HashSet::new();
    let mut pairs = Vec::with_capacity(orders.len());
    for row in 0..orders.len() {
        let src = resolve(src_ids, orders.cell(row, src_idx), relation)?;
        let dst = resolve(dst_ids, orders.cell(row, dst_idx), relation)?;
        if seen.insert((src, dst)) {
            pairs.push((src, dst));
        }
    }
    Ok(EdgeIndex::from_pairs(&pairs))
}

fn resolve(ids: &IdMap, id: &str, relation: Relation) -> Result<usize> {
    ids.get(id).ok_or_else(|| FraudError::Referential {
        relation: relation.to_string(),
        id: id.to_string(),
    })
}

fn warn_duplicates(table: &Table, kept: usize) {
    let duplicates = table.len() - kept;
    if duplicates > 0 {
        warn!(
            table = %table.name(),
            duplicates = duplicates,
            "Duplicate ids found, keeping the first row of each"
        );
    }
}

/// Empty cells read as zero.
fn parse_number(table: &Table, column: &str, row: usize, idx: usize) -> Result<f32> {
    let raw = table.cell(row, idx).trim();
    if raw.is_empty() {
        return Ok(0.0);
    }
    raw.parse::<f64>()
        .map(|v| v as f32)
        .map_err(|_| FraudError::Parse {
            table: table.name().to_string(),
            column: column.to_string(),
            row,
            value: raw.to_string(),
        })
}

fn parse_label(table: &Table, row: usize, idx: usize) -> Result<u8> {
    let raw = table.cell(row, idx).trim();
    match raw.to_ascii_lowercase().as_str() {
        "true" => Ok(1),
        "false" => Ok(0),
        _ => {
            let value = parse_number(table, IS_FRAUD, row, idx)?;
            Ok(u8::from(value != 0.0))
        }
    }
}
