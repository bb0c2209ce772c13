//! Node types and relations of the order graph.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Entity categories in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    User,
    Order,
    Payment,
}

impl NodeType {
    pub const ALL: [NodeType; 3] = [NodeType::User, NodeType::Order, NodeType::Payment];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::User => "user",
            NodeType::Order => "order",
            NodeType::Payment => "payment",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Directed edge types. Each structural relation appears in both directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    /// user -> order
    Places,
    /// order -> user
    PlacedBy,
    /// order -> payment
    Uses,
    /// payment -> order
    UsedBy,
}

impl Relation {
    pub const ALL: [Relation; 4] = [
        Relation::Places,
        Relation::PlacedBy,
        Relation::Uses,
        Relation::UsedBy,
    ];

    pub fn source(&self) -> NodeType {
        match self {
            Relation::Places => NodeType::User,
            Relation::PlacedBy | Relation::Uses => NodeType::Order,
            Relation::UsedBy => NodeType::Payment,
        }
    }

    pub fn target(&self) -> NodeType {
        match self {
            Relation::Places | Relation::UsedBy => NodeType::Order,
            Relation::PlacedBy => NodeType::User,
            Relation::Uses => NodeType::Payment,
        }
    }

    pub fn inverse(&self) -> Relation {
        match self {
            Relation::Places => Relation::PlacedBy,
            Relation::PlacedBy => Relation::Places,
            Relation::Uses => Relation::UsedBy,
            Relation::UsedBy => Relation::Uses,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Relation::Places => "places",
            Relation::PlacedBy => "placed_by",
            Relation::Uses => "uses",
            Relation::UsedBy => "used_by",
        }
    }

    /// Relations whose target is `node_type`.
    pub fn incoming(node_type: NodeType) -> impl Iterator<Item = Relation> {
        Self::ALL.into_iter().filter(move |r| r.target() == node_type)
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}__{}__{}", self.source(), self.as_str(), self.target())
    }
}
