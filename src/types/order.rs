//! Incoming order records for single-order scoring

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// External order identifier, numeric or textual as the caller sent it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OrderId {
    Number(i64),
    Text(String),
}

impl OrderId {
    /// Placeholder echoed when a request carries no id
    pub fn unknown() -> Self {
        OrderId::Text("unknown".to_string())
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderId::Number(n) => write!(f, "{}", n),
            OrderId::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for OrderId {
    fn from(n: i64) -> Self {
        OrderId::Number(n)
    }
}

impl From<&str> for OrderId {
    fn from(s: &str) -> Self {
        OrderId::Text(s.to_string())
    }
}

/// One order as received for scoring. Every feature is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<OrderId>,

    /// User age in years
    #[serde(default, alias = "age", skip_serializing_if = "Option::is_none")]
    pub user_age: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_age_days: Option<f64>,

    #[serde(default, alias = "total_past_orders", skip_serializing_if = "Option::is_none")]
    pub user_total_orders: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_amount: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_items: Option<f64>,

    /// Payment category name, preferred over `payment_type_idx`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_type: Option<String>,

    /// Index into the model's payment category list
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_type_idx: Option<i64>,

    /// Any other numeric fields, matched to feature columns by name
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl OrderRecord {
    pub fn new(order_id: impl Into<OrderId>) -> Self {
        Self {
            order_id: Some(order_id.into()),
            ..Self::default()
        }
    }

    /// Value of a feature column, by the column name used in the tables.
    pub fn feature(&self, column: &str) -> Option<f64> {
        let typed = match column {
            "age" => self.user_age,
            "account_age_days" => self.account_age_days,
            "total_past_orders" => self.user_total_orders,
            "order_amount" => self.order_amount,
            "num_items" => self.num_items,
            _ => None,
        };
        typed.or_else(|| self.extra.get(column).and_then(|v| v.as_f64()))
    }
}
