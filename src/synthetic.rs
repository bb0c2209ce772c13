//! Seeded sample tables for demos and tests.
//!
//! Fraudulent orders get a suspicious profile (large baskets, high amounts)
//! so the model has something to learn.

use crate::error::Result;
use crate::loader::{
    Table, Tables, IS_FRAUD, ORDERS, ORDER_ID, PAYMENTS, PAYMENT_ID, PAYMENT_TYPE, USERS, USER_ID,
};
use rand::rngs::StdRng;
use rand::seq::{IteratorRandom, SliceRandom};
use rand::{Rng, SeedableRng};
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

pub const PAYMENT_TYPES: [&str; 4] = ["credit_card", "debit_card", "paypal", "bank_transfer"];

#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    pub users: usize,
    pub payments: usize,
    pub orders: usize,
    /// Share of orders labelled fraud; the count is rounded, not sampled
    pub fraud_rate: f64,
    pub seed: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            users: 100,
            payments: 100,
            orders: 200,
            fraud_rate: 0.05,
            seed: 42,
        }
    }
}

pub fn generate(config: &SyntheticConfig) -> Result<Tables> {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let users = users_table(config.users, &mut rng)?;
    let payments = payments_table(config.payments, &mut rng)?;
    let orders = orders_table(config, &mut rng)?;
    Ok(Tables {
        users,
        orders,
        payments,
    })
}

/// Generate tables and write them as CSV into `dir`.
pub fn write_csv_dir<P: AsRef<Path>>(config: &SyntheticConfig, dir: P) -> Result<Tables> {
    let tables = generate(config)?;
    tables.write_dir(dir.as_ref())?;
    info!(
        dir = %dir.as_ref().display(),
        users = config.users,
        payments = config.payments,
        orders = config.orders,
        "Wrote synthetic tables"
    );
    Ok(tables)
}

fn users_table(n: usize, rng: &mut StdRng) -> Result<Table> {
    let mut table = Table::new(
        USERS,
        &[USER_ID, "age", "account_age_days", "total_past_orders"],
    );
    for id in 1..=n {
        let row = [
            id.to_string(),
            rng.gen_range(18..80).to_string(),
            rng.gen_range(1..1500).to_string(),
            rng.gen_range(0..50).to_string(),
        ];
        table.push_row(&row)?;
    }
    Ok(table)
}

fn payments_table(n: usize, rng: &mut StdRng) -> Result<Table> {
    let mut table = Table::new(PAYMENTS, &[PAYMENT_ID, PAYMENT_TYPE]);
    for id in 1..=n {
        let kind = PAYMENT_TYPES.choose(rng).copied().unwrap_or(PAYMENT_TYPES[0]);
        table.push_row(&[id.to_string(), kind.to_string()])?;
    }
    Ok(table)
}

fn orders_table(config: &SyntheticConfig, rng: &mut StdRng) -> Result<Table> {
    let mut table = Table::new(
        ORDERS,
        &[ORDER_ID, USER_ID, PAYMENT_ID, "order_amount", "num_items", IS_FRAUD],
    );
    let n_fraud = ((config.orders as f64 * config.fraud_rate).round() as usize).min(config.orders);
    let fraud: HashSet<usize> = (0..config.orders).choose_multiple(rng, n_fraud).into_iter().collect();

    for idx in 0..config.orders {
        let is_fraud = fraud.contains(&idx);
        let (amount, items) = if is_fraud {
            (rng.gen_range(400.0..2000.0), rng.gen_range(5..15))
        } else {
            (rng.gen_range(10.0..500.0), rng.gen_range(1..10))
        };
        let row = [
            (idx + 1).to_string(),
            rng.gen_range(1..=config.users.max(1)).to_string(),
            rng.gen_range(1..=config.payments.max(1)).to_string(),
            format!("{:.2}", amount),
            items.to_string(),
            u8::from(is_fraud).to_string(),
        ];
        table.push_row(&row)?;
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::build;

    #[test]
    fn test_default_sizes_and_fraud_count() {
        let tables = generate(&SyntheticConfig::default()).unwrap();
        assert_eq!(tables.users.len(), 100);
        assert_eq!(tables.payments.len(), 100);
        assert_eq!(tables.orders.len(), 200);

        let frauds = tables
            .orders
            .column(IS_FRAUD)
            .unwrap()
            .into_iter()
            .filter(|&v| v == "1")
            .count();
        assert_eq!(frauds, 10);
    }

    #[test]
    fn test_generated_tables_build() {
        let tables = generate(&SyntheticConfig::default()).unwrap();
        let graph = build(&tables).unwrap();
        assert!(graph.payment_categories().len() <= PAYMENT_TYPES.len());
        assert_eq!(graph.positive_count(), 10);
    }

    #[test]
    fn test_seeded() {
        let a = generate(&SyntheticConfig::default()).unwrap();
        let b = generate(&SyntheticConfig::default()).unwrap();
        assert_eq!(a.orders, b.orders);
    }

    #[test]
    fn test_write_csv_dir_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let config = SyntheticConfig {
            orders: 20,
            ..SyntheticConfig::default()
        };
        write_csv_dir(&config, dir.path()).unwrap();

        assert!(Tables::present_in(dir.path()));
        let loaded = Tables::load_dir(dir.path()).unwrap();
        assert_eq!(loaded.orders.len(), 20);
    }
}
