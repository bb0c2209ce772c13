//! Relational loader: users, orders and payments tables held as string cells.
//!
//! Values stay as their source text so identifiers keep their external form;
//! numeric parsing happens in the graph builder where the column semantics
//! are known.

use crate::error::{FraudError, Result};
use std::io::Read;
use std::path::Path;
use tracing::{info, warn};

pub const USERS: &str = "users";
pub const ORDERS: &str = "orders";
pub const PAYMENTS: &str = "payments";

pub const USER_ID: &str = "user_id";
pub const ORDER_ID: &str = "order_id";
pub const PAYMENT_ID: &str = "payment_id";
pub const IS_FRAUD: &str = "is_fraud";
pub const PAYMENT_TYPE: &str = "payment_type";

/// Optional user feature columns, in matrix order.
pub const USER_FEATURE_COLUMNS: [&str; 3] = ["age", "account_age_days", "total_past_orders"];
/// Optional order feature columns, in matrix order.
pub const ORDER_FEATURE_COLUMNS: [&str; 2] = ["order_amount", "num_items"];

const ORDER_REQUIRED: [&str; 4] = [ORDER_ID, USER_ID, PAYMENT_ID, IS_FRAUD];
const USER_REQUIRED: [&str; 1] = [USER_ID];
const PAYMENT_REQUIRED: [&str; 2] = [PAYMENT_ID, PAYMENT_TYPE];

/// In-memory table with named columns and string cells.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    name: String,
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(name: &str, columns: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    /// Append a row; its length must match the header.
    pub fn push_row<S: ToString>(&mut self, row: &[S]) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(FraudError::StructuralMismatch(format!(
                "table '{}' expects {} cells per row, got {}",
                self.name,
                self.columns.len(),
                row.len()
            )));
        }
        self.rows.push(row.iter().map(|c| c.to_string()).collect());
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.column_index(column).is_some()
    }

    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    /// Index of a column that must be present, or a schema error.
    pub fn require_column(&self, column: &str) -> Result<usize> {
        self.column_index(column)
            .ok_or_else(|| FraudError::schema(&self.name, column))
    }

    /// Cell values of a column, top to bottom.
    pub fn column(&self, column: &str) -> Option<Vec<&str>> {
        let idx = self.column_index(column)?;
        Some(self.rows.iter().map(|r| r[idx].as_str()).collect())
    }

    pub fn cell(&self, row: usize, column_idx: usize) -> &str {
        &self.rows[row][column_idx]
    }

    /// Read a headered CSV file.
    pub fn from_csv_path<P: AsRef<Path>>(name: &str, path: P) -> Result<Self> {
        let file = std::fs::File::open(path.as_ref())?;
        let table = Self::from_csv_reader(name, file)?;
        info!(
            table = %name,
            rows = table.len(),
            path = %path.as_ref().display(),
            "Loaded table"
        );
        Ok(table)
    }

    pub fn from_csv_reader<R: Read>(name: &str, reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let columns: Vec<String> = rdr.headers()?.iter().map(|h| h.to_string()).collect();

        let mut rows = Vec::new();
        for record in rdr.records() {
            let record = record?;
            rows.push(record.iter().map(|c| c.to_string()).collect());
        }

        Ok(Self {
            name: name.to_string(),
            columns,
            rows,
        })
    }

    pub fn write_csv_path<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut wtr = csv::Writer::from_path(path)?;
        wtr.write_record(&self.columns)?;
        for row in &self.rows {
            wtr.write_record(row)?;
        }
        wtr.flush()?;
        Ok(())
    }
}

/// The three relational inputs of the graph builder.
#[derive(Debug, Clone)]
pub struct Tables {
    pub users: Table,
    pub orders: Table,
    pub payments: Table,
}

impl Tables {
    /// Load `users.csv`, `orders.csv` and `payments.csv` from a directory.
    pub fn load_dir<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let tables = Self {
            users: Table::from_csv_path(USERS, dir.join("users.csv"))?,
            orders: Table::from_csv_path(ORDERS, dir.join("orders.csv"))?,
            payments: Table::from_csv_path(PAYMENTS, dir.join("payments.csv"))?,
        };
        tables.validate()?;
        Ok(tables)
    }

    pub fn write_dir<P: AsRef<Path>>(&self, dir: P) -> Result<()> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        self.users.write_csv_path(dir.join("users.csv"))?;
        self.orders.write_csv_path(dir.join("orders.csv"))?;
        self.payments.write_csv_path(dir.join("payments.csv"))?;
        Ok(())
    }

    /// True if all three CSV files exist in `dir`.
    pub fn present_in<P: AsRef<Path>>(dir: P) -> bool {
        let dir = dir.as_ref();
        ["users.csv", "orders.csv", "payments.csv"]
            .iter()
            .all(|f| dir.join(f).exists())
    }

    /// Check required columns and report missing optional feature columns.
    ///
    /// Returns the missing optional columns as `table.column` strings; they
    /// are warnings, not errors.
    pub fn validate(&self) -> Result<Vec<String>> {
        for column in ORDER_REQUIRED {
            self.orders.require_column(column)?;
        }
        for column in USER_REQUIRED {
            self.users.require_column(column)?;
        }
        for column in PAYMENT_REQUIRED {
            self.payments.require_column(column)?;
        }

        let mut missing = Vec::new();
        for column in USER_FEATURE_COLUMNS {
            if !self.users.has_column(column) {
                missing.push(format!("{}.{}", USERS, column));
            }
        }
        for column in ORDER_FEATURE_COLUMNS {
            if !self.orders.has_column(column) {
                missing.push(format!("{}.{}", ORDERS, column));
            }
        }
        if !missing.is_empty() {
            warn!(missing = ?missing, "Expected feature columns are missing");
        }
        Ok(missing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payments_without_type() -> Table {
        let mut t = Table::new(PAYMENTS, &[PAYMENT_ID]);
        t.push_row(&["p1"]).unwrap();
        t
    }

    #[test]
    fn test_csv_reader() {
        let data = "order_id,user_id,payment_id,order_amount,num_items,is_fraud\n\
                    1, 10, 100, 25.5, 2, 0\n\
                    2, 11, 101, 310.0, 1, 1\n";
        let table = Table::from_csv_reader(ORDERS, data.as_bytes()).unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(table.columns().len(), 6);
        assert_eq!(table.column(USER_ID).unwrap(), vec!["10", "11"]);
        assert_eq!(table.cell(1, table.require_column(IS_FRAUD).unwrap()), "1");
    }

    #[test]
    fn test_push_row_length_checked() {
        let mut table = Table::new(USERS, &[USER_ID, "age"]);
        assert!(table.push_row(&["u1", "30"]).is_ok());
        assert!(table.push_row(&["u2"]).is_err());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_validate_requires_payment_type() {
        let mut orders = Table::new(ORDERS, &ORDER_REQUIRED);
        orders.push_row(&["o1", "u1", "p1", "0"]).unwrap();
        let mut users = Table::new(USERS, &[USER_ID]);
        users.push_row(&["u1"]).unwrap();

        let tables = Tables {
            users,
            orders,
            payments: payments_without_type(),
        };

        match tables.validate() {
            Err(FraudError::Schema { table, column }) => {
                assert_eq!(table, PAYMENTS);
                assert_eq!(column, PAYMENT_TYPE);
            }
            other => panic!("expected schema error, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_reports_missing_optional_columns() {
        let mut orders = Table::new(ORDERS, &ORDER_REQUIRED);
        orders.push_row(&["o1", "u1", "p1", "0"]).unwrap();
        let mut users = Table::new(USERS, &[USER_ID, "age"]);
        users.push_row(&["u1", "40"]).unwrap();
        let mut payments = Table::new(PAYMENTS, &[PAYMENT_ID, PAYMENT_TYPE]);
        payments.push_row(&["p1", "paypal"]).unwrap();

        let tables = Tables {
            users,
            orders,
            payments,
        };
        let missing = tables.validate().unwrap();

        assert!(missing.contains(&"users.account_age_days".to_string()));
        assert!(missing.contains(&"orders.order_amount".to_string()));
        assert!(!missing.contains(&"users.age".to_string()));
    }
}
