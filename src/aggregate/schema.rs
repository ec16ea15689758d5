// src/aggregate/schema.rs

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::{AggregateError, Result};

/// Name of the single table every aggregation query reads from.
pub const TABLE_NAME: &str = "data";

/// Primitive column types accepted by the loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ColumnType {
    Text,
    Real,
    Int,
    TinyInt,
    Boolean,
}

impl ColumnType {
    pub fn as_sql(&self) -> &'static str {
        match self {
            ColumnType::Text => "TEXT",
            ColumnType::Real => "REAL",
            ColumnType::Int => "INT",
            ColumnType::TinyInt => "TINYINT",
            ColumnType::Boolean => "BOOLEAN",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

impl FromStr for ColumnType {
    type Err = AggregateError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TEXT" => Ok(ColumnType::Text),
            "REAL" => Ok(ColumnType::Real),
            "INT" | "INTEGER" => Ok(ColumnType::Int),
            "TINYINT" => Ok(ColumnType::TinyInt),
            "BOOLEAN" | "BOOL" => Ok(ColumnType::Boolean),
            other => Err(AggregateError::SchemaConflict(format!(
                "unsupported column type '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ColumnType,
}

/// Ordered column declaration for the `data` table.
///
/// Column names are restricted to plain identifiers, so the generated DDL never
/// carries caller-controlled syntax.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableSchema {
    columns: Vec<Column>,
}

impl TableSchema {
    pub fn new<I, S>(columns: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, ColumnType)>,
        S: Into<String>,
    {
        let columns: Vec<Column> = columns
            .into_iter()
            .map(|(name, ty)| Column {
                name: name.into(),
                ty,
            })
            .collect();

        if columns.is_empty() {
            return Err(AggregateError::SchemaConflict(
                "schema declares no columns".into(),
            ));
        }

        let mut seen = HashSet::new();
        for column in &columns {
            if !is_identifier(&column.name) {
                return Err(AggregateError::SchemaConflict(format!(
                    "'{}' is not a valid column name",
                    column.name
                )));
            }
            if !seen.insert(column.name.to_ascii_lowercase()) {
                return Err(AggregateError::SchemaConflict(format!(
                    "column '{}' is declared twice",
                    column.name
                )));
            }
        }

        Ok(Self { columns })
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub(crate) fn create_table_sql(&self) -> String {
        let cols = self
            .columns
            .iter()
            .map(|c| format!("{} {}", c.name, c.ty))
            .collect::<Vec<_>>()
            .join(", ");
        format!("CREATE TABLE {} ({})", TABLE_NAME, cols)
    }

    pub(crate) fn insert_sql(&self) -> String {
        let names = self
            .columns
            .iter()
            .map(|c| c.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = vec!["?"; self.columns.len()].join(", ");
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            TABLE_NAME, names, placeholders
        )
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// The five query families exposed as aggregation tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryFamily {
    BlockTransfers,
    TransactionTransfers,
    AddressMempool,
    AddressBalances,
    AddressTransfers,
}

use ColumnType::*;

const BLOCK_TRANSFERS: &[(&str, ColumnType)] = &[
    ("transaction_hash", Text),
    ("address", Text),
    ("currency_id", Text),
    ("effect", Real),
    ("failed", Boolean),
    ("extra", Text),
    ("currency_symbol", Text),
    ("currency_verified", Boolean),
    ("currency_decimals", TinyInt),
    ("exchange_rate", Real),
];

const TRANSACTION_TRANSFERS: &[(&str, ColumnType)] = &[
    ("address", Text),
    ("currency_id", Text),
    ("effect", Real),
    ("failed", Boolean),
    ("extra", Text),
    ("currency_symbol", Text),
    ("currency_verified", Boolean),
    ("currency_decimals", TinyInt),
    ("exchange_rate", Real),
];

const ADDRESS_MEMPOOL: &[(&str, ColumnType)] = &[
    ("transaction_hash", Text),
    ("time", Text),
    ("currency_id", Text),
    ("effect", Real),
    ("failed", Boolean),
    ("extra", Text),
    ("currency_symbol", Text),
    ("currency_verified", Boolean),
    ("currency_decimals", TinyInt),
    ("exchange_rate", Real),
];

const ADDRESS_BALANCES: &[(&str, ColumnType)] = &[
    ("currency_id", Text),
    ("symbol", Text),
    ("decimals", Int),
    ("balance", Real),
    ("is_verified", Boolean),
    ("exchange_rate", Real),
];

const ADDRESS_TRANSFERS: &[(&str, ColumnType)] = &[
    ("block", Int),
    ("transaction_hash", Text),
    ("time", Text),
    ("currency_id", Text),
    ("effect", Real),
    ("failed", Boolean),
    ("extra", Text),
    ("currency_symbol", Text),
    ("currency_verified", Boolean),
    ("currency_decimals", TinyInt),
    ("exchange_rate", Real),
];

impl QueryFamily {
    pub const ALL: [QueryFamily; 5] = [
        QueryFamily::BlockTransfers,
        QueryFamily::TransactionTransfers,
        QueryFamily::AddressMempool,
        QueryFamily::AddressBalances,
        QueryFamily::AddressTransfers,
    ];

    fn declared_columns(&self) -> &'static [(&'static str, ColumnType)] {
        match self {
            QueryFamily::BlockTransfers => BLOCK_TRANSFERS,
            QueryFamily::TransactionTransfers => TRANSACTION_TRANSFERS,
            QueryFamily::AddressMempool => ADDRESS_MEMPOOL,
            QueryFamily::AddressBalances => ADDRESS_BALANCES,
            QueryFamily::AddressTransfers => ADDRESS_TRANSFERS,
        }
    }

    pub fn schema(&self) -> TableSchema {
        TableSchema {
            columns: self
                .declared_columns()
                .iter()
                .map(|(name, ty)| Column {
                    name: (*name).to_string(),
                    ty: *ty,
                })
                .collect(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QueryFamily::BlockTransfers => "block_transfers",
            QueryFamily::TransactionTransfers => "transaction_transfers",
            QueryFamily::AddressMempool => "address_mempool",
            QueryFamily::AddressBalances => "address_balances",
            QueryFamily::AddressTransfers => "address_transfers",
        }
    }
}

impl FromStr for QueryFamily {
    type Err = AggregateError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        QueryFamily::ALL
            .into_iter()
            .find(|f| f.as_str() == normalized)
            .ok_or_else(|| AggregateError::InvalidArgument(format!("unknown query family '{}'", s)))
    }
}

impl fmt::Display for QueryFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
