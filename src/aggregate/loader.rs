// src/aggregate/loader.rs

use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection};
use serde_json::Value;
use tracing::debug;

use super::error::{AggregateError, Result};
use super::models::{QueryResult, Record};
use super::sandbox::{run_query, SandboxOptions};
use super::schema::{TableSchema, TABLE_NAME};

/// In-memory `data` table owned by a single aggregation call. The connection
/// is closed when the table is dropped.
pub struct EphemeralTable {
    conn: Connection,
    schema: TableSchema,
    rows: usize,
}

impl EphemeralTable {
    pub fn create(schema: TableSchema) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(storage_error)?;
        create_table(&conn, &schema)?;
        Ok(Self {
            conn,
            schema,
            rows: 0,
        })
    }

    /// Creates the table and fills it with `records` in one step.
    pub fn with_records(schema: TableSchema, records: &[Record]) -> Result<Self> {
        let mut table = Self::create(schema)?;
        table.load(records)?;
        Ok(table)
    }

    pub fn load(&mut self, records: &[Record]) -> Result<usize> {
        insert_records(&self.conn, &self.schema, records)?;
        self.rows += records.len();
        Ok(records.len())
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn row_count(&self) -> usize {
        self.rows
    }

    /// Runs the caller's query once and releases the table.
    pub fn query(self, sql: &str, options: &SandboxOptions) -> Result<QueryResult> {
        run_query(&self.conn, sql, options)
    }
}

/// Recreates `data` on `conn` with the declared columns and inserts one row per
/// record, null for every column the record lacks.
pub fn unwrap_into_table(conn: &Connection, schema: &TableSchema, records: &[Record]) -> Result<()> {
    create_table(conn, schema)?;
    insert_records(conn, schema, records)
}

fn create_table(conn: &Connection, schema: &TableSchema) -> Result<()> {
    conn.execute_batch(&format!("DROP TABLE IF EXISTS {}", TABLE_NAME))
        .map_err(storage_error)?;
    conn.execute_batch(&schema.create_table_sql())
        .map_err(|e| AggregateError::SchemaConflict(e.to_string()))
}

fn insert_records(conn: &Connection, schema: &TableSchema, records: &[Record]) -> Result<()> {
    let tx = conn.unchecked_transaction().map_err(storage_error)?;
    {
        let mut stmt = tx.prepare(&schema.insert_sql()).map_err(storage_error)?;
        for record in records {
            let values = schema
                .columns()
                .iter()
                .map(|column| to_sql_value(record.get(&column.name)));
            stmt.execute(params_from_iter(values)).map_err(storage_error)?;
        }
    }
    tx.commit().map_err(storage_error)?;
    debug!(rows = records.len(), columns = schema.len(), "loaded records into table");
    Ok(())
}

pub(crate) fn to_sql_value(value: Option<&Value>) -> SqlValue {
    match value {
        None | Some(Value::Null) => SqlValue::Null,
        Some(Value::Bool(b)) => SqlValue::Integer(i64::from(*b)),
        Some(Value::Number(n)) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or(f64::NAN)),
        },
        Some(Value::String(s)) => SqlValue::Text(s.clone()),
        Some(nested @ (Value::Array(_) | Value::Object(_))) => SqlValue::Text(nested.to_string()),
    }
}

fn storage_error(err: rusqlite::Error) -> AggregateError {
    AggregateError::Storage(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::schema::ColumnType;
    use serde_json::json;

    fn records(values: Value) -> Vec<Record> {
        values
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_object().cloned().unwrap())
            .collect()
    }

    #[test]
    fn test_rows_keep_order_and_nulls() {
        let schema = TableSchema::new([("a", ColumnType::Text), ("b", ColumnType::Real)]).unwrap();
        let conn = Connection::open_in_memory().unwrap();
        let rows = records(json!([{"a": "z", "b": 2}, {"a": "y"}, {"b": 0.5, "ignored": true}]));
        unwrap_into_table(&conn, &schema, &rows).unwrap();

        let mut stmt = conn.prepare("SELECT a, b FROM data ORDER BY rowid").unwrap();
        let got: Vec<(Option<String>, Option<f64>)> = stmt
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap();
        assert_eq!(
            got,
            vec![
                (Some("z".to_string()), Some(2.0)),
                (Some("y".to_string()), None),
                (None, Some(0.5)),
            ]
        );
    }

    #[test]
    fn test_recreates_existing_table() {
        let schema = TableSchema::new([("a", ColumnType::Text)]).unwrap();
        let conn = Connection::open_in_memory().unwrap();
        unwrap_into_table(&conn, &schema, &records(json!([{"a": "1"}, {"a": "2"}]))).unwrap();
        unwrap_into_table(&conn, &schema, &records(json!([{"a": "3"}]))).unwrap();
        let count: i64 = conn.query_row("SELECT count(*) FROM data", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_value_conversion() {
        assert_eq!(to_sql_value(Some(&json!(true))), SqlValue::Integer(1));
        assert_eq!(to_sql_value(Some(&json!(-7))), SqlValue::Integer(-7));
        assert_eq!(to_sql_value(Some(&json!(1.25))), SqlValue::Real(1.25));
        assert_eq!(
            to_sql_value(Some(&json!({"k": 1}))),
            SqlValue::Text("{\"k\":1}".to_string())
        );
        assert_eq!(to_sql_value(None), SqlValue::Null);
    }

    #[test]
    fn test_numeric_strings_follow_column_affinity() {
        let schema = TableSchema::new([("effect", ColumnType::Real)]).unwrap();
        let table = EphemeralTable::with_records(schema, &records(json!([{"effect": "-1500"}]))).unwrap();
        assert_eq!(table.row_count(), 1);
        let effect: f64 = table
            .conn
            .query_row("SELECT effect FROM data", [], |r| r.get(0))
            .unwrap();
        assert_eq!(effect, -1500.0);
    }
}
