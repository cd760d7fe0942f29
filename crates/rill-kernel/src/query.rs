//! Query execution for SQL cells.
//!
//! Placeholders are rewritten to positional parameters before this module is
//! involved; it receives the final SQL plus the bind values resolved from
//! the notebook namespace, runs the query over a fresh connection, and
//! serializes the rows into a table bundle.

use rust_decimal::prelude::ToPrimitive;
use serde_json::Value;
use sqlx::postgres::{PgConnection, PgRow};
use sqlx::{Column, Connection, Row, TypeInfo};

use rill_core::error::Error;
use rill_core::ipc::KernelErrorKind;
use rill_core::model::Output;

/// Soft cap on rows returned to the client.
pub const MAX_ROWS: usize = 1000;

/// A value bound to a positional query parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum BindValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
    Json(Value),
}

/// Map a namespace value onto the closest parameter type.
pub fn bind_value(value: Value) -> BindValue {
    match value {
        Value::Number(n) if n.is_i64() => BindValue::Int(n.as_i64().unwrap_or_default()),
        Value::Number(n) => BindValue::Float(n.as_f64().unwrap_or_default()),
        Value::Bool(b) => BindValue::Bool(b),
        Value::String(s) => BindValue::Text(s),
        other => BindValue::Json(other),
    }
}

/// Result of a successful query.
#[derive(Debug)]
pub struct QueryOutcome {
    pub stdout: String,
    pub outputs: Vec<Output>,
}

/// Executes SQL cells against the notebook's configured connection.
pub struct QueryExecutor {
    connection_string: Option<String>,
    runtime: tokio::runtime::Runtime,
}

impl QueryExecutor {
    pub fn new() -> Result<Self, Error> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::Runtime(format!("failed to build query runtime: {e}")))?;
        Ok(Self {
            connection_string: None,
            runtime,
        })
    }

    pub fn set_connection_string(&mut self, connection_string: String) {
        self.connection_string = Some(connection_string);
    }

    pub fn is_configured(&self) -> bool {
        self.connection_string.is_some()
    }

    /// Run a rewritten query with its bind values.
    pub fn execute(
        &self,
        sql: &str,
        binds: Vec<BindValue>,
    ) -> Result<QueryOutcome, (KernelErrorKind, String)> {
        let Some(connection_string) = &self.connection_string else {
            return Err((
                KernelErrorKind::BackendNotConfigured,
                Error::BackendNotConfigured.to_string(),
            ));
        };
        self.runtime
            .block_on(run_query(connection_string, sql, binds))
            .map_err(|message| (KernelErrorKind::RuntimeError, message))
    }
}

async fn run_query(
    connection_string: &str,
    sql: &str,
    binds: Vec<BindValue>,
) -> Result<QueryOutcome, String> {
    let mut conn = PgConnection::connect(connection_string)
        .await
        .map_err(|e| format!("ConnectionError: {e}"))?;

    let mut query = sqlx::query(sql);
    for bind in binds {
        query = match bind {
            BindValue::Int(v) => query.bind(v),
            BindValue::Float(v) => query.bind(v),
            BindValue::Bool(v) => query.bind(v),
            BindValue::Text(v) => query.bind(v),
            BindValue::Json(v) => query.bind(v),
        };
    }

    let rows = query
        .fetch_all(&mut conn)
        .await
        .map_err(|e| format!("{}: {e}", error_label(&e)))?;
    let _ = conn.close().await;

    if rows.is_empty() {
        return Ok(QueryOutcome {
            stdout: "Query returned 0 rows".to_string(),
            outputs: Vec::new(),
        });
    }

    let columns: Vec<Value> = rows[0]
        .columns()
        .iter()
        .map(|column| Value::String(column.name().to_string()))
        .collect();
    let total = rows.len();
    let serialized: Vec<Value> = rows
        .iter()
        .take(MAX_ROWS)
        .map(|row| Value::Array(decode_row(row)))
        .collect();

    Ok(QueryOutcome {
        stdout: String::new(),
        outputs: vec![Output::table(
            columns,
            serialized,
            truncation_notice(total),
        )],
    })
}

/// Non-empty when the row count exceeded the soft cap.
pub fn truncation_notice(total: usize) -> String {
    if total > MAX_ROWS {
        format!("(Showing first {MAX_ROWS} of {total} rows)")
    } else {
        String::new()
    }
}

fn error_label(error: &sqlx::Error) -> &'static str {
    match error {
        sqlx::Error::Database(_) => "DatabaseError",
        sqlx::Error::RowNotFound => "RowNotFound",
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => "DecodeError",
        _ => "QueryError",
    }
}

fn decode_row(row: &PgRow) -> Vec<Value> {
    (0..row.columns().len())
        .map(|i| decode_column(row, i))
        .collect()
}

/// Decode one column to JSON, normalizing temporal values to ISO-8601
/// strings and arbitrary-precision decimals to floating point (string when
/// out of range). Unsupported types decode as null.
fn decode_column(row: &PgRow, i: usize) -> Value {
    let type_name = row.columns()[i].type_info().name();
    match type_name {
        "BOOL" => json_opt(row.try_get::<Option<bool>, _>(i).ok().flatten()),
        "INT2" => json_opt(
            row.try_get::<Option<i16>, _>(i)
                .ok()
                .flatten()
                .map(i64::from),
        ),
        "INT4" => json_opt(
            row.try_get::<Option<i32>, _>(i)
                .ok()
                .flatten()
                .map(i64::from),
        ),
        "INT8" => json_opt(row.try_get::<Option<i64>, _>(i).ok().flatten()),
        "FLOAT4" => float_value(
            row.try_get::<Option<f32>, _>(i)
                .ok()
                .flatten()
                .map(f64::from),
        ),
        "FLOAT8" => float_value(row.try_get::<Option<f64>, _>(i).ok().flatten()),
        "NUMERIC" => match row
            .try_get::<Option<rust_decimal::Decimal>, _>(i)
            .ok()
            .flatten()
        {
            Some(decimal) => match decimal.to_f64() {
                Some(f) => float_value(Some(f)),
                None => Value::String(decimal.to_string()),
            },
            None => Value::Null,
        },
        "TEXT" | "VARCHAR" | "CHAR" | "BPCHAR" | "NAME" => {
            json_opt(row.try_get::<Option<String>, _>(i).ok().flatten())
        }
        "DATE" => json_opt(
            row.try_get::<Option<chrono::NaiveDate>, _>(i)
                .ok()
                .flatten()
                .map(|d| d.to_string()),
        ),
        "TIME" => json_opt(
            row.try_get::<Option<chrono::NaiveTime>, _>(i)
                .ok()
                .flatten()
                .map(|t| t.to_string()),
        ),
        "TIMESTAMP" => json_opt(
            row.try_get::<Option<chrono::NaiveDateTime>, _>(i)
                .ok()
                .flatten()
                .map(|dt| dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
        ),
        "TIMESTAMPTZ" => json_opt(
            row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(i)
                .ok()
                .flatten()
                .map(|dt| dt.to_rfc3339()),
        ),
        "UUID" => json_opt(
            row.try_get::<Option<sqlx::types::Uuid>, _>(i)
                .ok()
                .flatten()
                .map(|u| u.to_string()),
        ),
        "JSON" | "JSONB" => row
            .try_get::<Option<Value>, _>(i)
            .ok()
            .flatten()
            .unwrap_or(Value::Null),
        _ => {
            // Last resort: many exotic types still decode as text.
            row.try_get::<Option<String>, _>(i)
                .ok()
                .flatten()
                .map(Value::String)
                .unwrap_or(Value::Null)
        }
    }
}

fn json_opt<T: Into<Value>>(value: Option<T>) -> Value {
    value.map(Into::into).unwrap_or(Value::Null)
}

fn float_value(value: Option<f64>) -> Value {
    value
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_value_mapping() {
        assert_eq!(bind_value(serde_json::json!(42)), BindValue::Int(42));
        assert_eq!(bind_value(serde_json::json!(2.5)), BindValue::Float(2.5));
        assert_eq!(bind_value(serde_json::json!(true)), BindValue::Bool(true));
        assert_eq!(
            bind_value(serde_json::json!("s")),
            BindValue::Text("s".to_string())
        );
        assert_eq!(
            bind_value(serde_json::json!([1, 2])),
            BindValue::Json(serde_json::json!([1, 2]))
        );
    }

    #[test]
    fn test_unconfigured_backend_is_an_error() {
        let executor = QueryExecutor::new().unwrap();
        let result = executor.execute("SELECT 1", Vec::new());
        let (kind, message) = result.unwrap_err();
        assert_eq!(kind, KernelErrorKind::BackendNotConfigured);
        assert!(message.contains("not configured"));
    }

    #[test]
    fn test_truncation_notice() {
        assert_eq!(truncation_notice(MAX_ROWS), "");
        assert_eq!(
            truncation_notice(MAX_ROWS + 5),
            "(Showing first 1000 of 1005 rows)"
        );
    }

    #[test]
    #[ignore = "Requires a live PostgreSQL at RILL_TEST_DATABASE_URL"]
    fn test_select_with_positional_parameter() {
        let url = std::env::var("RILL_TEST_DATABASE_URL").unwrap();
        let mut executor = QueryExecutor::new().unwrap();
        executor.set_connection_string(url);

        let outcome = executor
            .execute("SELECT $1 AS id", vec![BindValue::Int(42)])
            .unwrap();
        assert_eq!(outcome.outputs.len(), 1);
        let data = &outcome.outputs[0].data;
        assert_eq!(data["columns"][0], "id");
        assert_eq!(data["rows"][0][0], 42);
    }
}
