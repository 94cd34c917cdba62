//! Reads against application tables of the primary store.
//!
//! Rows are returned as `jsonb` objects so the sync core can handle every table with a single
//! row representation, whatever its column types.

use chrono::{DateTime, Utc};
use pg_escape::quote_identifier;
use serde_json::Value;
use sqlx::postgres::PgArguments;
use sqlx::query::QueryScalar;
use sqlx::{PgPool, Postgres};

/// Quotes a possibly schema-qualified table name (`schema.table` or `table`).
pub fn quote_table_name(table: &str) -> String {
    table
        .split('.')
        .map(|part| quote_identifier(part).into_owned())
        .collect::<Vec<_>>()
        .join(".")
}

/// Returns rows whose `timestamp_column` is newer than `since`, oldest first.
///
/// Without a watermark every row is returned.
pub async fn fetch_rows_changed_since(
    pool: &PgPool,
    table: &str,
    timestamp_column: &str,
    since: Option<DateTime<Utc>>,
) -> sqlx::Result<Vec<Value>> {
    let sql = format!(
        r#"
        select to_jsonb(t) as row
        from {table} t
        where $1::timestamptz is null or t.{column} > $1
        order by t.{column}
        "#,
        table = quote_table_name(table),
        column = quote_identifier(timestamp_column),
    );

    sqlx::query_scalar(&sql).bind(since).fetch_all(pool).await
}

pub async fn count_rows(pool: &PgPool, table: &str) -> sqlx::Result<i64> {
    let sql = format!("select count(*) from {}", quote_table_name(table));

    sqlx::query_scalar(&sql).fetch_one(pool).await
}

/// Returns the distinct non-null values of `column`, used as identity sets for orphan scans.
pub async fn fetch_column_values(
    pool: &PgPool,
    table: &str,
    column: &str,
) -> sqlx::Result<Vec<Value>> {
    let sql = format!(
        "select distinct to_jsonb(t.{column}) from {table} t where t.{column} is not null",
        table = quote_table_name(table),
        column = quote_identifier(column),
    );

    sqlx::query_scalar(&sql).fetch_all(pool).await
}

/// Runs a native query and returns each result row as a json object.
///
/// Parameters are bound positionally according to their json type.
pub async fn run_query(pool: &PgPool, text: &str, params: &[Value]) -> sqlx::Result<Vec<Value>> {
    let sql = format!("select to_jsonb(q) from ({text}) q");
    let mut query = sqlx::query_scalar(&sql);
    for param in params {
        query = bind_json(query, param);
    }

    query.fetch_all(pool).await
}

fn bind_json<'q>(
    query: QueryScalar<'q, Postgres, Value, PgArguments>,
    param: &Value,
) -> QueryScalar<'q, Postgres, Value, PgArguments> {
    match param {
        Value::Null => query.bind(Option::<String>::None),
        Value::Bool(value) => query.bind(*value),
        Value::Number(number) => match number.as_i64() {
            Some(value) => query.bind(value),
            None => query.bind(number.as_f64()),
        },
        Value::String(value) => query.bind(value.clone()),
        other => query.bind(other.clone()),
    }
}
