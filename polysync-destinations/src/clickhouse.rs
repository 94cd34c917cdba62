use async_trait::async_trait;
use clickhouse::Client;
use clickhouse::query::Query;
use metrics::{Unit, describe_histogram, histogram};
use polysync::clients::{BatchWriter, QueryClient, TableStats};
use polysync::error::{ErrorKind, SyncResult};
use polysync::transform::value_to_row;
use polysync::types::Row;
use polysync::{bail, sync_error};
use polysync_config::shared::ClickHouseConfig;
use secrecy::ExposeSecret;
use serde_json::Value;
use std::sync::{Arc, Once};
use std::time::Instant;

static REGISTER_METRICS: Once = Once::new();

/// Duration of a single JSONEachRow insert, from request to server acknowledgement.
/// Labels: `table`.
pub const POLYSYNC_CH_INSERT_DURATION_SECONDS: &str = "polysync_ch_insert_duration_seconds";

fn register_metrics() {
    REGISTER_METRICS.call_once(|| {
        describe_histogram!(
            POLYSYNC_CH_INSERT_DURATION_SECONDS,
            Unit::Seconds,
            "Duration of JSONEachRow inserts sent to ClickHouse, labeled by table"
        );
    });
}

/// Quotes an identifier with backticks, qualifying `database.table` names part by part.
fn quote_identifier(name: &str) -> String {
    name.split('.')
        .map(|part| format!("`{}`", part.replace('\\', "\\\\").replace('`', "\\`")))
        .collect::<Vec<_>>()
        .join(".")
}

/// Encodes rows as newline-delimited json objects.
///
/// `?` is the bind placeholder of the client's query builder, so literal question marks in
/// the payload are doubled.
fn encode_json_each_row(rows: &[Row]) -> SyncResult<String> {
    let mut body = String::new();
    for row in rows {
        body.push_str(&serde_json::to_string(row)?.replace('?', "??"));
        body.push('\n');
    }

    Ok(body)
}

fn decode_json_each_row(bytes: &[u8]) -> SyncResult<Vec<Row>> {
    bytes
        .split(|byte| *byte == b'\n')
        .filter(|line| !line.is_empty())
        .map(|line| value_to_row(serde_json::from_slice(line)?))
        .collect()
}

fn bind_json(query: Query, param: &Value) -> Query {
    match param {
        Value::Null => query.bind(Option::<String>::None),
        Value::Bool(value) => query.bind(*value),
        Value::Number(number) => match number.as_i64() {
            Some(value) => query.bind(value),
            None => query.bind(number.as_f64()),
        },
        Value::String(value) => query.bind(value.as_str()),
        other => query.bind(other.to_string()),
    }
}

/// Columnar store adapter over the ClickHouse http interface.
///
/// Rows travel as `JSONEachRow`, so the destination table decides the column types and the
/// sync core never needs a typed schema.
#[derive(Clone)]
pub struct ClickHouseStore {
    inner: Arc<Client>,
}

impl ClickHouseStore {
    pub fn new(config: &ClickHouseConfig) -> Self {
        register_metrics();

        let mut client = Client::default()
            .with_url(&config.url)
            .with_user(&config.user)
            .with_database(&config.database);

        if let Some(password) = &config.password {
            client = client.with_password(password.expose_secret());
        }

        Self {
            inner: Arc::new(client),
        }
    }

    pub async fn ping(&self) -> SyncResult<()> {
        self.inner
            .query("SELECT 1")
            .fetch_one::<u8>()
            .await
            .map(|_| ())
            .map_err(|err| {
                sync_error!(
                    ErrorKind::DestinationConnectionFailed,
                    "ClickHouse connectivity check failed",
                    err.to_string()
                )
            })
    }

    async fn fetch_rows(&self, query: Query) -> SyncResult<Vec<Row>> {
        let mut cursor = query.fetch_bytes("JSONEachRow").map_err(|err| {
            sync_error!(
                ErrorKind::DestinationQueryFailed,
                "ClickHouse query failed",
                err.to_string()
            )
        })?;
        let bytes = cursor.collect().await.map_err(|err| {
            sync_error!(
                ErrorKind::DestinationQueryFailed,
                "ClickHouse query failed",
                err.to_string()
            )
        })?;

        decode_json_each_row(&bytes)
    }
}

#[async_trait]
impl BatchWriter for ClickHouseStore {
    async fn insert_batch(&self, target: &str, rows: Vec<Row>) -> SyncResult<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let sql = format!(
            "INSERT INTO {} FORMAT JSONEachRow\n{}",
            quote_identifier(target),
            encode_json_each_row(&rows)?
        );

        let started = Instant::now();
        self.inner.query(&sql).execute().await.map_err(|err| {
            sync_error!(
                ErrorKind::DestinationWriteFailed,
                "ClickHouse insert failed",
                format!("failed to insert {} rows into `{target}`: {err}", rows.len())
            )
        })?;
        histogram!(POLYSYNC_CH_INSERT_DURATION_SECONDS, "table" => target.to_string())
            .record(started.elapsed().as_secs_f64());

        Ok(())
    }
}

#[async_trait]
impl TableStats for ClickHouseStore {
    async fn count_rows(&self, table: &str) -> SyncResult<u64> {
        self.inner
            .query(&format!("SELECT count() FROM {}", quote_identifier(table)))
            .fetch_one::<u64>()
            .await
            .map_err(|err| {
                sync_error!(
                    ErrorKind::DestinationQueryFailed,
                    "ClickHouse count failed",
                    format!("table `{table}`: {err}")
                )
            })
    }

    async fn identity_values(&self, table: &str, column: &str) -> SyncResult<Vec<Value>> {
        let column = quote_identifier(column);
        let sql = format!(
            "SELECT DISTINCT {column} AS value FROM {} WHERE {column} IS NOT NULL",
            quote_identifier(table)
        );

        let rows = self.fetch_rows(self.inner.query(&sql)).await?;
        Ok(rows
            .into_iter()
            .filter_map(|mut row| row.remove("value"))
            .collect())
    }
}

#[async_trait]
impl QueryClient for ClickHouseStore {
    async fn query(&self, text: &str, params: &[Value]) -> SyncResult<Vec<Row>> {
        let placeholders = text.matches('?').count() - 2 * text.matches("??").count();
        if placeholders != params.len() {
            bail!(
                ErrorKind::InvalidData,
                "Query parameters do not match its placeholders",
                format!("{placeholders} placeholders, {} parameters", params.len())
            );
        }

        let query = params
            .iter()
            .fold(self.inner.query(text), |query, param| bind_json(query, param));

        self.fetch_rows(query).await
    }
}
