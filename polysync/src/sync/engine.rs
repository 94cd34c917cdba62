use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use polysync_config::shared::TablePairConfig;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{error, info};

use crate::bail;
use crate::clients::{DestinationStore, SourceStore};
use crate::conversions::timestamp::row_timestamp;
use crate::error::{ErrorKind, SyncError, SyncResult};
#[cfg(feature = "failpoints")]
use crate::failpoints::{SYNC_TABLE_BEFORE_CHUNK_WRITE, sync_fail_point};
use crate::metrics::{
    POLYSYNC_SYNC_ROWS_WRITTEN_TOTAL, POLYSYNC_SYNC_RUN_DURATION_SECONDS, STATE_LABEL,
    TABLE_PAIR_LABEL,
};
use crate::store::state::SyncStateStore;
use crate::sync_error;
use crate::transform::RowTransform;
use crate::types::{Row, SyncRunStatus};

/// A source table copied into a destination table.
#[derive(Debug, Clone)]
pub struct SyncPair {
    pub config: TablePairConfig,
    pub transform: Arc<dyn RowTransform>,
}

impl SyncPair {
    pub fn new(config: TablePairConfig, transform: Arc<dyn RowTransform>) -> Self {
        Self { config, transform }
    }

    pub fn name(&self) -> String {
        self.config.pair_name()
    }
}

/// Returns the value the watermark may advance to once `timestamps[start..end]` is written.
///
/// The watermark must stay below the first timestamp of the next chunk: rows sharing that
/// timestamp would otherwise be skipped forever if the next chunk fails.
fn safe_watermark(
    timestamps: &[DateTime<Utc>],
    start: usize,
    end: usize,
) -> Option<DateTime<Utc>> {
    let written = &timestamps[start..end];
    match timestamps.get(end) {
        None => written.last().copied(),
        Some(next) => written.iter().rev().find(|timestamp| *timestamp < next).copied(),
    }
}

/// Copies rows newer than a persisted watermark from the primary store into destinations.
///
/// Every run is recorded in the state store, whatever its outcome.
#[derive(Clone)]
pub struct BatchSyncEngine<S> {
    state: S,
    source: Arc<dyn SourceStore>,
    destinations: HashMap<String, Arc<dyn DestinationStore>>,
    pairs: Vec<SyncPair>,
}

impl<S> BatchSyncEngine<S>
where
    S: SyncStateStore + Clone + Send + Sync + 'static,
{
    pub fn new(state: S, source: Arc<dyn SourceStore>) -> Self {
        Self {
            state,
            source,
            destinations: HashMap::new(),
            pairs: Vec::new(),
        }
    }

    pub fn with_destination(
        mut self,
        name: impl Into<String>,
        destination: Arc<dyn DestinationStore>,
    ) -> Self {
        self.destinations.insert(name.into(), destination);
        self
    }

    pub fn with_pair(mut self, pair: SyncPair) -> Self {
        self.pairs.push(pair);
        self
    }

    pub fn pairs(&self) -> &[SyncPair] {
        &self.pairs
    }

    /// Syncs every pair whose source is `table`.
    pub async fn sync_table(&self, table: &str, batch_size: usize) -> SyncResult<Vec<SyncRunStatus>> {
        let pairs: Vec<&SyncPair> = self
            .pairs
            .iter()
            .filter(|pair| pair.config.source_table == table)
            .collect();

        if pairs.is_empty() {
            bail!(
                ErrorKind::MissingTableMapping,
                "No sync pair for table",
                format!("table `{table}` has no configured destination")
            );
        }

        let mut runs = Vec::with_capacity(pairs.len());
        for pair in pairs {
            runs.push(self.run_pair(pair, batch_size).await?);
        }

        Ok(runs)
    }

    /// Syncs the pair named `pair_name` (see [`TablePairConfig::pair_name`]).
    pub async fn sync_pair(&self, pair_name: &str, batch_size: usize) -> SyncResult<SyncRunStatus> {
        let Some(pair) = self.pairs.iter().find(|pair| pair.name() == pair_name) else {
            bail!(
                ErrorKind::MissingTableMapping,
                "Unknown sync pair",
                format!("no sync pair named `{pair_name}`")
            );
        };

        self.run_pair(pair, batch_size).await
    }

    /// Syncs every pair one after the other.
    pub async fn sync_all(&self, batch_size: usize) -> SyncResult<Vec<SyncRunStatus>> {
        let mut runs = Vec::with_capacity(self.pairs.len());
        for pair in &self.pairs {
            runs.push(self.run_pair(pair, batch_size).await?);
        }

        Ok(runs)
    }

    /// Runs one pair and records its status.
    ///
    /// Copy failures end up in the returned status; only a failure to record the status is
    /// returned as an error.
    async fn run_pair(&self, pair: &SyncPair, batch_size: usize) -> SyncResult<SyncRunStatus> {
        let pair_name = pair.name();
        let run = SyncRunStatus::start(pair_name.clone());

        let (written, result) = self.copy_rows(pair, &pair_name, batch_size).await;
        let run = match result {
            Ok(()) => {
                info!(table_pair = %pair_name, records = written, "batch sync completed");
                run.complete(written)
            }
            Err(err) => {
                error!(
                    table_pair = %pair_name,
                    records = written,
                    error = %err.summary(),
                    "batch sync failed"
                );
                run.fail(written, vec![err.summary()])
            }
        };

        histogram!(
            POLYSYNC_SYNC_RUN_DURATION_SECONDS,
            TABLE_PAIR_LABEL => pair_name.clone(),
            STATE_LABEL => run.state.as_str()
        )
        .record(run.duration_ms as f64 / 1000.0);

        self.state.record_sync_run(run.clone()).await?;

        Ok(run)
    }

    /// Copies changed rows chunk by chunk. Returns the rows written before any error.
    async fn copy_rows(
        &self,
        pair: &SyncPair,
        pair_name: &str,
        batch_size: usize,
    ) -> (u64, SyncResult<()>) {
        let mut written = 0u64;
        let result = self.copy_chunks(pair, pair_name, batch_size, &mut written).await;

        (written, result)
    }

    async fn copy_chunks(
        &self,
        pair: &SyncPair,
        pair_name: &str,
        batch_size: usize,
        written: &mut u64,
    ) -> SyncResult<()> {
        let config = &pair.config;

        if batch_size == 0 {
            bail!(ErrorKind::ConfigError, "Batch size must be greater than 0");
        }

        let Some(destination) = self.destinations.get(&config.destination) else {
            bail!(
                ErrorKind::StoreNotFound,
                "Unknown sync destination",
                format!("destination `{}` is not registered", config.destination)
            );
        };

        let watermark = self.state.get_watermark(pair_name).await?;
        let rows = self
            .source
            .fetch_changed_since(&config.source_table, &config.timestamp_column, watermark)
            .await?;

        let mut timed_rows: Vec<(DateTime<Utc>, Row)> = rows
            .into_iter()
            .map(|row| Ok((row_timestamp(&row, &config.timestamp_column)?, row)))
            .collect::<SyncResult<_>>()?;
        timed_rows.sort_by_key(|(timestamp, _)| *timestamp);
        let (timestamps, rows): (Vec<_>, Vec<_>) = timed_rows.into_iter().unzip();

        for (index, chunk) in rows.chunks(batch_size).enumerate() {
            let start = index * batch_size;
            let end = start + chunk.len();

            let transformed = chunk
                .iter()
                .map(|row| pair.transform.transform(row))
                .collect::<SyncResult<Vec<_>>>()?;

            self.write_chunk(destination.as_ref(), config, index, transformed)
                .await?;
            *written += chunk.len() as u64;
            counter!(POLYSYNC_SYNC_ROWS_WRITTEN_TOTAL, TABLE_PAIR_LABEL => pair_name.to_string())
                .increment(chunk.len() as u64);

            if let Some(value) = safe_watermark(&timestamps, start, end) {
                self.state.advance_watermark(pair_name, value).await?;
            }
        }

        Ok(())
    }

    async fn write_chunk(
        &self,
        destination: &dyn DestinationStore,
        config: &TablePairConfig,
        index: usize,
        rows: Vec<Row>,
    ) -> SyncResult<()> {
        let write = async {
            #[cfg(feature = "failpoints")]
            sync_fail_point(SYNC_TABLE_BEFORE_CHUNK_WRITE)?;

            destination
                .insert_batch(&config.destination_table, rows)
                .await
        };

        write.await.map_err(|err: SyncError| {
            sync_error!(
                ErrorKind::SyncBatchFailed,
                "Failed to write sync chunk",
                format!(
                    "chunk {index} of {}.{}: {}",
                    config.destination,
                    config.destination_table,
                    err.summary()
                ),
                source: err
            )
        })
    }
}

impl<S> fmt::Debug for BatchSyncEngine<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut destinations: Vec<_> = self.destinations.keys().collect();
        destinations.sort();
        f.debug_struct("BatchSyncEngine")
            .field("pairs", &self.pairs.iter().map(SyncPair::name).collect::<Vec<_>>())
            .field("destinations", &destinations)
            .finish()
    }
}
