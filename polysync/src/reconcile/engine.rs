use chrono::Utc;
use metrics::gauge;
use polysync_config::shared::{ReconciliationConfig, ReconciliationPairConfig};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::bail;
use crate::clients::TableStats;
use crate::conversions::identity::identity_key;
use crate::error::{ErrorKind, SyncError, SyncResult};
use crate::metrics::{POLYSYNC_RECONCILIATION_PERCENT_DIFF, TABLE_PAIR_LABEL};
use crate::store::state::SyncStateStore;
use crate::types::ReconciliationResult;

/// Drift of `destination_count` relative to `source_count`, in percent.
///
/// An empty source is fully consistent with an empty destination and fully drifted from
/// anything else.
pub fn percent_diff(source_count: u64, destination_count: u64) -> f64 {
    if source_count == 0 {
        return if destination_count == 0 { 0.0 } else { 100.0 };
    }

    source_count.abs_diff(destination_count) as f64 / source_count as f64 * 100.0
}

/// Maximum number of orphan keys kept as samples in a result.
pub const MAX_ORPHAN_SAMPLES: usize = 100;

/// Destination identities that match no source identity.
///
/// Returns the first [`MAX_ORPHAN_SAMPLES`] orphans in destination order and the exact
/// number of orphans.
fn find_orphans(source_keys: Vec<Value>, destination_keys: Vec<Value>) -> (Vec<Value>, u64) {
    let known: HashSet<String> = source_keys.iter().filter_map(identity_key).collect();

    let mut samples = Vec::new();
    let mut count = 0;
    for value in destination_keys {
        if identity_key(&value).is_none_or(|key| known.contains(&key)) {
            continue;
        }

        count += 1;
        if samples.len() < MAX_ORPHAN_SAMPLES {
            samples.push(value);
        }
    }

    (samples, count)
}

/// Results of one validation of every configured pair.
///
/// Pairs that could not be compared leave an error behind, the others still report.
#[derive(Debug, Default)]
pub struct ConsistencyReport {
    pub results: Vec<ReconciliationResult>,
    pub errors: Vec<SyncError>,
}

impl ConsistencyReport {
    /// Number of compared pairs that are out of tolerance.
    pub fn drifted(&self) -> usize {
        self.results
            .iter()
            .filter(|result| !result.within_tolerance)
            .count()
    }

    /// Returns the results, or every collected error if any pair could not be compared.
    pub fn into_result(self) -> SyncResult<Vec<ReconciliationResult>> {
        if !self.errors.is_empty() {
            return Err(self.errors.into());
        }

        Ok(self.results)
    }
}

/// Compares table pairs and records every observation.
///
/// Reconciliation only reads; drift and orphans are reported in results, never repaired.
/// Source counts may be read while the sync is still catching up, so a result can show
/// drift that the next batch sync resolves.
#[derive(Clone)]
pub struct ReconciliationEngine<S> {
    state: S,
    source: Arc<dyn TableStats>,
    destinations: HashMap<String, Arc<dyn TableStats>>,
    config: ReconciliationConfig,
}

impl<S> ReconciliationEngine<S>
where
    S: SyncStateStore + Clone + Send + Sync + 'static,
{
    pub fn new(state: S, source: Arc<dyn TableStats>, config: ReconciliationConfig) -> Self {
        Self {
            state,
            source,
            destinations: HashMap::new(),
            config,
        }
    }

    pub fn with_destination(
        mut self,
        name: impl Into<String>,
        destination: Arc<dyn TableStats>,
    ) -> Self {
        self.destinations.insert(name.into(), destination);
        self
    }

    pub fn config(&self) -> &ReconciliationConfig {
        &self.config
    }

    /// Validates every configured pair.
    ///
    /// Pairs that could not be compared do not prevent the others from being recorded. The
    /// report carries the results of the compared pairs next to the errors of the others.
    pub async fn validate_consistency(&self) -> ConsistencyReport {
        let mut report = ConsistencyReport {
            results: Vec::with_capacity(self.config.pairs.len()),
            errors: Vec::new(),
        };

        for pair in &self.config.pairs {
            match self.validate_pair(pair).await {
                Ok(result) => report.results.push(result),
                Err(err) => {
                    error!(
                        source_table = %pair.source_table,
                        destination_table = %pair.destination_table,
                        error = %err.summary(),
                        "reconciliation of table pair failed"
                    );
                    report.errors.push(err);
                }
            }
        }

        report
    }

    /// Compares one pair and appends the result to the reconciliation history.
    pub async fn validate_pair(
        &self,
        pair: &ReconciliationPairConfig,
    ) -> SyncResult<ReconciliationResult> {
        let Some(destination) = self.destinations.get(&pair.destination) else {
            bail!(
                ErrorKind::StoreNotFound,
                "Unknown reconciliation destination",
                format!("destination `{}` is not registered", pair.destination)
            );
        };

        let source_count = self.source.count_rows(&pair.source_table).await?;
        let destination_count = destination.count_rows(&pair.destination_table).await?;

        let (orphans, orphan_count) = if pair.scan_orphans {
            let source_keys = self
                .source
                .identity_values(&pair.source_table, &pair.source_key)
                .await?;
            let destination_keys = destination
                .identity_values(&pair.destination_table, &pair.foreign_key)
                .await?;
            find_orphans(source_keys, destination_keys)
        } else {
            (Vec::new(), 0)
        };

        let percent_diff = percent_diff(source_count, destination_count);
        let result = ReconciliationResult {
            source_table: pair.source_table.clone(),
            destination_table: pair.destination_table.clone(),
            source_count,
            destination_count,
            absolute_diff: source_count.abs_diff(destination_count),
            percent_diff,
            orphans,
            orphan_count,
            within_tolerance: percent_diff <= self.config.tolerance_percent && orphan_count == 0,
            observed_at: Utc::now(),
        };

        let table_pair = format!("{}->{}", pair.source_table, pair.destination_table);
        gauge!(POLYSYNC_RECONCILIATION_PERCENT_DIFF, TABLE_PAIR_LABEL => table_pair.clone())
            .set(percent_diff);

        if result.within_tolerance {
            info!(
                table_pair = %table_pair,
                source_count,
                destination_count,
                "table pair is consistent"
            );
        } else {
            warn!(
                table_pair = %table_pair,
                source_count,
                destination_count,
                percent_diff,
                orphan_count,
                tolerance_percent = self.config.tolerance_percent,
                "table pair is out of tolerance"
            );
        }

        self.state.record_reconciliation(result.clone()).await?;

        Ok(result)
    }

    /// Most recent results of a pair, newest first.
    pub async fn history(
        &self,
        source_table: &str,
        destination_table: &str,
        limit: usize,
    ) -> SyncResult<Vec<ReconciliationResult>> {
        self.state
            .reconciliation_history(source_table, destination_table, limit)
            .await
    }
}

impl<S> fmt::Debug for ReconciliationEngine<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconciliationEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
