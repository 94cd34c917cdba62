use futures::future::join_all;
use metrics::counter;
use polysync_config::shared::FederatedConfig;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::bail;
use crate::clients::{QueryClient, VectorSearch};
use crate::error::{ErrorKind, SyncResult};
use crate::federated::combine::combine_rows;
use crate::metrics::{POLYSYNC_FEDERATED_STORE_FAILURES_TOTAL, STORE_LABEL};
use crate::types::{
    FederatedQueryResult, FederatedQuerySpec, FederatedTarget, FederatedWarning, Row,
    TargetRequest,
};

/// A store reachable by federated queries.
#[derive(Clone)]
pub enum FederatedStore {
    Query(Arc<dyn QueryClient>),
    Vector(Arc<dyn VectorSearch>),
}

impl fmt::Debug for FederatedStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Query(_) => f.write_str("Query"),
            Self::Vector(_) => f.write_str("Vector"),
        }
    }
}

/// Runs a query against several stores at once and combines what they answer.
///
/// Each store gets its own timeout. A store that fails, times out or is unknown contributes a
/// warning instead of rows; the other stores still answer.
#[derive(Debug, Clone)]
pub struct FederatedExecutor {
    stores: HashMap<String, FederatedStore>,
    store_timeout: Duration,
    identity_key: String,
    timestamp_key: String,
}

impl FederatedExecutor {
    pub fn new(config: &FederatedConfig) -> Self {
        Self {
            stores: HashMap::new(),
            store_timeout: Duration::from_millis(config.store_timeout_ms),
            identity_key: config.identity_key.clone(),
            timestamp_key: config.timestamp_key.clone(),
        }
    }

    pub fn with_query_store(mut self, name: impl Into<String>, client: Arc<dyn QueryClient>) -> Self {
        self.stores.insert(name.into(), FederatedStore::Query(client));
        self
    }

    pub fn with_vector_store(
        mut self,
        name: impl Into<String>,
        client: Arc<dyn VectorSearch>,
    ) -> Self {
        self.stores.insert(name.into(), FederatedStore::Vector(client));
        self
    }

    pub async fn run_federated(&self, spec: &FederatedQuerySpec) -> SyncResult<FederatedQueryResult> {
        if spec.targets.is_empty() {
            bail!(
                ErrorKind::InvalidData,
                "Federated query has no target store"
            );
        }

        let started = Instant::now();
        let answers = join_all(spec.targets.iter().map(|target| async move {
            let answer = match timeout(self.store_timeout, self.query_target(spec, target)).await {
                Ok(result) => result,
                Err(elapsed) => Err(elapsed.into()),
            };
            (target, answer)
        }))
        .await;

        let mut sources_queried = Vec::new();
        let mut warnings = Vec::new();
        let mut row_sets = Vec::with_capacity(answers.len());
        for (target, answer) in answers {
            match answer {
                Ok(rows) => {
                    debug!(store = %target.store, rows = rows.len(), "store answered federated query");
                    sources_queried.push(target.store.clone());
                    row_sets.push(rows);
                }
                Err(err) => {
                    warn!(store = %target.store, error = %err.summary(), "store failed federated query");
                    counter!(POLYSYNC_FEDERATED_STORE_FAILURES_TOTAL, STORE_LABEL => target.store.clone())
                        .increment(1);
                    warnings.push(FederatedWarning {
                        store: target.store.clone(),
                        message: err.summary(),
                    });
                }
            }
        }

        let rows = combine_rows(spec.mode, row_sets, &self.identity_key, &self.timestamp_key);

        Ok(FederatedQueryResult {
            row_count: rows.len(),
            rows,
            sources_queried,
            elapsed_ms: started.elapsed().as_millis() as u64,
            warnings,
        })
    }

    async fn query_target(
        &self,
        spec: &FederatedQuerySpec,
        target: &FederatedTarget,
    ) -> SyncResult<Vec<Row>> {
        let Some(store) = self.stores.get(&target.store) else {
            bail!(
                ErrorKind::StoreNotFound,
                "Unknown federated store",
                format!("store `{}` is not registered", target.store)
            );
        };

        match (store, &target.request) {
            (FederatedStore::Query(client), TargetRequest::Shared) => {
                client.query(&spec.text, &spec.params).await
            }
            (FederatedStore::Query(client), TargetRequest::Query { text, params }) => {
                client.query(text, params).await
            }
            (
                FederatedStore::Vector(client),
                TargetRequest::Similarity {
                    collection,
                    vector,
                    limit,
                },
            ) => client.search(collection, vector, *limit).await,
            (store, request) => {
                bail!(
                    ErrorKind::InvalidData,
                    "Request is not supported by the store",
                    format!("{store:?} store `{}` cannot run {request:?}", target.store)
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::memory::{MemoryTableStore, MemoryVectorStore};
    use crate::test_utils::wrappers::{DelayedQueryClient, FailingQueryClient};
    use crate::types::CombineMode;
    use serde_json::json;

    fn row(value: serde_json::Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    async fn table_store(rows: Vec<Row>) -> Arc<MemoryTableStore> {
        let store = MemoryTableStore::new();
        store.seed("users", rows).await;
        Arc::new(store)
    }

    fn executor() -> FederatedExecutor {
        FederatedExecutor::new(&FederatedConfig {
            store_timeout_ms: 100,
            ..Default::default()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn slow_store_degrades_to_a_warning() {
        let first = table_store(vec![row(json!({"id": 1}))]).await;
        let second = table_store(vec![row(json!({"id": 2}))]).await;
        let third = table_store(vec![row(json!({"id": 3}))]).await;

        let executor = executor()
            .with_query_store("first", first)
            .with_query_store(
                "second",
                Arc::new(DelayedQueryClient::new(second, Duration::from_secs(5))),
            )
            .with_query_store("third", third);

        let spec = FederatedQuerySpec::new(
            "users",
            vec![
                FederatedTarget::store("first"),
                FederatedTarget::store("second"),
                FederatedTarget::store("third"),
            ],
            CombineMode::Union,
        );

        let result = executor.run_federated(&spec).await.unwrap();

        let ids: Vec<_> = result.rows.iter().map(|row| row["id"].clone()).collect();
        assert_eq!(ids, vec![json!(1), json!(3)]);
        assert_eq!(result.row_count, 2);
        assert_eq!(result.sources_queried, vec!["first", "third"]);
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.warnings[0].store, "second");
    }

    #[tokio::test]
    async fn failures_and_unknown_stores_become_warnings() {
        let executor = executor()
            .with_query_store("broken", Arc::new(FailingQueryClient::new()))
            .with_query_store("users", table_store(vec![row(json!({"id": 1}))]).await);

        let spec = FederatedQuerySpec::new(
            "users",
            vec![
                FederatedTarget::store("broken"),
                FederatedTarget::store("missing"),
                FederatedTarget::store("users"),
            ],
            CombineMode::Union,
        );

        let result = executor.run_federated(&spec).await.unwrap();

        assert_eq!(result.row_count, 1);
        let stores: Vec<_> = result.warnings.iter().map(|w| w.store.as_str()).collect();
        assert_eq!(stores, vec!["broken", "missing"]);
    }

    #[tokio::test]
    async fn similarity_targets_join_with_query_targets() {
        let vectors = MemoryVectorStore::new();
        vectors
            .insert("products", vec![1.0, 0.0], row(json!({"id": 7, "title": "lamp"})))
            .await;
        vectors
            .insert("products", vec![0.0, 1.0], row(json!({"id": 8, "title": "desk"})))
            .await;
        let prices = table_store(vec![row(json!({"id": 7, "price": 30}))]).await;

        let executor = executor()
            .with_vector_store("vectors", Arc::new(vectors))
            .with_query_store("prices", prices);

        let spec = FederatedQuerySpec::new(
            "users",
            vec![
                FederatedTarget::similarity("vectors", "products", vec![1.0, 0.1], 1),
                FederatedTarget::store("prices"),
            ],
            CombineMode::Join,
        );

        let result = executor.run_federated(&spec).await.unwrap();

        assert_eq!(result.row_count, 1);
        assert_eq!(result.rows[0]["title"], json!("lamp"));
        assert_eq!(result.rows[0]["price"], json!(30));
    }

    #[tokio::test]
    async fn mismatched_request_is_a_warning() {
        let executor = executor().with_query_store("users", table_store(Vec::new()).await);
        let spec = FederatedQuerySpec::new(
            "users",
            vec![FederatedTarget::similarity("users", "c", vec![1.0], 3)],
            CombineMode::Union,
        );

        let result = executor.run_federated(&spec).await.unwrap();
        assert!(result.sources_queried.is_empty());
        assert_eq!(result.warnings.len(), 1);
    }

    #[tokio::test]
    async fn query_without_targets_is_rejected() {
        let spec = FederatedQuerySpec::new("users", Vec::new(), CombineMode::Union);
        let err = executor().run_federated(&spec).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }
}
