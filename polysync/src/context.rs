//! The object owning store clients, configuration and background workers.

use polysync_config::shared::ServiceConfig;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use crate::bail;
use crate::capture::{CaptureInstaller, CaptureProvisioner};
use crate::clients::{DestinationStore, QueryClient, SourceStore, TableStats, VectorSearch};
use crate::concurrency::shutdown::{ShutdownTx, create_shutdown_channel};
use crate::error::{ErrorKind, SyncError, SyncResult};
use crate::federated::FederatedExecutor;
use crate::processor::{ChangeHandler, ChangeProcessor, HandlerRegistry};
use crate::reconcile::ReconciliationEngine;
use crate::store::change_log::ChangeLogStore;
use crate::store::state::SyncStateStore;
use crate::sync::{BatchSyncEngine, SyncPair};
use crate::transform::{RowTransform, TableMapping};
use crate::workers::base::{Worker, WorkerHandle, WorkerType};
use crate::workers::periodic::{
    PeriodicTask, PeriodicWorker, PeriodicWorkerHandle, PeriodicWorkerState,
};
use crate::workers::tasks::{BatchSyncTask, ChangeProcessorTask, ReconciliationTask, RetentionTask};

/// Jitter applied to the change processor poll interval.
const PROCESSOR_JITTER_PERCENT: u8 = 10;

/// Jitter applied to the retention interval.
const RETENTION_JITTER_PERCENT: u8 = 10;

/// Owns the configuration and every store client of a sync service.
///
/// [`SyncContext::start`] provisions change capture and spawns the background workers;
/// [`SyncContext::shutdown_and_wait`] stops them. Federated queries and sagas run on demand
/// through [`SyncContext::federated`] and [`crate::saga::run_saga`].
pub struct SyncContext<S, I> {
    config: Arc<ServiceConfig>,
    store: S,
    provisioner: CaptureProvisioner<I>,
    source: Arc<dyn SourceStore>,
    handlers: HandlerRegistry,
    destinations: HashMap<String, Arc<dyn DestinationStore>>,
    transforms: HashMap<String, Arc<dyn RowTransform>>,
    query_stores: HashMap<String, Arc<dyn QueryClient>>,
    vector_stores: HashMap<String, Arc<dyn VectorSearch>>,
    shutdown_tx: ShutdownTx,
    workers: Vec<PeriodicWorkerHandle>,
    started: bool,
}

impl<S, I> SyncContext<S, I>
where
    S: ChangeLogStore + SyncStateStore + Clone + Send + Sync + 'static,
    I: CaptureInstaller + Send + Sync + 'static,
{
    pub fn new(
        config: ServiceConfig,
        store: S,
        installer: I,
        source: Arc<dyn SourceStore>,
    ) -> Self {
        let (shutdown_tx, _) = create_shutdown_channel();

        Self {
            config: Arc::new(config),
            store,
            provisioner: CaptureProvisioner::new(installer),
            source,
            handlers: HandlerRegistry::new(),
            destinations: HashMap::new(),
            transforms: HashMap::new(),
            query_stores: HashMap::new(),
            vector_stores: HashMap::new(),
            shutdown_tx,
            workers: Vec::new(),
            started: false,
        }
    }

    /// Registers the change handler of a captured table.
    pub fn with_handler(mut self, table: impl Into<String>, handler: Arc<dyn ChangeHandler>) -> Self {
        self.handlers.register(table, handler);
        self
    }

    /// Registers a destination store written by batch sync and compared by reconciliation.
    pub fn with_destination(
        mut self,
        name: impl Into<String>,
        destination: Arc<dyn DestinationStore>,
    ) -> Self {
        self.destinations.insert(name.into(), destination);
        self
    }

    /// Sets the transform of a sync pair, identified by its pair name. Pairs without one
    /// copy rows unchanged.
    pub fn with_transform(
        mut self,
        pair_name: impl Into<String>,
        transform: Arc<dyn RowTransform>,
    ) -> Self {
        self.transforms.insert(pair_name.into(), transform);
        self
    }

    pub fn with_query_store(mut self, name: impl Into<String>, client: Arc<dyn QueryClient>) -> Self {
        self.query_stores.insert(name.into(), client);
        self
    }

    pub fn with_vector_store(
        mut self,
        name: impl Into<String>,
        client: Arc<dyn VectorSearch>,
    ) -> Self {
        self.vector_stores.insert(name.into(), client);
        self
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn provisioner(&self) -> &CaptureProvisioner<I> {
        &self.provisioner
    }

    pub fn shutdown_tx(&self) -> ShutdownTx {
        self.shutdown_tx.clone()
    }

    pub fn processor(&self) -> ChangeProcessor<S> {
        ChangeProcessor::new(
            self.store.clone(),
            self.handlers.clone(),
            self.config.processor.clone(),
        )
    }

    pub fn batch_sync(&self) -> BatchSyncEngine<S> {
        let engine = self
            .destinations
            .iter()
            .fold(
                BatchSyncEngine::new(self.store.clone(), self.source.clone()),
                |engine, (name, destination)| engine.with_destination(name.clone(), destination.clone()),
            );

        self.config.sync.pairs.iter().fold(engine, |engine, pair| {
            let transform = self
                .transforms
                .get(&pair.pair_name())
                .cloned()
                .unwrap_or_else(|| Arc::new(TableMapping::identity()));
            engine.with_pair(SyncPair::new(pair.clone(), transform))
        })
    }

    pub fn reconciliation(&self) -> ReconciliationEngine<S> {
        let source: Arc<dyn TableStats> = self.source.clone();
        self.destinations.iter().fold(
            ReconciliationEngine::new(
                self.store.clone(),
                source,
                self.config.reconciliation.clone(),
            ),
            |engine, (name, destination)| {
                let stats: Arc<dyn TableStats> = destination.clone();
                engine.with_destination(name.clone(), stats)
            },
        )
    }

    /// Builds a federated executor over the registered query and vector stores.
    pub fn federated(&self) -> FederatedExecutor {
        let executor = self
            .query_stores
            .iter()
            .fold(FederatedExecutor::new(&self.config.federated), |executor, (name, client)| {
                executor.with_query_store(name.clone(), client.clone())
            });

        self.vector_stores
            .iter()
            .fold(executor, |executor, (name, client)| {
                executor.with_vector_store(name.clone(), client.clone())
            })
    }

    /// Returns the state of every running worker.
    pub fn worker_states(&self) -> Vec<(WorkerType, PeriodicWorkerState)> {
        self.workers
            .iter()
            .map(|handle| (handle.worker_type(), handle.state()))
            .collect()
    }

    /// Validates the configuration, provisions capture and spawns the background workers.
    ///
    /// A capture provisioning failure is returned before any worker starts.
    pub async fn start(&mut self) -> SyncResult<()> {
        if self.started {
            bail!(ErrorKind::InvalidState, "Sync context was already started");
        }

        self.config.validate()?;
        self.check_destinations()?;

        let provisioned = self.provisioner.provision_all(&self.config.capture).await?;
        info!(tables = provisioned, "change capture provisioned");

        self.started = true;
        let config = self.config.clone();

        let task = ChangeProcessorTask::new(self.processor(), config.processor.batch_size);
        self.spawn(task, config.processor.poll_interval_ms, PROCESSOR_JITTER_PERCENT)
            .await?;

        if !config.sync.pairs.is_empty() {
            let task = BatchSyncTask::new(self.batch_sync(), config.sync.batch_size);
            self.spawn(task, config.sync.interval_ms, config.sync.jitter_percent)
                .await?;
        }

        if !config.reconciliation.pairs.is_empty() {
            let task = ReconciliationTask::new(self.reconciliation());
            self.spawn(
                task,
                config.reconciliation.interval_ms,
                config.reconciliation.jitter_percent,
            )
            .await?;
        }

        if config.retention.enabled {
            let task = RetentionTask::new(self.store.clone(), config.retention.max_age_hours);
            self.spawn(task, config.retention.interval_ms, RETENTION_JITTER_PERCENT)
                .await?;
        }

        info!(workers = self.workers.len(), "sync context started");

        Ok(())
    }

    /// Signals every worker to stop after its current run.
    pub fn shutdown(&self) {
        info!("shutting down sync context");
        self.shutdown_tx.shutdown();
    }

    /// Waits for every worker to stop, returning their errors together.
    pub async fn wait(self) -> SyncResult<()> {
        let mut errors: Vec<SyncError> = Vec::new();
        for handle in self.workers {
            let worker_type = handle.worker_type();
            if let Err(err) = handle.wait().await {
                error!(worker = %worker_type, error = %err.summary(), "worker stopped with an error");
                errors.push(err);
            }
        }

        if !errors.is_empty() {
            return Err(errors.into());
        }

        info!("sync context stopped");

        Ok(())
    }

    pub async fn shutdown_and_wait(self) -> SyncResult<()> {
        self.shutdown();
        self.wait().await
    }

    /// Every destination referenced by a table pair must be registered.
    fn check_destinations(&self) -> SyncResult<()> {
        let referenced = self
            .config
            .sync
            .pairs
            .iter()
            .map(|pair| &pair.destination)
            .chain(self.config.reconciliation.pairs.iter().map(|pair| &pair.destination));

        for destination in referenced {
            if !self.destinations.contains_key(destination) {
                bail!(
                    ErrorKind::ConfigError,
                    "Table pair references an unknown destination",
                    format!("destination `{destination}` is not registered")
                );
            }
        }

        Ok(())
    }

    async fn spawn<T>(&mut self, task: T, interval_ms: u64, jitter_percent: u8) -> SyncResult<()>
    where
        T: PeriodicTask,
    {
        let worker = PeriodicWorker::new(
            task,
            Duration::from_millis(interval_ms),
            jitter_percent,
            self.shutdown_tx.subscribe(),
        );
        self.workers.push(worker.start().await?);

        Ok(())
    }
}
