use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};

use crate::bail;
use crate::clients::memory::MemoryTableStore;
use crate::clients::{BatchWriter, QueryClient, TableStats};
use crate::error::{ErrorKind, SyncResult};
use crate::processor::ChangeHandler;
use crate::test_utils::notify::TimedNotify;
use crate::types::{ChangeRecord, Row};

/// Answers queries of an inner client after a delay.
pub struct DelayedQueryClient {
    inner: Arc<dyn QueryClient>,
    delay: Duration,
}

impl DelayedQueryClient {
    pub fn new(inner: Arc<dyn QueryClient>, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

#[async_trait]
impl QueryClient for DelayedQueryClient {
    async fn query(&self, text: &str, params: &[Value]) -> SyncResult<Vec<Row>> {
        tokio::time::sleep(self.delay).await;
        self.inner.query(text, params).await
    }
}

/// A query client whose queries always fail.
#[derive(Debug, Default)]
pub struct FailingQueryClient;

impl FailingQueryClient {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl QueryClient for FailingQueryClient {
    async fn query(&self, _text: &str, _params: &[Value]) -> SyncResult<Vec<Row>> {
        bail!(ErrorKind::DestinationQueryFailed, "Store is unavailable");
    }
}

/// Writes to a [`MemoryTableStore`], failing selected calls.
///
/// Call numbers start at 1.
#[derive(Debug, Clone)]
pub struct FailingBatchWriter {
    inner: MemoryTableStore,
    failing_calls: Arc<Vec<usize>>,
    calls: Arc<AtomicUsize>,
}

impl FailingBatchWriter {
    pub fn new(inner: MemoryTableStore, failing_calls: Vec<usize>) -> Self {
        Self {
            inner,
            failing_calls: Arc::new(failing_calls),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BatchWriter for FailingBatchWriter {
    async fn insert_batch(&self, target: &str, rows: Vec<Row>) -> SyncResult<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.failing_calls.contains(&call) {
            bail!(
                ErrorKind::DestinationWriteFailed,
                "Injected write failure",
                format!("call {call} to `{target}`")
            );
        }

        self.inner.insert_batch(target, rows).await
    }
}

#[async_trait]
impl TableStats for FailingBatchWriter {
    async fn count_rows(&self, table: &str) -> SyncResult<u64> {
        self.inner.count_rows(table).await
    }

    async fn identity_values(&self, table: &str, column: &str) -> SyncResult<Vec<Value>> {
        self.inner.identity_values(table, column).await
    }
}

#[derive(Default)]
struct RecordingInner {
    handled: Vec<ChangeRecord>,
    failures_left: usize,
    conditions: Vec<(usize, Arc<Notify>)>,
}

/// A change handler recording every change it is given.
///
/// It can fail its first calls, and notifies waiters once it handled enough changes.
#[derive(Clone, Default)]
pub struct RecordingHandler {
    inner: Arc<Mutex<RecordingInner>>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the next `failures` calls with [`ErrorKind::HandlerFailed`].
    pub async fn fail_next(&self, failures: usize) {
        self.inner.lock().await.failures_left = failures;
    }

    /// Changes handled successfully, in handling order.
    pub async fn handled(&self) -> Vec<ChangeRecord> {
        self.inner.lock().await.handled.clone()
    }

    /// Returns a notification fired once `count` changes were handled successfully.
    pub async fn notify_on_handled(&self, count: usize) -> TimedNotify {
        let notify = Arc::new(Notify::new());
        let mut inner = self.inner.lock().await;
        if inner.handled.len() >= count {
            notify.notify_one();
        } else {
            inner.conditions.push((count, notify.clone()));
        }

        TimedNotify::new(notify)
    }
}

#[async_trait]
impl ChangeHandler for RecordingHandler {
    async fn handle(&self, change: &ChangeRecord) -> SyncResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.failures_left > 0 {
            inner.failures_left -= 1;
            bail!(
                ErrorKind::HandlerFailed,
                "Injected handler failure",
                format!("change {}", change.id)
            );
        }

        inner.handled.push(change.clone());
        let handled = inner.handled.len();
        inner.conditions.retain(|(count, notify)| {
            let reached = handled >= *count;
            if reached {
                notify.notify_one();
            }
            !reached
        });

        Ok(())
    }
}

impl fmt::Debug for RecordingHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingHandler").finish_non_exhaustive()
    }
}
