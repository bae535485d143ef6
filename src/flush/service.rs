use std::{
    mem,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use tokio::{sync::watch, task::JoinHandle, time};
use tracing::{debug, info, warn};

use crate::storage::{PersistedRecord, RecordStore};

/// Buffers freshly computed aggregates and periodically writes them to
/// durable storage.
///
/// The buffer lock only guards append and drain; storage I/O always happens
/// after the lock is released.
pub struct FlushWorker {
    buffer: Mutex<Vec<PersistedRecord>>,
    records: Option<RecordStore>,
    interval: Duration,
    started: AtomicBool,
}

impl FlushWorker {
    pub fn new(records: Option<RecordStore>, interval: Duration) -> Self {
        Self {
            buffer: Mutex::new(Vec::new()),
            records,
            interval,
            started: AtomicBool::new(false),
        }
    }

    /// Queue a live aggregate, stamped with the current UTC time.
    pub fn collect(&self, average_temperature: f64, source_ids: Vec<String>) -> PersistedRecord {
        let record = PersistedRecord::now(average_temperature, source_ids);
        let pending = {
            let mut buffer = self.lock_buffer();
            buffer.push(record.clone());
            buffer.len()
        };
        debug!(
            average_temperature,
            sources = record.source_ids.len(),
            pending,
            "Collected temperature record"
        );
        record
    }

    pub fn pending(&self) -> usize {
        self.lock_buffer().len()
    }

    /// Drain the buffer into durable storage.
    ///
    /// Returns the number of drained records, or `None` when storage is not
    /// configured (the buffer is then left untouched). Concurrent callers
    /// each drain a disjoint batch, so a second flush right after a first
    /// one is a no-op.
    pub async fn flush(&self) -> Option<usize> {
        let Some(records) = &self.records else {
            warn!("Object storage not configured; skipping temperature store");
            return None;
        };

        let batch = mem::take(&mut *self.lock_buffer());
        if batch.is_empty() {
            debug!("No buffered temperature records to flush");
            return Some(0);
        }

        let written = records.put_records(&batch).await;
        if written < batch.len() {
            warn!(
                drained = batch.len(),
                written,
                "Some temperature records could not be stored"
            );
        }
        info!(count = batch.len(), "Flushed temperature record(s) to object storage");
        Some(batch.len())
    }

    /// Start the periodic flush loop. Only the first call spawns a task;
    /// later calls return `None`. A zero interval never starts the loop.
    pub fn spawn(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> Option<JoinHandle<()>> {
        if self.interval.is_zero() {
            warn!("Flush interval is zero; periodic flush disabled");
            return None;
        }
        if self.started.swap(true, Ordering::SeqCst) {
            debug!("Flush loop already running");
            return None;
        }
        Some(tokio::spawn(Arc::clone(self).run(shutdown)))
    }

    /// Sleep for one interval, flush, repeat until `shutdown` flips to `true`
    /// or its sender is dropped.
    async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "Temperature flush loop started");
        let mut ticker = time::interval_at(time::Instant::now() + self.interval, self.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.flush().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Temperature flush loop stopped");
    }

    fn lock_buffer(&self) -> MutexGuard<'_, Vec<PersistedRecord>> {
        // The buffer is a plain Vec; a panic mid-push cannot leave it invalid.
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
