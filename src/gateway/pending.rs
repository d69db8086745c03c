//! Pending-request table.
//!
//! Correlates asynchronous `res` frames with the caller waiting for them.
//! Each entry owns a `oneshot` sender and the abort handle of its timeout
//! task. Whichever of the three delivery paths (response, timer, teardown
//! sweep) removes the entry from the map first is the one that delivers;
//! the others find nothing and return without effect.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::debug;

use crate::{AppError, Result};

struct PendingEntry {
    /// Registration number; tells a replaced entry from its successor.
    seq: u64,
    tx: oneshot::Sender<Result<Value>>,
    timer: AbortHandle,
}

type EntryMap = Arc<Mutex<HashMap<String, PendingEntry>>>;

/// Shared table of in-flight requests keyed by correlation id.
///
/// Cheap to clone; all clones share one map. The lock is never held across
/// an `.await`.
#[derive(Clone, Default)]
pub struct PendingTable {
    entries: EntryMap,
    next_seq: Arc<AtomicU64>,
}

impl std::fmt::Debug for PendingTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingTable")
            .field("len", &self.len())
            .finish()
    }
}

impl PendingTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry and start its timeout.
    ///
    /// When `timeout` elapses with the entry still present, it is removed and
    /// resolved with `on_timeout`. If `id` is already present the previous
    /// entry is failed with [`AppError::InvalidRequest`] before being replaced.
    ///
    /// Must be called from within a tokio runtime.
    pub fn register(
        &self,
        id: impl Into<String>,
        timeout: Duration,
        on_timeout: AppError,
    ) -> Completion {
        let id = id.into();
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        // The timer is spawned under the lock so it cannot observe the map
        // before the entry is in it.
        let replaced = {
            let mut entries = self.lock();
            let timer = {
                let table = self.clone();
                let id = id.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(timeout).await;
                    if let Some(entry) = table.take(&id, Some(seq)) {
                        let _ = entry.tx.send(Err(on_timeout));
                        debug!(%id, "pending request timed out");
                    }
                })
                .abort_handle()
            };
            entries.insert(id.clone(), PendingEntry { seq, tx, timer })
        };
        if let Some(old) = replaced {
            old.timer.abort();
            let _ = old.tx.send(Err(AppError::InvalidRequest(format!(
                "correlation id '{id}' reused while pending"
            ))));
        }

        Completion {
            id,
            seq,
            rx,
            table: self.clone(),
        }
    }

    /// Deliver an outcome to the entry for `id`.
    ///
    /// Returns `false` (and does nothing) if the entry was already resolved,
    /// timed out, swept, or never existed.
    pub fn resolve(&self, id: &str, outcome: Result<Value>) -> bool {
        self.deliver(id, outcome)
    }

    /// Resolve every remaining entry with `err` and empty the table.
    ///
    /// Returns the number of entries failed.
    pub fn fail_all(&self, err: &AppError) -> usize {
        let drained: Vec<PendingEntry> = self.lock().drain().map(|(_, e)| e).collect();
        let count = drained.len();
        for entry in drained {
            entry.timer.abort();
            let _ = entry.tx.send(Err(err.clone()));
        }
        count
    }

    /// Remove the entry for `id` only if it is still registration `seq`.
    fn cancel_registration(&self, id: &str, seq: u64) {
        if let Some(entry) = self.take(id, Some(seq)) {
            entry.timer.abort();
        }
    }

    fn holds_registration(&self, id: &str, seq: u64) -> bool {
        self.lock().get(id).is_some_and(|entry| entry.seq == seq)
    }

    /// Whether an entry for `id` is outstanding.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }

    /// Number of outstanding entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Remove the entry for `id`; with `seq`, only if it is that registration.
    fn take(&self, id: &str, seq: Option<u64>) -> Option<PendingEntry> {
        let mut entries = self.lock();
        let current = entries.get(id).map(|entry| entry.seq)?;
        if seq.is_some_and(|seq| seq != current) {
            return None;
        }
        entries.remove(id)
    }

    fn deliver(&self, id: &str, outcome: Result<Value>) -> bool {
        let Some(entry) = self.take(id, None) else {
            return false;
        };
        entry.timer.abort();
        // A dropped receiver means the caller went away; nothing to do.
        let _ = entry.tx.send(outcome);
        true
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, PendingEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Caller-side handle for one pending request.
///
/// Dropping the handle before it settles removes the entry, so an abandoned
/// call does not linger in the table until its timer fires. A handle whose
/// entry was replaced under the same id leaves the replacement alone.
#[derive(Debug)]
pub struct Completion {
    id: String,
    seq: u64,
    rx: oneshot::Receiver<Result<Value>>,
    table: PendingTable,
}

impl Completion {
    /// Correlation id of the request.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether an outcome has already been delivered.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        !self.table.holds_registration(&self.id, self.seq)
    }

    /// Wait for the outcome.
    ///
    /// # Errors
    ///
    /// Returns whatever error was delivered (timeout, gateway failure,
    /// connection closed). If the sender vanished without delivering, returns
    /// [`AppError::Connection`].
    pub async fn wait(mut self) -> Result<Value> {
        match (&mut self.rx).await {
            Ok(outcome) => outcome,
            Err(_) => Err(AppError::Connection("connection closed".into())),
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        self.table.cancel_registration(&self.id, self.seq);
    }
}
