mod availability;
mod capacity;
mod conflict;
mod error;
mod mutations;
mod projection;
mod queries;
mod store;

pub use availability::{is_available, merge_overlapping, open_slots, subtract_intervals};
pub use capacity::{can_enroll, check_enroll, enroll, withdraw};
pub use conflict::{conflicts_in, find_conflicts};
pub use error::EngineError;
pub use projection::MetricProjection;
pub use store::{IdClaim, InMemoryStore, LockedScopes, RegistryEntry, SharedScopeState};

use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// Blocks for the first Append, drains whatever else is queued, then issues
/// one fsync for the whole batch before answering every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                commit_batch(&mut wal, &mut batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
    tracing::debug!(path = %wal.path().display(), "WAL writer stopped");
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let results = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    respond_batch(batch, results);
}

/// One result per event. An event the log refuses fails alone; a failed
/// flush fails every event the batch staged.
fn flush_batch(
    wal: &mut Wal,
    batch: &[(Event, oneshot::Sender<io::Result<()>>)],
) -> Vec<io::Result<()>> {
    let mut results: Vec<io::Result<()>> = batch
        .iter()
        .map(|(event, _)| wal.append_buffered(event))
        .collect();
    for r in &results {
        if let Err(e) = r {
            tracing::warn!(error = %e, "WAL refused event");
        }
    }
    if let Err(e) = wal.flush_sync() {
        tracing::error!(error = %e, events = batch.len(), "WAL flush failed");
        for r in results.iter_mut().filter(|r| r.is_ok()) {
            *r = Err(io::Error::new(e.kind(), e.to_string()));
        }
    }
    results
}

fn respond_batch(
    batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>,
    results: Vec<io::Result<()>>,
) {
    for ((_, tx), r) in batch.drain(..).zip(results) {
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let mut batch = vec![(event, response)];
            commit_batch(wal, &mut batch);
        }
    }
}

/// Scheduling engine for one club: scope-locked mutations over an in-memory
/// store, made durable through a group-commit WAL.
pub struct Engine {
    pub store: InMemoryStore,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Commits hold this shared; compaction holds it exclusively so its
    /// snapshot and the WAL swap see no half-applied event.
    pub(super) commit_gate: RwLock<()>,
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let (wal, events) = Wal::recover(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            store: InMemoryStore::new(),
            wal_tx,
            notify,
            commit_gate: RwLock::new(()),
        };

        // The engine is not shared yet, so every try_write succeeds. Never use
        // blocking_write here: this may run inside an async context.
        for event in &events {
            let mut locked = engine.try_lock_scopes(engine.store.event_scopes(event))?;
            engine.store.apply_event(&mut locked, event);
        }
        if !events.is_empty() {
            tracing::info!(
                path = %wal_path.display(),
                events = events.len(),
                bookings = engine.store.booking_count(),
                "replayed WAL"
            );
        }

        Ok(engine)
    }

    fn try_lock_scopes(&self, scopes: Vec<Scope>) -> io::Result<LockedScopes> {
        let mut guards = BTreeMap::new();
        for scope in scopes {
            if guards.contains_key(&scope) {
                continue;
            }
            let guard = self
                .store
                .scope(scope)
                .try_write_owned()
                .map_err(|_| io::Error::other("scope locked during replay"))?;
            guards.insert(scope, guard);
        }
        Ok(LockedScopes::new(guards))
    }

    /// Acquire write locks on `scopes` in ascending scope order.
    pub(super) async fn lock_scopes(&self, mut scopes: Vec<Scope>) -> LockedScopes {
        scopes.sort();
        scopes.dedup();
        let mut guards = BTreeMap::new();
        for scope in scopes {
            let guard = self.store.scope(scope).write_owned().await;
            guards.insert(scope, guard);
        }
        LockedScopes::new(guards)
    }

    /// Lock every scope of booking `id` plus `extra`. A class roster can
    /// change between the snapshot and the lock, so re-check and retry until
    /// the held set covers the booking as it is now.
    pub(super) async fn lock_booking(
        &self,
        id: Ulid,
        extra: &[Scope],
    ) -> Result<(Booking, LockedScopes), EngineError> {
        loop {
            let snapshot = self.store.get_booking(&id).ok_or(EngineError::NotFound(id))?;
            let mut wanted = snapshot.lock_scopes();
            wanted.extend_from_slice(extra);
            let locked = self.lock_scopes(wanted).await;

            let current = self.store.get_booking(&id).ok_or(EngineError::NotFound(id))?;
            if current.lock_scopes().iter().all(|s| locked.holds(s)) {
                return Ok((current, locked));
            }
            tracing::trace!(booking = %id, "booking scopes changed while locking, retrying");
        }
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// WAL-append, apply, notify. Nothing is applied if the append fails.
    pub(super) async fn persist_and_apply(
        &self,
        locked: &mut LockedScopes,
        event: &Event,
    ) -> Result<(), EngineError> {
        let scopes = self.store.event_scopes(event);
        {
            let _gate = self.commit_gate.read().await;
            self.wal_append(event).await?;
            self.store.apply_event(locked, event);
        }
        for scope in &scopes {
            self.notify.send(*scope, event);
        }
        Ok(())
    }
}
