mod admission;
mod availability;
mod blocking;
mod catalog;
mod conflict;
mod error;
mod queries;
mod store;
#[cfg(test)]
mod tests;

pub use availability::{available_at, free_windows, merge_overlapping, open_slots, subtract_intervals};
pub use error::EngineError;
pub use store::InMemoryStore;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::calendar::OperatingCalendar;
use crate::journal::Journal;
use crate::model::*;
use crate::notify::{Notification, Notifier};
use crate::observability;
use crate::payment::PaymentVerifier;

pub type SharedSchedule = Arc<RwLock<Schedule>>;
type ScheduleGuard = OwnedRwLockWriteGuard<Schedule>;

/// Tunables the engine needs at runtime.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub calendar: OperatingCalendar,
    /// How long a booking may stay pending before it is expired.
    pub pending_ttl_ms: Ms,
    pub deposit_percent: u32,
    pub code_prefix: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            calendar: OperatingCalendar::default(),
            pending_ttl_ms: 10 * 60 * 1000,
            deposit_percent: 20,
            code_prefix: "SB".into(),
        }
    }
}

// ── Group-commit journal channel ─────────────────────────

pub(super) enum JournalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Rewrite {
        snapshot: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type Pending = Vec<oneshot::Sender<io::Result<()>>>;

/// Background task owning the journal. Appends that queue up while a sync is
/// in flight are written together and share one fsync.
async fn journal_writer_loop(mut journal: Journal, mut rx: mpsc::Receiver<JournalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let mut waiting: Pending = Vec::new();
        let mut failed: Option<io::Error> = None;
        let mut deferred = None;

        let mut next = Some(cmd);
        while let Some(cmd) = next.take() {
            match cmd {
                JournalCommand::Append { event, response } => {
                    if failed.is_none()
                        && let Err(e) = journal.append(&event)
                    {
                        failed = Some(e);
                    }
                    waiting.push(response);
                    next = rx.try_recv().ok();
                }
                other => deferred = Some(other),
            }
        }

        if !waiting.is_empty() {
            metrics::histogram!(observability::JOURNAL_FLUSH_BATCH_SIZE).record(waiting.len() as f64);
            let started = Instant::now();
            // Sync even after a failed append so half-written bytes don't ride
            // along with the next batch.
            let synced = journal.sync();
            metrics::histogram!(observability::JOURNAL_FLUSH_DURATION_SECONDS)
                .record(started.elapsed().as_secs_f64());
            let outcome = match failed {
                Some(e) => Err(e),
                None => synced,
            };
            for tx in waiting {
                let _ = tx.send(match &outcome {
                    Ok(()) => Ok(()),
                    Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
                });
            }
        }

        match deferred {
            Some(JournalCommand::Rewrite { snapshot, response }) => {
                let _ = response.send(journal.rewrite(&snapshot));
            }
            Some(JournalCommand::AppendsSinceCompact { response }) => {
                let _ = response.send(journal.appends_since_compact());
            }
            Some(JournalCommand::Append { .. }) | None => {}
        }
    }
}

/// Events that change a technician's occupancy and need its schedule lock.
fn touches_schedule(event: &Event) -> bool {
    matches!(
        event,
        Event::BookingCreated(_)
            | Event::BookingStatusChanged { .. }
            | Event::BookingRescheduled { .. }
            | Event::BookingDeleted { .. }
            | Event::TimeBlocked(_)
            | Event::BlockUpdated(_)
            | Event::TimeUnblocked { .. }
    )
}

pub struct Engine {
    pub(super) store: InMemoryStore,
    journal_tx: mpsc::Sender<JournalCommand>,
    notifier: Arc<dyn Notifier>,
    /// Commits hold this shared; compaction holds it exclusively so no event
    /// lands between its snapshot and the rewrite.
    commit_gate: RwLock<()>,
    pub(super) verifier: Arc<dyn PaymentVerifier>,
    pub(super) settings: EngineSettings,
}

impl Engine {
    /// Replay the journal at `journal_path` and start its writer task.
    /// Must be called inside a tokio runtime.
    pub fn new(
        journal_path: PathBuf,
        settings: EngineSettings,
        notifier: Arc<dyn Notifier>,
        verifier: Arc<dyn PaymentVerifier>,
    ) -> io::Result<Self> {
        let events = Journal::recover(&journal_path)?;
        let journal = Journal::open(&journal_path)?;
        let (journal_tx, journal_rx) = mpsc::channel(4096);
        tokio::spawn(journal_writer_loop(journal, journal_rx));

        let store = InMemoryStore::new();
        // Nothing else can see these schedules yet, so try_write never contends.
        for event in &events {
            if !touches_schedule(event) {
                store.apply(&mut [], event);
                continue;
            }
            let mut guards = Vec::with_capacity(2);
            for tid in event.touched_technicians() {
                let Some(shared) = store.schedule(&tid) else {
                    tracing::warn!("replay: no schedule for technician {tid}");
                    continue;
                };
                let guard = shared
                    .try_write_owned()
                    .map_err(|_| io::Error::other("replay: schedule unexpectedly locked"))?;
                guards.push(guard);
            }
            if guards.is_empty() {
                tracing::warn!("replay: skipping {event:?}");
                continue;
            }
            let mut schedules: Vec<&mut Schedule> = guards.iter_mut().map(|g| &mut **g).collect();
            store.apply(&mut schedules, event);
        }
        tracing::info!(
            "replayed {} events from {}",
            events.len(),
            journal_path.display()
        );

        Ok(Self {
            store,
            journal_tx,
            notifier,
            commit_gate: RwLock::new(()),
            verifier,
            settings,
        })
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn calendar(&self) -> &OperatingCalendar {
        &self.settings.calendar
    }

    pub fn store(&self) -> &InMemoryStore {
        &self.store
    }

    /// Durably append via the background group-commit writer.
    async fn journal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.journal_tx
            .send(JournalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("journal writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("journal writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// Journal, apply, notify. State is only touched once the journal accepted
    /// the event.
    pub(super) async fn commit(
        &self,
        schedules: &mut [&mut Schedule],
        event: &Event,
        created: bool,
    ) -> Result<(), EngineError> {
        let gate = self.commit_gate.read().await;
        self.journal_append(event).await?;
        self.store.apply(schedules, event);
        drop(gate);
        self.notifier.notify(&Notification::from_event(event, created));
        Ok(())
    }

    /// Write-lock two technicians' schedules, lower id first so concurrent
    /// moves between the same pair cannot deadlock. `None` for the second
    /// guard when both ids are the same technician.
    pub(super) async fn schedule_write_pair(
        &self,
        a: Ulid,
        b: Ulid,
    ) -> Result<(ScheduleGuard, Option<ScheduleGuard>), EngineError> {
        if a == b {
            return Ok((self.schedule_write(a).await?, None));
        }
        let (first, second) = if a < b { (a, b) } else { (b, a) };
        let first_guard = self.schedule_write(first).await?;
        let second_guard = self.schedule_write(second).await?;
        Ok(if a < b {
            (first_guard, Some(second_guard))
        } else {
            (second_guard, Some(first_guard))
        })
    }

    /// Write-lock a technician's schedule. All occupancy changes for that
    /// technician go through this lock.
    pub(super) async fn schedule_write(
        &self,
        technician_id: Ulid,
    ) -> Result<ScheduleGuard, EngineError> {
        let shared = self
            .store
            .schedule(&technician_id)
            .ok_or(EngineError::NotFound(technician_id))?;
        Ok(shared.write_owned().await)
    }

    /// Rewrite the journal as the minimal event list recreating current state.
    pub async fn compact_journal(&self) -> Result<(), EngineError> {
        let _gate = self.commit_gate.write().await;
        let snapshot = self.store.snapshot_events();
        let (tx, rx) = oneshot::channel();
        self.journal_tx
            .send(JournalCommand::Rewrite { snapshot, response: tx })
            .await
            .map_err(|_| EngineError::WalError("journal writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("journal writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn journal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .journal_tx
            .send(JournalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
