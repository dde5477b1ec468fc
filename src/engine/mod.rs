mod error;
mod mutations;
mod queries;
mod store;

pub use error::EngineError;
pub use store::{Ledger, SharedAppointment};

use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedMutexGuard, RwLock};
use tracing::{error, info};
use ulid::Ulid;

use crate::audit::AuditTrail;
use crate::calendar::ShopConfig;
use crate::directory::Directory;
use crate::error::SchedulingError;
use crate::lifecycle::TransitionPolicy;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::time::ShopZone;
use crate::validator::AppointmentSource;
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
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal<Event>, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                    .record(batch.len() as f64);
                let flush_start = std::time::Instant::now();
                let result = flush_batch(&mut wal, &batch);
                metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                    .record(flush_start.elapsed().as_secs_f64());
                respond_batch(batch, &result);

                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(wal: &mut Wal<Event>, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even on append error so partially buffered bytes don't leak
    // into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn respond_batch(batch: Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal<Event>, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let _ = response.send(wal.compact(&events));
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let _ = response.send(wal.append(&event));
        }
    }
}

// ── Commit path ──────────────────────────────────────────

/// Everything a commit needs, detached from the engine's lifetime so it can
/// run inside a spawned task.
#[derive(Clone)]
pub(super) struct Committer {
    wal_tx: mpsc::Sender<WalCommand>,
    ledger: Arc<Ledger>,
    audit: Arc<dyn AuditTrail>,
    notify: Arc<NotifyHub>,
    /// Commits hold it shared; compaction holds it exclusively so no event
    /// lands between reading the log and swapping the compacted file in.
    gate: Arc<RwLock<()>>,
}

impl Committer {
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

    /// WAL-append + apply + audit + notify for an appointment whose write
    /// lock the caller holds.
    pub(super) async fn apply(
        &self,
        appt: &mut Appointment,
        event: Event,
        audit: Option<AuditRecord>,
    ) -> Result<(), EngineError> {
        {
            let _gate = self.gate.read().await;
            self.wal_append(&event).await?;
            self.ledger.apply_event(appt, &event);
        }
        if let Some(record) = audit {
            self.record_audit(record).await;
        }
        self.notify.send(&event);
        Ok(())
    }

    pub(super) async fn insert(&self, appointment: Appointment) -> Result<Appointment, EngineError> {
        let event = Event::AppointmentCreated {
            appointment: appointment.clone(),
        };
        {
            let _gate = self.gate.read().await;
            self.wal_append(&event).await?;
            self.ledger.insert(appointment.clone());
        }
        self.notify.send(&event);
        Ok(appointment)
    }

    pub(super) async fn configure(&self, config: ShopConfig) -> Result<(), EngineError> {
        let event = Event::ShopConfigured {
            config: config.clone(),
        };
        {
            let _gate = self.gate.read().await;
            self.wal_append(&event).await?;
            self.ledger.set_shop_config(config);
        }
        self.notify.send(&event);
        Ok(())
    }

    /// The status change is already durable; a failed audit write is
    /// reported but not rolled back.
    async fn record_audit(&self, record: AuditRecord) {
        let appointment_id = record.appointment_id;
        if let Err(e) = self.audit.append(record).await {
            metrics::counter!(crate::observability::AUDIT_WRITE_FAILURES_TOTAL).increment(1);
            error!(%appointment_id, "audit write failed: {e}");
        }
    }
}

/// Construction-time engine settings.
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineOptions {
    pub zone: ShopZone,
    pub policy: TransitionPolicy,
}

pub struct Engine {
    pub(super) wal_path: PathBuf,
    pub(super) ledger: Arc<Ledger>,
    pub(super) committer: Committer,
    pub notify: Arc<NotifyHub>,
    pub(super) audit: Arc<dyn AuditTrail>,
    pub(super) directory: Arc<dyn Directory>,
    /// Per local calendar day booking locks.
    pub(super) day_locks: DashMap<NaiveDate, Arc<Mutex<()>>>,
    pub(super) zone: ShopZone,
    pub(super) policy: TransitionPolicy,
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        audit: Arc<dyn AuditTrail>,
        directory: Arc<dyn Directory>,
        options: EngineOptions,
    ) -> io::Result<Self> {
        let (wal, events) = Wal::<Event>::recover(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let ledger = Arc::new(Ledger::new(options.zone));
        for event in &events {
            ledger.replay(event);
        }
        info!(
            events = events.len(),
            appointments = ledger.len(),
            "replayed {}",
            wal_path.display()
        );

        Ok(Self {
            wal_path,
            committer: Committer {
                wal_tx,
                ledger: ledger.clone(),
                audit: audit.clone(),
                notify: notify.clone(),
                gate: Arc::new(RwLock::new(())),
            },
            ledger,
            notify,
            audit,
            directory,
            day_locks: DashMap::new(),
            zone: options.zone,
            policy: options.policy,
        })
    }

    pub fn zone(&self) -> ShopZone {
        self.zone
    }

    pub fn policy(&self) -> TransitionPolicy {
        self.policy
    }

    pub fn get_appointment(&self, id: &Ulid) -> Option<SharedAppointment> {
        self.ledger.get(id)
    }

    fn day_lock(&self, day: NaiveDate) -> Arc<Mutex<()>> {
        self.day_locks.entry(day).or_default().clone()
    }

    /// Acquire booking locks for `days` in ascending order.
    pub(super) async fn lock_days(&self, mut days: Vec<NaiveDate>) -> Vec<OwnedMutexGuard<()>> {
        days.sort();
        days.dedup();
        let mut guards = Vec::with_capacity(days.len());
        for day in days {
            guards.push(self.day_lock(day).lock_owned().await);
        }
        guards
    }

    /// Run a commit on its own task. The caller may be cancelled, but the
    /// commit, and the guards it owns, run to completion.
    pub(super) async fn detached<T, F>(&self, work: F) -> Result<T, EngineError>
    where
        T: Send + 'static,
        F: Future<Output = Result<T, EngineError>> + Send + 'static,
    {
        tokio::spawn(work)
            .await
            .map_err(|e| EngineError::WalError(format!("commit task failed: {e}")))?
    }
}

#[async_trait]
impl AppointmentSource for Engine {
    async fn find_active_appointments_for_day(&self, date: NaiveDate) -> Vec<Appointment> {
        let mut active = Vec::new();
        for handle in self.ledger.day_handles(date) {
            let appt = handle.read().await;
            if appt.status.blocks_slot() {
                active.push(appt.clone());
            }
        }
        active
    }

    async fn load_shop_config(&self) -> Result<Arc<ShopConfig>, SchedulingError> {
        self.ledger.shop_config().ok_or(SchedulingError::NotConfigured)
    }
}
