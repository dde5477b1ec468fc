use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::calendar::{ShopCalendar, ShopConfig};
use crate::error::SchedulingError;
use crate::lifecycle::{self, Transition, TransitionRequest};
use crate::limits::*;
use crate::model::*;
use crate::observability;
use crate::validator::{check_duration, SlotValidator};
use crate::wal::Wal;

use super::{Engine, EngineError, Ledger, WalCommand};

impl Engine {
    /// Install or replace the shop schedule document.
    pub async fn configure_shop(&self, config: ShopConfig) -> Result<(), EngineError> {
        ShopCalendar::new(&config, self.zone)?;
        let committer = self.committer.clone();
        self.detached(async move { committer.configure(config).await })
            .await?;
        info!("shop schedule configured");
        Ok(())
    }

    pub async fn create_appointment(
        &self,
        request: NewAppointment,
    ) -> Result<Appointment, EngineError> {
        if self.ledger.len() >= MAX_APPOINTMENTS {
            return Err(EngineError::LimitExceeded("too many appointments"));
        }
        let duration = request
            .duration_minutes
            .unwrap_or(DEFAULT_DURATION_MINUTES);
        check_duration(duration)?;
        self.check_references(request.customer_id, request.vehicle_id)
            .await?;

        let day = self.zone.localize(request.scheduled_at).calendar_date();
        let day_guards = self.lock_days(vec![day]).await;
        self.validate_slot(request.scheduled_at, duration, None)
            .await?;

        let appointment = Appointment::new_pending(
            Ulid::new(),
            request.customer_id,
            request.vehicle_id,
            request.scheduled_at,
            duration,
            Utc::now(),
        );
        let committer = self.committer.clone();
        let created = self
            .detached(async move {
                let _days = day_guards;
                committer.insert(appointment).await
            })
            .await?;

        metrics::counter!(observability::APPOINTMENTS_CREATED_TOTAL).increment(1);
        info!(id = %created.id, scheduled_at = %created.scheduled_at, "appointment created");
        Ok(created)
    }

    /// Apply a status transition under the appointment's write lock.
    ///
    /// Returns the appointment as it stands afterwards; a request for the
    /// current status returns it untouched.
    pub async fn transition(
        &self,
        id: Ulid,
        request: TransitionRequest,
    ) -> Result<Appointment, EngineError> {
        let handle = self.ledger.get(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = handle.write_owned().await;
        let from = guard.status;

        let outcome = match lifecycle::transition(self.policy, &guard, request, Utc::now()) {
            Ok(outcome) => outcome,
            Err(e) => {
                if let SchedulingError::TerminalStateViolation { to, .. } = &e {
                    metrics::counter!(
                        observability::TRANSITIONS_REJECTED_TOTAL,
                        "from" => from.as_str(),
                        "to" => to.as_str()
                    )
                    .increment(1);
                    warn!(%id, %from, %to, "transition refused");
                }
                return Err(e.into());
            }
        };

        match outcome {
            Transition::Unchanged => Ok((*guard).clone()),
            Transition::Applied { appointment, audit } => {
                let actor = audit.actor;
                let event = Event::status_of(&appointment);
                let committer = self.committer.clone();
                let updated = self
                    .detached(async move {
                        committer.apply(&mut guard, event, Some(audit)).await?;
                        Ok((*guard).clone())
                    })
                    .await?;

                metrics::counter!(
                    observability::TRANSITIONS_TOTAL,
                    "from" => from.as_str(),
                    "to" => updated.status.as_str()
                )
                .increment(1);
                info!(%id, %from, to = %updated.status, %actor, "transition committed");
                Ok(updated)
            }
        }
    }

    /// Record that the confirmation notice went out. Idempotent.
    pub async fn mark_notified(&self, id: Ulid) -> Result<Appointment, EngineError> {
        let handle = self.ledger.get(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = handle.write_owned().await;
        if guard.notified {
            return Ok((*guard).clone());
        }

        let event = Event::NotificationDelivered {
            id,
            updated_at: Utc::now(),
        };
        let committer = self.committer.clone();
        self.detached(async move {
            committer.apply(&mut guard, event, None).await?;
            Ok((*guard).clone())
        })
        .await
    }

    /// Move, resize or re-assign the vehicle of a pending appointment.
    pub async fn reschedule(
        &self,
        id: Ulid,
        change: Reschedule,
    ) -> Result<Appointment, EngineError> {
        let handle = self.ledger.get(&id).ok_or(EngineError::NotFound(id))?;
        let current = handle.read().await.clone();
        if current.status != Status::Pending {
            return Err(EngineError::NotReschedulable {
                id,
                status: current.status,
            });
        }

        let scheduled_at = change.scheduled_at.unwrap_or(current.scheduled_at);
        let duration = change.duration_minutes.unwrap_or(current.duration_minutes);
        let vehicle_id = change.vehicle_id.unwrap_or(current.vehicle_id);
        check_duration(duration)?;
        if vehicle_id != current.vehicle_id {
            self.check_references(current.customer_id, vehicle_id)
                .await?;
        }
        let moved = scheduled_at != current.scheduled_at || duration != current.duration_minutes;
        if !moved && vehicle_id == current.vehicle_id {
            return Ok(current);
        }

        let target_day = self.zone.localize(scheduled_at).calendar_date();
        let day_guards = self
            .lock_days(vec![self.ledger.day_of(&current), target_day])
            .await;
        if moved {
            self.validate_slot(scheduled_at, duration, Some(id)).await?;
        }

        let mut guard = handle.write_owned().await;
        if guard.status != Status::Pending {
            return Err(EngineError::NotReschedulable {
                id,
                status: guard.status,
            });
        }
        if guard.scheduled_at != current.scheduled_at
            || guard.duration_minutes != current.duration_minutes
            || guard.vehicle_id != current.vehicle_id
        {
            return Err(EngineError::ConcurrentModification(id));
        }

        let event = Event::AppointmentRescheduled {
            id,
            vehicle_id,
            scheduled_at,
            duration_minutes: duration,
            updated_at: Utc::now(),
        };
        let committer = self.committer.clone();
        let updated = self
            .detached(async move {
                let _days = day_guards;
                committer.apply(&mut guard, event, None).await?;
                Ok((*guard).clone())
            })
            .await?;
        info!(%id, scheduled_at = %updated.scheduled_at, duration = updated.duration_minutes, "appointment rescheduled");
        Ok(updated)
    }

    /// Repair appointments whose outcome timestamps disagree with their
    /// status. Returns how many were rewritten.
    pub async fn normalize_outcome_timestamps(&self) -> Result<usize, EngineError> {
        let handles = self.ledger.handles();
        let committer = self.committer.clone();
        let repaired = self
            .detached(async move {
                let mut repaired = 0usize;
                for handle in handles {
                    let mut guard = handle.write_owned().await;
                    if let Some(fixed) = lifecycle::normalized(&guard) {
                        committer
                            .apply(&mut guard, Event::status_of(&fixed), None)
                            .await?;
                        repaired += 1;
                    }
                }
                Ok(repaired)
            })
            .await?;
        info!(repaired, "outcome timestamps normalized");
        Ok(repaired)
    }

    /// Compact the WAL by rewriting it with only the events needed to
    /// recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.committer.gate.write().await;

        let logged: Vec<Event> =
            Wal::replay(&self.wal_path).map_err(|e| EngineError::WalError(e.to_string()))?;
        let folded = Ledger::new(self.zone);
        for event in &logged {
            folded.replay(event);
        }
        let events = folded.snapshot().await;
        let kept = events.len();

        let (tx, rx) = oneshot::channel();
        self.committer
            .wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;

        metrics::counter!(observability::WAL_COMPACTIONS_TOTAL).increment(1);
        info!(before = logged.len(), after = kept, "WAL compacted");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .committer
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    async fn check_references(&self, customer_id: Ulid, vehicle_id: Ulid) -> Result<(), EngineError> {
        if !self.directory.customer_exists(customer_id).await {
            return Err(EngineError::CustomerNotFound(customer_id));
        }
        if !self.directory.vehicle_exists(vehicle_id).await {
            return Err(EngineError::VehicleNotFound(vehicle_id));
        }
        if !self
            .directory
            .vehicle_belongs_to(vehicle_id, customer_id)
            .await
        {
            return Err(EngineError::VehicleNotOwned {
                vehicle_id,
                customer_id,
            });
        }
        Ok(())
    }

    /// Slot validation with rejection logging. Callers hold the day lock.
    async fn validate_slot(
        &self,
        start: DateTime<Utc>,
        duration_minutes: u32,
        exclude: Option<Ulid>,
    ) -> Result<(), EngineError> {
        SlotValidator::new(self, self.zone)
            .validate(start, duration_minutes, exclude)
            .await
            .map_err(|e| {
                metrics::counter!(observability::SLOT_REJECTIONS_TOTAL, "reason" => e.label())
                    .increment(1);
                debug!(%start, duration_minutes, "slot rejected: {e}");
                EngineError::from(e)
            })
    }
}
