use chrono::{DateTime, NaiveDate, Utc};
use ulid::Ulid;

use crate::calendar::ShopCalendar;
use crate::model::*;
use crate::validator::{check_duration, AppointmentSource};

use super::{Engine, EngineError};

impl Engine {
    pub async fn get(&self, id: Ulid) -> Option<Appointment> {
        let handle = self.ledger.get(&id)?;
        let appt = handle.read().await;
        Some(appt.clone())
    }

    /// Every appointment matching `keep`, ordered by start.
    async fn collect(&self, keep: impl Fn(&Appointment) -> bool) -> Vec<Appointment> {
        let mut out = Vec::new();
        for handle in self.ledger.handles() {
            let appt = handle.read().await;
            if keep(&appt) {
                out.push(appt.clone());
            }
        }
        out.sort_by(|a, b| a.scheduled_at.cmp(&b.scheduled_at).then(a.id.cmp(&b.id)));
        out
    }

    pub async fn all(&self) -> Vec<Appointment> {
        self.collect(|_| true).await
    }

    /// Pending and confirmed appointments starting at or after `now`.
    pub async fn upcoming(&self, now: DateTime<Utc>) -> Vec<Appointment> {
        self.collect(|a| a.status.blocks_slot() && a.scheduled_at >= now)
            .await
    }

    /// Requests still waiting for the shop's decision.
    pub async fn pending(&self) -> Vec<Appointment> {
        self.collect(|a| a.status == Status::Pending).await
    }

    pub async fn for_vehicle(&self, vehicle_id: Ulid) -> Vec<Appointment> {
        self.collect(|a| a.vehicle_id == vehicle_id).await
    }

    pub async fn history(&self, id: Ulid) -> Result<Vec<AuditRecord>, EngineError> {
        if self.ledger.get(&id).is_none() {
            return Err(EngineError::NotFound(id));
        }
        Ok(self.audit.history(id).await)
    }

    /// Bookable starts on the local date `date` for an appointment of
    /// `duration_minutes`.
    pub async fn available_slots(
        &self,
        date: NaiveDate,
        duration_minutes: u32,
    ) -> Result<Vec<DateTime<Utc>>, EngineError> {
        check_duration(duration_minutes)?;
        let config = self.load_shop_config().await?;
        let calendar = ShopCalendar::new(&config, self.zone)?;
        let busy: Vec<Span> = self
            .find_active_appointments_for_day(date)
            .await
            .iter()
            .map(Appointment::span)
            .collect();
        Ok(calendar.open_slots(date, duration_minutes, &busy))
    }

    /// Cancellation counts by who cancelled, from the audit trail.
    pub async fn cancellation_summary(&self) -> CancellationSummary {
        let total_appointments = self.ledger.len() as u64;
        let mut customer = 0u64;
        let mut shop = 0u64;
        for record in self.audit.records().await {
            if record.new_status != Status::Cancelled {
                continue;
            }
            match record.actor {
                Actor::Customer => customer += 1,
                Actor::Shop => shop += 1,
                Actor::System => {}
            }
        }
        let total = customer + shop;
        let cancellation_rate = if total_appointments == 0 {
            0.0
        } else {
            (total as f64 / total_appointments as f64 * 10_000.0).round() / 100.0
        };
        CancellationSummary {
            total_appointments,
            cancellations: CancellationsByActor {
                customer,
                shop,
                total,
            },
            cancellation_rate,
        }
    }
}
