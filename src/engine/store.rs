use std::sync::{Arc, PoisonError, RwLock as StdRwLock};

use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::calendar::ShopConfig;
use crate::model::*;
use crate::time::ShopZone;

pub type SharedAppointment = Arc<RwLock<Appointment>>;

/// In-memory projection of the event log.
pub struct Ledger {
    zone: ShopZone,
    appointments: DashMap<Ulid, SharedAppointment>,
    /// Local calendar date → appointments starting that day.
    by_day: DashMap<NaiveDate, Vec<Ulid>>,
    shop_config: StdRwLock<Option<Arc<ShopConfig>>>,
}

impl Ledger {
    pub fn new(zone: ShopZone) -> Self {
        Self {
            zone,
            appointments: DashMap::new(),
            by_day: DashMap::new(),
            shop_config: StdRwLock::new(None),
        }
    }

    pub fn zone(&self) -> ShopZone {
        self.zone
    }

    // ── Appointments ─────────────────────────────────────────

    pub fn len(&self) -> usize {
        self.appointments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.appointments.is_empty()
    }

    pub fn get(&self, id: &Ulid) -> Option<SharedAppointment> {
        self.appointments.get(id).map(|e| e.value().clone())
    }

    pub fn handles(&self) -> Vec<SharedAppointment> {
        self.appointments.iter().map(|e| e.value().clone()).collect()
    }

    pub fn insert(&self, appointment: Appointment) {
        let id = appointment.id;
        let day = self.day_of(&appointment);
        self.appointments.insert(id, Arc::new(RwLock::new(appointment)));
        self.by_day.entry(day).or_default().push(id);
    }

    // ── Day index ────────────────────────────────────────────

    pub fn day_of(&self, appointment: &Appointment) -> NaiveDate {
        self.zone.localize(appointment.scheduled_at).calendar_date()
    }

    pub fn day_handles(&self, day: NaiveDate) -> Vec<SharedAppointment> {
        let ids = self
            .by_day
            .get(&day)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        ids.iter().filter_map(|id| self.get(id)).collect()
    }

    fn move_day(&self, id: Ulid, from: NaiveDate, to: NaiveDate) {
        if from == to {
            return;
        }
        if let Some(mut ids) = self.by_day.get_mut(&from) {
            ids.retain(|x| *x != id);
        }
        self.by_day.entry(to).or_default().push(id);
    }

    // ── Shop config ──────────────────────────────────────────

    pub fn shop_config(&self) -> Option<Arc<ShopConfig>> {
        self.shop_config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_shop_config(&self, config: ShopConfig) {
        *self
            .shop_config
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(config));
    }

    // ── Event application ────────────────────────────────────

    /// Apply an event to an appointment the caller holds the write lock on.
    pub fn apply_event(&self, appt: &mut Appointment, event: &Event) {
        match event {
            Event::AppointmentRescheduled {
                vehicle_id,
                scheduled_at,
                duration_minutes,
                updated_at,
                ..
            } => {
                let from = self.day_of(appt);
                appt.vehicle_id = *vehicle_id;
                appt.scheduled_at = *scheduled_at;
                appt.duration_minutes = *duration_minutes;
                appt.updated_at = *updated_at;
                self.move_day(appt.id, from, self.day_of(appt));
            }
            Event::StatusChanged {
                status,
                approved_at,
                rejected_at,
                cancelled_at,
                notified,
                updated_at,
                ..
            } => {
                appt.status = *status;
                appt.approved_at = *approved_at;
                appt.rejected_at = *rejected_at;
                appt.cancelled_at = *cancelled_at;
                appt.notified = *notified;
                appt.updated_at = *updated_at;
            }
            Event::NotificationDelivered { updated_at, .. } => {
                appt.notified = true;
                appt.updated_at = *updated_at;
            }
            // Map-level events, see `replay`
            Event::ShopConfigured { .. } | Event::AppointmentCreated { .. } => {}
        }
    }

    /// Rebuild state from a logged event. Only called before the ledger is
    /// shared, so every lock is uncontended.
    pub fn replay(&self, event: &Event) {
        match event {
            Event::ShopConfigured { config } => self.set_shop_config(config.clone()),
            Event::AppointmentCreated { appointment } => self.insert(appointment.clone()),
            other => {
                let Some(handle) = other.appointment_id().and_then(|id| self.get(&id)) else {
                    tracing::warn!("replay: event for unknown appointment skipped");
                    return;
                };
                if let Ok(mut guard) = handle.try_write() {
                    self.apply_event(&mut guard, other);
                }
            }
        }
    }

    /// The minimal event sequence that recreates the current state.
    pub async fn snapshot(&self) -> Vec<Event> {
        let mut events = Vec::with_capacity(self.len() + 1);
        if let Some(config) = self.shop_config() {
            events.push(Event::ShopConfigured {
                config: (*config).clone(),
            });
        }
        let mut appointments = Vec::with_capacity(self.len());
        for handle in self.handles() {
            appointments.push(handle.read().await.clone());
        }
        appointments.sort_by_key(|a| a.id);
        events.extend(
            appointments
                .into_iter()
                .map(|appointment| Event::AppointmentCreated { appointment }),
        );
        events
    }
}
