use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use ulid::Ulid;

use crate::calendar::ShopConfig;
use crate::error::SchedulingError;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Span {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn from_minutes(start: DateTime<Utc>, minutes: u32) -> Self {
        Self::new(start, start + Duration::minutes(i64::from(minutes)))
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        crate::time::intervals_overlap(self.start, self.end, other.start, other.end)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Pending,
    Confirmed,
    Rejected,
    Cancelled,
}

impl Status {
    pub const ALL: [Status; 4] = [
        Status::Pending,
        Status::Confirmed,
        Status::Rejected,
        Status::Cancelled,
    ];

    pub fn is_terminal(self) -> bool {
        !matches!(self, Status::Pending)
    }

    /// Pending and confirmed appointments occupy their slot.
    pub fn blocks_slot(self) -> bool {
        matches!(self, Status::Pending | Status::Confirmed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Confirmed => "confirmed",
            Status::Rejected => "rejected",
            Status::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accepts the canonical names and the legacy Spanish ones.
impl FromStr for Status {
    type Err = SchedulingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" | "pendiente" => Ok(Status::Pending),
            "confirmed" | "confirmado" => Ok(Status::Confirmed),
            "rejected" | "rechazado" => Ok(Status::Rejected),
            "cancelled" | "canceled" | "cancelado" => Ok(Status::Cancelled),
            _ => Err(SchedulingError::InvalidStatus(s.to_string())),
        }
    }
}

/// Who asked for a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Actor {
    Customer,
    Shop,
    System,
}

impl Actor {
    pub fn as_str(self) -> &'static str {
        match self {
            Actor::Customer => "customer",
            Actor::Shop => "shop",
            Actor::System => "system",
        }
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Actor {
    type Err = SchedulingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "customer" | "cliente" => Ok(Actor::Customer),
            "shop" | "taller" => Ok(Actor::Shop),
            "system" | "sistema" => Ok(Actor::System),
            _ => Err(SchedulingError::InvalidActor(s.to_string())),
        }
    }
}

/// Free-form JSON attached to an audit record.
///
/// Human-readable formats see the JSON value as-is; binary formats (the
/// journal) carry it as JSON text since they cannot decode self-describing data.
#[derive(Debug, Clone, PartialEq)]
pub struct Metadata(pub serde_json::Value);

impl Serialize for Metadata {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            self.0.serialize(serializer)
        } else {
            serializer.serialize_str(&self.0.to_string())
        }
    }
}

impl<'de> Deserialize<'de> for Metadata {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            serde_json::Value::deserialize(deserializer).map(Metadata)
        } else {
            let text = String::deserialize(deserializer)?;
            serde_json::from_str(&text)
                .map(Metadata)
                .map_err(serde::de::Error::custom)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Ulid,
    pub customer_id: Ulid,
    pub vehicle_id: Ulid,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: u32,
    pub status: Status,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub notified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    pub fn new_pending(
        id: Ulid,
        customer_id: Ulid,
        vehicle_id: Ulid,
        scheduled_at: DateTime<Utc>,
        duration_minutes: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            customer_id,
            vehicle_id,
            scheduled_at,
            duration_minutes,
            status: Status::Pending,
            approved_at: None,
            rejected_at: None,
            cancelled_at: None,
            notified: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn span(&self) -> Span {
        Span::from_minutes(self.scheduled_at, self.duration_minutes)
    }

    /// The outcome timestamp field matching `status`, if any.
    pub fn outcome_timestamp(&self) -> Option<DateTime<Utc>> {
        match self.status {
            Status::Pending => None,
            Status::Confirmed => self.approved_at,
            Status::Rejected => self.rejected_at,
            Status::Cancelled => self.cancelled_at,
        }
    }

    /// True when at most one outcome timestamp is set and it matches `status`.
    pub fn outcome_timestamps_consistent(&self) -> bool {
        let set = [self.approved_at, self.rejected_at, self.cancelled_at]
            .iter()
            .filter(|t| t.is_some())
            .count();
        match self.status {
            Status::Pending => set == 0,
            _ => set == 1 && self.outcome_timestamp().is_some(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Ulid,
    pub appointment_id: Ulid,
    pub previous_status: Status,
    pub new_status: Status,
    pub actor: Actor,
    pub reason: Option<String>,
    pub metadata: Option<Metadata>,
    pub created_at: DateTime<Utc>,
}

/// Creation request after transport decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAppointment {
    pub customer_id: Ulid,
    pub vehicle_id: Ulid,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: Option<u32>,
}

/// Edit of a still-pending appointment. `None` keeps the current value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reschedule {
    pub scheduled_at: Option<DateTime<Utc>>,
    pub duration_minutes: Option<u32>,
    pub vehicle_id: Option<Ulid>,
}

/// The WAL record format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    ShopConfigured {
        config: ShopConfig,
    },
    AppointmentCreated {
        appointment: Appointment,
    },
    AppointmentRescheduled {
        id: Ulid,
        vehicle_id: Ulid,
        scheduled_at: DateTime<Utc>,
        duration_minutes: u32,
        updated_at: DateTime<Utc>,
    },
    StatusChanged {
        id: Ulid,
        status: Status,
        approved_at: Option<DateTime<Utc>>,
        rejected_at: Option<DateTime<Utc>>,
        cancelled_at: Option<DateTime<Utc>>,
        notified: bool,
        updated_at: DateTime<Utc>,
    },
    NotificationDelivered {
        id: Ulid,
        updated_at: DateTime<Utc>,
    },
}

impl Event {
    /// Snapshot of the status fields of `appt` as a `StatusChanged` event.
    pub fn status_of(appt: &Appointment) -> Self {
        Event::StatusChanged {
            id: appt.id,
            status: appt.status,
            approved_at: appt.approved_at,
            rejected_at: appt.rejected_at,
            cancelled_at: appt.cancelled_at,
            notified: appt.notified,
            updated_at: appt.updated_at,
        }
    }

    pub fn appointment_id(&self) -> Option<Ulid> {
        match self {
            Event::ShopConfigured { .. } => None,
            Event::AppointmentCreated { appointment } => Some(appointment.id),
            Event::AppointmentRescheduled { id, .. }
            | Event::StatusChanged { id, .. }
            | Event::NotificationDelivered { id, .. } => Some(*id),
        }
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancellationsByActor {
    pub customer: u64,
    pub shop: u64,
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancellationSummary {
    pub total_appointments: u64,
    pub cancellations: CancellationsByActor,
    /// Percentage, rounded to two decimals.
    pub cancellation_rate: f64,
}
