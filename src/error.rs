use chrono::{DateTime, NaiveDate, Utc, Weekday};
use thiserror::Error;
use ulid::Ulid;

use crate::model::Status;
use crate::time::ClockTime;

/// Coarse classification used by callers to pick a transport response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotConfigured,
    InvalidInput,
    Policy,
    Conflict,
    NotFound,
    Storage,
}

/// Rejections produced by the scheduling core. Every variant is side-effect free.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchedulingError {
    #[error("shop schedule is not configured")]
    NotConfigured,

    #[error("invalid format {input:?}: {reason}")]
    InvalidFormat { input: String, reason: &'static str },

    #[error("invalid status: {0:?}")]
    InvalidStatus(String),

    #[error("invalid actor: {0:?}")]
    InvalidActor(String),

    #[error("invalid duration {0} min")]
    InvalidDuration(u32),

    #[error("invalid shop config: {0}")]
    InvalidConfig(String),

    #[error("shop is on vacation from {start} to {end}")]
    ShopOnVacation { start: NaiveDate, end: NaiveDate },

    #[error("shop is closed on {0}")]
    ShopClosed(NaiveDate),

    #[error("shop does not work on {0}")]
    NonWorkingWeekday(Weekday),

    #[error("[{start}, {end}) is outside business hours [{open}, {close})")]
    OutsideBusinessHours {
        start: ClockTime,
        end: ClockTime,
        open: ClockTime,
        close: ClockTime,
    },

    #[error("slot taken by appointment {appointment_id} [{start}, {end})")]
    SlotTaken {
        appointment_id: Ulid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("appointment is {from} and cannot move to {to}")]
    TerminalStateViolation { from: Status, to: Status },
}

impl SchedulingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SchedulingError::NotConfigured => ErrorKind::NotConfigured,
            SchedulingError::InvalidFormat { .. }
            | SchedulingError::InvalidStatus(_)
            | SchedulingError::InvalidActor(_)
            | SchedulingError::InvalidDuration(_)
            | SchedulingError::InvalidConfig(_) => ErrorKind::InvalidInput,
            SchedulingError::ShopOnVacation { .. }
            | SchedulingError::ShopClosed(_)
            | SchedulingError::NonWorkingWeekday(_)
            | SchedulingError::OutsideBusinessHours { .. } => ErrorKind::Policy,
            SchedulingError::SlotTaken { .. } | SchedulingError::TerminalStateViolation { .. } => {
                ErrorKind::Conflict
            }
        }
    }

    /// Short stable label, used as a metrics dimension.
    pub fn label(&self) -> &'static str {
        match self {
            SchedulingError::NotConfigured => "not_configured",
            SchedulingError::InvalidFormat { .. } => "invalid_format",
            SchedulingError::InvalidStatus(_) => "invalid_status",
            SchedulingError::InvalidActor(_) => "invalid_actor",
            SchedulingError::InvalidDuration(_) => "invalid_duration",
            SchedulingError::InvalidConfig(_) => "invalid_config",
            SchedulingError::ShopOnVacation { .. } => "shop_on_vacation",
            SchedulingError::ShopClosed(_) => "shop_closed",
            SchedulingError::NonWorkingWeekday(_) => "non_working_weekday",
            SchedulingError::OutsideBusinessHours { .. } => "outside_business_hours",
            SchedulingError::SlotTaken { .. } => "slot_taken",
            SchedulingError::TerminalStateViolation { .. } => "terminal_state_violation",
        }
    }
}
