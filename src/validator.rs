use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use ulid::Ulid;

use crate::calendar::{ShopCalendar, ShopConfig};
use crate::error::SchedulingError;
use crate::limits::*;
use crate::model::{Appointment, Span};
use crate::time::ShopZone;

/// Read side the validator needs from the appointment store.
#[async_trait]
pub trait AppointmentSource: Send + Sync {
    /// Pending and confirmed appointments starting on the local date `date`.
    async fn find_active_appointments_for_day(&self, date: NaiveDate) -> Vec<Appointment>;

    /// The system-wide schedule document, or `NotConfigured`.
    async fn load_shop_config(&self) -> Result<Arc<ShopConfig>, SchedulingError>;
}

pub fn check_duration(duration_minutes: u32) -> Result<(), SchedulingError> {
    if (MIN_DURATION_MINUTES..=MAX_DURATION_MINUTES).contains(&duration_minutes) {
        Ok(())
    } else {
        Err(SchedulingError::InvalidDuration(duration_minutes))
    }
}

/// Decides whether a proposed appointment may be booked.
///
/// This is the fast-path check. Callers that commit must hold the day's
/// booking lock across `validate` and the write.
pub struct SlotValidator<'a, S: ?Sized> {
    source: &'a S,
    zone: ShopZone,
}

impl<'a, S: AppointmentSource + ?Sized> SlotValidator<'a, S> {
    pub fn new(source: &'a S, zone: ShopZone) -> Self {
        Self { source, zone }
    }

    pub async fn validate(
        &self,
        proposed_start: DateTime<Utc>,
        duration_minutes: u32,
        exclude: Option<Ulid>,
    ) -> Result<(), SchedulingError> {
        check_duration(duration_minutes)?;
        let config = self.source.load_shop_config().await?;
        let calendar = ShopCalendar::new(&config, self.zone)?;

        let local = self.zone.localize(proposed_start);
        calendar.check(&local, duration_minutes)?;

        let proposed = Span::from_minutes(proposed_start, duration_minutes);
        let candidates = self
            .source
            .find_active_appointments_for_day(local.calendar_date())
            .await;
        for existing in candidates
            .iter()
            .filter(|a| a.status.blocks_slot() && Some(a.id) != exclude)
        {
            let span = existing.span();
            if span.overlaps(&proposed) {
                return Err(SchedulingError::SlotTaken {
                    appointment_id: existing.id,
                    start: span.start,
                    end: span.end,
                });
            }
        }
        Ok(())
    }
}
