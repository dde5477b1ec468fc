//! Appointment status lifecycle.
//!
//! Legality lives in one versioned lookup table ([`TransitionPolicy`]); the
//! effects of a legal move are computed by [`transition`] as a pure function of
//! the current appointment, the request and `now`. Persisting the result is the
//! caller's job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::SchedulingError;
use crate::limits::*;
use crate::model::*;

/// Transition table in force.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionPolicy {
    /// v1: every outcome is final.
    #[default]
    Strict,
    /// v2: a confirmed appointment may still be cancelled.
    CancelAfterConfirm,
}

impl TransitionPolicy {
    pub fn from_flag(allow_cancel_confirmed: bool) -> Self {
        if allow_cancel_confirmed {
            TransitionPolicy::CancelAfterConfirm
        } else {
            TransitionPolicy::Strict
        }
    }

    pub fn version(self) -> u32 {
        match self {
            TransitionPolicy::Strict => 1,
            TransitionPolicy::CancelAfterConfirm => 2,
        }
    }

    pub fn allowed_targets(self, from: Status) -> &'static [Status] {
        const FROM_PENDING: &[Status] = &[Status::Confirmed, Status::Rejected, Status::Cancelled];
        match (self, from) {
            (_, Status::Pending) => FROM_PENDING,
            (TransitionPolicy::CancelAfterConfirm, Status::Confirmed) => &[Status::Cancelled],
            (_, Status::Confirmed | Status::Rejected | Status::Cancelled) => &[],
        }
    }

    pub fn allows(self, from: Status, to: Status) -> bool {
        self.allowed_targets(from).contains(&to)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransitionRequest {
    pub target: Status,
    pub actor: Option<Actor>,
    pub reason: Option<String>,
    pub metadata: Option<Metadata>,
}

impl TransitionRequest {
    pub fn to(target: Status, actor: Actor) -> Self {
        Self {
            target,
            actor: Some(actor),
            reason: None,
            metadata: None,
        }
    }

    /// Build a request from transport text; unknown names are rejected here.
    pub fn parse(target: &str, actor: Option<&str>) -> Result<Self, SchedulingError> {
        let target = target.parse::<Status>()?;
        let actor = actor.map(str::parse::<Actor>).transpose()?;
        Ok(Self {
            target,
            actor,
            reason: None,
            metadata: None,
        })
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(Metadata(metadata));
        self
    }
}

/// Result of applying a request to an appointment.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Target equals the current status; nothing to write.
    Unchanged,
    Applied {
        appointment: Appointment,
        audit: AuditRecord,
    },
}

/// Decide and compute a status change. Never mutates `current`.
pub fn transition(
    policy: TransitionPolicy,
    current: &Appointment,
    request: TransitionRequest,
    now: DateTime<Utc>,
) -> Result<Transition, SchedulingError> {
    let target = request.target;
    let actor = request.actor.unwrap_or(Actor::System);
    let from = current.status;
    if from == target {
        return Ok(Transition::Unchanged);
    }
    if let Some(reason) = &request.reason
        && reason.len() > MAX_REASON_LEN
    {
        return Err(SchedulingError::InvalidFormat {
            input: "reason".into(),
            reason: "longer than the reason limit",
        });
    }
    if let Some(meta) = &request.metadata
        && meta.0.to_string().len() > MAX_METADATA_BYTES
    {
        return Err(SchedulingError::InvalidFormat {
            input: "metadata".into(),
            reason: "larger than the metadata limit",
        });
    }

    if !policy.allows(from, target) {
        return Err(SchedulingError::TerminalStateViolation { from, to: target });
    }

    let mut next = current.clone();
    next.status = target;
    set_outcome_timestamp(&mut next, target, now);
    if target == Status::Confirmed {
        next.notified = false;
    }
    next.updated_at = now;

    let audit = AuditRecord {
        id: Ulid::new(),
        appointment_id: current.id,
        previous_status: from,
        new_status: target,
        actor,
        reason: request.reason,
        metadata: request.metadata,
        created_at: now,
    };
    Ok(Transition::Applied {
        appointment: next,
        audit,
    })
}

/// Clear all outcome timestamps, then set the one that belongs to `status`.
pub fn set_outcome_timestamp(appt: &mut Appointment, status: Status, at: DateTime<Utc>) {
    appt.approved_at = None;
    appt.rejected_at = None;
    appt.cancelled_at = None;
    match status {
        Status::Pending => {}
        Status::Confirmed => appt.approved_at = Some(at),
        Status::Rejected => appt.rejected_at = Some(at),
        Status::Cancelled => appt.cancelled_at = Some(at),
    }
}

/// Repair an appointment whose outcome timestamps disagree with its status.
///
/// Keeps an existing matching timestamp, otherwise falls back to `updated_at`.
/// Returns `None` when nothing needed fixing.
pub fn normalized(appt: &Appointment) -> Option<Appointment> {
    if appt.outcome_timestamps_consistent() {
        return None;
    }
    let mut fixed = appt.clone();
    let at = appt.outcome_timestamp().unwrap_or(appt.updated_at);
    set_outcome_timestamp(&mut fixed, appt.status, at);
    Some(fixed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-01-15T15:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn pending() -> Appointment {
        let created = DateTime::parse_from_rfc3339("2024-01-10T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        Appointment::new_pending(Ulid::new(), Ulid::new(), Ulid::new(), now(), 60, created)
    }

    fn apply(policy: TransitionPolicy, appt: &Appointment, to: Status) -> Result<Transition, SchedulingError> {
        transition(policy, appt, TransitionRequest::to(to, Actor::Shop), now())
    }

    fn applied(t: Transition) -> (Appointment, AuditRecord) {
        match t {
            Transition::Applied { appointment, audit } => (appointment, audit),
            Transition::Unchanged => panic!("expected an applied transition"),
        }
    }

    #[test]
    fn pending_to_confirmed() {
        let mut appt = pending();
        appt.notified = true;
        let (next, audit) = applied(apply(TransitionPolicy::Strict, &appt, Status::Confirmed).unwrap());

        assert_eq!(next.status, Status::Confirmed);
        assert_eq!(next.approved_at, Some(now()));
        assert_eq!(next.rejected_at, None);
        assert_eq!(next.cancelled_at, None);
        assert!(!next.notified);
        assert_eq!(next.updated_at, now());
        assert_eq!(next.created_at, appt.created_at);

        assert_eq!(audit.appointment_id, appt.id);
        assert_eq!(audit.previous_status, Status::Pending);
        assert_eq!(audit.new_status, Status::Confirmed);
        assert_eq!(audit.actor, Actor::Shop);
        assert_eq!(audit.created_at, now());
    }

    #[test]
    fn every_legal_transition_sets_exactly_one_timestamp() {
        for target in [Status::Confirmed, Status::Rejected, Status::Cancelled] {
            let (next, _) = applied(apply(TransitionPolicy::Strict, &pending(), target).unwrap());
            assert!(next.outcome_timestamps_consistent(), "{target}");
            assert_eq!(next.outcome_timestamp(), Some(now()));
        }
    }

    #[test]
    fn terminal_states_are_closed_under_strict_policy() {
        for terminal in [Status::Confirmed, Status::Rejected, Status::Cancelled] {
            let (appt, _) = applied(apply(TransitionPolicy::Strict, &pending(), terminal).unwrap());
            for target in Status::ALL {
                if target == terminal {
                    continue;
                }
                let err = apply(TransitionPolicy::Strict, &appt, target).unwrap_err();
                assert_eq!(
                    err,
                    SchedulingError::TerminalStateViolation {
                        from: terminal,
                        to: target
                    }
                );
            }
        }
    }

    #[test]
    fn same_status_is_a_no_op() {
        let appt = pending();
        assert_eq!(
            apply(TransitionPolicy::Strict, &appt, Status::Pending).unwrap(),
            Transition::Unchanged
        );
        let (confirmed, _) = applied(apply(TransitionPolicy::Strict, &appt, Status::Confirmed).unwrap());
        assert_eq!(
            apply(TransitionPolicy::Strict, &confirmed, Status::Confirmed).unwrap(),
            Transition::Unchanged
        );
    }

    #[test]
    fn cancel_after_confirm_policy() {
        let policy = TransitionPolicy::CancelAfterConfirm;
        let (confirmed, _) = applied(apply(policy, &pending(), Status::Confirmed).unwrap());
        let (cancelled, audit) = applied(apply(policy, &confirmed, Status::Cancelled).unwrap());
        assert_eq!(cancelled.status, Status::Cancelled);
        assert_eq!(cancelled.approved_at, None);
        assert_eq!(cancelled.cancelled_at, Some(now()));
        assert_eq!(audit.previous_status, Status::Confirmed);

        // Still no way back from confirmed to rejected.
        assert!(matches!(
            apply(policy, &confirmed, Status::Rejected),
            Err(SchedulingError::TerminalStateViolation { .. })
        ));
    }

    #[test]
    fn policy_table() {
        assert_eq!(TransitionPolicy::Strict.version(), 1);
        assert_eq!(TransitionPolicy::CancelAfterConfirm.version(), 2);
        assert_eq!(TransitionPolicy::from_flag(true), TransitionPolicy::CancelAfterConfirm);
        assert!(TransitionPolicy::Strict.allowed_targets(Status::Cancelled).is_empty());
        assert!(!TransitionPolicy::Strict.allows(Status::Pending, Status::Pending));
    }

    #[test]
    fn parse_rejects_unknown_status() {
        assert_eq!(
            TransitionRequest::parse("archived", Some("shop")).unwrap_err(),
            SchedulingError::InvalidStatus("archived".into())
        );
        let req = TransitionRequest::parse("cancelado", Some("cliente")).unwrap();
        assert_eq!(req.target, Status::Cancelled);
        assert_eq!(req.actor, Some(Actor::Customer));
    }

    #[test]
    fn default_actor_is_system_and_reason_is_kept() {
        let request = TransitionRequest {
            target: Status::Rejected,
            actor: None,
            reason: None,
            metadata: None,
        }
        .with_reason("no parts in stock")
        .with_metadata(serde_json::json!({"part": "alternator"}));
        let (_, audit) = applied(transition(TransitionPolicy::Strict, &pending(), request, now()).unwrap());
        assert_eq!(audit.actor, Actor::System);
        assert_eq!(audit.reason.as_deref(), Some("no parts in stock"));
        assert_eq!(audit.metadata, Some(Metadata(serde_json::json!({"part": "alternator"}))));
    }

    #[test]
    fn oversized_reason_rejected() {
        let request = TransitionRequest::to(Status::Cancelled, Actor::Customer)
            .with_reason("x".repeat(MAX_REASON_LEN + 1));
        assert!(transition(TransitionPolicy::Strict, &pending(), request, now()).is_err());
    }

    #[test]
    fn no_op_ignores_payload_limits() {
        let request = TransitionRequest::to(Status::Pending, Actor::Shop)
            .with_reason("x".repeat(MAX_REASON_LEN + 1));
        assert_eq!(
            transition(TransitionPolicy::Strict, &pending(), request, now()).unwrap(),
            Transition::Unchanged
        );
    }

    #[test]
    fn normalize_fills_missing_and_clears_stray_timestamps() {
        let mut appt = pending();
        appt.status = Status::Cancelled;
        appt.approved_at = Some(now());
        let fixed = normalized(&appt).unwrap();
        assert_eq!(fixed.approved_at, None);
        assert_eq!(fixed.cancelled_at, Some(appt.updated_at));
        assert!(fixed.outcome_timestamps_consistent());
        assert!(normalized(&fixed).is_none());
    }
}
