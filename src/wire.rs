//! Newline-delimited JSON protocol.
//!
//! Every request is one JSON object on one line, tagged by `op`. Every reply
//! is one line: `{"ok":true,"data":...}` or
//! `{"ok":false,"status":409,"kind":"slot_taken","error":"..."}`.
//! A connection that sent `listen` also receives committed events as
//! `{"event":...}` lines.

use std::io;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, NaiveDate, Utc};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::{debug, warn};
use ulid::Ulid;

use crate::calendar::ShopConfig;
use crate::engine::{Engine, EngineError};
use crate::error::ErrorKind;
use crate::lifecycle::TransitionRequest;
use crate::limits::{DEFAULT_DURATION_MINUTES, MAX_LINE_BYTES};
use crate::model::{Event, NewAppointment, Reschedule};
use crate::observability;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    ConfigureShop {
        config: ShopConfig,
    },
    Create {
        customer_id: Ulid,
        vehicle_id: Ulid,
        scheduled_at: DateTime<Utc>,
        duration_minutes: Option<u32>,
    },
    Transition {
        id: Ulid,
        status: String,
        actor: Option<String>,
        reason: Option<String>,
        metadata: Option<Value>,
    },
    MarkNotified {
        id: Ulid,
    },
    Reschedule {
        id: Ulid,
        scheduled_at: Option<DateTime<Utc>>,
        duration_minutes: Option<u32>,
        vehicle_id: Option<Ulid>,
    },
    Get {
        id: Ulid,
    },
    Upcoming {
        now: Option<DateTime<Utc>>,
    },
    Pending,
    List,
    ForVehicle {
        vehicle_id: Ulid,
    },
    History {
        id: Ulid,
    },
    Slots {
        date: NaiveDate,
        duration_minutes: Option<u32>,
    },
    CancellationSummary,
    Normalize,
    /// Stream committed events for one appointment, or all of them.
    Listen {
        id: Option<Ulid>,
    },
    Ping,
}

impl Request {
    pub fn op(&self) -> &'static str {
        match self {
            Request::ConfigureShop { .. } => "configure_shop",
            Request::Create { .. } => "create",
            Request::Transition { .. } => "transition",
            Request::MarkNotified { .. } => "mark_notified",
            Request::Reschedule { .. } => "reschedule",
            Request::Get { .. } => "get",
            Request::Upcoming { .. } => "upcoming",
            Request::Pending => "pending",
            Request::List => "list",
            Request::ForVehicle { .. } => "for_vehicle",
            Request::History { .. } => "history",
            Request::Slots { .. } => "slots",
            Request::CancellationSummary => "cancellation_summary",
            Request::Normalize => "normalize",
            Request::Listen { .. } => "listen",
            Request::Ping => "ping",
        }
    }
}

/// A failed request, ready to be written back.
#[derive(Debug, Clone, PartialEq)]
pub struct Failure {
    pub status: u16,
    pub kind: &'static str,
    pub error: String,
}

impl Failure {
    fn invalid_request(error: impl ToString) -> Self {
        Self {
            status: 400,
            kind: "invalid_request",
            error: error.to_string(),
        }
    }

    fn to_line(&self) -> String {
        json!({
            "ok": false,
            "status": self.status,
            "kind": self.kind,
            "error": self.error,
        })
        .to_string()
    }
}

impl From<EngineError> for Failure {
    fn from(e: EngineError) -> Self {
        Self {
            status: status_for(e.kind()),
            kind: e.label(),
            error: e.to_string(),
        }
    }
}

pub fn status_for(kind: ErrorKind) -> u16 {
    match kind {
        ErrorKind::InvalidInput => 400,
        ErrorKind::NotFound => 404,
        ErrorKind::Conflict | ErrorKind::Policy => 409,
        ErrorKind::Storage => 500,
        ErrorKind::NotConfigured => 503,
    }
}

fn data(value: impl Serialize) -> Result<Value, Failure> {
    serde_json::to_value(value).map_err(|e| Failure {
        status: 500,
        kind: "encode",
        error: e.to_string(),
    })
}

fn success_line(data: Value) -> String {
    json!({ "ok": true, "data": data }).to_string()
}

/// Run one request against the engine.
pub async fn dispatch(engine: &Engine, request: Request) -> Result<Value, Failure> {
    match request {
        Request::ConfigureShop { config } => {
            engine.configure_shop(config).await?;
            data(json!({ "configured": true }))
        }
        Request::Create {
            customer_id,
            vehicle_id,
            scheduled_at,
            duration_minutes,
        } => {
            let created = engine
                .create_appointment(NewAppointment {
                    customer_id,
                    vehicle_id,
                    scheduled_at,
                    duration_minutes,
                })
                .await?;
            data(created)
        }
        Request::Transition {
            id,
            status,
            actor,
            reason,
            metadata,
        } => {
            let mut request = TransitionRequest::parse(&status, actor.as_deref())
                .map_err(EngineError::from)?;
            if let Some(reason) = reason {
                request = request.with_reason(reason);
            }
            if let Some(metadata) = metadata {
                request = request.with_metadata(metadata);
            }
            data(engine.transition(id, request).await?)
        }
        Request::MarkNotified { id } => data(engine.mark_notified(id).await?),
        Request::Reschedule {
            id,
            scheduled_at,
            duration_minutes,
            vehicle_id,
        } => {
            let change = Reschedule {
                scheduled_at,
                duration_minutes,
                vehicle_id,
            };
            data(engine.reschedule(id, change).await?)
        }
        Request::Get { id } => match engine.get(id).await {
            Some(appt) => data(appt),
            None => Err(EngineError::NotFound(id).into()),
        },
        Request::Upcoming { now } => data(engine.upcoming(now.unwrap_or_else(Utc::now)).await),
        Request::Pending => data(engine.pending().await),
        Request::List => data(engine.all().await),
        Request::ForVehicle { vehicle_id } => data(engine.for_vehicle(vehicle_id).await),
        Request::History { id } => data(engine.history(id).await?),
        Request::Slots {
            date,
            duration_minutes,
        } => {
            let duration = duration_minutes.unwrap_or(DEFAULT_DURATION_MINUTES);
            data(engine.available_slots(date, duration).await?)
        }
        Request::CancellationSummary => data(engine.cancellation_summary().await),
        Request::Normalize => {
            let repaired = engine.normalize_outcome_timestamps().await?;
            data(json!({ "repaired": repaired }))
        }
        Request::Listen { .. } => Err(Failure::invalid_request(
            "listen is only available on a connection",
        )),
        Request::Ping => data("pong"),
    }
}

/// Dispatch with request metrics.
async fn respond(engine: &Engine, request: Request) -> String {
    let op = request.op();
    let started = Instant::now();
    let result = dispatch(engine, request).await;
    let status = match &result {
        Ok(_) => 200,
        Err(f) => f.status,
    };
    metrics::counter!(
        observability::REQUESTS_TOTAL,
        "op" => op,
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!(observability::REQUEST_DURATION_SECONDS, "op" => op)
        .record(started.elapsed().as_secs_f64());

    match result {
        Ok(value) => success_line(value),
        Err(failure) => {
            debug!(op, status = failure.status, kind = failure.kind, "request failed: {}", failure.error);
            failure.to_line()
        }
    }
}

/// Answer one protocol line.
pub async fn handle_line(engine: &Engine, line: &str) -> String {
    match serde_json::from_str::<Request>(line) {
        Ok(request) => respond(engine, request).await,
        Err(e) => Failure::invalid_request(e).to_line(),
    }
}

async fn next_event(events: &mut Option<broadcast::Receiver<Event>>) -> Option<Event> {
    let Some(rx) = events.as_mut() else {
        return std::future::pending().await;
    };
    loop {
        match rx.recv().await {
            Ok(event) => return Some(event),
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "listener lagged, events dropped");
            }
            Err(RecvError::Closed) => return None,
        }
    }
}

pub async fn process_connection(socket: TcpStream, engine: Arc<Engine>) -> io::Result<()> {
    let mut framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_BYTES));
    let mut events: Option<broadcast::Receiver<Event>> = None;

    loop {
        tokio::select! {
            frame = framed.next() => {
                let line = match frame {
                    None => break,
                    Some(Ok(line)) => line,
                    Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                        let failure = Failure {
                            status: 400,
                            kind: "line_too_long",
                            error: format!("request line exceeds {MAX_LINE_BYTES} bytes"),
                        };
                        framed.send(failure.to_line()).await.map_err(codec_err)?;
                        break;
                    }
                    Some(Err(LinesCodecError::Io(e))) => return Err(e),
                };
                if line.trim().is_empty() {
                    continue;
                }

                let reply = match serde_json::from_str::<Request>(&line) {
                    Ok(Request::Listen { id }) => {
                        events = Some(match id {
                            Some(id) => engine.notify.subscribe(id),
                            None => engine.notify.subscribe_all(),
                        });
                        debug!(?id, "connection listening");
                        success_line(json!({ "listening": id }))
                    }
                    Ok(request) => respond(&engine, request).await,
                    Err(e) => Failure::invalid_request(e).to_line(),
                };
                framed.send(reply).await.map_err(codec_err)?;
            }
            event = next_event(&mut events) => {
                match event {
                    Some(event) => {
                        let line = json!({ "event": event }).to_string();
                        framed.send(line).await.map_err(codec_err)?;
                    }
                    None => events = None,
                }
            }
        }
    }
    Ok(())
}

fn codec_err(e: LinesCodecError) -> io::Error {
    match e {
        LinesCodecError::Io(e) => e,
        other => io::Error::new(io::ErrorKind::InvalidData, other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use crate::audit::MemoryAuditTrail;
    use crate::directory::TrustingDirectory;
    use crate::engine::EngineOptions;
    use crate::notify::NotifyHub;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("turnero_test_wire");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn engine(name: &str) -> Engine {
        Engine::new(
            test_wal_path(name),
            Arc::new(NotifyHub::new()),
            Arc::new(MemoryAuditTrail::new()),
            Arc::new(TrustingDirectory),
            EngineOptions::default(),
        )
        .unwrap()
    }

    async fn call(engine: &Engine, line: &str) -> Value {
        serde_json::from_str(&handle_line(engine, line).await).unwrap()
    }

    fn create_line(at: &str) -> String {
        json!({
            "op": "create",
            "customer_id": Ulid::new().to_string(),
            "vehicle_id": Ulid::new().to_string(),
            "scheduled_at": at,
        })
        .to_string()
    }

    #[test]
    fn error_kinds_map_to_status_codes() {
        assert_eq!(status_for(ErrorKind::InvalidInput), 400);
        assert_eq!(status_for(ErrorKind::NotFound), 404);
        assert_eq!(status_for(ErrorKind::Policy), 409);
        assert_eq!(status_for(ErrorKind::Conflict), 409);
        assert_eq!(status_for(ErrorKind::Storage), 500);
        assert_eq!(status_for(ErrorKind::NotConfigured), 503);
    }

    #[tokio::test]
    async fn ping() {
        let e = engine("ping.wal");
        let reply = call(&e, r#"{"op":"ping"}"#).await;
        assert_eq!(reply, json!({ "ok": true, "data": "pong" }));
    }

    #[tokio::test]
    async fn malformed_json_is_invalid_request() {
        let e = engine("malformed.wal");
        let reply = call(&e, "{not json").await;
        assert_eq!(reply["ok"], false);
        assert_eq!(reply["status"], 400);
        assert_eq!(reply["kind"], "invalid_request");

        let reply = call(&e, r#"{"op":"teleport"}"#).await;
        assert_eq!(reply["kind"], "invalid_request");
    }

    #[tokio::test]
    async fn create_before_configuration_is_503() {
        let e = engine("unconfigured.wal");
        // Monday 2024-01-15 10:00 in Buenos Aires.
        let reply = call(&e, &create_line("2024-01-15T13:00:00Z")).await;
        assert_eq!(reply["status"], 503);
    }

    #[tokio::test]
    async fn booking_flow_over_lines() {
        let e = engine("flow.wal");
        let reply = call(&e, r#"{"op":"configure_shop","config":{}}"#).await;
        assert_eq!(reply["ok"], true);

        let created = call(&e, &create_line("2024-01-15T13:00:00Z")).await;
        assert_eq!(created["ok"], true);
        assert_eq!(created["data"]["status"], "pending");
        assert_eq!(created["data"]["duration_minutes"], 60);
        let id = created["data"]["id"].as_str().unwrap().to_string();

        let clash = call(&e, &create_line("2024-01-15T13:30:00Z")).await;
        assert_eq!(clash["status"], 409);
        assert_eq!(clash["kind"], "slot_taken");

        let confirm = json!({ "op": "transition", "id": id, "status": "confirmed", "actor": "shop" });
        let confirmed = call(&e, &confirm.to_string()).await;
        assert_eq!(confirmed["data"]["status"], "confirmed");
        assert_eq!(confirmed["data"]["notified"], false);

        let cancel = json!({ "op": "transition", "id": id, "status": "cancelled", "actor": "customer" });
        let refused = call(&e, &cancel.to_string()).await;
        assert_eq!(refused["status"], 409);

        let history = call(&e, &json!({ "op": "history", "id": id }).to_string()).await;
        assert_eq!(history["data"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_status_is_400() {
        let e = engine("bad_status.wal");
        call(&e, r#"{"op":"configure_shop","config":{}}"#).await;
        let created = call(&e, &create_line("2024-01-15T13:00:00Z")).await;
        let id = created["data"]["id"].as_str().unwrap();
        let line = json!({ "op": "transition", "id": id, "status": "done" }).to_string();
        let reply = call(&e, &line).await;
        assert_eq!(reply["status"], 400);
    }

    #[tokio::test]
    async fn get_unknown_is_404() {
        let e = engine("missing.wal");
        let line = json!({ "op": "get", "id": Ulid::new().to_string() }).to_string();
        let reply = call(&e, &line).await;
        assert_eq!(reply["status"], 404);
    }

    #[tokio::test]
    async fn slots_skip_booked_hours() {
        let e = engine("slots.wal");
        call(&e, r#"{"op":"configure_shop","config":{}}"#).await;
        call(&e, &create_line("2024-01-15T13:00:00Z")).await;
        let reply = call(&e, r#"{"op":"slots","date":"2024-01-15"}"#).await;
        let slots = reply["data"].as_array().unwrap();
        // 08:00..17:00 hourly, minus the 10:00 booking.
        assert_eq!(slots.len(), 8);
        assert!(!slots.contains(&json!("2024-01-15T13:00:00Z")));
    }

    #[tokio::test]
    async fn listen_needs_a_connection() {
        let e = engine("listen.wal");
        let reply = call(&e, r#"{"op":"listen"}"#).await;
        assert_eq!(reply["status"], 400);
    }
}
