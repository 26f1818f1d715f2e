//! Newline-delimited JSON protocol.
//!
//! A connection starts with a `hello` frame naming the caller's role and id.
//! Each later line is one request object tagged by `op`; each gets exactly one
//! reply line, `{"ok":true,"data":…}` or `{"ok":false,"error":{"code","message"}}`.

use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDate;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::debug;
use ulid::Ulid;

use crate::engine::{Engine, EngineError};
use crate::limits::MAX_FRAME_LEN;
use crate::model::*;
use crate::observability::{REQUESTS_TOTAL, REQUEST_DURATION_SECONDS};

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("framing: {0}")]
    Lines(#[from] LinesCodecError),
    #[error("encoding reply: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Hello {
        role: Role,
        id: u64,
    },
    /// `patient` defaults to the caller; providers and admins must name one.
    Admit {
        patient: Option<PatientId>,
        department: DepartmentId,
        date: NaiveDate,
        period: Period,
    },
    Transition {
        booking: Ulid,
        status: Status,
        cause: Option<String>,
    },
    CreateMilestone {
        booking: Ulid,
        activity: String,
    },
    UpdateMilestone {
        milestone: Ulid,
        activity: Option<String>,
        checked: Option<bool>,
    },
    DeleteMilestone {
        milestone: Ulid,
    },
    Booking {
        booking: Ulid,
    },
    Bookings,
    Milestones {
        booking: Ulid,
    },
    Slot {
        department: DepartmentId,
        date: NaiveDate,
        period: Period,
    },
    OpenSlot {
        department: DepartmentId,
        date: NaiveDate,
        period: Period,
        capacity: u32,
    },
    EnrollProvider {
        department: DepartmentId,
        provider: ProviderId,
    },
}

impl Request {
    /// Short label for metrics and logs.
    pub fn op(&self) -> &'static str {
        match self {
            Request::Hello { .. } => "hello",
            Request::Admit { .. } => "admit",
            Request::Transition { .. } => "transition",
            Request::CreateMilestone { .. } => "create_milestone",
            Request::UpdateMilestone { .. } => "update_milestone",
            Request::DeleteMilestone { .. } => "delete_milestone",
            Request::Booking { .. } => "booking",
            Request::Bookings => "bookings",
            Request::Milestones { .. } => "milestones",
            Request::Slot { .. } => "slot",
            Request::OpenSlot { .. } => "open_slot",
            Request::EnrollProvider { .. } => "enroll_provider",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reply {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Reply {
    pub fn ok(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(ErrorBody {
                code: code.to_string(),
                message: message.into(),
            }),
        }
    }
}

impl From<EngineError> for Reply {
    fn from(e: EngineError) -> Self {
        Reply::error(e.code(), e.to_string())
    }
}

/// Per-connection state.
pub struct Session {
    engine: Arc<Engine>,
    actor: Option<Actor>,
}

impl Session {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            actor: None,
        }
    }

    pub fn actor(&self) -> Option<Actor> {
        self.actor
    }

    /// Decode and execute one request line.
    pub async fn handle_line(&mut self, line: &str) -> Reply {
        let request: Request = match serde_json::from_str(line) {
            Ok(r) => r,
            Err(e) => return Reply::error("bad_request", e.to_string()),
        };
        let op = request.op();
        let started = Instant::now();
        let reply = self.handle(request).await;
        let status = match &reply.error {
            None => "ok",
            Some(_) => "error",
        };
        metrics::counter!(REQUESTS_TOTAL, "op" => op, "status" => status).increment(1);
        metrics::histogram!(REQUEST_DURATION_SECONDS, "op" => op)
            .record(started.elapsed().as_secs_f64());
        reply
    }

    async fn handle(&mut self, request: Request) -> Reply {
        if let Request::Hello { role, id } = request {
            if self.actor.is_some() {
                return Reply::error("bad_request", "identity already established");
            }
            let actor = Actor::new(role, id);
            self.actor = Some(actor);
            debug!(%actor, "session identified");
            return Reply::ok(serde_json::json!({ "role": role, "id": id }));
        }
        let Some(actor) = self.actor else {
            return Reply::error("hello_required", "send a hello frame first");
        };
        match self.execute(&actor, request).await {
            Ok(data) => Reply::ok(data),
            Err(reply) => reply,
        }
    }

    async fn execute(&self, actor: &Actor, request: Request) -> Result<Value, Reply> {
        let engine = &self.engine;
        match request {
            Request::Hello { .. } => Err(Reply::error("bad_request", "unexpected hello")),
            Request::Admit {
                patient,
                department,
                date,
                period,
            } => {
                let patient = admitting_patient(actor, patient)?;
                let booking = engine
                    .admit(AdmissionRequest {
                        patient,
                        department,
                        date,
                        period,
                    })
                    .await?;
                to_value(&booking)
            }
            Request::Transition {
                booking,
                status,
                cause,
            } => to_value(&engine.transition(actor, booking, status, cause).await?),
            Request::CreateMilestone { booking, activity } => {
                to_value(&engine.create_milestone(actor, booking, activity).await?)
            }
            Request::UpdateMilestone {
                milestone,
                activity,
                checked,
            } => to_value(
                &engine
                    .update_milestone(actor, milestone, activity, checked)
                    .await?,
            ),
            Request::DeleteMilestone { milestone } => {
                engine.delete_milestone(actor, milestone).await?;
                Ok(serde_json::json!({ "deleted": milestone }))
            }
            Request::Booking { booking } => to_value(&engine.booking(actor, booking).await?),
            Request::Bookings => to_value(&engine.bookings_for(actor).await?),
            Request::Milestones { booking } => {
                to_value(&engine.milestones(actor, booking).await?)
            }
            Request::Slot {
                department,
                date,
                period,
            } => {
                let slot = engine.slot(&SlotKey::new(department, date, period)).await?;
                Ok(slot_value(&slot))
            }
            Request::OpenSlot {
                department,
                date,
                period,
                capacity,
            } => {
                let key = SlotKey::new(department, date, period);
                let slot = engine.open_slot(actor, key, capacity).await?;
                Ok(slot_value(&slot))
            }
            Request::EnrollProvider {
                department,
                provider,
            } => {
                engine.enroll_provider(actor, department, provider).await?;
                Ok(serde_json::json!({ "department": department, "provider": provider }))
            }
        }
    }
}

/// Patients admit themselves. Providers and admins admit on a patient's behalf.
fn admitting_patient(actor: &Actor, requested: Option<PatientId>) -> Result<PatientId, Reply> {
    match (actor.role, requested) {
        (Role::Patient, None) => Ok(PatientId(actor.id)),
        (Role::Patient, Some(p)) if actor.is_patient(p) => Ok(p),
        (Role::Patient, Some(_)) => Err(EngineError::Unauthorized.into()),
        (_, Some(p)) => Ok(p),
        (_, None) => Err(Reply::error(
            "bad_request",
            "patient is required when admitting on someone's behalf",
        )),
    }
}

fn slot_value(slot: &Slot) -> Value {
    serde_json::json!({
        "department": slot.key.department,
        "date": slot.key.date,
        "period": slot.key.period,
        "capacity": slot.capacity,
        "occupancy": slot.occupancy,
        "remaining": slot.remaining(),
    })
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, Reply> {
    serde_json::to_value(value).map_err(|e| Reply::error("internal", e.to_string()))
}

/// Serve one client until it disconnects.
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
) -> Result<(), ProtocolError> {
    let mut framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_FRAME_LEN));
    let mut session = Session::new(engine);

    while let Some(frame) = framed.next().await {
        let reply = match frame {
            Ok(line) if line.trim().is_empty() => continue,
            Ok(line) => session.handle_line(&line).await,
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                Reply::error("frame_too_long", format!("lines are limited to {MAX_FRAME_LEN} bytes"))
            }
            Err(e) => return Err(e.into()),
        };
        framed.send(serde_json::to_string(&reply)?).await?;
    }
    Ok(())
}
