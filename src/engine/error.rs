use ulid::Ulid;

use crate::model::{DepartmentId, SlotKey, Status};
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid slot: {0} does not exist or is in the past")]
    InvalidSlot(SlotKey),
    #[error("duplicate booking: {0} is still active for this slot")]
    DuplicateBooking(Ulid),
    #[error("capacity {0} exceeded: slot is full")]
    CapacityExceeded(u32),
    #[error("no eligible provider in department {0}")]
    NoEligibleProvider(DepartmentId),
    #[error("termination requires a non-empty cause")]
    MissingTerminationCause,
    #[error("cannot move a {from} booking to {to}")]
    InvalidTransition { from: Status, to: Status },
    #[error("unauthorized")]
    Unauthorized,
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("slot already open: {0}")]
    SlotExists(SlotKey),
    #[error("provider already enrolled")]
    ProviderExists,
    #[error("store conflict")]
    StoreConflict,
    #[error("unavailable: {0}")]
    Unavailable(&'static str),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("store error: {0}")]
    Store(StoreError),
}

impl EngineError {
    /// Stable snake_case code, used on the wire and as a metrics label.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::InvalidSlot(_) => "invalid_slot",
            EngineError::DuplicateBooking(_) => "duplicate_booking",
            EngineError::CapacityExceeded(_) => "capacity_exceeded",
            EngineError::NoEligibleProvider(_) => "no_eligible_provider",
            EngineError::MissingTerminationCause => "missing_termination_cause",
            EngineError::InvalidTransition { .. } => "invalid_transition",
            EngineError::Unauthorized => "unauthorized",
            EngineError::NotFound(_) => "not_found",
            EngineError::SlotExists(_) => "slot_exists",
            EngineError::ProviderExists => "provider_exists",
            EngineError::StoreConflict => "store_conflict",
            EngineError::Unavailable(_) => "unavailable",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::Store(_) => "store_error",
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict => EngineError::StoreConflict,
            other => EngineError::Store(other),
        }
    }
}
