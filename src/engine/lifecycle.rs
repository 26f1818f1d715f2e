use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::limits::{MAX_CAUSE_LEN, MAX_STATUS_ATTEMPTS};
use crate::model::*;
use crate::store::Backend;

use super::{Engine, EngineError};

/// Resolve a requested status change.
///
/// Nothing leaves `Terminated`. Moving into `Terminated` needs a cause with
/// at least one non-whitespace character; the cause is kept verbatim.
/// `Committed` and `Accepted` may be entered from either non-terminal state.
pub fn next_status(
    current: &BookingStatus,
    target: Status,
    cause: Option<String>,
) -> Result<BookingStatus, EngineError> {
    if current.is_terminated() {
        return Err(EngineError::InvalidTransition {
            from: current.kind(),
            to: target,
        });
    }
    match target {
        Status::Committed => Ok(BookingStatus::Committed),
        Status::Accepted => Ok(BookingStatus::Accepted),
        Status::Terminated => {
            let cause = cause
                .filter(|c| !c.trim().is_empty())
                .ok_or(EngineError::MissingTerminationCause)?;
            if cause.len() > MAX_CAUSE_LEN {
                return Err(EngineError::LimitExceeded("termination cause too long"));
            }
            Ok(BookingStatus::Terminated { cause })
        }
    }
}

impl<S: Backend> Engine<S> {
    /// Move a booking to `target`. Only the provider assigned to the booking
    /// may do this. Occupancy is left untouched.
    ///
    /// The store only applies the change if the status is still the one the
    /// rule was checked against; otherwise the booking is re-read and the rule
    /// re-checked, up to [`MAX_STATUS_ATTEMPTS`] times.
    pub async fn transition(
        &self,
        actor: &Actor,
        id: Ulid,
        target: Status,
        cause: Option<String>,
    ) -> Result<Booking, EngineError> {
        let mut attempt = 1;
        loop {
            match self.transition_once(actor, id, target, cause.clone()).await {
                Err(EngineError::StoreConflict) if attempt < MAX_STATUS_ATTEMPTS => {
                    debug!(booking = %id, attempt, "status changed underneath, re-checking");
                    attempt += 1;
                }
                Err(EngineError::StoreConflict) => {
                    warn!(booking = %id, attempts = attempt, "transition gave up after repeated conflicts");
                    return Err(EngineError::Unavailable("booking is contended, try again"));
                }
                other => return other,
            }
        }
    }

    async fn transition_once(
        &self,
        actor: &Actor,
        id: Ulid,
        target: Status,
        cause: Option<String>,
    ) -> Result<Booking, EngineError> {
        let booking = self
            .store
            .get_booking(id)
            .await?
            .ok_or(EngineError::NotFound(id))?;
        if !actor.is_provider(booking.provider) {
            return Err(EngineError::Unauthorized);
        }
        let status = next_status(&booking.status, target, cause)?;
        let updated = self
            .store
            .update_booking_status(id, &booking.status, status)
            .await?;
        info!(booking = %id, from = %booking.status.kind(), to = %target, "booking status changed");
        Ok(updated)
    }
}
