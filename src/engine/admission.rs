use std::time::Instant;

use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::limits::{MAX_ADMISSION_ATTEMPTS, MAX_PROVIDERS_PER_DEPARTMENT, MAX_SLOT_CAPACITY};
use crate::model::*;
use crate::observability::{
    ADMISSIONS_TOTAL, ADMISSION_DURATION_SECONDS, ADMISSION_RETRIES_TOTAL,
};
use crate::store::{Backend, StoreError};

use super::{Engine, EngineError};

impl<S: Backend> Engine<S> {
    /// Book `request.patient` into a slot and assign the least-loaded provider.
    ///
    /// Admissions on the same slot are serialized; the whole decision
    /// (duplicate check, slot read, capacity check, assignment) re-runs if the
    /// store reports a concurrent write, up to [`MAX_ADMISSION_ATTEMPTS`] times.
    pub async fn admit(&self, request: AdmissionRequest) -> Result<Booking, EngineError> {
        let started = Instant::now();
        let key = request.slot_key();

        let mut attempt = 1;
        let result = loop {
            match self.admit_once(&request).await {
                Err(EngineError::StoreConflict) if attempt < MAX_ADMISSION_ATTEMPTS => {
                    metrics::counter!(ADMISSION_RETRIES_TOTAL).increment(1);
                    debug!(slot = %key, attempt, "store conflict, retrying admission");
                    attempt += 1;
                }
                Err(EngineError::StoreConflict) => {
                    warn!(slot = %key, attempts = attempt, "admission gave up after repeated conflicts");
                    break Err(EngineError::Unavailable("slot is contended, try again"));
                }
                other => break other,
            }
        };

        let outcome = match &result {
            Ok(_) => "admitted",
            Err(e) => e.code(),
        };
        metrics::counter!(ADMISSIONS_TOTAL, "outcome" => outcome).increment(1);
        metrics::histogram!(ADMISSION_DURATION_SECONDS).record(started.elapsed().as_secs_f64());

        match &result {
            Ok(booking) => info!(
                booking = %booking.id,
                patient = %booking.patient,
                provider = %booking.provider,
                slot = %key,
                "patient admitted"
            ),
            Err(e) => debug!(patient = %request.patient, slot = %key, "admission refused: {e}"),
        }
        result
    }

    async fn admit_once(&self, request: &AdmissionRequest) -> Result<Booking, EngineError> {
        let key = request.slot_key();
        let _guard = self.guards.lock(&key).await;

        let existing = self.store.find_bookings(request.patient, &key).await?;
        if let Some(active) = existing.iter().find(|b| b.is_active()) {
            return Err(EngineError::DuplicateBooking(active.id));
        }

        let slot = self
            .store
            .get_slot(&key)
            .await?
            .ok_or(EngineError::InvalidSlot(key))?;
        if key.date < self.today() {
            return Err(EngineError::InvalidSlot(key));
        }
        if slot.is_full() {
            return Err(EngineError::CapacityExceeded(slot.capacity));
        }

        let provider = self.select_provider(&key).await?;

        // Seat and booking land in one write, against the occupancy read above.
        let booking = Booking::new(Ulid::new(), request.patient, provider, key);
        self.store
            .commit_admission(slot.occupancy, booking.clone())
            .await?;
        Ok(booking)
    }

    /// Open a new slot. Admin only.
    pub async fn open_slot(
        &self,
        actor: &Actor,
        key: SlotKey,
        capacity: u32,
    ) -> Result<Slot, EngineError> {
        if !actor.is_admin() {
            return Err(EngineError::Unauthorized);
        }
        if capacity > MAX_SLOT_CAPACITY {
            return Err(EngineError::LimitExceeded("slot capacity too large"));
        }
        let slot = self.store.open_slot(key, capacity).await.map_err(|e| match e {
            StoreError::AlreadyExists => EngineError::SlotExists(key),
            other => other.into(),
        })?;
        info!(slot = %key, capacity, "slot opened");
        Ok(slot)
    }

    /// Enroll a provider in a department. Admin only; a provider belongs to
    /// exactly one department.
    pub async fn enroll_provider(
        &self,
        actor: &Actor,
        department: DepartmentId,
        provider: ProviderId,
    ) -> Result<(), EngineError> {
        if !actor.is_admin() {
            return Err(EngineError::Unauthorized);
        }
        let current = self.store.list_providers(department).await?;
        if current.len() >= MAX_PROVIDERS_PER_DEPARTMENT {
            return Err(EngineError::LimitExceeded("too many providers in department"));
        }
        self.store
            .enroll_provider(department, provider)
            .await
            .map_err(|e| match e {
                StoreError::AlreadyExists => EngineError::ProviderExists,
                other => other.into(),
            })?;
        info!(%department, %provider, "provider enrolled");
        Ok(())
    }
}
