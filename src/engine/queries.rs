use ulid::Ulid;

use crate::model::*;
use crate::store::Backend;

use super::{Engine, EngineError};

impl<S: Backend> Engine<S> {
    /// A single booking, if the actor may see it.
    pub async fn booking(&self, actor: &Actor, id: Ulid) -> Result<Booking, EngineError> {
        let booking = self
            .store
            .get_booking(id)
            .await?
            .ok_or(EngineError::NotFound(id))?;
        if !actor.can_view(&booking) {
            return Err(EngineError::Unauthorized);
        }
        Ok(booking)
    }

    /// Patients get their own bookings, providers the ones assigned to them.
    /// Admins have no booking list of their own.
    pub async fn bookings_for(&self, actor: &Actor) -> Result<Vec<Booking>, EngineError> {
        let mut bookings = match actor.role {
            Role::Patient => self.store.bookings_by_patient(PatientId(actor.id)).await?,
            Role::Provider => self.store.bookings_by_provider(ProviderId(actor.id)).await?,
            Role::Admin => return Err(EngineError::Unauthorized),
        };
        bookings.sort_by_key(|b| b.id);
        Ok(bookings)
    }

    pub async fn milestones(
        &self,
        actor: &Actor,
        booking_id: Ulid,
    ) -> Result<Vec<Milestone>, EngineError> {
        self.booking(actor, booking_id).await?;
        Ok(self.store.milestones_for_booking(booking_id).await?)
    }

    pub async fn slot(&self, key: &SlotKey) -> Result<Slot, EngineError> {
        self.store
            .get_slot(key)
            .await?
            .ok_or(EngineError::InvalidSlot(*key))
    }
}
