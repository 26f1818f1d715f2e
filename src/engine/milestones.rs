use tracing::debug;
use ulid::Ulid;

use crate::limits::{MAX_ACTIVITY_LEN, MAX_MILESTONES_PER_BOOKING};
use crate::model::*;
use crate::store::Backend;

use super::{Engine, EngineError};

fn check_activity(activity: &str) -> Result<(), EngineError> {
    if activity.len() > MAX_ACTIVITY_LEN {
        return Err(EngineError::LimitExceeded("milestone activity too long"));
    }
    Ok(())
}

impl<S: Backend> Engine<S> {
    /// Attach a new unchecked milestone to an existing booking. Only the
    /// provider assigned to the booking may do this.
    pub async fn create_milestone(
        &self,
        actor: &Actor,
        booking_id: Ulid,
        activity: String,
    ) -> Result<Milestone, EngineError> {
        check_activity(&activity)?;
        let booking = self
            .store
            .get_booking(booking_id)
            .await?
            .ok_or(EngineError::NotFound(booking_id))?;
        if !actor.is_provider(booking.provider) {
            return Err(EngineError::Unauthorized);
        }
        let existing = self.store.milestones_for_booking(booking_id).await?;
        if existing.len() >= MAX_MILESTONES_PER_BOOKING {
            return Err(EngineError::LimitExceeded("too many milestones on booking"));
        }
        let milestone = Milestone {
            id: Ulid::new(),
            booking_id,
            activity,
            checked: false,
        };
        let created = self.store.create_milestone(milestone).await?;
        debug!(milestone = %created.id, booking = %booking_id, %actor, "milestone created");
        Ok(created)
    }

    /// Change a milestone's activity and/or checked flag. Only the provider
    /// assigned to the owning booking may do this.
    pub async fn update_milestone(
        &self,
        actor: &Actor,
        id: Ulid,
        activity: Option<String>,
        checked: Option<bool>,
    ) -> Result<Milestone, EngineError> {
        let current = self.owned_milestone(actor, id).await?;
        let activity = activity.unwrap_or(current.activity);
        check_activity(&activity)?;
        let checked = checked.unwrap_or(current.checked);
        Ok(self.store.update_milestone(id, activity, checked).await?)
    }

    pub async fn delete_milestone(&self, actor: &Actor, id: Ulid) -> Result<(), EngineError> {
        self.owned_milestone(actor, id).await?;
        self.store.delete_milestone(id).await?;
        debug!(milestone = %id, %actor, "milestone deleted");
        Ok(())
    }

    async fn owned_milestone(&self, actor: &Actor, id: Ulid) -> Result<Milestone, EngineError> {
        let milestone = self
            .store
            .get_milestone(id)
            .await?
            .ok_or(EngineError::NotFound(id))?;
        let booking = self
            .store
            .get_booking(milestone.booking_id)
            .await?
            .ok_or(EngineError::NotFound(milestone.booking_id))?;
        if !actor.is_provider(booking.provider) {
            return Err(EngineError::Unauthorized);
        }
        Ok(milestone)
    }
}
