//! Collaborator contracts the admission core runs against, plus the
//! journaled in-memory implementation used by the service.

mod journal;
mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error("record already exists")]
    AlreadyExists,
    /// A concurrent writer changed the record first; the caller should re-read and retry.
    #[error("conflicting concurrent write")]
    Conflict,
    #[error("journal error: {0}")]
    Journal(String),
}

#[async_trait]
pub trait SlotStore: Send + Sync {
    async fn open_slot(&self, key: SlotKey, capacity: u32) -> Result<Slot, StoreError>;

    async fn get_slot(&self, key: &SlotKey) -> Result<Option<Slot>, StoreError>;

    /// Take one seat of `booking.slot` and record `booking` as a single write.
    /// The seat is taken iff occupancy still equals `expected` and is below
    /// capacity; anything else is a [`StoreError::Conflict`] and records nothing.
    /// Either both the seat and the booking become durable or neither does.
    async fn commit_admission(&self, expected: u32, booking: Booking) -> Result<Slot, StoreError>;
}

#[async_trait]
pub trait BookingStore: Send + Sync {
    /// All bookings, terminated or not, of `patient` on `slot`.
    async fn find_bookings(
        &self,
        patient: PatientId,
        slot: &SlotKey,
    ) -> Result<Vec<Booking>, StoreError>;

    /// Record a booking without taking a seat. Admissions go through
    /// [`SlotStore::commit_admission`] instead.
    async fn create_booking(&self, booking: Booking) -> Result<Booking, StoreError>;

    async fn get_booking(&self, id: Ulid) -> Result<Option<Booking>, StoreError>;

    /// Set the status iff it still equals `expected`, otherwise
    /// [`StoreError::Conflict`].
    async fn update_booking_status(
        &self,
        id: Ulid,
        expected: &BookingStatus,
        status: BookingStatus,
    ) -> Result<Booking, StoreError>;

    async fn bookings_by_patient(&self, patient: PatientId) -> Result<Vec<Booking>, StoreError>;

    async fn bookings_by_provider(&self, provider: ProviderId)
    -> Result<Vec<Booking>, StoreError>;
}

#[async_trait]
pub trait ProviderDirectory: Send + Sync {
    async fn enroll_provider(
        &self,
        department: DepartmentId,
        provider: ProviderId,
    ) -> Result<(), StoreError>;

    /// Providers of a department in enrollment order. The order is stable and
    /// decides assignment ties.
    async fn list_providers(&self, department: DepartmentId)
    -> Result<Vec<ProviderId>, StoreError>;
}

#[async_trait]
pub trait LoadIndex: Send + Sync {
    /// Non-terminated bookings assigned to `provider` on `(date, period)`.
    async fn count_active(
        &self,
        provider: ProviderId,
        date: NaiveDate,
        period: Period,
    ) -> Result<u32, StoreError>;
}

#[async_trait]
pub trait MilestoneStore: Send + Sync {
    async fn create_milestone(&self, milestone: Milestone) -> Result<Milestone, StoreError>;

    async fn get_milestone(&self, id: Ulid) -> Result<Option<Milestone>, StoreError>;

    async fn update_milestone(
        &self,
        id: Ulid,
        activity: String,
        checked: bool,
    ) -> Result<Milestone, StoreError>;

    async fn delete_milestone(&self, id: Ulid) -> Result<(), StoreError>;

    async fn milestones_for_booking(&self, booking_id: Ulid)
    -> Result<Vec<Milestone>, StoreError>;
}

/// Everything the engine needs from its storage side.
pub trait Backend: SlotStore + BookingStore + ProviderDirectory + LoadIndex + MilestoneStore {}

impl<T> Backend for T where T: SlotStore + BookingStore + ProviderDirectory + LoadIndex + MilestoneStore
{}
