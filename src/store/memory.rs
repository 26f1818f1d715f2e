use std::io;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};
use ulid::Ulid;

use crate::model::*;

use super::journal::Journal;
use super::{BookingStore, LoadIndex, MilestoneStore, ProviderDirectory, SlotStore, StoreError};

type SharedSlot = Arc<Mutex<Slot>>;

/// DashMap-backed store. With a journal every mutation is written ahead to the
/// WAL before it becomes visible; without one it is purely volatile.
pub struct MemoryStore {
    slots: DashMap<SlotKey, SharedSlot>,
    bookings: DashMap<Ulid, Booking>,
    /// (patient, slot) → bookings, for the duplicate check.
    claims: DashMap<(PatientId, SlotKey), Vec<Ulid>>,
    by_patient: DashMap<PatientId, Vec<Ulid>>,
    by_provider: DashMap<ProviderId, Vec<Ulid>>,
    providers: DashMap<DepartmentId, Vec<ProviderId>>,
    milestones: DashMap<Ulid, Milestone>,
    /// Booking → milestones in creation order.
    by_booking: DashMap<Ulid, Vec<Ulid>>,
    journal: Option<Journal>,
    /// Mutations hold this shared across journal-then-apply; compaction takes it
    /// exclusively so its snapshot never misses an in-flight write.
    compaction: RwLock<()>,
    /// Serializes slot opening and provider enrollment.
    directory: Mutex<()>,
    /// Serializes status compare-and-set.
    lifecycle: Mutex<()>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// A volatile store with no journal.
    pub fn new() -> Self {
        Self::with_journal(None)
    }

    /// Open a journaled store at `path`, rebuilding state from the log.
    /// Spawns the group-commit writer, so it must run inside a tokio runtime.
    pub fn open(path: &Path) -> io::Result<Self> {
        let (journal, events) = Journal::open(path)?;
        let store = Self::with_journal(Some(journal));
        let mut skipped = 0usize;
        for (index, event) in events.iter().enumerate() {
            if let Err(e) = store.apply(event) {
                warn!(index, ?event, error = %e, "journal event does not apply, skipping");
                skipped += 1;
            }
        }
        info!(
            path = %path.display(),
            events = events.len(),
            skipped,
            slots = store.slots.len(),
            bookings = store.bookings.len(),
            "store replayed"
        );
        Ok(store)
    }

    fn with_journal(journal: Option<Journal>) -> Self {
        Self {
            slots: DashMap::new(),
            bookings: DashMap::new(),
            claims: DashMap::new(),
            by_patient: DashMap::new(),
            by_provider: DashMap::new(),
            providers: DashMap::new(),
            milestones: DashMap::new(),
            by_booking: DashMap::new(),
            journal,
            compaction: RwLock::new(()),
            directory: Mutex::new(()),
            lifecycle: Mutex::new(()),
        }
    }

    pub fn is_journaled(&self) -> bool {
        self.journal.is_some()
    }

    pub async fn appends_since_compact(&self) -> u64 {
        match &self.journal {
            Some(journal) => journal.appends_since_compact().await,
            None => 0,
        }
    }

    /// Rewrite the journal as the minimal event set that recreates the current state.
    pub async fn compact(&self) -> Result<usize, StoreError> {
        let Some(journal) = &self.journal else {
            return Ok(0);
        };
        let _exclusive = self.compaction.write().await;
        let events = self.snapshot().await;
        let count = events.len();
        journal.compact(events).await?;
        Ok(count)
    }

    async fn snapshot(&self) -> Vec<Event> {
        let mut events = Vec::new();

        let slots: Vec<SharedSlot> = self.slots.iter().map(|e| e.value().clone()).collect();
        let mut opened = Vec::with_capacity(slots.len());
        for slot in slots {
            opened.push(*slot.lock().await);
        }
        opened.sort_by_key(|s| s.key);
        events.extend(opened.into_iter().map(|s| Event::SlotOpened {
            key: s.key,
            capacity: s.capacity,
            occupancy: s.occupancy,
        }));

        let mut departments: Vec<(DepartmentId, Vec<ProviderId>)> = self
            .providers
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        departments.sort_by_key(|(d, _)| *d);
        for (department, providers) in departments {
            for provider in providers {
                events.push(Event::ProviderEnrolled {
                    department,
                    provider,
                });
            }
        }

        let mut bookings: Vec<Booking> = self.bookings.iter().map(|e| e.value().clone()).collect();
        bookings.sort_by_key(|b| b.id);
        for booking in bookings {
            let milestone_ids = self
                .by_booking
                .get(&booking.id)
                .map(|e| e.value().clone())
                .unwrap_or_default();
            events.push(Event::BookingCreated { booking });
            for id in milestone_ids {
                if let Some(m) = self.milestones.get(&id) {
                    events.push(Event::MilestoneCreated {
                        milestone: m.value().clone(),
                    });
                }
            }
        }

        events
    }

    async fn persist(&self, event: &Event) -> Result<(), StoreError> {
        match &self.journal {
            Some(journal) => journal.append(event).await,
            None => Ok(()),
        }
    }

    fn slot_handle(&self, key: &SlotKey) -> Option<SharedSlot> {
        self.slots.get(key).map(|e| e.value().clone())
    }

    /// Apply a journaled event to memory. Live writers check the same
    /// preconditions before persisting, so an `Err` here only shows up on replay
    /// of a journal that disagrees with itself.
    fn apply(&self, event: &Event) -> Result<(), StoreError> {
        match event {
            Event::SlotOpened {
                key,
                capacity,
                occupancy,
            } => {
                let slot = Slot {
                    key: *key,
                    capacity: *capacity,
                    occupancy: *occupancy,
                };
                self.slots.insert(*key, Arc::new(Mutex::new(slot)));
            }
            Event::Admitted { booking } => {
                let handle = self.slot_handle(&booking.slot).ok_or(StoreError::NotFound)?;
                let mut slot = handle.try_lock().map_err(|_| StoreError::Conflict)?;
                if slot.is_full() {
                    return Err(StoreError::Conflict);
                }
                if self.bookings.contains_key(&booking.id) {
                    return Err(StoreError::AlreadyExists);
                }
                slot.occupancy += 1;
                self.index_booking(booking.clone());
            }
            Event::ProviderEnrolled {
                department,
                provider,
            } => {
                let mut list = self.providers.entry(*department).or_default();
                if !list.contains(provider) {
                    list.push(*provider);
                }
            }
            Event::BookingCreated { booking } => {
                if self.bookings.contains_key(&booking.id) {
                    return Err(StoreError::AlreadyExists);
                }
                self.index_booking(booking.clone());
            }
            Event::BookingStatusChanged { id, status } => {
                let mut booking = self.bookings.get_mut(id).ok_or(StoreError::NotFound)?;
                booking.status = status.clone();
            }
            Event::MilestoneCreated { milestone } => {
                if !self.bookings.contains_key(&milestone.booking_id) {
                    return Err(StoreError::NotFound);
                }
                self.by_booking
                    .entry(milestone.booking_id)
                    .or_default()
                    .push(milestone.id);
                self.milestones.insert(milestone.id, milestone.clone());
            }
            Event::MilestoneUpdated {
                id,
                activity,
                checked,
            } => {
                let mut m = self.milestones.get_mut(id).ok_or(StoreError::NotFound)?;
                m.activity = activity.clone();
                m.checked = *checked;
            }
            Event::MilestoneDeleted { id } => {
                let (_, m) = self.milestones.remove(id).ok_or(StoreError::NotFound)?;
                if let Some(mut ids) = self.by_booking.get_mut(&m.booking_id) {
                    ids.retain(|x| x != id);
                }
            }
        }
        Ok(())
    }

    fn index_booking(&self, booking: Booking) {
        self.claims
            .entry((booking.patient, booking.slot))
            .or_default()
            .push(booking.id);
        self.by_patient
            .entry(booking.patient)
            .or_default()
            .push(booking.id);
        self.by_provider
            .entry(booking.provider)
            .or_default()
            .push(booking.id);
        self.bookings.insert(booking.id, booking);
    }

    fn collect_bookings(&self, ids: &[Ulid]) -> Vec<Booking> {
        ids.iter()
            .filter_map(|id| self.bookings.get(id).map(|b| b.value().clone()))
            .collect()
    }

    fn index_ids<K>(index: &DashMap<K, Vec<Ulid>>, key: &K) -> Vec<Ulid>
    where
        K: std::hash::Hash + Eq,
    {
        index.get(key).map(|e| e.value().clone()).unwrap_or_default()
    }
}

#[async_trait]
impl SlotStore for MemoryStore {
    async fn open_slot(&self, key: SlotKey, capacity: u32) -> Result<Slot, StoreError> {
        let _shared = self.compaction.read().await;
        let _directory = self.directory.lock().await;
        if self.slots.contains_key(&key) {
            return Err(StoreError::AlreadyExists);
        }
        let event = Event::SlotOpened {
            key,
            capacity,
            occupancy: 0,
        };
        self.persist(&event).await?;
        self.apply(&event)?;
        Ok(Slot::new(key, capacity))
    }

    async fn get_slot(&self, key: &SlotKey) -> Result<Option<Slot>, StoreError> {
        match self.slot_handle(key) {
            Some(slot) => Ok(Some(*slot.lock().await)),
            None => Ok(None),
        }
    }

    async fn commit_admission(&self, expected: u32, booking: Booking) -> Result<Slot, StoreError> {
        let _shared = self.compaction.read().await;
        let handle = self.slot_handle(&booking.slot).ok_or(StoreError::NotFound)?;
        let mut slot = handle.lock().await;
        if slot.occupancy != expected || slot.is_full() {
            return Err(StoreError::Conflict);
        }
        if self.bookings.contains_key(&booking.id) {
            return Err(StoreError::AlreadyExists);
        }
        self.persist(&Event::Admitted {
            booking: booking.clone(),
        })
        .await?;
        slot.occupancy += 1;
        self.index_booking(booking);
        Ok(*slot)
    }
}

#[async_trait]
impl BookingStore for MemoryStore {
    async fn find_bookings(
        &self,
        patient: PatientId,
        slot: &SlotKey,
    ) -> Result<Vec<Booking>, StoreError> {
        let ids = Self::index_ids(&self.claims, &(patient, *slot));
        Ok(self.collect_bookings(&ids))
    }

    async fn create_booking(&self, booking: Booking) -> Result<Booking, StoreError> {
        let _shared = self.compaction.read().await;
        if self.bookings.contains_key(&booking.id) {
            return Err(StoreError::AlreadyExists);
        }
        let event = Event::BookingCreated {
            booking: booking.clone(),
        };
        self.persist(&event).await?;
        self.apply(&event)?;
        Ok(booking)
    }

    async fn get_booking(&self, id: Ulid) -> Result<Option<Booking>, StoreError> {
        Ok(self.bookings.get(&id).map(|b| b.value().clone()))
    }

    async fn update_booking_status(
        &self,
        id: Ulid,
        expected: &BookingStatus,
        status: BookingStatus,
    ) -> Result<Booking, StoreError> {
        let _shared = self.compaction.read().await;
        let _lifecycle = self.lifecycle.lock().await;
        let current = self
            .bookings
            .get(&id)
            .map(|b| b.status.clone())
            .ok_or(StoreError::NotFound)?;
        if current != *expected {
            return Err(StoreError::Conflict);
        }
        let event = Event::BookingStatusChanged { id, status };
        self.persist(&event).await?;
        self.apply(&event)?;
        self.bookings
            .get(&id)
            .map(|b| b.value().clone())
            .ok_or(StoreError::NotFound)
    }

    async fn bookings_by_patient(&self, patient: PatientId) -> Result<Vec<Booking>, StoreError> {
        Ok(self.collect_bookings(&Self::index_ids(&self.by_patient, &patient)))
    }

    async fn bookings_by_provider(
        &self,
        provider: ProviderId,
    ) -> Result<Vec<Booking>, StoreError> {
        Ok(self.collect_bookings(&Self::index_ids(&self.by_provider, &provider)))
    }
}

#[async_trait]
impl ProviderDirectory for MemoryStore {
    async fn enroll_provider(
        &self,
        department: DepartmentId,
        provider: ProviderId,
    ) -> Result<(), StoreError> {
        let _shared = self.compaction.read().await;
        let _directory = self.directory.lock().await;
        let enrolled = self.providers.iter().any(|e| e.value().contains(&provider));
        if enrolled {
            return Err(StoreError::AlreadyExists);
        }
        let event = Event::ProviderEnrolled {
            department,
            provider,
        };
        self.persist(&event).await?;
        self.apply(&event)?;
        Ok(())
    }

    async fn list_providers(
        &self,
        department: DepartmentId,
    ) -> Result<Vec<ProviderId>, StoreError> {
        Ok(self
            .providers
            .get(&department)
            .map(|e| e.value().clone())
            .unwrap_or_default())
    }
}

#[async_trait]
impl LoadIndex for MemoryStore {
    async fn count_active(
        &self,
        provider: ProviderId,
        date: NaiveDate,
        period: Period,
    ) -> Result<u32, StoreError> {
        let ids = Self::index_ids(&self.by_provider, &provider);
        let count = ids
            .iter()
            .filter_map(|id| self.bookings.get(id))
            .filter(|b| b.slot.date == date && b.slot.period == period && b.is_active())
            .count();
        Ok(count as u32)
    }
}

#[async_trait]
impl MilestoneStore for MemoryStore {
    async fn create_milestone(&self, milestone: Milestone) -> Result<Milestone, StoreError> {
        let _shared = self.compaction.read().await;
        if !self.bookings.contains_key(&milestone.booking_id) {
            return Err(StoreError::NotFound);
        }
        if self.milestones.contains_key(&milestone.id) {
            return Err(StoreError::AlreadyExists);
        }
        let event = Event::MilestoneCreated {
            milestone: milestone.clone(),
        };
        self.persist(&event).await?;
        self.apply(&event)?;
        Ok(milestone)
    }

    async fn get_milestone(&self, id: Ulid) -> Result<Option<Milestone>, StoreError> {
        Ok(self.milestones.get(&id).map(|m| m.value().clone()))
    }

    async fn update_milestone(
        &self,
        id: Ulid,
        activity: String,
        checked: bool,
    ) -> Result<Milestone, StoreError> {
        let _shared = self.compaction.read().await;
        if !self.milestones.contains_key(&id) {
            return Err(StoreError::NotFound);
        }
        let event = Event::MilestoneUpdated {
            id,
            activity,
            checked,
        };
        self.persist(&event).await?;
        self.apply(&event)?;
        self.milestones
            .get(&id)
            .map(|m| m.value().clone())
            .ok_or(StoreError::NotFound)
    }

    async fn delete_milestone(&self, id: Ulid) -> Result<(), StoreError> {
        let _shared = self.compaction.read().await;
        if !self.milestones.contains_key(&id) {
            return Err(StoreError::NotFound);
        }
        let event = Event::MilestoneDeleted { id };
        self.persist(&event).await?;
        self.apply(&event)?;
        Ok(())
    }

    async fn milestones_for_booking(
        &self,
        booking_id: Ulid,
    ) -> Result<Vec<Milestone>, StoreError> {
        let ids = Self::index_ids(&self.by_booking, &booking_id);
        Ok(ids
            .iter()
            .filter_map(|id| self.milestones.get(id).map(|m| m.value().clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal::Wal;
    use std::path::PathBuf;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("regdesk_test_store");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn key(period: Period) -> SlotKey {
        SlotKey::new(
            DepartmentId(1),
            NaiveDate::from_ymd_opt(2030, 6, 1).unwrap(),
            period,
        )
    }

    fn booking(patient: u64, provider: u64, slot: SlotKey) -> Booking {
        Booking::new(Ulid::new(), PatientId(patient), ProviderId(provider), slot)
    }

    #[tokio::test]
    async fn admission_is_compare_and_set() {
        let store = MemoryStore::new();
        let k = key(Period::Morning);
        store.open_slot(k, 2).await.unwrap();

        let first = booking(1, 10, k);
        let slot = store.commit_admission(0, first.clone()).await.unwrap();
        assert_eq!(slot.occupancy, 1);
        // Stale expectation loses and records nothing.
        let stale = booking(2, 10, k);
        assert_eq!(
            store.commit_admission(0, stale.clone()).await,
            Err(StoreError::Conflict)
        );
        assert!(store.get_booking(stale.id).await.unwrap().is_none());

        store.commit_admission(1, booking(3, 10, k)).await.unwrap();
        // Full.
        assert_eq!(
            store.commit_admission(2, booking(4, 10, k)).await,
            Err(StoreError::Conflict)
        );
        assert_eq!(store.get_slot(&k).await.unwrap().unwrap().occupancy, 2);
        assert_eq!(store.find_bookings(PatientId(1), &k).await.unwrap(), vec![first]);
    }

    #[tokio::test]
    async fn status_update_is_compare_and_set() {
        let store = MemoryStore::new();
        let b = store.create_booking(booking(1, 10, key(Period::Morning))).await.unwrap();

        let accepted = store
            .update_booking_status(b.id, &BookingStatus::Committed, BookingStatus::Accepted)
            .await
            .unwrap();
        assert_eq!(accepted.status, BookingStatus::Accepted);

        // A writer that still believes the booking is committed loses.
        let terminated = BookingStatus::Terminated { cause: "no show".into() };
        assert_eq!(
            store
                .update_booking_status(b.id, &BookingStatus::Committed, terminated.clone())
                .await,
            Err(StoreError::Conflict)
        );
        assert_eq!(
            store.get_booking(b.id).await.unwrap().unwrap().status,
            BookingStatus::Accepted
        );
        assert_eq!(
            store
                .update_booking_status(Ulid::new(), &BookingStatus::Committed, terminated)
                .await,
            Err(StoreError::NotFound)
        );
    }

    #[tokio::test]
    async fn open_slot_twice_rejected() {
        let store = MemoryStore::new();
        let k = key(Period::WholeDay);
        store.open_slot(k, 1).await.unwrap();
        assert_eq!(store.open_slot(k, 5).await, Err(StoreError::AlreadyExists));
        assert_eq!(store.get_slot(&k).await.unwrap().unwrap().capacity, 1);
    }

    #[tokio::test]
    async fn missing_slot_reads_none() {
        let store = MemoryStore::new();
        assert!(store.get_slot(&key(Period::Morning)).await.unwrap().is_none());
        assert_eq!(
            store
                .commit_admission(0, booking(1, 10, key(Period::Morning)))
                .await,
            Err(StoreError::NotFound)
        );
    }

    #[tokio::test]
    async fn find_bookings_scoped_to_patient_and_slot() {
        let store = MemoryStore::new();
        let morning = key(Period::Morning);
        let afternoon = key(Period::Afternoon);
        let b1 = store.create_booking(booking(1, 10, morning)).await.unwrap();
        store.create_booking(booking(1, 10, afternoon)).await.unwrap();
        store.create_booking(booking(2, 10, morning)).await.unwrap();

        let found = store.find_bookings(PatientId(1), &morning).await.unwrap();
        assert_eq!(found, vec![b1]);
        assert_eq!(store.bookings_by_patient(PatientId(1)).await.unwrap().len(), 2);
        assert_eq!(store.bookings_by_provider(ProviderId(10)).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn count_active_skips_terminated_and_other_periods() {
        let store = MemoryStore::new();
        let morning = key(Period::Morning);
        let whole = key(Period::WholeDay);
        let b1 = store.create_booking(booking(1, 10, morning)).await.unwrap();
        store.create_booking(booking(2, 10, morning)).await.unwrap();
        store.create_booking(booking(3, 10, whole)).await.unwrap();

        let date = morning.date;
        assert_eq!(store.count_active(ProviderId(10), date, Period::Morning).await.unwrap(), 2);
        assert_eq!(store.count_active(ProviderId(10), date, Period::WholeDay).await.unwrap(), 1);

        store
            .update_booking_status(
                b1.id,
                &BookingStatus::Committed,
                BookingStatus::Terminated { cause: "no show".into() },
            )
            .await
            .unwrap();
        assert_eq!(store.count_active(ProviderId(10), date, Period::Morning).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn providers_listed_in_enrollment_order() {
        let store = MemoryStore::new();
        for p in [30, 10, 20] {
            store.enroll_provider(DepartmentId(1), ProviderId(p)).await.unwrap();
        }
        assert_eq!(
            store.list_providers(DepartmentId(1)).await.unwrap(),
            vec![ProviderId(30), ProviderId(10), ProviderId(20)]
        );
        // A provider belongs to exactly one department.
        assert_eq!(
            store.enroll_provider(DepartmentId(2), ProviderId(10)).await,
            Err(StoreError::AlreadyExists)
        );
        assert!(store.list_providers(DepartmentId(2)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn milestone_crud() {
        let store = MemoryStore::new();
        let b = store.create_booking(booking(1, 10, key(Period::Morning))).await.unwrap();
        let m = Milestone {
            id: Ulid::new(),
            booking_id: b.id,
            activity: "blood test".into(),
            checked: false,
        };
        store.create_milestone(m.clone()).await.unwrap();
        let updated = store.update_milestone(m.id, "blood test".into(), true).await.unwrap();
        assert!(updated.checked);
        assert_eq!(store.milestones_for_booking(b.id).await.unwrap(), vec![updated]);

        store.delete_milestone(m.id).await.unwrap();
        assert!(store.get_milestone(m.id).await.unwrap().is_none());
        assert!(store.milestones_for_booking(b.id).await.unwrap().is_empty());
        assert_eq!(store.delete_milestone(m.id).await, Err(StoreError::NotFound));
    }

    #[tokio::test]
    async fn milestone_requires_booking() {
        let store = MemoryStore::new();
        let orphan = Milestone {
            id: Ulid::new(),
            booking_id: Ulid::new(),
            activity: "x-ray".into(),
            checked: false,
        };
        assert_eq!(store.create_milestone(orphan).await, Err(StoreError::NotFound));
    }

    #[tokio::test]
    async fn journal_replay_restores_state() {
        let path = test_wal_path("replay.wal");
        let k = key(Period::Morning);
        let (b1, m1) = {
            let store = MemoryStore::open(&path).unwrap();
            store.open_slot(k, 3).await.unwrap();
            store.enroll_provider(DepartmentId(1), ProviderId(10)).await.unwrap();
            let b1 = booking(1, 10, k);
            store.commit_admission(0, b1.clone()).await.unwrap();
            let b1 = store
                .update_booking_status(b1.id, &BookingStatus::Committed, BookingStatus::Accepted)
                .await
                .unwrap();
            let m1 = store
                .create_milestone(Milestone {
                    id: Ulid::new(),
                    booking_id: b1.id,
                    activity: "triage".into(),
                    checked: false,
                })
                .await
                .unwrap();
            (b1, m1)
        };

        let store = MemoryStore::open(&path).unwrap();
        assert_eq!(store.get_slot(&k).await.unwrap().unwrap().occupancy, 1);
        assert_eq!(store.get_booking(b1.id).await.unwrap(), Some(b1.clone()));
        assert_eq!(store.find_bookings(PatientId(1), &k).await.unwrap(), vec![b1.clone()]);
        assert_eq!(store.list_providers(DepartmentId(1)).await.unwrap(), vec![ProviderId(10)]);
        assert_eq!(store.milestones_for_booking(b1.id).await.unwrap(), vec![m1]);
    }

    #[tokio::test]
    async fn admission_is_one_journal_entry() {
        let path = test_wal_path("admission_entry.wal");
        let k = key(Period::Morning);
        let b = booking(1, 10, k);
        {
            let store = MemoryStore::open(&path).unwrap();
            store.open_slot(k, 2).await.unwrap();
            store.commit_admission(0, b.clone()).await.unwrap();
        }

        let replay = Wal::replay(&path).unwrap();
        assert_eq!(replay.events.len(), 2);
        assert_eq!(replay.events[1], Event::Admitted { booking: b.clone() });

        // Seat and booking come back together.
        let store = MemoryStore::open(&path).unwrap();
        assert_eq!(store.get_slot(&k).await.unwrap().unwrap().occupancy, 1);
        assert_eq!(store.get_booking(b.id).await.unwrap(), Some(b));
    }

    #[tokio::test]
    async fn replay_skips_admissions_that_do_not_fit() {
        let path = test_wal_path("overfull.wal");
        let k = key(Period::Afternoon);
        let seated = booking(1, 10, k);
        let overflow = booking(2, 10, k);
        let elsewhere = booking(3, 10, key(Period::WholeDay));
        {
            let mut wal = Wal::open(&path, 0).unwrap();
            wal.append(&Event::SlotOpened {
                key: k,
                capacity: 1,
                occupancy: 0,
            })
            .unwrap();
            for b in [&seated, &overflow, &elsewhere] {
                wal.append(&Event::Admitted { booking: b.clone() }).unwrap();
            }
            wal.append(&Event::BookingStatusChanged {
                id: overflow.id,
                status: BookingStatus::Accepted,
            })
            .unwrap();
        }

        let store = MemoryStore::open(&path).unwrap();
        assert_eq!(store.get_slot(&k).await.unwrap().unwrap().occupancy, 1);
        assert_eq!(store.get_booking(seated.id).await.unwrap(), Some(seated));
        assert!(store.get_booking(overflow.id).await.unwrap().is_none());
        assert!(store.get_booking(elsewhere.id).await.unwrap().is_none());
        assert!(store.bookings_by_patient(PatientId(2)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn compaction_shrinks_and_preserves() {
        let path = test_wal_path("compact.wal");
        let k = key(Period::Afternoon);
        let b = {
            let store = MemoryStore::open(&path).unwrap();
            store.open_slot(k, 50).await.unwrap();
            let b = booking(4, 11, k);
            store.commit_admission(0, b.clone()).await.unwrap();
            for _ in 0..20 {
                let m = store
                    .create_milestone(Milestone {
                        id: Ulid::new(),
                        booking_id: b.id,
                        activity: "vitals".into(),
                        checked: false,
                    })
                    .await
                    .unwrap();
                store.delete_milestone(m.id).await.unwrap();
            }
            assert!(store.appends_since_compact().await >= 40);

            let before = std::fs::metadata(&path).unwrap().len();
            let written = store.compact().await.unwrap();
            assert_eq!(written, 2); // slot + booking
            assert_eq!(store.appends_since_compact().await, 0);
            let after = std::fs::metadata(&path).unwrap().len();
            assert!(after < before, "{after} < {before}");

            // Appends after compaction land in the new file.
            store.commit_admission(1, booking(5, 11, k)).await.unwrap();
            b
        };

        let store = MemoryStore::open(&path).unwrap();
        assert_eq!(store.get_slot(&k).await.unwrap().unwrap().occupancy, 2);
        assert_eq!(store.get_booking(b.id).await.unwrap(), Some(b));
        assert_eq!(store.bookings_by_provider(ProviderId(11)).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn volatile_store_compaction_is_noop() {
        let store = MemoryStore::new();
        assert!(!store.is_journaled());
        assert_eq!(store.compact().await.unwrap(), 0);
        assert_eq!(store.appends_since_compact().await, 0);
    }
}
