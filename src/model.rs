use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

macro_rules! reference_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

reference_id!(
    /// Department reference, owned by the schedule-management side.
    DepartmentId
);
reference_id!(
    /// Patient reference, owned by the account system.
    PatientId
);
reference_id!(
    /// Provider ("doctor") reference, owned by the account system.
    ProviderId
);

/// Half-day booking unit. `WholeDay` is its own bucket, not morning + afternoon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    Morning,
    Afternoon,
    #[serde(alias = "whole", alias = "whole-day")]
    WholeDay,
}

impl Period {
    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Morning => "morning",
            Period::Afternoon => "afternoon",
            Period::WholeDay => "whole_day",
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Period {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "morning" => Ok(Period::Morning),
            "afternoon" => Ok(Period::Afternoon),
            "whole" | "whole_day" | "whole-day" => Ok(Period::WholeDay),
            _ => Err(ParseError::Period(s.to_string())),
        }
    }
}

/// Identity of a bookable slot: department + calendar date + period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotKey {
    pub department: DepartmentId,
    pub date: NaiveDate,
    pub period: Period,
}

impl SlotKey {
    pub fn new(department: DepartmentId, date: NaiveDate, period: Period) -> Self {
        Self {
            department,
            date,
            period,
        }
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.department, self.date, self.period)
    }
}

/// A bookable slot. `occupancy <= capacity` at all times.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub key: SlotKey,
    pub capacity: u32,
    pub occupancy: u32,
}

impl Slot {
    pub fn new(key: SlotKey, capacity: u32) -> Self {
        Self {
            key,
            capacity,
            occupancy: 0,
        }
    }

    pub fn is_full(&self) -> bool {
        self.occupancy >= self.capacity
    }

    pub fn remaining(&self) -> u32 {
        self.capacity.saturating_sub(self.occupancy)
    }
}

/// Status tag as requested by a caller. The stored form is [`BookingStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Committed,
    Accepted,
    Terminated,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Committed => "committed",
            Status::Accepted => "accepted",
            Status::Terminated => "terminated",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "committed" => Ok(Status::Committed),
            "accepted" => Ok(Status::Accepted),
            "terminated" => Ok(Status::Terminated),
            _ => Err(ParseError::Status(s.to_string())),
        }
    }
}

/// Stored booking status. The termination cause lives inside the terminal
/// variant, so a cause exists if and only if the booking is terminated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Committed,
    Accepted,
    Terminated { cause: String },
}

impl BookingStatus {
    pub fn kind(&self) -> Status {
        match self {
            BookingStatus::Committed => Status::Committed,
            BookingStatus::Accepted => Status::Accepted,
            BookingStatus::Terminated { .. } => Status::Terminated,
        }
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self, BookingStatus::Terminated { .. })
    }

    pub fn termination_cause(&self) -> Option<&str> {
        match self {
            BookingStatus::Terminated { cause } => Some(cause),
            _ => None,
        }
    }
}

/// One patient's claim on one slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub patient: PatientId,
    pub provider: ProviderId,
    pub slot: SlotKey,
    pub status: BookingStatus,
}

impl Booking {
    pub fn new(id: Ulid, patient: PatientId, provider: ProviderId, slot: SlotKey) -> Self {
        Self {
            id,
            patient,
            provider,
            slot,
            status: BookingStatus::Committed,
        }
    }

    pub fn is_active(&self) -> bool {
        !self.status.is_terminated()
    }
}

/// Progress note on a booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Milestone {
    pub id: Ulid,
    pub booking_id: Ulid,
    pub activity: String,
    pub checked: bool,
}

/// A request to book `patient` into the slot `(department, date, period)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionRequest {
    pub patient: PatientId,
    pub department: DepartmentId,
    pub date: NaiveDate,
    pub period: Period,
}

impl AdmissionRequest {
    pub fn slot_key(&self) -> SlotKey {
        SlotKey::new(self.department, self.date, self.period)
    }
}

// ── Identity context ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Patient,
    #[serde(alias = "doctor")]
    Provider,
    Admin,
}

/// The authenticated caller, as handed over by the surrounding API layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor {
    pub role: Role,
    pub id: u64,
}

impl Actor {
    pub fn new(role: Role, id: u64) -> Self {
        Self { role, id }
    }

    pub fn patient(id: PatientId) -> Self {
        Self::new(Role::Patient, id.0)
    }

    pub fn provider(id: ProviderId) -> Self {
        Self::new(Role::Provider, id.0)
    }

    pub fn admin() -> Self {
        Self::new(Role::Admin, 0)
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn is_patient(&self, patient: PatientId) -> bool {
        self.role == Role::Patient && self.id == patient.0
    }

    pub fn is_provider(&self, provider: ProviderId) -> bool {
        self.role == Role::Provider && self.id == provider.0
    }

    /// Patients see their own bookings, providers the ones assigned to them.
    pub fn can_view(&self, booking: &Booking) -> bool {
        self.is_admin() || self.is_patient(booking.patient) || self.is_provider(booking.provider)
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let role = match self.role {
            Role::Patient => "patient",
            Role::Provider => "provider",
            Role::Admin => "admin",
        };
        write!(f, "{role}:{}", self.id)
    }
}

/// The journal record format. Flat, one variant per store mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    SlotOpened {
        key: SlotKey,
        capacity: u32,
        occupancy: u32,
    },
    ProviderEnrolled {
        department: DepartmentId,
        provider: ProviderId,
    },
    /// A seat taken and its booking recorded in one entry.
    Admitted {
        booking: Booking,
    },
    BookingCreated {
        booking: Booking,
    },
    BookingStatusChanged {
        id: Ulid,
        status: BookingStatus,
    },
    MilestoneCreated {
        milestone: Milestone,
    },
    MilestoneUpdated {
        id: Ulid,
        activity: String,
        checked: bool,
    },
    MilestoneDeleted {
        id: Ulid,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("unknown period: {0} (expected morning, afternoon or whole_day)")]
    Period(String),
    #[error("unknown status: {0} (expected committed, accepted or terminated)")]
    Status(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn period_parses_common_spellings() {
        assert_eq!("morning".parse::<Period>().unwrap(), Period::Morning);
        assert_eq!(" Afternoon ".parse::<Period>().unwrap(), Period::Afternoon);
        assert_eq!("whole".parse::<Period>().unwrap(), Period::WholeDay);
        assert_eq!("whole-day".parse::<Period>().unwrap(), Period::WholeDay);
        assert_eq!("whole_day".parse::<Period>().unwrap(), Period::WholeDay);
        assert!(matches!("evening".parse::<Period>(), Err(ParseError::Period(_))));
    }

    #[test]
    fn period_json_accepts_aliases() {
        let p: Period = serde_json::from_str("\"whole\"").unwrap();
        assert_eq!(p, Period::WholeDay);
        assert_eq!(serde_json::to_string(&Period::WholeDay).unwrap(), "\"whole_day\"");
        assert!(serde_json::from_str::<Period>("\"night\"").is_err());
    }

    #[test]
    fn whole_day_is_distinct_slot() {
        let d = date("2024-05-01");
        let morning = SlotKey::new(DepartmentId(1), d, Period::Morning);
        let whole = SlotKey::new(DepartmentId(1), d, Period::WholeDay);
        assert_ne!(morning, whole);
    }

    #[test]
    fn status_parse() {
        assert_eq!("Terminated".parse::<Status>().unwrap(), Status::Terminated);
        assert!("cancelled".parse::<Status>().is_err());
    }

    #[test]
    fn termination_cause_only_on_terminated() {
        assert_eq!(BookingStatus::Committed.termination_cause(), None);
        assert_eq!(BookingStatus::Accepted.termination_cause(), None);
        let t = BookingStatus::Terminated { cause: "no show".into() };
        assert_eq!(t.termination_cause(), Some("no show"));
        assert_eq!(t.kind(), Status::Terminated);
        assert!(t.is_terminated());
    }

    #[test]
    fn slot_capacity_helpers() {
        let key = SlotKey::new(DepartmentId(3), date("2030-01-01"), Period::Afternoon);
        let mut slot = Slot::new(key, 2);
        assert!(!slot.is_full());
        assert_eq!(slot.remaining(), 2);
        slot.occupancy = 2;
        assert!(slot.is_full());
        assert_eq!(slot.remaining(), 0);
    }

    #[test]
    fn slot_key_display() {
        let key = SlotKey::new(DepartmentId(1), date("2024-05-01"), Period::Morning);
        assert_eq!(key.to_string(), "1/2024-05-01/morning");
    }

    #[test]
    fn actor_visibility() {
        let key = SlotKey::new(DepartmentId(1), date("2024-05-01"), Period::Morning);
        let booking = Booking::new(Ulid::new(), PatientId(7), ProviderId(9), key);
        assert!(Actor::patient(PatientId(7)).can_view(&booking));
        assert!(Actor::provider(ProviderId(9)).can_view(&booking));
        assert!(Actor::admin().can_view(&booking));
        assert!(!Actor::patient(PatientId(9)).can_view(&booking)); // id collides with provider, role doesn't
        assert!(!Actor::provider(ProviderId(7)).can_view(&booking));
    }

    #[test]
    fn event_serialization_roundtrip() {
        let key = SlotKey::new(DepartmentId(1), date("2024-05-01"), Period::WholeDay);
        let mut booking = Booking::new(Ulid::new(), PatientId(1), ProviderId(2), key);
        booking.status = BookingStatus::Terminated { cause: "duplicate visit".into() };
        let event = Event::BookingCreated { booking };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
