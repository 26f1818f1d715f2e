mod admission;
mod assignment;
mod error;
mod guard;
mod lifecycle;
mod milestones;
mod queries;

pub use assignment::least_loaded;
pub use error::EngineError;
pub use guard::SlotGuards;
pub use lifecycle::next_status;

use std::sync::Arc;

use chrono::NaiveDate;

use crate::store::{Backend, MemoryStore};

/// Source of "today" for the past-slot check.
pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;
}

/// Local calendar date of the host.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        chrono::Local::now().date_naive()
    }
}

/// A clock pinned to one date.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDate);

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        self.0
    }
}

/// Admission, assignment and booking lifecycle over a storage backend.
///
/// All admission work for one slot runs under that slot's guard; everything
/// else goes straight to the store.
pub struct Engine<S = MemoryStore> {
    store: Arc<S>,
    guards: SlotGuards,
    clock: Arc<dyn Clock>,
}

impl<S: Backend> Engine<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            guards: SlotGuards::new(),
            clock,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }
}
