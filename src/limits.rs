/// Admission decisions re-run from scratch at most this many times on store conflicts.
pub const MAX_ADMISSION_ATTEMPTS: u32 = 3;
/// Status changes re-read and re-check at most this many times on store conflicts.
pub const MAX_STATUS_ATTEMPTS: u32 = 3;

pub const MAX_SLOT_CAPACITY: u32 = 10_000;
pub const MAX_PROVIDERS_PER_DEPARTMENT: usize = 1_000;
pub const MAX_MILESTONES_PER_BOOKING: usize = 256;
pub const MAX_ACTIVITY_LEN: usize = 1_024;
pub const MAX_CAUSE_LEN: usize = 1_024;

/// Longest accepted request line on the wire, in bytes.
pub const MAX_FRAME_LEN: usize = 64 * 1024;
