/// Shortest bookable appointment, in minutes.
pub const MIN_DURATION_MINUTES: u32 = 15;
/// Longest bookable appointment, in minutes.
pub const MAX_DURATION_MINUTES: u32 = 600;
/// Duration applied when a request omits one.
pub const DEFAULT_DURATION_MINUTES: u32 = 60;

pub const MIN_SLOT_MINUTES: u32 = 5;
pub const MAX_SLOT_MINUTES: u32 = 600;

pub const MAX_APPOINTMENTS: usize = 100_000;
pub const MAX_REASON_LEN: usize = 500;
/// Serialized size cap for audit metadata.
pub const MAX_METADATA_BYTES: usize = 4096;

pub const MAX_VACATION_RANGES: usize = 256;
pub const MAX_CLOSED_DATES: usize = 1024;

/// Longest accepted request line on the wire.
pub const MAX_LINE_BYTES: usize = 64 * 1024;
