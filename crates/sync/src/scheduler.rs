//! Background drain cadence constants.

/// Baseline drain cadence in seconds when nothing is due.
pub const SYNC_BACKGROUND_INTERVAL_SECS: u64 = 45;

/// Maximum jitter (seconds) added to periodic cycle intervals.
pub const SYNC_INTERVAL_JITTER_SECS: u64 = 5;

/// Shortened delay ceiling (milliseconds) used when the queue holds work
/// that is already due.
pub const SYNC_PENDING_SHORT_DELAY_MS: u64 = 2_000;
