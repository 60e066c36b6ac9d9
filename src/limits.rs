use crate::model::Ms;

pub const MINUTE_MS: Ms = 60_000;
pub const HOUR_MS: Ms = 60 * MINUTE_MS;

/// Padding applied around existing bookings before overlap testing.
pub const DEFAULT_BUFFER_MS: Ms = 10 * MINUTE_MS;
pub const MAX_BUFFER_MS: Ms = 4 * HOUR_MS;

// 2000-01-01T00:00:00Z .. 2100-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;
pub const MAX_BOOKING_DURATION_MS: Ms = 24 * HOUR_MS;

pub const MAX_TITLE_LEN: usize = 255;
pub const MAX_DESCRIPTION_LEN: usize = 8 * 1024;
pub const MAX_ATTENDEES: usize = 100;

pub const MAX_ROOMS: usize = 500;
pub const MAX_ROOM_NAME_LEN: usize = 128;
pub const MAX_ROOM_FEATURES: usize = 32;
pub const MAX_ROOM_FEATURE_LEN: usize = 64;
pub const MAX_ROOM_ID_LEN: usize = 64;
pub const MAX_EMAIL_LEN: usize = 254;

/// Recent non-fatal notices kept in memory for the UI.
pub const MAX_NOTICES: usize = 64;

pub const DEFAULT_LIST_TOP: u32 = 50;
/// Upper bound on `@odata.nextLink` pages followed by one listing.
pub const MAX_LIST_PAGES: usize = 20;

/// Room log appends before it is rewritten.
pub const ROOM_LOG_COMPACT_THRESHOLD: u64 = 256;
/// Largest encoded room record. A validated room stays far below it, so a
/// bigger length prefix on replay means the log is damaged.
pub const MAX_ROOM_RECORD_BYTES: usize = 16 * 1024;
