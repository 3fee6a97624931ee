use crate::model::Ms;

// Hard caps keeping a single misbehaving client from exhausting memory or
// producing absurd interval math. All rejections surface as LimitExceeded.

pub const MAX_TENANTS: usize = 1024;
pub const MAX_TENANT_NAME_LEN: usize = 256;

pub const MAX_PROVIDERS_PER_TENANT: usize = 10_000;
pub const MAX_ENTRIES_PER_PROVIDER: usize = 100_000;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_DESCRIPTION_LEN: usize = 4_096;

/// Appointment-type durations above one week are always a client bug.
pub const MAX_DURATION_MIN: u32 = 7 * 24 * 60;

/// Calendar queries are bounded to this many days per request.
pub const MAX_CALENDAR_DAYS: i64 = 366;

// Timestamps outside 2000-01-01..3000-01-01 are rejected at the boundary so
// date arithmetic stays comfortably inside chrono's range.
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
pub const MAX_VALID_TIMESTAMP_MS: Ms = 32_503_680_000_000;

/// A single modifier or appointment span may cover at most this much time.
pub const MAX_SPAN_DURATION_MS: Ms = 30 * 86_400_000;
