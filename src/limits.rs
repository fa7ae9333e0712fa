use crate::model::Ms;

pub const MAX_TENANTS: usize = 1_024;
pub const MAX_TENANT_NAME_LEN: usize = 128;

pub const MAX_NAME_LEN: usize = 256;

/// Windows plus bookings held by a single trainer/room/member scope.
pub const MAX_INTERVALS_PER_SCOPE: usize = 100_000;

pub const MAX_CLASS_CAPACITY: u32 = 1_000;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// One year. Availability windows are the longest spans in practice.
pub const MAX_SPAN_DURATION_MS: Ms = 366 * 24 * 3_600_000;

/// Widest range accepted by slot and conflict queries.
pub const MAX_QUERY_WINDOW_MS: Ms = 366 * 24 * 3_600_000;
