use crate::model::{Ms, HOUR_MS, MINUTE_MS};

pub const MAX_TENANTS: usize = 1024;
pub const MAX_TENANT_NAME_LEN: usize = 128;

pub const MAX_SPACES_PER_TENANT: usize = 10_000;
pub const MAX_BOOKINGS_PER_SPACE: usize = 100_000;
pub const MAX_ZONES_PER_TENANT: usize = 10_000;
pub const MAX_RULES_PER_TENANT: usize = 10_000;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_TITLE_LEN: usize = 200;
pub const MAX_TEXT_LEN: usize = 4_000;
pub const MAX_LIST_ITEMS: usize = 200;
pub const MAX_PERMISSIONS: usize = 64;

pub const MIN_VALID_FOR_HOURS: u32 = 1;
pub const MAX_VALID_FOR_HOURS: u32 = 168;

pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const MAX_PAGE_SIZE: usize = 100;
pub const TOP_SPACES: usize = 5;

pub const DEFAULT_MIN_BOOKING_MS: Ms = 30 * MINUTE_MS;
pub const DEFAULT_MAX_BOOKING_MS: Ms = 8 * HOUR_MS;
pub const DEFAULT_CHECK_IN_GRACE_MS: Ms = 15 * MINUTE_MS;

/// Largest encoded event accepted by the WAL.
pub const MAX_WAL_RECORD_BYTES: usize = 16 * 1024 * 1024;

/// Random bytes in a credential payload.
pub const PAYLOAD_BYTES: usize = 32;
