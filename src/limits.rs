use chrono::NaiveDate;

pub const MAX_DEVICES: usize = 10_000;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_RESERVATIONS_PER_DEVICE: usize = 50_000;

/// Longest single reservation, in days.
pub const MAX_RESERVATION_DAYS: i64 = 366 * 2;

/// Largest WAL record payload. A longer length prefix is treated as corruption.
pub const MAX_RECORD_LEN: usize = 64 * 1024;

/// Largest batch accepted by `import_devices`.
pub const MAX_IMPORT_BATCH: usize = 1_000;

pub const MIN_VALID_DATE: NaiveDate = match NaiveDate::from_ymd_opt(1970, 1, 1) {
    Some(d) => d,
    None => panic!("invalid MIN_VALID_DATE"),
};

pub const MAX_VALID_DATE: NaiveDate = match NaiveDate::from_ymd_opt(9999, 12, 31) {
    Some(d) => d,
    None => panic!("invalid MAX_VALID_DATE"),
};
