use crate::common::Value;
use std::time::{SystemTime, SystemTimeError, UNIX_EPOCH};

/// Milliseconds since the unix epoch.
#[inline]
pub fn get_current_time() -> Result<u128, SystemTimeError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
}

// clock before the epoch reads as zero
#[inline]
pub fn get_current_time_or_zero() -> u128 {
    get_current_time().unwrap_or(0)
}

/// Current time as the stored form used by attributes and store info.
#[inline]
pub fn current_time_value() -> Value {
    Value::String(get_current_time_or_zero().to_string())
}
