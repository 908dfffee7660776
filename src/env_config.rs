//! Centralized environment-variable parsing helpers.
//!
//! Every tuning knob read by [`HandoffConfig::from_env`] goes through
//! these helpers so the truthy/falsey parsing logic lives in one place.
//!
//! [`HandoffConfig::from_env`]: crate::config::HandoffConfig::from_env

use std::time::Duration;

pub(crate) const ACQUIRE_TIMEOUT_MS_VAR: &str = "SNOW_HANDOFF_ACQUIRE_TIMEOUT_MS";
pub(crate) const TEARDOWN_WAIT_MS_VAR: &str = "SNOW_HANDOFF_TEARDOWN_WAIT_MS";
pub(crate) const FORCE_CROSS_API_VAR: &str = "SNOW_HANDOFF_FORCE_CROSS_API";

/// Returns `true` when the raw value is truthy (`1`, `true`, `yes`, or
/// `on`, case-insensitive, trimmed).
#[inline]
pub(crate) fn is_truthy(raw: &str) -> bool {
    let normalized = raw.trim().to_ascii_lowercase();
    normalized == "1" || normalized == "true" || normalized == "yes" || normalized == "on"
}

/// Parses a raw value as a `u64`, returning `Some` only when it is a
/// valid positive (> 0) integer.
#[inline]
pub(crate) fn parse_positive_u64(raw: &str) -> Option<u64> {
    raw.trim().parse::<u64>().ok().filter(|value| *value > 0)
}

#[inline]
pub(crate) fn env_var_truthy(var_name: &str) -> bool {
    std::env::var(var_name)
        .map(|raw| is_truthy(&raw))
        .unwrap_or(false)
}

#[inline]
pub(crate) fn env_var_positive_u64(var_name: &str) -> Option<u64> {
    std::env::var(var_name)
        .ok()
        .and_then(|raw| parse_positive_u64(&raw))
}

/// Reads a positive millisecond count as a [`Duration`].
#[inline]
pub(crate) fn env_var_millis(var_name: &str) -> Option<Duration> {
    env_var_positive_u64(var_name).map(Duration::from_millis)
}
