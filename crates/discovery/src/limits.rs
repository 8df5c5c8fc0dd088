use std::time::Duration;

/// Largest file the nginx collector will read, top-level or included.
pub const MAX_CONFIG_FILE_BYTES: u64 = 1 << 20;

/// Include directives nested deeper than this are left unexpanded.
pub const MAX_INCLUDE_DEPTH: usize = 3;

/// Cap on any backend API response body.
pub const MAX_RESPONSE_BYTES: usize = 10 * 1024 * 1024;

pub const DEFAULT_DISCOVERY_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

const MIN_INTERVAL_SECS: u64 = 5;
const MAX_INTERVAL_SECS: u64 = 3600;

pub(crate) fn parse_interval_secs(raw: Option<&str>, default_value: u64) -> u64 {
    raw.map(str::trim)
        .filter(|v| !v.is_empty())
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default_value, clamp_interval_secs)
}

pub(crate) fn clamp_interval_secs(secs: u64) -> u64 {
    secs.clamp(MIN_INTERVAL_SECS, MAX_INTERVAL_SECS)
}
