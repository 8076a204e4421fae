use std::time::{SystemTime, UNIX_EPOCH};

/// Nanoseconds since the Unix epoch for `t`; instants before 1970 clamp to zero.
pub fn system_time_ns(t: SystemTime) -> i64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// Current wall-clock time in nanoseconds since the Unix epoch.
pub fn now_ns() -> i64 {
    system_time_ns(SystemTime::now())
}

/// Render a nanosecond timestamp as RFC 3339 (UTC). Falls back to the raw
/// number when it is out of range.
pub fn format_ns(ns: i64) -> String {
    time::OffsetDateTime::from_unix_timestamp_nanos(i128::from(ns))
        .ok()
        .and_then(|dt| {
            dt.format(&time::format_description::well_known::Rfc3339)
                .ok()
        })
        .unwrap_or_else(|| ns.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn system_time_before_epoch_clamps_to_zero() {
        let before = UNIX_EPOCH - Duration::from_secs(10);
        assert_eq!(system_time_ns(before), 0);
    }

    #[test]
    fn format_ns_renders_rfc3339() {
        assert_eq!(format_ns(0), "1970-01-01T00:00:00Z");
        assert_eq!(format_ns(61_000_000_000), "1970-01-01T00:01:01Z");
    }
}
