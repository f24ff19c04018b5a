//! Satellite-link handover-window check (spec.md section 4.7).
//!
//! Ported in spirit from `sat_utils.c`'s `picoquic_check_handover` /
//! `picoquic_check_handover_now`: true iff the timestamp's second-of-minute
//! falls within a configured margin of `{12, 27, 42, 57}`.

use std::time::{SystemTime, UNIX_EPOCH};

pub const HANDOVER_INTERVALS_SECS: [u64; 4] = [12, 27, 42, 57];
pub const DEFAULT_MARGIN_MS: u64 = 100;

const fn s_to_us(s: u64) -> i64 {
    (s * 1_000_000) as i64
}

const fn ms_to_us(ms: u64) -> i64 {
    (ms * 1_000) as i64
}

/// `ts` is a timestamp in microseconds. Returns true iff `ts mod 60s` is
/// within `margin_ms` of any handover interval.
pub fn is_handover_window(ts_us: u64, margin_ms: u64) -> bool {
    let second_of_minute = (ts_us % s_to_us(60) as u64) as i64;
    let margin_us = ms_to_us(margin_ms);

    HANDOVER_INTERVALS_SECS
        .iter()
        .any(|&interval| (s_to_us(interval) - second_of_minute).abs() <= margin_us)
}

/// `picoquic_check_handover`: the default 100ms margin.
pub fn check_handover(ts_us: u64) -> bool {
    is_handover_window(ts_us, DEFAULT_MARGIN_MS)
}

/// `picoquic_check_handover_now`: evaluated against the wall clock.
pub fn check_handover_now() -> bool {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    check_handover(now.as_micros() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_interval_is_within_window() {
        assert!(check_handover(s_to_us(27) as u64));
    }

    #[test]
    fn just_inside_margin_is_within_window() {
        let ts = (s_to_us(42) - ms_to_us(99)) as u64;
        assert!(check_handover(ts));
    }

    #[test]
    fn just_outside_margin_is_not_within_window() {
        let ts = (s_to_us(57) - ms_to_us(200)) as u64;
        assert!(!check_handover(ts));
    }

    #[test]
    fn midway_between_intervals_is_not_within_window() {
        assert!(!check_handover(s_to_us(34) as u64));
    }

    #[test]
    fn check_handover_now_does_not_panic() {
        let _ = check_handover_now();
    }
}
