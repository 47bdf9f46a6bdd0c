//! Elapsed / remaining time estimation for a running backup.
//!
//! The estimate is a plain linear extrapolation from the fraction of work
//! reported done, recomputed fresh for every event. No smoothing.

use crate::types::Timestamp;

/// Timing snapshot for one progress event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct WatchTiming {
    /// Seconds since the first event of the session, never negative.
    pub elapsed_secs: i64,
    /// Estimated seconds left. `None` when progress is 0 (no basis for
    /// extrapolation) or at/above 100 (nothing left).
    pub remaining_secs: Option<i64>,
}

/// Compute elapsed and remaining time for an event.
///
/// `started_at` is the session anchor: the timestamp of the first event
/// ever accepted, which reconnects must not reset. `progress` outside
/// 1..=99 yields no remaining-time estimate.
pub fn compute_timing(started_at: Timestamp, progress: i32, at: Timestamp) -> WatchTiming {
    let elapsed_secs = (at - started_at).num_seconds().max(0);

    let remaining_secs = if progress <= 0 || progress >= 100 {
        None
    } else {
        let total = elapsed_secs as f64 / (progress as f64 / 100.0);
        Some((total - elapsed_secs as f64).max(0.0).round() as i64)
    };

    WatchTiming {
        elapsed_secs,
        remaining_secs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn anchor() -> Timestamp {
        Utc.with_ymd_and_hms(2026, 3, 14, 9, 0, 0).unwrap()
    }

    #[test]
    fn linear_extrapolation() {
        // 30 seconds in at 30% => 100s total => 70s remaining.
        let t = compute_timing(anchor(), 30, anchor() + Duration::seconds(30));
        assert_eq!(t.elapsed_secs, 30);
        assert_eq!(t.remaining_secs, Some(70));
    }

    #[test]
    fn no_estimate_at_zero_progress() {
        let t = compute_timing(anchor(), 0, anchor() + Duration::seconds(10));
        assert_eq!(t.elapsed_secs, 10);
        assert_eq!(t.remaining_secs, None);
    }

    #[test]
    fn no_estimate_at_or_past_completion() {
        assert_eq!(
            compute_timing(anchor(), 100, anchor() + Duration::seconds(60)).remaining_secs,
            None
        );
        assert_eq!(
            compute_timing(anchor(), 120, anchor() + Duration::seconds(60)).remaining_secs,
            None
        );
    }

    #[test]
    fn elapsed_floors_at_zero_for_skewed_clocks() {
        // Event timestamped before the anchor (clock skew between server nodes).
        let t = compute_timing(anchor(), 50, anchor() - Duration::seconds(5));
        assert_eq!(t.elapsed_secs, 0);
        assert_eq!(t.remaining_secs, Some(0));
    }

    #[test]
    fn negative_progress_treated_as_no_basis() {
        let t = compute_timing(anchor(), -3, anchor() + Duration::seconds(10));
        assert_eq!(t.remaining_secs, None);
    }

    #[test]
    fn remaining_never_negative() {
        // 90 seconds in at 99% => total ~90.9s => remaining rounds to 1.
        let t = compute_timing(anchor(), 99, anchor() + Duration::seconds(90));
        assert_eq!(t.remaining_secs, Some(1));
    }
}
