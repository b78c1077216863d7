//! Staleness evaluator.
//!
//! The single source of truth for liveness. Listing and removal both call
//! these functions; the arithmetic must never be reimplemented at a call
//! site, or "stale" silently means two different things.

use chrono::{DateTime, Utc};

/// Fixed grace margin added on top of the expected check-in interval.
pub const STALE_MARGIN_SECS: f64 = 30.0;

/// Maximum expected seconds between check-ins for a session with the
/// given cadence: `delay + delay*jitter + margin`.
#[must_use]
pub fn interval_max(delay: u32, jitter: f64) -> f64 {
    let delay = f64::from(delay);
    delay + delay * jitter + STALE_MARGIN_SECS
}

/// Seconds elapsed since `last_checkin` as of `now`.
#[must_use]
fn elapsed_secs(last_checkin: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let millis = (now - last_checkin).num_milliseconds();
    #[allow(clippy::cast_precision_loss)]
    {
        millis as f64 / 1000.0
    }
}

/// Whether a session with the given cadence has missed its check-in window.
#[must_use]
pub fn is_stale(delay: u32, jitter: f64, last_checkin: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    elapsed_secs(last_checkin, now) > interval_max(delay, jitter)
}

/// Whether a session has checked in within the last `minutes` minutes.
#[must_use]
pub fn active_within(last_checkin: DateTime<Utc>, now: DateTime<Utc>, minutes: u32) -> bool {
    elapsed_secs(last_checkin, now) <= f64::from(minutes) * 60.0
}
