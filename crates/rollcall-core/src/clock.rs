//! Hybrid wall/logical clock for write stamps.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;

/// Issues strictly increasing millisecond timestamps for one writer.
///
/// Tracks wall-clock time, but never goes backwards and never repeats. It also
/// advances past remote timestamps it has observed, so a local write made
/// after seeing a remote one always orders after it.
#[derive(Debug, Default)]
pub struct Clock {
  last: AtomicU64,
}

impl Clock {
  pub fn new() -> Self { Self::default() }

  /// Current wall-clock time in Unix milliseconds.
  pub fn wall() -> u64 { u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0) }

  /// Issue the next timestamp.
  pub fn now(&self) -> u64 {
    let wall = Self::wall();
    let previous = self
      .last
      .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
        Some(wall.max(last + 1))
      })
      .unwrap_or_else(|last| last);
    wall.max(previous + 1)
  }

  /// Advance past a remote timestamp, unless it is more than `max_drift_ms`
  /// ahead of local wall-clock time.
  pub fn observe(&self, at: u64, max_drift_ms: u64) {
    if at <= Self::wall().saturating_add(max_drift_ms) {
      self.last.fetch_max(at, Ordering::AcqRel);
    }
  }

  /// Highest timestamp issued or observed so far.
  pub fn last(&self) -> u64 { self.last.load(Ordering::Acquire) }
}
