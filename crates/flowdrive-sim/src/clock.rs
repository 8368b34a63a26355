//! Virtual clock.
//!
//! The engine never reads the wall clock during execution: "now" is a
//! fixed base plus an offset that only `advance` moves. Timer deadlines
//! are computed against this clock, so tests trigger timer transitions
//! without real delay.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

/// Monotonic virtual clock with explicit advancement.
#[derive(Debug)]
pub struct VirtualClock {
    base: DateTime<Utc>,
    offset_ms: AtomicI64,
}

impl VirtualClock {
    /// A clock whose "now" starts at the current wall-clock instant.
    pub fn starting_now() -> Self {
        Self {
            base: Utc::now(),
            offset_ms: AtomicI64::new(0),
        }
    }

    /// The current virtual instant.
    pub fn now(&self) -> DateTime<Utc> {
        self.base + TimeDelta::milliseconds(self.offset_ms.load(Ordering::SeqCst))
    }

    /// Move the clock forward by `by` and return the new virtual instant.
    pub fn advance(&self, by: Duration) -> DateTime<Utc> {
        let millis = i64::try_from(by.as_millis()).unwrap_or(i64::MAX);
        let offset = self.offset_ms.fetch_add(millis, Ordering::SeqCst) + millis;
        self.base + TimeDelta::milliseconds(offset)
    }
}
