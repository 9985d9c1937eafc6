// Copyright 2021 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! The external ticker (§4.4 Tick source): exposes `nowMs`, `lastTick.{at,ms}` and `nextTick.at`
//! for the admin UI's `.../scheduled/ticker` endpoint (§6). Ticks are idempotent: recording the
//! same tick twice just overwrites the "last tick" bookkeeping.

use parking_lot::Mutex;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TickInfo {
    pub at_ms: i64,
    pub outcome_count: usize,
}

pub struct Ticker {
    interval_ms: i64,
    last_tick: Mutex<Option<TickInfo>>,
}

impl Ticker {
    pub fn new(interval_ms: i64) -> Self {
        Ticker {
            interval_ms,
            last_tick: Mutex::new(None),
        }
    }

    pub fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    pub fn record_tick(&self, at_ms: i64, outcome_count: usize) {
        *self.last_tick.lock() = Some(TickInfo { at_ms, outcome_count });
    }

    pub fn last_tick(&self) -> Option<TickInfo> {
        *self.last_tick.lock()
    }

    pub fn next_tick_at_ms(&self) -> i64 {
        match self.last_tick() {
            Some(tick) => tick.at_ms + self.interval_ms,
            None => Ticker::now_ms() + self.interval_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_tick_follows_the_last_recorded_tick() {
        let ticker = Ticker::new(1_000);
        ticker.record_tick(5_000, 2);
        assert_eq!(ticker.next_tick_at_ms(), 6_000);
    }

    #[test]
    fn repeated_ticks_are_idempotent_in_shape() {
        let ticker = Ticker::new(1_000);
        ticker.record_tick(5_000, 2);
        ticker.record_tick(5_000, 2);
        assert_eq!(ticker.last_tick(), Some(TickInfo { at_ms: 5_000, outcome_count: 2 }));
    }
}
