// Copyright 2016 The Mesh Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The reactor's only notion of time is "monotonic milliseconds since
//! some epoch"; this seam lets tests drive deadlines deterministically
//! instead of racing the wall clock.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Instant;

/// Supplies "now" in monotonic milliseconds.
pub trait Clock {
    /// Current time, in milliseconds, relative to an arbitrary but
    /// fixed epoch for the lifetime of the clock.
    fn now_ms(&self) -> u64;
}

/// The real clock, backed by [`std::time::Instant`].
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    /// Builds a clock whose epoch is "now".
    pub fn new() -> SystemClock {
        SystemClock { start: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        SystemClock::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

/// A clock a test can advance by hand, to exercise deadline behavior
/// without sleeping real wall-clock time.
#[derive(Clone)]
pub struct ManualClock {
    now_ms: Rc<Cell<u64>>,
}

impl ManualClock {
    /// Builds a manual clock starting at `now_ms`.
    pub fn new(now_ms: u64) -> ManualClock {
        ManualClock { now_ms: Rc::new(Cell::new(now_ms)) }
    }

    /// Advances the clock by `delta_ms`.
    pub fn advance(&self, delta_ms: u64) {
        self.now_ms.set(self.now_ms.get() + delta_ms);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(100);
        assert_eq!(clock.now_ms(), 100);
        clock.advance(50);
        assert_eq!(clock.now_ms(), 150);
    }

    #[test]
    fn clones_share_the_same_timeline() {
        let clock = ManualClock::new(0);
        let clone = clock.clone();
        clock.advance(10);
        assert_eq!(clone.now_ms(), 10);
    }
}
