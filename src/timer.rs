// Copyright 2025 The quicmux Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::api::ConnTime;
use std::time::Duration;

/// A very simple repeating timer.
///
/// The timer is started against a point on the connection timeline and re-arms itself at a fixed
/// interval each time it expires. Expiry is polled: the owning loop calls [`Timer::expire`] with
/// the current time, which is not idempotent. Restarts are anchored to the previous expiry, not to
/// the observation time, so a late poll does not make the schedule drift.
pub struct Timer {
    interval: Duration,
    next_expiry: Option<ConnTime>,
}

impl Timer {
    pub fn new(interval: Duration) -> Self {
        Self { interval, next_expiry: None }
    }

    fn compute_expiry(&self, from_time: ConnTime) -> Option<ConnTime> {
        if self.interval == Duration::ZERO {
            None
        } else {
            Some(from_time + self.interval)
        }
    }

    /// Returns true if the timer has expired, re-arming it for the next interval.
    pub fn expire(&mut self, now: ConnTime) -> bool {
        let Some(current_expiry) = self.next_expiry else {
            return false;
        };

        if current_expiry > now {
            return false;
        }

        self.next_expiry = self.compute_expiry(current_expiry);
        true
    }

    pub fn next_expiry(&self) -> Option<ConnTime> {
        self.next_expiry
    }

    pub fn is_running(&self) -> bool {
        self.next_expiry.is_some()
    }

    pub fn stop(&mut self) {
        self.next_expiry = None;
    }

    /// Starts the timer. If it is already running it is re-anchored to `now`.
    pub fn start(&mut self, now: ConnTime) {
        self.next_expiry = self.compute_expiry(now);
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}
