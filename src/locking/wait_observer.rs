// Copyright 2025 dentsusoken
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

//! Observer interfaces for lock wait instrumentation.
//!
//! Observers decouple `DistributedLock` from user-facing feedback so the
//! commands can report contention without duplicating polling logic.

use crate::locking::scope::LockScope;
use crate::locking::timeout::LockTimeoutValue;
use log::{debug, info, warn};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Observer hooks for lock wait events.
pub trait LockWaitObserver: Send + Sync {
    fn on_wait_start(&self, _scope: &LockScope, _timeout: LockTimeoutValue) {}

    fn on_retry(
        &self,
        _scope: &LockScope,
        _attempt: usize,
        _elapsed: Duration,
        _remaining: Option<Duration>,
    ) {
    }

    fn on_stale_marker(&self, _scope: &LockScope, _age: Duration) {}

    fn on_acquired(&self, _scope: &LockScope, _waited: Duration) {}

    fn on_released(&self, _scope: &LockScope, _waited: Duration) {}

    fn on_timeout(&self, _scope: &LockScope, _waited: Duration) {}
}

/// Reports lock contention through the `log` facade.
///
/// Retry notices are throttled so a long wait produces one info line every
/// `interval` instead of one per poll.
#[derive(Debug)]
pub struct LoggingObserver {
    interval: Duration,
    last_emit: Mutex<Option<Instant>>,
}

impl LoggingObserver {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_emit: Mutex::new(None),
        }
    }

    fn should_emit(&self) -> bool {
        let Ok(mut last_emit) = self.last_emit.lock() else {
            return false;
        };
        let now = Instant::now();
        match *last_emit {
            Some(previous) if now.duration_since(previous) < self.interval => false,
            _ => {
                *last_emit = Some(now);
                true
            }
        }
    }
}

impl Default for LoggingObserver {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl LockWaitObserver for LoggingObserver {
    fn on_wait_start(&self, scope: &LockScope, timeout: LockTimeoutValue) {
        info!("{}", wait_start_message(scope, timeout));
        self.should_emit();
    }

    fn on_retry(
        &self,
        scope: &LockScope,
        attempt: usize,
        elapsed: Duration,
        remaining: Option<Duration>,
    ) {
        debug!(
            "Retry {attempt} for {scope} after {:.3}s (remaining {})",
            elapsed.as_secs_f64(),
            format_remaining(remaining)
        );
        if self.should_emit() {
            info!("Still waiting for {scope} after {:.0}s", elapsed.as_secs_f64());
        }
    }

    fn on_stale_marker(&self, scope: &LockScope, age: Duration) {
        warn!("Removing stale marker for {scope}; it was created {:.0}s ago", age.as_secs_f64());
    }

    fn on_acquired(&self, scope: &LockScope, waited: Duration) {
        debug!("Acquired {scope} after {:.3}s", waited.as_secs_f64());
    }

    fn on_released(&self, scope: &LockScope, waited: Duration) {
        debug!("Released {scope} after {:.3}s", waited.as_secs_f64());
    }

    fn on_timeout(&self, scope: &LockScope, waited: Duration) {
        warn!("Gave up on {scope} after {:.3}s", waited.as_secs_f64());
    }
}

// Shared by acquire and release waits.
fn wait_start_message(scope: &LockScope, timeout: LockTimeoutValue) -> String {
    format!("Lock {scope} is busy; waiting (timeout {timeout})")
}

fn format_remaining(remaining: Option<Duration>) -> String {
    match remaining {
        Some(duration) => format!("{:.3}s", duration.as_secs_f64()),
        None => "unbounded".to_string(),
    }
}
