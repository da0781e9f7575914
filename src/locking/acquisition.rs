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

use crate::locking::scope::LockScope;
use crate::locking::timeout::LockTimeoutValue;
use crate::locking::wait_observer::LockWaitObserver;
use std::cmp;
use std::time::{Duration, Instant};

/// Exponential backoff configuration used while polling the marker object.
#[derive(Debug, Clone)]
pub struct PollingBackoff {
    initial: Duration,
    factor: u32,
    cap: Duration,
    current: Duration,
}

impl PollingBackoff {
    pub fn new(initial: Duration, factor: u32, cap: Duration) -> Self {
        Self {
            initial,
            factor: cmp::max(factor, 1),
            cap,
            current: cmp::min(initial, cap),
        }
    }

    /// Returns the current delay and advances the backoff sequence.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        let next = self.current.saturating_mul(self.factor);
        self.current = cmp::min(next, self.cap);
        delay
    }

    pub fn reset(&mut self) {
        self.current = cmp::min(self.initial, self.cap);
    }

    pub fn peek(&self) -> Duration {
        self.current
    }
}

impl Default for PollingBackoff {
    fn default() -> Self {
        // Capped below one second so an expiring deadline is noticed promptly.
        Self::new(Duration::from_millis(10), 2, Duration::from_millis(500))
    }
}

/// Tracks elapsed and remaining time for a deadline.
#[derive(Debug, Clone)]
pub struct LockTimeoutBudget {
    value: LockTimeoutValue,
    started_at: Instant,
}

impl LockTimeoutBudget {
    pub fn new(value: LockTimeoutValue) -> Self {
        Self {
            value,
            started_at: Instant::now(),
        }
    }

    pub fn value(&self) -> LockTimeoutValue {
        self.value
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn remaining(&self) -> Option<Duration> {
        match self.value {
            LockTimeoutValue::Infinite => None,
            LockTimeoutValue::Finite(limit) => Some(limit.saturating_sub(self.elapsed())),
        }
    }

    pub fn is_expired(&self) -> bool {
        matches!(self.value, LockTimeoutValue::Finite(limit) if self.elapsed() >= limit)
    }
}

/// Per-call polling state for one acquire or release.
pub struct LockAttempt<'a> {
    scope: LockScope,
    budget: LockTimeoutBudget,
    backoff: PollingBackoff,
    observer: Option<&'a dyn LockWaitObserver>,
    retries: usize,
    wait_started: bool,
}

impl<'a> LockAttempt<'a> {
    pub fn new(scope: LockScope, deadline: Option<Duration>) -> Self {
        let timeout = match deadline {
            Some(limit) => LockTimeoutValue::Finite(limit),
            None => LockTimeoutValue::Infinite,
        };
        Self {
            scope,
            budget: LockTimeoutBudget::new(timeout),
            backoff: PollingBackoff::default(),
            observer: None,
            retries: 0,
            wait_started: false,
        }
    }

    pub fn with_backoff(mut self, backoff: PollingBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_observer(mut self, observer: Option<&'a dyn LockWaitObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn budget(&self) -> &LockTimeoutBudget {
        &self.budget
    }

    pub fn elapsed(&self) -> Duration {
        self.budget.elapsed()
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.budget.remaining()
    }

    pub fn timeout_value(&self) -> LockTimeoutValue {
        self.budget.value()
    }

    pub fn retries(&self) -> usize {
        self.retries
    }

    /// Next sleep, clamped to the remaining budget. `None` once the budget is spent.
    pub fn next_sleep_interval(&mut self) -> Option<Duration> {
        let remaining = self.remaining();
        let mut delay = self.backoff.next_delay();
        if let Some(remaining_budget) = remaining {
            if remaining_budget < delay {
                delay = remaining_budget;
            }
            if delay.is_zero() {
                return None;
            }
        }
        Some(delay)
    }

    pub fn record_wait_start(&mut self) {
        if !self.wait_started {
            if let Some(observer) = self.observer {
                observer.on_wait_start(&self.scope, self.timeout_value());
            }
            self.wait_started = true;
        }
    }

    pub fn record_retry(&mut self) {
        self.retries = self.retries.saturating_add(1);
        if let Some(observer) = self.observer {
            observer.on_retry(&self.scope, self.retries, self.elapsed(), self.remaining());
        }
    }

    pub fn notify_stale_marker(&self, age: Duration) {
        if let Some(observer) = self.observer {
            observer.on_stale_marker(&self.scope, age);
        }
    }

    pub fn notify_acquired(&self) {
        if let Some(observer) = self.observer {
            observer.on_acquired(&self.scope, self.elapsed());
        }
    }

    pub fn notify_released(&self) {
        if let Some(observer) = self.observer {
            observer.on_released(&self.scope, self.elapsed());
        }
    }

    pub fn notify_timeout(&self) {
        if let Some(observer) = self.observer {
            observer.on_timeout(&self.scope, self.elapsed());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn polling_backoff_doubles_until_cap() {
        let mut backoff =
            PollingBackoff::new(Duration::from_millis(10), 2, Duration::from_millis(40));
        assert_eq!(backoff.next_delay(), Duration::from_millis(10));
        assert_eq!(backoff.next_delay(), Duration::from_millis(20));
        assert_eq!(backoff.next_delay(), Duration::from_millis(40));
        assert_eq!(backoff.next_delay(), Duration::from_millis(40));

        backoff.reset();
        assert_eq!(backoff.peek(), Duration::from_millis(10));
    }

    #[test]
    fn default_backoff_stays_sub_second() {
        let mut backoff = PollingBackoff::default();
        for _ in 0..32 {
            assert!(backoff.next_delay() < Duration::from_secs(1));
        }
    }

    #[test]
    fn budget_without_deadline_never_expires() {
        let budget = LockTimeoutBudget::new(LockTimeoutValue::Infinite);
        assert!(!budget.is_expired());
        assert_eq!(budget.remaining(), None);
    }

    #[test]
    fn zero_budget_is_expired_immediately() {
        let budget = LockTimeoutBudget::new(LockTimeoutValue::Finite(Duration::ZERO));
        assert!(budget.is_expired());
        assert_eq!(budget.remaining(), Some(Duration::ZERO));
    }

    #[test]
    fn sleep_interval_is_clamped_to_remaining_budget() {
        let scope = LockScope::new("bucket", "name").unwrap();
        let mut attempt = LockAttempt::new(scope, Some(Duration::from_secs(60))).with_backoff(
            PollingBackoff::new(Duration::from_secs(120), 2, Duration::from_secs(120)),
        );
        let sleep = attempt.next_sleep_interval().unwrap();
        assert!(sleep <= Duration::from_secs(60));

        let scope = LockScope::new("bucket", "name").unwrap();
        let mut expired = LockAttempt::new(scope, Some(Duration::ZERO));
        assert_eq!(expired.next_sleep_interval(), None);
    }

    #[derive(Default)]
    struct RecordingObserver {
        events: Mutex<Vec<String>>,
    }

    impl LockWaitObserver for RecordingObserver {
        fn on_wait_start(&self, scope: &LockScope, _timeout: LockTimeoutValue) {
            self.events
                .lock()
                .unwrap()
                .push(format!("start:{}", scope.lock_name()));
        }

        fn on_retry(
            &self,
            _scope: &LockScope,
            attempt: usize,
            _elapsed: Duration,
            _remaining: Option<Duration>,
        ) {
            self.events.lock().unwrap().push(format!("retry:{attempt}"));
        }

        fn on_timeout(&self, scope: &LockScope, _waited: Duration) {
            self.events
                .lock()
                .unwrap()
                .push(format!("timeout:{}", scope.lock_name()));
        }
    }

    #[test]
    fn attempt_notifies_observer() {
        let observer = RecordingObserver::default();
        let scope = LockScope::new("bucket", "deploy").unwrap();
        let mut attempt =
            LockAttempt::new(scope, Some(Duration::from_secs(1))).with_observer(Some(&observer));

        attempt.record_wait_start();
        attempt.record_wait_start();
        attempt.record_retry();
        attempt.notify_timeout();

        assert_eq!(attempt.retries(), 1);
        let events = observer.events.lock().unwrap();
        assert_eq!(
            events.as_slice(),
            ["start:deploy", "retry:1", "timeout:deploy"]
        );
    }
}
