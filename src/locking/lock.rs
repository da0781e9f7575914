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

//! Bucket-scoped mutual exclusion built on conditional object creation.
//!
//! Acquiring creates the marker object with a create-if-absent request;
//! the store lets exactly one such request succeed per key, which is the
//! whole mutual-exclusion guarantee. Releasing deletes the marker. Both
//! operations poll with exponential backoff and check the deadline before
//! every retry. The handle keeps no ownership state: whoever can delete the
//! marker can release the lock.

use crate::config::StorageSettings;
use crate::error::{LockerError, Result};
use crate::locking::acquisition::{LockAttempt, PollingBackoff};
use crate::locking::marker::{MarkerMetadata, holder_from_env};
use crate::locking::scope::LockScope;
use crate::locking::wait_observer::LockWaitObserver;
use crate::storage::{self, CreateOutcome, DeleteOutcome, ObjectStore};
use chrono::Utc;
use log::debug;
use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Outcome of a lock operation that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    Acquired,
    Released,
    /// The deadline elapsed first. Callers decide whether that is fatal.
    DeadlineExceeded { waited: Duration },
}

impl LockOutcome {
    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(self, LockOutcome::DeadlineExceeded { .. })
    }
}

/// Handle for one named lock inside one storage location.
pub struct DistributedLock {
    scope: LockScope,
    store: Arc<dyn ObjectStore>,
    ttl: Option<Duration>,
    backoff: PollingBackoff,
    observer: Option<Arc<dyn LockWaitObserver>>,
}

impl fmt::Debug for DistributedLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistributedLock")
            .field("scope", &self.scope)
            .field("location", &self.store.location())
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl DistributedLock {
    /// Validates the identifiers, then opens the configured backend.
    ///
    /// Blank identifiers are rejected before the backend is touched.
    pub fn connect(settings: &StorageSettings, lock_name: &str) -> Result<Self> {
        LockScope::new(settings.bucket.as_str(), lock_name)?;
        let store = storage::open(settings)?;
        Self::new(store, lock_name)
    }

    pub fn new(store: Arc<dyn ObjectStore>, lock_name: &str) -> Result<Self> {
        let scope = LockScope::new(store.location(), lock_name)?;
        Ok(Self {
            scope,
            store,
            ttl: None,
            backoff: PollingBackoff::default(),
            observer: None,
        })
    }

    /// Markers older than `ttl` are treated as abandoned and removed.
    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl.filter(|ttl| !ttl.is_zero());
        self
    }

    pub fn with_backoff(mut self, backoff: PollingBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn LockWaitObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn scope(&self) -> &LockScope {
        &self.scope
    }

    /// Blocks until the marker is created or `deadline` elapses.
    ///
    /// `None` waits indefinitely. At least one create is always attempted,
    /// even with a zero deadline.
    pub fn acquire(&self, deadline: Option<Duration>) -> Result<LockOutcome> {
        let key = self.scope.object_key();
        let body = MarkerMetadata::new(&self.scope, holder_from_env()).to_bytes()?;
        let mut attempt = self.attempt(deadline);

        loop {
            match self.store.create_if_absent(&key, &body, attempt.remaining()) {
                Ok(CreateOutcome::Created { generation }) => {
                    debug!("Marker {key} created with generation {generation}");
                    attempt.notify_acquired();
                    return Ok(LockOutcome::Acquired);
                }
                Ok(CreateOutcome::Exists) => {
                    if self.clear_stale_marker(&key, &attempt)? && !attempt.budget().is_expired() {
                        continue;
                    }
                    debug!("Marker {key} already exists");
                }
                Ok(CreateOutcome::Contended(reason)) => {
                    debug!("Store asked to back off while creating {key}: {reason}");
                }
                Err(err) if interrupted_by_deadline(&err, &attempt) => {
                    debug!("Create of {key} was cut short by the deadline: {err}");
                }
                Err(err) => return Err(self.acquire_failure(err)),
            }

            if let Some(outcome) = self.wait_or_expire(&mut attempt) {
                return Ok(outcome);
            }
        }
    }

    /// Deletes the marker. A marker that is already gone counts as released.
    pub fn release(&self, deadline: Option<Duration>) -> Result<LockOutcome> {
        let key = self.scope.object_key();
        let mut attempt = self.attempt(deadline);

        loop {
            match self.store.delete(&key, None, attempt.remaining()) {
                Ok(DeleteOutcome::Deleted) => {
                    attempt.notify_released();
                    return Ok(LockOutcome::Released);
                }
                Ok(DeleteOutcome::Missing) => {
                    debug!("Marker {key} was already absent");
                    attempt.notify_released();
                    return Ok(LockOutcome::Released);
                }
                Ok(DeleteOutcome::Contended(reason)) => {
                    debug!("Store asked to back off while deleting {key}: {reason}");
                }
                Err(err) if interrupted_by_deadline(&err, &attempt) => {
                    debug!("Delete of {key} was cut short by the deadline: {err}");
                }
                Err(err) => return Err(self.release_failure(err)),
            }

            if let Some(outcome) = self.wait_or_expire(&mut attempt) {
                return Ok(outcome);
            }
        }
    }

    fn attempt(&self, deadline: Option<Duration>) -> LockAttempt<'_> {
        LockAttempt::new(self.scope.clone(), deadline)
            .with_backoff(self.backoff.clone())
            .with_observer(self.observer.as_deref())
    }

    /// Sleeps before the next retry, or reports the deadline as exceeded.
    fn wait_or_expire(&self, attempt: &mut LockAttempt<'_>) -> Option<LockOutcome> {
        attempt.record_wait_start();
        if !attempt.budget().is_expired() {
            attempt.record_retry();
            if let Some(sleep_for) = attempt.next_sleep_interval() {
                thread::sleep(sleep_for);
                return None;
            }
        }

        attempt.notify_timeout();
        Some(LockOutcome::DeadlineExceeded {
            waited: attempt.elapsed(),
        })
    }

    /// Returns `true` when the marker is gone and creation should be retried now.
    fn clear_stale_marker(&self, key: &str, attempt: &LockAttempt<'_>) -> Result<bool> {
        let Some(ttl) = self.ttl else {
            return Ok(false);
        };

        let info = match self.store.stat(key, attempt.remaining()) {
            Ok(Some(info)) => info,
            Ok(None) => return Ok(true),
            Err(err) => return Err(self.acquire_failure(err)),
        };

        let age = Utc::now()
            .signed_duration_since(info.created_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        if age < ttl {
            return Ok(false);
        }

        attempt.notify_stale_marker(age);
        match self
            .store
            .delete(key, Some(&info.generation), attempt.remaining())
        {
            Ok(DeleteOutcome::Deleted) | Ok(DeleteOutcome::Missing) => Ok(true),
            Ok(DeleteOutcome::Contended(reason)) => {
                debug!("Stale marker {key} was not removed: {reason}");
                Ok(false)
            }
            Err(err) => Err(self.acquire_failure(err)),
        }
    }

    fn acquire_failure(&self, err: LockerError) -> LockerError {
        match err {
            LockerError::PermissionDenied(_) => err,
            other => LockerError::LockingAcquire {
                lock: self.scope.to_string(),
                details: other.to_string(),
            },
        }
    }

    fn release_failure(&self, err: LockerError) -> LockerError {
        match err {
            LockerError::PermissionDenied(_) => err,
            other => LockerError::LockingRelease {
                lock: self.scope.to_string(),
                details: other.to_string(),
            },
        }
    }
}

/// Transport errors after the deadline are the deadline's doing, not the backend's.
fn interrupted_by_deadline(err: &LockerError, attempt: &LockAttempt<'_>) -> bool {
    matches!(err, LockerError::Http(_)) && attempt.budget().is_expired()
}
