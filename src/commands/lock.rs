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

use crate::config::LockerConfig;
use crate::error::{LockerError, Result};
use crate::locking::{DistributedLock, LockOutcome, LoggingObserver};
use log::{info, warn};
use std::sync::Arc;

/// Acquires the configured lock, waiting up to the lock timeout.
pub struct LockCommand<'a> {
    config: &'a LockerConfig,
}

impl<'a> LockCommand<'a> {
    pub fn new(config: &'a LockerConfig) -> Result<Self> {
        Ok(Self { config })
    }

    pub fn execute(&self) -> Result<()> {
        let lock = DistributedLock::connect(&self.config.storage, &self.config.lock_name)?
            .with_ttl(self.config.lock_ttl)
            .with_observer(Arc::new(LoggingObserver::default()));
        self.execute_with(&lock)
    }

    /// Runs the lock step against an already constructed handle.
    pub fn execute_with(&self, lock: &DistributedLock) -> Result<()> {
        let timeout = self.config.lock_timeout;
        let deadline = timeout.value.deadline();
        match deadline {
            Some(limit) => info!("Setting lock timeout to {}", limit.as_millis()),
            None => info!("No lock timeout set"),
        }

        match lock.acquire(deadline)? {
            LockOutcome::DeadlineExceeded { waited } => {
                if self.config.continue_on_lock_timeout {
                    warn!("Deadline exceeded, continuing anyway");
                    return Ok(());
                }
                Err(LockerError::LockingTimeout {
                    lock: lock.scope().to_string(),
                    action: "acquire".to_string(),
                    waited_secs: waited.as_secs_f64(),
                    timeout_value: timeout.value,
                    timeout_source: timeout.source,
                })
            }
            _ => {
                info!("The '{}' lock has been locked", self.config.lock_name);
                Ok(())
            }
        }
    }
}
