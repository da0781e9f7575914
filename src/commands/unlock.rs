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
use log::info;
use std::sync::Arc;

/// Releases the configured lock. A lock that is not held counts as released.
pub struct UnlockCommand<'a> {
    config: &'a LockerConfig,
}

impl<'a> UnlockCommand<'a> {
    pub fn new(config: &'a LockerConfig) -> Result<Self> {
        Ok(Self { config })
    }

    pub fn execute(&self) -> Result<()> {
        let lock = DistributedLock::connect(&self.config.storage, &self.config.lock_name)?
            .with_observer(Arc::new(LoggingObserver::default()));
        self.execute_with(&lock)
    }

    pub fn execute_with(&self, lock: &DistributedLock) -> Result<()> {
        let timeout = self.config.unlock_timeout;
        let deadline = timeout.value.deadline();
        match deadline {
            Some(limit) => info!("Setting unlock timeout to {}", limit.as_millis()),
            None => info!("No unlock timeout set"),
        }

        // The continue flag only covers acquisition; a stuck release always fails.
        match lock.release(deadline)? {
            LockOutcome::DeadlineExceeded { waited } => Err(LockerError::LockingTimeout {
                lock: lock.scope().to_string(),
                action: "release".to_string(),
                waited_secs: waited.as_secs_f64(),
                timeout_value: timeout.value,
                timeout_source: timeout.source,
            }),
            _ => {
                info!("The '{}' lock has been unlocked", self.config.lock_name);
                Ok(())
            }
        }
    }
}
