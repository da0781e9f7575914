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

use crate::error::{LockerError, Result};
use std::fmt;

/// Identifies one logical lock: a name inside a storage location.
///
/// Two scopes that compare equal govern the same marker object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockScope {
    storage_location: String,
    lock_name: String,
}

impl LockScope {
    pub fn new(storage_location: impl Into<String>, lock_name: impl Into<String>) -> Result<Self> {
        let storage_location = storage_location.into();
        let lock_name = lock_name.into();

        if storage_location.trim().is_empty() {
            return Err(LockerError::InvalidConfig(
                "storage location must not be empty".to_string(),
            ));
        }
        if lock_name.trim().is_empty() {
            return Err(LockerError::InvalidConfig(
                "lock name must not be empty".to_string(),
            ));
        }

        Ok(Self {
            storage_location,
            lock_name,
        })
    }

    pub fn storage_location(&self) -> &str {
        &self.storage_location
    }

    pub fn lock_name(&self) -> &str {
        &self.lock_name
    }

    /// Key of the marker object whose existence means the lock is held.
    ///
    /// The key is the lock name itself, so jobs written against other
    /// clients of the same bucket contend for the same object.
    pub fn object_key(&self) -> String {
        self.lock_name.clone()
    }

    /// Human-readable label used for logging and error reporting.
    pub fn label(&self) -> String {
        format!("{} in {}", self.lock_name, self.storage_location)
    }
}

impl fmt::Display for LockScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}
