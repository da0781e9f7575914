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

//! Payload written into the marker object.
//!
//! The payload only helps a human find out who holds a lock. Ownership is
//! decided by the object's existence, never by its contents.

use crate::error::Result;
use crate::locking::scope::LockScope;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerMetadata {
    pub lease_id: String,
    pub lock: String,
    pub pid: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub holder: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl MarkerMetadata {
    pub fn new(scope: &LockScope, holder: Option<String>) -> Self {
        Self {
            lease_id: generate_lease_id(),
            lock: scope.lock_name().to_string(),
            pid: std::process::id(),
            holder,
            created_at: Utc::now(),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }
}

/// Describes the CI run holding the lock, when running inside GitHub Actions.
pub fn holder_from_env() -> Option<String> {
    holder_from(
        std::env::var("GITHUB_REPOSITORY").ok(),
        std::env::var("GITHUB_RUN_ID").ok(),
    )
}

fn holder_from(repository: Option<String>, run_id: Option<String>) -> Option<String> {
    let repository = repository.filter(|value| !value.is_empty());
    let run_id = run_id.filter(|value| !value.is_empty());
    match (repository, run_id) {
        (Some(repository), Some(run_id)) => Some(format!("{repository}#{run_id}")),
        (Some(repository), None) => Some(repository),
        (None, Some(run_id)) => Some(format!("run {run_id}")),
        (None, None) => None,
    }
}

fn generate_lease_id() -> String {
    format!("{}-{}", std::process::id(), Uuid::new_v4())
}
