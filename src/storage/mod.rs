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

//! Object storage backends that provide the conditional-create primitive.
//!
//! The lock algorithm only needs three requests from a store: create an
//! object if no object exists at the key, delete an object (optionally only
//! if it is still the same generation), and read an object's generation and
//! creation time. Each request receives the caller's remaining deadline so a
//! single slow request cannot outlive it.

pub mod credentials;
pub mod filesystem;
pub mod gcs;

use crate::config::{BackendKind, StorageSettings};
use crate::error::Result;
use chrono::{DateTime, Utc};
use log::debug;
use std::sync::Arc;
use std::time::Duration;

pub use credentials::Credentials;
pub use filesystem::FsStore;
pub use gcs::GcsStore;

/// Generation reported when the object was created but its generation could not be read.
pub const UNKNOWN_GENERATION: &str = "unknown";

/// Result of a conditional create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    /// The object did not exist and now does. The generation is only logged.
    Created { generation: String },
    /// Another writer already owns the key.
    Exists,
    /// The store asked us to back off (throttling, transient server error).
    Contended(String),
}

/// Result of a delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// Nothing was stored at the key.
    Missing,
    /// Transient refusal, or the generation precondition no longer holds.
    Contended(String),
}

/// Metadata of a stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub generation: String,
    pub created_at: DateTime<Utc>,
}

/// Storage operations used by `DistributedLock`.
pub trait ObjectStore: Send + Sync {
    /// Human-readable location, e.g. `gs://bucket`.
    fn location(&self) -> String;

    fn create_if_absent(
        &self,
        key: &str,
        body: &[u8],
        budget: Option<Duration>,
    ) -> Result<CreateOutcome>;

    fn delete(
        &self,
        key: &str,
        if_generation: Option<&str>,
        budget: Option<Duration>,
    ) -> Result<DeleteOutcome>;

    fn stat(&self, key: &str, budget: Option<Duration>) -> Result<Option<ObjectInfo>>;
}

/// Builds the backend selected by configuration.
pub fn open(settings: &StorageSettings) -> Result<Arc<dyn ObjectStore>> {
    debug!(
        "Opening {} backend for {}",
        settings.backend, settings.bucket
    );
    match settings.backend {
        BackendKind::Gcs => {
            let credentials = Credentials::resolve(settings.access_token.as_deref())?;
            let endpoint = settings
                .endpoint
                .as_deref()
                .unwrap_or(gcs::DEFAULT_ENDPOINT);
            let store = GcsStore::new(&settings.bucket, endpoint, credentials)?;
            Ok(Arc::new(store))
        }
        BackendKind::Filesystem => Ok(Arc::new(FsStore::new(&settings.bucket)?)),
    }
}
