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

mod context;
mod exit_codes;
mod format;

pub use context::ErrorContext;
pub use exit_codes::get_exit_code;
pub use format::format_error_chain;

use crate::locking::timeout::{LockTimeoutSource, LockTimeoutValue};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LockerError {
    #[error("Required setting '{key}' is not set")]
    MissingSetting { key: String, env_var: String },

    #[error("Unsupported operation '{0}'")]
    UnsupportedOperation(String),

    #[error("Invalid value '{value}' for setting '{key}'")]
    InvalidSetting {
        key: String,
        value: String,
        expected: String,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Configuration file error: {0}")]
    ConfigFile(String),

    #[error("Storage backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Failed to acquire lock '{lock}': {details}")]
    LockingAcquire { lock: String, details: String },

    #[error("Failed to release lock '{lock}': {details}")]
    LockingRelease { lock: String, details: String },

    #[error("Timed out after {waited_secs:.1}s waiting to {action} lock '{lock}'")]
    LockingTimeout {
        lock: String,
        action: String,
        waited_secs: f64,
        timeout_value: LockTimeoutValue,
        timeout_source: LockTimeoutSource,
    },

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Storage request failed: {0}")]
    StorageRequest(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Http(#[from] attohttpc::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, LockerError>;
