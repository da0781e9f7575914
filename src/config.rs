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

//! Settings for a single lock or unlock invocation.
//!
//! Values are layered with the `config` crate: built-in defaults, then an
//! optional TOML file, then `INPUT_*` environment variables, then CLI flags.
//! Every value is read as a string and validated afterwards so that error
//! messages can name the offending setting and its environment variable.

use crate::error::{LockerError, Result};
use crate::locking::timeout::{
    LockTimeoutParseError, LockTimeoutResolution, LockTimeoutResolver, LockTimeoutValue,
};
use config::{Config, Environment, File, FileFormat};
use log::debug;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const ENV_PREFIX: &str = "INPUT";
pub const DEFAULT_UNLOCK_TIMEOUT_MS: u64 = 2000;

const BUCKET_KEY: &str = "bucket";
const LOCK_NAME_KEY: &str = "lock_name";
const OPERATION_KEY: &str = "operation";
const CONTINUE_KEY: &str = "continue_on_lock_timeout";
const LOCK_TIMEOUT_KEY: &str = "lock_timeout_ms";
const UNLOCK_TIMEOUT_KEY: &str = "unlock_timeout_ms";
const LOCK_TTL_KEY: &str = "lock_ttl_ms";
const BACKEND_KEY: &str = "backend";

/// Environment variable that carries `key`, e.g. `INPUT_LOCK_NAME`.
pub fn env_var_name(key: &str) -> String {
    format!("{ENV_PREFIX}_{}", key.to_ascii_uppercase())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Lock,
    Unlock,
}

impl FromStr for Operation {
    type Err = LockerError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim() {
            "lock" => Ok(Operation::Lock),
            "unlock" => Ok(Operation::Unlock),
            other => Err(LockerError::UnsupportedOperation(other.to_string())),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Lock => f.write_str("lock"),
            Operation::Unlock => f.write_str("unlock"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    #[default]
    Gcs,
    Filesystem,
}

impl FromStr for BackendKind {
    type Err = LockerError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "gcs" => Ok(BackendKind::Gcs),
            "filesystem" | "fs" => Ok(BackendKind::Filesystem),
            _ => Err(invalid(BACKEND_KEY, value, "'gcs' or 'filesystem'")),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Gcs => f.write_str("gcs"),
            BackendKind::Filesystem => f.write_str("filesystem"),
        }
    }
}

/// Where marker objects live and how to reach them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageSettings {
    pub backend: BackendKind,
    /// Bucket name, or the lock directory for the filesystem backend.
    pub bucket: String,
    pub endpoint: Option<String>,
    pub access_token: Option<String>,
}

/// Validated settings for one invocation.
#[derive(Debug, Clone)]
pub struct LockerConfig {
    pub storage: StorageSettings,
    pub lock_name: String,
    pub operation: Operation,
    pub continue_on_lock_timeout: bool,
    pub lock_timeout: LockTimeoutResolution,
    pub unlock_timeout: LockTimeoutResolution,
    pub lock_ttl: Option<Duration>,
}

/// Settings as read from the layered sources, before validation.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawSettings {
    pub bucket: Option<String>,
    pub lock_name: Option<String>,
    pub operation: Option<String>,
    pub continue_on_lock_timeout: Option<String>,
    pub lock_timeout_ms: Option<String>,
    pub unlock_timeout_ms: Option<String>,
    pub lock_ttl_ms: Option<String>,
    pub backend: Option<String>,
    pub storage_endpoint: Option<String>,
    pub access_token: Option<String>,
}

/// Values supplied on the command line. They win over every other source.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub operation: Option<String>,
    pub lock_timeout_ms: Option<u64>,
    pub unlock_timeout_ms: Option<u64>,
}

/// Builds a `LockerConfig` from file, environment, and CLI sources.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    file: Option<PathBuf>,
    environment: Option<HashMap<String, String>>,
    overrides: CliOverrides,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: Option<PathBuf>) -> Self {
        self.file = path;
        self
    }

    /// Reads `INPUT_*` variables from `vars` instead of the process environment.
    pub fn with_environment(mut self, vars: HashMap<String, String>) -> Self {
        self.environment = Some(vars);
        self
    }

    pub fn with_overrides(mut self, overrides: CliOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn load(&self) -> Result<LockerConfig> {
        let raw = self.read_raw()?;
        self.validate(raw)
    }

    fn read_raw(&self) -> Result<RawSettings> {
        let mut builder = Config::builder()
            .set_default(CONTINUE_KEY, "false")
            .and_then(|builder| builder.set_default(BACKEND_KEY, "gcs"))
            .map_err(|e| LockerError::InvalidConfig(e.to_string()))?;

        if let Some(path) = &self.file {
            debug!("Reading configuration file {}", path.display());
            builder = builder.add_source(
                File::from(path.as_path())
                    .format(FileFormat::Toml)
                    .required(true),
            );
        }

        let mut environment = Environment::with_prefix(ENV_PREFIX);
        if let Some(vars) = &self.environment {
            environment = environment.source(Some(
                vars.iter()
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect(),
            ));
        }
        builder = builder.add_source(environment);

        if let Some(operation) = &self.overrides.operation {
            builder = builder
                .set_override(OPERATION_KEY, operation.as_str())
                .map_err(|e| LockerError::InvalidConfig(e.to_string()))?;
        }

        let config = builder
            .build()
            .map_err(|e| LockerError::ConfigFile(format!("Failed to build configuration: {e}")))?;
        config
            .try_deserialize::<RawSettings>()
            .map_err(|e| LockerError::ConfigFile(format!("Failed to read configuration: {e}")))
    }

    fn env_value(&self, key: &str) -> Option<String> {
        let name = env_var_name(key);
        let value = match &self.environment {
            Some(vars) => vars.get(&name).cloned(),
            None => std::env::var(&name).ok(),
        };
        non_blank(value)
    }

    fn validate(&self, raw: RawSettings) -> Result<LockerConfig> {
        let bucket = required(raw.bucket, BUCKET_KEY)?;
        let lock_name = required(raw.lock_name, LOCK_NAME_KEY)?;
        let operation = required(raw.operation, OPERATION_KEY)?;

        let continue_on_lock_timeout = match non_blank(raw.continue_on_lock_timeout) {
            Some(value) => parse_bool(&value).ok_or_else(|| {
                invalid(CONTINUE_KEY, &value, "a boolean such as 'true' or 'false'")
            })?,
            None => false,
        };

        let lock_env = self.env_value(LOCK_TIMEOUT_KEY);
        let lock_timeout = LockTimeoutResolver::new(
            self.overrides.lock_timeout_ms,
            lock_env.as_deref(),
            non_blank(raw.lock_timeout_ms).as_deref(),
            LockTimeoutValue::Infinite,
        )
        .resolve()
        .map_err(|e| timeout_error(LOCK_TIMEOUT_KEY, e))?;

        let unlock_env = self.env_value(UNLOCK_TIMEOUT_KEY);
        let unlock_timeout = LockTimeoutResolver::new(
            self.overrides.unlock_timeout_ms,
            unlock_env.as_deref(),
            non_blank(raw.unlock_timeout_ms).as_deref(),
            LockTimeoutValue::from_setting(DEFAULT_UNLOCK_TIMEOUT_MS),
        )
        .resolve()
        .map_err(|e| timeout_error(UNLOCK_TIMEOUT_KEY, e))?;

        let lock_ttl = match non_blank(raw.lock_ttl_ms) {
            Some(value) => match value.trim().parse::<u64>() {
                Ok(0) => None,
                Ok(millis) => Some(Duration::from_millis(millis)),
                Err(_) => {
                    return Err(invalid(
                        LOCK_TTL_KEY,
                        &value,
                        "a non-negative integer number of milliseconds",
                    ));
                }
            },
            None => None,
        };

        let operation = operation.parse::<Operation>()?;
        let backend = match non_blank(raw.backend) {
            Some(value) => value.parse::<BackendKind>()?,
            None => BackendKind::default(),
        };

        Ok(LockerConfig {
            storage: StorageSettings {
                backend,
                bucket,
                endpoint: non_blank(raw.storage_endpoint),
                access_token: non_blank(raw.access_token),
            },
            lock_name,
            operation,
            continue_on_lock_timeout,
            lock_timeout,
            unlock_timeout,
            lock_ttl,
        })
    }
}

/// Case-insensitive boolean parsing for workflow inputs.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "t" | "true" | "yes" | "y" | "on" => Some(true),
        "0" | "f" | "false" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

fn required(value: Option<String>, key: &str) -> Result<String> {
    non_blank(value)
        .map(|value| value.trim().to_string())
        .ok_or_else(|| LockerError::MissingSetting {
            key: key.to_string(),
            env_var: env_var_name(key),
        })
}

fn invalid(key: &str, value: &str, expected: &str) -> LockerError {
    LockerError::InvalidSetting {
        key: key.to_string(),
        value: value.trim().to_string(),
        expected: expected.to_string(),
    }
}

fn timeout_error(key: &str, err: LockTimeoutParseError) -> LockerError {
    invalid(
        key,
        err.value(),
        "a non-negative integer number of milliseconds (0 waits forever)",
    )
}
