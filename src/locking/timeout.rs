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

use std::fmt;
use std::time::Duration;

/// Represents the resolved deadline for a lock or unlock operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockTimeoutValue {
    Finite(Duration),
    Infinite,
}

impl LockTimeoutValue {
    pub const fn from_millis(millis: u64) -> Self {
        Self::Finite(Duration::from_millis(millis))
    }

    /// Interprets a millisecond setting where zero means "wait forever".
    pub const fn from_setting(millis: u64) -> Self {
        if millis == 0 {
            Self::Infinite
        } else {
            Self::from_millis(millis)
        }
    }

    /// Deadline in the form accepted by `DistributedLock`.
    pub fn deadline(&self) -> Option<Duration> {
        match self {
            LockTimeoutValue::Finite(duration) => Some(*duration),
            LockTimeoutValue::Infinite => None,
        }
    }
}

impl fmt::Display for LockTimeoutValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockTimeoutValue::Infinite => f.write_str("infinite"),
            LockTimeoutValue::Finite(duration) => write!(f, "{}ms", duration.as_millis()),
        }
    }
}

/// Source precedence used when resolving the effective timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockTimeoutSource {
    #[default]
    Default,
    Config,
    Environment,
    Cli,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockTimeoutResolution {
    pub value: LockTimeoutValue,
    pub source: LockTimeoutSource,
}

impl fmt::Display for LockTimeoutSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LockTimeoutSource::Default => "built-in default",
            LockTimeoutSource::Config => "configuration file",
            LockTimeoutSource::Environment => "environment variable",
            LockTimeoutSource::Cli => "CLI flag",
        };
        f.write_str(label)
    }
}

/// Error produced when parsing a timeout setting fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockTimeoutParseError {
    value: String,
}

impl LockTimeoutParseError {
    pub fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for LockTimeoutParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Lock timeout value '{}' is invalid. Use a non-negative integer number of \
             milliseconds (0 waits forever).",
            self.value
        )
    }
}

impl std::error::Error for LockTimeoutParseError {}

/// Parses a millisecond timeout setting originating from CLI, environment, or configuration.
pub fn parse_timeout_millis(value: &str) -> Result<LockTimeoutValue, LockTimeoutParseError> {
    let trimmed = value.trim();
    trimmed
        .parse::<u64>()
        .map(LockTimeoutValue::from_setting)
        .map_err(|_| LockTimeoutParseError {
            value: trimmed.to_string(),
        })
}

/// Resolves the effective timeout based on CLI > env > config > default precedence.
pub struct LockTimeoutResolver<'a> {
    cli_override: Option<u64>,
    env_override: Option<&'a str>,
    config_value: Option<&'a str>,
    default_value: LockTimeoutValue,
}

impl<'a> LockTimeoutResolver<'a> {
    pub fn new(
        cli_override: Option<u64>,
        env_override: Option<&'a str>,
        config_value: Option<&'a str>,
        default_value: LockTimeoutValue,
    ) -> Self {
        Self {
            cli_override,
            env_override,
            config_value,
            default_value,
        }
    }

    pub fn resolve(self) -> Result<LockTimeoutResolution, LockTimeoutParseError> {
        if let Some(millis) = self.cli_override {
            return Ok(LockTimeoutResolution {
                value: LockTimeoutValue::from_setting(millis),
                source: LockTimeoutSource::Cli,
            });
        }

        if let Some(env_value) = self.env_override {
            let value = parse_timeout_millis(env_value)?;
            return Ok(LockTimeoutResolution {
                value,
                source: LockTimeoutSource::Environment,
            });
        }

        if let Some(config_value) = self.config_value {
            let value = parse_timeout_millis(config_value)?;
            return Ok(LockTimeoutResolution {
                value,
                source: LockTimeoutSource::Config,
            });
        }

        Ok(LockTimeoutResolution {
            value: self.default_value,
            source: LockTimeoutSource::Default,
        })
    }
}
