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

use crate::error::LockerError;
use crate::locking::timeout::LockTimeoutSource;
use std::fmt;

pub struct ErrorContext<'a> {
    pub error: &'a LockerError,
    pub suggestion: Option<String>,
    pub details: Option<String>,
}

impl<'a> ErrorContext<'a> {
    pub fn new(error: &'a LockerError) -> Self {
        let (suggestion, details) = match error {
            LockerError::MissingSetting { key, env_var } => {
                let suggestion = Some(format!(
                    "Set the '{key}' input of the action, or export {env_var} before running \
                     locker."
                ));
                (suggestion, None)
            }
            LockerError::UnsupportedOperation(operation) => {
                let suggestion = Some("Supported operations: lock, unlock.".to_string());
                let details = Some(format!(
                    "Operation '{operation}' was requested but only 'lock' and 'unlock' are \
                     implemented."
                ));
                (suggestion, details)
            }
            LockerError::InvalidSetting { key, expected, .. } => {
                let suggestion = Some(format!("'{key}' must be {expected}."));
                (suggestion, None)
            }
            LockerError::ConfigFile(msg) => {
                let suggestion =
                    Some("Check that the file passed with --config is valid TOML.".to_string());
                let details = Some(msg.clone());
                (suggestion, details)
            }
            LockerError::BackendUnavailable(msg) => {
                let suggestion = Some(
                    "Provide an access token through INPUT_ACCESS_TOKEN or run on a host with \
                     a metadata server.\nCheck INPUT_STORAGE_ENDPOINT if you use an emulator."
                        .to_string(),
                );
                let details = Some(msg.clone());
                (suggestion, details)
            }
            LockerError::LockingTimeout {
                action,
                timeout_value,
                timeout_source,
                ..
            } => {
                let variable = if action == "acquire" {
                    "INPUT_LOCK_TIMEOUT_MS"
                } else {
                    "INPUT_UNLOCK_TIMEOUT_MS"
                };
                let mut suggestion = format!(
                    "Another job may still hold the lock. Raise {variable} (0 waits forever)."
                );
                if action == "acquire" {
                    suggestion.push_str(
                        "\nSet INPUT_CONTINUE_ON_LOCK_TIMEOUT=true to proceed without the lock.",
                    );
                }
                let details = Some(format!(
                    "Timeout {timeout_value} came from the {timeout_source}."
                ));
                let suggestion = match timeout_source {
                    LockTimeoutSource::Cli => Some(format!(
                        "{suggestion}\nThe timeout was set on the command line."
                    )),
                    _ => Some(suggestion),
                };
                (suggestion, details)
            }
            LockerError::PermissionDenied(msg) => {
                let suggestion = Some(
                    "Grant the service account storage.objects.create and \
                     storage.objects.delete on the bucket."
                        .to_string(),
                );
                let details = Some(msg.clone());
                (suggestion, details)
            }
            LockerError::LockingAcquire { .. } | LockerError::LockingRelease { .. } => {
                let suggestion = Some(
                    "Check connectivity to the storage backend and that the bucket exists."
                        .to_string(),
                );
                (suggestion, None)
            }
            _ => (None, None),
        };

        ErrorContext {
            error,
            suggestion,
            details,
        }
    }

    pub fn with_suggestion(mut self, suggestion: String) -> Self {
        self.suggestion = Some(suggestion);
        self
    }

    pub fn with_details(mut self, details: String) -> Self {
        self.details = Some(details);
        self
    }
}

impl<'a> fmt::Display for ErrorContext<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error: {}", self.error)?;

        if let Some(details) = &self.details {
            write!(f, "\n\nDetails: {details}")?;
        }

        if let Some(suggestion) = &self.suggestion {
            write!(f, "\n\nSuggestion: {suggestion}")?;
        }

        Ok(())
    }
}
