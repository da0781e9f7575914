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
use crate::user_agent;
use attohttpc::Session;
use gcp_auth::{CustomServiceAccount, TokenProvider};
use log::{debug, trace};
use retry::{OperationResult, delay::Exponential, retry_with_index};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::runtime::Runtime;

pub const DEFAULT_METADATA_HOST: &str = "metadata.google.internal";
const METADATA_HOST_ENV: &str = "GCE_METADATA_HOST";
const CREDENTIALS_FILE_ENV: &str = "GOOGLE_APPLICATION_CREDENTIALS";
const STORAGE_SCOPE: &str = "https://www.googleapis.com/auth/devstorage.read_write";
const TOKEN_EXCHANGE_TIMEOUT: Duration = Duration::from_secs(10);
const TOKEN_PATH: &str = "computeMetadata/v1/instance/service-accounts/default/token";
const METADATA_TIMEOUT: Duration = Duration::from_secs(3);
const MAX_RETRIES: usize = 3;
const INITIAL_BACKOFF_MS: u64 = 200;
// Refresh this long before the reported expiry.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Clone)]
pub struct CachedToken {
    value: String,
    refresh_at: Instant,
}

/// Source of bearer tokens for the storage API.
pub enum Credentials {
    /// Token supplied by configuration, used as-is.
    Static(String),
    /// Service account key file named by `GOOGLE_APPLICATION_CREDENTIALS`.
    ServiceAccount {
        path: PathBuf,
        runtime: Runtime,
        account: CustomServiceAccount,
    },
    /// Token minted by the compute metadata server and refreshed before expiry.
    Metadata {
        base_url: String,
        cached: Mutex<Option<CachedToken>>,
    },
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Static(_) => f.debug_tuple("Static").field(&"<redacted>").finish(),
            Credentials::ServiceAccount { path, .. } => f
                .debug_struct("ServiceAccount")
                .field("path", path)
                .finish_non_exhaustive(),
            Credentials::Metadata { base_url, .. } => f
                .debug_struct("Metadata")
                .field("base_url", base_url)
                .finish_non_exhaustive(),
        }
    }
}

impl Credentials {
    /// Picks the first available source: the explicit token, the key file in
    /// `GOOGLE_APPLICATION_CREDENTIALS`, then the metadata server.
    pub fn resolve(explicit: Option<&str>) -> Result<Self> {
        Self::resolve_from(
            explicit,
            std::env::var_os(CREDENTIALS_FILE_ENV).map(PathBuf::from),
            std::env::var(METADATA_HOST_ENV).ok(),
        )
    }

    /// Same as [`Credentials::resolve`] with the environment passed in.
    ///
    /// The chosen source is asked for a token immediately, so a bad key file
    /// or an unreachable metadata server is reported before any lock request.
    pub fn resolve_from(
        explicit: Option<&str>,
        credentials_file: Option<PathBuf>,
        metadata_host: Option<String>,
    ) -> Result<Self> {
        if let Some(token) = explicit.map(str::trim).filter(|token| !token.is_empty()) {
            debug!("Using access token from configuration");
            return Ok(Credentials::Static(token.to_string()));
        }

        let credentials = match credentials_file.filter(|path| !path.as_os_str().is_empty()) {
            Some(path) => {
                debug!("Using service account key from {}", path.display());
                Self::service_account(&path)?
            }
            None => {
                let host = metadata_host
                    .filter(|host| !host.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_METADATA_HOST.to_string());
                debug!("Using metadata server at {host}");
                Self::metadata(format!("http://{host}"))
            }
        };
        credentials
            .bearer_token()
            .map_err(|err| LockerError::BackendUnavailable(err.to_string()))?;
        Ok(credentials)
    }

    /// Loads a service account key file. Token exchange happens on demand.
    pub fn service_account(path: &Path) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|err| {
                LockerError::BackendUnavailable(format!("Cannot start token client: {err}"))
            })?;
        let account = {
            let _guard = runtime.enter();
            CustomServiceAccount::from_file(path).map_err(|err| {
                LockerError::BackendUnavailable(format!(
                    "Cannot load service account key from {}: {err}",
                    path.display()
                ))
            })?
        };
        Ok(Credentials::ServiceAccount {
            path: path.to_path_buf(),
            runtime,
            account,
        })
    }

    pub fn metadata(base_url: impl Into<String>) -> Self {
        Credentials::Metadata {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            cached: Mutex::new(None),
        }
    }

    pub fn bearer_token(&self) -> Result<String> {
        match self {
            Credentials::Static(token) => Ok(token.clone()),
            Credentials::ServiceAccount {
                path,
                runtime,
                account,
            } => {
                let exchange = runtime.block_on(async {
                    tokio::time::timeout(TOKEN_EXCHANGE_TIMEOUT, account.token(&[STORAGE_SCOPE]))
                        .await
                });
                match exchange {
                    Ok(Ok(token)) => Ok(token.as_str().to_string()),
                    Ok(Err(err)) => Err(LockerError::StorageRequest(format!(
                        "Token exchange for {} failed: {err}",
                        path.display()
                    ))),
                    Err(_) => Err(LockerError::StorageRequest(format!(
                        "Token exchange for {} timed out after {}s",
                        path.display(),
                        TOKEN_EXCHANGE_TIMEOUT.as_secs()
                    ))),
                }
            }
            Credentials::Metadata { base_url, cached } => {
                let mut guard = cached.lock().map_err(|_| {
                    LockerError::StorageRequest("credential cache is poisoned".to_string())
                })?;
                if let Some(token) = guard.as_ref() {
                    if Instant::now() < token.refresh_at {
                        return Ok(token.value.clone());
                    }
                    debug!("Cached access token is about to expire; refreshing");
                }

                let fetched = fetch_metadata_token(base_url)?;
                let lifetime = Duration::from_secs(fetched.expires_in);
                let token = CachedToken {
                    value: fetched.access_token,
                    refresh_at: Instant::now() + lifetime.saturating_sub(EXPIRY_MARGIN),
                };
                let value = token.value.clone();
                *guard = Some(token);
                Ok(value)
            }
        }
    }
}

fn fetch_metadata_token(base_url: &str) -> Result<TokenResponse> {
    let url = format!("{base_url}/{TOKEN_PATH}");
    let mut session = Session::new();
    session.header("User-Agent", user_agent::metadata_client().as_str());
    session.header("Metadata-Flavor", "Google");
    session.timeout(METADATA_TIMEOUT);

    let result = retry_with_index(
        Exponential::from_millis(INITIAL_BACKOFF_MS).take(MAX_RETRIES),
        |current_try| {
            let last_try = current_try >= (MAX_RETRIES - 1) as u64;
            let response = match session.get(&url).send() {
                Ok(response) => response,
                Err(err) => {
                    let error = LockerError::StorageRequest(format!(
                        "Cannot reach metadata server at {base_url}: {err}"
                    ));
                    return if last_try {
                        OperationResult::Err(error)
                    } else {
                        OperationResult::Retry(error)
                    };
                }
            };

            let status = response.status();
            if status.is_server_error() && !last_try {
                return OperationResult::Retry(LockerError::StorageRequest(format!(
                    "Metadata server returned HTTP {}",
                    status.as_u16()
                )));
            }
            if !status.is_success() {
                return OperationResult::Err(LockerError::StorageRequest(format!(
                    "Metadata server refused the token request (HTTP {})",
                    status.as_u16()
                )));
            }

            match response.json::<TokenResponse>() {
                Ok(token) => {
                    trace!("Metadata token expires in {}s", token.expires_in);
                    OperationResult::Ok(token)
                }
                Err(err) => OperationResult::Err(LockerError::StorageRequest(format!(
                    "Invalid token response from metadata server: {err}"
                ))),
            }
        },
    );

    result.map_err(|e| e.error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;

    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn explicit_token_is_used_verbatim() {
        let credentials = Credentials::resolve(Some(" ya29.token ")).unwrap();
        assert_eq!(credentials.bearer_token().unwrap(), "ya29.token");
    }

    #[test]
    fn explicit_token_wins_over_key_file() {
        let credentials = Credentials::resolve_from(
            Some("ya29.token"),
            Some(PathBuf::from("/nonexistent/sa.json")),
            Some("127.0.0.1:1".to_string()),
        )
        .unwrap();
        assert!(matches!(credentials, Credentials::Static(_)));
    }

    #[test]
    fn key_file_is_preferred_over_metadata_server() {
        let err = Credentials::resolve_from(
            None,
            Some(PathBuf::from("/nonexistent/sa.json")),
            Some("127.0.0.1:1".to_string()),
        )
        .unwrap_err();
        assert!(matches!(err, LockerError::BackendUnavailable(_)));
        let message = err.to_string();
        assert!(message.contains("/nonexistent/sa.json"));
        assert!(!message.contains("metadata server"));
    }

    #[test]
    fn malformed_key_file_is_reported() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(br#"{"type":"service_account"}"#).unwrap();

        let err = Credentials::resolve_from(
            None,
            Some(file.path().to_path_buf()),
            Some("127.0.0.1:1".to_string()),
        )
        .unwrap_err();
        assert!(matches!(err, LockerError::BackendUnavailable(_)));
        assert!(err.to_string().contains("Cannot load service account key"));
    }

    #[test]
    fn empty_key_file_variable_falls_back_to_metadata_server() {
        let mut server = Server::new();
        let mock = server
            .mock("GET", format!("/{TOKEN_PATH}").as_str())
            .with_status(200)
            .with_body(r#"{"access_token":"meta-token","expires_in":3599}"#)
            .expect(1)
            .create();
        let host = server.host_with_port();

        let credentials =
            Credentials::resolve_from(None, Some(PathBuf::new()), Some(host)).unwrap();
        assert!(matches!(credentials, Credentials::Metadata { .. }));
        assert_eq!(credentials.bearer_token().unwrap(), "meta-token");
        mock.assert();
    }

    #[test]
    fn debug_output_hides_tokens() {
        let rendered = format!("{:?}", Credentials::Static("ya29.secret".to_string()));
        assert!(!rendered.contains("ya29.secret"));
    }

    #[test]
    fn metadata_token_is_fetched_and_cached() {
        let mut server = Server::new();
        let mock = server
            .mock("GET", format!("/{TOKEN_PATH}").as_str())
            .match_header("Metadata-Flavor", "Google")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"meta-token","expires_in":3599,"token_type":"Bearer"}"#)
            .expect(1)
            .create();

        let credentials = Credentials::metadata(server.url());
        assert_eq!(credentials.bearer_token().unwrap(), "meta-token");
        assert_eq!(credentials.bearer_token().unwrap(), "meta-token");
        mock.assert();
    }

    #[test]
    fn short_lived_token_is_refreshed() {
        let mut server = Server::new();
        let mock = server
            .mock("GET", format!("/{TOKEN_PATH}").as_str())
            .with_status(200)
            .with_body(r#"{"access_token":"brief","expires_in":30}"#)
            .expect(2)
            .create();

        let credentials = Credentials::metadata(server.url());
        credentials.bearer_token().unwrap();
        credentials.bearer_token().unwrap();
        mock.assert();
    }

    #[test]
    fn refused_token_request_is_an_error() {
        let mut server = Server::new();
        let _mock = server
            .mock("GET", format!("/{TOKEN_PATH}").as_str())
            .with_status(403)
            .create();

        let credentials = Credentials::metadata(server.url());
        let err = credentials.bearer_token().unwrap_err();
        assert!(err.to_string().contains("HTTP 403"));
    }
}
