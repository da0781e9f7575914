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

//! Google Cloud Storage backend using the JSON API.
//!
//! Conditional create is an upload with `ifGenerationMatch=0`, which the
//! service only accepts when no live object exists under the name. A 412
//! therefore means the lock is held. Cloud Storage throttles repeated
//! mutations of one object name with 429, which is treated as contention
//! rather than failure.

use crate::error::{LockerError, Result};
use crate::storage::credentials::Credentials;
use crate::storage::{CreateOutcome, DeleteOutcome, ObjectInfo, ObjectStore, UNKNOWN_GENERATION};
use crate::user_agent;
use attohttpc::body::Body;
use attohttpc::{RequestBuilder, Response, Session};
use chrono::{DateTime, Utc};
use log::{debug, trace};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use url::Url;

pub const DEFAULT_ENDPOINT: &str = "https://storage.googleapis.com";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MIN_REQUEST_TIMEOUT: Duration = Duration::from_millis(250);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectResource {
    generation: String,
    time_created: Option<DateTime<Utc>>,
}

pub struct GcsStore {
    session: Session,
    endpoint: Url,
    bucket: String,
    credentials: Credentials,
}

impl fmt::Debug for GcsStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GcsStore")
            .field("endpoint", &self.endpoint.as_str())
            .field("bucket", &self.bucket)
            .finish()
    }
}

impl GcsStore {
    pub fn new(bucket: &str, endpoint: &str, credentials: Credentials) -> Result<Self> {
        let endpoint = Url::parse(endpoint).map_err(|err| {
            LockerError::BackendUnavailable(format!(
                "Invalid storage endpoint '{endpoint}': {err}"
            ))
        })?;
        if !matches!(endpoint.scheme(), "http" | "https") || endpoint.cannot_be_a_base() {
            return Err(LockerError::BackendUnavailable(format!(
                "Storage endpoint '{endpoint}' must be an http(s) URL"
            )));
        }

        let mut session = Session::new();
        session.header("User-Agent", user_agent::storage_client().as_str());
        session.timeout(DEFAULT_REQUEST_TIMEOUT);
        session.proxy_settings(attohttpc::ProxySettings::from_env());

        Ok(Self {
            session,
            endpoint,
            bucket: bucket.to_string(),
            credentials,
        })
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| {
                LockerError::BackendUnavailable(format!(
                    "Storage endpoint '{}' cannot carry a path",
                    self.endpoint
                ))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn upload_url(&self) -> Result<Url> {
        self.url(&["upload", "storage", "v1", "b", &self.bucket, "o"])
    }

    fn object_url(&self, key: &str) -> Result<Url> {
        self.url(&["storage", "v1", "b", &self.bucket, "o", key])
    }

    fn send<B: Body>(
        &self,
        request: RequestBuilder<B>,
        budget: Option<Duration>,
    ) -> Result<Response> {
        let token = self.credentials.bearer_token()?;
        let response = request
            .header("Authorization", format!("Bearer {token}").as_str())
            .timeout(request_timeout(budget))
            .send()?;
        Ok(response)
    }
}

impl ObjectStore for GcsStore {
    fn location(&self) -> String {
        format!("gs://{}", self.bucket)
    }

    fn create_if_absent(
        &self,
        key: &str,
        body: &[u8],
        budget: Option<Duration>,
    ) -> Result<CreateOutcome> {
        let url = self.upload_url()?;
        let request = self
            .session
            .post(url.as_str())
            .param("uploadType", "media")
            .param("name", key)
            .param("ifGenerationMatch", "0")
            .header("Content-Type", "application/json")
            .bytes(body.to_vec());
        let response = self.send(request, budget)?;
        let status = response.status().as_u16();
        trace!("Conditional create of {key} returned HTTP {status}");

        match status {
            200 | 201 => {
                // The object exists now even if the body cannot be decoded.
                let generation = match response.json::<ObjectResource>() {
                    Ok(resource) => resource.generation,
                    Err(err) => {
                        debug!("Cannot read generation of created {key}: {err}");
                        UNKNOWN_GENERATION.to_string()
                    }
                };
                debug!("Created gs://{}/{key} (generation {generation})", self.bucket);
                Ok(CreateOutcome::Created { generation })
            }
            412 => Ok(CreateOutcome::Exists),
            _ if is_contention(status) => {
                Ok(CreateOutcome::Contended(describe(status, response)))
            }
            _ => Err(classify_failure(&self.bucket, key, status, response)),
        }
    }

    fn delete(
        &self,
        key: &str,
        if_generation: Option<&str>,
        budget: Option<Duration>,
    ) -> Result<DeleteOutcome> {
        let url = self.object_url(key)?;
        let mut request = self.session.delete(url.as_str());
        if let Some(generation) = if_generation {
            request = request.param("ifGenerationMatch", generation);
        }
        let response = self.send(request, budget)?;
        let status = response.status().as_u16();
        trace!("Delete of {key} returned HTTP {status}");

        match status {
            200 | 204 => Ok(DeleteOutcome::Deleted),
            404 => Ok(DeleteOutcome::Missing),
            412 => Ok(DeleteOutcome::Contended(format!(
                "gs://{}/{key} was replaced by a newer generation",
                self.bucket
            ))),
            _ if is_contention(status) => {
                Ok(DeleteOutcome::Contended(describe(status, response)))
            }
            _ => Err(classify_failure(&self.bucket, key, status, response)),
        }
    }

    fn stat(&self, key: &str, budget: Option<Duration>) -> Result<Option<ObjectInfo>> {
        let url = self.object_url(key)?;
        let request = self
            .session
            .get(url.as_str())
            .param("fields", "generation,timeCreated");
        let response = self.send(request, budget)?;
        let status = response.status().as_u16();

        match status {
            200 => {
                let resource: ObjectResource = response.json()?;
                let created_at = resource.time_created.ok_or_else(|| {
                    LockerError::StorageRequest(format!(
                        "gs://{}/{key} metadata has no creation time",
                        self.bucket
                    ))
                })?;
                Ok(Some(ObjectInfo {
                    generation: resource.generation,
                    created_at,
                }))
            }
            404 => Ok(None),
            _ => Err(classify_failure(&self.bucket, key, status, response)),
        }
    }
}

fn request_timeout(budget: Option<Duration>) -> Duration {
    match budget {
        Some(remaining) => remaining.clamp(MIN_REQUEST_TIMEOUT, DEFAULT_REQUEST_TIMEOUT),
        None => DEFAULT_REQUEST_TIMEOUT,
    }
}

fn is_contention(status: u16) -> bool {
    matches!(status, 409 | 429 | 500 | 502 | 503 | 504)
}

fn describe(status: u16, response: Response) -> String {
    let body = response.text().unwrap_or_default();
    let message = error_message(&body).unwrap_or(body);
    if message.trim().is_empty() {
        format!("HTTP {status}")
    } else {
        format!("HTTP {status}: {}", message.trim())
    }
}

fn classify_failure(bucket: &str, key: &str, status: u16, response: Response) -> LockerError {
    let detail = describe(status, response);
    match status {
        401 | 403 => LockerError::PermissionDenied(format!("gs://{bucket}/{key} ({detail})")),
        404 => LockerError::StorageRequest(format!("Bucket gs://{bucket} not found ({detail})")),
        _ => LockerError::StorageRequest(format!("gs://{bucket}/{key} ({detail})")),
    }
}

/// Extracts `error.message` from a JSON API error body.
fn error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("error")?
        .get("message")?
        .as_str()
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn store(server: &Server) -> GcsStore {
        GcsStore::new(
            "ci-locks",
            &server.url(),
            Credentials::Static("test-token".to_string()),
        )
        .unwrap()
    }

    #[test]
    fn create_sends_generation_precondition() {
        let mut server = Server::new();
        let mock = server
            .mock("POST", "/upload/storage/v1/b/ci-locks/o")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("uploadType".into(), "media".into()),
                Matcher::UrlEncoded("name".into(), "deploy".into()),
                Matcher::UrlEncoded("ifGenerationMatch".into(), "0".into()),
            ]))
            .match_header("authorization", "Bearer test-token")
            .match_body(r#"{"lock":"deploy"}"#)
            .with_status(200)
            .with_body(r#"{"name":"deploy","generation":"1700000000000001"}"#)
            .create();

        let outcome = store(&server)
            .create_if_absent("deploy", br#"{"lock":"deploy"}"#, None)
            .unwrap();
        assert_eq!(
            outcome,
            CreateOutcome::Created {
                generation: "1700000000000001".to_string()
            }
        );
        mock.assert();
    }

    #[test]
    fn undecodable_create_response_is_still_created() {
        let mut server = Server::new();
        let _mock = server
            .mock("POST", "/upload/storage/v1/b/ci-locks/o")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("<html>proxy says ok</html>")
            .create();

        let outcome = store(&server)
            .create_if_absent("deploy", b"{}", None)
            .unwrap();
        assert_eq!(
            outcome,
            CreateOutcome::Created {
                generation: UNKNOWN_GENERATION.to_string()
            }
        );
    }

    #[test]
    fn precondition_failure_means_exists() {
        let mut server = Server::new();
        let _mock = server
            .mock("POST", "/upload/storage/v1/b/ci-locks/o")
            .match_query(Matcher::Any)
            .with_status(412)
            .create();

        let outcome = store(&server)
            .create_if_absent("deploy", b"{}", None)
            .unwrap();
        assert_eq!(outcome, CreateOutcome::Exists);
    }

    #[test]
    fn throttling_is_contention() {
        let mut server = Server::new();
        let _mock = server
            .mock("POST", "/upload/storage/v1/b/ci-locks/o")
            .match_query(Matcher::Any)
            .with_status(429)
            .with_body(r#"{"error":{"code":429,"message":"The object exceeded the rate limit"}}"#)
            .create();

        let outcome = store(&server)
            .create_if_absent("deploy", b"{}", None)
            .unwrap();
        match outcome {
            CreateOutcome::Contended(reason) => {
                assert!(reason.contains("429"));
                assert!(reason.contains("rate limit"));
            }
            other => panic!("Expected contention, got {other:?}"),
        }
    }

    #[test]
    fn forbidden_is_permission_denied() {
        let mut server = Server::new();
        let _mock = server
            .mock("POST", "/upload/storage/v1/b/ci-locks/o")
            .match_query(Matcher::Any)
            .with_status(403)
            .create();

        let err = store(&server)
            .create_if_absent("deploy", b"{}", None)
            .unwrap_err();
        assert!(matches!(err, LockerError::PermissionDenied(_)));
    }

    #[test]
    fn delete_encodes_object_name() {
        let mut server = Server::new();
        let mock = server
            .mock("DELETE", "/storage/v1/b/ci-locks/o/team%2Fdeploy")
            .with_status(204)
            .create();

        let outcome = store(&server)
            .delete("team/deploy", None, None)
            .unwrap();
        assert_eq!(outcome, DeleteOutcome::Deleted);
        mock.assert();
    }

    #[test]
    fn delete_of_missing_object_is_missing() {
        let mut server = Server::new();
        let _mock = server
            .mock("DELETE", "/storage/v1/b/ci-locks/o/deploy")
            .with_status(404)
            .create();

        let outcome = store(&server).delete("deploy", None, None).unwrap();
        assert_eq!(outcome, DeleteOutcome::Missing);
    }

    #[test]
    fn conditional_delete_mismatch_is_contention() {
        let mut server = Server::new();
        let _mock = server
            .mock("DELETE", "/storage/v1/b/ci-locks/o/deploy")
            .match_query(Matcher::UrlEncoded(
                "ifGenerationMatch".into(),
                "42".into(),
            ))
            .with_status(412)
            .create();

        let outcome = store(&server)
            .delete("deploy", Some("42"), None)
            .unwrap();
        assert!(matches!(outcome, DeleteOutcome::Contended(_)));
    }

    #[test]
    fn stat_reads_generation_and_creation_time() {
        let mut server = Server::new();
        let _mock = server
            .mock("GET", "/storage/v1/b/ci-locks/o/deploy")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"generation":"7","timeCreated":"2025-01-02T03:04:05.000Z"}"#)
            .create();

        let info = store(&server).stat("deploy", None).unwrap().unwrap();
        assert_eq!(info.generation, "7");
        assert_eq!(info.created_at.to_rfc3339(), "2025-01-02T03:04:05+00:00");
    }

    #[test]
    fn stat_of_missing_object_is_none() {
        let mut server = Server::new();
        let _mock = server
            .mock("GET", "/storage/v1/b/ci-locks/o/deploy")
            .match_query(Matcher::Any)
            .with_status(404)
            .create();

        assert!(store(&server).stat("deploy", None).unwrap().is_none());
    }

    #[test]
    fn request_timeout_follows_budget() {
        assert_eq!(request_timeout(None), DEFAULT_REQUEST_TIMEOUT);
        assert_eq!(
            request_timeout(Some(Duration::from_secs(5))),
            Duration::from_secs(5)
        );
        assert_eq!(request_timeout(Some(Duration::ZERO)), MIN_REQUEST_TIMEOUT);
        assert_eq!(
            request_timeout(Some(Duration::from_secs(600))),
            DEFAULT_REQUEST_TIMEOUT
        );
    }

    #[test]
    fn rejects_non_http_endpoint() {
        let err = GcsStore::new(
            "ci-locks",
            "ftp://example.com",
            Credentials::Static("t".to_string()),
        )
        .unwrap_err();
        assert!(matches!(err, LockerError::BackendUnavailable(_)));
    }
}
