//! REST client for session and instance management.
//!
//! The engine talks to the backend through the [`SessionApi`] trait so tests
//! can substitute a fake. [`ApiClient`] is the `reqwest` implementation.
//!
//! # Endpoints
//!
//! | Call                                  | Success     | Mapped failures                       |
//! |---------------------------------------|-------------|---------------------------------------|
//! | `GET    /sessions/{id}`               | session     | 404 → `NotFound`                      |
//! | `POST   /sessions/{id}/instances`     | instance    | 409 → `Capacity`, 503 → `ResourceExhausted` |
//! | `DELETE /sessions/{id}/instances/{n}` | `()`        | 404 → success (already gone)          |
//!
//! Every other non-success status becomes [`SessionError::Request`].

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::SessionError;
use crate::instance::InstanceRecord;

/// Session as returned by `GET /sessions/{id}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SessionRecord {
    /// Session identifier.
    pub id: String,
    /// Existing instances, keyed (and ordered) by name.
    pub instances: BTreeMap<String, InstanceRecord>,
    /// Creation time.
    pub created_at: Option<DateTime<Utc>>,
    /// Expiry time.
    pub expires_at: Option<DateTime<Utc>>,
    /// Whether provisioning has finished. Absent means ready.
    pub ready: Option<bool>,
}

/// Optional body of an instance creation request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CreateInstanceRequest {
    /// Image to start from; backend default when absent.
    #[serde(rename = "ImageName", skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Requested hostname.
    #[serde(rename = "Hostname", skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    /// Instance type, e.g. `"linux"`.
    #[serde(rename = "Type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl CreateInstanceRequest {
    /// Whether the request carries no fields and can be sent without a body.
    pub fn is_empty(&self) -> bool {
        self.image.is_none() && self.hostname.is_none() && self.kind.is_none()
    }
}

/// Backend operations the engine needs.
#[async_trait]
pub trait SessionApi: Send + Sync {
    /// Fetch the session and its instances.
    async fn get_session(&self, session_id: &str) -> Result<SessionRecord, SessionError>;

    /// Ask the backend for a new instance.
    async fn create_instance(
        &self,
        session_id: &str,
        request: &CreateInstanceRequest,
    ) -> Result<InstanceRecord, SessionError>;

    /// Delete an instance.
    async fn delete_instance(&self, session_id: &str, name: &str) -> Result<(), SessionError>;
}

/// `503` body marking a backend capacity shortage.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: String,
}

/// HTTP client for the playground backend.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    server_url: String,
}

impl ApiClient {
    /// Create a client for `server_url` with the default timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(server_url: impl Into<String>) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(constants::HTTP_REQUEST_TIMEOUT)
            .build()?;
        Ok(Self::with_client(client, server_url))
    }

    /// Create a client around a pre-configured `reqwest::Client`.
    pub fn with_client(client: Client, server_url: impl Into<String>) -> Self {
        let server_url = server_url.into().trim_end_matches('/').to_string();
        Self { client, server_url }
    }

    /// Backend origin.
    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    fn session_url(&self, session_id: &str) -> String {
        format!("{}/sessions/{}", self.server_url, session_id)
    }
}

#[async_trait]
impl SessionApi for ApiClient {
    async fn get_session(&self, session_id: &str) -> Result<SessionRecord, SessionError> {
        let url = self.session_url(session_id);
        log::debug!("[Api] GET {}", url);

        let response = self.client.get(&url).send().await?;
        match response.status() {
            status if status.is_success() => {
                let record: SessionRecord = response.json().await?;
                log::info!(
                    "[Api] Loaded session {} with {} instance(s)",
                    session_id,
                    record.instances.len()
                );
                Ok(record)
            }
            StatusCode::NOT_FOUND => {
                log::warn!("[Api] Session {} not found", session_id);
                Err(SessionError::NotFound(session_id.to_string()))
            }
            status => Err(SessionError::Request(format!(
                "failed to load session {session_id}: {status}"
            ))),
        }
    }

    async fn create_instance(
        &self,
        session_id: &str,
        request: &CreateInstanceRequest,
    ) -> Result<InstanceRecord, SessionError> {
        let url = format!("{}/instances", self.session_url(session_id));
        log::debug!("[Api] POST {}", url);

        let mut builder = self.client.post(&url);
        if !request.is_empty() {
            builder = builder.json(request);
        }
        let response = builder.send().await?;

        match response.status() {
            status if status.is_success() => {
                let record: InstanceRecord = response.json().await?;
                log::info!("[Api] Created instance {}", record.name);
                Ok(record)
            }
            StatusCode::CONFLICT => {
                log::warn!("[Api] Instance limit reached for session {}", session_id);
                Err(SessionError::Capacity)
            }
            StatusCode::SERVICE_UNAVAILABLE => {
                let body = response.text().await.unwrap_or_default();
                let out_of_capacity = serde_json::from_str::<ErrorBody>(&body)
                    .is_ok_and(|b| b.error == "out_of_capacity");
                if out_of_capacity {
                    log::warn!("[Api] Backend out of capacity");
                    Err(SessionError::ResourceExhausted)
                } else {
                    Err(SessionError::Request(format!(
                        "instance creation failed: {}",
                        StatusCode::SERVICE_UNAVAILABLE
                    )))
                }
            }
            status => Err(SessionError::Request(format!(
                "instance creation failed: {status}"
            ))),
        }
    }

    async fn delete_instance(&self, session_id: &str, name: &str) -> Result<(), SessionError> {
        let url = format!("{}/instances/{}", self.session_url(session_id), name);
        log::debug!("[Api] DELETE {}", url);

        let response = self.client.delete(&url).send().await?;
        match response.status() {
            status if status.is_success() => {
                log::info!("[Api] Deleted instance {}", name);
                Ok(())
            }
            StatusCode::NOT_FOUND => {
                log::warn!("[Api] Instance {} already gone, treating delete as done", name);
                Ok(())
            }
            status => Err(SessionError::Request(format!(
                "failed to delete {name}: {status}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_record_from_backend_json() {
        let record: SessionRecord = serde_json::from_str(
            r#"{
                "id": "s1",
                "instances": {
                    "node2": { "name": "node2", "ip": "10.0.0.3" },
                    "node1": { "name": "node1", "ip": "10.0.0.2", "hostname": "manager1" }
                },
                "created_at": "2024-01-01T10:00:00Z",
                "expires_at": "2024-01-01T14:00:00.5+00:00",
                "pwd_ip_address": "1.2.3.4"
            }"#,
        )
        .expect("session json");

        assert_eq!(record.id, "s1");
        let names: Vec<_> = record.instances.keys().cloned().collect();
        assert_eq!(names, ["node1", "node2"]);
        assert!(record.created_at.is_some());
        assert!(record.expires_at.is_some());
        assert_eq!(record.ready, None);
    }

    #[test]
    fn test_create_request_body_uses_backend_field_names() {
        let request = CreateInstanceRequest {
            image: Some("franela/dind".into()),
            hostname: None,
            kind: Some("linux".into()),
        };
        assert_eq!(
            serde_json::to_value(&request).expect("serialize"),
            serde_json::json!({ "ImageName": "franela/dind", "Type": "linux" })
        );
        assert!(CreateInstanceRequest::default().is_empty());
    }

    #[test]
    fn test_server_url_trailing_slash_trimmed() {
        let client = ApiClient::with_client(Client::new(), "http://localhost/");
        assert_eq!(client.server_url(), "http://localhost");
        assert_eq!(client.session_url("abc"), "http://localhost/sessions/abc");
    }
}
