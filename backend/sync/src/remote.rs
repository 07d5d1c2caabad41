//! HTTP client store that forwards progress writes to the VibeStudy gateway.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use tracing::debug;

use vibestudy_core::{Day, DayProgress, ProgressStore, ProgressWrite, StoreError, UserId, WriteAck};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct UpsertResponse {
    applied: bool,
}

pub struct RemoteProgressStore {
    client: Client,
    base_url: String,
    access_token: String,
}

impl RemoteProgressStore {
    pub fn new(base_url: impl Into<String>, access_token: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token: access_token.into(),
        })
    }

    fn day_url(&self, day: Day) -> String {
        format!("{}/api/progress/{}", self.base_url, day.0)
    }
}

/// Throttling, timeouts and server errors are worth retrying; any other
/// rejection means the write itself is unacceptable.
fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

async fn check(response: Response) -> Result<Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = format!("gateway returned {status}: {body}");
    if is_transient_status(status) {
        Err(StoreError::transient(message))
    } else {
        Err(StoreError::permanent(message))
    }
}

fn transport_error(err: reqwest::Error) -> StoreError {
    if err.is_decode() {
        StoreError::permanent(format!("unreadable gateway response: {err}"))
    } else {
        StoreError::transient(format!("gateway unreachable: {err}"))
    }
}

#[async_trait]
impl ProgressStore for RemoteProgressStore {
    fn name(&self) -> &str {
        "remote"
    }

    async fn upsert(&self, write: &ProgressWrite) -> Result<WriteAck, StoreError> {
        let response = self
            .client
            .put(self.day_url(write.day))
            .bearer_auth(&self.access_token)
            .json(write)
            .send()
            .await
            .map_err(transport_error)?;

        let body: UpsertResponse = check(response)
            .await?
            .json()
            .await
            .map_err(transport_error)?;

        debug!(key = %write.key(), applied = body.applied, "Remote upsert acknowledged");
        Ok(if body.applied { WriteAck::Applied } else { WriteAck::Stale })
    }

    async fn load_day(&self, _user_id: &UserId, day: Day) -> Result<DayProgress, StoreError> {
        // The gateway scopes reads to the token's user.
        let response = self
            .client
            .get(self.day_url(day))
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(transport_error)?;

        check(response).await?.json().await.map_err(transport_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vibestudy_core::{SyncField, WriteVersion};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn code_write() -> ProgressWrite {
        ProgressWrite {
            user_id: "u1".into(),
            day: Day(3),
            field: SyncField::Code { code: "fn main() {}".into() },
            version: WriteVersion::new(1, 1),
        }
    }

    #[tokio::test]
    async fn maps_ack_body() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/api/progress/3"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "applied": false })))
            .mount(&server)
            .await;

        let store = RemoteProgressStore::new(server.uri(), "tok").unwrap();
        assert_eq!(store.upsert(&code_write()).await.unwrap(), WriteAck::Stale);
    }

    #[tokio::test]
    async fn throttling_is_transient_and_forbidden_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/api/progress/3"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;
        let store = RemoteProgressStore::new(server.uri(), "tok").unwrap();
        assert!(store.upsert(&code_write()).await.unwrap_err().is_transient());

        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;
        let store = RemoteProgressStore::new(server.uri(), "tok").unwrap();
        assert!(!store.upsert(&code_write()).await.unwrap_err().is_transient());
    }

    #[tokio::test]
    async fn unreachable_gateway_is_transient() {
        // Nothing listens on port 9 of localhost in the test environment.
        let store = RemoteProgressStore::new("http://127.0.0.1:9", "tok").unwrap();
        assert!(store.upsert(&code_write()).await.unwrap_err().is_transient());
    }

    #[tokio::test]
    async fn loads_day_json() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/progress/3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "day": 3,
                "notes": "ownership",
                "tasks": { "t1": true },
                "completed": false
            })))
            .mount(&server)
            .await;

        let store = RemoteProgressStore::new(server.uri(), "tok").unwrap();
        let day = store.load_day(&"u1".into(), Day(3)).await.unwrap();
        assert_eq!(day.notes.as_deref(), Some("ownership"));
        assert_eq!(day.completed_task_count(), 1);
    }
}
