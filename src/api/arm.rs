//! HTTPS implementation of [`ContainerGroupsApi`] against the resource manager.

use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;

use reqwest::header::{HeaderMap, LOCATION, RETRY_AFTER};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{Instrument, debug, debug_span};
use uuid::Uuid;

use super::models::{
    AsyncOperationStatus, ContainerGroup, ErrorResponse, NetworkProfile, TagsPatch,
};
use super::{ApiError, ApiFuture, ContainerGroupsApi, OperationHandle, OperationStatus, PollKind};
use crate::config::AzureConfig;
use crate::ids::{ContainerGroupId, NetworkProfileId};

const HTTP_TIMEOUT: Duration = Duration::from_secs(60);
const CONTAINER_INSTANCE_API_VERSION: &str = "2019-12-01";
const NETWORK_API_VERSION: &str = "2021-02-01";
const ASYNC_OPERATION_HEADER: &str = "azure-asyncoperation";
const CLIENT_REQUEST_ID_HEADER: &str = "x-ms-client-request-id";

static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
});

/// Resource manager client authenticated with a bearer token.
#[derive(Clone)]
pub struct ArmClient {
    endpoint: String,
    access_token: String,
}

impl fmt::Debug for ArmClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArmClient")
            .field("endpoint", &self.endpoint)
            .field("access_token", &"<redacted>")
            .finish()
    }
}

impl ArmClient {
    /// Creates a client for `endpoint` (for example
    /// `https://management.azure.com`).
    #[must_use]
    pub fn new(endpoint: impl Into<String>, access_token: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        Self {
            endpoint: endpoint.trim_end_matches('/').to_owned(),
            access_token: access_token.into(),
        }
    }

    /// Creates a client from loaded configuration.
    #[must_use]
    pub fn from_config(config: &AzureConfig) -> Self {
        Self::new(&config.resource_manager_endpoint, &config.access_token)
    }

    fn resource_url(&self, id: &impl fmt::Display) -> String {
        format!("{}{id}", self.endpoint)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .bearer_auth(&self.access_token)
            .header(CLIENT_REQUEST_ID_HEADER, Uuid::new_v4().to_string())
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, ApiError> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|err| ApiError::Transport(err.to_string()))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(ApiError::NotFound);
        }
        if response.status().is_success() {
            return Ok(response);
        }
        Err(status_error(response).await)
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        url: &str,
        api_version: &str,
    ) -> Result<T, ApiError> {
        let response = self
            .send(HTTP_CLIENT.get(url).query(&[("api-version", api_version)]))
            .await?;
        decode_body(response).await
    }
}

async fn status_error(response: Response) -> ApiError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorResponse>(&body) {
        Ok(envelope) => ApiError::Status {
            status,
            code: envelope.error.code,
            message: envelope.error.message,
        },
        Err(_) => ApiError::Status {
            status,
            code: String::new(),
            message: body,
        },
    }
}

async fn decode_body<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let bytes = response
        .bytes()
        .await
        .map_err(|err| ApiError::Transport(err.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|err| ApiError::Decode(err.to_string()))
}

fn header_str<'h>(headers: &'h HeaderMap, name: impl reqwest::header::AsHeaderName) -> Option<&'h str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    header_str(headers, RETRY_AFTER)
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Maps the headers of an accepted mutating call to an operation handle.
fn operation_handle(status: StatusCode, headers: &HeaderMap) -> OperationHandle {
    if let Some(url) = header_str(headers, ASYNC_OPERATION_HEADER) {
        return OperationHandle::Pending {
            url: url.to_owned(),
            kind: PollKind::AsyncOperation,
            retry_after: retry_after(headers),
        };
    }
    if status == StatusCode::ACCEPTED
        && let Some(url) = header_str(headers, LOCATION)
    {
        return OperationHandle::Pending {
            url: url.to_owned(),
            kind: PollKind::Location,
            retry_after: retry_after(headers),
        };
    }
    OperationHandle::Completed
}

fn operation_status(body: AsyncOperationStatus, headers: &HeaderMap) -> OperationStatus {
    match body.status.as_str() {
        "Succeeded" => OperationStatus::Succeeded,
        "Canceled" => OperationStatus::Canceled,
        "Failed" => OperationStatus::Failed {
            message: body
                .error
                .map(|detail| format!("{}: {}", detail.code, detail.message))
                .unwrap_or_else(|| String::from("operation failed without details")),
        },
        _ => OperationStatus::InProgress {
            retry_after: retry_after(headers),
        },
    }
}

fn poll_span(kind: PollKind) -> tracing::Span {
    debug_span!("arm::poll_operation", ?kind)
}

impl ContainerGroupsApi for ArmClient {
    fn get_group<'a>(&'a self, id: &'a ContainerGroupId) -> ApiFuture<'a, ContainerGroup> {
        Box::pin(
            async move {
                self.fetch(&self.resource_url(id), CONTAINER_INSTANCE_API_VERSION)
                    .await
            }
            .instrument(debug_span!("arm::get_group", group = %id.name)),
        )
    }

    fn begin_create_or_update<'a>(
        &'a self,
        id: &'a ContainerGroupId,
        group: &'a ContainerGroup,
    ) -> ApiFuture<'a, OperationHandle> {
        Box::pin(async move {
            let request = HTTP_CLIENT
                .put(self.resource_url(id))
                .query(&[("api-version", CONTAINER_INSTANCE_API_VERSION)])
                .json(group);
            let response = self.send(request).await?;
            let handle = operation_handle(response.status(), response.headers());
            debug!(?handle, "create-or-update accepted");
            Ok(handle)
        }
        .instrument(debug_span!("arm::begin_create_or_update", group = %id.name)))
    }

    fn update_tags<'a>(
        &'a self,
        id: &'a ContainerGroupId,
        tags: &'a TagsPatch,
    ) -> ApiFuture<'a, ContainerGroup> {
        Box::pin(async move {
            let request = HTTP_CLIENT
                .patch(self.resource_url(id))
                .query(&[("api-version", CONTAINER_INSTANCE_API_VERSION)])
                .json(tags);
            let response = self.send(request).await?;
            decode_body(response).await
        }
        .instrument(debug_span!("arm::update_tags", group = %id.name)))
    }

    fn begin_delete<'a>(&'a self, id: &'a ContainerGroupId) -> ApiFuture<'a, OperationHandle> {
        Box::pin(async move {
            let request = HTTP_CLIENT
                .delete(self.resource_url(id))
                .query(&[("api-version", CONTAINER_INSTANCE_API_VERSION)]);
            let response = self.send(request).await?;
            let handle = operation_handle(response.status(), response.headers());
            debug!(?handle, "delete accepted");
            Ok(handle)
        }
        .instrument(debug_span!("arm::begin_delete", group = %id.name)))
    }

    fn poll_operation<'a>(
        &'a self,
        url: &'a str,
        kind: PollKind,
    ) -> ApiFuture<'a, OperationStatus> {
        Box::pin(async move {
            let response = self.send(HTTP_CLIENT.get(url)).await?;
            match kind {
                PollKind::AsyncOperation => {
                    let headers = response.headers().clone();
                    let body: AsyncOperationStatus = decode_body(response).await?;
                    Ok(operation_status(body, &headers))
                }
                PollKind::Location if response.status() == StatusCode::ACCEPTED => {
                    Ok(OperationStatus::InProgress {
                        retry_after: retry_after(response.headers()),
                    })
                }
                PollKind::Location => Ok(OperationStatus::Succeeded),
            }
        }
        .instrument(poll_span(kind)))
    }

    fn get_network_profile<'a>(
        &'a self,
        id: &'a NetworkProfileId,
    ) -> ApiFuture<'a, NetworkProfile> {
        Box::pin(
            async move { self.fetch(&self.resource_url(id), NETWORK_API_VERSION).await }
                .instrument(debug_span!("arm::get_network_profile", profile = %id.name)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use rstest::rstest;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[rstest]
    fn prefers_async_operation_header() {
        let map = headers(&[
            ("azure-asyncoperation", "https://status"),
            ("location", "https://location"),
            ("retry-after", "7"),
        ]);
        assert_eq!(
            operation_handle(StatusCode::CREATED, &map),
            OperationHandle::Pending {
                url: String::from("https://status"),
                kind: PollKind::AsyncOperation,
                retry_after: Some(Duration::from_secs(7)),
            }
        );
    }

    #[rstest]
    #[case(StatusCode::ACCEPTED, true)]
    #[case(StatusCode::OK, false)]
    fn location_only_counts_when_accepted(#[case] status: StatusCode, #[case] pending: bool) {
        let map = headers(&[("location", "https://location")]);
        let handle = operation_handle(status, &map);
        assert_eq!(handle != OperationHandle::Completed, pending);
    }

    #[rstest]
    fn failed_status_carries_service_message() {
        let body = AsyncOperationStatus {
            status: String::from("Failed"),
            error: Some(super::super::models::ErrorDetail {
                code: String::from("InaccessibleImage"),
                message: String::from("image not found"),
            }),
        };
        assert_eq!(
            operation_status(body, &HeaderMap::new()),
            OperationStatus::Failed {
                message: String::from("InaccessibleImage: image not found"),
            }
        );
    }

    #[rstest]
    #[case(PollKind::AsyncOperation)]
    #[case(PollKind::Location)]
    fn operation_polls_get_their_own_span(#[case] kind: PollKind) {
        tracing::subscriber::with_default(tracing_subscriber::registry(), || {
            let span = poll_span(kind);
            assert_eq!(
                span.metadata().map(tracing::Metadata::name),
                Some("arm::poll_operation")
            );
            assert!(
                span.metadata()
                    .is_some_and(|meta| meta.fields().field("kind").is_some())
            );
        });
    }

    #[rstest]
    fn debug_output_redacts_token() {
        let client = ArmClient::new("https://management.azure.com/", "secret-token");
        let rendered = format!("{client:?}");
        assert!(!rendered.contains("secret-token"));
        assert!(rendered.contains("https://management.azure.com\""));
    }
}
