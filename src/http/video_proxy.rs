use std::io;

use async_stream::try_stream;
use axum::Json;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header::{
    CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE, ETAG, LAST_MODIFIED,
    LOCATION,
};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::error::GatewayError;
use crate::http::state::AppState;
use crate::sdk::retry::send_with_retry;
use crate::task::state::TaskStatus;

const CACHE_FOR_A_DAY: &str = "public, max-age=86400";

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Upstream(String),
    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request_error"),
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "invalid_request_error"),
            Self::Upstream(_) => (StatusCode::BAD_GATEWAY, "server_error"),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "server_error"),
        };

        (
            status,
            Json(json!({
                "error": {
                    "message": self.to_string(),
                    "type": error_type,
                }
            })),
        )
            .into_response()
    }
}

/// Serves the finished video of a task. Stored copies behind a public domain
/// are redirected to; everything else is streamed through the gateway.
pub async fn video_content(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Response, ProxyError> {
    if task_id.trim().is_empty() {
        return Err(ProxyError::BadRequest("task_id is required".to_string()));
    }

    let mut task = state.relay.find(&task_id).await.map_err(|error| match error {
        GatewayError::NotFound(_) => ProxyError::NotFound("Task not found".to_string()),
        other => {
            error!(%task_id, error = %other, "video proxy task lookup failed");
            ProxyError::Internal("Failed to load task".to_string())
        }
    })?;

    if task.status != TaskStatus::Success {
        return Err(ProxyError::BadRequest(format!(
            "Task is not completed yet, current status: {}",
            task.status.as_str()
        )));
    }

    let adaptor = state.relay.adaptor_for(&task).map_err(|error| {
        error!(%task_id, %error, "video proxy has no channel for task");
        ProxyError::Internal("Failed to retrieve channel information".to_string())
    })?;

    let redirect_to_storage = state
        .relay
        .storage()
        .is_some_and(|storage| storage.redirect_domain().is_some());

    state.relay.refresh_storage_url(&mut task).await;
    let (url, headers) = match task.storage_url.as_deref() {
        Some(stored) if redirect_to_storage => return redirect(stored),
        Some(stored) => {
            debug!(%task_id, url = stored, "serving video from object storage");
            (stored.to_string(), HeaderMap::new())
        }
        None => {
            let source = adaptor
                .content_source(&task)
                .ok_or_else(|| ProxyError::Internal("Task has no video url".to_string()))?;
            (source.url, source.headers)
        }
    };

    let client = adaptor.http_client();
    let response = send_with_retry(
        || client.get(&url).headers(headers.clone()),
        state.retry_policy,
    )
    .await
    .map_err(|error| {
        error!(%task_id, %url, %error, "failed to fetch video content");
        ProxyError::Upstream("Failed to fetch video content".to_string())
    })?;

    let status = response.status();
    if status != StatusCode::OK {
        error!(%task_id, %url, %status, "video upstream returned an error");
        return Err(ProxyError::Upstream(format!(
            "Upstream service returned status {}",
            status.as_u16()
        )));
    }

    let mut forwarded = HeaderMap::new();
    for name in [CONTENT_TYPE, CONTENT_LENGTH, CONTENT_DISPOSITION, ETAG, LAST_MODIFIED] {
        if let Some(value) = response.headers().get(&name) {
            forwarded.insert(name, value.clone());
        }
    }
    forwarded.insert(CACHE_CONTROL, HeaderValue::from_static(CACHE_FOR_A_DAY));

    let mut proxied = Response::new(Body::from_stream(relay_body(task_id, response)));
    *proxied.headers_mut() = forwarded;
    Ok(proxied)
}

fn redirect(url: &str) -> Result<Response, ProxyError> {
    let location = HeaderValue::from_str(url)
        .map_err(|_| ProxyError::Internal("Stored video url is not a valid header".to_string()))?;

    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::FOUND;
    response.headers_mut().insert(LOCATION, location);
    Ok(response)
}

fn relay_body(
    task_id: String,
    response: reqwest::Response,
) -> impl Stream<Item = Result<Bytes, io::Error>> + Send + 'static {
    try_stream! {
        let upstream = response.bytes_stream();
        futures_util::pin_mut!(upstream);

        while let Some(chunk) = upstream.next().await {
            let chunk = chunk.map_err(|error| {
                warn!(%task_id, %error, "video stream interrupted");
                io::Error::other(error)
            })?;
            yield chunk;
        }
    }
}
