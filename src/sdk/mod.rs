pub mod doubao;
pub mod hailuo;
pub mod http_client;
pub mod openai;
pub mod retry;

use std::future::Future;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::capability::CapabilityTable;
use crate::error::TaskError;
use crate::normalize::{self, EffectiveParams};
use crate::providers::registry::ChannelConfig;
use crate::task::model::Task;
use crate::task::request::{
    TaskAction, TaskSubmitRequest, validate_basic_request, validate_effective_params,
};
use crate::task::state::TaskInfo;

/// Vendor task id and the raw body of an accepted submission.
#[derive(Clone, Debug)]
pub struct SubmittedTask {
    pub task_id: String,
    pub data: Value,
}

/// Where the finished asset can be downloaded from.
#[derive(Clone, Debug)]
pub struct ContentSource {
    pub url: String,
    pub headers: HeaderMap,
}

/// Per-vendor submit/poll contract. One instance is bound to one channel.
#[async_trait]
pub trait TaskAdaptor: Send + Sync {
    fn channel(&self) -> &ChannelConfig;

    fn http_client(&self) -> &reqwest::Client;

    fn capabilities(&self) -> &'static CapabilityTable;

    fn supported_actions(&self) -> &'static [TaskAction];

    /// Rejects malformed or unsupported submissions before any network call.
    /// The stored action is the one implied by the normalized parameters, so
    /// images the model cannot take never count as image input.
    fn validate_and_set_action(
        &self,
        request: &TaskSubmitRequest,
    ) -> Result<(TaskAction, EffectiveParams), TaskError> {
        let requested = validate_basic_request(request)?;
        if !self.supported_actions().contains(&requested) {
            return Err(TaskError::validation(
                "unsupported_action",
                format!(
                    "{} does not support {}",
                    self.capabilities().vendor(),
                    requested.as_str()
                ),
            ));
        }

        let params = self.normalize(request);
        let action = validate_effective_params(&params)?;
        Ok((action, params))
    }

    fn normalize(&self, request: &TaskSubmitRequest) -> EffectiveParams {
        let descriptor = self.capabilities().descriptor(&request.model);
        normalize::normalize(request, &descriptor)
    }

    fn build_request_url(&self) -> String;

    fn build_request_header(&self, headers: &mut HeaderMap) -> Result<(), TaskError>;

    fn build_request_body(&self, params: &EffectiveParams) -> Result<Value, TaskError>;

    async fn do_request(
        &self,
        body: &Value,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Response, TaskError> {
        do_task_request(self, body, cancel).await
    }

    async fn parse_submit_response(
        &self,
        response: reqwest::Response,
    ) -> Result<SubmittedTask, TaskError>;

    /// One stateless status lookup. Never retried here.
    async fn fetch_task(&self, task_id: &str, cancel: &CancellationToken)
    -> Result<Bytes, TaskError>;

    fn parse_task_result(&self, body: &[u8]) -> Result<TaskInfo, TaskError>;

    fn convert_to_canonical_output(&self, task: &Task) -> Value {
        serde_json::to_value(task.to_canonical_video()).unwrap_or(Value::Null)
    }

    fn content_source(&self, task: &Task) -> Option<ContentSource> {
        task.result_url.as_ref().map(|url| ContentSource {
            url: url.clone(),
            headers: HeaderMap::new(),
        })
    }
}

/// Shared submission path: headers from the adaptor, JSON body, one attempt.
pub async fn do_task_request<A>(
    adaptor: &A,
    body: &Value,
    cancel: &CancellationToken,
) -> Result<reqwest::Response, TaskError>
where
    A: TaskAdaptor + ?Sized,
{
    let mut headers = HeaderMap::new();
    adaptor.build_request_header(&mut headers)?;
    let request = adaptor
        .http_client()
        .post(adaptor.build_request_url())
        .headers(headers)
        .json(body);

    with_cancellation(cancel, async move { request.send().await.map_err(TaskError::from) }).await
}

/// Sends a poll request and returns the body. Throttling and upstream 5xx are
/// transport errors so the task is simply polled again later.
pub async fn fetch_body(
    request: reqwest::RequestBuilder,
    cancel: &CancellationToken,
) -> Result<Bytes, TaskError> {
    with_cancellation(cancel, async move {
        let response = request.send().await?;
        let (status, body) = read_body(response).await?;
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(TaskError::transport(
                "fetch_task_failed",
                format!("upstream returned {status}"),
            ));
        }
        Ok(body)
    })
    .await
}

pub async fn with_cancellation<F, T>(cancel: &CancellationToken, future: F) -> Result<T, TaskError>
where
    F: Future<Output = Result<T, TaskError>>,
{
    tokio::select! {
        _ = cancel.cancelled() => Err(TaskError::transport(
            "request_cancelled",
            "request was cancelled before the upstream answered",
        )),
        result = future => result,
    }
}

pub async fn read_body(response: reqwest::Response) -> Result<(StatusCode, Bytes), TaskError> {
    let status = response.status();
    let body = response.bytes().await.map_err(|error| {
        TaskError::transport("read_response_body_failed", error.to_string())
    })?;
    Ok((status, body))
}

pub fn parse_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, TaskError> {
    serde_json::from_slice(body).map_err(|error| {
        TaskError::parse(
            "unmarshal_response_body_failed",
            format!("{error}; body: {}", String::from_utf8_lossy(body)),
        )
    })
}

/// Message for a non-2xx submit answer: the vendor's structured error when
/// the body carries one, the raw text otherwise.
pub fn rejection_message<T, F>(body: &[u8], describe: F) -> String
where
    T: DeserializeOwned,
    F: FnOnce(T) -> Option<String>,
{
    serde_json::from_slice::<T>(body)
        .ok()
        .and_then(describe)
        .unwrap_or_else(|| String::from_utf8_lossy(body).into_owned())
}

/// Raw body kept on the task; non-JSON bodies are stored as text.
pub fn raw_value(body: &[u8]) -> Value {
    serde_json::from_slice(body)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned()))
}

pub fn bearer(api_key: &SecretString) -> Result<HeaderValue, TaskError> {
    let mut value = HeaderValue::from_str(&format!("Bearer {}", api_key.expose_secret()))
        .map_err(|_| {
            TaskError::validation("invalid_channel_key", "channel API key is not a valid header")
        })?;
    value.set_sensitive(true);
    Ok(value)
}

pub fn endpoint(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
