use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;

use crate::capability::{CapabilityTable, ModelCapabilityDescriptor, ModelKind};
use crate::error::TaskError;
use crate::normalize::EffectiveParams;
use crate::providers::registry::ChannelConfig;
use crate::sdk::{
    SubmittedTask, TaskAdaptor, bearer, endpoint, fetch_body, parse_json, raw_value, read_body,
    rejection_message,
};
use crate::task::model::Task;
use crate::task::request::TaskAction;
use crate::task::state::{StatusTable, TaskInfo, TaskUsage, VendorError, VendorPoll, VendorState};

const TASKS_PATH: &str = "/api/v3/contents/generations/tasks";
const API_ERROR: &str = "doubao_api_error";

const RATIOS: &[&str] = &["16:9", "9:16", "1:1"];
const WIDE_RATIOS: &[&str] = &["16:9", "9:16", "1:1", "4:3", "3:4"];
const PASSTHROUGH: &[&str] = &["watermark", "camera_fixed", "callback_url"];

const BASE: ModelCapabilityDescriptor = ModelCapabilityDescriptor {
    name: "doubao-seedance",
    kind: ModelKind::TextToVideo,
    default_duration: 5,
    supported_durations: &[5, 10],
    default_resolution: "720p",
    supported_resolutions: &["480p", "720p"],
    default_ratio: Some("16:9"),
    supported_ratios: RATIOS,
    duration_caps: &[],
    seed_range: Some((0, i32::MAX as i64)),
    max_reference_images: 0,
    supports_first_frame: false,
    supports_last_frame: false,
    supports_reference_images: false,
    supports_audio: false,
    supports_cfg_scale: true,
    supports_fps: false,
    passthrough_keys: PASSTHROUGH,
};

const SEEDANCE_1_5: ModelCapabilityDescriptor = ModelCapabilityDescriptor {
    default_resolution: "1080p",
    supported_resolutions: &["480p", "720p", "1080p"],
    supported_ratios: WIDE_RATIOS,
    supports_first_frame: true,
    supports_last_frame: true,
    supports_audio: true,
    supports_fps: true,
    ..BASE
};

static MODELS: &[ModelCapabilityDescriptor] = &[
    ModelCapabilityDescriptor {
        name: "doubao-seedance-1-0-pro-250528",
        default_resolution: "1080p",
        supported_resolutions: &["480p", "720p", "1080p"],
        supports_first_frame: true,
        supports_last_frame: true,
        ..BASE
    },
    ModelCapabilityDescriptor {
        name: "doubao-seedance-1-0-lite-t2v",
        ..BASE
    },
    ModelCapabilityDescriptor {
        name: "doubao-seedance-1-0-lite-i2v",
        kind: ModelKind::ImageToVideo,
        max_reference_images: 4,
        supports_first_frame: true,
        supports_last_frame: true,
        supports_reference_images: true,
        ..BASE
    },
    ModelCapabilityDescriptor {
        name: "doubao-seedance-1-5-pro-251215",
        ..SEEDANCE_1_5
    },
    ModelCapabilityDescriptor {
        name: "doubao-seedance-1-0-pro-fast-251015",
        supported_durations: &[5],
        supports_first_frame: true,
        supports_cfg_scale: false,
        ..BASE
    },
    ModelCapabilityDescriptor {
        name: "doubao-seedance-1-5-pro-i2v",
        kind: ModelKind::ImageToVideo,
        ..SEEDANCE_1_5
    },
    ModelCapabilityDescriptor {
        name: "doubao-seedance-1-5-pro-s2e",
        kind: ModelKind::StartEndToVideo,
        ..SEEDANCE_1_5
    },
];

pub static CAPABILITIES: CapabilityTable = CapabilityTable::new("doubao", MODELS, BASE);

static STATUS_TABLE: StatusTable = StatusTable::new(&[
    ("pending", VendorState::Queued),
    ("queued", VendorState::Queued),
    ("processing", VendorState::Running),
    ("running", VendorState::Running),
    ("succeeded", VendorState::Succeeded),
    ("completed", VendorState::Succeeded),
    ("success", VendorState::Succeeded),
    ("failed", VendorState::Failed("task failed")),
    ("error", VendorState::Failed("task failed")),
    ("cancelled", VendorState::Failed("task cancelled")),
    ("canceled", VendorState::Failed("task cancelled")),
]);

#[derive(Debug, Serialize)]
struct ContentItem<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_url: Option<ImageUrl<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
}

impl<'a> ContentItem<'a> {
    fn text(text: &'a str) -> Self {
        Self {
            kind: "text",
            text: Some(text),
            image_url: None,
            role: None,
        }
    }

    fn image(url: &'a str, role: &'static str) -> Self {
        Self {
            kind: "image_url",
            text: None,
            image_url: Some(ImageUrl { url }),
            role: Some(role),
        }
    }
}

#[derive(Debug, Serialize)]
struct ImageUrl<'a> {
    url: &'a str,
}

#[derive(Debug, Serialize)]
struct RequestPayload<'a> {
    model: &'a str,
    content: Vec<ContentItem<'a>>,
    duration: u32,
    resolution: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    ratio: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generate_audio: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cfg_scale: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fps: Option<u32>,
    #[serde(flatten)]
    extras: &'a Map<String, Value>,
}

#[derive(Debug, Default, Deserialize)]
struct ResponseError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

impl ResponseError {
    fn vendor_error(&self) -> Option<VendorError> {
        VendorError::new(self.code.clone(), self.message.clone())
    }
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    #[serde(default)]
    id: String,
    #[serde(default)]
    error: Option<ResponseError>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TaskResponse {
    status: String,
    content: TaskContent,
    error: Option<ResponseError>,
    seed: Option<i64>,
    resolution: Option<String>,
    duration: Option<u32>,
    ratio: Option<String>,
    framespersecond: Option<u32>,
    usage: Option<TaskUsage>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TaskContent {
    video_url: Option<String>,
    audio_url: Option<String>,
}

/// Volcengine Ark Seedance video tasks.
pub struct DoubaoAdaptor {
    channel: ChannelConfig,
    client: reqwest::Client,
}

impl DoubaoAdaptor {
    pub fn new(channel: ChannelConfig, client: reqwest::Client) -> Self {
        Self { channel, client }
    }
}

#[async_trait]
impl TaskAdaptor for DoubaoAdaptor {
    fn channel(&self) -> &ChannelConfig {
        &self.channel
    }

    fn http_client(&self) -> &reqwest::Client {
        &self.client
    }

    fn capabilities(&self) -> &'static CapabilityTable {
        &CAPABILITIES
    }

    fn supported_actions(&self) -> &'static [TaskAction] {
        &[
            TaskAction::TextToVideo,
            TaskAction::ImageToVideo,
            TaskAction::ReferenceToVideo,
        ]
    }

    fn build_request_url(&self) -> String {
        endpoint(&self.channel.base_url, TASKS_PATH)
    }

    fn build_request_header(&self, headers: &mut HeaderMap) -> Result<(), TaskError> {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(AUTHORIZATION, bearer(&self.channel.api_key)?);
        Ok(())
    }

    fn build_request_body(&self, params: &EffectiveParams) -> Result<Value, TaskError> {
        let mut content = Vec::new();
        if let Some(prompt) = params.prompt.as_deref() {
            content.push(ContentItem::text(prompt));
        }
        if let Some(first) = params.first_frame() {
            content.push(ContentItem::image(first, "first_frame"));
        }
        if let Some(last) = params.last_frame() {
            content.push(ContentItem::image(last, "last_frame"));
        }
        for image in params.reference_images() {
            content.push(ContentItem::image(image, "reference_image"));
        }

        let payload = RequestPayload {
            model: &params.model,
            content,
            duration: params.duration,
            resolution: &params.resolution,
            ratio: params.ratio.as_deref(),
            seed: params.seed,
            generate_audio: params.generate_audio,
            cfg_scale: params.cfg_scale,
            fps: params.fps,
            extras: &params.extras,
        };

        serde_json::to_value(payload)
            .map_err(|error| TaskError::parse("marshal_request_failed", error.to_string()))
    }

    async fn parse_submit_response(
        &self,
        response: reqwest::Response,
    ) -> Result<SubmittedTask, TaskError> {
        let (status, body) = read_body(response).await?;
        if !status.is_success() {
            let message = rejection_message(&body, |parsed: SubmitResponse| {
                parsed
                    .error
                    .as_ref()
                    .and_then(ResponseError::vendor_error)
                    .map(|error| error.describe())
            });
            return Err(TaskError::vendor(API_ERROR, message, status));
        }

        let parsed = parse_json::<SubmitResponse>(&body)?;
        if let Some(error) = parsed.error.as_ref().and_then(ResponseError::vendor_error) {
            return Err(TaskError::vendor(API_ERROR, error.describe(), status));
        }
        if parsed.id.trim().is_empty() {
            return Err(TaskError::parse(
                "invalid_response",
                format!("task_id is empty, response: {}", String::from_utf8_lossy(&body)),
            ));
        }

        Ok(SubmittedTask {
            task_id: parsed.id,
            data: raw_value(&body),
        })
    }

    async fn fetch_task(
        &self,
        task_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Bytes, TaskError> {
        let mut headers = HeaderMap::new();
        self.build_request_header(&mut headers)?;
        let url = endpoint(&self.channel.base_url, &format!("{TASKS_PATH}/{task_id}"));
        fetch_body(self.client.get(url).headers(headers), cancel).await
    }

    fn parse_task_result(&self, body: &[u8]) -> Result<TaskInfo, TaskError> {
        let task = parse_json::<TaskResponse>(body)?;
        STATUS_TABLE.interpret(VendorPoll {
            error: task.error.as_ref().and_then(ResponseError::vendor_error),
            status: task.status,
            result_url: task.content.video_url,
            secondary_url: task.content.audio_url,
            progress: None,
            usage: task.usage,
        })
    }

    fn convert_to_canonical_output(&self, task: &Task) -> Value {
        let mut video = task.to_canonical_video();
        let vendor = serde_json::from_value::<TaskResponse>(task.data.clone()).unwrap_or_default();

        if let Some(error) = vendor.error.as_ref().and_then(ResponseError::vendor_error) {
            video.error = Some(crate::task::model::CanonicalVideoError {
                message: error.message,
                code: Some(error.code).filter(|code| !code.is_empty()),
            });
        }
        if let Some(resolution) = vendor.resolution.filter(|value| !value.is_empty()) {
            video.metadata.insert("resolution".to_string(), json!(resolution));
        }
        if let Some(duration) = vendor.duration.filter(|value| *value > 0) {
            video.metadata.insert("duration".to_string(), json!(duration));
        }
        if let Some(ratio) = vendor.ratio.filter(|value| !value.is_empty()) {
            video.metadata.insert("ratio".to_string(), json!(ratio));
        }
        if let Some(fps) = vendor.framespersecond.filter(|value| *value > 0) {
            video.metadata.insert("fps".to_string(), json!(fps));
        }
        if let Some(seed) = vendor.seed.filter(|value| *value > 0) {
            video.metadata.insert("seed".to_string(), json!(seed));
        }
        if let Some(audio_url) = vendor.content.audio_url.filter(|value| !value.is_empty()) {
            video.metadata.insert("audio_url".to_string(), json!(audio_url));
        }

        serde_json::to_value(video).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use reqwest::StatusCode;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::error::TaskErrorKind;
    use crate::providers::registry::ChannelType;
    use crate::task::request::TaskSubmitRequest;
    use crate::task::state::TaskStatus;

    fn adaptor(base_url: &str) -> DoubaoAdaptor {
        DoubaoAdaptor::new(
            ChannelConfig::new(1, ChannelType::Doubao, base_url, "ark-key"),
            reqwest::Client::new(),
        )
    }

    #[test]
    fn lite_t2v_rounds_unsupported_duration_to_default() {
        let adaptor = adaptor("https://ark.example");
        let mut request = TaskSubmitRequest::new("doubao-seedance-1-0-lite-t2v", "a koi pond");
        request.duration = Some(7);
        assert_eq!(adaptor.normalize(&request).duration, 5);
    }

    #[test]
    fn body_uses_content_array_with_frame_roles() {
        let adaptor = adaptor("https://ark.example");
        let mut request = TaskSubmitRequest::new("doubao-seedance-1-0-pro-250528", "sunrise");
        request.size = Some("1920x1080".to_string());
        request.first_frame = Some("https://img/first.png".to_string());
        request.last_frame = Some("https://img/last.png".to_string());
        request.images = vec!["https://img/ref.png".to_string()];
        request.metadata.insert("watermark".to_string(), json!(false));

        let params = adaptor.normalize(&request);
        let body = adaptor.build_request_body(&params).expect("body");
        assert_eq!(
            body,
            json!({
                "model": "doubao-seedance-1-0-pro-250528",
                "content": [
                    {"type": "text", "text": "sunrise"},
                    {
                        "type": "image_url",
                        "image_url": {"url": "https://img/first.png"},
                        "role": "first_frame"
                    },
                    {
                        "type": "image_url",
                        "image_url": {"url": "https://img/last.png"},
                        "role": "last_frame"
                    }
                ],
                "duration": 5,
                "resolution": "1080p",
                "ratio": "16:9",
                "watermark": false
            })
        );
    }

    #[test]
    fn lite_i2v_sends_reference_images() {
        let adaptor = adaptor("https://ark.example");
        let mut request = TaskSubmitRequest::new("doubao-seedance-1-0-lite-i2v", "");
        request.images = (0..6).map(|index| format!("https://img/{index}.png")).collect();

        assert_eq!(
            adaptor
                .validate_and_set_action(&request)
                .map(|(action, _)| action)
                .ok(),
            Some(TaskAction::ReferenceToVideo)
        );
        let body = adaptor
            .build_request_body(&adaptor.normalize(&request))
            .expect("body");
        let content = body["content"].as_array().cloned().unwrap_or_default();
        assert_eq!(content.len(), 4);
        assert!(content.iter().all(|item| item["role"] == "reference_image"));
    }

    #[tokio::test]
    async fn submit_returns_vendor_task_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v3/contents/generations/tasks"))
            .and(header("authorization", "Bearer ark-key"))
            .and(body_partial_json(json!({"model": "doubao-seedance-1-0-lite-t2v"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "cgt-2025"})))
            .expect(1)
            .mount(&server)
            .await;

        let adaptor = adaptor(&server.uri());
        let request = TaskSubmitRequest::new("doubao-seedance-1-0-lite-t2v", "a koi pond");
        let body = adaptor
            .build_request_body(&adaptor.normalize(&request))
            .expect("body");
        let response = adaptor
            .do_request(&body, &CancellationToken::new())
            .await
            .expect("response");
        let submitted = adaptor.parse_submit_response(response).await.expect("task id");
        assert_eq!(submitted.task_id, "cgt-2025");
    }

    #[tokio::test]
    async fn submit_surfaces_embedded_errors_and_empty_ids() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bad"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "error": {"code": "InvalidParameter", "message": "ratio is invalid"}
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/empty"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": ""})))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let adaptor = adaptor(&server.uri());

        let response = client.post(format!("{}/bad", server.uri())).send().await.expect("send");
        let error = adaptor.parse_submit_response(response).await.expect_err("vendor error");
        assert_eq!(error.kind, TaskErrorKind::Vendor);
        assert_eq!(error.code, "doubao_api_error");
        assert_eq!(error.message, "[InvalidParameter] ratio is invalid");
        assert_eq!(error.status, StatusCode::BAD_GATEWAY);

        let response = client.post(format!("{}/empty", server.uri())).send().await.expect("send");
        let error = adaptor.parse_submit_response(response).await.expect_err("empty id");
        assert_eq!(error.code, "invalid_response");
    }

    #[tokio::test]
    async fn non_json_rejections_keep_the_upstream_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/down"))
            .respond_with(ResponseTemplate::new(503).set_body_string("upstream unavailable"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/limited"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "error": {"code": "RateLimitExceeded", "message": "slow down"}
            })))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let adaptor = adaptor(&server.uri());

        let response = client.post(format!("{}/down", server.uri())).send().await.expect("send");
        let error = adaptor.parse_submit_response(response).await.expect_err("503");
        assert_eq!(error.kind, TaskErrorKind::Vendor);
        assert_eq!(error.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(error.message, "upstream unavailable");

        let response = client.post(format!("{}/limited", server.uri())).send().await.expect("send");
        let error = adaptor.parse_submit_response(response).await.expect_err("429");
        assert_eq!(error.status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(error.message, "[RateLimitExceeded] slow down");
    }

    #[test]
    fn parses_task_results() {
        let adaptor = adaptor("https://ark.example");

        let info = adaptor
            .parse_task_result(
                br#"{"status":"succeeded","content":{"video_url":"https://cdn/v.mp4","audio_url":"https://cdn/a.mp3"},"usage":{"completion_tokens":108900,"total_tokens":108900}}"#,
            )
            .expect("success");
        assert_eq!(info.status, TaskStatus::Success);
        assert_eq!(info.url.as_deref(), Some("https://cdn/v.mp4"));
        assert_eq!(info.secondary_url.as_deref(), Some("https://cdn/a.mp3"));
        assert_eq!(info.usage.map(|usage| usage.completion_tokens), Some(108900));

        let info = adaptor
            .parse_task_result(
                br#"{"status":"succeeded","error":{"code":"Sensitive","message":"blocked"}}"#,
            )
            .expect("failure");
        assert_eq!(info.status, TaskStatus::Failure);
        assert_eq!(info.reason.as_deref(), Some("[Sensitive] blocked"));

        let info = adaptor.parse_task_result(br#"{"status":"cancelled"}"#).expect("cancelled");
        assert_eq!(info.status, TaskStatus::Failure);
        assert_eq!(info.reason.as_deref(), Some("task cancelled"));

        let info = adaptor.parse_task_result(br#"{"status":"pending"}"#).expect("queued");
        assert_eq!((info.status, info.progress), (TaskStatus::Queued, 10));

        assert!(adaptor.parse_task_result(b"not json").is_err());
    }

    #[tokio::test]
    async fn fetch_task_reads_status_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3/contents/generations/tasks/cgt-9"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "running"})))
            .mount(&server)
            .await;

        let adaptor = adaptor(&server.uri());
        let body = adaptor
            .fetch_task("cgt-9", &CancellationToken::new())
            .await
            .expect("body");
        let info = adaptor.parse_task_result(&body).expect("info");
        assert_eq!((info.status, info.progress), (TaskStatus::InProgress, 50));
    }

    #[test]
    fn canonical_output_carries_vendor_metadata() {
        let adaptor = adaptor("https://ark.example");
        let mut task = crate::task::model::tests::sample_task("cgt-7");
        let data = json!({
            "status": "succeeded",
            "content": {"video_url": "https://cdn/v.mp4", "audio_url": "https://cdn/a.mp3"},
            "resolution": "720p",
            "duration": 5,
            "framespersecond": 24,
            "seed": 42
        });
        let info = adaptor
            .parse_task_result(data.to_string().as_bytes())
            .expect("info");
        task.apply(info, data);

        let output = adaptor.convert_to_canonical_output(&task);
        assert_eq!(output["status"], "completed");
        assert_eq!(output["url"], "https://cdn/v.mp4");
        assert_eq!(output["metadata"]["fps"], 24);
        assert_eq!(output["metadata"]["seed"], 42);
        assert_eq!(output["metadata"]["audio_url"], "https://cdn/a.mp3");
    }
}
