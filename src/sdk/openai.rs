use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use crate::capability::{CapabilityTable, ModelCapabilityDescriptor, ModelKind};
use crate::error::TaskError;
use crate::normalize::EffectiveParams;
use crate::providers::registry::ChannelConfig;
use crate::sdk::{
    ContentSource, SubmittedTask, TaskAdaptor, bearer, endpoint, fetch_body, parse_json,
    raw_value, read_body, rejection_message,
};
use crate::task::model::Task;
use crate::task::request::TaskAction;
use crate::task::state::{StatusTable, TaskInfo, VendorError, VendorPoll, VendorState};

const VIDEOS_PATH: &str = "/v1/videos";
const API_ERROR: &str = "openai_api_error";

const SORA_2: ModelCapabilityDescriptor = ModelCapabilityDescriptor {
    name: "sora-2",
    kind: ModelKind::TextToVideo,
    default_duration: 4,
    supported_durations: &[4, 8, 12],
    default_resolution: "720p",
    supported_resolutions: &["720p"],
    default_ratio: Some("16:9"),
    supported_ratios: &["16:9", "9:16"],
    duration_caps: &[],
    seed_range: None,
    max_reference_images: 0,
    supports_first_frame: false,
    supports_last_frame: false,
    supports_reference_images: false,
    supports_audio: false,
    supports_cfg_scale: false,
    supports_fps: false,
    passthrough_keys: &[],
};

static MODELS: &[ModelCapabilityDescriptor] = &[
    SORA_2,
    ModelCapabilityDescriptor {
        name: "sora-2-pro",
        supported_resolutions: &["720p", "1024p"],
        ..SORA_2
    },
];

pub static CAPABILITIES: CapabilityTable = CapabilityTable::new("openai", MODELS, SORA_2);

static STATUS_TABLE: StatusTable = StatusTable::new(&[
    ("queued", VendorState::Queued),
    ("in_progress", VendorState::Running),
    ("completed", VendorState::Succeeded),
    ("failed", VendorState::Failed("task failed")),
    ("cancelled", VendorState::Failed("task cancelled")),
]);

#[derive(Debug, Serialize)]
struct CreateVideoRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    seconds: String,
    size: &'static str,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct VideoError {
    code: String,
    message: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct VideoObject {
    id: String,
    status: String,
    progress: Option<u8>,
    size: Option<String>,
    seconds: Option<String>,
    error: Option<VideoError>,
}

impl VideoObject {
    fn vendor_error(&self) -> Option<VendorError> {
        self.error
            .as_ref()
            .and_then(|error| VendorError::new(error.code.clone(), error.message.clone()))
    }
}

/// Pixel size for a resolution and orientation.
fn size_for(resolution: &str, ratio: Option<&str>) -> &'static str {
    let portrait = ratio == Some("9:16");
    match (resolution, portrait) {
        ("1024p", false) => "1792x1024",
        ("1024p", true) => "1024x1792",
        (_, true) => "720x1280",
        (_, false) => "1280x720",
    }
}

/// OpenAI Sora video generation.
pub struct OpenAiVideoAdaptor {
    channel: ChannelConfig,
    client: reqwest::Client,
}

impl OpenAiVideoAdaptor {
    pub fn new(channel: ChannelConfig, client: reqwest::Client) -> Self {
        Self { channel, client }
    }

    fn content_url(&self, video_id: &str) -> String {
        endpoint(
            &self.channel.base_url,
            &format!("{VIDEOS_PATH}/{video_id}/content"),
        )
    }
}

#[async_trait]
impl TaskAdaptor for OpenAiVideoAdaptor {
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
        &[TaskAction::TextToVideo]
    }

    fn build_request_url(&self) -> String {
        endpoint(&self.channel.base_url, VIDEOS_PATH)
    }

    fn build_request_header(&self, headers: &mut HeaderMap) -> Result<(), TaskError> {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(AUTHORIZATION, bearer(&self.channel.api_key)?);
        Ok(())
    }

    fn build_request_body(&self, params: &EffectiveParams) -> Result<Value, TaskError> {
        let prompt = params.prompt.as_deref().ok_or_else(|| {
            TaskError::validation("invalid_request", "prompt is required for sora models")
        })?;
        let request = CreateVideoRequest {
            model: &params.model,
            prompt,
            seconds: params.duration.to_string(),
            size: size_for(&params.resolution, params.ratio.as_deref()),
        };
        serde_json::to_value(request)
            .map_err(|error| TaskError::parse("marshal_request_failed", error.to_string()))
    }

    async fn parse_submit_response(
        &self,
        response: reqwest::Response,
    ) -> Result<SubmittedTask, TaskError> {
        let (status, body) = read_body(response).await?;
        if !status.is_success() {
            let message = rejection_message(&body, |video: VideoObject| {
                video.vendor_error().map(|error| error.describe())
            });
            return Err(TaskError::vendor(API_ERROR, message, status));
        }

        let video = parse_json::<VideoObject>(&body)?;
        if let Some(error) = video.vendor_error() {
            return Err(TaskError::vendor(API_ERROR, error.describe(), status));
        }
        if video.id.trim().is_empty() {
            return Err(TaskError::parse(
                "invalid_response",
                format!("task_id is empty, response: {}", String::from_utf8_lossy(&body)),
            ));
        }

        Ok(SubmittedTask {
            task_id: video.id,
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
        let url = endpoint(&self.channel.base_url, &format!("{VIDEOS_PATH}/{task_id}"));
        fetch_body(self.client.get(url).headers(headers), cancel).await
    }

    fn parse_task_result(&self, body: &[u8]) -> Result<TaskInfo, TaskError> {
        let video = parse_json::<VideoObject>(body)?;
        let result_url = (!video.id.is_empty()).then(|| self.content_url(&video.id));
        STATUS_TABLE.interpret(VendorPoll {
            error: video.vendor_error(),
            status: video.status,
            result_url,
            secondary_url: None,
            progress: video.progress,
            usage: None,
        })
    }

    /// Finished videos are served through the gateway's content proxy, since
    /// the vendor URL needs the channel key.
    fn convert_to_canonical_output(&self, task: &Task) -> Value {
        let mut video = task.to_canonical_video();
        if video.url.is_some() && task.storage_url.is_none() {
            video.url = Some(format!("{VIDEOS_PATH}/{}/content", task.task_id));
        }

        let vendor = serde_json::from_value::<VideoObject>(task.data.clone()).unwrap_or_default();
        if let Some(size) = vendor.size {
            video.metadata.insert("size".to_string(), json!(size));
        }
        if let Some(seconds) = vendor.seconds {
            video.metadata.insert("seconds".to_string(), json!(seconds));
        }
        if let Some(error) = vendor.error.filter(|error| !error.message.is_empty()) {
            video.error = Some(crate::task::model::CanonicalVideoError {
                message: error.message,
                code: Some(error.code).filter(|code| !code.is_empty()),
            });
        }

        serde_json::to_value(video).unwrap_or(Value::Null)
    }

    fn content_source(&self, task: &Task) -> Option<ContentSource> {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, bearer(&self.channel.api_key).ok()?);
        Some(ContentSource {
            url: task
                .result_url
                .clone()
                .unwrap_or_else(|| self.content_url(&task.task_id)),
            headers,
        })
    }
}
