use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;
use tracing::debug;

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
use crate::task::state::{StatusTable, TaskInfo, VendorError, VendorPoll, VendorState};

const SUBMIT_PATH: &str = "/v1/video_generation";
const QUERY_PATH: &str = "/v1/query/video_generation";
const RETRIEVE_PATH: &str = "/v1/files/retrieve";
const API_ERROR: &str = "hailuo_api_error";

const PASSTHROUGH: &[&str] = &[
    "prompt_optimizer",
    "fast_pretreatment",
    "callback_url",
    "aigc_watermark",
];

const BASE: ModelCapabilityDescriptor = ModelCapabilityDescriptor {
    name: "hailuo",
    kind: ModelKind::TextToVideo,
    default_duration: 6,
    supported_durations: &[6],
    default_resolution: "720P",
    supported_resolutions: &["720P"],
    default_ratio: None,
    supported_ratios: &[],
    duration_caps: &[],
    seed_range: None,
    max_reference_images: 0,
    supports_first_frame: false,
    supports_last_frame: false,
    supports_reference_images: false,
    supports_audio: false,
    supports_cfg_scale: false,
    supports_fps: false,
    passthrough_keys: PASSTHROUGH,
};

const HAILUO_2: ModelCapabilityDescriptor = ModelCapabilityDescriptor {
    default_resolution: "768P",
    supported_resolutions: &["768P", "1080P"],
    supported_durations: &[6, 10],
    duration_caps: &[("1080P", 6)],
    supports_first_frame: true,
    ..BASE
};

const I2V_01: ModelCapabilityDescriptor = ModelCapabilityDescriptor {
    kind: ModelKind::ImageToVideo,
    supported_resolutions: &["720P", "1080P"],
    supports_first_frame: true,
    ..BASE
};

static MODELS: &[ModelCapabilityDescriptor] = &[
    ModelCapabilityDescriptor {
        name: "MiniMax-Hailuo-2.3",
        ..HAILUO_2
    },
    ModelCapabilityDescriptor {
        name: "MiniMax-Hailuo-2.3-Fast",
        kind: ModelKind::ImageToVideo,
        ..HAILUO_2
    },
    ModelCapabilityDescriptor {
        name: "MiniMax-Hailuo-02",
        kind: ModelKind::StartEndToVideo,
        supports_last_frame: true,
        ..HAILUO_2
    },
    ModelCapabilityDescriptor {
        name: "T2V-01-Director",
        supported_resolutions: &["720P", "1080P"],
        ..BASE
    },
    ModelCapabilityDescriptor {
        name: "T2V-01",
        ..BASE
    },
    ModelCapabilityDescriptor {
        name: "I2V-01-Director",
        ..I2V_01
    },
    ModelCapabilityDescriptor {
        name: "I2V-01-live",
        ..I2V_01
    },
    ModelCapabilityDescriptor {
        name: "I2V-01",
        ..I2V_01
    },
    ModelCapabilityDescriptor {
        name: "S2V-01",
        kind: ModelKind::SubjectToVideo,
        supports_reference_images: true,
        max_reference_images: 1,
        ..BASE
    },
];

pub static CAPABILITIES: CapabilityTable = CapabilityTable::new("hailuo", MODELS, BASE);

static STATUS_TABLE: StatusTable = StatusTable::new(&[
    ("Preparing", VendorState::Queued),
    ("Queueing", VendorState::Queued),
    ("Processing", VendorState::Running),
    ("Success", VendorState::Succeeded),
    ("Fail", VendorState::Failed("task failed")),
]);

#[derive(Debug, Serialize)]
struct SubjectReference<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    image: Vec<&'a str>,
}

#[derive(Debug, Serialize)]
struct VideoRequest<'a> {
    model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    prompt: Option<&'a str>,
    duration: u32,
    resolution: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    first_frame_image: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_frame_image: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    subject_reference: Vec<SubjectReference<'a>>,
    #[serde(flatten)]
    extras: &'a Map<String, Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BaseResp {
    status_code: i64,
    status_msg: String,
}

impl BaseResp {
    fn vendor_error(&self) -> Option<VendorError> {
        if self.status_code == 0 {
            return None;
        }
        let message = if self.status_msg.is_empty() {
            "request rejected".to_string()
        } else {
            self.status_msg.clone()
        };
        VendorError::new(self.status_code.to_string(), message)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct VideoResponse {
    task_id: String,
    base_resp: BaseResp,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct QueryTaskResponse {
    status: String,
    file_id: String,
    video_width: u32,
    video_height: u32,
    /// Merged in from the file retrieval endpoint once the task succeeded.
    video_url: Option<String>,
    base_resp: BaseResp,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RetrieveFileResponse {
    file: FileObject,
    base_resp: BaseResp,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileObject {
    download_url: String,
}

/// MiniMax Hailuo video generation.
pub struct HailuoAdaptor {
    channel: ChannelConfig,
    client: reqwest::Client,
}

impl HailuoAdaptor {
    pub fn new(channel: ChannelConfig, client: reqwest::Client) -> Self {
        Self { channel, client }
    }

    async fn retrieve_download_url(
        &self,
        file_id: &str,
        headers: HeaderMap,
        cancel: &CancellationToken,
    ) -> Result<String, TaskError> {
        let url = endpoint(&self.channel.base_url, RETRIEVE_PATH);
        let request = self
            .client
            .get(url)
            .query(&[("file_id", file_id)])
            .headers(headers);
        let body = fetch_body(request, cancel).await?;
        let retrieved = parse_json::<RetrieveFileResponse>(&body)?;

        if let Some(error) = retrieved.base_resp.vendor_error() {
            return Err(TaskError::vendor(
                API_ERROR,
                error.describe(),
                reqwest::StatusCode::BAD_GATEWAY,
            ));
        }
        if retrieved.file.download_url.is_empty() {
            return Err(TaskError::parse(
                "invalid_response",
                format!("file {file_id} has no download_url"),
            ));
        }
        Ok(retrieved.file.download_url)
    }
}

#[async_trait]
impl TaskAdaptor for HailuoAdaptor {
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
        endpoint(&self.channel.base_url, SUBMIT_PATH)
    }

    fn build_request_header(&self, headers: &mut HeaderMap) -> Result<(), TaskError> {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(AUTHORIZATION, bearer(&self.channel.api_key)?);
        Ok(())
    }

    fn build_request_body(&self, params: &EffectiveParams) -> Result<Value, TaskError> {
        let subject_reference = if params.reference_images().is_empty() {
            Vec::new()
        } else {
            vec![SubjectReference {
                kind: "character",
                image: params.reference_images().iter().map(String::as_str).collect(),
            }]
        };

        let request = VideoRequest {
            model: &params.model,
            prompt: params.prompt.as_deref(),
            duration: params.duration,
            resolution: &params.resolution,
            first_frame_image: params.first_frame(),
            last_frame_image: params.last_frame(),
            subject_reference,
            extras: &params.extras,
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
            let message = rejection_message(&body, |parsed: VideoResponse| {
                parsed.base_resp.vendor_error().map(|error| error.describe())
            });
            return Err(TaskError::vendor(API_ERROR, message, status));
        }

        let parsed = parse_json::<VideoResponse>(&body)?;
        if let Some(error) = parsed.base_resp.vendor_error() {
            return Err(TaskError::vendor(API_ERROR, error.describe(), status));
        }
        if parsed.task_id.trim().is_empty() {
            return Err(TaskError::parse(
                "invalid_response",
                format!("task_id is empty, response: {}", String::from_utf8_lossy(&body)),
            ));
        }

        Ok(SubmittedTask {
            task_id: parsed.task_id,
            data: raw_value(&body),
        })
    }

    /// Queries the task and, once it succeeded, resolves its file id to a
    /// download URL that is merged into the returned body.
    async fn fetch_task(
        &self,
        task_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Bytes, TaskError> {
        let mut headers = HeaderMap::new();
        self.build_request_header(&mut headers)?;

        let request = self
            .client
            .get(endpoint(&self.channel.base_url, QUERY_PATH))
            .query(&[("task_id", task_id)])
            .headers(headers.clone());
        let body = fetch_body(request, cancel).await?;

        let Ok(query) = serde_json::from_slice::<QueryTaskResponse>(&body) else {
            return Ok(body);
        };
        let succeeded = STATUS_TABLE.lookup(&query.status) == Some(VendorState::Succeeded);
        if !succeeded || query.file_id.is_empty() || query.base_resp.vendor_error().is_some() {
            return Ok(body);
        }

        let download_url = self
            .retrieve_download_url(&query.file_id, headers, cancel)
            .await?;
        debug!(task_id, file_id = %query.file_id, "resolved hailuo download url");

        let mut merged = serde_json::from_slice::<Value>(&body).unwrap_or_else(|_| json!({}));
        if let Some(object) = merged.as_object_mut() {
            object.insert("video_url".to_string(), Value::String(download_url));
        }
        serde_json::to_vec(&merged)
            .map(Bytes::from)
            .map_err(|error| TaskError::parse("marshal_task_failed", error.to_string()))
    }

    fn parse_task_result(&self, body: &[u8]) -> Result<TaskInfo, TaskError> {
        let query = parse_json::<QueryTaskResponse>(body)?;
        STATUS_TABLE.interpret(VendorPoll {
            error: query.base_resp.vendor_error(),
            status: query.status,
            result_url: query.video_url,
            secondary_url: None,
            progress: None,
            usage: None,
        })
    }

    fn convert_to_canonical_output(&self, task: &Task) -> Value {
        let mut video = task.to_canonical_video();
        let vendor =
            serde_json::from_value::<QueryTaskResponse>(task.data.clone()).unwrap_or_default();

        if vendor.video_width > 0 && vendor.video_height > 0 {
            video
                .metadata
                .insert("video_width".to_string(), json!(vendor.video_width));
            video
                .metadata
                .insert("video_height".to_string(), json!(vendor.video_height));
        }
        if !vendor.file_id.is_empty() {
            video.metadata.insert("file_id".to_string(), json!(vendor.file_id));
        }

        serde_json::to_value(video).unwrap_or(Value::Null)
    }
}
