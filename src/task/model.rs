use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::normalize::EffectiveParams;
use crate::task::request::TaskAction;
use crate::task::state::{TaskInfo, TaskStatus, TaskUsage};

/// Persisted record of one submitted generation job.
#[derive(Clone, Debug, Serialize)]
pub struct Task {
    pub task_id: String,
    pub channel_id: u32,
    pub action: TaskAction,
    pub model: String,
    pub status: TaskStatus,
    pub progress: u8,
    pub params: EffectiveParams,
    pub billing_ratio: f64,
    /// Last raw vendor response body.
    pub data: Value,
    pub result_url: Option<String>,
    pub secondary_url: Option<String>,
    /// Object key of the stored copy; the URL is re-resolved from it.
    pub storage_key: Option<String>,
    pub storage_url: Option<String>,
    pub fail_reason: Option<String>,
    pub usage: Option<TaskUsage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn submitted(
        task_id: String,
        channel_id: u32,
        action: TaskAction,
        params: EffectiveParams,
        billing_ratio: f64,
        data: Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            task_id,
            channel_id,
            action,
            model: params.model.clone(),
            status: TaskStatus::Queued,
            progress: 0,
            params,
            billing_ratio,
            data,
            result_url: None,
            secondary_url: None,
            storage_key: None,
            storage_url: None,
            fail_reason: None,
            usage: None,
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    /// Applies a poll outcome. Returns `false` and leaves the task untouched
    /// when the transition is not allowed, including every update to a
    /// terminal task.
    pub fn apply(&mut self, info: TaskInfo, data: Value) -> bool {
        if !self.status.can_transition_to(info.status) {
            return false;
        }

        let now = Utc::now();
        self.status = info.status;
        self.progress = if info.status.is_terminal() {
            info.progress
        } else {
            self.progress.max(info.progress)
        };
        self.data = data;
        if info.url.is_some() {
            self.result_url = info.url;
        }
        if info.secondary_url.is_some() {
            self.secondary_url = info.secondary_url;
        }
        if info.reason.is_some() {
            self.fail_reason = info.reason;
        }
        if info.usage.is_some() {
            self.usage = info.usage;
        }
        self.updated_at = now;
        if self.status.is_terminal() {
            self.finished_at = Some(now);
        }
        true
    }

    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.created_at
    }

    /// Storage copy first, vendor URL otherwise.
    pub fn delivery_url(&self) -> Option<&str> {
        self.storage_url.as_deref().or(self.result_url.as_deref())
    }

    pub fn to_canonical_video(&self) -> CanonicalVideo {
        let status = match self.status {
            TaskStatus::Queued => "queued",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Success => "completed",
            TaskStatus::Failure => "failed",
        };

        let error = match (self.status, &self.fail_reason) {
            (TaskStatus::Failure, Some(reason)) => Some(CanonicalVideoError {
                message: reason.clone(),
                code: None,
            }),
            _ => None,
        };

        let mut metadata = Map::new();
        metadata.insert("action".to_string(), json!(self.action.as_str()));
        metadata.insert("resolution".to_string(), json!(self.params.resolution));
        metadata.insert("duration".to_string(), json!(self.params.duration));
        if let Some(ratio) = &self.params.ratio {
            metadata.insert("ratio".to_string(), json!(ratio));
        }
        if let Some(seed) = self.params.seed {
            metadata.insert("seed".to_string(), json!(seed));
        }
        if let Some(fps) = self.params.fps {
            metadata.insert("fps".to_string(), json!(fps));
        }
        if let Some(secondary_url) = &self.secondary_url {
            metadata.insert("audio_url".to_string(), json!(secondary_url));
        }

        CanonicalVideo {
            id: self.task_id.clone(),
            object: "video",
            model: self.model.clone(),
            status,
            progress: self.progress,
            created_at: self.created_at.timestamp(),
            completed_at: self.finished_at.map(|finished| finished.timestamp()),
            url: match self.status {
                TaskStatus::Success => self.delivery_url().map(str::to_string),
                _ => None,
            },
            error,
            usage: self.usage,
            metadata,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct CanonicalVideo {
    pub id: String,
    pub object: &'static str,
    pub model: String,
    pub status: &'static str,
    pub progress: u8,
    pub created_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<CanonicalVideoError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TaskUsage>,
    pub metadata: Map<String, Value>,
}

#[derive(Clone, Debug, Serialize)]
pub struct CanonicalVideoError {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}
