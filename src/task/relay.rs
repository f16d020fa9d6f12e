use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::billing::ParamRatioEngine;
use crate::error::GatewayError;
use crate::providers::registry::AdaptorRegistry;
use crate::sdk::{TaskAdaptor, raw_value};
use crate::storage::StorageManager;
use crate::task::model::Task;
use crate::task::request::{TaskAction, TaskSubmitRequest};
use crate::task::state::{TaskInfo, TaskStatus};
use crate::task::store::TaskStore;

/// Accepted submission as returned to the caller.
#[derive(Clone, Debug, Serialize)]
pub struct SubmitReceipt {
    pub task_id: String,
    pub model: String,
    pub action: TaskAction,
    pub billing_ratio: f64,
}

/// Runs the submit and poll pipelines against the configured channels.
#[derive(Clone)]
pub struct TaskRelay {
    registry: AdaptorRegistry,
    store: Arc<dyn TaskStore>,
    ratios: Arc<ParamRatioEngine>,
    storage: Option<Arc<StorageManager>>,
}

impl TaskRelay {
    pub fn new(
        registry: AdaptorRegistry,
        store: Arc<dyn TaskStore>,
        ratios: Arc<ParamRatioEngine>,
        storage: Option<Arc<StorageManager>>,
    ) -> Self {
        Self {
            registry,
            store,
            ratios,
            storage,
        }
    }

    pub fn registry(&self) -> &AdaptorRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    pub fn storage(&self) -> Option<&Arc<StorageManager>> {
        self.storage.as_ref()
    }

    /// Validates, normalizes once, prices and forwards a request, then records
    /// the vendor task. Nothing is persisted unless the vendor accepted it.
    pub async fn submit(
        &self,
        mut request: TaskSubmitRequest,
        cancel: &CancellationToken,
    ) -> Result<SubmitReceipt, GatewayError> {
        let (adaptor, upstream_model) = self.registry.resolve(&request.model)?;
        request.model = upstream_model;

        let (action, params) = adaptor.validate_and_set_action(&request)?;
        let billing_ratio = self.ratios.ratio(&params.model, &params.billing_params());

        let body = adaptor.build_request_body(&params)?;
        let response = adaptor.do_request(&body, cancel).await?;
        let submitted = adaptor.parse_submit_response(response).await?;

        let channel_id = adaptor.channel().id;
        let task = Task::submitted(
            submitted.task_id,
            channel_id,
            action,
            params,
            billing_ratio,
            submitted.data,
        );
        let receipt = SubmitReceipt {
            task_id: task.task_id.clone(),
            model: task.model.clone(),
            action,
            billing_ratio,
        };
        if let Err(error) = self.store.insert(task).await {
            warn!(
                task_id = %receipt.task_id,
                channel_id,
                %error,
                "vendor returned a task id that is already tracked"
            );
            return Err(error.into());
        }

        info!(
            task_id = %receipt.task_id,
            channel_id,
            model = %receipt.model,
            action = action.as_str(),
            billing_ratio,
            "task submitted"
        );
        Ok(receipt)
    }

    /// One poll of one task. Transport and parse failures leave the stored
    /// task untouched.
    pub async fn poll(
        &self,
        channel_id: u32,
        task_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Task, GatewayError> {
        let mut task = self.store.get(channel_id, task_id).await.ok_or_else(|| {
            GatewayError::NotFound(format!("task {task_id} not found on channel {channel_id}"))
        })?;
        if task.status.is_terminal() {
            return Ok(task);
        }

        let adaptor = self.adaptor_for(&task)?;
        let body = adaptor.fetch_task(&task.task_id, cancel).await?;
        let info = adaptor.parse_task_result(&body)?;

        let previous = task.status;
        if !task.apply(info, raw_value(&body)) {
            debug!(task_id, channel_id, status = previous.as_str(), "ignored poll result");
            return Ok(task);
        }

        if task.status == TaskStatus::Success {
            self.persist_video(&mut task).await;
        }
        self.store.update(task.clone()).await?;

        if task.status != previous {
            info!(
                task_id,
                channel_id,
                from = previous.as_str(),
                to = task.status.as_str(),
                progress = task.progress,
                reason = task.fail_reason.as_deref().unwrap_or_default(),
                "task status changed"
            );
        }
        Ok(task)
    }

    /// Fails every unfinished task older than `timeout`.
    pub async fn expire(
        &self,
        now: DateTime<Utc>,
        timeout: chrono::Duration,
    ) -> Result<usize, GatewayError> {
        let mut expired = 0;
        for mut task in self.store.unfinished().await {
            if task.age(now) <= timeout {
                continue;
            }
            let data = task.data.clone();
            if task.apply(TaskInfo::failure("task timed out"), data) {
                warn!(
                    task_id = %task.task_id,
                    channel_id = task.channel_id,
                    age_secs = task.age(now).num_seconds(),
                    "task timed out"
                );
                self.store.update(task).await?;
                expired += 1;
            }
        }
        Ok(expired)
    }

    /// Canonical poll document, shaped by the owning vendor when available.
    pub async fn canonical(&self, task_id: &str) -> Result<Value, GatewayError> {
        let mut task = self.find(task_id).await?;
        self.refresh_storage_url(&mut task).await;
        match self.registry.by_channel(task.channel_id) {
            Some(adaptor) => Ok(adaptor.convert_to_canonical_output(&task)),
            None => serde_json::to_value(task.to_canonical_video())
                .map_err(|error| GatewayError::Internal(error.to_string())),
        }
    }

    /// Lookup for the public routes, which only carry a task id.
    pub async fn find(&self, task_id: &str) -> Result<Task, GatewayError> {
        self.store
            .find_by_id(task_id)
            .await
            .ok_or_else(|| GatewayError::NotFound(format!("task {task_id} not found")))
    }

    pub fn adaptor_for(&self, task: &Task) -> Result<Arc<dyn TaskAdaptor>, GatewayError> {
        self.registry.by_channel(task.channel_id).ok_or_else(|| {
            GatewayError::Internal(format!("channel {} is no longer configured", task.channel_id))
        })
    }

    /// Re-resolves the stored copy so presigned links are never stale. A copy
    /// that has disappeared from the bucket falls back to the vendor URL.
    pub async fn refresh_storage_url(&self, task: &mut Task) {
        let (Some(key), Some(storage)) = (task.storage_key.as_deref(), self.storage.as_ref()) else {
            return;
        };

        match storage.stored_url(key).await {
            Ok(Some(url)) => task.storage_url = Some(url),
            Ok(None) => {
                warn!(task_id = %task.task_id, key, "stored video is missing, using vendor url");
                task.storage_url = None;
            }
            Err(error) => {
                warn!(task_id = %task.task_id, key, %error, "failed to resolve stored video url");
            }
        }
    }

    async fn persist_video(&self, task: &mut Task) {
        let Some(storage) = self.storage.as_ref().filter(|storage| storage.auto_upload()) else {
            return;
        };
        let Some(url) = task.result_url.clone() else {
            return;
        };

        match storage.upload_video_from_url(&url, &task.task_id).await {
            Ok(stored) => {
                task.storage_key = Some(stored.key);
                task.storage_url = Some(stored.url);
            }
            Err(error) => {
                warn!(
                    task_id = %task.task_id,
                    %error,
                    "object storage upload failed, keeping vendor url"
                );
            }
        }
    }
}
