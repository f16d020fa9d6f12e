use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use serde_json::{Value, json};

use crate::auth::authorize;
use crate::billing::ParamRatioConfig;
use crate::error::GatewayError;
use crate::http::state::AppState;
use crate::task::request::TaskSubmitRequest;

pub async fn root() -> Json<Value> {
    Json(json!({
        "name": "task-gateway",
        "status": "ok"
    }))
}

pub async fn healthz() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn submit_video(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<TaskSubmitRequest>, JsonRejection>,
) -> Result<Json<Value>, GatewayError> {
    authorize(&state.gateway_api_keys, &headers)?;
    let Json(request) =
        payload.map_err(|_| GatewayError::BadRequest("Invalid JSON request body".to_string()))?;

    let cancel = state.shutdown.child_token();
    let receipt = state.relay.submit(request, &cancel).await?;

    Ok(Json(json!({ "task_id": receipt.task_id })))
}

pub async fn fetch_video(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(task_id): Path<String>,
) -> Result<Json<Value>, GatewayError> {
    authorize(&state.gateway_api_keys, &headers)?;
    let video = state.relay.canonical(&task_id).await?;
    Ok(Json(video))
}

/// Models served by the configured channels.
pub async fn list_models(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, GatewayError> {
    authorize(&state.gateway_api_keys, &headers)?;

    let mut data = Vec::new();
    for adaptor in state.relay.registry().all() {
        let table = adaptor.capabilities();
        for model in table.models() {
            let descriptor = table.descriptor(model);
            data.push(json!({
                "id": model,
                "object": "model",
                "owned_by": table.vendor(),
                "kind": descriptor.kind,
                "durations": descriptor.supported_durations,
                "default_duration": descriptor.default_duration,
                "resolutions": descriptor.supported_resolutions,
                "default_resolution": descriptor.default_resolution,
                "ratios": descriptor.supported_ratios,
                "supports_first_frame": descriptor.supports_first_frame,
                "supports_last_frame": descriptor.supports_last_frame,
                "max_reference_images": descriptor.max_reference_images,
                "supports_audio": descriptor.supports_audio,
            }));
        }
    }

    Ok(Json(json!({
        "object": "list",
        "data": data,
    })))
}

pub async fn get_param_ratio(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ParamRatioConfig>, GatewayError> {
    authorize(&state.gateway_api_keys, &headers)?;
    Ok(Json(state.ratios.current().as_ref().clone()))
}

/// Replaces the whole rule set.
pub async fn put_param_ratio(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<ParamRatioConfig>, JsonRejection>,
) -> Result<Json<ParamRatioConfig>, GatewayError> {
    authorize(&state.gateway_api_keys, &headers)?;
    let Json(config) = payload.map_err(|rejection| {
        GatewayError::BadRequest(format!("Invalid param ratio config: {}", rejection.body_text()))
    })?;

    if let Some(rule) = config
        .rules
        .iter()
        .find(|rule| !rule.ratio.is_finite() || rule.ratio < 0.0)
    {
        return Err(GatewayError::BadRequest(format!(
            "ratio for {} {}={} must be a non-negative number",
            rule.model, rule.param_key, rule.param_value
        )));
    }

    state.ratios.replace(config);
    Ok(Json(state.ratios.current().as_ref().clone()))
}
