pub mod handlers;
pub mod state;
pub mod video_proxy;

use axum::Router;
use axum::routing::get;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use handlers::{
    fetch_video, get_param_ratio, healthz, list_models, put_param_ratio, root, submit_video,
};
use state::AppState;
use video_proxy::video_content;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/healthz", get(healthz))
        .route("/v1/models", get(list_models))
        .route("/v1/video/generations", axum::routing::post(submit_video))
        .route("/v1/video/generations/:task_id", get(fetch_video))
        .route("/v1/videos/:task_id/content", get(video_content))
        .route("/api/param_ratio", get(get_param_ratio).put(put_param_ratio))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
