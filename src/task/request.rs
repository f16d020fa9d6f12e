use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::TaskError;
use crate::normalize::{EffectiveParams, ImageMode};

/// Canonical video submission accepted on `POST /v1/video/generations`.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct TaskSubmitRequest {
    pub model: String,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub duration: Option<i64>,
    #[serde(default)]
    pub resolution: Option<String>,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default, alias = "ratio")]
    pub aspect_ratio: Option<String>,
    #[serde(default)]
    pub seed: Option<i64>,
    #[serde(default, alias = "first_frame_image")]
    pub first_frame: Option<String>,
    #[serde(default, alias = "last_frame_image")]
    pub last_frame: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub generate_audio: Option<bool>,
    #[serde(default)]
    pub cfg_scale: Option<f64>,
    #[serde(default)]
    pub fps: Option<i64>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl TaskSubmitRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: Some(prompt.into()),
            ..Self::default()
        }
    }

    pub fn prompt_text(&self) -> Option<&str> {
        self.prompt
            .as_deref()
            .map(str::trim)
            .filter(|prompt| !prompt.is_empty())
    }

    fn has_frame_image(&self) -> bool {
        let typed = [&self.first_frame, &self.last_frame]
            .into_iter()
            .any(|frame| frame.as_deref().is_some_and(|url| !url.trim().is_empty()));
        typed
            || ["first_frame_image", "first_frame", "last_frame_image", "last_frame"]
                .into_iter()
                .any(|key| {
                    self.metadata
                        .get(key)
                        .and_then(Value::as_str)
                        .is_some_and(|url| !url.trim().is_empty())
                })
    }

    fn has_reference_images(&self) -> bool {
        self.images.iter().any(|url| !url.trim().is_empty())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskAction {
    TextToVideo,
    ImageToVideo,
    ReferenceToVideo,
}

impl TaskAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TextToVideo => "text_to_video",
            Self::ImageToVideo => "image_to_video",
            Self::ReferenceToVideo => "reference_to_video",
        }
    }

    /// Frame images win over reference images.
    pub fn infer(request: &TaskSubmitRequest) -> Self {
        if request.has_frame_image() {
            Self::ImageToVideo
        } else if request.has_reference_images() {
            Self::ReferenceToVideo
        } else {
            Self::TextToVideo
        }
    }

    /// Action implied by the images that survived normalization.
    pub fn effective(params: &EffectiveParams) -> Self {
        match params.image_mode {
            ImageMode::TextOnly => Self::TextToVideo,
            ImageMode::Frames { .. } => Self::ImageToVideo,
            ImageMode::Reference { .. } => Self::ReferenceToVideo,
        }
    }
}

/// Checks shared by every vendor before action-specific validation.
pub fn validate_basic_request(request: &TaskSubmitRequest) -> Result<TaskAction, TaskError> {
    if request.model.trim().is_empty() {
        return Err(TaskError::validation(
            "invalid_request",
            "The request body must include a model",
        ));
    }

    let action = TaskAction::infer(request);
    if action == TaskAction::TextToVideo && request.prompt_text().is_none() {
        return Err(TaskError::validation(
            "invalid_request",
            "prompt is required when no image is provided",
        ));
    }

    Ok(action)
}

/// A model that dropped every supplied image still needs a prompt.
pub fn validate_effective_params(params: &EffectiveParams) -> Result<TaskAction, TaskError> {
    let action = TaskAction::effective(params);
    if action == TaskAction::TextToVideo && params.prompt.is_none() {
        return Err(TaskError::validation(
            "invalid_request",
            format!("prompt is required: {} accepts none of the supplied images", params.model),
        ));
    }
    Ok(action)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn deserializes_canonical_schema_with_aliases() {
        let request: TaskSubmitRequest = serde_json::from_value(json!({
            "model": "doubao-seedance-1-0-pro-250528",
            "prompt": "a fox in the snow",
            "duration": 10,
            "size": "1920x1080",
            "ratio": "16:9",
            "first_frame_image": "https://img/first.png",
            "images": ["https://img/ref.png"],
            "metadata": {"seed": 7}
        }))
        .expect("valid request");

        assert_eq!(request.duration, Some(10));
        assert_eq!(request.aspect_ratio.as_deref(), Some("16:9"));
        assert_eq!(request.first_frame.as_deref(), Some("https://img/first.png"));
        assert_eq!(request.metadata.get("seed"), Some(&json!(7)));
    }

    #[test]
    fn frame_images_take_precedence_when_inferring_action() {
        let mut request = TaskSubmitRequest::new("m", "p");
        assert_eq!(TaskAction::infer(&request), TaskAction::TextToVideo);

        request.images = vec!["https://img/ref.png".to_string()];
        assert_eq!(TaskAction::infer(&request), TaskAction::ReferenceToVideo);

        request.first_frame = Some("https://img/first.png".to_string());
        assert_eq!(TaskAction::infer(&request), TaskAction::ImageToVideo);
    }

    #[test]
    fn metadata_frames_count_as_image_input() {
        let mut request = TaskSubmitRequest {
            model: "m".to_string(),
            ..TaskSubmitRequest::default()
        };
        request
            .metadata
            .insert("first_frame_image".to_string(), json!("https://img/a.png"));

        assert_eq!(validate_basic_request(&request).ok(), Some(TaskAction::ImageToVideo));
    }

    #[test]
    fn text_requests_need_a_prompt() {
        let request = TaskSubmitRequest::new("m", "   ");
        let error = validate_basic_request(&request).expect_err("blank prompt");
        assert_eq!(error.code, "invalid_request");

        let request = TaskSubmitRequest::new("", "hello");
        assert!(validate_basic_request(&request).is_err());
    }

    #[test]
    fn effective_action_follows_the_surviving_images() {
        let mut params = crate::task::model::tests::sample_params("m");
        assert_eq!(validate_effective_params(&params).ok(), Some(TaskAction::TextToVideo));

        params.image_mode = ImageMode::Reference {
            images: vec!["https://img/ref.png".to_string()],
        };
        params.prompt = None;
        assert_eq!(validate_effective_params(&params).ok(), Some(TaskAction::ReferenceToVideo));

        params.image_mode = ImageMode::TextOnly;
        let error = validate_effective_params(&params).expect_err("nothing to generate from");
        assert_eq!(error.code, "invalid_request");
    }
}
