//! Reconciles a canonical submission with a model's capability descriptor.
//!
//! The result, [`EffectiveParams`], is computed once per submission. The
//! vendor adaptor serializes it into the wire payload and the billing engine
//! prices it, so both always see the same values.

use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::capability::ModelCapabilityDescriptor;
use crate::task::request::TaskSubmitRequest;

const CFG_SCALE_RANGE: (f64, f64) = (1.0, 10.0);
const FPS_RANGE: (u32, u32) = (1, 60);

const KNOWN_SIZE_RATIOS: &[(&str, &str)] = &[
    ("1920x1080", "16:9"),
    ("1280x720", "16:9"),
    ("1080x1920", "9:16"),
    ("720x1280", "9:16"),
    ("1024x1024", "1:1"),
    ("512x512", "1:1"),
];

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ImageMode {
    TextOnly,
    Frames {
        first: Option<String>,
        last: Option<String>,
    },
    Reference {
        images: Vec<String>,
    },
}

impl ImageMode {
    /// Billing label for the image mode.
    pub fn label(&self) -> &'static str {
        match self {
            Self::TextOnly => "text",
            Self::Frames { last: Some(_), .. } => "first_last_frame",
            Self::Frames { .. } => "first_frame",
            Self::Reference { .. } => "reference",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EffectiveParams {
    pub model: String,
    pub prompt: Option<String>,
    pub duration: u32,
    pub resolution: String,
    pub ratio: Option<String>,
    pub seed: Option<i64>,
    pub image_mode: ImageMode,
    pub generate_audio: Option<bool>,
    pub cfg_scale: Option<f64>,
    pub fps: Option<u32>,
    /// Vendor-specific metadata copied through verbatim.
    pub extras: Map<String, Value>,
}

impl EffectiveParams {
    /// Parameters seen by the billing ratio engine.
    pub fn billing_params(&self) -> Map<String, Value> {
        let mut params = Map::new();
        params.insert("resolution".to_string(), json!(self.resolution));
        params.insert("duration".to_string(), json!(self.duration));
        if let Some(ratio) = &self.ratio {
            params.insert("ratio".to_string(), json!(ratio));
        }
        params.insert("mode".to_string(), json!(self.image_mode.label()));
        if let Some(generate_audio) = self.generate_audio {
            params.insert("generate_audio".to_string(), json!(generate_audio));
        }
        if let Some(cfg_scale) = self.cfg_scale {
            params.insert("cfg_scale".to_string(), json!(cfg_scale));
        }
        if let Some(fps) = self.fps {
            params.insert("fps".to_string(), json!(fps));
        }
        if let Some(seed) = self.seed {
            params.insert("seed".to_string(), json!(seed));
        }
        params
    }

    pub fn first_frame(&self) -> Option<&str> {
        match &self.image_mode {
            ImageMode::Frames { first, .. } => first.as_deref(),
            _ => None,
        }
    }

    pub fn last_frame(&self) -> Option<&str> {
        match &self.image_mode {
            ImageMode::Frames { last, .. } => last.as_deref(),
            _ => None,
        }
    }

    pub fn reference_images(&self) -> &[String] {
        match &self.image_mode {
            ImageMode::Reference { images } => images,
            _ => &[],
        }
    }
}

pub fn normalize(
    request: &TaskSubmitRequest,
    descriptor: &ModelCapabilityDescriptor,
) -> EffectiveParams {
    let metadata = &request.metadata;

    let duration = request
        .duration
        .or_else(|| metadata.get("duration").and_then(as_int))
        .and_then(|value| u32::try_from(value).ok())
        .filter(|value| descriptor.supports_duration(*value))
        .unwrap_or(descriptor.default_duration);

    let resolution = non_blank(request.resolution.as_deref())
        .map(str::to_string)
        .or_else(|| non_blank(request.size.as_deref()).map(str::to_string))
        .or_else(|| metadata.get("resolution").and_then(as_string))
        .and_then(|raw| parse_resolution(&raw))
        .and_then(|parsed| descriptor.match_resolution(&parsed))
        .unwrap_or(descriptor.default_resolution)
        .to_string();

    let ratio = descriptor.default_ratio.map(|default_ratio| {
        non_blank(request.aspect_ratio.as_deref())
            .map(str::to_string)
            .or_else(|| request.size.as_deref().and_then(ratio_from_size))
            .or_else(|| metadata.get("ratio").and_then(as_string))
            .or_else(|| metadata.get("aspect_ratio").and_then(as_string))
            .and_then(|candidate| descriptor.match_ratio(candidate.trim()))
            .unwrap_or(default_ratio)
            .to_string()
    });

    let seed = request
        .seed
        .or_else(|| metadata.get("seed").and_then(as_int))
        .filter(|seed| descriptor.accepts_seed(*seed));

    let image_mode = resolve_image_mode(request, descriptor);

    let generate_audio = if descriptor.supports_audio {
        request
            .generate_audio
            .or_else(|| metadata.get("generate_audio").and_then(as_bool))
    } else {
        None
    };

    let cfg_scale = if descriptor.supports_cfg_scale {
        request
            .cfg_scale
            .or_else(|| metadata.get("cfg_scale").and_then(as_float))
            .filter(|value| (CFG_SCALE_RANGE.0..=CFG_SCALE_RANGE.1).contains(value))
    } else {
        None
    };

    let fps = if descriptor.supports_fps {
        request
            .fps
            .or_else(|| metadata.get("fps").and_then(as_int))
            .and_then(|value| u32::try_from(value).ok())
            .filter(|value| (FPS_RANGE.0..=FPS_RANGE.1).contains(value))
    } else {
        None
    };

    let duration = apply_duration_cap(descriptor, &resolution, duration);

    let extras = descriptor
        .passthrough_keys
        .iter()
        .filter_map(|key| {
            metadata
                .get(*key)
                .filter(|value| !value.is_null())
                .map(|value| ((*key).to_string(), value.clone()))
        })
        .collect();

    EffectiveParams {
        model: request.model.clone(),
        prompt: request.prompt_text().map(str::to_string),
        duration,
        resolution,
        ratio,
        seed,
        image_mode,
        generate_audio,
        cfg_scale,
        fps,
        extras,
    }
}

fn resolve_image_mode(
    request: &TaskSubmitRequest,
    descriptor: &ModelCapabilityDescriptor,
) -> ImageMode {
    let metadata = &request.metadata;

    let first = non_blank(request.first_frame.as_deref())
        .map(str::to_string)
        .or_else(|| metadata.get("first_frame_image").and_then(as_string))
        .or_else(|| metadata.get("first_frame").and_then(as_string))
        .filter(|_| descriptor.supports_first_frame);
    let last = non_blank(request.last_frame.as_deref())
        .map(str::to_string)
        .or_else(|| metadata.get("last_frame_image").and_then(as_string))
        .or_else(|| metadata.get("last_frame").and_then(as_string))
        .filter(|_| descriptor.supports_last_frame);

    if first.is_some() || last.is_some() {
        return ImageMode::Frames { first, last };
    }

    if descriptor.supports_reference_images {
        let images = request
            .images
            .iter()
            .filter_map(|url| non_blank(Some(url.as_str())))
            .take(descriptor.max_reference_images)
            .map(str::to_string)
            .collect::<Vec<_>>();
        if !images.is_empty() {
            return ImageMode::Reference { images };
        }
    }

    ImageMode::TextOnly
}

fn apply_duration_cap(
    descriptor: &ModelCapabilityDescriptor,
    resolution: &str,
    duration: u32,
) -> u32 {
    let Some(cap) = descriptor.duration_cap(resolution) else {
        return duration;
    };
    if duration <= cap {
        return duration;
    }

    descriptor
        .supported_durations
        .iter()
        .copied()
        .filter(|supported| *supported <= cap)
        .max()
        .unwrap_or(descriptor.default_duration)
}

/// Accepts `1080p`, `1920x1080` (height wins) or a bare `1080`.
pub fn parse_resolution(raw: &str) -> Option<String> {
    let raw = raw.trim().to_ascii_lowercase();

    if let Some(digits) = raw.strip_suffix('p') {
        return is_digits(digits).then(|| format!("{digits}p"));
    }

    if let Some((_, height)) = raw.split_once('x') {
        let height = height.trim();
        return is_digits(height).then(|| format!("{height}p"));
    }

    is_digits(&raw).then(|| format!("{raw}p"))
}

pub fn ratio_from_size(size: &str) -> Option<String> {
    let size = size.trim();
    if let Some((_, ratio)) = KNOWN_SIZE_RATIOS.iter().find(|(known, _)| *known == size) {
        return Some((*ratio).to_string());
    }

    let (width, height) = size.split_once('x')?;
    let width = width.trim().parse::<u64>().ok().filter(|value| *value > 0)?;
    let height = height.trim().parse::<u64>().ok().filter(|value| *value > 0)?;
    let divisor = gcd(width, height);
    Some(format!("{}:{}", width / divisor, height / divisor))
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

fn is_digits(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|byte| byte.is_ascii_digit())
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

/// Integers, or floats with no fractional part.
pub fn as_int(value: &Value) -> Option<i64> {
    if let Some(int) = value.as_i64() {
        return Some(int);
    }
    let float = value.as_f64()?;
    (float.fract() == 0.0 && float >= i64::MIN as f64 && float <= i64::MAX as f64)
        .then_some(float as i64)
}

pub fn as_float(value: &Value) -> Option<f64> {
    value.as_f64().filter(|float| float.is_finite())
}

pub fn as_bool(value: &Value) -> Option<bool> {
    value.as_bool()
}

pub fn as_string(value: &Value) -> Option<String> {
    non_blank(value.as_str()).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::capability::ModelKind;

    const SEEDANCE_PRO: ModelCapabilityDescriptor = ModelCapabilityDescriptor {
        name: "seedance-pro",
        kind: ModelKind::ImageToVideo,
        default_duration: 5,
        supported_durations: &[5, 10],
        default_resolution: "1080p",
        supported_resolutions: &["480p", "720p", "1080p"],
        default_ratio: Some("16:9"),
        supported_ratios: &["16:9", "9:16", "1:1"],
        duration_caps: &[],
        seed_range: Some((0, i32::MAX as i64)),
        max_reference_images: 0,
        supports_first_frame: true,
        supports_last_frame: true,
        supports_reference_images: false,
        supports_audio: false,
        supports_cfg_scale: true,
        supports_fps: false,
        passthrough_keys: &["watermark"],
    };

    const HAILUO_LIKE: ModelCapabilityDescriptor = ModelCapabilityDescriptor {
        name: "hailuo-like",
        kind: ModelKind::TextToVideo,
        default_duration: 6,
        supported_durations: &[6, 10],
        default_resolution: "768P",
        supported_resolutions: &["768P", "1080P"],
        default_ratio: None,
        supported_ratios: &[],
        duration_caps: &[("1080P", 6)],
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

    fn request() -> TaskSubmitRequest {
        TaskSubmitRequest::new("seedance-pro", "a lighthouse at dusk")
    }

    #[test]
    fn unsupported_duration_falls_back_to_default() {
        let mut req = request();
        req.duration = Some(7);
        assert_eq!(normalize(&req, &SEEDANCE_PRO).duration, 5);

        req.duration = Some(10);
        assert_eq!(normalize(&req, &SEEDANCE_PRO).duration, 10);

        req.duration = Some(-5);
        assert_eq!(normalize(&req, &SEEDANCE_PRO).duration, 5);
    }

    #[test]
    fn size_yields_resolution_and_ratio() {
        let mut req = request();
        req.size = Some("1920x1080".to_string());
        let params = normalize(&req, &SEEDANCE_PRO);
        assert_eq!(params.resolution, "1080p");
        assert_eq!(params.ratio.as_deref(), Some("16:9"));

        req.size = Some("720x1280".to_string());
        let params = normalize(&req, &SEEDANCE_PRO);
        assert_eq!(params.resolution, "1080p", "1280p is unsupported so the default wins");
        assert_eq!(params.ratio.as_deref(), Some("9:16"));
    }

    #[test]
    fn explicit_resolution_beats_size() {
        let mut req = request();
        req.resolution = Some("720P".to_string());
        req.size = Some("1920x1080".to_string());
        assert_eq!(normalize(&req, &SEEDANCE_PRO).resolution, "720p");

        req.resolution = Some("480".to_string());
        assert_eq!(normalize(&req, &SEEDANCE_PRO).resolution, "480p");
    }

    #[test]
    fn resolution_keeps_vendor_spelling() {
        let mut req = request();
        req.resolution = Some("1080p".to_string());
        req.duration = Some(10);
        let params = normalize(&req, &HAILUO_LIKE);
        assert_eq!(params.resolution, "1080P");
        assert_eq!(params.duration, 6, "1080P caps the duration");
        assert_eq!(params.ratio, None);
    }

    #[test]
    fn explicit_ratio_is_validated() {
        let mut req = request();
        req.aspect_ratio = Some("21:9".to_string());
        assert_eq!(normalize(&req, &SEEDANCE_PRO).ratio.as_deref(), Some("16:9"));

        req.aspect_ratio = Some("1:1".to_string());
        req.size = Some("1920x1080".to_string());
        assert_eq!(normalize(&req, &SEEDANCE_PRO).ratio.as_deref(), Some("1:1"));
    }

    #[test]
    fn typed_size_beats_metadata() {
        let mut req = request();
        req.size = Some("1280x720".to_string());
        req.metadata.insert("resolution".to_string(), json!("480p"));
        req.metadata.insert("ratio".to_string(), json!("1:1"));
        req.metadata.insert("aspect_ratio".to_string(), json!("9:16"));
        let params = normalize(&req, &SEEDANCE_PRO);
        assert_eq!(params.resolution, "720p");
        assert_eq!(params.ratio.as_deref(), Some("16:9"));

        req.size = None;
        let params = normalize(&req, &SEEDANCE_PRO);
        assert_eq!(params.resolution, "480p");
        assert_eq!(params.ratio.as_deref(), Some("1:1"));
    }

    #[test]
    fn odd_sizes_reduce_by_gcd() {
        assert_eq!(ratio_from_size("1440x1080").as_deref(), Some("4:3"));
        assert_eq!(ratio_from_size("1024x1024").as_deref(), Some("1:1"));
        assert_eq!(ratio_from_size("0x1080"), None);
        assert_eq!(ratio_from_size("wide"), None);
    }

    #[test]
    fn parses_resolution_notations() {
        assert_eq!(parse_resolution("1080P").as_deref(), Some("1080p"));
        assert_eq!(parse_resolution(" 1280x720 ").as_deref(), Some("720p"));
        assert_eq!(parse_resolution("720").as_deref(), Some("720p"));
        assert_eq!(parse_resolution("hd"), None);
        assert_eq!(parse_resolution("p"), None);
    }

    #[test]
    fn seeds_outside_the_vendor_range_are_omitted() {
        let mut req = request();
        req.seed = Some(42);
        assert_eq!(normalize(&req, &SEEDANCE_PRO).seed, Some(42));

        req.seed = Some(i64::from(i32::MAX) + 1);
        assert_eq!(normalize(&req, &SEEDANCE_PRO).seed, None);

        req.seed = Some(42);
        assert_eq!(normalize(&req, &HAILUO_LIKE).seed, None);
    }

    #[test]
    fn frame_mode_wins_over_reference_images() {
        let descriptor = ModelCapabilityDescriptor {
            supports_reference_images: true,
            max_reference_images: 4,
            ..SEEDANCE_PRO
        };
        let mut req = request();
        req.first_frame = Some("https://img/first.png".to_string());
        req.images = vec!["https://img/ref.png".to_string()];

        let params = normalize(&req, &descriptor);
        assert_eq!(params.first_frame(), Some("https://img/first.png"));
        assert!(params.reference_images().is_empty());
        assert_eq!(params.image_mode.label(), "first_frame");
    }

    #[test]
    fn reference_images_are_truncated_to_vendor_maximum() {
        let descriptor = ModelCapabilityDescriptor {
            supports_first_frame: false,
            supports_last_frame: false,
            supports_reference_images: true,
            max_reference_images: 2,
            ..SEEDANCE_PRO
        };
        let mut req = request();
        req.images = ["a", "b", " ", "c"].iter().map(|url| url.to_string()).collect();

        let params = normalize(&req, &descriptor);
        assert_eq!(params.reference_images(), ["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn unsupported_frames_are_dropped_silently() {
        let mut req = request();
        req.first_frame = Some("https://img/first.png".to_string());
        let params = normalize(&req, &HAILUO_LIKE);
        assert_eq!(params.image_mode, ImageMode::TextOnly);
    }

    #[test]
    fn extras_are_dropped_when_out_of_range_or_unsupported() {
        let mut req = request();
        req.cfg_scale = Some(12.0);
        req.fps = Some(24);
        req.generate_audio = Some(true);
        let params = normalize(&req, &SEEDANCE_PRO);
        assert_eq!(params.cfg_scale, None);
        assert_eq!(params.fps, None);
        assert_eq!(params.generate_audio, None);

        req.cfg_scale = Some(7.5);
        assert_eq!(normalize(&req, &SEEDANCE_PRO).cfg_scale, Some(7.5));

        let descriptor = ModelCapabilityDescriptor {
            supports_fps: true,
            supports_audio: true,
            ..SEEDANCE_PRO
        };
        req.fps = Some(61);
        let params = normalize(&req, &descriptor);
        assert_eq!(params.fps, None);
        assert_eq!(params.generate_audio, Some(true));
    }

    #[test]
    fn metadata_fills_unset_fields_with_the_same_checks() {
        let descriptor = ModelCapabilityDescriptor {
            supports_fps: true,
            ..SEEDANCE_PRO
        };
        let mut req = request();
        req.metadata = json!({
            "duration": 10.0,
            "resolution": "720p",
            "ratio": "9:16",
            "seed": 9,
            "last_frame_image": "https://img/last.png",
            "cfg_scale": "7",
            "fps": 24,
            "watermark": false,
            "unlisted": "dropped"
        })
        .as_object()
        .cloned()
        .unwrap_or_default();

        let params = normalize(&req, &descriptor);
        assert_eq!(params.duration, 10);
        assert_eq!(params.resolution, "720p");
        assert_eq!(params.ratio.as_deref(), Some("9:16"));
        assert_eq!(params.seed, Some(9));
        assert_eq!(params.last_frame(), Some("https://img/last.png"));
        assert_eq!(params.cfg_scale, None, "strings are not coerced to floats");
        assert_eq!(params.fps, Some(24));
        assert_eq!(params.extras.get("watermark"), Some(&json!(false)));
        assert!(!params.extras.contains_key("unlisted"));
    }

    #[test]
    fn typed_fields_take_precedence_over_metadata() {
        let mut req = request();
        req.duration = Some(10);
        req.metadata.insert("duration".to_string(), json!(5));
        assert_eq!(normalize(&req, &SEEDANCE_PRO).duration, 10);
    }

    #[test]
    fn coercions_fail_closed() {
        assert_eq!(as_int(&json!(5)), Some(5));
        assert_eq!(as_int(&json!(5.0)), Some(5));
        assert_eq!(as_int(&json!(5.5)), None);
        assert_eq!(as_int(&json!("5")), None);
        assert_eq!(as_float(&json!(3)), Some(3.0));
        assert_eq!(as_float(&json!(true)), None);
        assert_eq!(as_bool(&json!("true")), None);
        assert_eq!(as_string(&json!("  ")), None);
        assert_eq!(as_string(&json!(1)), None);
    }

    #[test]
    fn billing_params_mirror_effective_values() {
        let mut req = request();
        req.duration = Some(10);
        req.seed = Some(3);
        let params = normalize(&req, &SEEDANCE_PRO).billing_params();
        assert_eq!(params.get("resolution"), Some(&json!("1080p")));
        assert_eq!(params.get("duration"), Some(&json!(10)));
        assert_eq!(params.get("ratio"), Some(&json!("16:9")));
        assert_eq!(params.get("mode"), Some(&json!("text")));
        assert_eq!(params.get("seed"), Some(&json!(3)));
        assert!(!params.contains_key("fps"));
    }
}
