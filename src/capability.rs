//! Static per-vendor model capability tables.
//!
//! Every table is built at compile time and never mutated, so lookups need no
//! locking. Unknown model ids resolve to the vendor's fallback descriptor.

use serde::Serialize;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    TextToVideo,
    ImageToVideo,
    StartEndToVideo,
    SubjectToVideo,
}

#[derive(Clone, Copy, Debug)]
pub struct ModelCapabilityDescriptor {
    pub name: &'static str,
    pub kind: ModelKind,
    pub default_duration: u32,
    pub supported_durations: &'static [u32],
    pub default_resolution: &'static str,
    pub supported_resolutions: &'static [&'static str],
    /// `None` when the vendor has no aspect-ratio parameter.
    pub default_ratio: Option<&'static str>,
    pub supported_ratios: &'static [&'static str],
    /// Maximum duration allowed at a given resolution.
    pub duration_caps: &'static [(&'static str, u32)],
    /// Inclusive seed bounds; `None` when the vendor ignores seeds.
    pub seed_range: Option<(i64, i64)>,
    pub max_reference_images: usize,
    pub supports_first_frame: bool,
    pub supports_last_frame: bool,
    pub supports_reference_images: bool,
    pub supports_audio: bool,
    pub supports_cfg_scale: bool,
    pub supports_fps: bool,
    /// Metadata keys forwarded to the vendor untouched.
    pub passthrough_keys: &'static [&'static str],
}

impl ModelCapabilityDescriptor {
    pub fn supports_duration(&self, duration: u32) -> bool {
        self.supported_durations.contains(&duration)
    }

    /// Matches a normalized resolution token against the supported set,
    /// ignoring the case of the unit letter, and returns the vendor spelling.
    pub fn match_resolution(&self, candidate: &str) -> Option<&'static str> {
        self.supported_resolutions
            .iter()
            .copied()
            .find(|supported| supported.eq_ignore_ascii_case(candidate))
    }

    pub fn match_ratio(&self, candidate: &str) -> Option<&'static str> {
        self.supported_ratios
            .iter()
            .copied()
            .find(|supported| *supported == candidate)
    }

    pub fn duration_cap(&self, resolution: &str) -> Option<u32> {
        self.duration_caps
            .iter()
            .find(|(capped, _)| capped.eq_ignore_ascii_case(resolution))
            .map(|(_, cap)| *cap)
    }

    pub fn accepts_seed(&self, seed: i64) -> bool {
        self.seed_range
            .is_some_and(|(min, max)| (min..=max).contains(&seed))
    }
}

pub struct CapabilityTable {
    vendor: &'static str,
    models: &'static [ModelCapabilityDescriptor],
    fallback: ModelCapabilityDescriptor,
}

impl CapabilityTable {
    pub const fn new(
        vendor: &'static str,
        models: &'static [ModelCapabilityDescriptor],
        fallback: ModelCapabilityDescriptor,
    ) -> Self {
        Self {
            vendor,
            models,
            fallback,
        }
    }

    pub fn vendor(&self) -> &'static str {
        self.vendor
    }

    pub fn descriptor(&self, model: &str) -> ModelCapabilityDescriptor {
        self.models
            .iter()
            .find(|descriptor| descriptor.name == model)
            .copied()
            .unwrap_or(self.fallback)
    }

    pub fn models(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.models.iter().map(|descriptor| descriptor.name)
    }
}
