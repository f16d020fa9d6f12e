//! Parameter-based price multipliers.
//!
//! Rules are matched against the effective parameters of a submission. The
//! whole rule set lives behind an [`ArcSwap`]: readers take a snapshot without
//! locking and an update replaces every rule at once.

use std::collections::HashSet;
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::info;

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct ParamRatioRule {
    /// Exact model id or a pattern with a single `*`.
    pub model: String,
    pub param_key: String,
    pub param_value: String,
    pub ratio: f64,
}

impl ParamRatioRule {
    pub fn new(model: &str, param_key: &str, param_value: &str, ratio: f64) -> Self {
        Self {
            model: model.to_string(),
            param_key: param_key.to_string(),
            param_value: param_value.to_string(),
            ratio,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct ParamRatioConfig {
    #[serde(default)]
    pub rules: Vec<ParamRatioRule>,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

impl Default for ParamRatioConfig {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            enabled: true,
        }
    }
}

impl ParamRatioConfig {
    /// Starter rule set for Seedance models.
    pub fn example() -> Self {
        Self {
            enabled: true,
            rules: vec![
                ParamRatioRule::new("doubao-*", "resolution", "720p", 0.8),
                ParamRatioRule::new("doubao-*", "resolution", "1080p", 1.0),
                ParamRatioRule::new("doubao-*", "duration", "5", 1.0),
                ParamRatioRule::new("doubao-*", "duration", "10", 1.8),
            ],
        }
    }

    /// Product of the ratios of every matching rule, `1.0` when nothing
    /// matches. A rule only matches when its key is present in `params` and
    /// the normalized value equals the rule's value. Several rules sharing the
    /// same model pattern, key and value contribute once.
    pub fn ratio(&self, model: &str, params: &Map<String, Value>) -> f64 {
        if !self.enabled || self.rules.is_empty() {
            return 1.0;
        }

        let mut applied = HashSet::new();
        let mut total = 1.0;
        for rule in &self.rules {
            if !ModelPattern::parse(&rule.model).matches(model) {
                continue;
            }
            let Some(value) = params.get(&rule.param_key).and_then(normalize_value) else {
                continue;
            };
            if value != rule.param_value {
                continue;
            }
            let key = (
                rule.model.as_str(),
                rule.param_key.as_str(),
                rule.param_value.as_str(),
            );
            if applied.insert(key) {
                total *= rule.ratio;
            }
        }
        total
    }
}

/// Closed model-pattern grammar.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ModelPattern<'a> {
    Exact(&'a str),
    Prefix(&'a str),
    Suffix(&'a str),
    PrefixSuffix(&'a str, &'a str),
    /// More than one `*`; never matches.
    Invalid,
}

impl<'a> ModelPattern<'a> {
    pub fn parse(pattern: &'a str) -> Self {
        match pattern.matches('*').count() {
            0 => Self::Exact(pattern),
            1 => match pattern.split_once('*') {
                Some(("", suffix)) => Self::Suffix(suffix),
                Some((prefix, "")) => Self::Prefix(prefix),
                Some((prefix, suffix)) => Self::PrefixSuffix(prefix, suffix),
                None => Self::Invalid,
            },
            _ => Self::Invalid,
        }
    }

    pub fn matches(self, model: &str) -> bool {
        match self {
            Self::Exact(exact) => exact == model,
            Self::Prefix(prefix) => model.starts_with(prefix),
            Self::Suffix(suffix) => model.ends_with(suffix),
            Self::PrefixSuffix(prefix, suffix) => {
                model.len() >= prefix.len() + suffix.len()
                    && model.starts_with(prefix)
                    && model.ends_with(suffix)
            }
            Self::Invalid => false,
        }
    }
}

/// String form used for rule comparison. Integral numbers drop their
/// decimals, booleans become `true`/`false`, null never matches.
pub fn normalize_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Number(number) => {
            if let Some(int) = number.as_i64() {
                return Some(int.to_string());
            }
            if let Some(uint) = number.as_u64() {
                return Some(uint.to_string());
            }
            let float = number.as_f64()?;
            if float.fract() == 0.0 && float.abs() < 1e15 {
                Some(format!("{}", float as i64))
            } else {
                Some(float.to_string())
            }
        }
        other => serde_json::to_string(other).ok(),
    }
}

pub struct ParamRatioEngine {
    config: ArcSwap<ParamRatioConfig>,
}

impl ParamRatioEngine {
    pub fn new(config: ParamRatioConfig) -> Self {
        Self {
            config: ArcSwap::from_pointee(config),
        }
    }

    pub fn ratio(&self, model: &str, params: &Map<String, Value>) -> f64 {
        self.config.load().ratio(model, params)
    }

    pub fn current(&self) -> Arc<ParamRatioConfig> {
        self.config.load_full()
    }

    pub fn replace(&self, config: ParamRatioConfig) {
        info!(
            rules = config.rules.len(),
            enabled = config.enabled,
            "param ratio config replaced"
        );
        self.config.store(Arc::new(config));
    }

    /// Parses and installs a whole config. On error the previous rules stay.
    pub fn update_from_json(&self, raw: &str) -> Result<(), serde_json::Error> {
        let config = serde_json::from_str::<ParamRatioConfig>(raw)?;
        self.replace(config);
        Ok(())
    }
}

impl Default for ParamRatioEngine {
    fn default() -> Self {
        Self::new(ParamRatioConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn params(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn distinct_keys_multiply() {
        let config = ParamRatioConfig::example();
        let ratio = config.ratio(
            "doubao-seedance-1-5-pro-251215",
            &params(json!({"resolution": "1080p", "duration": 10})),
        );
        assert!((ratio - 1.8).abs() < 1e-9);

        let ratio = config.ratio(
            "doubao-seedance-1-0-lite-t2v",
            &params(json!({"resolution": "720p", "duration": 10})),
        );
        assert!((ratio - 1.44).abs() < 1e-9);
    }

    #[test]
    fn rule_order_does_not_change_the_result() {
        let mut config = ParamRatioConfig::example();
        let input = params(json!({"resolution": "720p", "duration": 10}));
        let forward = config.ratio("doubao-x", &input);
        config.rules.reverse();
        assert!((forward - config.ratio("doubao-x", &input)).abs() < 1e-9);
    }

    #[test]
    fn duplicate_rules_apply_once() {
        let config = ParamRatioConfig {
            enabled: true,
            rules: vec![
                ParamRatioRule::new("doubao-*", "resolution", "1080p", 2.0),
                ParamRatioRule::new("doubao-*", "resolution", "1080p", 2.0),
                ParamRatioRule::new("doubao-seedance-pro", "resolution", "1080p", 1.5),
            ],
        };
        let ratio = config.ratio("doubao-seedance-pro", &params(json!({"resolution": "1080p"})));
        assert!((ratio - 3.0).abs() < 1e-9);
    }

    #[test]
    fn disabled_or_unmatched_configs_are_neutral() {
        let mut config = ParamRatioConfig::example();
        let input = params(json!({"resolution": "720p"}));
        assert!((config.ratio("MiniMax-Hailuo-02", &input) - 1.0).abs() < 1e-9);
        assert!((config.ratio("doubao-x", &Map::new()) - 1.0).abs() < 1e-9);

        config.enabled = false;
        assert!((config.ratio("doubao-x", &input) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn pattern_grammar_is_closed() {
        assert!(ModelPattern::parse("sora-2").matches("sora-2"));
        assert!(!ModelPattern::parse("sora-2").matches("sora-2-pro"));
        assert!(ModelPattern::parse("*-pro").matches("sora-2-pro"));
        assert!(ModelPattern::parse("doubao-*-t2v").matches("doubao-seedance-1-0-lite-t2v"));
        assert!(!ModelPattern::parse("ab*ba").matches("aba"));
        assert!(!ModelPattern::parse("*-seedream-*").matches("doubao-seedream-4-0"));
        assert_eq!(ModelPattern::parse("*"), ModelPattern::Suffix(""));
        assert!(ModelPattern::parse("*").matches("anything"));
    }

    #[test]
    fn values_are_normalized_before_comparison() {
        assert_eq!(normalize_value(&json!(10)).as_deref(), Some("10"));
        assert_eq!(normalize_value(&json!(10.0)).as_deref(), Some("10"));
        assert_eq!(normalize_value(&json!(7.5)).as_deref(), Some("7.5"));
        assert_eq!(normalize_value(&json!(true)).as_deref(), Some("true"));
        assert_eq!(normalize_value(&Value::Null), None);
        assert_eq!(normalize_value(&json!(["a"])).as_deref(), Some("[\"a\"]"));
    }

    #[test]
    fn engine_swaps_whole_rule_sets() {
        let engine = ParamRatioEngine::default();
        let input = params(json!({"duration": 10}));
        assert!((engine.ratio("doubao-x", &input) - 1.0).abs() < 1e-9);

        engine
            .update_from_json(r#"{"enabled":true,"rules":[{"model":"doubao-*","param_key":"duration","param_value":"10","ratio":1.8}]}"#)
            .expect("valid config");
        assert!((engine.ratio("doubao-x", &input) - 1.8).abs() < 1e-9);

        assert!(engine.update_from_json("{not json").is_err());
        assert_eq!(engine.current().rules.len(), 1);
    }
}
