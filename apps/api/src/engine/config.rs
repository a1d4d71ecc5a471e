//! Engine configuration: matching strategy, confidence-gate bounds, scoring
//! weights, and extraction settings.
//!
//! The base configuration is immutable for the lifetime of the process.
//! Request-scoped overrides go through [`EngineConfig::with_overrides`],
//! which returns a new record and never touches the original. Unknown
//! override keys are ignored; type-mismatched values are rejected.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStrategyKind {
    Quantile,
    Static,
}

impl MatchStrategyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchStrategyKind::Quantile => "quantile",
            MatchStrategyKind::Static => "static",
        }
    }
}

/// Taxonomy matching thresholds. Quantile cutoffs and floors are
/// source-type-specific: resume text is noisier than a JD, so its floor sits
/// lower.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchStrategyConfig {
    pub strategy: MatchStrategyKind,
    pub topk: usize,
    pub jd_q: f64,
    pub resume_q: f64,
    pub task_q: f64,
    pub jd_floor: f64,
    pub resume_floor: f64,
    pub task_floor: f64,
    pub static_threshold: f64,
    pub lexical_guard: bool,
}

impl Default for MatchStrategyConfig {
    fn default() -> Self {
        Self {
            strategy: MatchStrategyKind::Quantile,
            topk: 10,
            jd_q: 0.85,
            resume_q: 0.85,
            task_q: 0.85,
            jd_floor: 0.40,
            resume_floor: 0.30,
            task_floor: 0.40,
            static_threshold: 0.55,
            lexical_guard: true,
        }
    }
}

/// Bounds for the adaptive confidence gate around nearest-neighbor mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CragConfig {
    pub min_hits: usize,
    pub min_margin: f64,
    pub max_retries: usize,
    pub max_topk: usize,
    pub bump_topk_by: usize,
    pub allow_recipe_switch: bool,
}

impl Default for CragConfig {
    fn default() -> Self {
        Self {
            min_hits: 2,
            min_margin: 0.08,
            max_retries: 3,
            max_topk: 20,
            bump_topk_by: 4,
            allow_recipe_switch: true,
        }
    }
}

/// Gap scoring weights. Only `level_grace` affects the contract score; the
/// penalty weights feed the `score_components` extras.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub miss: f64,
    pub hot: f64,
    pub ind: f64,
    pub level: f64,
    pub level_grace: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            miss: 0.20,
            hot: 0.70,
            ind: 0.40,
            level: 0.90,
            level_grace: 0.25,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMode {
    AllInOne,
    Current,
}

impl ExtractionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ExtractionMode::AllInOne => "all_in_one",
            ExtractionMode::Current => "current",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionConfig {
    pub mode: ExtractionMode,
    pub extractor_model: String,
    pub cap_nice_to_have: bool,
    pub max_spans_per_skill: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            mode: ExtractionMode::AllInOne,
            extractor_model: crate::llm_client::DEFAULT_MODEL.to_string(),
            cap_nice_to_have: true,
            max_spans_per_skill: 2,
        }
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    pub match_strategy: MatchStrategyConfig,
    pub crag: CragConfig,
    pub score_weights: ScoreWeights,
    pub extraction: ExtractionConfig,
}

impl EngineConfig {
    /// Returns a new configuration with `overrides` applied on top of `self`.
    ///
    /// Only the documented keys are recognised; anything else is ignored
    /// silently so callers can ship forward-compatible payloads. A value of
    /// the wrong type fails the whole request with `InvalidOverride`.
    pub fn with_overrides(&self, overrides: &Value) -> Result<EngineConfig, EngineError> {
        let mut cfg = self.clone();

        let Some(map) = overrides.as_object() else {
            if overrides.is_null() {
                return Ok(cfg);
            }
            return Err(EngineError::InvalidOverride(
                "policy_overrides must be an object".to_string(),
            ));
        };

        if let Some(ms) = section(map, "match_strategy")? {
            if let Some(v) = ms.get("strategy") {
                cfg.match_strategy.strategy = match as_str(v, "match_strategy.strategy")? {
                    "quantile" => MatchStrategyKind::Quantile,
                    "static" => MatchStrategyKind::Static,
                    other => {
                        return Err(EngineError::InvalidOverride(format!(
                            "match_strategy.strategy: unknown strategy '{other}'"
                        )))
                    }
                };
            }
            if let Some(v) = ms.get("topk") {
                cfg.match_strategy.topk = as_usize(v, "match_strategy.topk")?;
            }
            for (key, slot) in [
                ("jd_q", &mut cfg.match_strategy.jd_q),
                ("resume_q", &mut cfg.match_strategy.resume_q),
                ("task_q", &mut cfg.match_strategy.task_q),
            ] {
                if let Some(v) = ms.get(key) {
                    *slot = as_unit_f64(v, &format!("match_strategy.{key}"))?;
                }
            }
            for (key, slot) in [
                ("jd_floor", &mut cfg.match_strategy.jd_floor),
                ("resume_floor", &mut cfg.match_strategy.resume_floor),
                ("task_floor", &mut cfg.match_strategy.task_floor),
            ] {
                if let Some(v) = ms.get(key) {
                    *slot = as_unit_f64(v, &format!("match_strategy.{key}"))?;
                }
            }
            if let Some(v) = ms.get("lexical_guard") {
                cfg.match_strategy.lexical_guard = as_bool(v, "match_strategy.lexical_guard")?;
            }
        }

        if let Some(crag) = section(map, "crag")? {
            if let Some(v) = crag.get("min_hits") {
                cfg.crag.min_hits = as_usize(v, "crag.min_hits")?;
            }
            if let Some(v) = crag.get("min_margin") {
                cfg.crag.min_margin = as_f64(v, "crag.min_margin")?;
            }
            if let Some(v) = crag.get("max_retries") {
                cfg.crag.max_retries = as_usize(v, "crag.max_retries")?;
            }
            if let Some(v) = crag.get("max_topk") {
                cfg.crag.max_topk = as_usize(v, "crag.max_topk")?;
            }
            if let Some(v) = crag.get("bump_topk_by") {
                cfg.crag.bump_topk_by = as_usize(v, "crag.bump_topk_by")?;
            }
            if let Some(v) = crag.get("allow_recipe_switch") {
                cfg.crag.allow_recipe_switch = as_bool(v, "crag.allow_recipe_switch")?;
            }
        }

        if let Some(sw) = section(map, "score_weights")? {
            if let Some(v) = sw.get("level_grace") {
                let grace = as_f64(v, "score_weights.level_grace")?;
                if grace < 0.0 {
                    return Err(EngineError::InvalidOverride(
                        "score_weights.level_grace must be >= 0".to_string(),
                    ));
                }
                cfg.score_weights.level_grace = grace;
            }
        }

        if let Some(ex) = section(map, "extraction")? {
            if let Some(v) = ex.get("mode") {
                cfg.extraction.mode = match as_str(v, "extraction.mode")? {
                    "all_in_one" => ExtractionMode::AllInOne,
                    "current" => ExtractionMode::Current,
                    other => {
                        return Err(EngineError::InvalidOverride(format!(
                            "extraction.mode: unknown mode '{other}'"
                        )))
                    }
                };
            }
            if let Some(v) = ex.get("extractor_model") {
                cfg.extraction.extractor_model = as_str(v, "extraction.extractor_model")?.to_string();
            }
            if let Some(v) = ex.get("cap_nice_to_have") {
                cfg.extraction.cap_nice_to_have = as_bool(v, "extraction.cap_nice_to_have")?;
            }
        }

        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), EngineError> {
        if self.match_strategy.topk == 0 {
            return Err(EngineError::InvalidOverride(
                "match_strategy.topk must be >= 1".to_string(),
            ));
        }
        if self.match_strategy.topk > self.crag.max_topk {
            return Err(EngineError::InvalidOverride(format!(
                "match_strategy.topk ({}) exceeds crag.max_topk ({})",
                self.match_strategy.topk, self.crag.max_topk
            )));
        }
        Ok(())
    }

    /// Snapshot of the effective configuration for persistence on a
    /// processing run and inside the analysis context.
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).expect("EngineConfig serializes")
    }
}

// ── Override value coercion ─────────────────────────────────────────────────

fn section<'a>(
    map: &'a serde_json::Map<String, Value>,
    key: &str,
) -> Result<Option<&'a serde_json::Map<String, Value>>, EngineError> {
    match map.get(key) {
        None => Ok(None),
        Some(Value::Object(obj)) => Ok(Some(obj)),
        Some(_) => Err(EngineError::InvalidOverride(format!(
            "{key} must be an object"
        ))),
    }
}

fn as_f64(v: &Value, key: &str) -> Result<f64, EngineError> {
    v.as_f64()
        .ok_or_else(|| EngineError::InvalidOverride(format!("{key} must be a number")))
}

fn as_unit_f64(v: &Value, key: &str) -> Result<f64, EngineError> {
    let f = as_f64(v, key)?;
    if !(0.0..=1.0).contains(&f) {
        return Err(EngineError::InvalidOverride(format!(
            "{key} must be in [0, 1]"
        )));
    }
    Ok(f)
}

fn as_usize(v: &Value, key: &str) -> Result<usize, EngineError> {
    v.as_u64()
        .map(|u| u as usize)
        .ok_or_else(|| EngineError::InvalidOverride(format!("{key} must be a non-negative integer")))
}

fn as_bool(v: &Value, key: &str) -> Result<bool, EngineError> {
    v.as_bool()
        .ok_or_else(|| EngineError::InvalidOverride(format!("{key} must be a boolean")))
}

fn as_str<'a>(v: &'a Value, key: &str) -> Result<&'a str, EngineError> {
    v.as_str()
        .ok_or_else(|| EngineError::InvalidOverride(format!("{key} must be a string")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults_match_documented_values() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.match_strategy.strategy, MatchStrategyKind::Quantile);
        assert_eq!(cfg.match_strategy.topk, 10);
        assert_eq!(cfg.match_strategy.resume_floor, 0.30);
        assert_eq!(cfg.match_strategy.jd_floor, 0.40);
        assert_eq!(cfg.crag.min_hits, 2);
        assert_eq!(cfg.crag.max_retries, 3);
        assert_eq!(cfg.crag.max_topk, 20);
        assert_eq!(cfg.score_weights.level_grace, 0.25);
        assert_eq!(cfg.extraction.mode, ExtractionMode::AllInOne);
    }

    #[test]
    fn test_overrides_produce_new_config_without_mutating_base() {
        let base = EngineConfig::default();
        let effective = base
            .with_overrides(&json!({
                "match_strategy": {"topk": 12, "lexical_guard": false},
                "crag": {"min_hits": 3},
                "score_weights": {"level_grace": 0.5}
            }))
            .unwrap();

        assert_eq!(effective.match_strategy.topk, 12);
        assert!(!effective.match_strategy.lexical_guard);
        assert_eq!(effective.crag.min_hits, 3);
        assert_eq!(effective.score_weights.level_grace, 0.5);

        // Base is untouched (override isolation).
        assert_eq!(base.match_strategy.topk, 10);
        assert!(base.match_strategy.lexical_guard);
        assert_eq!(base.crag.min_hits, 2);
        assert_eq!(base.score_weights.level_grace, 0.25);
    }

    #[test]
    fn test_unknown_keys_are_ignored() {
        let cfg = EngineConfig::default()
            .with_overrides(&json!({
                "match_strategy": {"topk": 5, "future_knob": "whatever"},
                "telemetry": {"enabled": true}
            }))
            .unwrap();
        assert_eq!(cfg.match_strategy.topk, 5);
    }

    #[test]
    fn test_type_mismatch_is_rejected() {
        let err = EngineConfig::default()
            .with_overrides(&json!({"crag": {"min_hits": "two"}}))
            .unwrap_err();
        assert!(err.to_string().contains("crag.min_hits"));
    }

    #[test]
    fn test_quantile_out_of_unit_range_rejected() {
        let err = EngineConfig::default()
            .with_overrides(&json!({"match_strategy": {"jd_q": 1.5}}))
            .unwrap_err();
        assert!(err.to_string().contains("jd_q"));
    }

    #[test]
    fn test_topk_above_max_topk_rejected() {
        let err = EngineConfig::default()
            .with_overrides(&json!({"match_strategy": {"topk": 30}}))
            .unwrap_err();
        assert!(err.to_string().contains("max_topk"));
    }

    #[test]
    fn test_topk_zero_rejected() {
        let err = EngineConfig::default()
            .with_overrides(&json!({"match_strategy": {"topk": 0}}))
            .unwrap_err();
        assert!(err.to_string().contains("topk"));
    }

    #[test]
    fn test_null_overrides_are_a_noop() {
        let cfg = EngineConfig::default()
            .with_overrides(&Value::Null)
            .unwrap();
        assert_eq!(cfg, EngineConfig::default());
    }

    #[test]
    fn test_strategy_and_mode_strings() {
        let cfg = EngineConfig::default()
            .with_overrides(&json!({
                "match_strategy": {"strategy": "static"},
                "extraction": {"mode": "current", "extractor_model": "claude-haiku-4-5"}
            }))
            .unwrap();
        assert_eq!(cfg.match_strategy.strategy, MatchStrategyKind::Static);
        assert_eq!(cfg.extraction.mode, ExtractionMode::Current);
        assert_eq!(cfg.extraction.extractor_model, "claude-haiku-4-5");

        let err = EngineConfig::default()
            .with_overrides(&json!({"match_strategy": {"strategy": "margin"}}))
            .unwrap_err();
        assert!(err.to_string().contains("unknown strategy"));
    }

    #[test]
    fn test_negative_level_grace_rejected() {
        let err = EngineConfig::default()
            .with_overrides(&json!({"score_weights": {"level_grace": -0.1}}))
            .unwrap_err();
        assert!(err.to_string().contains("level_grace"));
    }

    #[test]
    fn test_config_snapshot_round_trips() {
        let cfg = EngineConfig::default();
        let snapshot = cfg.to_json();
        let back: EngineConfig = serde_json::from_value(snapshot).unwrap();
        assert_eq!(back, cfg);
    }
}
