//! Proficiency levels: the five-label vocabulary, normalised snapshots, and
//! delta arithmetic.
//!
//! Level math must be total: a side with no usable level information is
//! treated as `working / 2.0 / confidence 0.5` so comparisons never fault on
//! partial extractor output.

use serde::{Deserialize, Serialize};

/// Ordered proficiency vocabulary shared by the extraction prompts and the
/// comparison logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LevelLabel {
    None,
    Basic,
    Working,
    Proficient,
    Advanced,
}

impl LevelLabel {
    /// Nominal numeric score for the label (none=0 .. advanced=4).
    pub fn default_score(self) -> f32 {
        match self {
            LevelLabel::None => 0.0,
            LevelLabel::Basic => 1.0,
            LevelLabel::Working => 2.0,
            LevelLabel::Proficient => 3.0,
            LevelLabel::Advanced => 4.0,
        }
    }

    /// Parses a label string case-insensitively. Unrecognised labels map to
    /// `None` here; callers decide the fallback.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "none" => Some(LevelLabel::None),
            "basic" => Some(LevelLabel::Basic),
            "working" => Some(LevelLabel::Working),
            "proficient" => Some(LevelLabel::Proficient),
            "advanced" => Some(LevelLabel::Advanced),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LevelLabel::None => "none",
            LevelLabel::Basic => "basic",
            LevelLabel::Working => "working",
            LevelLabel::Proficient => "proficient",
            LevelLabel::Advanced => "advanced",
        }
    }
}

/// Default score used when the extractor provides no level information.
pub const UNKNOWN_LEVEL_SCORE: f32 = 2.0;
/// Default confidence for defaulted levels.
pub const UNKNOWN_LEVEL_CONFIDENCE: f32 = 0.5;

/// A normalised level observation (candidate side) or requirement (job side).
///
/// Invariant: `score` is finite in [0, 4] and consistent with `label`;
/// `confidence` is in [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelSnapshot {
    pub label: LevelLabel,
    pub score: f32,
    pub years: Option<f32>,
    pub confidence: f32,
    #[serde(default)]
    pub signals: Vec<String>,
}

impl LevelSnapshot {
    /// The defaulted snapshot for skills with no usable level information.
    pub fn working_default() -> Self {
        Self {
            label: LevelLabel::Working,
            score: UNKNOWN_LEVEL_SCORE,
            years: None,
            confidence: UNKNOWN_LEVEL_CONFIDENCE,
            signals: Vec::new(),
        }
    }

    /// Normalises raw extractor output into a valid snapshot: label fallback
    /// to `working`, score clamped to [0, 4] (defaulting to the label's
    /// nominal score), confidence clamped to [0, 1].
    pub fn normalized(
        label_raw: Option<&str>,
        score: Option<f32>,
        years: Option<f32>,
        confidence: Option<f32>,
        signals: Vec<String>,
    ) -> Self {
        let label = label_raw
            .and_then(LevelLabel::parse)
            .unwrap_or(LevelLabel::Working);
        let score = score
            .filter(|s| s.is_finite())
            .unwrap_or_else(|| label.default_score())
            .clamp(0.0, 4.0);
        let confidence = confidence
            .filter(|c| c.is_finite())
            .unwrap_or(0.6)
            .clamp(0.0, 1.0);
        Self {
            label,
            score,
            years: years.filter(|y| y.is_finite() && *y >= 0.0),
            confidence,
            signals,
        }
    }

    /// Caps the snapshot at `working` (score 2.0). Applied to nice-to-have
    /// job skills without explicit years when `cap_nice_to_have` is set.
    pub fn capped_at_working(mut self) -> Self {
        self.score = self.score.min(LevelLabel::Working.default_score());
        if self.label > LevelLabel::Working {
            self.label = LevelLabel::Working;
        }
        self
    }
}

/// Non-negative gap between a required level and a candidate level.
/// Missing sides default to the `working` score.
pub fn level_delta(candidate: Option<&LevelSnapshot>, required: Option<&LevelSnapshot>) -> f32 {
    let c = candidate.map(|l| l.score).unwrap_or(UNKNOWN_LEVEL_SCORE);
    let r = required.map(|l| l.score).unwrap_or(UNKNOWN_LEVEL_SCORE);
    (r - c).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_ordering_matches_scores() {
        assert!(LevelLabel::None < LevelLabel::Basic);
        assert!(LevelLabel::Working < LevelLabel::Proficient);
        assert!(LevelLabel::Proficient < LevelLabel::Advanced);
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!(LevelLabel::parse("Advanced"), Some(LevelLabel::Advanced));
        assert_eq!(LevelLabel::parse(" working "), Some(LevelLabel::Working));
        assert_eq!(LevelLabel::parse("expert"), None);
    }

    #[test]
    fn test_normalized_clamps_score_to_level_range() {
        let snap = LevelSnapshot::normalized(Some("advanced"), Some(9.0), None, Some(1.5), vec![]);
        assert_eq!(snap.score, 4.0);
        assert_eq!(snap.confidence, 1.0);
    }

    #[test]
    fn test_normalized_defaults_unknown_label_to_working() {
        let snap = LevelSnapshot::normalized(Some("wizard"), None, None, None, vec![]);
        assert_eq!(snap.label, LevelLabel::Working);
        assert_eq!(snap.score, 2.0);
    }

    #[test]
    fn test_normalized_rejects_non_finite_score() {
        let snap =
            LevelSnapshot::normalized(Some("basic"), Some(f32::NAN), None, None, vec![]);
        assert_eq!(snap.score, 1.0);
    }

    #[test]
    fn test_cap_at_working_lowers_label_and_score() {
        let snap = LevelSnapshot::normalized(Some("advanced"), Some(3.8), None, None, vec![])
            .capped_at_working();
        assert_eq!(snap.label, LevelLabel::Working);
        assert_eq!(snap.score, 2.0);
    }

    #[test]
    fn test_cap_keeps_lower_levels_untouched() {
        let snap = LevelSnapshot::normalized(Some("basic"), Some(1.0), None, None, vec![])
            .capped_at_working();
        assert_eq!(snap.label, LevelLabel::Basic);
        assert_eq!(snap.score, 1.0);
    }

    #[test]
    fn test_level_delta_is_non_negative() {
        let strong = LevelSnapshot::normalized(Some("advanced"), Some(4.0), None, None, vec![]);
        let weak = LevelSnapshot::normalized(Some("basic"), Some(1.0), None, None, vec![]);
        assert_eq!(level_delta(Some(&strong), Some(&weak)), 0.0);
        assert_eq!(level_delta(Some(&weak), Some(&strong)), 3.0);
    }

    #[test]
    fn test_level_delta_defaults_missing_sides_to_working() {
        assert_eq!(level_delta(None, None), 0.0);
        let req = LevelSnapshot::normalized(Some("advanced"), Some(3.5), None, None, vec![]);
        assert_eq!(level_delta(None, Some(&req)), 1.5);
    }

    #[test]
    fn test_snapshot_serde_round_trip() {
        let snap = LevelSnapshot {
            label: LevelLabel::Proficient,
            score: 3.2,
            years: Some(5.0),
            confidence: 0.9,
            signals: vec!["explicit years".to_string(), "led team".to_string()],
        };
        let json = serde_json::to_string(&snap).unwrap();
        assert!(json.contains("\"proficient\""));
        let back: LevelSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snap);
    }
}
