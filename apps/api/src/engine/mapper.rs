//! Taxonomy mapper: free-text skill tokens to canonical ontology nodes via
//! nearest-neighbor search, under an adaptive confidence gate.
//!
//! Per token the mapper issues a vector query, derives a cutoff (static floor
//! or per-query quantile), applies the literal-text guard, and then lets the
//! gate react to weak confidence signals: raise `topk`, switch the retrieval
//! recipe, or nudge the floor — each at most once, with a hard bound of
//! `max_retries` re-queries. Token failures are never fatal; everything is
//! recorded in diagnostics.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use crate::engine::config::{CragConfig, MatchStrategyConfig, MatchStrategyKind};
use crate::engine::levels::LevelSnapshot;
use crate::engine::schemas::{MappedOrigin, MappedSkill, SkillDescriptor};
use crate::errors::EngineError;
use crate::taxonomy::{SkillHit, SkillNode, SkillType, TaxonomyIndex};

/// Step applied when the gate nudges the similarity floor.
const FLOOR_NUDGE: f64 = 0.05;
/// Upper bound the nudged floor may not exceed.
const FLOOR_CEIL: f64 = 0.95;

/// Which document a token came from; drives floors and quantiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Resume,
    Jd,
    Task,
}

impl SourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceType::Resume => "resume",
            SourceType::Jd => "jd",
            SourceType::Task => "task",
        }
    }
}

fn floor_for(cfg: &MatchStrategyConfig, source: SourceType) -> f64 {
    match source {
        SourceType::Resume => cfg.resume_floor,
        SourceType::Jd => cfg.jd_floor,
        SourceType::Task => cfg.task_floor,
    }
}

fn quantile_for(cfg: &MatchStrategyConfig, source: SourceType) -> f64 {
    match source {
        SourceType::Resume => cfg.resume_q,
        SourceType::Jd => cfg.jd_q,
        SourceType::Task => cfg.task_q,
    }
}

/// One skill token plus the extractor context the mapper threads through to
/// the mapped output.
#[derive(Debug, Clone)]
pub struct SkillTokenInput {
    pub token: String,
    pub level: LevelSnapshot,
    /// Job side only: false when the skill was flagged nice-to-have.
    pub is_required: Option<bool>,
}

/// A gate decision taken for one token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum GateAction {
    IncreaseTopk { by: usize },
    SwitchRecipe { to: String },
    NudgeFloor { delta: f64 },
    ConservativeFallback,
    Unmapped,
}

/// Full mapping record for one token.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TokenDiagnostics {
    pub token: String,
    pub source_type: Option<SourceType>,
    pub total_hits: usize,
    pub accepted_count: usize,
    pub dropped_count: usize,
    pub literal_rejected: usize,
    pub cutoff_used: Option<f64>,
    pub topk_used: usize,
    pub queries_issued: usize,
    pub actions: Vec<GateAction>,
    pub top_scores: Vec<f32>,
    pub mapped: bool,
}

/// Aggregate of gate activity across one request.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GateSummary {
    pub tokens_processed: usize,
    pub tasks_processed: usize,
    pub total_mapped: usize,
    pub total_unmapped: usize,
    pub literal_rejected: usize,
    pub topk_bumps: usize,
    pub recipe_switches: usize,
    pub floor_nudges: usize,
    pub conservative_fallbacks: usize,
}

/// Everything the mapper learned during one request.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MappingDiagnostics {
    pub strategy: String,
    pub average_cutoff: Option<f64>,
    pub gate_summary: GateSummary,
    pub skill_diagnostics: Vec<TokenDiagnostics>,
    pub task_diagnostics: Vec<TokenDiagnostics>,
}

/// Per-request mapper. Constructed with the request's effective
/// configuration; accumulates diagnostics across `map_tokens` / `map_tasks`
/// calls until [`TaxonomyMapper::take_diagnostics`].
pub struct TaxonomyMapper {
    index: Arc<dyn TaxonomyIndex>,
    strategy: MatchStrategyConfig,
    crag: CragConfig,
    skill_diags: Vec<TokenDiagnostics>,
    task_diags: Vec<TokenDiagnostics>,
}

impl TaxonomyMapper {
    pub fn new(
        index: Arc<dyn TaxonomyIndex>,
        strategy: MatchStrategyConfig,
        crag: CragConfig,
    ) -> Self {
        Self {
            index,
            strategy,
            crag,
            skill_diags: Vec::new(),
            task_diags: Vec::new(),
        }
    }

    /// Maps skill tokens to taxonomy nodes, attaching the extractor's level
    /// on the side implied by `source_type`. Unmapped tokens are dropped
    /// from the output and recorded in diagnostics.
    pub async fn map_tokens(
        &mut self,
        inputs: &[SkillTokenInput],
        source_type: SourceType,
        source_text: &str,
    ) -> Result<Vec<MappedSkill>, EngineError> {
        let mut out = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        for input in inputs {
            let token = input.token.trim();
            if token.is_empty() {
                continue;
            }

            let (hit, diag) = self.map_one(token, source_type, source_text).await?;
            self.skill_diags.push(diag);

            let Some(hit) = hit else { continue };
            if !seen.insert(hit.node.skill_id.clone()) {
                continue;
            }

            let mut mapped = MappedSkill {
                descriptor: SkillDescriptor::from(&hit.node),
                token: token.to_string(),
                score: hit.score,
                origin: match source_type {
                    SourceType::Resume => MappedOrigin::Resume,
                    _ => MappedOrigin::Job,
                },
                candidate_level: None,
                required_level: None,
                is_required: None,
            };
            match source_type {
                SourceType::Resume => mapped.candidate_level = Some(input.level.clone()),
                _ => {
                    mapped.required_level = Some(input.level.clone());
                    mapped.is_required = input.is_required;
                }
            }
            out.push(mapped);
        }

        Ok(out)
    }

    /// Maps responsibility texts against the task side of the ontology.
    pub async fn map_tasks(
        &mut self,
        task_texts: &[String],
        source_text: &str,
    ) -> Result<Vec<MappedSkill>, EngineError> {
        let mut out = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        for text in task_texts {
            let token = text.trim();
            if token.is_empty() {
                continue;
            }

            let (hit, diag) = self.map_one(token, SourceType::Task, source_text).await?;
            self.task_diags.push(diag);

            let Some(hit) = hit else { continue };
            if !seen.insert(hit.node.skill_id.clone()) {
                continue;
            }

            out.push(MappedSkill {
                descriptor: SkillDescriptor::from(&hit.node),
                token: token.to_string(),
                score: hit.score,
                origin: MappedOrigin::Task,
                candidate_level: None,
                required_level: None,
                is_required: None,
            });
        }

        Ok(out)
    }

    /// Drains the accumulated diagnostics for this request.
    pub fn take_diagnostics(&mut self) -> MappingDiagnostics {
        let skill_diagnostics = std::mem::take(&mut self.skill_diags);
        let task_diagnostics = std::mem::take(&mut self.task_diags);

        let all = skill_diagnostics.iter().chain(task_diagnostics.iter());
        let mut summary = GateSummary {
            tokens_processed: skill_diagnostics.len(),
            tasks_processed: task_diagnostics.len(),
            ..GateSummary::default()
        };
        let mut cutoffs: Vec<f64> = Vec::new();
        for d in all {
            if d.mapped {
                summary.total_mapped += 1;
            } else {
                summary.total_unmapped += 1;
            }
            summary.literal_rejected += d.literal_rejected;
            if let Some(c) = d.cutoff_used {
                cutoffs.push(c);
            }
            for action in &d.actions {
                match action {
                    GateAction::IncreaseTopk { .. } => summary.topk_bumps += 1,
                    GateAction::SwitchRecipe { .. } => summary.recipe_switches += 1,
                    GateAction::NudgeFloor { .. } => summary.floor_nudges += 1,
                    GateAction::ConservativeFallback => summary.conservative_fallbacks += 1,
                    GateAction::Unmapped => {}
                }
            }
        }

        MappingDiagnostics {
            strategy: self.strategy.strategy.as_str().to_string(),
            average_cutoff: if cutoffs.is_empty() {
                None
            } else {
                Some(cutoffs.iter().sum::<f64>() / cutoffs.len() as f64)
            },
            gate_summary: summary,
            skill_diagnostics,
            task_diagnostics,
        }
    }

    /// Runs the gate loop for one token.
    ///
    /// Issues at most `max_retries + 1` vector queries. Each gate action
    /// fires at most once; exhaustion falls back to the raw top-1 hit when
    /// it clears the floor, otherwise the token stays unmapped.
    async fn map_one(
        &self,
        token: &str,
        source_type: SourceType,
        source_text: &str,
    ) -> Result<(Option<SkillHit>, TokenDiagnostics), EngineError> {
        let expected_type = match source_type {
            SourceType::Task => SkillType::Task,
            _ => SkillType::Skill,
        };
        let quantile_q = quantile_for(&self.strategy, source_type);

        let mut topk = self.strategy.topk.min(self.crag.max_topk);
        let mut filter = expected_type;
        let mut floor = floor_for(&self.strategy, source_type);
        let mut bumped = false;
        let mut switched = false;
        let mut nudged = false;

        let mut diag = TokenDiagnostics {
            token: token.to_string(),
            source_type: Some(source_type),
            ..TokenDiagnostics::default()
        };

        let source_lower = source_text.to_lowercase();
        let mut last_hits: Vec<SkillHit> = Vec::new();

        for _ in 0..=self.crag.max_retries {
            let mut hits = self.index.query(token, topk, filter).await?;
            hits.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            diag.queries_issued += 1;
            diag.topk_used = topk;
            diag.total_hits = hits.len();
            diag.top_scores = hits.iter().take(3).map(|h| h.score).collect();

            let cutoff = match self.strategy.strategy {
                MatchStrategyKind::Static => self.strategy.static_threshold,
                MatchStrategyKind::Quantile => {
                    let scores: Vec<f32> = hits.iter().map(|h| h.score).collect();
                    if scores.is_empty() {
                        floor
                    } else {
                        floor.max(quantile(&scores, quantile_q))
                    }
                }
            };
            diag.cutoff_used = Some(cutoff);

            let above: Vec<&SkillHit> = hits
                .iter()
                .filter(|h| f64::from(h.score) >= cutoff)
                .collect();
            let (kept, rejected): (Vec<&SkillHit>, Vec<&SkillHit>) =
                if self.strategy.lexical_guard {
                    above
                        .iter()
                        .copied()
                        .partition(|h| passes_literal_guard(token, &h.node, &source_lower))
                } else {
                    (above.clone(), Vec::new())
                };

            let accepted_count = kept.len();
            let margin = if kept.len() >= 2 {
                f64::from(kept[0].score - kept[1].score)
            } else {
                f64::INFINITY
            };
            let literal_reject_rate = rejected.len() as f64 / above.len().max(1) as f64;

            diag.accepted_count = accepted_count;
            diag.dropped_count = hits.len() - above.len();
            diag.literal_rejected = rejected.len();

            // Owned copy of the winning hit so the borrow of `hits` can end
            // before the gate arms move `hits` into `last_hits`.
            let best = best_hit(&kept, token);

            // Gate evaluation: each arm fires at most once per token.
            if accepted_count < self.crag.min_hits && !bumped && topk < self.crag.max_topk {
                let by = self.crag.bump_topk_by.min(self.crag.max_topk - topk);
                topk += by;
                bumped = true;
                diag.actions.push(GateAction::IncreaseTopk { by });
                last_hits = hits;
                continue;
            }
            if margin < self.crag.min_margin && self.crag.allow_recipe_switch && !switched {
                filter = match expected_type {
                    SkillType::Skill => SkillType::Task,
                    SkillType::Task => SkillType::Skill,
                };
                switched = true;
                diag.actions.push(GateAction::SwitchRecipe {
                    to: format!("{}_first", filter.as_str()),
                });
                last_hits = hits;
                continue;
            }
            if literal_reject_rate > 0.5 && self.strategy.lexical_guard && !nudged {
                floor = (floor + FLOOR_NUDGE).min(FLOOR_CEIL);
                nudged = true;
                diag.actions.push(GateAction::NudgeFloor { delta: FLOOR_NUDGE });
                last_hits = hits;
                continue;
            }

            // Accept the current top hit, if any.
            diag.mapped = best.is_some();
            if best.is_none() {
                diag.actions.push(GateAction::Unmapped);
                debug!(token, "Token left unmapped by gate");
            }
            return Ok((best, diag));
        }

        // Budget exhausted: conservative fallback on the raw top-1.
        let fallback = last_hits
            .first()
            .filter(|h| f64::from(h.score) >= floor)
            .cloned();
        diag.mapped = fallback.is_some();
        diag.actions.push(if fallback.is_some() {
            GateAction::ConservativeFallback
        } else {
            GateAction::Unmapped
        });
        if fallback.is_none() {
            debug!(token, "Token unmapped after gate budget exhausted");
        }
        Ok((fallback, diag))
    }
}

/// Picks the best accepted hit. Exact score ties prefer the canonical name
/// closest to the token by edit distance, then the lexicographically
/// smallest stable identifier.
fn best_hit(kept: &[&SkillHit], token: &str) -> Option<SkillHit> {
    let top_score = kept.first()?.score;
    let token_lower = token.to_lowercase();
    kept.iter()
        .filter(|h| h.score == top_score)
        .min_by_key(|h| {
            (
                levenshtein(&h.node.name.to_lowercase(), &token_lower),
                h.node.skill_id.clone(),
            )
        })
        .map(|h| (**h).clone())
}

/// Literal-text guard: the original token, the canonical name, or one of its
/// aliases must appear as a token-bounded, case-insensitive substring of the
/// source text. Suppresses phantom matches driven by semantic neighborhood
/// alone; the token branch matters most for canonicalised names and task
/// phrases, whose surface form is what the text actually contains.
fn passes_literal_guard(token: &str, node: &SkillNode, source_lower: &str) -> bool {
    if contains_token_bounded(source_lower, &token.to_lowercase()) {
        return true;
    }
    if contains_token_bounded(source_lower, &node.name.to_lowercase()) {
        return true;
    }
    node.aliases
        .iter()
        .any(|a| contains_token_bounded(source_lower, &a.to_lowercase()))
}

/// True when `needle` occurs in `haystack` with non-alphanumeric characters
/// (or string edges) on both sides. Both arguments must already be
/// lowercased.
pub fn contains_token_bounded(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    for (idx, _) in haystack.match_indices(needle) {
        let before_ok = haystack[..idx]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_alphanumeric());
        let after = idx + needle.len();
        let after_ok = haystack[after..]
            .chars()
            .next()
            .map_or(true, |c| !c.is_alphanumeric());
        if before_ok && after_ok {
            return true;
        }
    }
    false
}

/// Linearly interpolated quantile over unsorted scores (ascending rank).
fn quantile(scores: &[f32], q: f64) -> f64 {
    if scores.is_empty() {
        return 0.0;
    }
    let mut sorted: Vec<f64> = scores.iter().map(|s| f64::from(*s)).collect();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    if lo == hi {
        return sorted[lo];
    }
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

/// Levenshtein (edit) distance, two-row DP.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    if a_chars.is_empty() {
        return b_chars.len();
    }
    if b_chars.is_empty() {
        return a_chars.len();
    }

    let mut prev_row: Vec<usize> = (0..=b_chars.len()).collect();
    let mut curr_row: Vec<usize> = vec![0; b_chars.len() + 1];

    for (i, a_char) in a_chars.iter().enumerate() {
        curr_row[0] = i + 1;
        for (j, b_char) in b_chars.iter().enumerate() {
            let cost = usize::from(a_char != b_char);
            curr_row[j + 1] = (prev_row[j + 1] + 1)
                .min(curr_row[j] + 1)
                .min(prev_row[j] + cost);
        }
        std::mem::swap(&mut prev_row, &mut curr_row);
    }

    prev_row[b_chars.len()]
}
