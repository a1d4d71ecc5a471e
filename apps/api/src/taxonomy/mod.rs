//! Skills taxonomy: node types and the nearest-neighbor index seam.
//!
//! The index itself is populated offline (O*NET import + embedding pipeline);
//! this service only reads it. Callers go through the [`TaxonomyIndex`] trait
//! so the mapper can be exercised against an in-memory index in tests.

pub mod embedding;

use async_trait::async_trait;
use pgvector::Vector;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::HashMap;

use crate::errors::EngineError;
use crate::taxonomy::embedding::EmbeddingClient;

/// Discriminates ontology nodes: concrete skills vs occupational tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkillType {
    Skill,
    Task,
}

impl SkillType {
    pub fn as_str(self) -> &'static str {
        match self {
            SkillType::Skill => "skill",
            SkillType::Task => "task",
        }
    }
}

/// A canonical taxonomy node with its alternate names attached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillNode {
    pub skill_id: String,
    pub name: String,
    pub taxonomy_path: String,
    pub framework: String,
    pub external_id: Option<String>,
    pub hot_tech: bool,
    pub in_demand: bool,
    pub skill_type: SkillType,
    pub occupation_title: Option<String>,
    pub commodity_title: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
}

/// One nearest-neighbor result: a node plus its cosine-like similarity in [0, 1].
#[derive(Debug, Clone)]
pub struct SkillHit {
    pub node: SkillNode,
    pub score: f32,
}

/// Read-only nearest-neighbor access to the skills ontology.
///
/// Results are ordered by similarity descending; scores are cosine-like in
/// [0, 1]. Implementations must apply the `skill_type` filter server-side.
#[async_trait]
pub trait TaxonomyIndex: Send + Sync {
    async fn query(
        &self,
        text: &str,
        k: usize,
        skill_type: SkillType,
    ) -> Result<Vec<SkillHit>, EngineError>;
}

// ── pgvector-backed index ───────────────────────────────────────────────────

#[derive(Debug, sqlx::FromRow)]
struct SkillHitRow {
    skill_id: String,
    name: String,
    taxonomy_path: String,
    framework: String,
    external_id: Option<String>,
    hot_tech: bool,
    in_demand: bool,
    skill_type: String,
    occupation_title: Option<String>,
    commodity_title: Option<String>,
    aliases: Vec<String>,
    score: f64,
}

/// Production index: query embedding via [`EmbeddingClient`], cosine search
/// over the `skills` table with pgvector.
pub struct PgVectorIndex {
    pool: PgPool,
    embeddings: EmbeddingClient,
}

impl PgVectorIndex {
    pub fn new(pool: PgPool, embeddings: EmbeddingClient) -> Self {
        Self { pool, embeddings }
    }
}

#[async_trait]
impl TaxonomyIndex for PgVectorIndex {
    async fn query(
        &self,
        text: &str,
        k: usize,
        skill_type: SkillType,
    ) -> Result<Vec<SkillHit>, EngineError> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let query_vec = Vector::from(self.embeddings.embed(text).await?);

        let rows = sqlx::query_as::<_, SkillHitRow>(
            r#"
            SELECT s.skill_id, s.name, s.taxonomy_path, s.framework, s.external_id,
                   s.hot_tech, s.in_demand, s.skill_type,
                   s.occupation_title, s.commodity_title,
                   COALESCE(array_agg(a.alias) FILTER (WHERE a.alias IS NOT NULL), '{}') AS aliases,
                   1 - (s.embedding <=> $1) AS score
            FROM skills s
            LEFT JOIN skill_aliases a ON a.skill_id = s.skill_id
            WHERE s.skill_type = $2
            GROUP BY s.id
            ORDER BY s.embedding <=> $1
            LIMIT $3
            "#,
        )
        .bind(&query_vec)
        .bind(skill_type.as_str())
        .bind(k as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| EngineError::VectorIndexUnavailable(format!("skills query: {e}")))?;

        Ok(rows
            .into_iter()
            .map(|r| SkillHit {
                score: (r.score as f32).clamp(0.0, 1.0),
                node: SkillNode {
                    skill_id: r.skill_id,
                    name: r.name,
                    taxonomy_path: r.taxonomy_path,
                    framework: r.framework,
                    external_id: r.external_id,
                    hot_tech: r.hot_tech,
                    in_demand: r.in_demand,
                    skill_type: if r.skill_type == "task" {
                        SkillType::Task
                    } else {
                        SkillType::Skill
                    },
                    occupation_title: r.occupation_title,
                    commodity_title: r.commodity_title,
                    aliases: r.aliases,
                },
            })
            .collect())
    }
}

// ── In-memory index ─────────────────────────────────────────────────────────

/// Deterministic in-memory index, used when running without a populated
/// pgvector store and throughout the mapper tests. Responses are keyed by
/// lowercased query text.
#[derive(Default)]
pub struct StaticIndex {
    responses: HashMap<String, Vec<SkillHit>>,
    queries: std::sync::atomic::AtomicUsize,
}

impl StaticIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the hit list returned for a query string.
    pub fn with_response(mut self, query: &str, hits: Vec<SkillHit>) -> Self {
        self.responses.insert(query.to_lowercase(), hits);
        self
    }

    /// Number of `query` calls issued so far.
    pub fn query_count(&self) -> usize {
        self.queries.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl TaxonomyIndex for StaticIndex {
    async fn query(
        &self,
        text: &str,
        k: usize,
        skill_type: SkillType,
    ) -> Result<Vec<SkillHit>, EngineError> {
        self.queries
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let mut hits: Vec<SkillHit> = self
            .responses
            .get(&text.to_lowercase())
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|h| h.node.skill_type == skill_type)
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(k);
        Ok(hits)
    }
}

/// Convenience constructor for taxonomy nodes in tests.
#[cfg(test)]
pub fn skill_node(skill_id: &str, name: &str, skill_type: SkillType) -> SkillNode {
    SkillNode {
        skill_id: skill_id.to_string(),
        name: name.to_string(),
        taxonomy_path: format!("ONET/{}/{}", skill_type.as_str().to_uppercase(), skill_id),
        framework: "onet".to_string(),
        external_id: None,
        hot_tech: false,
        in_demand: false,
        skill_type,
        occupation_title: None,
        commodity_title: None,
        aliases: Vec::new(),
    }
}
