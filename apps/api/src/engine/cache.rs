//! Extraction cache: content-hash-keyed memoisation of extractor output.
//!
//! Makes extraction idempotent and safe under concurrent identical requests.
//! The row lock (`FOR UPDATE SKIP LOCKED`) guarantees at most one compute in
//! flight per key; losers of the race wait out a short join window and then
//! surface `ExtractionPending`. There is no TTL — callers invalidate by
//! bumping `extractor_version`, `model_id`, or `prompt_version`.

use serde_json::Value;
use sha2::{Digest, Sha256};
use sqlx::types::Json;
use sqlx::PgPool;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::engine::extractor::{ExtractionOutput, SkillExtractor};
use crate::errors::EngineError;

/// How long a raced caller waits for the in-flight compute before giving up
/// with `ExtractionPending`.
const JOIN_WINDOW: Duration = Duration::from_millis(2500);

/// Document side of the cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocType {
    Resume,
    Jd,
}

impl DocType {
    pub fn as_str(self) -> &'static str {
        match self {
            DocType::Resume => "resume",
            DocType::Jd => "jd",
        }
    }
}

/// The full unique key of one cache row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    pub doc_type: DocType,
    pub text_sha256: String,
    pub extractor_version: String,
    pub model_id: String,
    pub prompt_version: String,
}

impl CacheKey {
    /// Builds the key for a document: content hash of the normalised text
    /// plus the extractor's identity components.
    pub fn for_text(doc_type: DocType, text: &str, extractor: &dyn SkillExtractor) -> Self {
        Self {
            doc_type,
            text_sha256: content_hash(text),
            extractor_version: extractor.version().to_string(),
            model_id: extractor.model_id().to_string(),
            prompt_version: extractor.prompt_version().to_string(),
        }
    }
}

/// Lowercases, trims, and collapses whitespace runs. Punctuation is
/// semantically significant to the extractor and must survive.
pub fn normalize_text(text: &str) -> String {
    text.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Hex SHA-256 of the normalised text.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_text(text).as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, sqlx::FromRow)]
struct CacheRowLite {
    status: String,
    result_json: Option<Json<Value>>,
}

/// Persistent extraction cache over the `extraction_cache` table.
#[derive(Clone)]
pub struct ExtractionCache {
    pool: PgPool,
}

impl ExtractionCache {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Returns the cached output for `key`, computing it exactly once across
    /// concurrent callers when absent.
    ///
    /// Flow: ensure a `running` row exists (insert-if-absent), then take the
    /// row lock with skip-locked semantics. The lock holder computes and
    /// finalises the row to `ready` or `failed`; everyone else either reads
    /// a `ready` row or waits out the join window.
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: &CacheKey,
        compute: F,
    ) -> Result<ExtractionOutput, EngineError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ExtractionOutput, EngineError>>,
    {
        // Step 1: make the row exist. Losing this insert race is fine — the
        // unique key guarantees a single row either way.
        sqlx::query(
            r#"
            INSERT INTO extraction_cache
                (id, doc_type, text_sha256, extractor_version, model_id, prompt_version, status)
            VALUES (gen_random_uuid(), $1, $2, $3, $4, $5, 'running')
            ON CONFLICT (doc_type, text_sha256, extractor_version, model_id, prompt_version)
            DO NOTHING
            "#,
        )
        .bind(key.doc_type.as_str())
        .bind(&key.text_sha256)
        .bind(&key.extractor_version)
        .bind(&key.model_id)
        .bind(&key.prompt_version)
        .execute(&self.pool)
        .await?;

        // Step 2: try to take the row lock.
        let mut tx = self.pool.begin().await?;
        let locked: Option<CacheRowLite> = sqlx::query_as(
            r#"
            SELECT status, result_json FROM extraction_cache
            WHERE doc_type = $1 AND text_sha256 = $2
              AND extractor_version = $3 AND model_id = $4 AND prompt_version = $5
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(key.doc_type.as_str())
        .bind(&key.text_sha256)
        .bind(&key.extractor_version)
        .bind(&key.model_id)
        .bind(&key.prompt_version)
        .fetch_optional(&mut *tx)
        .await?;

        match locked {
            Some(row) if row.status == "ready" => {
                tx.commit().await?;
                debug!(hash = %key.text_sha256, "Extraction cache hit");
                parse_cached(row.result_json)
            }
            Some(row) => {
                // We hold the lock: a fresh `running` row of ours, a stale
                // `running` row whose owner died, or a `failed` row being
                // re-attempted. All three mean we compute.
                if row.status == "failed" {
                    info!(hash = %key.text_sha256, "Re-attempting previously failed extraction");
                }
                match compute().await {
                    Ok(output) => {
                        let payload = serde_json::to_value(&output).map_err(|e| {
                            EngineError::ExtractionFailed(format!(
                                "failed to serialize extraction output: {e}"
                            ))
                        })?;
                        self.finalize(&mut tx, key, "ready", Some(&payload)).await?;
                        tx.commit().await?;
                        Ok(output)
                    }
                    Err(e) => {
                        warn!(hash = %key.text_sha256, "Extraction compute failed: {e}");
                        self.finalize(&mut tx, key, "failed", None).await?;
                        tx.commit().await?;
                        Err(e)
                    }
                }
            }
            None => {
                // The row exists but another worker holds its lock. Wait out
                // the join window and re-read once.
                tx.rollback().await?;
                debug!(hash = %key.text_sha256, "Joining in-flight extraction");
                tokio::time::sleep(JOIN_WINDOW).await;

                match self.peek(key).await? {
                    Some(row) if row.status == "ready" => parse_cached(row.result_json),
                    _ => Err(EngineError::ExtractionPending),
                }
            }
        }
    }

    async fn finalize(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        key: &CacheKey,
        status: &str,
        result: Option<&Value>,
    ) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            UPDATE extraction_cache
            SET status = $6, result_json = $7, updated_at = now()
            WHERE doc_type = $1 AND text_sha256 = $2
              AND extractor_version = $3 AND model_id = $4 AND prompt_version = $5
            "#,
        )
        .bind(key.doc_type.as_str())
        .bind(&key.text_sha256)
        .bind(&key.extractor_version)
        .bind(&key.model_id)
        .bind(&key.prompt_version)
        .bind(status)
        .bind(result.map(Json))
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn peek(&self, key: &CacheKey) -> Result<Option<CacheRowLite>, EngineError> {
        Ok(sqlx::query_as(
            r#"
            SELECT status, result_json FROM extraction_cache
            WHERE doc_type = $1 AND text_sha256 = $2
              AND extractor_version = $3 AND model_id = $4 AND prompt_version = $5
            "#,
        )
        .bind(key.doc_type.as_str())
        .bind(&key.text_sha256)
        .bind(&key.extractor_version)
        .bind(&key.model_id)
        .bind(&key.prompt_version)
        .fetch_optional(&self.pool)
        .await?)
    }
}

fn parse_cached(result_json: Option<Json<Value>>) -> Result<ExtractionOutput, EngineError> {
    let Json(value) = result_json.ok_or_else(|| {
        EngineError::ExtractionFailed("ready cache row has no result payload".to_string())
    })?;
    serde_json::from_value(value)
        .map_err(|e| EngineError::ExtractionFailed(format!("cache row payload corrupt: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::extractor::KeywordExtractor;

    #[test]
    fn test_normalize_collapses_whitespace_and_lowercases() {
        assert_eq!(
            normalize_text("  Senior   Rust\n\nEngineer\t(Remote) "),
            "senior rust engineer (remote)"
        );
    }

    #[test]
    fn test_normalize_preserves_punctuation() {
        assert_eq!(normalize_text("C++, C#; Node.js!"), "c++, c#; node.js!");
    }

    #[test]
    fn test_content_hash_is_whitespace_and_case_insensitive() {
        assert_eq!(
            content_hash("Python and SQL"),
            content_hash("  python   AND\nsql ")
        );
    }

    #[test]
    fn test_content_hash_differs_on_punctuation() {
        assert_ne!(content_hash("C++"), content_hash("C"));
    }

    #[test]
    fn test_cache_key_includes_extractor_identity() {
        let key = CacheKey::for_text(DocType::Resume, "some resume", &KeywordExtractor);
        assert_eq!(key.doc_type, DocType::Resume);
        assert_eq!(key.extractor_version, "kw-1");
        assert_eq!(key.model_id, "deterministic-keyword");
        assert_eq!(key.prompt_version, "none");
        assert_eq!(key.text_sha256.len(), 64);
    }

    #[test]
    fn test_same_text_same_key_components() {
        let a = CacheKey::for_text(DocType::Jd, "Python required", &KeywordExtractor);
        let b = CacheKey::for_text(DocType::Jd, "python   REQUIRED", &KeywordExtractor);
        assert_eq!(a, b);

        let c = CacheKey::for_text(DocType::Resume, "Python required", &KeywordExtractor);
        assert_ne!(a, c);
    }
}
