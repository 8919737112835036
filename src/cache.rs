//! Feedback cache store: transcript-hash keyed feedback artifacts with
//! TTL-based lazy expiry and day-scoped hit/miss accounting.
//!
//! Expiry is lazy on read (an expired row counts as a miss even if it still
//! physically exists); `cleanup_expired` is the only eager deletion path.
//! Counters live in the database, not process memory, so they survive across
//! invocations and across instances.

use chrono::Utc;
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::feedback::FeedbackArtifact;

/// Result of a cache lookup. Expired entries are reported as `Miss`.
#[derive(Debug)]
pub enum CacheLookup {
    Hit(FeedbackArtifact),
    Miss,
}

impl CacheLookup {
    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit(_))
    }
}

/// Day-scoped hit/miss counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub day: String,
    pub hits: i64,
    pub misses: i64,
}

impl CacheStats {
    /// Fraction of lookups served from cache, 0.0 when no lookups yet.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Store for cached feedback artifacts.
#[derive(Clone)]
pub struct FeedbackCacheStore {
    pool: Pool<Sqlite>,
}

impl FeedbackCacheStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Look up a cached artifact by key.
    ///
    /// A live entry increments its `hits` counter and `last_accessed` in the
    /// same statement that reads it, so a returned hit always corresponds to
    /// exactly one hit increment. Every call increments exactly one of the
    /// day's hit/miss counters.
    pub async fn lookup(&self, key: &str) -> Result<CacheLookup> {
        let now = Utc::now().timestamp();

        let row = sqlx::query(
            r#"
            UPDATE feedback_cache
            SET hits = hits + 1, last_accessed = ?
            WHERE key = ? AND expires_at > ?
            RETURNING value
            "#,
        )
        .bind(now)
        .bind(key)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let raw: String = row.get("value");
                let artifact: FeedbackArtifact = serde_json::from_str(&raw)
                    .map_err(|e| Error::Internal(format!("corrupt cache entry {key}: {e}")))?;
                self.bump_stats(1, 0).await?;
                debug!(key, "feedback cache hit");
                Ok(CacheLookup::Hit(artifact))
            }
            None => {
                self.bump_stats(0, 1).await?;
                debug!(key, "feedback cache miss");
                Ok(CacheLookup::Miss)
            }
        }
    }

    /// Insert or overwrite an entry with a fresh TTL and zeroed hit counter.
    ///
    /// Concurrent misses for the same key may both generate and both put;
    /// last writer wins, which keeps the store consistent since both wrote an
    /// artifact for the same transcript.
    pub async fn put(
        &self,
        key: &str,
        artifact: &FeedbackArtifact,
        ttl_seconds: i64,
    ) -> Result<()> {
        let now = Utc::now().timestamp();
        let value = serde_json::to_string(artifact)
            .map_err(|e| Error::Internal(format!("failed to serialize artifact: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO feedback_cache (key, value, created_at, expires_at, hits, last_accessed)
            VALUES (?, ?, ?, ?, 0, NULL)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                created_at = excluded.created_at,
                expires_at = excluded.expires_at,
                hits = 0,
                last_accessed = NULL
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(now)
        .bind(now + ttl_seconds)
        .execute(&self.pool)
        .await?;

        debug!(key, ttl_seconds, "feedback cached");
        Ok(())
    }

    /// Read an entry without touching counters. Expired entries are still
    /// treated as absent.
    pub async fn peek(&self, key: &str) -> Result<Option<FeedbackArtifact>> {
        let now = Utc::now().timestamp();
        let row = sqlx::query("SELECT value FROM feedback_cache WHERE key = ? AND expires_at > ?")
            .bind(key)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let raw: String = row.get("value");
                let artifact = serde_json::from_str(&raw)
                    .map_err(|e| Error::Internal(format!("corrupt cache entry {key}: {e}")))?;
                Ok(Some(artifact))
            }
            None => Ok(None),
        }
    }

    /// Delete every entry that can no longer be served as a hit, matching
    /// the `expires_at > now` liveness test in `lookup`. Returns the number
    /// removed.
    pub async fn cleanup_expired(&self) -> Result<u64> {
        let now = Utc::now().timestamp();
        let result = sqlx::query("DELETE FROM feedback_cache WHERE expires_at <= ?")
            .bind(now)
            .execute(&self.pool)
            .await?;
        let removed = result.rows_affected();
        if removed > 0 {
            info!(removed, "expired feedback cache entries removed");
        }
        Ok(removed)
    }

    /// Hit/miss counters for the current UTC day.
    pub async fn stats(&self) -> Result<CacheStats> {
        let day = Utc::now().format("%Y-%m-%d").to_string();
        let row = sqlx::query("SELECT hits, misses FROM cache_stats WHERE day = ?")
            .bind(&day)
            .fetch_optional(&self.pool)
            .await?;

        Ok(match row {
            Some(row) => CacheStats {
                day,
                hits: row.get("hits"),
                misses: row.get("misses"),
            },
            None => CacheStats {
                day,
                hits: 0,
                misses: 0,
            },
        })
    }

    /// Hits recorded on a single entry, for tests and diagnostics.
    pub async fn entry_hits(&self, key: &str) -> Result<Option<i64>> {
        let row = sqlx::query("SELECT hits FROM feedback_cache WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get("hits")))
    }

    /// Best-effort counter bump; last-writer-wins accuracy is acceptable.
    async fn bump_stats(&self, hits: i64, misses: i64) -> Result<()> {
        let day = Utc::now().format("%Y-%m-%d").to_string();
        sqlx::query(
            r#"
            INSERT INTO cache_stats (day, hits, misses) VALUES (?, ?, ?)
            ON CONFLICT(day) DO UPDATE SET
                hits = hits + excluded.hits,
                misses = misses + excluded.misses
            "#,
        )
        .bind(day)
        .bind(hits)
        .bind(misses)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
