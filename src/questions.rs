//! Question set cache: reuse previously generated interview questions for
//! identical (role, level, type, count) requests.
//!
//! Entries never expire. Multiple sets may coexist for the same composite
//! key; `find` prefers the highest-rated set and breaks ties by recency.
//! Usage counters are best-effort and may drift under concurrent increments.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Row, Sqlite};
use tracing::debug;
use uuid::Uuid;

use crate::error::{Error, Result};

/// A single generated interview question.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub text: String,
    pub category: String,
    pub difficulty: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ideal_answer: Option<String>,
}

/// A cached set of questions plus reuse metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionSetEntry {
    pub id: String,
    pub role: String,
    pub level: String,
    pub interview_type: String,
    pub question_count: i64,
    pub questions: Vec<Question>,
    pub usage_count: i64,
    pub average_rating: f64,
}

/// Store for cached question sets.
#[derive(Clone)]
pub struct QuestionCacheStore {
    pool: Pool<Sqlite>,
}

impl QuestionCacheStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Exact-match lookup on the composite key. When several sets match,
    /// returns the highest-rated one, most recent first on ties.
    pub async fn find(
        &self,
        role: &str,
        level: &str,
        interview_type: &str,
        question_count: i64,
    ) -> Result<Option<QuestionSetEntry>> {
        let row = sqlx::query(
            r#"
            SELECT id, role, level, interview_type, question_count,
                   questions, usage_count, average_rating
            FROM question_sets
            WHERE role = ? AND level = ? AND interview_type = ? AND question_count = ?
            ORDER BY average_rating DESC, created_at DESC
            LIMIT 1
            "#,
        )
        .bind(role)
        .bind(level)
        .bind(interview_type)
        .bind(question_count)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let raw: String = row.get("questions");
                let questions: Vec<Question> = serde_json::from_str(&raw).map_err(|e| {
                    Error::Internal(format!("corrupt question set {}: {e}", row.get::<String, _>("id")))
                })?;
                Ok(Some(QuestionSetEntry {
                    id: row.get("id"),
                    role: row.get("role"),
                    level: row.get("level"),
                    interview_type: row.get("interview_type"),
                    question_count: row.get("question_count"),
                    questions,
                    usage_count: row.get("usage_count"),
                    average_rating: row.get("average_rating"),
                }))
            }
            None => Ok(None),
        }
    }

    /// Insert a new question set. Does not deduplicate: a second set for the
    /// same composite key coexists with the first.
    pub async fn store(
        &self,
        role: &str,
        level: &str,
        interview_type: &str,
        question_count: i64,
        questions: &[Question],
        owner_id: Option<&str>,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let serialized = serde_json::to_string(questions)
            .map_err(|e| Error::Internal(format!("failed to serialize questions: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO question_sets
                (id, role, level, interview_type, question_count, questions,
                 owner_id, usage_count, average_rating, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, 0, 0, ?)
            "#,
        )
        .bind(&id)
        .bind(role)
        .bind(level)
        .bind(interview_type)
        .bind(question_count)
        .bind(serialized)
        .bind(owner_id)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        debug!(%id, role, level, interview_type, question_count, "question set stored");
        Ok(id)
    }

    /// Count one reuse of a set. Best-effort under races; attribution is
    /// logged, not persisted per use.
    pub async fn record_usage(&self, id: &str, user_id: &str, session_id: &str) -> Result<()> {
        let result = sqlx::query("UPDATE question_sets SET usage_count = usage_count + 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("question set {id}")));
        }

        debug!(id, user_id, session_id, "question set reused");
        Ok(())
    }
}
