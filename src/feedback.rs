//! Feedback artifact types and the external AI generator boundary.
//!
//! Generation itself is an opaque remote call. The service only needs a
//! deterministic request/response shape so results can be cached by
//! transcript hash; the trait keeps the HTTP client swappable in tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use std::sync::Arc;

use crate::cache::{CacheLookup, FeedbackCacheStore};
use crate::error::{Error, Result};
use crate::hashing::{self, TranscriptTurn};

/// AI-produced feedback for one interview transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackArtifact {
    /// Overall score, 0-100.
    pub total_score: i64,
    pub strengths: Vec<String>,
    pub areas_for_improvement: Vec<String>,
    pub final_assessment: String,
    /// Model identifier reported by the generator, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub generated_at: DateTime<Utc>,
}

/// Opaque remote feedback generator.
#[async_trait]
pub trait FeedbackGenerator: Send + Sync {
    async fn generate(&self, transcript: &[TranscriptTurn]) -> Result<FeedbackArtifact>;
}

/// HTTP-backed generator posting the transcript to a configured AI service.
pub struct HttpFeedbackGenerator {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpFeedbackGenerator {
    pub fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    transcript: &'a [TranscriptTurn],
}

#[async_trait]
impl FeedbackGenerator for HttpFeedbackGenerator {
    async fn generate(&self, transcript: &[TranscriptTurn]) -> Result<FeedbackArtifact> {
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&GenerateRequest { transcript })
            .send()
            .await
            .map_err(|e| Error::Upstream(format!("feedback generator request failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(Error::Upstream(format!(
                "feedback generator returned {}",
                resp.status()
            )));
        }

        resp.json::<FeedbackArtifact>()
            .await
            .map_err(|e| Error::Upstream(format!("invalid feedback generator response: {e}")))
    }
}

/// Result of a feedback submission: the stable content-hash id of the
/// artifact, the artifact itself, and whether it came from cache.
#[derive(Debug)]
pub struct FeedbackOutcome {
    pub feedback_id: String,
    pub artifact: FeedbackArtifact,
    pub cached: bool,
}

/// Orchestrates one feedback request: hash the transcript, serve from cache
/// on a hit, otherwise call the generator and store the result.
#[derive(Clone)]
pub struct FeedbackService {
    cache: FeedbackCacheStore,
    generator: Arc<dyn FeedbackGenerator>,
    ttl_seconds: i64,
}

impl FeedbackService {
    pub fn new(
        cache: FeedbackCacheStore,
        generator: Arc<dyn FeedbackGenerator>,
        ttl_seconds: i64,
    ) -> Self {
        Self {
            cache,
            generator,
            ttl_seconds,
        }
    }

    pub async fn submit(&self, transcript: &[TranscriptTurn]) -> Result<FeedbackOutcome> {
        if transcript.is_empty() {
            return Err(Error::InvalidInput("transcript must not be empty".into()));
        }

        let key = hashing::hash_conversation(transcript);

        if let CacheLookup::Hit(artifact) = self.cache.lookup(&key).await? {
            return Ok(FeedbackOutcome {
                feedback_id: key,
                artifact,
                cached: true,
            });
        }

        let gen_start = std::time::Instant::now();
        let generated = self.generator.generate(transcript).await;
        crate::metrics::record_generation(
            generated.is_ok(),
            gen_start.elapsed().as_millis() as u64,
        );
        let artifact = generated?;

        if let Err(e) = self.cache.put(&key, &artifact, self.ttl_seconds).await {
            // A failed cache write does not fail the request.
            tracing::warn!(key = %key, error = %e, "failed to cache feedback");
        }

        Ok(FeedbackOutcome {
            feedback_id: key,
            artifact,
            cached: false,
        })
    }
}
