//! HTTP server for prepgate.
//!
//! REST endpoints for feedback submission (with transcript-hash caching),
//! cache statistics, question set reuse, and the M-Pesa payment flow:
//! initiation, gateway callback, access check, and consumption.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Instant;

use axum::http::StatusCode;
use eyre::Result;
use governor::{Quota, RateLimiter};
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::cache::FeedbackCacheStore;
use crate::error::Error;
use crate::feedback::{FeedbackGenerator, FeedbackService};
use crate::hashing::TranscriptTurn;
use crate::mpesa::{MpesaClient, StkCallback};
use crate::payment::{CallbackOutcome, PaymentStore};
use crate::questions::{Question, QuestionCacheStore};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,
    /// Rate limit in requests per minute per IP (0 = no limit)
    pub rate_limit_rpm: u32,
    /// Allowed CORS origins (None/empty = allow any)
    pub allowed_origins: Option<Vec<String>>,
    /// API keys for authentication (None/empty = no auth)
    pub api_keys: Option<Vec<String>>,
    /// Feedback cache TTL in seconds
    pub cache_ttl_seconds: i64,
    /// Price of one interview in shillings
    pub interview_cost: i64,
    /// Estimated cost of one AI generation in USD, for the savings figure
    pub generation_cost_usd: f64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".parse().unwrap(),
            rate_limit_rpm: 60,
            allowed_origins: None,
            api_keys: None,
            cache_ttl_seconds: 7 * 24 * 3600,
            interview_cost: 3,
            generation_cost_usd: 0.02,
        }
    }
}

/// Type alias for per-IP rate limiters
type IpRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Server state: every store is constructed from the injected pool at one
/// initialization point and shared behind `Arc`.
pub struct ServerState {
    pub config: ServerConfig,
    pub start_time: Instant,
    pub pool: Pool<Sqlite>,
    pub cache: FeedbackCacheStore,
    pub questions: QuestionCacheStore,
    pub payments: PaymentStore,
    pub feedback: FeedbackService,
    pub mpesa: Option<MpesaClient>,
    pub rate_limiters: Mutex<HashMap<std::net::IpAddr, Arc<IpRateLimiter>>>,
}

impl ServerState {
    pub fn new(
        config: ServerConfig,
        pool: Pool<Sqlite>,
        generator: Arc<dyn FeedbackGenerator>,
        mpesa: Option<MpesaClient>,
    ) -> Self {
        let cache = FeedbackCacheStore::new(pool.clone());
        let feedback = FeedbackService::new(cache.clone(), generator, config.cache_ttl_seconds);
        Self {
            start_time: Instant::now(),
            questions: QuestionCacheStore::new(pool.clone()),
            payments: PaymentStore::new(pool.clone()),
            cache,
            feedback,
            pool,
            config,
            mpesa,
            rate_limiters: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get_rate_limiter(&self, ip: std::net::IpAddr) -> Option<Arc<IpRateLimiter>> {
        if self.config.rate_limit_rpm == 0 {
            return None;
        }

        let mut limiters = self.rate_limiters.lock().await;

        if let Some(limiter) = limiters.get(&ip) {
            return Some(Arc::clone(limiter));
        }

        let quota = Quota::per_minute(NonZeroU32::new(self.config.rate_limit_rpm).unwrap());
        let limiter = Arc::new(RateLimiter::direct(quota));
        limiters.insert(ip, Arc::clone(&limiter));

        if limiters.len() > 10000 {
            tracing::warn!("rate limiter map exceeded 10000 entries, clearing");
            limiters.clear();
            limiters.insert(ip, Arc::clone(&limiter));
        }

        Some(limiter)
    }
}

// ---------------------------------------------------------------------------
// Request/response types
// ---------------------------------------------------------------------------

/// Feedback submission request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackRequest {
    pub interview_id: String,
    pub user_id: String,
    /// Ordered transcript turns; ordering is significant for the cache key.
    pub transcript: Vec<TranscriptTurn>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Stable content-hash id of the feedback artifact.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback_id: Option<String>,
    /// Whether the artifact was served from cache rather than generated.
    pub cached: bool,
    pub processing_time_ms: u64,
}

impl FeedbackResponse {
    fn failure(error: impl Into<String>, start: Instant) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            feedback_id: None,
            cached: false,
            processing_time_ms: start.elapsed().as_millis() as u64,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CacheStatsQuery {
    #[serde(default)]
    pub cleanup: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatsResponse {
    pub hits: i64,
    pub misses: i64,
    pub hit_rate: f64,
    pub estimated_savings: f64,
    pub cleaned_entries: u64,
}

/// Payment initiation request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiatePaymentRequest {
    pub phone: String,
    pub interview_type: String,
    pub user_id: String,
    #[serde(default)]
    pub interview_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiatePaymentResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout_request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<i64>,
}

/// Access check / consumption request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessRequest {
    pub interview_id: String,
    pub user_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessCheckResponse {
    pub has_paid: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
}

/// Question set lookup request: the exact composite key.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionFindRequest {
    pub role: String,
    pub level: String,
    pub interview_type: String,
    pub question_count: i64,
    /// When present, a hit is attributed to this user/session pair.
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionFindResponse {
    pub found: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub questions: Option<Vec<Question>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionStoreRequest {
    pub role: String,
    pub level: String,
    pub interview_type: String,
    pub questions: Vec<Question>,
    #[serde(default)]
    pub owner_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionStoreResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub db_connected: bool,
    pub payment_gateway_configured: bool,
    pub uptime_seconds: u64,
}

// ---------------------------------------------------------------------------
// Router and entry point
// ---------------------------------------------------------------------------

/// Build the application router over the given state.
pub fn router(
    state: Arc<ServerState>,
    prometheus_handle: metrics_exporter_prometheus::PrometheusHandle,
) -> axum::Router {
    use axum::{
        middleware,
        routing::{get, post},
        Router,
    };
    use std::collections::HashSet;

    let api_keys: crate::auth::ApiKeySet = Arc::new(
        state
            .config
            .api_keys
            .clone()
            .unwrap_or_default()
            .into_iter()
            .collect::<HashSet<_>>(),
    );

    let cors = match &state.config.allowed_origins {
        Some(origins) if !origins.is_empty() => {
            let allowed: Vec<axum::http::HeaderValue> =
                origins.iter().filter_map(|o| o.parse().ok()).collect();
            CorsLayer::new()
                .allow_origin(allowed)
                .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
                .allow_headers([
                    axum::http::header::CONTENT_TYPE,
                    axum::http::header::AUTHORIZATION,
                    axum::http::HeaderName::from_static("x-api-key"),
                ])
        }
        _ => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
            .allow_headers(Any),
    };

    // Protected routes (require API key when configured)
    let protected = Router::new()
        .route("/api/feedback", post(feedback_handler))
        .route("/api/cache/stats", get(cache_stats_handler))
        .route("/api/questions/find", post(question_find_handler))
        .route("/api/questions", post(question_store_handler))
        .route("/api/payments/initiate", post(initiate_payment_handler))
        .route("/api/payments/consume", post(consume_handler))
        .route("/api/payments/status", post(access_check_handler))
        .route_layer(middleware::from_fn_with_state(
            api_keys,
            crate::auth::require_api_key,
        ))
        .with_state(state.clone());

    // Open routes: health, metrics, and the gateway callback (the gateway
    // sends no API key and must always receive 200).
    let open = Router::new()
        .route("/health", get(health_handler))
        .route("/api/payments/callback", post(payment_callback_handler))
        .route(
            "/metrics",
            get(move || {
                let handle = prometheus_handle.clone();
                async move { handle.render() }
            }),
        )
        .with_state(state.clone());

    Router::new()
        .merge(open)
        .merge(protected)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Run the HTTP server until shutdown.
pub async fn run_server(state: Arc<ServerState>) -> Result<()> {
    let prometheus_handle = crate::metrics::install_prometheus_recorder();
    let bind_addr = state.config.bind_addr;
    let rate_limit_rpm = state.config.rate_limit_rpm;
    let has_api_keys = state
        .config
        .api_keys
        .as_ref()
        .map(|k| !k.is_empty())
        .unwrap_or(false);
    let has_gateway = state.mpesa.is_some();

    let app = router(state, prometheus_handle);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!("prepgate server listening on {}", bind_addr);
    tracing::info!(
        "Endpoints: GET /health, GET /metrics, POST /api/feedback, GET /api/cache/stats, \
         POST /api/payments/{{initiate,callback,consume,status}}, POST /api/questions[/find]"
    );
    if rate_limit_rpm > 0 {
        tracing::info!(rate_limit_rpm, "rate limiting enabled");
    }
    if has_api_keys {
        tracing::info!("API key authentication enabled");
    }
    if !has_gateway {
        tracing::warn!("no M-Pesa settings configured; payment initiation disabled");
    }

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Health check handler
async fn health_handler(
    axum::extract::State(state): axum::extract::State<Arc<ServerState>>,
) -> impl axum::response::IntoResponse {
    // Probe the database with a 3s timeout
    let db_connected = tokio::time::timeout(
        std::time::Duration::from_secs(3),
        sqlx::query("SELECT 1").execute(&state.pool),
    )
    .await
    .map(|r| r.is_ok())
    .unwrap_or(false);

    let status = if db_connected {
        "ok".to_string()
    } else {
        "degraded".to_string()
    };

    axum::Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION").to_string(),
        db_connected,
        payment_gateway_configured: state.mpesa.is_some(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}

/// Feedback submission: hash the transcript, serve from cache on a hit,
/// otherwise generate, store, and return.
async fn feedback_handler(
    axum::extract::State(state): axum::extract::State<Arc<ServerState>>,
    axum::extract::ConnectInfo(addr): axum::extract::ConnectInfo<SocketAddr>,
    axum::Json(request): axum::Json<FeedbackRequest>,
) -> (StatusCode, axum::Json<FeedbackResponse>) {
    let start = Instant::now();
    let client_ip = addr.ip();

    if let Some(limiter) = state.get_rate_limiter(client_ip).await {
        if limiter.check().is_err() {
            tracing::warn!(%client_ip, "rate limit exceeded");
            crate::metrics::record_rate_limit_hit();
            return (
                StatusCode::TOO_MANY_REQUESTS,
                axum::Json(FeedbackResponse::failure(
                    format!(
                        "Rate limit exceeded. Maximum {} requests per minute.",
                        state.config.rate_limit_rpm
                    ),
                    start,
                )),
            );
        }
    }

    tracing::info!(
        interview_id = %request.interview_id,
        user_id = %request.user_id,
        turns = request.transcript.len(),
        "feedback requested"
    );

    match state.feedback.submit(&request.transcript).await {
        Ok(outcome) => {
            if outcome.cached {
                crate::metrics::record_cache_hit();
            } else {
                crate::metrics::record_cache_miss();
            }
            let processing_time_ms = start.elapsed().as_millis() as u64;
            crate::metrics::record_feedback_request(outcome.cached, processing_time_ms);
            tracing::info!(
                feedback_id = %outcome.feedback_id,
                cached = outcome.cached,
                processing_time_ms,
                "feedback complete"
            );
            (
                StatusCode::OK,
                axum::Json(FeedbackResponse {
                    success: true,
                    error: None,
                    feedback_id: Some(outcome.feedback_id),
                    cached: outcome.cached,
                    processing_time_ms,
                }),
            )
        }
        Err(Error::InvalidInput(msg)) => (
            StatusCode::BAD_REQUEST,
            axum::Json(FeedbackResponse::failure(msg, start)),
        ),
        Err(Error::Upstream(e)) => {
            tracing::warn!(error = %e, "feedback generation failed");
            (
                StatusCode::BAD_GATEWAY,
                axum::Json(FeedbackResponse::failure("feedback generation failed", start)),
            )
        }
        Err(e) => {
            tracing::warn!(error = %e, "feedback request failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                axum::Json(FeedbackResponse::failure("internal error", start)),
            )
        }
    }
}

/// Cache statistics, with optional eager cleanup of expired entries.
async fn cache_stats_handler(
    axum::extract::State(state): axum::extract::State<Arc<ServerState>>,
    axum::extract::Query(query): axum::extract::Query<CacheStatsQuery>,
) -> Result<axum::Json<CacheStatsResponse>, StatusCode> {
    let cleaned_entries = if query.cleanup {
        state.cache.cleanup_expired().await.map_err(|e| {
            tracing::warn!(error = %e, "cache cleanup failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })?
    } else {
        0
    };

    let stats = state.cache.stats().await.map_err(|e| {
        tracing::warn!(error = %e, "cache stats query failed");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(axum::Json(CacheStatsResponse {
        hits: stats.hits,
        misses: stats.misses,
        hit_rate: stats.hit_rate(),
        estimated_savings: stats.hits as f64 * state.config.generation_cost_usd,
        cleaned_entries,
    }))
}

/// Question set lookup on the exact composite key.
async fn question_find_handler(
    axum::extract::State(state): axum::extract::State<Arc<ServerState>>,
    axum::Json(request): axum::Json<QuestionFindRequest>,
) -> Result<axum::Json<QuestionFindResponse>, StatusCode> {
    let found = state
        .questions
        .find(
            &request.role,
            &request.level,
            &request.interview_type,
            request.question_count,
        )
        .await
        .map_err(|e| {
            tracing::warn!(error = %e, "question lookup failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    match found {
        Some(entry) => {
            if let (Some(user_id), Some(session_id)) = (&request.user_id, &request.session_id) {
                // Usage accounting is best-effort; a failed increment does
                // not fail the lookup.
                if let Err(e) = state
                    .questions
                    .record_usage(&entry.id, user_id, session_id)
                    .await
                {
                    tracing::warn!(id = %entry.id, error = %e, "failed to record question usage");
                }
            }
            Ok(axum::Json(QuestionFindResponse {
                found: true,
                id: Some(entry.id),
                questions: Some(entry.questions),
            }))
        }
        None => Ok(axum::Json(QuestionFindResponse {
            found: false,
            id: None,
            questions: None,
        })),
    }
}

/// Store a freshly generated question set.
async fn question_store_handler(
    axum::extract::State(state): axum::extract::State<Arc<ServerState>>,
    axum::Json(request): axum::Json<QuestionStoreRequest>,
) -> (StatusCode, axum::Json<QuestionStoreResponse>) {
    if request.questions.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            axum::Json(QuestionStoreResponse {
                success: false,
                error: Some("questions must not be empty".into()),
                id: None,
            }),
        );
    }

    match state
        .questions
        .store(
            &request.role,
            &request.level,
            &request.interview_type,
            request.questions.len() as i64,
            &request.questions,
            request.owner_id.as_deref(),
        )
        .await
    {
        Ok(id) => (
            StatusCode::OK,
            axum::Json(QuestionStoreResponse {
                success: true,
                error: None,
                id: Some(id),
            }),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "question store failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                axum::Json(QuestionStoreResponse {
                    success: false,
                    error: Some("internal error".into()),
                    id: None,
                }),
            )
        }
    }
}

/// Initiate an STK push and record the pending transaction.
async fn initiate_payment_handler(
    axum::extract::State(state): axum::extract::State<Arc<ServerState>>,
    axum::extract::ConnectInfo(addr): axum::extract::ConnectInfo<SocketAddr>,
    axum::Json(request): axum::Json<InitiatePaymentRequest>,
) -> (StatusCode, axum::Json<InitiatePaymentResponse>) {
    let client_ip = addr.ip();
    if let Some(limiter) = state.get_rate_limiter(client_ip).await {
        if limiter.check().is_err() {
            tracing::warn!(%client_ip, "rate limit exceeded on payment initiation");
            crate::metrics::record_rate_limit_hit();
            return (
                StatusCode::TOO_MANY_REQUESTS,
                axum::Json(InitiatePaymentResponse {
                    success: false,
                    error: Some("Rate limit exceeded".into()),
                    checkout_request_id: None,
                    amount: None,
                }),
            );
        }
    }

    let Some(ref mpesa) = state.mpesa else {
        crate::metrics::record_payment_initiation("unconfigured");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            axum::Json(InitiatePaymentResponse {
                success: false,
                error: Some("payment gateway not configured".into()),
                checkout_request_id: None,
                amount: None,
            }),
        );
    };

    let amount = state.config.interview_cost;
    let reference = format!("prepgate:{}", request.interview_type);

    let push = match mpesa
        .stk_push(&request.phone, amount, &reference, "Mock interview access")
        .await
    {
        Ok(push) => push,
        Err(Error::InvalidInput(msg)) => {
            crate::metrics::record_payment_initiation("invalid");
            return (
                StatusCode::BAD_REQUEST,
                axum::Json(InitiatePaymentResponse {
                    success: false,
                    error: Some(msg),
                    checkout_request_id: None,
                    amount: None,
                }),
            );
        }
        Err(e) => {
            crate::metrics::record_payment_initiation("gateway_error");
            tracing::warn!(error = %e, "stk push failed");
            return (
                StatusCode::BAD_GATEWAY,
                axum::Json(InitiatePaymentResponse {
                    success: false,
                    error: Some("payment gateway unavailable".into()),
                    checkout_request_id: None,
                    amount: None,
                }),
            );
        }
    };

    match state
        .payments
        .create(
            &request.user_id,
            request.interview_id.as_deref(),
            &request.phone,
            amount,
            &push.checkout_request_id,
            &push.merchant_request_id,
        )
        .await
    {
        Ok(_) => {
            crate::metrics::record_payment_initiation("accepted");
            (
                StatusCode::OK,
                axum::Json(InitiatePaymentResponse {
                    success: true,
                    error: None,
                    checkout_request_id: Some(push.checkout_request_id),
                    amount: Some(amount),
                }),
            )
        }
        Err(e) => {
            crate::metrics::record_payment_initiation("store_error");
            tracing::error!(
                checkout_request_id = %push.checkout_request_id,
                error = %e,
                "stk push accepted but transaction record failed"
            );
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                axum::Json(InitiatePaymentResponse {
                    success: false,
                    error: Some("internal error".into()),
                    checkout_request_id: None,
                    amount: None,
                }),
            )
        }
    }
}

/// Gateway acknowledgment body. The gateway must always be told success, or
/// it retries and the retries cascade.
fn gateway_ack() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({ "ResultCode": 0, "ResultDesc": "Accepted" }))
}

/// Gateway webhook: apply the asynchronous STK result to the matching
/// transaction. Always responds 200 regardless of internal outcome; the true
/// outcome is logged and counted. Takes the raw body rather than a typed
/// extractor so that malformed payloads or a missing content-type can never
/// reject the request before this handler runs.
async fn payment_callback_handler(
    axum::extract::State(state): axum::extract::State<Arc<ServerState>>,
    body: axum::body::Bytes,
) -> (StatusCode, axum::Json<serde_json::Value>) {
    let callback: StkCallback = match serde_json::from_slice(&body) {
        Ok(cb) => cb,
        Err(e) => {
            tracing::warn!(error = %e, "unparseable payment callback");
            crate::metrics::record_payment_callback("unparseable");
            return (StatusCode::OK, gateway_ack());
        }
    };

    let receipt = callback.receipt_number();
    let outcome = state
        .payments
        .apply_callback(
            &callback.checkout_request_id,
            callback.result_code,
            receipt.as_deref(),
        )
        .await;

    match outcome {
        Ok(CallbackOutcome::MarkedPaid) => {
            crate::metrics::record_payment_callback("paid");
        }
        Ok(CallbackOutcome::MarkedFailed) => {
            tracing::info!(
                checkout_request_id = %callback.checkout_request_id,
                result_code = callback.result_code,
                result_desc = %callback.result_desc,
                "payment marked failed"
            );
            crate::metrics::record_payment_callback("failed");
        }
        Ok(CallbackOutcome::AlreadyFinal) => {
            crate::metrics::record_payment_callback("duplicate");
        }
        Ok(CallbackOutcome::Unknown) => {
            crate::metrics::record_payment_callback("unknown");
        }
        Err(e) => {
            tracing::error!(
                checkout_request_id = %callback.checkout_request_id,
                error = %e,
                "failed to apply payment callback"
            );
            crate::metrics::record_payment_callback("error");
        }
    }

    (StatusCode::OK, gateway_ack())
}

/// Consume one unused paid transaction to unlock an interview.
async fn consume_handler(
    axum::extract::State(state): axum::extract::State<Arc<ServerState>>,
    axum::Json(request): axum::Json<AccessRequest>,
) -> (StatusCode, axum::Json<ConsumeResponse>) {
    match state
        .payments
        .mark_used(
            &request.user_id,
            &request.interview_id,
            state.config.interview_cost,
        )
        .await
    {
        Ok(tx) => (
            StatusCode::OK,
            axum::Json(ConsumeResponse {
                success: true,
                error: None,
                transaction_id: Some(tx.id),
            }),
        ),
        Err(Error::NotFound(_)) => (
            StatusCode::NOT_FOUND,
            axum::Json(ConsumeResponse {
                success: false,
                error: Some("no unused paid transaction found".into()),
                transaction_id: None,
            }),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "consume failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                axum::Json(ConsumeResponse {
                    success: false,
                    error: Some("internal error".into()),
                    transaction_id: None,
                }),
            )
        }
    }
}

/// Access gate check: does an unused, sufficient, paid transaction exist?
async fn access_check_handler(
    axum::extract::State(state): axum::extract::State<Arc<ServerState>>,
    axum::Json(request): axum::Json<AccessRequest>,
) -> Result<axum::Json<AccessCheckResponse>, StatusCode> {
    let has_paid = state
        .payments
        .has_valid_access(
            &request.user_id,
            &request.interview_id,
            state.config.interview_cost,
        )
        .await
        .map_err(|e| {
            tracing::warn!(error = %e, "access check failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    crate::metrics::record_access_check(has_paid);
    Ok(axum::Json(AccessCheckResponse { has_paid }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feedback_response_serialization() {
        let response = FeedbackResponse {
            success: true,
            error: None,
            feedback_id: Some("abc123".to_string()),
            cached: true,
            processing_time_ms: 12,
        };

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"feedbackId\":\"abc123\""));
        assert!(json.contains("\"cached\":true"));
        assert!(!json.contains("error"));
    }

    #[test]
    fn test_access_request_camel_case() {
        let request: AccessRequest =
            serde_json::from_str(r#"{"interviewId":"i1","userId":"u1"}"#).unwrap();
        assert_eq!(request.interview_id, "i1");
        assert_eq!(request.user_id, "u1");
    }

    #[test]
    fn test_stats_query_defaults() {
        let query: CacheStatsQuery = serde_json::from_str("{}").unwrap();
        assert!(!query.cleanup);
    }
}
