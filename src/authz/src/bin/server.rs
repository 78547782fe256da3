//! # Authorization HTTP Server
//!
//! HTTP front for the LMS authorization engine: permission resolution and checks,
//! safety pre-checks, gated identity mutations, health and metrics.
//!
//! ## Endpoints
//!
//! - `POST /v1/permissions/resolve` - Effective permission set
//! - `POST /v1/permissions/check` - Single permission check
//! - `POST /v1/safety/check` - Safety pre-check for an identity mutation
//! - `POST /v1/principals/:id/mutations` - Apply an identity mutation
//! - `POST /v1/principals/:id/invalidate` - Drop cached decisions for a principal
//! - `GET /health` - Health check
//! - `GET /metrics` - Prometheus metrics (metrics port)
//!
//! ## Caller identity
//!
//! The service issues no tokens. It must sit behind an authenticating proxy that
//! strips any client-supplied `x-authz-actor` header and sets it to the authenticated
//! principal. Safety checks, mutations and invalidations act as that principal and are
//! refused with 401 when the header is missing.
//!
//! ## Configuration
//!
//! Environment variables:
//! - `PORT` - HTTP server port (default: 8080)
//! - `METRICS_PORT` - Metrics server port (default: 9090)
//! - `RUST_LOG` - Log level (default: info)
//! - `AUTHZ_POLICY_MODE` - `strict` | `permissive` (default: strict)
//! - `AUTHZ_CACHE_TTL_SECS` - Decision cache TTL in seconds (default: 60)
//! - `AUTHZ_CACHE_SIZE` - Decision cache capacity (default: 10000)
//! - `AUTHZ_SEED_FILE` - JSON seed for roles and principals (default: stock roles only)
//! - `DATABASE_URL` - PostgreSQL backend (only with the `postgres` feature)

use anyhow::Context;
use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Path, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    serve, Router,
};
use lms_authz::{
    AuthzEngine, AuthzError, EngineConfig, IdentityMutation, InMemoryPrincipalStore,
    InMemoryRoleDirectory, NodeId, PrincipalId, PrincipalStore, RoleDirectory, SafetyDecision,
    SeedData,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{error, info, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Shared application state
#[derive(Clone)]
struct AppState {
    engine: Arc<AuthzEngine>,
    start_time: std::time::Instant,
}

/// Error response body
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

/// Application error type
#[derive(Debug)]
enum AppError {
    Unauthorized(String),
    NotFound(String),
    Conflict(String),
    Forbidden(String),
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, message) = match self {
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "unauthorized", msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "safety_violation", msg),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, "permission_denied", msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
        };

        let body = Json(ErrorResponse {
            error: error.to_string(),
            message,
        });

        (status, body).into_response()
    }
}

impl From<AuthzError> for AppError {
    fn from(err: AuthzError) -> Self {
        match err {
            AuthzError::PrincipalNotFound(id) => AppError::NotFound(format!("principal {}", id)),
            AuthzError::SafetyViolation { reason } => AppError::Conflict(reason),
            AuthzError::PermissionDenied(msg) => AppError::Forbidden(msg),
            AuthzError::InvalidInput(msg) => AppError::BadRequest(msg),
            other => AppError::Internal(other.to_string()),
        }
    }
}

/// Header carrying the principal authenticated by the fronting proxy
const ACTOR_HEADER: &str = "x-authz-actor";

/// Acting principal, taken from [`ACTOR_HEADER`]
struct Actor(PrincipalId);

#[async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(ACTOR_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| AppError::Unauthorized(format!("missing {} header", ACTOR_HEADER)))?;

        Ok(Actor(PrincipalId::new(raw)))
    }
}

#[derive(Debug, Deserialize)]
struct ResolveRequest {
    principal: PrincipalId,
    #[serde(default)]
    node: Option<NodeId>,
}

#[derive(Debug, Serialize)]
struct ResolveResponse {
    principal: PrincipalId,
    node: Option<NodeId>,
    permissions: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CheckRequest {
    principal: PrincipalId,
    permission: String,
    #[serde(default)]
    node: Option<NodeId>,
}

#[derive(Debug, Serialize)]
struct CheckResponse {
    allowed: bool,
    decision: String,
}

#[derive(Debug, Deserialize)]
struct SafetyRequest {
    target: PrincipalId,
    mutation: IdentityMutation,
}

#[derive(Debug, Deserialize)]
struct MutationRequest {
    mutation: IdentityMutation,
}

#[derive(Debug, Serialize)]
struct MutationResponse {
    status: String,
    target: PrincipalId,
}

/// Health check response
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    uptime_seconds: u64,
    version: String,
    policy_mode: String,
}

/// Metrics response (Prometheus format)
struct MetricsResponse {
    metrics: String,
}

impl IntoResponse for MetricsResponse {
    fn into_response(self) -> Response {
        (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            self.metrics,
        )
            .into_response()
    }
}

/// POST /v1/permissions/resolve
async fn resolve_permissions(
    State(state): State<AppState>,
    Json(req): Json<ResolveRequest>,
) -> Result<Json<ResolveResponse>, AppError> {
    let permissions = state
        .engine
        .resolve_permissions(&req.principal, req.node)
        .await?;

    Ok(Json(ResolveResponse {
        principal: req.principal,
        node: req.node,
        permissions: permissions.iter().map(|p| p.as_str().to_string()).collect(),
    }))
}

/// POST /v1/permissions/check
async fn check_permission(
    State(state): State<AppState>,
    Json(req): Json<CheckRequest>,
) -> Result<Json<CheckResponse>, AppError> {
    let allowed = state
        .engine
        .has_permission(&req.principal, &req.permission, req.node)
        .await?;

    info!(
        "Permission check: principal={}, permission={}, node={:?} -> {}",
        req.principal,
        req.permission,
        req.node,
        if allowed { "ALLOW" } else { "DENY" }
    );

    Ok(Json(CheckResponse {
        allowed,
        decision: if allowed { "allow".to_string() } else { "deny".to_string() },
    }))
}

/// POST /v1/safety/check
async fn check_safety(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Json(req): Json<SafetyRequest>,
) -> Result<Json<SafetyDecision>, AppError> {
    let decision = state
        .engine
        .check_safety(&actor, &req.mutation, &req.target)
        .await?;
    Ok(Json(decision))
}

/// POST /v1/principals/:id/mutations
async fn apply_mutation(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(target): Path<String>,
    Json(req): Json<MutationRequest>,
) -> Result<Json<MutationResponse>, AppError> {
    let target = PrincipalId::new(target);
    state
        .engine
        .apply_mutation(&actor, req.mutation, &target)
        .await?;

    Ok(Json(MutationResponse {
        status: "applied".to_string(),
        target,
    }))
}

/// POST /v1/principals/:id/invalidate
async fn invalidate(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(target): Path<String>,
) -> StatusCode {
    let target = PrincipalId::new(target);
    info!("{} invalidated cached decisions for {}", actor, target);
    state.engine.invalidate(&target);
    StatusCode::NO_CONTENT
}

/// GET /health - Health check endpoint
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = state.start_time.elapsed().as_secs();

    Json(HealthResponse {
        status: "healthy".to_string(),
        uptime_seconds: uptime,
        version: lms_authz::VERSION.to_string(),
        policy_mode: state.engine.policy_mode().to_string(),
    })
}

/// GET /metrics - Prometheus metrics endpoint
async fn metrics(State(state): State<AppState>) -> MetricsResponse {
    let uptime = state.start_time.elapsed().as_secs();

    let mut metrics = format!(
        "# HELP authz_uptime_seconds Server uptime in seconds\n\
         # TYPE authz_uptime_seconds gauge\n\
         authz_uptime_seconds {}\n\
         \n\
         # HELP authz_version Server version info\n\
         # TYPE authz_version gauge\n\
         authz_version{{version=\"{}\"}} 1\n\n",
        uptime,
        lms_authz::VERSION
    );
    metrics.push_str(&state.engine.export_prometheus().await);

    MetricsResponse { metrics }
}

/// Create the HTTP router with all endpoints
fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let trace = TraceLayer::new_for_http().on_response(DefaultOnResponse::new().level(Level::INFO));

    Router::new()
        .route("/v1/permissions/resolve", post(resolve_permissions))
        .route("/v1/permissions/check", post(check_permission))
        .route("/v1/safety/check", post(check_safety))
        .route("/v1/principals/:id/mutations", post(apply_mutation))
        .route("/v1/principals/:id/invalidate", post(invalidate))
        .route("/health", get(health_check))
        .layer(ServiceBuilder::new().layer(trace).layer(cors))
        .with_state(state)
}

/// Create the metrics router
fn create_metrics_router(state: AppState) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Graceful shutdown handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }

    info!("Starting graceful shutdown");
}

fn env_port(key: &str, default: u16) -> anyhow::Result<u16> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} must be a port number, got '{}'", key, raw)),
        Err(_) => Ok(default),
    }
}

/// Directory and store backing the engine
async fn build_backends() -> anyhow::Result<(Arc<dyn RoleDirectory>, Arc<dyn PrincipalStore>)> {
    #[cfg(feature = "postgres")]
    if let Ok(database_url) = std::env::var("DATABASE_URL") {
        info!("Using PostgreSQL backend");
        let store = Arc::new(
            lms_authz::store::PostgresStore::new(&database_url)
                .await
                .context("connecting to PostgreSQL")?,
        );
        store.ensure_schema().await.context("preparing schema")?;
        let directory: Arc<dyn RoleDirectory> = store.clone();
        let store: Arc<dyn PrincipalStore> = store;
        return Ok((directory, store));
    }

    let seed = match std::env::var("AUTHZ_SEED_FILE") {
        Ok(path) => {
            info!("  Seed File: {}", path);
            SeedData::from_file(&path)
                .await
                .with_context(|| format!("loading seed file {}", path))?
        }
        Err(_) => SeedData::stock_roles(),
    };

    let directory = Arc::new(InMemoryRoleDirectory::new());
    let store = Arc::new(InMemoryPrincipalStore::new());
    seed.apply(&directory, &store)
        .await
        .context("applying seed data")?;

    let directory: Arc<dyn RoleDirectory> = directory;
    let store: Arc<dyn PrincipalStore> = store;
    Ok((directory, store))
}

/// Main server entrypoint
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting LMS Authorization Server v{}", lms_authz::VERSION);

    let port = env_port("PORT", 8080)?;
    let metrics_port = env_port("METRICS_PORT", 9090)?;
    let config = EngineConfig::from_env().context("reading engine configuration")?;

    info!("Configuration:");
    info!("  Port: {}", port);
    info!("  Metrics Port: {}", metrics_port);
    info!("  Policy Mode: {}", config.policy_mode);
    info!("  Cache: enabled={}, capacity={}, ttl={:?}", config.cache.enabled, config.cache.capacity, config.cache.ttl);

    let (directory, store) = build_backends().await?;
    let engine = AuthzEngine::new(config, directory, store);

    info!("Authorization engine initialized successfully");

    let state = AppState {
        engine: Arc::new(engine),
        start_time: std::time::Instant::now(),
    };

    let app = create_router(state.clone());
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let metrics_app = create_metrics_router(state);
    let metrics_addr = SocketAddr::from(([0, 0, 0, 0], metrics_port));

    info!("Starting HTTP server on {}", addr);
    info!("Starting metrics server on {}", metrics_addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding HTTP server to {}", addr))?;
    let metrics_listener = tokio::net::TcpListener::bind(metrics_addr)
        .await
        .with_context(|| format!("binding metrics server to {}", metrics_addr))?;

    let server = serve(listener, app.into_make_service()).with_graceful_shutdown(shutdown_signal());
    let metrics_server = serve(metrics_listener, metrics_app.into_make_service())
        .with_graceful_shutdown(shutdown_signal());

    tokio::try_join!(
        async {
            server.await.map_err(|e| {
                error!("HTTP server error: {}", e);
                e
            })
        },
        async {
            metrics_server.await.map_err(|e| {
                error!("Metrics server error: {}", e);
                e
            })
        }
    )?;

    info!("Servers shut down gracefully");
    Ok(())
}
