//! HTTP server.
//!
//! Exposes run control, live run progress over Server-Sent Events,
//! lifecycle review and feedback capture as a JSON HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/runs` | Start an ingestion run, returns `{ "run_id" }` |
//! | `GET`  | `/runs/{id}` | Run snapshot: status, summary, error, events |
//! | `GET`  | `/runs/{id}/events` | SSE: backlog, then live events until the run ends |
//! | `POST` | `/runs/{id}/cancel` | Cancel a running run |
//! | `POST` | `/lifecycle/review` | Run one lifecycle pass, returns counts |
//! | `POST` | `/records/{external_id}/feedback` | Record one feedback vote |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "target_entity must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info, warn};

use crate::app::App;
use crate::config::Config;
use crate::ingest::RunRequest;
use crate::lifecycle::LifecycleReport;
use crate::models::{FeedbackCategory, RunState};

/// Build the configured application and serve it on `[server].bind`.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let app = App::from_config(config).await?;
    run_server_with_app(app).await
}

/// Serve an already wired [`App`]. Also starts the lifecycle scheduler and
/// the run retention sweeper.
pub async fn run_server_with_app(app: App) -> anyhow::Result<()> {
    let bind_addr = app.config.server.bind.clone();

    let scheduler = app
        .lifecycle
        .clone()
        .spawn_scheduler(Duration::from_secs(app.config.lifecycle.interval_secs));
    let sweeper = app
        .runs
        .clone()
        .spawn_sweeper(Duration::from_secs(app.config.progress.sweep_interval_secs));

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(bind = %bind_addr, "server listening");
    println!("Reel Curator listening on http://{}", bind_addr);

    let result = axum::serve(listener, router(app)).await;

    scheduler.abort();
    sweeper.abort();
    result?;
    Ok(())
}

/// The route table, without binding a listener.
pub fn router(app: App) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/runs", post(handle_start_run))
        .route("/runs/{id}", get(handle_get_run))
        .route("/runs/{id}/events", get(handle_run_events))
        .route("/runs/{id}/cancel", post(handle_cancel_run))
        .route("/lifecycle/review", post(handle_lifecycle_review))
        .route("/records/{external_id}/feedback", post(handle_feedback))
        .layer(cors)
        .with_state(app)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn internal(err: anyhow::Error) -> AppError {
    warn!(error = %err, "request failed");
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: err.to_string(),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /runs ============

/// Request body for `POST /runs`. Omitted thresholds fall back to `[curation]`.
#[derive(Deserialize)]
struct StartRunRequest {
    target_entity: String,
    queries: Vec<String>,
    min_quality: Option<u8>,
    min_duration_secs: Option<u32>,
}

#[derive(Serialize)]
struct StartRunResponse {
    run_id: String,
}

async fn handle_start_run(
    State(app): State<App>,
    Json(req): Json<StartRunRequest>,
) -> Result<(StatusCode, Json<StartRunResponse>), AppError> {
    let request = RunRequest {
        target_entity: req.target_entity,
        queries: req.queries,
        min_quality: req.min_quality.unwrap_or(app.config.curation.min_quality),
        min_duration_secs: req
            .min_duration_secs
            .unwrap_or(app.config.curation.min_duration_secs),
    };
    request.validate().map_err(|e| bad_request(e.to_string()))?;

    let run_id = app.ingestion.start_run(request).map_err(internal)?;
    Ok((StatusCode::ACCEPTED, Json(StartRunResponse { run_id })))
}

// ============ GET /runs/{id} ============

async fn handle_get_run(
    State(app): State<App>,
    Path(id): Path<String>,
) -> Result<Json<RunState>, AppError> {
    app.runs
        .snapshot(&id)
        .map(Json)
        .ok_or_else(|| not_found(format!("run not found: {}", id)))
}

// ============ GET /runs/{id}/events ============

async fn handle_run_events(
    State(app): State<App>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let (subscription, mut rx) = app
        .runs
        .subscribe_channel(&id)
        .map_err(|_| not_found(format!("run not found: {}", id)))?;
    debug!(run_id = %id, subscription, "sse subscriber attached");

    let stream = async_stream::stream! {
        // The sender is dropped once the run finishes, which ends the stream.
        while let Some(event) = rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => {
                    yield Ok(Event::default()
                        .event(event.kind.as_str())
                        .id(event.seq.to_string())
                        .data(json));
                }
                Err(e) => warn!(error = %e, "failed to serialize progress event"),
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    ))
}

// ============ POST /runs/{id}/cancel ============

#[derive(Serialize)]
struct CancelResponse {
    run_id: String,
    cancelled: bool,
}

async fn handle_cancel_run(
    State(app): State<App>,
    Path(id): Path<String>,
) -> Result<Json<CancelResponse>, AppError> {
    if app.runs.snapshot(&id).is_none() {
        return Err(not_found(format!("run not found: {}", id)));
    }
    let cancelled = app.ingestion.cancel_run(&id);
    Ok(Json(CancelResponse {
        run_id: id,
        cancelled,
    }))
}

// ============ POST /lifecycle/review ============

async fn handle_lifecycle_review(
    State(app): State<App>,
) -> Result<Json<LifecycleReport>, AppError> {
    app.lifecycle.review_all().await.map(Json).map_err(internal)
}

// ============ POST /records/{external_id}/feedback ============

#[derive(Deserialize)]
struct FeedbackRequest {
    helpful: bool,
    category: Option<String>,
}

#[derive(Serialize)]
struct FeedbackResponse {
    external_id: String,
    recorded: bool,
}

async fn handle_feedback(
    State(app): State<App>,
    Path(external_id): Path<String>,
    Json(req): Json<FeedbackRequest>,
) -> Result<(StatusCode, Json<FeedbackResponse>), AppError> {
    let category = req
        .category
        .as_deref()
        .map(str::parse::<FeedbackCategory>)
        .transpose()
        .map_err(|e| bad_request(e.to_string()))?;

    let recorded = app
        .store
        .record_vote(&external_id, req.helpful, category)
        .await
        .map_err(internal)?;
    if !recorded {
        return Err(not_found(format!("record not found: {}", external_id)));
    }

    Ok((
        StatusCode::CREATED,
        Json(FeedbackResponse {
            external_id,
            recorded,
        }),
    ))
}
