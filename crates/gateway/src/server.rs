use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context as _;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use prometheus::{Registry, TextEncoder};
use tokio_stream::StreamExt as _;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use iskoces_gateway_core::TranslationRequest;
use iskoces_gateway_engine::{HandlerError, TranslationHandler, WorkerPool};

const HEALTH_DEADLINE: Duration = Duration::from_secs(15);

pub struct AppState {
    pub handler: TranslationHandler,
    pub pool: Option<Arc<WorkerPool>>,
    pub registry: Registry,
}

/// Serve the thin HTTP adapter until the token is cancelled.
pub async fn serve(
    listen: SocketAddr,
    state: Arc<AppState>,
    token: CancellationToken,
) -> anyhow::Result<()> {
    let router = Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route("/v1/translate", post(translate))
        .route("/v1/jobs", post(submit))
        .route("/v1/jobs/:id", get(job_status))
        .route("/v1/jobs/:id/events", get(job_events))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("bind {listen}"))?;
    tracing::info!("listening on {listen}");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            token.cancelled().await;
            tracing::info!("shutdown signal received");
        })
        .await
        .map_err(Into::into)
}

async fn healthz(State(state): State<Arc<AppState>>) -> Response {
    match &state.pool {
        Some(pool) => {
            match pool
                .check_health(Some(Instant::now() + HEALTH_DEADLINE))
                .await
            {
                Ok(()) => (StatusCode::OK, "ok").into_response(),
                Err(err) => (StatusCode::SERVICE_UNAVAILABLE, err.to_string()).into_response(),
            }
        }
        // HTTP-fallback mode has no local pool to probe.
        None => (StatusCode::OK, "ok").into_response(),
    }
}

async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    match TextEncoder::new().encode_to_string(&state.registry.gather()) {
        Ok(body) => (StatusCode::OK, body).into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}

async fn translate(
    State(state): State<Arc<AppState>>,
    Json(request): Json<TranslationRequest>,
) -> Response {
    match state.handler.translate(request).await {
        Ok(response) => Json(response).into_response(),
        Err(err) => error_response(err),
    }
}

async fn submit(
    State(state): State<Arc<AppState>>,
    Json(request): Json<TranslationRequest>,
) -> Response {
    match state.handler.submit(request) {
        Ok(id) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "job_id": id })),
        )
            .into_response(),
        Err(err) => error_response(err),
    }
}

async fn job_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Response {
    match state.handler.job_status(&id) {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(err) => error_response(err),
    }
}

/// Stream job snapshots as server-sent events; the stream ends with the
/// first terminal snapshot.
async fn job_events(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Response {
    let receiver = match state.handler.subscribe(&id) {
        Ok(receiver) => receiver,
        Err(err) => return error_response(err),
    };

    // Forward snapshots until the first terminal one, then close the
    // stream by dropping the sender.
    let (tx, rx) = tokio::sync::mpsc::channel(16);
    let mut watch_rx = receiver;
    tokio::spawn(async move {
        loop {
            let snapshot = watch_rx.borrow_and_update().clone();
            let terminal = snapshot.status.is_terminal();
            if tx.send(snapshot).await.is_err() || terminal {
                return;
            }
            if watch_rx.changed().await.is_err() {
                return;
            }
        }
    });

    let stream = ReceiverStream::new(rx)
        .map(|snapshot| Event::default().event("job").json_data(&snapshot));
    Sse::new(stream).keep_alive(KeepAlive::default()).into_response()
}

fn error_response(err: HandlerError) -> Response {
    let status = match &err {
        HandlerError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        HandlerError::JobNotFound(_) => StatusCode::NOT_FOUND,
        HandlerError::Unsupported(_) => StatusCode::NOT_IMPLEMENTED,
    };
    (status, Json(serde_json::json!({ "error": err.to_string() }))).into_response()
}
