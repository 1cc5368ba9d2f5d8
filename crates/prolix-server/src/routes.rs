//! HTTP surface.
//!
//!   POST /generate          → multipart `tap_x`, `tap_y`, `image` or `image_b64`
//!   POST /deepen            → JSON `{trace_id}`
//!   GET  /traces/:trace_id  → stored trace
//!   GET  /health            → liveness

use std::sync::Arc;

use axum::{
    extract::{
        multipart::MultipartRejection, rejection::JsonRejection, DefaultBodyLimit, Multipart,
        Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use prolix_contracts::error::NarrationError;
use prolix_contracts::trace::{Trace, TraceId};
use prolix_engine::{CancellationFlag, GenerateResponse, NarrationService};
use serde::Deserialize;
use serde_json::json;

pub const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    service: Arc<NarrationService>,
}

pub fn router(service: Arc<NarrationService>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/generate", post(generate))
        .route("/deepen", post(deepen))
        .route("/traces/:trace_id", get(read_trace))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(AppState { service })
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
}

impl ApiError {
    fn invalid_input(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            kind: "invalid_input",
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            kind: "internal_error",
            message: message.into(),
        }
    }
}

impl From<NarrationError> for ApiError {
    fn from(err: NarrationError) -> Self {
        let status = match &err {
            NarrationError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            NarrationError::NotFound(_) => StatusCode::NOT_FOUND,
            NarrationError::Conflict(_) => StatusCode::CONFLICT,
            NarrationError::ProviderUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::warn!(status = %self.status, kind = self.kind, message = %self.message, "request failed");
        }
        (
            self.status,
            Json(json!({"error": self.kind, "message": self.message})),
        )
            .into_response()
    }
}

/// Cancels the request's flag unless disarmed, i.e. when the handler future
/// is dropped because the client went away.
struct CancelOnDrop {
    flag: CancellationFlag,
    armed: bool,
}

impl CancelOnDrop {
    fn new(flag: CancellationFlag) -> Self {
        Self { flag, armed: true }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if self.armed {
            self.flag.cancel();
        }
    }
}

async fn run_blocking<T, F>(state: &AppState, work: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&NarrationService, &CancellationFlag) -> Result<T, NarrationError> + Send + 'static,
{
    let cancel = CancellationFlag::new();
    let guard = CancelOnDrop::new(cancel.clone());
    let service = Arc::clone(&state.service);
    let joined = tokio::task::spawn_blocking(move || work(&service, &cancel)).await;
    guard.disarm();
    joined
        .map_err(|err| ApiError::internal(format!("narration worker failed: {err}")))?
        .map_err(ApiError::from)
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

#[derive(Debug, Default)]
struct GenerateForm {
    tap_x: Option<String>,
    tap_y: Option<String>,
    image: Option<Vec<u8>>,
}

fn parse_tap(name: &str, raw: Option<String>) -> Result<f64, ApiError> {
    let raw = raw.ok_or_else(|| ApiError::invalid_input(format!("{name} is required")))?;
    raw.trim()
        .parse::<f64>()
        .map_err(|_| ApiError::invalid_input(format!("{name} must be a decimal number, got '{raw}'")))
}

async fn read_form(mut multipart: Multipart) -> Result<GenerateForm, ApiError> {
    let bad_body = |err: axum::extract::multipart::MultipartError| {
        ApiError::invalid_input(format!("unreadable multipart body: {}", err.body_text()))
    };
    let mut form = GenerateForm::default();
    while let Some(field) = multipart.next_field().await.map_err(bad_body)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "tap_x" => form.tap_x = Some(field.text().await.map_err(bad_body)?),
            "tap_y" => form.tap_y = Some(field.text().await.map_err(bad_body)?),
            "image" => form.image = Some(field.bytes().await.map_err(bad_body)?.to_vec()),
            "image_b64" => {
                let encoded = field.text().await.map_err(bad_body)?;
                let decoded = BASE64
                    .decode(encoded.trim())
                    .map_err(|err| ApiError::invalid_input(format!("image_b64 is not base64: {err}")))?;
                form.image = Some(decoded);
            }
            _ => {}
        }
    }
    Ok(form)
}

async fn generate(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<GenerateResponse>, ApiError> {
    let multipart = multipart.map_err(|rejection| ApiError::invalid_input(rejection.body_text()))?;
    let form = read_form(multipart).await?;
    let tap_x = parse_tap("tap_x", form.tap_x)?;
    let tap_y = parse_tap("tap_y", form.tap_y)?;
    let image = form
        .image
        .ok_or_else(|| ApiError::invalid_input("image or image_b64 is required"))?;

    let response = run_blocking(&state, move |service, cancel| {
        service.generate(&image, tap_x, tap_y, cancel)
    })
    .await?;
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
struct DeepenRequest {
    trace_id: String,
}

async fn deepen(
    State(state): State<AppState>,
    body: Result<Json<DeepenRequest>, JsonRejection>,
) -> Result<Json<GenerateResponse>, ApiError> {
    let Json(request) = body.map_err(|rejection| ApiError::invalid_input(rejection.body_text()))?;
    let trace_id = TraceId::parse(&request.trace_id)
        .ok_or_else(|| ApiError::invalid_input("trace_id must not be blank"))?;

    let response =
        run_blocking(&state, move |service, cancel| service.deepen(&trace_id, cancel)).await?;
    Ok(Json(response))
}

async fn read_trace(
    State(state): State<AppState>,
    Path(trace_id): Path<String>,
) -> Result<Json<Trace>, ApiError> {
    let trace_id = TraceId::parse(&trace_id)
        .ok_or_else(|| ApiError::invalid_input("trace_id must not be blank"))?;
    let trace = run_blocking(&state, move |service, _| service.trace(&trace_id)).await?;
    Ok(Json(trace))
}
