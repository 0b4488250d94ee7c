//! HTTP surface: liveness, status, and `POST /search-person`.

use axum::extract::rejection::{FormRejection, JsonRejection};
use axum::extract::{DefaultBodyLimit, FromRequest, Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{async_trait, Form, Json, Router};
use djook_core::{CancelToken, DecodeError, PersonSearch, SearchError, SearchResult, TargetImage};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Shared per-process state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub search: Arc<PersonSearch>,
    pub search_timeout: Duration,
    /// Cancelled on shutdown so in-flight searches stop starting comparisons.
    pub shutdown: CancelToken,
    pub region: String,
}

pub fn router(state: AppState, body_limit_bytes: usize) -> Router {
    Router::new()
        .route("/", get(hello))
        .route("/status", get(status))
        .route("/search-person", post(search_person))
        .layer(DefaultBodyLimit::max(body_limit_bytes))
        .with_state(state)
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{message}")]
    BadRequest { status: StatusCode, message: String },
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Search(#[from] SearchError),
    #[error("search timed out after {0:?}")]
    Timeout(Duration),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest { status, .. } => *status,
            ApiError::Decode(_) => StatusCode::BAD_REQUEST,
            ApiError::Search(SearchError::Recognition { .. }) => StatusCode::BAD_GATEWAY,
            ApiError::Search(SearchError::Cancelled) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Search(SearchError::TaskFailed(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest {
            status: client_status(rejection.status()),
            message: rejection.body_text(),
        }
    }
}

impl From<FormRejection> for ApiError {
    fn from(rejection: FormRejection) -> Self {
        ApiError::BadRequest {
            status: client_status(rejection.status()),
            message: rejection.body_text(),
        }
    }
}

/// Everything except an oversized body is reported as 400.
fn client_status(status: StatusCode) -> StatusCode {
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        status
    } else {
        StatusCode::BAD_REQUEST
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), error = %self, "request failed");
        } else {
            tracing::debug!(status = status.as_u16(), error = %self, "request rejected");
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

/// `{"image": "<base64>"}`
#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub image: String,
}

/// Accepts the search body as JSON or as an urlencoded form.
pub struct SearchPayload(pub SearchRequest);

#[async_trait]
impl<S> FromRequest<S> for SearchPayload
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_form = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));

        if is_form {
            let Form(body) = Form::<SearchRequest>::from_request(req, state).await?;
            // Unescaped `+` in base64 arrives as a space after form decoding.
            Ok(Self(SearchRequest {
                image: body.image.replace(' ', "+"),
            }))
        } else {
            let Json(body) = Json::<SearchRequest>::from_request(req, state).await?;
            Ok(Self(body))
        }
    }
}

async fn hello() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "Hi": "from djook" }))
}

async fn status(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "persons": state.search.dataset().len(),
        "region": state.region,
        "similarity_threshold": state.search.options().similarity_threshold,
    }))
}

async fn search_person(
    State(state): State<AppState>,
    SearchPayload(body): SearchPayload,
) -> Result<Json<SearchResult>, ApiError> {
    let request_id = Uuid::new_v4();
    let target = TargetImage::from_base64(&body.image)?;
    tracing::info!(
        %request_id,
        len = target.len(),
        format = ?target.format(),
        "search-person requested"
    );

    let result = tokio::time::timeout(
        state.search_timeout,
        state.search.search(&target, Some(&state.shutdown)),
    )
    .await
    .map_err(|_| ApiError::Timeout(state.search_timeout))??;

    tracing::info!(%request_id, matched = ?result.names(), "search-person answered");
    Ok(Json(result))
}
