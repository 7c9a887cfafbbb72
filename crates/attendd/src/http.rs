//! HTTP API: recognition, face registration, and gallery maintenance.

use crate::config::Config;
use crate::engine::{Engine, EngineError};
use crate::store::{FaceRecord, NewFace};
use attend_core::{Embedding, MatchResult};
use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

const SERVICE_NAME: &str = "attend face recognition";
const UNKNOWN_NAME: &str = "Unknown";

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("face {0} not found")]
    FaceNotFound(i64),
    #[error("{0}")]
    InvalidRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::FaceNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::InvalidRequest(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Engine(EngineError::Store(_) | EngineError::Match(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::Engine(_) => StatusCode::UNPROCESSABLE_ENTITY,
        };
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, "request rejected");
        }
        let body = Json(json!({ "status": "error", "detail": self.to_string() }));
        (status, body).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct RecognizeRequest {
    pub embedding: Embedding,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct RecognizeResponse {
    pub status: String,
    #[serde(rename = "match")]
    pub matched: bool,
    pub name: String,
    pub user_id: Option<i64>,
    pub confidence: f64,
}

#[derive(Debug, Deserialize)]
pub struct RegisterFaceRequest {
    pub user_id: i64,
    pub name: String,
    pub embedding: Embedding,
    #[serde(default)]
    pub image_path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FacesQuery {
    pub user_id: Option<i64>,
}

/// Build the API router around a shared engine.
pub fn router(engine: Arc<Engine>, config: &Config) -> Router {
    let cors = cors_layer(&config.allowed_origins);

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/recognize", post(recognize))
        .route("/register-face", post(register_face))
        .route("/faces", get(list_faces))
        .route("/faces/:id", delete(remove_face))
        .route("/gallery/refresh", post(refresh_gallery))
        .with_state(engine)
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

/// CORS for the configured origins. A `*` entry allows any origin, which
/// rules out credentialed requests.
fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE]);

    if allowed_origins.iter().any(|origin| origin == "*") {
        tracing::warn!("CORS allows any origin; credentialed requests disabled");
        return cors.allow_origin(AllowOrigin::any());
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    cors.allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
}

async fn root(State(engine): State<Arc<Engine>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "online",
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "gallery_entries": engine.snapshot().await.len(),
        "embedding_dim": engine.embedding_dim(),
    }))
}

async fn health(State(engine): State<Arc<Engine>>) -> (StatusCode, Json<serde_json::Value>) {
    let database_ok = engine.store_healthy().await;
    let status = if database_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = json!({
        "status": if database_ok { "healthy" } else { "degraded" },
        "database": if database_ok { "connected" } else { "unavailable" },
        "ai_service": "ready",
    });
    (status, Json(body))
}

async fn recognize(
    State(engine): State<Arc<Engine>>,
    Json(req): Json<RecognizeRequest>,
) -> Result<Json<RecognizeResponse>, ApiError> {
    let result = engine.recognize(&req.embedding).await?;

    let response = match result {
        MatchResult::Match {
            identity,
            confidence,
            ..
        } => RecognizeResponse {
            status: "success".into(),
            matched: true,
            name: identity.name,
            user_id: Some(identity.user_id),
            confidence,
        },
        MatchResult::NoMatch => RecognizeResponse {
            status: "success".into(),
            matched: false,
            name: UNKNOWN_NAME.into(),
            user_id: None,
            confidence: 0.0,
        },
    };
    Ok(Json(response))
}

async fn register_face(
    State(engine): State<Arc<Engine>>,
    Json(req): Json<RegisterFaceRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let name = req.name.trim().to_string();
    if name.is_empty() {
        return Err(ApiError::InvalidRequest("name must not be empty".into()));
    }

    let record = engine
        .register(NewFace {
            user_id: req.user_id,
            name,
            embedding: req.embedding,
            image_path: req.image_path,
        })
        .await?;

    Ok(Json(json!({
        "status": "success",
        "message": "Face registered successfully",
        "face_id": record.id,
        "user_id": record.user_id,
        "name": record.name,
    })))
}

async fn list_faces(
    State(engine): State<Arc<Engine>>,
    Query(query): Query<FacesQuery>,
) -> Result<Json<Vec<FaceRecord>>, ApiError> {
    Ok(Json(engine.list_faces(query.user_id).await?))
}

async fn remove_face(
    State(engine): State<Arc<Engine>>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !engine.remove_face(id).await? {
        return Err(ApiError::FaceNotFound(id));
    }
    Ok(Json(json!({ "status": "success", "removed": true })))
}

async fn refresh_gallery(
    State(engine): State<Arc<Engine>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let entries = engine.refresh().await?;
    Ok(Json(json!({ "status": "success", "entries": entries })))
}
