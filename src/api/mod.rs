pub mod session;
pub mod views;

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Json, Router,
};
use chrono::Local;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use validator::Validate;

use crate::database::{Metadata, StoreMode};
use crate::export::ExportKind;
use crate::pipeline::Pipeline;
use crate::rcm::{AnalysisDepth, AnalysisOptions};
use session::{Session, SessionError};
use views::{DashboardPage, Views};

const DEFAULT_SEARCH_LIMIT: usize = 5;
const INTERRUPTED: &str = "Analysis was interrupted before it finished";

#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<Pipeline>,
    session: Arc<RwLock<Session>>,
    views: Arc<Views>,
    max_upload_bytes: usize,
}

#[derive(Deserialize, Validate)]
pub struct AnalyzeForm {
    #[validate(length(min = 1, max = 40))]
    depth: String,
    include_recommendations: Option<String>,
}

#[derive(Deserialize, Validate)]
pub struct SearchQuery {
    #[validate(length(min = 1, max = 500))]
    q: String,
    #[validate(range(min = 1, max = 50))]
    limit: Option<usize>,
}

#[derive(Serialize)]
struct ApiResponse {
    status: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    session: &'static str,
    model: Option<String>,
    vector_store: StoreMode,
}

fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ApiResponse { status: message.into() })).into_response()
}

/// Create and configure the web router
pub fn create_api(pipeline: Pipeline, max_upload_bytes: usize) -> Result<Router, minijinja::Error> {
    let state = AppState {
        pipeline: Arc::new(pipeline),
        session: Arc::new(RwLock::new(Session::default())),
        views: Arc::new(Views::new()?),
        max_upload_bytes,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .max_age(std::time::Duration::from_secs(3600));

    Ok(Router::new()
        .route("/", get(dashboard_handler))
        .route("/upload", post(upload_handler))
        .route("/analyze", post(analyze_handler).layer(ConcurrencyLimitLayer::new(1)))
        .route("/clear", post(clear_handler))
        .route("/export/:kind", get(export_handler))
        .route("/api/analysis", get(analysis_handler))
        .route("/api/search", get(search_handler))
        .route("/health", get(health_check))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(cors)
        .with_state(state))
}

async fn dashboard_handler(State(state): State<AppState>) -> Response {
    let page = {
        let mut session = state.session.write().await;
        DashboardPage::from_session(
            &mut session,
            state.pipeline.store_mode() == StoreMode::InMemory,
            state.max_upload_bytes,
        )
    };
    match state.views.dashboard(&page) {
        Ok(html) => Html(html).into_response(),
        Err(e) => {
            error!("Failed to render dashboard: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to render page").into_response()
        }
    }
}

async fn record_error(state: &AppState, message: String) -> Redirect {
    warn!("{}", message);
    state.session.write().await.record_error(message);
    Redirect::to("/")
}

async fn upload_handler(State(state): State<AppState>, mut multipart: Multipart) -> Redirect {
    let allowed = state.session.read().await.can_upload();
    if let Err(e) = allowed {
        return record_error(&state, e.to_string()).await;
    }

    let mut upload = None;
    loop {
        match multipart.next_field().await {
            Ok(Some(field)) if field.name() == Some("file") => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                match field.bytes().await {
                    Ok(bytes) => upload = Some((file_name, bytes.to_vec())),
                    Err(e) => return record_error(&state, format!("Upload failed: {}", e)).await,
                }
                break;
            }
            Ok(Some(_)) => continue,
            Ok(None) => break,
            Err(e) => return record_error(&state, format!("Upload failed: {}", e)).await,
        }
    }

    let Some((file_name, bytes)) = upload.filter(|(name, _)| !name.is_empty()) else {
        return record_error(&state, "Choose a file to upload".to_string()).await;
    };
    info!("Received upload {} ({} bytes)", file_name, bytes.len());

    match state.pipeline.ingest(&file_name, bytes).await {
        Ok(document) => {
            let loaded = state.session.write().await.load(document);
            if let Err(e) = loaded {
                return record_error(&state, e.to_string()).await;
            }
        }
        Err(e) => return record_error(&state, format!("Error processing {}: {}", file_name, e)).await,
    }
    Redirect::to("/")
}

async fn analyze_handler(State(state): State<AppState>, Form(form): Form<AnalyzeForm>) -> Redirect {
    if let Err(e) = form.validate() {
        return record_error(&state, format!("Invalid analysis options: {}", e)).await;
    }
    let depth: AnalysisDepth = match form.depth.parse() {
        Ok(depth) => depth,
        Err(e) => return record_error(&state, e).await,
    };
    let options = AnalysisOptions {
        depth,
        include_recommendations: form
            .include_recommendations
            .as_deref()
            .map_or(false, |v| matches!(v, "true" | "on" | "1" | "yes")),
    };

    let started = state.session.write().await.begin_analysis();
    let document = match started {
        Ok(document) => document,
        Err(e) => return record_error(&state, e.to_string()).await,
    };

    let guard = AnalysisGuard::new(state.session.clone());
    let outcome = state
        .pipeline
        .analyze(&document, &options)
        .await
        .map_err(|e| format!("Analysis failed: {}", e));
    if let Err(message) = &outcome {
        warn!("{}", message);
    }
    state.session.write().await.finish(outcome);
    guard.disarm();
    Redirect::to("/")
}

/// Returns the session to `Ready` when the analyze request is dropped
/// before it finishes, e.g. the client disconnected.
struct AnalysisGuard {
    session: Arc<RwLock<Session>>,
    armed: bool,
}

impl AnalysisGuard {
    fn new(session: Arc<RwLock<Session>>) -> Self {
        Self { session, armed: true }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for AnalysisGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        warn!("Analysis request dropped before completion");
        let outcome = Err(INTERRUPTED.to_string());
        if let Ok(mut session) = self.session.try_write() {
            session.finish(outcome);
            return;
        }
        let session = self.session.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    session.write().await.finish(outcome);
                });
            }
            Err(e) => error!("Could not reset the session after a dropped analysis: {}", e),
        }
    }
}

async fn clear_handler(State(state): State<AppState>) -> Redirect {
    let mut session = state.session.write().await;
    if let Err(e) = session.clear() {
        session.record_error(e.to_string());
    } else {
        info!("Session cleared");
    }
    Redirect::to("/")
}

async fn export_handler(State(state): State<AppState>, Path(kind): Path<String>) -> Response {
    let kind: ExportKind = match kind.parse() {
        Ok(kind) => kind,
        Err(e) => return api_error(StatusCode::NOT_FOUND, e),
    };
    let assessment = state.session.read().await.assessment().cloned();
    let Some(assessment) = assessment else {
        return api_error(StatusCode::NOT_FOUND, SessionError::NoAssessment.to_string());
    };

    match kind.render(&assessment) {
        Ok(bytes) => (
            [
                (header::CONTENT_TYPE, kind.content_type().to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{}\"", kind.file_name(Local::now())),
                ),
            ],
            Body::from(bytes),
        )
            .into_response(),
        Err(e) => {
            error!("Export failed: {}", e);
            api_error(StatusCode::INTERNAL_SERVER_ERROR, format!("Export failed: {}", e))
        }
    }
}

async fn analysis_handler(State(state): State<AppState>) -> Response {
    let session = state.session.read().await;
    match session.assessment() {
        Some(assessment) => Json(assessment.as_ref()).into_response(),
        None if session.phase() == "analyzing" => {
            api_error(StatusCode::CONFLICT, SessionError::AnalysisRunning.to_string())
        }
        None => api_error(StatusCode::NOT_FOUND, SessionError::NoAssessment.to_string()),
    }
}

async fn search_handler(State(state): State<AppState>, Query(query): Query<SearchQuery>) -> Response {
    if let Err(e) = query.validate() {
        return api_error(StatusCode::BAD_REQUEST, e.to_string());
    }
    let filter = state
        .session
        .read()
        .await
        .document()
        .map(|d| Metadata::from([("document_id".to_string(), json!(d.id))]));

    let limit = query.limit.unwrap_or(DEFAULT_SEARCH_LIMIT);
    match state.pipeline.search().search(&query.q, limit, filter.as_ref()).await {
        Ok(results) => Json(results).into_response(),
        Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, format!("Search failed: {}", e)),
    }
}

async fn health_check(State(state): State<AppState>) -> Response {
    let session = state.session.read().await.phase();
    Json(HealthResponse {
        status: "Server is running and healthy".to_string(),
        session,
        model: state.pipeline.model().await,
        vector_store: state.pipeline.store_mode(),
    })
    .into_response()
}
