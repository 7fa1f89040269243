use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{routing::{get, post}, Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, sync::Arc};
use tokio::sync::RwLock;
use tracing::info;

use crate::client::DashboardSource;
use crate::controller::{self, Controller, DashboardView, Phase};
use crate::error::SelectError;
use crate::history::{ConversationView, SessionListItem};

#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<RwLock<Controller>>,
    pub source: Arc<dyn DashboardSource>,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(controller: Controller, source: Arc<dyn DashboardSource>) -> Self {
        Self { controller: Arc::new(RwLock::new(controller)), source, metrics: None }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(status: StatusCode, error: impl ToString) -> Response {
    (status, Json(ErrorBody { error: error.to_string() })).into_response()
}

async fn get_dashboard(State(state): State<AppState>) -> Json<DashboardView> {
    Json(state.controller.read().await.view())
}

async fn post_refresh(State(state): State<AppState>) -> Response {
    controller::refresh(&state.controller, state.source.as_ref()).await;
    let view = state.controller.read().await.view();
    match &view.phase {
        Phase::Error { message } => error_response(StatusCode::BAD_GATEWAY, message),
        _ => Json(view).into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    search: Option<String>,
}

async fn list_sessions(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Json<Vec<SessionListItem>> {
    let term = params.search.unwrap_or_default();
    Json(state.controller.read().await.search(&term))
}

async fn select_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ConversationView>, Response> {
    let mut controller = state.controller.write().await;
    controller.select(&id).map(Json).map_err(|e| {
        let status = match e {
            SelectError::NotLoaded => StatusCode::CONFLICT,
            SelectError::UnknownSession(_) => StatusCode::NOT_FOUND,
        };
        error_response(status, e)
    })
}

async fn render_metrics(State(state): State<AppState>) -> Result<String, StatusCode> {
    state.metrics.as_ref().map(|h| h.render()).ok_or(StatusCode::NOT_FOUND)
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/dashboard", get(get_dashboard))
        .route("/api/refresh", post(post_refresh))
        .route("/api/sessions", get(list_sessions))
        .route("/api/sessions/:id/select", post(select_session))
        .route("/metrics", get(render_metrics))
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    serve_on(listener, state).await
}

/// Loads the dashboard once, then serves it until ctrl-c.
pub async fn serve_on(listener: tokio::net::TcpListener, state: AppState) -> anyhow::Result<()> {
    let initial = state.clone();
    tokio::spawn(async move {
        controller::refresh(&initial.controller, initial.source.as_ref()).await;
    });

    info!(addr = %listener.local_addr()?, "dashboard listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}
