//! HTTP trigger for invocations.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use cadence_scheduler::{InvocationRequest, Publisher, SchedulerError};
use chrono::Utc;
use serde::Deserialize;
use tower_http::trace::TraceLayer;
use tracing::warn;

/// Shared application state.
pub struct AppState {
    pub publisher: Publisher,
}

/// Create the trigger router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/run", get(run).post(run))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
pub struct RunQuery {
    #[serde(alias = "intervalHours")]
    interval_hours: Option<u32>,
    #[serde(alias = "maxAccounts")]
    max_accounts: Option<usize>,
    account: Option<String>,
}

impl RunQuery {
    fn into_request(self) -> InvocationRequest {
        let mut request = InvocationRequest::new(Utc::now());
        if let Some(hours) = self.interval_hours {
            request = request.with_interval_hours(hours);
        }
        if let Some(max) = self.max_accounts {
            request = request.with_max_accounts(max);
        }
        if let Some(account) = self.account.filter(|a| !a.is_empty()) {
            request = request.for_account(account);
        }
        request
    }
}

async fn run(State(state): State<Arc<AppState>>, Query(query): Query<RunQuery>) -> Response {
    match state.publisher.run_invocation(query.into_request()).await {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn health() -> &'static str {
    "ok"
}

fn error_response(err: SchedulerError) -> Response {
    let status = match &err {
        SchedulerError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        SchedulerError::AccountNotFound(_) => StatusCode::NOT_FOUND,
        SchedulerError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        SchedulerError::Corrupt(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    warn!(status = %status, error = %err, "invocation rejected");
    (
        status,
        Json(serde_json::json!({ "error": err.to_string() })),
    )
        .into_response()
}
