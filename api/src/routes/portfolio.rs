use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use domain::{ErrorResponse, TransactionResponse};
use tracing::warn;
use uuid::Uuid;

use crate::{
    services::{PortfolioController, RefreshError, RefreshOutcome, RefreshTrigger},
    state::AppState,
};

type ApiError = (StatusCode, Json<ErrorResponse>);

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/users/:user_id/portfolio/session",
            post(open_session).delete(close_session),
        )
        .route("/users/:user_id/portfolio", get(open_session))
        .route("/users/:user_id/portfolio/refresh", post(pull_to_refresh))
        .route(
            "/users/:user_id/portfolio/prices/refresh",
            post(refresh_prices),
        )
        .route(
            "/users/:user_id/holdings/:holding_id/transactions",
            get(list_transactions),
        )
}

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

fn refresh_error(err: RefreshError) -> ApiError {
    api_error(StatusCode::SERVICE_UNAVAILABLE, err.to_string())
}

/// Answers with the cycle's view, or the last published one when the cycle did not publish.
async fn view_response(controller: &PortfolioController, outcome: RefreshOutcome) -> Response {
    match outcome {
        RefreshOutcome::Published(view) => Json(view).into_response(),
        RefreshOutcome::Superseded | RefreshOutcome::Skipped => match controller.current().await {
            Some(view) => Json(view).into_response(),
            None => api_error(StatusCode::ACCEPTED, "refresh in progress").into_response(),
        },
    }
}

/// Mounts the session on first use; later calls count as a focus refresh.
async fn open_session(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let (controller, outcome) = state
        .sessions
        .open(user_id)
        .await
        .map_err(refresh_error)?;
    Ok(view_response(&controller, outcome).await)
}

async fn close_session(State(state): State<AppState>, Path(user_id): Path<Uuid>) -> StatusCode {
    if state.sessions.close(user_id).await {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn pull_to_refresh(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let Some(controller) = state.sessions.get(user_id).await else {
        return open_session(State(state), Path(user_id)).await;
    };
    let outcome = controller
        .refresh(RefreshTrigger::PullToRefresh)
        .await
        .map_err(refresh_error)?;
    Ok(view_response(&controller, outcome).await)
}

async fn refresh_prices(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let controller: Arc<PortfolioController> = state
        .sessions
        .get(user_id)
        .await
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "no open portfolio session"))?;
    let outcome = controller.refresh_prices().await.map_err(refresh_error)?;
    Ok(view_response(&controller, outcome).await)
}

async fn list_transactions(
    State(state): State<AppState>,
    Path((user_id, holding_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Vec<TransactionResponse>>, ApiError> {
    let transactions = state
        .holdings_repo
        .list_transactions(user_id, holding_id)
        .await
        .map_err(|err| {
            warn!(%user_id, %holding_id, error = ?err, "failed to list transactions");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to load transactions")
        })?;
    Ok(Json(
        transactions
            .into_iter()
            .map(TransactionResponse::from)
            .collect(),
    ))
}
