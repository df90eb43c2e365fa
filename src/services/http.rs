use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tower_http::trace::TraceLayer;

use super::{users::UserRequest, withdrawals::WithdrawalRequest, ServiceError};
use crate::errors::{LedgerError, WithdrawalError};
use crate::models::ChatId;
use crate::repositories::invite_links::InviteLinkCache;

mod users;
mod withdrawals;

#[derive(Clone)]
struct AppState {
    user_channel: mpsc::Sender<UserRequest>,
    withdrawal_channel: mpsc::Sender<WithdrawalRequest>,
    invite_links: Option<InviteLinkCache>,
}

/// Sends a request built around a fresh reply channel and waits for the answer.
async fn ask<R, T>(
    channel: &mpsc::Sender<R>,
    build: impl FnOnce(oneshot::Sender<Result<T, ServiceError>>) -> R,
) -> Result<T, ServiceError> {
    let (response_tx, response_rx) = oneshot::channel();

    channel
        .send(build(response_tx))
        .await
        .map_err(|e| ServiceError::Communication("HTTP".to_string(), e.to_string()))?;

    response_rx
        .await
        .map_err(|e| ServiceError::Communication("HTTP".to_string(), e.to_string()))?
}

fn ledger_status(error: &LedgerError) -> StatusCode {
    match error {
        LedgerError::NotFound(_) => StatusCode::NOT_FOUND,
        LedgerError::DuplicateUser(_) | LedgerError::InsufficientBalance { .. } => {
            StatusCode::CONFLICT
        }
        LedgerError::InvalidAmount(_)
        | LedgerError::InvalidAccountNumber(_)
        | LedgerError::InvalidReferralCode(_) => StatusCode::BAD_REQUEST,
        LedgerError::StoreFailure { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_status(error: &ServiceError) -> StatusCode {
    match error {
        ServiceError::Ledger(e) | ServiceError::Withdrawal(WithdrawalError::Ledger(e)) => {
            ledger_status(e)
        }
        ServiceError::Withdrawal(WithdrawalError::NoPendingWithdrawal { .. }) => {
            StatusCode::NOT_FOUND
        }
        ServiceError::Withdrawal(WithdrawalError::InvalidToken(_)) => StatusCode::BAD_REQUEST,
        ServiceError::Withdrawal(_) => StatusCode::CONFLICT,
        ServiceError::Communication(..) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn respond<T: Serialize>(
    status: StatusCode,
    result: Result<T, ServiceError>,
) -> (StatusCode, Json<Value>) {
    match result {
        Ok(value) => (status, Json(json!(value))),
        Err(e) => {
            let status = error_status(&e);
            if status == StatusCode::INTERNAL_SERVER_ERROR {
                log::error!("Request failed: {}", e);
            }
            (status, Json(json!({"error": e.to_string()})))
        }
    }
}

async fn get_invite_link(
    State(state): State<AppState>,
    Path(chat_id): Path<ChatId>,
) -> impl IntoResponse {
    let Some(cache) = state.invite_links else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "Invite links are not configured"})),
        );
    };

    match cache.get_or_fetch(chat_id).await {
        Ok(link) => (StatusCode::OK, Json(json!({"invite_link": link}))),
        Err(e) => (
            StatusCode::BAD_GATEWAY,
            Json(json!({"error": e.to_string()})),
        ),
    }
}

pub async fn start_http_server(
    listen: &str,
    user_channel: mpsc::Sender<UserRequest>,
    withdrawal_channel: mpsc::Sender<WithdrawalRequest>,
    invite_links: Option<InviteLinkCache>,
) -> Result<(), anyhow::Error> {
    let app_state = AppState {
        user_channel,
        withdrawal_channel,
        invite_links,
    };

    let app = Router::new()
        .route("/users/start", post(users::start))
        .route("/users/{id}", get(users::get_user))
        .route("/users/{id}/account", put(users::set_account_number))
        .route("/users/{id}/credit", post(users::credit))
        .route("/users/{id}/debit", post(users::debit))
        .route("/stats", get(users::stats))
        .route("/referrals/pending", get(users::pending_registrations))
        .route("/referrals/reconcile", post(users::reconcile))
        .route(
            "/withdrawals/{user_id}/{channel_id}",
            get(withdrawals::state).post(withdrawals::request),
        )
        .route(
            "/withdrawals/{user_id}/{channel_id}/amount",
            post(withdrawals::submit_amount),
        )
        .route(
            "/withdrawals/{user_id}/{channel_id}/cancel",
            post(withdrawals::cancel),
        )
        .route("/withdrawals/confirm", post(withdrawals::confirm))
        .route("/chats/{id}/invite-link", get(get_invite_link))
        .route("/health", get(|| async { "OK" }))
        .with_state(app_state)
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(listen).await?;
    log::info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}
