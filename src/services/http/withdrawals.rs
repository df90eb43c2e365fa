use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;

use super::{ask, respond, AppState};
use crate::models::{
    withdrawals::{AmountMessage, Confirmation, SessionKey},
    ChannelId, UserId,
};
use crate::services::withdrawals::WithdrawalRequest;

pub(super) async fn state(
    State(state): State<AppState>,
    Path((user_id, channel_id)): Path<(UserId, ChannelId)>,
) -> impl IntoResponse {
    let key = SessionKey::new(user_id, channel_id);
    let result = ask(&state.withdrawal_channel, |response| WithdrawalRequest::State {
        key,
        response,
    })
    .await;
    respond(StatusCode::OK, result.map(|s| json!({"state": s})))
}

pub(super) async fn request(
    State(state): State<AppState>,
    Path((user_id, channel_id)): Path<(UserId, ChannelId)>,
) -> impl IntoResponse {
    let key = SessionKey::new(user_id, channel_id);
    let result = ask(&state.withdrawal_channel, |response| WithdrawalRequest::Request {
        key,
        response,
    })
    .await;
    respond(StatusCode::CREATED, result)
}

pub(super) async fn submit_amount(
    State(state): State<AppState>,
    Path((user_id, channel_id)): Path<(UserId, ChannelId)>,
    Json(req): Json<AmountMessage>,
) -> impl IntoResponse {
    let key = SessionKey::new(user_id, channel_id);
    let result = ask(&state.withdrawal_channel, |response| {
        WithdrawalRequest::SubmitAmount {
            key,
            text: req.text,
            response,
        }
    })
    .await;
    respond(StatusCode::ACCEPTED, result)
}

pub(super) async fn cancel(
    State(state): State<AppState>,
    Path((user_id, channel_id)): Path<(UserId, ChannelId)>,
) -> impl IntoResponse {
    let key = SessionKey::new(user_id, channel_id);
    let result = ask(&state.withdrawal_channel, |response| WithdrawalRequest::Cancel {
        key,
        response,
    })
    .await;
    respond(StatusCode::OK, result.map(|s| json!({"state": s})))
}

pub(super) async fn confirm(
    State(state): State<AppState>,
    Json(req): Json<Confirmation>,
) -> impl IntoResponse {
    let result = ask(&state.withdrawal_channel, |response| WithdrawalRequest::Confirm {
        token: req.token,
        response,
    })
    .await;
    respond(StatusCode::OK, result)
}
