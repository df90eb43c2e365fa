use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;

use super::{ask, respond, AppState};
use crate::models::{
    users::{AccountUpdate, BalanceChange, NewUser, Onboarding},
    UserId,
};
use crate::services::users::UserRequest;

pub(super) async fn start(State(state): State<AppState>, Json(req): Json<NewUser>) -> impl IntoResponse {
    let result = ask(&state.user_channel, |response| UserRequest::Start {
        user_id: req.user_id,
        referral_code: req.referral_code,
        response,
    })
    .await;

    let status = match &result {
        Ok(Onboarding::Returning { .. }) => StatusCode::OK,
        _ => StatusCode::CREATED,
    };
    respond(status, result)
}

pub(super) async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<UserId>,
) -> impl IntoResponse {
    let result = ask(&state.user_channel, |response| UserRequest::GetUser { id, response }).await;
    respond(StatusCode::OK, result)
}

pub(super) async fn set_account_number(
    State(state): State<AppState>,
    Path(id): Path<UserId>,
    Json(req): Json<AccountUpdate>,
) -> impl IntoResponse {
    let result = ask(&state.user_channel, |response| UserRequest::SetAccountNumber {
        id,
        account_number: req.account_number,
        response,
    })
    .await;
    respond(StatusCode::OK, result)
}

pub(super) async fn credit(
    State(state): State<AppState>,
    Path(id): Path<UserId>,
    Json(req): Json<BalanceChange>,
) -> impl IntoResponse {
    let result = ask(&state.user_channel, |response| UserRequest::Credit {
        id,
        amount: req.amount_in_cents,
        response,
    })
    .await;
    respond(StatusCode::OK, result.map(|balance| json!({"balance": balance})))
}

pub(super) async fn debit(
    State(state): State<AppState>,
    Path(id): Path<UserId>,
    Json(req): Json<BalanceChange>,
) -> impl IntoResponse {
    let result = ask(&state.user_channel, |response| UserRequest::Debit {
        id,
        amount: req.amount_in_cents,
        response,
    })
    .await;
    respond(StatusCode::OK, result.map(|balance| json!({"balance": balance})))
}

pub(super) async fn stats(State(state): State<AppState>) -> impl IntoResponse {
    let result = ask(&state.user_channel, |response| UserRequest::Stats { response }).await;
    respond(StatusCode::OK, result)
}

pub(super) async fn pending_registrations(State(state): State<AppState>) -> impl IntoResponse {
    let result = ask(&state.user_channel, |response| {
        UserRequest::PendingRegistrations { response }
    })
    .await;
    respond(StatusCode::OK, result)
}

pub(super) async fn reconcile(State(state): State<AppState>) -> impl IntoResponse {
    let result = ask(&state.user_channel, |response| UserRequest::Reconcile { response }).await;
    respond(StatusCode::OK, result.map(|completed| json!({"completed": completed})))
}
