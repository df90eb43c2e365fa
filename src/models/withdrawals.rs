use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::amounts::{format_cents, parse_cents};
use super::{Cents, ChannelId, UserId};

const CONFIRMATION_PREFIX: &str = "confirm_withdrawal";

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Deserialize, Serialize)]
pub struct SessionKey {
    pub user_id: UserId,
    pub channel_id: ChannelId,
}

impl SessionKey {
    pub fn new(user_id: UserId, channel_id: ChannelId) -> Self {
        Self {
            user_id,
            channel_id,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawalState {
    Idle,
    AwaitingAmount,
    PendingConfirmation,
    Resolved,
    Cancelled,
}

impl WithdrawalState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WithdrawalState::Resolved | WithdrawalState::Cancelled)
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct WithdrawalSession {
    pub id: Uuid,
    pub key: SessionKey,
    pub state: WithdrawalState,
    pub amount: Option<Cents>,
    pub account_snapshot: i64,
    pub opened_at: DateTime<Utc>,
}

impl WithdrawalSession {
    pub fn open(key: SessionKey, account_snapshot: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            key,
            state: WithdrawalState::AwaitingAmount,
            amount: None,
            account_snapshot,
            opened_at: Utc::now(),
        }
    }
}

/// Returned once the requester's funds are held and the admin channel has been told.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PendingWithdrawal {
    pub session: WithdrawalSession,
    pub remaining_balance: Cents,
    pub token: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Resolution {
    pub session_id: Uuid,
    pub key: SessionKey,
    pub amount: Cents,
    pub account_number: i64,
    pub state: WithdrawalState,
    pub resolved_at: DateTime<Utc>,
}

/// Admin approval for a held withdrawal, wire form `confirm_withdrawal.<user_id>.<amount>`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ConfirmationToken {
    pub user_id: UserId,
    pub amount: Cents,
}

impl ConfirmationToken {
    pub fn new(user_id: UserId, amount: Cents) -> Self {
        Self { user_id, amount }
    }
}

impl fmt::Display for ConfirmationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}",
            CONFIRMATION_PREFIX,
            self.user_id,
            format_cents(self.amount)
        )
    }
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("unexpected prefix")]
    Prefix,
    #[error("missing field: {0}")]
    Missing(&'static str),
    #[error("malformed user id: {0}")]
    UserId(String),
    #[error("malformed amount: {0}")]
    Amount(String),
}

impl FromStr for ConfirmationToken {
    type Err = TokenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // The amount may carry its own decimal point, so only split twice.
        let mut parts = s.trim().splitn(3, '.');

        if parts.next() != Some(CONFIRMATION_PREFIX) {
            return Err(TokenError::Prefix);
        }

        let user_id = parts.next().ok_or(TokenError::Missing("user_id"))?;
        let amount = parts.next().ok_or(TokenError::Missing("amount"))?;

        let user_id = user_id
            .parse::<UserId>()
            .ok()
            .filter(|id| *id > 0)
            .ok_or_else(|| TokenError::UserId(user_id.to_string()))?;
        let amount = parse_cents(amount).ok_or_else(|| TokenError::Amount(amount.to_string()))?;

        Ok(Self { user_id, amount })
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct AmountMessage {
    pub text: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Confirmation {
    pub token: String,
}
