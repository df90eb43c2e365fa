use std::fmt;

use crate::models::{
    users::RegistrationStage,
    withdrawals::{TokenError, WithdrawalState},
    Cents, UserId,
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Duplicate user: {0}")]
    Duplicate(UserId),
    #[error("Unsupported store operation: {0}")]
    Unsupported(&'static str),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Store error: {0}")]
    Backend(String),
}

/// What was left behind when a multi-step operation stopped halfway.
#[derive(Clone, Debug, PartialEq)]
pub enum PartialState {
    Referral {
        referrer_id: UserId,
        user_id: UserId,
        stage: RegistrationStage,
    },
    Compensation {
        user_id: UserId,
        amount: Cents,
    },
}

impl fmt::Display for PartialState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartialState::Referral {
                referrer_id,
                user_id,
                stage,
            } => write!(
                f,
                "referral {referrer_id} -> {user_id} stopped at {stage:?}"
            ),
            PartialState::Compensation { user_id, amount } => write!(
                f,
                "compensating credit of {amount} cents for user {user_id} not applied"
            ),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("User not found: {0}")]
    NotFound(UserId),
    #[error("User already exists: {0}")]
    DuplicateUser(UserId),
    #[error("Insufficient balance for user {user_id}: requested {requested} cents")]
    InsufficientBalance { user_id: UserId, requested: Cents },
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
    #[error("Invalid account number: {0}")]
    InvalidAccountNumber(i64),
    #[error("Invalid referral code: {0}")]
    InvalidReferralCode(String),
    #[error("Store failure: {message}{}", .partial.as_ref().map(|p| format!(" ({p})")).unwrap_or_default())]
    StoreFailure {
        message: String,
        partial: Option<PartialState>,
    },
}

impl LedgerError {
    pub fn partial(error: impl fmt::Display, partial: PartialState) -> Self {
        LedgerError::StoreFailure {
            message: error.to_string(),
            partial: Some(partial),
        }
    }
}

impl From<StoreError> for LedgerError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Duplicate(id) => LedgerError::DuplicateUser(id),
            other => LedgerError::StoreFailure {
                message: other.to_string(),
                partial: None,
            },
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WithdrawalError {
    #[error("No balance to withdraw")]
    NoBalance,
    #[error("No account number to withdraw to")]
    NoAccountNumber,
    #[error("A withdrawal is already in progress: {0:?}")]
    SessionInProgress(WithdrawalState),
    #[error("Not waiting for a withdrawal amount: {0:?}")]
    NotAwaitingAmount(WithdrawalState),
    #[error("No pending withdrawal of {amount} cents for user {user_id}")]
    NoPendingWithdrawal { user_id: UserId, amount: Cents },
    #[error("Invalid confirmation token: {0}")]
    InvalidToken(#[from] TokenError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl From<StoreError> for WithdrawalError {
    fn from(error: StoreError) -> Self {
        WithdrawalError::Ledger(error.into())
    }
}
