use serde::{Deserialize, Serialize};

use super::{Cents, UserId};

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, sqlx::FromRow)]
pub struct User {
    pub id: UserId,
    pub referrer: Option<UserId>,
    pub referred_users: Vec<UserId>,
    pub account_number: Option<i64>,
    pub balance: Cents,
}

impl User {
    pub fn new(id: UserId, referrer: Option<UserId>) -> Self {
        Self {
            id,
            referrer,
            referred_users: Vec::new(),
            account_number: None,
            balance: 0,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct NewUser {
    pub user_id: UserId,
    pub referral_code: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct AccountUpdate {
    pub account_number: i64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct BalanceChange {
    pub amount_in_cents: Cents,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DirectoryStats {
    pub total_users: usize,
    pub total_balance: Cents,
}

/// Result of a successful referral registration.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Referral {
    pub referrer_id: UserId,
    pub user_id: UserId,
    pub bonus: Cents,
    pub referrer_balance: Cents,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Onboarding {
    Returning { user: User },
    Registered { user: User },
    Referred { user: User, referral: Referral },
}

impl Onboarding {
    pub fn user(&self) -> &User {
        match self {
            Onboarding::Returning { user }
            | Onboarding::Registered { user }
            | Onboarding::Referred { user, .. } => user,
        }
    }
}

/// How far a non-transactional referral registration got before it stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationStage {
    /// The new user exists but is not yet in the referrer's list.
    UserCreated,
    /// The referrer lists the new user but has not been credited.
    Linked,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PendingRegistration {
    pub referrer_id: UserId,
    pub user_id: UserId,
    pub stage: RegistrationStage,
    pub recorded_at: chrono::DateTime<chrono::Utc>,
}
