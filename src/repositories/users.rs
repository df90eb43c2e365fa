use async_trait::async_trait;

use crate::errors::StoreError;
use crate::models::{users::User, Cents, UserId};

mod memory;
mod postgres;

pub use memory::MemoryUserStore;
pub use postgres::PgUserStore;

/// Optional primitives a backing store may offer beyond the basic five.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StoreCapabilities {
    pub conditional_decrement: bool,
    pub transactions: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldUpdate {
    IncrementBalance(Cents),
    /// Applies only if the resulting balance stays non-negative.
    DecrementBalanceIfSufficient(Cents),
    PushReferredUser(UserId),
    SetAccountNumber(i64),
}

#[derive(Clone, Debug, PartialEq)]
pub enum UpdateOutcome {
    Updated(User),
    NotFound,
    ConditionFailed,
}

#[async_trait]
pub trait UserStore: Send + Sync + 'static {
    fn capabilities(&self) -> StoreCapabilities;

    async fn exists(&self, id: UserId) -> Result<bool, StoreError>;

    /// Fails with `StoreError::Duplicate` if the id is taken.
    async fn insert(&self, user: User) -> Result<(), StoreError>;

    /// Applies `update` and returns the document as it is afterwards.
    async fn update(&self, id: UserId, update: FieldUpdate) -> Result<UpdateOutcome, StoreError>;

    async fn find_one(&self, id: UserId) -> Result<Option<User>, StoreError>;

    async fn find_all(&self) -> Result<Vec<User>, StoreError>;

    /// Creates `user_id` under `referrer_id`, links it and credits `bonus` in one commit.
    /// Returns the updated referrer, or `NotFound` if the referrer is missing.
    async fn commit_referral(
        &self,
        _referrer_id: UserId,
        _user_id: UserId,
        _bonus: Cents,
    ) -> Result<UpdateOutcome, StoreError> {
        Err(StoreError::Unsupported("transactions"))
    }
}
