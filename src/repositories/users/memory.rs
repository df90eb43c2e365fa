use std::collections::{hash_map::Entry, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{FieldUpdate, StoreCapabilities, UpdateOutcome, UserStore};
use crate::errors::StoreError;
use crate::models::{users::User, Cents, UserId};

/// Process-local user collection. Every primitive runs under one lock, so
/// single updates are atomic.
#[derive(Clone)]
pub struct MemoryUserStore {
    users: Arc<RwLock<HashMap<UserId, User>>>,
    capabilities: StoreCapabilities,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::with_capabilities(StoreCapabilities {
            conditional_decrement: true,
            transactions: true,
        })
    }

    /// A store offering only the five basic primitives.
    pub fn basic() -> Self {
        Self::with_capabilities(StoreCapabilities::default())
    }

    pub fn with_capabilities(capabilities: StoreCapabilities) -> Self {
        Self {
            users: Arc::new(RwLock::new(HashMap::new())),
            capabilities,
        }
    }
}

impl Default for MemoryUserStore {
    fn default() -> Self {
        Self::new()
    }
}

fn apply(user: &mut User, update: FieldUpdate) -> bool {
    match update {
        FieldUpdate::IncrementBalance(amount) => match user.balance.checked_add(amount) {
            Some(balance) => user.balance = balance,
            None => return false,
        },
        FieldUpdate::DecrementBalanceIfSufficient(amount) => {
            if user.balance < amount {
                return false;
            }
            user.balance -= amount;
        }
        FieldUpdate::PushReferredUser(id) => user.referred_users.push(id),
        FieldUpdate::SetAccountNumber(account_number) => {
            user.account_number = Some(account_number)
        }
    }
    true
}

#[async_trait]
impl UserStore for MemoryUserStore {
    fn capabilities(&self) -> StoreCapabilities {
        self.capabilities
    }

    async fn exists(&self, id: UserId) -> Result<bool, StoreError> {
        Ok(self.users.read().await.contains_key(&id))
    }

    async fn insert(&self, user: User) -> Result<(), StoreError> {
        match self.users.write().await.entry(user.id) {
            Entry::Occupied(_) => Err(StoreError::Duplicate(user.id)),
            Entry::Vacant(slot) => {
                slot.insert(user);
                Ok(())
            }
        }
    }

    async fn update(&self, id: UserId, update: FieldUpdate) -> Result<UpdateOutcome, StoreError> {
        if matches!(update, FieldUpdate::DecrementBalanceIfSufficient(_))
            && !self.capabilities.conditional_decrement
        {
            return Err(StoreError::Unsupported("conditional decrement"));
        }

        let mut users = self.users.write().await;
        let Some(user) = users.get_mut(&id) else {
            return Ok(UpdateOutcome::NotFound);
        };

        if apply(user, update) {
            Ok(UpdateOutcome::Updated(user.clone()))
        } else {
            Ok(UpdateOutcome::ConditionFailed)
        }
    }

    async fn find_one(&self, id: UserId) -> Result<Option<User>, StoreError> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn find_all(&self) -> Result<Vec<User>, StoreError> {
        let mut users: Vec<User> = self.users.read().await.values().cloned().collect();
        users.sort_by_key(|u| u.id);
        Ok(users)
    }

    async fn commit_referral(
        &self,
        referrer_id: UserId,
        user_id: UserId,
        bonus: Cents,
    ) -> Result<UpdateOutcome, StoreError> {
        if !self.capabilities.transactions {
            return Err(StoreError::Unsupported("transactions"));
        }

        let mut users = self.users.write().await;
        if !users.contains_key(&referrer_id) {
            return Ok(UpdateOutcome::NotFound);
        }
        if users.contains_key(&user_id) {
            return Err(StoreError::Duplicate(user_id));
        }

        users.insert(user_id, User::new(user_id, Some(referrer_id)));
        match users.get_mut(&referrer_id) {
            Some(referrer) => {
                referrer.referred_users.push(user_id);
                referrer.balance += bonus;
                Ok(UpdateOutcome::Updated(referrer.clone()))
            }
            None => Ok(UpdateOutcome::NotFound),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_rejects_duplicates_without_touching_the_original() {
        let store = MemoryUserStore::new();
        store.insert(User::new(7, None)).await.unwrap();
        store
            .update(7, FieldUpdate::IncrementBalance(3))
            .await
            .unwrap();

        let err = store.insert(User::new(7, Some(1))).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(7)));

        let user = store.find_one(7).await.unwrap().unwrap();
        assert_eq!(user.balance, 3);
        assert_eq!(user.referrer, None);
    }

    #[tokio::test]
    async fn conditional_decrement_refuses_to_go_negative() {
        let store = MemoryUserStore::new();
        store.insert(User::new(1, None)).await.unwrap();
        store
            .update(1, FieldUpdate::IncrementBalance(10))
            .await
            .unwrap();

        let outcome = store
            .update(1, FieldUpdate::DecrementBalanceIfSufficient(12))
            .await
            .unwrap();
        assert_eq!(outcome, UpdateOutcome::ConditionFailed);

        let outcome = store
            .update(1, FieldUpdate::DecrementBalanceIfSufficient(10))
            .await
            .unwrap();
        match outcome {
            UpdateOutcome::Updated(user) => assert_eq!(user.balance, 0),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn basic_store_has_no_conditional_primitives() {
        let store = MemoryUserStore::basic();
        store.insert(User::new(1, None)).await.unwrap();

        assert!(matches!(
            store
                .update(1, FieldUpdate::DecrementBalanceIfSufficient(1))
                .await,
            Err(StoreError::Unsupported(_))
        ));
        assert!(matches!(
            store.commit_referral(1, 2, 10).await,
            Err(StoreError::Unsupported(_))
        ));
    }

    #[tokio::test]
    async fn update_on_missing_user_reports_not_found() {
        let store = MemoryUserStore::new();
        let outcome = store
            .update(9, FieldUpdate::SetAccountNumber(123))
            .await
            .unwrap();
        assert_eq!(outcome, UpdateOutcome::NotFound);
    }
}
