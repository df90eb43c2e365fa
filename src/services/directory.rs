use std::sync::Arc;

use crate::errors::LedgerError;
use crate::models::{
    users::{DirectoryStats, User},
    UserId,
};
use crate::repositories::users::UserStore;

#[derive(Clone)]
pub struct UserDirectory {
    store: Arc<dyn UserStore>,
}

impl UserDirectory {
    pub fn new(store: Arc<dyn UserStore>) -> Self {
        Self { store }
    }

    /// Only the referral registrar passes a referrer, so the referrer's list stays in sync.
    pub async fn create_user(
        &self,
        id: UserId,
        referrer: Option<UserId>,
    ) -> Result<User, LedgerError> {
        let user = User::new(id, referrer);
        self.store.insert(user.clone()).await.map_err(|e| {
            log::warn!("Could not create user {}: {}", id, e);
            LedgerError::from(e)
        })?;

        log::info!("Created user {} (referrer: {:?})", id, referrer);
        Ok(user)
    }

    pub async fn get_user(&self, id: UserId) -> Result<User, LedgerError> {
        self.find_user(id).await?.ok_or(LedgerError::NotFound(id))
    }

    pub async fn find_user(&self, id: UserId) -> Result<Option<User>, LedgerError> {
        Ok(self.store.find_one(id).await?)
    }

    pub async fn list_all_users(&self) -> Result<Vec<User>, LedgerError> {
        Ok(self.store.find_all().await?)
    }

    pub async fn stats(&self) -> Result<DirectoryStats, LedgerError> {
        let users = self.list_all_users().await?;

        Ok(DirectoryStats {
            total_users: users.len(),
            total_balance: users.iter().map(|u| u.balance).sum(),
        })
    }
}
