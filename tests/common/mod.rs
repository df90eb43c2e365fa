#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use referral_ledger::errors::StoreError;
use referral_ledger::models::{users::User, Cents, UserId};
use referral_ledger::repositories::sessions::MemorySessionStore;
use referral_ledger::repositories::users::{
    FieldUpdate, MemoryUserStore, StoreCapabilities, UpdateOutcome, UserStore,
};
use referral_ledger::services::ledger::DebitStrategy;
use referral_ledger::services::notifications::{ChannelNotifier, Notice, Recipient};
use referral_ledger::services::LedgerCore;

pub const BONUS: Cents = 1000;

pub fn core_with(
    store: Arc<dyn UserStore>,
    strategy: DebitStrategy,
) -> (LedgerCore, mpsc::Receiver<(Recipient, Notice)>) {
    let (tx, rx) = mpsc::channel(64);
    let core = LedgerCore::new(
        store,
        Arc::new(MemorySessionStore::new()),
        Arc::new(ChannelNotifier::new(tx)),
        BONUS,
        strategy,
    );
    (core, rx)
}

pub fn core() -> (LedgerCore, mpsc::Receiver<(Recipient, Notice)>) {
    core_with(Arc::new(MemoryUserStore::new()), DebitStrategy::Conditional)
}

pub fn drain(rx: &mut mpsc::Receiver<(Recipient, Notice)>) -> Vec<(Recipient, Notice)> {
    let mut notices = Vec::new();
    while let Ok(notice) = rx.try_recv() {
        notices.push(notice);
    }
    notices
}

/// A basic store whose individual primitives can be made to fail.
#[derive(Clone)]
pub struct FlakyStore {
    pub inner: MemoryUserStore,
    pub fail_push: Arc<AtomicBool>,
    pub fail_increment: Arc<AtomicBool>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryUserStore::basic(),
            fail_push: Arc::default(),
            fail_increment: Arc::default(),
        }
    }
}

#[async_trait]
impl UserStore for FlakyStore {
    fn capabilities(&self) -> StoreCapabilities {
        self.inner.capabilities()
    }

    async fn exists(&self, id: UserId) -> Result<bool, StoreError> {
        self.inner.exists(id).await
    }

    async fn insert(&self, user: User) -> Result<(), StoreError> {
        self.inner.insert(user).await
    }

    async fn update(&self, id: UserId, update: FieldUpdate) -> Result<UpdateOutcome, StoreError> {
        let failing = match update {
            FieldUpdate::PushReferredUser(_) => &self.fail_push,
            FieldUpdate::IncrementBalance(_) => &self.fail_increment,
            _ => return self.inner.update(id, update).await,
        };
        if failing.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("connection reset".to_string()));
        }
        self.inner.update(id, update).await
    }

    async fn find_one(&self, id: UserId) -> Result<Option<User>, StoreError> {
        self.inner.find_one(id).await
    }

    async fn find_all(&self) -> Result<Vec<User>, StoreError> {
        self.inner.find_all().await
    }
}

/// Records every balance a store update hands back.
#[derive(Clone)]
pub struct ObservingStore {
    pub inner: MemoryUserStore,
    pub observed: Arc<Mutex<Vec<Cents>>>,
}

impl ObservingStore {
    pub fn new(inner: MemoryUserStore) -> Self {
        Self {
            inner,
            observed: Arc::default(),
        }
    }

    pub fn lowest(&self) -> Cents {
        self.observed
            .lock()
            .unwrap()
            .iter()
            .copied()
            .min()
            .unwrap_or(Cents::MAX)
    }
}

#[async_trait]
impl UserStore for ObservingStore {
    fn capabilities(&self) -> StoreCapabilities {
        self.inner.capabilities()
    }

    async fn exists(&self, id: UserId) -> Result<bool, StoreError> {
        self.inner.exists(id).await
    }

    async fn insert(&self, user: User) -> Result<(), StoreError> {
        self.inner.insert(user).await
    }

    async fn update(&self, id: UserId, update: FieldUpdate) -> Result<UpdateOutcome, StoreError> {
        let outcome = self.inner.update(id, update).await?;
        if let UpdateOutcome::Updated(user) = &outcome {
            self.observed.lock().unwrap().push(user.balance);
        }
        Ok(outcome)
    }

    async fn find_one(&self, id: UserId) -> Result<Option<User>, StoreError> {
        self.inner.find_one(id).await
    }

    async fn find_all(&self) -> Result<Vec<User>, StoreError> {
        self.inner.find_all().await
    }
}
