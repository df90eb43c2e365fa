use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::models::ChatId;

mod telegram;

pub use telegram::BotApiFetcher;

#[async_trait]
pub trait InviteLinkFetcher: Send + Sync + 'static {
    async fn fetch_invite_link(&self, chat_id: ChatId) -> Result<String, anyhow::Error>;
}

/// Invite links by chat. Entries are never invalidated.
#[derive(Clone)]
pub struct InviteLinkCache {
    fetcher: Arc<dyn InviteLinkFetcher>,
    links: Arc<RwLock<HashMap<ChatId, String>>>,
}

impl InviteLinkCache {
    pub fn new(fetcher: Arc<dyn InviteLinkFetcher>) -> Self {
        Self {
            fetcher,
            links: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn get_or_fetch(&self, chat_id: ChatId) -> Result<String, anyhow::Error> {
        if let Some(link) = self.links.read().await.get(&chat_id) {
            return Ok(link.clone());
        }

        let mut links = self.links.write().await;
        // Another task may have filled the entry while we waited for the write lock.
        if let Some(link) = links.get(&chat_id) {
            return Ok(link.clone());
        }

        let link = self.fetcher.fetch_invite_link(chat_id).await.map_err(|e| {
            log::error!("Could not fetch invite link for chat {}: {}", chat_id, e);
            e
        })?;
        links.insert(chat_id, link.clone());

        Ok(link)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingFetcher {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl InviteLinkFetcher for CountingFetcher {
        async fn fetch_invite_link(&self, chat_id: ChatId) -> Result<String, anyhow::Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            if self.fail {
                anyhow::bail!("chat {chat_id} unavailable");
            }
            Ok(format!("https://t.me/+invite{chat_id}"))
        }
    }

    fn fetcher(fail: bool) -> Arc<CountingFetcher> {
        Arc::new(CountingFetcher {
            calls: AtomicUsize::new(0),
            fail,
        })
    }

    #[tokio::test]
    async fn concurrent_misses_fetch_once() {
        let fetcher = fetcher(false);
        let cache = InviteLinkCache::new(fetcher.clone());

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.get_or_fetch(-100).await })
            })
            .collect();

        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), "https://t.me/+invite-100");
        }
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn chats_are_cached_independently() {
        let fetcher = fetcher(false);
        let cache = InviteLinkCache::new(fetcher.clone());

        cache.get_or_fetch(1).await.unwrap();
        cache.get_or_fetch(2).await.unwrap();
        cache.get_or_fetch(1).await.unwrap();

        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_fetches_are_not_cached() {
        let fetcher = fetcher(true);
        let cache = InviteLinkCache::new(fetcher.clone());

        assert!(cache.get_or_fetch(5).await.is_err());
        assert!(cache.get_or_fetch(5).await.is_err());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }
}
