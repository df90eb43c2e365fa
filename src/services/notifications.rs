use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::models::{Cents, ChannelId, UserId};

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub enum Recipient {
    User(UserId),
    /// The admin-facing channel where withdrawal requests are announced.
    LogChannel,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum Notice {
    ReferralBonus {
        referred_user: UserId,
        amount: Cents,
    },
    WithdrawalRequested {
        user_id: UserId,
        channel_id: ChannelId,
        amount: Cents,
        account_number: i64,
        token: String,
    },
    WithdrawalApproved {
        amount: Cents,
    },
}

/// Fire-and-forget delivery. Implementations swallow and log their own failures.
#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    async fn notify(&self, recipient: Recipient, notice: Notice);
}

pub struct LogNotifier {
    log_channel: ChannelId,
}

impl LogNotifier {
    pub fn new(log_channel: ChannelId) -> Self {
        Self { log_channel }
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, recipient: Recipient, notice: Notice) {
        match recipient {
            Recipient::User(user_id) => log::info!("Notify user {}: {:?}", user_id, notice),
            Recipient::LogChannel => {
                log::info!("Notify log channel {}: {:?}", self.log_channel, notice)
            }
        }
    }
}

/// Forwards notices to a delivery task.
#[derive(Clone)]
pub struct ChannelNotifier {
    sender: mpsc::Sender<(Recipient, Notice)>,
}

impl ChannelNotifier {
    pub fn new(sender: mpsc::Sender<(Recipient, Notice)>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn notify(&self, recipient: Recipient, notice: Notice) {
        if let Err(e) = self.sender.try_send((recipient, notice)) {
            log::warn!("Dropped notification: {}", e);
        }
    }
}
