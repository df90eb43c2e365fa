use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{oneshot, Mutex, OwnedMutexGuard};

use super::directory::UserDirectory;
use super::ledger::BalanceLedger;
use super::notifications::{Notice, Notifier, Recipient};
use super::{RequestHandler, Service, ServiceError};
use crate::errors::{LedgerError, WithdrawalError};
use crate::models::{
    amounts::{format_cents, parse_cents},
    withdrawals::{
        ConfirmationToken, PendingWithdrawal, Resolution, SessionKey, WithdrawalSession,
        WithdrawalState,
    },
    Cents,
};
use crate::repositories::sessions::SessionStore;

/// Per-(user, channel) withdrawal conversations.
///
/// `request` opens a session awaiting an amount, `submit_amount` debits the
/// ledger and parks the session until an admin `confirm`s it. Terminal
/// sessions are removed from the store, so a later `request` starts fresh.
///
/// Transitions for one key run under that key's mutex. A mutex lives in
/// `locks` only while some task holds or waits for it.
#[derive(Clone)]
pub struct WithdrawalWorkflow {
    directory: UserDirectory,
    ledger: BalanceLedger,
    sessions: Arc<dyn SessionStore>,
    notifier: Arc<dyn Notifier>,
    locks: Arc<DashMap<SessionKey, Arc<Mutex<()>>>>,
}

fn parse_amount(text: &str) -> Result<Cents, LedgerError> {
    parse_cents(text).ok_or_else(|| LedgerError::InvalidAmount(text.trim().to_string()))
}

impl WithdrawalWorkflow {
    pub fn new(
        directory: UserDirectory,
        ledger: BalanceLedger,
        sessions: Arc<dyn SessionStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            directory,
            ledger,
            sessions,
            notifier,
            locks: Arc::new(DashMap::new()),
        }
    }

    async fn lock(&self, key: SessionKey) -> OwnedMutexGuard<()> {
        let lock = self.locks.entry(key).or_default().clone();
        lock.lock_owned().await
    }

    fn unlock(&self, key: SessionKey, guard: OwnedMutexGuard<()>) {
        drop(guard);
        // Clones are only taken under the map's shard lock, so a count of one
        // means no task holds or waits for this mutex.
        self.locks
            .remove_if(&key, |_, lock| Arc::strong_count(lock) == 1);
    }

    pub async fn state(&self, key: SessionKey) -> Result<WithdrawalState, WithdrawalError> {
        Ok(self
            .sessions
            .load(key)
            .await?
            .map(|s| s.state)
            .unwrap_or(WithdrawalState::Idle))
    }

    pub async fn request(&self, key: SessionKey) -> Result<WithdrawalSession, WithdrawalError> {
        let user = self.directory.get_user(key.user_id).await?;
        if user.balance <= 0 {
            log::warn!("User {} requested a withdrawal with no balance", key.user_id);
            return Err(WithdrawalError::NoBalance);
        }
        let Some(account_number) = user.account_number else {
            log::warn!("User {} requested a withdrawal with no account", key.user_id);
            return Err(WithdrawalError::NoAccountNumber);
        };

        let guard = self.lock(key).await;
        let result = self.open_session(key, account_number).await;
        self.unlock(key, guard);

        result
    }

    async fn open_session(
        &self,
        key: SessionKey,
        account_number: i64,
    ) -> Result<WithdrawalSession, WithdrawalError> {
        if let Some(session) = self.sessions.load(key).await? {
            if !session.state.is_terminal() {
                return Err(WithdrawalError::SessionInProgress(session.state));
            }
        }

        let session = WithdrawalSession::open(key, account_number);
        self.sessions.save(session.clone()).await?;
        log::info!("Opened withdrawal session {} for {:?}", session.id, key);

        Ok(session)
    }

    pub async fn submit_amount(
        &self,
        key: SessionKey,
        text: &str,
    ) -> Result<PendingWithdrawal, WithdrawalError> {
        let guard = self.lock(key).await;
        let result = self.hold_amount(key, text).await;
        self.unlock(key, guard);

        result
    }

    async fn hold_amount(
        &self,
        key: SessionKey,
        text: &str,
    ) -> Result<PendingWithdrawal, WithdrawalError> {
        let mut session = match self.sessions.load(key).await? {
            Some(session) if session.state == WithdrawalState::AwaitingAmount => session,
            Some(session) => return Err(WithdrawalError::NotAwaitingAmount(session.state)),
            None => return Err(WithdrawalError::NotAwaitingAmount(WithdrawalState::Idle)),
        };

        let amount = parse_amount(text)?;

        let user = match self.directory.get_user(key.user_id).await {
            Ok(user) => user,
            Err(e) => return Err(self.abort(session, e).await),
        };
        if amount > user.balance {
            return Err(LedgerError::InsufficientBalance {
                user_id: key.user_id,
                requested: amount,
            }
            .into());
        }

        let remaining_balance = match self.ledger.debit(key.user_id, amount).await {
            Ok(balance) => balance,
            Err(e @ LedgerError::InsufficientBalance { .. }) => return Err(e.into()),
            Err(e) => return Err(self.abort(session, e).await),
        };

        session.state = WithdrawalState::PendingConfirmation;
        session.amount = Some(amount);
        if let Err(e) = self.sessions.save(session.clone()).await {
            log::error!(
                "Could not hold withdrawal {} after debit, returning funds: {}",
                session.id,
                e
            );
            if let Err(refund) = self.ledger.credit(key.user_id, amount).await {
                log::error!(
                    "Could not return {} to user {}: {}",
                    format_cents(amount),
                    key.user_id,
                    refund
                );
            }
            return Err(e.into());
        }

        let token = ConfirmationToken::new(key.user_id, amount).to_string();
        log::info!(
            "Withdrawal {} of {} held for user {}, balance {}",
            session.id,
            format_cents(amount),
            key.user_id,
            format_cents(remaining_balance)
        );
        self.notifier
            .notify(
                Recipient::LogChannel,
                Notice::WithdrawalRequested {
                    user_id: key.user_id,
                    channel_id: key.channel_id,
                    amount,
                    account_number: session.account_snapshot,
                    token: token.clone(),
                },
            )
            .await;

        Ok(PendingWithdrawal {
            session,
            remaining_balance,
            token,
        })
    }

    pub async fn cancel(&self, key: SessionKey) -> Result<WithdrawalState, WithdrawalError> {
        let guard = self.lock(key).await;
        let result = self.cancel_session(key).await;
        self.unlock(key, guard);

        result
    }

    async fn cancel_session(&self, key: SessionKey) -> Result<WithdrawalState, WithdrawalError> {
        match self.sessions.load(key).await? {
            Some(session) if session.state == WithdrawalState::AwaitingAmount => {
                self.sessions.remove(key).await?;
                log::info!("Cancelled withdrawal session {}", session.id);
                Ok(WithdrawalState::Cancelled)
            }
            Some(session) => Err(WithdrawalError::NotAwaitingAmount(session.state)),
            None => Err(WithdrawalError::NotAwaitingAmount(WithdrawalState::Idle)),
        }
    }

    /// Resolves the oldest held withdrawal matching the token. A token whose
    /// withdrawal was already resolved is rejected with `NoPendingWithdrawal`.
    pub async fn confirm(&self, token: &str) -> Result<Resolution, WithdrawalError> {
        let token: ConfirmationToken = token.parse()?;

        let candidates: Vec<SessionKey> = self
            .sessions
            .for_user(token.user_id)
            .await?
            .into_iter()
            .filter(|s| Self::matches(s, &token))
            .map(|s| s.key)
            .collect();

        for key in candidates {
            let guard = self.lock(key).await;
            let resolved = self.resolve(key, &token).await;
            self.unlock(key, guard);

            if let Some(resolution) = resolved? {
                return Ok(resolution);
            }
        }

        log::warn!(
            "No pending withdrawal of {} for user {}",
            format_cents(token.amount),
            token.user_id
        );
        Err(WithdrawalError::NoPendingWithdrawal {
            user_id: token.user_id,
            amount: token.amount,
        })
    }

    async fn resolve(
        &self,
        key: SessionKey,
        token: &ConfirmationToken,
    ) -> Result<Option<Resolution>, WithdrawalError> {
        // Re-check under the lock; a concurrent confirmation may have won.
        let Some(session) = self.sessions.load(key).await? else {
            return Ok(None);
        };
        if !Self::matches(&session, token) {
            return Ok(None);
        }

        self.sessions.remove(key).await?;
        log::info!(
            "Withdrawal {} of {} for user {} approved",
            session.id,
            format_cents(token.amount),
            token.user_id
        );
        self.notifier
            .notify(
                Recipient::User(token.user_id),
                Notice::WithdrawalApproved {
                    amount: token.amount,
                },
            )
            .await;

        Ok(Some(Resolution {
            session_id: session.id,
            key,
            amount: token.amount,
            account_number: session.account_snapshot,
            state: WithdrawalState::Resolved,
            resolved_at: Utc::now(),
        }))
    }

    fn matches(session: &WithdrawalSession, token: &ConfirmationToken) -> bool {
        session.state == WithdrawalState::PendingConfirmation && session.amount == Some(token.amount)
    }

    async fn abort(&self, session: WithdrawalSession, error: LedgerError) -> WithdrawalError {
        log::error!("Aborting withdrawal session {}: {}", session.id, error);
        if let Err(e) = self.sessions.remove(session.key).await {
            log::error!("Could not discard withdrawal session {}: {}", session.id, e);
        }
        error.into()
    }
}

pub enum WithdrawalRequest {
    Request {
        key: SessionKey,
        response: oneshot::Sender<Result<WithdrawalSession, ServiceError>>,
    },
    SubmitAmount {
        key: SessionKey,
        text: String,
        response: oneshot::Sender<Result<PendingWithdrawal, ServiceError>>,
    },
    Cancel {
        key: SessionKey,
        response: oneshot::Sender<Result<WithdrawalState, ServiceError>>,
    },
    Confirm {
        token: String,
        response: oneshot::Sender<Result<Resolution, ServiceError>>,
    },
    State {
        key: SessionKey,
        response: oneshot::Sender<Result<WithdrawalState, ServiceError>>,
    },
}

#[derive(Clone)]
pub struct WithdrawalRequestHandler {
    workflow: WithdrawalWorkflow,
}

impl WithdrawalRequestHandler {
    pub fn new(workflow: WithdrawalWorkflow) -> Self {
        Self { workflow }
    }
}

#[async_trait]
impl RequestHandler<WithdrawalRequest> for WithdrawalRequestHandler {
    async fn handle_request(&self, request: WithdrawalRequest) {
        match request {
            WithdrawalRequest::Request { key, response } => {
                let result = self.workflow.request(key).await;
                let _ = response.send(result.map_err(ServiceError::from));
            }
            WithdrawalRequest::SubmitAmount {
                key,
                text,
                response,
            } => {
                let result = self.workflow.submit_amount(key, &text).await;
                let _ = response.send(result.map_err(ServiceError::from));
            }
            WithdrawalRequest::Cancel { key, response } => {
                let result = self.workflow.cancel(key).await;
                let _ = response.send(result.map_err(ServiceError::from));
            }
            WithdrawalRequest::Confirm { token, response } => {
                let result = self.workflow.confirm(&token).await;
                let _ = response.send(result.map_err(ServiceError::from));
            }
            WithdrawalRequest::State { key, response } => {
                let result = self.workflow.state(key).await;
                let _ = response.send(result.map_err(ServiceError::from));
            }
        }
    }
}

pub struct WithdrawalService;

impl WithdrawalService {
    pub fn new() -> Self {
        WithdrawalService {}
    }
}

#[async_trait]
impl Service<WithdrawalRequest, WithdrawalRequestHandler> for WithdrawalService {}
