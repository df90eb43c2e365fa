use std::sync::Arc;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::mpsc;

use crate::errors::{LedgerError, WithdrawalError};
use crate::models::Cents;
use crate::repositories::{
    invite_links::{BotApiFetcher, InviteLinkCache},
    sessions::{MemorySessionStore, SessionStore},
    users::{MemoryUserStore, PgUserStore, UserStore},
};
use crate::settings::Settings;

pub mod directory;
mod http;
pub mod ledger;
pub mod notifications;
pub mod referrals;
pub mod users;
pub mod withdrawals;

use directory::UserDirectory;
use ledger::{BalanceLedger, DebitStrategy};
use notifications::{LogNotifier, Notifier};
use referrals::ReferralRegistrar;
use withdrawals::WithdrawalWorkflow;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Withdrawal(#[from] WithdrawalError),
    #[error("Communication error: {0} - {1}")]
    Communication(String, String),
}

#[async_trait]
pub trait RequestHandler<T>: Send + Sync + 'static
where
    T: Send + 'static,
{
    async fn handle_request(&self, request: T);
}

#[async_trait]
pub trait Service<T, H>: Send + Sync + 'static
where
    T: Send + 'static,
    H: RequestHandler<T> + Clone + Send,
{
    async fn run(&mut self, handler: H, receiver: &mut mpsc::Receiver<T>) {
        while let Some(request) = receiver.recv().await {
            let handler = handler.clone();

            tokio::spawn(async move {
                handler.handle_request(request).await;
            });
        }
    }
}

/// The ledger components wired over one user store.
#[derive(Clone)]
pub struct LedgerCore {
    pub directory: UserDirectory,
    pub ledger: BalanceLedger,
    pub registrar: ReferralRegistrar,
    pub withdrawals: WithdrawalWorkflow,
}

impl LedgerCore {
    pub fn new(
        store: Arc<dyn UserStore>,
        sessions: Arc<dyn SessionStore>,
        notifier: Arc<dyn Notifier>,
        referral_bonus: Cents,
        debit_strategy: DebitStrategy,
    ) -> Self {
        let directory = UserDirectory::new(store.clone());
        let ledger = BalanceLedger::new(store.clone(), debit_strategy);
        let registrar = ReferralRegistrar::new(
            store,
            directory.clone(),
            ledger.clone(),
            notifier.clone(),
            referral_bonus,
        );
        let withdrawals =
            WithdrawalWorkflow::new(directory.clone(), ledger.clone(), sessions, notifier);

        Self {
            directory,
            ledger,
            registrar,
            withdrawals,
        }
    }
}

async fn connect_store(settings: &Settings) -> Result<Arc<dyn UserStore>, anyhow::Error> {
    match &settings.postgres {
        Some(postgres) => {
            let conn = PgPoolOptions::new()
                .max_connections(postgres.max_connections)
                .connect(&postgres.url)
                .await?;
            let store = PgUserStore::new(conn);
            store.migrate().await?;
            log::info!("Connected to Postgres.");
            Ok(Arc::new(store))
        }
        None => {
            log::warn!("No postgres settings, users are kept in memory only.");
            Ok(Arc::new(MemoryUserStore::new()))
        }
    }
}

pub async fn start_services(settings: Settings) -> Result<(), anyhow::Error> {
    let (user_tx, mut user_rx) = mpsc::channel(512);
    let (withdrawal_tx, mut withdrawal_rx) = mpsc::channel(512);

    let store = connect_store(&settings).await?;
    let core = LedgerCore::new(
        store,
        Arc::new(MemorySessionStore::new()),
        Arc::new(LogNotifier::new(settings.admin.log_channel)),
        settings.referral.bonus_in_cents,
        settings.ledger.debit_strategy,
    );
    let invite_links = settings
        .telegram
        .map(|t| InviteLinkCache::new(Arc::new(BotApiFetcher::new(t.api_url, t.token))));

    let mut user_service = users::UserService::new();
    let mut withdrawal_service = withdrawals::WithdrawalService::new();

    log::info!("Starting user service.");
    let user_core = core.clone();
    tokio::spawn(async move {
        user_service
            .run(
                users::UserRequestHandler::new(
                    user_core.directory,
                    user_core.ledger,
                    user_core.registrar,
                ),
                &mut user_rx,
            )
            .await;
    });

    log::info!("Starting withdrawal service.");
    tokio::spawn(async move {
        withdrawal_service
            .run(
                withdrawals::WithdrawalRequestHandler::new(core.withdrawals),
                &mut withdrawal_rx,
            )
            .await;
    });

    log::info!("Starting HTTP server.");
    http::start_http_server(&settings.http.listen, user_tx, withdrawal_tx, invite_links).await
}
