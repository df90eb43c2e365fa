use async_trait::async_trait;
use tokio::sync::oneshot;

use super::directory::UserDirectory;
use super::ledger::BalanceLedger;
use super::referrals::ReferralRegistrar;
use super::{RequestHandler, Service, ServiceError};
use crate::models::{
    users::{DirectoryStats, Onboarding, PendingRegistration, User},
    Cents, UserId,
};

pub enum UserRequest {
    Start {
        user_id: UserId,
        referral_code: Option<String>,
        response: oneshot::Sender<Result<Onboarding, ServiceError>>,
    },
    GetUser {
        id: UserId,
        response: oneshot::Sender<Result<User, ServiceError>>,
    },
    SetAccountNumber {
        id: UserId,
        account_number: i64,
        response: oneshot::Sender<Result<User, ServiceError>>,
    },
    Credit {
        id: UserId,
        amount: Cents,
        response: oneshot::Sender<Result<Cents, ServiceError>>,
    },
    Debit {
        id: UserId,
        amount: Cents,
        response: oneshot::Sender<Result<Cents, ServiceError>>,
    },
    Stats {
        response: oneshot::Sender<Result<DirectoryStats, ServiceError>>,
    },
    PendingRegistrations {
        response: oneshot::Sender<Result<Vec<PendingRegistration>, ServiceError>>,
    },
    Reconcile {
        response: oneshot::Sender<Result<usize, ServiceError>>,
    },
}

#[derive(Clone)]
pub struct UserRequestHandler {
    directory: UserDirectory,
    ledger: BalanceLedger,
    registrar: ReferralRegistrar,
}

impl UserRequestHandler {
    pub fn new(
        directory: UserDirectory,
        ledger: BalanceLedger,
        registrar: ReferralRegistrar,
    ) -> Self {
        UserRequestHandler {
            directory,
            ledger,
            registrar,
        }
    }
}

#[async_trait]
impl RequestHandler<UserRequest> for UserRequestHandler {
    async fn handle_request(&self, request: UserRequest) {
        match request {
            UserRequest::Start {
                user_id,
                referral_code,
                response,
            } => {
                let result = self
                    .registrar
                    .onboard(user_id, referral_code.as_deref())
                    .await;
                let _ = response.send(result.map_err(ServiceError::from));
            }
            UserRequest::GetUser { id, response } => {
                let user = self.directory.get_user(id).await;
                let _ = response.send(user.map_err(ServiceError::from));
            }
            UserRequest::SetAccountNumber {
                id,
                account_number,
                response,
            } => {
                let user = self.ledger.set_account_number(id, account_number).await;
                let _ = response.send(user.map_err(ServiceError::from));
            }
            UserRequest::Credit {
                id,
                amount,
                response,
            } => {
                let balance = self.ledger.credit(id, amount).await;
                let _ = response.send(balance.map_err(ServiceError::from));
            }
            UserRequest::Debit {
                id,
                amount,
                response,
            } => {
                let balance = self.ledger.debit(id, amount).await;
                let _ = response.send(balance.map_err(ServiceError::from));
            }
            UserRequest::Stats { response } => {
                let stats = self.directory.stats().await;
                let _ = response.send(stats.map_err(ServiceError::from));
            }
            UserRequest::PendingRegistrations { response } => {
                let _ = response.send(Ok(self.registrar.pending_registrations()));
            }
            UserRequest::Reconcile { response } => {
                let _ = response.send(Ok(self.registrar.reconcile().await));
            }
        }
    }
}

pub struct UserService;

impl UserService {
    pub fn new() -> Self {
        UserService {}
    }
}

#[async_trait]
impl Service<UserRequest, UserRequestHandler> for UserService {}
