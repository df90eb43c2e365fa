use std::sync::Arc;

use dashmap::DashMap;

use super::directory::UserDirectory;
use super::ledger::BalanceLedger;
use super::notifications::{Notice, Notifier, Recipient};
use crate::errors::{LedgerError, PartialState};
use crate::models::{
    users::{Onboarding, PendingRegistration, Referral, RegistrationStage},
    Cents, UserId,
};
use crate::repositories::users::{FieldUpdate, UpdateOutcome, UserStore};

/// Registers referred users and pays their referrers.
///
/// Stores with transactions commit the whole registration at once. On other
/// stores the steps run one after another; a registration that stops after the
/// new user was created is kept as a [`PendingRegistration`] until
/// [`ReferralRegistrar::reconcile`] finishes it.
#[derive(Clone)]
pub struct ReferralRegistrar {
    store: Arc<dyn UserStore>,
    directory: UserDirectory,
    ledger: BalanceLedger,
    notifier: Arc<dyn Notifier>,
    bonus: Cents,
    outbox: Arc<DashMap<UserId, PendingRegistration>>,
}

impl ReferralRegistrar {
    pub fn new(
        store: Arc<dyn UserStore>,
        directory: UserDirectory,
        ledger: BalanceLedger,
        notifier: Arc<dyn Notifier>,
        bonus: Cents,
    ) -> Self {
        Self {
            store,
            directory,
            ledger,
            notifier,
            bonus,
            outbox: Arc::new(DashMap::new()),
        }
    }

    pub fn bonus(&self) -> Cents {
        self.bonus
    }

    /// Handles a start event: returning users are left alone, new users are
    /// registered, under the referrer named by `referral_code` if one is given.
    pub async fn onboard(
        &self,
        user_id: UserId,
        referral_code: Option<&str>,
    ) -> Result<Onboarding, LedgerError> {
        if let Some(user) = self.directory.find_user(user_id).await? {
            return Ok(Onboarding::Returning { user });
        }

        let code = referral_code.map(str::trim).filter(|c| !c.is_empty());
        let Some(code) = code else {
            let user = self.directory.create_user(user_id, None).await?;
            return Ok(Onboarding::Registered { user });
        };

        let referrer_id = code
            .parse::<UserId>()
            .ok()
            .filter(|id| *id > 0)
            .ok_or_else(|| LedgerError::InvalidReferralCode(code.to_string()))?;

        let referral = self.register_referral(referrer_id, user_id).await?;
        let user = self.directory.get_user(user_id).await?;

        Ok(Onboarding::Referred { user, referral })
    }

    pub async fn register_referral(
        &self,
        referrer_id: UserId,
        user_id: UserId,
    ) -> Result<Referral, LedgerError> {
        self.directory.get_user(referrer_id).await?;

        let referral = if self.store.capabilities().transactions {
            self.register_atomic(referrer_id, user_id).await?
        } else {
            self.register_staged(referrer_id, user_id).await?
        };

        log::info!(
            "User {} referred {}, credited {}",
            referrer_id,
            user_id,
            self.bonus
        );
        self.notifier
            .notify(
                Recipient::User(referrer_id),
                Notice::ReferralBonus {
                    referred_user: user_id,
                    amount: self.bonus,
                },
            )
            .await;

        Ok(referral)
    }

    pub fn pending_registrations(&self) -> Vec<PendingRegistration> {
        let mut pending: Vec<PendingRegistration> =
            self.outbox.iter().map(|e| e.value().clone()).collect();
        pending.sort_by_key(|p| p.recorded_at);
        pending
    }

    /// Resumes every pending registration from its last completed step.
    /// Returns how many were completed; failures stay pending.
    pub async fn reconcile(&self) -> usize {
        let user_ids: Vec<UserId> = self.outbox.iter().map(|e| *e.key()).collect();
        let mut completed = 0;

        for user_id in user_ids {
            // Taking the entry out keeps concurrent reconcilers off it.
            let Some((_, mut pending)) = self.outbox.remove(&user_id) else {
                continue;
            };

            match self.advance(&mut pending).await {
                Ok(referrer_balance) => {
                    completed += 1;
                    log::info!(
                        "Reconciled referral {} -> {}, referrer balance {}",
                        pending.referrer_id,
                        pending.user_id,
                        referrer_balance
                    );
                    self.notifier
                        .notify(
                            Recipient::User(pending.referrer_id),
                            Notice::ReferralBonus {
                                referred_user: pending.user_id,
                                amount: self.bonus,
                            },
                        )
                        .await;
                }
                Err(e) => {
                    log::warn!(
                        "Referral {} -> {} still incomplete at {:?}: {}",
                        pending.referrer_id,
                        pending.user_id,
                        pending.stage,
                        e
                    );
                    self.outbox.insert(user_id, pending);
                }
            }
        }

        completed
    }

    async fn register_atomic(
        &self,
        referrer_id: UserId,
        user_id: UserId,
    ) -> Result<Referral, LedgerError> {
        match self
            .store
            .commit_referral(referrer_id, user_id, self.bonus)
            .await?
        {
            UpdateOutcome::Updated(referrer) => Ok(Referral {
                referrer_id,
                user_id,
                bonus: self.bonus,
                referrer_balance: referrer.balance,
            }),
            UpdateOutcome::NotFound => Err(LedgerError::NotFound(referrer_id)),
            UpdateOutcome::ConditionFailed => Err(LedgerError::StoreFailure {
                message: "referral commit rejected".to_string(),
                partial: None,
            }),
        }
    }

    async fn register_staged(
        &self,
        referrer_id: UserId,
        user_id: UserId,
    ) -> Result<Referral, LedgerError> {
        if self.outbox.contains_key(&user_id) {
            return Err(LedgerError::DuplicateUser(user_id));
        }

        self.directory.create_user(user_id, Some(referrer_id)).await?;

        let mut pending = PendingRegistration {
            referrer_id,
            user_id,
            stage: RegistrationStage::UserCreated,
            recorded_at: chrono::Utc::now(),
        };

        match self.advance(&mut pending).await {
            Ok(referrer_balance) => Ok(Referral {
                referrer_id,
                user_id,
                bonus: self.bonus,
                referrer_balance,
            }),
            Err(e) => {
                log::error!(
                    "Referral {} -> {} stopped at {:?}: {}",
                    referrer_id,
                    user_id,
                    pending.stage,
                    e
                );
                let stage = pending.stage;
                self.outbox.insert(user_id, pending);
                Err(LedgerError::partial(
                    e,
                    PartialState::Referral {
                        referrer_id,
                        user_id,
                        stage,
                    },
                ))
            }
        }
    }

    /// Runs the remaining steps, recording progress in `pending`.
    /// Returns the referrer's balance after the bonus.
    async fn advance(&self, pending: &mut PendingRegistration) -> Result<Cents, LedgerError> {
        if pending.stage == RegistrationStage::UserCreated {
            let referrer = self.directory.get_user(pending.referrer_id).await?;
            // A link whose acknowledgement was lost must not be appended twice.
            if !referrer.referred_users.contains(&pending.user_id) {
                match self
                    .store
                    .update(
                        pending.referrer_id,
                        FieldUpdate::PushReferredUser(pending.user_id),
                    )
                    .await?
                {
                    UpdateOutcome::Updated(_) => {}
                    UpdateOutcome::NotFound => {
                        return Err(LedgerError::NotFound(pending.referrer_id))
                    }
                    UpdateOutcome::ConditionFailed => {
                        return Err(LedgerError::StoreFailure {
                            message: "referrer link rejected".to_string(),
                            partial: None,
                        })
                    }
                }
            }
            pending.stage = RegistrationStage::Linked;
        }

        self.ledger.credit(pending.referrer_id, self.bonus).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::users::MemoryUserStore;
    use crate::services::ledger::DebitStrategy;
    use crate::services::notifications::ChannelNotifier;
    use tokio::sync::mpsc;

    fn registrar(
        store: MemoryUserStore,
    ) -> (ReferralRegistrar, mpsc::Receiver<(Recipient, Notice)>) {
        let store: Arc<dyn UserStore> = Arc::new(store);
        let (tx, rx) = mpsc::channel(16);
        let directory = UserDirectory::new(store.clone());
        let ledger = BalanceLedger::new(store.clone(), DebitStrategy::Conditional);
        let registrar = ReferralRegistrar::new(
            store,
            directory,
            ledger,
            Arc::new(ChannelNotifier::new(tx)),
            1000,
        );
        (registrar, rx)
    }

    #[tokio::test]
    async fn referral_links_and_credits_once() {
        for store in [MemoryUserStore::new(), MemoryUserStore::basic()] {
            let (registrar, mut notices) = registrar(store);
            registrar.directory.create_user(1, None).await.unwrap();

            let referral = registrar.register_referral(1, 2).await.unwrap();
            assert_eq!(referral.referrer_balance, 1000);

            let referrer = registrar.directory.get_user(1).await.unwrap();
            let referred = registrar.directory.get_user(2).await.unwrap();
            assert_eq!(referred.referrer, Some(1));
            assert_eq!(referrer.referred_users, vec![2]);
            assert_eq!(referrer.balance, 1000);

            let err = registrar.register_referral(1, 2).await.unwrap_err();
            assert!(matches!(err, LedgerError::DuplicateUser(2)));
            let referrer = registrar.directory.get_user(1).await.unwrap();
            assert_eq!(referrer.referred_users, vec![2]);
            assert_eq!(referrer.balance, 1000);

            assert_eq!(
                notices.try_recv().unwrap(),
                (
                    Recipient::User(1),
                    Notice::ReferralBonus {
                        referred_user: 2,
                        amount: 1000
                    }
                )
            );
            assert!(notices.try_recv().is_err());
        }
    }

    #[tokio::test]
    async fn missing_referrer_creates_nothing() {
        for store in [MemoryUserStore::new(), MemoryUserStore::basic()] {
            let (registrar, _notices) = registrar(store);

            let err = registrar.register_referral(1, 2).await.unwrap_err();
            assert!(matches!(err, LedgerError::NotFound(1)));
            assert_eq!(registrar.directory.find_user(2).await.unwrap(), None);
        }
    }

    #[tokio::test]
    async fn onboarding_paths() {
        let (registrar, _notices) = registrar(MemoryUserStore::new());

        let plain = registrar.onboard(1, None).await.unwrap();
        assert!(matches!(plain, Onboarding::Registered { .. }));

        let returning = registrar.onboard(1, Some("999")).await.unwrap();
        assert!(matches!(returning, Onboarding::Returning { .. }));

        let referred = registrar.onboard(2, Some(" 1 ")).await.unwrap();
        match referred {
            Onboarding::Referred { user, referral } => {
                assert_eq!(user.referrer, Some(1));
                assert_eq!(referral.referrer_balance, 1000);
            }
            other => panic!("unexpected onboarding: {other:?}"),
        }

        assert!(matches!(
            registrar.onboard(3, Some("abc")).await,
            Err(LedgerError::InvalidReferralCode(_))
        ));
        assert!(matches!(
            registrar.onboard(3, Some("-4")).await,
            Err(LedgerError::InvalidReferralCode(_))
        ));
        assert!(matches!(
            registrar.onboard(3, Some("42")).await,
            Err(LedgerError::NotFound(42))
        ));
        assert_eq!(registrar.directory.find_user(3).await.unwrap(), None);

        let blank = registrar.onboard(4, Some("   ")).await.unwrap();
        assert!(matches!(blank, Onboarding::Registered { .. }));
    }
}
