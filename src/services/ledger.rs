use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Deserialize;

use crate::errors::{LedgerError, PartialState};
use crate::models::{users::User, Cents, UserId};
use crate::repositories::users::{FieldUpdate, UpdateOutcome, UserStore};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DebitStrategy {
    /// One conditional decrement that only applies when funds suffice.
    #[default]
    Conditional,
    /// Decrement, then credit the amount back if the balance went negative.
    /// Other readers can observe the negative balance in between.
    Compensating,
}

/// The only writer of user balances.
#[derive(Clone)]
pub struct BalanceLedger {
    store: Arc<dyn UserStore>,
    strategy: DebitStrategy,
    fallback_warned: Arc<AtomicBool>,
}

fn validate_amount(amount: Cents) -> Result<(), LedgerError> {
    if amount > 0 {
        Ok(())
    } else {
        Err(LedgerError::InvalidAmount(amount.to_string()))
    }
}

impl BalanceLedger {
    pub fn new(store: Arc<dyn UserStore>, strategy: DebitStrategy) -> Self {
        Self {
            store,
            strategy,
            fallback_warned: Arc::new(AtomicBool::new(false)),
        }
    }

    pub async fn balance(&self, user_id: UserId) -> Result<Cents, LedgerError> {
        match self.store.find_one(user_id).await? {
            Some(user) => Ok(user.balance),
            None => Err(LedgerError::NotFound(user_id)),
        }
    }

    pub async fn credit(&self, user_id: UserId, amount: Cents) -> Result<Cents, LedgerError> {
        validate_amount(amount)?;

        let user = self
            .apply(user_id, FieldUpdate::IncrementBalance(amount))
            .await?;
        log::info!(
            "Credited {} to user {}, balance {}",
            amount,
            user_id,
            user.balance
        );

        Ok(user.balance)
    }

    pub async fn debit(&self, user_id: UserId, amount: Cents) -> Result<Cents, LedgerError> {
        validate_amount(amount)?;

        let balance = if self.uses_conditional_decrement() {
            self.debit_conditional(user_id, amount).await?
        } else {
            self.debit_compensating(user_id, amount).await?
        };
        log::info!(
            "Debited {} from user {}, balance {}",
            amount,
            user_id,
            balance
        );

        Ok(balance)
    }

    pub async fn set_account_number(
        &self,
        user_id: UserId,
        account_number: i64,
    ) -> Result<User, LedgerError> {
        if account_number <= 0 {
            return Err(LedgerError::InvalidAccountNumber(account_number));
        }

        let user = self
            .apply(user_id, FieldUpdate::SetAccountNumber(account_number))
            .await?;
        log::info!("Set account number for user {}", user_id);

        Ok(user)
    }

    fn uses_conditional_decrement(&self) -> bool {
        if self.strategy == DebitStrategy::Compensating {
            return false;
        }
        if self.store.capabilities().conditional_decrement {
            return true;
        }

        if !self.fallback_warned.swap(true, Ordering::Relaxed) {
            log::warn!("Store has no conditional decrement, falling back to compensating debits.");
        }
        false
    }

    async fn debit_conditional(&self, user_id: UserId, amount: Cents) -> Result<Cents, LedgerError> {
        match self
            .store
            .update(user_id, FieldUpdate::DecrementBalanceIfSufficient(amount))
            .await?
        {
            UpdateOutcome::Updated(user) => Ok(user.balance),
            UpdateOutcome::NotFound => Err(LedgerError::NotFound(user_id)),
            UpdateOutcome::ConditionFailed => {
                log::warn!("Rejected debit of {} from user {}", amount, user_id);
                Err(LedgerError::InsufficientBalance {
                    user_id,
                    requested: amount,
                })
            }
        }
    }

    async fn debit_compensating(&self, user_id: UserId, amount: Cents) -> Result<Cents, LedgerError> {
        let user = self
            .apply(user_id, FieldUpdate::IncrementBalance(-amount))
            .await?;
        if user.balance >= 0 {
            return Ok(user.balance);
        }

        log::warn!(
            "Debit of {} drove user {} to {}, compensating",
            amount,
            user_id,
            user.balance
        );
        if let Err(e) = self
            .apply(user_id, FieldUpdate::IncrementBalance(amount))
            .await
        {
            log::error!("Compensation failed for user {}: {}", user_id, e);
            return Err(LedgerError::partial(
                e,
                PartialState::Compensation { user_id, amount },
            ));
        }

        Err(LedgerError::InsufficientBalance {
            user_id,
            requested: amount,
        })
    }

    async fn apply(&self, user_id: UserId, update: FieldUpdate) -> Result<User, LedgerError> {
        match self.store.update(user_id, update).await {
            Ok(UpdateOutcome::Updated(user)) => Ok(user),
            Ok(UpdateOutcome::NotFound) => Err(LedgerError::NotFound(user_id)),
            Ok(UpdateOutcome::ConditionFailed) => Err(LedgerError::StoreFailure {
                message: format!("unexpected condition failure for {update:?}"),
                partial: None,
            }),
            Err(e) => {
                log::error!("Store failure updating user {}: {}", user_id, e);
                Err(e.into())
            }
        }
    }
}
