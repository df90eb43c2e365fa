use async_trait::async_trait;
use sqlx::PgPool;

use super::{FieldUpdate, StoreCapabilities, UpdateOutcome, UserStore};
use crate::errors::StoreError;
use crate::models::{users::User, Cents, UserId};

const USER_COLUMNS: &str = "id, referrer, referred_users, account_number, balance";

#[derive(Clone)]
pub struct PgUserStore {
    conn: PgPool,
}

impl PgUserStore {
    pub fn new(conn: PgPool) -> Self {
        Self { conn }
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
                CREATE TABLE IF NOT EXISTS users (
                    id BIGINT PRIMARY KEY,
                    referrer BIGINT REFERENCES users (id),
                    referred_users BIGINT[] NOT NULL DEFAULT '{}',
                    account_number BIGINT,
                    balance BIGINT NOT NULL DEFAULT 0
                )
            "#,
        )
        .execute(&self.conn)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities {
            conditional_decrement: true,
            transactions: true,
        }
    }

    async fn exists(&self, id: UserId) -> Result<bool, StoreError> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM users WHERE id = $1)")
            .bind(id)
            .fetch_one(&self.conn)
            .await?;

        Ok(exists)
    }

    async fn insert(&self, user: User) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
                INSERT INTO users (id, referrer, referred_users, account_number, balance)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(user.id)
        .bind(user.referrer)
        .bind(&user.referred_users)
        .bind(user.account_number)
        .bind(user.balance)
        .execute(&self.conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Duplicate(user.id));
        }

        Ok(())
    }

    async fn update(&self, id: UserId, update: FieldUpdate) -> Result<UpdateOutcome, StoreError> {
        let (assignment, guard) = match update {
            FieldUpdate::IncrementBalance(_) => ("balance = balance + $1", ""),
            FieldUpdate::DecrementBalanceIfSufficient(_) => {
                ("balance = balance - $1", " AND balance >= $1")
            }
            FieldUpdate::PushReferredUser(_) => {
                ("referred_users = array_append(referred_users, $1)", "")
            }
            FieldUpdate::SetAccountNumber(_) => ("account_number = $1", ""),
        };
        let sql = format!(
            "UPDATE users SET {assignment} WHERE id = $2{guard} RETURNING {USER_COLUMNS}"
        );

        let query = sqlx::query_as::<_, User>(&sql);
        let query = match update {
            FieldUpdate::IncrementBalance(amount)
            | FieldUpdate::DecrementBalanceIfSufficient(amount) => query.bind(amount),
            FieldUpdate::PushReferredUser(referred) => query.bind(referred),
            FieldUpdate::SetAccountNumber(account_number) => query.bind(account_number),
        };

        match query.bind(id).fetch_optional(&self.conn).await? {
            Some(user) => Ok(UpdateOutcome::Updated(user)),
            None if self.exists(id).await? => Ok(UpdateOutcome::ConditionFailed),
            None => Ok(UpdateOutcome::NotFound),
        }
    }

    async fn find_one(&self, id: UserId) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.conn)
        .await?;

        Ok(user)
    }

    async fn find_all(&self) -> Result<Vec<User>, StoreError> {
        let users = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY id"
        ))
        .fetch_all(&self.conn)
        .await?;

        Ok(users)
    }

    async fn commit_referral(
        &self,
        referrer_id: UserId,
        user_id: UserId,
        bonus: Cents,
    ) -> Result<UpdateOutcome, StoreError> {
        let mut tx = self.conn.begin().await?;

        let referrer: Option<UserId> =
            sqlx::query_scalar("SELECT id FROM users WHERE id = $1 FOR UPDATE")
                .bind(referrer_id)
                .fetch_optional(&mut *tx)
                .await?;
        if referrer.is_none() {
            tx.rollback().await?;
            return Ok(UpdateOutcome::NotFound);
        }

        let inserted = sqlx::query(
            "INSERT INTO users (id, referrer) VALUES ($1, $2) ON CONFLICT (id) DO NOTHING",
        )
        .bind(user_id)
        .bind(referrer_id)
        .execute(&mut *tx)
        .await?;
        if inserted.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(StoreError::Duplicate(user_id));
        }

        let referrer = sqlx::query_as::<_, User>(&format!(
            r#"
                UPDATE users
                SET referred_users = array_append(referred_users, $1), balance = balance + $2
                WHERE id = $3
                RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(user_id)
        .bind(bonus)
        .bind(referrer_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(UpdateOutcome::Updated(referrer))
    }
}
