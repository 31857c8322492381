use async_trait::async_trait;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use time::OffsetDateTime;
use tracing::error;
use uuid::Uuid;

use super::{
    store::{RevocationTx, TokenLookup, TokenRecord, TokenRepository},
    token::TokenHash,
};
use crate::error::AppError;

/// Postgres-backed token table.
#[derive(Clone)]
pub struct PgTokenRepository {
    db: PgPool,
}

impl PgTokenRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[derive(Debug, FromRow)]
struct TokenRow {
    token_hash: Vec<u8>,
    user_id: Uuid,
    expiry: OffsetDateTime,
    active: bool,
}

#[async_trait]
impl TokenRepository for PgTokenRepository {
    async fn insert(&self, record: &TokenRecord) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO tokens (token_hash, user_id, expiry, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(record.hash.as_bytes())
        .bind(record.user_id)
        .bind(record.expiry)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn find_by_hash(&self, hash: &TokenHash) -> Result<Option<TokenLookup>, AppError> {
        let row = sqlx::query_as::<_, TokenRow>(
            r#"
            SELECT t.token_hash, t.user_id, t.expiry, u.active
            FROM tokens t
            JOIN users u ON u.id = t.user_id
            WHERE t.token_hash = $1
            "#,
        )
        .bind(hash.as_bytes())
        .fetch_optional(&self.db)
        .await?;

        row.map(|r| {
            let hash = TokenHash::from_bytes(&r.token_hash).ok_or_else(|| {
                error!(user_id = %r.user_id, len = r.token_hash.len(), "stored token hash has wrong length");
                AppError::Internal("corrupt token hash".into())
            })?;
            Ok(TokenLookup {
                hash,
                user_id: r.user_id,
                expiry: r.expiry,
                user_active: r.active,
            })
        })
        .transpose()
    }

    async fn delete_by_hash(&self, hash: &TokenHash) -> Result<u64, AppError> {
        let done = sqlx::query("DELETE FROM tokens WHERE token_hash = $1")
            .bind(hash.as_bytes())
            .execute(&self.db)
            .await?;
        Ok(done.rows_affected())
    }

    async fn delete_all_for_user(&self, user_id: Uuid) -> Result<u64, AppError> {
        let done = sqlx::query("DELETE FROM tokens WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.db)
            .await?;
        Ok(done.rows_affected())
    }

    async fn delete_expired(&self, now: OffsetDateTime) -> Result<u64, AppError> {
        let done = sqlx::query("DELETE FROM tokens WHERE expiry <= $1")
            .bind(now)
            .execute(&self.db)
            .await?;
        Ok(done.rows_affected())
    }

    async fn begin(&self) -> Result<Box<dyn RevocationTx>, AppError> {
        let tx = self.db.begin().await?;
        Ok(Box::new(PgRevocation { tx }))
    }
}

/// Open Postgres transaction. Dropping it without `commit` rolls back.
pub struct PgRevocation {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl RevocationTx for PgRevocation {
    async fn set_inactive(&mut self, user_id: Uuid) -> Result<u64, AppError> {
        let done = sqlx::query(
            "UPDATE users SET active = FALSE, updated_at = now() WHERE id = $1",
        )
        .bind(user_id)
        .execute(&mut *self.tx)
        .await?;
        Ok(done.rows_affected())
    }

    async fn delete_all_for_user(&mut self, user_id: Uuid) -> Result<u64, AppError> {
        let done = sqlx::query("DELETE FROM tokens WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(done.rows_affected())
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        self.tx.commit().await?;
        Ok(())
    }
}
