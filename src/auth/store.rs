//! Token persistence and validation.

use std::sync::Arc;

use async_trait::async_trait;
use time::{Duration, OffsetDateTime};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::token::{IssuedToken, TokenGenerator, TokenHash};
use crate::{clock::Clock, error::AppError};

/// Attempts made by [`TokenStore::issue`] before a hash collision is reported.
const MAX_ISSUE_ATTEMPTS: usize = 3;

/// Row written for every issued token.
#[derive(Debug, Clone)]
pub struct TokenRecord {
    pub hash: TokenHash,
    pub user_id: Uuid,
    pub expiry: OffsetDateTime,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl From<&IssuedToken> for TokenRecord {
    fn from(token: &IssuedToken) -> Self {
        Self {
            hash: token.hash,
            user_id: token.user_id,
            expiry: token.expiry,
            created_at: token.issued_at,
            updated_at: token.issued_at,
        }
    }
}

/// A token row joined with its owner's active flag.
#[derive(Debug, Clone)]
pub struct TokenLookup {
    pub hash: TokenHash,
    pub user_id: Uuid,
    pub expiry: OffsetDateTime,
    pub user_active: bool,
}

#[async_trait]
pub trait TokenRepository: Send + Sync {
    /// Fails with `Conflict` when the hash is already present.
    async fn insert(&self, record: &TokenRecord) -> Result<(), AppError>;

    async fn find_by_hash(&self, hash: &TokenHash) -> Result<Option<TokenLookup>, AppError>;

    async fn delete_by_hash(&self, hash: &TokenHash) -> Result<u64, AppError>;

    async fn delete_all_for_user(&self, user_id: Uuid) -> Result<u64, AppError>;

    async fn delete_expired(&self, now: OffsetDateTime) -> Result<u64, AppError>;

    /// Opens a unit of work for revoking a user's sessions.
    async fn begin(&self) -> Result<Box<dyn RevocationTx>, AppError>;
}

/// Writes staged inside one transaction. Nothing is visible to other callers
/// until [`RevocationTx::commit`]; dropping the handle rolls everything back.
#[async_trait]
pub trait RevocationTx: Send {
    /// Clears the active flag. Returns the number of users updated.
    async fn set_inactive(&mut self, user_id: Uuid) -> Result<u64, AppError>;

    async fn delete_all_for_user(&mut self, user_id: Uuid) -> Result<u64, AppError>;

    async fn commit(self: Box<Self>) -> Result<(), AppError>;
}

/// Outcome of checking a presented token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenCheck {
    Valid(Uuid),
    Missing,
    Unknown,
    Expired,
    Inactive,
}

impl TokenCheck {
    pub fn is_valid(&self) -> bool {
        matches!(self, TokenCheck::Valid(_))
    }

    /// Short reason for server-side logs.
    pub fn reason(&self) -> &'static str {
        match self {
            TokenCheck::Valid(_) => "valid",
            TokenCheck::Missing => "missing token",
            TokenCheck::Unknown => "unknown token",
            TokenCheck::Expired => "expired token",
            TokenCheck::Inactive => "inactive user",
        }
    }
}

#[derive(Clone)]
pub struct TokenStore {
    repo: Arc<dyn TokenRepository>,
    clock: Arc<dyn Clock>,
    generator: TokenGenerator,
}

impl TokenStore {
    pub fn new(repo: Arc<dyn TokenRepository>, clock: Arc<dyn Clock>) -> Self {
        let generator = TokenGenerator::new(clock.clone());
        Self {
            repo,
            clock,
            generator,
        }
    }

    pub(crate) fn repo(&self) -> Arc<dyn TokenRepository> {
        self.repo.clone()
    }

    /// Generates a token for `user_id` and persists its hash. A hash collision
    /// is retried with a fresh token.
    pub async fn issue(&self, user_id: Uuid, ttl: Duration) -> Result<IssuedToken, AppError> {
        let mut attempt = 1;
        loop {
            let token = self.generator.generate(user_id, ttl)?;
            match self.insert(&token).await {
                Ok(()) => {
                    info!(%user_id, expiry = %token.expiry, "token issued");
                    return Ok(token);
                }
                Err(AppError::Conflict(reason)) if attempt < MAX_ISSUE_ATTEMPTS => {
                    warn!(%user_id, attempt, %reason, "token hash collision, regenerating");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub async fn insert(&self, token: &IssuedToken) -> Result<(), AppError> {
        self.repo.insert(&TokenRecord::from(token)).await
    }

    /// Looks the token up and decides whether it grants access.
    ///
    /// Every predicate is evaluated whether or not a row was found, so the
    /// work done does not depend on which check fails. Expired rows are left
    /// in place.
    pub async fn check(&self, plaintext: &str) -> Result<TokenCheck, AppError> {
        if plaintext.is_empty() {
            return Ok(TokenCheck::Missing);
        }

        let presented = TokenHash::derive(plaintext);
        let row = self.repo.find_by_hash(&presented).await?;
        let now = self.clock.now();

        let found = row.is_some();
        let (stored, user_id, expiry, active) = match row {
            Some(r) => (r.hash, r.user_id, r.expiry, r.user_active),
            None => (TokenHash::zeroed(), Uuid::nil(), now, false),
        };

        let hash_matches = stored.ct_eq(&presented);
        let unexpired = expiry > now;
        let valid = found & hash_matches & unexpired & active;

        let outcome = if valid {
            TokenCheck::Valid(user_id)
        } else if !(found & hash_matches) {
            TokenCheck::Unknown
        } else if !unexpired {
            TokenCheck::Expired
        } else {
            TokenCheck::Inactive
        };
        debug!(outcome = outcome.reason(), "token checked");
        Ok(outcome)
    }

    pub async fn validate(&self, plaintext: &str) -> Result<bool, AppError> {
        Ok(self.check(plaintext).await?.is_valid())
    }

    /// Removes the matching row if there is one. Deleting an unknown token is
    /// not an error.
    pub async fn delete_by_token(&self, plaintext: &str) -> Result<(), AppError> {
        let removed = self
            .repo
            .delete_by_hash(&TokenHash::derive(plaintext))
            .await?;
        debug!(removed, "token deleted");
        Ok(())
    }

    #[cfg_attr(not(test), allow(dead_code))]
    pub async fn delete_all_for_user(&self, user_id: Uuid) -> Result<u64, AppError> {
        let removed = self.repo.delete_all_for_user(user_id).await?;
        info!(%user_id, removed, "all tokens deleted for user");
        Ok(removed)
    }

    pub async fn purge_expired(&self) -> Result<u64, AppError> {
        self.repo.delete_expired(self.clock.now()).await
    }
}
