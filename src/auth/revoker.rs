use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use super::store::{TokenRepository, TokenStore};
use crate::error::AppError;

/// Ends sessions: one token on logout, every token on forced deactivation.
#[derive(Clone)]
pub struct SessionRevoker {
    tokens: TokenStore,
    repo: Arc<dyn TokenRepository>,
}

impl SessionRevoker {
    pub fn new(tokens: TokenStore) -> Self {
        let repo = tokens.repo();
        Self { tokens, repo }
    }

    pub async fn logout(&self, plaintext: &str) -> Result<(), AppError> {
        self.tokens.delete_by_token(plaintext).await
    }

    /// Marks the user inactive and deletes all of their tokens in one
    /// transaction. Returns the number of tokens removed.
    pub async fn deactivate(&self, user_id: Uuid) -> Result<u64, AppError> {
        match self.deactivate_in_tx(user_id).await {
            Ok(removed) => {
                info!(%user_id, removed, "user deactivated and logged out");
                Ok(removed)
            }
            Err(e) => {
                warn!(%user_id, error = %e, "deactivation rolled back");
                Err(e)
            }
        }
    }

    // Any early return drops `tx` uncommitted, which discards both writes.
    async fn deactivate_in_tx(&self, user_id: Uuid) -> Result<u64, AppError> {
        let mut tx = self.repo.begin().await?;
        if tx.set_inactive(user_id).await? == 0 {
            return Err(AppError::NotFound(format!("user {user_id} not found")));
        }
        let removed = tx.delete_all_for_user(user_id).await?;
        tx.commit().await?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ManualClock, MemoryStore};
    use time::Duration;

    fn setup() -> (SessionRevoker, TokenStore, Arc<MemoryStore>) {
        let db = Arc::new(MemoryStore::default());
        let tokens = TokenStore::new(db.clone(), Arc::new(ManualClock::default()));
        (SessionRevoker::new(tokens.clone()), tokens, db)
    }

    #[tokio::test]
    async fn logout_revokes_only_that_token() {
        let (revoker, tokens, db) = setup();
        let alice = db.add_user("alice@example.com", true);
        let t1 = tokens.issue(alice, Duration::hours(24)).await.unwrap();
        let t2 = tokens.issue(alice, Duration::hours(24)).await.unwrap();

        revoker.logout(t1.plaintext.expose()).await.unwrap();
        assert!(!tokens.validate(t1.plaintext.expose()).await.unwrap());
        assert!(tokens.validate(t2.plaintext.expose()).await.unwrap());

        revoker.logout(t1.plaintext.expose()).await.unwrap();
    }

    #[tokio::test]
    async fn deactivate_revokes_every_token_of_the_user() {
        let (revoker, tokens, db) = setup();
        let alice = db.add_user("alice@example.com", true);
        let bob = db.add_user("bob@example.com", true);
        let t1 = tokens.issue(alice, Duration::hours(24)).await.unwrap();
        let t2 = tokens.issue(bob, Duration::hours(24)).await.unwrap();
        let t3 = tokens.issue(bob, Duration::minutes(60)).await.unwrap();

        assert_eq!(revoker.deactivate(bob).await.unwrap(), 2);
        assert!(!db.is_active(bob));
        assert!(!tokens.validate(t2.plaintext.expose()).await.unwrap());
        assert!(!tokens.validate(t3.plaintext.expose()).await.unwrap());
        assert!(tokens.validate(t1.plaintext.expose()).await.unwrap());
        assert!(db.is_active(alice));
    }

    #[tokio::test]
    async fn failed_delete_rolls_back_the_staged_flag_change() {
        let (revoker, tokens, db) = setup();
        let bob = db.add_user("bob@example.com", true);
        let t2 = tokens.issue(bob, Duration::hours(24)).await.unwrap();
        db.fail_token_purge(true);

        let err = revoker.deactivate(bob).await.unwrap_err();
        assert!(matches!(err, AppError::Persistence(_)));
        assert_eq!(db.rollbacks(), 1);
        assert!(db.is_active(bob));
        assert_eq!(db.token_count(bob), 1);

        db.fail_token_purge(false);
        assert!(tokens.validate(t2.plaintext.expose()).await.unwrap());
    }

    #[tokio::test]
    async fn unknown_user_is_not_found() {
        let (revoker, _, _) = setup();
        let err = revoker.deactivate(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn successful_deactivation_commits() {
        let (revoker, _, db) = setup();
        let bob = db.add_user("bob@example.com", true);
        revoker.deactivate(bob).await.unwrap();
        assert_eq!(db.rollbacks(), 0);
        assert!(!db.is_active(bob));
    }
}
