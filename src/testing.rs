//! In-memory stand-ins for Postgres and the wall clock.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use time::{macros::datetime, Duration, OffsetDateTime};
use uuid::Uuid;

use crate::{
    auth::{
        password::hash_password,
        store::{RevocationTx, TokenLookup, TokenRecord, TokenRepository},
        token::TokenHash,
    },
    clock::Clock,
    error::AppError,
    users::{
        repo::UserRepository,
        repo_types::{NewUser, User, UserUpdate},
    },
};

pub struct ManualClock {
    now: Mutex<OffsetDateTime>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self {
            now: Mutex::new(datetime!(2024-03-01 09:00 UTC)),
        }
    }
}

impl ManualClock {
    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> OffsetDateTime {
        *self.now.lock().unwrap()
    }
}

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    tokens: HashMap<[u8; 32], TokenRecord>,
}

/// Users and tokens behind one lock, so multi-table writes are atomic.
#[derive(Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    conflicts_left: AtomicUsize,
    unavailable: AtomicBool,
    fail_purge: AtomicBool,
    rollbacks: Arc<AtomicUsize>,
}

fn key(hash: &TokenHash) -> [u8; 32] {
    let mut k = [0u8; 32];
    k.copy_from_slice(hash.as_bytes());
    k
}

impl MemoryStore {
    pub fn add_user(&self, email: &str, active: bool) -> Uuid {
        self.insert_user(email, "$argon2id$unused".into(), active)
    }

    pub fn add_user_with_password(&self, email: &str, password: &str, active: bool) -> Uuid {
        let hash = hash_password(password).unwrap();
        self.insert_user(email, hash, active)
    }

    fn insert_user(&self, email: &str, password_hash: String, active: bool) -> Uuid {
        let now = OffsetDateTime::now_utc();
        let user = User {
            id: Uuid::new_v4(),
            email: email.to_owned(),
            first_name: String::new(),
            last_name: String::new(),
            password_hash,
            active,
            created_at: now,
            updated_at: now,
        };
        let id = user.id;
        self.tables.lock().unwrap().users.insert(id, user);
        id
    }

    pub fn set_active(&self, id: Uuid, active: bool) {
        if let Some(u) = self.tables.lock().unwrap().users.get_mut(&id) {
            u.active = active;
        }
    }

    pub fn is_active(&self, id: Uuid) -> bool {
        self.tables
            .lock()
            .unwrap()
            .users
            .get(&id)
            .map(|u| u.active)
            .unwrap_or(false)
    }

    pub fn token_count(&self, user_id: Uuid) -> usize {
        self.tables
            .lock()
            .unwrap()
            .tokens
            .values()
            .filter(|t| t.user_id == user_id)
            .count()
    }

    pub fn fail_next_inserts_with_conflict(&self, n: usize) {
        self.conflicts_left.store(n, Ordering::SeqCst);
    }

    /// Every call fails as if the database were down.
    pub fn set_unavailable(&self, down: bool) {
        self.unavailable.store(down, Ordering::SeqCst);
    }

    /// Makes the token delete of transactions opened afterwards fail.
    pub fn fail_token_purge(&self, fail: bool) {
        self.fail_purge.store(fail, Ordering::SeqCst);
    }

    /// Transactions dropped with staged writes and no commit.
    pub fn rollbacks(&self) -> usize {
        self.rollbacks.load(Ordering::SeqCst)
    }

    fn available(&self) -> Result<(), AppError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AppError::Persistence("pool timed out".into()));
        }
        Ok(())
    }

    fn email_taken(tables: &Tables, email: &str, except: Option<Uuid>) -> bool {
        tables
            .users
            .values()
            .any(|u| u.email == email && Some(u.id) != except)
    }
}

#[async_trait]
impl TokenRepository for MemoryStore {
    async fn insert(&self, record: &TokenRecord) -> Result<(), AppError> {
        self.available()?;
        let pending = self.conflicts_left.load(Ordering::SeqCst);
        if pending > 0 {
            self.conflicts_left.store(pending - 1, Ordering::SeqCst);
            return Err(AppError::Conflict("duplicate token hash".into()));
        }

        let mut tables = self.tables.lock().unwrap();
        let k = key(&record.hash);
        if tables.tokens.contains_key(&k) {
            return Err(AppError::Conflict("duplicate token hash".into()));
        }
        if !tables.users.contains_key(&record.user_id) {
            return Err(AppError::NotFound(format!("user {} not found", record.user_id)));
        }
        tables.tokens.insert(k, record.clone());
        Ok(())
    }

    async fn find_by_hash(&self, hash: &TokenHash) -> Result<Option<TokenLookup>, AppError> {
        self.available()?;
        let tables = self.tables.lock().unwrap();
        Ok(tables.tokens.get(&key(hash)).map(|t| TokenLookup {
            hash: t.hash,
            user_id: t.user_id,
            expiry: t.expiry,
            user_active: tables
                .users
                .get(&t.user_id)
                .map(|u| u.active)
                .unwrap_or(false),
        }))
    }

    async fn delete_by_hash(&self, hash: &TokenHash) -> Result<u64, AppError> {
        self.available()?;
        let removed = self.tables.lock().unwrap().tokens.remove(&key(hash));
        Ok(removed.is_some() as u64)
    }

    async fn delete_all_for_user(&self, user_id: Uuid) -> Result<u64, AppError> {
        self.available()?;
        let mut tables = self.tables.lock().unwrap();
        let before = tables.tokens.len();
        tables.tokens.retain(|_, t| t.user_id != user_id);
        Ok((before - tables.tokens.len()) as u64)
    }

    async fn delete_expired(&self, now: OffsetDateTime) -> Result<u64, AppError> {
        self.available()?;
        let mut tables = self.tables.lock().unwrap();
        let before = tables.tokens.len();
        tables.tokens.retain(|_, t| t.expiry > now);
        Ok((before - tables.tokens.len()) as u64)
    }

    async fn begin(&self) -> Result<Box<dyn RevocationTx>, AppError> {
        self.available()?;
        Ok(Box::new(MemoryTx {
            tables: self.tables.clone(),
            fail_token_delete: self.fail_purge.load(Ordering::SeqCst),
            rollbacks: self.rollbacks.clone(),
            staged: Vec::new(),
        }))
    }
}

enum Staged {
    Deactivate(Uuid),
    DeleteTokens(Uuid),
}

/// Writes are held back until `commit`; dropping the handle discards them.
pub struct MemoryTx {
    tables: Arc<Mutex<Tables>>,
    fail_token_delete: bool,
    rollbacks: Arc<AtomicUsize>,
    staged: Vec<Staged>,
}

#[async_trait]
impl RevocationTx for MemoryTx {
    async fn set_inactive(&mut self, user_id: Uuid) -> Result<u64, AppError> {
        let exists = self.tables.lock().unwrap().users.contains_key(&user_id);
        if exists {
            self.staged.push(Staged::Deactivate(user_id));
        }
        Ok(exists as u64)
    }

    async fn delete_all_for_user(&mut self, user_id: Uuid) -> Result<u64, AppError> {
        if self.fail_token_delete {
            return Err(AppError::Persistence("token delete failed".into()));
        }
        let count = self
            .tables
            .lock()
            .unwrap()
            .tokens
            .values()
            .filter(|t| t.user_id == user_id)
            .count();
        self.staged.push(Staged::DeleteTokens(user_id));
        Ok(count as u64)
    }

    async fn commit(mut self: Box<Self>) -> Result<(), AppError> {
        let staged = std::mem::take(&mut self.staged);
        let mut tables = self.tables.lock().unwrap();
        for op in staged {
            match op {
                Staged::Deactivate(id) => {
                    if let Some(u) = tables.users.get_mut(&id) {
                        u.active = false;
                    }
                }
                Staged::DeleteTokens(id) => tables.tokens.retain(|_, t| t.user_id != id),
            }
        }
        Ok(())
    }
}

impl Drop for MemoryTx {
    fn drop(&mut self) {
        if !self.staged.is_empty() {
            self.rollbacks.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        self.available()?;
        let tables = self.tables.lock().unwrap();
        Ok(tables.users.values().find(|u| u.email == email).cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AppError> {
        self.available()?;
        Ok(self.tables.lock().unwrap().users.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<User>, AppError> {
        self.available()?;
        let mut users: Vec<User> = self.tables.lock().unwrap().users.values().cloned().collect();
        users.sort_by(|a, b| a.email.cmp(&b.email));
        Ok(users)
    }

    async fn create(&self, new: &NewUser) -> Result<User, AppError> {
        self.available()?;
        let mut tables = self.tables.lock().unwrap();
        if Self::email_taken(&tables, &new.email, None) {
            return Err(AppError::Conflict("email already registered".into()));
        }
        let now = OffsetDateTime::now_utc();
        let user = User {
            id: Uuid::new_v4(),
            email: new.email.clone(),
            first_name: new.first_name.clone(),
            last_name: new.last_name.clone(),
            password_hash: new.password_hash.clone(),
            active: new.active,
            created_at: now,
            updated_at: now,
        };
        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn update(
        &self,
        update: &UserUpdate,
        password_hash: Option<&str>,
    ) -> Result<User, AppError> {
        self.available()?;
        let mut tables = self.tables.lock().unwrap();
        if Self::email_taken(&tables, &update.email, Some(update.id)) {
            return Err(AppError::Conflict("email already registered".into()));
        }
        let user = tables
            .users
            .get_mut(&update.id)
            .ok_or_else(|| AppError::NotFound(format!("user {} not found", update.id)))?;
        user.email = update.email.clone();
        user.first_name = update.first_name.clone();
        user.last_name = update.last_name.clone();
        user.active = update.active;
        if let Some(hash) = password_hash {
            user.password_hash = hash.to_owned();
        }
        user.updated_at = OffsetDateTime::now_utc();
        Ok(user.clone())
    }

    async fn delete(&self, id: Uuid) -> Result<u64, AppError> {
        self.available()?;
        let mut tables = self.tables.lock().unwrap();
        let removed = tables.users.remove(&id).is_some();
        if removed {
            tables.tokens.retain(|_, t| t.user_id != id);
        }
        Ok(removed as u64)
    }
}
