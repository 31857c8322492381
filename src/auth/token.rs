//! Opaque bearer token generation.
//!
//! A token is 32 bytes from the OS entropy source, hex encoded for the wire.
//! Only its SHA-256 digest is ever stored.

use std::{fmt, sync::Arc};

use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use time::{Duration, OffsetDateTime};
use tracing::{debug, error};
use uuid::Uuid;

use crate::{clock::Clock, error::AppError};

/// Secret size before hex encoding (256 bits).
pub const TOKEN_BYTES: usize = 32;

/// Length of the hex-encoded plaintext.
pub const TOKEN_CHARS: usize = TOKEN_BYTES * 2;

/// The secret handed to the client. Never persisted, never logged.
#[derive(Clone)]
pub struct PlaintextToken(String);

impl PlaintextToken {
    #[cfg_attr(not(test), allow(dead_code))]
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Debug for PlaintextToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PlaintextToken(<redacted>)")
    }
}

/// One-way digest of a plaintext token; the only form that reaches storage.
#[derive(Clone, Copy)]
pub struct TokenHash([u8; 32]);

impl TokenHash {
    pub fn derive(plaintext: &str) -> Self {
        let digest = Sha256::digest(plaintext.as_bytes());
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        Self(out)
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        <[u8; 32]>::try_from(bytes).ok().map(Self)
    }

    /// Placeholder compared against when no row was found.
    pub(crate) fn zeroed() -> Self {
        Self([0u8; 32])
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn ct_eq(&self, other: &TokenHash) -> bool {
        constant_time_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for TokenHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TokenHash({}..)", hex::encode(&self.0[..4]))
    }
}

/// A freshly generated token, alive only between generation and the response.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub plaintext: PlaintextToken,
    pub hash: TokenHash,
    pub user_id: Uuid,
    pub issued_at: OffsetDateTime,
    pub expiry: OffsetDateTime,
}

#[derive(Clone)]
pub struct TokenGenerator {
    clock: Arc<dyn Clock>,
}

impl TokenGenerator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    pub fn generate(&self, user_id: Uuid, ttl: Duration) -> Result<IssuedToken, AppError> {
        self.generate_with(&mut OsRng, user_id, ttl)
    }

    pub(crate) fn generate_with<R: RngCore + ?Sized>(
        &self,
        rng: &mut R,
        user_id: Uuid,
        ttl: Duration,
    ) -> Result<IssuedToken, AppError> {
        if !ttl.is_positive() {
            return Err(AppError::Validation("token ttl must be positive".into()));
        }

        let mut secret = [0u8; TOKEN_BYTES];
        rng.try_fill_bytes(&mut secret).map_err(|e| {
            error!(error = %e, "entropy source failed, refusing to issue token");
            AppError::Randomness(e.to_string())
        })?;

        let plaintext = hex::encode(secret);
        let hash = TokenHash::derive(&plaintext);
        let issued_at = self.clock.now();
        let expiry = issued_at
            .checked_add(ttl)
            .ok_or_else(|| AppError::Validation("token ttl out of range".into()))?;
        debug!(%user_id, %expiry, "token generated");

        Ok(IssuedToken {
            plaintext: PlaintextToken(plaintext),
            hash,
            user_id,
            issued_at,
            expiry,
        })
    }
}

/// Byte comparison whose running time depends only on the input length.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
