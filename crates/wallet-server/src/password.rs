//! PBKDF2-HMAC-SHA256 password hashing.
//!
//! Each account gets a random 16-byte salt and a 64-byte derived key, both
//! stored as lowercase hex alongside the iteration count.
//!
//! Derivation is slow on purpose. The driver never runs it itself; it hands
//! out a [`PasswordJob`] that the runtime executes on a blocking worker.

use std::fmt;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Salt length in bytes.
pub const SALT_LEN: usize = 16;

/// Derived key length in bytes.
pub const KEY_LEN: usize = 64;

const BLOCK_LEN: usize = 32;

/// Password hashing failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PasswordError {
    /// Stored salt or hash is not valid hex
    #[error("stored credential is not valid hex: {0}")]
    Encoding(String),

    /// HMAC refused the key
    #[error("hmac key rejected")]
    InvalidKey,

    /// Zero iterations requested
    #[error("iteration count must be positive")]
    NoIterations,
}

/// Salt and derived key, hex encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashedPassword {
    /// Salt, hex
    pub salt: String,
    /// Derived key, hex
    pub hash: String,
}

/// PBKDF2 (RFC 8018) with HMAC-SHA256 as the PRF, filling `out`.
///
/// # Errors
///
/// `NoIterations` if `iterations` is zero.
pub fn pbkdf2(password: &[u8], salt: &[u8], iterations: u32, out: &mut [u8]) -> Result<(), PasswordError> {
    if iterations == 0 {
        return Err(PasswordError::NoIterations);
    }

    let prf = HmacSha256::new_from_slice(password).map_err(|_| PasswordError::InvalidKey)?;

    for (index, chunk) in out.chunks_mut(BLOCK_LEN).enumerate() {
        let block_number = u32::try_from(index + 1).map_err(|_| PasswordError::InvalidKey)?;

        let mut mac = prf.clone();
        mac.update(salt);
        mac.update(&block_number.to_be_bytes());
        let mut u = [0u8; BLOCK_LEN];
        u.copy_from_slice(&mac.finalize().into_bytes());
        let mut t = u;

        for _ in 1..iterations {
            let mut mac = prf.clone();
            mac.update(&u);
            u.copy_from_slice(&mac.finalize().into_bytes());
            for (acc, byte) in t.iter_mut().zip(u.iter()) {
                *acc ^= byte;
            }
        }

        chunk.copy_from_slice(&t[..chunk.len()]);
    }

    Ok(())
}

/// Hash `password` with `salt`.
///
/// # Errors
///
/// `NoIterations` if `iterations` is zero.
pub fn hash_password(password: &str, salt: &[u8; SALT_LEN], iterations: u32) -> Result<HashedPassword, PasswordError> {
    let mut key = [0u8; KEY_LEN];
    pbkdf2(password.as_bytes(), salt, iterations, &mut key)?;
    Ok(HashedPassword { salt: hex::encode(salt), hash: hex::encode(key) })
}

/// Check `password` against a stored salt and hash.
///
/// The comparison does not stop at the first differing byte.
///
/// # Errors
///
/// `Encoding` if the stored values are not hex, `NoIterations` if
/// `iterations` is zero.
pub fn verify_password(password: &str, stored: &HashedPassword, iterations: u32) -> Result<bool, PasswordError> {
    let salt = hex::decode(&stored.salt).map_err(|e| PasswordError::Encoding(e.to_string()))?;
    let expected = hex::decode(&stored.hash).map_err(|e| PasswordError::Encoding(e.to_string()))?;

    let mut actual = vec![0u8; expected.len()];
    pbkdf2(password.as_bytes(), &salt, iterations, &mut actual)?;

    let diff = actual.iter().zip(&expected).fold(0u8, |acc, (a, b)| acc | (a ^ b));
    Ok(!expected.is_empty() && diff == 0)
}

/// What a [`PasswordJob`] computes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PasswordTask {
    /// Hash a new password (SIGNUP)
    Hash {
        /// Fresh random salt
        salt: [u8; SALT_LEN],
    },
    /// Check a password against an account's credential (LOGIN)
    Verify {
        /// Credential on record when the job was issued
        stored: HashedPassword,
    },
}

/// Result of a finished [`PasswordJob`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PasswordOutcome {
    /// New credential for the account
    Hashed(HashedPassword),
    /// Whether the password matched
    Verified(bool),
}

/// One key derivation for a SIGNUP or LOGIN in progress.
///
/// Carries everything needed to finish the command, so the driver keeps no
/// state while the job runs.
#[derive(Clone, PartialEq, Eq)]
pub struct PasswordJob {
    /// Connection waiting for the reply
    pub session_id: u64,
    /// Account the command names
    pub username: String,
    /// PBKDF2 iteration count
    pub iterations: u32,
    /// Hash or verify
    pub task: PasswordTask,
    password: String,
}

impl PasswordJob {
    /// Job hashing `password` for a new account.
    pub fn hash(session_id: u64, username: &str, password: &str, salt: [u8; SALT_LEN], iterations: u32) -> Self {
        Self {
            session_id,
            username: username.to_string(),
            iterations,
            task: PasswordTask::Hash { salt },
            password: password.to_string(),
        }
    }

    /// Job checking `password` against `stored`.
    pub fn verify(session_id: u64, username: &str, password: &str, stored: HashedPassword, iterations: u32) -> Self {
        Self {
            session_id,
            username: username.to_string(),
            iterations,
            task: PasswordTask::Verify { stored },
            password: password.to_string(),
        }
    }

    /// Run the derivation. Blocks for as long as the iteration count demands.
    ///
    /// # Errors
    ///
    /// As [`hash_password`] and [`verify_password`].
    pub fn run(&self) -> Result<PasswordOutcome, PasswordError> {
        match &self.task {
            PasswordTask::Hash { salt } => {
                hash_password(&self.password, salt, self.iterations).map(PasswordOutcome::Hashed)
            },
            PasswordTask::Verify { stored } => {
                verify_password(&self.password, stored, self.iterations).map(PasswordOutcome::Verified)
            },
        }
    }
}

impl fmt::Debug for PasswordJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PasswordJob")
            .field("session_id", &self.session_id)
            .field("username", &self.username)
            .field("iterations", &self.iterations)
            .field("task", &self.task)
            .finish_non_exhaustive()
    }
}
