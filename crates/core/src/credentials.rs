//! API credential rotation.
//!
//! A [`CredentialSource`] hands out credentials one connection attempt at a
//! time and takes them out of rotation once the remote service refuses them.
//! [`CredentialPool`] is the in-memory implementation over an ordered list of
//! secrets, e.g. the comma separated `GEMINI_API_KEYS` variable.

use crate::error::SessionError;
use secrecy::SecretString;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialStatus {
    Unused,
    Active,
    Exhausted,
    Invalid,
}

impl CredentialStatus {
    pub fn is_usable(self) -> bool {
        matches!(self, CredentialStatus::Unused | CredentialStatus::Active)
    }
}

/// A borrowed credential: the pool position plus the secret itself.
/// Debug output never contains the secret.
#[derive(Clone)]
pub struct Credential {
    index: usize,
    secret: Arc<SecretString>,
}

impl Credential {
    pub fn new(index: usize, secret: SecretString) -> Self {
        Self {
            index,
            secret: Arc::new(secret),
        }
    }

    /// Position in the source's ordering; safe to log.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn secret(&self) -> &SecretString {
        &self.secret
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

/// The capability set the session needs from any secret backend.
#[cfg_attr(test, mockall::automock)]
pub trait CredentialSource: Send + Sync {
    /// The next usable credential in round-robin order, or `PoolExhausted`.
    fn next(&self) -> Result<Credential, SessionError>;

    /// Removes the credential from rotation: the key was rejected.
    fn mark_invalid(&self, credential: &Credential);

    /// Removes the credential from rotation: the key is out of quota.
    fn mark_exhausted(&self, credential: &Credential);

    /// Hands a credential back after a session ends. It stays usable.
    fn release(&self, credential: &Credential);
}

struct Entry {
    secret: Arc<SecretString>,
    status: CredentialStatus,
}

struct PoolState {
    entries: Vec<Entry>,
    cursor: usize,
}

/// Ordered, lock-protected credential list with round-robin rotation.
///
/// Refused credentials stay out of rotation for the life of the process.
pub struct CredentialPool {
    state: Mutex<PoolState>,
}

impl CredentialPool {
    /// Builds a pool from secrets in order, skipping blank entries.
    pub fn new<I, S>(secrets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entries = secrets
            .into_iter()
            .map(|s| Into::<String>::into(s).trim().to_string())
            .filter(|s| !s.is_empty())
            .map(|s| Entry {
                secret: Arc::new(SecretString::from(s)),
                status: CredentialStatus::Unused,
            })
            .collect();
        Self {
            state: Mutex::new(PoolState { entries, cursor: 0 }),
        }
    }

    /// Parses a comma separated list such as `"key-a, key-b,,key-c"`.
    pub fn from_list(list: &str) -> Self {
        Self::new(list.split(','))
    }

    /// Shuffles the order once. Rotation afterwards is still round-robin.
    pub fn shuffled(self) -> Self {
        use rand::seq::SliceRandom;
        {
            let mut state = self.lock();
            state.entries.shuffle(&mut rand::thread_rng());
        }
        self
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn status(&self, index: usize) -> Option<CredentialStatus> {
        self.lock().entries.get(index).map(|e| e.status)
    }

    /// Number of credentials still in rotation.
    pub fn usable(&self) -> usize {
        self.lock()
            .entries
            .iter()
            .filter(|e| e.status.is_usable())
            .count()
    }

    fn retire(&self, credential: &Credential, status: CredentialStatus) {
        let mut state = self.lock();
        let Some(entry) = state.entries.get_mut(credential.index) else {
            tracing::warn!(index = credential.index, "retiring unknown credential");
            return;
        };
        if entry.status.is_usable() {
            entry.status = status;
            tracing::warn!(index = credential.index, ?status, "credential removed from rotation");
        }
    }
}

impl CredentialSource for CredentialPool {
    fn next(&self) -> Result<Credential, SessionError> {
        let mut state = self.lock();
        let len = state.entries.len();
        for offset in 0..len {
            let index = (state.cursor + offset) % len;
            let entry = &mut state.entries[index];
            if entry.status.is_usable() {
                entry.status = CredentialStatus::Active;
                let credential = Credential {
                    index,
                    secret: entry.secret.clone(),
                };
                state.cursor = (index + 1) % len;
                tracing::debug!(index, "credential handed out");
                return Ok(credential);
            }
        }
        Err(SessionError::PoolExhausted)
    }

    fn mark_invalid(&self, credential: &Credential) {
        self.retire(credential, CredentialStatus::Invalid);
    }

    fn mark_exhausted(&self, credential: &Credential) {
        self.retire(credential, CredentialStatus::Exhausted);
    }

    fn release(&self, credential: &Credential) {
        let state = self.lock();
        if let Some(entry) = state.entries.get(credential.index) {
            tracing::debug!(index = credential.index, status = ?entry.status, "credential released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn secret_of(c: &Credential) -> String {
        c.secret().expose_secret().to_string()
    }

    #[test]
    fn parses_list_skipping_blanks() {
        let pool = CredentialPool::from_list(" a, b ,, ,c");
        assert_eq!(pool.len(), 3);
        let first = pool.next().unwrap();
        assert_eq!(secret_of(&first), "a");
    }

    #[test]
    fn round_robin_over_usable_credentials() {
        let pool = CredentialPool::new(["a", "b", "c"]);
        let order: Vec<String> = (0..4).map(|_| secret_of(&pool.next().unwrap())).collect();
        assert_eq!(order, vec!["a", "b", "c", "a"]);
        assert_eq!(pool.status(0), Some(CredentialStatus::Active));
    }

    #[test]
    fn retired_credentials_are_never_returned_again() {
        let pool = CredentialPool::new(["a", "b", "c"]);
        let a = pool.next().unwrap();
        pool.mark_invalid(&a);
        let b = pool.next().unwrap();
        pool.mark_exhausted(&b);

        for _ in 0..5 {
            let c = pool.next().unwrap();
            assert_eq!(c.index(), 2);
        }
        assert_eq!(pool.status(0), Some(CredentialStatus::Invalid));
        assert_eq!(pool.status(1), Some(CredentialStatus::Exhausted));
        assert_eq!(pool.usable(), 1);
    }

    #[test]
    fn marking_is_idempotent_and_keeps_first_reason() {
        let pool = CredentialPool::new(["a"]);
        let a = pool.next().unwrap();
        pool.mark_exhausted(&a);
        pool.mark_exhausted(&a);
        pool.mark_invalid(&a);
        assert_eq!(pool.status(0), Some(CredentialStatus::Exhausted));
    }

    #[test]
    fn exhausted_pool_fails_every_time() {
        let pool = CredentialPool::new(["a", "b"]);
        let a = pool.next().unwrap();
        let b = pool.next().unwrap();
        pool.mark_invalid(&a);
        pool.mark_invalid(&b);
        for _ in 0..3 {
            assert_eq!(pool.next().unwrap_err(), SessionError::PoolExhausted);
        }
    }

    #[test]
    fn empty_pool_is_exhausted() {
        let pool = CredentialPool::from_list(" , ");
        assert!(pool.is_empty());
        assert_eq!(pool.next().unwrap_err(), SessionError::PoolExhausted);
    }

    #[test]
    fn release_keeps_credential_active() {
        let pool = CredentialPool::new(["a", "b"]);
        let a = pool.next().unwrap();
        pool.release(&a);
        assert_eq!(pool.status(0), Some(CredentialStatus::Active));
        assert_eq!(pool.usable(), 2);
    }

    #[test]
    fn shuffle_keeps_every_secret() {
        let pool = CredentialPool::new(["a", "b", "c", "d"]).shuffled();
        let mut seen: Vec<String> = (0..4).map(|_| secret_of(&pool.next().unwrap())).collect();
        seen.sort();
        assert_eq!(seen, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn debug_hides_secret() {
        let pool = CredentialPool::new(["super-secret"]);
        let c = pool.next().unwrap();
        assert!(!format!("{c:?}").contains("super-secret"));
    }
}
