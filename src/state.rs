//
// CSRF state to nonce mapping, consumed exactly once
//
use std::collections::HashMap;
use std::sync::Mutex as StdMutex;

use crate::error::Result;
use crate::lock::Mutex;

/// Process-local, ephemeral store pairing each outstanding authorization
/// request `state` with its `nonce`. A successful lookup retires the entry,
/// so a state value can redeem at most once.
#[derive(Default)]
pub struct StateStore {
    lock: Mutex,
    entries: StdMutex<HashMap<String, String>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_state(&self, state: &str, nonce: &str) -> Result<()> {
        let guard = self.lock.acquire().await?;
        let result = {
            let mut entries = self.entries.lock().expect("state map poisoned");
            if entries.contains_key(state) {
                Err(crate::error::Error::new(
                    crate::error::ErrorKind::StateAlreadyExists,
                    format!("State {state} already has a pending nonce"),
                ))
            } else {
                entries.insert(state.to_string(), nonce.to_string());
                Ok(())
            }
        };
        guard.release();
        result
    }

    /// Atomically read and delete the nonce for `state`.
    pub async fn take_nonce(&self, state: &str) -> Result<String> {
        let guard = self.lock.acquire().await?;
        let result = {
            let mut entries = self.entries.lock().expect("state map poisoned");
            entries.remove(state).ok_or_else(|| {
                crate::error::Error::new(
                    crate::error::ErrorKind::StateMismatch,
                    "Unknown or already consumed state",
                )
            })
        };
        guard.release();
        result
    }

    /// Read a nonce without consuming it.
    #[cfg(test)]
    pub(crate) fn peek(&self, state: &str) -> Option<String> {
        self.entries.lock().expect("state map poisoned").get(state).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("state map poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::sync::Arc;

    #[tokio::test]
    async fn nonce_is_returned_exactly_once() {
        let store = StateStore::new();
        store.add_state("s1", "n1").await.unwrap();

        assert_eq!(store.take_nonce("s1").await.unwrap(), "n1");
        let err = store.take_nonce("s1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StateMismatch);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn duplicate_state_is_rejected() {
        let store = StateStore::new();
        store.add_state("s1", "n1").await.unwrap();
        let err = store.add_state("s1", "n2").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StateAlreadyExists);

        // The original mapping is untouched
        assert_eq!(store.take_nonce("s1").await.unwrap(), "n1");
    }

    #[tokio::test]
    async fn unknown_state_is_a_mismatch() {
        let store = StateStore::new();
        assert_eq!(store.take_nonce("never-added").await.unwrap_err().kind(), ErrorKind::StateMismatch);
    }

    #[tokio::test]
    async fn concurrent_consumers_see_one_winner() {
        let store = Arc::new(StateStore::new());
        store.add_state("s1", "n1").await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move { store.take_nonce("s1").await }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
