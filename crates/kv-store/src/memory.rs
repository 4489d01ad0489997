use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::{
    KvError, Result,
    store::{KeyValueStore, ReservationOutcome, validate_reservation},
};

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

#[derive(Default)]
struct StoreState {
    entries: HashMap<String, Entry>,
    unavailable: bool,
}

impl StoreState {
    fn check_available(&self) -> Result<()> {
        if self.unavailable {
            return Err(KvError::Unavailable(
                "in-memory store marked unavailable".to_string(),
            ));
        }
        Ok(())
    }

    fn live(&self, key: &str) -> Option<&str> {
        let now = Instant::now();
        self.entries
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value.as_str())
    }

    fn add(&mut self, key: &str, delta: i64) -> Result<i64> {
        let current = match self.live(key) {
            Some(value) => value.parse::<i64>().map_err(|_| KvError::NotAnInteger {
                key: key.to_string(),
                value: value.to_string(),
            })?,
            None => 0,
        };
        let next = current + delta;
        // INCRBY/DECRBY keep an existing expiry
        let expires_at = self
            .entries
            .get(key)
            .filter(|e| e.is_live(Instant::now()))
            .and_then(|e| e.expires_at);
        self.entries.insert(
            key.to_string(),
            Entry {
                value: next.to_string(),
                expires_at,
            },
        );
        Ok(next)
    }

    fn put(&mut self, key: &str, value: &str, ttl: Option<Duration>) {
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
    }

    /// Check-then-decrement with the script's rules: a missing or
    /// non-numeric counter counts as empty.
    fn reserve(&mut self, keys: &[String], quantities: &[i64]) -> Result<ReservationOutcome> {
        let covered = keys.iter().zip(quantities).all(|(key, quantity)| {
            self.live(key)
                .and_then(|value| value.parse::<i64>().ok())
                .is_some_and(|current| current >= *quantity)
        });
        if !covered {
            return Ok(ReservationOutcome::Insufficient);
        }

        for (key, quantity) in keys.iter().zip(quantities) {
            self.add(key, -quantity)?;
        }
        Ok(ReservationOutcome::Reserved)
    }
}

/// In-memory key-value store for tests and single-process runs.
///
/// All operations take one lock, which gives [`reserve_all`] the same
/// indivisibility the Lua script has on Redis.
///
/// [`reserve_all`]: KeyValueStore::reserve_all
#[derive(Clone, Default)]
pub struct InMemoryKeyValueStore {
    state: Arc<Mutex<StoreState>>,
}

impl InMemoryKeyValueStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail with [`KvError::Unavailable`].
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().await.unavailable = unavailable;
    }

    /// Returns the number of live keys.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let state = self.state.lock().await;
        state.entries.values().filter(|e| e.is_live(now)).count()
    }

    /// Returns true if no live keys are stored.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl KeyValueStore for InMemoryKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let state = self.state.lock().await;
        state.check_available()?;
        Ok(state.live(key).map(str::to_string))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut state = self.state.lock().await;
        state.check_available()?;
        state.put(key, value, ttl);
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool> {
        let mut state = self.state.lock().await;
        state.check_available()?;
        if state.live(key).is_some() {
            return Ok(false);
        }
        state.put(key, value, ttl);
        Ok(true)
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64> {
        let mut state = self.state.lock().await;
        state.check_available()?;
        state.add(key, delta)
    }

    async fn decr_by(&self, key: &str, delta: i64) -> Result<i64> {
        let mut state = self.state.lock().await;
        state.check_available()?;
        state.add(key, -delta)
    }

    async fn reserve_all(
        &self,
        keys: &[String],
        quantities: &[i64],
    ) -> Result<ReservationOutcome> {
        validate_reservation(keys, quantities)?;

        let mut state = self.state.lock().await;
        state.check_available()?;

        state.reserve(keys, quantities)
    }

    async fn reserve_all_once(
        &self,
        marker: &str,
        keys: &[String],
        quantities: &[i64],
    ) -> Result<ReservationOutcome> {
        validate_reservation(keys, quantities)?;

        let mut state = self.state.lock().await;
        state.check_available()?;
        if state.live(marker).is_some() {
            return Ok(ReservationOutcome::AlreadyReserved);
        }

        let outcome = state.reserve(keys, quantities)?;
        if outcome == ReservationOutcome::Reserved {
            state.put(marker, "1", None);
        }
        Ok(outcome)
    }

    async fn release_all(
        &self,
        marker: &str,
        keys: &[String],
        quantities: &[i64],
    ) -> Result<bool> {
        validate_reservation(keys, quantities)?;

        let mut state = self.state.lock().await;
        state.check_available()?;
        if state.live(marker).is_none() {
            return Ok(false);
        }

        state.entries.remove(marker);
        for (key, quantity) in keys.iter().zip(quantities) {
            state.add(key, *quantity)?;
        }
        Ok(true)
    }
}
