use std::time::Duration;

use async_trait::async_trait;

use crate::error::{KvError, Result};

/// Outcome of an atomic multi-key reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationOutcome {
    /// Every counter was decremented by its quantity.
    Reserved,
    /// At least one counter was missing or too low; nothing changed.
    Insufficient,
    /// The reservation marker was already set; nothing changed.
    AlreadyReserved,
}

impl ReservationOutcome {
    /// True when the counters hold the reservation after the call, whether
    /// this call or an earlier one took it.
    pub fn is_reserved(&self) -> bool {
        matches!(
            self,
            ReservationOutcome::Reserved | ReservationOutcome::AlreadyReserved
        )
    }
}

/// Key-value store contract.
///
/// Counters are stored as decimal strings, so `get` on a counter returns
/// its textual value and [`get_int`](Self::get_int) parses it.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Reads a value.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Writes a value, replacing any previous one.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Writes a value only if the key does not exist. Returns true if the
    /// value was written.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Option<Duration>)
    -> Result<bool>;

    /// Adds `delta` to a counter, creating it at zero first if missing.
    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64>;

    /// Subtracts `delta` from a counter, creating it at zero first if missing.
    async fn decr_by(&self, key: &str, delta: i64) -> Result<i64>;

    /// Runs the reservation script: decrements `keys[i]` by `quantities[i]`
    /// for every `i` if and only if every counter exists and covers its
    /// quantity. No other command interleaves with the check and the
    /// decrements.
    async fn reserve_all(&self, keys: &[String], quantities: &[i64])
    -> Result<ReservationOutcome>;

    /// Same as [`reserve_all`](Self::reserve_all), guarded by `marker`.
    ///
    /// Returns [`ReservationOutcome::AlreadyReserved`] without touching any
    /// counter if `marker` exists. A successful reservation sets `marker` in
    /// the same atomic step, so repeating the call never decrements twice.
    async fn reserve_all_once(
        &self,
        marker: &str,
        keys: &[String],
        quantities: &[i64],
    ) -> Result<ReservationOutcome>;

    /// Undoes a reservation taken with [`reserve_all_once`](Self::reserve_all_once).
    ///
    /// Increments `keys[i]` by `quantities[i]` and deletes `marker` in one
    /// atomic step. Returns false and changes nothing if `marker` is absent,
    /// so a release runs at most once per reservation.
    async fn release_all(&self, marker: &str, keys: &[String], quantities: &[i64])
    -> Result<bool>;

    /// Reads a counter as an integer.
    async fn get_int(&self, key: &str) -> Result<Option<i64>> {
        match self.get(key).await? {
            Some(value) => value
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| KvError::NotAnInteger {
                    key: key.to_string(),
                    value,
                }),
            None => Ok(None),
        }
    }
}

/// Checks that a reservation request is well-formed.
pub(crate) fn validate_reservation(keys: &[String], quantities: &[i64]) -> Result<()> {
    if keys.len() != quantities.len() {
        return Err(KvError::InvalidReservation(format!(
            "{} keys but {} quantities",
            keys.len(),
            quantities.len()
        )));
    }
    if let Some(q) = quantities.iter().find(|q| **q < 0) {
        return Err(KvError::InvalidReservation(format!(
            "negative quantity {q}"
        )));
    }
    Ok(())
}
