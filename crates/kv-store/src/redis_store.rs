use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};

use crate::{
    KvError, Result,
    script::{
        ALREADY_RESERVED, INSUFFICIENT, NOT_RESERVED, RELEASE_SCRIPT, RELEASED,
        RESERVE_ONCE_SCRIPT, RESERVE_SCRIPT, RESERVED,
    },
    store::{KeyValueStore, ReservationOutcome, validate_reservation},
};

/// Redis-backed key-value store.
///
/// The reservation runs as one `EVALSHA` of [`RESERVE_SCRIPT`] (falling back
/// to `EVAL` on a cold script cache), so Redis executes the check and the
/// decrements without interleaving other clients' commands. The
/// marker-guarded variants use [`RESERVE_ONCE_SCRIPT`] and
/// [`RELEASE_SCRIPT`] the same way.
#[derive(Clone)]
pub struct RedisKeyValueStore {
    conn_manager: ConnectionManager,
    reserve_script: redis::Script,
    reserve_once_script: redis::Script,
    release_script: redis::Script,
}

impl RedisKeyValueStore {
    /// Connects to Redis at `redis_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the connection fails.
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;
        let conn_manager = ConnectionManager::new(client).await?;
        Ok(Self {
            conn_manager,
            reserve_script: redis::Script::new(RESERVE_SCRIPT),
            reserve_once_script: redis::Script::new(RESERVE_ONCE_SCRIPT),
            release_script: redis::Script::new(RELEASE_SCRIPT),
        })
    }

    /// Runs a marker script: `KEYS[1]` is the marker, then one counter key
    /// per quantity.
    async fn invoke_marked(
        &self,
        script: &redis::Script,
        marker: &str,
        keys: &[String],
        quantities: &[i64],
    ) -> Result<i64> {
        validate_reservation(keys, quantities)?;
        let mut conn = self.conn_manager.clone();

        let mut invocation = script.prepare_invoke();
        invocation.key(marker);
        for (key, quantity) in keys.iter().zip(quantities) {
            invocation.key(key).arg(*quantity);
        }
        Ok(invocation.invoke_async(&mut conn).await?)
    }

    fn ttl_millis(ttl: Duration) -> u64 {
        u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
    }
}

#[async_trait]
impl KeyValueStore for RedisKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn_manager.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        match ttl {
            Some(ttl) => {
                let _: () = conn.pset_ex(key, value, Self::ttl_millis(ttl)).await?;
            }
            None => {
                let _: () = conn.set(key, value).await?;
            }
        }
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool> {
        let mut conn = self.conn_manager.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("NX");
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(Self::ttl_millis(ttl));
        }
        let written: Option<String> = cmd.query_async(&mut conn).await?;
        Ok(written.is_some())
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64> {
        let mut conn = self.conn_manager.clone();
        let value: i64 = conn.incr(key, delta).await?;
        Ok(value)
    }

    async fn decr_by(&self, key: &str, delta: i64) -> Result<i64> {
        let mut conn = self.conn_manager.clone();
        let value: i64 = conn.decr(key, delta).await?;
        Ok(value)
    }

    async fn reserve_all(
        &self,
        keys: &[String],
        quantities: &[i64],
    ) -> Result<ReservationOutcome> {
        validate_reservation(keys, quantities)?;
        let mut conn = self.conn_manager.clone();

        let mut invocation = self.reserve_script.prepare_invoke();
        for (key, quantity) in keys.iter().zip(quantities) {
            invocation.key(key).arg(*quantity);
        }
        let result: i64 = invocation.invoke_async(&mut conn).await?;

        match result {
            RESERVED => Ok(ReservationOutcome::Reserved),
            INSUFFICIENT => Ok(ReservationOutcome::Insufficient),
            other => {
                tracing::error!(result = other, "Reservation script returned unexpected value");
                Err(KvError::ScriptResult(other))
            }
        }
    }

    async fn reserve_all_once(
        &self,
        marker: &str,
        keys: &[String],
        quantities: &[i64],
    ) -> Result<ReservationOutcome> {
        let result = self
            .invoke_marked(&self.reserve_once_script, marker, keys, quantities)
            .await?;
        match result {
            RESERVED => Ok(ReservationOutcome::Reserved),
            INSUFFICIENT => Ok(ReservationOutcome::Insufficient),
            ALREADY_RESERVED => Ok(ReservationOutcome::AlreadyReserved),
            other => {
                tracing::error!(result = other, "Reservation script returned unexpected value");
                Err(KvError::ScriptResult(other))
            }
        }
    }

    async fn release_all(
        &self,
        marker: &str,
        keys: &[String],
        quantities: &[i64],
    ) -> Result<bool> {
        let result = self
            .invoke_marked(&self.release_script, marker, keys, quantities)
            .await?;
        match result {
            RELEASED => Ok(true),
            NOT_RESERVED => Ok(false),
            other => {
                tracing::error!(result = other, "Release script returned unexpected value");
                Err(KvError::ScriptResult(other))
            }
        }
    }
}
