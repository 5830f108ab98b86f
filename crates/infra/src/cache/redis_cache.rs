//! Redis-backed shared cache (optional).
//!
//! `put_if_absent` maps to `SET NX EX` and `increment` to an atomic `INCR` + `EXPIRE`
//! pipeline, so dedup markers and retry counters stay race-free across processes.

use std::time::Duration;

use super::{CacheError, SharedCache};

#[derive(Debug, Clone)]
pub struct RedisSharedCache {
    client: redis::Client,
    prefix: String,
}

impl RedisSharedCache {
    pub fn new(redis_url: impl AsRef<str>, prefix: impl Into<String>) -> Result<Self, CacheError> {
        let client = redis::Client::open(redis_url.as_ref()).map_err(backend)?;
        Ok(Self {
            client,
            prefix: prefix.into(),
        })
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    fn conn(&self) -> Result<redis::Connection, CacheError> {
        self.client.get_connection().map_err(backend)
    }
}

fn backend(e: redis::RedisError) -> CacheError {
    CacheError::Backend(e.to_string())
}

/// Redis expiries are whole seconds; never send 0 (that deletes the key).
fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

impl SharedCache for RedisSharedCache {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn()?;
        redis::cmd("GET")
            .arg(self.key(key))
            .query::<Option<String>>(&mut conn)
            .map_err(backend)
    }

    fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.conn()?;
        redis::cmd("SET")
            .arg(self.key(key))
            .arg(value)
            .arg("EX")
            .arg(ttl_secs(ttl))
            .query::<()>(&mut conn)
            .map_err(backend)
    }

    fn has(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.conn()?;
        let n: u64 = redis::cmd("EXISTS")
            .arg(self.key(key))
            .query(&mut conn)
            .map_err(backend)?;
        Ok(n > 0)
    }

    fn put_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, CacheError> {
        let mut conn = self.conn()?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(self.key(key))
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs(ttl))
            .query(&mut conn)
            .map_err(backend)?;
        Ok(reply.is_some())
    }

    fn increment(&self, key: &str, ttl: Duration) -> Result<u64, CacheError> {
        let mut conn = self.conn()?;
        let key = self.key(key);
        let (n,): (i64,) = redis::pipe()
            .atomic()
            .cmd("INCR")
            .arg(&key)
            .cmd("EXPIRE")
            .arg(&key)
            .arg(ttl_secs(ttl))
            .ignore()
            .query(&mut conn)
            .map_err(|e| match e.kind() {
                redis::ErrorKind::TypeError | redis::ErrorKind::ResponseError => {
                    CacheError::NotACounter { key: key.clone() }
                }
                _ => backend(e),
            })?;
        u64::try_from(n).map_err(|_| CacheError::NotACounter { key })
    }

    fn forget(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.conn()?;
        let n: u64 = redis::cmd("DEL")
            .arg(self.key(key))
            .query(&mut conn)
            .map_err(backend)?;
        Ok(n > 0)
    }
}
