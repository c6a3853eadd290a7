//! Opaque-token session store (hot store, logical db 0).
//!
//! Tokens are UUIDv4; the record behind one is the whole principal. The TTL
//! is sliding: every successful read re-arms it, so an idle client expires
//! after exactly the configured window. There is no local caching, so a
//! remote revocation is visible within one round trip.

use std::time::Duration;

use tracing::warn;
use uuid::Uuid;

use tribuna_model::SessionRecord;

use crate::error::Result;
use crate::hot::{HotStore, keys};

pub const SESSION_TTL_SECS: u64 = 300;
pub const SESSION_READ_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Clone, Debug)]
pub struct SessionStore {
    hot: HotStore,
    ttl_secs: u64,
    read_timeout: Duration,
}

impl SessionStore {
    pub fn new(hot: HotStore) -> Self {
        Self {
            hot,
            ttl_secs: SESSION_TTL_SECS,
            read_timeout: SESSION_READ_TIMEOUT,
        }
    }

    pub fn with_ttl(mut self, ttl_secs: u64) -> Self {
        self.ttl_secs = ttl_secs;
        self
    }

    /// Mint a fresh session. A store failure here is fatal to login and
    /// surfaces to the caller.
    pub async fn create(&self, record: &SessionRecord) -> Result<String> {
        let token = Uuid::new_v4().to_string();
        self.hot
            .set_json_ex(&keys::session(&token), record, self.ttl_secs)
            .await?;
        Ok(token)
    }

    /// Resolve a token to its principal, re-arming the TTL on hit.
    ///
    /// Any store failure or timeout yields `None`: the client is treated as
    /// unauthenticated rather than erroring the request.
    pub async fn get(&self, token: &str) -> Option<SessionRecord> {
        if token.is_empty() {
            return None;
        }

        let key = keys::session(token);
        let read = tokio::time::timeout(self.read_timeout, self.hot.get_json::<SessionRecord>(&key));
        let record = match read.await {
            Ok(Ok(record)) => record?,
            Ok(Err(err)) => {
                warn!(error = %err, "session read failed");
                return None;
            }
            Err(_) => {
                warn!("session read timed out");
                return None;
            }
        };

        if let Err(err) = self.hot.expire(&key, self.ttl_secs as i64).await {
            warn!(error = %err, "failed to re-arm session ttl");
        }

        Some(record)
    }

    pub async fn delete(&self, token: &str) -> Result<()> {
        self.hot.delete(&keys::session(token)).await
    }
}
