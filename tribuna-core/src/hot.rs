//! Redis-backed hot store.
//!
//! Everything latency-critical lives here: sessions, presence, live poll
//! state, validator counters, recent-chat rings, snapshot caches, and the
//! cross-instance broadcast channels. Multi-step mutations are server-side
//! scripts; client-side check-then-act is not used anywhere.

use std::collections::BTreeMap;

use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::error::Result;

/// Key layout of the hot store. Kinds for validator keys are `chat` and `qa`.
pub mod keys {
    use tribuna_model::{EventId, PollId, UserId};

    pub fn session(token: &str) -> String {
        format!("session:{token}")
    }

    pub fn activity(event_id: EventId) -> String {
        format!("activity:{event_id}")
    }

    pub fn ping_writeback(event_id: EventId, user_id: UserId) -> String {
        format!("ping:mysql_ts:{event_id}:{user_id}")
    }

    pub fn chat_ring(event_id: EventId) -> String {
        format!("chat:event:{event_id}")
    }

    pub fn watch_bundle(event_id: EventId) -> String {
        format!("watch:event:{event_id}")
    }

    pub fn reports_snapshot(event_id: EventId) -> String {
        format!("reports:snapshot:{event_id}")
    }

    pub fn poll_live(event_id: EventId) -> String {
        format!("poll:live:{event_id}")
    }

    pub fn poll_counts(poll_id: PollId) -> String {
        format!("poll:votes:{poll_id}:counts")
    }

    pub fn poll_voted(poll_id: PollId) -> String {
        format!("poll:voted:{poll_id}")
    }

    pub fn broadcast_channel(event_id: EventId) -> String {
        format!("broadcast:event:{event_id}")
    }

    pub fn throttle(kind: &str, event_id: EventId, user_id: UserId) -> String {
        format!("throttle:{kind}:{event_id}:{user_id}")
    }

    pub fn duplicate(kind: &str, event_id: EventId, fingerprint: &str) -> String {
        format!("duplicate:{kind}:{event_id}:{fingerprint}")
    }
}

/// Server-side scripts for atomic multi-step operations.
mod scripts {
    use redis::Script;

    /// Add the voter to the poll's voter set and increment the chosen option,
    /// or do nothing if the voter was already present.
    pub fn cast_vote() -> Script {
        Script::new(
            r#"
            if redis.call('SADD', KEYS[1], ARGV[1]) == 1 then
                redis.call('HINCRBY', KEYS[2], ARGV[2], 1)
                return 1
            end
            return 0
            "#,
        )
    }

    /// Increment a counter and re-arm its expiry window in one round trip.
    pub fn bump_counter() -> Script {
        Script::new(
            r#"
            local count = redis.call('INCR', KEYS[1])
            redis.call('EXPIRE', KEYS[1], ARGV[1])
            return count
            "#,
        )
    }
}

#[derive(Clone)]
pub struct HotStore {
    conn: ConnectionManager,
}

impl std::fmt::Debug for HotStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HotStore").finish_non_exhaustive()
    }
}

impl HotStore {
    /// Connect to one logical database of the hot store.
    pub async fn connect(redis_url: &str) -> Result<Self> {
        info!("Connecting to hot store at {}", redis_url);

        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;

        Ok(Self { conn })
    }

    fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let mut conn = self.conn();
        let raw: Option<String> = conn.get(key).await?;
        match raw {
            Some(json) => {
                debug!("hot GET hit: {}", key);
                Ok(Some(serde_json::from_str(&json)?))
            }
            None => Ok(None),
        }
    }

    pub async fn set_json_ex<T: Serialize>(&self, key: &str, value: &T, ttl_secs: u64) -> Result<()> {
        let json = serde_json::to_string(value)?;
        let mut conn = self.conn();
        conn.set_ex::<_, _, ()>(key, json, ttl_secs).await?;
        Ok(())
    }

    /// SET NX; returns whether the key was installed.
    pub async fn set_json_nx<T: Serialize>(&self, key: &str, value: &T) -> Result<bool> {
        let json = serde_json::to_string(value)?;
        let mut conn = self.conn();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(json)
            .arg("NX")
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    /// Atomically read and delete, for single-winner teardown paths.
    pub async fn getdel_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let mut conn = self.conn();
        let raw: Option<String> = redis::cmd("GETDEL").arg(key).query_async(&mut conn).await?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub async fn get_string(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn();
        Ok(conn.get(key).await?)
    }

    pub async fn set_ex_string(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        let mut conn = self.conn();
        conn.set_ex::<_, _, ()>(key, value, ttl_secs).await?;
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    pub async fn expire(&self, key: &str, ttl_secs: i64) -> Result<()> {
        let mut conn = self.conn();
        conn.expire::<_, ()>(key, ttl_secs).await?;
        Ok(())
    }

    /// SET NX EX in one command; returns false when the key already exists.
    pub async fn set_nx_ex(&self, key: &str, ttl_secs: u64) -> Result<bool> {
        let mut conn = self.conn();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs)
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    /// INCR + EXPIRE as a single script; returns the post-increment count.
    pub async fn bump_counter(&self, key: &str, window_secs: u64) -> Result<i64> {
        let mut conn = self.conn();
        let count: i64 = scripts::bump_counter()
            .key(key)
            .arg(window_secs)
            .invoke_async(&mut conn)
            .await?;
        Ok(count)
    }

    /// Atomic single-vote: returns true when this user's vote was counted,
    /// false when the user had already voted.
    pub async fn cast_vote(
        &self,
        voted_key: &str,
        counts_key: &str,
        user: &str,
        option_index: usize,
    ) -> Result<bool> {
        let mut conn = self.conn();
        let added: i64 = scripts::cast_vote()
            .key(voted_key)
            .key(counts_key)
            .arg(user)
            .arg(option_index.to_string())
            .invoke_async(&mut conn)
            .await?;
        Ok(added == 1)
    }

    pub async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()> {
        let mut conn = self.conn();
        conn.zadd::<_, _, _, ()>(key, member, score).await?;
        Ok(())
    }

    pub async fn zrem(&self, key: &str, member: &str) -> Result<()> {
        let mut conn = self.conn();
        conn.zrem::<_, _, ()>(key, member).await?;
        Ok(())
    }

    /// Drop members with a score strictly below `cutoff`.
    pub async fn ztrim_below(&self, key: &str, cutoff: f64) -> Result<()> {
        let mut conn = self.conn();
        conn.zrembyscore::<_, _, _, ()>(key, "-inf", cutoff).await?;
        Ok(())
    }

    /// Members with score >= `min_score`.
    pub async fn zrange_from(&self, key: &str, min_score: f64) -> Result<Vec<String>> {
        let mut conn = self.conn();
        Ok(conn.zrangebyscore(key, min_score, "+inf").await?)
    }

    /// Initialize a counts hash with `len` zeroed option slots.
    pub async fn init_counts(&self, key: &str, len: usize) -> Result<()> {
        if len == 0 {
            return Ok(());
        }
        let fields: Vec<(String, u64)> = (0..len).map(|i| (i.to_string(), 0)).collect();
        let mut conn = self.conn();
        conn.hset_multiple::<_, _, _, ()>(key, &fields).await?;
        Ok(())
    }

    pub async fn counts(&self, key: &str) -> Result<BTreeMap<usize, u64>> {
        let mut conn = self.conn();
        let raw: std::collections::HashMap<String, String> = conn.hgetall(key).await?;
        let mut counts = BTreeMap::new();
        for (field, value) in raw {
            if let (Ok(index), Ok(votes)) = (field.parse::<usize>(), value.parse::<u64>()) {
                counts.insert(index, votes);
            }
        }
        Ok(counts)
    }

    /// Push onto a bounded recent-items ring, newest first.
    pub async fn push_ring(&self, key: &str, value: &str, max_len: usize) -> Result<()> {
        let mut conn = self.conn();
        conn.lpush::<_, _, ()>(key, value).await?;
        conn.ltrim::<_, ()>(key, 0, max_len as isize - 1).await?;
        Ok(())
    }

    pub async fn ring(&self, key: &str, limit: usize) -> Result<Vec<String>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn();
        Ok(conn.lrange(key, 0, limit as isize - 1).await?)
    }

    pub async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        let mut conn = self.conn();
        conn.publish::<_, _, ()>(channel, payload).await?;
        Ok(())
    }
}
