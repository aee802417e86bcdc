use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use redis::aio::{ConnectionLike, ConnectionManager};
use redis::cluster::ClusterClient;
use redis::cluster_async::ClusterConnection;
use redis::cluster_routing::{MultipleNodeRoutingInfo, ResponsePolicy, RoutingInfo, get_slot};
use redis::{FromRedisValue, RedisResult, cmd};

use super::health::{HealthCheck, Readiness};
use super::{HashScan, KeyValueStore};
use crate::error::Result;

/// Connection flavors a [`RedisStore`] can run on
///
/// Both flavors speak the same commands. They differ in how the server is
/// checked and in how multi-key deletes are dispatched.
#[async_trait]
pub trait RedisConnection: ConnectionLike + Clone + Send + Sync + 'static {
    /// Succeeds only if every node behind the connection answers.
    async fn ping(&mut self) -> RedisResult<()>;

    /// `UNLINK` the given keys, returning how many existed.
    async fn unlink(&mut self, keys: &[String]) -> RedisResult<u64>;
}

#[async_trait]
impl RedisConnection for ConnectionManager {
    async fn ping(&mut self) -> RedisResult<()> {
        cmd("PING").query_async::<String>(self).await.map(drop)
    }

    async fn unlink(&mut self, keys: &[String]) -> RedisResult<u64> {
        cmd("UNLINK").arg(keys).query_async(self).await
    }
}

#[async_trait]
impl RedisConnection for ClusterConnection {
    async fn ping(&mut self) -> RedisResult<()> {
        let routing = RoutingInfo::MultiNode((
            MultipleNodeRoutingInfo::AllNodes,
            Some(ResponsePolicy::AllSucceeded),
        ));
        self.route_command(&cmd("PING"), routing).await.map(drop)
    }

    /// Keys in different hash slots cannot share a command, so each slot
    /// gets its own `UNLINK`. Every group is attempted before the first
    /// error is returned.
    async fn unlink(&mut self, keys: &[String]) -> RedisResult<u64> {
        let groups = slot_groups(keys);
        let results = join_all(groups.into_iter().map(|group| {
            let mut conn = self.clone();
            async move { cmd("UNLINK").arg(&group).query_async::<u64>(&mut conn).await }
        }))
        .await;

        results
            .into_iter()
            .try_fold(0, |total, removed| removed.map(|n| total + n))
    }
}

/// Split keys by cluster hash slot, keeping the input order within a slot.
fn slot_groups(keys: &[String]) -> Vec<Vec<String>> {
    let mut order = Vec::new();
    let mut groups: HashMap<u16, Vec<String>> = HashMap::new();
    for key in keys {
        let slot = get_slot(key.as_bytes());
        groups
            .entry(slot)
            .or_insert_with(|| {
                order.push(slot);
                Vec::new()
            })
            .push(key.clone());
    }
    order
        .into_iter()
        .filter_map(|slot| groups.remove(&slot))
        .collect()
}

/// Redis-backed [`KeyValueStore`], single node or cluster
///
/// Readiness is tracked from call outcomes: connection-level failures mark
/// the store unhealthy, and any successful call (including the periodic
/// ping from [`RedisStore::spawn_health_check`]) marks it healthy again.
/// On a cluster the check pings every node, so the store is ready only
/// while all of them answer.
#[derive(Clone)]
pub struct RedisStore<C: RedisConnection = ConnectionManager> {
    connection: C,
    readiness: Readiness,
}

/// [`RedisStore`] over a Redis Cluster
pub type ClusterStore = RedisStore<ClusterConnection>;

impl RedisStore<ConnectionManager> {
    /// Connect to a single Redis server.
    pub async fn new(redis_client: redis::Client) -> RedisResult<Self> {
        let connection = ConnectionManager::new(redis_client).await?;
        Ok(Self::from_connection(connection))
    }
}

impl RedisStore<ClusterConnection> {
    /// Connect to a Redis Cluster.
    pub async fn cluster(cluster_client: ClusterClient) -> RedisResult<Self> {
        let connection = cluster_client.get_async_connection().await?;
        Ok(Self::from_connection(connection))
    }
}

impl<C: RedisConnection> RedisStore<C> {
    /// Wrap an existing connection (shared with other components).
    pub fn from_connection(connection: C) -> Self {
        Self {
            connection,
            readiness: Readiness::new(),
        }
    }

    /// Ping the server and update readiness from the outcome.
    pub async fn health_check(&self) -> bool {
        let mut conn = self.connection.clone();
        let ok = conn.ping().await.is_ok();
        self.readiness.mark(ok);
        ok
    }

    /// Ping the server every `interval` so a store marked unhealthy can
    /// recover without traffic. Pinging stops when the guard is dropped.
    pub fn spawn_health_check(&self, interval: Duration) -> HealthCheck {
        let connection = self.connection.clone();
        HealthCheck::spawn(self.readiness.clone(), interval, move || {
            let mut conn = connection.clone();
            async move { conn.ping().await }
        })
    }

    async fn query<T: FromRedisValue>(&self, command: &redis::Cmd) -> Result<T> {
        let mut conn = self.connection.clone();
        let result = command.query_async::<T>(&mut conn).await;
        self.readiness.observe(result)
    }
}

#[async_trait]
impl<C: RedisConnection> KeyValueStore for RedisStore<C> {
    fn is_ready(&self) -> bool {
        self.readiness.is_ready()
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.query(cmd("GET").arg(key)).await
    }

    async fn set(&self, key: &str, value: &str, expire_at: Option<i64>) -> Result<()> {
        let mut command = cmd("SET");
        command.arg(key).arg(value);
        if let Some(at) = expire_at {
            command.arg("EXAT").arg(at);
        }
        self.query::<()>(&command).await
    }

    async fn expire_at(&self, key: &str, unix_secs: i64) -> Result<bool> {
        self.query(cmd("EXPIREAT").arg(key).arg(unix_secs)).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.query(cmd("EXISTS").arg(key)).await
    }

    async fn unlink(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.connection.clone();
        let result = conn.unlink(keys).await;
        self.readiness.observe(result)
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()> {
        self.query::<()>(cmd("HSET").arg(key).arg(field).arg(value))
            .await
    }

    async fn hexists(&self, key: &str, field: &str) -> Result<bool> {
        self.query(cmd("HEXISTS").arg(key).arg(field)).await
    }

    async fn hmget(&self, key: &str, fields: &[String]) -> Result<Vec<Option<String>>> {
        if fields.is_empty() {
            return Ok(Vec::new());
        }
        self.query(cmd("HMGET").arg(key).arg(fields)).await
    }

    async fn hdel(&self, key: &str, fields: &[String]) -> Result<u64> {
        if fields.is_empty() {
            return Ok(0);
        }
        self.query(cmd("HDEL").arg(key).arg(fields)).await
    }

    async fn hscan(&self, key: &str, cursor: u64, count: usize) -> Result<HashScan> {
        let (cursor, flat): (u64, Vec<String>) = self
            .query(cmd("HSCAN").arg(key).arg(cursor).arg("COUNT").arg(count))
            .await?;

        let mut entries = Vec::with_capacity(flat.len() / 2);
        let mut it = flat.into_iter();
        while let (Some(field), Some(value)) = (it.next(), it.next()) {
            entries.push((field, value));
        }

        Ok(HashScan { cursor, entries })
    }
}
