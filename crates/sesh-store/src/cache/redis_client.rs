//! Redis-backed cache client.
//!
//! Available only when the `redis` cargo feature is enabled.
//!
//! Every registered node gets its own `redis::Client`. Persistent nodes keep a
//! `ConnectionManager` (reconnects on transient failures, cheaply cloneable)
//! opened at registration; other nodes open a multiplexed connection per
//! command. A node's `timeout` bounds connection setup only.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::FromRedisValue;
use std::time::Duration;
use tracing::debug;

use sesh_core::{Error, Result};

use super::{CacheClient, ServerPool};
use crate::config::ResolvedNode;

#[derive(Clone)]
struct NodeConnection {
    client: redis::Client,
    managed: Option<ConnectionManager>,
}

/// [`CacheClient`] over one or more Redis nodes.
#[derive(Clone, Default)]
pub struct RedisCacheClient {
    pool: ServerPool<NodeConnection>,
}

impl RedisCacheClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn server_count(&self) -> usize {
        self.pool.len()
    }

    async fn query<T: FromRedisValue>(&self, key: &str, cmd: redis::Cmd) -> Result<T> {
        let (node, conn) = self
            .pool
            .pick(key)
            .ok_or_else(|| Error::Cache("no cache servers registered".into()))?;

        match &conn.managed {
            Some(managed) => {
                let mut managed = managed.clone();
                cmd.query_async(&mut managed).await.map_err(cache_error)
            }
            None => {
                let mut multiplexed = tokio::time::timeout(
                    node.timeout,
                    conn.client.get_multiplexed_async_connection(),
                )
                .await
                .map_err(|_| connect_timeout(node))?
                .map_err(cache_error)?;
                cmd.query_async(&mut multiplexed).await.map_err(cache_error)
            }
        }
    }
}

fn cache_error(e: redis::RedisError) -> Error {
    Error::Cache(e.to_string())
}

fn connect_timeout(node: &ResolvedNode) -> Error {
    Error::Cache(format!(
        "timed out connecting to {} after {:?}",
        node.address(),
        node.timeout
    ))
}

/// Connection URL for a node.
fn node_url(node: &ResolvedNode) -> String {
    if node.host.contains(':') && !node.host.starts_with('[') {
        format!("redis://[{}]:{}/", node.host, node.port)
    } else {
        format!("redis://{}:{}/", node.host, node.port)
    }
}

#[async_trait]
impl CacheClient for RedisCacheClient {
    async fn add_server(&mut self, node: &ResolvedNode) -> Result<()> {
        let client = redis::Client::open(node_url(node)).map_err(cache_error)?;
        let managed = if node.persistent {
            let manager = tokio::time::timeout(node.timeout, ConnectionManager::new(client.clone()))
                .await
                .map_err(|_| connect_timeout(node))?
                .map_err(cache_error)?;
            Some(manager)
        } else {
            None
        };
        debug!(server = %node.address(), persistent = node.persistent, "registered redis node");
        self.pool.add(node.clone(), NodeConnection { client, managed });
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut cmd = redis::cmd("GET");
        cmd.arg(key);
        self.query(key, cmd).await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            // EX takes whole seconds and rejects 0.
            cmd.arg("EX").arg(ttl.as_secs().max(1));
        }
        self.query(key, cmd).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut cmd = redis::cmd("DEL");
        cmd.arg(key);
        let removed: i64 = self.query(key, cmd).await?;
        Ok(removed > 0)
    }

    async fn close(&mut self) -> Result<()> {
        self.pool.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerNode;

    #[test]
    fn node_url_formats() {
        let v4 = ServerNode::new("10.0.0.5").with_port(6379).resolve().unwrap();
        assert_eq!(node_url(&v4), "redis://10.0.0.5:6379/");

        let v6 = ServerNode::new("::1").with_port(6379).resolve().unwrap();
        assert_eq!(node_url(&v6), "redis://[::1]:6379/");
    }

    #[tokio::test]
    async fn commands_without_servers_fail() {
        let client = RedisCacheClient::new();
        assert!(matches!(client.get("k").await, Err(Error::Cache(_))));
        assert!(matches!(client.delete("k").await, Err(Error::Cache(_))));
    }

    #[tokio::test]
    async fn non_persistent_node_registers_without_connecting() {
        let mut client = RedisCacheClient::new();
        let node = ServerNode::new("127.0.0.1").with_port(1).resolve().unwrap();
        client.add_server(&node).await.unwrap();
        assert_eq!(client.server_count(), 1);

        client.close().await.unwrap();
        assert_eq!(client.server_count(), 0);
    }
}
