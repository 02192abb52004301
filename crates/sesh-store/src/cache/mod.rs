//! Cache-backed session handler.
//!
//! Each session is one key, `<prefix><id>`, holding the raw payload. The
//! configured `expiretime` is attached to every write and the cache drops the
//! key on its own, so [`SaveHandler::gc`] has nothing to do.

mod memory;
mod pool;
#[cfg(feature = "redis")]
mod redis_client;

pub use memory::MemoryCacheClient;
pub use pool::ServerPool;
#[cfg(feature = "redis")]
pub use redis_client::RedisCacheClient;

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

use sesh_core::{Error, Result};

use crate::config::{ResolvedNode, ServerPoolConfig};
use crate::handler::{HandlerState, SaveHandler};

/// Minimal key-value cache client surface used by [`CacheSessionHandler`].
#[async_trait]
pub trait CacheClient: Send + Sync {
    /// Register a cache node. Keys are spread over all registered nodes.
    async fn add_server(&mut self, node: &ResolvedNode) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store `value`, expiring after `ttl` when one is given.
    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()>;

    /// Delete `key`. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Drop connections to every registered node.
    async fn close(&mut self) -> Result<()>;
}

/// [`SaveHandler`] over a [`CacheClient`].
pub struct CacheSessionHandler<C> {
    client: C,
    config: ServerPoolConfig,
    state: HandlerState,
}

impl<C: CacheClient> CacheSessionHandler<C> {
    pub fn new(client: C, config: ServerPoolConfig) -> Self {
        Self {
            client,
            config,
            state: HandlerState::Unopened,
        }
    }

    pub fn config(&self) -> &ServerPoolConfig {
        &self.config
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state == HandlerState::Open {
            Ok(())
        } else {
            Err(Error::NotOpen)
        }
    }
}

#[async_trait]
impl<C: CacheClient> SaveHandler for CacheSessionHandler<C> {
    async fn open(&mut self) -> Result<bool> {
        if self.state == HandlerState::Open {
            return Ok(true);
        }
        let nodes = self.config.resolve_nodes()?;
        for node in &nodes {
            if let Err(e) = self.client.add_server(node).await {
                // Leave no half-registered pool behind for the next open.
                if let Err(close_err) = self.client.close().await {
                    warn!("Closing cache client after failed open failed: {close_err}");
                }
                return Err(e);
            }
        }
        debug!(
            servers = nodes.len(),
            prefix = %self.config.prefix,
            "cache session handler opened"
        );
        self.state = HandlerState::Open;
        Ok(true)
    }

    async fn read(&self, id: &str) -> Result<Vec<u8>> {
        self.ensure_open()?;
        let value = self.client.get(&self.config.key(id)).await?;
        Ok(value.unwrap_or_default())
    }

    async fn write(&self, id: &str, data: &[u8]) -> bool {
        if let Err(e) = self.ensure_open() {
            warn!("Cache write for session {id} skipped: {e}");
            return false;
        }
        let key = self.config.key(id);
        match self.client.set(&key, data, self.config.ttl()).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Cache SET failed for session {id}: {e}");
                false
            }
        }
    }

    async fn destroy(&self, id: &str) -> bool {
        if let Err(e) = self.ensure_open() {
            warn!("Cache delete for session {id} skipped: {e}");
            return false;
        }
        match self.client.delete(&self.config.key(id)).await {
            Ok(_) => true,
            Err(e) => {
                warn!("Cache DEL failed for session {id}: {e}");
                false
            }
        }
    }

    async fn close(&mut self) -> bool {
        let closed = match self.client.close().await {
            Ok(()) => true,
            Err(e) => {
                warn!("Closing cache client failed: {e}");
                false
            }
        };
        self.state = HandlerState::Closed;
        closed
    }

    async fn gc(&self, _max_lifetime: Duration) -> bool {
        // Entries carry their own TTL.
        true
    }

    fn state(&self) -> HandlerState {
        self.state
    }
}
