//! Server pool configuration for cache-backed session handlers.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use sesh_core::{Error, Result};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 11211;
/// Connect timeout per node, in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 1;
pub const DEFAULT_WEIGHT: u32 = 1;
/// TTL applied to every cache write: 24 hours.
pub const DEFAULT_EXPIRE_SECS: u64 = 86_400;
pub const DEFAULT_PREFIX: &str = "sf2s";

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_weight() -> u32 {
    DEFAULT_WEIGHT
}

fn default_expiretime() -> u64 {
    DEFAULT_EXPIRE_SECS
}

fn default_prefix() -> String {
    DEFAULT_PREFIX.to_string()
}

fn default_serverpool() -> Vec<ServerNode> {
    vec![ServerNode::default()]
}

/// One cache node as written in configuration.
///
/// `host` is optional here so a config file can be parsed before it is
/// validated; [`ServerNode::resolve`] rejects a node without one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerNode {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default)]
    pub persistent: bool,
    #[serde(default = "default_weight")]
    pub weight: u32,
}

impl Default for ServerNode {
    fn default() -> Self {
        Self::new(DEFAULT_HOST)
    }
}

impl ServerNode {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: Some(host.into()),
            port: DEFAULT_PORT,
            timeout: DEFAULT_TIMEOUT_SECS,
            persistent: false,
            weight: DEFAULT_WEIGHT,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = secs;
        self
    }

    pub fn with_persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    /// Validate the node. A host is required.
    pub fn resolve(&self) -> Result<ResolvedNode> {
        let host = self
            .host
            .as_deref()
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .ok_or_else(|| Error::Configuration("server entry is missing a host".into()))?;
        if self.port == 0 {
            return Err(Error::Configuration(format!("server {host} has port 0")));
        }
        if self.weight == 0 {
            return Err(Error::Configuration(format!("server {host} has weight 0")));
        }
        Ok(ResolvedNode {
            host: host.to_string(),
            port: self.port,
            timeout: Duration::from_secs(self.timeout),
            persistent: self.persistent,
            weight: self.weight,
        })
    }
}

/// A validated cache node, ready to register with a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedNode {
    pub host: String,
    pub port: u16,
    pub timeout: Duration,
    pub persistent: bool,
    pub weight: u32,
}

impl ResolvedNode {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Configuration shared by the cache-backed handlers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerPoolConfig {
    #[serde(default = "default_serverpool")]
    pub serverpool: Vec<ServerNode>,
    /// TTL in seconds; 0 disables expiry.
    #[serde(default = "default_expiretime")]
    pub expiretime: u64,
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

impl Default for ServerPoolConfig {
    fn default() -> Self {
        Self {
            serverpool: default_serverpool(),
            expiretime: DEFAULT_EXPIRE_SECS,
            prefix: default_prefix(),
        }
    }
}

impl ServerPoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_servers(mut self, servers: Vec<ServerNode>) -> Self {
        self.serverpool = servers;
        self
    }

    pub fn with_expiretime(mut self, secs: u64) -> Self {
        self.expiretime = secs;
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// TTL for writes, `None` when expiry is disabled.
    pub fn ttl(&self) -> Option<Duration> {
        (self.expiretime > 0).then(|| Duration::from_secs(self.expiretime))
    }

    /// Physical key for a session id.
    pub fn key(&self, id: &str) -> String {
        format!("{}{}", self.prefix, id)
    }

    /// Validate every node. Fails on the first bad entry, so nothing is
    /// registered from a partially valid pool.
    pub fn resolve_nodes(&self) -> Result<Vec<ResolvedNode>> {
        if self.serverpool.is_empty() {
            return Err(Error::Configuration("server pool is empty".into()));
        }
        self.serverpool.iter().map(ServerNode::resolve).collect()
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| Error::Configuration(format!("invalid server pool config: {e}")))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_single_local_node() {
        let config = ServerPoolConfig::default();
        assert_eq!(config.expiretime, 86_400);
        assert_eq!(config.prefix, "sf2s");
        let nodes = config.resolve_nodes().unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].address(), "127.0.0.1:11211");
        assert_eq!(nodes[0].timeout, Duration::from_secs(1));
        assert!(!nodes[0].persistent);
        assert_eq!(nodes[0].weight, 1);
    }

    #[test]
    fn node_without_host_is_rejected() {
        let node = ServerNode {
            host: None,
            ..ServerNode::default()
        };
        assert!(matches!(node.resolve(), Err(Error::Configuration(_))));

        let blank = ServerNode::new("   ");
        assert!(matches!(blank.resolve(), Err(Error::Configuration(_))));
    }

    #[test]
    fn toml_fills_in_node_defaults() {
        let config = ServerPoolConfig::from_toml_str(
            r#"
            expiretime = 60
            prefix = "app1:"

            [[serverpool]]
            host = "cache-a"

            [[serverpool]]
            host = "cache-b"
            port = 11212
            persistent = true
            weight = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.ttl(), Some(Duration::from_secs(60)));
        assert_eq!(config.key("abc"), "app1:abc");
        let nodes = config.resolve_nodes().unwrap();
        assert_eq!(nodes[0].port, 11211);
        assert_eq!(nodes[1].address(), "cache-b:11212");
        assert!(nodes[1].persistent);
        assert_eq!(nodes[1].weight, 3);
    }

    #[test]
    fn empty_toml_uses_defaults() {
        let config = ServerPoolConfig::from_toml_str("").unwrap();
        assert_eq!(config, ServerPoolConfig::default());
    }

    #[test]
    fn zero_expiretime_disables_ttl() {
        assert_eq!(ServerPoolConfig::new().with_expiretime(0).ttl(), None);
    }

    #[test]
    fn empty_pool_is_a_configuration_error() {
        let config = ServerPoolConfig::new().with_servers(Vec::new());
        assert!(matches!(config.resolve_nodes(), Err(Error::Configuration(_))));
    }
}
