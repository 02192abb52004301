//! Session handler configured through a host-managed module.
//!
//! Instead of wiring a cache client directly, the caller names a module in a
//! [`ModuleRegistry`] (the "host"), gives it a save path of `host:port`
//! servers and a flat map of options. Options the module understands are
//! parsed into [`ModuleSettings`]; everything else is kept verbatim in
//! [`ModuleSettings::generic`]. Locking and compression settings are carried
//! through for the module to interpret and are not acted on here.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use sesh_core::{Error, Result};

use crate::cache::{CacheClient, CacheSessionHandler, MemoryCacheClient};
use crate::config::{ServerNode, ServerPoolConfig, DEFAULT_EXPIRE_SECS, DEFAULT_PORT};
use crate::handler::{HandlerState, SaveHandler};

pub const MEMCACHED_MODULE: &str = "memcached";
pub const DEFAULT_SAVE_PATH: &str = "127.0.0.1:11211";
/// Key prefix the memcached module uses when none is configured.
pub const DEFAULT_MODULE_PREFIX: &str = "memc.sess.key.";

pub const OPT_LOCKING: &str = "memcached.sess_locking";
pub const OPT_LOCK_WAIT: &str = "memcached.sess_lock_wait";
pub const OPT_PREFIX: &str = "memcached.sess_prefix";
pub const OPT_COMPRESSION_TYPE: &str = "memcached.compression_type";
pub const OPT_COMPRESSION_FACTOR: &str = "memcached.compression_factor";
pub const OPT_COMPRESSION_THRESHOLD: &str = "memcached.compression_threshold";
pub const OPT_SERIALIZER: &str = "memcached.serializer";
/// Generic option read for the entry TTL, in seconds.
pub const OPT_GC_MAXLIFETIME: &str = "gc_maxlifetime";

/// Settings handed to a module when it is instantiated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModuleSettings {
    pub servers: Vec<ServerNode>,
    pub locking: Option<bool>,
    /// Parsed from microseconds.
    pub lock_wait: Option<Duration>,
    pub prefix: Option<String>,
    pub compression_type: Option<String>,
    pub compression_factor: Option<f64>,
    /// Bytes.
    pub compression_threshold: Option<u64>,
    pub serializer: Option<String>,
    /// Options the module does not recognize, unchanged.
    pub generic: BTreeMap<String, String>,
}

impl ModuleSettings {
    pub fn from_options(servers: Vec<ServerNode>, options: &BTreeMap<String, String>) -> Result<Self> {
        let mut settings = Self {
            servers,
            ..Self::default()
        };
        for (key, value) in options {
            match key.as_str() {
                OPT_LOCKING => settings.locking = Some(parse_bool(key, value)?),
                OPT_LOCK_WAIT => {
                    settings.lock_wait = Some(Duration::from_micros(parse_number(key, value)?))
                }
                OPT_PREFIX => settings.prefix = Some(value.clone()),
                OPT_COMPRESSION_TYPE => settings.compression_type = Some(value.clone()),
                OPT_COMPRESSION_FACTOR => {
                    let factor: f64 = parse_number(key, value)?;
                    if !factor.is_finite() || factor < 0.0 {
                        return Err(Error::Configuration(format!("{key} must be a non-negative number")));
                    }
                    settings.compression_factor = Some(factor);
                }
                OPT_COMPRESSION_THRESHOLD => {
                    settings.compression_threshold = Some(parse_number(key, value)?)
                }
                OPT_SERIALIZER => settings.serializer = Some(value.clone()),
                _ => {
                    settings.generic.insert(key.clone(), value.clone());
                }
            }
        }
        Ok(settings)
    }

    /// Entry TTL: `gc_maxlifetime` from the generic options, or one day.
    pub fn expiretime(&self) -> Result<u64> {
        match self.generic.get(OPT_GC_MAXLIFETIME) {
            Some(value) => parse_number(OPT_GC_MAXLIFETIME, value),
            None => Ok(DEFAULT_EXPIRE_SECS),
        }
    }

    /// Cache handler configuration derived from these settings.
    pub fn pool_config(&self) -> Result<ServerPoolConfig> {
        Ok(ServerPoolConfig::new()
            .with_servers(self.servers.clone())
            .with_expiretime(self.expiretime()?)
            .with_prefix(self.prefix.as_deref().unwrap_or(DEFAULT_MODULE_PREFIX)))
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Ok(true),
        "0" | "false" | "off" | "no" | "" => Ok(false),
        _ => Err(Error::Configuration(format!("{key} expects a boolean, got {value:?}"))),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Configuration(format!("{key} expects a number, got {value:?}")))
}

/// Parse `host[:port][,host[:port]...]` into server nodes.
pub fn parse_save_path(save_path: &str) -> Result<Vec<ServerNode>> {
    let mut nodes = Vec::new();
    for part in save_path.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (host, port) = match part.rsplit_once(':') {
            Some((host, port)) if !host.ends_with(':') => {
                let port = port.parse::<u16>().map_err(|_| {
                    Error::Configuration(format!("invalid port in save path entry {part:?}"))
                })?;
                (host, port)
            }
            _ => (part, DEFAULT_PORT),
        };
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(Error::Configuration(format!("save path entry {part:?} has no host")));
        }
        nodes.push(ServerNode::new(host).with_port(port));
    }
    if nodes.is_empty() {
        return Err(Error::Configuration("save path lists no servers".into()));
    }
    Ok(nodes)
}

/// Builds a save handler for a module from its settings.
pub type ModuleFactory = Arc<dyn Fn(&ModuleSettings) -> Result<Box<dyn SaveHandler>> + Send + Sync>;

/// Named session modules available on the host.
#[derive(Default, Clone)]
pub struct ModuleRegistry {
    modules: HashMap<String, ModuleFactory>,
}

impl ModuleRegistry {
    /// A registry with no modules.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with `memcached` backed by an in-process cache.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register_memcached(MemoryCacheClient::new());
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, factory: ModuleFactory) {
        self.modules.insert(name.into(), factory);
    }

    /// Register `memcached` over `client`. Each instantiation gets a clone.
    pub fn register_memcached<C>(&mut self, client: C)
    where
        C: CacheClient + Clone + 'static,
    {
        let factory: ModuleFactory = Arc::new(move |settings: &ModuleSettings| {
            let handler = CacheSessionHandler::new(client.clone(), settings.pool_config()?);
            Ok(Box::new(handler) as Box<dyn SaveHandler>)
        });
        self.register(MEMCACHED_MODULE, factory);
    }

    pub fn has_module(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    pub fn instantiate(&self, name: &str, settings: &ModuleSettings) -> Result<Box<dyn SaveHandler>> {
        let factory = self.modules.get(name).ok_or_else(|| {
            Error::UnsupportedEnvironment(format!("session module {name:?} is not registered"))
        })?;
        factory(settings)
    }
}

/// [`SaveHandler`] that delegates to the host's `memcached` module.
pub struct ModuleSessionHandler {
    registry: Arc<ModuleRegistry>,
    settings: ModuleSettings,
    inner: Option<Box<dyn SaveHandler>>,
    state: HandlerState,
}

impl ModuleSessionHandler {
    /// Fails with [`Error::UnsupportedEnvironment`] when the registry has no
    /// `memcached` module, and with [`Error::Configuration`] on a bad save
    /// path or option value.
    pub fn new(
        registry: Arc<ModuleRegistry>,
        save_path: Option<&str>,
        options: &BTreeMap<String, String>,
    ) -> Result<Self> {
        if !registry.has_module(MEMCACHED_MODULE) {
            return Err(Error::UnsupportedEnvironment(format!(
                "no {MEMCACHED_MODULE:?} session module registered"
            )));
        }
        let servers = parse_save_path(save_path.unwrap_or(DEFAULT_SAVE_PATH))?;
        let settings = ModuleSettings::from_options(servers, options)?;
        settings.expiretime()?;
        Ok(Self {
            registry,
            settings,
            inner: None,
            state: HandlerState::Unopened,
        })
    }

    pub fn settings(&self) -> &ModuleSettings {
        &self.settings
    }

    fn inner(&self) -> Result<&dyn SaveHandler> {
        match (&self.inner, self.state) {
            (Some(inner), HandlerState::Open) => Ok(&**inner),
            _ => Err(Error::NotOpen),
        }
    }
}

#[async_trait]
impl SaveHandler for ModuleSessionHandler {
    async fn open(&mut self) -> Result<bool> {
        if self.state == HandlerState::Open {
            return Ok(true);
        }
        let mut inner = self.registry.instantiate(MEMCACHED_MODULE, &self.settings)?;
        inner.open().await?;
        debug!(
            servers = self.settings.servers.len(),
            locking = ?self.settings.locking,
            passthrough = self.settings.generic.len(),
            "memcached session module opened"
        );
        self.inner = Some(inner);
        self.state = HandlerState::Open;
        Ok(true)
    }

    async fn read(&self, id: &str) -> Result<Vec<u8>> {
        self.inner()?.read(id).await
    }

    async fn write(&self, id: &str, data: &[u8]) -> bool {
        match self.inner() {
            Ok(inner) => inner.write(id, data).await,
            Err(e) => {
                warn!("Module write for session {id} skipped: {e}");
                false
            }
        }
    }

    async fn destroy(&self, id: &str) -> bool {
        match self.inner() {
            Ok(inner) => inner.destroy(id).await,
            Err(e) => {
                warn!("Module delete for session {id} skipped: {e}");
                false
            }
        }
    }

    async fn close(&mut self) -> bool {
        let closed = match self.inner.take() {
            Some(mut inner) => inner.close().await,
            None => true,
        };
        self.state = HandlerState::Closed;
        closed
    }

    async fn gc(&self, max_lifetime: Duration) -> bool {
        match &self.inner {
            Some(inner) => inner.gc(max_lifetime).await,
            None => true,
        }
    }

    fn state(&self) -> HandlerState {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn parses_save_path() {
        let nodes = parse_save_path("cache1:11211, cache2:11300,cache3").unwrap();
        let addrs: Vec<String> = nodes
            .iter()
            .map(|n| n.resolve().unwrap().address())
            .collect();
        assert_eq!(addrs, vec!["cache1:11211", "cache2:11300", "cache3:11211"]);

        let v6 = parse_save_path("[::1]:11222").unwrap();
        assert_eq!(v6[0].host.as_deref(), Some("::1"));
        assert_eq!(v6[0].port, 11222);
    }

    #[test]
    fn rejects_bad_save_path() {
        for path in ["", " , ", ":11211", "host:notaport"] {
            assert!(
                matches!(parse_save_path(path), Err(Error::Configuration(_))),
                "{path:?}"
            );
        }
    }

    #[test]
    fn translates_known_options_and_passes_through_the_rest() {
        let settings = ModuleSettings::from_options(
            vec![ServerNode::default()],
            &options(&[
                (OPT_LOCKING, "1"),
                (OPT_LOCK_WAIT, "150000"),
                (OPT_PREFIX, "app."),
                (OPT_COMPRESSION_TYPE, "fastlz"),
                (OPT_COMPRESSION_FACTOR, "1.3"),
                (OPT_COMPRESSION_THRESHOLD, "2000"),
                (OPT_SERIALIZER, "json"),
                ("cookie_lifetime", "0"),
                ("memcached.unknown", "x"),
            ]),
        )
        .unwrap();

        assert_eq!(settings.locking, Some(true));
        assert_eq!(settings.lock_wait, Some(Duration::from_millis(150)));
        assert_eq!(settings.prefix.as_deref(), Some("app."));
        assert_eq!(settings.compression_type.as_deref(), Some("fastlz"));
        assert_eq!(settings.compression_factor, Some(1.3));
        assert_eq!(settings.compression_threshold, Some(2000));
        assert_eq!(settings.serializer.as_deref(), Some("json"));
        assert_eq!(
            settings.generic,
            options(&[("cookie_lifetime", "0"), ("memcached.unknown", "x")])
        );
    }

    #[test]
    fn malformed_typed_option_is_rejected() {
        let err = ModuleSettings::from_options(Vec::new(), &options(&[(OPT_LOCKING, "maybe")]));
        assert!(matches!(err, Err(Error::Configuration(_))));
        let err = ModuleSettings::from_options(Vec::new(), &options(&[(OPT_LOCK_WAIT, "-1")]));
        assert!(matches!(err, Err(Error::Configuration(_))));
    }

    #[test]
    fn pool_config_defaults() {
        let settings = ModuleSettings::from_options(vec![ServerNode::default()], &BTreeMap::new()).unwrap();
        let config = settings.pool_config().unwrap();
        assert_eq!(config.prefix, DEFAULT_MODULE_PREFIX);
        assert_eq!(config.expiretime, DEFAULT_EXPIRE_SECS);

        let settings = ModuleSettings::from_options(
            vec![ServerNode::default()],
            &options(&[(OPT_GC_MAXLIFETIME, "1440")]),
        )
        .unwrap();
        assert_eq!(settings.pool_config().unwrap().expiretime, 1440);
    }

    #[test]
    fn missing_module_is_unsupported() {
        let registry = Arc::new(ModuleRegistry::new());
        let result = ModuleSessionHandler::new(registry, None, &BTreeMap::new());
        assert!(matches!(result, Err(Error::UnsupportedEnvironment(_))));
    }

    #[tokio::test]
    async fn delegates_to_registered_module() {
        let cache = MemoryCacheClient::new();
        let mut registry = ModuleRegistry::new();
        registry.register_memcached(cache.clone());

        let mut handler = ModuleSessionHandler::new(
            Arc::new(registry),
            Some("127.0.0.1:11211"),
            &options(&[(OPT_PREFIX, "m.")]),
        )
        .unwrap();
        assert!(matches!(handler.read("abc").await, Err(Error::NotOpen)));

        assert!(handler.open().await.unwrap());
        assert!(handler.write("abc", b"data").await);
        assert_eq!(cache.get("m.abc").await.unwrap(), Some(b"data".to_vec()));
        assert_eq!(handler.read("abc").await.unwrap(), b"data");
        assert!(handler.gc(Duration::from_secs(1)).await);
        assert!(handler.destroy("abc").await);
        assert!(handler.read("abc").await.unwrap().is_empty());

        assert!(handler.close().await);
        assert_eq!(handler.state(), HandlerState::Closed);
        assert!(!handler.write("abc", b"data").await);
    }

    #[tokio::test]
    async fn maximum_lifetime_writes_without_expiry() {
        let mut handler = ModuleSessionHandler::new(
            Arc::new(ModuleRegistry::with_defaults()),
            None,
            &options(&[(OPT_GC_MAXLIFETIME, &u64::MAX.to_string())]),
        )
        .unwrap();
        assert_eq!(handler.settings().expiretime().unwrap(), u64::MAX);

        handler.open().await.unwrap();
        assert!(handler.write("abc", b"data").await);
        assert_eq!(handler.read("abc").await.unwrap(), b"data");
    }
}
