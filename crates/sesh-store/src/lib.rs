//! Session save handlers.
//!
//! Every backend implements [`SaveHandler`], the open/read/write/destroy/
//! close/gc contract a session manager drives once per request:
//!
//! * [`FileSessionHandler`]: one file per session, atomic writes, mtime GC.
//! * [`CacheSessionHandler`]: one key per session in a [`CacheClient`], TTL
//!   enforced by the cache.
//! * [`ModuleSessionHandler`]: a cache handler built from a named module in a
//!   [`ModuleRegistry`] plus passthrough options.
//!
//! [`MockFileSessionStorage`] is a bag-aware test double that bypasses the
//! handler contract entirely. [`SessionDriver`] runs the lifecycle against any
//! handler and converts payloads to [`sesh_core::SessionRecord`]s.

pub mod cache;
pub mod config;
pub mod driver;
pub mod file;
pub mod handler;
pub mod mock_file;
pub mod module;

pub use cache::{CacheClient, CacheSessionHandler, MemoryCacheClient, ServerPool};
#[cfg(feature = "redis")]
pub use cache::RedisCacheClient;
pub use config::{ResolvedNode, ServerNode, ServerPoolConfig};
pub use driver::SessionDriver;
pub use file::FileSessionHandler;
pub use handler::{HandlerState, SaveHandler};
pub use mock_file::MockFileSessionStorage;
pub use module::{ModuleFactory, ModuleRegistry, ModuleSessionHandler, ModuleSettings};
