//! The save handler contract every session backend implements.

use async_trait::async_trait;
use std::time::Duration;

use sesh_core::Result;

/// Lifecycle of a handler: `Unopened -> Open -> Closed`.
///
/// Destroying a session does not change the handler state; a new session can
/// be written in the same open period. A closed handler may be opened again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerState {
    Unopened,
    Open,
    Closed,
}

impl std::fmt::Display for HandlerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unopened => "unopened",
            Self::Open => "open",
            Self::Closed => "closed",
        };
        write!(f, "{s}")
    }
}

/// Storage backend for raw session payloads, keyed by session id.
///
/// Configuration problems are errors. Store failures on write, destroy,
/// close and gc are reported as `false` so the caller can carry on with an
/// empty session. Nothing is retried.
#[async_trait]
pub trait SaveHandler: Send + Sync {
    /// Prepare the backend. Calling it on an open handler is a no-op.
    async fn open(&mut self) -> Result<bool>;

    /// Stored payload for `id`, or empty bytes if there is none.
    async fn read(&self, id: &str) -> Result<Vec<u8>>;

    /// Store `data` under `id`, replacing any previous payload.
    async fn write(&self, id: &str, data: &[u8]) -> bool;

    /// Delete the payload for `id`. A missing payload counts as deleted.
    async fn destroy(&self, id: &str) -> bool;

    async fn close(&mut self) -> bool;

    /// Remove payloads older than `max_lifetime`. Backends whose store
    /// expires entries on its own return `true` without doing anything.
    async fn gc(&self, max_lifetime: Duration) -> bool;

    fn state(&self) -> HandlerState;
}

#[async_trait]
impl<H: SaveHandler + ?Sized> SaveHandler for Box<H> {
    async fn open(&mut self) -> Result<bool> {
        (**self).open().await
    }

    async fn read(&self, id: &str) -> Result<Vec<u8>> {
        (**self).read(id).await
    }

    async fn write(&self, id: &str, data: &[u8]) -> bool {
        (**self).write(id, data).await
    }

    async fn destroy(&self, id: &str) -> bool {
        (**self).destroy(id).await
    }

    async fn close(&mut self) -> bool {
        (**self).close().await
    }

    async fn gc(&self, max_lifetime: Duration) -> bool {
        (**self).gc(max_lifetime).await
    }

    fn state(&self) -> HandlerState {
        (**self).state()
    }
}
