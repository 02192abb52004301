use std::time::Duration;
use tracing::warn;

use sesh_core::{Result, SessionRecord};

use crate::handler::{HandlerState, SaveHandler};

/// Runs the per-request session lifecycle against a [`SaveHandler`]:
/// open, read and decode on [`start`](Self::start), encode and write on
/// [`commit`](Self::commit), close on [`finish`](Self::finish).
pub struct SessionDriver<H> {
    handler: H,
}

impl<H: SaveHandler> SessionDriver<H> {
    pub fn new(handler: H) -> Self {
        Self { handler }
    }

    /// Load session `id`, opening the handler first if needed.
    ///
    /// A payload that does not decode is logged and treated as an empty
    /// session so the request can go on.
    pub async fn start(&mut self, id: &str) -> Result<SessionRecord> {
        if self.handler.state() != HandlerState::Open {
            self.handler.open().await?;
        }
        let data = self.handler.read(id).await?;
        match SessionRecord::decode(id, &data) {
            Ok(record) => Ok(record),
            Err(e) => {
                warn!("Discarding unreadable session {id}: {e}");
                Ok(SessionRecord::new(id))
            }
        }
    }

    /// Persist `record`. Returns whether the store acknowledged the write.
    pub async fn commit(&self, record: &SessionRecord) -> Result<bool> {
        let data = record.encode()?;
        Ok(self.handler.write(&record.id, &data).await)
    }

    pub async fn destroy(&self, id: &str) -> bool {
        self.handler.destroy(id).await
    }

    pub async fn gc(&self, max_lifetime: Duration) -> bool {
        self.handler.gc(max_lifetime).await
    }

    pub async fn finish(&mut self) -> bool {
        self.handler.close().await
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn into_inner(self) -> H {
        self.handler
    }
}
