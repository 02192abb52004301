//! File-backed session handler.
//!
//! One file per session at `<dir>/<prefix><id>.sess`. Writes go to a hidden
//! temp file in the same directory and are renamed over the target, so a
//! reader never sees a half-written payload. Files are never expired on their
//! own; [`SaveHandler::gc`] removes those whose mtime is too old.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};
use uuid::Uuid;

use sesh_core::{validate_session_id, Error, Result};

use crate::handler::{HandlerState, SaveHandler};

pub const SESSION_FILE_EXT: &str = "sess";

pub struct FileSessionHandler {
    dir: PathBuf,
    prefix: String,
    state: HandlerState,
}

impl FileSessionHandler {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            prefix: String::new(),
            state: HandlerState::Unopened,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file holding session `id`.
    pub fn path_for(&self, id: &str) -> Result<PathBuf> {
        validate_session_id(id)?;
        Ok(self
            .dir
            .join(format!("{}{}.{SESSION_FILE_EXT}", self.prefix, id)))
    }

    fn is_session_file(&self, name: &str) -> bool {
        !name.starts_with('.')
            && name.starts_with(&self.prefix)
            && name.ends_with(&format!(".{SESSION_FILE_EXT}"))
    }

    async fn write_atomic(&self, path: &Path, data: &[u8]) -> std::io::Result<()> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("session");
        let tmp = self
            .dir
            .join(format!(".{file_name}.{}.tmp", Uuid::new_v4().simple()));
        if let Err(e) = tokio::fs::write(&tmp, data).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e);
        }
        if let Err(e) = tokio::fs::rename(&tmp, path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e);
        }
        Ok(())
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
impl SaveHandler for FileSessionHandler {
    async fn open(&mut self) -> Result<bool> {
        if self.state == HandlerState::Open {
            return Ok(true);
        }
        tokio::fs::create_dir_all(&self.dir).await?;
        debug!(dir = %self.dir.display(), "file session handler opened");
        self.state = HandlerState::Open;
        Ok(true)
    }

    async fn read(&self, id: &str) -> Result<Vec<u8>> {
        self.ensure_open()?;
        let path = self.path_for(id)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, id: &str, data: &[u8]) -> bool {
        let path = match self.ensure_open().and_then(|()| self.path_for(id)) {
            Ok(p) => p,
            Err(e) => {
                warn!("File write for session {id:?} skipped: {e}");
                return false;
            }
        };
        match self.write_atomic(&path, data).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to write session file {}: {e}", path.display());
                false
            }
        }
    }

    async fn destroy(&self, id: &str) -> bool {
        let path = match self.ensure_open().and_then(|()| self.path_for(id)) {
            Ok(p) => p,
            Err(e) => {
                warn!("File delete for session {id:?} skipped: {e}");
                return false;
            }
        };
        match tokio::fs::remove_file(&path).await {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
            Err(e) => {
                warn!("Failed to delete session file {}: {e}", path.display());
                false
            }
        }
    }

    async fn close(&mut self) -> bool {
        self.state = HandlerState::Closed;
        true
    }

    async fn gc(&self, max_lifetime: Duration) -> bool {
        let mut read_dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return true,
            Err(e) => {
                warn!("Session gc could not scan {}: {e}", self.dir.display());
                return false;
            }
        };

        let now = SystemTime::now();
        let mut ok = true;
        let mut removed = 0usize;
        loop {
            let entry = match read_dir.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!("Session gc scan of {} failed: {e}", self.dir.display());
                    ok = false;
                    break;
                }
            };
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if !self.is_session_file(&name) {
                continue;
            }
            let modified = match entry.metadata().await.and_then(|m| m.modified()) {
                Ok(t) => t,
                Err(_) => continue,
            };
            let age = now.duration_since(modified).unwrap_or_default();
            if age <= max_lifetime {
                continue;
            }
            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!("Session gc could not remove {name}: {e}");
                    ok = false;
                }
            }
        }
        debug!(removed, dir = %self.dir.display(), "session gc finished");
        ok
    }

    fn state(&self) -> HandlerState {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn age_file(path: &Path, by: Duration) {
        let file = std::fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - by).unwrap();
    }

    #[tokio::test]
    async fn roundtrip_and_destroy() {
        let dir = tempfile::tempdir().unwrap();
        let mut h = FileSessionHandler::new(dir.path().join("sessions"));
        assert!(h.open().await.unwrap());

        assert!(h.read("abc").await.unwrap().is_empty());
        assert!(h.write("abc", b"payload").await);
        assert_eq!(h.read("abc").await.unwrap(), b"payload");

        assert!(h.destroy("abc").await);
        assert!(h.read("abc").await.unwrap().is_empty());
        assert!(h.destroy("abc").await);
    }

    #[tokio::test]
    async fn write_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut h = FileSessionHandler::new(dir.path());
        h.open().await.unwrap();
        assert!(h.write("abc", b"one").await);
        assert!(h.write("abc", b"two").await);

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["abc.sess"]);
        assert_eq!(h.read("abc").await.unwrap(), b"two");
    }

    #[tokio::test]
    async fn prefix_is_part_of_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let mut h = FileSessionHandler::new(dir.path()).with_prefix("app1_");
        h.open().await.unwrap();
        assert!(h.write("abc", b"x").await);
        assert!(dir.path().join("app1_abc.sess").is_file());
    }

    #[tokio::test]
    async fn rejects_path_traversal_ids() {
        let dir = tempfile::tempdir().unwrap();
        let mut h = FileSessionHandler::new(dir.path());
        h.open().await.unwrap();

        assert!(matches!(h.read("../escape").await, Err(Error::InvalidSessionId(_))));
        assert!(!h.write("../escape", b"x").await);
        assert!(!h.destroy("a/b").await);
    }

    #[tokio::test]
    async fn gc_removes_only_stale_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let mut h = FileSessionHandler::new(dir.path()).with_prefix("s_");
        h.open().await.unwrap();
        assert!(h.write("old", b"1").await);
        assert!(h.write("new", b"2").await);
        std::fs::write(dir.path().join("unrelated.txt"), b"keep").unwrap();

        age_file(&h.path_for("old").unwrap(), Duration::from_secs(3600));
        age_file(&dir.path().join("unrelated.txt"), Duration::from_secs(3600));

        assert!(h.gc(Duration::from_secs(600)).await);
        assert!(h.read("old").await.unwrap().is_empty());
        assert_eq!(h.read("new").await.unwrap(), b"2");
        assert!(dir.path().join("unrelated.txt").exists());
    }

    #[tokio::test]
    async fn gc_on_missing_dir_is_success() {
        let dir = tempfile::tempdir().unwrap();
        let h = FileSessionHandler::new(dir.path().join("never-created"));
        assert!(h.gc(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn requires_open() {
        let dir = tempfile::tempdir().unwrap();
        let mut h = FileSessionHandler::new(dir.path());
        assert_eq!(h.state(), HandlerState::Unopened);
        assert!(matches!(h.read("abc").await, Err(Error::NotOpen)));
        assert!(!h.write("abc", b"x").await);

        h.open().await.unwrap();
        assert!(h.close().await);
        assert_eq!(h.state(), HandlerState::Closed);
        assert!(!h.write("abc", b"x").await);
    }

    #[tokio::test]
    async fn io_failures_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let sessions = dir.path().join("sessions");
        let mut h = FileSessionHandler::new(sessions.clone());
        h.open().await.unwrap();

        // The session directory turns into a plain file under the handler.
        std::fs::remove_dir(&sessions).unwrap();
        std::fs::write(&sessions, b"").unwrap();

        assert!(!h.write("abc", b"x").await);
        assert!(matches!(h.read("abc").await, Err(Error::Io(_))));
        assert!(!h.destroy("abc").await);
    }
}
