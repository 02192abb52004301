//! File-backed session storage for functional tests.
//!
//! Keeps a whole session (all bags) in one JSON file at `<save_path>/<id>.sess`
//! and lets a test start, save and regenerate sessions any number of times in
//! one process.
//!
//! Saving overwrites the file in place with no temp file and no locking: a
//! crash mid-write corrupts it and concurrent writers race. Do not use this
//! outside tests; [`crate::FileSessionHandler`] is the production file store.

use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use sesh_core::{
    validate_session_id, AttributeBag, Error, FlashBag, IdGenerator, RandomIdGenerator, Result,
    SessionBag,
};

pub struct MockFileSessionStorage {
    save_path: PathBuf,
    session_id: Option<String>,
    started: bool,
    data: Map<String, Value>,
    attributes: AttributeBag,
    flashes: FlashBag,
    id_generator: Box<dyn IdGenerator>,
}

impl MockFileSessionStorage {
    /// Store session files in `save_path`, or the system temp dir when `None`.
    /// The directory is created if it does not exist.
    pub fn new(save_path: Option<PathBuf>) -> Result<Self> {
        let save_path = save_path.unwrap_or_else(std::env::temp_dir);
        if !save_path.is_dir() {
            create_dir_permissive(&save_path)?;
        }
        Ok(Self {
            save_path,
            session_id: None,
            started: false,
            data: Map::new(),
            attributes: AttributeBag::new(),
            flashes: FlashBag::new(),
            id_generator: Box::new(RandomIdGenerator),
        })
    }

    pub fn with_id_generator(mut self, generator: impl IdGenerator + 'static) -> Self {
        self.id_generator = Box::new(generator);
        self
    }

    /// Use bags with custom storage keys.
    pub fn with_bags(mut self, attributes: AttributeBag, flashes: FlashBag) -> Self {
        self.attributes = attributes;
        self.flashes = flashes;
        self
    }

    /// Attach to an existing session id. Only allowed before [`start`].
    ///
    /// [`start`]: Self::start
    pub fn set_id(&mut self, id: impl Into<String>) -> Result<()> {
        if self.started {
            return Err(Error::AlreadyStarted);
        }
        let id = id.into();
        validate_session_id(&id)?;
        self.session_id = Some(id);
        Ok(())
    }

    /// Start the session, generating an id if none was set, and load it.
    /// Starting twice is a no-op.
    pub async fn start(&mut self) -> Result<bool> {
        if self.started {
            return Ok(true);
        }
        if self.session_id.is_none() {
            self.session_id = Some(self.generate_id()?);
        }
        self.read().await?;
        self.started = true;
        debug!(id = self.id(), "mock session started");
        Ok(true)
    }

    /// The session id, or `""` before the session is started.
    pub fn id(&self) -> &str {
        if !self.started {
            return "";
        }
        self.session_id.as_deref().unwrap_or_default()
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn save_path(&self) -> &Path {
        &self.save_path
    }

    pub fn file_path(&self) -> PathBuf {
        let id = self.session_id.as_deref().unwrap_or_default();
        self.save_path.join(format!("{id}.sess"))
    }

    /// Write every bag to the session file, replacing its contents.
    pub async fn save(&mut self) -> Result<()> {
        if !self.started {
            return Err(Error::NotStarted);
        }
        self.sync_bags();
        let bytes = serde_json::to_vec(&self.data)?;
        tokio::fs::write(self.file_path(), bytes).await?;
        Ok(())
    }

    /// Move the session to a fresh id and save it there right away.
    ///
    /// With `destroy`, the file under the old id is removed first. Data held in
    /// memory is kept; nothing else is migrated.
    pub async fn regenerate(&mut self, destroy: bool) -> Result<bool> {
        if !self.started {
            self.start().await?;
        }
        if destroy {
            self.destroy_file().await?;
        }
        self.session_id = Some(self.generate_id()?);
        self.save().await?;
        Ok(true)
    }

    pub fn attributes(&self) -> &AttributeBag {
        &self.attributes
    }

    pub fn attributes_mut(&mut self) -> &mut AttributeBag {
        &mut self.attributes
    }

    pub fn flashes(&self) -> &FlashBag {
        &self.flashes
    }

    pub fn flashes_mut(&mut self) -> &mut FlashBag {
        &mut self.flashes
    }

    /// The session data as of the last load or save.
    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    fn generate_id(&self) -> Result<String> {
        let id = self.id_generator.generate();
        validate_session_id(&id)?;
        Ok(id)
    }

    async fn destroy_file(&self) -> Result<()> {
        match tokio::fs::remove_file(self.file_path()).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn read(&mut self) -> Result<()> {
        let path = self.file_path();
        let is_file = tokio::fs::metadata(&path).await.map(|meta| meta.is_file());
        self.data = match is_file {
            Ok(false) => {
                warn!("Session path {} is not a regular file", path.display());
                Map::new()
            }
            _ => match tokio::fs::read(&path).await {
                Ok(bytes) if bytes.is_empty() => Map::new(),
                Ok(bytes) => serde_json::from_slice(&bytes)?,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Map::new(),
                Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                    warn!("Session file {} is not readable: {e}", path.display());
                    Map::new()
                }
                Err(e) => return Err(e.into()),
            },
        };

        load_bag(&mut self.data, &mut self.attributes);
        load_bag(&mut self.data, &mut self.flashes);
        Ok(())
    }

    fn sync_bags(&mut self) {
        for bag in [&self.attributes as &dyn SessionBag, &self.flashes] {
            self.data
                .insert(bag.storage_key().to_string(), Value::Object(bag.to_map()));
        }
    }
}

/// Hand the bag its slice of `data`, creating an empty entry if missing.
fn load_bag(data: &mut Map<String, Value>, bag: &mut dyn SessionBag) {
    let entry = data
        .entry(bag.storage_key().to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    match entry {
        Value::Object(map) => bag.initialize(map.clone()),
        other => {
            warn!("Bag {:?} is not an object, resetting it", bag.storage_key());
            *other = Value::Object(Map::new());
            bag.initialize(Map::new());
        }
    }
}

fn create_dir_permissive(path: &Path) -> std::io::Result<()> {
    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o777);
    }
    builder.create(path)
}
