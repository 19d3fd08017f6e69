//! Filesystem destination store.
//!
//! One JSON file per destination:
//! ```text
//! {base_path}/
//!   {id}.json
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, warn};

use super::{validate_id, DestinationStore, Result};
use crate::destination::DestinationOptions;

pub struct FilesystemDestinationStore {
    base_path: PathBuf,
}

impl FilesystemDestinationStore {
    /// Create a store rooted at `base_path`, creating the directory if needed.
    pub async fn new(base_path: impl AsRef<Path>) -> Result<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path).await?;
        Ok(Self { base_path })
    }

    fn path_for_id(&self, id: &str) -> PathBuf {
        self.base_path.join(format!("{}.json", id))
    }
}

#[async_trait]
impl DestinationStore for FilesystemDestinationStore {
    async fn load_all(&self) -> Result<Vec<DestinationOptions>> {
        let mut destinations = Vec::new();

        let mut entries = fs::read_dir(&self.base_path).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            let bytes = fs::read(&path).await?;
            match serde_json::from_slice::<DestinationOptions>(&bytes) {
                Ok(options) => destinations.push(options),
                Err(e) => warn!(
                    path = %path.display(),
                    error = %e,
                    "Skipping unreadable destination config"
                ),
            }
        }

        destinations.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(destinations)
    }

    async fn save(&self, options: &DestinationOptions) -> Result<()> {
        validate_id(&options.id)?;
        let path = self.path_for_id(&options.id);
        let json = serde_json::to_vec_pretty(options)?;

        // Write atomically using temp file + rename
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, &json).await?;
        fs::rename(&temp_path, &path).await?;

        debug!(destination = %options.id, path = %path.display(), "Stored destination config");
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        validate_id(id)?;
        match fs::remove_file(self.path_for_id(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
