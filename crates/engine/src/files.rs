//! File store port for expense proof uploads.
//!
//! The upload happens before any ledger write, so a failing store aborts
//! the expense with an upstream error and leaves every record untouched.

use std::path::PathBuf;

use uuid::Uuid;

use crate::{EngineError, ResultEngine};

/// Accepts raw bytes plus a filename and logical folder, returns a public
/// URL for the stored object.
pub trait FileStorePort: Send + Sync {
    fn store(&self, bytes: &[u8], filename: &str, folder: &str) -> ResultEngine<String>;
}

/// Stores proofs on the local filesystem under `base_dir/<folder>/` and
/// serves them under `public_base/<folder>/<name>`.
#[derive(Debug)]
pub struct LocalFileStore {
    base_dir: PathBuf,
    public_base: String,
}

impl LocalFileStore {
    pub fn new(base_dir: PathBuf, public_base: String) -> Self {
        Self {
            base_dir,
            public_base: public_base.trim_end_matches('/').to_string(),
        }
    }
}

impl FileStorePort for LocalFileStore {
    fn store(&self, bytes: &[u8], filename: &str, folder: &str) -> ResultEngine<String> {
        // Uploads get a fresh prefix so two proofs with the same name never
        // overwrite each other.
        let safe_name = filename.replace(['/', '\\'], "_");
        let stored_name = format!("{}_{safe_name}", Uuid::new_v4());

        let dir = self.base_dir.join(folder);
        std::fs::create_dir_all(&dir)
            .map_err(|err| EngineError::Upstream(format!("file store: {err}")))?;
        std::fs::write(dir.join(&stored_name), bytes)
            .map_err(|err| EngineError::Upstream(format!("file store: {err}")))?;

        Ok(format!("{}/{folder}/{stored_name}", self.public_base))
    }
}
