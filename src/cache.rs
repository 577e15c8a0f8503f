//! On-disk cache of model responses, keyed by model name and prompt.
//!
//! One JSON file per entry under the cache directory, named by the SHA-256 of
//! the key. A corrupt or unreadable entry is treated as a miss.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    model: String,
    prompt: String,
    response: String,
}

#[derive(Debug)]
pub struct ResponseCache {
    dir: PathBuf,
}

impl ResponseCache {
    /// Opens (and creates if needed) a cache directory.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("cannot create cache directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn get(&self, model: &str, prompt: &str) -> Option<String> {
        let path = self.entry_path(model, prompt);
        let bytes = std::fs::read(path).ok()?;
        let entry: CacheEntry = serde_json::from_slice(&bytes).ok()?;
        // Guard against the (unlikely) hash collision and stale formats.
        if entry.model == model && entry.prompt == prompt {
            Some(entry.response)
        } else {
            None
        }
    }

    pub fn put(&self, model: &str, prompt: &str, response: &str) -> Result<()> {
        let entry = CacheEntry {
            model: model.to_string(),
            prompt: prompt.to_string(),
            response: response.to_string(),
        };
        let path = self.entry_path(model, prompt);
        let bytes = serde_json::to_vec(&entry)?;
        std::fs::write(&path, bytes)
            .with_context(|| format!("cannot write cache entry {}", path.display()))?;
        Ok(())
    }

    fn entry_path(&self, model: &str, prompt: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(model.as_bytes());
        hasher.update([0u8]);
        hasher.update(prompt.as_bytes());
        let digest = hasher.finalize();
        let name: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        self.dir.join(format!("{name}.json"))
    }
}
