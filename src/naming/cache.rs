//! Remember the names we've already paid an AI to suggest.

use std::{collections::BTreeMap, fs, io::Write as _};

use tempfile::NamedTempFile;

use crate::prelude::*;

/// A JSON file mapping the MD5 digest of a file's contents to its name.
///
/// Renaming a file doesn't change its digest, so re-running over a folder
/// doesn't ask for the same names again.
#[derive(Debug, Default)]
pub struct NameCache {
    /// Where to persist the cache. `None` keeps it in memory only.
    path: Option<PathBuf>,
    entries: BTreeMap<String, String>,
}

impl NameCache {
    /// An empty cache that is never written to disk.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load the cache from `path`. A missing file gives an empty cache, and so
    /// does a corrupt one, which will be overwritten on the next save.
    pub fn load(path: &Path) -> Result<Self> {
        let entries = match fs::read_to_string(path) {
            Ok(data) => serde_json::from_str(&data).unwrap_or_else(|err| {
                warn!(path = %path.display(), "Ignoring unreadable name cache: {}", err);
                BTreeMap::new()
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("cannot read name cache {:?}", path.display())
                });
            }
        };
        debug!(path = %path.display(), entries = entries.len(), "Loaded name cache");
        Ok(Self {
            path: Some(path.to_owned()),
            entries,
        })
    }

    /// Look up the name for a digest.
    pub fn get(&self, digest: &str) -> Option<&str> {
        self.entries.get(digest).map(String::as_str)
    }

    /// Record a name and write the cache through to disk.
    pub fn insert(&mut self, digest: String, name: String) -> Result<()> {
        self.entries.insert(digest, name);
        self.save()
    }

    /// Atomically replace the cache file.
    fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let dir = path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let mut tmp = NamedTempFile::new_in(dir)
            .with_context(|| format!("cannot create temporary file in {:?}", dir.display()))?;
        serde_json::to_writer_pretty(&mut tmp, &self.entries)
            .context("cannot serialize name cache")?;
        tmp.write_all(b"\n")?;
        tmp.persist(path)
            .with_context(|| format!("cannot write name cache {:?}", path.display()))?;
        Ok(())
    }
}
