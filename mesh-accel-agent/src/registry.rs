//! Persistent bijection between resource names and the compact 32-bit IDs
//! used as kernel-table keys. IDs survive restarts so that records programmed
//! by a previous process keep resolving to the same resources.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{Error, Result};

pub struct NameRegistry {
    path: PathBuf,
    by_name: ahash::HashMap<String, u32>,
    by_id: ahash::HashMap<u32, String>,
    next_id: u32,
}

impl NameRegistry {
    /// Rebuilds the registry from its persistence file. Must run before any
    /// resource is processed.
    pub fn load(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(Error::RegistryIo)?;
        }
        let mut registry = Self {
            path: path.to_owned(),
            by_name: ahash::HashMap::default(),
            by_id: ahash::HashMap::default(),
            next_id: 1,
        };
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(registry),
            Err(e) => return Err(Error::RegistryIo(e)),
        };
        for line in contents.lines() {
            let Some((name, id)) = line.rsplit_once('\t') else {
                warn!(line, "skipping malformed registry record");
                continue;
            };
            let Ok(id) = id.parse::<u32>() else {
                warn!(line, "skipping registry record with unparsable id");
                continue;
            };
            registry.by_name.insert(name.to_string(), id);
            registry.by_id.insert(id, name.to_string());
        }
        debug!(entries = registry.by_name.len(), "name registry loaded");
        Ok(registry)
    }

    /// Returns the ID bound to `name`, allocating and persisting a fresh one
    /// on first sight. The counter skips IDs already in use so it can never
    /// collide with a persisted binding.
    pub fn hash(&mut self, name: &str) -> Result<u32> {
        if let Some(id) = self.by_name.get(name) {
            return Ok(*id);
        }
        while self.by_id.contains_key(&self.next_id) {
            self.next_id = self
                .next_id
                .checked_add(1)
                .ok_or_else(|| Error::RegistryIo(std::io::Error::other("id space exhausted")))?;
        }
        let id = self.next_id;
        self.append(name, id)?;
        self.by_name.insert(name.to_string(), id);
        self.by_id.insert(id, name.to_string());
        self.next_id = id.saturating_add(1);
        Ok(id)
    }

    pub fn id_of(&self, name: &str) -> Option<u32> {
        self.by_name.get(name).copied()
    }

    pub fn name_of(&self, id: u32) -> Option<&str> {
        self.by_id.get(&id).map(String::as_str)
    }

    /// Removes the binding in both directions and compacts the file. Missing
    /// names are fine; removal events are re-delivered on resync.
    pub fn delete(&mut self, name: &str) -> Result<()> {
        let Some(id) = self.by_name.remove(name) else {
            return Ok(());
        };
        self.by_id.remove(&id);
        self.compact()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, u32)> {
        self.by_name.iter().map(|(name, id)| (name.as_str(), *id))
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    fn append(&self, name: &str, id: u32) -> Result<()> {
        let mut file = fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)
            .map_err(Error::RegistryIo)?;
        file.write_all(format!("{name}\t{id}\n").as_bytes())
            .map_err(Error::RegistryIo)
    }

    /// Rewrites the file atomically: temp file in the same directory, then
    /// rename over the original.
    fn compact(&self) -> Result<()> {
        let mut contents = String::new();
        for (name, id) in &self.by_name {
            contents.push_str(name);
            contents.push('\t');
            contents.push_str(&id.to_string());
            contents.push('\n');
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, contents).map_err(Error::RegistryIo)?;
        fs::rename(&tmp, &self.path).map_err(Error::RegistryIo)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn registry_in(dir: &tempfile::TempDir) -> NameRegistry {
        NameRegistry::load(&dir.path().join("registry")).unwrap()
    }

    #[test]
    fn allocates_stable_ids() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = registry_in(&dir);
        let a = registry.hash("default/a").unwrap();
        let b = registry.hash("default/b").unwrap();
        assert_ne!(a, b);
        assert_eq!(registry.hash("default/a").unwrap(), a);
        assert_eq!(registry.name_of(a), Some("default/a"));
        assert_eq!(registry.id_of("default/b"), Some(b));
    }

    #[test]
    fn survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry");
        let (a, b) = {
            let mut registry = NameRegistry::load(&path).unwrap();
            (
                registry.hash("default/a").unwrap(),
                registry.hash("default/b").unwrap(),
            )
        };
        let mut reloaded = NameRegistry::load(&path).unwrap();
        assert_eq!(reloaded.id_of("default/a"), Some(a));
        assert_eq!(reloaded.id_of("default/b"), Some(b));
        // fresh allocations must not collide with persisted ids
        let c = reloaded.hash("default/c").unwrap();
        assert_ne!(c, a);
        assert_ne!(c, b);
    }

    #[test]
    fn delete_compacts_and_frees_nothing_live() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry");
        let mut registry = NameRegistry::load(&path).unwrap();
        let a = registry.hash("default/a").unwrap();
        let b = registry.hash("default/b").unwrap();
        registry.delete("default/a").unwrap();
        assert_eq!(registry.id_of("default/a"), None);
        assert_eq!(registry.name_of(a), None);

        let reloaded = NameRegistry::load(&path).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.id_of("default/b"), Some(b));
    }

    #[test]
    fn delete_of_unknown_name_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = registry_in(&dir);
        registry.delete("default/ghost").unwrap();
        assert!(registry.is_empty());
    }
}
