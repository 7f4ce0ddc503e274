pub mod tables;

use std::borrow::BorrowMut;
use std::hash::Hash;

use aya::Pod;
use aya::maps::{HashMap, MapData};

use crate::{Error, Result};

/// Typed CRUD over one kernel-resident table. `get` on a missing key returns
/// [`Error::NotFound`]; every other failure is [`Error::MapIo`].
pub trait BpfMap<K, V> {
    fn update(&mut self, key: K, value: V) -> Result<()>;
    fn delete(&mut self, key: &K) -> Result<()>;
    fn get(&self, key: &K) -> Result<V>;
    fn entries(&self) -> Result<Vec<(K, V)>>;
}

impl<T: BorrowMut<MapData>, K: Pod + Eq + Hash, V: Pod> BpfMap<K, V> for HashMap<T, K, V> {
    fn update(&mut self, key: K, value: V) -> Result<()> {
        Ok(self.insert(key, value, 0)?)
    }
    fn delete(&mut self, key: &K) -> Result<()> {
        Ok(self.remove(key)?)
    }
    fn get(&self, key: &K) -> Result<V> {
        Ok(<HashMap<T, K, V>>::get(self, key, 0)?)
    }
    fn entries(&self) -> Result<Vec<(K, V)>> {
        let mut entries = Vec::new();
        for kv in self.iter() {
            entries.push(kv?);
        }
        Ok(entries)
    }
}

impl<K: Clone + Eq + Hash, V: Clone> BpfMap<K, V> for ahash::HashMap<K, V> {
    fn update(&mut self, key: K, value: V) -> Result<()> {
        self.insert(key, value);
        Ok(())
    }
    fn delete(&mut self, key: &K) -> Result<()> {
        match self.remove(key) {
            Some(_) => Ok(()),
            None => Err(Error::NotFound),
        }
    }
    fn get(&self, key: &K) -> Result<V> {
        match <ahash::HashMap<K, V>>::get(self, key) {
            Some(v) => Ok(v.clone()),
            None => Err(Error::NotFound),
        }
    }
    fn entries(&self) -> Result<Vec<(K, V)>> {
        Ok(self.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }
}

/// One kernel table plus its userspace mirror. Writes that match the mirror
/// are skipped, which is what keeps a crash-recovery replay from disturbing
/// records the kernel already holds.
pub struct TableState<M, K, V>
where
    M: BpfMap<K, V>,
    K: Hash + Eq + Clone,
    V: Clone + PartialEq,
{
    cache: ahash::HashMap<K, V>,
    map: M,
}

impl<M, K, V> TableState<M, K, V>
where
    M: BpfMap<K, V>,
    K: Hash + Eq + Clone,
    V: Clone + PartialEq,
{
    pub fn new(map: M) -> Self {
        Self {
            cache: ahash::HashMap::default(),
            map,
        }
    }

    pub fn update(&mut self, key: K, value: V) -> Result<()> {
        if let Some(current) = self.cache.get(&key)
            && *current == value
        {
            return Ok(());
        }
        self.map.update(key.clone(), value.clone())?;
        self.cache.insert(key, value);
        Ok(())
    }

    /// Deletes the entry, treating an already-missing key as success.
    pub fn delete(&mut self, key: &K) -> Result<()> {
        match self.map.delete(key) {
            Ok(()) | Err(Error::NotFound) => {
                self.cache.remove(key);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    pub fn get_from_cache(&self, key: &K) -> Option<&V> {
        self.cache.get(key)
    }

    pub fn get_from_map(&self, key: &K) -> Result<V> {
        self.map.get(key)
    }

    /// Fills the mirror from the kernel table. Restart-only.
    pub fn prime(&mut self) -> Result<()> {
        self.cache = self.map.entries()?.into_iter().collect();
        Ok(())
    }

    /// Reads the kernel table directly, bypassing the mirror.
    pub fn map_entries(&self) -> Result<Vec<(K, V)>> {
        self.map.entries()
    }

    /// Gives the map back, dropping the mirror.
    pub fn into_map(self) -> M {
        self.map
    }

    pub fn cached_entries(&self) -> Vec<(K, V)> {
        self.cache
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}
