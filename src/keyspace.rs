//! Minimal keyspace the codec saves from and loads into.
//!
//! One [`Keyspace`] holds a fixed number of logical [`Database`]s, each a
//! dictionary of key to [`Value`] plus a side table of absolute expiry
//! times in milliseconds. This is the narrow surface the codec needs —
//! iteration for save, insertion for load, expiry lookup for both — not a
//! full datastore.
//!
//! The save path borrows the keyspace immutably, so the borrow checker rules
//! out concurrent mutation during a scan; the background child additionally
//! runs against a copy-on-write snapshot. The `resize_enabled` flag mirrors
//! the host's dictionary-resize gate: it is cleared while a save child is
//! alive to keep copy-on-write page traffic bounded, and the host's
//! dictionaries are expected to honor it.

use std::collections::HashMap;

use crate::value::Value;

/// One logical database: keyed values and their optional expiry times.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Database {
    dict: HashMap<Vec<u8>, Value>,
    expires: HashMap<Vec<u8>, i64>,
}

impl Database {
    pub fn new() -> Self {
        Database::default()
    }

    pub fn len(&self) -> usize {
        self.dict.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dict.is_empty()
    }

    /// Number of keys carrying an expiry.
    pub fn expires_len(&self) -> usize {
        self.expires.len()
    }

    /// Insert or replace a value. A replaced key loses any previous expiry.
    pub fn insert(&mut self, key: Vec<u8>, value: Value) {
        self.expires.remove(&key);
        self.dict.insert(key, value);
    }

    /// Attach an absolute expiry (ms) to an existing key.
    pub fn set_expiry(&mut self, key: &[u8], at_ms: i64) {
        if self.dict.contains_key(key) {
            self.expires.insert(key.to_vec(), at_ms);
        }
    }

    pub fn expiry_ms(&self, key: &[u8]) -> Option<i64> {
        self.expires.get(key).copied()
    }

    pub fn get(&self, key: &[u8]) -> Option<&Value> {
        self.dict.get(key)
    }

    pub fn remove(&mut self, key: &[u8]) -> Option<Value> {
        self.expires.remove(key);
        self.dict.remove(key)
    }

    /// Scan every (key, value) pair. Order is unspecified.
    pub fn iter(&self) -> impl Iterator<Item = (&Vec<u8>, &Value)> {
        self.dict.iter()
    }
}

/// The full set of logical databases.
#[derive(Debug, Clone, PartialEq)]
pub struct Keyspace {
    databases: Vec<Database>,
    resize_enabled: bool,
}

impl Keyspace {
    pub fn new(database_count: u32) -> Self {
        Keyspace {
            databases: (0..database_count).map(|_| Database::new()).collect(),
            resize_enabled: true,
        }
    }

    pub fn database_count(&self) -> u32 {
        self.databases.len() as u32
    }

    pub fn database(&self, index: u32) -> Option<&Database> {
        self.databases.get(index as usize)
    }

    pub fn database_mut(&mut self, index: u32) -> Option<&mut Database> {
        self.databases.get_mut(index as usize)
    }

    /// All databases with their indexes, in index order.
    pub fn databases(&self) -> impl Iterator<Item = (u32, &Database)> {
        self.databases.iter().enumerate().map(|(i, db)| (i as u32, db))
    }

    /// Total number of keys across all databases.
    pub fn key_count(&self) -> usize {
        self.databases.iter().map(Database::len).sum()
    }

    /// Dictionary-resize gate. Cleared while a save child is active.
    pub fn resize_enabled(&self) -> bool {
        self.resize_enabled
    }

    pub fn set_resize_enabled(&mut self, enabled: bool) {
        self.resize_enabled = enabled;
    }
}
