// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The table registry: an ordered index of every routing table, keyed by
//! (namespace, afi, safi, table-id). Tables are created lazily and never duplicated.

use crate::errors::RouterError;
use crate::rib::table::{RouteTable, TableKey};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

#[allow(unused)]
use tracing::{debug, error, warn};

/// Shared handle to a routing table owned by the registry
pub type TableHandle = Arc<RwLock<RouteTable>>;

#[derive(Debug, Default)]
pub struct TableRegistry {
    tables: BTreeMap<TableKey, TableHandle>,
}

#[allow(clippy::len_without_is_empty)]
impl TableRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the table with the given key
    #[must_use]
    pub fn find(&self, key: &TableKey) -> Option<TableHandle> {
        self.tables.get(key).cloned()
    }

    /// Get the table with the given key, creating an empty one if it does not exist.
    ///
    /// # Errors
    /// Fails if the key is malformed. No table is created in that case.
    pub fn get_or_create(&mut self, key: &TableKey) -> Result<TableHandle, RouterError> {
        if !key.is_valid() {
            error!("Refusing to create table with malformed key {key}");
            return Err(RouterError::MalformedKey(*key));
        }
        let handle = self.tables.entry(*key).or_insert_with(|| {
            debug!("Table {key} created");
            Arc::new(RwLock::new(RouteTable::new(*key)))
        });
        Ok(handle.clone())
    }

    /// Remove the table with the given key, if any, and return it
    pub fn release(&mut self, key: &TableKey) -> Option<TableHandle> {
        let removed = self.tables.remove(key);
        if removed.is_some() {
            debug!("Table {key} released");
        }
        removed
    }

    /// Iterate over all tables in key order
    pub fn iter(&self) -> impl Iterator<Item = (&TableKey, &TableHandle)> {
        self.tables.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// Remove all tables, returning them in key order
    pub fn drain(&mut self) -> Vec<(TableKey, TableHandle)> {
        std::mem::take(&mut self.tables).into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rib::table::{Afi, Safi};
    use std::sync::Mutex;
    use std::thread;

    #[test]
    fn test_get_or_create_is_idempotent() {
        let mut registry = TableRegistry::new();
        let key = TableKey::new(0, Afi::Ipv4, Safi::Unicast, 254);
        assert!(registry.find(&key).is_none());

        let t1 = registry.get_or_create(&key).expect("Should succeed");
        let t2 = registry.get_or_create(&key).expect("Should succeed");
        assert!(Arc::ptr_eq(&t1, &t2));
        assert_eq!(registry.len(), 1);

        let found = registry.find(&key).expect("Should be there");
        assert!(Arc::ptr_eq(&t1, &found));

        assert!(registry.release(&key).is_some());
        assert!(registry.find(&key).is_none());
        assert!(registry.release(&key).is_none());
    }

    #[test]
    fn test_malformed_key_leaves_no_entry() {
        let mut registry = TableRegistry::new();
        let key = TableKey::new(0, Afi::Unspec, Safi::Unicast, 254);
        assert_eq!(
            registry.get_or_create(&key).err(),
            Some(RouterError::MalformedKey(key))
        );
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_iteration_order() {
        let mut registry = TableRegistry::new();
        let keys = [
            TableKey::new(2, Afi::Ipv4, Safi::Unicast, 1),
            TableKey::new(0, Afi::Ipv6, Safi::Unicast, 254),
            TableKey::new(0, Afi::Ipv4, Safi::Unicast, 1000),
            TableKey::new(0, Afi::Ipv4, Safi::Unicast, 254),
        ];
        for key in &keys {
            registry.get_or_create(key).expect("Should succeed");
        }
        let listed: Vec<TableKey> = registry.iter().map(|(k, _)| *k).collect();
        let mut sorted = keys.to_vec();
        sorted.sort();
        assert_eq!(listed, sorted);
    }

    #[test]
    fn test_concurrent_get_or_create() {
        let registry = Arc::new(Mutex::new(TableRegistry::new()));
        let key = TableKey::new(0, Afi::Ipv4, Safi::Unicast, 254);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                thread::spawn(move || {
                    (0..100)
                        .map(|_| registry.lock().unwrap().get_or_create(&key).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let tables: Vec<TableHandle> = handles
            .into_iter()
            .flat_map(|h| h.join().expect("Thread panicked"))
            .collect();

        assert_eq!(registry.lock().unwrap().len(), 1);
        let first = &tables[0];
        assert!(tables.iter().all(|t| Arc::ptr_eq(first, t)));
    }
}
