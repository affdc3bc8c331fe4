use std::collections::HashMap;
use std::sync::Mutex;

use meshcp_core::{MeshError, Result};

use super::{ResourceStore, StoreFuture, StoredResource};

/// In-process store. Shared only by tasks of the same process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, StoredResource>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn records(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, StoredResource>>> {
        self.records
            .lock()
            .map_err(|_| MeshError::Internal("memory store lock poisoned".to_string()))
    }
}

impl ResourceStore for MemoryStore {
    fn get<'a>(&'a self, name: &'a str) -> StoreFuture<'a, Option<StoredResource>> {
        Box::pin(async move { Ok(self.records()?.get(name).cloned()) })
    }

    fn create<'a>(&'a self, name: &'a str, value: String) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut records = self.records()?;
            if records.contains_key(name) {
                return Err(MeshError::Conflict(format!("{} already exists", name)));
            }
            records.insert(name.to_string(), StoredResource { value, version: 1 });
            Ok(())
        })
    }

    fn update<'a>(
        &'a self,
        name: &'a str,
        value: String,
        expected_version: i64,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut records = self.records()?;
            match records.get_mut(name) {
                Some(record) if record.version == expected_version => {
                    record.value = value;
                    record.version += 1;
                    Ok(())
                }
                Some(record) => Err(MeshError::Conflict(format!(
                    "{} is at version {}, expected {}",
                    name, record.version, expected_version
                ))),
                None => Err(MeshError::Conflict(format!("{} does not exist", name))),
            }
        })
    }
}
