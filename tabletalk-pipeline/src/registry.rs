//! Schema registry with atomic reload.
//!
//! The schema is read on every pipeline execution and written only at
//! startup and on an explicit reload signal. Readers clone an `Arc`
//! snapshot, so a reload swaps the whole document at once and no reader
//! ever observes a partially-updated schema.

use std::sync::{Arc, RwLock};
use tabletalk_core::{SchemaDescription, SchemaError};

/// Shared, reloadable schema handle.
pub struct SchemaRegistry {
    current: RwLock<Arc<SchemaDescription>>,
}

impl SchemaRegistry {
    /// Create a registry from an already-checked schema.
    pub fn new(schema: SchemaDescription) -> Result<Self, SchemaError> {
        schema.check()?;
        Ok(Self {
            current: RwLock::new(Arc::new(schema)),
        })
    }

    /// Create a registry from a JSON schema document.
    pub fn from_json(json: &str) -> Result<Self, SchemaError> {
        Ok(Self {
            current: RwLock::new(Arc::new(SchemaDescription::from_json(json)?)),
        })
    }

    /// Snapshot of the current schema. Cheap (one `Arc` clone); the
    /// snapshot stays valid across reloads.
    pub fn current(&self) -> Arc<SchemaDescription> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Atomically replace the schema. The new document is fully checked
    /// before the swap; on error the old schema stays in place.
    pub fn reload(&self, schema: SchemaDescription) -> Result<(), SchemaError> {
        schema.check()?;
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        *current = Arc::new(schema);
        Ok(())
    }

    /// Atomically replace the schema from a JSON document.
    pub fn reload_json(&self, json: &str) -> Result<(), SchemaError> {
        let schema = SchemaDescription::from_json(json)?;
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        *current = Arc::new(schema);
        Ok(())
    }
}

impl std::fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaRegistry")
            .field("tables", &self.current().tables.len())
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================
