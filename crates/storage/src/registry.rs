use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use fedq_common::{FedqError, Result};
use tracing::{debug, info};

use crate::schema::{Schema, SchemaCatalog};
use crate::source::SharedSourceFactory;

/// Catalog of source types and live schemas.
///
/// Schemas are published as copy-on-write snapshots: a writer clones the
/// current catalog, edits the clone and swaps it in, so a snapshot handed to
/// a running query never changes underneath it.
#[derive(Default)]
pub struct SourceRegistry {
    factories: RwLock<HashMap<String, SharedSourceFactory>>,
    catalog: RwLock<Arc<SchemaCatalog>>,
}

impl std::fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let types = self.source_types();
        let schemas = self.snapshot().names();
        f.debug_struct("SourceRegistry")
            .field("source_types", &types)
            .field("schemas", &schemas)
            .finish()
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a source type.
    ///
    /// Returns `true` when an existing factory with the same name was replaced.
    pub fn register_source_type(&self, name: &str, factory: SharedSourceFactory) -> bool {
        let replaced = self
            .factories
            .write()
            .expect("source factory lock poisoned")
            .insert(normalize(name), factory)
            .is_some();
        debug!(source_type = %name, replaced, "source type registered");
        replaced
    }

    pub fn source_factory(&self, name: &str) -> Result<SharedSourceFactory> {
        self.factories
            .read()
            .expect("source factory lock poisoned")
            .get(&normalize(name))
            .cloned()
            .ok_or_else(|| FedqError::UnknownSourceType(name.to_string()))
    }

    /// Registered source type names, sorted.
    pub fn source_types(&self) -> Vec<String> {
        let mut names = self
            .factories
            .read()
            .expect("source factory lock poisoned")
            .keys()
            .cloned()
            .collect::<Vec<_>>();
        names.sort();
        names
    }

    /// Current immutable catalog.
    pub fn snapshot(&self) -> Arc<SchemaCatalog> {
        self.catalog
            .read()
            .expect("schema catalog lock poisoned")
            .clone()
    }

    pub fn schema(&self, name: &str) -> Option<Arc<Schema>> {
        self.snapshot().get(name)
    }

    pub fn schema_names(&self) -> Vec<String> {
        self.snapshot().names()
    }

    /// Register `schema` at top level, replacing any schema of the same name.
    ///
    /// A replaced schema's children stay attached to the new definition. If
    /// the old definition was somebody's child it is detached from that parent.
    pub fn schema_add(&self, schema: Schema) -> Result<()> {
        let mut guard = self.catalog.write().expect("schema catalog lock poisoned");
        let mut next = (**guard).clone();
        let name = schema.name().to_string();
        let schema = Self::inherit_children(&next, schema);
        Self::detach_from_parent(&mut next, &name);

        let mut schema = schema;
        schema.set_parent(None);
        next.schemas_mut().insert(name.clone(), Arc::new(schema));
        *guard = Arc::new(next);
        info!(schema = %name, "schema registered");
        Ok(())
    }

    /// Register `schema` as a child of `parent`, and at top level for direct lookup.
    ///
    /// Fails without touching the registry when `parent` does not exist or
    /// when linking would create a cycle.
    pub fn schema_add_child(&self, parent: &str, schema: Schema) -> Result<()> {
        let parent = normalize(parent);
        let mut guard = self.catalog.write().expect("schema catalog lock poisoned");
        let Some(parent_schema) = guard.get(&parent) else {
            return Err(FedqError::SchemaNotFound(parent));
        };
        let name = schema.name().to_string();
        if name == parent || guard.ancestors(&parent).contains(&name) {
            return Err(FedqError::Planning(format!(
                "adding schema {name} under {parent} would create a cycle"
            )));
        }

        let mut next = (**guard).clone();
        let schema = Self::inherit_children(&next, schema);
        Self::detach_from_parent(&mut next, &name);

        let mut schema = schema;
        schema.set_parent(Some(parent.clone()));
        // re-read: detaching may have replaced the parent entry
        let mut parent_schema = next
            .get(&parent)
            .map(|p| (*p).clone())
            .unwrap_or_else(|| (*parent_schema).clone());
        parent_schema.add_child(&name);

        next.schemas_mut().insert(parent.clone(), Arc::new(parent_schema));
        next.schemas_mut().insert(name.clone(), Arc::new(schema));
        *guard = Arc::new(next);
        info!(schema = %name, parent = %parent, "child schema registered");
        Ok(())
    }

    fn inherit_children(catalog: &SchemaCatalog, mut schema: Schema) -> Schema {
        if let Some(old) = catalog.get(schema.name()) {
            schema.set_children(old.children().to_vec());
        }
        schema
    }

    fn detach_from_parent(catalog: &mut SchemaCatalog, name: &str) {
        let Some(old_parent) = catalog.get(name).and_then(|s| s.parent().map(str::to_string)) else {
            return;
        };
        if let Some(p) = catalog.get(&old_parent) {
            let mut p = (*p).clone();
            p.remove_child(name);
            catalog.schemas_mut().insert(old_parent, Arc::new(p));
        }
    }
}
