use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use fedq_common::SourceConfig;

use crate::source::{Source, TableDesc};

/// A named namespace backed by one source, possibly with child schemas.
///
/// Schemas are immutable once published; the registry replaces them instead
/// of mutating them.
#[derive(Clone)]
pub struct Schema {
    name: String,
    conf: SourceConfig,
    source: Arc<dyn Source>,
    parent: Option<String>,
    children: Vec<String>,
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("name", &self.name)
            .field("source_type", &self.source.source_type())
            .field("parent", &self.parent)
            .field("children", &self.children)
            .finish()
    }
}

impl Schema {
    pub fn new(name: &str, conf: SourceConfig, source: Arc<dyn Source>) -> Self {
        Self {
            name: name.trim().to_lowercase(),
            conf,
            source,
            parent: None,
            children: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn conf(&self) -> &SourceConfig {
        &self.conf
    }

    pub fn source(&self) -> &Arc<dyn Source> {
        &self.source
    }

    pub fn source_type(&self) -> &str {
        self.source.source_type()
    }

    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    /// Child schema names in insertion order.
    pub fn children(&self) -> &[String] {
        &self.children
    }

    pub fn has_child(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        self.children.iter().any(|c| *c == name)
    }

    pub fn table(&self, name: &str) -> Option<TableDesc> {
        self.source.table(name)
    }

    pub(crate) fn set_parent(&mut self, parent: Option<String>) {
        self.parent = parent;
    }

    pub(crate) fn set_children(&mut self, children: Vec<String>) {
        self.children = children;
    }

    pub(crate) fn add_child(&mut self, name: &str) {
        if !self.has_child(name) {
            self.children.push(name.to_string());
        }
    }

    pub(crate) fn remove_child(&mut self, name: &str) {
        self.children.retain(|c| c != name);
    }
}

/// Immutable snapshot of every registered schema.
#[derive(Debug, Clone, Default)]
pub struct SchemaCatalog {
    schemas: BTreeMap<String, Arc<Schema>>,
}

impl SchemaCatalog {
    pub fn get(&self, name: &str) -> Option<Arc<Schema>> {
        self.schemas.get(&name.trim().to_lowercase()).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.schemas.contains_key(&name.trim().to_lowercase())
    }

    /// Schema names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.schemas.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    /// `name` followed by all of its descendants, depth-first in child order.
    pub fn subtree(&self, name: &str) -> Vec<Arc<Schema>> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        self.collect_subtree(&name.trim().to_lowercase(), &mut seen, &mut out);
        out
    }

    fn collect_subtree(&self, name: &str, seen: &mut HashSet<String>, out: &mut Vec<Arc<Schema>>) {
        if !seen.insert(name.to_string()) {
            return;
        }
        let Some(schema) = self.schemas.get(name) else {
            return;
        };
        out.push(schema.clone());
        for child in schema.children() {
            self.collect_subtree(child, seen, out);
        }
    }

    /// Ancestor names of `name`, nearest first.
    pub fn ancestors(&self, name: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut cur = self.schemas.get(&name.trim().to_lowercase()).and_then(|s| s.parent.clone());
        while let Some(p) = cur {
            if out.contains(&p) {
                break;
            }
            cur = self.schemas.get(&p).and_then(|s| s.parent.clone());
            out.push(p);
        }
        out
    }

    pub(crate) fn schemas_mut(&mut self) -> &mut BTreeMap<String, Arc<Schema>> {
        &mut self.schemas
    }
}
