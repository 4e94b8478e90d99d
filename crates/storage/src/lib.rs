//! Backend contract, schemas and the source registry.
//!
//! Architecture role:
//! - [`Source`] / [`SourceFactory`]: what a backend must provide
//! - [`Schema`] / [`SchemaCatalog`]: named namespaces over sources
//! - [`SourceRegistry`]: source types plus copy-on-write schema snapshots
//! - built-in `memory` and `parquet` backends

use std::sync::Arc;

pub mod memory;
pub mod parquet_source;
pub mod registry;
pub mod schema;
pub mod source;
pub mod writer;

pub use memory::MemorySource;
pub use parquet_source::ParquetSource;
pub use registry::SourceRegistry;
pub use schema::{Schema, SchemaCatalog};
pub use source::{Mutation, SharedSourceFactory, Source, SourceFactory, TableDesc};
pub use writer::{SourceWriter, WriteKind};

/// Register the `memory` and `parquet` source types.
pub fn register_builtin_sources(registry: &SourceRegistry) {
    registry.register_source_type(
        "memory",
        Arc::new(|| Box::new(MemorySource::new()) as Box<dyn Source>),
    );
    registry.register_source_type(
        "parquet",
        Arc::new(|| Box::new(ParquetSource::new()) as Box<dyn Source>),
    );
}
