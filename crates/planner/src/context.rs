use std::collections::BTreeMap;
use std::sync::Arc;

use fedq_common::{FedqError, MetricsRegistry, QueryId, Result};
use fedq_sql::LiteralValue;
use fedq_storage::{Schema, SchemaCatalog, SourceRegistry};

/// Per-session state carried from one statement to the next.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    pub user: String,
    /// Active schema; `None` until `USE` or the engine default selects one.
    pub schema: Option<String>,
    /// `SET` variables, keyed by lowercase name.
    pub vars: BTreeMap<String, LiteralValue>,
}

impl SessionState {
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            ..Default::default()
        }
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into().trim().to_lowercase());
        self
    }
}

/// Request-scoped state for compiling one statement.
///
/// Holds the catalog snapshot the statement resolves against, so concurrent
/// registrations never change the schemas a statement already looked at.
#[derive(Debug)]
pub struct PlanContext {
    pub query_id: QueryId,
    registry: Arc<SourceRegistry>,
    catalog: Arc<SchemaCatalog>,
    session: SessionState,
    metrics: Option<MetricsRegistry>,
}

impl PlanContext {
    pub fn new(query_id: QueryId, registry: Arc<SourceRegistry>, session: SessionState) -> Self {
        let catalog = registry.snapshot();
        Self {
            query_id,
            registry,
            catalog,
            session,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: MetricsRegistry) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn registry(&self) -> &Arc<SourceRegistry> {
        &self.registry
    }

    pub fn catalog(&self) -> &Arc<SchemaCatalog> {
        &self.catalog
    }

    pub fn metrics(&self) -> Option<&MetricsRegistry> {
        self.metrics.as_ref()
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut SessionState {
        &mut self.session
    }

    pub fn into_session(self) -> SessionState {
        self.session
    }

    /// Re-read the registry after this statement changed it.
    pub(crate) fn refresh_catalog(&mut self) {
        self.catalog = self.registry.snapshot();
    }

    /// Active schema name, if one is selected.
    pub fn active_schema_name(&self) -> Option<&str> {
        self.session.schema.as_deref()
    }

    /// Resolve the active schema against the snapshot.
    pub fn active_schema(&self) -> Result<Arc<Schema>> {
        let name = self
            .active_schema_name()
            .ok_or_else(|| FedqError::Planning("no schema selected".to_string()))?;
        self.catalog
            .get(name)
            .ok_or_else(|| FedqError::SchemaNotFound(name.to_string()))
    }

    /// Explicit schema if given, otherwise the active one.
    pub fn schema_or_active(&self, schema: Option<&str>) -> Result<Arc<Schema>> {
        match schema {
            Some(name) => self
                .catalog
                .get(name)
                .ok_or_else(|| FedqError::SchemaNotFound(name.trim().to_lowercase())),
            None => self.active_schema(),
        }
    }
}
