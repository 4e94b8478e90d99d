use std::sync::Arc;

use arrow::record_batch::RecordBatch;
use fedq_common::{EngineConfig, FedqError, MetricsRegistry, Result};
use fedq_planner::{SessionState, create_schema};
use fedq_sql::Statement;
use fedq_storage::{SharedSourceFactory, SourceRegistry, register_builtin_sources};
use tracing::info;

use crate::session::Session;

#[derive(Debug)]
struct EngineState {
    config: EngineConfig,
    registry: Arc<SourceRegistry>,
    metrics: MetricsRegistry,
}

/// Process-wide engine handle. Cheap to clone; clones share the registry.
#[derive(Debug, Clone)]
pub struct Engine {
    state: Arc<EngineState>,
}

impl Engine {
    /// Start an engine with the built-in source types.
    pub fn new(config: EngineConfig) -> Result<Self> {
        let registry = SourceRegistry::new();
        register_builtin_sources(&registry);
        Self::with_registry(config, Arc::new(registry))
    }

    /// Start an engine over `registry`, which may already carry custom
    /// source types used by the static sources of `config`.
    pub fn with_registry(config: EngineConfig, registry: Arc<SourceRegistry>) -> Result<Self> {
        if config.channel_capacity == 0 {
            return Err(FedqError::InvalidConfig(
                "channel_capacity must be at least 1".to_string(),
            ));
        }
        let metrics = MetricsRegistry::new();
        for conf in &config.sources {
            create_schema(&registry, conf, Some(&metrics))?;
        }
        if let Some(default) = &config.default_schema {
            if registry.schema(default).is_none() {
                return Err(FedqError::SchemaNotFound(default.clone()));
            }
        }
        info!(
            schemas = registry.schema_names().len(),
            source_types = registry.source_types().len(),
            "engine started"
        );
        Ok(Self {
            state: Arc::new(EngineState {
                config,
                registry,
                metrics,
            }),
        })
    }

    /// Register or replace a source type. Returns `true` on replacement.
    pub fn register_source_type(&self, name: &str, factory: SharedSourceFactory) -> bool {
        self.state.registry.register_source_type(name, factory)
    }

    pub fn registry(&self) -> &Arc<SourceRegistry> {
        &self.state.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.state.config
    }

    pub(crate) fn metrics(&self) -> &MetricsRegistry {
        &self.state.metrics
    }

    /// New session on the configured default schema.
    pub fn session(&self) -> Session {
        self.session_as("default")
    }

    pub fn session_as(&self, user: &str) -> Session {
        let mut state = SessionState::new(user);
        if let Some(schema) = &self.state.config.default_schema {
            state = state.with_schema(schema.as_str());
        }
        Session::new(self.clone(), state)
    }

    /// Run one statement in a throwaway session.
    pub async fn query(&self, stmt: &Statement) -> Result<Vec<RecordBatch>> {
        self.session().query(stmt).await
    }

    pub fn prometheus_metrics(&self) -> String {
        self.state.metrics.render_prometheus()
    }
}
