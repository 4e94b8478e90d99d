use thiserror::Error;

/// Canonical fedq error taxonomy used across crates.
///
/// Classification guidance:
/// - [`FedqError::InvalidConfig`], [`FedqError::Planning`], [`FedqError::SchemaNotFound`],
///   [`FedqError::UnknownSourceType`], [`FedqError::NotImplemented`]: compilation errors,
///   returned before any row streaming begins
/// - [`FedqError::Setup`]: a backend refused its configuration; the schema is not registered
/// - [`FedqError::Task`], [`FedqError::Execution`]: runtime failures after planning succeeded
/// - [`FedqError::Unsupported`]: valid request intentionally rejected
/// - [`FedqError::Io`]: raw filesystem failures from std APIs
#[derive(Debug, Error)]
pub enum FedqError {
    /// Invalid or inconsistent configuration.
    ///
    /// Examples:
    /// - `CREATE SOURCE ... WITH {...}` clause that does not decode
    /// - missing mandatory `type` field
    /// - backend settings that do not match the backend's expected shape
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Query planning and name resolution failures.
    ///
    /// Examples:
    /// - unknown table/column
    /// - non-boolean WHERE predicate
    /// - no active schema selected
    /// - parent/child schema cycles
    #[error("planning error: {0}")]
    Planning(String),

    /// A schema (or the requested parent schema) is not registered.
    #[error("schema not found: {0}")]
    SchemaNotFound(String),

    /// No factory is registered for a source type.
    #[error("unknown source type: {0}")]
    UnknownSourceType(String),

    /// A backend's setup hook failed.
    #[error("setup of schema {schema} failed: {message}")]
    Setup {
        /// Schema being created.
        schema: String,
        /// Backend-provided reason.
        message: String,
    },

    /// Statement shape or introspection target the compiler does not know.
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// Valid request for a feature/shape intentionally rejected.
    ///
    /// Examples:
    /// - ALTER statements
    /// - mutation against a read-only backend
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Leaf task failure, tagged with the task and backend that produced it.
    #[error("task {task} on {backend} failed: {source}")]
    Task {
        /// Task name.
        task: String,
        /// Backend identity (source type and schema).
        backend: String,
        /// Underlying failure.
        #[source]
        source: Box<FedqError>,
    },

    /// Runtime execution failures after planning succeeded.
    #[error("execution error: {0}")]
    Execution(String),

    /// Transparent std IO failures.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl FedqError {
    /// Wrap a leaf failure with the task and backend that produced it.
    pub fn task(task: impl Into<String>, backend: impl Into<String>, source: FedqError) -> Self {
        FedqError::Task {
            task: task.into(),
            backend: backend.into(),
            source: Box::new(source),
        }
    }
}

/// Standard fedq result alias.
pub type Result<T> = std::result::Result<T, FedqError>;
