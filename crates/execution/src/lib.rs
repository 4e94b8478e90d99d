//! Execution-layer primitives used by the fedq runtime.
//!
//! Architecture role:
//! - task context, quit signal and bounded task channels
//! - the [`Task`] contract, its driver and sequential/parallel composites
//! - operator tasks (scan, filter, projection, join, aggregate, limit, mutate)
//! - expression compilation/evaluation
//!
//! Key modules:
//! - [`context`]
//! - [`channel`]
//! - [`task`]
//! - [`composite`]
//! - [`operators`]
//! - [`expressions`]
//! - [`stream`]

pub mod channel;
pub mod composite;
pub mod context;
pub mod expressions;
pub mod operators;
pub mod scalar;
pub mod stream;
pub mod task;

// Re-export only what you want at the crate root (no globs).
pub use channel::{TaskReceiver, TaskSender, task_channel};
pub use composite::{ParallelTask, SequentialTask};
pub use context::{QuitSignal, SharedTaskContext, TaskContext, TaskFailure};
pub use expressions::{PhysicalExpr, compile_expr, evaluate_predicate, resolve_column};
pub use operators::{
    AggregateSpec, AggregateTask, BatchWriter, FilterTask, HashJoinTask, LimitTask, MutateTask,
    ProjectionTask, SourceTask, StaticTask, aggregate_output_schema, join_output_schema,
    projection_output_schema, rows_affected_schema,
};
pub use stream::{RecordBatchStream, SendableRecordBatchStream, StreamAdapter, memory_stream};
pub use task::{BoxedTask, Task, TaskHandle, drive_task, spawn_task};
