//! Operator tasks.
//!
//! Leaves (`SourceTask`, `StaticTask`) produce batches; unary and binary
//! operators spawn their inputs with [`crate::task::spawn_task`] and read
//! the children's channels.

mod aggregate;
mod filter;
mod join;
mod limit;
mod mutate;
mod projection;
mod source;
mod static_rows;

pub use aggregate::{AggregateSpec, AggregateTask, aggregate_output_schema};
pub use filter::FilterTask;
pub use join::{HashJoinTask, join_output_schema};
pub use limit::LimitTask;
pub use mutate::{BatchWriter, MutateTask, rows_affected_schema};
pub use projection::{ProjectionTask, projection_output_schema};
pub use source::SourceTask;
pub use static_rows::StaticTask;
