//! Statement compilation for fedq.
//!
//! Architecture role:
//! - [`PlanContext`]: query id, catalog snapshot and session state of one statement
//! - [`compile`]: statement AST to [`Plan`]
//! - [`create_schema`]: the CREATE SOURCE path, shared with static configuration
//! - SHOW/DESCRIBE introspection and EXPLAIN rendering

pub mod compiler;
pub mod context;
pub mod explain;
pub mod introspect;
pub mod plan;

pub use compiler::{compile, create_schema};
pub use context::{PlanContext, SessionState};
pub use explain::{explain_node, explain_plan};
pub use plan::{
    CommandNode, CreateNode, FanOutNode, FilterNode, GroupByNode, JoinNode, LimitNode,
    MutateNode, Plan, PlanNode, ProjectionNode, ScanNode, StaticNode, UnionAllNode,
};
