use std::fmt;
use std::sync::Arc;

use arrow::record_batch::RecordBatch;
use arrow_schema::{Schema as ArrowSchema, SchemaRef};
use fedq_common::QueryId;
use fedq_execution::{AggregateSpec, rows_affected_schema};
use fedq_sql::Expr;
use fedq_storage::{Source, TableDesc, WriteKind};

/// Compiled statement: the node tree plus the shape of its result.
#[derive(Debug)]
pub struct Plan {
    pub query_id: QueryId,
    /// Statement keyword (`SELECT`, `CREATE`, ...).
    pub kind: &'static str,
    pub root: PlanNode,
    /// Columns of the result rows.
    pub projection: SchemaRef,
}

impl Plan {
    pub fn new(query_id: QueryId, kind: &'static str, root: PlanNode) -> Self {
        let projection = root.schema();
        Self {
            query_id,
            kind,
            root,
            projection,
        }
    }
}

/// Scan of one table on one backend.
#[derive(Clone)]
pub struct ScanNode {
    pub schema_name: String,
    pub source: Arc<dyn Source>,
    pub table: String,
    /// Pushed-down columns; `None` reads every column.
    pub columns: Option<Vec<String>>,
    pub output: SchemaRef,
}

impl ScanNode {
    /// Backend identity used in task names and wrapped errors.
    pub fn backend(&self) -> String {
        format!("{}/{}", self.schema_name, self.source.source_type())
    }
}

impl fmt::Debug for ScanNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanNode")
            .field("schema", &self.schema_name)
            .field("source_type", &self.source.source_type())
            .field("table", &self.table)
            .field("columns", &self.columns)
            .finish()
    }
}

/// Same table served by several backends, read concurrently.
#[derive(Debug, Clone)]
pub struct FanOutNode {
    pub table: String,
    pub partitions: Vec<ScanNode>,
    pub output: SchemaRef,
}

/// Pre-computed rows (introspection results, VALUES lists, empty DDL results).
#[derive(Debug, Clone)]
pub struct StaticNode {
    pub name: String,
    pub output: SchemaRef,
    pub batches: Vec<RecordBatch>,
}

#[derive(Debug)]
pub struct FilterNode {
    pub predicate: Expr,
    pub input: Box<PlanNode>,
}

#[derive(Debug)]
pub struct ProjectionNode {
    /// `(expression, output name)` per output column.
    pub items: Vec<(Expr, String)>,
    pub input: Box<PlanNode>,
    pub output: SchemaRef,
}

/// Inner equi-join.
#[derive(Debug)]
pub struct JoinNode {
    pub left: Box<PlanNode>,
    pub left_qualifier: String,
    pub left_key: String,
    pub right: Box<PlanNode>,
    pub right_qualifier: String,
    pub right_key: String,
    pub output: SchemaRef,
}

#[derive(Debug)]
pub struct GroupByNode {
    pub group_by: Vec<String>,
    pub aggregates: Vec<AggregateSpec>,
    pub input: Box<PlanNode>,
    pub output: SchemaRef,
}

#[derive(Debug)]
pub struct LimitNode {
    pub n: usize,
    pub input: Box<PlanNode>,
}

/// Operands run one after another; output names come from the first.
#[derive(Debug)]
pub struct UnionAllNode {
    pub inputs: Vec<PlanNode>,
    pub output: SchemaRef,
}

/// Write into one backend table.
pub struct MutateNode {
    pub schema_name: String,
    pub source: Arc<dyn Source>,
    pub table: TableDesc,
    pub kind: WriteKind,
    /// Rows for INSERT/UPSERT; `None` for UPDATE/DELETE.
    pub input: Option<Box<PlanNode>>,
}

impl MutateNode {
    pub fn backend(&self) -> String {
        format!("{}/{}", self.schema_name, self.source.source_type())
    }

    pub fn verb(&self) -> &'static str {
        match self.kind {
            WriteKind::Insert { .. } => "insert",
            WriteKind::Upsert { .. } => "upsert",
            WriteKind::Update { .. } => "update",
            WriteKind::Delete { .. } => "delete",
        }
    }
}

impl fmt::Debug for MutateNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutateNode")
            .field("schema", &self.schema_name)
            .field("table", &self.table.name)
            .field("kind", &self.kind)
            .field("input", &self.input)
            .finish()
    }
}

/// Schema registered by `CREATE SOURCE`. Registration happens during
/// compilation; the node only reports it.
#[derive(Debug, Clone)]
pub struct CreateNode {
    pub schema: String,
    pub source_type: String,
    pub parent: Option<String>,
}

/// Session command applied during compilation (`SET`, `USE`).
#[derive(Debug, Clone)]
pub struct CommandNode {
    pub keyword: String,
    pub detail: String,
}

/// One node of a compiled plan. Each variant becomes exactly one task subtree.
#[derive(Debug)]
pub enum PlanNode {
    SourceScan(ScanNode),
    FanOut(FanOutNode),
    Static(StaticNode),
    Filter(FilterNode),
    Projection(ProjectionNode),
    Join(JoinNode),
    GroupBy(GroupByNode),
    Limit(LimitNode),
    UnionAll(UnionAllNode),
    Mutate(MutateNode),
    Create(CreateNode),
    Command(CommandNode),
}

impl PlanNode {
    /// Output columns of this node.
    pub fn schema(&self) -> SchemaRef {
        match self {
            PlanNode::SourceScan(n) => n.output.clone(),
            PlanNode::FanOut(n) => n.output.clone(),
            PlanNode::Static(n) => n.output.clone(),
            PlanNode::Filter(n) => n.input.schema(),
            PlanNode::Projection(n) => n.output.clone(),
            PlanNode::Join(n) => n.output.clone(),
            PlanNode::GroupBy(n) => n.output.clone(),
            PlanNode::Limit(n) => n.input.schema(),
            PlanNode::UnionAll(n) => n.output.clone(),
            PlanNode::Mutate(_) => rows_affected_schema(),
            PlanNode::Create(_) | PlanNode::Command(_) => Arc::new(ArrowSchema::empty()),
        }
    }

    /// Direct children, for explain and inspection.
    pub fn children(&self) -> Vec<&PlanNode> {
        match self {
            PlanNode::SourceScan(_)
            | PlanNode::FanOut(_)
            | PlanNode::Static(_)
            | PlanNode::Create(_)
            | PlanNode::Command(_) => vec![],
            PlanNode::Filter(n) => vec![n.input.as_ref()],
            PlanNode::Projection(n) => vec![n.input.as_ref()],
            PlanNode::Join(n) => vec![n.left.as_ref(), n.right.as_ref()],
            PlanNode::GroupBy(n) => vec![n.input.as_ref()],
            PlanNode::Limit(n) => vec![n.input.as_ref()],
            PlanNode::UnionAll(n) => n.inputs.iter().collect(),
            PlanNode::Mutate(n) => n.input.iter().map(|b| b.as_ref()).collect(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PlanNode::SourceScan(_) => "SourceScan",
            PlanNode::FanOut(_) => "FanOut",
            PlanNode::Static(_) => "Static",
            PlanNode::Filter(_) => "Filter",
            PlanNode::Projection(_) => "Projection",
            PlanNode::Join(_) => "Join",
            PlanNode::GroupBy(_) => "GroupBy",
            PlanNode::Limit(_) => "Limit",
            PlanNode::UnionAll(_) => "UnionAll",
            PlanNode::Mutate(_) => "Mutate",
            PlanNode::Create(_) => "Create",
            PlanNode::Command(_) => "Command",
        }
    }
}
