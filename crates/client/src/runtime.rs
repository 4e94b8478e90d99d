//! Plan-to-task conversion: every plan node becomes exactly one task subtree.

use fedq_common::{FedqError, Result};
use fedq_execution::{
    AggregateTask, BoxedTask, FilterTask, HashJoinTask, LimitTask, MutateTask, ParallelTask,
    ProjectionTask, SequentialTask, SharedTaskContext, SourceTask, StaticTask, spawn_task,
};
use fedq_planner::{Plan, PlanNode, ScanNode};
use fedq_storage::SourceWriter;
use tracing::debug;

use crate::result::QueryResult;

fn scan_task(scan: ScanNode) -> Result<BoxedTask> {
    let backend = scan.backend();
    let stream = scan
        .source
        .scan(&scan.table, scan.columns.as_deref())
        .map_err(|e| FedqError::task(format!("scan({})", scan.table), backend.clone(), e))?;
    Ok(Box::new(SourceTask::new(&scan.table, backend, stream)))
}

/// Build the task tree for `node`. Scans are opened here, so backend errors
/// that happen while opening surface before anything runs.
pub(crate) fn build_task(node: PlanNode) -> Result<BoxedTask> {
    let task: BoxedTask = match node {
        PlanNode::SourceScan(scan) => scan_task(scan)?,
        PlanNode::FanOut(fan) => {
            let children = fan
                .partitions
                .into_iter()
                .map(scan_task)
                .collect::<Result<Vec<_>>>()?;
            Box::new(ParallelTask::new(format!("fanout({})", fan.table), children))
        }
        PlanNode::Static(st) => Box::new(StaticTask::new(st.name, st.batches)),
        PlanNode::Filter(f) => {
            let schema = f.input.schema();
            let input = build_task(*f.input)?;
            Box::new(FilterTask::try_new(input, &schema, &f.predicate)?)
        }
        PlanNode::Projection(p) => {
            let schema = p.input.schema();
            let input = build_task(*p.input)?;
            Box::new(ProjectionTask::try_new(input, &schema, &p.items)?.coerce_to(p.output)?)
        }
        PlanNode::Join(j) => {
            let left_schema = j.left.schema();
            let right_schema = j.right.schema();
            let left = build_task(*j.left)?;
            let right = build_task(*j.right)?;
            Box::new(HashJoinTask::try_new(
                left,
                &left_schema,
                &j.left_qualifier,
                &j.left_key,
                right,
                &right_schema,
                &j.right_qualifier,
                &j.right_key,
            )?)
        }
        PlanNode::GroupBy(g) => {
            let schema = g.input.schema();
            let input = build_task(*g.input)?;
            Box::new(AggregateTask::try_new(input, &schema, &g.group_by, g.aggregates)?)
        }
        PlanNode::Limit(l) => Box::new(LimitTask::new(build_task(*l.input)?, l.n)),
        PlanNode::UnionAll(u) => {
            let children = u
                .inputs
                .into_iter()
                .map(build_task)
                .collect::<Result<Vec<_>>>()?;
            Box::new(SequentialTask::new("union_all", children))
        }
        PlanNode::Mutate(m) => {
            let name = format!("{}({})", m.verb(), m.table.name);
            let backend = m.backend();
            let input = m.input.map(|i| build_task(*i)).transpose()?;
            let writer = SourceWriter::new(backend, m.source, m.table, m.kind);
            Box::new(MutateTask::new(name, input, Box::new(writer)))
        }
        PlanNode::Create(c) => Box::new(StaticTask::new(format!("create({})", c.schema), vec![])),
        PlanNode::Command(c) => {
            Box::new(StaticTask::new(format!("command({})", c.keyword), vec![]))
        }
    };
    Ok(task)
}

/// Start `plan` on the tokio runtime and hand back its result sink.
pub(crate) fn execute_plan(plan: Plan, ctx: SharedTaskContext) -> Result<QueryResult> {
    let schema = plan.projection.clone();
    let root = build_task(plan.root)?;
    debug!(query_id = %ctx.query_id, statement = plan.kind, root = root.name(), "executing plan");
    let handle = spawn_task(root, ctx.clone());
    Ok(QueryResult::new(schema, handle, ctx))
}
