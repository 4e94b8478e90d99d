use arrow::record_batch::RecordBatch;
use fedq_common::{FedqError, QueryId, Result};
use fedq_execution::TaskContext;
use fedq_planner::{Plan, PlanContext, SessionState, compile, explain_plan};
use fedq_sql::{LiteralValue, Statement};

use crate::engine::Engine;
use crate::result::QueryResult;
use crate::runtime::execute_plan;

/// One client connection: the active schema and `SET` variables persist
/// from one statement to the next.
#[derive(Debug, Clone)]
pub struct Session {
    engine: Engine,
    state: SessionState,
}

impl Session {
    pub(crate) fn new(engine: Engine, state: SessionState) -> Self {
        Self { engine, state }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn current_schema(&self) -> Option<&str> {
        self.state.schema.as_deref()
    }

    pub fn variable(&self, name: &str) -> Option<&LiteralValue> {
        self.state.vars.get(&name.trim().to_lowercase())
    }

    /// Compile `stmt` against the current catalog.
    ///
    /// CREATE SOURCE, SET and USE take effect here. Session changes are kept
    /// only when compilation succeeds.
    pub fn compile(&mut self, stmt: &Statement) -> Result<Plan> {
        let mut ctx = PlanContext::new(
            QueryId::next(),
            self.engine.registry().clone(),
            self.state.clone(),
        )
        .with_metrics(self.engine.metrics().clone());
        let plan = compile(&mut ctx, stmt)?;
        self.state = ctx.into_session();
        Ok(plan)
    }

    /// Compile and start `stmt`. Compilation errors and backend errors while
    /// opening scans are returned here; later failures surface through the
    /// result.
    pub async fn execute(&mut self, stmt: &Statement) -> Result<QueryResult> {
        let plan = self.compile(stmt)?;
        let config = self.engine.config();
        let ctx = TaskContext::new(plan.query_id, config.channel_capacity, config.batch_size_rows)
            .with_metrics(self.engine.metrics().clone())
            .into_shared();
        execute_plan(plan, ctx)
    }

    /// Execute `stmt` and collect every row-message.
    pub async fn query(&mut self, stmt: &Statement) -> Result<Vec<RecordBatch>> {
        self.execute(stmt).await?.collect().await
    }

    /// Render the plan of `stmt` without running it.
    pub fn explain(&mut self, stmt: &Statement) -> Result<String> {
        if matches!(stmt, Statement::Create(_) | Statement::Command(_)) {
            return Err(FedqError::Unsupported(format!(
                "EXPLAIN {} is not supported",
                stmt.keyword()
            )));
        }
        Ok(explain_plan(&self.compile(stmt)?))
    }
}
