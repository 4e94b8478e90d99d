//! Statement compiler: resolves a statement against the catalog snapshot of
//! its [`PlanContext`] and produces a [`Plan`].
//!
//! Error taxonomy:
//! - `Planning`: unresolved tables/columns, type mismatches, ambiguous targets
//! - `SchemaNotFound` / `UnknownSourceType` / `InvalidConfig` / `Setup`: CREATE SOURCE failures
//! - `Unsupported`: statements rejected on purpose (ALTER, CREATE TABLE, unknown commands)
//! - `NotImplemented`: introspection targets the compiler does not know

use std::sync::Arc;

use arrow::array::ArrayRef;
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use arrow_schema::{DataType, Field, Schema as ArrowSchema, SchemaRef};
use fedq_common::{FedqError, MetricsRegistry, Result, SourceConfig};
use fedq_execution::expressions::{compile_expr, literals_to_array, resolve_column};
use fedq_execution::{
    AggregateSpec, aggregate_output_schema, join_output_schema, projection_output_schema,
};
use fedq_sql::{
    CommandStmt, CreateKind, CreateStmt, DeleteStmt, Expr, InsertSource, InsertStmt,
    LiteralValue, SelectItem, SelectStmt, Statement, TableRef, UpdateStmt, fmt_expr,
};
use fedq_storage::{Schema, SourceRegistry, TableDesc, WriteKind};
use tracing::{debug, warn};

use crate::context::PlanContext;
use crate::introspect;
use crate::plan::{
    CommandNode, CreateNode, FanOutNode, FilterNode, GroupByNode, JoinNode, LimitNode,
    MutateNode, Plan, PlanNode, ProjectionNode, ScanNode, StaticNode, UnionAllNode,
};

/// Compile one statement.
///
/// CREATE SOURCE registers the schema and SET/USE update the session while
/// compiling; the returned plan then only reports what happened.
pub fn compile(ctx: &mut PlanContext, stmt: &Statement) -> Result<Plan> {
    debug!(query_id = %ctx.query_id, statement = stmt.keyword(), "compiling statement");
    let root = match stmt {
        Statement::Select(sel) => compile_select(ctx, sel)?,
        Statement::Insert(ins) => compile_insert(ctx, ins, false)?,
        Statement::Upsert(ins) => compile_insert(ctx, ins, true)?,
        Statement::Update(upd) => compile_update(ctx, upd)?,
        Statement::Delete(del) => compile_delete(ctx, del)?,
        Statement::Create(create) => compile_create(ctx, create)?,
        Statement::Alter(alter) => {
            warn!(query_id = %ctx.query_id, identity = %alter.identity, "ALTER rejected");
            return Err(FedqError::Unsupported(format!(
                "ALTER {} is not supported",
                alter.identity
            )));
        }
        Statement::Show(show) => introspect::show(ctx, show)?,
        Statement::Describe(desc) => introspect::describe(ctx, desc)?,
        Statement::Command(cmd) => compile_command(ctx, cmd)?,
    };
    Ok(Plan::new(ctx.query_id, stmt.keyword(), root))
}

/// Instantiate, set up and register a schema described by `conf`.
///
/// Shared by `CREATE SOURCE` and static engine configuration. A parent equal
/// to the schema's own name means top level. Nothing is registered unless
/// every step succeeds.
pub fn create_schema(
    registry: &SourceRegistry,
    conf: &SourceConfig,
    metrics: Option<&MetricsRegistry>,
) -> Result<()> {
    let name = conf.name.trim().to_lowercase();
    if name.is_empty() {
        return Err(FedqError::InvalidConfig(
            "source name must not be empty".to_string(),
        ));
    }
    let factory = registry.source_factory(&conf.source_type)?;
    let parent = conf.parent_schema().filter(|p| *p != name);
    if let Some(p) = &parent {
        if registry.schema(p).is_none() {
            return Err(FedqError::SchemaNotFound(p.clone()));
        }
    }

    let mut source = factory.create();
    source.setup(conf).map_err(|e| FedqError::Setup {
        schema: name.clone(),
        message: e.to_string(),
    })?;
    let schema = Schema::new(&name, conf.clone(), Arc::from(source));
    match &parent {
        Some(p) => registry.schema_add_child(p, schema)?,
        None => registry.schema_add(schema)?,
    }
    if let Some(m) = metrics {
        m.record_schema_registered(&conf.source_type);
    }
    debug!(schema = %name, source_type = %conf.source_type, parent = ?parent, "source created");
    Ok(())
}

fn compile_create(ctx: &mut PlanContext, stmt: &CreateStmt) -> Result<PlanNode> {
    let what = match &stmt.kind {
        CreateKind::Source => None,
        CreateKind::Table => Some("TABLE"),
        CreateKind::View => Some("VIEW"),
        CreateKind::Other(other) => Some(other.as_str()),
    };
    if let Some(what) = what {
        return Err(FedqError::Unsupported(format!(
            "CREATE {what} {} is not supported",
            stmt.identity
        )));
    }

    let mut conf = SourceConfig::from_with_clause(&stmt.with)?;
    conf.name = stmt.identity.trim().to_lowercase();
    create_schema(ctx.registry(), &conf, ctx.metrics())?;
    ctx.refresh_catalog();
    let parent = conf.parent_schema().filter(|p| *p != conf.name);
    Ok(PlanNode::Create(CreateNode {
        schema: conf.name,
        source_type: conf.source_type,
        parent,
    }))
}

fn compile_command(ctx: &mut PlanContext, stmt: &CommandStmt) -> Result<PlanNode> {
    let keyword = stmt.keyword.trim().to_lowercase();
    let detail = match keyword.as_str() {
        "set" => {
            if stmt.assignments.is_empty() {
                return Err(FedqError::Planning(
                    "SET requires at least one assignment".to_string(),
                ));
            }
            let mut names = Vec::with_capacity(stmt.assignments.len());
            for (name, value) in &stmt.assignments {
                let name = name.trim().trim_start_matches('@').to_lowercase();
                ctx.session_mut().vars.insert(name.clone(), value.clone());
                names.push(name);
            }
            names.join(", ")
        }
        "use" => {
            let name = stmt
                .identity
                .as_deref()
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .ok_or_else(|| FedqError::Planning("USE requires a schema name".to_string()))?;
            if !ctx.catalog().contains(&name) {
                return Err(FedqError::SchemaNotFound(name));
            }
            ctx.session_mut().schema = Some(name.clone());
            name
        }
        other => {
            warn!(query_id = %ctx.query_id, command = %other, "unrecognized command");
            return Err(FedqError::Unsupported(format!("command {other}")));
        }
    };
    Ok(PlanNode::Command(CommandNode { keyword, detail }))
}

// -------------------------
// Table resolution
// -------------------------

/// A table and the schema whose backend defines it.
pub(crate) struct ResolvedTable {
    pub schema: Arc<Schema>,
    pub desc: TableDesc,
}

/// Every backend in the target schema's subtree that defines `table`,
/// parent first.
pub(crate) fn table_candidates(ctx: &PlanContext, table: &TableRef) -> Result<Vec<ResolvedTable>> {
    let root = ctx.schema_or_active(table.schema.as_deref())?;
    let found = ctx
        .catalog()
        .subtree(root.name())
        .into_iter()
        .filter_map(|schema| {
            schema
                .table(&table.name)
                .map(|desc| ResolvedTable { schema, desc })
        })
        .collect::<Vec<_>>();
    if found.is_empty() {
        return Err(FedqError::Planning(format!("table not found: {}", table.name)));
    }
    Ok(found)
}

/// The single backend a mutation writes to.
fn writable_table(ctx: &PlanContext, table: &TableRef) -> Result<ResolvedTable> {
    let mut found = table_candidates(ctx, table)?;
    if found.len() == 1 {
        return Ok(found.remove(0));
    }
    let root = ctx.schema_or_active(table.schema.as_deref())?;
    if let Some(pos) = found.iter().position(|r| r.schema.name() == root.name()) {
        return Ok(found.swap_remove(pos));
    }
    let names = found
        .iter()
        .map(|r| r.schema.name().to_string())
        .collect::<Vec<_>>();
    Err(FedqError::Planning(format!(
        "table {} is defined by several schemas ({}); qualify it with a schema",
        table.name,
        names.join(", ")
    )))
}

fn same_shape(a: &SchemaRef, b: &SchemaRef) -> bool {
    a.fields().len() == b.fields().len()
        && a.fields()
            .iter()
            .zip(b.fields().iter())
            .all(|(x, y)| x.name() == y.name() && x.data_type() == y.data_type())
}

/// Map referenced column names onto the table's own columns, in table order.
///
/// Returns `None` (read everything) when a reference does not name a column
/// of this table.
fn pushdown_columns(desc: &TableDesc, qualifier: &str, refs: &[String]) -> Option<Vec<String>> {
    let mut keep = vec![false; desc.schema.fields().len()];
    for r in refs {
        let bare = match r.split_once('.') {
            Some((q, c))
                if q.eq_ignore_ascii_case(qualifier) || q.eq_ignore_ascii_case(&desc.name) =>
            {
                c
            }
            _ => r.as_str(),
        };
        let idx = desc.schema.fields().iter().position(|f| f.name() == bare)?;
        keep[idx] = true;
    }
    let columns = desc
        .schema
        .fields()
        .iter()
        .zip(keep)
        .filter(|(_, k)| *k)
        .map(|(f, _)| f.name().clone())
        .collect::<Vec<_>>();
    if columns.is_empty() { None } else { Some(columns) }
}

fn scan_node(resolved: &ResolvedTable, columns: Option<Vec<String>>) -> Result<ScanNode> {
    let output = match &columns {
        Some(cols) => {
            let indices = cols
                .iter()
                .map(|c| {
                    resolved.desc.schema.index_of(c).map_err(|_| {
                        FedqError::Planning(format!(
                            "unknown column {c} in table {}",
                            resolved.desc.name
                        ))
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            Arc::new(resolved.desc.schema.project(&indices).map_err(|e| {
                FedqError::Planning(format!("projection of {} failed: {e}", resolved.desc.name))
            })?)
        }
        None => resolved.desc.schema.clone(),
    };
    Ok(ScanNode {
        schema_name: resolved.schema.name().to_string(),
        source: resolved.schema.source().clone(),
        table: resolved.desc.name.clone(),
        columns,
        output,
    })
}

/// Scan `table`, fanning out when several backends in the subtree define it.
fn table_scan(ctx: &PlanContext, table: &TableRef, refs: Option<&[String]>) -> Result<PlanNode> {
    let found = table_candidates(ctx, table)?;
    let first = &found[0];
    let columns = refs.and_then(|r| pushdown_columns(&first.desc, table.qualifier(), r));

    if found.len() == 1 {
        return Ok(PlanNode::SourceScan(scan_node(first, columns)?));
    }
    for other in &found[1..] {
        if !same_shape(&first.desc.schema, &other.desc.schema) {
            return Err(FedqError::Planning(format!(
                "table {} has incompatible definitions in schemas {} and {}",
                table.name,
                first.schema.name(),
                other.schema.name()
            )));
        }
    }
    let partitions = found
        .iter()
        .map(|r| scan_node(r, columns.clone()))
        .collect::<Result<Vec<_>>>()?;
    debug!(
        query_id = %ctx.query_id,
        table = %table.name,
        partitions = partitions.len(),
        "table fans out over child schemas"
    );
    let output = partitions[0].output.clone();
    Ok(PlanNode::FanOut(FanOutNode {
        table: first.desc.name.clone(),
        partitions,
        output,
    }))
}

// -------------------------
// SELECT
// -------------------------

pub(crate) fn compile_select(ctx: &PlanContext, sel: &SelectStmt) -> Result<PlanNode> {
    let first = compile_select_core(ctx, sel)?;
    if sel.union_all.is_empty() {
        return Ok(first);
    }
    let mut operands = vec![first];
    for operand in &sel.union_all {
        operands.push(compile_select(ctx, operand)?);
    }
    let output = union_output_schema(&operands)?;
    let inputs = operands
        .into_iter()
        .map(|node| align_union_operand(node, &output))
        .collect::<Result<Vec<_>>>()?;
    Ok(PlanNode::UnionAll(UnionAllNode { inputs, output }))
}

/// Names come from the first operand. A column's type is the first non-NULL
/// type among the operands; it is nullable if any operand's column is.
fn union_output_schema(operands: &[PlanNode]) -> Result<SchemaRef> {
    let schemas = operands.iter().map(PlanNode::schema).collect::<Vec<_>>();
    let first = &schemas[0];
    for schema in &schemas[1..] {
        if schema.fields().len() != first.fields().len() {
            return Err(FedqError::Planning(format!(
                "UNION ALL operands have {} and {} columns",
                first.fields().len(),
                schema.fields().len()
            )));
        }
    }
    let mut fields = Vec::with_capacity(first.fields().len());
    for (i, head) in first.fields().iter().enumerate() {
        let column = schemas.iter().map(|s| s.field(i)).collect::<Vec<_>>();
        let data_type = column
            .iter()
            .map(|f| f.data_type())
            .find(|dt| **dt != DataType::Null)
            .unwrap_or(&DataType::Null)
            .clone();
        for f in &column {
            if *f.data_type() != DataType::Null && *f.data_type() != data_type {
                return Err(FedqError::Planning(format!(
                    "UNION ALL column {} has type {:?}, expected {:?}",
                    head.name(),
                    f.data_type(),
                    data_type
                )));
            }
        }
        let nullable = column
            .iter()
            .any(|f| f.is_nullable() || *f.data_type() == DataType::Null);
        fields.push(Field::new(head.name(), data_type, nullable));
    }
    Ok(Arc::new(ArrowSchema::new(fields)))
}

/// Wrap an operand whose columns differ from `output` in name, type or
/// nullability in a projection that renames and casts to it.
fn align_union_operand(node: PlanNode, output: &SchemaRef) -> Result<PlanNode> {
    let schema = node.schema();
    if schema.fields() == output.fields() {
        return Ok(node);
    }
    let items = schema
        .fields()
        .iter()
        .zip(output.fields().iter())
        .map(|(got, want)| (Expr::col(got.name()), want.name().clone()))
        .collect::<Vec<_>>();
    projection_output_schema(&schema, &items)?;
    Ok(PlanNode::Projection(ProjectionNode {
        items,
        input: Box::new(node),
        output: output.clone(),
    }))
}

/// Columns a single-table SELECT needs from its scan; `None` means all.
fn referenced_columns(sel: &SelectStmt) -> Option<Vec<String>> {
    let mut refs = Vec::new();
    for item in &sel.columns {
        match item {
            SelectItem::Wildcard => return None,
            SelectItem::Expr { expr, .. } => {
                refs.extend(expr.columns().into_iter().map(str::to_string))
            }
            SelectItem::Aggregate { arg, .. } => refs.extend(arg.iter().cloned()),
        }
    }
    if let Some(pred) = &sel.selection {
        refs.extend(pred.columns().into_iter().map(str::to_string));
    }
    refs.extend(sel.group_by.iter().cloned());
    if refs.is_empty() { None } else { Some(refs) }
}

/// One row, no columns: the input of a SELECT without FROM.
fn single_row() -> Result<PlanNode> {
    let output = Arc::new(ArrowSchema::empty());
    let batch = RecordBatch::try_new_with_options(
        output.clone(),
        vec![],
        &RecordBatchOptions::new().with_row_count(Some(1)),
    )
    .map_err(|e| FedqError::Planning(format!("single row source: {e}")))?;
    Ok(PlanNode::Static(StaticNode {
        name: "single_row".to_string(),
        output,
        batches: vec![batch],
    }))
}

fn output_name(expr: &Expr, alias: &Option<String>) -> String {
    if let Some(alias) = alias {
        return alias.clone();
    }
    match expr {
        Expr::Column(c) => c.clone(),
        e => fmt_expr(e),
    }
}

fn compile_select_core(ctx: &PlanContext, sel: &SelectStmt) -> Result<PlanNode> {
    if sel.columns.is_empty() {
        return Err(FedqError::Planning("SELECT list is empty".to_string()));
    }
    let mut node = match &sel.from {
        None => {
            if !sel.joins.is_empty() {
                return Err(FedqError::Planning("JOIN requires a FROM table".to_string()));
            }
            single_row()?
        }
        Some(from) => {
            let refs = if sel.joins.is_empty() {
                referenced_columns(sel)
            } else {
                None
            };
            let mut node = table_scan(ctx, from, refs.as_deref())?;
            for join in &sel.joins {
                let right = table_scan(ctx, &join.table, None)?;
                let left_schema = node.schema();
                let right_schema = right.schema();
                let (left_key, right_key) = if resolve_column(&left_schema, &join.left_key).is_err()
                    && resolve_column(&right_schema, &join.left_key).is_ok()
                    && resolve_column(&left_schema, &join.right_key).is_ok()
                {
                    (join.right_key.clone(), join.left_key.clone())
                } else {
                    (join.left_key.clone(), join.right_key.clone())
                };
                resolve_column(&left_schema, &left_key)?;
                resolve_column(&right_schema, &right_key)?;
                let output = join_output_schema(
                    &left_schema,
                    from.qualifier(),
                    &right_schema,
                    join.table.qualifier(),
                );
                node = PlanNode::Join(JoinNode {
                    left: Box::new(node),
                    left_qualifier: from.qualifier().to_string(),
                    left_key,
                    right: Box::new(right),
                    right_qualifier: join.table.qualifier().to_string(),
                    right_key,
                    output,
                });
            }
            node
        }
    };

    if let Some(predicate) = &sel.selection {
        let compiled = compile_expr(predicate, &node.schema())?;
        if compiled.data_type() != DataType::Boolean {
            return Err(FedqError::Planning(format!(
                "WHERE predicate must be boolean, got {:?}",
                compiled.data_type()
            )));
        }
        node = PlanNode::Filter(FilterNode {
            predicate: predicate.clone(),
            input: Box::new(node),
        });
    }

    let is_aggregate = !sel.group_by.is_empty()
        || sel
            .columns
            .iter()
            .any(|c| matches!(c, SelectItem::Aggregate { .. }));
    if is_aggregate {
        node = compile_aggregate(sel, node)?;
    } else if sel.columns != [SelectItem::Wildcard] {
        let input_schema = node.schema();
        let mut items = Vec::new();
        for item in &sel.columns {
            match item {
                SelectItem::Wildcard => items.extend(
                    input_schema
                        .fields()
                        .iter()
                        .map(|f| (Expr::col(f.name()), f.name().clone())),
                ),
                SelectItem::Expr { expr, alias } => {
                    items.push((expr.clone(), output_name(expr, alias)));
                }
                SelectItem::Aggregate { .. } => {
                    return Err(FedqError::Planning(
                        "aggregate outside of an aggregate query".to_string(),
                    ));
                }
            }
        }
        if items.is_empty() {
            return Err(FedqError::Planning("SELECT list is empty".to_string()));
        }
        let output = projection_output_schema(&input_schema, &items)?;
        node = PlanNode::Projection(ProjectionNode {
            items,
            input: Box::new(node),
            output,
        });
    }

    if let Some(n) = sel.limit {
        node = PlanNode::Limit(LimitNode {
            n,
            input: Box::new(node),
        });
    }
    Ok(node)
}

fn compile_aggregate(sel: &SelectStmt, input: PlanNode) -> Result<PlanNode> {
    let input_schema = input.schema();
    let mut specs = Vec::new();
    let mut items = Vec::new();
    for item in &sel.columns {
        match item {
            SelectItem::Wildcard => {
                return Err(FedqError::Planning(
                    "SELECT * is not valid with GROUP BY or aggregates".to_string(),
                ));
            }
            SelectItem::Aggregate { func, arg, alias } => {
                let name = alias.clone().unwrap_or_else(|| {
                    format!("{}({})", func.name(), arg.as_deref().unwrap_or("*"))
                });
                specs.push(AggregateSpec {
                    func: *func,
                    arg: arg.clone(),
                    output_name: name.clone(),
                });
                items.push((Expr::col(name.clone()), name));
            }
            SelectItem::Expr { expr, alias } => {
                let Expr::Column(c) = expr else {
                    return Err(FedqError::Planning(format!(
                        "{} must be a grouped column or an aggregate",
                        fmt_expr(expr)
                    )));
                };
                let idx = resolve_column(&input_schema, c)?;
                let mut grouped = false;
                for g in &sel.group_by {
                    if resolve_column(&input_schema, g)? == idx {
                        grouped = true;
                    }
                }
                if !grouped {
                    return Err(FedqError::Planning(format!(
                        "column {c} must appear in GROUP BY"
                    )));
                }
                items.push((expr.clone(), output_name(expr, alias)));
            }
        }
    }
    let output = aggregate_output_schema(&input_schema, &sel.group_by, &specs)?;
    let grouped = PlanNode::GroupBy(GroupByNode {
        group_by: sel.group_by.clone(),
        aggregates: specs,
        input: Box::new(input),
        output: output.clone(),
    });
    let projected = projection_output_schema(&output, &items)?;
    Ok(PlanNode::Projection(ProjectionNode {
        items,
        input: Box::new(grouped),
        output: projected,
    }))
}

// -------------------------
// INSERT / UPSERT / UPDATE / DELETE
// -------------------------

fn values_node(table: &str, fields: &[Field], rows: &[Vec<LiteralValue>]) -> Result<PlanNode> {
    if rows.is_empty() {
        return Err(FedqError::Planning(format!("INSERT into {table} has no rows")));
    }
    if let Some(bad) = rows.iter().find(|r| r.len() != fields.len()) {
        return Err(FedqError::Planning(format!(
            "INSERT into {table} expects {} values per row, got {}",
            fields.len(),
            bad.len()
        )));
    }
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(fields.len());
    for (i, field) in fields.iter().enumerate() {
        let values = rows.iter().map(|r| r[i].clone()).collect::<Vec<_>>();
        columns.push(literals_to_array(&values, field.data_type()).map_err(|e| {
            FedqError::Planning(format!("column {}: {e}", field.name()))
        })?);
    }
    let output = Arc::new(ArrowSchema::new(
        fields
            .iter()
            .map(|f| Field::new(f.name(), f.data_type().clone(), true))
            .collect::<Vec<_>>(),
    ));
    let batch = RecordBatch::try_new(output.clone(), columns)
        .map_err(|e| FedqError::Planning(format!("VALUES for {table}: {e}")))?;
    Ok(PlanNode::Static(StaticNode {
        name: format!("values({table})"),
        output,
        batches: vec![batch],
    }))
}

fn compile_insert(ctx: &PlanContext, stmt: &InsertStmt, upsert: bool) -> Result<PlanNode> {
    let target = writable_table(ctx, &stmt.table)?;
    let table_schema = target.desc.schema.clone();
    let fields = if stmt.columns.is_empty() {
        table_schema
            .fields()
            .iter()
            .map(|f| f.as_ref().clone())
            .collect::<Vec<_>>()
    } else {
        let mut fields = Vec::with_capacity(stmt.columns.len());
        for c in &stmt.columns {
            let field = table_schema
                .fields()
                .iter()
                .find(|f| f.name().eq_ignore_ascii_case(c))
                .ok_or_else(|| {
                    FedqError::Planning(format!(
                        "unknown column {c} in table {}",
                        target.desc.name
                    ))
                })?;
            if fields.iter().any(|f: &Field| f.name() == field.name()) {
                return Err(FedqError::Planning(format!("column {c} listed twice")));
            }
            fields.push(field.as_ref().clone());
        }
        fields
    };

    let input = match &stmt.source {
        InsertSource::Values(rows) => values_node(&target.desc.name, &fields, rows)?,
        InsertSource::Select(sel) => {
            let node = compile_select(ctx, sel)?;
            let width = node.schema().fields().len();
            if width != fields.len() {
                return Err(FedqError::Planning(format!(
                    "INSERT into {} expects {} columns, SELECT returns {width}",
                    target.desc.name,
                    fields.len()
                )));
            }
            node
        }
    };

    let columns = stmt.columns.clone();
    let kind = if upsert {
        if target.desc.primary_key.is_empty() {
            return Err(FedqError::Unsupported(format!(
                "UPSERT into {} requires a primary key",
                target.desc.name
            )));
        }
        WriteKind::Upsert { columns }
    } else {
        WriteKind::Insert { columns }
    };
    Ok(PlanNode::Mutate(MutateNode {
        schema_name: target.schema.name().to_string(),
        source: target.schema.source().clone(),
        table: target.desc,
        kind,
        input: Some(Box::new(input)),
    }))
}

fn check_predicate(schema: &SchemaRef, predicate: Option<&Expr>) -> Result<()> {
    let Some(predicate) = predicate else {
        return Ok(());
    };
    let compiled = compile_expr(predicate, schema)?;
    if compiled.data_type() != DataType::Boolean {
        return Err(FedqError::Planning(format!(
            "WHERE predicate must be boolean, got {:?}",
            compiled.data_type()
        )));
    }
    Ok(())
}

fn compile_update(ctx: &PlanContext, stmt: &UpdateStmt) -> Result<PlanNode> {
    let target = writable_table(ctx, &stmt.table)?;
    let schema = target.desc.schema.clone();
    if stmt.assignments.is_empty() {
        return Err(FedqError::Planning("UPDATE without assignments".to_string()));
    }
    let assignments = stmt
        .assignments
        .iter()
        .map(|(col, value)| {
            let idx = resolve_column(&schema, col)?;
            Ok((schema.field(idx).name().clone(), value.clone()))
        })
        .collect::<Result<Vec<_>>>()?;
    check_predicate(&schema, stmt.selection.as_ref())?;
    Ok(PlanNode::Mutate(MutateNode {
        schema_name: target.schema.name().to_string(),
        source: target.schema.source().clone(),
        table: target.desc,
        kind: WriteKind::Update {
            assignments,
            predicate: stmt.selection.clone(),
        },
        input: None,
    }))
}

fn compile_delete(ctx: &PlanContext, stmt: &DeleteStmt) -> Result<PlanNode> {
    let target = writable_table(ctx, &stmt.table)?;
    check_predicate(&target.desc.schema, stmt.selection.as_ref())?;
    Ok(PlanNode::Mutate(MutateNode {
        schema_name: target.schema.name().to_string(),
        source: target.schema.source().clone(),
        table: target.desc,
        kind: WriteKind::Delete {
            predicate: stmt.selection.clone(),
        },
        input: None,
    }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow_schema::{DataType, Field, Schema};
    use fedq_storage::TableDesc;

    use super::pushdown_columns;

    #[test]
    fn pushdown_keeps_table_order_and_strips_qualifiers() {
        let desc = TableDesc::new(
            "users",
            Arc::new(Schema::new(vec![
                Field::new("id", DataType::Int64, false),
                Field::new("name", DataType::Utf8, true),
                Field::new("age", DataType::Int64, true),
            ])),
        );
        let refs = vec!["age".to_string(), "u.id".to_string(), "age".to_string()];
        assert_eq!(
            pushdown_columns(&desc, "u", &refs),
            Some(vec!["id".to_string(), "age".to_string()])
        );
        assert_eq!(pushdown_columns(&desc, "u", &["missing".to_string()]), None);
    }
}
