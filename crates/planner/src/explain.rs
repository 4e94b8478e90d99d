use arrow_schema::SchemaRef;
use fedq_sql::fmt_expr;
use fedq_storage::WriteKind;

use crate::plan::{Plan, PlanNode, ScanNode};

/// Render a compiled plan as human-readable multiline text.
pub fn explain_plan(plan: &Plan) -> String {
    let mut s = String::new();
    s.push_str(&format!(
        "{} query_id={} output=[{}]\n",
        plan.kind,
        plan.query_id,
        fmt_columns(&plan.projection)
    ));
    fmt_node(&plan.root, 1, &mut s);
    s
}

/// Render one subtree.
pub fn explain_node(node: &PlanNode) -> String {
    let mut s = String::new();
    fmt_node(node, 0, &mut s);
    s
}

fn fmt_columns(schema: &SchemaRef) -> String {
    schema
        .fields()
        .iter()
        .map(|f| format!("{}:{}", f.name(), f.data_type()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn fmt_scan(scan: &ScanNode) -> String {
    let columns = match &scan.columns {
        Some(cols) => cols.join(","),
        None => "*".to_string(),
    };
    format!(
        "SourceScan table={} schema={} source={} columns={columns}",
        scan.table,
        scan.schema_name,
        scan.source.source_type()
    )
}

fn fmt_node(node: &PlanNode, indent: usize, out: &mut String) {
    let pad = "  ".repeat(indent);
    match node {
        PlanNode::SourceScan(scan) => {
            out.push_str(&format!("{pad}{}\n", fmt_scan(scan)));
        }
        PlanNode::FanOut(fan) => {
            out.push_str(&format!(
                "{pad}FanOut table={} partitions={}\n",
                fan.table,
                fan.partitions.len()
            ));
            for p in &fan.partitions {
                out.push_str(&format!("{pad}  {}\n", fmt_scan(p)));
            }
        }
        PlanNode::Static(st) => {
            let rows = st.batches.iter().map(|b| b.num_rows()).sum::<usize>();
            out.push_str(&format!(
                "{pad}Static name={} rows={rows} columns=[{}]\n",
                st.name,
                fmt_columns(&st.output)
            ));
        }
        PlanNode::Filter(f) => {
            out.push_str(&format!("{pad}Filter {}\n", fmt_expr(&f.predicate)));
            fmt_node(&f.input, indent + 1, out);
        }
        PlanNode::Projection(p) => {
            out.push_str(&format!("{pad}Projection\n"));
            for (e, name) in &p.items {
                out.push_str(&format!("{pad}  {name} := {}\n", fmt_expr(e)));
            }
            fmt_node(&p.input, indent + 1, out);
        }
        PlanNode::Join(j) => {
            out.push_str(&format!(
                "{pad}Join on {}.{} = {}.{}\n",
                j.left_qualifier, j.left_key, j.right_qualifier, j.right_key
            ));
            out.push_str(&format!("{pad}  left:\n"));
            fmt_node(&j.left, indent + 2, out);
            out.push_str(&format!("{pad}  right:\n"));
            fmt_node(&j.right, indent + 2, out);
        }
        PlanNode::GroupBy(g) => {
            out.push_str(&format!("{pad}GroupBy keys=[{}]\n", g.group_by.join(", ")));
            for a in &g.aggregates {
                out.push_str(&format!(
                    "{pad}  {} := {}({})\n",
                    a.output_name,
                    a.func.name(),
                    a.arg.as_deref().unwrap_or("*")
                ));
            }
            fmt_node(&g.input, indent + 1, out);
        }
        PlanNode::Limit(l) => {
            out.push_str(&format!("{pad}Limit n={}\n", l.n));
            fmt_node(&l.input, indent + 1, out);
        }
        PlanNode::UnionAll(u) => {
            out.push_str(&format!("{pad}UnionAll operands={}\n", u.inputs.len()));
            for input in &u.inputs {
                fmt_node(input, indent + 1, out);
            }
        }
        PlanNode::Mutate(m) => {
            out.push_str(&format!(
                "{pad}Mutate {} table={} schema={}\n",
                m.verb(),
                m.table.name,
                m.schema_name
            ));
            match &m.kind {
                WriteKind::Update {
                    assignments,
                    predicate,
                } => {
                    for (col, v) in assignments {
                        out.push_str(&format!("{pad}  set {col} = {v}\n"));
                    }
                    if let Some(p) = predicate {
                        out.push_str(&format!("{pad}  where {}\n", fmt_expr(p)));
                    }
                }
                WriteKind::Delete { predicate: Some(p) } => {
                    out.push_str(&format!("{pad}  where {}\n", fmt_expr(p)));
                }
                _ => {}
            }
            if let Some(input) = &m.input {
                fmt_node(input, indent + 1, out);
            }
        }
        PlanNode::Create(c) => {
            let parent = c.parent.as_deref().unwrap_or("-");
            out.push_str(&format!(
                "{pad}CreateSource schema={} type={} parent={parent}\n",
                c.schema, c.source_type
            ));
        }
        PlanNode::Command(c) => {
            out.push_str(&format!("{pad}Command {} {}\n", c.keyword, c.detail));
        }
    }
}
