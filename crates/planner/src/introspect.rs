//! SHOW and DESCRIBE: pre-computed row sets with a fixed projection per kind.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use arrow::array::{ArrayRef, StringArray};
use arrow::record_batch::RecordBatch;
use arrow_schema::{DataType, Field, Schema as ArrowSchema};
use fedq_common::{FedqError, Result};
use fedq_sql::{DescribeStmt, ShowStmt};
use fedq_storage::{Schema, TableDesc};
use tracing::warn;

use crate::context::PlanContext;
use crate::plan::{PlanNode, StaticNode};

/// Rows of one introspection result, all text.
struct Listing {
    name: String,
    columns: Vec<&'static str>,
    rows: Vec<Vec<String>>,
}

impl Listing {
    fn new(name: impl Into<String>, columns: Vec<&'static str>, rows: Vec<Vec<String>>) -> Self {
        Self {
            name: name.into(),
            columns,
            rows,
        }
    }

    /// Keep rows whose first column matches the `LIKE` pattern.
    fn filter_like(mut self, like: Option<&str>) -> Self {
        if let Some(pattern) = like {
            self.rows
                .retain(|row| row.first().is_some_and(|v| like_match(pattern, v)));
        }
        self
    }

    fn into_node(self) -> Result<PlanNode> {
        let output = Arc::new(ArrowSchema::new(
            self.columns
                .iter()
                .map(|c| Field::new(*c, DataType::Utf8, false))
                .collect::<Vec<_>>(),
        ));
        let mut batches = Vec::new();
        if !self.rows.is_empty() {
            let arrays = (0..self.columns.len())
                .map(|i| {
                    Arc::new(StringArray::from_iter_values(
                        self.rows
                            .iter()
                            .map(|r| r.get(i).map(String::as_str).unwrap_or_default()),
                    )) as ArrayRef
                })
                .collect::<Vec<_>>();
            batches.push(
                RecordBatch::try_new(output.clone(), arrays)
                    .map_err(|e| FedqError::Execution(format!("{}: {e}", self.name)))?,
            );
        }
        Ok(PlanNode::Static(StaticNode {
            name: self.name,
            output,
            batches,
        }))
    }
}

/// SQL `LIKE` with `%` and `_`, case-insensitive.
pub fn like_match(pattern: &str, value: &str) -> bool {
    let p = pattern.to_lowercase().chars().collect::<Vec<_>>();
    let v = value.to_lowercase().chars().collect::<Vec<_>>();
    let (mut pi, mut vi) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;
    while vi < v.len() {
        if pi < p.len() && (p[pi] == '_' || p[pi] == v[vi]) {
            pi += 1;
            vi += 1;
        } else if pi < p.len() && p[pi] == '%' {
            backtrack = Some((pi, vi));
            pi += 1;
        } else if let Some((sp, sv)) = backtrack {
            pi = sp + 1;
            vi = sv + 1;
            backtrack = Some((sp, sv + 1));
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '%' {
        pi += 1;
    }
    pi == p.len()
}

/// SQL-style name for an Arrow type, as shown by DESCRIBE.
pub fn sql_type_name(dt: &DataType) -> String {
    match dt {
        DataType::Int8 => "tinyint".to_string(),
        DataType::Int16 => "smallint".to_string(),
        DataType::Int32 => "int".to_string(),
        DataType::Int64 => "bigint".to_string(),
        DataType::UInt8 | DataType::UInt16 | DataType::UInt32 | DataType::UInt64 => {
            "bigint unsigned".to_string()
        }
        DataType::Float32 => "float".to_string(),
        DataType::Float64 => "double".to_string(),
        DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View => "varchar".to_string(),
        DataType::Boolean => "boolean".to_string(),
        DataType::Date32 | DataType::Date64 => "date".to_string(),
        DataType::Timestamp(_, _) => "timestamp".to_string(),
        other => other.to_string().to_lowercase(),
    }
}

pub(crate) fn show(ctx: &PlanContext, stmt: &ShowStmt) -> Result<PlanNode> {
    let like = stmt.like.as_deref();
    if let Some(what) = &stmt.create_what {
        return match what.trim().to_lowercase().as_str() {
            "table" => show_create_table(ctx, &stmt.identity)?
                .filter_like(like)
                .into_node(),
            other => Err(FedqError::NotImplemented(format!("SHOW CREATE {other}"))),
        };
    }

    let show_type = stmt
        .show_type
        .as_deref()
        .map(|s| s.trim().to_lowercase())
        .unwrap_or_default();
    let identity = stmt.identity.trim();
    let listing = match show_type.as_str() {
        "tables" => show_tables(ctx, stmt.full)?,
        "databases" | "schemas" => Listing::new(
            "show databases",
            vec!["Database"],
            ctx.catalog().names().into_iter().map(|n| vec![n]).collect(),
        ),
        "columns" | "fields" => describe_target(ctx, identity, stmt.full)?,
        "variables" => show_variables(ctx),
        "collation" => Listing::new(
            "show collation",
            vec!["Collation", "Charset", "Id", "Default", "Compiled", "Sortlen"],
            vec![
                ["utf8_general_ci", "utf8", "33", "Yes", "Yes", "1"]
                    .map(str::to_string)
                    .to_vec(),
            ],
        ),
        "procedure" | "procedure status" => {
            Listing::new("show procedure status", vec!["Procedures"], vec![])
        }
        "function" | "function status" => {
            Listing::new("show function status", vec!["Function"], vec![])
        }
        "" if !identity.is_empty()
            && ctx
                .active_schema_name()
                .is_some_and(|s| s.eq_ignore_ascii_case(identity)) =>
        {
            show_tables(ctx, stmt.full)?
        }
        _ => {
            let target = if show_type.is_empty() { identity } else { show_type.as_str() };
            warn!(query_id = %ctx.query_id, target = %target, "unrecognized SHOW target");
            return Err(FedqError::NotImplemented(format!("SHOW {target}")));
        }
    };
    listing.filter_like(like).into_node()
}

pub(crate) fn describe(ctx: &PlanContext, stmt: &DescribeStmt) -> Result<PlanNode> {
    describe_target(ctx, stmt.identity.trim(), stmt.full)?.into_node()
}

fn show_tables(ctx: &PlanContext, full: bool) -> Result<Listing> {
    let schema = ctx.active_schema()?;
    let names = ctx
        .catalog()
        .subtree(schema.name())
        .iter()
        .flat_map(|s| s.source().tables())
        .collect::<BTreeSet<_>>();
    Ok(if full {
        Listing::new(
            "show full tables",
            vec!["Table", "Table_type"],
            names
                .into_iter()
                .map(|n| vec![n, "BASE TABLE".to_string()])
                .collect(),
        )
    } else {
        Listing::new(
            "show tables",
            vec!["Table"],
            names.into_iter().map(|n| vec![n]).collect(),
        )
    })
}

fn show_variables(ctx: &PlanContext) -> Listing {
    let mut vars = BTreeMap::from([
        ("character_set_client".to_string(), "utf8".to_string()),
        ("collation_connection".to_string(), "utf8_general_ci".to_string()),
        ("max_allowed_packet".to_string(), "4194304".to_string()),
        ("version".to_string(), env!("CARGO_PKG_VERSION").to_string()),
        ("version_comment".to_string(), "fedq".to_string()),
    ]);
    for (name, value) in &ctx.session().vars {
        vars.insert(name.clone(), value.to_string());
    }
    Listing::new(
        "show variables",
        vec!["Variable_name", "Value"],
        vars.into_iter().map(|(k, v)| vec![k, v]).collect(),
    )
}

/// First table named `identity` in the active schema's subtree, or
/// `schema.table` when qualified.
fn find_table(ctx: &PlanContext, identity: &str) -> Option<(Arc<Schema>, TableDesc)> {
    if let Some((schema, table)) = identity.split_once('.') {
        if let Some(schema) = ctx.catalog().get(schema) {
            if let Some(desc) = schema.table(table) {
                return Some((schema, desc));
            }
        }
    }
    let active = ctx.active_schema().ok()?;
    ctx.catalog()
        .subtree(active.name())
        .into_iter()
        .find_map(|s| s.table(identity).map(|desc| (s, desc)))
}

fn describe_target(ctx: &PlanContext, identity: &str, full: bool) -> Result<Listing> {
    if identity.is_empty() {
        return Err(FedqError::Planning(
            "DESCRIBE requires a table or schema name".to_string(),
        ));
    }
    if let Some((_, desc)) = find_table(ctx, identity) {
        return Ok(describe_tables(identity, &[desc], false, full));
    }
    if let Some(schema) = ctx.catalog().get(identity) {
        let source = schema.source();
        let tables = source
            .tables()
            .iter()
            .filter_map(|t| source.table(t))
            .collect::<Vec<_>>();
        return Ok(describe_tables(identity, &tables, tables.len() > 1, full));
    }
    Err(FedqError::Planning(format!("table not found: {identity}")))
}

fn describe_tables(identity: &str, tables: &[TableDesc], qualify: bool, full: bool) -> Listing {
    let mut rows = Vec::new();
    for desc in tables {
        for field in desc.schema.fields() {
            let name = if qualify {
                format!("{}.{}", desc.name, field.name())
            } else {
                field.name().clone()
            };
            let mut row = vec![
                name,
                sql_type_name(field.data_type()),
                if field.is_nullable() { "YES" } else { "NO" }.to_string(),
            ];
            if full {
                row.push(if desc.is_key(field.name()) { "PRI" } else { "" }.to_string());
                row.push(if field.is_nullable() { "NULL" } else { "" }.to_string());
                row.push(String::new());
            }
            rows.push(row);
        }
    }
    let columns = if full {
        vec!["Field", "Type", "Null", "Key", "Default", "Extra"]
    } else {
        vec!["Field", "Type", "Null"]
    };
    Listing::new(format!("describe {identity}"), columns, rows)
}

fn show_create_table(ctx: &PlanContext, identity: &str) -> Result<Listing> {
    let identity = identity.trim();
    let (schema, desc) = find_table(ctx, identity)
        .ok_or_else(|| FedqError::Planning(format!("table not found: {identity}")))?;
    let engine = schema.source_type();
    let mut lines = desc
        .schema
        .fields()
        .iter()
        .map(|f| {
            let null = if f.is_nullable() { "DEFAULT NULL" } else { "NOT NULL" };
            format!("  `{}` {} {null}", f.name(), sql_type_name(f.data_type()))
        })
        .collect::<Vec<_>>();
    if !desc.primary_key.is_empty() {
        let keys = desc
            .primary_key
            .iter()
            .map(|k| format!("`{k}`"))
            .collect::<Vec<_>>();
        lines.push(format!("  PRIMARY KEY ({})", keys.join(", ")));
    }
    let ddl = format!(
        "CREATE TABLE `{}` (\n{}\n) ENGINE={engine} DEFAULT CHARSET=utf8;",
        desc.name,
        lines.join(",\n")
    );
    Ok(Listing::new(
        "show create table",
        vec!["Table", "Create Table"],
        vec![vec![desc.name.clone(), ddl]],
    ))
}
