//! In-memory backend with full mutation support.
//!
//! Settings shape:
//!
//! ```json
//! {"tables": {"users": {
//!     "columns": [{"name": "id", "type": "int64", "nullable": false},
//!                 {"name": "name", "type": "utf8"}],
//!     "primary_key": ["id"],
//!     "rows": [[1, "ann"], [2, "bob"]]
//! }}}
//! ```

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, RwLock};

use arrow::array::{
    ArrayRef, BooleanArray, BooleanBuilder, Float64Builder, Int64Builder, StringBuilder,
};
use arrow::compute::kernels::boolean::not;
use arrow::compute::kernels::zip::zip;
use arrow::compute::{cast, concat_batches, filter_record_batch, prep_null_mask_filter};
use arrow::record_batch::RecordBatch;
use arrow::util::display::array_value_to_string;
use arrow_schema::{DataType, Field, Schema as ArrowSchema, SchemaRef};
use fedq_common::{FedqError, Result, SourceConfig};
use fedq_execution::expressions::{compile_expr, evaluate_predicate, scalar_to_array};
use fedq_execution::{SendableRecordBatchStream, memory_stream};
use fedq_sql::{Expr, LiteralValue};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::source::{Mutation, Source, TableDesc};

#[derive(Debug, Deserialize)]
struct ColumnSpec {
    name: String,
    #[serde(rename = "type")]
    data_type: String,
    #[serde(default = "default_nullable")]
    nullable: bool,
}

fn default_nullable() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct TableSpec {
    columns: Vec<ColumnSpec>,
    #[serde(default)]
    primary_key: Vec<String>,
    #[serde(default)]
    rows: Vec<Vec<Value>>,
}

/// Map a declared type name to an Arrow type.
pub fn parse_type_name(name: &str) -> Result<DataType> {
    match name.trim().to_lowercase().as_str() {
        "int64" | "bigint" | "int" | "integer" => Ok(DataType::Int64),
        "float64" | "double" | "float" => Ok(DataType::Float64),
        "utf8" | "string" | "text" | "varchar" => Ok(DataType::Utf8),
        "bool" | "boolean" => Ok(DataType::Boolean),
        other => Err(FedqError::InvalidConfig(format!("unsupported column type: {other}"))),
    }
}

#[derive(Debug, Clone)]
struct MemTable {
    desc: TableDesc,
    batches: Vec<RecordBatch>,
}

impl MemTable {
    fn from_spec(name: &str, spec: TableSpec) -> Result<Self> {
        let fields = spec
            .columns
            .iter()
            .map(|c| Ok(Field::new(&c.name, parse_type_name(&c.data_type)?, c.nullable)))
            .collect::<Result<Vec<_>>>()?;
        let schema = Arc::new(ArrowSchema::new(fields));
        for key in &spec.primary_key {
            if schema.field_with_name(key).is_err() {
                return Err(FedqError::InvalidConfig(format!(
                    "primary key column {key} not declared in table {name}"
                )));
            }
        }
        let batch = json_rows_to_batch(name, &schema, &spec.rows)?;
        Ok(Self {
            desc: TableDesc::new(name, schema).with_primary_key(spec.primary_key),
            batches: if batch.num_rows() == 0 { Vec::new() } else { vec![batch] },
        })
    }

    fn schema(&self) -> SchemaRef {
        self.desc.schema.clone()
    }

    fn combined(&self) -> Result<RecordBatch> {
        concat_batches(&self.schema(), &self.batches).map_err(mem_err)
    }

    fn replace(&mut self, batch: RecordBatch) {
        self.batches = if batch.num_rows() == 0 { Vec::new() } else { vec![batch] };
    }
}

fn mem_err(e: arrow_schema::ArrowError) -> FedqError {
    FedqError::Execution(format!("memory source: {e}"))
}

fn json_rows_to_batch(table: &str, schema: &SchemaRef, rows: &[Vec<Value>]) -> Result<RecordBatch> {
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(schema.fields().len());
    for (i, field) in schema.fields().iter().enumerate() {
        let bad = |v: &Value| {
            FedqError::InvalidConfig(format!(
                "table {table}: value {v} does not fit column {} ({:?})",
                field.name(),
                field.data_type()
            ))
        };
        let cells = rows
            .iter()
            .map(|row| {
                row.get(i).ok_or_else(|| {
                    FedqError::InvalidConfig(format!(
                        "table {table}: row has {} values, expected {}",
                        row.len(),
                        schema.fields().len()
                    ))
                })
            })
            .collect::<Result<Vec<&Value>>>()?;
        if !field.is_nullable() && cells.iter().any(|v| v.is_null()) {
            return Err(FedqError::InvalidConfig(format!(
                "table {table}: null in non-nullable column {}",
                field.name()
            )));
        }
        let array: ArrayRef = match field.data_type() {
            DataType::Int64 => {
                let mut b = Int64Builder::with_capacity(cells.len());
                for v in &cells {
                    match v {
                        Value::Null => b.append_null(),
                        v => b.append_value(v.as_i64().ok_or_else(|| bad(v))?),
                    }
                }
                Arc::new(b.finish())
            }
            DataType::Float64 => {
                let mut b = Float64Builder::with_capacity(cells.len());
                for v in &cells {
                    match v {
                        Value::Null => b.append_null(),
                        v => b.append_value(v.as_f64().ok_or_else(|| bad(v))?),
                    }
                }
                Arc::new(b.finish())
            }
            DataType::Boolean => {
                let mut b = BooleanBuilder::with_capacity(cells.len());
                for v in &cells {
                    match v {
                        Value::Null => b.append_null(),
                        v => b.append_value(v.as_bool().ok_or_else(|| bad(v))?),
                    }
                }
                Arc::new(b.finish())
            }
            _ => {
                let mut b = StringBuilder::new();
                for v in &cells {
                    match v {
                        Value::Null => b.append_null(),
                        Value::String(s) => b.append_value(s),
                        v => b.append_value(v.to_string()),
                    }
                }
                Arc::new(b.finish())
            }
        };
        columns.push(array);
    }
    RecordBatch::try_new(schema.clone(), columns)
        .map_err(|e| FedqError::InvalidConfig(format!("table {table}: {e}")))
}

/// In-memory backend. Tables are declared in settings and live as long as
/// the schema that owns the source.
#[derive(Debug, Default)]
pub struct MemorySource {
    tables: RwLock<BTreeMap<String, MemTable>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a source holding `batches` under `name` without going through settings.
    pub fn with_table(self, desc: TableDesc, batches: Vec<RecordBatch>) -> Self {
        let key = desc.name.to_lowercase();
        self.tables
            .write()
            .expect("memory tables lock poisoned")
            .insert(key, MemTable { desc, batches });
        self
    }

    fn with_table_mut<T>(
        &self,
        table: &str,
        f: impl FnOnce(&mut MemTable) -> Result<T>,
    ) -> Result<T> {
        let mut tables = self.tables.write().expect("memory tables lock poisoned");
        let t = tables
            .get_mut(&table.to_lowercase())
            .ok_or_else(|| FedqError::Planning(format!("unknown table: {table}")))?;
        f(t)
    }
}

fn predicate_mask(batch: &RecordBatch, predicate: Option<&Expr>) -> Result<BooleanArray> {
    match predicate {
        None => Ok(BooleanArray::from(vec![true; batch.num_rows()])),
        Some(expr) => {
            let compiled = compile_expr(expr, batch.schema_ref())?;
            let mask = evaluate_predicate(compiled.as_ref(), batch)?;
            Ok(prep_null_mask_filter(&mask))
        }
    }
}

fn key_of(batch: &RecordBatch, key_cols: &[usize], row: usize) -> Result<String> {
    let mut key = String::new();
    for c in key_cols {
        key.push_str(&array_value_to_string(batch.column(*c), row).map_err(mem_err)?);
        key.push('\u{0}');
    }
    Ok(key)
}

fn upsert(table: &mut MemTable, incoming: RecordBatch) -> Result<u64> {
    if table.desc.primary_key.is_empty() {
        return Err(FedqError::Unsupported(format!(
            "upsert requires a primary key on table {}",
            table.desc.name
        )));
    }
    let schema = table.schema();
    let key_cols = table
        .desc
        .primary_key
        .iter()
        .map(|k| schema.index_of(k).map_err(mem_err))
        .collect::<Result<Vec<_>>>()?;

    let mut incoming_keys = HashSet::new();
    for row in 0..incoming.num_rows() {
        incoming_keys.insert(key_of(&incoming, &key_cols, row)?);
    }
    let existing = table.combined()?;
    let mut keep = Vec::with_capacity(existing.num_rows());
    for row in 0..existing.num_rows() {
        keep.push(!incoming_keys.contains(&key_of(&existing, &key_cols, row)?));
    }
    let kept = filter_record_batch(&existing, &BooleanArray::from(keep)).map_err(mem_err)?;
    let merged = concat_batches(&schema, &[kept, incoming.clone()]).map_err(mem_err)?;
    table.replace(merged);
    Ok(incoming.num_rows() as u64)
}

fn update(
    table: &mut MemTable,
    assignments: &[(String, LiteralValue)],
    predicate: Option<&Expr>,
) -> Result<u64> {
    let schema = table.schema();
    let mut targets = Vec::with_capacity(assignments.len());
    for (col, value) in assignments {
        let idx = schema
            .index_of(col)
            .map_err(|_| FedqError::Planning(format!("unknown column: {col}")))?;
        let field = schema.field(idx);
        if table.desc.is_key(field.name()) {
            return Err(FedqError::Unsupported(format!(
                "updating primary key column {col} is not supported"
            )));
        }
        if matches!(value, LiteralValue::Null) && !field.is_nullable() {
            return Err(FedqError::Execution(format!("column {col} is not nullable")));
        }
        targets.push((idx, value));
    }

    let existing = table.combined()?;
    let mask = predicate_mask(&existing, predicate)?;
    let affected = mask.true_count() as u64;
    if affected == 0 {
        return Ok(0);
    }
    let mut columns = existing.columns().to_vec();
    for (idx, value) in targets {
        let to = schema.field(idx).data_type();
        let fill = cast(&scalar_to_array(value, existing.num_rows())?, to).map_err(mem_err)?;
        columns[idx] = zip(&mask, &fill, &columns[idx]).map_err(mem_err)?;
    }
    table.replace(RecordBatch::try_new(schema, columns).map_err(mem_err)?);
    Ok(affected)
}

fn delete(table: &mut MemTable, predicate: Option<&Expr>) -> Result<u64> {
    let existing = table.combined()?;
    let mask = predicate_mask(&existing, predicate)?;
    let removed = mask.true_count() as u64;
    let keep = not(&mask).map_err(mem_err)?;
    table.replace(filter_record_batch(&existing, &keep).map_err(mem_err)?);
    Ok(removed)
}

fn check_schema(table: &MemTable, batch: &RecordBatch) -> Result<()> {
    let want = table.schema();
    let got = batch.schema();
    let same = want.fields().len() == got.fields().len()
        && want
            .fields()
            .iter()
            .zip(got.fields().iter())
            .all(|(w, g)| w.data_type() == g.data_type());
    if same {
        Ok(())
    } else {
        Err(FedqError::Execution(format!(
            "batch does not match table {}: expected {:?}, got {:?}",
            table.desc.name,
            want.fields(),
            got.fields()
        )))
    }
}

impl Source for MemorySource {
    fn source_type(&self) -> &str {
        "memory"
    }

    fn setup(&mut self, conf: &SourceConfig) -> Result<()> {
        let Some(tables) = conf.settings.get("tables") else {
            return Ok(());
        };
        let specs: BTreeMap<String, TableSpec> = serde_json::from_value(tables.clone())
            .map_err(|e| FedqError::InvalidConfig(format!("memory tables: {e}")))?;
        let mut out = self.tables.write().expect("memory tables lock poisoned");
        for (name, spec) in specs {
            if !conf.exposes(&name) {
                debug!(table = %name, "memory table not in allow-list, skipped");
                continue;
            }
            let table = MemTable::from_spec(&name, spec)?;
            let rows = table.batches.iter().map(|b| b.num_rows()).sum::<usize>();
            debug!(table = %name, rows, "memory table loaded");
            out.insert(name.to_lowercase(), table);
        }
        Ok(())
    }

    fn tables(&self) -> Vec<String> {
        self.tables
            .read()
            .expect("memory tables lock poisoned")
            .values()
            .map(|t| t.desc.name.clone())
            .collect()
    }

    fn table(&self, name: &str) -> Option<TableDesc> {
        self.tables
            .read()
            .expect("memory tables lock poisoned")
            .get(&name.to_lowercase())
            .map(|t| t.desc.clone())
    }

    fn scan(
        &self,
        table: &str,
        projection: Option<&[String]>,
    ) -> Result<SendableRecordBatchStream> {
        let (schema, batches) = {
            let tables = self.tables.read().expect("memory tables lock poisoned");
            let t = tables
                .get(&table.to_lowercase())
                .ok_or_else(|| FedqError::Planning(format!("unknown table: {table}")))?;
            (t.schema(), t.batches.clone())
        };
        let Some(columns) = projection else {
            return Ok(memory_stream(schema, batches));
        };
        let indices = columns
            .iter()
            .map(|c| {
                schema.index_of(c).map_err(|_| {
                    FedqError::Planning(format!("unknown column {c} in table {table}"))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let projected_schema = Arc::new(schema.project(&indices).map_err(mem_err)?);
        let projected = batches
            .iter()
            .map(|b| b.project(&indices).map_err(mem_err))
            .collect::<Result<Vec<_>>>()?;
        Ok(memory_stream(projected_schema, projected))
    }

    fn mutate(&self, table: &str, mutation: Mutation) -> Result<u64> {
        self.with_table_mut(table, |t| match mutation {
            Mutation::Insert(batch) => {
                check_schema(t, &batch)?;
                let rows = batch.num_rows() as u64;
                if rows > 0 {
                    let batch = RecordBatch::try_new(t.schema(), batch.columns().to_vec())
                        .map_err(mem_err)?;
                    t.batches.push(batch);
                }
                Ok(rows)
            }
            Mutation::Upsert(batch) => {
                check_schema(t, &batch)?;
                let batch =
                    RecordBatch::try_new(t.schema(), batch.columns().to_vec()).map_err(mem_err)?;
                upsert(t, batch)
            }
            Mutation::Update {
                assignments,
                predicate,
            } => update(t, &assignments, predicate.as_ref()),
            Mutation::Delete { predicate } => delete(t, predicate.as_ref()),
        })
    }
}
