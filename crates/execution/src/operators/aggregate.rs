use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use arrow::array::ArrayRef;
use arrow::record_batch::RecordBatch;
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use fedq_common::{FedqError, Result};
use fedq_sql::AggFunc;
use futures::future::BoxFuture;

use crate::channel::TaskSender;
use crate::context::SharedTaskContext;
use crate::expressions::resolve_column;
use crate::scalar::{ScalarValue, normalize_array, normalized_type, scalar_at, scalars_to_array};
use crate::task::{BoxedTask, Task, close_input, spawn_task, take_input};

/// One aggregate output column.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateSpec {
    pub func: AggFunc,
    /// Input column; `None` is `COUNT(*)`.
    pub arg: Option<String>,
    pub output_name: String,
}

#[derive(Debug, Clone)]
enum Accumulator {
    Count(i64),
    SumInt(Option<i64>),
    SumFloat(Option<f64>),
    Min(ScalarValue),
    Max(ScalarValue),
    Avg { sum: f64, count: i64 },
}

impl Accumulator {
    fn new(func: AggFunc, arg_type: &DataType) -> Self {
        match func {
            AggFunc::Count => Accumulator::Count(0),
            AggFunc::Sum if arg_type == &DataType::Int64 => Accumulator::SumInt(None),
            AggFunc::Sum => Accumulator::SumFloat(None),
            AggFunc::Min => Accumulator::Min(ScalarValue::Null),
            AggFunc::Max => Accumulator::Max(ScalarValue::Null),
            AggFunc::Avg => Accumulator::Avg { sum: 0.0, count: 0 },
        }
    }

    /// `v` is `None` for `COUNT(*)`, where every row counts.
    fn update(&mut self, v: Option<&ScalarValue>) -> Result<()> {
        match self {
            Accumulator::Count(n) => {
                if v.is_none_or(|v| !v.is_null()) {
                    *n += 1;
                }
            }
            Accumulator::SumInt(acc) => {
                if let Some(ScalarValue::Int64(x)) = v {
                    let next = acc.unwrap_or(0).checked_add(*x).ok_or_else(|| {
                        FedqError::Execution("integer overflow in SUM".to_string())
                    })?;
                    *acc = Some(next);
                }
            }
            Accumulator::SumFloat(acc) => {
                if let Some(x) = v.and_then(ScalarValue::as_f64) {
                    *acc = Some(acc.unwrap_or(0.0) + x);
                }
            }
            Accumulator::Min(cur) => keep_extreme(cur, v, Ordering::Less),
            Accumulator::Max(cur) => keep_extreme(cur, v, Ordering::Greater),
            Accumulator::Avg { sum, count } => {
                if let Some(x) = v.and_then(ScalarValue::as_f64) {
                    *sum += x;
                    *count += 1;
                }
            }
        }
        Ok(())
    }

    fn finish(&self) -> ScalarValue {
        match self {
            Accumulator::Count(n) => ScalarValue::Int64(*n),
            Accumulator::SumInt(v) => v.map(ScalarValue::Int64).unwrap_or(ScalarValue::Null),
            Accumulator::SumFloat(v) => v.map(ScalarValue::Float64).unwrap_or(ScalarValue::Null),
            Accumulator::Min(v) | Accumulator::Max(v) => v.clone(),
            Accumulator::Avg { sum, count } => {
                if *count == 0 {
                    ScalarValue::Null
                } else {
                    ScalarValue::Float64(*sum / *count as f64)
                }
            }
        }
    }
}

fn keep_extreme(cur: &mut ScalarValue, v: Option<&ScalarValue>, want: Ordering) {
    let Some(v) = v.filter(|v| !v.is_null()) else {
        return;
    };
    if cur.is_null() || v.partial_cmp_value(cur) == Some(want) {
        *cur = v.clone();
    }
}

struct Group {
    keys: Vec<ScalarValue>,
    accs: Vec<Accumulator>,
}

/// Hash aggregation: GROUP BY columns plus COUNT/SUM/MIN/MAX/AVG.
///
/// Groups are emitted in first-seen order once the input is exhausted.
pub struct AggregateTask {
    input: Option<BoxedTask>,
    group_cols: Vec<usize>,
    arg_cols: Vec<Option<usize>>,
    specs: Vec<AggregateSpec>,
    arg_types: Vec<DataType>,
    schema: SchemaRef,
}

struct BoundAggregate {
    group_cols: Vec<usize>,
    arg_cols: Vec<Option<usize>>,
    arg_types: Vec<DataType>,
    schema: SchemaRef,
}

fn bind_aggregate(
    input_schema: &SchemaRef,
    group_by: &[String],
    specs: &[AggregateSpec],
) -> Result<BoundAggregate> {
    let mut fields = Vec::new();
    let mut group_cols = Vec::new();
    for name in group_by {
        let idx = resolve_column(input_schema, name)?;
        let f = input_schema.field(idx);
        fields.push(Field::new(f.name(), normalized_type(f.data_type()), true));
        group_cols.push(idx);
    }

    let mut arg_cols = Vec::new();
    let mut arg_types = Vec::new();
    for spec in specs {
        let (idx, dt) = match &spec.arg {
            Some(arg) => {
                let idx = resolve_column(input_schema, arg)?;
                (Some(idx), normalized_type(input_schema.field(idx).data_type()))
            }
            None if spec.func == AggFunc::Count => (None, DataType::Null),
            None => {
                return Err(FedqError::Planning(format!(
                    "{}(*) is not valid",
                    spec.func.name()
                )));
            }
        };
        let out_type = match spec.func {
            AggFunc::Count => DataType::Int64,
            AggFunc::Avg => DataType::Float64,
            AggFunc::Sum if dt == DataType::Int64 => DataType::Int64,
            AggFunc::Sum if dt == DataType::Float64 || dt == DataType::Null => DataType::Float64,
            AggFunc::Sum => {
                return Err(FedqError::Planning(format!(
                    "sum over non-numeric column {}",
                    spec.arg.as_deref().unwrap_or("*")
                )));
            }
            AggFunc::Min | AggFunc::Max => dt.clone(),
        };
        if spec.func == AggFunc::Avg
            && !matches!(dt, DataType::Int64 | DataType::Float64 | DataType::Null)
        {
            return Err(FedqError::Planning(format!(
                "avg over non-numeric column {}",
                spec.arg.as_deref().unwrap_or("*")
            )));
        }
        fields.push(Field::new(&spec.output_name, out_type, spec.func != AggFunc::Count));
        arg_cols.push(idx);
        arg_types.push(dt);
    }

    Ok(BoundAggregate {
        group_cols,
        arg_cols,
        arg_types,
        schema: Arc::new(Schema::new(fields)),
    })
}

/// Output schema of an aggregate: group columns, then one column per spec.
pub fn aggregate_output_schema(
    input_schema: &SchemaRef,
    group_by: &[String],
    specs: &[AggregateSpec],
) -> Result<SchemaRef> {
    bind_aggregate(input_schema, group_by, specs).map(|b| b.schema)
}

impl AggregateTask {
    pub fn try_new(
        input: BoxedTask,
        input_schema: &SchemaRef,
        group_by: &[String],
        specs: Vec<AggregateSpec>,
    ) -> Result<Self> {
        let bound = bind_aggregate(input_schema, group_by, &specs)?;
        Ok(Self {
            input: Some(input),
            group_cols: bound.group_cols,
            arg_cols: bound.arg_cols,
            specs,
            arg_types: bound.arg_types,
            schema: bound.schema,
        })
    }

    pub fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn new_group(&self, keys: Vec<ScalarValue>) -> Group {
        Group {
            keys,
            accs: self
                .specs
                .iter()
                .zip(&self.arg_types)
                .map(|(s, dt)| Accumulator::new(s.func, dt))
                .collect(),
        }
    }

    fn accumulate(
        &self,
        batch: &RecordBatch,
        groups: &mut Vec<Group>,
        index: &mut HashMap<String, usize>,
    ) -> Result<()> {
        let keys = self
            .group_cols
            .iter()
            .map(|i| normalize_array(batch.column(*i)))
            .collect::<Result<Vec<ArrayRef>>>()?;
        let args = self
            .arg_cols
            .iter()
            .map(|i| i.map(|i| normalize_array(batch.column(i))).transpose())
            .collect::<Result<Vec<Option<ArrayRef>>>>()?;

        for row in 0..batch.num_rows() {
            let key_values = keys
                .iter()
                .map(|k| scalar_at(k, row))
                .collect::<Result<Vec<_>>>()?;
            let key = group_key(&key_values);
            let slot = match index.get(&key) {
                Some(slot) => *slot,
                None => {
                    groups.push(self.new_group(key_values));
                    index.insert(key, groups.len() - 1);
                    groups.len() - 1
                }
            };
            let group = &mut groups[slot];
            for (acc, arg) in group.accs.iter_mut().zip(&args) {
                match arg {
                    Some(arr) => acc.update(Some(&scalar_at(arr, row)?))?,
                    None => acc.update(None)?,
                }
            }
        }
        Ok(())
    }

    fn output(&self, mut groups: Vec<Group>) -> Result<Option<RecordBatch>> {
        if groups.is_empty() {
            if !self.group_cols.is_empty() {
                return Ok(None);
            }
            groups.push(self.new_group(Vec::new()));
        }
        let mut columns = Vec::with_capacity(self.schema.fields().len());
        for (i, field) in self.schema.fields().iter().enumerate() {
            let values = if i < self.group_cols.len() {
                groups.iter().map(|g| g.keys[i].clone()).collect::<Vec<_>>()
            } else {
                let a = i - self.group_cols.len();
                groups.iter().map(|g| g.accs[a].finish()).collect::<Vec<_>>()
            };
            columns.push(scalars_to_array(&values, field.data_type())?);
        }
        RecordBatch::try_new(self.schema.clone(), columns)
            .map(Some)
            .map_err(|e| FedqError::Execution(format!("aggregate output failed: {e}")))
    }
}

fn group_key(values: &[ScalarValue]) -> String {
    let mut key = String::new();
    for v in values {
        match v {
            ScalarValue::Null => key.push_str("\u{0}N"),
            ScalarValue::Int64(x) => key.push_str(&format!("\u{0}i{x}")),
            ScalarValue::Float64(x) => key.push_str(&format!("\u{0}f{}", x.to_bits())),
            ScalarValue::Utf8(s) => key.push_str(&format!("\u{0}s{}:{s}", s.len())),
            ScalarValue::Boolean(b) => key.push_str(&format!("\u{0}b{b}")),
        }
    }
    key
}

impl Task for AggregateTask {
    fn name(&self) -> &str {
        "aggregate"
    }

    fn run(&mut self, ctx: SharedTaskContext, mut out: TaskSender) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let input = take_input(&mut self.input, "aggregate")?;
            let mut child = spawn_task(input, ctx.clone());
            let mut groups = Vec::new();
            let mut index = HashMap::new();
            while let Some(batch) = child.recv_for(&out).await {
                self.accumulate(&batch, &mut groups, &mut index)?;
            }
            child.finish().await?;
            if ctx.is_cancelled() || out.is_detached() {
                return Ok(());
            }
            if let Some(batch) = self.output(groups)? {
                out.send(batch).await;
            }
            Ok(())
        })
    }

    fn close(&mut self) -> Result<()> {
        close_input(&mut self.input)
    }
}
