//! Expression compilation and evaluation for execution operators.
//!
//! Input contract:
//! - column names are resolved against the input schema at compile time;
//! - qualified names (`u.id`) fall back to the bare column when the input is
//!   unqualified, and bare names match a unique qualified column.
//!
//! Output contract:
//! - each evaluation returns an `ArrayRef` aligned to input batch row count.

use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, BooleanArray, BooleanBuilder, Float64Builder, Int64Builder, StringBuilder,
};
use arrow::compute::kernels::{
    boolean::{and_kleene, is_not_null, is_null, not, or_kleene},
    cast::cast,
    cmp::{eq, gt, gt_eq, lt, lt_eq, neq},
    numeric::{add, div, mul, sub},
};
use arrow::record_batch::RecordBatch;
use arrow_schema::{DataType, Schema, SchemaRef};
use fedq_common::{FedqError, Result};
use fedq_sql::{BinaryOp, Expr, LiteralValue};

/// Executable expression.
///
/// - the planner hands over `Expr` trees
/// - execution compiles `Expr -> PhysicalExpr` once per operator
/// - evaluation returns Arrow `ArrayRef` aligned with the input RecordBatch length
pub trait PhysicalExpr: Send + Sync {
    /// Static output data type of this expression.
    fn data_type(&self) -> DataType;
    /// Evaluate the expression for every row in `batch`.
    fn evaluate(&self, batch: &RecordBatch) -> Result<ArrayRef>;
}

/// Find the index of `name` in `schema`.
pub fn resolve_column(schema: &Schema, name: &str) -> Result<usize> {
    if let Some(idx) = schema.fields().iter().position(|f| f.name() == name) {
        return Ok(idx);
    }
    if let Some((_, bare)) = name.rsplit_once('.') {
        if let Some(idx) = schema.fields().iter().position(|f| f.name() == bare) {
            return Ok(idx);
        }
    }
    let suffix = format!(".{name}");
    let matches = schema
        .fields()
        .iter()
        .enumerate()
        .filter(|(_, f)| f.name().ends_with(&suffix))
        .map(|(i, _)| i)
        .collect::<Vec<_>>();
    match matches.as_slice() {
        [idx] => Ok(*idx),
        [] => Err(FedqError::Planning(format!("unknown column: {name}"))),
        _ => Err(FedqError::Planning(format!("ambiguous column: {name}"))),
    }
}

/// Compile an `Expr` into a runnable expression over `input_schema`.
pub fn compile_expr(expr: &Expr, input_schema: &SchemaRef) -> Result<Arc<dyn PhysicalExpr>> {
    match expr {
        Expr::Column(name) => {
            let index = resolve_column(input_schema, name)?;
            let dt = input_schema.field(index).data_type().clone();
            Ok(Arc::new(ColumnExpr { index, dt }))
        }

        Expr::Literal(v) => Ok(Arc::new(LiteralExpr {
            v: v.clone(),
            dt: literal_type(v),
        })),

        Expr::Not(e) => {
            let inner = compile_expr(e, input_schema)?;
            Ok(Arc::new(NotExpr { inner }))
        }

        Expr::IsNull(e) => {
            let inner = compile_expr(e, input_schema)?;
            Ok(Arc::new(NullCheckExpr {
                inner,
                negated: false,
            }))
        }

        Expr::IsNotNull(e) => {
            let inner = compile_expr(e, input_schema)?;
            Ok(Arc::new(NullCheckExpr {
                inner,
                negated: true,
            }))
        }

        Expr::And(a, b) => {
            let left = compile_expr(a, input_schema)?;
            let right = compile_expr(b, input_schema)?;
            Ok(Arc::new(BoolBinaryExpr {
                left,
                right,
                op: BoolOp::And,
            }))
        }

        Expr::Or(a, b) => {
            let left = compile_expr(a, input_schema)?;
            let right = compile_expr(b, input_schema)?;
            Ok(Arc::new(BoolBinaryExpr {
                left,
                right,
                op: BoolOp::Or,
            }))
        }

        Expr::BinaryOp { left, op, right } => {
            let l = compile_expr(left, input_schema)?;
            let r = compile_expr(right, input_schema)?;
            let common = coerce_types(*op, &l.data_type(), &r.data_type())?;
            let out = if op.is_comparison() {
                DataType::Boolean
            } else {
                common.clone()
            };

            Ok(Arc::new(BinaryExpr {
                left: with_cast(l, &common),
                right: with_cast(r, &common),
                op: *op,
                out,
            }))
        }
    }
}

/// Evaluate a compiled predicate into a selection mask. NULL selects nothing.
pub fn evaluate_predicate(pred: &dyn PhysicalExpr, batch: &RecordBatch) -> Result<BooleanArray> {
    let arr = pred.evaluate(batch)?;
    if arr.data_type() == &DataType::Null {
        return Ok(BooleanArray::from(vec![false; batch.num_rows()]));
    }
    let mask = arr
        .as_any()
        .downcast_ref::<BooleanArray>()
        .ok_or_else(|| {
            FedqError::Execution(format!(
                "predicate must be boolean, got {:?}",
                arr.data_type()
            ))
        })?;
    Ok(mask.clone())
}

/// Arrow type a literal evaluates to.
pub fn literal_type(v: &LiteralValue) -> DataType {
    match v {
        LiteralValue::Int64(_) => DataType::Int64,
        LiteralValue::Float64(_) => DataType::Float64,
        LiteralValue::Utf8(_) => DataType::Utf8,
        LiteralValue::Boolean(_) => DataType::Boolean,
        LiteralValue::Null => DataType::Null,
    }
}

/// Repeat a literal `len` times.
pub fn scalar_to_array(v: &LiteralValue, len: usize) -> Result<ArrayRef> {
    match v {
        LiteralValue::Int64(x) => {
            let mut b = Int64Builder::with_capacity(len);
            for _ in 0..len {
                b.append_value(*x);
            }
            Ok(Arc::new(b.finish()))
        }
        LiteralValue::Float64(x) => {
            let mut b = Float64Builder::with_capacity(len);
            for _ in 0..len {
                b.append_value(*x);
            }
            Ok(Arc::new(b.finish()))
        }
        LiteralValue::Boolean(x) => {
            let mut b = BooleanBuilder::with_capacity(len);
            for _ in 0..len {
                b.append_value(*x);
            }
            Ok(Arc::new(b.finish()))
        }
        LiteralValue::Utf8(s) => {
            let mut b = StringBuilder::with_capacity(len, s.len() * len);
            for _ in 0..len {
                b.append_value(s);
            }
            Ok(Arc::new(b.finish()))
        }
        LiteralValue::Null => Ok(arrow::array::new_null_array(&DataType::Null, len)),
    }
}

/// Build a column of literals cast to `to_type`.
pub fn literals_to_array(values: &[LiteralValue], to_type: &DataType) -> Result<ArrayRef> {
    let mut parts = Vec::with_capacity(values.len());
    for v in values {
        let one = scalar_to_array(v, 1)?;
        parts.push(cast(&one, to_type).map_err(|e| {
            FedqError::Execution(format!("cannot convert literal {v} to {to_type:?}: {e}"))
        })?);
    }
    if parts.is_empty() {
        return Ok(arrow::array::new_empty_array(to_type));
    }
    let refs = parts.iter().map(|a| a.as_ref()).collect::<Vec<_>>();
    arrow::compute::concat(&refs)
        .map_err(|e| FedqError::Execution(format!("concat literals failed: {e}")))
}

// =====================
// Standard expressions
// =====================

struct ColumnExpr {
    index: usize,
    dt: DataType,
}

impl PhysicalExpr for ColumnExpr {
    fn data_type(&self) -> DataType {
        self.dt.clone()
    }

    fn evaluate(&self, batch: &RecordBatch) -> Result<ArrayRef> {
        Ok(batch.column(self.index).clone())
    }
}

struct LiteralExpr {
    v: LiteralValue,
    dt: DataType,
}

impl PhysicalExpr for LiteralExpr {
    fn data_type(&self) -> DataType {
        self.dt.clone()
    }

    fn evaluate(&self, batch: &RecordBatch) -> Result<ArrayRef> {
        scalar_to_array(&self.v, batch.num_rows())
    }
}

struct CastExpr {
    inner: Arc<dyn PhysicalExpr>,
    to_type: DataType,
}

impl PhysicalExpr for CastExpr {
    fn data_type(&self) -> DataType {
        self.to_type.clone()
    }

    fn evaluate(&self, batch: &RecordBatch) -> Result<ArrayRef> {
        let arr = self.inner.evaluate(batch)?;
        cast(&arr, &self.to_type).map_err(|e| FedqError::Execution(format!("cast failed: {e}")))
    }
}

struct NotExpr {
    inner: Arc<dyn PhysicalExpr>,
}

impl PhysicalExpr for NotExpr {
    fn data_type(&self) -> DataType {
        DataType::Boolean
    }

    fn evaluate(&self, batch: &RecordBatch) -> Result<ArrayRef> {
        let arr = self.inner.evaluate(batch)?;
        let b = as_boolean(&arr, "NOT")?;
        let out = not(&b).map_err(|e| FedqError::Execution(format!("not failed: {e}")))?;
        Ok(Arc::new(out))
    }
}

struct NullCheckExpr {
    inner: Arc<dyn PhysicalExpr>,
    negated: bool,
}

impl PhysicalExpr for NullCheckExpr {
    fn data_type(&self) -> DataType {
        DataType::Boolean
    }

    fn evaluate(&self, batch: &RecordBatch) -> Result<ArrayRef> {
        let arr = self.inner.evaluate(batch)?;
        let out = if self.negated {
            is_not_null(arr.as_ref())
        } else {
            is_null(arr.as_ref())
        }
        .map_err(|e| FedqError::Execution(format!("null check failed: {e}")))?;
        Ok(Arc::new(out))
    }
}

#[derive(Clone, Copy)]
enum BoolOp {
    And,
    Or,
}

struct BoolBinaryExpr {
    left: Arc<dyn PhysicalExpr>,
    right: Arc<dyn PhysicalExpr>,
    op: BoolOp,
}

impl PhysicalExpr for BoolBinaryExpr {
    fn data_type(&self) -> DataType {
        DataType::Boolean
    }

    fn evaluate(&self, batch: &RecordBatch) -> Result<ArrayRef> {
        let l = self.left.evaluate(batch)?;
        let r = self.right.evaluate(batch)?;
        let lb = as_boolean(&l, "AND/OR")?;
        let rb = as_boolean(&r, "AND/OR")?;

        let out = match self.op {
            BoolOp::And => and_kleene(&lb, &rb),
            BoolOp::Or => or_kleene(&lb, &rb),
        }
        .map_err(|e| FedqError::Execution(format!("boolean kernel failed: {e}")))?;

        Ok(Arc::new(out))
    }
}

struct BinaryExpr {
    left: Arc<dyn PhysicalExpr>,
    right: Arc<dyn PhysicalExpr>,
    op: BinaryOp,
    out: DataType,
}

impl PhysicalExpr for BinaryExpr {
    fn data_type(&self) -> DataType {
        self.out.clone()
    }

    fn evaluate(&self, batch: &RecordBatch) -> Result<ArrayRef> {
        let l = self.left.evaluate(batch)?;
        let r = self.right.evaluate(batch)?;

        if l.data_type() == &DataType::Null {
            return Ok(arrow::array::new_null_array(&self.out, batch.num_rows()));
        }

        let res: ArrayRef = match self.op {
            BinaryOp::Plus => add(&l, &r).map_err(arith_err)?,
            BinaryOp::Minus => sub(&l, &r).map_err(arith_err)?,
            BinaryOp::Multiply => mul(&l, &r).map_err(arith_err)?,
            BinaryOp::Divide => div(&l, &r).map_err(arith_err)?,
            BinaryOp::Eq => Arc::new(eq(&l, &r).map_err(cmp_err)?),
            BinaryOp::NotEq => Arc::new(neq(&l, &r).map_err(cmp_err)?),
            BinaryOp::Lt => Arc::new(lt(&l, &r).map_err(cmp_err)?),
            BinaryOp::LtEq => Arc::new(lt_eq(&l, &r).map_err(cmp_err)?),
            BinaryOp::Gt => Arc::new(gt(&l, &r).map_err(cmp_err)?),
            BinaryOp::GtEq => Arc::new(gt_eq(&l, &r).map_err(cmp_err)?),
        };
        Ok(res)
    }
}

// ------------------ helpers ------------------

fn arith_err(e: arrow_schema::ArrowError) -> FedqError {
    FedqError::Execution(format!("arith kernel failed: {e}"))
}

fn cmp_err(e: arrow_schema::ArrowError) -> FedqError {
    FedqError::Execution(format!("cmp kernel failed: {e}"))
}

fn as_boolean(arr: &ArrayRef, what: &str) -> Result<BooleanArray> {
    if arr.data_type() == &DataType::Null {
        return Ok(BooleanArray::from(vec![None; arr.len()]));
    }
    arr.as_any()
        .downcast_ref::<BooleanArray>()
        .cloned()
        .ok_or_else(|| FedqError::Execution(format!("{what} expects boolean")))
}

fn with_cast(e: Arc<dyn PhysicalExpr>, to: &DataType) -> Arc<dyn PhysicalExpr> {
    if &e.data_type() == to || to == &DataType::Null {
        e
    } else {
        Arc::new(CastExpr {
            inner: e,
            to_type: to.clone(),
        })
    }
}

fn is_integer(dt: &DataType) -> bool {
    matches!(
        dt,
        DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
    )
}

fn is_float(dt: &DataType) -> bool {
    matches!(dt, DataType::Float16 | DataType::Float32 | DataType::Float64)
}

fn is_string(dt: &DataType) -> bool {
    matches!(dt, DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View)
}

/// Common operand type for a binary operator.
fn coerce_types(op: BinaryOp, l: &DataType, r: &DataType) -> Result<DataType> {
    let arithmetic = !op.is_comparison();
    let numeric = |dt: &DataType| is_integer(dt) || is_float(dt);

    let common = if l == &DataType::Null {
        r.clone()
    } else if r == &DataType::Null {
        l.clone()
    } else if numeric(l) && numeric(r) {
        if is_float(l) || is_float(r) {
            DataType::Float64
        } else if l == r {
            l.clone()
        } else {
            DataType::Int64
        }
    } else if is_string(l) && is_string(r) {
        DataType::Utf8
    } else if l == r {
        l.clone()
    } else {
        return Err(FedqError::Planning(format!(
            "cannot apply '{}' to {l:?} and {r:?}",
            op.symbol()
        )));
    };

    if arithmetic && common != DataType::Null && !numeric(&common) {
        return Err(FedqError::Unsupported(format!(
            "arithmetic '{}' not supported for {common:?}",
            op.symbol()
        )));
    }
    Ok(common)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::array::{Array, BooleanArray, Float64Array, Int32Array, Int64Array, StringArray};
    use arrow::record_batch::RecordBatch;
    use arrow_schema::{DataType, Field, Schema};
    use fedq_sql::{BinaryOp, Expr, LiteralValue};

    use super::{compile_expr, evaluate_predicate, literals_to_array, resolve_column};

    fn batch() -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int32, false),
            Field::new("score", DataType::Float64, true),
            Field::new("name", DataType::Utf8, true),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int32Array::from(vec![1, 2, 3])),
                Arc::new(Float64Array::from(vec![Some(0.5), None, Some(2.5)])),
                Arc::new(StringArray::from(vec![Some("a"), Some("b"), None])),
            ],
        )
        .expect("batch")
    }

    fn mask(expr: Expr, batch: &RecordBatch) -> BooleanArray {
        let compiled = compile_expr(&expr, batch.schema_ref()).expect("compile");
        evaluate_predicate(compiled.as_ref(), batch).expect("evaluate")
    }

    #[test]
    fn mixed_numeric_comparison_coerces() {
        let b = batch();
        let out = mask(Expr::col("id").gt(Expr::lit(1.5)), &b);
        assert_eq!(out, BooleanArray::from(vec![false, true, true]));

        let out = mask(Expr::col("score").lt(Expr::lit(1_i64)), &b);
        assert_eq!(out, BooleanArray::from(vec![Some(true), None, Some(false)]));
    }

    #[test]
    fn null_checks_and_string_equality() {
        let b = batch();
        let out = mask(Expr::IsNull(Box::new(Expr::col("score"))), &b);
        assert_eq!(out, BooleanArray::from(vec![false, true, false]));

        let out = mask(Expr::col("name").equals(Expr::lit("b")), &b);
        assert_eq!(out, BooleanArray::from(vec![Some(false), Some(true), None]));
    }

    #[test]
    fn arithmetic_promotes_integers() {
        let b = batch();
        let expr = Expr::binary(Expr::col("id"), BinaryOp::Multiply, Expr::lit(10_i64));
        let compiled = compile_expr(&expr, b.schema_ref()).expect("compile");
        assert_eq!(compiled.data_type(), DataType::Int64);
        let out = compiled.evaluate(&b).expect("evaluate");
        let out = out.as_any().downcast_ref::<Int64Array>().expect("int64");
        assert_eq!(out.values().to_vec(), vec![10, 20, 30]);
    }

    #[test]
    fn string_arithmetic_is_rejected() {
        let b = batch();
        let expr = Expr::binary(Expr::col("name"), BinaryOp::Plus, Expr::lit("x"));
        assert!(compile_expr(&expr, b.schema_ref()).is_err());
    }

    #[test]
    fn qualified_and_bare_names_resolve() {
        let plain = Schema::new(vec![Field::new("id", DataType::Int64, false)]);
        assert_eq!(resolve_column(&plain, "users.id").expect("qualified"), 0);

        let joined = Schema::new(vec![
            Field::new("u.id", DataType::Int64, false),
            Field::new("u.name", DataType::Utf8, false),
            Field::new("o.id", DataType::Int64, false),
        ]);
        assert_eq!(resolve_column(&joined, "name").expect("bare"), 1);
        assert_eq!(resolve_column(&joined, "o.id").expect("exact"), 2);
        let err = resolve_column(&joined, "id").expect_err("ambiguous");
        assert!(err.to_string().contains("ambiguous"));
        assert!(resolve_column(&joined, "missing").is_err());
    }

    #[test]
    fn literal_columns_cast_to_target_type() {
        let arr = literals_to_array(
            &[LiteralValue::Int64(1), LiteralValue::Null, LiteralValue::Int64(3)],
            &DataType::Float64,
        )
        .expect("literals");
        let arr = arr.as_any().downcast_ref::<Float64Array>().expect("f64");
        assert_eq!(arr.len(), 3);
        assert!(arr.is_null(1));
        assert_eq!(arr.value(2), 3.0);
    }
}
