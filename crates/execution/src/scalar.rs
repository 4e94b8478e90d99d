//! Single values pulled out of Arrow arrays, used by grouping and aggregation.

use std::cmp::Ordering;
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, BooleanArray, BooleanBuilder, Float64Array, Float64Builder, Int64Array,
    Int64Builder, StringArray, StringBuilder,
};
use arrow::compute::kernels::cast::cast;
use arrow_schema::DataType;
use fedq_common::{FedqError, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    Null,
    Int64(i64),
    Float64(f64),
    Utf8(String),
    Boolean(bool),
}

impl ScalarValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ScalarValue::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ScalarValue::Int64(v) => Some(*v as f64),
            ScalarValue::Float64(v) => Some(*v),
            _ => None,
        }
    }

    /// Ordering between two non-null values of the same kind.
    pub fn partial_cmp_value(&self, other: &ScalarValue) -> Option<Ordering> {
        match (self, other) {
            (ScalarValue::Int64(a), ScalarValue::Int64(b)) => Some(a.cmp(b)),
            (ScalarValue::Float64(a), ScalarValue::Float64(b)) => a.partial_cmp(b),
            (ScalarValue::Utf8(a), ScalarValue::Utf8(b)) => Some(a.cmp(b)),
            (ScalarValue::Boolean(a), ScalarValue::Boolean(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

/// Type grouping and aggregation compute in: wide integers, doubles, strings.
pub fn normalized_type(dt: &DataType) -> DataType {
    match dt {
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32
        | DataType::UInt64 => DataType::Int64,
        DataType::Float16 | DataType::Float32 | DataType::Float64 => DataType::Float64,
        DataType::Boolean => DataType::Boolean,
        DataType::Null => DataType::Null,
        _ => DataType::Utf8,
    }
}

/// Cast `arr` to its normalized type.
pub fn normalize_array(arr: &ArrayRef) -> Result<ArrayRef> {
    let to = normalized_type(arr.data_type());
    if &to == arr.data_type() {
        return Ok(arr.clone());
    }
    cast(arr, &to).map_err(|e| {
        FedqError::Execution(format!("normalize {:?} failed: {e}", arr.data_type()))
    })
}

/// Value at `row` of a normalized array.
pub fn scalar_at(arr: &ArrayRef, row: usize) -> Result<ScalarValue> {
    if arr.is_null(row) {
        return Ok(ScalarValue::Null);
    }
    let out = match arr.data_type() {
        DataType::Int64 => arr
            .as_any()
            .downcast_ref::<Int64Array>()
            .map(|a| ScalarValue::Int64(a.value(row))),
        DataType::Float64 => arr
            .as_any()
            .downcast_ref::<Float64Array>()
            .map(|a| ScalarValue::Float64(a.value(row))),
        DataType::Utf8 => arr
            .as_any()
            .downcast_ref::<StringArray>()
            .map(|a| ScalarValue::Utf8(a.value(row).to_string())),
        DataType::Boolean => arr
            .as_any()
            .downcast_ref::<BooleanArray>()
            .map(|a| ScalarValue::Boolean(a.value(row))),
        DataType::Null => Some(ScalarValue::Null),
        other => {
            return Err(FedqError::Execution(format!(
                "unexpected array type {other:?}; normalize first"
            )));
        }
    };
    out.ok_or_else(|| FedqError::Execution("array downcast failed".to_string()))
}

/// Build an array of `dt` from scalars. Mismatched values become errors.
pub fn scalars_to_array(values: &[ScalarValue], dt: &DataType) -> Result<ArrayRef> {
    let mismatch =
        |v: &ScalarValue| FedqError::Execution(format!("value {v:?} does not fit {dt:?}"));
    match dt {
        DataType::Int64 => {
            let mut b = Int64Builder::with_capacity(values.len());
            for v in values {
                match v {
                    ScalarValue::Null => b.append_null(),
                    ScalarValue::Int64(x) => b.append_value(*x),
                    other => return Err(mismatch(other)),
                }
            }
            Ok(Arc::new(b.finish()))
        }
        DataType::Float64 => {
            let mut b = Float64Builder::with_capacity(values.len());
            for v in values {
                match v {
                    ScalarValue::Null => b.append_null(),
                    other => match other.as_f64() {
                        Some(x) => b.append_value(x),
                        None => return Err(mismatch(other)),
                    },
                }
            }
            Ok(Arc::new(b.finish()))
        }
        DataType::Utf8 => {
            let mut b = StringBuilder::new();
            for v in values {
                match v {
                    ScalarValue::Null => b.append_null(),
                    ScalarValue::Utf8(s) => b.append_value(s),
                    other => return Err(mismatch(other)),
                }
            }
            Ok(Arc::new(b.finish()))
        }
        DataType::Boolean => {
            let mut b = BooleanBuilder::with_capacity(values.len());
            for v in values {
                match v {
                    ScalarValue::Null => b.append_null(),
                    ScalarValue::Boolean(x) => b.append_value(*x),
                    other => return Err(mismatch(other)),
                }
            }
            Ok(Arc::new(b.finish()))
        }
        DataType::Null => Ok(arrow::array::new_null_array(&DataType::Null, values.len())),
        other => Err(FedqError::Unsupported(format!(
            "cannot build {other:?} from scalar values"
        ))),
    }
}
