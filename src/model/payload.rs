//! Loaded data in its uniform shape.

use crate::error::ApiError;
use ndarray::{ArrayD, Axis, IxDyn};
use serde_json::Value;

/// Data held by a model after loading
///
/// Dense numeric payloads are arrays with the sample axis first; byte arrays
/// carry images and video frames; heterogeneous samples stay as JSON values.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Payload {
    #[default]
    Empty,
    Array(ArrayD<f64>),
    Bytes(ArrayD<u8>),
    Records(Vec<Value>),
}

impl Payload {
    /// Numeric array when every value is numeric and the shape is rectangular,
    /// records otherwise
    pub fn from_values(values: Vec<Value>) -> Self {
        match numeric_rows(&values) {
            Some(array) => Payload::Array(array),
            None => Payload::Records(values),
        }
    }

    /// Length of the sample axis
    pub fn len(&self) -> usize {
        match self {
            Payload::Empty => 0,
            Payload::Array(a) => a.shape().first().copied().unwrap_or(1),
            Payload::Bytes(a) => a.shape().first().copied().unwrap_or(1),
            Payload::Records(r) => r.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keep the given samples, in the given order
    pub fn select(&self, indices: &[usize]) -> Payload {
        match self {
            Payload::Empty => Payload::Empty,
            Payload::Array(a) if a.ndim() > 0 => Payload::Array(a.select(Axis(0), indices)),
            Payload::Bytes(a) if a.ndim() > 0 => Payload::Bytes(a.select(Axis(0), indices)),
            Payload::Records(r) => {
                Payload::Records(indices.iter().filter_map(|&i| r.get(i).cloned()).collect())
            }
            scalar => scalar.clone(),
        }
    }

    /// Rectangular `f64` array
    ///
    /// Records convert when each is a number, a list of numbers, or a mapping
    /// of numbers, and all rows have the same width.
    pub fn to_ndarray(&self) -> Result<ArrayD<f64>, ApiError> {
        match self {
            Payload::Empty => Ok(ArrayD::zeros(IxDyn(&[0]))),
            Payload::Array(a) => Ok(a.clone()),
            Payload::Bytes(a) => Ok(a.mapv(f64::from)),
            Payload::Records(records) => numeric_rows(records).ok_or_else(|| {
                ApiError::DataError("payload is not a rectangular numeric table".to_string())
            }),
        }
    }

    /// Payload as JSON, one element per sample
    pub fn to_values(&self) -> Vec<Value> {
        match self {
            Payload::Empty => Vec::new(),
            Payload::Records(r) => r.clone(),
            Payload::Array(a) => axis_values(a, |v| Value::from(*v)),
            Payload::Bytes(a) => axis_values(a, |v| Value::from(*v)),
        }
    }
}

fn axis_values<T: Clone>(array: &ArrayD<T>, convert: impl Fn(&T) -> Value + Copy) -> Vec<Value> {
    if array.ndim() == 0 {
        return array.iter().map(convert).collect();
    }
    array
        .axis_iter(Axis(0))
        .map(|sample| nested_value(&sample.to_owned(), convert))
        .collect()
}

fn nested_value<T: Clone>(array: &ArrayD<T>, convert: impl Fn(&T) -> Value + Copy) -> Value {
    if array.ndim() == 0 {
        return array.iter().next().map(convert).unwrap_or(Value::Null);
    }
    Value::Array(
        array
            .axis_iter(Axis(0))
            .map(|sub| nested_value(&sub.to_owned(), convert))
            .collect(),
    )
}

fn row_of(value: &Value) -> Option<Vec<f64>> {
    match value {
        Value::Number(n) => n.as_f64().map(|f| vec![f]),
        Value::Array(items) => items.iter().map(Value::as_f64).collect(),
        Value::Object(map) => map.values().map(Value::as_f64).collect(),
        _ => None,
    }
}

fn numeric_rows(values: &[Value]) -> Option<ArrayD<f64>> {
    if values.is_empty() {
        return None;
    }
    let scalar = values.iter().all(Value::is_number);
    let rows: Vec<Vec<f64>> = values.iter().map(row_of).collect::<Option<_>>()?;
    let width = rows[0].len();
    if rows.iter().any(|r| r.len() != width) {
        return None;
    }
    let flat: Vec<f64> = rows.into_iter().flatten().collect();
    let shape = if scalar {
        vec![values.len()]
    } else {
        vec![values.len(), width]
    };
    ArrayD::from_shape_vec(IxDyn(&shape), flat).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_values_prefers_arrays() {
        let scalars = Payload::from_values(vec![json!(1.0), json!(2)]);
        assert_eq!(scalars.to_ndarray().unwrap().shape(), &[2]);

        let rows = Payload::from_values(vec![json!([1, 2]), json!([3, 4])]);
        assert_eq!(rows.to_ndarray().unwrap().shape(), &[2, 2]);

        let ragged = Payload::from_values(vec![json!([1, 2]), json!([3])]);
        assert!(matches!(ragged, Payload::Records(_)));
        assert!(ragged.to_ndarray().is_err());
    }

    #[test]
    fn test_select_along_sample_axis() {
        let payload = Payload::from_values(vec![json!([0, 0]), json!([1, 1]), json!([2, 2])]);
        let picked = payload.select(&[0, 2]);
        assert_eq!(picked.len(), 2);
        assert_eq!(picked.to_values(), vec![json!([0.0, 0.0]), json!([2.0, 2.0])]);
    }
}
