//! Tensor values and the `torch` capability

use serde_json::Value as JsonValue;
use std::any::Any;
use studio_script::{Builtin, CallArgs, HostObject, Interpreter, ScriptError, Value};

use crate::backend::softmax;

type ScriptResult<T> = studio_script::Result<T>;

/// Element type reported by `dtype` and used when converting back to lists
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DType {
    Float,
    Long,
}

/// Dense row-major tensor
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    data: Vec<f32>,
    shape: Vec<usize>,
    dtype: DType,
}

impl Tensor {
    pub fn new(data: Vec<f32>, shape: Vec<usize>) -> ScriptResult<Self> {
        Self::with_dtype(data, shape, DType::Float)
    }

    pub fn with_dtype(data: Vec<f32>, shape: Vec<usize>, dtype: DType) -> ScriptResult<Self> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(ScriptError::value_error(format!(
                "shape {:?} is invalid for input of size {}",
                shape,
                data.len()
            )));
        }
        Ok(Self { data, shape, dtype })
    }

    pub fn scalar(value: f32, dtype: DType) -> Self {
        Self {
            data: vec![value],
            shape: Vec::new(),
            dtype,
        }
    }

    /// Stack equally sized rows into a 2-D tensor
    pub fn from_rows(rows: &[Vec<f32>], dtype: DType) -> ScriptResult<Self> {
        let width = rows.first().map(Vec::len).unwrap_or(0);
        if rows.iter().any(|row| row.len() != width) {
            return Err(ScriptError::value_error("rows must have equal length"));
        }
        let data = rows.iter().flatten().copied().collect();
        Self::with_dtype(data, vec![rows.len(), width], dtype)
    }

    /// Build from a (possibly nested) list of numbers
    pub fn from_value(value: &Value) -> ScriptResult<Self> {
        if let Value::Host(object) = value {
            if let Some(tensor) = object.as_any().downcast_ref::<Tensor>() {
                return Ok(tensor.clone());
            }
        }

        let mut data = Vec::new();
        let mut shape = Vec::new();
        let mut all_ints = true;
        flatten(value, 0, &mut shape, &mut data, &mut all_ints)?;
        let dtype = if all_ints && !data.is_empty() {
            DType::Long
        } else {
            DType::Float
        };
        Self::with_dtype(data, shape, dtype)
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn numel(&self) -> usize {
        self.data.len()
    }

    /// Resolve a possibly negative dimension
    fn dim_index(&self, dim: i64) -> ScriptResult<usize> {
        let rank = self.shape.len() as i64;
        let resolved = if dim < 0 { dim + rank } else { dim };
        if rank == 0 || resolved < 0 || resolved >= rank {
            return Err(ScriptError::raised(
                "IndexError",
                format!("dimension {} out of range for tensor of rank {}", dim, rank),
            ));
        }
        Ok(resolved as usize)
    }

    /// Split the layout around `dim` into (outer, length, inner)
    fn axes(&self, dim: usize) -> (usize, usize, usize) {
        let outer = self.shape[..dim].iter().product();
        let inner = self.shape[dim + 1..].iter().product();
        (outer, self.shape[dim], inner)
    }

    /// Apply `reduce` to every line along `dim`
    fn reduce<F>(&self, dim: usize, dtype: DType, reduce: F) -> Tensor
    where
        F: Fn(&[f32]) -> f32,
    {
        let (outer, length, inner) = self.axes(dim);
        let mut data = Vec::with_capacity(outer * inner);
        let mut line = Vec::with_capacity(length);
        for o in 0..outer {
            for i in 0..inner {
                line.clear();
                line.extend((0..length).map(|k| self.data[(o * length + k) * inner + i]));
                data.push(reduce(&line));
            }
        }
        let mut shape = self.shape.clone();
        shape.remove(dim);
        Tensor { data, shape, dtype }
    }

    pub fn mean(&self, dim: Option<i64>) -> ScriptResult<Tensor> {
        match dim {
            None => Ok(Tensor::scalar(mean_of(&self.data), DType::Float)),
            Some(dim) => Ok(self.reduce(self.dim_index(dim)?, DType::Float, mean_of)),
        }
    }

    pub fn sum(&self, dim: Option<i64>) -> ScriptResult<Tensor> {
        let total = |line: &[f32]| line.iter().sum::<f32>();
        match dim {
            None => Ok(Tensor::scalar(total(&self.data), self.dtype)),
            Some(dim) => Ok(self.reduce(self.dim_index(dim)?, self.dtype, total)),
        }
    }

    pub fn argmax(&self, dim: Option<i64>) -> ScriptResult<Tensor> {
        if self.data.is_empty() {
            return Err(ScriptError::value_error("argmax of an empty tensor"));
        }
        match dim {
            None => Ok(Tensor::scalar(argmax_of(&self.data), DType::Long)),
            Some(dim) => Ok(self.reduce(self.dim_index(dim)?, DType::Long, argmax_of)),
        }
    }

    pub fn softmax(&self, dim: i64) -> ScriptResult<Tensor> {
        let dim = self.dim_index(dim)?;
        let (outer, length, inner) = self.axes(dim);
        let mut data = self.data.clone();
        let mut line = Vec::with_capacity(length);
        for o in 0..outer {
            for i in 0..inner {
                line.clear();
                line.extend((0..length).map(|k| self.data[(o * length + k) * inner + i]));
                for (k, p) in softmax(&line).into_iter().enumerate() {
                    data[(o * length + k) * inner + i] = p;
                }
            }
        }
        Tensor::new(data, self.shape.clone())
    }

    pub fn squeeze(&self) -> Tensor {
        Tensor {
            data: self.data.clone(),
            shape: self.shape.iter().copied().filter(|d| *d != 1).collect(),
            dtype: self.dtype,
        }
    }

    /// Sub-tensor along the first axis
    pub fn row(&self, index: i64) -> ScriptResult<Tensor> {
        let first = *self
            .shape
            .first()
            .ok_or_else(|| ScriptError::type_error("invalid index of a 0-dim tensor"))?;
        let resolved = if index < 0 { index + first as i64 } else { index };
        if resolved < 0 || resolved >= first as i64 {
            return Err(ScriptError::raised(
                "IndexError",
                format!("index {} is out of bounds for dimension 0 with size {}", index, first),
            ));
        }
        let stride: usize = self.shape[1..].iter().product();
        let start = resolved as usize * stride;
        Ok(Tensor {
            data: self.data[start..start + stride].to_vec(),
            shape: self.shape[1..].to_vec(),
            dtype: self.dtype,
        })
    }

    /// Rows along the first axis as numeric floats
    pub fn rows(&self) -> Vec<Vec<f32>> {
        match self.shape.as_slice() {
            [] => vec![self.data.clone()],
            [_] => vec![self.data.clone()],
            [first, ..] => {
                let stride = self.data.len() / (*first).max(1);
                self.data.chunks(stride.max(1)).map(<[f32]>::to_vec).collect()
            }
        }
    }

    pub fn item(&self) -> ScriptResult<Value> {
        if self.data.len() != 1 {
            return Err(ScriptError::value_error(format!(
                "a Tensor with {} elements cannot be converted to Scalar",
                self.data.len()
            )));
        }
        Ok(self.element(self.data[0]))
    }

    fn element(&self, value: f32) -> Value {
        match self.dtype {
            DType::Long => Value::Int(value as i64),
            DType::Float => Value::Float(value as f64),
        }
    }

    /// Nested lists of numbers; a 0-dim tensor becomes a number
    pub fn to_list(&self) -> Value {
        if self.shape.is_empty() {
            return self.element(self.data.first().copied().unwrap_or(0.0));
        }
        self.nest(0, 0).0
    }

    fn nest(&self, axis: usize, offset: usize) -> (Value, usize) {
        if axis + 1 == self.shape.len() {
            let items = self.data[offset..offset + self.shape[axis]]
                .iter()
                .map(|v| self.element(*v))
                .collect();
            return (Value::List(items), offset + self.shape[axis]);
        }
        let mut items = Vec::with_capacity(self.shape[axis]);
        let mut cursor = offset;
        for _ in 0..self.shape[axis] {
            let (item, next) = self.nest(axis + 1, cursor);
            items.push(item);
            cursor = next;
        }
        (Value::List(items), cursor)
    }

    fn shape_value(&self) -> Value {
        Value::List(self.shape.iter().map(|d| Value::Int(*d as i64)).collect())
    }
}

fn mean_of(values: &[f32]) -> f32 {
    if values.is_empty() {
        f32::NAN
    } else {
        values.iter().sum::<f32>() / values.len() as f32
    }
}

fn argmax_of(values: &[f32]) -> f32 {
    let mut best = 0;
    for (index, value) in values.iter().enumerate() {
        if *value > values[best] {
            best = index;
        }
    }
    best as f32
}

fn flatten(
    value: &Value,
    depth: usize,
    shape: &mut Vec<usize>,
    data: &mut Vec<f32>,
    all_ints: &mut bool,
) -> ScriptResult<()> {
    match value {
        Value::List(items) => {
            match shape.get(depth) {
                Some(expected) if *expected != items.len() => {
                    return Err(ScriptError::value_error(
                        "expected sequence of equal length at every level",
                    ))
                }
                Some(_) => {}
                None if shape.len() == depth && data.is_empty() => shape.push(items.len()),
                None => return Err(ScriptError::value_error("ragged nested sequence")),
            }
            for item in items {
                flatten(item, depth + 1, shape, data, all_ints)?;
            }
            Ok(())
        }
        Value::Int(_) | Value::Bool(_) | Value::Float(_) => {
            if depth != shape.len() {
                return Err(ScriptError::value_error("ragged nested sequence"));
            }
            if matches!(value, Value::Float(_)) {
                *all_ints = false;
            }
            data.push(value.as_f64().unwrap_or_default() as f32);
            Ok(())
        }
        other => Err(ScriptError::type_error(format!(
            "could not convert {} to a tensor element",
            other.type_name()
        ))),
    }
}

fn dim_argument(args: &CallArgs, index: usize) -> ScriptResult<Option<i64>> {
    match args.get(index, "dim") {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value.expect_i64("dim").map(Some),
    }
}

impl HostObject for Tensor {
    fn type_name(&self) -> &str {
        "Tensor"
    }

    fn heap_size(&self) -> usize {
        self.data.len() * std::mem::size_of::<f32>()
            + self.shape.len() * std::mem::size_of::<usize>()
    }

    fn get_attr(&self, name: &str) -> ScriptResult<Value> {
        match name {
            "shape" => Ok(self.shape_value()),
            "ndim" => Ok(Value::Int(self.shape.len() as i64)),
            "dtype" => Ok(Value::Str(
                match self.dtype {
                    DType::Float => "torch.float32",
                    DType::Long => "torch.int64",
                }
                .to_string(),
            )),
            _ => Err(ScriptError::raised(
                "AttributeError",
                format!("'Tensor' object has no attribute '{}'", name),
            )),
        }
    }

    fn call_method(&self, name: &str, args: CallArgs) -> ScriptResult<Value> {
        match name {
            "tolist" => Ok(self.to_list()),
            "item" => self.item(),
            "size" => match args.get(0, "dim") {
                Some(dim) => {
                    let dim = self.dim_index(dim.expect_i64("size")?)?;
                    Ok(Value::Int(self.shape[dim] as i64))
                }
                None => Ok(self.shape_value()),
            },
            "dim" => Ok(Value::Int(self.shape.len() as i64)),
            "numel" => Ok(Value::Int(self.numel() as i64)),
            "mean" => Ok(Value::host(self.mean(dim_argument(&args, 0)?)?)),
            "sum" => Ok(Value::host(self.sum(dim_argument(&args, 0)?)?)),
            "argmax" => Ok(Value::host(self.argmax(dim_argument(&args, 0)?)?)),
            "softmax" => {
                let dim = dim_argument(&args, 0)?.unwrap_or(-1);
                Ok(Value::host(self.softmax(dim)?))
            }
            "squeeze" => Ok(Value::host(self.squeeze())),
            // Single device, single precision
            "cpu" | "detach" | "numpy" | "float" | "clone" => Ok(Value::host(self.clone())),
            _ => Err(ScriptError::raised(
                "AttributeError",
                format!("'Tensor' object has no attribute '{}'", name),
            )),
        }
    }

    fn get_item(&self, index: &Value) -> ScriptResult<Value> {
        let row = self.row(index.expect_i64("tensor index")?)?;
        if row.shape.is_empty() {
            row.item()
        } else {
            Ok(Value::host(row))
        }
    }

    fn iter_values(&self) -> ScriptResult<Vec<Value>> {
        let first = self.shape.first().copied().unwrap_or(0);
        (0..first as i64)
            .map(|index| self.get_item(&Value::Int(index)))
            .collect()
    }

    fn length(&self) -> Option<usize> {
        self.shape.first().copied()
    }

    fn to_json(&self) -> JsonValue {
        self.to_list().to_json()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// The `torch` module handle
#[derive(Debug, Default)]
pub struct TorchModule;

fn builtin(name: &'static str, func: studio_script::value::BuiltinFn) -> Value {
    Value::Builtin(Builtin { name, func })
}

fn tensor_argument(args: &CallArgs, index: usize, name: &str, function: &str) -> ScriptResult<Tensor> {
    Tensor::from_value(args.required(index, name, function)?)
}

fn torch_tensor(_: &mut Interpreter, args: CallArgs) -> ScriptResult<Value> {
    Ok(Value::host(tensor_argument(&args, 0, "data", "tensor")?))
}

fn torch_zeros(_: &mut Interpreter, args: CallArgs) -> ScriptResult<Value> {
    let dims: Vec<Value> = match args.positional.as_slice() {
        [Value::List(dims)] => dims.clone(),
        dims => dims.to_vec(),
    };
    let shape = dims
        .iter()
        .map(|d| match d.expect_i64("zeros") {
            Ok(d) if d >= 0 => Ok(d as usize),
            Ok(_) => Err(ScriptError::value_error("negative dimension")),
            Err(e) => Err(e),
        })
        .collect::<ScriptResult<Vec<usize>>>()?;
    let size: usize = shape.iter().product();
    if size > studio_script::interpreter::MAX_SEQUENCE_LEN {
        return Err(ScriptError::LimitExceeded(format!(
            "tensor of {} elements is too large",
            size
        )));
    }
    Ok(Value::host(Tensor::new(vec![0.0; size], shape)?))
}

fn torch_softmax(_: &mut Interpreter, args: CallArgs) -> ScriptResult<Value> {
    let tensor = tensor_argument(&args, 0, "input", "softmax")?;
    let dim = dim_argument(&args, 1)?.unwrap_or(-1);
    Ok(Value::host(tensor.softmax(dim)?))
}

fn torch_argmax(_: &mut Interpreter, args: CallArgs) -> ScriptResult<Value> {
    let tensor = tensor_argument(&args, 0, "input", "argmax")?;
    Ok(Value::host(tensor.argmax(dim_argument(&args, 1)?)?))
}

fn torch_mean(_: &mut Interpreter, args: CallArgs) -> ScriptResult<Value> {
    let tensor = tensor_argument(&args, 0, "input", "mean")?;
    Ok(Value::host(tensor.mean(dim_argument(&args, 1)?)?))
}

fn torch_cosine_similarity(_: &mut Interpreter, args: CallArgs) -> ScriptResult<Value> {
    let a = tensor_argument(&args, 0, "x1", "cosine_similarity")?;
    let b = tensor_argument(&args, 1, "x2", "cosine_similarity")?;
    if a.shape() != b.shape() {
        return Err(ScriptError::value_error(format!(
            "cosine_similarity expects equal shapes, got {:?} and {:?}",
            a.shape(),
            b.shape()
        )));
    }

    let rows: Vec<f32> = a
        .rows()
        .iter()
        .zip(b.rows().iter())
        .map(|(x, y)| cosine(x, y))
        .collect();
    if a.shape().len() <= 1 {
        Ok(Value::host(Tensor::scalar(rows[0], DType::Float)))
    } else {
        let count = rows.len();
        Ok(Value::host(Tensor::new(rows, vec![count])?))
    }
}

fn cosine(x: &[f32], y: &[f32]) -> f32 {
    let dot: f32 = x.iter().zip(y).map(|(a, b)| a * b).sum();
    let norm_x = x.iter().map(|v| v * v).sum::<f32>().sqrt();
    let norm_y = y.iter().map(|v| v * v).sum::<f32>().sqrt();
    dot / (norm_x * norm_y).max(1e-8)
}

fn torch_no_grad(_: &mut Interpreter, _: CallArgs) -> ScriptResult<Value> {
    Ok(Value::Null)
}

impl HostObject for TorchModule {
    fn type_name(&self) -> &str {
        "module"
    }

    fn get_attr(&self, name: &str) -> ScriptResult<Value> {
        match name {
            "tensor" => Ok(builtin("tensor", torch_tensor)),
            "zeros" => Ok(builtin("zeros", torch_zeros)),
            "softmax" => Ok(builtin("softmax", torch_softmax)),
            "argmax" => Ok(builtin("argmax", torch_argmax)),
            "mean" => Ok(builtin("mean", torch_mean)),
            "cosine_similarity" => Ok(builtin("cosine_similarity", torch_cosine_similarity)),
            "no_grad" => Ok(builtin("no_grad", torch_no_grad)),
            _ => Err(ScriptError::raised(
                "AttributeError",
                format!("module 'torch' has no attribute '{}'", name),
            )),
        }
    }

    fn to_json(&self) -> JsonValue {
        JsonValue::String("<module 'torch'>".to_string())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix() -> Tensor {
        Tensor::new(vec![1.0, 5.0, 3.0, 4.0, 2.0, 0.0], vec![2, 3]).unwrap()
    }

    #[test]
    fn test_from_nested_lists() {
        let value = Value::List(vec![
            Value::List(vec![Value::Int(1), Value::Int(2)]),
            Value::List(vec![Value::Int(3), Value::Int(4)]),
        ]);
        let tensor = Tensor::from_value(&value).unwrap();
        assert_eq!(tensor.shape(), [2, 2]);
        assert_eq!(tensor.dtype(), DType::Long);
        assert_eq!(tensor.to_list(), value);

        let ragged = Value::List(vec![Value::List(vec![Value::Int(1)]), Value::Int(2)]);
        assert!(Tensor::from_value(&ragged).is_err());
    }

    #[test]
    fn test_reductions_along_dims() {
        let t = matrix();
        assert_eq!(t.argmax(Some(-1)).unwrap().to_list(), Value::List(vec![Value::Int(1), Value::Int(0)]));
        assert_eq!(t.argmax(None).unwrap().item().unwrap(), Value::Int(1));
        assert_eq!(t.sum(Some(0)).unwrap().data(), [5.0, 7.0, 3.0]);
        assert_eq!(t.mean(Some(1)).unwrap().data(), [3.0, 2.0]);
    }

    #[test]
    fn test_softmax_rows_sum_to_one() {
        let probs = matrix().softmax(-1).unwrap();
        for row in probs.rows() {
            assert!((row.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_indexing_and_squeeze() {
        let t = matrix();
        let row = t.row(-1).unwrap();
        assert_eq!(row.data(), [4.0, 2.0, 0.0]);
        assert_eq!(t.get_item(&Value::Int(0)).unwrap().type_name(), "Tensor");
        assert_eq!(row.get_item(&Value::Int(1)).unwrap(), Value::Float(2.0));
        assert!(t.row(2).is_err());

        let batch = Tensor::new(vec![0.5, 0.5], vec![1, 2]).unwrap();
        assert_eq!(batch.squeeze().shape(), [2]);
    }

    #[test]
    fn test_cosine_of_identical_vectors() {
        assert!((cosine(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]) - 1.0).abs() < 1e-6);
        assert!(cosine(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
    }
}
