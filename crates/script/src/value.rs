//! Runtime values and the host-object seam

use crate::ast::FunctionDefinition;
use crate::error::{Result, ScriptError};
use crate::interpreter::Interpreter;
use serde_json::Value as JsonValue;
use std::any::Any;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Signature shared by every builtin function
pub type BuiltinFn = fn(&mut Interpreter, CallArgs) -> Result<Value>;

/// A named native function visible to fragments
#[derive(Clone)]
pub struct Builtin {
    pub name: &'static str,
    pub func: BuiltinFn,
}

impl fmt::Debug for Builtin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<built-in function {}>", self.name)
    }
}

/// Capability handle supplied by the embedding application.
///
/// Everything a fragment can reach beyond the builtins enters through this
/// trait: modules, tokenizers, models, tensors, pipelines.
pub trait HostObject: Send + Sync + fmt::Debug {
    /// Name reported by `type()` and in error messages
    fn type_name(&self) -> &str;

    /// Attribute lookup (`obj.name`)
    fn get_attr(&self, name: &str) -> Result<Value> {
        Err(ScriptError::Raised {
            kind: "AttributeError".to_string(),
            message: format!("'{}' object has no attribute '{}'", self.type_name(), name),
        })
    }

    /// Direct invocation (`obj(args)`)
    fn call(&self, _args: CallArgs) -> Result<Value> {
        Err(ScriptError::type_error(format!(
            "'{}' object is not callable",
            self.type_name()
        )))
    }

    /// Method invocation (`obj.name(args)`); defaults to calling a host attribute.
    ///
    /// The interpreter dispatches builtin and function attributes itself
    /// before reaching this.
    fn call_method(&self, name: &str, args: CallArgs) -> Result<Value> {
        match self.get_attr(name)? {
            Value::Host(attr) => attr.call(args),
            other => Err(ScriptError::type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    /// Subscript (`obj[index]`)
    fn get_item(&self, _index: &Value) -> Result<Value> {
        Err(ScriptError::type_error(format!(
            "'{}' object is not subscriptable",
            self.type_name()
        )))
    }

    /// Elements produced when the object is iterated
    fn iter_values(&self) -> Result<Vec<Value>> {
        Err(ScriptError::type_error(format!(
            "'{}' object is not iterable",
            self.type_name()
        )))
    }

    fn length(&self) -> Option<usize> {
        None
    }

    /// Bytes owned by the object, charged when a fragment stores it
    fn heap_size(&self) -> usize {
        0
    }

    /// JSON rendering used when the object escapes as a result
    fn to_json(&self) -> JsonValue {
        JsonValue::String(format!("<{}>", self.type_name()))
    }

    fn as_any(&self) -> &dyn Any;
}

/// Positional and keyword arguments for a call
#[derive(Debug, Clone, Default)]
pub struct CallArgs {
    pub positional: Vec<Value>,
    pub keyword: Vec<(String, Value)>,
}

impl CallArgs {
    pub fn new(positional: Vec<Value>) -> Self {
        Self {
            positional,
            keyword: Vec::new(),
        }
    }

    pub fn with_keyword(mut self, name: impl Into<String>, value: Value) -> Self {
        self.keyword.push((name.into(), value));
        self
    }

    pub fn keyword(&self, name: &str) -> Option<&Value> {
        self.keyword
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    /// Argument by position, falling back to its keyword name
    pub fn get(&self, index: usize, name: &str) -> Option<&Value> {
        self.positional.get(index).or_else(|| self.keyword(name))
    }

    /// Like [`CallArgs::get`] but a missing argument is a `TypeError`
    pub fn required(&self, index: usize, name: &str, function: &str) -> Result<&Value> {
        self.get(index, name).ok_or_else(|| {
            ScriptError::type_error(format!(
                "{}() missing required argument: '{}'",
                function, name
            ))
        })
    }

    pub fn len(&self) -> usize {
        self.positional.len() + self.keyword.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Runtime value of the fragment language
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Function(Arc<FunctionDefinition>),
    Builtin(Builtin),
    Error { kind: String, message: String },
    Host(Arc<dyn HostObject>),
}

impl Value {
    pub fn host<T: HostObject + 'static>(object: T) -> Self {
        Value::Host(Arc::new(object))
    }

    /// Get the type name for error messages and `type()`
    pub fn type_name(&self) -> &str {
        match self {
            Value::Null => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Map(_) => "dict",
            Value::Function(_) => "function",
            Value::Builtin(_) => "builtin_function",
            Value::Error { kind, .. } => kind.as_str(),
            Value::Host(object) => object.type_name(),
        }
    }

    /// Check if value is truthy
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Map(entries) => !entries.is_empty(),
            Value::Host(object) => object.length().map_or(true, |len| len > 0),
            _ => true,
        }
    }

    /// Convert to JSON value for serialization
    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Null => JsonValue::Null,
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::Int(i) => JsonValue::Number((*i).into()),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Value::Str(s) => JsonValue::String(s.clone()),
            Value::List(items) => JsonValue::Array(items.iter().map(Value::to_json).collect()),
            Value::Map(entries) => JsonValue::Object(
                entries
                    .iter()
                    .map(|(key, value)| (key.clone(), value.to_json()))
                    .collect(),
            ),
            Value::Function(func) => JsonValue::String(format!("<function {}>", func.name)),
            Value::Builtin(builtin) => {
                JsonValue::String(format!("<built-in function {}>", builtin.name))
            }
            Value::Error { kind, message } => serde_json::json!({
                "error": kind,
                "message": message,
            }),
            Value::Host(object) => object.to_json(),
        }
    }

    pub fn from_json(json: &JsonValue) -> Self {
        match json {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Bool(*b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            JsonValue::String(s) => Value::Str(s.clone()),
            JsonValue::Array(items) => Value::List(items.iter().map(Value::from_json).collect()),
            JsonValue::Object(entries) => Value::Map(
                entries
                    .iter()
                    .map(|(key, value)| (key.clone(), Value::from_json(value)))
                    .collect(),
            ),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn expect_str(&self, context: &str) -> Result<&str> {
        self.as_str().ok_or_else(|| {
            ScriptError::type_error(format!(
                "{} expects a string, got {}",
                context,
                self.type_name()
            ))
        })
    }

    pub fn expect_f64(&self, context: &str) -> Result<f64> {
        self.as_f64().ok_or_else(|| {
            ScriptError::type_error(format!(
                "{} expects a number, got {}",
                context,
                self.type_name()
            ))
        })
    }

    pub fn expect_i64(&self, context: &str) -> Result<i64> {
        self.as_i64().ok_or_else(|| {
            ScriptError::type_error(format!(
                "{} expects an integer, got {}",
                context,
                self.type_name()
            ))
        })
    }

    /// Dictionary key form; strings, integers and booleans are hashable
    pub fn to_key(&self) -> Result<String> {
        match self {
            Value::Str(s) => Ok(s.clone()),
            Value::Int(i) => Ok(i.to_string()),
            Value::Bool(b) => Ok((if *b { "True" } else { "False" }).to_string()),
            other => Err(ScriptError::type_error(format!(
                "unhashable type: '{}'",
                other.type_name()
            ))),
        }
    }

    /// Ordering for comparison operators and `sorted`/`min`/`max`
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            (Value::List(a), Value::List(b)) => {
                for (left, right) in a.iter().zip(b.iter()) {
                    match left.compare(right)? {
                        Ordering::Equal => continue,
                        ordering => return Some(ordering),
                    }
                }
                Some(a.len().cmp(&b.len()))
            }
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            _ => {
                let a = self.as_f64()?;
                let b = other.as_f64()?;
                a.partial_cmp(&b)
            }
        }
    }

    /// String form used by `str()` and `print`
    pub fn to_display_string(&self) -> String {
        match self {
            Value::Str(s) => s.clone(),
            other => other.repr(),
        }
    }

    /// String form used inside containers
    pub fn repr(&self) -> String {
        match self {
            Value::Null => "None".to_string(),
            Value::Bool(b) => (if *b { "True" } else { "False" }).to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => format_float(*f),
            Value::Str(s) => format!("'{}'", s.replace('\'', "\\'")),
            Value::List(items) => format!(
                "[{}]",
                items.iter().map(Value::repr).collect::<Vec<_>>().join(", ")
            ),
            Value::Map(entries) => format!(
                "{{{}}}",
                entries
                    .iter()
                    .map(|(key, value)| format!("'{}': {}", key, value.repr()))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            Value::Function(func) => format!("<function {}>", func.name),
            Value::Builtin(builtin) => format!("<built-in function {}>", builtin.name),
            Value::Error { kind, message } => format!("{}('{}')", kind, message),
            Value::Host(object) => format!("<{}>", object.type_name()),
        }
    }

    /// Bytes a deep copy of this value occupies, counting owned payloads
    /// and whatever host objects report.
    pub fn approximate_size(&self) -> usize {
        let payload = match self {
            Value::Str(s) => s.len(),
            Value::List(items) => items.iter().map(Value::approximate_size).sum(),
            Value::Map(entries) => entries
                .iter()
                .map(|(key, value)| key.len() + value.approximate_size())
                .sum(),
            Value::Error { kind, message } => kind.len() + message.len(),
            Value::Host(object) => object.heap_size(),
            _ => 0,
        };
        std::mem::size_of::<Value>() + payload
    }
}

fn format_float(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e16 {
        format!("{:.1}", f)
    } else if f.is_nan() {
        "nan".to_string()
    } else if f.is_infinite() {
        (if f > 0.0 { "inf" } else { "-inf" }).to_string()
    } else {
        format!("{}", f)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
                self.as_f64() == other.as_f64()
            }
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => Arc::ptr_eq(a, b),
            (Value::Builtin(a), Value::Builtin(b)) => a.name == b.name,
            (
                Value::Error {
                    kind: ka,
                    message: ma,
                },
                Value::Error {
                    kind: kb,
                    message: mb,
                },
            ) => ka == kb && ma == mb,
            (Value::Host(a), Value::Host(b)) => {
                std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
            }
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_display_string())
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::List(value)
    }
}
