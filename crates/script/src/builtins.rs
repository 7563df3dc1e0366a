//! The fixed set of safe primitives visible to fragments, plus the methods of
//! strings, lists and maps.

use crate::ast::BinaryOperator;
use crate::error::{Result, ScriptError};
use crate::interpreter::{
    allocation_cost, apply_binary, check_sequence_len, Interpreter, Namespace,
};
use crate::value::{Builtin, BuiltinFn, CallArgs, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Error constructors bound as builtins
pub const ERROR_KINDS: &[&str] = &[
    "Exception",
    "ValueError",
    "TypeError",
    "KeyError",
    "IndexError",
    "RuntimeError",
];

const FUNCTIONS: &[(&str, BuiltinFn)] = &[
    ("len", builtin_len),
    ("str", builtin_str),
    ("int", builtin_int),
    ("float", builtin_float),
    ("bool", builtin_bool),
    ("list", builtin_list),
    ("dict", builtin_dict),
    ("range", builtin_range),
    ("min", builtin_min),
    ("max", builtin_max),
    ("sum", builtin_sum),
    ("abs", builtin_abs),
    ("round", builtin_round),
    ("sorted", builtin_sorted),
    ("reversed", builtin_reversed),
    ("enumerate", builtin_enumerate),
    ("zip", builtin_zip),
    ("type", builtin_type),
    ("isinstance", builtin_isinstance),
    ("print", builtin_print),
    ("Exception", error_exception),
    ("ValueError", error_value),
    ("TypeError", error_type),
    ("KeyError", error_key),
    ("IndexError", error_index),
    ("RuntimeError", error_runtime),
];

/// Bind every builtin into `namespace`
pub fn install(namespace: &mut Namespace) {
    for (name, func) in FUNCTIONS {
        namespace.bind(*name, Value::Builtin(Builtin { name: *name, func: *func }));
    }
}

/// Names [`install`] binds
pub fn names() -> impl Iterator<Item = &'static str> {
    FUNCTIONS.iter().map(|(name, _)| *name)
}

pub fn is_error_kind(name: &str) -> bool {
    ERROR_KINDS.contains(&name)
}

/// Elements produced by iterating `value`
pub fn iterate(value: &Value) -> Result<Vec<Value>> {
    match value {
        Value::List(items) => Ok(items.clone()),
        Value::Str(s) => Ok(s.chars().map(|c| Value::Str(c.to_string())).collect()),
        Value::Map(entries) => Ok(entries.keys().cloned().map(Value::Str).collect()),
        Value::Host(object) => object.iter_values(),
        other => Err(ScriptError::type_error(format!(
            "'{}' object is not iterable",
            other.type_name()
        ))),
    }
}

fn reject_keywords(args: &CallArgs, function: &str) -> Result<()> {
    if !args.keyword.is_empty() {
        return Err(ScriptError::type_error(format!(
            "{}() takes no keyword arguments",
            function
        )));
    }
    Ok(())
}

fn builtin_len(_: &mut Interpreter, args: CallArgs) -> Result<Value> {
    let value = args.required(0, "obj", "len")?;
    let len = match value {
        Value::Str(s) => s.chars().count(),
        Value::List(items) => items.len(),
        Value::Map(entries) => entries.len(),
        Value::Host(object) => object.length().ok_or_else(|| {
            ScriptError::type_error(format!(
                "object of type '{}' has no len()",
                object.type_name()
            ))
        })?,
        other => {
            return Err(ScriptError::type_error(format!(
                "object of type '{}' has no len()",
                other.type_name()
            )))
        }
    };
    Ok(Value::Int(len as i64))
}

fn builtin_str(_: &mut Interpreter, args: CallArgs) -> Result<Value> {
    Ok(Value::Str(
        args.get(0, "object")
            .map(Value::to_display_string)
            .unwrap_or_default(),
    ))
}

fn builtin_int(_: &mut Interpreter, args: CallArgs) -> Result<Value> {
    match args.get(0, "x") {
        None => Ok(Value::Int(0)),
        Some(Value::Int(i)) => Ok(Value::Int(*i)),
        Some(Value::Bool(b)) => Ok(Value::Int(*b as i64)),
        Some(Value::Float(f)) if f.is_finite() => Ok(Value::Int(f.trunc() as i64)),
        Some(Value::Str(s)) => s.trim().parse::<i64>().map(Value::Int).map_err(|_| {
            ScriptError::value_error(format!(
                "invalid literal for int() with base 10: '{}'",
                s
            ))
        }),
        Some(other) => Err(ScriptError::type_error(format!(
            "int() argument must be a string or a number, not '{}'",
            other.type_name()
        ))),
    }
}

fn builtin_float(_: &mut Interpreter, args: CallArgs) -> Result<Value> {
    match args.get(0, "x") {
        None => Ok(Value::Float(0.0)),
        Some(Value::Str(s)) => s.trim().parse::<f64>().map(Value::Float).map_err(|_| {
            ScriptError::value_error(format!("could not convert string to float: '{}'", s))
        }),
        Some(other) => other.as_f64().map(Value::Float).ok_or_else(|| {
            ScriptError::type_error(format!(
                "float() argument must be a string or a number, not '{}'",
                other.type_name()
            ))
        }),
    }
}

fn builtin_bool(_: &mut Interpreter, args: CallArgs) -> Result<Value> {
    Ok(Value::Bool(
        args.get(0, "x").map(Value::is_truthy).unwrap_or(false),
    ))
}

fn builtin_list(_: &mut Interpreter, args: CallArgs) -> Result<Value> {
    match args.get(0, "iterable") {
        None => Ok(Value::List(Vec::new())),
        Some(value) => iterate(value).map(Value::List),
    }
}

fn builtin_dict(_: &mut Interpreter, args: CallArgs) -> Result<Value> {
    let mut entries = BTreeMap::new();

    match args.positional.first() {
        None => {}
        Some(Value::Map(source)) => entries.extend(source.clone()),
        Some(other) => {
            for pair in iterate(other)? {
                match pair {
                    Value::List(items) if items.len() == 2 => {
                        entries.insert(items[0].to_key()?, items[1].clone());
                    }
                    _ => {
                        return Err(ScriptError::value_error(
                            "dictionary update sequence element has the wrong length",
                        ))
                    }
                }
            }
        }
    }
    for (key, value) in args.keyword {
        entries.insert(key, value);
    }
    Ok(Value::Map(entries))
}

fn builtin_range(interp: &mut Interpreter, args: CallArgs) -> Result<Value> {
    reject_keywords(&args, "range")?;
    let numbers = args
        .positional
        .iter()
        .map(|value| value.expect_i64("range()"))
        .collect::<Result<Vec<_>>>()?;

    let (start, stop, step) = match numbers.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step] => (*start, *stop, *step),
        _ => {
            return Err(ScriptError::type_error(format!(
                "range expected 1 to 3 arguments, got {}",
                numbers.len()
            )))
        }
    };
    if step == 0 {
        return Err(ScriptError::value_error("range() arg 3 must not be zero"));
    }

    let span = if step > 0 {
        (stop as i128 - start as i128).max(0)
    } else {
        (start as i128 - stop as i128).max(0)
    };
    let len = (span + step.unsigned_abs() as i128 - 1) / step.unsigned_abs() as i128;
    let len = usize::try_from(len).unwrap_or(usize::MAX);
    check_sequence_len(len)?;
    interp.charge(len.saturating_mul(std::mem::size_of::<Value>()))?;

    let mut values = Vec::with_capacity(len);
    let mut current = start;
    for _ in 0..len {
        values.push(Value::Int(current));
        current = current.wrapping_add(step);
    }
    Ok(Value::List(values))
}

/// Compare with a `TypeError` for unorderable values
fn ordering(left: &Value, right: &Value) -> Result<Ordering> {
    left.compare(right).ok_or_else(|| {
        ScriptError::type_error(format!(
            "'<' not supported between instances of '{}' and '{}'",
            left.type_name(),
            right.type_name()
        ))
    })
}

/// Shared body of `min` and `max`
fn extremum(interp: &mut Interpreter, args: CallArgs, name: &str, wanted: Ordering) -> Result<Value> {
    let candidates = match args.positional.as_slice() {
        [single] => iterate(single)?,
        [] => {
            return Err(ScriptError::type_error(format!(
                "{} expected at least 1 argument, got 0",
                name
            )))
        }
        many => many.to_vec(),
    };
    let key = args.keyword("key").filter(|k| !matches!(k, Value::Null)).cloned();

    let mut best: Option<(Value, Value)> = None;
    for candidate in candidates {
        let score = match &key {
            Some(func) => interp.call_value(func, CallArgs::new(vec![candidate.clone()]))?,
            None => candidate.clone(),
        };
        let replace = match &best {
            None => true,
            Some((best_score, _)) => ordering(&score, best_score)? == wanted,
        };
        if replace {
            best = Some((score, candidate));
        }
    }

    match best {
        Some((_, value)) => Ok(value),
        None => match args.keyword("default") {
            Some(default) => Ok(default.clone()),
            None => Err(ScriptError::value_error(format!(
                "{}() arg is an empty sequence",
                name
            ))),
        },
    }
}

fn builtin_min(interp: &mut Interpreter, args: CallArgs) -> Result<Value> {
    extremum(interp, args, "min", Ordering::Less)
}

fn builtin_max(interp: &mut Interpreter, args: CallArgs) -> Result<Value> {
    extremum(interp, args, "max", Ordering::Greater)
}

fn builtin_sum(interp: &mut Interpreter, args: CallArgs) -> Result<Value> {
    let items = iterate(args.required(0, "iterable", "sum")?)?;
    let mut total = args.get(1, "start").cloned().unwrap_or(Value::Int(0));
    for item in &items {
        interp.charge(allocation_cost(BinaryOperator::Add, &total, item))?;
        total = apply_binary(BinaryOperator::Add, &total, item)?;
    }
    Ok(total)
}

fn builtin_abs(_: &mut Interpreter, args: CallArgs) -> Result<Value> {
    match args.required(0, "x", "abs")? {
        Value::Int(i) => i.checked_abs().map(Value::Int).ok_or_else(|| {
            ScriptError::raised("OverflowError", "integer overflow")
        }),
        Value::Float(f) => Ok(Value::Float(f.abs())),
        Value::Bool(b) => Ok(Value::Int(*b as i64)),
        other => Err(ScriptError::type_error(format!(
            "bad operand type for abs(): '{}'",
            other.type_name()
        ))),
    }
}

fn builtin_round(_: &mut Interpreter, args: CallArgs) -> Result<Value> {
    let number = args.required(0, "number", "round")?;
    let digits = match args.get(1, "ndigits") {
        None | Some(Value::Null) => None,
        Some(value) => Some(value.expect_i64("round()")?),
    };

    match (number, digits) {
        (Value::Int(i), _) => Ok(Value::Int(*i)),
        (other, None) => {
            let value = other.expect_f64("round()")?.round_ties_even();
            if !value.is_finite() {
                return Err(ScriptError::value_error("cannot round a non-finite number"));
            }
            Ok(Value::Int(value as i64))
        }
        (other, Some(digits)) => {
            let value = other.expect_f64("round()")?;
            let factor = 10f64.powi(digits.clamp(-308, 308) as i32);
            Ok(Value::Float((value * factor).round_ties_even() / factor))
        }
    }
}

fn builtin_sorted(interp: &mut Interpreter, args: CallArgs) -> Result<Value> {
    let items = iterate(args.required(0, "iterable", "sorted")?)?;
    let key = args.keyword("key").filter(|k| !matches!(k, Value::Null)).cloned();
    let reverse = args.keyword("reverse").map(Value::is_truthy).unwrap_or(false);

    let mut keyed = Vec::with_capacity(items.len());
    for item in items {
        let score = match &key {
            Some(func) => interp.call_value(func, CallArgs::new(vec![item.clone()]))?,
            None => item.clone(),
        };
        keyed.push((score, item));
    }

    let mut failure = None;
    keyed.sort_by(|(a, _), (b, _)| match ordering(a, b) {
        Ok(order) => order,
        Err(err) => {
            failure.get_or_insert(err);
            Ordering::Equal
        }
    });
    if let Some(err) = failure {
        return Err(err);
    }
    if reverse {
        keyed.reverse();
    }
    Ok(Value::List(keyed.into_iter().map(|(_, item)| item).collect()))
}

fn builtin_reversed(_: &mut Interpreter, args: CallArgs) -> Result<Value> {
    let mut items = iterate(args.required(0, "sequence", "reversed")?)?;
    items.reverse();
    Ok(Value::List(items))
}

fn builtin_enumerate(_: &mut Interpreter, args: CallArgs) -> Result<Value> {
    let items = iterate(args.required(0, "iterable", "enumerate")?)?;
    let start = match args.get(1, "start") {
        Some(value) => value.expect_i64("enumerate()")?,
        None => 0,
    };
    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            let position = i64::try_from(index)
                .ok()
                .and_then(|index| start.checked_add(index))
                .ok_or_else(|| ScriptError::raised("OverflowError", "integer overflow"))?;
            Ok(Value::List(vec![Value::Int(position), item]))
        })
        .collect::<Result<Vec<_>>>()
        .map(Value::List)
}

fn builtin_zip(_: &mut Interpreter, args: CallArgs) -> Result<Value> {
    reject_keywords(&args, "zip")?;
    let columns = args
        .positional
        .iter()
        .map(iterate)
        .collect::<Result<Vec<_>>>()?;
    let len = columns.iter().map(Vec::len).min().unwrap_or(0);

    Ok(Value::List(
        (0..len)
            .map(|row| Value::List(columns.iter().map(|column| column[row].clone()).collect()))
            .collect(),
    ))
}

fn builtin_type(_: &mut Interpreter, args: CallArgs) -> Result<Value> {
    let value = args.required(0, "object", "type")?;
    Ok(Value::Str(value.type_name().to_string()))
}

fn instance_of(value: &Value, class: &Value) -> Result<bool> {
    let name = match class {
        Value::Builtin(builtin) => builtin.name,
        Value::Str(name) => name.as_str(),
        Value::List(classes) => {
            for candidate in classes {
                if instance_of(value, candidate)? {
                    return Ok(true);
                }
            }
            return Ok(false);
        }
        other => {
            return Err(ScriptError::type_error(format!(
                "isinstance() arg 2 must be a type, not {}",
                other.type_name()
            )))
        }
    };

    Ok(match (value, name) {
        (Value::Error { .. }, "Exception") => true,
        (Value::Map(_), "dict") => true,
        (other, name) => other.type_name() == name,
    })
}

fn builtin_isinstance(_: &mut Interpreter, args: CallArgs) -> Result<Value> {
    let value = args.required(0, "obj", "isinstance")?;
    let class = args.required(1, "class_or_tuple", "isinstance")?;
    instance_of(value, class).map(Value::Bool)
}

fn builtin_print(interp: &mut Interpreter, args: CallArgs) -> Result<Value> {
    let separator = match args.keyword("sep") {
        Some(value) => value.expect_str("print()")?.to_string(),
        None => " ".to_string(),
    };
    let line = args
        .positional
        .iter()
        .map(Value::to_display_string)
        .collect::<Vec<_>>()
        .join(&separator);
    interp.write_output(&line);
    Ok(Value::Null)
}

fn make_error(kind: &str, args: CallArgs) -> Result<Value> {
    let message = args
        .positional
        .first()
        .map(Value::to_display_string)
        .unwrap_or_default();
    Ok(Value::Error {
        kind: kind.to_string(),
        message,
    })
}

fn error_exception(_: &mut Interpreter, args: CallArgs) -> Result<Value> {
    make_error("Exception", args)
}

fn error_value(_: &mut Interpreter, args: CallArgs) -> Result<Value> {
    make_error("ValueError", args)
}

fn error_type(_: &mut Interpreter, args: CallArgs) -> Result<Value> {
    make_error("TypeError", args)
}

fn error_key(_: &mut Interpreter, args: CallArgs) -> Result<Value> {
    make_error("KeyError", args)
}

fn error_index(_: &mut Interpreter, args: CallArgs) -> Result<Value> {
    make_error("IndexError", args)
}

fn error_runtime(_: &mut Interpreter, args: CallArgs) -> Result<Value> {
    make_error("RuntimeError", args)
}

/// Resolve a possibly negative index against a sequence length
fn normalize_index(index: &Value, len: usize) -> Result<usize> {
    let raw = index.expect_i64("index")?;
    let resolved = if raw < 0 { raw + len as i64 } else { raw };
    if resolved < 0 || resolved >= len as i64 {
        return Err(ScriptError::raised("IndexError", "index out of range"));
    }
    Ok(resolved as usize)
}

/// `object[index]`
pub fn get_index(object: &Value, index: &Value) -> Result<Value> {
    match object {
        Value::List(items) => Ok(items[normalize_index(index, items.len())?].clone()),
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let position = normalize_index(index, chars.len())?;
            Ok(Value::Str(chars[position].to_string()))
        }
        Value::Map(entries) => {
            let key = index.to_key()?;
            entries
                .get(&key)
                .cloned()
                .ok_or_else(|| ScriptError::raised("KeyError", format!("'{}'", key)))
        }
        Value::Host(host) => host.get_item(index),
        other => Err(ScriptError::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

/// `object[index] = value`
pub fn set_index(object: &mut Value, index: &Value, value: Value) -> Result<()> {
    match object {
        Value::List(items) => {
            let position = normalize_index(index, items.len())?;
            items[position] = value;
            Ok(())
        }
        Value::Map(entries) => {
            entries.insert(index.to_key()?, value);
            Ok(())
        }
        other => Err(ScriptError::type_error(format!(
            "'{}' object does not support item assignment",
            other.type_name()
        ))),
    }
}

/// Whether `method` changes its receiver in place
pub fn is_mutating_method(receiver: &Value, method: &str) -> bool {
    match receiver {
        Value::List(_) => matches!(method, "append" | "extend" | "pop" | "insert"),
        Value::Map(_) => matches!(method, "update" | "pop"),
        _ => false,
    }
}

/// Dispatch a method on a non-host value
pub fn call_method(
    interp: &mut Interpreter,
    receiver: &mut Value,
    method: &str,
    args: CallArgs,
) -> Result<Value> {
    match receiver {
        Value::Str(s) => {
            let result = string_method(s, method, &args)?;
            interp.charge(result.approximate_size())?;
            Ok(result)
        }
        Value::List(items) => {
            interp.charge(list_growth(method, &args))?;
            list_method(items, method, args)
        }
        Value::Map(entries) => map_method(interp, entries, method, args),
        other => Err(ScriptError::raised(
            "AttributeError",
            format!(
                "'{}' object has no attribute '{}'",
                other.type_name(),
                method
            ),
        )),
    }
}

/// Bytes a list method adds to its receiver
fn list_growth(method: &str, args: &CallArgs) -> usize {
    let added = match method {
        "append" => args.get(0, "object"),
        "insert" => args.get(1, "object"),
        "extend" => args.get(0, "iterable"),
        _ => None,
    };
    added.map_or(0, Value::approximate_size)
}

fn string_method(s: &str, method: &str, args: &CallArgs) -> Result<Value> {
    let text_arg = |index: usize, name: &str| -> Result<Option<String>> {
        match args.get(index, name) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => Ok(Some(value.expect_str(method)?.to_string())),
        }
    };

    match method {
        "upper" => Ok(Value::Str(s.to_uppercase())),
        "lower" => Ok(Value::Str(s.to_lowercase())),
        "strip" => Ok(Value::Str(match text_arg(0, "chars")? {
            Some(chars) => s.trim_matches(|c| chars.contains(c)).to_string(),
            None => s.trim().to_string(),
        })),
        "lstrip" => Ok(Value::Str(s.trim_start().to_string())),
        "rstrip" => Ok(Value::Str(s.trim_end().to_string())),
        "split" => {
            let parts: Vec<Value> = match text_arg(0, "sep")? {
                Some(separator) if separator.is_empty() => {
                    return Err(ScriptError::value_error("empty separator"))
                }
                Some(separator) => s
                    .split(separator.as_str())
                    .map(|part| Value::Str(part.to_string()))
                    .collect(),
                None => s
                    .split_whitespace()
                    .map(|part| Value::Str(part.to_string()))
                    .collect(),
            };
            Ok(Value::List(parts))
        }
        "join" => {
            let items = iterate(args.required(0, "iterable", "join")?)?;
            let pieces = items
                .iter()
                .map(|item| item.expect_str("join()").map(str::to_string))
                .collect::<Result<Vec<_>>>()?;
            let separators = s.len().saturating_mul(pieces.len().saturating_sub(1));
            check_sequence_len(
                pieces
                    .iter()
                    .map(String::len)
                    .fold(separators, usize::saturating_add),
            )?;
            let joined = pieces.join(s);
            Ok(Value::Str(joined))
        }
        "replace" => {
            let old = text_arg(0, "old")?.unwrap_or_default();
            let new = text_arg(1, "new")?.unwrap_or_default();
            let occurrences = if old.is_empty() {
                s.chars().count() + 1
            } else {
                s.matches(old.as_str()).count()
            };
            check_sequence_len(s.len().saturating_add(occurrences.saturating_mul(new.len())))?;
            let replaced = s.replace(old.as_str(), new.as_str());
            Ok(Value::Str(replaced))
        }
        "startswith" => Ok(Value::Bool(
            s.starts_with(text_arg(0, "prefix")?.unwrap_or_default().as_str()),
        )),
        "endswith" => Ok(Value::Bool(
            s.ends_with(text_arg(0, "suffix")?.unwrap_or_default().as_str()),
        )),
        "format" => format_string(s, args),
        _ => Err(ScriptError::raised(
            "AttributeError",
            format!("'str' object has no attribute '{}'", method),
        )),
    }
}

/// `"{} scored {score}".format(label, score=0.9)`
fn format_string(template: &str, args: &CallArgs) -> Result<Value> {
    let mut output = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    let mut next_positional = 0;

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                output.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                output.push('}');
            }
            '{' => {
                let mut field = String::new();
                for inner in chars.by_ref() {
                    if inner == '}' {
                        break;
                    }
                    field.push(inner);
                }
                let value = if field.is_empty() {
                    next_positional += 1;
                    args.positional.get(next_positional - 1)
                } else if let Ok(position) = field.parse::<usize>() {
                    args.positional.get(position)
                } else {
                    args.keyword(&field)
                };
                let value = value.ok_or_else(|| {
                    ScriptError::raised("IndexError", format!("missing format field '{}'", field))
                })?;
                output.push_str(&value.to_display_string());
                check_sequence_len(output.len())?;
            }
            other => output.push(other),
        }
    }
    Ok(Value::Str(output))
}

fn list_method(items: &mut Vec<Value>, method: &str, args: CallArgs) -> Result<Value> {
    match method {
        "append" => {
            check_sequence_len(items.len() + 1)?;
            items.push(args.required(0, "object", "append")?.clone());
            Ok(Value::Null)
        }
        "extend" => {
            let extra = iterate(args.required(0, "iterable", "extend")?)?;
            check_sequence_len(items.len() + extra.len())?;
            items.extend(extra);
            Ok(Value::Null)
        }
        "insert" => {
            let index = args.required(0, "index", "insert")?.expect_i64("insert()")?;
            let value = args.required(1, "object", "insert")?.clone();
            let len = items.len() as i64;
            let position = if index < 0 { (index + len).max(0) } else { index.min(len) };
            items.insert(position as usize, value);
            Ok(Value::Null)
        }
        "pop" => {
            if items.is_empty() {
                return Err(ScriptError::raised("IndexError", "pop from empty list"));
            }
            let position = match args.get(0, "index") {
                Some(index) => normalize_index(index, items.len())?,
                None => items.len() - 1,
            };
            Ok(items.remove(position))
        }
        "index" => {
            let needle = args.required(0, "value", "index")?;
            items
                .iter()
                .position(|item| item == needle)
                .map(|position| Value::Int(position as i64))
                .ok_or_else(|| ScriptError::value_error(format!("{} is not in list", needle.repr())))
        }
        "count" => {
            let needle = args.required(0, "value", "count")?;
            Ok(Value::Int(
                items.iter().filter(|item| *item == needle).count() as i64,
            ))
        }
        _ => Err(ScriptError::raised(
            "AttributeError",
            format!("'list' object has no attribute '{}'", method),
        )),
    }
}

fn map_method(
    interp: &mut Interpreter,
    entries: &mut BTreeMap<String, Value>,
    method: &str,
    args: CallArgs,
) -> Result<Value> {
    match method {
        "get" => {
            let key = args.required(0, "key", "get")?.to_key()?;
            Ok(entries
                .get(&key)
                .cloned()
                .or_else(|| args.get(1, "default").cloned())
                .unwrap_or(Value::Null))
        }
        "keys" => Ok(Value::List(entries.keys().cloned().map(Value::Str).collect())),
        "values" => Ok(Value::List(entries.values().cloned().collect())),
        "items" => Ok(Value::List(
            entries
                .iter()
                .map(|(key, value)| Value::List(vec![Value::Str(key.clone()), value.clone()]))
                .collect(),
        )),
        "update" => {
            if let Value::Map(other) = builtin_dict(interp, args)? {
                entries.extend(other);
            }
            Ok(Value::Null)
        }
        "pop" => {
            let key = args.required(0, "key", "pop")?.to_key()?;
            match entries.remove(&key) {
                Some(value) => Ok(value),
                None => args
                    .get(1, "default")
                    .cloned()
                    .ok_or_else(|| ScriptError::raised("KeyError", format!("'{}'", key))),
            }
        }
        _ => Err(ScriptError::raised(
            "AttributeError",
            format!("'dict' object has no attribute '{}'", method),
        )),
    }
}
