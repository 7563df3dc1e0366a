//! End-to-end tests for the fragment language
//!
//! These run whole fragments the way the sandbox does: one namespace, three
//! evaluations, then a host-side call of the defined function.

use std::sync::Arc;
use studio_script::{
    CallArgs, ExecutionMonitor, HostObject, Interpreter, Limits, Namespace, Result, ScriptError,
    Value,
};

/// Minimal capability handle: a counter module with an `add` function
#[derive(Debug)]
struct CounterModule;

#[derive(Debug)]
struct AddFunction;

impl HostObject for CounterModule {
    fn type_name(&self) -> &str {
        "module"
    }

    fn get_attr(&self, name: &str) -> Result<Value> {
        match name {
            "add" => Ok(Value::host(AddFunction)),
            "version" => Ok(Value::Str("1.0".into())),
            _ => Err(ScriptError::raised(
                "AttributeError",
                format!("module 'counter' has no attribute '{}'", name),
            )),
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

impl HostObject for AddFunction {
    fn type_name(&self) -> &str {
        "builtin_function"
    }

    fn call(&self, args: CallArgs) -> Result<Value> {
        let a = args.required(0, "a", "add")?.expect_i64("add()")?;
        let b = args.get(1, "b").map(|v| v.expect_i64("add()")).transpose()?;
        Ok(Value::Int(a + b.unwrap_or(1)))
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

fn namespace_with_counter() -> Namespace {
    let mut namespace = Namespace::with_builtins();
    namespace.bind("counter", Value::host(CounterModule));
    namespace
}

#[test]
fn test_three_fragments_share_one_namespace() {
    let mut interpreter = Interpreter::new(namespace_with_counter(), Limits::default());

    interpreter
        .evaluate("tokenizer", "import counter\ntokenizer = counter.add")
        .unwrap();
    interpreter
        .evaluate("model", "model = {\"offset\": 10}")
        .unwrap();
    interpreter
        .evaluate(
            "function",
            r#"
def custom_function(text) {
    # count words, then shift by the model offset
    let words = text.split()
    return tokenizer(len(words), b=model["offset"])
}
"#,
        )
        .unwrap();

    let function = interpreter.get("custom_function").cloned().unwrap();
    let result = interpreter
        .call(&function, CallArgs::new(vec![Value::from("one two three")]))
        .unwrap();
    assert_eq!(result, Value::Int(13));
}

#[test]
fn test_from_import_with_alias() {
    let mut interpreter = Interpreter::new(namespace_with_counter(), Limits::default());
    let value = interpreter
        .evaluate("import", "from counter import add as plus, version\n[plus(1), version]")
        .unwrap();
    assert_eq!(value.to_json(), serde_json::json!([2, "1.0"]));
}

#[test]
fn test_import_of_missing_attribute() {
    let mut interpreter = Interpreter::new(namespace_with_counter(), Limits::default());
    let err = interpreter
        .evaluate("import", "from counter import reset")
        .unwrap_err();
    assert_eq!(
        err,
        ScriptError::raised("ImportError", "cannot import name 'reset' from 'counter'")
    );
}

#[test]
fn test_empty_namespace_sees_nothing() {
    let mut interpreter = Interpreter::new(Namespace::new(), Limits::default());
    let err = interpreter.evaluate("bare", "len([1])").unwrap_err();
    assert_eq!(
        err,
        ScriptError::raised("NameError", "name 'len' is not defined")
    );
}

#[test]
fn test_batch_style_function() {
    let mut interpreter = Interpreter::new(Namespace::with_builtins(), Limits::default());
    interpreter
        .evaluate(
            "function",
            r#"
function custom_function(texts) {
    results = []
    for text in texts {
        if len(text) > 3 {
            results.append({"text": text, "long": true})
        } else {
            results.append({"text": text, "long": false})
        }
    }
    return results
}
"#,
        )
        .unwrap();

    let function = interpreter.get("custom_function").cloned().unwrap();
    let input = Value::List(vec![Value::from("hi"), Value::from("hello")]);
    let result = interpreter.call(&function, CallArgs::new(vec![input])).unwrap();
    assert_eq!(
        result.to_json(),
        serde_json::json!([
            {"text": "hi", "long": false},
            {"text": "hello", "long": true}
        ])
    );
}

#[test]
fn test_runtime_errors_surface_with_kind() {
    let mut interpreter = Interpreter::new(Namespace::with_builtins(), Limits::default());
    interpreter
        .evaluate(
            "function",
            "def custom_function(text) {\n  if not text {\n    raise ValueError(\"empty input\")\n  }\n  return text\n}",
        )
        .unwrap();
    let function = interpreter.get("custom_function").cloned().unwrap();
    let err = interpreter
        .call(&function, CallArgs::new(vec![Value::from("")]))
        .unwrap_err();
    assert_eq!(err.to_string(), "ValueError: empty input");
}

#[test]
fn test_monitor_sees_evaluations_and_invocations() {
    let monitor = Arc::new(ExecutionMonitor::new());
    let mut interpreter = Interpreter::new(Namespace::with_builtins(), Limits::default())
        .with_monitor(monitor.clone());

    interpreter
        .evaluate("function", "def custom_function(x) { return x * 2 }")
        .unwrap();
    let function = interpreter.get("custom_function").cloned().unwrap();
    interpreter
        .call(&function, CallArgs::new(vec![Value::Int(4)]))
        .unwrap();
    let _ = interpreter.evaluate("broken", "let = 1");

    let stats = monitor.stats();
    assert_eq!(stats.evaluations, 2);
    assert_eq!(stats.invocations, 1);
    assert_eq!(stats.failures, 1);
}

#[test]
fn test_parse_errors_are_reported_not_panicked() {
    let mut interpreter = Interpreter::new(Namespace::with_builtins(), Limits::default());
    for source in ["def f( {", "x = [1, 2", "\"unterminated", "if {"] {
        let err = interpreter.evaluate("bad", source).unwrap_err();
        assert!(
            matches!(err, ScriptError::Parsing(_) | ScriptError::Lexing(_)),
            "unexpected error for {:?}: {:?}",
            source,
            err
        );
    }
}
