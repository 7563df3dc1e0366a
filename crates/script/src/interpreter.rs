//! Tree-walking interpreter over an explicit capability namespace
//!
//! Nothing is ambient: a fragment sees exactly the names bound in the
//! [`Namespace`] it was handed, and every statement and call is metered
//! against the [`Limits`] of the run.

use crate::ast::*;
use crate::builtins;
use crate::error::{Result, ScriptError};
use crate::monitor::ExecutionMonitor;
use crate::parser::parse_source;
use crate::value::{CallArgs, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Longest list or string a single operation may produce
pub const MAX_SEQUENCE_LEN: usize = 1_000_000;

/// Captured `print` output is cut off beyond this many bytes
const MAX_OUTPUT_BYTES: usize = 64 * 1024;

/// Resource ceilings for one interpreter
#[derive(Debug, Clone)]
pub struct Limits {
    /// Statements executed plus functions called
    pub max_steps: u64,
    /// Nested user function calls
    pub max_depth: usize,
    /// Wall-clock instant after which evaluation stops
    pub deadline: Option<Instant>,
    /// Bytes a run may allocate building strings, lists and maps.
    /// Charged on growth and never refunded.
    pub max_bytes: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_steps: 1_000_000,
            max_depth: 64,
            deadline: None,
            max_bytes: 256 * 1024 * 1024,
        }
    }
}

impl Limits {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }
}

/// The names visible to a fragment
#[derive(Debug, Clone, Default)]
pub struct Namespace {
    bindings: HashMap<String, Value>,
}

impl Namespace {
    /// An empty namespace; not even builtins are visible
    pub fn new() -> Self {
        Self::default()
    }

    /// A namespace holding the safe builtin set
    pub fn with_builtins() -> Self {
        let mut namespace = Self::new();
        builtins::install(&mut namespace);
        namespace
    }

    pub fn bind(&mut self, name: impl Into<String>, value: Value) {
        self.bindings.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.bindings.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    /// Bound names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.bindings.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// Control flow outcome of a statement
enum Flow {
    Normal(Value),
    Return(Value),
    Break,
    Continue,
}

/// Fragment interpreter
pub struct Interpreter {
    globals: Namespace,
    frames: Vec<HashMap<String, Value>>,
    limits: Limits,
    steps: u64,
    allocated: usize,
    output: String,
    output_truncated: bool,
    monitor: Option<Arc<ExecutionMonitor>>,
}

impl Interpreter {
    pub fn new(namespace: Namespace, limits: Limits) -> Self {
        Self {
            globals: namespace,
            frames: Vec::new(),
            limits,
            steps: 0,
            allocated: 0,
            output: String::new(),
            output_truncated: false,
            monitor: None,
        }
    }

    /// Report evaluations and invocations to a monitor
    pub fn with_monitor(mut self, monitor: Arc<ExecutionMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Parse and run one fragment, recording it under `label`
    pub fn evaluate(&mut self, label: &str, source: &str) -> Result<Value> {
        let started = Instant::now();
        let result = parse_source(source).and_then(|program| self.run(&program));

        tracing::debug!(
            fragment = label,
            steps = self.steps,
            success = result.is_ok(),
            "Fragment evaluated"
        );
        if let Some(monitor) = &self.monitor {
            monitor.record_evaluation(label, started.elapsed(), &result);
        }
        result
    }

    /// Run a parsed program against the global namespace.
    ///
    /// Returns the value of the last expression statement, or the value of a
    /// top-level `return`.
    pub fn run(&mut self, program: &Program) -> Result<Value> {
        match self.execute_block(&program.statements)? {
            Flow::Normal(value) | Flow::Return(value) => Ok(value),
            Flow::Break => Err(ScriptError::execution("'break' outside loop")),
            Flow::Continue => Err(ScriptError::execution("'continue' not properly in loop")),
        }
    }

    /// Invoke a callable value from the host side
    pub fn call(&mut self, callee: &Value, args: CallArgs) -> Result<Value> {
        let started = Instant::now();
        let result = self.call_value(callee, args);

        if let Some(monitor) = &self.monitor {
            let subject = match callee {
                Value::Function(func) => func.name.clone(),
                other => other.type_name().to_string(),
            };
            monitor.record_invocation(&subject, started.elapsed(), &result);
        }
        result
    }

    /// Look up a global binding
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    pub fn namespace(&self) -> &Namespace {
        &self.globals
    }

    pub fn into_namespace(self) -> Namespace {
        self.globals
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Bytes charged against the allocation budget so far
    pub fn allocated_bytes(&self) -> usize {
        self.allocated
    }

    /// Account for `bytes` about to be allocated
    pub(crate) fn charge(&mut self, bytes: usize) -> Result<()> {
        self.allocated = self.allocated.saturating_add(bytes);
        if self.allocated > self.limits.max_bytes {
            return Err(ScriptError::LimitExceeded(format!(
                "memory budget of {} bytes exceeded",
                self.limits.max_bytes
            )));
        }
        Ok(())
    }

    /// Text written by `print`
    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn take_output(&mut self) -> String {
        std::mem::take(&mut self.output)
    }

    pub(crate) fn write_output(&mut self, text: &str) {
        if self.output_truncated {
            return;
        }
        if self.output.len() + text.len() + 1 > MAX_OUTPUT_BYTES {
            self.output.push_str("[output truncated]\n");
            self.output_truncated = true;
            return;
        }
        self.output.push_str(text);
        self.output.push('\n');
    }

    fn step(&mut self) -> Result<()> {
        self.steps += 1;
        if self.steps > self.limits.max_steps {
            return Err(ScriptError::LimitExceeded(format!(
                "step limit of {} exceeded",
                self.limits.max_steps
            )));
        }
        if let Some(deadline) = self.limits.deadline {
            if Instant::now() >= deadline {
                return Err(ScriptError::LimitExceeded(
                    "execution deadline exceeded".to_string(),
                ));
            }
        }
        Ok(())
    }

    fn lookup(&self, name: &str) -> Result<Value> {
        if let Some(value) = self.frames.last().and_then(|frame| frame.get(name)) {
            return Ok(value.clone());
        }
        self.globals.get(name).cloned().ok_or_else(|| {
            ScriptError::raised("NameError", format!("name '{}' is not defined", name))
        })
    }

    fn assign(&mut self, name: &str, value: Value) {
        match self.frames.last_mut() {
            Some(frame) => {
                frame.insert(name.to_string(), value);
            }
            None => self.globals.bind(name, value),
        }
    }

    fn execute_block(&mut self, statements: &[Statement]) -> Result<Flow> {
        let mut last = Value::Null;
        for statement in statements {
            match self.execute_statement(statement)? {
                Flow::Normal(value) => last = value,
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal(last))
    }

    fn execute_statement(&mut self, statement: &Statement) -> Result<Flow> {
        self.step()?;

        match statement {
            Statement::Let(let_stmt) => {
                let value = self.evaluate_expression(&let_stmt.value)?;
                self.assign(&let_stmt.name, value);
                Ok(Flow::Normal(Value::Null))
            }
            Statement::Function(func) => {
                self.assign(&func.name, Value::Function(Arc::new(func.clone())));
                Ok(Flow::Normal(Value::Null))
            }
            Statement::If(if_stmt) => {
                if self.evaluate_expression(&if_stmt.condition)?.is_truthy() {
                    return self.execute_block(&if_stmt.then_block.statements);
                }
                for else_if in &if_stmt.else_ifs {
                    if self.evaluate_expression(&else_if.condition)?.is_truthy() {
                        return self.execute_block(&else_if.block.statements);
                    }
                }
                match &if_stmt.else_block {
                    Some(block) => self.execute_block(&block.statements),
                    None => Ok(Flow::Normal(Value::Null)),
                }
            }
            Statement::For(for_stmt) => {
                let iterable = self.evaluate_expression(&for_stmt.iterable)?;
                for item in builtins::iterate(&iterable)? {
                    self.bind_loop_variables(&for_stmt.variables, item)?;
                    match self.execute_block(&for_stmt.body.statements)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal(_) | Flow::Continue => {}
                    }
                }
                Ok(Flow::Normal(Value::Null))
            }
            Statement::While(while_stmt) => {
                loop {
                    self.step()?;
                    if !self.evaluate_expression(&while_stmt.condition)?.is_truthy() {
                        break;
                    }
                    match self.execute_block(&while_stmt.body.statements)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal(_) | Flow::Continue => {}
                    }
                }
                Ok(Flow::Normal(Value::Null))
            }
            Statement::Return(ret) => {
                let value = match &ret.value {
                    Some(expr) => self.evaluate_expression(expr)?,
                    None => Value::Null,
                };
                Ok(Flow::Return(value))
            }
            Statement::Raise(raise) => {
                let value = self.evaluate_expression(&raise.value)?;
                Err(raise_value(value))
            }
            Statement::Import(import) => {
                self.execute_import(import)?;
                Ok(Flow::Normal(Value::Null))
            }
            Statement::Break(_) => Ok(Flow::Break),
            Statement::Continue(_) => Ok(Flow::Continue),
            Statement::Expression(expr) => Ok(Flow::Normal(self.evaluate_expression(expr)?)),
        }
    }

    fn bind_loop_variables(&mut self, variables: &[String], item: Value) -> Result<()> {
        if let [name] = variables {
            self.assign(name, item);
            return Ok(());
        }

        let values = match item {
            Value::List(values) => values,
            other => {
                return Err(ScriptError::type_error(format!(
                    "cannot unpack non-iterable {} object",
                    other.type_name()
                )))
            }
        };
        if values.len() != variables.len() {
            return Err(ScriptError::value_error(format!(
                "expected {} values to unpack, got {}",
                variables.len(),
                values.len()
            )));
        }
        for (name, value) in variables.iter().zip(values) {
            self.assign(name, value);
        }
        Ok(())
    }

    /// Imports only resolve against module handles already in scope
    fn execute_import(&mut self, import: &ImportStatement) -> Result<()> {
        let dotted = import.module.join(".");
        let not_found =
            || ScriptError::raised("ModuleNotFoundError", format!("No module named '{}'", dotted));

        let root_name = import.module.first().ok_or_else(not_found)?;
        let root = match self.lookup(root_name) {
            Ok(value @ (Value::Host(_) | Value::Map(_))) => value,
            _ => return Err(not_found()),
        };

        let mut module = root.clone();
        for part in &import.module[1..] {
            module = get_attribute(&module, part).map_err(|_| not_found())?;
        }

        if import.names.is_empty() {
            match &import.alias {
                Some(alias) => self.assign(alias, module),
                None => self.assign(root_name, root),
            }
            return Ok(());
        }

        for imported in &import.names {
            let value = get_attribute(&module, &imported.name).map_err(|_| {
                ScriptError::raised(
                    "ImportError",
                    format!("cannot import name '{}' from '{}'", imported.name, dotted),
                )
            })?;
            let binding = imported.alias.as_deref().unwrap_or(&imported.name);
            self.assign(binding, value);
        }
        Ok(())
    }

    fn evaluate_expression(&mut self, expr: &Expression) -> Result<Value> {
        match expr {
            Expression::Literal(literal) => Ok(match literal {
                Literal::String(s) => Value::Str(s.clone()),
                Literal::Number(n) => Value::Float(*n),
                Literal::Integer(i) => Value::Int(*i),
                Literal::Boolean(b) => Value::Bool(*b),
                Literal::Null => Value::Null,
            }),
            Expression::Identifier(id) => self.lookup(&id.name),
            Expression::FieldAccess(access) => {
                let object = self.evaluate_expression(&access.object)?;
                get_attribute(&object, &access.field)
            }
            Expression::IndexAccess(access) => {
                let object = self.evaluate_expression(&access.object)?;
                let index = self.evaluate_expression(&access.index)?;
                builtins::get_index(&object, &index)
            }
            Expression::Call(call) => {
                let callee = self.evaluate_expression(&call.callee)?;
                let args = self.evaluate_arguments(&call.arguments)?;
                self.call_value(&callee, args)
            }
            Expression::MethodCall(call) => self.evaluate_method_call(call),
            Expression::BinaryOp(op) => self.evaluate_binary(op),
            Expression::UnaryOp(op) => {
                let operand = self.evaluate_expression(&op.operand)?;
                match op.operator {
                    UnaryOperator::Not => Ok(Value::Bool(!operand.is_truthy())),
                    UnaryOperator::Negate => negate(operand),
                }
            }
            Expression::Assignment(assignment) => {
                let value = self.evaluate_expression(&assignment.value)?;
                self.assign_target(&assignment.target, value.clone())?;
                Ok(value)
            }
            Expression::List(list) => {
                let mut elements = Vec::with_capacity(list.elements.len());
                for element in &list.elements {
                    let value = self.evaluate_expression(element)?;
                    self.charge(value.approximate_size())?;
                    elements.push(value);
                }
                Ok(Value::List(elements))
            }
            Expression::Map(map) => {
                let mut entries = BTreeMap::new();
                for entry in &map.entries {
                    let key = self.evaluate_expression(&entry.key)?.to_key()?;
                    let value = self.evaluate_expression(&entry.value)?;
                    self.charge(key.len() + value.approximate_size())?;
                    entries.insert(key, value);
                }
                Ok(Value::Map(entries))
            }
        }
    }

    fn evaluate_arguments(&mut self, arguments: &Arguments) -> Result<CallArgs> {
        let mut args = CallArgs::default();
        for expr in &arguments.positional {
            args.positional.push(self.evaluate_expression(expr)?);
        }
        for (name, expr) in &arguments.keyword {
            if args.keyword(name).is_some() {
                return Err(ScriptError::type_error(format!(
                    "keyword argument repeated: {}",
                    name
                )));
            }
            let value = self.evaluate_expression(expr)?;
            args.keyword.push((name.clone(), value));
        }
        Ok(args)
    }

    fn evaluate_method_call(&mut self, call: &MethodCall) -> Result<Value> {
        let mut receiver = self.evaluate_expression(&call.object)?;
        let args = self.evaluate_arguments(&call.arguments)?;

        if let Value::Host(object) = &receiver {
            // Module-style hosts expose plain functions as attributes
            return match object.get_attr(&call.method) {
                Ok(callee @ (Value::Builtin(_) | Value::Function(_))) => {
                    self.call_value(&callee, args)
                }
                _ => object.call_method(&call.method, args),
            };
        }

        let result = builtins::call_method(self, &mut receiver, &call.method, args)?;
        if builtins::is_mutating_method(&receiver, &call.method) && is_assignable(&call.object) {
            self.assign_target(&call.object, receiver)?;
        }
        Ok(result)
    }

    /// Store `value` into a name or an index chain rooted at a name
    fn assign_target(&mut self, target: &Expression, value: Value) -> Result<()> {
        match target {
            Expression::Identifier(id) => {
                self.assign(&id.name, value);
                Ok(())
            }
            Expression::IndexAccess(access) => {
                let mut container = self.evaluate_expression(&access.object)?;
                let index = self.evaluate_expression(&access.index)?;
                self.charge(value.approximate_size())?;
                builtins::set_index(&mut container, &index, value)?;
                self.assign_target(&access.object, container)
            }
            _ => Err(ScriptError::execution("invalid assignment target")),
        }
    }

    fn evaluate_binary(&mut self, op: &BinaryOperation) -> Result<Value> {
        let left = self.evaluate_expression(&op.left)?;

        match op.operator {
            BinaryOperator::And => {
                if !left.is_truthy() {
                    return Ok(left);
                }
                self.evaluate_expression(&op.right)
            }
            BinaryOperator::Or => {
                if left.is_truthy() {
                    return Ok(left);
                }
                self.evaluate_expression(&op.right)
            }
            operator => {
                let right = self.evaluate_expression(&op.right)?;
                self.charge(allocation_cost(operator, &left, &right))?;
                apply_binary(operator, &left, &right)
            }
        }
    }

    pub(crate) fn call_value(&mut self, callee: &Value, args: CallArgs) -> Result<Value> {
        match callee {
            Value::Function(func) => self.call_function(func, args),
            Value::Builtin(builtin) => (builtin.func)(self, args),
            Value::Host(object) => object.call(args),
            other => Err(ScriptError::type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    fn call_function(&mut self, func: &FunctionDefinition, args: CallArgs) -> Result<Value> {
        if self.frames.len() >= self.limits.max_depth {
            return Err(ScriptError::LimitExceeded(format!(
                "maximum recursion depth of {} exceeded",
                self.limits.max_depth
            )));
        }
        self.step()?;

        if args.positional.len() > func.parameters.len() {
            return Err(ScriptError::type_error(format!(
                "{}() takes {} positional arguments but {} were given",
                func.name,
                func.parameters.len(),
                args.positional.len()
            )));
        }
        if let Some((name, _)) = args
            .keyword
            .iter()
            .find(|(name, _)| !func.parameters.iter().any(|p| &p.name == name))
        {
            return Err(ScriptError::type_error(format!(
                "{}() got an unexpected keyword argument '{}'",
                func.name, name
            )));
        }

        let mut frame = HashMap::with_capacity(func.parameters.len());
        for (index, param) in func.parameters.iter().enumerate() {
            let keyword = args.keyword(&param.name);
            let value = match (args.positional.get(index), keyword) {
                (Some(_), Some(_)) => {
                    return Err(ScriptError::type_error(format!(
                        "{}() got multiple values for argument '{}'",
                        func.name, param.name
                    )))
                }
                (Some(value), None) | (None, Some(value)) => value.clone(),
                (None, None) => match &param.default_value {
                    Some(default) => self.evaluate_expression(default)?,
                    None => {
                        return Err(ScriptError::type_error(format!(
                            "{}() missing required argument: '{}'",
                            func.name, param.name
                        )))
                    }
                },
            };
            frame.insert(param.name.clone(), value);
        }

        self.frames.push(frame);
        let result = self.execute_block(&func.body.statements);
        self.frames.pop();

        match result? {
            Flow::Return(value) => Ok(value),
            Flow::Normal(_) => Ok(Value::Null),
            Flow::Break => Err(ScriptError::execution("'break' outside loop")),
            Flow::Continue => Err(ScriptError::execution("'continue' not properly in loop")),
        }
    }
}

fn is_assignable(expr: &Expression) -> bool {
    match expr {
        Expression::Identifier(_) => true,
        Expression::IndexAccess(access) => is_assignable(&access.object),
        _ => false,
    }
}

fn get_attribute(object: &Value, name: &str) -> Result<Value> {
    match object {
        Value::Host(host) => host.get_attr(name),
        Value::Map(entries) => entries.get(name).cloned().ok_or_else(|| {
            ScriptError::raised("AttributeError", format!("module has no attribute '{}'", name))
        }),
        Value::Error { message, .. } if name == "message" => Ok(Value::Str(message.clone())),
        other => Err(ScriptError::raised(
            "AttributeError",
            format!("'{}' object has no attribute '{}'", other.type_name(), name),
        )),
    }
}

fn raise_value(value: Value) -> ScriptError {
    match value {
        Value::Error { kind, message } => ScriptError::Raised { kind, message },
        Value::Str(message) => ScriptError::raised("Exception", message),
        Value::Builtin(builtin) if builtins::is_error_kind(builtin.name) => {
            ScriptError::raised(builtin.name, "")
        }
        other => ScriptError::type_error(format!(
            "exceptions must derive from Exception, not {}",
            other.type_name()
        )),
    }
}

fn negate(operand: Value) -> Result<Value> {
    match operand {
        Value::Int(i) => i
            .checked_neg()
            .map(Value::Int)
            .ok_or_else(|| ScriptError::raised("OverflowError", "integer overflow")),
        Value::Float(f) => Ok(Value::Float(-f)),
        Value::Bool(b) => Ok(Value::Int(-(b as i64))),
        other => Err(ScriptError::type_error(format!(
            "bad operand type for unary -: '{}'",
            other.type_name()
        ))),
    }
}

fn operator_symbol(operator: BinaryOperator) -> &'static str {
    match operator {
        BinaryOperator::Add => "+",
        BinaryOperator::Subtract => "-",
        BinaryOperator::Multiply => "*",
        BinaryOperator::Divide => "/",
        BinaryOperator::Modulo => "%",
        BinaryOperator::Equal => "==",
        BinaryOperator::NotEqual => "!=",
        BinaryOperator::LessThan => "<",
        BinaryOperator::LessThanOrEqual => "<=",
        BinaryOperator::GreaterThan => ">",
        BinaryOperator::GreaterThanOrEqual => ">=",
        BinaryOperator::And => "and",
        BinaryOperator::Or => "or",
        BinaryOperator::In => "in",
    }
}

fn unsupported(operator: BinaryOperator, left: &Value, right: &Value) -> ScriptError {
    ScriptError::type_error(format!(
        "unsupported operand type(s) for {}: '{}' and '{}'",
        operator_symbol(operator),
        left.type_name(),
        right.type_name()
    ))
}

/// Bytes a sequence-building operator will allocate for its result
pub(crate) fn allocation_cost(operator: BinaryOperator, left: &Value, right: &Value) -> usize {
    match (operator, left, right) {
        (BinaryOperator::Add, Value::Str(a), Value::Str(b)) => a.len().saturating_add(b.len()),
        (BinaryOperator::Add, Value::List(_), Value::List(_)) => left
            .approximate_size()
            .saturating_add(right.approximate_size()),
        (BinaryOperator::Multiply, Value::Str(s), Value::Int(n))
        | (BinaryOperator::Multiply, Value::Int(n), Value::Str(s)) => {
            s.len().saturating_mul(usize::try_from(*n).unwrap_or(0))
        }
        (BinaryOperator::Multiply, list @ Value::List(_), Value::Int(n))
        | (BinaryOperator::Multiply, Value::Int(n), list @ Value::List(_)) => list
            .approximate_size()
            .saturating_mul(usize::try_from(*n).unwrap_or(0)),
        _ => 0,
    }
}

fn overflow() -> ScriptError {
    ScriptError::raised("OverflowError", "integer overflow")
}

/// Evaluate a non short-circuiting binary operator
pub(crate) fn apply_binary(operator: BinaryOperator, left: &Value, right: &Value) -> Result<Value> {
    use BinaryOperator::*;

    match operator {
        Add => match (left, right) {
            (Value::Str(a), Value::Str(b)) => {
                check_sequence_len(a.len() + b.len())?;
                Ok(Value::Str(format!("{}{}", a, b)))
            }
            (Value::List(a), Value::List(b)) => {
                check_sequence_len(a.len() + b.len())?;
                Ok(Value::List(a.iter().chain(b.iter()).cloned().collect()))
            }
            _ => arithmetic(operator, left, right, i64::checked_add, |a, b| a + b),
        },
        Subtract => arithmetic(operator, left, right, i64::checked_sub, |a, b| a - b),
        Multiply => match (left, right) {
            (Value::Str(s), Value::Int(n)) | (Value::Int(n), Value::Str(s)) => {
                let count = usize::try_from(*n).unwrap_or(0);
                check_sequence_len(s.len().saturating_mul(count))?;
                Ok(Value::Str(s.repeat(count)))
            }
            (Value::List(items), Value::Int(n)) | (Value::Int(n), Value::List(items)) => {
                let count = usize::try_from(*n).unwrap_or(0);
                check_sequence_len(items.len().saturating_mul(count))?;
                let mut repeated = Vec::with_capacity(items.len() * count);
                for _ in 0..count {
                    repeated.extend(items.iter().cloned());
                }
                Ok(Value::List(repeated))
            }
            _ => arithmetic(operator, left, right, i64::checked_mul, |a, b| a * b),
        },
        Divide => {
            let (a, b) = match (left.as_f64(), right.as_f64()) {
                (Some(a), Some(b)) if is_number(left) && is_number(right) => (a, b),
                _ => return Err(unsupported(operator, left, right)),
            };
            if b == 0.0 {
                return Err(ScriptError::raised("ZeroDivisionError", "division by zero"));
            }
            Ok(Value::Float(a / b))
        }
        Modulo => match (left, right) {
            (Value::Int(a), Value::Int(b)) => {
                if *b == 0 {
                    return Err(ScriptError::raised(
                        "ZeroDivisionError",
                        "integer modulo by zero",
                    ));
                }
                let mut remainder = a.checked_rem(*b).ok_or_else(overflow)?;
                if remainder != 0 && (remainder < 0) != (*b < 0) {
                    remainder += b;
                }
                Ok(Value::Int(remainder))
            }
            _ if is_number(left) && is_number(right) => {
                let a = left.as_f64().unwrap_or_default();
                let b = right.as_f64().unwrap_or_default();
                if b == 0.0 {
                    return Err(ScriptError::raised("ZeroDivisionError", "float modulo"));
                }
                let mut remainder = a % b;
                if remainder != 0.0 && (remainder < 0.0) != (b < 0.0) {
                    remainder += b;
                }
                Ok(Value::Float(remainder))
            }
            _ => Err(unsupported(operator, left, right)),
        },
        Equal => Ok(Value::Bool(left == right)),
        NotEqual => Ok(Value::Bool(left != right)),
        LessThan | LessThanOrEqual | GreaterThan | GreaterThanOrEqual => {
            let ordering = left.compare(right).ok_or_else(|| {
                ScriptError::type_error(format!(
                    "'{}' not supported between instances of '{}' and '{}'",
                    operator_symbol(operator),
                    left.type_name(),
                    right.type_name()
                ))
            })?;
            Ok(Value::Bool(match operator {
                LessThan => ordering.is_lt(),
                LessThanOrEqual => ordering.is_le(),
                GreaterThan => ordering.is_gt(),
                _ => ordering.is_ge(),
            }))
        }
        In => contains(right, left).map(Value::Bool),
        And => Ok(if left.is_truthy() {
            right.clone()
        } else {
            left.clone()
        }),
        Or => Ok(if left.is_truthy() {
            left.clone()
        } else {
            right.clone()
        }),
    }
}

fn is_number(value: &Value) -> bool {
    matches!(value, Value::Int(_) | Value::Float(_) | Value::Bool(_))
}

fn arithmetic(
    operator: BinaryOperator,
    left: &Value,
    right: &Value,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Result<Value> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => int_op(*a, *b).map(Value::Int).ok_or_else(overflow),
        _ if is_number(left) && is_number(right) => {
            let a = left.as_f64().unwrap_or_default();
            let b = right.as_f64().unwrap_or_default();
            Ok(Value::Float(float_op(a, b)))
        }
        _ => Err(unsupported(operator, left, right)),
    }
}

fn contains(container: &Value, item: &Value) -> Result<bool> {
    match container {
        Value::List(items) => Ok(items.contains(item)),
        Value::Str(haystack) => match item {
            Value::Str(needle) => Ok(haystack.contains(needle.as_str())),
            other => Err(ScriptError::type_error(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        Value::Map(entries) => Ok(entries.contains_key(&item.to_key()?)),
        Value::Host(object) => Ok(object.iter_values()?.contains(item)),
        other => Err(ScriptError::type_error(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

pub(crate) fn check_sequence_len(len: usize) -> Result<()> {
    if len > MAX_SEQUENCE_LEN {
        return Err(ScriptError::LimitExceeded(format!(
            "sequence of {} elements exceeds the limit of {}",
            len, MAX_SEQUENCE_LEN
        )));
    }
    Ok(())
}
