//! Embedded fragment language for BERT Studio custom tasks
//!
//! Custom tasks arrive as three short source fragments. This crate lexes,
//! parses and interprets them against an explicit [`Namespace`]; the
//! embedding application decides every name a fragment can see, including
//! the capability handles that reach real models through [`HostObject`].

pub mod ast;
pub mod builtins;
pub mod error;
pub mod interpreter;
pub mod lexer;
pub mod monitor;
pub mod parser;
pub mod value;

pub use error::{Result, ScriptError};
pub use interpreter::{Interpreter, Limits, Namespace};
pub use monitor::{ExecutionMonitor, ExecutionStats, TraceEntry, TraceEventType};
pub use parser::parse_source;
pub use value::{Builtin, CallArgs, HostObject, Value};
