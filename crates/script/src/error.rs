use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ScriptError {
    #[error("Lexing failed: {0}")]
    Lexing(String),
    #[error("Parsing failed: {0}")]
    Parsing(String),
    #[error("Execution failed: {0}")]
    Execution(String),
    #[error("{kind}: {message}")]
    Raised { kind: String, message: String },
    #[error("Limit exceeded: {0}")]
    LimitExceeded(String),
    #[error("Host error: {0}")]
    Host(String),
}

impl ScriptError {
    pub fn execution(message: impl Into<String>) -> Self {
        ScriptError::Execution(message.into())
    }

    pub fn host(message: impl Into<String>) -> Self {
        ScriptError::Host(message.into())
    }

    pub fn raised(kind: impl Into<String>, message: impl Into<String>) -> Self {
        ScriptError::Raised {
            kind: kind.into(),
            message: message.into(),
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::raised("TypeError", message)
    }

    pub fn value_error(message: impl Into<String>) -> Self {
        Self::raised("ValueError", message)
    }
}

pub type Result<T> = std::result::Result<T, ScriptError>;
