use std::path::PathBuf;

use thiserror::Error;

use crate::names::Origin;
use crate::value::Value;

/// Byte offset range in source text.
pub type Span = (usize, usize);

/// Errors surfaced by the engine to its callers.
#[derive(Debug, Error)]
pub enum LiveError {
    /// Source text that is not valid livelisp. Never partially applied.
    #[error("syntax error in {origin} at offset {offset}: {message}")]
    Syntax {
        origin: Origin,
        message: String,
        offset: usize,
    },

    /// Two definitions of one source unit share an identity.
    #[error("duplicate definition of '{name}' in {origin}")]
    DuplicateDefinition {
        origin: Origin,
        name: String,
        offset: usize,
    },

    /// Runtime failure while applying definitions or running statements.
    #[error(transparent)]
    Execution(Box<ExecutionError>),

    #[error("name '{name}' is not bound in context '{context}'")]
    NameNotFound { context: String, name: String },

    /// A `run` was attempted while another `run` holds the context.
    #[error("context '{context}' is busy")]
    ContextBusy { context: String },

    /// Registry miss.
    #[error("no context named '{context}'")]
    NotFound { context: String },

    #[error("I/O error reading {path}: {error}")]
    Io {
        path: PathBuf,
        error: std::io::Error,
    },

    /// Failed to set up file watching.
    #[error("failed to watch {path}: {message}")]
    Watch { path: PathBuf, message: String },

    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),
}

impl From<ExecutionError> for LiveError {
    fn from(err: ExecutionError) -> Self {
        LiveError::Execution(Box::new(err))
    }
}

impl LiveError {
    /// Byte offset of the offending form, when the error is tied to source text.
    pub fn offset(&self) -> Option<usize> {
        match self {
            LiveError::Syntax { offset, .. } | LiveError::DuplicateDefinition { offset, .. } => {
                Some(*offset)
            }
            LiveError::Execution(err) => err.span.map(|span| span.0),
            _ => None,
        }
    }

    /// The execution failure carried by this error, if any.
    pub fn as_execution(&self) -> Option<&ExecutionError> {
        match self {
            LiveError::Execution(err) => Some(err),
            _ => None,
        }
    }
}

/// A runtime failure inside a definition body or statement.
///
/// Definitions bound earlier in the same call stay bound: `changed` lists
/// them so callers can reconcile state.
#[derive(Debug, Error)]
#[error("{location}: {source}")]
pub struct ExecutionError {
    pub source: EvalError,
    /// Human-readable name of the failing form, e.g. `(def y ...)`.
    pub location: String,
    pub span: Option<Span>,
    /// Bindings written before the failure, in write order.
    pub changed: Vec<String>,
    /// Value of the last statement that completed before the failure.
    pub partial: Option<Value>,
}

/// Runtime exception raised while evaluating an expression.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("unbound symbol '{0}'")]
    Unbound(String),

    #[error("{op}: expected {expected}, got {found}")]
    Type {
        op: String,
        expected: &'static str,
        found: String,
    },

    #[error("{name}: expected {expected} argument(s), got {found}")]
    Arity {
        name: String,
        expected: String,
        found: usize,
    },

    #[error("value is not callable: {0}")]
    NotCallable(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("{0}: integer overflow")]
    Overflow(String),

    #[error("index {index} out of bounds for length {len}")]
    Index { index: i64, len: usize },

    #[error("{0} has no member '{1}'")]
    NoMember(String, String),

    #[error("unknown module '{0}'")]
    UnknownModule(String),

    #[error("recursion limit of {0} exceeded")]
    RecursionLimit(usize),

    /// Raised by user code through `(error ...)`.
    #[error("{0}")]
    Raised(String),
}

/// Format a LiveError with source context, showing the offending line and a caret.
pub fn format_error(source: &str, err: &LiveError) -> String {
    match err.offset() {
        Some(offset) if offset <= source.len() => {
            let (line_num, col, line_text) = offset_to_line_col(source, offset);
            format!(
                "{}\n  --> {}:{}\n   | {}\n   | {}^",
                err,
                line_num,
                col,
                line_text,
                " ".repeat(col.saturating_sub(1))
            )
        }
        _ => err.to_string(),
    }
}

fn offset_to_line_col(source: &str, offset: usize) -> (usize, usize, &str) {
    let mut line_start = 0;
    let mut line_num = 1;
    for (i, ch) in source.char_indices() {
        if i >= offset {
            break;
        }
        if ch == '\n' {
            line_start = i + 1;
            line_num += 1;
        }
    }
    let line_end = source[line_start..]
        .find('\n')
        .map(|i| line_start + i)
        .unwrap_or(source.len());
    let col = offset - line_start + 1;
    (line_num, col, &source[line_start..line_end])
}
