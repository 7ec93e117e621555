//! Named, hot-reloadable execution contexts for a small Lisp.
//!
//! A context accepts REPL fragments through [`ExecutionContext::run`] and
//! patches from watched files through [`ExecutionContext::apply`]. The
//! [`ReloadCoordinator`] turns file change notifications into those patches,
//! one ordered queue per file.

pub mod ast;
pub mod ast_builder;
pub mod builtins;
pub mod config;
pub mod context;
pub mod diff;
pub mod error;
pub mod eval;
pub mod names;
pub mod registry;
pub mod reload;
pub mod sexp;
pub mod source;
pub mod value;
pub mod watch;

pub use config::{ContextConfig, EngineConfig, ReloadConfig, WatchConfig};
pub use context::{ExecutionContext, ExecutionResult};
pub use diff::{diff, Patch, Replacement};
pub use error::{format_error, EvalError, ExecutionError, LiveError};
pub use names::{DefKind, FragmentId, Identity, Origin, Symbol};
pub use registry::ContextRegistry;
pub use reload::{
    ChangeEvent, ChangeKind, ChangeSender, ChannelObserver, Phase, ReloadCoordinator, ReloadEvent,
    ReloadObserver, TracingObserver,
};
pub use source::{parse, Definition, SourceUnit, Statement};
pub use value::{Namespace, Value};
pub use watch::{FileWatcher, WatchHandle};
