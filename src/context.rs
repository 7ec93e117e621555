use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::builtins;
use crate::config::ContextConfig;
use crate::diff::{diff, Patch};
use crate::error::{EvalError, ExecutionError, LiveError};
use crate::eval::{make_function, Interpreter};
use crate::names::{DefKind, FragmentId, Identity, Origin, Symbol};
use crate::source::{self, DefBody, Definition, SourceUnit, Statement, StatementKind};
use crate::value::{Namespace, TypeDef, Value};

/// Outcome of `run` or `apply`.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    /// Value of the last expression statement executed, if any.
    pub value: Option<Value>,
    /// Bindings written, in write order.
    pub changed: Vec<String>,
    /// Text written by `print`/`println`.
    pub output: Vec<String>,
}

/// A named, long-lived namespace that accepts code and patches.
///
/// All mutation goes through one write lock. A second `run` while one is in
/// progress is refused; `apply` and readers simply wait their turn.
pub struct ExecutionContext {
    name: String,
    config: ContextConfig,
    next_fragment: AtomicU64,
    /// Held for the whole of a `run`.
    running: Mutex<()>,
    state: RwLock<ContextState>,
}

#[derive(Default)]
struct ContextState {
    namespace: Namespace,
    /// Owning definition of each binding that came from a definition.
    provenance: BTreeMap<Symbol, Identity>,
    /// Globals read by each bound function, for ordering value evaluation.
    calls: BTreeMap<Symbol, BTreeSet<String>>,
    /// Last successfully applied version of each REPL fragment.
    fragments: BTreeMap<FragmentId, SourceUnit>,
}

impl ExecutionContext {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, ContextConfig::default())
    }

    pub fn with_config(name: impl Into<String>, config: ContextConfig) -> Self {
        ExecutionContext {
            name: name.into(),
            config,
            next_fragment: AtomicU64::new(1),
            running: Mutex::new(()),
            state: RwLock::new(ContextState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Execute a fresh REPL fragment.
    pub fn run(&self, code: &str) -> Result<ExecutionResult, LiveError> {
        let n = self.next_fragment.fetch_add(1, Ordering::Relaxed);
        let id = FragmentId::from(format!("{}#{}", self.name, n));
        self.run_fragment(id, code)
    }

    /// Execute code under a caller-chosen fragment id. Resubmitting an id
    /// diffs against its previous version, so unchanged definitions are not
    /// re-evaluated and definitions dropped from the fragment are removed.
    pub fn run_fragment(&self, id: FragmentId, code: &str) -> Result<ExecutionResult, LiveError> {
        let _running = self.running.try_lock().ok_or_else(|| LiveError::ContextBusy {
            context: self.name.clone(),
        })?;
        let mut state = self.state.write();

        let unit = source::parse(Origin::Repl(id.clone()), code)?;
        let mut patch = diff(state.fragments.get(&id), &unit);
        patch.statements = unit.statements.clone();

        tracing::debug!(context = %self.name, fragment = %id, summary = %patch.summary(), "context.run");
        let result = state.apply_patch(&patch, &self.config)?;
        state.fragments.insert(id, unit);
        Ok(result)
    }

    /// Apply a patch, waiting for any in-flight `run` or `apply` to finish.
    pub fn apply(&self, patch: &Patch) -> Result<ExecutionResult, LiveError> {
        let mut state = self.state.write();
        tracing::debug!(context = %self.name, origin = %patch.origin, summary = %patch.summary(), "context.apply");
        Ok(state.apply_patch(patch, &self.config)?)
    }

    pub fn lookup(&self, name: &str) -> Result<Value, LiveError> {
        self.state
            .read()
            .namespace
            .get(name)
            .cloned()
            .ok_or_else(|| LiveError::NameNotFound {
                context: self.name.clone(),
                name: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.state.read().namespace.contains_key(name)
    }

    /// Copy of the namespace. Values are shared, not deep-copied.
    pub fn snapshot(&self) -> Namespace {
        self.state.read().namespace.clone()
    }

    /// The definition that currently owns `name`, if it has one.
    pub fn provenance(&self, name: &str) -> Option<Identity> {
        self.state.read().provenance.get(name).cloned()
    }

    /// Bind a host value. The binding has no provenance, so patches never
    /// remove it.
    pub fn bind(&self, name: impl Into<Symbol>, value: Value) {
        let name = name.into();
        let mut state = self.state.write();
        state.provenance.remove(&name);
        state.calls.remove(&name);
        state.namespace.insert(name, value);
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// ── Patch application ──────────────────────────────────────────────────

/// Accumulates what a single `apply_patch` has done so far, so a failure
/// can report it.
#[derive(Default)]
struct Progress {
    changed: Vec<String>,
    output: Vec<String>,
    last: Option<Value>,
}

impl Progress {
    fn fail(&self, source: EvalError, location: String, span: Option<(usize, usize)>) -> ExecutionError {
        ExecutionError {
            source,
            location,
            span,
            changed: self.changed.clone(),
            partial: self.last.clone(),
        }
    }

    fn finish(self) -> ExecutionResult {
        ExecutionResult {
            value: self.last,
            changed: self.changed,
            output: self.output,
        }
    }
}

fn enabled(config: &ContextConfig, kind: DefKind) -> bool {
    match kind {
        DefKind::Import => config.execute_imports,
        DefKind::Function | DefKind::Type => config.define_functions,
        DefKind::Value => config.run_code,
    }
}

fn describe(def: &Definition) -> String {
    let head = def.form.head().unwrap_or("def");
    format!("({} {} ...)", head, def.name())
}

fn describe_statement(stmt: &Statement) -> String {
    const MAX: usize = 40;
    if stmt.canonical.chars().count() <= MAX {
        return stmt.canonical.clone();
    }
    let cut: String = stmt.canonical.chars().take(MAX).collect();
    format!("{}...", cut)
}

/// Order value definitions so each one runs after the values it reads,
/// directly or through the functions in `calls`. Ties, and cycles, fall
/// back to source order.
fn evaluation_order<'d>(
    mut values: Vec<&'d Definition>,
    calls: &BTreeMap<Symbol, BTreeSet<String>>,
) -> Vec<&'d Definition> {
    values.sort_by_key(|def| def.span.0);
    let index: BTreeMap<&str, usize> = values
        .iter()
        .enumerate()
        .map(|(i, def)| (&**def.name(), i))
        .collect();

    let deps: Vec<BTreeSet<usize>> = values
        .iter()
        .enumerate()
        .map(|(i, def)| {
            let mut needs = BTreeSet::new();
            let mut seen: BTreeSet<&str> = BTreeSet::new();
            let mut stack: Vec<&str> = def.references.iter().map(String::as_str).collect();
            while let Some(name) = stack.pop() {
                if !seen.insert(name) {
                    continue;
                }
                if let Some(&j) = index.get(name) {
                    if j != i {
                        needs.insert(j);
                    }
                }
                if let Some(refs) = calls.get(name) {
                    stack.extend(refs.iter().map(String::as_str));
                }
            }
            needs
        })
        .collect();

    let mut done = vec![false; values.len()];
    let mut order = Vec::with_capacity(values.len());
    while order.len() < values.len() {
        let ready = (0..values.len()).find(|&i| !done[i] && deps[i].iter().all(|&j| done[j]));
        let Some(i) = ready.or_else(|| done.iter().position(|d| !d)) else {
            break;
        };
        done[i] = true;
        order.push(values[i]);
    }
    order
}

impl ContextState {
    fn apply_patch(&mut self, patch: &Patch, config: &ContextConfig) -> Result<ExecutionResult, ExecutionError> {
        let mut progress = Progress::default();

        for identity in &patch.removed {
            if self.provenance.get(&identity.name) != Some(identity) {
                tracing::trace!(identity = %identity, "context.stale_removal");
                continue;
            }
            self.provenance.remove(&identity.name);
            self.calls.remove(&identity.name);
            self.namespace.remove(&identity.name);
            progress.changed.push(identity.name.to_string());
        }

        let mut pending: Vec<&Definition> = patch
            .added
            .iter()
            .chain(patch.replaced.iter().map(|r| &r.new))
            .collect();
        pending.sort_by_key(|def| def.span.0);
        let (mut values, late_bound): (Vec<&Definition>, Vec<&Definition>) =
            pending.into_iter().partition(|def| def.kind() == DefKind::Value);

        // Functions, types and imports resolve globals at call time.
        for def in &late_bound {
            self.bind_definition(def, config, &mut progress)?;
        }

        values.extend(patch.refreshed.iter().filter(|def| {
            let owned = self.provenance.get(def.name()) == Some(&def.identity);
            if !owned {
                tracing::trace!(identity = %def.identity, "context.skip_refresh");
            }
            owned
        }));
        let order = evaluation_order(values, &self.calls);
        for def in order {
            self.bind_definition(def, config, &mut progress)?;
        }

        if config.run_code {
            for stmt in &patch.statements {
                self.run_statement(stmt, config, &mut progress)?;
            }
        }

        Ok(progress.finish())
    }

    fn bind_definition(
        &mut self,
        def: &Definition,
        config: &ContextConfig,
        progress: &mut Progress,
    ) -> Result<(), ExecutionError> {
        if !enabled(config, def.kind()) {
            tracing::trace!(identity = %def.identity, "context.skip_disabled");
            return Ok(());
        }

        let value = match &def.body {
            DefBody::Value(expr) => {
                let mut interp = Interpreter::new(&self.namespace, config.recursion_limit);
                let result = interp.eval_top(expr);
                progress.output.extend(interp.take_output());
                result
            }
            DefBody::Function(fn_def) => Ok(make_function(def.name(), fn_def)),
            DefBody::Type { fields } => Ok(Value::Constructor(Arc::new(TypeDef {
                name: def.name().to_string(),
                fields: fields.clone(),
            }))),
            DefBody::Import { module } => builtins::load_module(module),
        }
        .map_err(|e| progress.fail(e, describe(def), Some(def.span)))?;

        if def.kind() == DefKind::Function {
            self.calls.insert(def.name().clone(), def.references.clone());
        } else {
            self.calls.remove(def.name());
        }
        self.namespace.insert(def.name().clone(), value);
        self.provenance.insert(def.name().clone(), def.identity.clone());
        progress.changed.push(def.name().to_string());
        Ok(())
    }

    fn run_statement(
        &mut self,
        stmt: &Statement,
        config: &ContextConfig,
        progress: &mut Progress,
    ) -> Result<(), ExecutionError> {
        let expr = match &stmt.kind {
            StatementKind::Expr(expr) => expr,
            StatementKind::Assign { expr, .. } => expr,
        };
        let mut interp = Interpreter::new(&self.namespace, config.recursion_limit);
        let result = interp.eval_top(expr);
        progress.output.extend(interp.take_output());
        let value = result.map_err(|e| progress.fail(e, describe_statement(stmt), Some(stmt.span)))?;

        match &stmt.kind {
            StatementKind::Expr(_) => progress.last = Some(value),
            StatementKind::Assign { name, .. } => {
                let name = Symbol::from(name.as_str());
                self.provenance.remove(&name);
                self.calls.remove(&name);
                progress.changed.push(name.to_string());
                self.namespace.insert(name, value);
            }
        }
        Ok(())
    }
}
