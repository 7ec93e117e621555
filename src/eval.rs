use std::sync::Arc;

use crate::ast::{Expr, FnDef};
use crate::builtins;
use crate::error::EvalError;
use crate::value::{Lambda, Namespace, Record, Value};

/// Default bound on nested function calls.
pub const DEFAULT_RECURSION_LIMIT: usize = 100;

// ── Local environments ──────────────────────────────────────────────────

/// Immutable chain of local bindings. Cloning shares the chain.
#[derive(Debug, Clone, Default)]
pub struct Env(Option<Arc<Frame>>);

#[derive(Debug)]
pub struct Frame {
    name: String,
    value: Value,
    parent: Env,
}

impl Env {
    pub fn new() -> Self {
        Env(None)
    }

    pub fn bind(&self, name: impl Into<String>, value: Value) -> Env {
        Env(Some(Arc::new(Frame {
            name: name.into(),
            value,
            parent: self.clone(),
        })))
    }

    pub fn lookup(&self, name: &str) -> Option<&Value> {
        let mut cur = self.0.as_deref();
        while let Some(frame) = cur {
            if frame.name == name {
                return Some(&frame.value);
            }
            cur = frame.parent.0.as_deref();
        }
        None
    }
}

/// Build the closure for a `defn`, named for display.
pub fn make_function(name: &str, def: &FnDef) -> Value {
    Value::Lambda(Arc::new(Lambda {
        name: Some(name.to_string()),
        params: def.params.clone(),
        rest: def.rest.clone(),
        body: def.body.clone(),
        env: Env::new(),
    }))
}

// ── Interpreter ─────────────────────────────────────────────────────────

/// Tree-walking evaluator over a context namespace.
///
/// Globals are looked up at the moment they are read, so a function body
/// always sees the current binding of every global it names.
pub struct Interpreter<'a> {
    globals: &'a Namespace,
    depth: usize,
    limit: usize,
    output: Vec<String>,
}

impl<'a> Interpreter<'a> {
    pub fn new(globals: &'a Namespace, limit: usize) -> Self {
        Interpreter {
            globals,
            depth: 0,
            limit,
            output: Vec::new(),
        }
    }

    /// Lines written by `print`/`println` during this evaluation.
    pub fn take_output(&mut self) -> Vec<String> {
        std::mem::take(&mut self.output)
    }

    pub(crate) fn emit(&mut self, text: String) {
        print!("{}", text);
        self.output.push(text);
    }

    pub fn eval_top(&mut self, expr: &Expr) -> Result<Value, EvalError> {
        self.eval(expr, &Env::new())
    }

    pub fn eval(&mut self, expr: &Expr, env: &Env) -> Result<Value, EvalError> {
        match expr {
            Expr::Nil { .. } => Ok(Value::Nil),
            Expr::IntLit { value, .. } => Ok(Value::Int(*value)),
            Expr::FloatLit { value, .. } => Ok(Value::Float(*value)),
            Expr::BoolLit { value, .. } => Ok(Value::Bool(*value)),
            Expr::StringLit { value, .. } => Ok(Value::str(value)),
            Expr::Keyword { name, .. } => Ok(Value::Keyword(Arc::from(name.as_str()))),
            Expr::Var { name, .. } => self.resolve(name, env),
            Expr::Let { bindings, body, .. } => self.eval_let(bindings, body, env),
            Expr::If {
                cond,
                then_branch,
                else_branch,
                ..
            } => {
                if self.eval(cond, env)?.is_truthy() {
                    self.eval(then_branch, env)
                } else {
                    match else_branch {
                        Some(e) => self.eval(e, env),
                        None => Ok(Value::Nil),
                    }
                }
            }
            Expr::Cond { clauses, .. } => {
                for (test, result) in clauses {
                    if self.eval(test, env)?.is_truthy() {
                        return self.eval(result, env);
                    }
                }
                Ok(Value::Nil)
            }
            Expr::Lambda {
                params, rest, body, ..
            } => Ok(Value::Lambda(Arc::new(Lambda {
                name: None,
                params: params.clone(),
                rest: rest.clone(),
                body: body.clone(),
                env: env.clone(),
            }))),
            Expr::Do { body, .. } => self.eval_body(body, env),
            Expr::And { args, .. } => {
                let mut last = Value::Bool(true);
                for arg in args {
                    last = self.eval(arg, env)?;
                    if !last.is_truthy() {
                        break;
                    }
                }
                Ok(last)
            }
            Expr::Or { args, .. } => {
                let mut last = Value::Nil;
                for arg in args {
                    last = self.eval(arg, env)?;
                    if last.is_truthy() {
                        break;
                    }
                }
                Ok(last)
            }
            Expr::Apply { callee, args, .. } => {
                let f = self.eval(callee, env)?;
                let args = args
                    .iter()
                    .map(|a| self.eval(a, env))
                    .collect::<Result<Vec<_>, _>>()?;
                self.call(&f, &args)
            }
            Expr::VecLit { elements, .. } => {
                let items = elements
                    .iter()
                    .map(|e| self.eval(e, env))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::vector(items))
            }
        }
    }

    fn eval_let(
        &mut self,
        bindings: &[(String, Expr)],
        body: &[Expr],
        env: &Env,
    ) -> Result<Value, EvalError> {
        let mut scope = env.clone();
        for (name, value) in bindings {
            let v = self.eval(value, &scope)?;
            scope = scope.bind(name.as_str(), v);
        }
        self.eval_body(body, &scope)
    }

    fn eval_body(&mut self, body: &[Expr], env: &Env) -> Result<Value, EvalError> {
        let mut last = Value::Nil;
        for expr in body {
            last = self.eval(expr, env)?;
        }
        Ok(last)
    }

    /// Resolve a name: locals, then the namespace, then the prelude.
    /// `head.member` reads a module member or record field.
    fn resolve(&self, name: &str, env: &Env) -> Result<Value, EvalError> {
        if let Some(v) = self.resolve_plain(name, env) {
            return Ok(v);
        }
        let Some((head, member)) = name.split_once('.') else {
            return Err(EvalError::Unbound(name.to_string()));
        };
        let target = self
            .resolve_plain(head, env)
            .ok_or_else(|| EvalError::Unbound(name.to_string()))?;
        match &target {
            Value::Module(module) => module
                .members
                .get(member)
                .cloned()
                .ok_or_else(|| EvalError::NoMember(format!("module {}", module.name), member.to_string())),
            Value::Record(rec) => rec
                .field(member)
                .cloned()
                .ok_or_else(|| EvalError::NoMember(rec.ty.name.clone(), member.to_string())),
            other => Err(EvalError::NoMember(other.type_name().to_string(), member.to_string())),
        }
    }

    fn resolve_plain(&self, name: &str, env: &Env) -> Option<Value> {
        if let Some(v) = env.lookup(name) {
            return Some(v.clone());
        }
        if let Some(v) = self.globals.get(name) {
            return Some(v.clone());
        }
        builtins::prelude(name).map(Value::Builtin)
    }

    /// Call any callable value with evaluated arguments.
    pub fn call(&mut self, f: &Value, args: &[Value]) -> Result<Value, EvalError> {
        match f {
            Value::Builtin(b) => {
                b.check_arity(args.len())?;
                (b.func)(self, args)
            }
            Value::Lambda(lambda) => self.call_lambda(lambda, args),
            Value::Constructor(ty) => {
                if args.len() != ty.fields.len() {
                    return Err(EvalError::Arity {
                        name: ty.name.clone(),
                        expected: ty.fields.len().to_string(),
                        found: args.len(),
                    });
                }
                Ok(Value::Record(Arc::new(Record {
                    ty: ty.clone(),
                    values: args.to_vec(),
                })))
            }
            other => Err(EvalError::NotCallable(other.repr())),
        }
    }

    fn call_lambda(&mut self, lambda: &Lambda, args: &[Value]) -> Result<Value, EvalError> {
        let arity_ok = match lambda.rest {
            Some(_) => args.len() >= lambda.params.len(),
            None => args.len() == lambda.params.len(),
        };
        if !arity_ok {
            let expected = match lambda.rest {
                Some(_) => format!("at least {}", lambda.params.len()),
                None => lambda.params.len().to_string(),
            };
            return Err(EvalError::Arity {
                name: lambda.name.clone().unwrap_or_else(|| "fn".to_string()),
                expected,
                found: args.len(),
            });
        }
        if self.depth >= self.limit {
            return Err(EvalError::RecursionLimit(self.limit));
        }

        let mut env = lambda.env.clone();
        for (param, arg) in lambda.params.iter().zip(args) {
            env = env.bind(param.as_str(), arg.clone());
        }
        if let Some(rest) = &lambda.rest {
            env = env.bind(rest.as_str(), Value::vector(args[lambda.params.len()..].to_vec()));
        }

        self.depth += 1;
        let result = self.eval_body(&lambda.body, &env);
        self.depth -= 1;
        result
    }
}
