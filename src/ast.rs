use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::Span;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Nil {
        span: Span,
    },
    IntLit {
        value: i64,
        span: Span,
    },
    FloatLit {
        value: f64,
        span: Span,
    },
    BoolLit {
        value: bool,
        span: Span,
    },
    StringLit {
        value: String,
        span: Span,
    },
    /// `:name` evaluates to itself.
    Keyword {
        name: String,
        span: Span,
    },
    /// Local, global, prelude or dotted (`module.member`, `record.field`) reference.
    Var {
        name: String,
        span: Span,
    },
    Let {
        bindings: Vec<(String, Expr)>,
        body: Vec<Expr>,
        span: Span,
    },
    If {
        cond: Box<Expr>,
        then_branch: Box<Expr>,
        else_branch: Option<Box<Expr>>,
        span: Span,
    },
    Cond {
        clauses: Vec<(Expr, Expr)>,
        span: Span,
    },
    Lambda {
        params: Vec<String>,
        rest: Option<String>,
        body: Vec<Expr>,
        span: Span,
    },
    Do {
        body: Vec<Expr>,
        span: Span,
    },
    And {
        args: Vec<Expr>,
        span: Span,
    },
    Or {
        args: Vec<Expr>,
        span: Span,
    },
    Apply {
        callee: Box<Expr>,
        args: Vec<Expr>,
        span: Span,
    },
    VecLit {
        elements: Vec<Expr>,
        span: Span,
    },
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::Nil { span }
            | Expr::IntLit { span, .. }
            | Expr::FloatLit { span, .. }
            | Expr::BoolLit { span, .. }
            | Expr::StringLit { span, .. }
            | Expr::Keyword { span, .. }
            | Expr::Var { span, .. }
            | Expr::Let { span, .. }
            | Expr::If { span, .. }
            | Expr::Cond { span, .. }
            | Expr::Lambda { span, .. }
            | Expr::Do { span, .. }
            | Expr::And { span, .. }
            | Expr::Or { span, .. }
            | Expr::Apply { span, .. }
            | Expr::VecLit { span, .. } => *span,
        }
    }

    /// Global names this expression reads, i.e. variables not bound by an
    /// enclosing `let` or `fn`. Dotted references also report their head.
    pub fn free_globals(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        let mut scope = Vec::new();
        self.collect_free(&mut scope, &mut out);
        out
    }

    pub(crate) fn collect_free(&self, scope: &mut Vec<String>, out: &mut BTreeSet<String>) {
        match self {
            Expr::Nil { .. }
            | Expr::IntLit { .. }
            | Expr::FloatLit { .. }
            | Expr::BoolLit { .. }
            | Expr::StringLit { .. }
            | Expr::Keyword { .. } => {}
            Expr::Var { name, .. } => {
                if scope.iter().any(|s| s == name) {
                    return;
                }
                if let Some((head, _)) = name.split_once('.') {
                    if scope.iter().any(|s| s == head) {
                        return;
                    }
                    out.insert(head.to_string());
                }
                out.insert(name.clone());
            }
            Expr::Let { bindings, body, .. } => {
                let mark = scope.len();
                for (name, value) in bindings {
                    value.collect_free(scope, out);
                    scope.push(name.clone());
                }
                for expr in body {
                    expr.collect_free(scope, out);
                }
                scope.truncate(mark);
            }
            Expr::If {
                cond,
                then_branch,
                else_branch,
                ..
            } => {
                cond.collect_free(scope, out);
                then_branch.collect_free(scope, out);
                if let Some(else_branch) = else_branch {
                    else_branch.collect_free(scope, out);
                }
            }
            Expr::Cond { clauses, .. } => {
                for (test, result) in clauses {
                    test.collect_free(scope, out);
                    result.collect_free(scope, out);
                }
            }
            Expr::Lambda {
                params, rest, body, ..
            } => {
                let mark = scope.len();
                scope.extend(params.iter().cloned());
                scope.extend(rest.iter().cloned());
                for expr in body {
                    expr.collect_free(scope, out);
                }
                scope.truncate(mark);
            }
            Expr::Do { body: args, .. }
            | Expr::And { args, .. }
            | Expr::Or { args, .. }
            | Expr::VecLit { elements: args, .. } => {
                for expr in args {
                    expr.collect_free(scope, out);
                }
            }
            Expr::Apply { callee, args, .. } => {
                callee.collect_free(scope, out);
                for expr in args {
                    expr.collect_free(scope, out);
                }
            }
        }
    }
}

/// A parsed `(defn name [params] body...)` or `(fn [params] body...)` shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FnDef {
    pub params: Vec<String>,
    pub rest: Option<String>,
    pub body: Vec<Expr>,
}

impl FnDef {
    /// Free globals of the function body, excluding its own parameters.
    pub fn free_globals(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        let mut scope: Vec<String> = self.params.clone();
        scope.extend(self.rest.iter().cloned());
        for expr in &self.body {
            expr.collect_free(&mut scope, &mut out);
        }
        out
    }
}
