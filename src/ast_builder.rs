use crate::ast::{Expr, FnDef};
use crate::error::Span;
use crate::sexp::{ReadError, Sexp};

/// Forms that are only meaningful as top-level forms of a source unit.
pub const TOP_LEVEL_ONLY: &[&str] = &["def", "defn", "deftype", "import", "set!"];

// ── Error helper ────────────────────────────────────────────────────────

pub(crate) fn err(message: impl Into<String>, span: Span) -> ReadError {
    ReadError {
        message: message.into(),
        offset: span.0,
    }
}

// ── Sexp inspection helpers ─────────────────────────────────────────────

pub(crate) fn expect_symbol<'a>(sexp: &'a Sexp, what: &str) -> Result<(&'a str, Span), ReadError> {
    match sexp {
        Sexp::Symbol(s, span) if !s.starts_with(':') && s != "&" => Ok((s.as_str(), *span)),
        _ => Err(err(format!("expected {}", what), sexp.span())),
    }
}

pub(crate) fn expect_bracket<'a>(sexp: &'a Sexp, what: &str) -> Result<&'a [Sexp], ReadError> {
    match sexp {
        Sexp::Bracket(children, _) => Ok(children.as_slice()),
        _ => Err(err(format!("expected {} [...]", what), sexp.span())),
    }
}

/// Extract an optional docstring from `children[start]`. Returns (docstring, next_pos).
/// A string in the last position is a body, not a docstring.
pub(crate) fn extract_optional_docstring(children: &[Sexp], start: usize) -> (Option<String>, usize) {
    if start + 1 < children.len() {
        if let Sexp::Str(doc, _) = &children[start] {
            return (Some(doc.clone()), start + 1);
        }
    }
    (None, start)
}

// ── Expression builders ─────────────────────────────────────────────────

pub fn build_expr(sexp: &Sexp) -> Result<Expr, ReadError> {
    match sexp {
        Sexp::Int(v, span) => Ok(Expr::IntLit {
            value: *v,
            span: *span,
        }),
        Sexp::Float(v, span) => Ok(Expr::FloatLit {
            value: *v,
            span: *span,
        }),
        Sexp::Bool(v, span) => Ok(Expr::BoolLit {
            value: *v,
            span: *span,
        }),
        Sexp::Str(v, span) => Ok(Expr::StringLit {
            value: v.clone(),
            span: *span,
        }),
        Sexp::Symbol(name, span) => {
            if name == "nil" {
                Ok(Expr::Nil { span: *span })
            } else if let Some(keyword) = name.strip_prefix(':') {
                Ok(Expr::Keyword {
                    name: keyword.to_string(),
                    span: *span,
                })
            } else if name == "&" {
                Err(err("'&' is only allowed in parameter vectors", *span))
            } else {
                Ok(Expr::Var {
                    name: name.clone(),
                    span: *span,
                })
            }
        }
        Sexp::List(children, span) => build_list_expr(children, *span),
        Sexp::Bracket(children, span) => {
            // Bracket in expression position → VecLit
            let elements = build_all(children)?;
            Ok(Expr::VecLit {
                elements,
                span: *span,
            })
        }
    }
}

fn build_all(items: &[Sexp]) -> Result<Vec<Expr>, ReadError> {
    items.iter().map(build_expr).collect()
}

fn build_list_expr(children: &[Sexp], span: Span) -> Result<Expr, ReadError> {
    if children.is_empty() {
        return Err(err("empty application", span));
    }

    if let Sexp::Symbol(head, _) = &children[0] {
        match head.as_str() {
            "let" => return build_let(children, span),
            "if" => return build_if(children, span),
            "cond" => return build_cond(children, span),
            "fn" => {
                if children.len() < 3 {
                    return Err(err("fn requires param list and body", span));
                }
                let FnDef { params, rest, body } = build_fn_def(&children[1..], span)?;
                return Ok(Expr::Lambda {
                    params,
                    rest,
                    body,
                    span,
                });
            }
            "do" => {
                return Ok(Expr::Do {
                    body: build_all(&children[1..])?,
                    span,
                })
            }
            "and" => {
                return Ok(Expr::And {
                    args: build_all(&children[1..])?,
                    span,
                })
            }
            "or" => {
                return Ok(Expr::Or {
                    args: build_all(&children[1..])?,
                    span,
                })
            }
            h if TOP_LEVEL_ONLY.contains(&h) => {
                return Err(err(format!("'{}' is only allowed at top level", h), span));
            }
            _ => {}
        }
    }

    let callee = build_expr(&children[0])?;
    let args = build_all(&children[1..])?;
    Ok(Expr::Apply {
        callee: Box::new(callee),
        args,
        span,
    })
}

fn build_let(children: &[Sexp], span: Span) -> Result<Expr, ReadError> {
    // (let [a 1 b 2] body...)
    if children.len() < 3 {
        return Err(err("let requires bindings and body", span));
    }
    let items = expect_bracket(&children[1], "let bindings")?;
    if items.len() % 2 != 0 {
        return Err(err("let bindings must be name/value pairs", children[1].span()));
    }
    let mut bindings = Vec::with_capacity(items.len() / 2);
    for pair in items.chunks(2) {
        let (name, _) = expect_symbol(&pair[0], "binding name")?;
        bindings.push((name.to_string(), build_expr(&pair[1])?));
    }
    Ok(Expr::Let {
        bindings,
        body: build_all(&children[2..])?,
        span,
    })
}

fn build_if(children: &[Sexp], span: Span) -> Result<Expr, ReadError> {
    // (if cond then else?)
    if children.len() != 3 && children.len() != 4 {
        return Err(err("if requires condition, then and optional else", span));
    }
    let else_branch = match children.get(3) {
        Some(sexp) => Some(Box::new(build_expr(sexp)?)),
        None => None,
    };
    Ok(Expr::If {
        cond: Box::new(build_expr(&children[1])?),
        then_branch: Box::new(build_expr(&children[2])?),
        else_branch,
        span,
    })
}

fn build_cond(children: &[Sexp], span: Span) -> Result<Expr, ReadError> {
    // (cond test1 result1 test2 result2 :else fallback)
    let items = &children[1..];
    if items.len() % 2 != 0 {
        return Err(err("cond requires test/result pairs", span));
    }
    let mut clauses = Vec::with_capacity(items.len() / 2);
    for pair in items.chunks(2) {
        clauses.push((build_expr(&pair[0])?, build_expr(&pair[1])?));
    }
    Ok(Expr::Cond { clauses, span })
}

/// Build a function shape from `[params] body...`.
pub fn build_fn_def(items: &[Sexp], span: Span) -> Result<FnDef, ReadError> {
    let Some(first) = items.first() else {
        return Err(err("missing parameter list", span));
    };
    let param_items = expect_bracket(first, "parameter list")?;
    if items.len() < 2 {
        return Err(err("function requires a body", span));
    }

    let mut params = Vec::new();
    let mut rest = None;
    let mut i = 0;
    while i < param_items.len() {
        match &param_items[i] {
            Sexp::Symbol(s, amp_span) if s == "&" => {
                if i + 2 != param_items.len() {
                    return Err(err("'&' must be followed by exactly one name", *amp_span));
                }
                let (name, _) = expect_symbol(&param_items[i + 1], "rest parameter name")?;
                rest = Some(name.to_string());
                break;
            }
            other => {
                let (name, pspan) = expect_symbol(other, "parameter name")?;
                if params.iter().any(|p| p == name) {
                    return Err(err(format!("duplicate parameter '{}'", name), pspan));
                }
                params.push(name.to_string());
            }
        }
        i += 1;
    }

    Ok(FnDef {
        params,
        rest,
        body: build_all(&items[1..])?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sexp::parse_sexp;

    fn build(src: &str) -> Result<Expr, ReadError> {
        build_expr(&parse_sexp(src).unwrap())
    }

    #[test]
    fn build_literals_and_keywords() {
        assert!(matches!(build("nil").unwrap(), Expr::Nil { .. }));
        match build(":x").unwrap() {
            Expr::Keyword { name, .. } => assert_eq!(name, "x"),
            other => panic!("expected Keyword, got {:?}", other),
        }
    }

    #[test]
    fn build_lambda_with_rest() {
        match build("(fn [a & xs] (conj xs a))").unwrap() {
            Expr::Lambda { params, rest, body, .. } => {
                assert_eq!(params, vec!["a"]);
                assert_eq!(rest.as_deref(), Some("xs"));
                assert_eq!(body.len(), 1);
            }
            other => panic!("expected Lambda, got {:?}", other),
        }
    }

    #[test]
    fn build_if_without_else() {
        match build("(if ok 1)").unwrap() {
            Expr::If { else_branch, .. } => assert!(else_branch.is_none()),
            other => panic!("expected If, got {:?}", other),
        }
    }

    #[test]
    fn nested_def_is_rejected() {
        let e = build("(do (def x 1))").unwrap_err();
        assert!(e.message.contains("only allowed at top level"), "{}", e.message);
        assert_eq!(e.offset, 4);
    }

    #[test]
    fn let_requires_pairs() {
        assert!(build("(let [a] a)").is_err());
    }

    #[test]
    fn duplicate_params_are_rejected() {
        assert!(build("(fn [a a] a)").is_err());
    }

    #[test]
    fn empty_application_is_rejected() {
        assert!(build("()").is_err());
    }
}
