use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::ast::{Expr, FnDef};
use crate::ast_builder::{
    build_expr, build_fn_def, err, expect_bracket, expect_symbol, extract_optional_docstring,
};
use crate::error::{LiveError, Span};
use crate::names::{DefKind, Identity, Origin, Symbol};
use crate::sexp::{parse_sexps, ReadError, Sexp};

/// Syntactic body of a definition, already built into an AST.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DefBody {
    Value(Expr),
    Function(FnDef),
    Type { fields: Vec<String> },
    Import { module: String },
}

/// A named top-level definition of a source unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Definition {
    pub identity: Identity,
    pub docstring: Option<String>,
    pub body: DefBody,
    /// The defining form as read.
    pub form: Sexp,
    /// Layout-insensitive rendering of `form`.
    pub canonical: String,
    /// Global names the body reads.
    pub references: BTreeSet<String>,
    pub span: Span,
}

impl Definition {
    pub fn name(&self) -> &Symbol {
        &self.identity.name
    }

    pub fn kind(&self) -> DefKind {
        self.identity.kind
    }

    /// Same kind and same normalized body text.
    pub fn is_equivalent(&self, other: &Definition) -> bool {
        self.kind() == other.kind() && self.canonical == other.canonical
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StatementKind {
    Expr(Expr),
    /// `(set! name expr)`: rebinds `name` without provenance.
    Assign { name: String, expr: Expr },
}

/// A top-level form that is not a definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    pub kind: StatementKind,
    pub canonical: String,
    pub references: BTreeSet<String>,
    pub span: Span,
}

/// One version of a REPL fragment or watched file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceUnit {
    pub origin: Origin,
    pub definitions: Vec<Definition>,
    pub statements: Vec<Statement>,
    pub content_hash: String,
}

impl SourceUnit {
    /// The version of an origin that no longer exists.
    pub fn empty(origin: Origin) -> Self {
        SourceUnit {
            origin,
            definitions: Vec::new(),
            statements: Vec::new(),
            content_hash: hash_source(""),
        }
    }

    pub fn definition(&self, name: &str) -> Option<&Definition> {
        self.definitions.iter().find(|d| d.name() == name)
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty() && self.statements.is_empty()
    }
}

/// SHA-256 hex digest of source text.
pub fn hash_source(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    let result = hasher.finalize();
    hex_encode(&result)
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Parse source text into a unit. Pure: touches no context.
pub fn parse(origin: Origin, text: &str) -> Result<SourceUnit, LiveError> {
    let syntax = |e: ReadError| LiveError::Syntax {
        origin: origin.clone(),
        message: e.message,
        offset: e.offset,
    };

    let forms = parse_sexps(text).map_err(syntax)?;
    let mut definitions: Vec<Definition> = Vec::new();
    let mut statements = Vec::new();
    let mut seen: BTreeMap<Symbol, usize> = BTreeMap::new();

    for form in forms {
        match classify(&origin, form).map_err(syntax)? {
            TopLevel::Definition(def) => {
                if seen.contains_key(def.name()) {
                    return Err(LiveError::DuplicateDefinition {
                        origin: origin.clone(),
                        name: def.name().to_string(),
                        offset: def.span.0,
                    });
                }
                seen.insert(def.name().clone(), definitions.len());
                definitions.push(def);
            }
            TopLevel::Statement(stmt) => statements.push(stmt),
        }
    }

    Ok(SourceUnit {
        origin,
        definitions,
        statements,
        content_hash: hash_source(text),
    })
}

enum TopLevel {
    Definition(Definition),
    Statement(Statement),
}

fn classify(origin: &Origin, form: Sexp) -> Result<TopLevel, ReadError> {
    let span = form.span();
    let head = form.head().map(str::to_string);
    let children: &[Sexp] = match &form {
        Sexp::List(children, _) => children,
        _ => &[],
    };

    let (name, kind, docstring, body) = match head.as_deref() {
        Some("def") => build_def(children, span)?,
        Some("defn") => build_defn(children, span)?,
        Some("deftype") => build_deftype(children, span)?,
        Some("import") => build_import(children, span)?,
        Some("set!") => {
            if children.len() != 3 {
                return Err(err("set! requires a name and a value", span));
            }
            let name = binding_name(&children[1])?;
            let expr = build_expr(&children[2])?;
            let references = expr.free_globals();
            return Ok(TopLevel::Statement(Statement {
                kind: StatementKind::Assign { name, expr },
                canonical: form.canonical(),
                references,
                span,
            }));
        }
        _ => {
            let expr = build_expr(&form)?;
            let references = expr.free_globals();
            return Ok(TopLevel::Statement(Statement {
                kind: StatementKind::Expr(expr),
                canonical: form.canonical(),
                references,
                span,
            }));
        }
    };

    let mut references = match &body {
        DefBody::Value(expr) => expr.free_globals(),
        DefBody::Function(def) => def.free_globals(),
        DefBody::Type { .. } | DefBody::Import { .. } => BTreeSet::new(),
    };
    if kind == DefKind::Function {
        references.remove(&name);
    }

    Ok(TopLevel::Definition(Definition {
        identity: Identity::new(origin.clone(), name, kind),
        docstring,
        body,
        canonical: form.canonical(),
        form,
        references,
        span,
    }))
}

type DefParts = (String, DefKind, Option<String>, DefBody);

fn binding_name(sexp: &Sexp) -> Result<String, ReadError> {
    let (name, span) = expect_symbol(sexp, "binding name")?;
    if name.contains('.') || name == "nil" {
        return Err(err(format!("'{}' cannot be bound", name), span));
    }
    Ok(name.to_string())
}

fn build_def(children: &[Sexp], span: Span) -> Result<DefParts, ReadError> {
    // (def name "doc"? expr)
    if children.len() < 3 {
        return Err(err("def requires a name and a value", span));
    }
    let name = binding_name(&children[1])?;
    let (docstring, pos) = extract_optional_docstring(children, 2);
    if children.len() != pos + 1 {
        return Err(err("def takes exactly one value expression", span));
    }
    let expr = build_expr(&children[pos])?;
    Ok((name, DefKind::Value, docstring, DefBody::Value(expr)))
}

fn build_defn(children: &[Sexp], span: Span) -> Result<DefParts, ReadError> {
    // (defn name "doc"? [params] body...)
    if children.len() < 4 {
        return Err(err("defn requires a name, parameter list and body", span));
    }
    let name = binding_name(&children[1])?;
    let (docstring, pos) = extract_optional_docstring(children, 2);
    let def = build_fn_def(&children[pos..], span)?;
    Ok((name, DefKind::Function, docstring, DefBody::Function(def)))
}

fn build_deftype(children: &[Sexp], span: Span) -> Result<DefParts, ReadError> {
    // (deftype Name "doc"? [field...])
    if children.len() < 3 {
        return Err(err("deftype requires a name and a field list", span));
    }
    let name = binding_name(&children[1])?;
    let (docstring, pos) = extract_optional_docstring(children, 2);
    if children.len() != pos + 1 {
        return Err(err("deftype takes a single field list", span));
    }
    let mut fields: Vec<String> = Vec::new();
    for field in expect_bracket(&children[pos], "field list")? {
        let (field_name, field_span) = expect_symbol(field, "field name")?;
        if fields.iter().any(|f| f == field_name) {
            return Err(err(format!("duplicate field '{}'", field_name), field_span));
        }
        fields.push(field_name.to_string());
    }
    Ok((name, DefKind::Type, docstring, DefBody::Type { fields }))
}

fn build_import(children: &[Sexp], span: Span) -> Result<DefParts, ReadError> {
    // (import module alias?)
    if children.len() != 2 && children.len() != 3 {
        return Err(err("import requires a module name and optional alias", span));
    }
    let module = binding_name(&children[1])?;
    let name = match children.get(2) {
        Some(alias) => binding_name(alias)?,
        None => module.clone(),
    };
    Ok((name, DefKind::Import, None, DefBody::Import { module }))
}
