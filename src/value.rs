use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::ast::Expr;
use crate::builtins::Builtin;
use crate::eval::Env;
use crate::names::Symbol;

/// Live bindings of a context.
pub type Namespace = BTreeMap<Symbol, Value>;

/// Runtime value. Immutable once created; compound values are shared.
#[derive(Debug, Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    Keyword(Arc<str>),
    Vector(Arc<Vec<Value>>),
    Lambda(Arc<Lambda>),
    Builtin(&'static Builtin),
    Record(Arc<Record>),
    /// The constructor bound by `deftype`.
    Constructor(Arc<TypeDef>),
    Module(Arc<Module>),
}

/// A closure: parameters, body and the local environment it was created in.
#[derive(Debug)]
pub struct Lambda {
    pub name: Option<String>,
    pub params: Vec<String>,
    pub rest: Option<String>,
    pub body: Vec<Expr>,
    pub env: Env,
}

#[derive(Debug, PartialEq, Eq)]
pub struct TypeDef {
    pub name: String,
    pub fields: Vec<String>,
}

#[derive(Debug)]
pub struct Record {
    pub ty: Arc<TypeDef>,
    pub values: Vec<Value>,
}

impl Record {
    pub fn field(&self, name: &str) -> Option<&Value> {
        let idx = self.ty.fields.iter().position(|f| f == name)?;
        self.values.get(idx)
    }
}

/// An imported host module: named members resolved through `alias.member`.
#[derive(Debug)]
pub struct Module {
    pub name: String,
    pub members: BTreeMap<String, Value>,
}

impl Value {
    pub fn str(s: &str) -> Value {
        Value::Str(Arc::from(s))
    }

    pub fn vector(items: Vec<Value>) -> Value {
        Value::Vector(Arc::new(items))
    }

    /// Everything except `nil` and `false` is truthy.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    pub fn type_name(&self) -> &str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Keyword(_) => "keyword",
            Value::Vector(_) => "vector",
            Value::Lambda(_) | Value::Builtin(_) => "fn",
            Value::Record(rec) => &rec.ty.name,
            Value::Constructor(_) => "type",
            Value::Module(_) => "module",
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Printed form with strings quoted, as used inside collections.
    pub fn repr(&self) -> String {
        match self {
            Value::Str(s) => format!("{:?}", &**s),
            other => other.to_string(),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => (*a as f64) == *b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Keyword(a), Value::Keyword(b)) => a == b,
            (Value::Vector(a), Value::Vector(b)) => a == b,
            (Value::Lambda(a), Value::Lambda(b)) => Arc::ptr_eq(a, b),
            (Value::Builtin(a), Value::Builtin(b)) => a.name == b.name,
            (Value::Record(a), Value::Record(b)) => a.ty == b.ty && a.values == b.values,
            (Value::Constructor(a), Value::Constructor(b)) => Arc::ptr_eq(a, b),
            (Value::Module(a), Value::Module(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(v) => {
                if v.fract() == 0.0 && v.is_finite() {
                    write!(f, "{:.1}", v)
                } else {
                    write!(f, "{}", v)
                }
            }
            Value::Str(s) => write!(f, "{}", s),
            Value::Keyword(k) => write!(f, ":{}", k),
            Value::Vector(items) => {
                let parts: Vec<String> = items.iter().map(Value::repr).collect();
                write!(f, "[{}]", parts.join(" "))
            }
            Value::Lambda(lambda) => match &lambda.name {
                Some(name) => write!(f, "#<fn {}>", name),
                None => write!(f, "#<fn>"),
            },
            Value::Builtin(b) => write!(f, "#<builtin {}>", b.name),
            Value::Record(rec) => {
                write!(f, "({}", rec.ty.name)?;
                for v in &rec.values {
                    write!(f, " {}", v.repr())?;
                }
                write!(f, ")")
            }
            Value::Constructor(ty) => write!(f, "#<type {}>", ty.name),
            Value::Module(m) => write!(f, "#<module {}>", m.name),
        }
    }
}
