//! Core prelude and importable host modules.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::EvalError;
use crate::eval::Interpreter;
use crate::value::{Module, Value};

pub type BuiltinFn = fn(&mut Interpreter<'_>, &[Value]) -> Result<Value, EvalError>;

/// A host function callable from scripts.
pub struct Builtin {
    pub name: &'static str,
    pub min_args: usize,
    /// `None` for variadic builtins.
    pub max_args: Option<usize>,
    pub func: BuiltinFn,
}

impl fmt::Debug for Builtin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Builtin({})", self.name)
    }
}

impl Builtin {
    pub fn check_arity(&self, found: usize) -> Result<(), EvalError> {
        let ok = found >= self.min_args && self.max_args.map_or(true, |max| found <= max);
        if ok {
            return Ok(());
        }
        let expected = match self.max_args {
            Some(max) if max == self.min_args => max.to_string(),
            Some(max) => format!("{}..{}", self.min_args, max),
            None => format!("at least {}", self.min_args),
        };
        Err(EvalError::Arity {
            name: self.name.to_string(),
            expected,
            found,
        })
    }
}

macro_rules! builtin {
    ($name:expr, $min:expr, $max:expr, $func:expr) => {
        Builtin {
            name: $name,
            min_args: $min,
            max_args: $max,
            func: $func,
        }
    };
}

// ── Prelude ─────────────────────────────────────────────────────────────

static PRELUDE: &[Builtin] = &[
    builtin!("+", 0, None, add),
    builtin!("-", 1, None, sub),
    builtin!("*", 0, None, mul),
    builtin!("/", 1, None, div),
    builtin!("mod", 2, Some(2), modulo),
    builtin!("=", 1, None, eq),
    builtin!("<", 1, None, lt),
    builtin!(">", 1, None, gt),
    builtin!("<=", 1, None, le),
    builtin!(">=", 1, None, ge),
    builtin!("not", 1, Some(1), not),
    builtin!("inc", 1, Some(1), inc),
    builtin!("dec", 1, Some(1), dec),
    builtin!("nil?", 1, Some(1), is_nil),
    builtin!("str", 0, None, str_concat),
    builtin!("print", 0, None, print),
    builtin!("println", 0, None, println),
    builtin!("vector", 0, None, vector),
    builtin!("count", 1, Some(1), count),
    builtin!("first", 1, Some(1), first),
    builtin!("rest", 1, Some(1), rest),
    builtin!("conj", 2, None, conj),
    builtin!("nth", 2, Some(2), nth),
    builtin!("get", 2, Some(3), get),
    builtin!("map", 2, Some(2), map),
    builtin!("filter", 2, Some(2), filter),
    builtin!("reduce", 3, Some(3), reduce),
    builtin!("apply", 2, Some(2), apply),
    builtin!("error", 1, None, error),
    builtin!("type-of", 1, Some(1), type_of),
];

/// Look up a prelude builtin by name.
pub fn prelude(name: &str) -> Option<&'static Builtin> {
    PRELUDE.iter().find(|b| b.name == name)
}

// ── Host modules ────────────────────────────────────────────────────────

static MATH: &[Builtin] = &[
    builtin!("sqrt", 1, Some(1), math_sqrt),
    builtin!("abs", 1, Some(1), math_abs),
    builtin!("floor", 1, Some(1), math_floor),
    builtin!("ceil", 1, Some(1), math_ceil),
    builtin!("pow", 2, Some(2), math_pow),
    builtin!("min", 1, None, math_min),
    builtin!("max", 1, None, math_max),
];

static STRING: &[Builtin] = &[
    builtin!("upper", 1, Some(1), string_upper),
    builtin!("lower", 1, Some(1), string_lower),
    builtin!("length", 1, Some(1), string_length),
    builtin!("join", 2, Some(2), string_join),
    builtin!("split", 2, Some(2), string_split),
    builtin!("trim", 1, Some(1), string_trim),
    builtin!("contains?", 2, Some(2), string_contains),
];

/// Instantiate an importable host module.
pub fn load_module(name: &str) -> Result<Value, EvalError> {
    let (functions, constants): (&'static [Builtin], Vec<(&str, Value)>) = match name {
        "math" => (MATH, vec![("pi", Value::Float(std::f64::consts::PI))]),
        "string" => (STRING, Vec::new()),
        _ => return Err(EvalError::UnknownModule(name.to_string())),
    };
    let mut members: BTreeMap<String, Value> = functions
        .iter()
        .map(|b| (b.name.to_string(), Value::Builtin(b)))
        .collect();
    for (k, v) in constants {
        members.insert(k.to_string(), v);
    }
    Ok(Value::Module(Arc::new(Module {
        name: name.to_string(),
        members,
    })))
}

// ── Argument helpers ────────────────────────────────────────────────────

fn type_err(op: &str, expected: &'static str, found: &Value) -> EvalError {
    EvalError::Type {
        op: op.to_string(),
        expected,
        found: found.type_name().to_string(),
    }
}

fn num(op: &str, v: &Value) -> Result<f64, EvalError> {
    v.as_float().ok_or_else(|| type_err(op, "number", v))
}

fn int(op: &str, v: &Value) -> Result<i64, EvalError> {
    v.as_int().ok_or_else(|| type_err(op, "int", v))
}

fn string<'v>(op: &str, v: &'v Value) -> Result<&'v str, EvalError> {
    v.as_str().ok_or_else(|| type_err(op, "string", v))
}

fn seq<'v>(op: &str, v: &'v Value) -> Result<&'v [Value], EvalError> {
    match v {
        Value::Vector(items) => Ok(items.as_slice()),
        Value::Nil => Ok(&[]),
        other => Err(type_err(op, "vector", other)),
    }
}

// ── Arithmetic ──────────────────────────────────────────────────────────

/// Fold numbers, staying in integers until a float shows up.
fn arith(
    op: &str,
    args: &[Value],
    init: Value,
    fi: fn(i64, i64) -> Option<i64>,
    ff: fn(f64, f64) -> f64,
) -> Result<Value, EvalError> {
    let mut acc = init;
    for arg in args {
        acc = match (&acc, arg) {
            (Value::Int(a), Value::Int(b)) => match fi(*a, *b) {
                Some(v) => Value::Int(v),
                None => Value::Float(ff(*a as f64, *b as f64)),
            },
            (a, b) => Value::Float(ff(num(op, a)?, num(op, b)?)),
        };
    }
    Ok(acc)
}

fn add(_: &mut Interpreter<'_>, args: &[Value]) -> Result<Value, EvalError> {
    arith("+", args, Value::Int(0), i64::checked_add, |a, b| a + b)
}

fn mul(_: &mut Interpreter<'_>, args: &[Value]) -> Result<Value, EvalError> {
    arith("*", args, Value::Int(1), i64::checked_mul, |a, b| a * b)
}

fn sub(_: &mut Interpreter<'_>, args: &[Value]) -> Result<Value, EvalError> {
    if args.len() == 1 {
        return arith("-", args, Value::Int(0), i64::checked_sub, |a, b| a - b);
    }
    arith("-", &args[1..], args[0].clone(), i64::checked_sub, |a, b| a - b)
}

fn div(_: &mut Interpreter<'_>, args: &[Value]) -> Result<Value, EvalError> {
    let (init, rest) = if args.len() == 1 {
        (Value::Int(1), args)
    } else {
        (args[0].clone(), &args[1..])
    };
    num("/", &init)?;
    let mut acc = init;
    for arg in rest {
        acc = match (&acc, arg) {
            (Value::Int(_), Value::Int(0)) => return Err(EvalError::DivisionByZero),
            (Value::Int(a), Value::Int(b)) if a.checked_rem(*b) == Some(0) => Value::Int(a / b),
            (a, b) => {
                let d = num("/", b)?;
                if d == 0.0 {
                    return Err(EvalError::DivisionByZero);
                }
                Value::Float(num("/", a)? / d)
            }
        };
    }
    Ok(acc)
}

fn modulo(_: &mut Interpreter<'_>, args: &[Value]) -> Result<Value, EvalError> {
    let a = int("mod", &args[0])?;
    let b = int("mod", &args[1])?;
    if b == 0 {
        return Err(EvalError::DivisionByZero);
    }
    a.checked_rem_euclid(b)
        .map(Value::Int)
        .ok_or_else(|| EvalError::Overflow("mod".to_string()))
}

fn inc(_: &mut Interpreter<'_>, args: &[Value]) -> Result<Value, EvalError> {
    arith("inc", args, Value::Int(1), i64::checked_add, |a, b| a + b)
}

fn dec(_: &mut Interpreter<'_>, args: &[Value]) -> Result<Value, EvalError> {
    arith("dec", &[Value::Int(1)], args[0].clone(), i64::checked_sub, |a, b| a - b)
}

// ── Comparison ──────────────────────────────────────────────────────────

fn eq(_: &mut Interpreter<'_>, args: &[Value]) -> Result<Value, EvalError> {
    Ok(Value::Bool(args.windows(2).all(|w| w[0] == w[1])))
}

fn compare(op: &str, args: &[Value], ok: fn(f64, f64) -> bool) -> Result<Value, EvalError> {
    for w in args.windows(2) {
        if !ok(num(op, &w[0])?, num(op, &w[1])?) {
            return Ok(Value::Bool(false));
        }
    }
    if let [only] = args {
        num(op, only)?;
    }
    Ok(Value::Bool(true))
}

fn lt(_: &mut Interpreter<'_>, args: &[Value]) -> Result<Value, EvalError> {
    compare("<", args, |a, b| a < b)
}

fn gt(_: &mut Interpreter<'_>, args: &[Value]) -> Result<Value, EvalError> {
    compare(">", args, |a, b| a > b)
}

fn le(_: &mut Interpreter<'_>, args: &[Value]) -> Result<Value, EvalError> {
    compare("<=", args, |a, b| a <= b)
}

fn ge(_: &mut Interpreter<'_>, args: &[Value]) -> Result<Value, EvalError> {
    compare(">=", args, |a, b| a >= b)
}

fn not(_: &mut Interpreter<'_>, args: &[Value]) -> Result<Value, EvalError> {
    Ok(Value::Bool(!args[0].is_truthy()))
}

fn is_nil(_: &mut Interpreter<'_>, args: &[Value]) -> Result<Value, EvalError> {
    Ok(Value::Bool(matches!(args[0], Value::Nil)))
}

// ── Strings and output ──────────────────────────────────────────────────

fn str_concat(_: &mut Interpreter<'_>, args: &[Value]) -> Result<Value, EvalError> {
    let s: String = args
        .iter()
        .map(|v| match v {
            Value::Nil => String::new(),
            other => other.to_string(),
        })
        .collect();
    Ok(Value::str(&s))
}

fn joined(args: &[Value]) -> String {
    args.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(" ")
}

fn print(interp: &mut Interpreter<'_>, args: &[Value]) -> Result<Value, EvalError> {
    interp.emit(joined(args));
    Ok(Value::Nil)
}

fn println(interp: &mut Interpreter<'_>, args: &[Value]) -> Result<Value, EvalError> {
    interp.emit(format!("{}\n", joined(args)));
    Ok(Value::Nil)
}

fn error(_: &mut Interpreter<'_>, args: &[Value]) -> Result<Value, EvalError> {
    Err(EvalError::Raised(joined(args)))
}

fn type_of(_: &mut Interpreter<'_>, args: &[Value]) -> Result<Value, EvalError> {
    Ok(Value::Keyword(Arc::from(args[0].type_name())))
}

// ── Vectors ─────────────────────────────────────────────────────────────

fn vector(_: &mut Interpreter<'_>, args: &[Value]) -> Result<Value, EvalError> {
    Ok(Value::vector(args.to_vec()))
}

fn count(_: &mut Interpreter<'_>, args: &[Value]) -> Result<Value, EvalError> {
    match &args[0] {
        Value::Str(s) => Ok(Value::Int(s.chars().count() as i64)),
        other => Ok(Value::Int(seq("count", other)?.len() as i64)),
    }
}

fn first(_: &mut Interpreter<'_>, args: &[Value]) -> Result<Value, EvalError> {
    Ok(seq("first", &args[0])?.first().cloned().unwrap_or(Value::Nil))
}

fn rest(_: &mut Interpreter<'_>, args: &[Value]) -> Result<Value, EvalError> {
    let items = seq("rest", &args[0])?;
    Ok(Value::vector(items.iter().skip(1).cloned().collect()))
}

fn conj(_: &mut Interpreter<'_>, args: &[Value]) -> Result<Value, EvalError> {
    let mut items = seq("conj", &args[0])?.to_vec();
    items.extend(args[1..].iter().cloned());
    Ok(Value::vector(items))
}

fn nth(_: &mut Interpreter<'_>, args: &[Value]) -> Result<Value, EvalError> {
    let items = seq("nth", &args[0])?;
    let index = int("nth", &args[1])?;
    usize::try_from(index)
        .ok()
        .and_then(|i| items.get(i))
        .cloned()
        .ok_or(EvalError::Index {
            index,
            len: items.len(),
        })
}

/// `(get coll key default?)`: vector index, record field by keyword, or
/// module member by keyword.
fn get(_: &mut Interpreter<'_>, args: &[Value]) -> Result<Value, EvalError> {
    let default = args.get(2).cloned().unwrap_or(Value::Nil);
    let found = match (&args[0], &args[1]) {
        (Value::Vector(items), Value::Int(i)) => usize::try_from(*i).ok().and_then(|i| items.get(i)).cloned(),
        (Value::Record(rec), Value::Keyword(k)) => rec.field(k).cloned(),
        (Value::Module(m), Value::Keyword(k)) => m.members.get(&**k).cloned(),
        (Value::Nil, _) => None,
        (other, _) => return Err(type_err("get", "vector or record", other)),
    };
    Ok(found.unwrap_or(default))
}

fn map(interp: &mut Interpreter<'_>, args: &[Value]) -> Result<Value, EvalError> {
    let items = seq("map", &args[1])?;
    let out = items
        .iter()
        .map(|item| interp.call(&args[0], std::slice::from_ref(item)))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Value::vector(out))
}

fn filter(interp: &mut Interpreter<'_>, args: &[Value]) -> Result<Value, EvalError> {
    let mut out = Vec::new();
    for item in seq("filter", &args[1])? {
        if interp.call(&args[0], std::slice::from_ref(item))?.is_truthy() {
            out.push(item.clone());
        }
    }
    Ok(Value::vector(out))
}

fn reduce(interp: &mut Interpreter<'_>, args: &[Value]) -> Result<Value, EvalError> {
    let mut acc = args[1].clone();
    for item in seq("reduce", &args[2])? {
        acc = interp.call(&args[0], &[acc, item.clone()])?;
    }
    Ok(acc)
}

fn apply(interp: &mut Interpreter<'_>, args: &[Value]) -> Result<Value, EvalError> {
    let items = seq("apply", &args[1])?.to_vec();
    interp.call(&args[0], &items)
}

// ── math ────────────────────────────────────────────────────────────────

fn math_sqrt(_: &mut Interpreter<'_>, args: &[Value]) -> Result<Value, EvalError> {
    Ok(Value::Float(num("math.sqrt", &args[0])?.sqrt()))
}

fn math_abs(_: &mut Interpreter<'_>, args: &[Value]) -> Result<Value, EvalError> {
    match &args[0] {
        Value::Int(n) => Ok(Value::Int(n.wrapping_abs())),
        other => Ok(Value::Float(num("math.abs", other)?.abs())),
    }
}

fn math_floor(_: &mut Interpreter<'_>, args: &[Value]) -> Result<Value, EvalError> {
    Ok(Value::Int(num("math.floor", &args[0])?.floor() as i64))
}

fn math_ceil(_: &mut Interpreter<'_>, args: &[Value]) -> Result<Value, EvalError> {
    Ok(Value::Int(num("math.ceil", &args[0])?.ceil() as i64))
}

fn math_pow(_: &mut Interpreter<'_>, args: &[Value]) -> Result<Value, EvalError> {
    match (&args[0], &args[1]) {
        (Value::Int(b), Value::Int(e)) if *e >= 0 => match u32::try_from(*e).ok().and_then(|e| b.checked_pow(e)) {
            Some(v) => Ok(Value::Int(v)),
            None => Ok(Value::Float((*b as f64).powf(*e as f64))),
        },
        (b, e) => Ok(Value::Float(num("math.pow", b)?.powf(num("math.pow", e)?))),
    }
}

fn extremum(op: &str, args: &[Value], pick_left: fn(f64, f64) -> bool) -> Result<Value, EvalError> {
    let mut best = &args[0];
    let mut best_n = num(op, best)?;
    for v in &args[1..] {
        let n = num(op, v)?;
        if !pick_left(best_n, n) {
            best = v;
            best_n = n;
        }
    }
    Ok(best.clone())
}

fn math_min(_: &mut Interpreter<'_>, args: &[Value]) -> Result<Value, EvalError> {
    extremum("math.min", args, |a, b| a <= b)
}

fn math_max(_: &mut Interpreter<'_>, args: &[Value]) -> Result<Value, EvalError> {
    extremum("math.max", args, |a, b| a >= b)
}

// ── string ──────────────────────────────────────────────────────────────

fn string_upper(_: &mut Interpreter<'_>, args: &[Value]) -> Result<Value, EvalError> {
    Ok(Value::str(&string("string.upper", &args[0])?.to_uppercase()))
}

fn string_lower(_: &mut Interpreter<'_>, args: &[Value]) -> Result<Value, EvalError> {
    Ok(Value::str(&string("string.lower", &args[0])?.to_lowercase()))
}

fn string_length(_: &mut Interpreter<'_>, args: &[Value]) -> Result<Value, EvalError> {
    Ok(Value::Int(string("string.length", &args[0])?.chars().count() as i64))
}

fn string_join(_: &mut Interpreter<'_>, args: &[Value]) -> Result<Value, EvalError> {
    let sep = string("string.join", &args[0])?;
    let parts: Vec<String> = seq("string.join", &args[1])?
        .iter()
        .map(|v| v.to_string())
        .collect();
    Ok(Value::str(&parts.join(sep)))
}

fn string_split(_: &mut Interpreter<'_>, args: &[Value]) -> Result<Value, EvalError> {
    let s = string("string.split", &args[0])?;
    let sep = string("string.split", &args[1])?;
    Ok(Value::vector(s.split(sep).map(Value::str).collect()))
}

fn string_trim(_: &mut Interpreter<'_>, args: &[Value]) -> Result<Value, EvalError> {
    Ok(Value::str(string("string.trim", &args[0])?.trim()))
}

fn string_contains(_: &mut Interpreter<'_>, args: &[Value]) -> Result<Value, EvalError> {
    let s = string("string.contains?", &args[0])?;
    let needle = string("string.contains?", &args[1])?;
    Ok(Value::Bool(s.contains(needle)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast_builder::build_expr;
    use crate::eval::DEFAULT_RECURSION_LIMIT;
    use crate::names::Symbol;
    use crate::sexp::parse_sexp;
    use crate::value::Namespace;

    fn eval(src: &str) -> Result<Value, EvalError> {
        let mut ns = Namespace::new();
        ns.insert(Symbol::from("m"), load_module("math").unwrap());
        ns.insert(Symbol::from("s"), load_module("string").unwrap());
        let expr = build_expr(&parse_sexp(src).unwrap()).unwrap();
        Interpreter::new(&ns, DEFAULT_RECURSION_LIMIT).eval_top(&expr)
    }

    #[test]
    fn integer_arithmetic_stays_integer() {
        assert_eq!(eval("(+ 1 2 3)").unwrap(), Value::Int(6));
        assert_eq!(eval("(- 10 4 1)").unwrap(), Value::Int(5));
        assert_eq!(eval("(- 3)").unwrap(), Value::Int(-3));
        assert_eq!(eval("(/ 12 4)").unwrap(), Value::Int(3));
        assert_eq!(eval("(mod -1 3)").unwrap(), Value::Int(2));
    }

    #[test]
    fn mixed_arithmetic_promotes_to_float() {
        match eval("(/ 7 2)").unwrap() {
            Value::Float(v) => assert!((v - 3.5).abs() < 1e-10),
            other => panic!("expected Float, got {:?}", other),
        }
        match eval("(* 2 1.5)").unwrap() {
            Value::Float(v) => assert!((v - 3.0).abs() < 1e-10),
            other => panic!("expected Float, got {:?}", other),
        }
    }

    #[test]
    fn division_by_zero() {
        assert_eq!(eval("(/ 1 0)"), Err(EvalError::DivisionByZero));
        assert_eq!(eval("(mod 1 0)"), Err(EvalError::DivisionByZero));
    }

    #[test]
    fn modulo_overflow_is_an_error() {
        assert_eq!(
            eval("(mod -9223372036854775808 -1)"),
            Err(EvalError::Overflow("mod".to_string()))
        );
        assert_eq!(eval("(mod -9223372036854775807 -1)").unwrap(), Value::Int(0));
    }

    #[test]
    fn type_errors_name_the_operator() {
        match eval("(+ 1 \"a\")") {
            Err(EvalError::Type { op, expected, found }) => {
                assert_eq!(op, "+");
                assert_eq!(expected, "number");
                assert_eq!(found, "string");
            }
            other => panic!("expected Type error, got {:?}", other),
        }
    }

    #[test]
    fn comparisons_chain() {
        assert_eq!(eval("(< 1 2 3)").unwrap(), Value::Bool(true));
        assert_eq!(eval("(< 1 3 2)").unwrap(), Value::Bool(false));
        assert_eq!(eval("(= [1 2] [1 2])").unwrap(), Value::Bool(true));
    }

    #[test]
    fn higher_order_builtins() {
        assert_eq!(
            eval("(map inc [1 2 3])").unwrap().to_string(),
            "[2 3 4]"
        );
        assert_eq!(
            eval("(filter (fn [x] (> x 1)) [1 2 3])").unwrap().to_string(),
            "[2 3]"
        );
        assert_eq!(eval("(reduce + 0 [1 2 3 4])").unwrap(), Value::Int(10));
        assert_eq!(eval("(apply + [1 2 3])").unwrap(), Value::Int(6));
    }

    #[test]
    fn vector_access() {
        assert_eq!(eval("(nth [1 2 3] 1)").unwrap(), Value::Int(2));
        assert_eq!(
            eval("(nth [1] 5)"),
            Err(EvalError::Index { index: 5, len: 1 })
        );
        assert_eq!(eval("(get [1] 5 :none)").unwrap().to_string(), ":none");
        assert_eq!(eval("(first (rest [1 2 3]))").unwrap(), Value::Int(2));
        assert_eq!(eval("(count (conj [1] 2 3))").unwrap(), Value::Int(3));
    }

    #[test]
    fn str_and_error() {
        assert_eq!(eval("(str \"a\" 1 nil :k)").unwrap().to_string(), "a1:k");
        assert_eq!(
            eval("(error \"bad\" 42)"),
            Err(EvalError::Raised("bad 42".to_string()))
        );
    }

    #[test]
    fn math_module_members() {
        assert_eq!(eval("(m.sqrt 16)").unwrap(), Value::Float(4.0));
        assert_eq!(eval("(m.pow 2 10)").unwrap(), Value::Int(1024));
        assert_eq!(eval("(m.max 3 9 4)").unwrap(), Value::Int(9));
        assert_eq!(eval("(m.floor 2.7)").unwrap(), Value::Int(2));
        assert!(matches!(eval("m.pi").unwrap(), Value::Float(_)));
        assert!(matches!(eval("(m.nope 1)"), Err(EvalError::NoMember(..))));
    }

    #[test]
    fn string_module_members() {
        assert_eq!(eval("(s.upper \"abc\")").unwrap().to_string(), "ABC");
        assert_eq!(
            eval("(s.join \"-\" (s.split \"a b c\" \" \"))").unwrap().to_string(),
            "a-b-c"
        );
        assert_eq!(eval("(s.contains? \"hello\" \"ell\")").unwrap(), Value::Bool(true));
    }

    #[test]
    fn unknown_module() {
        assert_eq!(
            load_module("net").unwrap_err(),
            EvalError::UnknownModule("net".to_string())
        );
    }

    #[test]
    fn builtin_arity_is_checked() {
        assert!(matches!(eval("(not 1 2)"), Err(EvalError::Arity { .. })));
    }
}
