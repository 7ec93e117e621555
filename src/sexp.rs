use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Span;

/// S-expression tree produced by the reader. It only knows about balanced
/// delimiters, atoms and strings; special forms are recognised later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Sexp {
    Symbol(String, Span),
    Int(i64, Span),
    Float(f64, Span),
    Bool(bool, Span),
    Str(String, Span),
    List(Vec<Sexp>, Span),    // (...)
    Bracket(Vec<Sexp>, Span), // [...]
}

/// Reader failure: what was expected and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadError {
    pub message: String,
    pub offset: usize,
}

impl Sexp {
    /// Return the span for any Sexp variant.
    pub fn span(&self) -> Span {
        match self {
            Sexp::Symbol(_, s) => *s,
            Sexp::Int(_, s) => *s,
            Sexp::Float(_, s) => *s,
            Sexp::Bool(_, s) => *s,
            Sexp::Str(_, s) => *s,
            Sexp::List(_, s) => *s,
            Sexp::Bracket(_, s) => *s,
        }
    }

    /// The head symbol of a non-empty list, e.g. `defn` for `(defn f [] 1)`.
    pub fn head(&self) -> Option<&str> {
        match self {
            Sexp::List(children, _) => match children.first() {
                Some(Sexp::Symbol(name, _)) => Some(name.as_str()),
                _ => None,
            },
            _ => None,
        }
    }

    /// Canonical single-line rendering. Spans, whitespace and comments do not
    /// survive, so two forms that differ only in layout render identically.
    pub fn canonical(&self) -> String {
        let mut out = String::new();
        self.write_canonical(&mut out);
        out
    }

    fn write_canonical(&self, out: &mut String) {
        match self {
            Sexp::Symbol(s, _) => out.push_str(s),
            Sexp::Int(v, _) => out.push_str(&v.to_string()),
            Sexp::Float(v, _) => {
                let s = format!("{}", v);
                out.push_str(&s);
                if !s.contains('.') && !s.contains("inf") && !s.contains("NaN") {
                    out.push_str(".0");
                }
            }
            Sexp::Bool(v, _) => out.push_str(if *v { "true" } else { "false" }),
            Sexp::Str(s, _) => {
                let escaped = s
                    .replace('\\', "\\\\")
                    .replace('"', "\\\"")
                    .replace('\n', "\\n")
                    .replace('\t', "\\t");
                out.push('"');
                out.push_str(&escaped);
                out.push('"');
            }
            Sexp::List(children, _) => write_seq(out, '(', children, ')'),
            Sexp::Bracket(children, _) => write_seq(out, '[', children, ']'),
        }
    }
}

fn write_seq(out: &mut String, open: char, children: &[Sexp], close: char) {
    out.push(open);
    for (i, child) in children.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        child.write_canonical(out);
    }
    out.push(close);
}

impl fmt::Display for Sexp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

peg::parser! {
    grammar sexp_parser() for str {
        rule comment() = ";" [^ '\n']* ("\n" / ![_])

        rule ws() = quiet!{([' ' | '\t' | '\n' | '\r' | ','] / comment())*}

        rule float() -> (f64, Span)
            = s:position!() n:$("-"? ['0'..='9']+ "." ['0'..='9']+) e:position!()
              {? n.parse::<f64>().map(|v| (v, (s, e))).or(Err("float")) }

        rule integer() -> (i64, Span)
            = s:position!() "+" n:$(['0'..='9']+) e:position!()
              {? n.parse::<i64>().map(|v| (v, (s, e))).or(Err("integer")) }
            / s:position!() n:$("-"? ['0'..='9']+) e:position!()
              {? n.parse::<i64>().map(|v| (v, (s, e))).or(Err("integer")) }

        rule symbol_char() -> char
            = c:['a'..='z' | 'A'..='Z' | '0'..='9' | '_' | '-' | '?' | '!' | '*'] { c }

        rule boolean() -> (bool, Span)
            = s:position!() "true" !symbol_char() e:position!() { (true, (s, e)) }
            / s:position!() "false" !symbol_char() e:position!() { (false, (s, e)) }

        rule string_char() -> char
            = "\\n" { '\n' }
            / "\\t" { '\t' }
            / "\\\\" { '\\' }
            / "\\\"" { '"' }
            / c:[^ '"' | '\\'] { c }

        rule string_literal() -> (String, Span)
            = s:position!() "\"" chars:string_char()* "\"" e:position!()
              { (chars.into_iter().collect(), (s, e)) }

        rule symbol() -> (String, Span)
            = s:position!() name:$(['a'..='z' | 'A'..='Z' | '_'] symbol_char()*)
              e:position!()
              { (name.to_string(), (s, e)) }

        rule operator_char() -> char
            = c:['+' | '-' | '*' | '/' | '=' | '<' | '>' | '%'] { c }

        rule operator_symbol() -> (String, Span)
            = s:position!() name:$(operator_char()+) !['0'..='9'] e:position!()
              { (name.to_string(), (s, e)) }

        rule dotted_symbol() -> (String, Span)
            = s:position!()
              parent:$(['a'..='z' | 'A'..='Z' | '_'] symbol_char()*)
              "."
              member:$(symbol_char()+)
              e:position!()
              { (format!("{}.{}", parent, member), (s, e)) }

        rule keyword() -> (String, Span)
            = s:position!() ":" name:$(['a'..='z' | 'A'..='Z' | '_'] symbol_char()*)
              e:position!()
              { (format!(":{}", name), (s, e)) }

        rule ampersand() -> (String, Span)
            = s:position!() "&" !symbol_char() e:position!()
              { ("&".to_string(), (s, e)) }

        rule atom() -> Sexp
            = v:float() { Sexp::Float(v.0, v.1) }
            / v:integer() { Sexp::Int(v.0, v.1) }
            / v:boolean() { Sexp::Bool(v.0, v.1) }
            / v:string_literal() { Sexp::Str(v.0, v.1) }
            / v:keyword() { Sexp::Symbol(v.0, v.1) }
            / v:ampersand() { Sexp::Symbol(v.0, v.1) }
            / v:dotted_symbol() { Sexp::Symbol(v.0, v.1) }
            / v:operator_symbol() { Sexp::Symbol(v.0, v.1) }
            / v:symbol() { Sexp::Symbol(v.0, v.1) }

        rule list() -> Sexp
            = s:position!() "(" ws() children:form()* ws() ")" e:position!()
              { Sexp::List(children, (s, e)) }

        rule bracket() -> Sexp
            = s:position!() "[" ws() children:form()* ws() "]" e:position!()
              { Sexp::Bracket(children, (s, e)) }

        rule form() -> Sexp
            = ws() f:(list() / bracket() / atom()) ws()
              { f }

        pub rule parse_single() -> Sexp
            = ws() f:form() ws() { f }

        pub rule parse_multi() -> Vec<Sexp>
            = ws() forms:form()* ws() { forms }
    }
}

/// Parse source text into a single Sexp form.
pub fn parse_sexp(input: &str) -> Result<Sexp, ReadError> {
    sexp_parser::parse_single(input).map_err(|e| ReadError {
        message: format!("expected {}", e.expected),
        offset: e.location.offset,
    })
}

/// Parse source text into a sequence of top-level Sexp forms.
pub fn parse_sexps(input: &str) -> Result<Vec<Sexp>, ReadError> {
    sexp_parser::parse_multi(input).map_err(|e| ReadError {
        message: format!("expected {}", e.expected),
        offset: e.location.offset,
    })
}
