use std::borrow::Borrow;
use std::fmt;
use std::ops::Deref;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

// ── Name newtypes ─────────────────────────────────────────────────────────

/// Implement common traits for a String newtype wrapper:
/// Deref<Target=str>, Borrow<str>, From<String>, From<&str>,
/// AsRef<str>, PartialEq<str>, PartialEq<&str>, Display.
macro_rules! string_newtype {
    ($name:ident) => {
        impl Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                $name(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                $name(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

/// A binding name in a context namespace, e.g. `"x"`, `"fact"`, `"Point"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Symbol(String);
string_newtype!(Symbol);

/// Identifier of a REPL-submitted fragment, e.g. `"c1#3"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FragmentId(String);
string_newtype!(FragmentId);

// ── Origins and identities ────────────────────────────────────────────────

/// Where a source unit comes from.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Origin {
    /// Code submitted to a context through `run`.
    Repl(FragmentId),
    /// A watched file, keyed by its canonical path.
    File(PathBuf),
}

impl Origin {
    pub fn file(path: impl AsRef<Path>) -> Self {
        Origin::File(canonical_path(path.as_ref()))
    }

    /// Logical name of the origin: the fragment id or the file stem.
    pub fn logical_name(&self) -> String {
        match self {
            Origin::Repl(id) => id.to_string(),
            Origin::File(path) => path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default(),
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Repl(id) => write!(f, "<repl {}>", id),
            Origin::File(path) => write!(f, "{}", path.display()),
        }
    }
}

impl From<FragmentId> for Origin {
    fn from(id: FragmentId) -> Self {
        Origin::Repl(id)
    }
}

/// Classification of a top-level definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DefKind {
    Value,
    Function,
    Type,
    Import,
}

impl DefKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DefKind::Value => "value",
            DefKind::Function => "function",
            DefKind::Type => "type",
            DefKind::Import => "import",
        }
    }
}

impl fmt::Display for DefKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable identity of a definition: (origin, name), tagged with its kind.
///
/// Versions are matched on (origin, name) only; the kind tag makes a
/// redefinition with a different kind a distinct identity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub origin: Origin,
    pub name: Symbol,
    pub kind: DefKind,
}

impl Identity {
    pub fn new(origin: Origin, name: impl Into<Symbol>, kind: DefKind) -> Self {
        Identity {
            origin,
            name: name.into(),
            kind,
        }
    }

    /// True if both identities name the same slot, ignoring the kind tag.
    pub fn same_slot(&self, other: &Identity) -> bool {
        self.origin == other.origin && self.name == other.name
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}#{}", self.origin, self.name, self.kind)
    }
}

/// Canonicalize a path, falling back to canonicalizing the parent directory
/// for files that no longer exist (deleted origins).
pub fn canonical_path(path: &Path) -> PathBuf {
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(file)) if !parent.as_os_str().is_empty() => parent
            .canonicalize()
            .map(|dir| dir.join(file))
            .unwrap_or_else(|_| path.to_path_buf()),
        _ => path.to_path_buf(),
    }
}
