use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::names::{DefKind, Identity, Origin};
use crate::source::{Definition, SourceUnit, Statement};

/// A definition whose body changed between two versions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Replacement {
    pub identity: Identity,
    pub old: Definition,
    pub new: Definition,
}

/// The minimal change set that moves a context from one version of an
/// origin to the next.
///
/// `added`, `removed` and `replaced` are disjoint in identity space. A kind
/// change shows up as a removal of the old identity plus an addition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    pub origin: Origin,
    pub added: Vec<Definition>,
    pub removed: Vec<Identity>,
    pub replaced: Vec<Replacement>,
    /// Unchanged value definitions whose inputs changed.
    pub refreshed: Vec<Definition>,
    /// Statements to re-run after the definitions are applied.
    pub statements: Vec<Statement>,
}

impl Patch {
    pub fn empty(origin: Origin) -> Self {
        Patch {
            origin,
            added: Vec::new(),
            removed: Vec::new(),
            replaced: Vec::new(),
            refreshed: Vec::new(),
            statements: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.removed.is_empty()
            && self.replaced.is_empty()
            && self.refreshed.is_empty()
            && self.statements.is_empty()
    }

    /// One-line description for logs, e.g. `+2 -1 ~0 refresh 1 stmt 0`.
    pub fn summary(&self) -> String {
        format!(
            "+{} -{} ~{} refresh {} stmt {}",
            self.added.len(),
            self.removed.len(),
            self.replaced.len(),
            self.refreshed.len(),
            self.statements.len()
        )
    }
}

/// Compare two versions of a source unit.
///
/// Definitions are matched by name within the origin, never by position.
/// Output order is deterministic: new-unit source order, removals in
/// old-unit source order.
pub fn diff(old: Option<&SourceUnit>, new: &SourceUnit) -> Patch {
    let mut patch = Patch::empty(new.origin.clone());

    let old_defs: BTreeMap<&str, &Definition> = old
        .map(|unit| unit.definitions.iter().map(|d| (&**d.name(), d)).collect())
        .unwrap_or_default();

    if let Some(old) = old {
        for def in &old.definitions {
            match new.definition(def.name()) {
                Some(current) if current.kind() == def.kind() => {}
                _ => patch.removed.push(def.identity.clone()),
            }
        }
    }

    let mut unchanged: Vec<&Definition> = Vec::new();
    for def in &new.definitions {
        match old_defs.get(&**def.name()) {
            None => patch.added.push(def.clone()),
            Some(prev) if prev.kind() != def.kind() => patch.added.push(def.clone()),
            Some(prev) if prev.is_equivalent(def) => unchanged.push(def),
            Some(prev) => patch.replaced.push(Replacement {
                identity: def.identity.clone(),
                old: (*prev).clone(),
                new: def.clone(),
            }),
        }
    }

    let mut dirty: BTreeSet<String> = BTreeSet::new();
    dirty.extend(patch.added.iter().map(|d| d.name().to_string()));
    dirty.extend(patch.removed.iter().map(|id| id.name.to_string()));
    dirty.extend(patch.replaced.iter().map(|r| r.identity.name.to_string()));

    // Propagate through unchanged definitions until nothing new is reached.
    let mut reached = vec![false; unchanged.len()];
    loop {
        let mut grew = false;
        for (i, def) in unchanged.iter().enumerate() {
            if !reached[i] && !def.references.is_disjoint(&dirty) {
                reached[i] = true;
                grew = true;
                dirty.insert(def.name().to_string());
            }
        }
        if !grew {
            break;
        }
    }
    patch.refreshed = unchanged
        .iter()
        .zip(&reached)
        .filter(|(def, hit)| **hit && def.kind() == DefKind::Value)
        .map(|(def, _)| (*def).clone())
        .collect();

    let mut previous: BTreeMap<&str, usize> = BTreeMap::new();
    if let Some(old) = old {
        for stmt in &old.statements {
            *previous.entry(stmt.canonical.as_str()).or_default() += 1;
        }
    }
    for stmt in &new.statements {
        let seen_before = match previous.get_mut(stmt.canonical.as_str()) {
            Some(count) if *count > 0 => {
                *count -= 1;
                true
            }
            _ => false,
        };
        if !seen_before || !stmt.references.is_disjoint(&dirty) {
            patch.statements.push(stmt.clone());
        }
    }

    patch
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::names::FragmentId;
    use crate::source::parse;

    fn unit(text: &str) -> SourceUnit {
        parse(Origin::Repl(FragmentId::from("d#1")), text).unwrap()
    }

    fn names(defs: &[Definition]) -> Vec<String> {
        defs.iter().map(|d| d.name().to_string()).collect()
    }

    #[test]
    fn no_previous_version_adds_everything() {
        let new = unit("(def a 1) (defn f [] a) (println a)");
        let patch = diff(None, &new);
        assert_eq!(names(&patch.added), vec!["a", "f"]);
        assert!(patch.removed.is_empty() && patch.replaced.is_empty());
        assert_eq!(patch.statements.len(), 1);
    }

    #[test]
    fn identical_units_give_empty_patch() {
        let old = unit("(def a 1)\n(defn f [] a)");
        let new = unit("(def a 1)\n(defn f [] a)");
        assert!(diff(Some(&old), &new).is_empty());
    }

    #[test]
    fn reordering_definitions_gives_empty_patch() {
        let old = unit("(def a 1)\n(def b 2)");
        let new = unit("(def b 2)\n\n; moved\n(def a 1)");
        assert!(diff(Some(&old), &new).is_empty());
    }

    #[test]
    fn body_change_is_a_replacement() {
        let old = unit("(defn f [] 1)");
        let new = unit("(defn f [] 2)");
        let patch = diff(Some(&old), &new);
        assert_eq!(patch.replaced.len(), 1);
        let r = &patch.replaced[0];
        assert_eq!(r.identity.name, "f");
        assert_eq!(r.old.canonical, "(defn f [] 1)");
        assert_eq!(r.new.canonical, "(defn f [] 2)");
        assert!(patch.added.is_empty() && patch.removed.is_empty());
    }

    #[test]
    fn missing_definition_is_a_removal() {
        let old = unit("(def a 1)\n(def b 2)");
        let new = unit("(def a 1)");
        let patch = diff(Some(&old), &new);
        assert_eq!(patch.removed.len(), 1);
        assert_eq!(patch.removed[0].name, "b");
        assert!(patch.added.is_empty() && patch.replaced.is_empty());
    }

    #[test]
    fn kind_change_is_remove_plus_add() {
        let old = unit("(def f 1)");
        let new = unit("(defn f [] 1)");
        let patch = diff(Some(&old), &new);
        assert_eq!(patch.removed.len(), 1);
        assert_eq!(patch.removed[0].kind, DefKind::Value);
        assert_eq!(patch.added.len(), 1);
        assert_eq!(patch.added[0].kind(), DefKind::Function);
        assert!(patch.replaced.is_empty());
    }

    #[test]
    fn removals_follow_old_source_order() {
        let old = unit("(def c 3)\n(def a 1)\n(def b 2)");
        let new = unit("");
        let removed: Vec<String> = diff(Some(&old), &new)
            .removed
            .iter()
            .map(|id| id.name.to_string())
            .collect();
        assert_eq!(removed, vec!["c", "a", "b"]);
    }

    #[test]
    fn dependents_are_refreshed_transitively() {
        let old = unit("(def x 1)\n(defn g [] (* x 2))\n(def y (g))\n(def z (+ y 1))\n(def w 7)");
        let new = unit("(def x 5)\n(defn g [] (* x 2))\n(def y (g))\n(def z (+ y 1))\n(def w 7)");
        let patch = diff(Some(&old), &new);
        assert_eq!(patch.replaced.len(), 1);
        // g is a function: late binding picks up x, nothing to refresh
        assert_eq!(names(&patch.refreshed), vec!["y", "z"]);
    }

    #[test]
    fn statements_rerun_when_new_or_dirty() {
        let old = unit("(def a 1)\n(println \"start\")\n(println a)");
        let new = unit("(def a 2)\n(println \"start\")\n(println a)\n(println \"end\")");
        let patch = diff(Some(&old), &new);
        let canon: Vec<_> = patch.statements.iter().map(|s| s.canonical.as_str()).collect();
        assert_eq!(canon, vec!["(println a)", "(println \"end\")"]);
    }

    #[test]
    fn repeated_statement_counts_as_new() {
        let old = unit("(println 1)");
        let new = unit("(println 1)\n(println 1)");
        assert_eq!(diff(Some(&old), &new).statements.len(), 1);
    }

    #[test]
    fn diff_is_deterministic() {
        let old = unit("(def a 1)\n(def b (+ a 1))\n(defn f [x] (* x b))\n(f 2)");
        let new = unit("(defn f [x] (+ x b))\n(def a 3)\n(def c 0)\n(f 2)");
        let first = serde_json::to_string(&diff(Some(&old), &new)).unwrap();
        for _ in 0..10 {
            assert_eq!(serde_json::to_string(&diff(Some(&old), &new)).unwrap(), first);
        }
    }
}
