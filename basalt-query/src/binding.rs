//! Binding types - solutions flowing between operators
//!
//! Two representations co-exist:
//!
//! - [`Binding`]: a materialized partial map from variable to [`Term`],
//!   detached from storage. Slots are kept sorted by variable name, so
//!   equality and hashing are canonical (the distinct operator keys on
//!   whole bindings).
//! - [`IdBinding`]: variable to [`NodeId`], chained to an optional parent
//!   for variables resolved upstream, carrying the enclosing materialized
//!   binding it was derived from. Lookup walks child to root, first match
//!   wins.
//!
//! # Invariants
//!
//! - An id-binding chain never defines the same variable twice with a
//!   different id; the solver rejects such candidates before extending.
//! - Conversion back to a materialized binding merges the chain with the
//!   enclosing binding at the root.

use crate::algebra::Var;
use basalt_core::{NodeId, NodeTable, Term};
use std::sync::Arc;

/// A materialized solution: partial map from variable to term
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Binding {
    /// Sorted by variable name; no duplicate variables
    slots: Vec<(Var, Term)>,
}

impl Binding {
    /// The empty binding (the canonical root of evaluation)
    pub fn root() -> Self {
        Binding::default()
    }

    pub fn get(&self, var: &Var) -> Option<&Term> {
        self.slots
            .binary_search_by(|(v, _)| v.cmp(var))
            .ok()
            .map(|i| &self.slots[i].1)
    }

    pub fn contains(&self, var: &Var) -> bool {
        self.get(var).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn vars(&self) -> impl Iterator<Item = &Var> {
        self.slots.iter().map(|(v, _)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Var, &Term)> {
        self.slots.iter().map(|(v, t)| (v, t))
    }

    /// A copy of this binding with `var` bound to `term`
    ///
    /// If `var` was already bound the old value is replaced; callers that
    /// need conflict detection use [`Binding::merge_compatible`] or check
    /// first.
    pub fn extended(&self, var: Var, term: Term) -> Binding {
        let mut slots = self.slots.clone();
        match slots.binary_search_by(|(v, _)| v.cmp(&var)) {
            Ok(i) => slots[i].1 = term,
            Err(i) => slots.insert(i, (var, term)),
        }
        Binding { slots }
    }

    /// Restrict to the given variables (projection)
    pub fn project(&self, vars: &[Var]) -> Binding {
        Binding {
            slots: self
                .slots
                .iter()
                .filter(|(v, _)| vars.contains(v))
                .cloned()
                .collect(),
        }
    }

    /// True if the two bindings agree on every shared variable
    pub fn compatible(&self, other: &Binding) -> bool {
        self.slots
            .iter()
            .all(|(v, t)| other.get(v).map_or(true, |ot| ot == t))
    }

    /// Merge, or `None` if any shared variable disagrees
    pub fn merge_compatible(&self, other: &Binding) -> Option<Binding> {
        if !self.compatible(other) {
            return None;
        }
        let mut merged = self.clone();
        for (v, t) in other.iter() {
            if merged.get(v).is_none() {
                merged = merged.extended(v.clone(), t.clone());
            }
        }
        Some(merged)
    }

    /// True if the two bindings share at least one bound variable
    pub fn shares_var(&self, other: &Binding) -> bool {
        self.slots.iter().any(|(v, _)| other.contains(v))
    }
}

impl FromIterator<(Var, Term)> for Binding {
    fn from_iter<I: IntoIterator<Item = (Var, Term)>>(iter: I) -> Self {
        let mut b = Binding::root();
        for (v, t) in iter {
            b = b.extended(v, t);
        }
        b
    }
}

/// An identifier-level solution, chained to its parent
///
/// Produced by the identifier-level solver; each pattern stage extends the
/// incoming chain with its newly bound slots rather than copying them.
#[derive(Clone, Debug)]
pub struct IdBinding {
    parent: Option<Arc<IdBinding>>,
    /// Slots bound at this segment, insertion order
    slots: Vec<(Var, NodeId)>,
    /// The enclosing materialized binding at the chain root
    enclosing: Binding,
}

impl IdBinding {
    /// Root segment derived from a materialized binding; its term-level
    /// values are visible through `enclosing` but carry no ids
    pub fn from_binding(enclosing: Binding, table: &dyn NodeTable) -> Self {
        let slots = enclosing
            .iter()
            .map(|(v, t)| (v.clone(), table.lookup_id(t)))
            .filter(|(_, id)| id.is_concrete())
            .collect();
        IdBinding {
            parent: None,
            slots,
            enclosing,
        }
    }

    /// Empty root segment
    pub fn root() -> Self {
        IdBinding {
            parent: None,
            slots: Vec::new(),
            enclosing: Binding::root(),
        }
    }

    /// The enclosing "real" binding this chain was derived from
    pub fn enclosing(&self) -> &Binding {
        let mut seg = self;
        while let Some(parent) = &seg.parent {
            seg = parent;
        }
        &seg.enclosing
    }

    /// Walk child to root; first match wins
    pub fn get(&self, var: &Var) -> Option<NodeId> {
        let mut seg = Some(self);
        while let Some(s) = seg {
            if let Some((_, id)) = s.slots.iter().find(|(v, _)| v == var) {
                return Some(*id);
            }
            seg = s.parent.as_deref();
        }
        None
    }

    pub fn contains(&self, var: &Var) -> bool {
        self.get(var).is_some()
    }

    /// New child segment extending this chain
    ///
    /// Callers must have checked that no `slots` variable is already bound
    /// to a different id somewhere up the chain.
    pub fn extend(self: &Arc<Self>, slots: Vec<(Var, NodeId)>) -> IdBinding {
        debug_assert!(slots.iter().all(|(v, id)| match self.get(v) {
            Some(existing) => existing == *id,
            None => true,
        }));
        IdBinding {
            parent: Some(Arc::clone(self)),
            slots,
            enclosing: Binding::root(),
        }
    }

    /// All (var, id) pairs visible from this segment, child first, shadowed
    /// parent entries omitted
    pub fn flatten(&self) -> Vec<(Var, NodeId)> {
        let mut out: Vec<(Var, NodeId)> = Vec::new();
        let mut seg = Some(self);
        while let Some(s) = seg {
            for (v, id) in &s.slots {
                if !out.iter().any(|(ov, _)| ov == v) {
                    out.push((v.clone(), *id));
                }
            }
            seg = s.parent.as_deref();
        }
        out
    }

    /// Convert to a materialized binding, resolving ids through the node
    /// table and merging with the enclosing binding
    pub fn materialize(&self, table: &dyn NodeTable) -> Binding {
        let mut out = self.enclosing().clone();
        for (var, id) in self.flatten() {
            if out.contains(&var) {
                continue;
            }
            if let Some(term) = table.lookup_term(id) {
                out = out.extended(var, term);
            }
        }
        out
    }
}
