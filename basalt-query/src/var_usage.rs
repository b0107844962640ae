//! Variable-usage analysis over an operator subtree
//!
//! [`analyze`] computes four variable sets by structural recursion:
//! definitely-bound, optionally-bound, filter-mentioned, and
//! assign-mentioned. The join classifiers are built on these sets.
//!
//! Implemented as a pure recursive function returning immutable sets;
//! merges are explicit set unions/differences.

use crate::algebra::{Op, Var};
use rustc_hash::FxHashSet;

/// The four usage sets of one operator subtree
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct VarUsage {
    /// Variables definitely bound by every solution
    pub defines: FxHashSet<Var>,
    /// Variables that may or may not be bound (OPTIONAL territory)
    pub opt_defines: FxHashSet<Var>,
    /// Variables mentioned by filter expressions
    pub filter_mentions: FxHashSet<Var>,
    /// Variables mentioned by assignment expressions
    pub assign_mentions: FxHashSet<Var>,
}

impl VarUsage {
    /// Merge a child summary for Join/Sequence.
    ///
    /// Assign mentions are deliberately NOT merged here, while filter
    /// mentions are. LeftJoin/Union merge both, so a Join summary carries
    /// fewer assign mentions than its branches; the classifier tests pin
    /// this asymmetry.
    fn merge_join(&mut self, other: &VarUsage) {
        self.defines.extend(other.defines.iter().cloned());
        self.opt_defines.extend(other.opt_defines.iter().cloned());
        self.filter_mentions
            .extend(other.filter_mentions.iter().cloned());
    }

    /// Merge a child summary for Union: straight union of all four sets
    fn merge_union(&mut self, other: &VarUsage) {
        self.defines.extend(other.defines.iter().cloned());
        self.opt_defines.extend(other.opt_defines.iter().cloned());
        self.filter_mentions
            .extend(other.filter_mentions.iter().cloned());
        self.assign_mentions
            .extend(other.assign_mentions.iter().cloned());
    }
}

/// Compute the usage summary of an operator subtree
pub fn analyze(op: &Op) -> VarUsage {
    let mut usage = VarUsage::default();
    walk(op, &mut usage);
    // A variable definite overall must not also appear optional
    usage.opt_defines = usage
        .opt_defines
        .difference(&usage.defines)
        .cloned()
        .collect();
    usage
}

fn walk(op: &Op, usage: &mut VarUsage) {
    match op {
        Op::Bgp(bgp) => {
            for pattern in &bgp.patterns {
                usage.defines.extend(pattern.vars().cloned());
            }
        }
        Op::Join(left, right) => {
            usage.merge_join(&analyze_raw(left));
            usage.merge_join(&analyze_raw(right));
        }
        Op::Sequence(ops) => {
            for sub in ops {
                usage.merge_join(&analyze_raw(sub));
            }
        }
        Op::LeftJoin { left, right, exprs } => {
            let l = analyze_raw(left);
            let r = analyze_raw(right);
            // Left passes through unchanged
            usage.merge_union(&l);
            // Right's definite bindings become merely optional from the
            // outer view
            usage.opt_defines.extend(r.defines.iter().cloned());
            usage.opt_defines.extend(r.opt_defines.iter().cloned());
            usage
                .filter_mentions
                .extend(r.filter_mentions.iter().cloned());
            usage
                .assign_mentions
                .extend(r.assign_mentions.iter().cloned());
            // Anything the left binds definitely is not optional
            for v in &l.defines {
                usage.opt_defines.remove(v);
            }
            let mut cond_vars = Vec::new();
            for e in exprs {
                e.collect_vars(&mut cond_vars);
            }
            usage.filter_mentions.extend(cond_vars);
        }
        Op::Conditional { left, right } => {
            let l = analyze_raw(left);
            let r = analyze_raw(right);
            usage.merge_union(&l);
            usage.opt_defines.extend(r.defines.iter().cloned());
            usage.opt_defines.extend(r.opt_defines.iter().cloned());
            usage
                .filter_mentions
                .extend(r.filter_mentions.iter().cloned());
            usage
                .assign_mentions
                .extend(r.assign_mentions.iter().cloned());
            for v in &l.defines {
                usage.opt_defines.remove(v);
            }
        }
        Op::Union(left, right) => {
            usage.merge_union(&analyze_raw(left));
            usage.merge_union(&analyze_raw(right));
        }
        Op::Filter { exprs, input } => {
            let mut vars = Vec::new();
            for e in exprs {
                e.collect_vars(&mut vars);
            }
            usage.filter_mentions.extend(vars);
            walk(input, usage);
        }
        Op::Extend { input, assignments } | Op::Assign { input, assignments } => {
            walk(input, usage);
            for (var, expr) in assignments {
                usage.defines.insert(var.clone());
                let mut vars = Vec::new();
                expr.collect_vars(&mut vars);
                usage.assign_mentions.extend(vars);
            }
        }
        Op::Project { input, vars } => {
            let inner = analyze_raw(input);
            // Projection hides non-projected variables
            usage
                .defines
                .extend(inner.defines.iter().filter(|v| vars.contains(v)).cloned());
            usage.opt_defines.extend(
                inner
                    .opt_defines
                    .iter()
                    .filter(|v| vars.contains(v))
                    .cloned(),
            );
            usage
                .filter_mentions
                .extend(inner.filter_mentions.iter().cloned());
            usage
                .assign_mentions
                .extend(inner.assign_mentions.iter().cloned());
        }
        Op::Table(table) => {
            usage.defines.extend(table.vars.iter().cloned());
        }
        Op::Graph { graph, input } => {
            if let crate::algebra::GraphName::Var(v) = graph {
                usage.defines.insert(v.clone());
            }
            walk(input, usage);
        }
        Op::Distinct(input)
        | Op::Reduced(input)
        | Op::Slice { input, .. }
        | Op::Order { input, .. }
        | Op::TopN { input, .. } => walk(input, usage),
        // No contribution: Null, Minus, Diff, Group
        Op::Null | Op::Minus(_, _) | Op::Diff(_, _) | Op::Group { .. } => {}
    }
}

/// Recurse without the final optional-minus-definite reduction; used when a
/// parent still needs the raw child sets
fn analyze_raw(op: &Op) -> VarUsage {
    let mut usage = VarUsage::default();
    walk(op, &mut usage);
    usage
}

/// Every variable mentioned anywhere in a subtree - patterns, expressions,
/// projections, assignments, graph slots
///
/// This is the "pattern variables" set the left-join classifier works
/// against, wider than `defines`.
pub fn mentioned_vars(op: &Op) -> FxHashSet<Var> {
    let mut out = FxHashSet::default();
    collect_mentioned(op, &mut out);
    out
}

fn collect_mentioned(op: &Op, out: &mut FxHashSet<Var>) {
    let mut exprs_into = |exprs: &[crate::algebra::Expr], out: &mut FxHashSet<Var>| {
        let mut vars = Vec::new();
        for e in exprs {
            e.collect_vars(&mut vars);
        }
        out.extend(vars);
    };
    match op {
        Op::Bgp(bgp) => {
            for p in &bgp.patterns {
                out.extend(p.vars().cloned());
            }
        }
        Op::Join(a, b) | Op::Union(a, b) | Op::Minus(a, b) | Op::Diff(a, b) => {
            collect_mentioned(a, out);
            collect_mentioned(b, out);
        }
        Op::Conditional { left, right } => {
            collect_mentioned(left, out);
            collect_mentioned(right, out);
        }
        Op::LeftJoin { left, right, exprs } => {
            collect_mentioned(left, out);
            collect_mentioned(right, out);
            exprs_into(exprs, out);
        }
        Op::Filter { exprs, input } => {
            exprs_into(exprs, out);
            collect_mentioned(input, out);
        }
        Op::Graph { graph, input } => {
            if let crate::algebra::GraphName::Var(v) = graph {
                out.insert(v.clone());
            }
            collect_mentioned(input, out);
        }
        Op::Sequence(ops) => {
            for sub in ops {
                collect_mentioned(sub, out);
            }
        }
        Op::Extend { input, assignments } | Op::Assign { input, assignments } => {
            collect_mentioned(input, out);
            for (var, expr) in assignments {
                out.insert(var.clone());
                exprs_into(std::slice::from_ref(expr), out);
            }
        }
        Op::Project { input, vars } => {
            out.extend(vars.iter().cloned());
            collect_mentioned(input, out);
        }
        Op::Distinct(input) | Op::Reduced(input) => collect_mentioned(input, out),
        Op::Slice { input, .. } => collect_mentioned(input, out),
        Op::Order { input, conditions } | Op::TopN { input, conditions, .. } => {
            for c in conditions {
                exprs_into(std::slice::from_ref(&c.expr), out);
            }
            collect_mentioned(input, out);
        }
        Op::Group {
            input,
            group_vars,
            aggregates,
        } => {
            out.extend(group_vars.iter().cloned());
            for (var, agg) in aggregates {
                out.insert(var.clone());
                let mut vars = Vec::new();
                agg.collect_vars(&mut vars);
                out.extend(vars);
            }
            collect_mentioned(input, out);
        }
        Op::Table(table) => out.extend(table.vars.iter().cloned()),
        Op::Null => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algebra::{BasicPattern, Expr, PatternNode, TriplePattern};
    use basalt_core::Term;

    fn v(name: &str) -> Var {
        Var::new(name)
    }

    fn bgp(patterns: &[(&str, &str, &str)]) -> Op {
        Op::Bgp(BasicPattern::new(
            patterns
                .iter()
                .map(|(s, p, o)| {
                    let node = |text: &str| {
                        if let Some(name) = text.strip_prefix('?') {
                            PatternNode::var(name)
                        } else {
                            PatternNode::term(Term::iri(format!("http://ex/{text}")))
                        }
                    };
                    TriplePattern::new(node(s), node(p), node(o))
                })
                .collect(),
        ))
    }

    #[test]
    fn bgp_vars_are_definite() {
        let usage = analyze(&bgp(&[("?x", "p", "?y")]));
        assert!(usage.defines.contains(&v("x")));
        assert!(usage.defines.contains(&v("y")));
        assert!(usage.opt_defines.is_empty());
    }

    #[test]
    fn left_join_right_defines_become_optional() {
        let op = Op::left_join(bgp(&[("?x", "p", "?y")]), bgp(&[("?x", "q", "?z")]), vec![]);
        let usage = analyze(&op);
        assert!(usage.defines.contains(&v("x")));
        assert!(usage.defines.contains(&v("y")));
        // ?z only from the right: optional; ?x definite on the left: not
        // also optional
        assert!(usage.opt_defines.contains(&v("z")));
        assert!(!usage.opt_defines.contains(&v("x")));
    }

    #[test]
    fn union_records_both_sides() {
        let op = Op::union(
            bgp(&[("?x", "p", "?y")]),
            Op::left_join(bgp(&[("?x", "p", "?y")]), bgp(&[("?x", "q", "?z")]), vec![]),
        );
        let usage = analyze(&op);
        assert!(usage.defines.contains(&v("x")));
        assert!(usage.opt_defines.contains(&v("z")));
    }

    #[test]
    fn join_does_not_merge_assign_mentions() {
        let assign = Op::Assign {
            input: Box::new(bgp(&[("?x", "p", "?y")])),
            assignments: vec![(v("a"), Expr::Var(v("y")))],
        };
        let join = Op::join(assign.clone(), bgp(&[("?x", "q", "?z")]));
        assert!(analyze(&assign).assign_mentions.contains(&v("y")));
        // The asymmetry: Join drops child assign mentions
        assert!(analyze(&join).assign_mentions.is_empty());
        // ...but Union keeps them
        let union = Op::union(assign, bgp(&[("?x", "q", "?z")]));
        assert!(analyze(&union).assign_mentions.contains(&v("y")));
    }

    #[test]
    fn project_hides_non_projected() {
        let op = Op::project(bgp(&[("?x", "p", "?y")]), vec![v("x")]);
        let usage = analyze(&op);
        assert!(usage.defines.contains(&v("x")));
        assert!(!usage.defines.contains(&v("y")));
    }

    #[test]
    fn filter_mentions_collected() {
        let op = Op::filter(
            vec![Expr::Bound(v("w"))],
            bgp(&[("?x", "p", "?y")]),
        );
        let usage = analyze(&op);
        assert!(usage.filter_mentions.contains(&v("w")));
    }

    #[test]
    fn mentioned_is_wider_than_defined() {
        let op = Op::filter(vec![Expr::Bound(v("w"))], bgp(&[("?x", "p", "?y")]));
        let mentioned = mentioned_vars(&op);
        assert!(mentioned.contains(&v("w")));
        assert!(mentioned.contains(&v("x")));
        assert!(!analyze(&op).defines.contains(&v("w")));
    }
}
