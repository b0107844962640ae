//! Join and left-join linearity classification
//!
//! A join is *linear* when the right operand can be evaluated by
//! substituting each solution of the left into it (index-join style)
//! instead of materializing both sides independently. Linear execution
//! pushes left's bound values into right's evaluation; any variable right
//! would otherwise determine for itself but which left has already fixed
//! breaks substitution semantics (SPARQL scoping for OPTIONAL and nested
//! patterns), so those cases are rejected here.

use crate::algebra::Op;
use crate::var_usage::{analyze, mentioned_vars, VarUsage};
use crate::algebra::Var;
use rustc_hash::FxHashSet;

/// Strip a chain of order-preserving modifiers (distinct, reduced,
/// project) down to the first non-strippable node
pub fn effective_op(op: &Op) -> &Op {
    let mut current = op;
    loop {
        match current {
            Op::Distinct(inner) | Op::Reduced(inner) => current = inner,
            Op::Project { input, .. } => current = input,
            _ => return current,
        }
    }
}

fn intersects(a: &FxHashSet<Var>, b: &FxHashSet<Var>) -> bool {
    a.iter().any(|v| b.contains(v))
}

/// Decide whether `Join(left, right)` may run as substitute-then-evaluate
pub fn join_is_linear(left: &Op, right: &Op) -> bool {
    let left = effective_op(left);
    let right = effective_op(right);

    // Order-sensitive or solution-modifying right sides can never absorb
    // substitution
    match right {
        Op::Slice { .. } | Op::TopN { .. } | Op::Order { .. } => return false,
        Op::Extend { .. } | Op::Assign { .. } | Op::Group { .. } => return false,
        Op::Diff(_, _) | Op::Minus(_, _) => return false,
        _ => {}
    }

    let mut l = analyze(left);
    let mut r = analyze(right);

    // A variable can't be both definite and optional on one side
    l.opt_defines = l.opt_defines.difference(&l.defines).cloned().collect();
    r.opt_defines = r.opt_defines.difference(&r.defines).cloned().collect();

    // Only mentions of variables right does not bind itself matter
    let r_filter: FxHashSet<Var> = r
        .filter_mentions
        .difference(&r.defines)
        .cloned()
        .collect();
    let r_assign: FxHashSet<Var> = r
        .assign_mentions
        .difference(&r.defines)
        .cloned()
        .collect();

    // An optional inside right colliding with a binding pushed in from the
    // left is a scoping violation
    if intersects(&r.opt_defines, &l.defines) {
        return false;
    }
    if intersects(&r.opt_defines, &l.opt_defines) {
        return false;
    }
    if intersects(&r_filter, &l.defines) {
        return false;
    }
    if intersects(&r_assign, &l.defines) {
        return false;
    }
    true
}

/// The offending variables that make `LeftJoin(left, right)` non-linear
///
/// Empty iff the left join is linear (and the right side is reachable by
/// substitution at all).
pub fn left_join_non_linear_vars(left: &Op, right: &Op) -> FxHashSet<Var> {
    let left = effective_op(left);
    let right = effective_op(right);

    let left_vars = mentioned_vars(left);
    let r: VarUsage = analyze(right);

    let mut out: FxHashSet<Var> = FxHashSet::default();
    out.extend(r.opt_defines.intersection(&left_vars).cloned());
    out.extend(r.filter_mentions.intersection(&left_vars).cloned());
    out
}

/// Decide whether `LeftJoin(left, right)` may run as substitute-then-
/// evaluate (the Conditional form)
pub fn left_join_is_linear(left: &Op, right: &Op) -> bool {
    let reduced_right = effective_op(right);
    // A right side that is still a solution modifier after reduction (a
    // sub-select with ORDER/LIMIT etc.) cannot be reached by substitution
    match reduced_right {
        Op::Slice { .. } | Op::TopN { .. } | Op::Order { .. } | Op::Group { .. } => {
            return false
        }
        _ => {}
    }
    left_join_non_linear_vars(left, right).is_empty()
}
