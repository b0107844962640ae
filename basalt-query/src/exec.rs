//! The operator executor
//!
//! Recursively lowers an operator tree plus an input binding iterator into
//! an output binding iterator. The operator set is a closed sum type, so
//! dispatch is one exhaustive `match` - there is no visitor, no operand
//! stack, and "unknown operator" cannot exist past compile time.
//!
//! Laziness contract: no operator materializes its upstream unless its
//! semantics require it (distinct keys, group partitions, sort buffers,
//! and the inner side of a non-linear join).
//!
//! ## Input discipline
//!
//! [`ExecInput::Root`] is the canonical single-empty-binding input. A
//! join's right branch is always evaluated from `Root` - a join combines
//! two independently evaluated branches - unless the classifier proves the
//! join linear, in which case left's outputs stream directly into right as
//! substitutions.

use crate::algebra::{Aggregate, Expr, GraphName, Op, SortCondition, Table, Var};
use crate::binding::Binding;
use crate::classify::{join_is_linear, left_join_is_linear};
use crate::error::{QueryError, Result};
use crate::expr::{self, compare_total, eval_filter, ExprError};
use crate::iter::{empty_iter, from_bindings, root_iter, AbortSignal, BindingIter};
use crate::stage::StageGenerator;
use crate::var_usage::analyze;
use basalt_core::Term;
use rustc_hash::{FxHashMap, FxHashSet};
use std::cmp::Ordering;
use std::sync::Arc;

/// Everything an evaluation needs: the storage seam, the active graph,
/// and the cancellation signal
#[derive(Clone)]
pub struct ExecContext {
    stage: Arc<dyn StageGenerator>,
    abort: AbortSignal,
    active_graph: GraphName,
    hide_non_distinguished: bool,
}

impl ExecContext {
    pub fn new(stage: Arc<dyn StageGenerator>) -> Self {
        ExecContext {
            stage,
            abort: AbortSignal::new(),
            active_graph: GraphName::Default,
            hide_non_distinguished: false,
        }
    }

    pub fn with_abort(mut self, abort: AbortSignal) -> Self {
        self.abort = abort;
        self
    }

    /// Hide blank-node-sourced (non-distinguished) variables from pattern
    /// results
    pub fn hiding_non_distinguished(mut self) -> Self {
        self.hide_non_distinguished = true;
        self
    }

    pub fn stage(&self) -> &Arc<dyn StageGenerator> {
        &self.stage
    }

    pub fn abort(&self) -> &AbortSignal {
        &self.abort
    }

    pub fn active_graph(&self) -> &GraphName {
        &self.active_graph
    }

    fn with_active_graph(&self, graph: GraphName) -> ExecContext {
        let mut ctx = self.clone();
        ctx.active_graph = graph;
        ctx
    }
}

/// Input to one operator evaluation
pub enum ExecInput {
    /// The canonical root: one empty binding
    Root,
    /// Stream from an enclosing operator
    Pipe(BindingIter),
}

impl ExecInput {
    fn into_iter(self) -> BindingIter {
        match self {
            ExecInput::Root => root_iter(),
            ExecInput::Pipe(it) => it,
        }
    }

    fn is_root(&self) -> bool {
        matches!(self, ExecInput::Root)
    }
}

fn err_iter(e: QueryError) -> BindingIter {
    Box::new(std::iter::once(Err(e)))
}

/// Drain an iterator, stopping at the first error
fn collect_all(it: BindingIter) -> Result<Vec<Binding>> {
    it.collect()
}

/// The evaluator
pub struct OpExecutor;

impl OpExecutor {
    /// Evaluate `op` from the canonical root
    pub fn execute(op: &Op, ctx: &ExecContext) -> Result<BindingIter> {
        Self::exec(op, ExecInput::Root, ctx)
    }

    /// Evaluate `op` with the given input as substitution source
    pub fn exec(op: &Op, input: ExecInput, ctx: &ExecContext) -> Result<BindingIter> {
        match op {
            Op::Bgp(pattern) => {
                let out = ctx.stage.execute(pattern, input.into_iter(), ctx)?;
                if ctx.hide_non_distinguished {
                    Ok(Box::new(out.map(|b| {
                        b.map(|b| {
                            let keep: Vec<Var> = b
                                .vars()
                                .filter(|v| !v.is_non_distinguished())
                                .cloned()
                                .collect();
                            b.project(&keep)
                        })
                    })))
                } else {
                    Ok(out)
                }
            }
            Op::Join(left, right) => Self::exec_join(left, right, input, ctx),
            Op::LeftJoin { left, right, exprs } => {
                Self::exec_left_join(left, right, exprs, input, ctx)
            }
            Op::Conditional { left, right } => {
                let left_iter = Self::exec(left, input, ctx)?;
                Ok(Box::new(ConditionalIter::new(
                    left_iter,
                    (**right).clone(),
                    ctx.clone(),
                )))
            }
            Op::Union(_, _) => Self::exec_union(op, input, ctx),
            Op::Minus(left, right) => Self::exec_minus(left, right, input, ctx),
            Op::Diff(left, right) => Self::exec_diff(left, right, input, ctx),
            Op::Filter { exprs, input: sub } => {
                let mut out = Self::exec(sub, input, ctx)?;
                // Each expression is a further filtering wrapper; a binding
                // surviving expression i is tested against expression i+1
                for e in exprs.clone() {
                    out = Box::new(out.filter(move |b| match b {
                        Ok(b) => eval_filter(&e, b),
                        Err(_) => true,
                    }));
                }
                Ok(out)
            }
            Op::Sequence(ops) => {
                // Strict left-to-right threading: each sub-operator's output
                // is the next one's input
                let mut current = input;
                for sub in ops {
                    current = ExecInput::Pipe(Self::exec(sub, current, ctx)?);
                }
                Ok(current.into_iter())
            }
            Op::Extend { input: sub, assignments } => {
                let out = Self::exec(sub, input, ctx)?;
                Ok(assign_iter(out, assignments.clone(), true))
            }
            Op::Assign { input: sub, assignments } => {
                let out = Self::exec(sub, input, ctx)?;
                Ok(assign_iter(out, assignments.clone(), false))
            }
            Op::Project { input: sub, vars } => Self::exec_project(sub, vars, input, ctx),
            Op::Distinct(sub) => {
                let out = Self::exec(sub, input, ctx)?;
                let mut seen: FxHashSet<Binding> = FxHashSet::default();
                Ok(Box::new(out.filter(move |b| match b {
                    Ok(b) => seen.insert(b.clone()),
                    Err(_) => true,
                })))
            }
            Op::Reduced(sub) => {
                let out = Self::exec(sub, input, ctx)?;
                let mut last: Option<Binding> = None;
                Ok(Box::new(out.filter(move |b| match b {
                    Ok(b) => {
                        if last.as_ref() == Some(b) {
                            false
                        } else {
                            last = Some(b.clone());
                            true
                        }
                    }
                    Err(_) => true,
                })))
            }
            Op::Slice { input: sub, start, length } => {
                let out = Self::exec(sub, input, ctx)?;
                let out = out.skip(*start);
                match length {
                    Some(n) => Ok(Box::new(out.take(*n))),
                    None => Ok(Box::new(out)),
                }
            }
            Op::Order { input: sub, conditions } => {
                let out = Self::exec(sub, input, ctx)?;
                Self::exec_sort(out, conditions, None)
            }
            Op::TopN { input: sub, limit, conditions } => {
                // The child tree runs as written: an inner Distinct is
                // evaluated, never unwrapped
                let out = Self::exec(sub, input, ctx)?;
                Self::exec_sort(out, conditions, Some(*limit))
            }
            Op::Group { input: sub, group_vars, aggregates } => {
                let out = Self::exec(sub, input, ctx)?;
                Self::exec_group(out, group_vars, aggregates)
            }
            Op::Graph { graph, input: sub } => Self::exec_graph(graph, sub, input, ctx),
            Op::Table(table) => Self::exec_table(table, input),
            Op::Null => {
                // Explicit resource release on an unreachable branch
                drop(input);
                Ok(empty_iter())
            }
        }
    }

    fn exec_join(left: &Op, right: &Op, input: ExecInput, ctx: &ExecContext) -> Result<BindingIter> {
        if join_is_linear(left, right) {
            // Stream left's solutions into right as substitutions
            tracing::debug!("join executed linear");
            let left_iter = Self::exec(left, input, ctx)?;
            return Self::exec(right, ExecInput::Pipe(left_iter), ctx);
        }
        let left_iter = Self::exec(left, input, ctx)?;
        // Right is NOT seeded with input: a join combines two
        // independently evaluated branches
        let right_iter = Self::exec(right, ExecInput::Root, ctx)?;
        Ok(Box::new(NestedLoopJoin::new(left_iter, right_iter)))
    }

    fn exec_left_join(
        left: &Op,
        right: &Op,
        exprs: &[Expr],
        input: ExecInput,
        ctx: &ExecContext,
    ) -> Result<BindingIter> {
        if exprs.is_empty() && left_join_is_linear(left, right) {
            let left_iter = Self::exec(left, input, ctx)?;
            return Ok(Box::new(ConditionalIter::new(
                left_iter,
                right.clone(),
                ctx.clone(),
            )));
        }
        let left_iter = Self::exec(left, input, ctx)?;
        let right_iter = Self::exec(right, ExecInput::Root, ctx)?;
        Ok(Box::new(OptionalJoin::new(
            left_iter,
            right_iter,
            exprs.to_vec(),
        )))
    }

    fn exec_union(op: &Op, input: ExecInput, ctx: &ExecContext) -> Result<BindingIter> {
        // Flatten nested unions to avoid deep iterator nesting
        let mut branches = Vec::new();
        flatten_union(op, &mut branches);
        tracing::debug!(branches = branches.len(), "union flattened");

        let seeds: Vec<Binding> = match input {
            ExecInput::Root => vec![Binding::root()],
            ExecInput::Pipe(it) => match collect_all(it) {
                Ok(v) => v,
                Err(e) => return Ok(err_iter(e)),
            },
        };

        let mut outs: Vec<BindingIter> = Vec::with_capacity(branches.len());
        for branch in branches {
            let seeded = from_bindings(seeds.clone());
            outs.push(Self::exec(branch, ExecInput::Pipe(seeded), ctx)?);
        }
        Ok(Box::new(outs.into_iter().flatten()))
    }

    fn exec_minus(left: &Op, right: &Op, input: ExecInput, ctx: &ExecContext) -> Result<BindingIter> {
        // Compatibility for exclusion is decided over the variables both
        // sides can make visible
        let visible = |op: &Op| {
            let u = analyze(op);
            let mut set = u.defines;
            set.extend(u.opt_defines);
            set
        };
        let shared: Vec<Var> = visible(left)
            .intersection(&visible(right))
            .cloned()
            .collect();

        let left_iter = Self::exec(left, input, ctx)?;
        if shared.is_empty() {
            // No shared variables: no row can match, nothing is excluded
            return Ok(left_iter);
        }
        let right_iter = Self::exec(right, ExecInput::Root, ctx)?;
        let right = match collect_all(right_iter) {
            Ok(v) => v,
            Err(e) => return Ok(err_iter(e)),
        };
        let right: Vec<Binding> = right.into_iter().map(|r| r.project(&shared)).collect();

        Ok(Box::new(left_iter.filter(move |b| match b {
            Ok(b) => {
                let bp = b.project(&shared);
                // Removed only if some right solution agrees on all shared
                // variables AND actually shares a bound variable
                !right
                    .iter()
                    .any(|r| bp.compatible(r) && r.compatible(&bp) && bp.shares_var(r))
            }
            Err(_) => true,
        })))
    }

    fn exec_diff(left: &Op, right: &Op, input: ExecInput, ctx: &ExecContext) -> Result<BindingIter> {
        let left_iter = Self::exec(left, input, ctx)?;
        let right_iter = Self::exec(right, ExecInput::Root, ctx)?;
        let right = match collect_all(right_iter) {
            Ok(v) => v,
            Err(e) => return Ok(err_iter(e)),
        };
        Ok(Box::new(left_iter.filter(move |b| match b {
            Ok(b) => !right.iter().any(|r| b.compatible(r) && r.compatible(b)),
            Err(_) => true,
        })))
    }

    fn exec_project(
        sub: &Op,
        vars: &[Var],
        input: ExecInput,
        ctx: &ExecContext,
    ) -> Result<BindingIter> {
        if input.is_root() {
            let out = Self::exec(sub, ExecInput::Root, ctx)?;
            let vars = vars.to_vec();
            return Ok(Box::new(out.map(move |b| b.map(|b| b.project(&vars)))));
        }
        // Nested under another iterator: the outer input's variables stay
        // visible alongside the restricted result
        let input = input.into_iter();
        Ok(Box::new(ProjectMerge::new(
            input,
            sub.clone(),
            vars.to_vec(),
            ctx.clone(),
        )))
    }

    fn exec_sort(
        out: BindingIter,
        conditions: &[SortCondition],
        limit: Option<usize>,
    ) -> Result<BindingIter> {
        let mut rows = match collect_all(out) {
            Ok(v) => v,
            Err(e) => return Ok(err_iter(e)),
        };
        let conditions = conditions.to_vec();
        rows.sort_by(|a, b| compare_by_conditions(a, b, &conditions));
        if let Some(n) = limit {
            rows.truncate(n);
        }
        Ok(from_bindings(rows))
    }

    fn exec_group(
        out: BindingIter,
        group_vars: &[Var],
        aggregates: &[(Var, Aggregate)],
    ) -> Result<BindingIter> {
        let rows = match collect_all(out) {
            Ok(v) => v,
            Err(e) => return Ok(err_iter(e)),
        };

        // Partition by the group-variable tuple, preserving first-seen
        // group order. With no group variables, one group over all input
        // (even when empty).
        let mut order: Vec<Vec<Option<Term>>> = Vec::new();
        let mut groups: FxHashMap<Vec<Option<Term>>, Vec<Binding>> = FxHashMap::default();
        if group_vars.is_empty() {
            order.push(Vec::new());
            groups.insert(Vec::new(), rows);
        } else {
            for row in rows {
                let key: Vec<Option<Term>> =
                    group_vars.iter().map(|v| row.get(v).cloned()).collect();
                if !groups.contains_key(&key) {
                    order.push(key.clone());
                }
                groups.entry(key).or_default().push(row);
            }
        }

        let mut results = Vec::with_capacity(order.len());
        for key in order {
            let members = groups.remove(&key).unwrap_or_default();
            let mut binding = Binding::root();
            for (var, term) in group_vars.iter().zip(key) {
                if let Some(term) = term {
                    binding = binding.extended(var.clone(), term);
                }
            }
            for (var, agg) in aggregates {
                if let Some(value) = eval_aggregate(agg, &members) {
                    binding = binding.extended(var.clone(), value);
                }
            }
            results.push(binding);
        }
        Ok(from_bindings(results))
    }

    fn exec_graph(
        graph: &GraphName,
        sub: &Op,
        input: ExecInput,
        ctx: &ExecContext,
    ) -> Result<BindingIter> {
        match graph {
            GraphName::Default | GraphName::Union | GraphName::Named(_) => {
                let ctx = ctx.with_active_graph(graph.clone());
                Self::exec(sub, input, &ctx)
            }
            GraphName::Var(var) => {
                // Iterate the dataset's named graphs, binding the variable
                // per graph; honor an already-bound graph variable
                let seeds: Vec<Binding> = match input {
                    ExecInput::Root => vec![Binding::root()],
                    ExecInput::Pipe(it) => match collect_all(it) {
                        Ok(v) => v,
                        Err(e) => return Ok(err_iter(e)),
                    },
                };
                let mut outs: Vec<BindingIter> = Vec::new();
                for name in ctx.stage.graph_names() {
                    let compatible: Vec<Binding> = seeds
                        .iter()
                        .filter(|b| b.get(var).map_or(true, |t| *t == name))
                        .map(|b| b.extended(var.clone(), name.clone()))
                        .collect();
                    if compatible.is_empty() {
                        continue;
                    }
                    let ctx_g = ctx.with_active_graph(GraphName::Named(name));
                    outs.push(Self::exec(
                        sub,
                        ExecInput::Pipe(from_bindings(compatible)),
                        &ctx_g,
                    )?);
                }
                Ok(Box::new(outs.into_iter().flatten()))
            }
        }
    }

    fn exec_table(table: &Table, input: ExecInput) -> Result<BindingIter> {
        if table.is_unit() {
            // Join identity: pass the input through unchanged
            return Ok(input.into_iter());
        }
        let rows: Vec<Binding> = table
            .rows
            .iter()
            .map(|row| row.iter().cloned().collect())
            .collect();
        let input = input.into_iter();
        Ok(Box::new(input.flat_map(move |b| -> Vec<Result<Binding>> {
            match b {
                Ok(b) => rows
                    .iter()
                    .filter_map(|r| b.merge_compatible(r))
                    .map(Ok)
                    .collect(),
                Err(e) => vec![Err(e)],
            }
        })))
    }
}

impl Var {
    /// Non-distinguished variables stand in for blank nodes in patterns
    /// and are hidden from results when the context asks for it
    pub fn is_non_distinguished(&self) -> bool {
        self.name().starts_with('*')
    }
}

fn flatten_union<'a>(op: &'a Op, out: &mut Vec<&'a Op>) {
    match op {
        Op::Union(left, right) => {
            flatten_union(left, out);
            flatten_union(right, out);
        }
        other => out.push(other),
    }
}

/// Wrap a stream with per-binding assignments
///
/// An expression evaluation error leaves that one variable unbound for
/// that binding; it is never fatal. With `fresh` false (Assign semantics),
/// rebinding an already-bound variable keeps the row only if the values
/// agree.
fn assign_iter(out: BindingIter, assignments: Vec<(Var, Expr)>, fresh: bool) -> BindingIter {
    Box::new(out.filter_map(move |b| -> Option<Result<Binding>> {
        let mut b = match b {
            Ok(b) => b,
            Err(e) => return Some(Err(e)),
        };
        for (var, e) in &assignments {
            match expr::eval(e, &b) {
                Ok(value) => {
                    if let Some(existing) = b.get(var) {
                        debug_assert!(!fresh, "extend target must be a fresh variable");
                        if *existing != value {
                            return None;
                        }
                    } else {
                        b = b.extended(var.clone(), value);
                    }
                }
                Err(ExprError::Unbound(_)) | Err(ExprError::TypeError) => {}
            }
        }
        Some(Ok(b))
    }))
}

fn compare_by_conditions(a: &Binding, b: &Binding, conditions: &[SortCondition]) -> Ordering {
    for cond in conditions {
        let ta = expr::eval(&cond.expr, a).ok();
        let tb = expr::eval(&cond.expr, b).ok();
        let ord = compare_total(ta.as_ref(), tb.as_ref());
        let ord = if cond.ascending { ord } else { ord.reverse() };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn eval_aggregate(agg: &Aggregate, members: &[Binding]) -> Option<Term> {
    let values = |e: &Expr| -> Vec<Term> {
        members
            .iter()
            .filter_map(|b| expr::eval(e, b).ok())
            .collect()
    };
    let numeric = |t: &Term| -> Option<f64> {
        match t {
            Term::Literal(lit) => lit.lexical.parse().ok(),
            _ => None,
        }
    };
    match agg {
        Aggregate::Count(None) => Some(Term::integer(members.len() as i64)),
        Aggregate::Count(Some(e)) => Some(Term::integer(values(e).len() as i64)),
        Aggregate::Sum(e) => {
            let sum: f64 = values(e).iter().filter_map(numeric).sum();
            Some(if sum.fract() == 0.0 {
                Term::integer(sum as i64)
            } else {
                Term::literal(sum.to_string())
            })
        }
        Aggregate::Min(e) => values(e)
            .into_iter()
            .min_by(|a, b| compare_total(Some(a), Some(b))),
        Aggregate::Max(e) => values(e)
            .into_iter()
            .max_by(|a, b| compare_total(Some(a), Some(b))),
        Aggregate::Avg(e) => {
            let nums: Vec<f64> = values(e).iter().filter_map(numeric).collect();
            if nums.is_empty() {
                Some(Term::integer(0))
            } else {
                let avg = nums.iter().sum::<f64>() / nums.len() as f64;
                Some(if avg.fract() == 0.0 {
                    Term::integer(avg as i64)
                } else {
                    Term::literal(avg.to_string())
                })
            }
        }
        Aggregate::Sample(e) => values(e).into_iter().next(),
        Aggregate::GroupConcat { expr: e, separator } => {
            let parts: Vec<String> = values(e)
                .iter()
                .map(|t| t.lexical_str().to_string())
                .collect();
            Some(Term::literal(parts.join(separator)))
        }
    }
}

// ============================================================================
// Join iterators
// ============================================================================

/// Nested-loop join with the right side materialized on first pull
struct NestedLoopJoin {
    left: BindingIter,
    right_src: Option<BindingIter>,
    right: Vec<Binding>,
    current: Option<Binding>,
    idx: usize,
}

impl NestedLoopJoin {
    fn new(left: BindingIter, right: BindingIter) -> Self {
        NestedLoopJoin {
            left,
            right_src: Some(right),
            right: Vec::new(),
            current: None,
            idx: 0,
        }
    }

    fn materialize_right(&mut self) -> Result<()> {
        if let Some(src) = self.right_src.take() {
            self.right = collect_all(src)?;
        }
        Ok(())
    }
}

impl Iterator for NestedLoopJoin {
    type Item = Result<Binding>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Err(e) = self.materialize_right() {
            self.current = None;
            return Some(Err(e));
        }
        loop {
            if self.current.is_none() {
                match self.left.next()? {
                    Ok(b) => {
                        self.current = Some(b);
                        self.idx = 0;
                    }
                    Err(e) => return Some(Err(e)),
                }
            }
            let left = self.current.as_ref().expect("set above");
            while self.idx < self.right.len() {
                let candidate = &self.right[self.idx];
                self.idx += 1;
                if let Some(merged) = left.merge_compatible(candidate) {
                    return Some(Ok(merged));
                }
            }
            self.current = None;
        }
    }
}

/// Left outer join honoring the left-join condition expressions
///
/// A right solution is accepted only if compatible with the left solution
/// and passing every condition over the merged binding; when none is, the
/// left solution alone is emitted with the right's variables unbound.
struct OptionalJoin {
    left: BindingIter,
    right_src: Option<BindingIter>,
    right: Vec<Binding>,
    exprs: Vec<Expr>,
    current: Option<Binding>,
    idx: usize,
    matched: bool,
}

impl OptionalJoin {
    fn new(left: BindingIter, right: BindingIter, exprs: Vec<Expr>) -> Self {
        OptionalJoin {
            left,
            right_src: Some(right),
            right: Vec::new(),
            exprs,
            current: None,
            idx: 0,
            matched: false,
        }
    }
}

impl Iterator for OptionalJoin {
    type Item = Result<Binding>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(src) = self.right_src.take() {
            match collect_all(src) {
                Ok(v) => self.right = v,
                Err(e) => return Some(Err(e)),
            }
        }
        loop {
            if self.current.is_none() {
                match self.left.next()? {
                    Ok(b) => {
                        self.current = Some(b);
                        self.idx = 0;
                        self.matched = false;
                    }
                    Err(e) => return Some(Err(e)),
                }
            }
            let left = self.current.clone().expect("set above");
            while self.idx < self.right.len() {
                let candidate = &self.right[self.idx];
                self.idx += 1;
                if let Some(merged) = left.merge_compatible(candidate) {
                    if self.exprs.iter().all(|e| eval_filter(e, &merged)) {
                        self.matched = true;
                        return Some(Ok(merged));
                    }
                }
            }
            let unmatched = !self.matched;
            self.current = None;
            if unmatched {
                return Some(Ok(left));
            }
        }
    }
}

/// The linear OPTIONAL: evaluate the right subtree once per left solution,
/// seeded with that solution; emit the left solution alone when the right
/// yields nothing
struct ConditionalIter {
    left: BindingIter,
    right: Op,
    ctx: ExecContext,
    current: Option<(Binding, BindingIter, bool)>,
}

impl ConditionalIter {
    fn new(left: BindingIter, right: Op, ctx: ExecContext) -> Self {
        ConditionalIter {
            left,
            right,
            ctx,
            current: None,
        }
    }
}

impl Iterator for ConditionalIter {
    type Item = Result<Binding>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.current.is_none() {
                let seed = match self.left.next()? {
                    Ok(b) => b,
                    Err(e) => return Some(Err(e)),
                };
                let sub = OpExecutor::exec(
                    &self.right,
                    ExecInput::Pipe(from_bindings(vec![seed.clone()])),
                    &self.ctx,
                );
                match sub {
                    Ok(it) => self.current = Some((seed, it, false)),
                    Err(e) => return Some(Err(e)),
                }
            }
            let (seed, it, yielded) = self.current.as_mut().expect("set above");
            match it.next() {
                Some(Ok(b)) => {
                    *yielded = true;
                    return Some(Ok(b));
                }
                Some(Err(e)) => return Some(Err(e)),
                None => {
                    let emit = if *yielded { None } else { Some(seed.clone()) };
                    self.current = None;
                    if let Some(b) = emit {
                        return Some(Ok(b));
                    }
                }
            }
        }
    }
}

/// Merge-aware projection for nested use: evaluates the subtree once per
/// outer binding and re-exposes the outer variables alongside the
/// restricted result
struct ProjectMerge {
    input: BindingIter,
    sub: Op,
    vars: Vec<Var>,
    ctx: ExecContext,
    current: Option<(Binding, BindingIter)>,
}

impl ProjectMerge {
    fn new(input: BindingIter, sub: Op, vars: Vec<Var>, ctx: ExecContext) -> Self {
        ProjectMerge {
            input,
            sub,
            vars,
            ctx,
            current: None,
        }
    }
}

impl Iterator for ProjectMerge {
    type Item = Result<Binding>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.current.is_none() {
                let outer = match self.input.next()? {
                    Ok(b) => b,
                    Err(e) => return Some(Err(e)),
                };
                let sub = OpExecutor::exec(
                    &self.sub,
                    ExecInput::Pipe(from_bindings(vec![outer.clone()])),
                    &self.ctx,
                );
                match sub {
                    Ok(it) => self.current = Some((outer, it)),
                    Err(e) => return Some(Err(e)),
                }
            }
            let (outer, it) = self.current.as_mut().expect("set above");
            match it.next() {
                Some(Ok(b)) => {
                    let restricted = b.project(&self.vars);
                    match outer.merge_compatible(&restricted) {
                        Some(merged) => return Some(Ok(merged)),
                        None => continue,
                    }
                }
                Some(Err(e)) => return Some(Err(e)),
                None => self.current = None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algebra::{BasicPattern, PatternNode, TriplePattern};
    use crate::stage::{GenericStageGenerator, MemTermGraph};

    fn v(name: &str) -> Var {
        Var::new(name)
    }

    fn iri(local: &str) -> Term {
        Term::iri(format!("http://ex/{local}"))
    }

    fn node(text: &str) -> PatternNode {
        if let Some(name) = text.strip_prefix('?') {
            PatternNode::var(name)
        } else {
            PatternNode::term(iri(text))
        }
    }

    fn bgp(patterns: &[(&str, &str, &str)]) -> Op {
        Op::Bgp(BasicPattern::new(
            patterns
                .iter()
                .map(|(s, p, o)| TriplePattern::new(node(s), node(p), node(o)))
                .collect(),
        ))
    }

    fn small_graph() -> MemTermGraph {
        let mut g = MemTermGraph::new();
        g.insert_triple(iri("alice"), iri("knows"), iri("bob"));
        g.insert_triple(iri("alice"), iri("knows"), iri("carol"));
        g.insert_triple(iri("bob"), iri("knows"), iri("carol"));
        g.insert_triple(iri("alice"), iri("age"), Term::integer(42));
        g.insert_triple(iri("bob"), iri("age"), Term::integer(17));
        g
    }

    fn ctx_for(graph: MemTermGraph) -> ExecContext {
        ExecContext::new(Arc::new(GenericStageGenerator::new(Arc::new(graph))))
    }

    fn run(op: &Op, ctx: &ExecContext) -> Vec<Binding> {
        OpExecutor::execute(op, ctx)
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap()
    }

    #[test]
    fn bgp_two_patterns_joins_on_shared_var() {
        let ctx = ctx_for(small_graph());
        let op = bgp(&[("?x", "knows", "?y"), ("?y", "knows", "?z")]);
        let rows = run(&op, &ctx);
        // alice knows bob knows carol
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get(&v("x")), Some(&iri("alice")));
        assert_eq!(rows[0].get(&v("z")), Some(&iri("carol")));
    }

    #[test]
    fn join_combines_independent_branches() {
        let ctx = ctx_for(small_graph());
        let op = Op::join(bgp(&[("?x", "knows", "?y")]), bgp(&[("?x", "age", "?a")]));
        let mut rows = run(&op, &ctx);
        rows.sort_by(|a, b| format!("{a:?}").cmp(&format!("{b:?}")));
        // alice has 2 knows edges + age; bob has 1 + age
        assert_eq!(rows.len(), 3);
    }

    #[test]
    fn left_join_emits_unmatched_left() {
        let ctx = ctx_for(small_graph());
        // carol has no age
        let op = Op::left_join(
            bgp(&[("?x", "knows", "?y")]),
            bgp(&[("?y", "age", "?a")]),
            vec![],
        );
        let rows = run(&op, &ctx);
        assert_eq!(rows.len(), 3);
        let unbound: Vec<_> = rows.iter().filter(|b| !b.contains(&v("a"))).collect();
        // knows edges pointing at carol: from alice and from bob
        assert_eq!(unbound.len(), 2);
    }

    #[test]
    fn left_join_condition_restricts_matches() {
        let ctx = ctx_for(small_graph());
        let adult = Expr::Ge(
            Box::new(Expr::Var(v("a"))),
            Box::new(Expr::Const(Term::integer(18))),
        );
        let op = Op::left_join(
            bgp(&[("?x", "knows", "?y")]),
            bgp(&[("?y", "age", "?a")]),
            vec![adult],
        );
        let rows = run(&op, &ctx);
        assert_eq!(rows.len(), 3);
        // bob's age 17 fails the condition: alice-knows-bob stays, unbound
        for row in &rows {
            if row.get(&v("y")) == Some(&iri("bob")) {
                assert!(!row.contains(&v("a")));
            }
        }
    }

    #[test]
    fn minus_disjoint_vars_is_identity() {
        let ctx = ctx_for(small_graph());
        let left = bgp(&[("?x", "knows", "?y")]);
        let right = bgp(&[("?a", "age", "?b")]);
        let rows = run(&Op::minus(left.clone(), right), &ctx);
        let base = run(&left, &ctx);
        assert_eq!(rows.len(), base.len());
    }

    #[test]
    fn minus_excludes_on_shared_vars() {
        let ctx = ctx_for(small_graph());
        let op = Op::minus(bgp(&[("?x", "knows", "?y")]), bgp(&[("?x", "age", "?a")]));
        let rows = run(&op, &ctx);
        // alice and bob both have ages: all their knows-rows are excluded
        assert!(rows.is_empty());
    }

    #[test]
    fn union_flattens_and_concatenates() {
        let ctx = ctx_for(small_graph());
        let a = bgp(&[("alice", "knows", "?y")]);
        let b = bgp(&[("bob", "knows", "?y")]);
        let c = bgp(&[("?x", "age", "?a")]);
        let nested_left = Op::union(Op::union(a.clone(), b.clone()), c.clone());
        let nested_right = Op::union(a, Op::union(b, c));
        let mut l = run(&nested_left, &ctx);
        let mut r = run(&nested_right, &ctx);
        assert_eq!(l.len(), 5);
        let key = |b: &Binding| format!("{b:?}");
        l.sort_by_key(key);
        r.sort_by_key(key);
        assert_eq!(l, r);
    }

    #[test]
    fn filter_drops_failing_and_erroring_rows() {
        let ctx = ctx_for(small_graph());
        let op = Op::filter(
            vec![Expr::Gt(
                Box::new(Expr::Var(v("a"))),
                Box::new(Expr::Const(Term::integer(18))),
            )],
            bgp(&[("?x", "age", "?a")]),
        );
        let rows = run(&op, &ctx);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get(&v("x")), Some(&iri("alice")));
    }

    #[test]
    fn assign_error_leaves_var_unbound() {
        let ctx = ctx_for(small_graph());
        let op = Op::Assign {
            input: Box::new(bgp(&[("?x", "knows", "?y")])),
            assignments: vec![(
                v("n"),
                Expr::Add(
                    Box::new(Expr::Var(v("y"))),
                    Box::new(Expr::Const(Term::integer(1))),
                ),
            )],
        };
        let rows = run(&op, &ctx);
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|b| !b.contains(&v("n"))));
    }

    #[test]
    fn extend_binds_computed_value() {
        let ctx = ctx_for(small_graph());
        let op = Op::Extend {
            input: Box::new(bgp(&[("?x", "age", "?a")])),
            assignments: vec![(
                v("next"),
                Expr::Add(
                    Box::new(Expr::Var(v("a"))),
                    Box::new(Expr::Const(Term::integer(1))),
                ),
            )],
        };
        let rows = run(&op, &ctx);
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|b| b.contains(&v("next"))));
    }

    #[test]
    fn distinct_is_idempotent() {
        let ctx = ctx_for(small_graph());
        let base = Op::project(bgp(&[("?x", "knows", "?y")]), vec![v("x")]);
        let once = Op::distinct(base.clone());
        let twice = Op::distinct(Op::distinct(base));
        let mut a = run(&once, &ctx);
        let mut b = run(&twice, &ctx);
        let key = |b: &Binding| format!("{b:?}");
        a.sort_by_key(key);
        b.sort_by_key(key);
        assert_eq!(a, b);
        assert_eq!(a.len(), 2); // alice, bob
    }

    #[test]
    fn slice_boundaries() {
        let ctx = ctx_for(small_graph());
        let base = bgp(&[("?x", "knows", "?y")]);
        // length 0 yields nothing regardless of start
        assert!(run(&Op::slice(base.clone(), 2, Some(0)), &ctx).is_empty());
        // length beyond the input yields the input unchanged
        let all = run(&Op::slice(base.clone(), 0, Some(100)), &ctx);
        assert_eq!(all.len(), run(&base, &ctx).len());
        let skipped = run(&Op::slice(base, 1, None), &ctx);
        assert_eq!(skipped.len(), 2);
    }

    #[test]
    fn order_sorts_by_condition() {
        let ctx = ctx_for(small_graph());
        let op = Op::Order {
            input: Box::new(bgp(&[("?x", "age", "?a")])),
            conditions: vec![SortCondition::asc(Expr::Var(v("a")))],
        };
        let rows = run(&op, &ctx);
        assert_eq!(rows[0].get(&v("x")), Some(&iri("bob"))); // 17
        assert_eq!(rows[1].get(&v("x")), Some(&iri("alice"))); // 42
    }

    #[test]
    fn top_n_truncates_after_sort() {
        let ctx = ctx_for(small_graph());
        let op = Op::TopN {
            input: Box::new(bgp(&[("?x", "age", "?a")])),
            limit: 1,
            conditions: vec![SortCondition::desc(Expr::Var(v("a")))],
        };
        let rows = run(&op, &ctx);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get(&v("x")), Some(&iri("alice")));
    }

    #[test]
    fn group_counts_per_key() {
        let ctx = ctx_for(small_graph());
        let op = Op::Group {
            input: Box::new(bgp(&[("?x", "knows", "?y")])),
            group_vars: vec![v("x")],
            aggregates: vec![(v("n"), Aggregate::Count(None))],
        };
        let rows = run(&op, &ctx);
        assert_eq!(rows.len(), 2);
        for row in rows {
            let expected = if row.get(&v("x")) == Some(&iri("alice")) {
                2
            } else {
                1
            };
            assert_eq!(row.get(&v("n")), Some(&Term::integer(expected)));
        }
    }

    #[test]
    fn group_without_keys_over_empty_input_yields_one_row() {
        let ctx = ctx_for(small_graph());
        let op = Op::Group {
            input: Box::new(bgp(&[("?x", "missing", "?y")])),
            group_vars: vec![],
            aggregates: vec![(v("n"), Aggregate::Count(None))],
        };
        let rows = run(&op, &ctx);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get(&v("n")), Some(&Term::integer(0)));
    }

    #[test]
    fn graph_var_iterates_named_graphs() {
        let mut g = MemTermGraph::new();
        g.insert_quad(iri("g1"), iri("a"), iri("p"), iri("b"));
        g.insert_quad(iri("g2"), iri("c"), iri("p"), iri("d"));
        let ctx = ctx_for(g);
        let op = Op::Graph {
            graph: GraphName::Var(v("g")),
            input: Box::new(bgp(&[("?s", "p", "?o")])),
        };
        let rows = run(&op, &ctx);
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|b| b.contains(&v("g"))));
    }

    #[test]
    fn unit_table_is_identity_and_null_is_empty() {
        let ctx = ctx_for(small_graph());
        let op = Op::join(Op::Table(Table::unit()), bgp(&[("?x", "age", "?a")]));
        assert_eq!(run(&op, &ctx).len(), 2);
        assert!(run(&Op::Null, &ctx).is_empty());
    }

    #[test]
    fn table_rows_join_against_input() {
        let ctx = ctx_for(small_graph());
        let table = Table {
            vars: vec![v("x")],
            rows: vec![vec![(v("x"), iri("alice"))]],
        };
        let op = Op::join(bgp(&[("?x", "age", "?a")]), Op::Table(table));
        let rows = run(&op, &ctx);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get(&v("a")), Some(&Term::integer(42)));
    }

    #[test]
    fn conditional_evaluates_right_per_left_solution() {
        let ctx = ctx_for(small_graph());
        let op = Op::Conditional {
            left: Box::new(bgp(&[("?x", "knows", "?y")])),
            right: Box::new(bgp(&[("?y", "age", "?a")])),
        };
        let rows = run(&op, &ctx);
        assert_eq!(rows.len(), 3);
        // carol rows fall through without ?a
        assert_eq!(rows.iter().filter(|b| b.contains(&v("a"))).count(), 1);
    }
}
