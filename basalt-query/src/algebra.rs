//! SPARQL-style algebra: the operator tree consumed by the executor
//!
//! The tree is built upstream (parser + optimizer) and consumed read-only
//! here. [`Op`] is a closed sum type - the executor matches it
//! exhaustively, so "unknown operator" cannot exist past compile time.

use basalt_core::Term;
use std::fmt;
use std::sync::Arc;

/// A query variable; equality by name
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Var(Arc<str>);

impl Var {
    pub fn new(name: impl AsRef<str>) -> Self {
        Var(Arc::from(name.as_ref()))
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "?{}", self.0)
    }
}

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "?{}", self.0)
    }
}

/// A slot in a triple pattern: variable or concrete term
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PatternNode {
    Var(Var),
    Term(Term),
}

impl PatternNode {
    pub fn var(name: impl AsRef<str>) -> Self {
        PatternNode::Var(Var::new(name))
    }

    pub fn term(term: Term) -> Self {
        PatternNode::Term(term)
    }

    pub fn as_var(&self) -> Option<&Var> {
        match self {
            PatternNode::Var(v) => Some(v),
            PatternNode::Term(_) => None,
        }
    }
}

/// One triple pattern
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TriplePattern {
    pub subject: PatternNode,
    pub predicate: PatternNode,
    pub object: PatternNode,
}

impl TriplePattern {
    pub fn new(subject: PatternNode, predicate: PatternNode, object: PatternNode) -> Self {
        TriplePattern {
            subject,
            predicate,
            object,
        }
    }

    pub fn slots(&self) -> [&PatternNode; 3] {
        [&self.subject, &self.predicate, &self.object]
    }

    /// Variables of this pattern, in slot order, with duplicates
    pub fn vars(&self) -> impl Iterator<Item = &Var> {
        self.slots().into_iter().filter_map(PatternNode::as_var)
    }
}

/// A basic graph pattern: a conjunction of triple patterns
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct BasicPattern {
    pub patterns: Vec<TriplePattern>,
}

impl BasicPattern {
    pub fn new(patterns: Vec<TriplePattern>) -> Self {
        BasicPattern { patterns }
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// Graph naming for the GRAPH operator and quad resolution
///
/// `Default` and `Union` are resolution sentinels: the default graph of the
/// dataset, and the RDF merge of all named graphs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GraphName {
    Default,
    Union,
    Named(Term),
    Var(Var),
}

/// Expressions used in filters, left-join conditions, assignments, and
/// sort conditions
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Var(Var),
    Const(Term),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Eq(Box<Expr>, Box<Expr>),
    Ne(Box<Expr>, Box<Expr>),
    Lt(Box<Expr>, Box<Expr>),
    Le(Box<Expr>, Box<Expr>),
    Gt(Box<Expr>, Box<Expr>),
    Ge(Box<Expr>, Box<Expr>),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),
    Bound(Var),
    SameTerm(Box<Expr>, Box<Expr>),
    Str(Box<Expr>),
    IsIri(Box<Expr>),
    IsLiteral(Box<Expr>),
    IsBlank(Box<Expr>),
}

impl Expr {
    /// Collect every variable mentioned in this expression into `out`
    pub fn collect_vars(&self, out: &mut Vec<Var>) {
        match self {
            Expr::Var(v) | Expr::Bound(v) => out.push(v.clone()),
            Expr::Const(_) => {}
            Expr::Not(e) | Expr::Str(e) | Expr::IsIri(e) | Expr::IsLiteral(e)
            | Expr::IsBlank(e) => e.collect_vars(out),
            Expr::And(a, b)
            | Expr::Or(a, b)
            | Expr::Eq(a, b)
            | Expr::Ne(a, b)
            | Expr::Lt(a, b)
            | Expr::Le(a, b)
            | Expr::Gt(a, b)
            | Expr::Ge(a, b)
            | Expr::Add(a, b)
            | Expr::Sub(a, b)
            | Expr::Mul(a, b)
            | Expr::Div(a, b)
            | Expr::SameTerm(a, b) => {
                a.collect_vars(out);
                b.collect_vars(out);
            }
        }
    }
}

/// One ORDER BY condition
#[derive(Clone, Debug, PartialEq)]
pub struct SortCondition {
    pub expr: Expr,
    pub ascending: bool,
}

impl SortCondition {
    pub fn asc(expr: Expr) -> Self {
        SortCondition {
            expr,
            ascending: true,
        }
    }

    pub fn desc(expr: Expr) -> Self {
        SortCondition {
            expr,
            ascending: false,
        }
    }
}

/// Aggregate functions for GROUP BY
#[derive(Clone, Debug, PartialEq)]
pub enum Aggregate {
    /// COUNT(*) when the expression is None
    Count(Option<Expr>),
    Sum(Expr),
    Min(Expr),
    Max(Expr),
    Avg(Expr),
    Sample(Expr),
    GroupConcat { expr: Expr, separator: String },
}

impl Aggregate {
    pub fn collect_vars(&self, out: &mut Vec<Var>) {
        match self {
            Aggregate::Count(None) => {}
            Aggregate::Count(Some(e))
            | Aggregate::Sum(e)
            | Aggregate::Min(e)
            | Aggregate::Max(e)
            | Aggregate::Avg(e)
            | Aggregate::Sample(e)
            | Aggregate::GroupConcat { expr: e, .. } => e.collect_vars(out),
        }
    }
}

/// Inline data: a fixed relation of bindings (VALUES)
#[derive(Clone, Debug, PartialEq, Default)]
pub struct Table {
    pub vars: Vec<Var>,
    /// Rows as (var, term) pairs; a row may leave variables unbound
    pub rows: Vec<Vec<(Var, Term)>>,
}

impl Table {
    /// The join identity: no variables, one empty row
    pub fn unit() -> Self {
        Table {
            vars: Vec::new(),
            rows: vec![Vec::new()],
        }
    }

    pub fn is_unit(&self) -> bool {
        self.vars.is_empty() && self.rows.len() == 1 && self.rows[0].is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// The algebra operator tree
#[derive(Clone, Debug, PartialEq)]
pub enum Op {
    /// Basic graph pattern, evaluated through the active stage generator
    Bgp(BasicPattern),
    /// Combine two independently evaluated branches on shared variables
    Join(Box<Op>, Box<Op>),
    /// OPTIONAL with an optional condition expression list
    LeftJoin {
        left: Box<Op>,
        right: Box<Op>,
        exprs: Vec<Expr>,
    },
    /// The linear OPTIONAL variant: right evaluated once per left solution
    Conditional { left: Box<Op>, right: Box<Op> },
    Union(Box<Op>, Box<Op>),
    /// SPARQL MINUS: exclusion on shared-variable compatibility
    Minus(Box<Op>, Box<Op>),
    /// Algebra difference: left solutions with no compatible right solution
    Diff(Box<Op>, Box<Op>),
    Filter { exprs: Vec<Expr>, input: Box<Op> },
    Graph { graph: GraphName, input: Box<Op> },
    /// Strict left-to-right pipeline of sub-operators
    Sequence(Vec<Op>),
    /// Bind fresh variables (parse-time checked to be new)
    Extend {
        input: Box<Op>,
        assignments: Vec<(Var, Expr)>,
    },
    /// Bind variables, allowing compatible rebinding
    Assign {
        input: Box<Op>,
        assignments: Vec<(Var, Expr)>,
    },
    Project { input: Box<Op>, vars: Vec<Var> },
    Distinct(Box<Op>),
    Reduced(Box<Op>),
    Slice {
        input: Box<Op>,
        start: usize,
        length: Option<usize>,
    },
    Order {
        input: Box<Op>,
        conditions: Vec<SortCondition>,
    },
    TopN {
        input: Box<Op>,
        limit: usize,
        conditions: Vec<SortCondition>,
    },
    Group {
        input: Box<Op>,
        group_vars: Vec<Var>,
        aggregates: Vec<(Var, Aggregate)>,
    },
    Table(Table),
    /// The empty relation; evaluating it releases its input eagerly
    Null,
}

impl Op {
    pub fn join(left: Op, right: Op) -> Op {
        Op::Join(Box::new(left), Box::new(right))
    }

    pub fn union(left: Op, right: Op) -> Op {
        Op::Union(Box::new(left), Box::new(right))
    }

    pub fn left_join(left: Op, right: Op, exprs: Vec<Expr>) -> Op {
        Op::LeftJoin {
            left: Box::new(left),
            right: Box::new(right),
            exprs,
        }
    }

    pub fn minus(left: Op, right: Op) -> Op {
        Op::Minus(Box::new(left), Box::new(right))
    }

    pub fn filter(exprs: Vec<Expr>, input: Op) -> Op {
        Op::Filter {
            exprs,
            input: Box::new(input),
        }
    }

    pub fn project(input: Op, vars: Vec<Var>) -> Op {
        Op::Project {
            input: Box::new(input),
            vars,
        }
    }

    pub fn distinct(input: Op) -> Op {
        Op::Distinct(Box::new(input))
    }

    pub fn slice(input: Op, start: usize, length: Option<usize>) -> Op {
        Op::Slice {
            input: Box::new(input),
            start,
            length,
        }
    }
}
