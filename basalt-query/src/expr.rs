//! Per-binding expression evaluation
//!
//! Expression outcomes are an explicit result type, not exceptions: a
//! [`ExprError`] means "this binding fails this expression" and is
//! recovered locally by the caller - filters drop the binding, assigns
//! leave the target variable unbound. It never becomes a pipeline-wide
//! failure.
//!
//! Comparison has two faces:
//! - [`compare_sparql`]: SPARQL operator semantics - numeric by value,
//!   strings lexically, cross-type comparison is a type error
//! - [`compare_total`]: the fixed total order used by ORDER BY, where
//!   cross-type ordering is resolved rather than erroneous

use crate::algebra::{Expr, Var};
use crate::binding::Binding;
use basalt_core::term::{Iri, Literal};
use basalt_core::Term;
use std::cmp::Ordering;

const XSD_BOOLEAN: &str = "http://www.w3.org/2001/XMLSchema#boolean";
const XSD_INTEGER: &str = "http://www.w3.org/2001/XMLSchema#integer";
const XSD_DOUBLE: &str = "http://www.w3.org/2001/XMLSchema#double";
const XSD_DECIMAL: &str = "http://www.w3.org/2001/XMLSchema#decimal";

/// Per-binding evaluation failure; recovered by the caller, never fatal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExprError {
    /// A mentioned variable is not bound in this solution
    Unbound(Var),
    /// Operands have no defined behavior for this operation
    TypeError,
}

pub type EvalResult = std::result::Result<Term, ExprError>;

/// Numeric view of a literal, if it has one
fn numeric_value(term: &Term) -> Option<f64> {
    match term {
        Term::Literal(lit) => {
            let dt = lit.datatype.as_ref()?;
            match dt.as_str() {
                XSD_INTEGER | XSD_DOUBLE | XSD_DECIMAL => lit.lexical.parse().ok(),
                _ => None,
            }
        }
        _ => None,
    }
}

fn bool_term(value: bool) -> Term {
    Term::Literal(Literal::typed(
        if value { "true" } else { "false" },
        Iri::new(XSD_BOOLEAN),
    ))
}

fn numeric_term(value: f64) -> Term {
    if value.fract() == 0.0 && value.abs() < 9.0e15 {
        Term::Literal(Literal::typed(
            format!("{}", value as i64),
            Iri::new(XSD_INTEGER),
        ))
    } else {
        Term::Literal(Literal::typed(value.to_string(), Iri::new(XSD_DOUBLE)))
    }
}

/// Effective boolean value per SPARQL
pub fn effective_boolean_value(term: &Term) -> std::result::Result<bool, ExprError> {
    match term {
        Term::Literal(lit) => {
            if let Some(dt) = &lit.datatype {
                if dt.as_str() == XSD_BOOLEAN {
                    return match &*lit.lexical {
                        "true" | "1" => Ok(true),
                        "false" | "0" => Ok(false),
                        _ => Err(ExprError::TypeError),
                    };
                }
            }
            if let Some(n) = numeric_value(term) {
                return Ok(n != 0.0 && !n.is_nan());
            }
            if lit.datatype.is_none() {
                return Ok(!lit.lexical.is_empty());
            }
            Err(ExprError::TypeError)
        }
        _ => Err(ExprError::TypeError),
    }
}

/// SPARQL operator comparison; cross-type comparison is a type error
pub fn compare_sparql(a: &Term, b: &Term) -> std::result::Result<Ordering, ExprError> {
    if let (Some(x), Some(y)) = (numeric_value(a), numeric_value(b)) {
        return x.partial_cmp(&y).ok_or(ExprError::TypeError);
    }
    match (a, b) {
        (Term::Literal(la), Term::Literal(lb))
            if la.datatype.is_none() && lb.datatype.is_none() =>
        {
            Ok(la.lexical.cmp(&lb.lexical))
        }
        _ if a == b => Ok(Ordering::Equal),
        _ => Err(ExprError::TypeError),
    }
}

/// Fixed total order for ORDER BY
///
/// Unbound sorts first, then blank nodes, then IRIs, then literals.
/// Within literals, mutually comparable numerics order by value; everything
/// else falls back to the structural term order.
pub fn compare_total(a: Option<&Term>, b: Option<&Term>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => {
            let rank = |t: &Term| match t {
                Term::BlankNode(_) => 0u8,
                Term::Iri(_) => 1,
                Term::Literal(_) => 2,
            };
            rank(a).cmp(&rank(b)).then_with(|| {
                if let (Some(x), Some(y)) = (numeric_value(a), numeric_value(b)) {
                    if let Some(ord) = x.partial_cmp(&y) {
                        if ord != Ordering::Equal {
                            return ord;
                        }
                    }
                }
                a.cmp(b)
            })
        }
    }
}

/// Evaluate an expression against one solution
pub fn eval(expr: &Expr, binding: &Binding) -> EvalResult {
    match expr {
        Expr::Var(v) => binding
            .get(v)
            .cloned()
            .ok_or_else(|| ExprError::Unbound(v.clone())),
        Expr::Const(t) => Ok(t.clone()),
        Expr::And(a, b) => {
            let a = effective_boolean_value(&eval(a, binding)?)?;
            if !a {
                return Ok(bool_term(false));
            }
            let b = effective_boolean_value(&eval(b, binding)?)?;
            Ok(bool_term(b))
        }
        Expr::Or(a, b) => {
            let a = effective_boolean_value(&eval(a, binding)?)?;
            if a {
                return Ok(bool_term(true));
            }
            let b = effective_boolean_value(&eval(b, binding)?)?;
            Ok(bool_term(b))
        }
        Expr::Not(e) => {
            let v = effective_boolean_value(&eval(e, binding)?)?;
            Ok(bool_term(!v))
        }
        Expr::Eq(a, b) => cmp_op(a, b, binding, |o| o == Ordering::Equal),
        Expr::Ne(a, b) => cmp_op(a, b, binding, |o| o != Ordering::Equal),
        Expr::Lt(a, b) => cmp_op(a, b, binding, |o| o == Ordering::Less),
        Expr::Le(a, b) => cmp_op(a, b, binding, |o| o != Ordering::Greater),
        Expr::Gt(a, b) => cmp_op(a, b, binding, |o| o == Ordering::Greater),
        Expr::Ge(a, b) => cmp_op(a, b, binding, |o| o != Ordering::Less),
        Expr::Add(a, b) => arith_op(a, b, binding, |x, y| x + y),
        Expr::Sub(a, b) => arith_op(a, b, binding, |x, y| x - y),
        Expr::Mul(a, b) => arith_op(a, b, binding, |x, y| x * y),
        Expr::Div(a, b) => {
            let x = numeric_operand(a, binding)?;
            let y = numeric_operand(b, binding)?;
            if y == 0.0 {
                return Err(ExprError::TypeError);
            }
            Ok(numeric_term(x / y))
        }
        Expr::Bound(v) => Ok(bool_term(binding.contains(v))),
        Expr::SameTerm(a, b) => {
            let a = eval(a, binding)?;
            let b = eval(b, binding)?;
            Ok(bool_term(a == b))
        }
        Expr::Str(e) => {
            let t = eval(e, binding)?;
            Ok(Term::literal(t.lexical_str()))
        }
        Expr::IsIri(e) => Ok(bool_term(eval(e, binding)?.is_iri())),
        Expr::IsLiteral(e) => Ok(bool_term(eval(e, binding)?.is_literal())),
        Expr::IsBlank(e) => Ok(bool_term(eval(e, binding)?.is_blank())),
    }
}

fn cmp_op(
    a: &Expr,
    b: &Expr,
    binding: &Binding,
    test: impl Fn(Ordering) -> bool,
) -> EvalResult {
    let a = eval(a, binding)?;
    let b = eval(b, binding)?;
    Ok(bool_term(test(compare_sparql(&a, &b)?)))
}

fn numeric_operand(e: &Expr, binding: &Binding) -> std::result::Result<f64, ExprError> {
    numeric_value(&eval(e, binding)?).ok_or(ExprError::TypeError)
}

fn arith_op(
    a: &Expr,
    b: &Expr,
    binding: &Binding,
    f: impl Fn(f64, f64) -> f64,
) -> EvalResult {
    let x = numeric_operand(a, binding)?;
    let y = numeric_operand(b, binding)?;
    Ok(numeric_term(f(x, y)))
}

/// Evaluate a filter expression to its effective boolean value
///
/// Any evaluation failure is `false`: per SPARQL, filters fail silently
/// for the offending solution.
pub fn eval_filter(expr: &Expr, binding: &Binding) -> bool {
    match eval(expr, binding) {
        Ok(term) => effective_boolean_value(&term).unwrap_or(false),
        Err(_) => false,
    }
}
