//! Constant folding.
//!
//! Every expression is built through these constructors, both while parsing
//! and when the unroller rebuilds an instruction after binding a loop
//! variable, so that anything resolvable at that point becomes a literal.

use crate::core::symbols::SymbolTable;
use crate::core::{Args, Expr, Iteration, Literal, ObjectRef, Op};
use crate::symbol::Symbol;

/// A reference to a name, replaced by its value if it is bound.
pub fn name(symbols: &SymbolTable, name: Symbol) -> Expr {
    match symbols.get(name) {
        Some(value) => Expr::Lit(value),
        None => Expr::Name(name),
    }
}

/// An object reference in value position. Objects are looked up by name
/// alone, whatever their indices.
pub fn object(symbols: &SymbolTable, name: Symbol, indices: Vec<Expr>) -> Expr {
    match symbols.get(name) {
        Some(value) => Expr::Lit(value),
        None => Expr::Object(name, indices),
    }
}

/// Apply `op` to its operands, evaluating it if every operand is a literal.
///
/// A missing operand counts as the integer `0`, so unary minus is `0 - x`.
/// Logical not only looks at its right operand.
pub fn fold(symbols: &SymbolTable, op: Op, left: Option<Expr>, right: Option<Expr>) -> Expr {
    let left = left.map(|expr| resolve(symbols, expr));
    let right = right.map(|expr| resolve(symbols, expr)).unwrap_or(Expr::int(0));

    let left_value = match &left {
        None => Some(Literal::Int(0)),
        Some(expr) => expr.as_literal(),
    };
    if let (Some(l), Some(r)) = (left_value, right.as_literal()) {
        if let Some(value) = eval(op, l, r) {
            return Expr::Lit(value);
        }
    }

    match left {
        None => Expr::Unary(op, Box::new(right)),
        Some(left) => Expr::Binary(op, Box::new(left), Box::new(right)),
    }
}

fn resolve(symbols: &SymbolTable, expr: Expr) -> Expr {
    match expr {
        Expr::Name(sym) => name(symbols, sym),
        Expr::Object(sym, indices) => object(symbols, sym, indices),
        expr => expr,
    }
}

/// Evaluate an operator over two literals. Returns `None` for integer
/// division or remainder by zero, which are left to the runtime.
pub fn eval(op: Op, left: Literal, right: Literal) -> Option<Literal> {
    use Literal::{Int, Real};

    let truth = |value: bool| Some(Int(value as i64));

    match op {
        Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Mod => match (left, right) {
            (Int(l), Int(r)) => match op {
                Op::Add => Some(Int(l.wrapping_add(r))),
                Op::Sub => Some(Int(l.wrapping_sub(r))),
                Op::Mul => Some(Int(l.wrapping_mul(r))),
                Op::Div if r == 0 => None,
                Op::Div => Some(Int(l.wrapping_div(r))),
                Op::Mod if r == 0 => None,
                _ => Some(Int(l.wrapping_rem(r))),
            },
            (l, r) => {
                let (l, r) = (l.to_f64(), r.to_f64());
                match op {
                    Op::Add => Some(Real(l + r)),
                    Op::Sub => Some(Real(l - r)),
                    Op::Mul => Some(Real(l * r)),
                    Op::Div => Some(Real(l / r)),
                    // No remainder is defined over reals.
                    _ => Some(Real(0.0)),
                }
            }
        },
        Op::Lt | Op::Gt | Op::Eq | Op::Neq | Op::Le | Op::Ge => {
            let ordering = match (left, right) {
                (Int(l), Int(r)) => Some(l.cmp(&r)),
                (l, r) => l.to_f64().partial_cmp(&r.to_f64()),
            };
            match (op, ordering) {
                (Op::Neq, None) => truth(true),
                (_, None) => truth(false),
                (Op::Lt, Some(ordering)) => truth(ordering.is_lt()),
                (Op::Gt, Some(ordering)) => truth(ordering.is_gt()),
                (Op::Eq, Some(ordering)) => truth(ordering.is_eq()),
                (Op::Neq, Some(ordering)) => truth(ordering.is_ne()),
                (Op::Le, Some(ordering)) => truth(ordering.is_le()),
                (_, Some(ordering)) => truth(ordering.is_ge()),
            }
        }
        Op::And => truth(left.is_truthy() && right.is_truthy()),
        Op::Or => truth(left.is_truthy() || right.is_truthy()),
        Op::Not => truth(!right.is_truthy()),
    }
}

/// Rebuild an expression under the current bindings, folding whatever has
/// become constant.
pub fn rebuild(symbols: &SymbolTable, expr: &Expr) -> Expr {
    match expr {
        Expr::Lit(literal) => Expr::Lit(*literal),
        Expr::Name(sym) => name(symbols, *sym),
        Expr::Object(sym, indices) => object(symbols, *sym, rebuild_all(symbols, indices)),
        Expr::Call(sym, args) => Expr::Call(*sym, rebuild_args(symbols, args)),
        Expr::Unary(op, operand) => fold(symbols, *op, None, Some(rebuild(symbols, operand))),
        Expr::Binary(op, left, right) => fold(
            symbols,
            *op,
            Some(rebuild(symbols, left)),
            Some(rebuild(symbols, right)),
        ),
    }
}

pub fn rebuild_all(symbols: &SymbolTable, exprs: &[Expr]) -> Vec<Expr> {
    exprs.iter().map(|expr| rebuild(symbols, expr)).collect()
}

/// Rebuild the indices of a target, keeping the target itself.
pub fn rebuild_target(symbols: &SymbolTable, target: &ObjectRef) -> ObjectRef {
    ObjectRef {
        name: target.name,
        indices: rebuild_all(symbols, &target.indices),
    }
}

pub fn rebuild_args(symbols: &SymbolTable, args: &Args) -> Args {
    Args {
        exprs: rebuild_all(symbols, &args.exprs),
        iterations: rebuild_iterations(symbols, &args.iterations),
    }
}

pub fn rebuild_iterations(symbols: &SymbolTable, iterations: &[Iteration]) -> Vec<Iteration> {
    (iterations.iter())
        .map(|iteration| match iteration {
            Iteration::Range { var, low, high } => Iteration::Range {
                var: *var,
                low: rebuild(symbols, low),
                high: rebuild(symbols, high),
            },
            Iteration::Set { var, region } => Iteration::Set {
                var: *var,
                region: rebuild(symbols, region),
            },
        })
        .collect()
}
