//! The rule language after parsing.
//!
//! Expressions are folded as they are constructed (see [`fold`]), so a node is
//! only left as an operator if one of its operands could not be resolved to a
//! literal at the time. The [unroller][unroll] flattens a [`Program`] into a
//! single ground [`Definition`].

use std::fmt;

use crate::source::Span;
use crate::symbol::Symbol;

pub mod fold;
pub mod pretty;
pub mod symbols;
pub mod unroll;

/// Numeric literals.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Real(f64),
}

impl Literal {
    pub fn to_f64(self) -> f64 {
        match self {
            Literal::Int(value) => value as f64,
            Literal::Real(value) => value,
        }
    }

    pub fn is_truthy(self) -> bool {
        match self {
            Literal::Int(value) => value != 0,
            Literal::Real(value) => value != 0.0,
        }
    }

    /// The literal as an integer, if it is an integer or a real with an
    /// integral value.
    pub fn to_integer(self) -> Option<i64> {
        match self {
            Literal::Int(value) => Some(value),
            Literal::Real(value)
                if value.fract() == 0.0 && value >= i64::MIN as f64 && value <= i64::MAX as f64 =>
            {
                Some(value as i64)
            }
            Literal::Real(_) => None,
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Int(value) => write!(f, "{value}"),
            Literal::Real(value) => write!(f, "{value:?}"),
        }
    }
}

/// Unary and binary operators.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Op {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Lt,
    Gt,
    Eq,
    Neq,
    Le,
    Ge,
    And,
    Or,
    Not,
}

impl Op {
    pub fn symbol(self) -> &'static str {
        match self {
            Op::Add => "+",
            Op::Sub => "-",
            Op::Mul => "*",
            Op::Div => "/",
            Op::Mod => "%",
            Op::Lt => "<",
            Op::Gt => ">",
            Op::Eq => "==",
            Op::Neq => "!=",
            Op::Le => "<=",
            Op::Ge => ">=",
            Op::And => "&&",
            Op::Or => "||",
            Op::Not => "!",
        }
    }

    /// Binding strength when used as a binary operator. Higher binds tighter.
    pub fn precedence(self) -> u8 {
        match self {
            Op::Or => 1,
            Op::And => 2,
            Op::Eq | Op::Neq => 3,
            Op::Lt | Op::Gt | Op::Le | Op::Ge => 4,
            Op::Add | Op::Sub => 5,
            Op::Mul | Op::Div | Op::Mod => 6,
            Op::Not => UNARY_PRECEDENCE,
        }
    }
}

pub const UNARY_PRECEDENCE: u8 = 7;

/// Expressions.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Lit(Literal),
    /// An identifier that was not bound when the expression was built.
    Name(Symbol),
    /// An indexed object reference, `X{1, i}`.
    Object(Symbol, Vec<Expr>),
    /// A function call, `min(X{h} : h in 2)`.
    Call(Symbol, Args),
    Unary(Op, Box<Expr>),
    Binary(Op, Box<Expr>, Box<Expr>),
}

impl Expr {
    pub fn int(value: i64) -> Expr {
        Expr::Lit(Literal::Int(value))
    }

    pub fn real(value: f64) -> Expr {
        Expr::Lit(Literal::Real(value))
    }

    pub fn as_literal(&self) -> Option<Literal> {
        match self {
            Expr::Lit(literal) => Some(*literal),
            _ => None,
        }
    }
}

/// Function call arguments, optionally annotated with iterators.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Args {
    pub exprs: Vec<Expr>,
    pub iterations: Vec<Iteration>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Iteration {
    /// `low <= var <= high`, expanded by the unroller.
    Range { var: Symbol, low: Expr, high: Expr },
    /// `var in region`, expanded at runtime over the members of a region.
    Set { var: Symbol, region: Expr },
}

impl Iteration {
    pub fn var(&self) -> Symbol {
        match self {
            Iteration::Range { var, .. } | Iteration::Set { var, .. } => *var,
        }
    }
}

/// The target of a rule or assignment. Targets are never replaced by bound
/// values, only their indices are folded.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectRef {
    pub name: Symbol,
    pub indices: Vec<Expr>,
}

impl ObjectRef {
    pub fn arity(&self) -> usize {
        self.indices.len()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Guards {
    /// Either an integer literal or a protein object, `P{3}`.
    pub protein: Option<Expr>,
    /// The rule is a no-op when this evaluates to zero.
    pub enzyme: Option<Expr>,
}

/// Membrane hierarchy nodes.
#[derive(Debug, Clone, PartialEq)]
pub struct Membrane {
    pub label: Expr,
    pub children: Vec<Membrane>,
}

#[derive(Debug, Clone)]
pub struct Instruction {
    pub span: Span,
    pub kind: InstructionKind,
    /// Applied outermost first.
    pub iterations: Vec<Iteration>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InstructionKind {
    /// `X{..} = e`: binds `X` in the symbol table, never emitted.
    Assign { target: ObjectRef, value: Expr },
    /// `@X{..} = e`
    InitVariable { target: ObjectRef, value: Expr },
    /// `@mu = [..]'1`
    Membranes(Membrane),
    /// `@ms(region) = a * 2, b`
    Multiset {
        region: Expr,
        objects: Vec<(ObjectRef, Expr)>,
    },
    /// `call f(..)`
    Call { name: Symbol, args: Args },
    /// `X{..} <- e`
    Production {
        target: ObjectRef,
        value: Expr,
        guards: Guards,
    },
    /// `[[]'child]'parent`
    Creation {
        child: Expr,
        parent: Expr,
        guards: Guards,
    },
    /// `[P{a} -> P{b}]'label`
    Evolution {
        from: ObjectRef,
        to: ObjectRef,
        label: Expr,
        guards: Guards,
    },
}

#[derive(Debug, Clone)]
pub struct Definition {
    pub span: Span,
    pub name: Symbol,
    /// Parameter names are never substituted.
    pub params: Vec<Symbol>,
    pub instructions: Vec<Instruction>,
}

#[derive(Debug, Clone)]
pub struct Program {
    pub model: Symbol,
    pub definitions: Vec<Definition>,
}

impl Program {
    pub fn definition(&self, name: Symbol) -> Option<&Definition> {
        self.definitions.iter().find(|def| def.name == name)
    }
}

/// Compile-time capacities.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Limits {
    pub definitions: usize,
    pub params: usize,
    /// Per definition while parsing, and in total after unrolling.
    pub instructions: usize,
    pub arguments: usize,
    pub iterations: usize,
    /// Children per membrane node.
    pub membranes: usize,
    /// Nesting of macro calls.
    pub depth: usize,
}

impl Default for Limits {
    fn default() -> Limits {
        Limits {
            definitions: 64,
            params: 64,
            instructions: 2048,
            arguments: 64,
            iterations: 8,
            membranes: 64,
            depth: 64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integral_reals_are_integers() {
        assert_eq!(Literal::Real(3.0).to_integer(), Some(3));
        assert_eq!(Literal::Real(3.5).to_integer(), None);
        assert_eq!(Literal::Int(-2).to_integer(), Some(-2));
        assert_eq!(Literal::Real(f64::NAN).to_integer(), None);
    }

    #[test]
    fn literals_display() {
        assert_eq!(Literal::Int(5).to_string(), "5");
        assert_eq!(Literal::Real(5.0).to_string(), "5.0");
        assert_eq!(Literal::Real(0.25).to_string(), "0.25");
    }

    #[test]
    fn operator_precedence() {
        assert!(Op::Or.precedence() < Op::And.precedence());
        assert!(Op::Lt.precedence() < Op::Add.precedence());
        assert!(Op::Add.precedence() < Op::Mul.precedence());
        assert!(Op::Mul.precedence() < UNARY_PRECEDENCE);
    }
}
