//! The lowered simulation program.
//!
//! Storage is fully laid out: variables and regions are referred to by the
//! ids of a [`Layout`], and every rule is one [`Unit`] that can be scheduled
//! independently of the others within a step.

use renpsm_runtime::state::{Layout, RegionId, VarId};

use crate::core::Op;
use crate::source::Span;
use crate::symbol::Symbol;

pub mod machine;

pub struct Program {
    pub model: Symbol,
    pub layout: Layout,
    /// Initialisation, in program order.
    pub init: Vec<Init>,
    pub units: Vec<Unit>,
    /// The region of the outermost declared membrane.
    pub root: Option<RegionId>,
    /// Coordinates of each membrane, used to draw the explored tree.
    pub position: Option<VarId>,
}

pub enum Init {
    /// Declare a membrane of the initial hierarchy.
    Membrane {
        slot: usize,
        parent: usize,
        regions: u32,
    },
    /// Store a value, once or for every member of `each`.
    Store {
        target: Cell,
        value: Expr,
        each: Option<RegionId>,
    },
}

/// One ground rule.
pub struct Unit {
    pub id: usize,
    pub origin: Span,
    /// The ground instruction the unit was lowered from.
    pub text: String,
    pub protein: Option<i64>,
    pub enzyme: Option<Expr>,
    /// Run the body once for every member of this region, binding the member
    /// at level `0`.
    pub each: Option<RegionId>,
    pub body: Body,
}

pub enum Body {
    Produce { target: Cell, value: Expr },
    Transition { from: i64, to: i64 },
    Create { child: Expr, parent: Expr },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    pub var: VarId,
    pub indices: Vec<Index>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Index {
    Const(usize),
    /// The member bound at a level, see [`Expr::Member`].
    Member(usize),
    Dynamic(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Const(f64),
    /// A membrane slot bound by a region iteration. Level `0` is the
    /// outermost iteration: the unit's own, or else the outermost reduction.
    Member(usize),
    Load(Cell),
    Unary(Op, Box<Expr>),
    Binary(Op, Box<Expr>, Box<Expr>),
    Call(Intrinsic, Vec<Expr>),
    /// Reduce the body over the members of a region, binding each member at
    /// the next level.
    Reduce(Reduction, RegionId, Box<Expr>),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Intrinsic {
    Round,
    Random,
    EuclideanDistance,
    If,
    Rm,
    Qt,
    Collision,
}

impl Intrinsic {
    pub fn from_name(name: &str) -> Option<Intrinsic> {
        match name {
            "round" => Some(Intrinsic::Round),
            "random" => Some(Intrinsic::Random),
            "euclideanDistance" => Some(Intrinsic::EuclideanDistance),
            "if" => Some(Intrinsic::If),
            "rm" => Some(Intrinsic::Rm),
            "qt" => Some(Intrinsic::Qt),
            "collision" => Some(Intrinsic::Collision),
            _ => None,
        }
    }

    pub fn arity(self) -> usize {
        match self {
            Intrinsic::Round => 1,
            Intrinsic::Random | Intrinsic::Rm | Intrinsic::Qt => 2,
            Intrinsic::If => 3,
            Intrinsic::EuclideanDistance => 4,
            Intrinsic::Collision => 5,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Reduction {
    Min,
    ArgMin,
}

impl Reduction {
    pub fn from_name(name: &str) -> Option<Reduction> {
        match name {
            "min" => Some(Reduction::Min),
            "arg_min" => Some(Reduction::ArgMin),
            _ => None,
        }
    }
}
