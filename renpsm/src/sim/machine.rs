//! An in-process executor for simulation programs.
//!
//! Runs a lowered program on the same storage and step loop as the generated
//! simulators, evaluating the lowered expressions directly.

use std::io;

use rayon::prelude::*;
use renpsm_runtime::intrinsics::{self, from_bool, truthy};
use renpsm_runtime::rng::{Rng, INIT_STEP, NO_MEMBER};
use renpsm_runtime::state::{index_of, undefined, State};
use renpsm_runtime::step::{run_steps, StepSettings};
use tracing::{debug, instrument};

use crate::core::Op;
use crate::sim::{Body, Cell, Expr, Index, Init, Intrinsic, Program, Reduction, Unit};

pub struct Machine<'program> {
    program: &'program Program,
    state: State,
}

impl<'program> Machine<'program> {
    /// `state` must have been allocated from the layout of `program`.
    pub fn new(program: &'program Program, state: State) -> Machine<'program> {
        Machine { program, state }
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn into_state(self) -> State {
        self.state
    }

    /// Declare the initial membranes and store the initial values, in program
    /// order.
    #[instrument(skip_all)]
    pub fn initialise(&self) {
        for (index, init) in self.program.init.iter().enumerate() {
            match init {
                Init::Membrane {
                    slot,
                    parent,
                    regions,
                } => {
                    self.state.declare_membrane(*slot, *parent, *regions);
                }
                Init::Store {
                    target,
                    value,
                    each: None,
                } => {
                    let mut rng = self.state.rng(INIT_STEP, index, NO_MEMBER);
                    store(&self.state, target, value, &mut Vec::new(), &mut rng);
                }
                Init::Store {
                    target,
                    value,
                    each: Some(region),
                } => {
                    for member in self.state.members(*region) {
                        let mut rng = self.state.rng(INIT_STEP, index, member);
                        store(&self.state, target, value, &mut vec![member], &mut rng);
                    }
                }
            }
        }
        debug!(inits = self.program.init.len(), "initialised state");
    }

    /// Run every unit once, in parallel.
    pub fn step(&self, step: u64) {
        (self.program.units.par_iter()).for_each(|unit| self.unit(unit, step));
    }

    /// Run steps until the program halts or the ceiling is reached.
    pub fn run(&self, settings: &StepSettings) -> io::Result<u64> {
        run_steps(&self.state, settings, |_, step| self.step(step))
    }

    fn unit(&self, unit: &Unit, step: u64) {
        let state = &self.state;
        if unit.protein.map_or(false, |protein| state.protein() != protein) {
            return;
        }

        match unit.each {
            None => {
                let mut rng = state.rng(step, unit.id, NO_MEMBER);
                apply(state, unit, &mut Vec::new(), &mut rng);
            }
            Some(region) => {
                state.members(region).into_par_iter().for_each(|member| {
                    let mut rng = state.rng(step, unit.id, member);
                    apply(state, unit, &mut vec![member], &mut rng);
                });
            }
        }
    }
}

fn apply(state: &State, unit: &Unit, members: &mut Vec<usize>, rng: &mut Rng) {
    if let Some(enzyme) = &unit.enzyme {
        if !truthy(eval(state, enzyme, members, rng)) {
            return;
        }
    }

    match &unit.body {
        Body::Produce { target, value } => store(state, target, value, members, rng),
        Body::Transition { from, to } => {
            if state.protein() == *from {
                state.stage_protein(*to);
            }
        }
        Body::Create { child, parent } => {
            let child = index_of(eval(state, child, members, rng));
            let parent = index_of(eval(state, parent, members, rng));
            state.create_membrane(child, parent);
        }
    }
}

fn store(state: &State, target: &Cell, value: &Expr, members: &mut Vec<usize>, rng: &mut Rng) {
    let value = eval(state, value, members, rng);
    let indices = indices(state, target, members, rng);
    state.store(target.var, &indices, value);
}

fn indices(state: &State, cell: &Cell, members: &mut Vec<usize>, rng: &mut Rng) -> Vec<usize> {
    (cell.indices.iter())
        .map(|index| match index {
            Index::Const(index) => *index,
            Index::Member(level) => members.get(*level).copied().unwrap_or(usize::MAX),
            Index::Dynamic(expr) => index_of(eval(state, expr, members, rng)),
        })
        .collect()
}

/// Evaluate an expression with `members` bound at levels `0..`.
pub fn eval(state: &State, expr: &Expr, members: &mut Vec<usize>, rng: &mut Rng) -> f64 {
    match expr {
        Expr::Const(value) => *value,
        Expr::Member(level) => members.get(*level).map_or_else(undefined, |m| *m as f64),
        Expr::Load(cell) => {
            let indices = indices(state, cell, members, rng);
            state.load(cell.var, &indices)
        }
        Expr::Unary(op, operand) => {
            let operand = eval(state, operand, members, rng);
            apply_op(*op, 0.0, operand)
        }
        Expr::Binary(op, left, right) => {
            let left = eval(state, left, members, rng);
            let right = eval(state, right, members, rng);
            apply_op(*op, left, right)
        }
        Expr::Call(intrinsic, args) => {
            let args = (args.iter())
                .map(|arg| eval(state, arg, members, rng))
                .collect::<Vec<_>>();
            call(state, *intrinsic, &args, rng)
        }
        Expr::Reduce(reduction, region, body) => {
            let key = rng.next_u64();
            let base = rng.fork(key);
            let outer = members.as_slice();
            let value = |member: usize| {
                let mut members = outer.to_vec();
                members.push(member);
                let mut rng = base.fork(member as u64);
                eval(state, body, &mut members, &mut rng)
            };
            match reduction {
                Reduction::Min => intrinsics::min_over(state, *region, value),
                Reduction::ArgMin => intrinsics::arg_min_over(state, *region, value),
            }
        }
    }
}

/// Operators at runtime work on reals. The remainder rounds its operands,
/// like `rm`.
pub fn apply_op(op: Op, left: f64, right: f64) -> f64 {
    match op {
        Op::Add => left + right,
        Op::Sub => left - right,
        Op::Mul => left * right,
        Op::Div => left / right,
        Op::Mod => intrinsics::rm(left, right),
        Op::Lt => from_bool(left < right),
        Op::Gt => from_bool(left > right),
        Op::Eq => from_bool(left == right),
        Op::Neq => from_bool(left != right),
        Op::Le => from_bool(left <= right),
        Op::Ge => from_bool(left >= right),
        Op::And => from_bool(truthy(left) && truthy(right)),
        Op::Or => from_bool(truthy(left) || truthy(right)),
        Op::Not => from_bool(!truthy(right)),
    }
}

fn call(state: &State, intrinsic: Intrinsic, args: &[f64], rng: &mut Rng) -> f64 {
    match (intrinsic, args) {
        (Intrinsic::Round, [x]) => intrinsics::round(*x),
        (Intrinsic::Random, [a, b]) => intrinsics::random(rng, *a, *b),
        (Intrinsic::EuclideanDistance, [x0, y0, x1, y1]) => {
            intrinsics::euclidean_distance(*x0, *y0, *x1, *y1)
        }
        (Intrinsic::If, [condition, yes, no]) => intrinsics::select(*condition, *yes, *no),
        (Intrinsic::Rm, [a, b]) => intrinsics::rm(*a, *b),
        (Intrinsic::Qt, [a, b]) => intrinsics::qt(*a, *b),
        (Intrinsic::Collision, [x, y, ux, uy, delta]) => {
            intrinsics::collision(state, *x, *y, *ux, *uy, *delta)
        }
        _ => undefined(),
    }
}

#[cfg(test)]
mod tests {
    use renpsm_runtime::state::RegionId;

    use super::*;
    use crate::core::symbols::SymbolTable;
    use crate::core::unroll::unroll;
    use crate::core::Limits;
    use crate::files::FileId;
    use crate::surface::parse_program;
    use crate::symbol::Symbol;

    const CAPACITY: usize = 64;

    fn compile(source: &str) -> Program {
        let file_id = FileId::try_from(1).unwrap();
        let limits = Limits::default();
        let mut symbols = SymbolTable::new();
        let program = parse_program(file_id, source, &mut symbols, &limits).unwrap();
        let ground = unroll(&program, Symbol::intern("main"), &mut symbols, &limits).unwrap();
        crate::lower::lower(program.model, &ground, CAPACITY).unwrap()
    }

    fn machine(program: &Program) -> Machine<'_> {
        let state = State::new(program.layout.clone()).unwrap().with_seed(7);
        let machine = Machine::new(program, state);
        machine.initialise();
        machine
    }

    fn settings(max_steps: u64) -> StepSettings {
        StepSettings {
            max_steps,
            debug: false,
        }
    }

    #[test]
    fn one_step_of_a_ranged_production() {
        let program = compile(
            "@model<m>
            def main() {
                X{1} = 5;
                Y{i} <- X{1} + 1 : 1 <= i <= 2;
            }",
        );
        assert_eq!(program.units.len(), 2);

        let y = program.layout.variable("Y", 1).unwrap();
        assert!(program.layout.shape(y).dims[0] >= 3);

        let machine = machine(&program);
        machine.step(0);
        let state = machine.state();
        assert_eq!(state.load(y, &[1]), 6.0);
        assert_eq!(state.load(y, &[2]), 6.0);
        assert!(state.load(y, &[0]).is_nan());
    }

    #[test]
    fn unresolved_indices_read_and_write_nothing() {
        let program = compile(
            "@model<m>
            def main() {
                Y{k} <- 1;
                X{0} <- Y{k} + 1;
            }",
        );
        let machine = machine(&program);
        machine.step(0);

        let y = program.layout.variable("Y", 1).unwrap();
        let x = program.layout.variable("X", 1).unwrap();
        assert!((0..CAPACITY).all(|slot| machine.state().load(y, &[slot]).is_nan()));
        assert!(machine.state().load(x, &[0]).is_nan());
    }

    #[test]
    fn initial_membranes_join_their_regions() {
        let program = compile(
            "@model<m>
            def main() {
                @mu = [[]'2 []'3]'1;
            }",
        );
        let machine = machine(&program);
        let state = machine.state();
        let region = |label| program.layout.region(label).unwrap();

        assert_eq!(program.root, Some(RegionId(0)));
        assert_eq!(state.members(region(1)), [2, 3]);
        assert_eq!(state.members(region(2)), [2]);
        assert_eq!(state.members(region(3)), [3]);
        assert_eq!(state.parent(2), 1);
        assert!(state.in_region(3, region(1)));
        assert!(!state.in_region(3, region(2)));
    }

    #[test]
    fn rules_over_regions_and_reductions() {
        let program = compile(
            "@model<m>
            def main() {
                @mu = [[]'2 []'3]'1;
                @D{2} = 4;
                @D{3} = 1.5;
                M{0} <- min(D{g} : g in 1);
                A{0} <- arg_min(D{g} : g in 1);
                E{h} <- D{h} * 2 : h in 1;
            }",
        );
        let machine = machine(&program);
        machine.step(0);
        let state = machine.state();
        let var = |name| program.layout.variable(name, 1).unwrap();

        assert_eq!(state.load(var("M"), &[0]), 1.5);
        assert_eq!(state.load(var("A"), &[0]), 3.0);
        assert_eq!(state.load(var("E"), &[2]), 8.0);
        assert_eq!(state.load(var("E"), &[3]), 3.0);
        assert_eq!(program.layout.shape(var("E")).dims, [CAPACITY]);
    }

    #[test]
    fn guards_and_protein_transitions() {
        let program = compile(
            "@model<m>
            def main() {
                [P{1} -> P{2}]'1;
                C{0} <- 1, P{1};
                C{1} <- 1, P{2};
                C{2} <- 1 ? 0;
                Halt{0} <- 1, P{2};
            }",
        );
        let machine = machine(&program);
        let steps = machine.run(&settings(10)).unwrap();
        let state = machine.state();
        let c = program.layout.variable("C", 1).unwrap();

        assert_eq!(steps, 2);
        assert_eq!(state.protein(), 2);
        assert_eq!(state.load(c, &[0]), 1.0);
        assert_eq!(state.load(c, &[1]), 1.0);
        assert!(state.load(c, &[2]).is_nan());
    }

    #[test]
    fn creation_inherits_regions() {
        let program = compile(
            "@model<m>
            def main() {
                @mu = [[]'2]'1;
                [[]'k]'2 : 10 <= k <= 11;
            }",
        );
        let machine = machine(&program);
        machine.step(0);
        let state = machine.state();
        let region = |label| program.layout.region(label).unwrap();

        let mut members = state.members(region(2));
        members.sort_unstable();
        assert_eq!(members, [2, 10, 11]);
        assert_eq!(state.parent(10), 2);
        assert!(state.in_region(11, region(1)));
    }

    #[test]
    fn runtime_operators() {
        assert_eq!(apply_op(Op::Div, 7.0, 2.0), 3.5);
        assert_eq!(apply_op(Op::Mod, 7.0, 2.0), 1.0);
        assert_eq!(apply_op(Op::Lt, f64::NAN, 1.0), 0.0);
        assert_eq!(apply_op(Op::Not, 0.0, 0.0), 1.0);
        assert_eq!(apply_op(Op::Sub, 0.0, 3.0), -3.0);
    }
}
