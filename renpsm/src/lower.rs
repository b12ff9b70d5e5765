//! Lowering of ground programs to simulation programs.
//!
//! The storage layout is computed first, by scanning every ground
//! instruction:
//!
//! - region labels come from the `@mu` hierarchies, in declaration order,
//! - a variable exists for every `(name, arity)` written by a production rule,
//!   an initial variable assignment or a multiset entry,
//! - each dimension of a variable is one more than the largest constant index
//!   used for it anywhere, or the membrane capacity if it is ever indexed by a
//!   membrane or by a value only known at runtime.
//!
//! Every rule then becomes one [`Unit`], and every initialisation an [`Init`].

use renpsm_runtime::state::{undefined, Layout, RegionId, MAX_REGIONS};
use tracing::{debug, instrument};

use crate::core::pretty;
use crate::core::{
    Definition, Expr, Guards, Instruction, InstructionKind, Iteration, Membrane, ObjectRef,
};
use crate::reporting::{LowerMessage, Message};
use crate::sim::{self, Body, Cell, Index, Init, Intrinsic, Reduction, Unit};
use crate::source::Span;
use crate::symbol::Symbol;

pub use renpsm_runtime::state::DEFAULT_CAPACITY;

/// Rows 1 and 2 hold the coordinates of every membrane.
pub const POSITION_VARIABLE: (&str, usize) = ("Y", 2);

const TEXT_WIDTH: usize = 100;

#[instrument(skip_all, fields(capacity = capacity))]
pub fn lower(model: Symbol, ground: &Definition, capacity: usize) -> Result<sim::Program, Message> {
    let layout = layout(ground, capacity)?;

    let mut context = Context {
        layout: &layout,
        printer: pretty::Context::new(),
        scope: Vec::new(),
        span: Span::Empty,
    };
    let mut init = Vec::new();
    let mut units = Vec::new();
    for instruction in &ground.instructions {
        context.span = instruction.span;
        context.scope.clear();
        context.instruction(instruction, &mut init, &mut units)?;
    }

    let root = (ground.instructions.iter())
        .find_map(|instruction| match &instruction.kind {
            InstructionKind::Membranes(membrane) => Some(&membrane.label),
            _ => None,
        })
        .and_then(|label| label.as_literal())
        .and_then(|label| label.to_integer())
        .and_then(|label| layout.region(label));
    let (position_name, position_arity) = POSITION_VARIABLE;
    let position = layout.variable(position_name, position_arity);

    debug!(
        regions = layout.regions().len(),
        variables = layout.variables().len(),
        units = units.len(),
        "lowered program"
    );

    Ok(sim::Program {
        model,
        layout,
        init,
        units,
        root,
        position,
    })
}

/// Compute the storage layout of a ground program. Computing the layout is
/// idempotent: every dimension only ever grows to a fixed point.
pub fn layout(ground: &Definition, capacity: usize) -> Result<Layout, Message> {
    let mut layout = Layout::new(capacity);

    for instruction in &ground.instructions {
        if let InstructionKind::Membranes(membrane) = &instruction.kind {
            declare_regions(&mut layout, instruction.span, membrane)?;
        }
    }

    for instruction in &ground.instructions {
        for target in targets(&instruction.kind) {
            layout.add_variable(target.name.resolve(), vec![1; target.arity()]);
        }
    }

    let mut sizer = Sizer {
        layout: &mut layout,
        scope: Vec::new(),
    };
    for instruction in &ground.instructions {
        sizer.instruction(instruction);
    }

    layout.validate().map_err(|error| LowerMessage::InvalidLayout {
        message: error.to_string(),
    })?;
    Ok(layout)
}

fn targets(kind: &InstructionKind) -> Vec<&ObjectRef> {
    match kind {
        InstructionKind::Production { target, .. }
        | InstructionKind::InitVariable { target, .. } => vec![target],
        InstructionKind::Multiset { objects, .. } => {
            objects.iter().map(|(object, _)| object).collect()
        }
        _ => Vec::new(),
    }
}

fn declare_regions(layout: &mut Layout, span: Span, membrane: &Membrane) -> Result<(), Message> {
    let label = label(span, &membrane.label, layout.capacity())?;
    layout.add_region(label as i64);
    if layout.regions().len() > MAX_REGIONS {
        return Err(LowerMessage::TooManyRegions {
            span,
            max: MAX_REGIONS,
        }
        .into());
    }

    (membrane.children.iter()).try_for_each(|child| declare_regions(layout, span, child))
}

/// A membrane label, which doubles as the slot of the membrane.
fn label(span: Span, expr: &Expr, capacity: usize) -> Result<usize, Message> {
    let label = (expr.as_literal())
        .and_then(|literal| literal.to_integer())
        .filter(|label| *label >= 0)
        .ok_or(LowerMessage::InvalidLabel { span })?;

    match usize::try_from(label) {
        Ok(slot) if slot < capacity => Ok(slot),
        _ => Err(LowerMessage::LabelOutOfRange {
            span,
            label,
            capacity,
        }
        .into()),
    }
}

/// Widens variables to fit every constant index used with them.
struct Sizer<'a> {
    layout: &'a mut Layout,
    /// Placeholders of the region iterations in scope.
    scope: Vec<Symbol>,
}

impl<'a> Sizer<'a> {
    fn instruction(&mut self, instruction: &Instruction) {
        self.scope.clear();
        self.scope.extend(set_vars(&instruction.iterations));

        match &instruction.kind {
            InstructionKind::InitVariable { target, value } => {
                self.object(target.name, &target.indices);
                self.expr(value);
            }
            InstructionKind::Multiset { objects, .. } => {
                for (object, multiplicity) in objects {
                    self.object(object.name, &object.indices);
                    self.expr(multiplicity);
                }
            }
            InstructionKind::Production {
                target,
                value,
                guards,
            } => {
                self.object(target.name, &target.indices);
                self.expr(value);
                self.guards(guards);
            }
            InstructionKind::Creation {
                child,
                parent,
                guards,
            } => {
                self.expr(child);
                self.expr(parent);
                self.guards(guards);
            }
            InstructionKind::Evolution { guards, .. } => self.guards(guards),
            InstructionKind::Assign { .. }
            | InstructionKind::Membranes(_)
            | InstructionKind::Call { .. } => {}
        }
    }

    fn guards(&mut self, guards: &Guards) {
        if let Some(enzyme) = &guards.enzyme {
            self.expr(enzyme);
        }
    }

    fn object(&mut self, name: Symbol, indices: &[Expr]) {
        indices.iter().for_each(|index| self.expr(index));

        let name = name.resolve();
        if self.layout.variable(name, indices.len()).is_none() {
            return;
        }
        let dims = indices.iter().map(|index| self.extent(index)).collect();
        self.layout.add_variable(name, dims);
    }

    fn extent(&self, index: &Expr) -> usize {
        match index {
            Expr::Lit(literal) => {
                let index = literal.to_f64().round();
                if index >= 0.0 {
                    (index as usize).saturating_add(1)
                } else {
                    1
                }
            }
            Expr::Name(name) if self.scope.contains(name) => self.layout.capacity(),
            index => {
                debug!(?index, "sizing a runtime index by the membrane capacity");
                self.layout.capacity()
            }
        }
    }

    fn expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Lit(_) | Expr::Name(_) => {}
            Expr::Object(name, indices) => self.object(*name, indices),
            Expr::Call(_, args) => {
                let depth = self.scope.len();
                self.scope.extend(set_vars(&args.iterations));
                args.exprs.iter().for_each(|expr| self.expr(expr));
                self.scope.truncate(depth);
            }
            Expr::Unary(_, operand) => self.expr(operand),
            Expr::Binary(_, left, right) => {
                self.expr(left);
                self.expr(right);
            }
        }
    }
}

fn set_vars(iterations: &[Iteration]) -> impl Iterator<Item = Symbol> + '_ {
    iterations.iter().filter_map(|iteration| match iteration {
        Iteration::Set { var, .. } => Some(*var),
        Iteration::Range { .. } => None,
    })
}

struct Context<'a> {
    layout: &'a Layout,
    printer: pretty::Context,
    /// Placeholders bound by region iterations, outermost first.
    scope: Vec<Symbol>,
    span: Span,
}

impl<'a> Context<'a> {
    fn instruction(
        &mut self,
        instruction: &Instruction,
        init: &mut Vec<Init>,
        units: &mut Vec<Unit>,
    ) -> Result<(), Message> {
        match &instruction.kind {
            InstructionKind::Assign { .. } | InstructionKind::Call { .. } => Ok(()),
            InstructionKind::Membranes(membrane) => self.membranes(membrane, None, init),
            InstructionKind::InitVariable { target, value } => {
                let each = self.each(&instruction.iterations)?;
                init.push(Init::Store {
                    target: self.cell(target.name, &target.indices)?,
                    value: self.expr(value)?,
                    each,
                });
                Ok(())
            }
            InstructionKind::Multiset { objects, .. } => {
                let each = self.each(&instruction.iterations)?;
                for (object, multiplicity) in objects {
                    init.push(Init::Store {
                        target: self.cell(object.name, &object.indices)?,
                        value: self.expr(multiplicity)?,
                        each,
                    });
                }
                Ok(())
            }
            InstructionKind::Production {
                target,
                value,
                guards,
            } => {
                let each = self.each(&instruction.iterations)?;
                let body = Body::Produce {
                    target: self.cell(target.name, &target.indices)?,
                    value: self.expr(value)?,
                };
                self.unit(instruction, guards, each, body, units)
            }
            InstructionKind::Creation {
                child,
                parent,
                guards,
            } => {
                let each = self.each(&instruction.iterations)?;
                let body = Body::Create {
                    child: self.expr(child)?,
                    parent: self.expr(parent)?,
                };
                self.unit(instruction, guards, each, body, units)
            }
            InstructionKind::Evolution {
                from,
                to,
                label: region,
                guards,
            } => {
                label(self.span, region, self.layout.capacity())?;
                let each = self.each(&instruction.iterations)?;
                let body = Body::Transition {
                    from: self.protein_state(&Expr::Object(from.name, from.indices.clone()))?,
                    to: self.protein_state(&Expr::Object(to.name, to.indices.clone()))?,
                };
                self.unit(instruction, guards, each, body, units)
            }
        }
    }

    fn unit(
        &mut self,
        instruction: &Instruction,
        guards: &Guards,
        each: Option<RegionId>,
        body: Body,
        units: &mut Vec<Unit>,
    ) -> Result<(), Message> {
        let protein = match &guards.protein {
            Some(protein) => Some(self.protein_state(protein)?),
            None => None,
        };
        let enzyme = match &guards.enzyme {
            Some(enzyme) => Some(self.expr(enzyme)?),
            None => None,
        };
        let text = (self.printer.instruction(instruction))
            .pretty(TEXT_WIDTH)
            .to_string();

        units.push(Unit {
            id: units.len(),
            origin: instruction.span,
            text,
            protein,
            enzyme,
            each,
            body,
        });
        Ok(())
    }

    /// Declare the initial hierarchy. A child `c` of `p` lives in every
    /// region of `p` and in its own; the outermost membrane is not registered
    /// anywhere.
    fn membranes(
        &self,
        membrane: &Membrane,
        parent: Option<(usize, u32)>,
        init: &mut Vec<Init>,
    ) -> Result<(), Message> {
        let slot = label(self.span, &membrane.label, self.layout.capacity())?;
        let bit = self.layout.region(slot as i64).map_or(0, RegionId::bit);
        let regions = match parent {
            None => bit,
            Some((parent, parent_regions)) => {
                let regions = parent_regions | bit;
                init.push(Init::Membrane {
                    slot,
                    parent,
                    regions,
                });
                regions
            }
        };

        (membrane.children.iter())
            .try_for_each(|child| self.membranes(child, Some((slot, regions)), init))
    }

    /// The region iterated over by an instruction, binding its placeholder.
    fn each(&mut self, iterations: &[Iteration]) -> Result<Option<RegionId>, Message> {
        let mut sets = iterations.iter().filter_map(|iteration| match iteration {
            Iteration::Set { var, region } => Some((*var, region)),
            Iteration::Range { .. } => None,
        });
        let Some((var, region)) = sets.next() else {
            return Ok(None);
        };
        if sets.next().is_some() {
            return Err(LowerMessage::MultipleSetIterators { span: self.span }.into());
        }

        let region = self.region(region)?;
        self.scope.push(var);
        Ok(Some(region))
    }

    fn region(&self, expr: &Expr) -> Result<RegionId, Message> {
        let span = self.span;
        let label = (expr.as_literal())
            .and_then(|literal| literal.to_integer())
            .ok_or(LowerMessage::InvalidLabel { span })?;
        (self.layout.region(label)).ok_or_else(|| LowerMessage::UnknownRegion { span, label }.into())
    }

    /// A protein state: an integer, or a protein object whose first index is
    /// an integer, `P{3}`.
    fn protein_state(&self, expr: &Expr) -> Result<i64, Message> {
        let state = match expr {
            Expr::Lit(literal) => literal.to_integer(),
            Expr::Object(_, indices) => (indices.first())
                .and_then(Expr::as_literal)
                .and_then(|literal| literal.to_integer()),
            _ => None,
        };
        state.ok_or_else(|| LowerMessage::InvalidProteinGuard { span: self.span }.into())
    }

    fn cell(&mut self, name: Symbol, indices: &[Expr]) -> Result<Cell, Message> {
        let Some(var) = self.layout.variable(name.resolve(), indices.len()) else {
            return Err(LowerMessage::UnknownVariable {
                span: self.span,
                name,
                arity: indices.len(),
            }
            .into());
        };
        let indices = (indices.iter())
            .map(|index| self.index(index))
            .collect::<Result<_, _>>()?;
        Ok(Cell { var, indices })
    }

    fn index(&mut self, index: &Expr) -> Result<Index, Message> {
        match index {
            Expr::Lit(literal) => {
                let value = literal.to_f64().round();
                if value >= 0.0 && value < usize::MAX as f64 {
                    Ok(Index::Const(value as usize))
                } else {
                    Ok(Index::Dynamic(sim::Expr::Const(value)))
                }
            }
            Expr::Name(name) => match self.level(*name) {
                Some(level) => Ok(Index::Member(level)),
                None => Ok(Index::Dynamic(self.unresolved(*name))),
            },
            index => Ok(Index::Dynamic(self.expr(index)?)),
        }
    }

    fn level(&self, name: Symbol) -> Option<usize> {
        self.scope.iter().rposition(|var| *var == name)
    }

    /// Names bound by neither the program nor a region iteration read as
    /// undefined, so writes through them are dropped.
    fn unresolved(&self, name: Symbol) -> sim::Expr {
        debug!(name = %name, span = ?self.span, "lowering an unresolved name as undefined");
        sim::Expr::Const(undefined())
    }

    fn expr(&mut self, expr: &Expr) -> Result<sim::Expr, Message> {
        match expr {
            Expr::Lit(literal) => Ok(sim::Expr::Const(literal.to_f64())),
            Expr::Name(name) => match self.level(*name) {
                Some(level) => Ok(sim::Expr::Member(level)),
                None => Ok(self.unresolved(*name)),
            },
            Expr::Object(name, indices) => Ok(sim::Expr::Load(self.cell(*name, indices)?)),
            Expr::Call(name, args) => self.call(*name, &args.exprs, &args.iterations),
            Expr::Unary(op, operand) => Ok(sim::Expr::Unary(*op, Box::new(self.expr(operand)?))),
            Expr::Binary(op, left, right) => Ok(sim::Expr::Binary(
                *op,
                Box::new(self.expr(left)?),
                Box::new(self.expr(right)?),
            )),
        }
    }

    fn call(
        &mut self,
        name: Symbol,
        exprs: &[Expr],
        iterations: &[Iteration],
    ) -> Result<sim::Expr, Message> {
        let span = self.span;
        let arity_error = |expected| LowerMessage::WrongArity {
            span,
            name,
            expected,
            found: exprs.len(),
        };

        if let Some(reduction) = Reduction::from_name(name.resolve()) {
            let [body] = exprs else {
                return Err(arity_error(1).into());
            };
            let (var, region) = match iterations {
                [Iteration::Set { var, region }] => (*var, self.region(region)?),
                _ => return Err(LowerMessage::MissingSetIterator { span, name }.into()),
            };

            self.scope.push(var);
            let body = self.expr(body);
            self.scope.pop();
            return Ok(sim::Expr::Reduce(reduction, region, Box::new(body?)));
        }

        let Some(intrinsic) = Intrinsic::from_name(name.resolve()) else {
            return Err(LowerMessage::UnknownFunction { span, name }.into());
        };
        if exprs.len() != intrinsic.arity() {
            return Err(arity_error(intrinsic.arity()).into());
        }
        if !iterations.is_empty() {
            debug!(%name, "ignoring iterators on a call that is not a reduction");
        }
        let args = (exprs.iter())
            .map(|expr| self.expr(expr))
            .collect::<Result<_, _>>()?;
        Ok(sim::Expr::Call(intrinsic, args))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::symbols::SymbolTable;
    use crate::core::unroll::unroll;
    use crate::core::Limits;
    use crate::files::FileId;
    use crate::surface::parse_program;

    const CAPACITY: usize = 32;

    fn ground(source: &str) -> (Symbol, Definition) {
        let file_id = FileId::try_from(1).unwrap();
        let limits = Limits::default();
        let mut symbols = SymbolTable::new();
        let program = parse_program(file_id, source, &mut symbols, &limits).unwrap();
        let ground = unroll(&program, Symbol::intern("main"), &mut symbols, &limits).unwrap();
        (program.model, ground)
    }

    fn lower_error(body: &str) -> LowerMessage {
        let (model, ground) = ground(&format!("@model<m>\ndef main() {{\n{body}\n}}"));
        match lower(model, &ground, CAPACITY) {
            Err(Message::Lower(message)) => message,
            Err(message) => panic!("unexpected message {message:?}"),
            Ok(_) => panic!("lowering succeeded"),
        }
    }

    const MODEL: &str = "@model<m>
        def main() {
            @mu = [[]'2]'1;
            @Y{1, 2} = 5;
            W{0} <- 1;
            X{i} <- i : 1 <= i <= 4;
            Z{h} <- Y{1, h} : h in 2;
            V{W{0}} <- 2;
        }";

    #[test]
    fn dimensions_fit_every_index() {
        let (_, ground) = ground(MODEL);
        let layout = layout(&ground, CAPACITY).unwrap();
        let dims = |name, arity| {
            let var = layout.variable(name, arity).unwrap();
            layout.shape(var).dims.clone()
        };

        assert_eq!(dims("W", 1), [1]);
        assert_eq!(dims("X", 1), [5]);
        assert_eq!(dims("Z", 1), [CAPACITY]);
        assert_eq!(dims("Y", 2), [2, CAPACITY]);
        assert_eq!(dims("V", 1), [CAPACITY]);
        assert_eq!(layout.regions(), [1, 2]);
    }

    #[test]
    fn layout_is_idempotent() {
        let (_, ground) = ground(MODEL);
        assert_eq!(layout(&ground, CAPACITY).unwrap(), layout(&ground, CAPACITY).unwrap());
    }

    #[test]
    fn one_unit_per_rule() {
        let (model, ground) = ground(MODEL);
        let program = lower(model, &ground, CAPACITY).unwrap();

        assert_eq!(program.units.len(), 7);
        assert_eq!(program.init.len(), 2);
        assert_eq!(program.root, program.layout.region(1));
        assert_eq!(program.position, program.layout.variable("Y", 2));

        let each = (program.units.iter()).filter_map(|unit| unit.each).collect::<Vec<_>>();
        assert_eq!(each, [program.layout.region(2).unwrap()]);
        assert!(program.units.iter().any(|unit| unit.text == "X{3} <- 3"));
    }

    #[test]
    fn unresolved_indices_are_sized_by_the_capacity() {
        let (model, ground) = ground(
            "@model<m>
            def main() {
                Y{k} <- 1;
                X{0} <- Y{k} + 1;
            }",
        );
        let program = lower(model, &ground, CAPACITY).unwrap();

        let y = program.layout.variable("Y", 1).unwrap();
        assert_eq!(program.layout.shape(y).dims, [CAPACITY]);
        let Body::Produce { target, .. } = &program.units[0].body else {
            panic!("expected a production");
        };
        assert!(matches!(
            target.indices.as_slice(),
            [Index::Dynamic(sim::Expr::Const(value))] if value.is_nan(),
        ));
    }

    #[test]
    fn reads_need_a_writer() {
        assert!(matches!(
            lower_error("A{0} <- B{0};"),
            LowerMessage::UnknownVariable { arity: 1, .. },
        ));
    }

    #[test]
    fn protein_guards_are_constant() {
        assert!(matches!(
            lower_error("A{0} <- 1, P{Z{0}};"),
            LowerMessage::InvalidProteinGuard { .. },
        ));
    }

    #[test]
    fn intrinsics_are_checked() {
        assert!(matches!(
            lower_error("A{0} <- floor(1.5);"),
            LowerMessage::UnknownFunction { .. },
        ));
        assert!(matches!(
            lower_error("A{0} <- round(1, 2);"),
            LowerMessage::WrongArity { .. },
        ));
    }

    #[test]
    fn labels_must_fit_the_capacity() {
        assert!(matches!(
            lower_error("@mu = [[]'40]'1;"),
            LowerMessage::LabelOutOfRange { label: 40, capacity: CAPACITY, .. },
        ));
    }
}
