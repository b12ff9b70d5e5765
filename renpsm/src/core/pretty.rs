//! A pretty printer for the rule language, producing the surface syntax.
//!
//! Used to dump ground programs and to annotate generated code with the rule
//! each unit was lowered from.

use pretty::RcDoc;

use crate::core::{
    Args, Definition, Expr, Guards, Instruction, InstructionKind, Iteration, Membrane, ObjectRef,
    Op, Program, UNARY_PRECEDENCE,
};
use crate::symbol::Symbol;

const INDENT: isize = 4;
const ATOMIC_PRECEDENCE: u8 = UNARY_PRECEDENCE + 1;

pub struct Context {}

impl Context {
    pub fn new() -> Context {
        Context {}
    }

    fn name(&self, name: Symbol) -> RcDoc<'static> {
        RcDoc::text(name.resolve().to_owned())
    }

    pub fn program(&self, program: &Program) -> RcDoc<'static> {
        let header = RcDoc::text("@model<")
            .append(self.name(program.model))
            .append(">");
        let definitions = (program.definitions.iter())
            .map(|definition| RcDoc::hardline().append(self.definition(definition)));

        header.append(RcDoc::hardline()).append(RcDoc::concat(definitions))
    }

    pub fn definition(&self, definition: &Definition) -> RcDoc<'static> {
        let params =
            RcDoc::intersperse(definition.params.iter().map(|p| self.name(*p)), RcDoc::text(", "));
        let body = (definition.instructions.iter()).map(|instruction| {
            RcDoc::hardline()
                .append(self.instruction(instruction))
                .append(";")
        });

        RcDoc::text("def ")
            .append(self.name(definition.name))
            .append("(")
            .append(params)
            .append(") {")
            .append(RcDoc::concat(body).nest(INDENT))
            .append(RcDoc::hardline())
            .append("}")
            .append(RcDoc::hardline())
    }

    pub fn instruction(&self, instruction: &Instruction) -> RcDoc<'static> {
        let doc = match &instruction.kind {
            InstructionKind::Assign { target, value } => self
                .object_ref(target)
                .append(" = ")
                .append(self.expr(value)),
            InstructionKind::InitVariable { target, value } => RcDoc::text("@")
                .append(self.object_ref(target))
                .append(" = ")
                .append(self.expr(value)),
            InstructionKind::Membranes(membrane) => {
                RcDoc::text("@mu = ").append(self.membrane(membrane))
            }
            InstructionKind::Multiset { region, objects } => {
                let objects = objects.iter().map(|(object, multiplicity)| {
                    self.object_ref(object)
                        .append(" * ")
                        .append(self.expr_prec(UNARY_PRECEDENCE, multiplicity))
                });
                RcDoc::text("@ms(")
                    .append(self.expr(region))
                    .append(") = ")
                    .append(RcDoc::intersperse(objects, RcDoc::text(", ")))
            }
            InstructionKind::Call { name, args } => {
                RcDoc::text("call ").append(self.call(*name, args))
            }
            InstructionKind::Production {
                target,
                value,
                guards,
            } => self
                .object_ref(target)
                .append(" <- ")
                .append(self.expr(value))
                .append(self.guards(guards)),
            InstructionKind::Creation {
                child,
                parent,
                guards,
            } => RcDoc::text("[[]'")
                .append(self.expr_prec(ATOMIC_PRECEDENCE, child))
                .append("]'")
                .append(self.expr_prec(ATOMIC_PRECEDENCE, parent))
                .append(self.guards(guards)),
            InstructionKind::Evolution {
                from,
                to,
                label,
                guards,
            } => RcDoc::text("[")
                .append(self.object_ref(from))
                .append(" -> ")
                .append(self.object_ref(to))
                .append("]'")
                .append(self.expr_prec(ATOMIC_PRECEDENCE, label))
                .append(self.guards(guards)),
        };

        match instruction.iterations.as_slice() {
            [] => doc,
            iterations => doc.append(" : ").append(self.iterations(iterations)),
        }
    }

    fn membrane(&self, membrane: &Membrane) -> RcDoc<'static> {
        let children = membrane.children.iter().map(|child| self.membrane(child));
        RcDoc::text("[")
            .append(RcDoc::intersperse(children, RcDoc::text(" ")))
            .append("]'")
            .append(self.expr_prec(ATOMIC_PRECEDENCE, &membrane.label))
    }

    fn guards(&self, guards: &Guards) -> RcDoc<'static> {
        let protein = (guards.protein.as_ref())
            .map_or(RcDoc::nil(), |protein| RcDoc::text(", ").append(self.expr(protein)));
        let enzyme = (guards.enzyme.as_ref())
            .map_or(RcDoc::nil(), |enzyme| RcDoc::text(" ? ").append(self.expr(enzyme)));
        protein.append(enzyme)
    }

    fn iterations(&self, iterations: &[Iteration]) -> RcDoc<'static> {
        let iterations = iterations.iter().map(|iteration| match iteration {
            Iteration::Range { var, low, high } => self
                .expr_prec(Op::Add.precedence(), low)
                .append(" <= ")
                .append(self.name(*var))
                .append(" <= ")
                .append(self.expr_prec(Op::Add.precedence(), high)),
            Iteration::Set { var, region } => self
                .name(*var)
                .append(" in ")
                .append(self.expr(region)),
        });
        RcDoc::intersperse(iterations, RcDoc::text(", "))
    }

    fn object_ref(&self, object: &ObjectRef) -> RcDoc<'static> {
        self.object(object.name, &object.indices)
    }

    fn object(&self, name: Symbol, indices: &[Expr]) -> RcDoc<'static> {
        match indices {
            [] => self.name(name),
            indices => self
                .name(name)
                .append("{")
                .append(RcDoc::intersperse(
                    indices.iter().map(|index| self.expr(index)),
                    RcDoc::text(","),
                ))
                .append("}"),
        }
    }

    fn call(&self, name: Symbol, args: &Args) -> RcDoc<'static> {
        let exprs = RcDoc::intersperse(
            args.exprs.iter().map(|expr| self.expr(expr)),
            RcDoc::text(", "),
        );
        let iterations = match args.iterations.as_slice() {
            [] => RcDoc::nil(),
            iterations => RcDoc::text(" : ").append(self.iterations(iterations)),
        };
        self.name(name)
            .append("(")
            .append(exprs)
            .append(iterations)
            .append(")")
    }

    pub fn expr(&self, expr: &Expr) -> RcDoc<'static> {
        self.expr_prec(0, expr)
    }

    fn expr_prec(&self, prec: u8, expr: &Expr) -> RcDoc<'static> {
        match expr {
            Expr::Lit(literal) => {
                let doc = RcDoc::text(literal.to_string());
                let negative = literal.to_f64().is_sign_negative();
                self.paren(negative && prec >= ATOMIC_PRECEDENCE, doc)
            }
            Expr::Name(name) => self.name(*name),
            Expr::Object(name, indices) => self.object(*name, indices),
            Expr::Call(name, args) => self.call(*name, args),
            Expr::Unary(op, operand) => self.paren(
                prec > UNARY_PRECEDENCE,
                RcDoc::text(op.symbol()).append(self.expr_prec(UNARY_PRECEDENCE, operand)),
            ),
            Expr::Binary(op, left, right) => {
                let op_prec = op.precedence();
                self.paren(
                    prec > op_prec,
                    self.expr_prec(op_prec, left)
                        .append(" ")
                        .append(op.symbol())
                        .append(" ")
                        .append(self.expr_prec(op_prec + 1, right)),
                )
            }
        }
    }

    fn paren(&self, wrap: bool, doc: RcDoc<'static>) -> RcDoc<'static> {
        if wrap {
            RcDoc::text("(").append(doc).append(")")
        } else {
            doc
        }
    }
}

impl Default for Context {
    fn default() -> Context {
        Context::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Literal, Op};
    use crate::source::Span;

    fn render(doc: RcDoc<'static>) -> String {
        doc.pretty(80).to_string()
    }

    fn binary(op: Op, left: Expr, right: Expr) -> Expr {
        Expr::Binary(op, Box::new(left), Box::new(right))
    }

    #[test]
    fn minimal_parentheses() {
        let context = Context::new();
        let a = Expr::Name(Symbol::intern("a"));
        let b = Expr::Name(Symbol::intern("b"));
        let c = Expr::Name(Symbol::intern("c"));

        let sum_times = binary(Op::Mul, binary(Op::Add, a.clone(), b.clone()), c.clone());
        assert_eq!(render(context.expr(&sum_times)), "(a + b) * c");

        let left_assoc = binary(Op::Sub, binary(Op::Sub, a.clone(), b.clone()), c.clone());
        assert_eq!(render(context.expr(&left_assoc)), "a - b - c");

        let right_nested = binary(Op::Sub, a.clone(), binary(Op::Sub, b, c));
        assert_eq!(render(context.expr(&right_nested)), "a - (b - c)");

        let negated = Expr::Unary(Op::Sub, Box::new(binary(Op::Add, a, Expr::int(1))));
        assert_eq!(render(context.expr(&negated)), "-(a + 1)");
    }

    #[test]
    fn instructions() {
        let context = Context::new();
        let y = Symbol::intern("Y");
        let h = Symbol::intern("h");
        let instruction = Instruction {
            span: Span::Empty,
            kind: InstructionKind::Production {
                target: ObjectRef {
                    name: y,
                    indices: vec![Expr::int(1), Expr::Name(h)],
                },
                value: Expr::Lit(Literal::Real(2.0)),
                guards: Guards {
                    protein: Some(Expr::Object(Symbol::intern("P"), vec![Expr::int(1)])),
                    enzyme: None,
                },
            },
            iterations: vec![Iteration::Set {
                var: h,
                region: Expr::int(2),
            }],
        };
        assert_eq!(
            render(context.instruction(&instruction)),
            "Y{1,h} <- 2.0, P{1} : h in 2",
        );

        let membranes = Instruction {
            span: Span::Empty,
            kind: InstructionKind::Membranes(Membrane {
                label: Expr::int(1),
                children: vec![
                    Membrane {
                        label: Expr::int(2),
                        children: Vec::new(),
                    },
                    Membrane {
                        label: Expr::int(3),
                        children: Vec::new(),
                    },
                ],
            }),
            iterations: Vec::new(),
        };
        assert_eq!(render(context.instruction(&membranes)), "@mu = [[]'2 []'3]'1");
    }

    #[test]
    fn definitions() {
        let context = Context::new();
        let definition = Definition {
            span: Span::Empty,
            name: Symbol::intern("main"),
            params: Vec::new(),
            instructions: vec![Instruction {
                span: Span::Empty,
                kind: InstructionKind::InitVariable {
                    target: ObjectRef {
                        name: Symbol::intern("X"),
                        indices: vec![Expr::int(0)],
                    },
                    value: Expr::int(-1),
                },
                iterations: Vec::new(),
            }],
        };
        assert_eq!(
            render(context.definition(&definition)),
            "def main() {\n    @X{0} = -1;\n}\n",
        );
    }
}
