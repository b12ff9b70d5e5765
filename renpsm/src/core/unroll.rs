//! Flattening of a program into ground instructions.
//!
//! Starting from an entry definition, range iterators are replicated once per
//! value of their variable and macro calls are inlined, leaving only rules and
//! initialisation instructions. Called definitions see whatever is bound in
//! the symbol table at the call site.

use fxhash::FxHashMap;
use tracing::{debug, instrument, trace};

use crate::core::fold::{rebuild, rebuild_iterations, rebuild_target};
use crate::core::symbols::SymbolTable;
use crate::core::{
    Definition, Expr, Guards, Instruction, InstructionKind, Iteration, Limits, Literal, Membrane,
    Program,
};
use crate::reporting::{Message, UnrollMessage};
use crate::source::Span;
use crate::symbol::Symbol;

/// Unroll the definition named `entry` into a single definition of ground
/// instructions.
///
/// Assignments update `symbols` as a side effect and bindings made by them
/// persist after unrolling, while loop variables are unbound again.
#[instrument(skip_all, fields(entry = %entry))]
pub fn unroll(
    program: &Program,
    entry: Symbol,
    symbols: &mut SymbolTable,
    limits: &Limits,
) -> Result<Definition, Message> {
    let definitions = (program.definitions.iter())
        .map(|def| (def.name, def))
        .collect::<FxHashMap<_, _>>();

    let Some(definition) = definitions.get(&entry).copied() else {
        let suggestion = suggest_name(entry, program.definitions.iter().map(|def| def.name));
        return Err(UnrollMessage::UnknownEntry {
            name: entry,
            suggestion,
        }
        .into());
    };

    let mut context = Context {
        program,
        definitions,
        symbols,
        limits,
        output: Vec::new(),
        depth: 0,
    };
    context.definition(definition)?;
    debug!(instructions = context.output.len(), "unrolled");

    Ok(Definition {
        span: definition.span,
        name: entry,
        params: Vec::new(),
        instructions: context.output,
    })
}

struct Context<'a> {
    program: &'a Program,
    definitions: FxHashMap<Symbol, &'a Definition>,
    symbols: &'a mut SymbolTable,
    limits: &'a Limits,
    output: Vec<Instruction>,
    depth: usize,
}

impl<'a> Context<'a> {
    fn definition(&mut self, definition: &'a Definition) -> Result<(), Message> {
        if self.depth >= self.limits.depth {
            return Err(Message::LimitExceeded {
                span: definition.span,
                what: "nested calls",
                limit: self.limits.depth,
            });
        }

        self.depth += 1;
        let result = (definition.instructions.iter())
            .try_for_each(|instruction| self.expand(instruction, &instruction.iterations));
        self.depth -= 1;
        result
    }

    /// Expand the first range iterator of `iterations`, recursing on the rest.
    fn expand(
        &mut self,
        instruction: &'a Instruction,
        iterations: &[Iteration],
    ) -> Result<(), Message> {
        let Some(position) = (iterations.iter())
            .position(|iteration| matches!(iteration, Iteration::Range { .. }))
        else {
            return self.emit(instruction, iterations);
        };
        let Iteration::Range { var, low, high } = &iterations[position] else {
            unreachable!("position of a range iterator");
        };

        let low = self.bound(instruction.span, *var, low)?;
        let high = self.bound(instruction.span, *var, high)?;
        trace!(%var, low, high, "expanding range");

        let rest = (iterations.iter().enumerate())
            .filter(|(index, _)| *index != position)
            .map(|(_, iteration)| iteration.clone())
            .collect::<Vec<_>>();

        for value in low..=high {
            self.symbols.bind(*var, Literal::Int(value));
            let result = self.expand(instruction, &rest);
            self.symbols.unbind(*var);
            result?;
        }
        Ok(())
    }

    fn bound(&self, span: Span, var: Symbol, expr: &Expr) -> Result<i64, Message> {
        (rebuild(&*self.symbols, expr).as_literal())
            .and_then(|literal| literal.to_integer())
            .ok_or_else(|| UnrollMessage::NonLiteralBound { span, var }.into())
    }

    fn emit(&mut self, instruction: &'a Instruction, iterations: &[Iteration]) -> Result<(), Message> {
        let span = instruction.span;
        let symbols = &*self.symbols;

        let kind = match &instruction.kind {
            InstructionKind::Assign { target, value } => {
                match rebuild(symbols, value).as_literal() {
                    Some(value) => self.symbols.bind(target.name, value),
                    None => debug!(name = %target.name, "skipped a non-constant assignment"),
                }
                return Ok(());
            }
            InstructionKind::Call { name, .. } => {
                if !iterations.is_empty() {
                    return Err(UnrollMessage::SetIteratorOnCall { span }.into());
                }
                let Some(definition) = self.definitions.get(name).copied() else {
                    let candidates = self.program.definitions.iter().map(|def| def.name);
                    return Err(UnrollMessage::UnknownDefinition {
                        span,
                        name: *name,
                        suggestion: suggest_name(*name, candidates),
                    }
                    .into());
                };
                return self.definition(definition);
            }
            InstructionKind::InitVariable { target, value } => InstructionKind::InitVariable {
                target: rebuild_target(symbols, target),
                value: rebuild(symbols, value),
            },
            InstructionKind::Membranes(membrane) => {
                InstructionKind::Membranes(rebuild_membrane(symbols, membrane))
            }
            InstructionKind::Multiset { region, objects } => InstructionKind::Multiset {
                region: rebuild(symbols, region),
                objects: (objects.iter())
                    .map(|(object, multiplicity)| {
                        (rebuild_target(symbols, object), rebuild(symbols, multiplicity))
                    })
                    .collect(),
            },
            InstructionKind::Production {
                target,
                value,
                guards,
            } => InstructionKind::Production {
                target: rebuild_target(symbols, target),
                value: rebuild(symbols, value),
                guards: rebuild_guards(symbols, guards),
            },
            InstructionKind::Creation {
                child,
                parent,
                guards,
            } => InstructionKind::Creation {
                child: rebuild(symbols, child),
                parent: rebuild(symbols, parent),
                guards: rebuild_guards(symbols, guards),
            },
            InstructionKind::Evolution {
                from,
                to,
                label,
                guards,
            } => InstructionKind::Evolution {
                from: rebuild_target(symbols, from),
                to: rebuild_target(symbols, to),
                label: rebuild(symbols, label),
                guards: rebuild_guards(symbols, guards),
            },
        };

        let iterations = rebuild_iterations(symbols, iterations);
        if self.output.len() >= self.limits.instructions {
            return Err(Message::LimitExceeded {
                span,
                what: "ground instructions",
                limit: self.limits.instructions,
            });
        }
        self.output.push(Instruction {
            span,
            kind,
            iterations,
        });
        Ok(())
    }
}

fn rebuild_membrane(symbols: &SymbolTable, membrane: &Membrane) -> Membrane {
    Membrane {
        label: rebuild(symbols, &membrane.label),
        children: (membrane.children.iter())
            .map(|child| rebuild_membrane(symbols, child))
            .collect(),
    }
}

/// Protein objects keep their name, only their indices are folded.
fn rebuild_guards(symbols: &SymbolTable, guards: &Guards) -> Guards {
    Guards {
        protein: guards.protein.as_ref().map(|protein| match protein {
            Expr::Object(name, indices) => Expr::Object(
                *name,
                indices.iter().map(|index| rebuild(symbols, index)).collect(),
            ),
            protein => rebuild(symbols, protein),
        }),
        enzyme: guards.enzyme.as_ref().map(|enzyme| rebuild(symbols, enzyme)),
    }
}

const MAX_SUGGESTION_DISTANCE: usize = 3;

fn suggest_name(name: Symbol, candidates: impl Iterator<Item = Symbol>) -> Option<Symbol> {
    candidates
        .map(|candidate| {
            let distance = levenshtein::levenshtein(name.resolve(), candidate.resolve());
            (distance, candidate)
        })
        .filter(|(distance, _)| *distance <= MAX_SUGGESTION_DISTANCE)
        .min_by_key(|(distance, _)| *distance)
        .map(|(_, candidate)| candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Args, ObjectRef, Op};

    fn sym(name: &str) -> Symbol {
        Symbol::intern(name)
    }

    fn instruction(kind: InstructionKind, iterations: Vec<Iteration>) -> Instruction {
        Instruction {
            span: Span::Empty,
            kind,
            iterations,
        }
    }

    fn definition(name: &str, instructions: Vec<Instruction>) -> Definition {
        Definition {
            span: Span::Empty,
            name: sym(name),
            params: Vec::new(),
            instructions,
        }
    }

    fn program(definitions: Vec<Definition>) -> Program {
        Program {
            model: sym("test"),
            definitions,
        }
    }

    fn production(target: &str, index: Expr, value: Expr) -> InstructionKind {
        InstructionKind::Production {
            target: ObjectRef {
                name: sym(target),
                indices: vec![index],
            },
            value,
            guards: Guards::default(),
        }
    }

    fn range(var: &str, low: i64, high: i64) -> Iteration {
        Iteration::Range {
            var: sym(var),
            low: Expr::int(low),
            high: Expr::int(high),
        }
    }

    fn call(name: &str) -> InstructionKind {
        InstructionKind::Call {
            name: sym(name),
            args: Args::default(),
        }
    }

    fn target_indices(definition: &Definition) -> Vec<Vec<Expr>> {
        (definition.instructions.iter())
            .map(|instruction| match &instruction.kind {
                InstructionKind::Production { target, .. } => target.indices.clone(),
                kind => panic!("unexpected instruction {kind:?}"),
            })
            .collect()
    }

    #[test]
    fn ranges_are_replicated_in_order() {
        let i = sym("i");
        let program = program(vec![definition(
            "main",
            vec![instruction(
                production("Y", Expr::Name(i), Expr::Name(i)),
                vec![range("i", 1, 3)],
            )],
        )]);
        let mut symbols = SymbolTable::new();
        let ground = unroll(&program, sym("main"), &mut symbols, &Limits::default()).unwrap();

        assert_eq!(
            target_indices(&ground),
            [[Expr::int(1)], [Expr::int(2)], [Expr::int(3)]],
        );
        assert!(ground.instructions.iter().all(|i| i.iterations.is_empty()));
        assert!(!symbols.is_bound(i));
    }

    #[test]
    fn first_iterator_is_the_outer_loop() {
        let (i, j) = (sym("i"), sym("j"));
        let index = Expr::Binary(
            Op::Add,
            Box::new(Expr::Binary(
                Op::Mul,
                Box::new(Expr::Name(i)),
                Box::new(Expr::int(10)),
            )),
            Box::new(Expr::Name(j)),
        );
        let high_j = Iteration::Range {
            var: j,
            low: Expr::int(1),
            high: Expr::Name(i),
        };
        let program = program(vec![definition(
            "main",
            vec![instruction(
                production("Y", index, Expr::int(0)),
                vec![range("i", 1, 2), high_j],
            )],
        )]);
        let ground =
            unroll(&program, sym("main"), &mut SymbolTable::new(), &Limits::default()).unwrap();

        assert_eq!(
            target_indices(&ground),
            [[Expr::int(11)], [Expr::int(21)], [Expr::int(22)]],
        );
    }

    #[test]
    fn empty_and_single_ranges() {
        let program = program(vec![definition(
            "main",
            vec![
                instruction(production("A", Expr::int(0), Expr::int(0)), vec![range("i", 3, 2)]),
                instruction(production("B", Expr::int(0), Expr::int(0)), vec![range("i", 4, 4)]),
            ],
        )]);
        let ground =
            unroll(&program, sym("main"), &mut SymbolTable::new(), &Limits::default()).unwrap();
        assert_eq!(ground.instructions.len(), 1);
    }

    #[test]
    fn macros_are_inlined_and_assignments_dropped() {
        let x = sym("X");
        let assign = InstructionKind::Assign {
            target: ObjectRef {
                name: x,
                indices: vec![Expr::int(1)],
            },
            value: Expr::int(5),
        };
        let program = program(vec![
            definition(
                "main",
                vec![
                    instruction(assign, Vec::new()),
                    instruction(call("body"), Vec::new()),
                ],
            ),
            definition(
                "body",
                vec![
                    instruction(production("Y", Expr::int(0), Expr::Object(x, vec![])), vec![]),
                    instruction(call("leaf"), Vec::new()),
                ],
            ),
            definition(
                "leaf",
                vec![instruction(production("Z", Expr::int(0), Expr::int(1)), vec![])],
            ),
        ]);
        let mut symbols = SymbolTable::new();
        let ground = unroll(&program, sym("main"), &mut symbols, &Limits::default()).unwrap();

        assert_eq!(ground.instructions.len(), 2);
        match &ground.instructions[0].kind {
            InstructionKind::Production { value, .. } => assert_eq!(*value, Expr::int(5)),
            kind => panic!("unexpected instruction {kind:?}"),
        }
        assert_eq!(symbols.get(x), Some(Literal::Int(5)));
    }

    #[test]
    fn set_iterators_are_kept() {
        let h = sym("h");
        let set = Iteration::Set {
            var: h,
            region: Expr::int(2),
        };
        let program = program(vec![definition(
            "main",
            vec![instruction(
                production("Y", Expr::Name(h), Expr::Name(sym("i"))),
                vec![set.clone(), range("i", 1, 2)],
            )],
        )]);
        let ground =
            unroll(&program, sym("main"), &mut SymbolTable::new(), &Limits::default()).unwrap();

        assert_eq!(ground.instructions.len(), 2);
        assert_eq!(ground.instructions[1].iterations, [set]);
        assert_eq!(target_indices(&ground)[1], [Expr::Name(h)]);
    }

    #[test]
    fn unknown_definitions_are_suggested() {
        let program = program(vec![
            definition("main", vec![instruction(call("grwo"), Vec::new())]),
            definition("grow", Vec::new()),
        ]);
        let error = unroll(&program, sym("main"), &mut SymbolTable::new(), &Limits::default())
            .unwrap_err();
        match error {
            Message::Unroll(UnrollMessage::UnknownDefinition { suggestion, .. }) => {
                assert_eq!(suggestion, Some(sym("grow")));
            }
            error => panic!("unexpected error {error:?}"),
        }

        let error = unroll(&program, sym("mian"), &mut SymbolTable::new(), &Limits::default())
            .unwrap_err();
        assert!(matches!(
            error,
            Message::Unroll(UnrollMessage::UnknownEntry { suggestion: Some(_), .. })
        ));
    }

    #[test]
    fn non_constant_assignments_leave_the_name_unbound() {
        let n = sym("N");
        let assign = |value| InstructionKind::Assign {
            target: ObjectRef {
                name: n,
                indices: Vec::new(),
            },
            value,
        };
        let read_n = |target| production(target, Expr::int(0), Expr::Object(n, Vec::new()));
        let program = program(vec![definition(
            "main",
            vec![
                instruction(assign(Expr::Object(sym("Z"), vec![Expr::int(0)])), Vec::new()),
                instruction(read_n("W"), Vec::new()),
                instruction(assign(Expr::int(3)), Vec::new()),
                instruction(read_n("V"), Vec::new()),
            ],
        )]);
        let mut symbols = SymbolTable::new();
        let ground = unroll(&program, sym("main"), &mut symbols, &Limits::default()).unwrap();

        let values = (ground.instructions.iter())
            .map(|instruction| match &instruction.kind {
                InstructionKind::Production { value, .. } => value.clone(),
                kind => panic!("unexpected instruction {kind:?}"),
            })
            .collect::<Vec<_>>();
        assert_eq!(values, [Expr::Object(n, Vec::new()), Expr::int(3)]);
    }

    #[test]
    fn recursion_is_limited() {
        let program = program(vec![definition(
            "main",
            vec![instruction(call("main"), Vec::new())],
        )]);
        let error = unroll(&program, sym("main"), &mut SymbolTable::new(), &Limits::default())
            .unwrap_err();
        assert!(matches!(error, Message::LimitExceeded { limit: 64, .. }));
    }

    #[test]
    fn bounds_must_be_constant() {
        let bad = Iteration::Range {
            var: sym("i"),
            low: Expr::int(1),
            high: Expr::Name(sym("n")),
        };
        let program = program(vec![definition(
            "main",
            vec![instruction(production("Y", Expr::int(0), Expr::int(0)), vec![bad])],
        )]);
        let error = unroll(&program, sym("main"), &mut SymbolTable::new(), &Limits::default())
            .unwrap_err();
        assert!(matches!(
            error,
            Message::Unroll(UnrollMessage::NonLiteralBound { .. })
        ));
    }
}
