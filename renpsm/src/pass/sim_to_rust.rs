//! Emit a standalone Rust simulator for a lowered program.
//!
//! The generated program links against `renpsm_runtime`, and follows the
//! in-process executor step for step: the same initialisation order, the same
//! random draw keys, and the same evaluation order within every expression.

use std::io::{self, Write};

use itertools::Itertools;
use renpsm_runtime::state::RegionId;

use crate::core::Op;
use crate::sim::{Body, Cell, Expr, Index, Init, Intrinsic, Program, Reduction, Unit};
use crate::source::Span;

pub struct Context<'a> {
    line: Box<dyn Fn(Span) -> Option<usize> + 'a>,
    /// Region labels, indexed by region id.
    regions: Vec<i64>,
}

impl<'a> Context<'a> {
    /// `line` finds the source line a unit was written on, for annotating the
    /// generated rules.
    pub fn new(line: impl Fn(Span) -> Option<usize> + 'a) -> Context<'a> {
        Context {
            line: Box::new(line),
            regions: Vec::new(),
        }
    }

    pub fn emit_program(&mut self, writer: &mut impl Write, program: &Program) -> io::Result<()> {
        self.regions = program.layout.regions().to_vec();

        writeln!(writer, "//! Simulator for the `{}` model.", program.model)?;
        writeln!(writer, "//!")?;
        writeln!(writer, "//! Generated by renpsm. Do not edit.")?;
        writeln!(writer)?;
        writeln!(
            writer,
            "#![allow(unused_mut, unused_variables, unused_braces, dead_code)]"
        )?;
        writeln!(writer)?;
        writeln!(writer, "use std::time::Instant;")?;
        writeln!(writer)?;
        writeln!(writer, "use renpsm_runtime::prelude::*;")?;
        writeln!(writer)?;

        self.emit_layout(writer, program)?;
        self.emit_init(writer, program)?;
        for unit in &program.units {
            self.emit_unit(writer, unit)?;
        }
        self.emit_rules(writer, program)?;
        self.emit_main(writer, program)?;

        Ok(())
    }

    fn emit_layout(&mut self, writer: &mut impl Write, program: &Program) -> io::Result<()> {
        let layout = &program.layout;

        writeln!(writer, "const CAPACITY: usize = {};", layout.capacity())?;
        writeln!(writer)?;
        for (index, label) in layout.regions().iter().enumerate() {
            writeln!(writer, "const {}: RegionId = RegionId({index});", region_name(*label))?;
        }
        for (index, shape) in layout.variables().iter().enumerate() {
            writeln!(
                writer,
                "const {}: VarId = VarId({index}); // {}{{{}}}",
                var_name(index),
                shape.name,
                shape.dims.iter().map(|_| "_").format(","),
            )?;
        }
        writeln!(writer)?;

        writeln!(writer, "fn layout() -> Layout {{")?;
        writeln!(writer, "    Layout::new(CAPACITY)")?;
        for label in layout.regions() {
            writeln!(writer, "        .with_region({label})")?;
        }
        for shape in layout.variables() {
            writeln!(
                writer,
                "        .with_variable({:?}, &[{}])",
                shape.name,
                shape.dims.iter().format(", "),
            )?;
        }
        writeln!(writer, "}}")?;
        writeln!(writer)?;

        Ok(())
    }

    fn emit_init(&mut self, writer: &mut impl Write, program: &Program) -> io::Result<()> {
        writeln!(writer, "fn init(state: &State) {{")?;
        for (index, init) in program.init.iter().enumerate() {
            match init {
                Init::Membrane {
                    slot,
                    parent,
                    regions,
                } => {
                    writeln!(
                        writer,
                        "    state.declare_membrane({slot}, {parent}, {regions:#010x});"
                    )?;
                }
                Init::Store {
                    target,
                    value,
                    each: None,
                } => {
                    writeln!(writer, "    {{")?;
                    writeln!(
                        writer,
                        "        let mut rng = state.rng(INIT_STEP, {index}, NO_MEMBER);"
                    )?;
                    self.emit_store(writer, "        ", target, value, 0)?;
                    writeln!(writer, "    }}")?;
                }
                Init::Store {
                    target,
                    value,
                    each: Some(region),
                } => {
                    writeln!(writer, "    for m0 in state.members({}) {{", self.region(*region))?;
                    writeln!(writer, "        let mut rng = state.rng(INIT_STEP, {index}, m0);")?;
                    self.emit_store(writer, "        ", target, value, 1)?;
                    writeln!(writer, "    }}")?;
                }
            }
        }
        writeln!(writer, "}}")?;
        writeln!(writer)?;

        Ok(())
    }

    fn emit_unit(&mut self, writer: &mut impl Write, unit: &Unit) -> io::Result<()> {
        match (self.line)(unit.origin) {
            Some(line) => writeln!(writer, "// line {line}: {}", unit.text)?,
            None => writeln!(writer, "// {}", unit.text)?,
        }
        writeln!(writer, "fn rule_{}(state: &State, step: u64) {{", unit.id)?;
        if let Some(protein) = unit.protein {
            writeln!(writer, "    if state.protein() != {protein} {{")?;
            writeln!(writer, "        return;")?;
            writeln!(writer, "    }}")?;
        }

        match unit.each {
            None => {
                writeln!(
                    writer,
                    "    let mut rng = state.rng(step, {}, NO_MEMBER);",
                    unit.id,
                )?;
                self.emit_body(writer, "    ", unit, 0)?;
            }
            Some(region) => {
                writeln!(
                    writer,
                    "    state.members({}).into_par_iter().for_each(|m0| {{",
                    self.region(region),
                )?;
                writeln!(writer, "        let mut rng = state.rng(step, {}, m0);", unit.id)?;
                self.emit_body(writer, "        ", unit, 1)?;
                writeln!(writer, "    }});")?;
            }
        }
        writeln!(writer, "}}")?;
        writeln!(writer)?;

        Ok(())
    }

    fn emit_body(
        &mut self,
        writer: &mut impl Write,
        indent: &str,
        unit: &Unit,
        level: usize,
    ) -> io::Result<()> {
        if let Some(enzyme) = &unit.enzyme {
            writeln!(
                writer,
                "{indent}if !intrinsics::truthy({}) {{",
                self.expr(enzyme, level),
            )?;
            writeln!(writer, "{indent}    return;")?;
            writeln!(writer, "{indent}}}")?;
        }

        match &unit.body {
            Body::Produce { target, value } => {
                self.emit_store(writer, indent, target, value, level)?;
            }
            Body::Transition { from, to } => {
                writeln!(writer, "{indent}if state.protein() == {from} {{")?;
                writeln!(writer, "{indent}    state.stage_protein({to});")?;
                writeln!(writer, "{indent}}}")?;
            }
            Body::Create { child, parent } => {
                writeln!(writer, "{indent}let child = index_of({});", self.expr(child, level))?;
                writeln!(writer, "{indent}let parent = index_of({});", self.expr(parent, level))?;
                writeln!(writer, "{indent}state.create_membrane(child, parent);")?;
            }
        }

        Ok(())
    }

    /// The value is evaluated before the indices of the target.
    fn emit_store(
        &mut self,
        writer: &mut impl Write,
        indent: &str,
        target: &Cell,
        value: &Expr,
        level: usize,
    ) -> io::Result<()> {
        writeln!(writer, "{indent}let value = {};", self.expr(value, level))?;
        writeln!(
            writer,
            "{indent}state.store({}, &[{}], value);",
            var_name(target.var.0),
            self.indices(target, level),
        )
    }

    fn emit_rules(&mut self, writer: &mut impl Write, program: &Program) -> io::Result<()> {
        writeln!(writer, "const RULES: &[fn(&State, u64)] = &[")?;
        for unit in &program.units {
            writeln!(writer, "    rule_{},", unit.id)?;
        }
        writeln!(writer, "];")?;
        writeln!(writer)?;

        Ok(())
    }

    fn emit_main(&mut self, writer: &mut impl Write, program: &Program) -> io::Result<()> {
        writeln!(writer, "fn main() {{")?;
        writeln!(writer, "    let options = Options::from_args();")?;
        writeln!(writer, "    init_logging(options.debug);")?;
        writeln!(writer, "    if let Err(error) = run(&options) {{")?;
        writeln!(writer, "        eprintln!(\"error: {{error}}\");")?;
        writeln!(writer, "        std::process::exit(1);")?;
        writeln!(writer, "    }}")?;
        writeln!(writer, "}}")?;
        writeln!(writer)?;

        writeln!(writer, "fn run(options: &Options) -> Result<()> {{")?;
        writeln!(writer, "    let seed = options.seed()?;")?;
        writeln!(writer, "    options.print_header(std::io::stdout().lock(), seed)?;")?;
        writeln!(writer)?;
        writeln!(writer, "    let map = Raster::load(&options.map)?;")?;
        writeln!(writer, "    let state = State::new(layout())?.with_map(map).with_seed(seed);")?;
        writeln!(writer, "    init(&state);")?;
        writeln!(writer)?;
        writeln!(writer, "    let pool = options.thread_pool()?;")?;
        writeln!(writer, "    let settings = options.step_settings();")?;
        writeln!(writer, "    let start = Instant::now();")?;
        writeln!(writer, "    let steps = pool.install(|| {{")?;
        writeln!(writer, "        run_steps(&state, &settings, |state, step| {{")?;
        writeln!(writer, "            RULES.par_iter().for_each(|rule| rule(state, step));")?;
        writeln!(writer, "        }})")?;
        writeln!(writer, "    }})?;")?;
        writeln!(writer, "    let elapsed = start.elapsed();")?;
        writeln!(writer)?;
        writeln!(writer, "    println!(\"Steps: {{steps}}\");")?;
        writeln!(
            writer,
            "    println!(\"Wall time: {{:.6}} seconds\", elapsed.as_secs_f64());"
        )?;
        if let (Some(root), Some(position)) = (program.root, program.position) {
            writeln!(
                writer,
                "    render_output(&state, {}, {}, &options.output)?;",
                self.region(root),
                var_name(position.0),
            )?;
        }
        writeln!(writer, "    Ok(())")?;
        writeln!(writer, "}}")?;

        Ok(())
    }

    fn region(&self, region: RegionId) -> String {
        match self.regions.get(region.0) {
            Some(label) => region_name(*label),
            None => format!("RegionId({})", region.0),
        }
    }

    fn indices(&mut self, cell: &Cell, level: usize) -> String {
        let indices = (cell.indices.iter()).map(|index| match index {
            Index::Const(index) => index.to_string(),
            Index::Member(member) => format!("m{member}"),
            Index::Dynamic(expr) => format!("index_of({})", self.expr(expr, level)),
        });
        indices.collect::<Vec<_>>().join(", ")
    }

    /// Compile an expression with members `m0..m{level}` in scope.
    fn expr(&mut self, expr: &Expr, level: usize) -> String {
        match expr {
            Expr::Const(value) => float(*value),
            Expr::Member(member) if *member < level => format!("(m{member} as f64)"),
            Expr::Member(_) => "undefined()".to_owned(),
            Expr::Load(cell) => format!(
                "state.load({}, &[{}])",
                var_name(cell.var.0),
                self.indices(cell, level),
            ),
            Expr::Unary(op, operand) => {
                let operand = self.expr(operand, level);
                self.op(*op, "0.0".to_owned(), operand)
            }
            Expr::Binary(op, left, right) => {
                let left = self.expr(left, level);
                let right = self.expr(right, level);
                self.op(*op, left, right)
            }
            Expr::Call(intrinsic, args) => self.call(*intrinsic, args, level),
            Expr::Reduce(reduction, region, body) => {
                let function = match reduction {
                    Reduction::Min => "min_over",
                    Reduction::ArgMin => "arg_min_over",
                };
                let body = self.expr(body, level + 1);
                format!(
                    "{{ let key = rng.next_u64(); let base = rng.fork(key); \
                     intrinsics::{function}(state, {region}, |m{level}| {{ \
                     let mut rng = base.fork(m{level} as u64); {body} }}) }}",
                    region = self.region(*region),
                )
            }
        }
    }

    fn op(&mut self, op: Op, left: String, right: String) -> String {
        match op {
            Op::Add => format!("({left} + {right})"),
            Op::Sub => format!("({left} - {right})"),
            Op::Mul => format!("({left} * {right})"),
            Op::Div => format!("({left} / {right})"),
            Op::Mod => format!("intrinsics::rm({left}, {right})"),
            Op::Lt => format!("intrinsics::from_bool({left} < {right})"),
            Op::Gt => format!("intrinsics::from_bool({left} > {right})"),
            Op::Eq => format!("intrinsics::from_bool({left} == {right})"),
            Op::Neq => format!("intrinsics::from_bool({left} != {right})"),
            Op::Le => format!("intrinsics::from_bool({left} <= {right})"),
            Op::Ge => format!("intrinsics::from_bool({left} >= {right})"),
            // Both operands are evaluated, so that draws do not depend on
            // the value of the left operand.
            Op::And => format!(
                "intrinsics::from_bool(intrinsics::truthy({left}) & intrinsics::truthy({right}))"
            ),
            Op::Or => format!(
                "intrinsics::from_bool(intrinsics::truthy({left}) | intrinsics::truthy({right}))"
            ),
            Op::Not => format!("intrinsics::from_bool(!intrinsics::truthy({right}))"),
        }
    }

    fn call(&mut self, intrinsic: Intrinsic, args: &[Expr], level: usize) -> String {
        let args = (args.iter())
            .map(|arg| self.expr(arg, level))
            .collect::<Vec<_>>();
        match (intrinsic, args.as_slice()) {
            (Intrinsic::Round, [x]) => format!("intrinsics::round({x})"),
            // The bounds are drawn before the generator is borrowed.
            (Intrinsic::Random, [a, b]) => {
                format!("{{ let a = {a}; let b = {b}; intrinsics::random(&mut rng, a, b) }}")
            }
            (Intrinsic::EuclideanDistance, [x0, y0, x1, y1]) => {
                format!("intrinsics::euclidean_distance({x0}, {y0}, {x1}, {y1})")
            }
            (Intrinsic::If, [condition, yes, no]) => {
                format!("intrinsics::select({condition}, {yes}, {no})")
            }
            (Intrinsic::Rm, [a, b]) => format!("intrinsics::rm({a}, {b})"),
            (Intrinsic::Qt, [a, b]) => format!("intrinsics::qt({a}, {b})"),
            (Intrinsic::Collision, [x, y, ux, uy, delta]) => {
                format!("intrinsics::collision(state, {x}, {y}, {ux}, {uy}, {delta})")
            }
            _ => "undefined()".to_owned(),
        }
    }
}

fn region_name(label: i64) -> String {
    format!("REGION_{label}")
}

fn var_name(index: usize) -> String {
    format!("VAR_{index}")
}

fn float(value: f64) -> String {
    if value.is_nan() {
        "f64::NAN".to_owned()
    } else if value == f64::INFINITY {
        "f64::INFINITY".to_owned()
    } else if value == f64::NEG_INFINITY {
        "f64::NEG_INFINITY".to_owned()
    } else if value.is_sign_negative() {
        format!("({value:?})")
    } else {
        format!("{value:?}")
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
    use crate::symbol::Symbol;

    fn emit(source: &str) -> String {
        let file_id = FileId::try_from(1).unwrap();
        let limits = Limits::default();
        let mut symbols = SymbolTable::new();
        let program = parse_program(file_id, source, &mut symbols, &limits).unwrap();
        let ground = unroll(&program, Symbol::intern("main"), &mut symbols, &limits).unwrap();
        let program = crate::lower::lower(program.model, &ground, 64).unwrap();

        let mut output = Vec::new();
        Context::new(|_| Some(3))
            .emit_program(&mut output, &program)
            .unwrap();
        String::from_utf8(output).unwrap()
    }

    #[test]
    fn float_literals() {
        assert_eq!(float(5.0), "5.0");
        assert_eq!(float(-0.5), "(-0.5)");
        assert_eq!(float(1e20), "1e20");
        assert_eq!(float(f64::NAN), "f64::NAN");
        assert_eq!(float(f64::NEG_INFINITY), "f64::NEG_INFINITY");
    }

    #[test]
    fn one_function_per_rule() {
        let output = emit(
            "@model<m>
            def main() {
                @X{1} = 5;
                Y{i} <- X{1} + 1 : 1 <= i <= 2;
            }",
        );

        assert!(output.contains("//! Simulator for the `m` model."));
        assert!(output.contains("const CAPACITY: usize = 64;"));
        assert!(output.contains("fn init(state: &State) {"));
        assert!(output.contains("// line 3: Y{1} <- X{1} + 1"));
        assert!(output.contains("fn rule_0(state: &State, step: u64) {"));
        assert!(output.contains("fn rule_1(state: &State, step: u64) {"));
        assert!(output.contains("const RULES: &[fn(&State, u64)] = &[\n    rule_0,\n    rule_1,\n];"));
        assert!(output.contains("(state.load(VAR_0, &[1]) + 1.0)"));
        assert!(output.contains("Wall time: {:.6} seconds"));
    }

    #[test]
    fn membranes_and_region_loops() {
        let output = emit(
            "@model<m>
            def main() {
                @mu = [[]'2 []'3]'1;
                E{p} <- 8 : p in 2;
                M{0} <- min(E{q} : q in 1);
            }",
        );

        assert!(output.contains("const REGION_1: RegionId = RegionId(0);"));
        assert!(output.contains(".with_region(1)"));
        assert!(output.contains("state.declare_membrane(2, 1, "));
        assert!(output.contains("state.members(REGION_2).into_par_iter().for_each(|m0| {"));
        assert!(output.contains("let mut rng = state.rng(step, 0, m0);"));
        assert!(output.contains("intrinsics::min_over(state, REGION_1, |m0|"));
        assert!(!output.contains("render_output"));
    }

    #[test]
    fn guards_and_transitions() {
        let output = emit(
            "@model<m>
            def main() {
                X{1} <- 1, P{2};
                [P{2} -> P{3}]'1 ? X{1} > 0;
            }",
        );

        assert!(output.contains("    if state.protein() != 2 {\n        return;\n    }"));
        assert!(output.contains("if !intrinsics::truthy(intrinsics::from_bool(state.load(VAR_0, &[1]) > 0.0)) {"));
        assert!(output.contains("if state.protein() == 2 {"));
        assert!(output.contains("state.stage_protein(3);"));
    }
}
