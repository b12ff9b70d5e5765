use std::cell::RefCell;
use std::io::{self, Read, Write};
use std::path::Path;
use std::time::Instant;

use codespan_reporting::diagnostic::Diagnostic;
use codespan_reporting::term::termcolor::{BufferedStandardStream, ColorChoice, WriteColor};
use renpsm_runtime::options::Options;
use renpsm_runtime::raster::Raster;
use renpsm_runtime::state::State;
use tracing::info;

use crate::core::symbols::SymbolTable;
use crate::core::unroll::unroll;
use crate::core::{pretty, Definition, Limits, Program};
use crate::files::{FileId, Files};
use crate::lower::{self, DEFAULT_CAPACITY};
use crate::pass::sim_to_rust;
use crate::reporting::Message;
use crate::sim::machine::Machine;
use crate::symbol::Symbol;
use crate::{sim, summary, surface};

#[derive(Debug, Copy, Clone)]
pub enum Status {
    Ok,
    Error,
}

impl Status {
    pub fn exit_code(self) -> i32 {
        match self {
            Status::Ok => 0,
            Status::Error => 1,
        }
    }
}

pub struct Driver {
    files: Files,

    limits: Limits,
    capacity: usize,
    entry: Symbol,

    codespan_config: codespan_reporting::term::Config,
    diagnostic_writer: RefCell<Box<dyn WriteColor>>,

    emit_width: usize,
    emit_writer: RefCell<Box<dyn WriteColor>>,
}

impl Driver {
    pub fn new() -> Driver {
        Driver {
            files: Files::new(),

            limits: Limits::default(),
            capacity: DEFAULT_CAPACITY,
            entry: Symbol::intern_static("main"),

            codespan_config: codespan_reporting::term::Config::default(),
            diagnostic_writer: RefCell::new(Box::new(BufferedStandardStream::stderr(
                if atty::is(atty::Stream::Stderr) {
                    ColorChoice::Auto
                } else {
                    ColorChoice::Never
                },
            ))),

            emit_width: usize::MAX,
            emit_writer: RefCell::new(Box::new(BufferedStandardStream::stdout(
                if atty::is(atty::Stream::Stdout) {
                    ColorChoice::Auto
                } else {
                    ColorChoice::Never
                },
            ))),
        }
    }

    /// Setup a global panic hook
    pub fn install_panic_hook(&self) {
        // Use the currently set codespan configuration
        let term_config = self.codespan_config.clone();
        // Fetch the default hook (which prints the panic message and an optional backtrace)
        let default_hook = std::panic::take_hook();

        std::panic::set_hook(Box::new(move |info| {
            let location = info.location();
            let message = if let Some(message) = info.payload().downcast_ref::<String>() {
                message.as_str()
            } else if let Some(message) = info.payload().downcast_ref::<&str>() {
                message
            } else {
                "unknown panic type"
            };

            let diagnostic = Diagnostic::bug()
                .with_message(format!("compiler panicked at '{message}'"))
                .with_notes(vec![
                    match location {
                        Some(location) => format!("panicked at: {location}"),
                        None => "panicked at: unknown location".to_owned(),
                    },
                    "please file a bug report that includes the model source".to_owned(),
                ]);

            let mut writer = BufferedStandardStream::stderr(if atty::is(atty::Stream::Stderr) {
                ColorChoice::Auto
            } else {
                ColorChoice::Never
            });
            let dummy_files = Files::new();

            default_hook(info);
            eprintln!();
            // The hook has nowhere left to report a failure to
            let _ =
                codespan_reporting::term::emit(&mut writer, &term_config, &dummy_files, &diagnostic);
            let _ = writer.flush();
        }));
    }

    /// Set the compile-time capacities
    pub fn set_limits(&mut self, limits: Limits) {
        self.limits = limits;
    }

    /// Set the number of membrane slots of lowered programs
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
    }

    /// Set the definition that programs are unrolled from
    pub fn set_entry(&mut self, entry: &str) {
        self.entry = Symbol::intern(entry);
    }

    /// Set the writer to use when rendering diagnostics
    pub fn set_diagnostic_writer(&mut self, stream: impl 'static + WriteColor) {
        self.diagnostic_writer = RefCell::new(Box::new(stream) as Box<dyn WriteColor>);
    }

    /// Set the width to use when emitting ground programs
    pub fn set_emit_width(&mut self, emit_width: usize) {
        self.emit_width = emit_width;
    }

    /// Set the writer to use when emitting programs and reports
    pub fn set_emit_writer(&mut self, stream: impl 'static + WriteColor) {
        self.emit_writer = RefCell::new(Box::new(stream) as Box<dyn WriteColor>);
    }

    /// Load a source string into the file database.
    pub fn load_source_string(&mut self, name: String, source: String) -> FileId {
        self.files.add(name, source)
    }

    /// Load a source file into the file database using a reader.
    pub fn load_source(&mut self, name: String, mut reader: impl Read) -> Option<FileId> {
        let mut source = String::new();
        match reader.read_to_string(&mut source) {
            Ok(_) => Some(self.load_source_string(name, source)),
            Err(error) => {
                self.emit_read_diagnostic(name, error);
                None
            }
        }
    }

    /// Load a source file into the file database from the given path.
    pub fn load_source_path(&mut self, path: &Path) -> Option<FileId> {
        match std::fs::File::open(path) {
            Ok(file) => self.load_source(path.display().to_string(), file),
            Err(error) => {
                self.emit_read_diagnostic(path.display(), error);
                None
            }
        }
    }

    /// Print the ground program of the entry definition.
    pub fn unroll_and_emit_program(&mut self, file_id: FileId) -> Status {
        let Some((program, ground)) = self.ground_program(file_id) else {
            return Status::Error;
        };

        let ground = Program {
            model: program.model,
            definitions: vec![ground],
        };
        let doc = pretty::Context::new().program(&ground);
        self.emit_text(&doc.pretty(self.emit_width).to_string())
    }

    /// Print a standalone Rust simulator for the entry definition.
    pub fn compile_and_emit_program(&mut self, file_id: FileId) -> Status {
        let Some(program) = self.lower_program(file_id) else {
            return Status::Error;
        };

        let files = &self.files;
        let mut context = sim_to_rust::Context::new(|span| {
            let range = span.range()?;
            files.line_number(range.file_id(), range.start() as usize)
        });
        let mut output = Vec::new();
        if let Err(error) = context.emit_program(&mut output, &program) {
            self.emit_io_diagnostic("failed to emit the simulator", error);
            return Status::Error;
        }
        self.emit_text(&String::from_utf8_lossy(&output))
    }

    /// Simulate the entry definition in process.
    ///
    /// The occupancy map is only loaded when `use_map` is set, so that models
    /// that never check for collisions can be run without one.
    pub fn run_program(&mut self, file_id: FileId, options: &Options, use_map: bool) -> Status {
        let Some(program) = self.lower_program(file_id) else {
            return Status::Error;
        };

        match self.simulate(&program, options, use_map) {
            Ok(()) => Status::Ok,
            Err(message) => {
                self.emit_diagnostic(message.to_diagnostic());
                Status::Error
            }
        }
    }

    /// Print mean wall times and speed-ups of a benchmark log.
    pub fn summarize_log(&mut self, file_id: FileId) -> Status {
        let source = match self.files.get(file_id) {
            Ok(file) => file.source(),
            Err(error) => {
                self.emit_diagnostic(Diagnostic::bug().with_message(error.to_string()));
                return Status::Error;
            }
        };

        let samples = match summary::parse_log(file_id, source) {
            Ok(samples) => samples,
            Err(message) => {
                self.emit_diagnostic(message.to_diagnostic());
                return Status::Error;
            }
        };

        let mut output = Vec::new();
        let rows = summary::summarize(&samples);
        if let Err(error) = summary::emit_rows(&mut output, &rows) {
            self.emit_io_diagnostic("failed to print the summary", error);
            return Status::Error;
        }
        self.emit_text(&String::from_utf8_lossy(&output))
    }

    fn simulate(
        &self,
        program: &sim::Program,
        options: &Options,
        use_map: bool,
    ) -> Result<(), Message> {
        let seed = options.seed()?;
        self.write_output(|writer| options.print_header(writer, seed))?;

        let mut state = State::new(program.layout.clone())?.with_seed(seed);
        if use_map {
            let map = Raster::load(&options.map).map_err(renpsm_runtime::Error::from)?;
            state = state.with_map(map);
        }

        let machine = Machine::new(program, state);
        machine.initialise();

        let pool = options.thread_pool()?;
        let settings = options.step_settings();
        let start = Instant::now();
        let steps = (pool.install(|| machine.run(&settings))).map_err(renpsm_runtime::Error::from)?;
        let elapsed = start.elapsed();
        info!(steps, seconds = elapsed.as_secs_f64(), "simulated program");

        self.write_output(|writer| {
            writeln!(writer, "Steps: {steps}")?;
            writeln!(writer, "Wall time: {:.6} seconds", elapsed.as_secs_f64())
        })?;

        if let (Some(root), Some(position)) = (program.root, program.position) {
            renpsm_runtime::render_output(machine.state(), root, position, &options.output)?;
        }

        Ok(())
    }

    fn write_output(
        &self,
        write: impl FnOnce(&mut dyn Write) -> io::Result<()>,
    ) -> Result<(), Message> {
        let mut emit_writer = self.emit_writer.borrow_mut();
        write(&mut *emit_writer)
            .and_then(|()| emit_writer.flush())
            .map_err(|error| renpsm_runtime::Error::from(error).into())
    }

    fn ground_program(&self, file_id: FileId) -> Option<(Program, Definition)> {
        let source = self.files.get(file_id).ok()?.source();
        let mut symbols = SymbolTable::new();

        let result = surface::parse_program(file_id, source, &mut symbols, &self.limits)
            .and_then(|program| {
                let ground = unroll(&program, self.entry, &mut symbols, &self.limits)?;
                Ok((program, ground))
            });
        self.report(result)
    }

    fn lower_program(&self, file_id: FileId) -> Option<sim::Program> {
        let (program, ground) = self.ground_program(file_id)?;
        self.report(lower::lower(program.model, &ground, self.capacity))
    }

    fn report<T>(&self, result: Result<T, Message>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(message) => {
                self.emit_diagnostic(message.to_diagnostic());
                None
            }
        }
    }

    fn emit_text(&self, text: &str) -> Status {
        let mut emit_writer = self.emit_writer.borrow_mut();
        match write!(emit_writer, "{text}").and_then(|()| emit_writer.flush()) {
            Ok(()) => Status::Ok,
            Err(error) => {
                drop(emit_writer);
                self.emit_io_diagnostic("failed to write the output", error);
                Status::Error
            }
        }
    }

    fn emit_diagnostic(&self, diagnostic: Diagnostic<FileId>) {
        let mut writer = self.diagnostic_writer.borrow_mut();
        let config = &self.codespan_config;

        // Nothing sensible is left to do if stderr is gone
        let _ = codespan_reporting::term::emit(&mut *writer, config, &self.files, &diagnostic);
        let _ = writer.flush();
    }

    fn emit_read_diagnostic(&self, name: impl std::fmt::Display, error: io::Error) {
        let diagnostic =
            Diagnostic::error().with_message(format!("couldn't read `{name}`: {error}"));
        self.emit_diagnostic(diagnostic);
    }

    fn emit_io_diagnostic(&self, message: &str, error: io::Error) {
        self.emit_diagnostic(Diagnostic::error().with_message(format!("{message}: {error}")));
    }
}

impl Default for Driver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use codespan_reporting::term::termcolor::ColorSpec;

    use super::*;

    /// A writer whose contents can be read back after the driver is done.
    #[derive(Clone, Default)]
    struct SharedBuffer(std::rc::Rc<RefCell<Vec<u8>>>);

    impl SharedBuffer {
        fn contents(&self) -> String {
            String::from_utf8(self.0.borrow().clone()).unwrap()
        }
    }

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.borrow_mut().write(buf)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl WriteColor for SharedBuffer {
        fn supports_color(&self) -> bool {
            false
        }

        fn set_color(&mut self, _: &ColorSpec) -> std::io::Result<()> {
            Ok(())
        }

        fn reset(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn driver() -> (Driver, SharedBuffer, SharedBuffer) {
        let stdout = SharedBuffer::default();
        let stderr = SharedBuffer::default();
        let mut driver = Driver::new();
        driver.set_emit_writer(stdout.clone());
        driver.set_diagnostic_writer(stderr.clone());
        driver.set_capacity(64);
        (driver, stdout, stderr)
    }

    #[test]
    fn unroll_prints_the_ground_program() {
        let (mut driver, stdout, stderr) = driver();
        let source = "@model<m>\ndef main() {\n    X{i} <- i : 1 <= i <= 2;\n}\n";
        let file_id = driver.load_source_string("model.renpsm".to_owned(), source.to_owned());

        let status = driver.unroll_and_emit_program(file_id);
        assert_eq!(status.exit_code(), 0);
        assert_eq!(
            stdout.contents(),
            "@model<m>\n\ndef main() {\n    X{1} <- 1;\n    X{2} <- 2;\n}\n",
        );
        assert_eq!(stderr.contents(), "");
    }

    #[test]
    fn errors_are_reported_as_diagnostics() {
        let (mut driver, stdout, stderr) = driver();
        driver.set_entry("mian");
        let source = "@model<m>\ndef main() {\n    X{1} <- 1;\n}\n";
        let file_id = driver.load_source_string("model.renpsm".to_owned(), source.to_owned());

        let status = driver.unroll_and_emit_program(file_id);
        assert_eq!(status.exit_code(), 1);
        assert_eq!(stdout.contents(), "");
        assert!(stderr.contents().contains("main"));
    }

    #[test]
    fn compile_annotates_rules_with_lines() {
        let (mut driver, stdout, _) = driver();
        let source = "@model<m>\ndef main() {\n    X{1} <- 1;\n}\n";
        let file_id = driver.load_source_string("model.renpsm".to_owned(), source.to_owned());

        let status = driver.compile_and_emit_program(file_id);
        assert_eq!(status.exit_code(), 0);
        assert!(stdout.contents().contains("// line 3: X{1} <- 1\nfn rule_0("));
    }

    #[test]
    fn run_without_a_map() {
        let (mut driver, stdout, stderr) = driver();
        let source = "@model<m>\ndef main() {\n    Halt{0} <- 1;\n}\n";
        let file_id = driver.load_source_string("model.renpsm".to_owned(), source.to_owned());
        let options = Options {
            debug: false,
            threads: 1,
            steps: 10,
            map: "missing.pgm".into(),
            output: "unused.pgm".into(),
            seed: Some(3),
        };

        let status = driver.run_program(file_id, &options, false);
        assert_eq!(status.exit_code(), 0, "{}", stderr.contents());
        assert!(stdout.contents().starts_with("RENPSM simulator\n"));
        assert!(stdout.contents().contains("SEED: 3\n"));
        assert!(stdout.contents().contains("Steps: 1\n"));
    }

    #[test]
    fn run_with_a_map_saves_the_tree() {
        let (mut driver, stdout, stderr) = driver();
        let source = "@model<tree>
            def main() {
                @mu = [[]'2]'1;
                @Y{1, 2} = 5;
                @Y{2, 2} = 5;
                Halt{0} <- 1;
            }";
        let file_id = driver.load_source_string("tree.renpsm".to_owned(), source.to_owned());

        let dir = tempfile::tempdir().unwrap();
        let map = dir.path().join("map.pgm");
        let output = dir.path().join("out.pgm");
        Raster::new(16, 16, 255).save(&map).unwrap();
        let options = Options {
            debug: false,
            threads: 2,
            steps: 10,
            map,
            output: output.clone(),
            seed: Some(11),
        };

        let status = driver.run_program(file_id, &options, true);
        assert_eq!(status.exit_code(), 0, "{}", stderr.contents());
        assert!(stdout.contents().contains("Steps: 1\n"));
        let saved = Raster::load(&output).unwrap();
        assert_eq!((saved.width(), saved.height()), (16, 16));
    }

    #[test]
    fn missing_maps_are_reported() {
        let (mut driver, _, stderr) = driver();
        let source = "@model<m>\ndef main() {\n    Halt{0} <- 1;\n}\n";
        let file_id = driver.load_source_string("model.renpsm".to_owned(), source.to_owned());
        let options = Options {
            debug: false,
            threads: 1,
            steps: 10,
            map: "no/such/map.pgm".into(),
            output: "unused.pgm".into(),
            seed: Some(1),
        };

        let status = driver.run_program(file_id, &options, true);
        assert_eq!(status.exit_code(), 1);
        let stderr = stderr.contents();
        assert!(stderr.contains("error: cannot open `no/such/map.pgm`"), "{stderr}");
        assert!(stderr.contains("help: pass `--no-map`"), "{stderr}");
    }

    #[test]
    fn summarize_prints_one_row_per_thread_count() {
        let (mut driver, stdout, _) = driver();
        let log = "Threads: 1 Iteration: 1\nWall time: 2.0 seconds\nThreads: 4 Iteration: 1\nWall time: 1.0 seconds\n";
        let file_id = driver.load_source_string("bench.log".to_owned(), log.to_owned());

        let status = driver.summarize_log(file_id);
        assert_eq!(status.exit_code(), 0);
        assert_eq!(stdout.contents().lines().count(), 2);
        assert!(stdout.contents().contains("Threads: 4. Samples: 1. Average time: 1.000000 seconds"));
    }

    #[test]
    fn missing_files_are_reported() {
        let (mut driver, _, stderr) = driver();
        assert!(driver.load_source_path(Path::new("no/such/model.renpsm")).is_none());
        assert!(stderr.contents().contains("couldn't read `no/such/model.renpsm`"));
    }
}
