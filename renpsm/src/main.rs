use std::path::PathBuf;

use clap::Parser;
use renpsm::lower::DEFAULT_CAPACITY;
use renpsm_runtime::options::Options;

/// A compiler from RENPSM membrane computing models to parallel simulators
#[derive(Parser)]
#[clap(author, version, about)]
enum Cli {
    /// Unroll a model, printing its ground program to stdout
    Unroll {
        /// Path to the model to unroll
        #[clap(long = "module", name = "MODULE_FILE", display_order = 0)]
        module_file: PathOrStdin,
        /// Definition to unroll from
        #[clap(long = "entry", default_value = "main", display_order = 1)]
        entry: String,
    },
    /// Generate a Rust simulator for a model, printing it to stdout
    #[clap(after_help = COMPILE_COMMAND_AFTER_HELP)]
    Compile {
        /// Path to the model to compile
        #[clap(long = "module", name = "MODULE_FILE", display_order = 0)]
        module_file: PathOrStdin,
        /// Definition to unroll from
        #[clap(long = "entry", default_value = "main", display_order = 1)]
        entry: String,
        /// Number of membrane slots
        #[clap(long = "capacity", default_value_t = DEFAULT_CAPACITY, display_order = 2)]
        capacity: usize,
    },
    /// Simulate a model in process
    Run {
        /// Path to the model to simulate
        #[clap(long = "module", name = "MODULE_FILE", display_order = 0)]
        module_file: PathOrStdin,
        /// Definition to unroll from
        #[clap(long = "entry", default_value = "main", display_order = 1)]
        entry: String,
        /// Number of membrane slots
        #[clap(long = "capacity", default_value_t = DEFAULT_CAPACITY, display_order = 2)]
        capacity: usize,
        /// Run without loading the occupancy map
        #[clap(long = "no-map", display_order = 3)]
        no_map: bool,
        #[clap(flatten)]
        options: Options,
    },
    /// Summarize the wall times of a benchmark log
    Summarize {
        /// Path to the benchmark log
        #[clap(name = "LOG_FILE")]
        log_file: PathOrStdin,
    },
}

const COMPILE_COMMAND_AFTER_HELP: &str = "\
Examples:

  $ renpsm compile --module models/rrt.renpsm > src/main.rs
  $ renpsm compile --module models/rrt.renpsm --entry explore --capacity 65536 > src/main.rs
";

#[derive(Clone, Debug)]
enum PathOrStdin {
    StdIn,
    Path(PathBuf),
}

impl std::str::FromStr for PathOrStdin {
    type Err = std::convert::Infallible;

    fn from_str(src: &str) -> Result<PathOrStdin, std::convert::Infallible> {
        match src {
            "-" => Ok(PathOrStdin::StdIn),
            _ => Ok(PathOrStdin::Path(PathBuf::from(src))),
        }
    }
}

fn unwrap_or_exit<T>(option: Option<T>) -> T {
    option.unwrap_or_else(|| std::process::exit(renpsm::Status::Error.exit_code()))
}

fn load_file_or_exit(driver: &mut renpsm::Driver, file: PathOrStdin) -> renpsm::files::FileId {
    unwrap_or_exit(match file {
        PathOrStdin::StdIn => driver.load_source("<stdin>".to_owned(), std::io::stdin()),
        PathOrStdin::Path(path) => driver.load_source_path(&path),
    })
}

const MAX_PRETTY_WIDTH: usize = 80;

fn get_pretty_width() -> usize {
    let term_width = termsize::get().map_or(usize::MAX, |size| usize::from(size.cols));
    std::cmp::min(term_width, MAX_PRETTY_WIDTH)
}

fn main() -> ! {
    match Cli::parse() {
        Cli::Unroll { module_file, entry } => {
            renpsm_runtime::init_logging(false);
            let mut driver = renpsm::Driver::new();
            driver.install_panic_hook();
            driver.set_emit_width(get_pretty_width());
            driver.set_entry(&entry);

            let file_id = load_file_or_exit(&mut driver, module_file);
            let status = driver.unroll_and_emit_program(file_id);

            std::process::exit(status.exit_code());
        }
        Cli::Compile {
            module_file,
            entry,
            capacity,
        } => {
            renpsm_runtime::init_logging(false);
            let mut driver = renpsm::Driver::new();
            driver.install_panic_hook();
            driver.set_entry(&entry);
            driver.set_capacity(capacity);

            let file_id = load_file_or_exit(&mut driver, module_file);
            let status = driver.compile_and_emit_program(file_id);

            std::process::exit(status.exit_code());
        }
        Cli::Run {
            module_file,
            entry,
            capacity,
            no_map,
            options,
        } => {
            renpsm_runtime::init_logging(options.debug);
            let mut driver = renpsm::Driver::new();
            driver.install_panic_hook();
            driver.set_entry(&entry);
            driver.set_capacity(capacity);

            let file_id = load_file_or_exit(&mut driver, module_file);
            let status = driver.run_program(file_id, &options, !no_map);

            std::process::exit(status.exit_code());
        }
        Cli::Summarize { log_file } => {
            renpsm_runtime::init_logging(false);
            let mut driver = renpsm::Driver::new();
            driver.install_panic_hook();

            let file_id = load_file_or_exit(&mut driver, log_file);
            let status = driver.summarize_log(file_id);

            std::process::exit(status.exit_code());
        }
    }
}
