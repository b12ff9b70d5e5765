//! Command line options of a simulator.

use std::io::{self, Write};
use std::path::PathBuf;

use clap::Parser;

use crate::error::Result;
use crate::rng::entropy_seed;
use crate::step::StepSettings;

pub const DEFAULT_MAX_STEPS: u64 = 1 << 20;
pub const DEFAULT_THREADS: usize = 4;

#[derive(Clone, Debug, clap::Args)]
pub struct Options {
    /// Print the state after every step and wait for ENTER
    #[clap(short = 'd', long = "debug")]
    pub debug: bool,
    /// Number of worker threads
    #[clap(short = 't', long = "threads", default_value_t = DEFAULT_THREADS)]
    pub threads: usize,
    /// Maximum number of steps to simulate
    #[clap(short = 's', long = "steps", default_value_t = DEFAULT_MAX_STEPS)]
    pub steps: u64,
    /// Occupancy map to plan on
    #[clap(short = 'm', long = "map", default_value = "office.pgm")]
    pub map: PathBuf,
    /// Where to save the map with the explored tree drawn on it
    #[clap(short = 'o', long = "output", default_value = "out.pgm")]
    pub output: PathBuf,
    /// Random seed, drawn from the operating system when omitted
    #[clap(short = 'r', long = "seed")]
    pub seed: Option<u64>,
}

#[derive(Parser)]
#[clap(about = "Generated RENPSM simulator")]
struct SimulatorCli {
    #[clap(flatten)]
    options: Options,
}

impl Options {
    /// Parse the options of a generated simulator from the process arguments.
    pub fn from_args() -> Options {
        SimulatorCli::parse().options
    }

    pub fn seed(&self) -> Result<u64> {
        match self.seed {
            Some(seed) => Ok(seed),
            None => entropy_seed(),
        }
    }

    pub fn step_settings(&self) -> StepSettings {
        StepSettings {
            max_steps: self.steps,
            debug: self.debug,
        }
    }

    /// A worker pool with the requested number of threads. Zero lets rayon
    /// pick one thread per core.
    pub fn thread_pool(&self) -> Result<rayon::ThreadPool> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.threads)
            .build()?;
        Ok(pool)
    }

    pub fn print_header(&self, mut out: impl Write, seed: u64) -> io::Result<()> {
        writeln!(out, "RENPSM simulator")?;
        writeln!(out, "DEBUG: {}", u8::from(self.debug))?;
        writeln!(out, "THREADS: {}", self.threads)?;
        writeln!(out, "STEPS: {}", self.steps)?;
        writeln!(out, "MAP: {}", self.map.display())?;
        writeln!(out, "OUTPUT: {}", self.output.display())?;
        writeln!(out, "SEED: {seed}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Options {
        let args = std::iter::once("sim").chain(args.iter().copied());
        SimulatorCli::try_parse_from(args).unwrap().options
    }

    #[test]
    fn defaults() {
        let options = parse(&[]);
        assert!(!options.debug);
        assert_eq!(options.threads, 4);
        assert_eq!(options.steps, 1048576);
        assert_eq!(options.map, PathBuf::from("office.pgm"));
        assert_eq!(options.output, PathBuf::from("out.pgm"));
        assert_eq!(options.seed, None);
    }

    #[test]
    fn short_flags() {
        let options = parse(&["-d", "-t", "2", "-s", "10", "-m", "a.pgm", "-o", "b.pgm", "-r", "9"]);
        assert!(options.debug);
        assert_eq!(options.threads, 2);
        assert_eq!(options.steps, 10);
        assert_eq!(options.map, PathBuf::from("a.pgm"));
        assert_eq!(options.output, PathBuf::from("b.pgm"));
        assert_eq!(options.seed().unwrap(), 9);
    }
}
