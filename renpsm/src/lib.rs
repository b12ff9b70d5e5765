//! A compiler from RENPSM membrane computing models to parallel simulators.
//!
//! A model is parsed with constants folded as they are read, unrolled from
//! its entry definition into ground instructions, and lowered onto a fixed
//! storage layout. The lowered program can be simulated in process or emitted
//! as a standalone Rust program that links against `renpsm_runtime`.

pub mod core;
pub mod driver;
pub mod files;
pub mod lower;
pub mod pass;
pub mod reporting;
pub mod sim;
pub mod source;
pub mod summary;
pub mod surface;
pub mod symbol;

pub use crate::driver::{Driver, Status};
