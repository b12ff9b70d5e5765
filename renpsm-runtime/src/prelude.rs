//! Everything a generated simulator needs in scope.

pub use rayon::prelude::*;

pub use crate::error::{Error, Result};
pub use crate::intrinsics;
pub use crate::options::Options;
pub use crate::raster::Raster;
pub use crate::rng::{INIT_STEP, NO_MEMBER};
pub use crate::state::{index_of, undefined, Layout, RegionId, State, VarId};
pub use crate::step::{run_steps, StepSettings};
pub use crate::{init_logging, render_output};
