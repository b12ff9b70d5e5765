//! Error types

use thiserror::Error;

use crate::raster;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors raised while setting up or finishing a simulation.
///
/// Nothing in here is raised from inside a step: rule units never fail, they
/// degrade to undefined values instead.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Raster(#[from] raster::Error),

    #[error("membrane capacity {capacity} does not fit in the {bits}-bit parent field")]
    CapacityTooLarge { capacity: usize, bits: u32 },

    #[error("{count} region labels declared, but a membrane word only has room for {max}")]
    TooManyRegions { count: usize, max: usize },

    #[error("region label {label} is outside the membrane capacity ({capacity})")]
    LabelOutOfRange { label: i64, capacity: usize },

    #[error("variable `{name}` with dimensions {dims:?} is too large to allocate")]
    VariableTooLarge { name: String, dims: Vec<usize> },

    #[error("failed to build the worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("failed to seed the random number generator: {0}")]
    Entropy(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
