//! Runtime support for RENPSM simulators.
//!
//! Simulators emitted by the compiler link against this crate, and the
//! compiler's own in-process executor uses it too, so that both share one
//! implementation of the membrane storage, the step loop, the intrinsics, and
//! the occupancy maps.

use std::path::Path;

use tracing::info;
use tracing_subscriber::EnvFilter;

pub mod error;
pub mod intrinsics;
pub mod options;
pub mod prelude;
pub mod raster;
pub mod rng;
pub mod state;
pub mod step;

pub use crate::error::{Error, Result};

use crate::state::{RegionId, State, VarId};

/// Install a `tracing` subscriber that writes to stderr.
///
/// `RUST_LOG` takes precedence; otherwise only warnings are shown, or debug
/// events when `debug` is set. Installing a second subscriber is a no-op.
pub fn init_logging(debug: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if debug { "debug" } else { "warn" }));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Draw the membrane tree of the `root` region onto a copy of the occupancy
/// map and save it to `output`. Does nothing when no map was loaded.
pub fn render_output(
    state: &State,
    root: RegionId,
    position: VarId,
    output: impl AsRef<Path>,
) -> Result<()> {
    let Some(mut raster) = state.map().cloned() else {
        return Ok(());
    };
    let segments = state.draw_tree(&mut raster, root, position);
    raster.save(output.as_ref())?;
    info!(segments, output = %output.as_ref().display(), "saved output map");
    Ok(())
}
