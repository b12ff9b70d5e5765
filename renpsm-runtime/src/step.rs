//! The synchronous step loop shared by generated simulators and the
//! in-process executor.

use std::io::{self, BufRead, Write};

use tracing::{debug, info};

use crate::state::State;

#[derive(Copy, Clone, Debug)]
pub struct StepSettings {
    pub max_steps: u64,
    /// Print the state after every step and wait for ENTER.
    pub debug: bool,
}

/// Run steps until the halting variable is set or `max_steps` is reached,
/// returning the number of steps that were executed.
///
/// `dispatch` must run every rule unit of one step to completion before
/// returning. The staged protein becomes live between steps.
pub fn run_steps<F>(state: &State, settings: &StepSettings, mut dispatch: F) -> io::Result<u64>
where
    F: FnMut(&State, u64),
{
    let mut step = 0;
    while step < settings.max_steps && !state.halted() {
        if settings.debug {
            println!("\n------ STEP {} protein = {} ------", step + 1, state.protein());
        }
        debug!(step, protein = state.protein(), "step");

        dispatch(state, step);
        state.commit_protein();

        if settings.debug {
            pause(state)?;
        }
        step += 1;
    }

    info!(steps = step, halted = state.halted(), "simulation finished");
    Ok(step)
}

fn pause(state: &State) -> io::Result<()> {
    let stdout = io::stdout();
    let mut stdout = stdout.lock();
    state.dump(&mut stdout)?;
    write!(stdout, "\nPress ENTER for next step")?;
    stdout.flush()?;

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Layout;

    #[test]
    fn stops_at_the_ceiling() {
        let state = State::new(Layout::new(4)).unwrap();
        let settings = StepSettings {
            max_steps: 5,
            debug: false,
        };
        let mut seen = Vec::new();
        let steps = run_steps(&state, &settings, |_, step| seen.push(step)).unwrap();
        assert_eq!(steps, 5);
        assert_eq!(seen, [0, 1, 2, 3, 4]);
    }

    #[test]
    fn stops_when_halted() {
        let state = State::new(Layout::new(4).with_variable("Halt", &[1])).unwrap();
        let halt = state.layout().variable("Halt", 1).unwrap();
        let settings = StepSettings {
            max_steps: 100,
            debug: false,
        };
        let steps = run_steps(&state, &settings, |state, step| {
            if step == 2 {
                state.store(halt, &[0], 1.0);
            }
        })
        .unwrap();
        assert_eq!(steps, 3);
    }

    #[test]
    fn protein_is_committed_between_steps() {
        let state = State::new(Layout::new(4)).unwrap();
        let settings = StepSettings {
            max_steps: 3,
            debug: false,
        };
        let mut observed = Vec::new();
        run_steps(&state, &settings, |state, _| {
            observed.push(state.protein());
            state.stage_protein(state.protein() + 1);
            assert_eq!(state.protein(), observed[observed.len() - 1]);
        })
        .unwrap();
        assert_eq!(observed, [1, 2, 3]);
    }
}
