//! Functions callable from rule expressions.
//!
//! Every value in a simulation is an `f64`, so the intrinsics take and return
//! `f64`s too, converting to integers where the operation calls for it.

use rayon::prelude::*;

use crate::rng::Rng;
use crate::state::{undefined, RegionId, State};

/// Grey values below this count as obstacles for [`collision`].
pub const OBSTACLE_THRESHOLD: u8 = 250;

pub fn truthy(value: f64) -> bool {
    value != 0.0
}

pub fn from_bool(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}

pub fn round(value: f64) -> f64 {
    value.round()
}

/// A random integer between `a` and `b`, both inclusive and in either order.
/// The bounds are truncated towards zero first.
pub fn random(rng: &mut Rng, a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        return undefined();
    }
    let (a, b) = (a.trunc() as i64, b.trunc() as i64);
    let (low, high) = if a <= b { (a, b) } else { (b, a) };
    rng.range_inclusive(low, high) as f64
}

pub fn euclidean_distance(x0: f64, y0: f64, x1: f64, y1: f64) -> f64 {
    ((x0 - x1) * (x0 - x1) + (y0 - y1) * (y0 - y1)).sqrt()
}

/// `yes` if `condition` rounds to something positive, `no` otherwise.
pub fn select(condition: f64, yes: f64, no: f64) -> f64 {
    if condition.round() > 0.0 {
        yes
    } else {
        no
    }
}

fn rounded_pair(a: f64, b: f64) -> Option<(i64, i64)> {
    let (a, b) = (a.round(), b.round());
    if a.is_finite() && b.is_finite() && b != 0.0 {
        Some((a as i64, b as i64))
    } else {
        None
    }
}

/// Truncating remainder of the operands rounded to integers.
pub fn rm(a: f64, b: f64) -> f64 {
    match rounded_pair(a, b) {
        Some((a, b)) => a.wrapping_rem(b) as f64,
        None => undefined(),
    }
}

/// Truncating quotient of the operands rounded to integers.
pub fn qt(a: f64, b: f64) -> f64 {
    match rounded_pair(a, b) {
        Some((a, b)) => a.wrapping_div(b) as f64,
        None => undefined(),
    }
}

/// Whether the segment from `(x, y)` along `(ux, uy) * delta` hits an
/// obstacle on the occupancy map. Without a map nothing ever collides.
pub fn collision(state: &State, x: f64, y: f64, ux: f64, uy: f64, delta: f64) -> f64 {
    let Some(map) = state.map() else {
        return 0.0;
    };
    let x0 = x.round() as i64;
    let y0 = y.round() as i64;
    let x1 = (x + ux * delta).round() as i64;
    let y1 = (y + uy * delta).round() as i64;
    from_bool(map.detect_obstacle(x0, y0, x1, y1, OBSTACLE_THRESHOLD))
}

/// The smallest defined value of `value(member)` over the members of
/// `region`, or undefined if there is none.
pub fn min_over<F>(state: &State, region: RegionId, value: F) -> f64
where
    F: Fn(usize) -> f64 + Sync + Send,
{
    (state.members(region).into_par_iter())
        .map(value)
        .filter(|value| !value.is_nan())
        .min_by(f64::total_cmp)
        .unwrap_or_else(undefined)
}

/// The member of `region` with the smallest defined value of
/// `value(member)`, or undefined if there is none.
///
/// Ties go to the lowest slot, not to the earliest registered member.
/// Membranes created in the same step register in whatever order the worker
/// threads reach them, so registration order is not reproducible from a seed.
pub fn arg_min_over<F>(state: &State, region: RegionId, value: F) -> f64
where
    F: Fn(usize) -> f64 + Sync + Send,
{
    (state.members(region).into_par_iter())
        .map(|member| (value(member), member))
        .filter(|(value, _)| !value.is_nan())
        .min_by(|(a, a_member), (b, b_member)| a.total_cmp(b).then(a_member.cmp(b_member)))
        .map_or_else(undefined, |(_, member)| member as f64)
}
