//! Iteration schedule of the t-SNE optimizer.
//!
//! Two switches happen at fixed iteration numbers, independent of the total
//! iteration count:
//! 1. Momentum rises from its initial to its final value once the embedding
//!    has had a few iterations to untangle
//! 2. Early exaggeration is removed by dividing `P` once, after which the
//!    optimizer works on the true affinities

use crate::Configuration;

/// Optimizer settings for one iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Schedule {
    /// Momentum applied to the velocity update
    pub momentum: f64,

    /// Whether `P` is divided by the exaggeration divisor after this iteration
    pub stop_lying: bool,

    /// Whether the cost is reported after this iteration
    pub report_cost: bool,
}

/// Number of iterations between cost reports.
const COST_INTERVAL: usize = 10;

/// Looks up the schedule for iteration `itr` (0-based).
///
/// # Arguments
/// * `config` - Optimizer configuration holding the switch points
/// * `itr` - Current iteration number
pub fn find_schedule(config: &Configuration, itr: usize) -> Schedule {
    let momentum = if itr < config.momentum_switch_iter {
        config.initial_momentum
    } else {
        config.final_momentum
    };

    Schedule {
        momentum,
        stop_lying: itr == config.stop_lying_iter,
        report_cost: (itr + 1) % COST_INTERVAL == 0,
    }
}
