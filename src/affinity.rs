//! Calibration of high-dimensional affinities.
//!
//! Every point gets its own Gaussian kernel whose precision `beta` is tuned by
//! bisection until the entropy of the point's conditional distribution over
//! its neighbors equals `ln(perplexity)`. The resulting conditional matrix is
//! then symmetrized into the joint distribution the optimizer matches.
//!
//! Rows are independent of each other, so the search runs in parallel over a
//! shared read-only distance matrix.

use crate::distance::squared_distances;
use crate::DsneError;
use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2, Axis, Zip};
use rayon::prelude::*;
use tracing::{debug, trace};

/// Smallest value any joint probability is allowed to take.
pub const PROBABILITY_FLOOR: f64 = 1e-12;

/// Computes the entropy and normalized probability row for one precision.
///
/// # Arguments
/// * `distances` - Squared distances from one point to every other point, the
///   point itself excluded
/// * `beta` - Precision of the Gaussian kernel
///
/// # Returns
/// `Some((entropy, probabilities))`, or `None` if the kernel weights sum to
/// zero (or overflow) so no distribution can be formed
pub fn hbeta(distances: ArrayView1<f64>, beta: f64) -> Option<(f64, Array1<f64>)> {
    let weights = distances.mapv(|d| (-d * beta).exp());
    let sum_p = weights.sum();
    if !(sum_p > 0.0 && sum_p.is_finite()) {
        return None;
    }

    let entropy = sum_p.ln() + beta * distances.dot(&weights) / sum_p;
    if !entropy.is_finite() {
        return None;
    }

    Some((entropy, weights / sum_p))
}

/// Outcome of the precision search for a single point.
#[derive(Debug, Clone)]
pub(crate) struct RowSearch {
    /// Conditional probabilities over the other points
    pub probabilities: Array1<f64>,

    /// Precision that produced `probabilities`
    pub beta: f64,

    /// Distance between the achieved entropy and `ln(perplexity)`
    pub entropy_diff: f64,

    /// Number of precision adjustments made
    pub tries: usize,
}

/// Bisects the kernel precision for one point.
///
/// Starts from `beta = 1`. Entropy that is too high means the kernel is too
/// wide, so the precision grows (doubling until an upper bound is known);
/// entropy that is too low shrinks it (halving until a lower bound is known).
/// Once both bounds exist each step moves to the midpoint.
///
/// A precision whose kernel weights underflow is treated as too large. This
/// happens when a point has more tied nearest neighbors than the perplexity
/// allows, so the target entropy can only be approached from below.
///
/// Running out of tries is accepted and the last finite row is kept.
///
/// # Returns
/// `None` if no precision tried produced a finite row
pub(crate) fn search_precision(
    distances: ArrayView1<f64>,
    log_perplexity: f64,
    tolerance: f64,
    max_tries: usize,
) -> Option<RowSearch> {
    let mut beta = 1.0;
    let mut beta_min = f64::NEG_INFINITY;
    let mut beta_max = f64::INFINITY;
    let mut best: Option<(Array1<f64>, f64, f64)> = None;
    let mut tries = 0;

    loop {
        let too_wide = match hbeta(distances, beta) {
            Some((entropy, probabilities)) => {
                let entropy_diff = entropy - log_perplexity;
                best = Some((probabilities, beta, entropy_diff));
                if entropy_diff.abs() <= tolerance {
                    break;
                }
                entropy_diff > 0.0
            }
            // Weights underflowed, so the precision is too large
            None => false,
        };
        if tries >= max_tries {
            break;
        }

        if too_wide {
            beta_min = beta;
            beta = if beta_max.is_infinite() {
                beta * 2.0
            } else {
                (beta + beta_max) / 2.0
            };
        } else {
            beta_max = beta;
            beta = if beta_min.is_infinite() {
                beta / 2.0
            } else {
                (beta + beta_min) / 2.0
            };
        }
        tries += 1;
    }

    let (probabilities, beta, entropy_diff) = best?;
    Some(RowSearch {
        probabilities,
        beta,
        entropy_diff,
        tries,
    })
}

/// Computes the conditional probability matrix of `x` for a target
/// perplexity.
///
/// Row `i` holds `p(j | i)` for every `j ≠ i` and sums to one; the diagonal
/// is zero. The matrix is not symmetric, see [`joint_probabilities`].
///
/// # Arguments
/// * `x` - Data matrix where each row is a point
/// * `tolerance` - Accepted deviation of the entropy from `ln(perplexity)`
/// * `perplexity` - Effective number of neighbors per point
///
/// # Errors
/// * `DsneError::SampleSize` - `x` has fewer than two rows
/// * `DsneError::InvalidPerplexity` - `perplexity` is not a positive finite
///   number
/// * `DsneError::DegenerateAffinity` - a point's kernel weights vanish for
///   every precision tried
pub fn calibrate_affinities(
    x: ArrayView2<f64>,
    tolerance: f64,
    perplexity: f64,
) -> Result<Array2<f64>, DsneError> {
    calibrate_with_tries(x, tolerance, perplexity, 50)
}

/// [`calibrate_affinities`] with a configurable search budget per point.
pub(crate) fn calibrate_with_tries(
    x: ArrayView2<f64>,
    tolerance: f64,
    perplexity: f64,
    max_tries: usize,
) -> Result<Array2<f64>, DsneError> {
    let n = x.nrows();
    if n < 2 {
        return Err(DsneError::SampleSize);
    }
    if !(perplexity > 0.0 && perplexity.is_finite()) {
        return Err(DsneError::InvalidPerplexity(perplexity));
    }

    debug!("Computing pairwise distances");
    let distances = squared_distances(x);
    let log_perplexity = perplexity.ln();

    let rows = (0..n)
        .into_par_iter()
        .map(|i| {
            let others = without_self(distances.row(i), i);
            let row = search_precision(others.view(), log_perplexity, tolerance, max_tries)
                .ok_or(i)?;
            if row.tries >= max_tries && row.entropy_diff.abs() > tolerance {
                trace!(
                    point = i,
                    entropy_diff = row.entropy_diff,
                    "Perplexity search stopped without converging"
                );
            }
            Ok(row)
        })
        .collect::<Result<Vec<_>, usize>>()
        .map_err(|point| DsneError::DegenerateAffinity { point })?;

    let mut p = Array2::zeros((n, n));
    for (i, (mut p_row, row)) in p.rows_mut().into_iter().zip(&rows).enumerate() {
        p_row.slice_mut(s![..i]).assign(&row.probabilities.slice(s![..i]));
        p_row
            .slice_mut(s![i + 1..])
            .assign(&row.probabilities.slice(s![i..]));
    }

    #[allow(clippy::cast_precision_loss)]
    let mean_sigma = rows.iter().map(|r| (1.0 / r.beta).sqrt()).sum::<f64>() / n as f64;
    debug!("Mean value of sigma: {mean_sigma}");

    Ok(p)
}

/// Copies a distance row with entry `i` removed.
fn without_self(row: ArrayView1<f64>, i: usize) -> Array1<f64> {
    row.iter()
        .enumerate()
        .filter_map(|(j, &d)| (j != i).then_some(d))
        .collect()
}

/// Turns conditional probabilities into the joint distribution.
///
/// Computes `P + Pᵀ`, normalizes it to sum to one, multiplies it by
/// `exaggeration`, and finally raises every entry to at least
/// [`PROBABILITY_FLOOR`]. Pass an `exaggeration` of `1.0` for the plain joint
/// distribution.
pub fn joint_probabilities(conditional: ArrayView2<f64>, exaggeration: f64) -> Array2<f64> {
    let mut p = &conditional + &conditional.t();
    let scale = exaggeration / p.sum();
    Zip::from(&mut p).par_for_each(|p_ij| {
        *p_ij = (*p_ij * scale).max(PROBABILITY_FLOOR);
    });
    p
}

/// Returns `true` if every entry is a finite number.
pub(crate) fn all_finite(m: ArrayView2<f64>) -> bool {
    m.axis_iter(Axis(0))
        .into_par_iter()
        .all(|row| row.iter().all(|v| v.is_finite()))
}
