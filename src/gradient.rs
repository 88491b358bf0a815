//! t-SNE gradient calculation.
//!
//! The low-dimensional similarities use a heavy-tailed Student-t kernel, which
//! lets moderately distant points sit far apart in the map. The gradient of
//! the KL divergence between the joint distributions `P` and `Q` then reduces
//! to a weighted sum of coordinate differences:
//!
//! `dY_i = Σ_j (P_ij − Q_ij) · num_ij · (y_i − y_j)`
//!
//! where `num_ij = 1 / (1 + ‖y_i − y_j‖²)`. Each row of the gradient only
//! reads the current embedding, so rows are computed in parallel.

use crate::affinity::PROBABILITY_FLOOR;
use crate::distance::student_t_kernel;
use ndarray::{Array2, ArrayView2, Zip};

/// Low-dimensional affinities for the current embedding.
pub struct LowDimAffinities {
    /// Unnormalized Student-t kernel with a zero diagonal
    pub num: Array2<f64>,

    /// Normalized affinities, floored at [`PROBABILITY_FLOOR`]
    pub q: Array2<f64>,
}

/// Computes the Student-t affinities `Q` of the embedding `y`.
///
/// # Arguments
/// * `y` - Current embedding coordinates as an n × k matrix
///
/// # Returns
/// The raw kernel and its normalized, floored counterpart
pub fn low_dim_affinities(y: ArrayView2<f64>) -> LowDimAffinities {
    let num = student_t_kernel(y);
    let total = num.sum();
    let q = num.mapv(|v| (v / total).max(PROBABILITY_FLOOR));
    LowDimAffinities { num, q }
}

/// Calculates the gradient of the KL divergence with respect to `y`.
///
/// # Arguments
/// * `y` - Current embedding coordinates as an n × k matrix
/// * `p` - Joint high-dimensional affinities (symmetric)
/// * `affinities` - Output of [`low_dim_affinities`] for the same `y`
///
/// # Returns
/// An n × k gradient matrix
pub fn tsne_grad(
    y: ArrayView2<f64>,
    p: ArrayView2<f64>,
    affinities: &LowDimAffinities,
) -> Array2<f64> {
    let mut grad = Array2::zeros(y.dim());

    Zip::from(grad.rows_mut())
        .and(y.rows())
        .and(p.rows())
        .and(affinities.q.rows())
        .and(affinities.num.rows())
        .par_for_each(|mut grad_i, y_i, p_i, q_i, num_i| {
            for (j, y_j) in y.rows().into_iter().enumerate() {
                let w = (p_i[j] - q_i[j]) * num_i[j];
                if w == 0.0 {
                    continue;
                }
                Zip::from(&mut grad_i)
                    .and(&y_i)
                    .and(&y_j)
                    .for_each(|g, &a, &b| *g += w * (a - b));
            }
        });

    grad
}

/// Kullback-Leibler divergence `Σ P · ln(P / Q)`.
///
/// Both matrices are expected to be floored, so the logarithm stays finite.
pub fn kl_divergence(p: ArrayView2<f64>, q: ArrayView2<f64>) -> f64 {
    Zip::from(p)
        .and(q)
        .fold(0.0, |acc, &p_ij, &q_ij| acc + p_ij * (p_ij / q_ij).ln())
}
