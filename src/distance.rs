//! Pairwise distance computations shared by calibration and optimization.
//!
//! High-dimensional distances use the Gram-matrix identity
//! `‖a − b‖² = ‖a‖² + ‖b‖² − 2 a·b`, which turns the whole matrix into one
//! matrix product. Low-dimensional kernels in the optimizer work on explicit
//! coordinate differences instead, see [`student_t_kernel`].

use ndarray::{Array2, ArrayView1, ArrayView2, Axis, Zip};

/// Computes the matrix of squared Euclidean distances between rows of `x`.
///
/// The diagonal is exactly zero and round-off below zero is clamped, so the
/// result is a valid distance matrix even when rows are nearly identical.
///
/// # Arguments
/// * `x` - Data matrix where each row is a point
///
/// # Returns
/// A symmetric `n × n` matrix
pub fn squared_distances(x: ArrayView2<f64>) -> Array2<f64> {
    let sum_x = x.map_axis(Axis(1), |row| row.dot(&row));
    let gram = x.dot(&x.t());

    Zip::indexed(&gram).par_map_collect(|(i, j), &g| {
        if i == j {
            0.0
        } else {
            (sum_x[i] + sum_x[j] - 2.0 * g).max(0.0)
        }
    })
}

/// Squared Euclidean distance between two coordinate rows.
pub fn squared_euclidean(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(a, b)| (a - b).powi(2)).sum()
}

/// Computes the unnormalized Student-t kernel `1 / (1 + ‖y_i − y_j‖²)` for
/// all pairs of rows of `y`, with a zero diagonal.
///
/// # Arguments
/// * `y` - Current embedding coordinates
///
/// # Returns
/// A symmetric `n × n` matrix of kernel values in `(0, 1]`
pub fn student_t_kernel(y: ArrayView2<f64>) -> Array2<f64> {
    let n = y.nrows();
    let mut num = Array2::zeros((n, n));
    Zip::indexed(&mut num).par_for_each(|(i, j), num_ij| {
        if i != j {
            *num_ij = 1.0 / (1.0 + squared_euclidean(y.row(i), y.row(j)));
        }
    });
    num
}
