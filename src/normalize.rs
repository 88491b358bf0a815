//! Column normalization applied to raw features before PCA.
//!
//! The whole matrix is first shifted by its global minimum and divided by its
//! global range, so every value lands in `[0, 1]`. Each column is then
//! centered on its own mean. The min/max are taken over the entire matrix, not
//! per column, so a column with a narrow spread stays narrow after scaling.

use crate::DsneError;
use ndarray::{Array2, ArrayView2, Axis};
use tracing::debug;

/// Rescales `x` by its global range and centers every column.
///
/// # Arguments
/// * `x` - Feature matrix where each row is a sample
///
/// # Returns
/// A new matrix of the same shape; `x` is left untouched
///
/// # Errors
/// * `DsneError::EmptyArrayMinMax` - `x` has no elements
/// * `DsneError::ZeroRange` - every element of `x` has the same value
/// * `DsneError::EmptyArrayMean` - column means cannot be computed
pub fn normalize(x: ArrayView2<f64>) -> Result<Array2<f64>, DsneError> {
    let x_min = *x
        .iter()
        .min_by(|&a, &b| f64::total_cmp(a, b))
        .ok_or(DsneError::EmptyArrayMinMax)?;

    let x_max = *x
        .iter()
        .max_by(|&a, &b| f64::total_cmp(a, b))
        .ok_or(DsneError::EmptyArrayMinMax)?;

    let range = x_max - x_min;
    if range == 0.0 || !range.is_finite() {
        return Err(DsneError::ZeroRange);
    }

    let mut x_out = x.mapv(|val| (val - x_min) / range);

    let x_mean = x_out
        .mean_axis(Axis(0))
        .ok_or(DsneError::EmptyArrayMean)?;
    x_out -= &x_mean;

    debug!(min = x_min, max = x_max, "x is normalized");
    Ok(x_out)
}

#[cfg(test)]
mod tests {
    use super::normalize;
    use crate::DsneError;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array2, Axis};

    #[test]
    fn test_normalize_uses_global_range() {
        let x = array![[0.0, 10.0], [2.0, 12.0], [4.0, 14.0]];
        let normalized = normalize(x.view()).unwrap();

        // Global range is 14, so each column spans 4/14 after scaling
        let expected = array![
            [-2.0 / 14.0, -2.0 / 14.0],
            [0.0, 0.0],
            [2.0 / 14.0, 2.0 / 14.0]
        ];
        for (a, b) in normalized.iter().zip(expected.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_normalize_centers_columns() {
        let x = array![[1.0, 7.0, -3.0], [5.0, 2.0, 0.5], [9.0, 4.0, 8.0], [0.0, 3.0, 1.0]];
        let normalized = normalize(x.view()).unwrap();
        let mean = normalized.mean_axis(Axis(0)).unwrap();
        for m in &mean {
            assert_abs_diff_eq!(*m, 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_normalize_leaves_input_untouched() {
        let x = array![[1.0, 2.0], [3.0, 4.0]];
        let copy = x.clone();
        let _ = normalize(x.view()).unwrap();
        assert_eq!(x, copy);
    }

    #[test]
    fn test_normalize_constant_matrix() {
        let x = Array2::from_elem((4, 3), 2.5);
        assert!(matches!(normalize(x.view()), Err(DsneError::ZeroRange)));
    }

    #[test]
    fn test_normalize_empty_matrix() {
        let x = Array2::<f64>::zeros((0, 3));
        assert!(matches!(
            normalize(x.view()),
            Err(DsneError::EmptyArrayMinMax)
        ));
    }
}
