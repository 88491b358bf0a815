//! PCA preprocessing ahead of affinity calibration.
//!
//! Projects the centered data onto its leading principal axes. The axes come
//! out of the decomposition ordered by descending explained variance, which
//! is the order of the eigenvalues of `XᵀX`.

use crate::DsneError;
use ndarray::{s, Array2, ArrayView2, Axis};
use petal_decomposition::Pca;
use std::cmp::min;
use tracing::{debug, warn};

/// Reduces `x` to `target_dims` columns with PCA.
///
/// Columns are mean-centered before the projection. When there are fewer
/// samples than `target_dims`, the trailing axes carry no variance and are
/// returned as zero columns.
///
/// # Arguments
/// * `x` - Input data matrix where each row is a sample
/// * `target_dims` - Number of principal components to keep
///
/// # Returns
/// An `n × target_dims` matrix of projected coordinates
///
/// # Errors
/// * `DsneError::PcaDimensions` - `target_dims` is zero or exceeds the number
///   of features
/// * `DsneError::EmptyArrayMean` - `x` has no rows
/// * `DsneError::Pca` - the decomposition fails
pub fn reduce_dimensions(x: ArrayView2<f64>, target_dims: usize) -> Result<Array2<f64>, DsneError> {
    let (n, dim) = x.dim();
    if target_dims == 0 || target_dims > dim {
        return Err(DsneError::PcaDimensions {
            requested: target_dims,
            available: dim,
        });
    }

    let x_mean = x.mean_axis(Axis(0)).ok_or(DsneError::EmptyArrayMean)?;
    let centered = &x - &x_mean;

    let n_components = min(target_dims, n);
    if n_components < target_dims {
        warn!(
            "Only {n} samples for {target_dims} components, trailing components will be zero"
        );
    }

    let mut pca = Pca::new(n_components);
    let projected = pca.fit_transform(&centered)?;

    debug!("Applied PCA, the dimensionality becomes {target_dims}");
    if n_components == target_dims {
        return Ok(projected);
    }

    let mut padded = Array2::zeros((n, target_dims));
    padded.slice_mut(s![.., ..n_components]).assign(&projected);
    Ok(padded)
}

#[cfg(test)]
mod tests {
    use super::reduce_dimensions;
    use crate::distance::squared_distances;
    use crate::DsneError;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array2, Axis, Zip};
    use ndarray_rand::rand_distr::Uniform;
    use ndarray_rand::RandomExt;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    #[test]
    fn test_full_rank_projection_preserves_distances() {
        let mut rng = SmallRng::seed_from_u64(7);
        let x = Array2::random_using((40, 6), Uniform::new(-1.0, 1.0), &mut rng);

        let y = reduce_dimensions(x.view(), 6).unwrap();
        assert_eq!(y.dim(), (40, 6));

        // A full projection is a rotation, so pairwise geometry is unchanged
        let d_x = squared_distances(x.view());
        let d_y = squared_distances(y.view());
        Zip::from(&d_x).and(&d_y).for_each(|&a, &b| {
            assert_abs_diff_eq!(a, b, epsilon = 1e-8);
        });
    }

    #[test]
    fn test_projection_is_centered_and_ordered() {
        let mut rng = SmallRng::seed_from_u64(11);
        let mut x = Array2::random_using((60, 4), Uniform::new(-1.0, 1.0), &mut rng);
        // Stretch one feature so it dominates the variance
        x.column_mut(2).mapv_inplace(|v| v * 20.0);

        let y = reduce_dimensions(x.view(), 2).unwrap();
        assert_eq!(y.dim(), (60, 2));

        for m in &y.mean_axis(Axis(0)).unwrap() {
            assert_abs_diff_eq!(*m, 0.0, epsilon = 1e-9);
        }

        let var = y.var_axis(Axis(0), 0.0);
        assert!(var[0] >= var[1], "components not sorted: {var:?}");

        // The leading axis carries at least the stretched feature's variance
        let stretched = x.column(2).var(0.0);
        let total = x.var_axis(Axis(0), 0.0).sum();
        assert!(stretched > 100.0);
        assert!(var[0] >= stretched * (1.0 - 1e-9), "{var:?} vs {stretched}");
        assert!(var[0] > 0.95 * total);
        assert!(var[1] < 1.0, "{var:?}");

        // and is aligned with that feature
        let feature = &x.column(2) - x.column(2).mean().unwrap();
        let component = y.column(0);
        let alignment =
            component.dot(&feature).abs() / (component.dot(&component) * feature.dot(&feature)).sqrt();
        assert!(alignment > 0.99, "alignment {alignment}");
    }

    #[test]
    fn test_too_many_dimensions() {
        let x = array![[1.0, 2.0], [3.0, 5.0], [4.0, 1.0]];
        assert!(matches!(
            reduce_dimensions(x.view(), 3),
            Err(DsneError::PcaDimensions {
                requested: 3,
                available: 2
            })
        ));
        assert!(matches!(
            reduce_dimensions(x.view(), 0),
            Err(DsneError::PcaDimensions { .. })
        ));
    }

    #[test]
    fn test_fewer_samples_than_components() {
        let mut rng = SmallRng::seed_from_u64(3);
        let x = Array2::random_using((4, 10), Uniform::new(0.0, 1.0), &mut rng);
        let y = reduce_dimensions(x.view(), 8).unwrap();
        assert_eq!(y.dim(), (4, 8));
        assert!(y.column(7).iter().all(|&v| v == 0.0));
    }
}
