//! In-memory driver for the remote and local phases.
//!
//! The remote phase embeds the shared dataset on its own. A local site then
//! stacks its private rows under the shared rows, seeds the embedding with the
//! shared coordinates it received, and optimizes only its own points. Only
//! the low-dimensional coordinates returned by these functions need to cross
//! the boundary between participants.

use crate::normalize::normalize;
use crate::{embed, ComputationPhase, Configuration, DsneError};
use ndarray::{concatenate, s, Array2, ArrayView2, Axis};
use ndarray_rand::rand_distr::Normal;
use ndarray_rand::RandomExt;
use rand::Rng;
use tracing::debug;

/// Draws an `n × dims` embedding from the standard normal distribution.
///
/// # Errors
/// * `DsneError::Normal` - the distribution cannot be created
pub fn random_embedding<R>(n: usize, dims: usize, rng: &mut R) -> Result<Array2<f64>, DsneError>
where
    R: Rng + ?Sized,
{
    let normal = Normal::new(0.0, 1.0)?;
    Ok(Array2::random_using((n, dims), normal, rng))
}

/// Builds a random `n`-row embedding whose leading rows are `shared_y`.
///
/// # Arguments
/// * `shared_y` - Coordinates of the shared points
/// * `n` - Total number of points, shared rows included
/// * `rng` - Source of the random rows
///
/// # Errors
/// * `DsneError::SharedLength` - `shared_y` has more than `n` rows
/// * `DsneError::Normal` - the distribution cannot be created
pub fn seed_shared_embedding<R>(
    shared_y: ArrayView2<f64>,
    n: usize,
    rng: &mut R,
) -> Result<Array2<f64>, DsneError>
where
    R: Rng + ?Sized,
{
    let (shared_rows, dims) = shared_y.dim();
    if shared_rows > n {
        return Err(DsneError::SharedLength {
            shared_length: shared_rows,
            samples: n,
        });
    }

    let mut y = random_embedding(n, dims, rng)?;
    y.slice_mut(s![..shared_rows, ..]).assign(&shared_y);
    Ok(y)
}

/// Embeds the shared dataset.
///
/// Normalizes `shared_x`, draws a random starting embedding, and runs the
/// optimizer with every point free to move.
///
/// # Returns
/// The shared embedding, one row per row of `shared_x`
///
/// # Errors
/// Any error of [`normalize`] or [`embed`]
pub fn remote_site<R>(
    shared_x: ArrayView2<f64>,
    config: &Configuration,
    rng: &mut R,
) -> Result<Array2<f64>, DsneError>
where
    R: Rng + ?Sized,
{
    let x = normalize(shared_x)?;
    let n = x.nrows();
    let y0 = random_embedding(n, config.embedding_dimensions, rng)?;

    debug!("Embedding {n} shared points");
    let (shared_y, _) = embed(x.view(), y0.view(), n, ComputationPhase::Remote, config)?;
    Ok(shared_y)
}

/// Embeds a site's local dataset around the shared embedding.
///
/// The shared and local features are stacked and normalized together. The
/// shared rows start at `shared_y` and stay there; the local rows start at
/// random positions and are optimized.
///
/// # Arguments
/// * `shared_x` - Shared feature matrix
/// * `shared_y` - Embedding of `shared_x` produced by [`remote_site`]
/// * `local_x` - This site's private feature matrix
/// * `config` - Configuration options controlling the embedding process
/// * `rng` - Source of the random starting positions
///
/// # Returns
/// The embedding of the local rows only, one row per row of `local_x`
///
/// # Errors
/// * `DsneError::SharedRowMismatch` - `shared_y` and `shared_x` have a
///   different number of rows
/// * `DsneError::FeatureMismatch` - `local_x` and `shared_x` have a different
///   number of columns
/// * Any error of [`normalize`] or [`embed`]
pub fn local_site<R>(
    shared_x: ArrayView2<f64>,
    shared_y: ArrayView2<f64>,
    local_x: ArrayView2<f64>,
    config: &Configuration,
    rng: &mut R,
) -> Result<Array2<f64>, DsneError>
where
    R: Rng + ?Sized,
{
    let shared_rows = shared_x.nrows();
    if shared_y.nrows() != shared_rows {
        return Err(DsneError::SharedRowMismatch {
            features: shared_rows,
            embedding: shared_y.nrows(),
        });
    }
    if local_x.ncols() != shared_x.ncols() {
        return Err(DsneError::FeatureMismatch {
            shared: shared_x.ncols(),
            local: local_x.ncols(),
        });
    }

    let combined_x = concatenate(Axis(0), &[shared_x.view(), local_x.view()])?;
    let combined_x = normalize(combined_x.view())?;
    let y0 = seed_shared_embedding(shared_y, combined_x.nrows(), rng)?;

    debug!(
        "Embedding {} local points around {shared_rows} shared points",
        local_x.nrows()
    );
    let (combined_y, _) = embed(
        combined_x.view(),
        y0.view(),
        shared_rows,
        ComputationPhase::Local,
        config,
    )?;

    Ok(combined_y.slice(s![shared_rows.., ..]).to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    #[test]
    fn test_random_embedding_is_reproducible() {
        let a = random_embedding(10, 3, &mut SmallRng::seed_from_u64(1)).unwrap();
        let b = random_embedding(10, 3, &mut SmallRng::seed_from_u64(1)).unwrap();
        let c = random_embedding(10, 3, &mut SmallRng::seed_from_u64(2)).unwrap();

        assert_eq!(a.dim(), (10, 3));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_seed_shared_embedding() {
        let shared_y = array![[1.0, 2.0], [3.0, 4.0]];
        let mut rng = SmallRng::seed_from_u64(3);
        let y = seed_shared_embedding(shared_y.view(), 5, &mut rng).unwrap();

        assert_eq!(y.dim(), (5, 2));
        assert_eq!(y.slice(s![..2, ..]), shared_y);

        assert!(matches!(
            seed_shared_embedding(shared_y.view(), 1, &mut rng),
            Err(DsneError::SharedLength {
                shared_length: 2,
                samples: 1
            })
        ));
    }

    #[test]
    fn test_local_site_returns_local_rows() {
        let mut rng = SmallRng::seed_from_u64(6);
        let data = Array2::random_using((18, 3), Normal::new(0.0, 1.0).unwrap(), &mut rng);
        let config = Configuration::builder()
            .initial_dims(3)
            .perplexity(3.0)
            .max_iter(50)
            .build();

        // Shared rows borrowed from a larger matrix, local rows owned separately
        let shared_x = data.slice(s![..12, ..]);
        let local_x = data.slice(s![12.., ..]).to_owned();
        let shared_y = remote_site(shared_x, &config, &mut rng).unwrap();

        let local_y =
            local_site(shared_x, shared_y.view(), local_x.view(), &config, &mut rng).unwrap();
        assert_eq!(local_y.dim(), (6, 2));
        assert!(local_y.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_local_site_validates_shapes() {
        let config = Configuration::default();
        let mut rng = SmallRng::seed_from_u64(4);
        let shared_x = array![[0.0, 1.0], [1.0, 0.0], [0.5, 0.5]];

        let short_y = array![[0.0, 0.0], [1.0, 1.0]];
        assert!(matches!(
            local_site(
                shared_x.view(),
                short_y.view(),
                array![[0.2, 0.3]].view(),
                &config,
                &mut rng
            ),
            Err(DsneError::SharedRowMismatch {
                features: 3,
                embedding: 2
            })
        ));

        let shared_y = array![[0.0, 0.0], [1.0, 1.0], [2.0, 2.0]];
        assert!(matches!(
            local_site(
                shared_x.view(),
                shared_y.view(),
                array![[0.2, 0.3, 0.4]].view(),
                &config,
                &mut rng
            ),
            Err(DsneError::FeatureMismatch {
                shared: 2,
                local: 3
            })
        ));
    }
}
