//! Momentum updates with per-coordinate adaptive gains.
//!
//! Each coordinate of the embedding keeps its own step multiplier. When the
//! new gradient points against the accumulated velocity the gain grows
//! additively; when both agree it decays geometrically. The velocity is a
//! momentum-weighted running sum of gain-scaled gradient steps.

use ndarray::{ArrayView2, ArrayViewMut2, Zip};

/// Parameters of one velocity update.
#[derive(Debug, Clone, Copy)]
pub struct StepParams {
    /// Fraction of the previous velocity that is retained
    pub momentum: f64,

    /// Learning rate applied to the gain-scaled gradient
    pub learning_rate: f64,

    /// Lower bound on every gain
    pub min_gain: f64,
}

/// Updates the gains and the velocity in place for one iteration.
///
/// # Arguments
/// * `grad` - Gradient for this iteration
/// * `velocity` - Accumulated velocity `iY`, updated in place
/// * `gains` - Per-coordinate gains, updated in place
/// * `params` - Momentum, learning rate, and minimum gain
///
/// # Implementation Notes
/// - Signs are compared as `grad > 0` against `velocity > 0`, so a zero
///   component counts as non-positive
/// - Gains change by `+0.2` on disagreement and `×0.8` on agreement, then are
///   clamped to `min_gain`
/// - Velocity follows `iY = momentum · iY − learning_rate · gain · dY`
///
/// # Panics
/// * If the three matrices have different shapes
pub fn update_velocity(
    grad: ArrayView2<f64>,
    velocity: ArrayViewMut2<f64>,
    gains: ArrayViewMut2<f64>,
    params: StepParams,
) {
    let StepParams {
        momentum,
        learning_rate,
        min_gain,
    } = params;

    Zip::from(grad)
        .and(velocity)
        .and(gains)
        .par_for_each(|&grad, velocity, gain| {
            *gain = if (grad > 0.0) == (*velocity > 0.0) {
                *gain * 0.8
            } else {
                *gain + 0.2
            };
            if *gain < min_gain {
                *gain = min_gain;
            }
            *velocity = momentum * *velocity - learning_rate * *gain * grad;
        });
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array2, Zip};

    #[test]
    fn test_update_velocity() {
        let grad = array![[0.1, -0.2], [0.0, 0.4]];
        let mut velocity = array![[-1.0, -1.0], [0.5, 0.0]];
        let mut gains = Array2::ones((2, 2));
        let params = StepParams {
            momentum: 0.5,
            learning_rate: 10.0,
            min_gain: 0.01,
        };

        update_velocity(grad.view(), velocity.view_mut(), gains.view_mut(), params);

        // [0,0]: signs differ; [0,1]: both negative; [1,0]: grad zero vs positive
        // velocity differ; [1,1]: grad positive vs zero velocity differ
        let gains_expected = array![[1.2, 0.8], [1.2, 1.2]];
        let velocity_expected = array![
            [0.5 * -1.0 - 10.0 * 1.2 * 0.1, 0.5 * -1.0 - 10.0 * 0.8 * -0.2],
            [0.5 * 0.5, -10.0 * 1.2 * 0.4]
        ];

        Zip::from(&gains).and(&gains_expected).for_each(|&a, &b| {
            assert_abs_diff_eq!(a, b, epsilon = 1e-12);
        });
        Zip::from(&velocity)
            .and(&velocity_expected)
            .for_each(|&a, &b| {
                assert_abs_diff_eq!(a, b, epsilon = 1e-12);
            });
    }

    #[test]
    fn test_gains_respect_minimum() {
        let grad = array![[1.0]];
        let mut velocity = array![[1.0]];
        let mut gains = array![[0.011]];
        let params = StepParams {
            momentum: 0.8,
            learning_rate: 0.0,
            min_gain: 0.01,
        };

        update_velocity(grad.view(), velocity.view_mut(), gains.view_mut(), params);
        assert_abs_diff_eq!(gains[[0, 0]], 0.01);
        assert_abs_diff_eq!(velocity[[0, 0]], 0.8);
    }
}
