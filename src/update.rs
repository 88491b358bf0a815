//! Positional update rules for the shared/local split.
//!
//! After the velocity is computed, each iteration moves the embedding and
//! re-centers it. Which rows move depends on who is computing:
//! - The aggregate rule moves every row and centers the whole embedding
//! - The partitioned rule never touches the shared rows and moves and centers
//!   only the local rows around them

use crate::ComputationPhase;
use ndarray::{s, ArrayView2, ArrayViewMut2, Axis};

/// How positions are advanced and re-centered each iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateRule {
    /// All rows move and the full embedding is kept at zero mean
    Aggregate,

    /// Rows before `shared_length` are frozen anchors, the rest move and are
    /// kept at zero mean on their own
    Partitioned {
        /// Number of leading shared rows
        shared_length: usize,
    },
}

impl UpdateRule {
    /// Selects the rule for a computation phase.
    pub fn for_phase(phase: ComputationPhase, shared_length: usize) -> Self {
        match phase {
            ComputationPhase::Remote => UpdateRule::Aggregate,
            ComputationPhase::Local => UpdateRule::Partitioned { shared_length },
        }
    }

    /// Adds the velocity to the movable rows of `y` and re-centers them.
    ///
    /// # Arguments
    /// * `y` - Embedding coordinates, updated in place
    /// * `velocity` - Velocity for every row of `y`
    pub fn apply(self, mut y: ArrayViewMut2<f64>, velocity: ArrayView2<f64>) {
        let start = match self {
            UpdateRule::Aggregate => 0,
            UpdateRule::Partitioned { shared_length } => shared_length.min(y.nrows()),
        };

        let mut movable = y.slice_mut(s![start.., ..]);
        movable += &velocity.slice(s![start.., ..]);
        recenter(movable);
    }
}

/// Shifts `block` so each column has zero mean. Empty blocks are left alone.
fn recenter(mut block: ArrayViewMut2<f64>) {
    if let Some(mean) = block.mean_axis(Axis(0)) {
        block -= &mean;
    }
}

#[cfg(test)]
mod tests {
    use super::UpdateRule;
    use crate::ComputationPhase;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, s, Axis};

    #[test]
    fn test_for_phase() {
        assert_eq!(
            UpdateRule::for_phase(ComputationPhase::Remote, 3),
            UpdateRule::Aggregate
        );
        assert_eq!(
            UpdateRule::for_phase(ComputationPhase::Local, 3),
            UpdateRule::Partitioned { shared_length: 3 }
        );
    }

    #[test]
    fn test_aggregate_moves_and_centers_everything() {
        let mut y = array![[0.0, 0.0], [1.0, 1.0], [2.0, 5.0]];
        let velocity = array![[1.0, 0.0], [0.0, 1.0], [2.0, 3.0]];

        UpdateRule::Aggregate.apply(y.view_mut(), velocity.view());

        let expected = array![[-1.0, -10.0 / 3.0], [-1.0, -4.0 / 3.0], [2.0, 14.0 / 3.0]];
        for (a, b) in y.iter().zip(expected.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_partitioned_freezes_shared_rows() {
        let mut y = array![[5.0, -2.0], [3.0, 4.0], [1.0, 1.0], [2.0, 0.0], [0.0, 2.0]];
        let shared = y.slice(s![..2, ..]).to_owned();
        let velocity = array![[9.0, 9.0], [9.0, 9.0], [0.5, 0.0], [1.0, 1.0], [-1.0, 3.0]];

        let rule = UpdateRule::Partitioned { shared_length: 2 };
        for _ in 0..5 {
            rule.apply(y.view_mut(), velocity.view());
        }

        assert_eq!(y.slice(s![..2, ..]), shared);
        let local_mean = y.slice(s![2.., ..]).mean_axis(Axis(0)).unwrap();
        for m in &local_mean {
            assert_abs_diff_eq!(*m, 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_partitioned_all_shared() {
        let mut y = array![[1.0, 2.0], [3.0, 4.0]];
        let before = y.clone();
        let velocity = array![[1.0, 1.0], [1.0, 1.0]];

        UpdateRule::Partitioned { shared_length: 2 }.apply(y.view_mut(), velocity.view());
        assert_eq!(y, before);
    }
}
