//! Penalized regression spline bases.
//!
//! Cubic B-splines on equally spaced knots with a difference penalty on
//! adjacent coefficients (P-splines), plus the sum-to-zero reparameterization
//! used to make a smooth identifiable next to an intercept.

use nalgebra::{DMatrix, DVector, SymmetricEigen};

use crate::constants::smoothing::{
    CONFOUNDED_FRACTION, GRAM_TOLERANCE, PENALTY_ORDER, SPLINE_DEGREE,
};

/// B-spline basis over a closed interval.
#[derive(Clone, Debug)]
pub struct BSplineBasis {
    knots: Vec<f64>,
    size: usize,
    lower: f64,
    upper: f64,
}

impl BSplineBasis {
    /// Cubic basis with `size` functions spanning `[lower, upper]`.
    ///
    /// Returns `None` for an empty interval or too few functions to carry a
    /// cubic piece.
    pub fn new(lower: f64, upper: f64, size: usize) -> Option<Self> {
        if !(lower.is_finite() && upper.is_finite() && upper > lower) || size <= SPLINE_DEGREE {
            return None;
        }
        let intervals = size - SPLINE_DEGREE;
        let spacing = (upper - lower) / intervals as f64;
        let knots = (0..size + SPLINE_DEGREE + 1)
            .map(|i| lower + (i as f64 - SPLINE_DEGREE as f64) * spacing)
            .collect();
        Some(Self {
            knots,
            size,
            lower,
            upper,
        })
    }

    /// Number of basis functions.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Basis function values at `x` (clamped to the interval), via Cox-de Boor.
    pub fn evaluate(&self, x: f64) -> Vec<f64> {
        let nudge = 1e-9 * (self.upper - self.lower);
        let x = x.clamp(self.lower, self.upper - nudge);
        let t = &self.knots;
        let mut values: Vec<f64> = (0..t.len() - 1)
            .map(|i| if t[i] <= x && x < t[i + 1] { 1.0 } else { 0.0 })
            .collect();
        for degree in 1..=SPLINE_DEGREE {
            values = (0..t.len() - 1 - degree)
                .map(|i| {
                    let left = (x - t[i]) / (t[i + degree] - t[i]) * values[i];
                    let right = (t[i + degree + 1] - x) / (t[i + degree + 1] - t[i + 1]) * values[i + 1];
                    left + right
                })
                .collect();
        }
        values
    }

    /// Design matrix with one row per observation.
    pub fn design(&self, xs: &[f64]) -> DMatrix<f64> {
        let mut matrix = DMatrix::zeros(xs.len(), self.size);
        for (row, x) in xs.iter().enumerate() {
            for (col, value) in self.evaluate(*x).into_iter().enumerate() {
                matrix[(row, col)] = value;
            }
        }
        matrix
    }
}

/// Difference penalty D'D on adjacent coefficients.
pub fn difference_penalty(size: usize) -> DMatrix<f64> {
    let mut d = DMatrix::<f64>::identity(size, size);
    for _ in 0..PENALTY_ORDER {
        let rows = d.nrows();
        if rows < 2 {
            break;
        }
        d = DMatrix::from_fn(rows - 1, size, |i, j| d[(i + 1, j)] - d[(i, j)]);
    }
    d.tr_mul(&d)
}

/// Rank of the difference penalty for a basis of `size` functions.
pub fn penalty_rank(size: usize) -> usize {
    size.saturating_sub(PENALTY_ORDER)
}

/// Orthonormal null-space basis `Z` of the constraint `c' beta = 0`.
///
/// Built from one Householder reflection mapping `c` onto the first axis; the
/// remaining columns of the reflection span the constrained space. Returns
/// `None` for a zero constraint.
pub fn sum_to_zero_constraint(constraint: &DVector<f64>) -> Option<DMatrix<f64>> {
    let k = constraint.len();
    let norm = constraint.norm();
    if k < 2 || norm <= 0.0 || !norm.is_finite() {
        return None;
    }
    let mut u = constraint / norm;
    let sign = if u[0] >= 0.0 { 1.0 } else { -1.0 };
    u[0] += sign;
    let scale = u.dot(&u);
    let reflection = DMatrix::<f64>::identity(k, k) - (&u * u.transpose()) * (2.0 / scale);
    Some(reflection.columns(1, k - 1).into_owned())
}

/// Centered smooth: the basis design times `Z`, with the penalty projected to
/// the constrained space.
#[derive(Clone, Debug)]
pub struct ConstrainedSmooth {
    /// Constrained design, one row per observation.
    pub design: DMatrix<f64>,
    /// Penalty in the constrained coefficients.
    pub penalty: DMatrix<f64>,
    /// Maps constrained coefficients back to raw basis coefficients.
    pub transform: DMatrix<f64>,
    /// Rank of `penalty`.
    pub rank: usize,
}

/// Build a sum-to-zero constrained smooth of `xs` (column sums of the design
/// become zero, so the smooth is orthogonal to the intercept).
pub fn centered_smooth(basis: &BSplineBasis, xs: &[f64]) -> Option<ConstrainedSmooth> {
    let raw = basis.design(xs);
    let sums = DVector::from_iterator(raw.ncols(), raw.column_iter().map(|c| c.sum()));
    let z = sum_to_zero_constraint(&sums)?;
    let penalty = difference_penalty(basis.size());
    Some(ConstrainedSmooth {
        design: &raw * &z,
        penalty: z.transpose() * penalty * &z,
        transform: z,
        rank: penalty_rank(basis.size()),
    })
}

/// Reparameterize a by-variable smooth so it is identifiable next to the
/// columns of `side` (mgcv-style side constraints).
///
/// Directions of `design` that are numerically unidentifiable, or whose share
/// not explained by `side` falls below `CONFOUNDED_FRACTION`, are removed.
/// Returns `None` when no direction survives.
pub fn side_constrained(
    design: &DMatrix<f64>,
    side: &DMatrix<f64>,
    penalty: &DMatrix<f64>,
) -> Option<ConstrainedSmooth> {
    let residual = if side.ncols() == 0 {
        design.clone()
    } else {
        let svd = side.clone().svd(true, false);
        let u = svd.u?;
        let largest = svd.singular_values.max();
        let kept: Vec<usize> = (0..svd.singular_values.len())
            .filter(|&i| svd.singular_values[i] > largest * GRAM_TOLERANCE.sqrt())
            .collect();
        let span = DMatrix::from_fn(u.nrows(), kept.len(), |r, c| u[(r, kept[c])]);
        design - &span * span.tr_mul(design)
    };

    // whiten over the identifiable part of the design
    let gram = SymmetricEigen::new(design.tr_mul(design));
    let largest = gram.eigenvalues.max();
    if largest.is_nan() || largest <= 0.0 {
        return None;
    }
    let identifiable: Vec<usize> = (0..gram.eigenvalues.len())
        .filter(|&i| gram.eigenvalues[i] > largest * GRAM_TOLERANCE)
        .collect();
    let whitening = DMatrix::from_fn(design.ncols(), identifiable.len(), |r, c| {
        let k = identifiable[c];
        gram.eigenvectors[(r, k)] / gram.eigenvalues[k].sqrt()
    });

    // eigenvalues are the unexplained share of each whitened direction
    let projected = &residual * &whitening;
    let unexplained = SymmetricEigen::new(projected.tr_mul(&projected));
    let free: Vec<usize> = (0..unexplained.eigenvalues.len())
        .filter(|&i| unexplained.eigenvalues[i] > CONFOUNDED_FRACTION)
        .collect();
    if free.is_empty() {
        return None;
    }
    let rotation = DMatrix::from_fn(identifiable.len(), free.len(), |r, c| {
        unexplained.eigenvectors[(r, free[c])]
    });
    let transform = &whitening * rotation;
    let constrained_penalty = transform.transpose() * penalty * &transform;
    let spectrum = SymmetricEigen::new(constrained_penalty.clone()).eigenvalues;
    let top = spectrum.max();
    let rank = if top > 0.0 {
        spectrum.iter().filter(|value| **value > top * 1e-9).count()
    } else {
        0
    };
    Some(ConstrainedSmooth {
        design: design * &transform,
        penalty: constrained_penalty,
        transform,
        rank,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basis_is_a_partition_of_unity() {
        let basis = BSplineBasis::new(1.0, 30.0, 10).unwrap();
        for x in [1.0, 2.5, 7.0, 15.3, 29.9, 30.0] {
            let values = basis.evaluate(x);
            assert_eq!(values.len(), 10);
            assert!(values.iter().all(|v| *v >= 0.0));
            assert!((values.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn rejects_degenerate_intervals() {
        assert!(BSplineBasis::new(2.0, 2.0, 10).is_none());
        assert!(BSplineBasis::new(0.0, 1.0, 3).is_none());
    }

    #[test]
    fn penalty_annihilates_linear_coefficients() {
        let penalty = difference_penalty(8);
        let linear = DVector::from_fn(8, |i, _| 2.0 + 0.5 * i as f64);
        assert!((&penalty * &linear).norm() < 1e-12);
        assert_eq!(penalty_rank(8), 6);
    }

    #[test]
    fn constraint_columns_are_orthonormal_and_orthogonal_to_c() {
        let c = DVector::from_vec(vec![3.0, 1.0, 4.0, 1.0, 5.0]);
        let z = sum_to_zero_constraint(&c).unwrap();
        assert_eq!(z.shape(), (5, 4));
        assert!((z.transpose() * &c).norm() < 1e-12);
        let gram = z.transpose() * &z;
        assert!((gram - DMatrix::<f64>::identity(4, 4)).norm() < 1e-12);
    }

    #[test]
    fn centered_design_has_zero_column_sums() {
        let xs: Vec<f64> = (1..=40).map(|d| d as f64).collect();
        let basis = BSplineBasis::new(1.0, 40.0, 8).unwrap();
        let smooth = centered_smooth(&basis, &xs).unwrap();
        assert_eq!(smooth.design.ncols(), 7);
        for column in smooth.design.column_iter() {
            assert!(column.sum().abs() < 1e-9);
        }
    }

    /// Two records per day over 30 days: the raw day basis and the
    /// intercept plus centered baseline columns.
    fn paired_days() -> (DMatrix<f64>, DMatrix<f64>) {
        let days: Vec<f64> = (1..=30).flat_map(|d| [d as f64, d as f64]).collect();
        let basis = BSplineBasis::new(1.0, 30.0, 8).unwrap();
        let baseline = centered_smooth(&basis, &days).unwrap().design;
        let side = DMatrix::from_fn(days.len(), 1 + baseline.ncols(), |i, j| {
            if j == 0 { 1.0 } else { baseline[(i, j - 1)] }
        });
        (basis.design(&days), side)
    }

    #[test]
    fn side_constraint_keeps_directions_orthogonal_to_time() {
        let (raw, side) = paired_days();
        let n = raw.nrows();
        // opposite signs on the same day: unrelated to any function of day
        let x: Vec<f64> = (0..n).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        let by = DMatrix::from_fn(n, 8, |i, j| x[i] * raw[(i, j)]);
        let smooth = side_constrained(&by, &side, &difference_penalty(8)).unwrap();
        assert_eq!(smooth.design.ncols(), 8);
        assert_eq!(smooth.rank, 6);

        let with_main_effect = DMatrix::from_fn(n, side.ncols() + 1, |i, j| {
            if j < side.ncols() { side[(i, j)] } else { x[i] }
        });
        let smooth = side_constrained(&by, &with_main_effect, &difference_penalty(8)).unwrap();
        assert_eq!(smooth.design.ncols(), 7);
    }

    #[test]
    fn side_constraint_drops_a_smooth_spanned_by_the_baseline() {
        let (raw, side) = paired_days();
        // a constant by-variable reproduces intercept plus baseline
        assert!(side_constrained(&raw, &side, &difference_penalty(8)).is_none());
    }
}
