//! Truncated spectral (Karhunen-Loeve) decomposition of a covariance matrix.
//!
//! The matrix is factorised with an SVD, singular values are sorted in
//! descending order and the basis keeps the smallest number of leading
//! components whose summed singular values reach the requested fraction of
//! the total.

use crate::config::Config;
use crate::covariance::AssembledCovariance;
use crate::error::{Result, UqError};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// Leading singular values (descending) and their left-singular vectors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectralBasis {
    pub singular_values: Vec<f64>,
    /// `dim x rank`, column `k` pairs with `singular_values[k]`.
    pub vectors: DMatrix<f64>,
    /// Dimension of the decomposed matrix (the untruncated rank).
    pub full_rank: usize,
    /// Sum of all singular values, retained or not.
    pub total_variance: f64,
    /// Variance target the basis was truncated to; `None` for full rank.
    #[serde(default)]
    pub target_fraction: Option<f64>,
}

impl SpectralBasis {
    /// Retained rank R.
    pub fn rank(&self) -> usize {
        self.singular_values.len()
    }

    pub fn dim(&self) -> usize {
        self.vectors.nrows()
    }

    /// Percentage of total variance captured by the retained components.
    pub fn variance_captured(&self) -> f64 {
        if self.total_variance <= 0.0 {
            return 100.0;
        }
        100.0 * self.singular_values.iter().sum::<f64>() / self.total_variance
    }

    /// `U diag(s) U^T` over the retained components.
    pub fn reconstruct(&self) -> DMatrix<f64> {
        let s = DVector::from_column_slice(&self.singular_values);
        let scaled = DMatrix::from_fn(self.dim(), self.rank(), |i, k| self.vectors[(i, k)] * s[k]);
        scaled * self.vectors.transpose()
    }

    /// Frobenius norm of `reconstruct() - matrix`. Diagnostic only.
    pub fn residual(&self, matrix: &DMatrix<f64>) -> f64 {
        (self.reconstruct() - matrix).norm()
    }

    /// Largest deviation of `U^T U` from the identity.
    pub fn orthogonality_error(&self) -> f64 {
        let gram = self.vectors.transpose() * &self.vectors;
        let identity = DMatrix::<f64>::identity(self.rank(), self.rank());
        (gram - identity).amax()
    }
}

/// Smallest R with `sum(s[..R]) / sum(s) >= fraction / 100`, at least 1.
///
/// `singular_values` must be sorted in descending order. A zero spectrum
/// keeps a single component.
pub fn retained_rank(singular_values: &[f64], fraction: f64) -> usize {
    let n = singular_values.len();
    if n == 0 {
        return 0;
    }
    let total: f64 = singular_values.iter().sum();
    if total <= 0.0 {
        return 1;
    }
    let target = fraction / 100.0;
    let mut cumulative = 0.0;
    for (r, &s) in singular_values.iter().enumerate() {
        cumulative += s;
        if cumulative / total >= target {
            return r + 1;
        }
    }
    n
}

/// Decomposes covariance matrices and truncates them to a variance target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpectralReducer {
    /// Target percentage, or `None` to keep every component.
    fraction: Option<f64>,
}

impl SpectralReducer {
    pub fn new(fraction: f64) -> Self {
        SpectralReducer {
            fraction: Some(fraction),
        }
    }

    /// Keep the full rank.
    pub fn full() -> Self {
        SpectralReducer { fraction: None }
    }

    pub fn from_config(config: &Config) -> Self {
        SpectralReducer {
            fraction: config.truncation(),
        }
    }

    pub fn fraction(&self) -> Option<f64> {
        self.fraction
    }

    pub fn reduce(&self, covariance: &AssembledCovariance) -> Result<SpectralBasis> {
        let basis = self.decompose(&covariance.matrix)?;
        log::info!(
            "{}: retained {} of {} components ({:.4}% of variance)",
            covariance.nuclide,
            basis.rank(),
            basis.full_rank,
            basis.variance_captured()
        );
        Ok(basis)
    }

    pub fn decompose(&self, matrix: &DMatrix<f64>) -> Result<SpectralBasis> {
        let n = matrix.nrows();
        if n == 0 || matrix.ncols() != n {
            return Err(UqError::DecompositionError(format!(
                "expected a non-empty square matrix, got {}x{}",
                matrix.nrows(),
                matrix.ncols()
            )));
        }
        if let Some(bad) = matrix.iter().find(|v| !v.is_finite()) {
            return Err(UqError::DecompositionError(format!(
                "matrix contains non-finite entry {}",
                bad
            )));
        }

        let svd = matrix
            .clone()
            .try_svd(true, false, f64::EPSILON, 0)
            .ok_or_else(|| UqError::DecompositionError("SVD did not converge".to_string()))?;
        let u = svd
            .u
            .ok_or_else(|| UqError::DecompositionError("SVD returned no U".to_string()))?;

        // nalgebra does not promise an ordering
        let mut order: Vec<usize> = (0..svd.singular_values.len()).collect();
        order.sort_by(|&a, &b| {
            svd.singular_values[b]
                .partial_cmp(&svd.singular_values[a])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let sorted: Vec<f64> = order.iter().map(|&k| svd.singular_values[k]).collect();

        let rank = match self.fraction {
            Some(fraction) => retained_rank(&sorted, fraction),
            None => n,
        };
        let vectors = DMatrix::from_fn(n, rank, |i, k| u[(i, order[k])]);

        Ok(SpectralBasis {
            singular_values: sorted[..rank].to_vec(),
            vectors,
            full_rank: n,
            total_variance: sorted.iter().sum(),
            target_fraction: self.fraction,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spd(n: usize) -> DMatrix<f64> {
        // exponentially decaying correlation, well conditioned
        DMatrix::from_fn(n, n, |i, j| {
            let d = (i as f64 - j as f64).abs();
            0.04 * (-d / 2.0).exp()
        })
    }

    #[test]
    fn test_retained_rank_thresholds() {
        let s = [5.0, 3.0, 1.0, 1.0];
        assert_eq!(retained_rank(&s, 50.0), 1);
        assert_eq!(retained_rank(&s, 80.0), 2);
        assert_eq!(retained_rank(&s, 90.0), 3);
        assert_eq!(retained_rank(&s, 99.9), 4);
        assert_eq!(retained_rank(&s, 100.0), 4);
        // first component alone exceeds a small target, still at least 1
        assert_eq!(retained_rank(&s, 1.0), 1);
    }

    #[test]
    fn test_retained_rank_degenerate_spectra() {
        assert_eq!(retained_rank(&[0.0, 0.0], 99.9), 1);
        assert_eq!(retained_rank(&[2.0, 1.0, 0.0, 0.0], 100.0), 2);
        assert_eq!(retained_rank(&[], 99.9), 0);
    }

    #[test]
    fn test_identity_keeps_every_component() {
        let basis = SpectralReducer::new(99.9).decompose(&DMatrix::identity(5, 5)).unwrap();
        assert_eq!(basis.rank(), 5);
        assert_eq!(basis.full_rank, 5);
        assert!((basis.variance_captured() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_singular_values_descending_and_orthogonal() {
        let basis = SpectralReducer::full().decompose(&spd(8)).unwrap();
        assert!(basis.singular_values.windows(2).all(|w| w[0] >= w[1]));
        assert!(basis.orthogonality_error() < 1e-10);
    }

    #[test]
    fn test_full_rank_reconstruction_matches() {
        let m = spd(6);
        let basis = SpectralReducer::full().decompose(&m).unwrap();
        assert_eq!(basis.rank(), 6);
        assert!(basis.residual(&m) < 1e-12);
    }

    #[test]
    fn test_truncation_is_minimal() {
        let m = spd(10);
        for fraction in [50.0, 90.0, 99.0, 99.9] {
            let full = SpectralReducer::full().decompose(&m).unwrap();
            let basis = SpectralReducer::new(fraction).decompose(&m).unwrap();
            let r = basis.rank();
            let total = full.total_variance;
            let kept: f64 = full.singular_values[..r].iter().sum();
            assert!(kept / total >= fraction / 100.0);
            if r > 1 && r < full.full_rank {
                let fewer: f64 = full.singular_values[..r - 1].iter().sum();
                assert!(fewer / total < fraction / 100.0);
            }
        }
    }

    #[test]
    fn test_non_finite_matrix_is_rejected() {
        let mut m = spd(3);
        m[(1, 2)] = f64::NAN;
        let err = SpectralReducer::new(99.9).decompose(&m).unwrap_err();
        assert!(matches!(err, UqError::DecompositionError(_)));

        m[(1, 2)] = f64::INFINITY;
        assert!(SpectralReducer::new(99.9).decompose(&m).is_err());
    }

    #[test]
    fn test_empty_matrix_is_rejected() {
        let m = DMatrix::<f64>::zeros(0, 0);
        assert!(SpectralReducer::full().decompose(&m).is_err());
    }
}
