//! Karhunen-Loeve map from latent samples to multiplicative perturbations.
//!
//! For a basis `U` (dim x R) with singular values `s` and a latent sample
//! `xi` of length R the perturbation field is
//!
//! ```text
//! field = clip(1 + U * sqrt(diag(s)) * xi, lower, upper)
//! ```
//!
//! Samples are supplied from outside (e.g. a low-discrepancy sequence
//! mapped to standard normals); nothing here draws random numbers.

use crate::config::PerturbationBounds;
use crate::covariance::ChannelLayout;
use crate::error::{Result, UqError};
use crate::spectral::SpectralBasis;
use nalgebra::DVector;
use std::path::Path;

/// One multiplier per (channel, energy group), laid out like the covariance.
#[derive(Debug, Clone, PartialEq)]
pub struct PerturbationField {
    pub layout: ChannelLayout,
    pub values: Vec<f64>,
}

impl PerturbationField {
    /// Multipliers of one channel, indexed by energy group.
    pub fn channel(&self, mt: i32) -> Option<&[f64]> {
        self.layout
            .span(mt)
            .map(|span| &self.values[span.offset..span.offset + span.len()])
    }

    /// Multiplier for `energy` in channel `mt`; `None` when the channel is
    /// not perturbed or the energy lies at or below its first group edge.
    pub fn factor(&self, mt: i32, energy: f64) -> Option<f64> {
        let span = self.layout.span(mt)?;
        let group = span.group_of(energy)?;
        Some(self.values[span.offset + group])
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SampleMapper {
    pub bounds: PerturbationBounds,
}

impl SampleMapper {
    pub fn new(bounds: PerturbationBounds) -> Self {
        SampleMapper { bounds }
    }

    /// Map a latent sample onto a clipped perturbation field.
    ///
    /// Fails with `DimensionMismatch` before computing anything when the
    /// sample length, basis width or layout size disagree.
    pub fn map(
        &self,
        basis: &SpectralBasis,
        layout: &ChannelLayout,
        sample: &[f64],
    ) -> Result<PerturbationField> {
        let rank = basis.rank();
        if basis.vectors.ncols() != rank {
            return Err(UqError::DimensionMismatch {
                what: "basis vector count",
                expected: rank,
                found: basis.vectors.ncols(),
            });
        }
        if sample.len() != rank {
            return Err(UqError::DimensionMismatch {
                what: "sample vector",
                expected: rank,
                found: sample.len(),
            });
        }
        if basis.dim() != layout.size() {
            return Err(UqError::DimensionMismatch {
                what: "basis rows vs channel layout",
                expected: layout.size(),
                found: basis.dim(),
            });
        }
        if let Some(i) = sample.iter().position(|v| !v.is_finite()) {
            return Err(UqError::InvalidSample(format!(
                "non-finite value {} at position {}",
                sample[i], i
            )));
        }

        let weights = DVector::from_iterator(
            rank,
            basis
                .singular_values
                .iter()
                .zip(sample)
                .map(|(&s, &xi)| s.max(0.0).sqrt() * xi),
        );
        let raw = &basis.vectors * weights;
        let values = raw.iter().map(|&r| self.bounds.clip(1.0 + r)).collect();

        Ok(PerturbationField {
            layout: layout.clone(),
            values,
        })
    }
}

/// Read whitespace-separated floating point samples.
pub fn read_sample_file<P: AsRef<Path>>(path: P) -> Result<Vec<f64>> {
    let text = std::fs::read_to_string(path.as_ref())?;
    text.split_whitespace()
        .enumerate()
        .map(|(i, token)| {
            token.parse::<f64>().map_err(|_| {
                UqError::InvalidSample(format!("token {} ('{}') is not a number", i, token))
            })
        })
        .collect()
}

/// Split one concatenated sample vector into consecutive per-nuclide slices
/// of lengths `dims`.
pub fn split_samples<'a>(samples: &'a [f64], dims: &[usize]) -> Result<Vec<&'a [f64]>> {
    let total: usize = dims.iter().sum();
    if samples.len() != total {
        return Err(UqError::DimensionMismatch {
            what: "concatenated sample vector",
            expected: total,
            found: samples.len(),
        });
    }
    let mut start = 0;
    Ok(dims
        .iter()
        .map(|&d| {
            let slice = &samples[start..start + d];
            start += d;
            slice
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spectral::SpectralReducer;
    use nalgebra::DMatrix;

    fn layout() -> ChannelLayout {
        ChannelLayout::new(vec![(2, vec![1.0, 10.0, 100.0]), (102, vec![1.0, 100.0])])
    }

    fn basis() -> SpectralBasis {
        let m = DMatrix::from_row_slice(3, 3, &[0.04, 0.01, 0.0, 0.01, 0.09, 0.0, 0.0, 0.0, 0.01]);
        SpectralReducer::full().decompose(&m).unwrap()
    }

    #[test]
    fn test_zero_sample_is_unperturbed() {
        let field = SampleMapper::default().map(&basis(), &layout(), &[0.0; 3]).unwrap();
        assert!(field.values.iter().all(|&v| (v - 1.0).abs() < 1e-15));
    }

    #[test]
    fn test_matches_explicit_formula() {
        let b = basis();
        let xi = [0.3, -1.2, 0.7];
        let field = SampleMapper::default().map(&b, &layout(), &xi).unwrap();
        for i in 0..3 {
            let mut expected = 1.0;
            for k in 0..3 {
                expected += b.vectors[(i, k)] * b.singular_values[k].sqrt() * xi[k];
            }
            assert!((field.values[i] - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn test_values_are_clipped() {
        let field = SampleMapper::default().map(&basis(), &layout(), &[1e6, -1e6, 1e6]).unwrap();
        assert!(field.values.iter().all(|&v| (0.0..=2.0).contains(&v)));
        assert!(field.values.iter().any(|&v| v == 0.0 || v == 2.0));

        let narrow = SampleMapper::new(PerturbationBounds { lower: 0.5, upper: 1.5 });
        let field = narrow.map(&basis(), &layout(), &[50.0, 50.0, 50.0]).unwrap();
        assert!(field.values.iter().all(|&v| (0.5..=1.5).contains(&v)));
    }

    #[test]
    fn test_wrong_sample_length() {
        let err = SampleMapper::default().map(&basis(), &layout(), &[0.1, 0.2]).unwrap_err();
        assert!(matches!(
            err,
            UqError::DimensionMismatch { what: "sample vector", expected: 3, found: 2 }
        ));
    }

    #[test]
    fn test_layout_mismatch() {
        let small = ChannelLayout::new(vec![(2, vec![1.0, 10.0, 100.0])]);
        assert!(matches!(
            SampleMapper::default().map(&basis(), &small, &[0.0; 3]),
            Err(UqError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_non_finite_sample() {
        assert!(matches!(
            SampleMapper::default().map(&basis(), &layout(), &[0.0, f64::NAN, 0.0]),
            Err(UqError::InvalidSample(_))
        ));
    }

    #[test]
    fn test_channel_and_factor_lookup() {
        let field = PerturbationField {
            layout: layout(),
            values: vec![1.1, 1.2, 0.9],
        };
        assert_eq!(field.channel(2), Some(&[1.1, 1.2][..]));
        assert_eq!(field.channel(102), Some(&[0.9][..]));
        assert_eq!(field.channel(18), None);
        assert_eq!(field.factor(2, 0.5), None);
        assert_eq!(field.factor(2, 1.0), None);
        assert_eq!(field.factor(2, 50.0), Some(1.2));
        assert_eq!(field.factor(102, 3.0), Some(0.9));
    }

    #[test]
    fn test_split_samples() {
        let samples = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let parts = split_samples(&samples, &[2, 3, 1]).unwrap();
        assert_eq!(parts, vec![&[1.0, 2.0][..], &[3.0, 4.0, 5.0][..], &[6.0][..]]);
        assert!(split_samples(&samples, &[2, 3]).is_err());
    }

    #[test]
    fn test_read_sample_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("samples.txt");
        std::fs::write(&path, "0.5 -1.25\n3e-1\t2\n").unwrap();
        assert_eq!(read_sample_file(&path).unwrap(), vec![0.5, -1.25, 0.3, 2.0]);

        std::fs::write(&path, "0.5 abc").unwrap();
        assert!(matches!(read_sample_file(&path), Err(UqError::InvalidSample(_))));
    }
}
