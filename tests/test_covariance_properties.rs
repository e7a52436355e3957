use nalgebra::DMatrix;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use std::collections::BTreeMap;
use xs_uq::{
    CovarianceAssembler, CovarianceBlock, CurveReconstructor, Nuclide, NuclideUncertainty,
    ReactionCurve, SampleMapper, SpectralReducer, UqError,
};

// MT 2 (3 groups), MT 16 (2 groups), MT 102 (3 groups)
const CHANNELS: [(i32, &[f64]); 3] = [
    (2, &[1.0e-5, 1.0, 1.0e3, 2.0e7]),
    (16, &[1.0e6, 1.0e7, 2.0e7]),
    (102, &[1.0e-5, 1.0, 1.0e3, 2.0e7]),
];

const ENERGY: [f64; 6] = [1.0e-5, 0.5, 10.0, 1.0e5, 5.0e6, 2.0e7];

fn random_covariance(rng: &mut StdRng, n: usize) -> DMatrix<f64> {
    let a = DMatrix::from_fn(n, n, |_, _| rng.sample::<f64, _>(StandardNormal));
    &a * a.transpose() * (0.02 / n as f64)
}

/// Record whose blocks tile `matrix` (upper orientation plus self-blocks).
fn record_from_matrix(matrix: &DMatrix<f64>) -> NuclideUncertainty {
    let mut offsets = Vec::new();
    let mut offset = 0;
    for (mt, edges) in CHANNELS {
        offsets.push((mt, offset, edges.len() - 1));
        offset += edges.len() - 1;
    }
    let mut blocks = Vec::new();
    for (i, &(row_mt, row_off, row_len)) in offsets.iter().enumerate() {
        for &(col_mt, col_off, col_len) in &offsets[i..] {
            let rows = (0..row_len)
                .map(|a| (0..col_len).map(|b| matrix[(row_off + a, col_off + b)]).collect())
                .collect();
            blocks.push(CovarianceBlock::new(row_mt, col_mt, rows));
        }
    }
    let groups: BTreeMap<i32, Vec<f64>> =
        CHANNELS.iter().map(|(mt, edges)| (*mt, edges.to_vec())).collect();

    let curve = |mt: i32, scale: f64| {
        ReactionCurve::new(mt, ENERGY.to_vec(), ENERGY.iter().map(|e| scale / (1.0 + e.ln().abs())).collect())
    };
    let parts = [curve(2, 4.0), curve(16, 0.3), curve(102, 1.5)];
    let total: Vec<f64> = (0..ENERGY.len())
        .map(|i| parts.iter().map(|c| c.cross_section[i]).sum::<f64>())
        .collect();
    let mut curves = parts.to_vec();
    curves.push(ReactionCurve::new(1, ENERGY.to_vec(), total));

    NuclideUncertainty {
        nuclide: Nuclide::new("Fe", 56),
        curves,
        groups,
        blocks,
        direct: None,
        sum_rules: None,
    }
}

#[test]
fn test_assembled_matrix_is_symmetric_with_nonnegative_diagonal() {
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..20 {
        let c = random_covariance(&mut rng, 8);
        let assembled = CovarianceAssembler::new()
            .assemble(&record_from_matrix(&c))
            .unwrap();
        assert_eq!(assembled.dim(), 8);
        assert!(assembled.is_symmetric());
        assert!((0..8).all(|i| assembled.matrix[(i, i)] >= 0.0));
        assert_eq!(assembled.repairs.count(), 0);
        for i in 0..8 {
            for j in i..8 {
                assert_eq!(assembled.matrix[(i, j)], c[(i, j)]);
            }
        }
    }
}

#[test]
fn test_planted_negative_variance_is_repaired_once() {
    let mut rng = StdRng::seed_from_u64(11);
    let mut c = random_covariance(&mut rng, 8);
    c[(4, 4)] = -0.3;
    let assembled = CovarianceAssembler::new()
        .assemble(&record_from_matrix(&c))
        .unwrap();
    assert_eq!(assembled.repairs.count(), 1);
    let repair = &assembled.repairs.repairs[0];
    assert_eq!(repair.index, 4);
    assert_eq!(repair.mt, 16);
    assert_eq!(repair.group, 1);
    assert_eq!(repair.value, -0.3);
    assert_eq!(assembled.matrix[(4, 4)], 0.3);
}

#[test]
fn test_identity_spectrum_keeps_full_rank() {
    let basis = SpectralReducer::new(99.9)
        .decompose(&DMatrix::identity(5, 5))
        .unwrap();
    assert_eq!(basis.rank(), 5);
}

#[test]
fn test_truncated_basis_reaches_target_fraction() {
    let mut rng = StdRng::seed_from_u64(3);
    let c = random_covariance(&mut rng, 8);
    for fraction in [80.0, 95.0, 99.9] {
        let basis = SpectralReducer::new(fraction).decompose(&c).unwrap();
        assert!(basis.rank() >= 1 && basis.rank() <= 8);
        assert!(basis.variance_captured() >= fraction - 1e-9);
        assert!(basis.orthogonality_error() < 1e-10);
    }
}

#[test]
fn test_perturbation_field_stays_within_bounds() {
    let mut rng = StdRng::seed_from_u64(19);
    let c = random_covariance(&mut rng, 8);
    let assembled = CovarianceAssembler::new()
        .assemble(&record_from_matrix(&c))
        .unwrap();
    let basis = SpectralReducer::full().decompose(&assembled.matrix).unwrap();
    let mapper = SampleMapper::default();
    for scale in [1.0, 10.0, 1000.0] {
        for _ in 0..50 {
            let xi: Vec<f64> = (0..basis.rank())
                .map(|_| scale * rng.sample::<f64, _>(StandardNormal))
                .collect();
            let field = mapper.map(&basis, &assembled.layout, &xi).unwrap();
            assert_eq!(field.values.len(), 8);
            assert!(field.values.iter().all(|&v| (0.0..=2.0).contains(&v)));
        }
    }
}

#[test]
fn test_total_equals_sum_of_perturbed_partials() {
    let mut rng = StdRng::seed_from_u64(23);
    let c = random_covariance(&mut rng, 8);
    let record = record_from_matrix(&c);
    let assembled = CovarianceAssembler::new().assemble(&record).unwrap();
    let basis = SpectralReducer::new(99.9).decompose(&assembled.matrix).unwrap();
    let baseline = record.baseline();

    for _ in 0..10 {
        let xi: Vec<f64> = (0..basis.rank())
            .map(|_| rng.sample::<f64, _>(StandardNormal))
            .collect();
        let field = SampleMapper::default()
            .map(&basis, &assembled.layout, &xi)
            .unwrap();
        let curves = CurveReconstructor::new().apply(&baseline, &field).unwrap();
        let by_mt = |mt: i32| curves.iter().find(|c| c.mt == mt).unwrap();

        let total = by_mt(1);
        for (i, &e) in total.energy.iter().enumerate() {
            let expected = by_mt(2).cross_section_at(e)
                + by_mt(16).cross_section_at(e)
                + by_mt(102).cross_section_at(e);
            assert!((total.cross_section[i] - expected).abs() <= 1e-12 * expected.abs().max(1.0));
        }
        assert!(curves.iter().all(|c| c.cross_section.iter().all(|v| *v >= 0.0)));
    }
}

#[test]
fn test_sample_length_must_match_rank() {
    let mut rng = StdRng::seed_from_u64(29);
    let c = random_covariance(&mut rng, 8);
    let assembled = CovarianceAssembler::new()
        .assemble(&record_from_matrix(&c))
        .unwrap();
    let basis = SpectralReducer::full().decompose(&assembled.matrix).unwrap();
    let err = SampleMapper::default()
        .map(&basis, &assembled.layout, &vec![0.0; basis.rank() + 1])
        .unwrap_err();
    assert!(matches!(
        err,
        UqError::DimensionMismatch { what: "sample vector", .. }
    ));
}

#[test]
fn test_missing_self_block_is_reported() {
    let mut rng = StdRng::seed_from_u64(31);
    let c = random_covariance(&mut rng, 8);
    let mut record = record_from_matrix(&c);
    record.blocks.retain(|b| !(b.row_mt == 16 && b.col_mt == 16));
    let err = CovarianceAssembler::new().assemble(&record).unwrap_err();
    assert!(matches!(err, UqError::MissingChannelData { mt: 16, .. }));
}
