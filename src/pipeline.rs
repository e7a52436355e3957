//! Per-nuclide preprocessing and sampling, plus the parallel batch drivers.
//!
//! Preprocessing runs `fetch -> assemble -> decompose -> cache` once per
//! nuclide. Sampling reuses the cached artifacts: `map -> reconstruct ->
//! export`. Nuclides are independent, so the batch drivers hand them to
//! rayon and collect per-nuclide outcomes; one failure never stops the rest.

use crate::cache::{BasisCache, CacheEntry};
use crate::config::Config;
use crate::covariance::{CovarianceAssembler, Extraction};
use crate::error::{PipelineStage, Result, UqError};
use crate::nuclide::Nuclide;
use crate::reconstruct::{CurveReconstructor, PerturbedNuclide};
use crate::sampling::{split_samples, SampleMapper};
use crate::spectral::SpectralReducer;
use crate::uncertainty::UncertaintySource;
use rayon::prelude::*;
use serde::Serialize;
use std::path::PathBuf;

/// Summary of one preprocessed nuclide.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostics {
    pub nuclide: String,
    pub full_rank: usize,
    pub retained_rank: usize,
    /// Percentage of the total variance kept by the retained components.
    pub variance_captured: f64,
    /// Number of negative variances that were replaced by their magnitude.
    pub repairs: usize,
    pub max_repair_magnitude: f64,
    pub extraction: Extraction,
    pub from_cache: bool,
}

impl Diagnostics {
    fn new(entry: &CacheEntry, from_cache: bool) -> Self {
        Diagnostics {
            nuclide: entry.baseline.nuclide.name(),
            full_rank: entry.basis.full_rank,
            retained_rank: entry.basis.rank(),
            variance_captured: entry.basis.variance_captured(),
            repairs: entry.covariance.repairs.count(),
            max_repair_magnitude: entry.covariance.repairs.max_magnitude(),
            extraction: entry.covariance.extraction,
            from_cache,
        }
    }
}

/// Cached artifacts of a nuclide together with how they were obtained.
#[derive(Debug, Clone)]
pub struct PreparedNuclide {
    pub entry: CacheEntry,
    pub diagnostics: Diagnostics,
}

impl PreparedNuclide {
    pub fn nuclide(&self) -> &Nuclide {
        &self.entry.baseline.nuclide
    }

    /// Length of the latent sample this nuclide consumes.
    pub fn dimension(&self) -> usize {
        self.entry.basis.rank()
    }
}

/// Outcome of [`Engine::preprocess_all`].
#[derive(Debug, Default)]
pub struct BatchReport {
    pub prepared: Vec<Diagnostics>,
    /// Nuclides whose records carry no covariance data.
    pub skipped: Vec<String>,
    pub failed: Vec<(String, UqError)>,
}

impl BatchReport {
    /// Sample dimension (retained rank) per prepared nuclide, in input order.
    pub fn dimensions(&self) -> Vec<(String, usize)> {
        self.prepared
            .iter()
            .map(|d| (d.nuclide.clone(), d.retained_rank))
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Outcome of [`Engine::sample_all`].
#[derive(Debug, Default)]
pub struct SampleReport {
    pub written: Vec<(String, PathBuf)>,
    pub failed: Vec<(String, UqError)>,
}

/// Ties configuration, an upstream source and the on-disk cache together.
pub struct Engine<S: UncertaintySource> {
    config: Config,
    source: S,
    cache: BasisCache,
    assembler: CovarianceAssembler,
    reducer: SpectralReducer,
    mapper: SampleMapper,
    reconstructor: CurveReconstructor,
}

impl<S: UncertaintySource> Engine<S> {
    pub fn new(config: Config, source: S) -> Result<Self> {
        config.validate()?;
        Ok(Engine {
            cache: BasisCache::new(config.cache_dir.clone()),
            assembler: CovarianceAssembler::new(),
            reducer: SpectralReducer::from_config(&config),
            mapper: SampleMapper::new(config.perturbation_bounds),
            reconstructor: CurveReconstructor::new(),
            config,
            source,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &BasisCache {
        &self.cache
    }

    /// Cached artifacts for `nuclide`, computing and storing them when the
    /// cache is empty, unusable, built for another truncation, or `force`
    /// is set.
    pub fn prepare(&self, nuclide: &Nuclide) -> Result<PreparedNuclide> {
        if !self.config.force {
            if let Some(entry) = self.cache.load_entry(nuclide) {
                if entry.basis.target_fraction == self.reducer.fraction() {
                    log::debug!("{}: using cached basis", nuclide);
                    let diagnostics = Diagnostics::new(&entry, true);
                    return Ok(PreparedNuclide { entry, diagnostics });
                }
                log::info!(
                    "{}: cached basis was built for a different truncation; recomputing",
                    nuclide
                );
            }
        }

        let name = nuclide.name();
        let record = self
            .source
            .fetch(nuclide)
            .map_err(|e| UqError::stage(&name, PipelineStage::Load, e))?;
        if !record.has_covariance() {
            return Err(UqError::NoCovariance(name));
        }
        let covariance = self
            .assembler
            .assemble(&record)
            .map_err(|e| UqError::stage(&name, PipelineStage::Assemble, e))?;
        let basis = self
            .reducer
            .reduce(&covariance)
            .map_err(|e| UqError::stage(&name, PipelineStage::Decompose, e))?;

        let entry = CacheEntry {
            baseline: record.baseline(),
            covariance,
            basis,
        };
        self.cache
            .store(&entry)
            .map_err(|e| UqError::stage(&name, PipelineStage::Cache, e))?;

        let diagnostics = Diagnostics::new(&entry, false);
        Ok(PreparedNuclide { entry, diagnostics })
    }

    /// Turn one latent sample into perturbed curves.
    pub fn sample(&self, prepared: &PreparedNuclide, sample: &[f64]) -> Result<PerturbedNuclide> {
        let entry = &prepared.entry;
        let nuclide = prepared.nuclide();
        let field = self
            .mapper
            .map(&entry.basis, &entry.covariance.layout, sample)
            .map_err(|e| UqError::stage(nuclide.name(), PipelineStage::Sample, e))?;
        let curves = self
            .reconstructor
            .apply(&entry.baseline, &field)
            .map_err(|e| UqError::stage(nuclide.name(), PipelineStage::Reconstruct, e))?;
        Ok(PerturbedNuclide {
            nuclide: nuclide.clone(),
            name: nuclide.perturbed_name(&self.config.perturbed_suffix),
            curves,
        })
    }

    /// Prepare every nuclide in parallel.
    pub fn preprocess_all(&self, nuclides: &[Nuclide]) -> BatchReport {
        let outcomes: Vec<(String, Result<PreparedNuclide>)> = nuclides
            .par_iter()
            .map(|n| (n.name(), self.prepare(n)))
            .collect();

        let mut report = BatchReport::default();
        for (name, outcome) in outcomes {
            match outcome {
                Ok(prepared) => report.prepared.push(prepared.diagnostics),
                Err(UqError::NoCovariance(_)) => {
                    log::info!("{}: no covariance data, skipping", name);
                    report.skipped.push(name);
                }
                Err(err) => {
                    log::error!("{}", err);
                    report.failed.push((name, err));
                }
            }
        }
        log::info!(
            "preprocessed {} nuclides ({} skipped, {} failed)",
            report.prepared.len(),
            report.skipped.len(),
            report.failed.len()
        );
        report
    }

    /// Split a concatenated latent sample across `nuclides` (each taking
    /// `dims[i]` values) and write every perturbed nuclide to the output
    /// directory.
    pub fn sample_all(
        &self,
        nuclides: &[Nuclide],
        dims: &[usize],
        samples: &[f64],
    ) -> Result<SampleReport> {
        if nuclides.len() != dims.len() {
            return Err(UqError::DimensionMismatch {
                what: "nuclide dimension list",
                expected: nuclides.len(),
                found: dims.len(),
            });
        }
        let parts = split_samples(samples, dims)?;
        let output_dir = &self.config.output_dir;

        let outcomes: Vec<(String, Result<PathBuf>)> = nuclides
            .par_iter()
            .zip(parts.par_iter())
            .map(|(nuclide, part)| {
                let outcome = self.prepare(nuclide).and_then(|prepared| {
                    let perturbed = self.sample(&prepared, part)?;
                    perturbed
                        .write_json(output_dir)
                        .map_err(|e| UqError::stage(nuclide.name(), PipelineStage::Export, e))
                });
                (nuclide.name(), outcome)
            })
            .collect();

        let mut report = SampleReport::default();
        for (name, outcome) in outcomes {
            match outcome {
                Ok(path) => report.written.push((name, path)),
                Err(err) => {
                    log::error!("{}", err);
                    report.failed.push((name, err));
                }
            }
        }
        Ok(report)
    }
}
