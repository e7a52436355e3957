// Run configuration for covariance reduction and sampling
use crate::error::{Result, UqError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Closed interval that every perturbation multiplier is clipped into.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerturbationBounds {
    pub lower: f64,
    pub upper: f64,
}

impl Default for PerturbationBounds {
    fn default() -> Self {
        PerturbationBounds {
            lower: 0.0,
            upper: 2.0,
        }
    }
}

impl PerturbationBounds {
    #[inline]
    pub fn clip(&self, value: f64) -> f64 {
        value.max(self.lower).min(self.upper)
    }
}

/// Configuration container for preprocessing and sampling runs.
///
/// Every field has a default so a JSON file only needs to name what it
/// changes. The value is passed explicitly to [`crate::Engine`]; nothing in
/// the crate reads configuration from global state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Target explained-variance fraction in percent (0 < F <= 100).
    pub variance_fraction: f64,
    /// Truncate the spectral basis to `variance_fraction`; when false the full rank is kept.
    pub dimension_reduction: bool,
    /// Ignore cached artifacts and recompute (then overwrite) them.
    pub force: bool,
    pub perturbation_bounds: PerturbationBounds,
    /// Root directory of the per-nuclide basis cache.
    pub cache_dir: PathBuf,
    /// Directory holding the upstream uncertainty records.
    pub data_dir: PathBuf,
    /// Directory perturbed curves are exported to.
    pub output_dir: PathBuf,
    /// Appended to a nuclide name to form the perturbed nuclide name.
    pub perturbed_suffix: String,
    /// Nuclide names to process, e.g. ["Fe56", "Li6"].
    pub nuclides: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            variance_fraction: 99.9,
            dimension_reduction: true,
            force: false,
            perturbation_bounds: PerturbationBounds::default(),
            cache_dir: default_cache_dir(),
            data_dir: PathBuf::from("."),
            output_dir: PathBuf::from("ND_sample"),
            perturbed_suffix: "_rand".to_string(),
            nuclides: Vec::new(),
        }
    }
}

/// `~/.cache/xs_uq`, or `./xs_uq_cache` when no home directory is known.
pub fn default_cache_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".cache").join("xs_uq"))
        .unwrap_or_else(|| PathBuf::from("xs_uq_cache"))
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read and validate a JSON configuration file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: Config = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let f = self.variance_fraction;
        if !(f > 0.0 && f <= 100.0) {
            return Err(UqError::config(format!(
                "variance_fraction must lie in (0, 100], got {}",
                f
            )));
        }
        let b = self.perturbation_bounds;
        if !(b.lower.is_finite() && b.upper.is_finite()) || b.lower < 0.0 || b.lower >= b.upper {
            return Err(UqError::config(format!(
                "perturbation bounds must satisfy 0 <= lower < upper, got [{}, {}]",
                b.lower, b.upper
            )));
        }
        if self.perturbed_suffix.is_empty() {
            return Err(UqError::config("perturbed_suffix must not be empty"));
        }
        Ok(())
    }

    /// Fraction handed to the spectral reducer, or `None` for the full rank.
    pub fn truncation(&self) -> Option<f64> {
        if self.dimension_reduction {
            Some(self.variance_fraction)
        } else {
            None
        }
    }

    pub fn with_variance_fraction(mut self, fraction: f64) -> Self {
        self.variance_fraction = fraction;
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn with_dimension_reduction(mut self, enabled: bool) -> Self {
        self.dimension_reduction = enabled;
        self
    }

    pub fn with_bounds(mut self, lower: f64, upper: f64) -> Self {
        self.perturbation_bounds = PerturbationBounds { lower, upper };
        self
    }

    pub fn with_cache_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.cache_dir = dir.into();
        self
    }

    pub fn with_data_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.data_dir = dir.into();
        self
    }

    pub fn with_output_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.output_dir = dir.into();
        self
    }
}
