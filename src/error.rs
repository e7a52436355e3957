// Error taxonomy for covariance assembly, decomposition, caching and sampling

use std::fmt;
use thiserror::Error;

/// Stage of per-nuclide processing at which a failure surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Load,
    Assemble,
    Decompose,
    Cache,
    Sample,
    Reconstruct,
    Export,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStage::Load => "load",
            PipelineStage::Assemble => "assemble",
            PipelineStage::Decompose => "decompose",
            PipelineStage::Cache => "cache",
            PipelineStage::Sample => "sample",
            PipelineStage::Reconstruct => "reconstruct",
            PipelineStage::Export => "export",
        };
        f.write_str(name)
    }
}

/// Unified error type for the crate.
#[derive(Error, Debug)]
pub enum UqError {
    /// A reaction channel has no self-covariance block.
    #[error("nuclide {nuclide}: no covariance self-block for MT {mt}")]
    MissingChannelData { nuclide: String, mt: i32 },

    /// The upstream record carries no covariance data at all.
    #[error("nuclide {0} has no covariance data")]
    NoCovariance(String),

    /// A block disagrees with the channel grids (or with another block for the same pair).
    #[error("grid mismatch for block MT {row_mt} x MT {col_mt}: expected {expected_rows}x{expected_cols}, found {found_rows}x{found_cols}")]
    GridMismatch {
        row_mt: i32,
        col_mt: i32,
        expected_rows: usize,
        expected_cols: usize,
        found_rows: usize,
        found_cols: usize,
    },

    #[error("decomposition failed: {0}")]
    DecompositionError(String),

    #[error("dimension mismatch for {what}: expected {expected}, found {found}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    /// A sum rule references a constituent that is not in the perturbed set.
    #[error("derived MT {derived} references absent constituent MT {missing}")]
    ChannelNotFound { derived: i32, missing: i32 },

    /// Cache artifacts are missing or unreadable. Callers treat this as a miss.
    #[error("cache entry for {nuclide} is unusable: {reason}")]
    CacheCorrupt { nuclide: String, reason: String },

    #[error("invalid curve for MT {mt}: {reason}")]
    InvalidCurve { mt: i32, reason: String },

    #[error("invalid sample: {0}")]
    InvalidSample(String),

    #[error("invalid nuclide name '{0}'")]
    InvalidNuclide(String),

    #[error("no data file for {nuclide} in {dir}")]
    NuclideFileNotFound { nuclide: String, dir: String },

    /// A model input file lacks the structure needed to edit it.
    #[error("input deck error: {0}")]
    Deck(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Fatal error annotated with the nuclide and the stage that failed.
    #[error("nuclide {nuclide} failed during {stage}: {source}")]
    Stage {
        nuclide: String,
        stage: PipelineStage,
        #[source]
        source: Box<UqError>,
    },
}

impl UqError {
    /// Wrap an error with nuclide and stage context.
    pub fn stage(nuclide: impl Into<String>, stage: PipelineStage, source: UqError) -> Self {
        UqError::Stage {
            nuclide: nuclide.into(),
            stage,
            source: Box::new(source),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        UqError::Config(message.into())
    }

    pub fn cache_corrupt(nuclide: impl Into<String>, reason: impl Into<String>) -> Self {
        UqError::CacheCorrupt {
            nuclide: nuclide.into(),
            reason: reason.into(),
        }
    }

    /// Innermost error, skipping any `Stage` wrappers.
    pub fn root(&self) -> &UqError {
        match self {
            UqError::Stage { source, .. } => source.root(),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, UqError>;
