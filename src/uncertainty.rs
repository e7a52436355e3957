// Upstream nuclide uncertainty records and the sources that provide them
use crate::error::{Result, UqError};
use crate::nuclide::{find_nuclide_file, Nuclide};
use crate::reaction::ReactionCurve;
use crate::reconstruct::{default_sum_rules, SumRule};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;

/// Raw covariance block between two reaction channels, rows indexed by the
/// groups of `row_mt` and columns by the groups of `col_mt`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CovarianceBlock {
    pub row_mt: i32,
    pub col_mt: i32,
    pub matrix: Vec<Vec<f64>>,
}

impl CovarianceBlock {
    pub fn new(row_mt: i32, col_mt: i32, matrix: Vec<Vec<f64>>) -> Self {
        CovarianceBlock {
            row_mt,
            col_mt,
            matrix,
        }
    }

    pub fn rows(&self) -> usize {
        self.matrix.len()
    }

    /// Column count, or `None` for a ragged matrix.
    pub fn cols(&self) -> Option<usize> {
        let first = self.matrix.first().map_or(0, |r| r.len());
        if self.matrix.iter().all(|r| r.len() == first) {
            Some(first)
        } else {
            None
        }
    }

    pub fn is_self_block(&self) -> bool {
        self.row_mt == self.col_mt
    }
}

/// Covariance already assembled upstream over channels `mts` (in that order).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectCovariance {
    pub mts: Vec<i32>,
    pub matrix: Vec<Vec<f64>>,
}

/// Everything the upstream nuclear-data toolchain produces for one nuclide.
///
/// * `curves` - baseline pointwise cross sections, one per MT.
/// * `groups` - covariance group edges per MT (eV); a channel with `n + 1`
///   edges owns `n` energy bins in the covariance matrix.
/// * `blocks` - raw relative-covariance blocks keyed by MT pair.
/// * `direct` - optional pre-assembled matrix; preferred when consistent.
/// * `sum_rules` - derived channels; the ENDF hierarchy is used when absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NuclideUncertainty {
    pub nuclide: Nuclide,
    pub curves: Vec<ReactionCurve>,
    #[serde(default)]
    pub groups: BTreeMap<i32, Vec<f64>>,
    #[serde(default)]
    pub blocks: Vec<CovarianceBlock>,
    #[serde(default)]
    pub direct: Option<DirectCovariance>,
    #[serde(default)]
    pub sum_rules: Option<Vec<SumRule>>,
}

impl NuclideUncertainty {
    pub fn curve(&self, mt: i32) -> Option<&ReactionCurve> {
        self.curves.iter().find(|c| c.mt == mt)
    }

    /// True when at least one independent channel carries self-covariance
    /// data. Derived channels do not count; their covariance is discarded.
    pub fn has_covariance(&self) -> bool {
        let derived: HashSet<i32> = self.resolved_sum_rules().iter().map(|r| r.mt).collect();
        self.blocks
            .iter()
            .any(|b| b.is_self_block() && !derived.contains(&b.row_mt))
            || self
                .direct
                .as_ref()
                .map_or(false, |d| d.mts.iter().any(|mt| !derived.contains(mt)))
    }

    /// Explicit sum rules, or the ENDF hierarchy restricted to present channels.
    pub fn resolved_sum_rules(&self) -> Vec<SumRule> {
        match &self.sum_rules {
            Some(rules) => rules.clone(),
            None => {
                let present: Vec<i32> = self.curves.iter().map(|c| c.mt).collect();
                default_sum_rules(&present)
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for curve in &self.curves {
            curve.validate()?;
            if !seen.insert(curve.mt) {
                return Err(UqError::InvalidCurve {
                    mt: curve.mt,
                    reason: "duplicate baseline curve".to_string(),
                });
            }
        }
        for (&mt, edges) in &self.groups {
            if edges.len() < 2 {
                return Err(UqError::InvalidCurve {
                    mt,
                    reason: format!("group structure needs at least 2 edges, got {}", edges.len()),
                });
            }
            if edges.windows(2).any(|w| !(w[1] > w[0])) {
                return Err(UqError::InvalidCurve {
                    mt,
                    reason: "group edges not strictly increasing".to_string(),
                });
            }
        }
        Ok(())
    }

    /// The part of the record needed again at sampling time.
    pub fn baseline(&self) -> Baseline {
        let mut curves = self.curves.clone();
        curves.sort_by_key(|c| c.mt);
        Baseline {
            nuclide: self.nuclide.clone(),
            curves,
            sum_rules: self.resolved_sum_rules(),
        }
    }
}

/// Unperturbed curves plus the sum rules used to rebuild derived channels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub nuclide: Nuclide,
    pub curves: Vec<ReactionCurve>,
    pub sum_rules: Vec<SumRule>,
}

/// Provider of upstream uncertainty records, one per nuclide.
///
/// Implementations must be shareable across worker threads: the batch
/// driver fetches different nuclides concurrently.
pub trait UncertaintySource: Sync {
    fn fetch(&self, nuclide: &Nuclide) -> Result<NuclideUncertainty>;
}

/// Reads `NuclideUncertainty` JSON files from a directory, locating each
/// nuclide's file by symbol and mass number.
#[derive(Debug, Clone)]
pub struct JsonDirectorySource {
    pub dir: PathBuf,
}

impl JsonDirectorySource {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        JsonDirectorySource { dir: dir.into() }
    }
}

impl UncertaintySource for JsonDirectorySource {
    fn fetch(&self, nuclide: &Nuclide) -> Result<NuclideUncertainty> {
        let path = find_nuclide_file(&self.dir, nuclide)?;
        let text = std::fs::read_to_string(&path)?;
        let record: NuclideUncertainty = serde_json::from_str(&text)?;
        if &record.nuclide != nuclide {
            return Err(UqError::InvalidNuclide(format!(
                "{} holds data for {}, not {}",
                path.display(),
                record.nuclide,
                nuclide
            )));
        }
        record.validate()?;
        Ok(record)
    }
}

/// In-memory records, handy when the upstream toolchain runs in-process.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    records: HashMap<Nuclide, NuclideUncertainty>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, record: NuclideUncertainty) {
        self.records.insert(record.nuclide.clone(), record);
    }
}

impl UncertaintySource for MemorySource {
    fn fetch(&self, nuclide: &Nuclide) -> Result<NuclideUncertainty> {
        let record = self
            .records
            .get(nuclide)
            .cloned()
            .ok_or_else(|| UqError::NuclideFileNotFound {
                nuclide: nuclide.name(),
                dir: "<memory>".to_string(),
            })?;
        record.validate()?;
        Ok(record)
    }
}
