// On-disk cache of per-nuclide preprocessing artifacts and spectral bases
use crate::covariance::AssembledCovariance;
use crate::error::{Result, UqError};
use crate::nuclide::Nuclide;
use crate::spectral::SpectralBasis;
use crate::uncertainty::Baseline;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

const BASELINE_FILE: &str = "baseline.json";
const COVARIANCE_FILE: &str = "covariance.json";
const BASIS_FILE: &str = "basis.json";

/// Everything needed to sample a nuclide without touching upstream data.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub baseline: Baseline,
    pub covariance: AssembledCovariance,
    pub basis: SpectralBasis,
}

/// Directory-backed cache, one sub-directory per nuclide:
///
/// ```text
/// <root>/Fe56/baseline.json
/// <root>/Fe56/covariance.json
/// <root>/Fe56/basis.json
/// ```
///
/// Workers may use one cache concurrently as long as each nuclide is owned
/// by a single worker; different nuclides never share a file.
#[derive(Debug, Clone)]
pub struct BasisCache {
    root: PathBuf,
}

impl BasisCache {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        BasisCache { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entry_dir(&self, nuclide: &Nuclide) -> PathBuf {
        self.root.join(nuclide.name())
    }

    /// Store the spectral basis, replacing any previous one.
    pub fn save(&self, nuclide: &Nuclide, basis: &SpectralBasis) -> Result<()> {
        let dir = self.entry_dir(nuclide);
        fs::create_dir_all(&dir)?;
        write_json(&dir.join(BASIS_FILE), basis)
    }

    /// Cached basis, or `None` unless the whole entry is present and readable.
    pub fn load(&self, nuclide: &Nuclide) -> Option<SpectralBasis> {
        self.load_entry(nuclide).map(|entry| entry.basis)
    }

    /// Store a complete entry. The basis is written last so that an
    /// interrupted store never leaves a basis next to stale inputs.
    pub fn store(&self, entry: &CacheEntry) -> Result<()> {
        let nuclide = &entry.baseline.nuclide;
        let dir = self.entry_dir(nuclide);
        fs::create_dir_all(&dir)?;
        let basis_path = dir.join(BASIS_FILE);
        if basis_path.exists() {
            fs::remove_file(&basis_path)?;
        }
        write_json(&dir.join(BASELINE_FILE), &entry.baseline)?;
        write_json(&dir.join(COVARIANCE_FILE), &entry.covariance)?;
        self.save(nuclide, &entry.basis)?;
        log::debug!("cached {} in {}", nuclide, dir.display());
        Ok(())
    }

    /// Complete entry, `Ok(None)` if the nuclide was never cached, or
    /// `CacheCorrupt` when only part of it is usable.
    pub fn try_load_entry(&self, nuclide: &Nuclide) -> Result<Option<CacheEntry>> {
        let dir = self.entry_dir(nuclide);
        let paths = [
            dir.join(BASELINE_FILE),
            dir.join(COVARIANCE_FILE),
            dir.join(BASIS_FILE),
        ];
        let present = paths.iter().filter(|p| p.exists()).count();
        if present == 0 {
            return Ok(None);
        }
        if present < paths.len() {
            return Err(UqError::cache_corrupt(
                nuclide.name(),
                format!("{} of {} artifacts present", present, paths.len()),
            ));
        }

        let baseline: Baseline = read_json(nuclide, &paths[0])?;
        let covariance: AssembledCovariance = read_json(nuclide, &paths[1])?;
        let basis: SpectralBasis = read_json(nuclide, &paths[2])?;

        if &baseline.nuclide != nuclide || &covariance.nuclide != nuclide {
            return Err(UqError::cache_corrupt(
                nuclide.name(),
                "artifacts belong to a different nuclide",
            ));
        }
        if basis.dim() != covariance.dim() || basis.full_rank != covariance.dim() {
            return Err(UqError::cache_corrupt(
                nuclide.name(),
                format!(
                    "basis dimension {} does not match covariance dimension {}",
                    basis.dim(),
                    covariance.dim()
                ),
            ));
        }
        Ok(Some(CacheEntry {
            baseline,
            covariance,
            basis,
        }))
    }

    /// Like [`BasisCache::try_load_entry`] but corruption degrades to a miss.
    pub fn load_entry(&self, nuclide: &Nuclide) -> Option<CacheEntry> {
        match self.try_load_entry(nuclide) {
            Ok(entry) => entry,
            Err(err) => {
                log::warn!("{}; recomputing", err);
                None
            }
        }
    }

    /// Drop every artifact of a nuclide.
    pub fn invalidate(&self, nuclide: &Nuclide) -> Result<()> {
        let dir = self.entry_dir(nuclide);
        if dir.exists() {
            fs::remove_dir_all(dir)?;
        }
        Ok(())
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_vec(value)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(nuclide: &Nuclide, path: &Path) -> Result<T> {
    let bytes = fs::read(path).map_err(|e| {
        UqError::cache_corrupt(nuclide.name(), format!("{}: {}", path.display(), e))
    })?;
    serde_json::from_slice(&bytes).map_err(|e| {
        UqError::cache_corrupt(nuclide.name(), format!("{}: {}", path.display(), e))
    })
}
