// Nuclide identity and lookup of upstream data files
use crate::error::{Result, UqError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Identity of an isotope: chemical symbol plus mass number.
///
/// Parsed from names such as `"Fe56"`, `"U235"` or `"Am242_m1"` (metastable
/// state). The canonical name doubles as the cache key, so two `Nuclide`
/// values that print the same always share one cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Nuclide {
    pub symbol: String,
    pub mass_number: u32,
    /// Metastable state (0 = ground state).
    pub metastable: u8,
}

impl Nuclide {
    pub fn new(symbol: &str, mass_number: u32) -> Self {
        Nuclide {
            symbol: symbol.to_string(),
            mass_number,
            metastable: 0,
        }
    }

    /// Canonical name, e.g. `Fe56`.
    pub fn name(&self) -> String {
        self.to_string()
    }

    /// Name under which a perturbed copy is registered, e.g. `Fe56_rand`.
    pub fn perturbed_name(&self, suffix: &str) -> String {
        format!("{}{}", self, suffix)
    }
}

impl fmt::Display for Nuclide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.symbol, self.mass_number)?;
        if self.metastable > 0 {
            write!(f, "_m{}", self.metastable)?;
        }
        Ok(())
    }
}

impl FromStr for Nuclide {
    type Err = UqError;

    fn from_str(name: &str) -> Result<Self> {
        let invalid = || UqError::InvalidNuclide(name.to_string());
        let (base, metastable) = match name.split_once("_m") {
            Some((base, state)) => (base, state.parse::<u8>().map_err(|_| invalid())?),
            None => (name, 0),
        };

        let symbol: String = base.chars().take_while(|c| c.is_ascii_alphabetic()).collect();
        let digits = &base[symbol.len()..];
        if symbol.is_empty() || symbol.len() > 2 || digits.is_empty() {
            return Err(invalid());
        }
        if !symbol.chars().next().map_or(false, |c| c.is_ascii_uppercase()) {
            return Err(invalid());
        }
        let mass_number = digits.parse::<u32>().map_err(|_| invalid())?;
        Ok(Nuclide {
            symbol,
            mass_number,
            metastable,
        })
    }
}

impl TryFrom<String> for Nuclide {
    type Error = UqError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Nuclide> for String {
    fn from(nuclide: Nuclide) -> Self {
        nuclide.to_string()
    }
}

/// Find the data file for a nuclide in `dir`.
///
/// A file matches when its name contains both the chemical symbol and the
/// mass number. When several files match, the shortest name wins (ties are
/// broken alphabetically so the choice is deterministic).
pub fn find_nuclide_file<P: AsRef<Path>>(dir: P, nuclide: &Nuclide) -> Result<PathBuf> {
    let dir = dir.as_ref();
    let mut file_names: Vec<String> = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            file_names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    if file_names.is_empty() {
        return Err(UqError::NuclideFileNotFound {
            nuclide: nuclide.name(),
            dir: format!("{} (directory is empty)", dir.display()),
        });
    }

    let mass = nuclide.mass_number.to_string();
    let mut matches: Vec<&String> = file_names
        .iter()
        .filter(|f| f.contains(nuclide.symbol.as_str()) && f.contains(mass.as_str()))
        .collect();
    matches.sort_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));

    match matches.as_slice() {
        [] => Err(UqError::NuclideFileNotFound {
            nuclide: nuclide.name(),
            dir: dir.display().to_string(),
        }),
        [only] => {
            log::debug!("Using {} for {}", only, nuclide);
            Ok(dir.join(only))
        }
        [shortest, ..] => {
            log::info!(
                "Multiple files matched for {}: {:?}; using shortest: {}",
                nuclide,
                matches,
                shortest
            );
            Ok(dir.join(shortest))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_parse_nuclide_names() {
        let fe: Nuclide = "Fe56".parse().unwrap();
        assert_eq!(fe.symbol, "Fe");
        assert_eq!(fe.mass_number, 56);
        assert_eq!(fe.to_string(), "Fe56");

        let u: Nuclide = "U235".parse().unwrap();
        assert_eq!(u, Nuclide::new("U", 235));

        let am: Nuclide = "Am242_m1".parse().unwrap();
        assert_eq!(am.metastable, 1);
        assert_eq!(am.to_string(), "Am242_m1");
    }

    #[test]
    fn test_parse_rejects_malformed_names() {
        for bad in ["", "56", "Fe", "fe56", "Fe56x", "Abc12", "Fe56_mx"] {
            assert!(
                matches!(bad.parse::<Nuclide>(), Err(UqError::InvalidNuclide(_))),
                "'{}' should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_perturbed_name() {
        let li6 = Nuclide::new("Li", 6);
        assert_eq!(li6.perturbed_name("_rand"), "Li6_rand");
    }

    #[test]
    fn test_serde_as_string() {
        let li6 = Nuclide::new("Li", 6);
        let json = serde_json::to_string(&li6).unwrap();
        assert_eq!(json, "\"Li6\"");
        let back: Nuclide = serde_json::from_str(&json).unwrap();
        assert_eq!(back, li6);
    }

    #[test]
    fn test_find_nuclide_file_prefers_shortest() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("n-026_Fe_056.endf"), "").unwrap();
        fs::write(dir.path().join("n-026_Fe_056-extra.endf"), "").unwrap();
        fs::write(dir.path().join("n-003_Li_006.endf"), "").unwrap();

        let path = find_nuclide_file(dir.path(), &Nuclide::new("Fe", 56)).unwrap();
        assert_eq!(path.file_name().unwrap(), "n-026_Fe_056.endf");

        let path = find_nuclide_file(dir.path(), &Nuclide::new("Li", 6)).unwrap();
        assert_eq!(path.file_name().unwrap(), "n-003_Li_006.endf");
    }

    #[test]
    fn test_find_nuclide_file_missing_and_empty() {
        let dir = tempfile::tempdir().unwrap();
        let err = find_nuclide_file(dir.path(), &Nuclide::new("Fe", 56)).unwrap_err();
        assert!(matches!(err, UqError::NuclideFileNotFound { .. }));

        fs::write(dir.path().join("Li6.json"), "{}").unwrap();
        let err = find_nuclide_file(dir.path(), &Nuclide::new("Fe", 56)).unwrap_err();
        assert!(matches!(err, UqError::NuclideFileNotFound { .. }));
    }
}
