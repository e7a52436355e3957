use crate::error::{Result, UqError};
use serde::{Deserialize, Serialize};

/// Pointwise cross section of one reaction channel (identified by ENDF/MT
/// number).
///
/// `energy` is in eV and strictly increasing; `cross_section` values are in
/// barns and correspond 1-to-1 with `energy`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ReactionCurve {
    pub mt: i32,
    pub energy: Vec<f64>,
    pub cross_section: Vec<f64>,
}

impl ReactionCurve {
    pub fn new(mt: i32, energy: Vec<f64>, cross_section: Vec<f64>) -> Self {
        ReactionCurve {
            mt,
            energy,
            cross_section,
        }
    }

    pub fn len(&self) -> usize {
        self.energy.len()
    }

    pub fn is_empty(&self) -> bool {
        self.energy.is_empty()
    }

    /// Check equal lengths, finite values and a strictly increasing energy grid.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| UqError::InvalidCurve {
            mt: self.mt,
            reason,
        };
        if self.energy.len() != self.cross_section.len() {
            return Err(invalid(format!(
                "{} energies but {} cross section values",
                self.energy.len(),
                self.cross_section.len()
            )));
        }
        if let Some(i) = self
            .energy
            .iter()
            .chain(self.cross_section.iter())
            .position(|v| !v.is_finite())
        {
            return Err(invalid(format!("non-finite value at position {}", i)));
        }
        if let Some(i) = self.energy.windows(2).position(|w| w[1] <= w[0]) {
            return Err(invalid(format!(
                "energy grid not strictly increasing at index {} ({} -> {})",
                i + 1,
                self.energy[i],
                self.energy[i + 1]
            )));
        }
        Ok(())
    }

    /// Cross section at `energy` by linear interpolation.
    ///
    /// Below the first grid point the reaction is closed and 0.0 is returned;
    /// above the last grid point the last value is held.
    #[inline]
    pub fn cross_section_at(&self, energy: f64) -> f64 {
        let n = self.energy.len();
        if n == 0 || energy < self.energy[0] {
            return 0.0;
        }
        if energy >= self.energy[n - 1] {
            return self.cross_section[n - 1];
        }

        // x[idx-1] <= energy < x[idx]
        let idx = self.energy.partition_point(|&e| e <= energy);
        let i = idx - 1;
        let e0 = self.energy[i];
        let e1 = self.energy[idx];
        let xs0 = self.cross_section[i];
        let xs1 = self.cross_section[idx];
        let t = (energy - e0) / (e1 - e0);
        xs0 + t * (xs1 - xs0)
    }
}
