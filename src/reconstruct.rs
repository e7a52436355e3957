// Application of perturbation fields to baseline curves and rebuilding of
// derived (summed) reaction channels
use crate::data::{reaction_label, DISAPPEARANCE_MTS, INELASTIC_CONSTITUENT_MTS};
use crate::error::{Result, UqError};
use crate::nuclide::Nuclide;
use crate::reaction::ReactionCurve;
use crate::sampling::PerturbationField;
use crate::uncertainty::Baseline;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// A derived channel equal to the sum of its constituents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SumRule {
    pub mt: i32,
    pub constituents: Vec<i32>,
}

impl SumRule {
    pub fn new(mt: i32, constituents: Vec<i32>) -> Self {
        SumRule { mt, constituents }
    }
}

// Fission partials folded into MT 18
const FISSION_PARTIAL_MTS: [i32; 4] = [19, 20, 21, 38];

/// ENDF redundant-channel hierarchy restricted to the channels present.
///
/// Rules come out in dependency order (4, 101, 27, 3, 1) so later rules may
/// use the results of earlier ones. A rule is produced only when it has
/// constituents; MT 1 additionally needs both MT 2 and MT 3. A hierarchy MT
/// without constituents stays an ordinary channel.
pub fn default_sum_rules(present: &[i32]) -> Vec<SumRule> {
    const TARGETS: [i32; 5] = [4, 101, 27, 3, 1];
    let present: BTreeSet<i32> = present.iter().copied().collect();
    let mut available: BTreeSet<i32> = present
        .iter()
        .copied()
        .filter(|mt| !TARGETS.contains(mt))
        .collect();
    let mut rules = Vec::new();

    let mut settle = |target: i32, constituents: Vec<i32>, available: &mut BTreeSet<i32>| {
        if !constituents.is_empty() {
            rules.push(SumRule::new(target, constituents));
            available.insert(target);
        } else if present.contains(&target) {
            available.insert(target);
        }
    };

    // MT 4: total inelastic
    let c: Vec<i32> = available
        .iter()
        .copied()
        .filter(|mt| INELASTIC_CONSTITUENT_MTS.contains(mt))
        .collect();
    settle(4, c, &mut available);

    // MT 101: disappearance
    let c: Vec<i32> = available
        .iter()
        .copied()
        .filter(|mt| DISAPPEARANCE_MTS.contains(mt))
        .collect();
    settle(101, c, &mut available);

    // MT 27: absorption
    let c: Vec<i32> = available
        .iter()
        .copied()
        .filter(|&mt| mt == 18 || mt == 101)
        .collect();
    settle(27, c, &mut available);

    // MT 3: non-elastic, skipping anything already folded into a partial sum
    let has = |mt: i32, available: &BTreeSet<i32>| available.contains(&mt);
    let c: Vec<i32> = available
        .iter()
        .copied()
        .filter(|&mt| mt < 200 && mt != 2 && mt != 27)
        .filter(|mt| !(has(4, &available) && INELASTIC_CONSTITUENT_MTS.contains(mt)))
        .filter(|mt| !(has(101, &available) && DISAPPEARANCE_MTS.contains(mt)))
        .filter(|mt| !(has(18, &available) && FISSION_PARTIAL_MTS.contains(mt)))
        .collect();
    settle(3, c, &mut available);

    // MT 1: total
    let c = if available.contains(&2) && available.contains(&3) {
        vec![2, 3]
    } else {
        Vec::new()
    };
    settle(1, c, &mut available);

    rules
}

/// Perturbed cross sections of one nuclide, ready for export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerturbedNuclide {
    pub nuclide: Nuclide,
    /// Name the perturbed data is registered under, e.g. `Fe56_rand`.
    pub name: String,
    pub curves: Vec<ReactionCurve>,
}

impl PerturbedNuclide {
    pub fn curve(&self, mt: i32) -> Option<&ReactionCurve> {
        self.curves.iter().find(|c| c.mt == mt)
    }

    /// Write `<dir>/<name>.json` and return its path.
    pub fn write_json<P: AsRef<Path>>(&self, dir: P) -> Result<PathBuf> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.json", self.name));
        std::fs::write(&path, serde_json::to_vec_pretty(self)?)?;
        Ok(path)
    }
}

/// Applies a [`PerturbationField`] to baseline curves.
#[derive(Debug, Clone, Copy, Default)]
pub struct CurveReconstructor;

impl CurveReconstructor {
    pub fn new() -> Self {
        CurveReconstructor
    }

    /// Multiply every pointwise value by the field entry of its (channel,
    /// group) and rebuild derived channels from the perturbed constituents.
    ///
    /// Points at or below a channel's first group edge keep their baseline value.
    /// Channels without covariance data are copied unchanged.
    pub fn apply(
        &self,
        baseline: &Baseline,
        field: &PerturbationField,
    ) -> Result<Vec<ReactionCurve>> {
        let derived: BTreeSet<i32> = baseline.sum_rules.iter().map(|r| r.mt).collect();
        let mut curves: BTreeMap<i32, ReactionCurve> = BTreeMap::new();

        for curve in baseline.curves.iter().filter(|c| !derived.contains(&c.mt)) {
            let perturbed = match field.layout.span(curve.mt) {
                Some(_) => {
                    let cross_section = curve
                        .energy
                        .iter()
                        .zip(&curve.cross_section)
                        .map(|(&e, &xs)| match field.factor(curve.mt, e) {
                            Some(f) => xs * f,
                            None => xs,
                        })
                        .collect();
                    ReactionCurve::new(curve.mt, curve.energy.clone(), cross_section)
                }
                None => curve.clone(),
            };
            curves.insert(curve.mt, perturbed);
        }

        for mt in field.layout.mts() {
            if !curves.contains_key(&mt) {
                log::debug!(
                    "{}: perturbation for {} has no baseline curve",
                    baseline.nuclide,
                    reaction_label(mt)
                );
            }
        }

        for rule in &baseline.sum_rules {
            let summed = sum_channels(rule, &curves, baseline.curves.iter().find(|c| c.mt == rule.mt))?;
            curves.insert(rule.mt, summed);
        }

        Ok(curves.into_values().collect())
    }
}

/// Sum the constituents of `rule` on the target's own grid when the baseline
/// has one, otherwise on the union of the constituent grids.
fn sum_channels(
    rule: &SumRule,
    curves: &BTreeMap<i32, ReactionCurve>,
    target: Option<&ReactionCurve>,
) -> Result<ReactionCurve> {
    let mut parts = Vec::with_capacity(rule.constituents.len());
    for mt in &rule.constituents {
        let part = curves.get(mt).ok_or(UqError::ChannelNotFound {
            derived: rule.mt,
            missing: *mt,
        })?;
        parts.push(part);
    }

    let energy: Vec<f64> = match target {
        Some(curve) => curve.energy.clone(),
        None => {
            let mut grid: Vec<f64> = parts.iter().flat_map(|c| c.energy.iter().copied()).collect();
            grid.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            grid.dedup();
            grid
        }
    };
    let cross_section = energy
        .iter()
        .map(|&e| parts.iter().map(|c| c.cross_section_at(e)).sum::<f64>())
        .collect();
    Ok(ReactionCurve::new(rule.mt, energy, cross_section))
}
