//! Assembly of a nuclide's multi-reaction covariance matrix.
//!
//! Channels are laid out in ascending MT order; channel `i` owns the rows
//! and columns `offset_i .. offset_i + n_i`, where `n_i` is the number of
//! energy groups of that channel. Two extraction paths exist:
//!
//! * **direct** - the upstream record already carries an assembled matrix
//!   over a known channel list. Used when [`direct_layout`] accepts it.
//! * **blocks** - the matrix is rebuilt from the raw per-pair blocks. Pairs
//!   without a block stay zero (no correlation).
//!
//! Both paths mirror the upper triangle so the result is exactly symmetric,
//! then replace negative variances on the diagonal by their magnitude and
//! report every such repair.

use crate::data::reaction_label;
use crate::error::{Result, UqError};
use crate::nuclide::Nuclide;
use crate::uncertainty::{CovarianceBlock, NuclideUncertainty};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};

/// Rows/columns owned by one reaction channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSpan {
    pub mt: i32,
    pub offset: usize,
    /// Group edges in eV; `edges.len() - 1` groups.
    pub edges: Vec<f64>,
}

impl ChannelSpan {
    pub fn len(&self) -> usize {
        self.edges.len().saturating_sub(1)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Group holding `energy`, or `None` at or below the first edge.
    ///
    /// Groups are closed on the right, `(e_k, e_k+1]`, so a point sitting on
    /// the lowest edge is left alone as the normalisation anchor. Energies
    /// above the top edge belong to the last group.
    pub fn group_of(&self, energy: f64) -> Option<usize> {
        let n = self.len();
        if n == 0 || !(energy > self.edges[0]) {
            return None;
        }
        let k = self.edges.partition_point(|&e| e < energy);
        Some((k - 1).min(n - 1))
    }
}

/// Ordered mapping from matrix index to (channel, energy group).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelLayout {
    pub channels: Vec<ChannelSpan>,
}

impl ChannelLayout {
    /// Lay out `(mt, edges)` pairs consecutively in the order given.
    pub fn new(grids: Vec<(i32, Vec<f64>)>) -> Self {
        let mut offset = 0;
        let channels = grids
            .into_iter()
            .map(|(mt, edges)| {
                let span = ChannelSpan { mt, offset, edges };
                offset += span.len();
                span
            })
            .collect();
        ChannelLayout { channels }
    }

    /// Total matrix dimension.
    pub fn size(&self) -> usize {
        self.channels.iter().map(ChannelSpan::len).sum()
    }

    pub fn span(&self, mt: i32) -> Option<&ChannelSpan> {
        self.channels.iter().find(|c| c.mt == mt)
    }

    fn position(&self, mt: i32) -> Option<usize> {
        self.channels.iter().position(|c| c.mt == mt)
    }

    pub fn mts(&self) -> Vec<i32> {
        self.channels.iter().map(|c| c.mt).collect()
    }

    /// (MT, group) of a flat matrix index.
    pub fn locate(&self, index: usize) -> Option<(i32, usize)> {
        self.channels
            .iter()
            .find(|c| index >= c.offset && index < c.offset + c.len())
            .map(|c| (c.mt, index - c.offset))
    }
}

/// Which extraction path produced a matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Extraction {
    Direct,
    Blocks,
}

/// One negative variance replaced by its magnitude.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarianceRepair {
    pub index: usize,
    pub mt: i32,
    pub group: usize,
    /// The original (negative) diagonal value.
    pub value: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepairReport {
    pub repairs: Vec<VarianceRepair>,
}

impl RepairReport {
    pub fn count(&self) -> usize {
        self.repairs.len()
    }

    pub fn max_magnitude(&self) -> f64 {
        self.repairs.iter().map(|r| r.value.abs()).fold(0.0, f64::max)
    }
}

/// Dense symmetric covariance over every perturbed channel of a nuclide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssembledCovariance {
    pub nuclide: Nuclide,
    pub layout: ChannelLayout,
    pub matrix: DMatrix<f64>,
    pub extraction: Extraction,
    pub repairs: RepairReport,
}

impl AssembledCovariance {
    pub fn dim(&self) -> usize {
        self.matrix.nrows()
    }

    pub fn is_symmetric(&self) -> bool {
        self.matrix == self.matrix.transpose()
    }
}

/// Channel MTs covered by a sum rule; these are rebuilt, never perturbed.
fn derived_mts(record: &NuclideUncertainty) -> HashSet<i32> {
    record.resolved_sum_rules().iter().map(|r| r.mt).collect()
}

/// Accept the record's pre-assembled matrix or explain why it cannot be used.
///
/// The direct path requires: a non-empty list of distinct MTs, group edges
/// for each of them, none of them a derived channel, and a square matrix
/// whose size equals the summed group counts.
pub fn direct_layout(
    record: &NuclideUncertainty,
) -> std::result::Result<ChannelLayout, String> {
    let direct = record.direct.as_ref().ok_or("no pre-assembled matrix")?;
    if direct.mts.is_empty() {
        return Err("pre-assembled matrix lists no channels".to_string());
    }
    let derived = derived_mts(record);
    let mut seen = HashSet::new();
    let mut grids = Vec::with_capacity(direct.mts.len());
    for &mt in &direct.mts {
        if !seen.insert(mt) {
            return Err(format!("MT {} listed twice", mt));
        }
        if derived.contains(&mt) {
            return Err(format!("MT {} is a derived channel", mt));
        }
        let edges = record
            .groups
            .get(&mt)
            .ok_or_else(|| format!("no group structure for MT {}", mt))?;
        grids.push((mt, edges.clone()));
    }
    let layout = ChannelLayout::new(grids);
    let n = layout.size();
    if direct.matrix.len() != n || direct.matrix.iter().any(|row| row.len() != n) {
        return Err(format!(
            "matrix shape does not match the {}-group layout",
            n
        ));
    }
    Ok(layout)
}

/// Builds [`AssembledCovariance`] values from upstream records.
#[derive(Debug, Clone, Copy, Default)]
pub struct CovarianceAssembler;

impl CovarianceAssembler {
    pub fn new() -> Self {
        CovarianceAssembler
    }

    /// Assemble via the direct path when its precondition holds, otherwise
    /// from blocks.
    pub fn assemble(&self, record: &NuclideUncertainty) -> Result<AssembledCovariance> {
        match direct_layout(record) {
            Ok(layout) => self.assemble_direct(record, layout),
            Err(reason) => {
                if record.direct.is_some() {
                    log::info!(
                        "{}: pre-assembled covariance unusable ({}), rebuilding from blocks",
                        record.nuclide,
                        reason
                    );
                }
                self.assemble_from_blocks(record)
            }
        }
    }

    /// Direct path: copy the record's matrix onto an accepted layout.
    pub fn assemble_direct(
        &self,
        record: &NuclideUncertainty,
        layout: ChannelLayout,
    ) -> Result<AssembledCovariance> {
        let n = layout.size();
        let rows = record
            .direct
            .as_ref()
            .map(|d| d.matrix.as_slice())
            .unwrap_or(&[]);
        if rows.len() != n || rows.iter().any(|r| r.len() != n) {
            return Err(UqError::GridMismatch {
                row_mt: 0,
                col_mt: 0,
                expected_rows: n,
                expected_cols: n,
                found_rows: rows.len(),
                found_cols: rows.first().map_or(0, |r| r.len()),
            });
        }
        let mut matrix = DMatrix::zeros(n, n);
        for i in 0..n {
            for j in i..n {
                matrix[(i, j)] = rows[i][j];
                matrix[(j, i)] = rows[i][j];
            }
        }
        Ok(finish(record.nuclide.clone(), layout, matrix, Extraction::Direct))
    }

    /// Block path: place each raw block at the offsets of its channel pair.
    pub fn assemble_from_blocks(&self, record: &NuclideUncertainty) -> Result<AssembledCovariance> {
        let derived = derived_mts(record);

        let mut mts: BTreeSet<i32> = BTreeSet::new();
        for block in &record.blocks {
            if let Some(&mt) = [block.row_mt, block.col_mt].iter().find(|mt| derived.contains(mt)) {
                log::warn!(
                    "{}: discarding covariance block MT {} x MT {}; {} is rebuilt from its constituents",
                    record.nuclide,
                    block.row_mt,
                    block.col_mt,
                    reaction_label(mt)
                );
            }
            for mt in [block.row_mt, block.col_mt] {
                if !derived.contains(&mt) {
                    mts.insert(mt);
                }
            }
        }
        if mts.is_empty() {
            return Err(UqError::NoCovariance(record.nuclide.name()));
        }

        let mut grids = Vec::with_capacity(mts.len());
        for &mt in &mts {
            let edges = record.groups.get(&mt).ok_or_else(|| UqError::InvalidCurve {
                mt,
                reason: "covariance block present but no group structure".to_string(),
            })?;
            grids.push((mt, edges.clone()));
        }
        let layout = ChannelLayout::new(grids);

        // (row channel, col channel) with row <= col -> block oriented that way
        let mut placed: HashMap<(usize, usize), Vec<Vec<f64>>> = HashMap::new();
        for block in &record.blocks {
            if derived.contains(&block.row_mt) || derived.contains(&block.col_mt) {
                continue;
            }
            let (Some(ri), Some(ci)) = (layout.position(block.row_mt), layout.position(block.col_mt))
            else {
                continue;
            };
            check_block_shape(block, &layout.channels[ri], &layout.channels[ci])?;
            let (key, oriented) = if ri <= ci {
                ((ri, ci), block.matrix.clone())
            } else {
                ((ci, ri), transpose_rows(&block.matrix))
            };
            if placed.insert(key, oriented).is_some() {
                log::warn!(
                    "{}: duplicate covariance block for MT {} x MT {}, using the later one",
                    record.nuclide,
                    block.row_mt,
                    block.col_mt
                );
            }
        }

        for (i, span) in layout.channels.iter().enumerate() {
            if !placed.contains_key(&(i, i)) {
                return Err(UqError::MissingChannelData {
                    nuclide: record.nuclide.name(),
                    mt: span.mt,
                });
            }
        }

        let n = layout.size();
        let mut matrix = DMatrix::zeros(n, n);
        for (&(ri, ci), rows) in &placed {
            let row_span = &layout.channels[ri];
            let col_span = &layout.channels[ci];
            for (a, row) in rows.iter().enumerate() {
                // self-blocks contribute their upper triangle only
                let start = if ri == ci { a } else { 0 };
                for (b, &value) in row.iter().enumerate().skip(start) {
                    let i = row_span.offset + a;
                    let j = col_span.offset + b;
                    matrix[(i, j)] = value;
                    matrix[(j, i)] = value;
                }
            }
            log::debug!(
                "{}: placed block MT {} x MT {} at ({}, {})",
                record.nuclide,
                row_span.mt,
                col_span.mt,
                row_span.offset,
                col_span.offset
            );
        }

        Ok(finish(record.nuclide.clone(), layout, matrix, Extraction::Blocks))
    }
}

fn check_block_shape(block: &CovarianceBlock, row: &ChannelSpan, col: &ChannelSpan) -> Result<()> {
    let found_cols = block.cols();
    if block.rows() != row.len() || found_cols != Some(col.len()) {
        return Err(UqError::GridMismatch {
            row_mt: block.row_mt,
            col_mt: block.col_mt,
            expected_rows: row.len(),
            expected_cols: col.len(),
            found_rows: block.rows(),
            found_cols: found_cols
                .unwrap_or_else(|| block.matrix.iter().map(|r| r.len()).max().unwrap_or(0)),
        });
    }
    Ok(())
}

fn transpose_rows(rows: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let ncols = rows.first().map_or(0, |r| r.len());
    (0..ncols)
        .map(|j| rows.iter().map(|r| r[j]).collect())
        .collect()
}

/// Repair negative variances and wrap up.
fn finish(
    nuclide: Nuclide,
    layout: ChannelLayout,
    mut matrix: DMatrix<f64>,
    extraction: Extraction,
) -> AssembledCovariance {
    let mut repairs = RepairReport::default();
    for k in 0..matrix.nrows() {
        let value = matrix[(k, k)];
        if value < 0.0 {
            let (mt, group) = layout.locate(k).unwrap_or((0, k));
            repairs.repairs.push(VarianceRepair {
                index: k,
                mt,
                group,
                value,
            });
            matrix[(k, k)] = value.abs();
        }
    }
    if repairs.count() > 0 {
        let magnitudes: Vec<f64> = repairs.repairs.iter().map(|r| r.value.abs()).collect();
        log::warn!(
            "{}: replaced {} negative variance(s) by their magnitude: {:?}",
            nuclide,
            repairs.count(),
            magnitudes
        );
    }
    AssembledCovariance {
        nuclide,
        layout,
        matrix,
        extraction,
        repairs,
    }
}
