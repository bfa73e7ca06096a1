//! Per-mode CSR index over a sparse relation's observed cells, ported from
//! the original's `SparseModeNew` bucket-sort construction: for mode `m`
//! this groups entry indices by their mode-`m` coordinate so `get_pnm` can
//! iterate "all cells whose column-`m` index is `d`" in O(1) + O(nnz_d).

use super::Entry;
use crate::error::{Result, SmurffError};

pub struct ModeIndex {
    col_ptr: Vec<usize>,
    entry_idx: Vec<usize>,
}

impl ModeIndex {
    /// Build the index for `mode` over `entries`, whose mode-`mode`
    /// coordinate ranges over `[0, dim)`.
    pub fn build(dim: usize, mode: usize, entries: &[Entry]) -> Self {
        let mut counts = vec![0usize; dim + 1];
        for e in entries {
            counts[e.idx[mode] as usize + 1] += 1;
        }
        for i in 0..dim {
            counts[i + 1] += counts[i];
        }
        let col_ptr = counts.clone();

        let mut cursor = counts;
        let mut entry_idx = vec![0usize; entries.len()];
        for (i, e) in entries.iter().enumerate() {
            let c = e.idx[mode] as usize;
            entry_idx[cursor[c]] = i;
            cursor[c] += 1;
        }

        ModeIndex { col_ptr, entry_idx }
    }

    /// The indices (into the owning `TensorData::entries`) of every cell
    /// whose coordinate in this mode equals `d`.
    pub fn entries_for(&self, d: usize) -> &[usize] {
        &self.entry_idx[self.col_ptr[d]..self.col_ptr[d + 1]]
    }
}

/// Build a `TensorData` from a coordinate list `(idx_0, .., idx_{n-1}, val)`
/// for an `n`-mode sparse relation with the given mode sizes.
pub fn from_triplets(
    dims: Vec<usize>,
    triplets: Vec<(Vec<u32>, f64)>,
    noise: super::NoiseModel,
) -> Result<super::TensorData> {
    let nmodes = dims.len();
    let mut entries = Vec::with_capacity(triplets.len());
    for (idx, val) in triplets {
        if idx.len() != nmodes {
            return Err(SmurffError::Assertion(format!(
                "triplet has {} indices, expected {}",
                idx.len(),
                nmodes
            )));
        }
        for (m, &i) in idx.iter().enumerate() {
            if i as usize >= dims[m] {
                return Err(SmurffError::Assertion(format!(
                    "index {} out of bounds for mode {} (dim {})",
                    i, m, dims[m]
                )));
            }
        }
        entries.push(Entry { idx, val });
    }
    Ok(super::TensorData::new(dims, entries, noise))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::NoiseModel;

    #[test]
    fn mode_index_matches_linear_scan() {
        let entries = vec![
            Entry { idx: vec![0, 3], val: 1.0 },
            Entry { idx: vec![2, 3], val: 2.0 },
            Entry { idx: vec![1, 0], val: 3.0 },
        ];
        let idx = ModeIndex::build(4, 1, &entries);
        let mut got: Vec<usize> = idx.entries_for(3).to_vec();
        got.sort_unstable();
        assert_eq!(got, vec![0, 1]);
        assert_eq!(idx.entries_for(0), &[2]);
        assert!(idx.entries_for(1).is_empty());
    }

    #[test]
    fn from_triplets_rejects_out_of_bounds() {
        let triplets = vec![(vec![0, 5], 1.0)];
        let result = from_triplets(vec![2, 2], triplets, NoiseModel::fixed(1.0));
        assert!(result.is_err());
    }

    #[test]
    fn from_triplets_builds_usable_data() {
        let triplets = vec![(vec![0, 0], 1.0), (vec![1, 1], 2.0)];
        let data = from_triplets(vec![2, 2], triplets, NoiseModel::fixed(1.0)).unwrap();
        assert_eq!(data.nnz(), 2);
    }
}
