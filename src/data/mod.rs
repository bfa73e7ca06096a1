//! The `Data` view over a training relation (spec §3/§4.3): a read-only
//! (except for noise-model hyperparameters) source of per-column Gaussian
//! sufficient statistics, plus the view partition SpikeAndSlab needs.

pub mod dense;
pub mod noise;
pub mod sparse;

pub use noise::NoiseModel;
pub use sparse::ModeIndex;

use ndarray::{Array1, Array2};
use rand::RngCore;
use rayon::prelude::*;

use crate::model::Model;

/// One observed cell: its coordinate in every mode, and its value.
#[derive(Debug, Clone)]
pub struct Entry {
    pub idx: Vec<u32>,
    pub val: f64,
}

/// How a mode's columns are partitioned into views (SpikeAndSlab only).
/// `None` means the default: a single view covering the whole mode.
#[derive(Debug, Clone)]
pub enum ViewAssignment {
    Single,
    Explicit { assignment: Vec<u32>, nview: usize },
}

impl ViewAssignment {
    fn nview(&self) -> usize {
        match self {
            ViewAssignment::Single => 1,
            ViewAssignment::Explicit { nview, .. } => *nview,
        }
    }

    fn view(&self, d: usize) -> usize {
        match self {
            ViewAssignment::Single => 0,
            ViewAssignment::Explicit { assignment, .. } => assignment[d] as usize,
        }
    }

    fn view_size(&self, v: usize, dim: usize) -> usize {
        match self {
            ViewAssignment::Single => dim,
            ViewAssignment::Explicit { assignment, .. } => {
                assignment.iter().filter(|&&a| a as usize == v).count()
            }
        }
    }
}

/// Read-only view over the training relation, answering per-column Gaussian
/// sufficient statistics and view-partition queries (spec §3/§4.3).
pub trait Data: Sync {
    fn nmodes(&self) -> usize;
    fn dim(&self, m: usize) -> usize;

    fn nview(&self, m: usize) -> usize;
    fn view(&self, m: usize, d: usize) -> usize;
    fn view_size(&self, m: usize, v: usize) -> usize;

    fn sumsq(&self) -> f64;
    fn var_total(&self) -> f64;
    fn mean_rating(&self) -> f64;

    /// `(rhs, prec)`: the information-form Gaussian contribution of every
    /// observed cell whose mode-`m` coordinate is `d`, under the current
    /// noise model and the other modes' current factors. `current` is the
    /// pre-draw value of the column being resampled (`U_m[:, d]`), needed
    /// only to form the probit-augmentation mean.
    fn get_pnm(
        &self,
        model: &Model,
        m: usize,
        d: usize,
        current: &Array1<f64>,
        rng: &mut dyn RngCore,
    ) -> (Array1<f64>, Array2<f64>);

    /// Resample noise-model hyperparameters (a no-op for fixed/probit noise)
    /// from the full current model state. Called once per Gibbs iteration
    /// by Session, after every mode has resampled.
    fn update_noise(&self, model: &Model, rng: &mut dyn RngCore);
}

/// The core `Data` implementation: an explicit list of observed cells plus
/// a per-mode CSR index (`ModeIndex`) for fast per-column iteration. Covers
/// sparse matrices, dense matrices (every cell present), and N-mode tensors
/// — the three "implementations" spec §3 calls out are just constructors
/// (`sparse::from_triplets`, `dense::from_dense`) over this one type.
pub struct TensorData {
    dims: Vec<usize>,
    entries: Vec<Entry>,
    mode_index: Vec<ModeIndex>,
    views: Vec<ViewAssignment>,
    noise: NoiseModel,
    sumsq: f64,
    var_total: f64,
    mean_rating: f64,
}

impl TensorData {
    pub fn new(dims: Vec<usize>, entries: Vec<Entry>, noise: NoiseModel) -> Self {
        let nmodes = dims.len();
        let mode_index = (0..nmodes)
            .map(|m| ModeIndex::build(dims[m], m, &entries))
            .collect();
        let views = (0..nmodes).map(|_| ViewAssignment::Single).collect();

        let n = entries.len().max(1) as f64;
        let mean_rating = entries.iter().map(|e| e.val).sum::<f64>() / n;
        let var_total = entries
            .iter()
            .map(|e| (e.val - mean_rating).powi(2))
            .sum::<f64>()
            / n;
        let sumsq = entries.iter().map(|e| e.val * e.val).sum::<f64>();

        TensorData {
            dims,
            entries,
            mode_index,
            views,
            noise,
            sumsq,
            var_total,
            mean_rating,
        }
    }

    pub fn set_view(&mut self, m: usize, assignment: ViewAssignment) {
        self.views[m] = assignment;
    }

    pub fn nnz(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }
}

impl Data for TensorData {
    fn nmodes(&self) -> usize {
        self.dims.len()
    }

    fn dim(&self, m: usize) -> usize {
        self.dims[m]
    }

    fn nview(&self, m: usize) -> usize {
        self.views[m].nview()
    }

    fn view(&self, m: usize, d: usize) -> usize {
        self.views[m].view(d)
    }

    fn view_size(&self, m: usize, v: usize) -> usize {
        self.views[m].view_size(v, self.dims[m])
    }

    fn sumsq(&self) -> f64 {
        self.sumsq
    }

    fn var_total(&self) -> f64 {
        self.var_total
    }

    fn mean_rating(&self) -> f64 {
        self.mean_rating
    }

    fn get_pnm(
        &self,
        model: &Model,
        m: usize,
        d: usize,
        current: &Array1<f64>,
        rng: &mut dyn RngCore,
    ) -> (Array1<f64>, Array2<f64>) {
        let k = model.k();
        let mut rhs = Array1::<f64>::zeros(k);
        let mut prec = Array2::<f64>::zeros((k, k));
        let alpha = self.noise.precision();
        let sub = model.submodel(m);

        for &eidx in self.mode_index[m].entries_for(d) {
            let e = &self.entries[eidx];
            let h = sub.hadamard(&e.idx);
            let eta = h.dot(current);
            let target = self.noise.target(e.val, eta, rng);

            rhs.scaled_add(alpha * target, &h);
            for i in 0..k {
                let hi = h[i];
                if hi == 0.0 {
                    continue;
                }
                for j in 0..k {
                    prec[[i, j]] += alpha * hi * h[j];
                }
            }
        }

        (rhs, prec)
    }

    fn update_noise(&self, model: &Model, rng: &mut dyn RngCore) {
        let sse: f64 = self
            .entries
            .par_iter()
            .map(|e| {
                let pred = model.predict(&e.idx);
                (e.val - pred).powi(2)
            })
            .sum();
        self.noise.resample(sse, self.entries.len(), rng);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Model;

    fn toy_data() -> TensorData {
        let entries = vec![
            Entry { idx: vec![0, 0], val: 1.0 },
            Entry { idx: vec![0, 1], val: 2.0 },
            Entry { idx: vec![1, 0], val: 3.0 },
        ];
        TensorData::new(vec![2, 2], entries, NoiseModel::fixed(1.0))
    }

    #[test]
    fn mode_index_groups_by_column() {
        let data = toy_data();
        assert_eq!(data.mode_index[0].entries_for(0).len(), 2);
        assert_eq!(data.mode_index[0].entries_for(1).len(), 1);
        assert_eq!(data.mode_index[1].entries_for(0).len(), 2);
        assert_eq!(data.mode_index[1].entries_for(1).len(), 1);
    }

    #[test]
    fn get_pnm_accumulates_precision_rank_one() {
        use rand::SeedableRng;
        let data = toy_data();
        let model = Model::new_zeros(2, vec![2, 2]);
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(99);
        let current = Array1::<f64>::zeros(2);
        let (_rhs, prec) = data.get_pnm(&model, 0, 0, &current, &mut rng);
        // prec must be symmetric PSD (sum of outer products).
        for i in 0..2 {
            for j in 0..2 {
                assert!((prec[[i, j]] - prec[[j, i]]).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn summary_stats_match_manual_computation() {
        let data = toy_data();
        assert!((data.mean_rating() - 2.0).abs() < 1e-12);
        assert!((data.sumsq() - 14.0).abs() < 1e-12);
    }
}
