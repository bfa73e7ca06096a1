//! `PredictionAggregator`: running mean/variance of test-cell predictions
//! across post-burn-in samples, plus RMSE/AUC (spec §3, §8). Welford's
//! algorithm keeps the update O(1) per cell per sample without re-scanning
//! history; the AUC computation is ported from the original's `bpmfutils.h`
//! trapezoidal ROC integration rather than reinvented, since spec.md only
//! fixes the asymptotic property (AUC -> 0.5 for a random predictor).

use crate::data::Entry;
use crate::model::Model;

/// One test cell's running Welford accumulator: `mean` is the running
/// sample mean of `predict(idx)` across every post-burn-in iteration seen so
/// far, `m2` accumulates `(x - mean)(x - new_mean)` for the running variance.
struct Cell {
    idx: Vec<u32>,
    target: f64,
    mean: f64,
    m2: f64,
}

/// Tracks running mean/variance of predictions for every test cell (spec
/// §3's "Session / predictions"). `n_samples` counts how many times
/// `update` has been called; the invariant `pred_mean == (1/n) sum predict_s`
/// holds after every call.
pub struct PredictionAggregator {
    cells: Vec<Cell>,
    n_samples: u64,
    threshold: Option<f64>,
}

impl PredictionAggregator {
    pub fn new(test_entries: &[Entry], threshold: Option<f64>) -> Self {
        let cells = test_entries
            .iter()
            .map(|e| Cell {
                idx: e.idx.clone(),
                target: e.val,
                mean: 0.0,
                m2: 0.0,
            })
            .collect();
        PredictionAggregator {
            cells,
            n_samples: 0,
            threshold,
        }
    }

    pub fn n_samples(&self) -> u64 {
        self.n_samples
    }

    pub fn n_cells(&self) -> usize {
        self.cells.len()
    }

    /// Fold one post-burn-in sample's predictions into the running
    /// mean/variance of every test cell (Welford's online algorithm).
    pub fn update(&mut self, model: &Model) {
        self.n_samples += 1;
        let n = self.n_samples as f64;
        for cell in self.cells.iter_mut() {
            let x = model.predict(&cell.idx);
            let delta = x - cell.mean;
            cell.mean += delta / n;
            let delta2 = x - cell.mean;
            cell.m2 += delta * delta2;
        }
    }

    /// `sqrt(mean((target - pred_mean)^2))` over every test cell.
    pub fn rmse(&self) -> f64 {
        if self.cells.is_empty() {
            return 0.0;
        }
        let sse: f64 = self
            .cells
            .iter()
            .map(|c| (c.target - c.mean).powi(2))
            .sum();
        (sse / self.cells.len() as f64).sqrt()
    }

    /// Sample variance of predictions at test cell `i`, `m2 / (n_samples - 1)`.
    pub fn variance(&self, i: usize) -> f64 {
        if self.n_samples < 2 {
            return 0.0;
        }
        self.cells[i].m2 / (self.n_samples - 1) as f64
    }

    pub fn mean(&self, i: usize) -> f64 {
        self.cells[i].mean
    }

    /// AUC over test cells whose target is binarized by `threshold` (spec
    /// §8's "Probit AUC" scenario; `None` if no threshold was configured or
    /// the labels are degenerate (all-positive or all-negative)).
    pub fn auc(&self) -> Option<f64> {
        let threshold = self.threshold?;
        let scores: Vec<f64> = self.cells.iter().map(|c| c.mean).collect();
        let labels: Vec<bool> = self.cells.iter().map(|c| c.target > threshold).collect();
        auc(&scores, &labels)
    }
}

/// Trapezoidal ROC-curve integration over a stable sort of `(score, label)`
/// pairs, ties grouped so equal scores don't introduce a spurious
/// staircase (ported from the original's `bpmfutils.h::auc`). Returns
/// `None` if the labels are degenerate (no positives or no negatives).
pub fn auc(scores: &[f64], labels: &[bool]) -> Option<f64> {
    assert_eq!(scores.len(), labels.len());
    let total_pos = labels.iter().filter(|&&l| l).count() as f64;
    let total_neg = labels.len() as f64 - total_pos;
    if total_pos == 0.0 || total_neg == 0.0 {
        return None;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].partial_cmp(&scores[b]).unwrap());

    let mut area = 0.0;
    let mut tp = 0.0;
    let mut fp = 0.0;
    let mut i = scores.len();
    while i > 0 {
        let mut j = i;
        let score = scores[order[i - 1]];
        let (prev_tp, prev_fp) = (tp, fp);
        while j > 0 && scores[order[j - 1]] == score {
            if labels[order[j - 1]] {
                tp += 1.0;
            } else {
                fp += 1.0;
            }
            j -= 1;
        }
        area += (fp - prev_fp) * (tp + prev_tp) / 2.0;
        i = j;
    }

    Some(area / (total_pos * total_neg))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Model;

    fn toy_model() -> Model {
        let mut m = Model::new_zeros(1, vec![2, 2]);
        {
            let mut u0 = m.take_mode(0);
            u0[[0, 0]] = 1.0;
            u0[[0, 1]] = 2.0;
            m.put_mode(0, u0);
            let mut u1 = m.take_mode(1);
            u1[[0, 0]] = 3.0;
            u1[[0, 1]] = 4.0;
            m.put_mode(1, u1);
        }
        m
    }

    #[test]
    fn running_mean_matches_manual_average_over_two_samples() {
        let entries = vec![Entry { idx: vec![0, 0], val: 3.0 }];
        let mut agg = PredictionAggregator::new(&entries, None);
        let m1 = toy_model();
        agg.update(&m1);
        let mut m2 = toy_model();
        {
            let mut u0 = m2.take_mode(0);
            u0[[0, 0]] = 5.0;
            m2.put_mode(0, u0);
        }
        agg.update(&m2);
        // predict(0,0) = 1*3=3 first sample, 5*3=15 second sample; mean = 9
        assert!((agg.mean(0) - 9.0).abs() < 1e-12);
        assert_eq!(agg.n_samples(), 2);
    }

    #[test]
    fn rmse_is_zero_when_predictions_match_targets_exactly() {
        // predict(0,0) = U0[0,0]*U1[0,0] = 1*3 = 3
        let entries = vec![Entry { idx: vec![0, 0], val: 3.0 }];
        let mut agg = PredictionAggregator::new(&entries, None);
        agg.update(&toy_model());
        assert!(agg.rmse() < 1e-12);
    }

    #[test]
    fn random_predictor_auc_is_near_half() {
        use rand::{Rng, SeedableRng};
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(7);
        let n = 1000;
        let scores: Vec<f64> = (0..n).map(|_| rng.gen::<f64>()).collect();
        let labels: Vec<bool> = (0..n).map(|_| rng.gen::<bool>()).collect();
        let a = auc(&scores, &labels).unwrap();
        assert!((a - 0.5).abs() < 0.05);
    }

    #[test]
    fn perfect_separation_gives_auc_one() {
        let scores = vec![0.1, 0.2, 0.8, 0.9];
        let labels = vec![false, false, true, true];
        assert!((auc(&scores, &labels).unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn degenerate_labels_return_none() {
        let scores = vec![0.1, 0.2, 0.3];
        let labels = vec![true, true, true];
        assert!(auc(&scores, &labels).is_none());
    }
}
