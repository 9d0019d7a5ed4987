//! Standard scaler and isolation forest over small dense feature vectors.
//!
//! Scores follow the usual isolation-forest convention: `score_samples` is
//! `-2^(-E[h(x)] / c(ψ))` (closer to -1 is more anomalous), and the decision
//! function subtracts an offset placed at the contamination percentile of
//! the training scores, so negative decisions are outliers.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

const EULER_GAMMA: f64 = 0.577_215_664_9;

/// Zero-mean, unit-variance feature scaling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl StandardScaler {
    /// Fit on row-major samples. Constant columns get a scale of 1.
    pub fn fit(samples: &[Vec<f64>]) -> Self {
        let dims = samples.first().map_or(0, Vec::len);
        let n = samples.len().max(1) as f64;

        let mean: Vec<f64> = (0..dims)
            .map(|j| samples.iter().map(|s| s[j]).sum::<f64>() / n)
            .collect();
        let scale = (0..dims)
            .map(|j| {
                let var = samples.iter().map(|s| (s[j] - mean[j]).powi(2)).sum::<f64>() / n;
                let std = var.sqrt();
                if std > f64::EPSILON { std } else { 1.0 }
            })
            .collect();

        Self { mean, scale }
    }

    pub fn transform(&self, sample: &[f64]) -> Vec<f64> {
        sample
            .iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(x, (m, s))| (x - m) / s)
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ForestParams {
    pub n_trees: usize,
    /// Upper bound on the per-tree subsample.
    pub max_samples: usize,
    /// Expected outlier fraction; places the decision offset.
    pub contamination: f64,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_samples: 256,
            contamination: 0.1,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        size: usize,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IsolationTree {
    nodes: Vec<Node>,
}

impl IsolationTree {
    fn build(data: &[Vec<f64>], rows: Vec<usize>, max_depth: usize, rng: &mut StdRng) -> Self {
        let mut tree = Self { nodes: Vec::new() };
        tree.grow(data, rows, 0, max_depth, rng);
        tree
    }

    fn grow(
        &mut self,
        data: &[Vec<f64>],
        rows: Vec<usize>,
        depth: usize,
        max_depth: usize,
        rng: &mut StdRng,
    ) -> usize {
        let id = self.nodes.len();
        self.nodes.push(Node::Leaf { size: rows.len() });
        if rows.len() <= 1 || depth >= max_depth {
            return id;
        }

        // Only features that still vary inside this node can split it.
        let dims = data[rows[0]].len();
        let ranges: Vec<(usize, f64, f64)> = (0..dims)
            .filter_map(|j| {
                let (lo, hi) = rows.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &r| {
                    (lo.min(data[r][j]), hi.max(data[r][j]))
                });
                (hi > lo).then_some((j, lo, hi))
            })
            .collect();
        if ranges.is_empty() {
            return id;
        }

        let (feature, lo, hi) = ranges[rng.gen_range(0..ranges.len())];
        let threshold = rng.gen_range(lo..hi);
        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) =
            rows.into_iter().partition(|&r| data[r][feature] <= threshold);

        let left = self.grow(data, left_rows, depth + 1, max_depth, rng);
        let right = self.grow(data, right_rows, depth + 1, max_depth, rng);
        self.nodes[id] = Node::Split { feature, threshold, left, right };
        id
    }

    fn path_length(&self, sample: &[f64]) -> f64 {
        let mut node = 0;
        let mut depth = 0.0;
        loop {
            match &self.nodes[node] {
                Node::Split { feature, threshold, left, right } => {
                    node = if sample[*feature] <= *threshold { *left } else { *right };
                    depth += 1.0;
                }
                Node::Leaf { size } => return depth + average_path_length(*size),
            }
        }
    }
}

/// Expected path length of an unsuccessful BST search over `n` points.
fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationForest {
    params: ForestParams,
    trees: Vec<IsolationTree>,
    sample_size: usize,
    offset: f64,
}

impl IsolationForest {
    pub fn fit(data: &[Vec<f64>], params: ForestParams) -> Self {
        let mut rng = StdRng::seed_from_u64(params.seed);
        let sample_size = params.max_samples.min(data.len()).max(1);
        let max_depth = (sample_size as f64).log2().ceil().max(0.0) as usize;

        let n_trees = if data.is_empty() { 0 } else { params.n_trees };
        let trees = (0..n_trees)
            .map(|_| {
                let rows = rand::seq::index::sample(&mut rng, data.len(), sample_size).into_vec();
                IsolationTree::build(data, rows, max_depth, &mut rng)
            })
            .collect();

        let mut forest = Self {
            params,
            trees,
            sample_size,
            offset: 0.0,
        };
        let training_scores: Vec<f64> = data.iter().map(|s| forest.score_sample(s)).collect();
        forest.offset = percentile(&training_scores, 100.0 * params.contamination);
        forest
    }

    /// Raw anomaly score in [-1, 0): lower is more anomalous.
    pub fn score_sample(&self, sample: &[f64]) -> f64 {
        if self.trees.is_empty() {
            return -0.5;
        }
        let mean_depth =
            self.trees.iter().map(|t| t.path_length(sample)).sum::<f64>() / self.trees.len() as f64;
        let norm = average_path_length(self.sample_size).max(f64::EPSILON);
        -(2f64.powf(-mean_depth / norm))
    }

    /// Score shifted by the contamination offset; negative means outlier.
    pub fn decision_function(&self, sample: &[f64]) -> f64 {
        self.score_sample(sample) - self.offset
    }

    pub fn is_outlier(&self, sample: &[f64]) -> bool {
        self.decision_function(sample) < 0.0
    }

    pub fn params(&self) -> &ForestParams {
        &self.params
    }
}

/// Percentile with linear interpolation between closest ranks.
fn percentile(values: &[f64], pct: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let rank = (pct / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster(n: usize) -> Vec<Vec<f64>> {
        // deterministic small jitter around the origin
        (0..n)
            .map(|i| {
                let t = i as f64;
                vec![(t * 0.37).sin() * 0.1, (t * 0.91).cos() * 0.1, (t * 1.3).sin() * 0.1]
            })
            .collect()
    }

    #[test]
    fn test_average_path_length_small_cases() {
        assert_eq!(average_path_length(1), 0.0);
        assert_eq!(average_path_length(2), 1.0);
        // c(256) is about 10.24
        assert!((average_path_length(256) - 10.24).abs() < 0.01);
    }

    #[test]
    fn test_percentile_interpolates() {
        let values = [4.0, 1.0, 3.0, 2.0, 5.0];
        assert_eq!(percentile(&values, 0.0), 1.0);
        assert_eq!(percentile(&values, 50.0), 3.0);
        assert!((percentile(&values, 10.0) - 1.4).abs() < 1e-12);
    }

    #[test]
    fn test_scaler_zero_mean_unit_variance() {
        let samples = vec![vec![1.0, 5.0], vec![3.0, 5.0]];
        let scaler = StandardScaler::fit(&samples);
        assert_eq!(scaler.mean, vec![2.0, 5.0]);
        assert_eq!(scaler.scale, vec![1.0, 1.0]);
        assert_eq!(scaler.transform(&[3.0, 5.0]), vec![1.0, 0.0]);
    }

    #[test]
    fn test_outlier_scores_lower_than_inliers() {
        let mut data = cluster(60);
        data.push(vec![5.0, -5.0, 5.0]);

        let forest = IsolationForest::fit(&data, ForestParams::default());
        let outlier = forest.score_sample(&[5.0, -5.0, 5.0]);
        let inlier = forest.score_sample(&data[0]);
        assert!(outlier < inlier, "outlier {outlier} vs inlier {inlier}");
        assert!(forest.is_outlier(&[5.0, -5.0, 5.0]));
    }

    #[test]
    fn test_contamination_flags_roughly_ten_percent() {
        let data = cluster(50);
        let forest = IsolationForest::fit(&data, ForestParams::default());
        let flagged = data.iter().filter(|s| forest.is_outlier(s)).count();
        assert!(flagged <= 5, "flagged {flagged} of 50");
    }

    #[test]
    fn test_fit_is_deterministic_for_seed() {
        let data = cluster(30);
        let a = IsolationForest::fit(&data, ForestParams::default());
        let b = IsolationForest::fit(&data, ForestParams::default());
        assert_eq!(a.score_sample(&[0.3, 0.3, 0.3]), b.score_sample(&[0.3, 0.3, 0.3]));
    }

    #[test]
    fn test_serde_roundtrip_preserves_scores() {
        let data = cluster(20);
        let forest = IsolationForest::fit(&data, ForestParams::default());
        let json = serde_json::to_string(&forest).unwrap();
        let restored: IsolationForest = serde_json::from_str(&json).unwrap();
        let delta = forest.decision_function(&data[3]) - restored.decision_function(&data[3]);
        assert!(delta.abs() < 1e-9);
    }
}
