//! Isolation forest over single amounts.
//!
//! The model is fitted once from historical low/medium-risk amounts and is
//! read-only afterwards. Fewer than `min_samples` records leaves it
//! [`AnomalyModel::Untrained`], in which case every lookup answers `None`.

use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;
const MAX_SUBSAMPLE: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub struct AnomalyParams {
    /// Expected share of outliers in the training data, in (0, 0.5].
    pub contamination: f64,
    pub min_samples: usize,
    pub n_trees: usize,
    pub seed: u64,
}

impl Default for AnomalyParams {
    fn default() -> Self {
        Self {
            contamination: 0.1,
            min_samples: 50,
            n_trees: 100,
            seed: 42,
        }
    }
}

#[derive(Debug)]
enum Node {
    Leaf {
        size: usize,
        min: f64,
        max: f64,
    },
    Split {
        value: f64,
        min: f64,
        max: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

impl Node {
    fn build(samples: &[f64], depth: usize, max_depth: usize, rng: &mut StdRng) -> Node {
        let min = samples.iter().copied().fold(f64::INFINITY, f64::min);
        let max = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        // a span that overflows to infinity cannot be sampled
        if depth >= max_depth || samples.len() <= 1 || min >= max || !(max - min).is_finite() {
            return Node::Leaf {
                size: samples.len(),
                min,
                max,
            };
        }

        // min <= value < max keeps both sides non-empty
        let value = rng.random_range(min..max);
        let (left, right): (Vec<f64>, Vec<f64>) =
            samples.iter().copied().partition(|&x| x <= value);

        Node::Split {
            value,
            min,
            max,
            left: Box::new(Node::build(&left, depth + 1, max_depth, rng)),
            right: Box::new(Node::build(&right, depth + 1, max_depth, rng)),
        }
    }

    /// A value outside the range a node was built from is isolated right there.
    fn path_length(&self, x: f64, depth: usize) -> f64 {
        match self {
            Node::Leaf { min, max, .. } | Node::Split { min, max, .. }
                if x < *min || x > *max =>
            {
                depth as f64
            }
            Node::Leaf { size, .. } => depth as f64 + average_path_length(*size),
            Node::Split {
                value, left, right, ..
            } => {
                if x <= *value {
                    left.path_length(x, depth + 1)
                } else {
                    right.path_length(x, depth + 1)
                }
            }
        }
    }
}

/// Expected path length of an unsuccessful BST search over `n` points.
fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        n => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

fn quantile(sorted: &[f64], q: f64) -> f64 {
    let pos = (sorted.len() - 1) as f64 * q.clamp(0.0, 1.0);
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    let weight = pos - lower as f64;
    sorted[lower] * (1.0 - weight) + sorted[upper] * weight
}

#[derive(Debug)]
pub struct IsolationForest {
    trees: Vec<Node>,
    subsample: usize,
    threshold: f64,
}

impl IsolationForest {
    /// `amounts` must be non-empty and finite.
    fn fit(amounts: &[f64], params: &AnomalyParams) -> Self {
        let mut rng = StdRng::seed_from_u64(params.seed);
        let subsample = amounts.len().min(MAX_SUBSAMPLE);
        let max_depth = (subsample as f64).log2().ceil().max(1.0) as usize;

        let trees = (0..params.n_trees.max(1))
            .map(|_| {
                let picked: Vec<f64> = sample(&mut rng, amounts.len(), subsample)
                    .into_iter()
                    .map(|i| amounts[i])
                    .collect();
                Node::build(&picked, 0, max_depth, &mut rng)
            })
            .collect();

        let mut forest = IsolationForest {
            trees,
            subsample,
            threshold: f64::INFINITY,
        };

        let mut scores: Vec<f64> = amounts.iter().map(|&a| forest.score(a)).collect();
        scores.sort_by(f64::total_cmp);
        forest.threshold = quantile(&scores, 1.0 - params.contamination);
        forest
    }

    /// Anomaly score in (0, 1]; higher means easier to isolate.
    pub fn score(&self, x: f64) -> f64 {
        let mean_path = self
            .trees
            .iter()
            .map(|tree| tree.path_length(x, 0))
            .sum::<f64>()
            / self.trees.len() as f64;
        let normaliser = average_path_length(self.subsample).max(1.0);
        2f64.powf(-mean_path / normaliser)
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn is_outlier(&self, x: f64) -> bool {
        self.score(x) > self.threshold
    }
}

#[derive(Debug, Default)]
pub enum AnomalyModel {
    #[default]
    Untrained,
    Trained(IsolationForest),
}

impl AnomalyModel {
    pub fn train(amounts: &[f64], params: &AnomalyParams) -> Self {
        let amounts: Vec<f64> = amounts.iter().copied().filter(|a| a.is_finite()).collect();
        if amounts.is_empty() || amounts.len() < params.min_samples {
            log::info!(
                "Anomaly model not trained: {} historical amounts, need at least {}",
                amounts.len(),
                params.min_samples
            );
            return AnomalyModel::Untrained;
        }

        let forest = IsolationForest::fit(&amounts, params);
        log::info!(
            "Anomaly model trained on {} amounts (contamination {}, threshold {:.4})",
            amounts.len(),
            params.contamination,
            forest.threshold()
        );
        AnomalyModel::Trained(forest)
    }

    pub fn is_trained(&self) -> bool {
        matches!(self, AnomalyModel::Trained(_))
    }

    /// `None` when untrained.
    pub fn is_anomalous(&self, amount: f64) -> Option<bool> {
        match self {
            AnomalyModel::Untrained => None,
            AnomalyModel::Trained(forest) => Some(forest.is_outlier(amount)),
        }
    }
}
