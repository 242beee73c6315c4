//! Skew of a cluster's lean distribution against a baseline prior.

use serde::{Deserialize, Serialize};

use crate::cluster::Cluster;
use crate::config::{EngineConfig, PriorConfig, SkewMeasure};
use crate::models::Lean;

/// Floor applied to prior mass so a zero category cannot produce an
/// infinite divergence.
const MIN_PRIOR_MASS: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorSource {
    Global,
    Personal,
}

/// Probability distribution over `Lean::KNOWN`. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselinePrior {
    probs: [f64; 3],
    source: PriorSource,
}

impl BaselinePrior {
    pub fn uniform() -> Self {
        Self { probs: [1.0 / 3.0; 3], source: PriorSource::Global }
    }

    /// Normalise non-negative weights; `None` when they carry no mass.
    pub fn from_weights(weights: [f64; 3], source: PriorSource) -> Option<Self> {
        if weights.iter().any(|w| !(w.is_finite() && *w >= 0.0)) {
            return None;
        }
        let total: f64 = weights.iter().sum();
        if !(total > 0.0) {
            return None;
        }
        Some(Self { probs: weights.map(|w| w / total), source })
    }

    pub fn global(cfg: &PriorConfig) -> Self {
        Self::from_weights([cfg.left, cfg.center, cfg.right], PriorSource::Global).unwrap_or_else(Self::uniform)
    }

    /// Add-`alpha` (Laplace) smoothing over the three known leans.
    pub fn smoothed(counts: [f64; 3], alpha: f64, source: PriorSource) -> Self {
        let alpha = alpha.max(0.0);
        Self::from_weights(counts.map(|c| c.max(0.0) + alpha), source).unwrap_or_else(|| Self {
            source,
            ..Self::uniform()
        })
    }

    pub fn probability(&self, lean: Lean) -> f64 {
        lean.known_index().map(|i| self.probs[i]).unwrap_or(0.0)
    }

    pub fn probs(&self) -> [f64; 3] {
        self.probs
    }

    pub fn source(&self) -> PriorSource {
        self.source
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BlindspotParams {
    pub skew_threshold: f64,
    pub min_sources_for_flagging: usize,
    pub measure: SkewMeasure,
}

impl From<&EngineConfig> for BlindspotParams {
    fn from(cfg: &EngineConfig) -> Self {
        Self {
            skew_threshold: cfg.skew_threshold,
            min_sources_for_flagging: cfg.min_sources_for_flagging,
            measure: cfg.skew_measure,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlindspotResult {
    pub skew_score: f64,
    pub flagged: bool,
    /// Known leans the prior expects but the cluster has no member from.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_leans: Vec<Lean>,
}

/// KL divergence D(p || q) in bits.
pub fn kl_divergence(p: &[f64; 3], q: &[f64; 3]) -> f64 {
    p.iter()
        .zip(q.iter())
        .filter(|(pi, _)| **pi > 0.0)
        .map(|(pi, qi)| pi * (pi / qi.max(MIN_PRIOR_MASS)).log2())
        .sum::<f64>()
        .max(0.0)
}

pub fn max_deviation(p: &[f64; 3], q: &[f64; 3]) -> f64 {
    p.iter().zip(q.iter()).map(|(a, b)| (a - b).abs()).fold(0.0, f64::max)
}

fn known_counts(cluster: &Cluster) -> [usize; 3] {
    let mut counts = [0usize; 3];
    for (lean, n) in cluster.lean_tally() {
        if let Some(i) = lean.known_index() {
            counts[i] += *n;
        }
    }
    counts
}

/// Share of known-lean members per `Lean::KNOWN`; `None` if there are none.
pub fn known_distribution(cluster: &Cluster) -> Option<[f64; 3]> {
    let counts = known_counts(cluster);
    let total: usize = counts.iter().sum();
    (total > 0).then(|| counts.map(|c| c as f64 / total as f64))
}

pub fn score(cluster: &Cluster, prior: &BaselinePrior, params: &BlindspotParams) -> BlindspotResult {
    let Some(p) = known_distribution(cluster) else {
        return BlindspotResult { skew_score: 0.0, flagged: false, missing_leans: Vec::new() };
    };
    let q = prior.probs();
    let skew_score = match params.measure {
        SkewMeasure::Kl => kl_divergence(&p, &q),
        SkewMeasure::MaxDeviation => max_deviation(&p, &q),
    };
    // only members with a known lean count toward the flagging floor
    let known_members: usize = known_counts(cluster).iter().sum();
    let flagged = skew_score > params.skew_threshold && known_members >= params.min_sources_for_flagging;
    let missing_leans = Lean::KNOWN
        .iter()
        .enumerate()
        .filter(|(i, _)| p[*i] == 0.0 && q[*i] > 0.0)
        .map(|(_, l)| *l)
        .collect();
    BlindspotResult { skew_score, flagged, missing_leans }
}
