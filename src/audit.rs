//! Cluster quality audit: cohesion of the members, separation from the
//! nearest other cluster, and a coarse keep/split/merge label.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::cluster::Cluster;
use crate::models::ClusterId;
use crate::similarity::cosine_similarity;

#[derive(Debug, Clone, Copy)]
pub struct AuditParams {
    pub correct_min_size: usize,
    pub correct_min_cohesion: f32,
    pub correct_min_separation: f32,
    pub split_below_cohesion: f32,
    pub merge_below_separation: f32,
}

impl Default for AuditParams {
    fn default() -> Self {
        Self {
            correct_min_size: 3,
            correct_min_cohesion: 0.80,
            correct_min_separation: 0.25,
            split_below_cohesion: 0.55,
            merge_below_separation: 0.10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditLabel {
    Correct,
    SplitNeeded,
    ShouldMerge,
    Mixed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterAudit {
    pub cluster_id: ClusterId,
    pub size: usize,
    pub cohesion_mean: Option<f32>,
    pub cohesion_median: Option<f32>,
    /// 1 - highest centroid similarity to any other cluster.
    pub separation_min: f32,
    pub label: AuditLabel,
}

fn pairwise(cluster: &Cluster) -> Vec<f32> {
    let vs: Vec<&[f32]> = cluster.members().iter().filter_map(|m| m.embedding.as_deref()).collect();
    let mut sims = Vec::new();
    for i in 0..vs.len() {
        for j in (i + 1)..vs.len() {
            sims.push(cosine_similarity(vs[i], vs[j]));
        }
    }
    sims
}

fn median(sorted: &[f32]) -> Option<f32> {
    let n = sorted.len();
    match n {
        0 => None,
        _ if n % 2 == 1 => Some(sorted[n / 2]),
        _ => Some((sorted[n / 2 - 1] + sorted[n / 2]) / 2.0),
    }
}

pub fn audit(cluster: &Cluster, others: &[(ClusterId, Arc<Vec<f32>>)], params: &AuditParams) -> ClusterAudit {
    let mut sims = pairwise(cluster);
    sims.sort_by(|a, b| a.total_cmp(b));
    let cohesion_mean = (!sims.is_empty()).then(|| sims.iter().sum::<f32>() / sims.len() as f32);
    let cohesion_median = median(&sims);

    let best_cross = others
        .iter()
        .filter(|(id, _)| *id != cluster.id())
        .map(|(_, c)| cosine_similarity(cluster.centroid(), c))
        .fold(0.0f32, f32::max);
    let separation_min = 1.0 - best_cross;

    let size = cluster.members().len();
    let cohesion = cohesion_mean.unwrap_or(0.0);
    let label = if size >= params.correct_min_size
        && cohesion >= params.correct_min_cohesion
        && separation_min >= params.correct_min_separation
    {
        AuditLabel::Correct
    } else if size >= 2 && cohesion < params.split_below_cohesion {
        AuditLabel::SplitNeeded
    } else if size >= 2 && separation_min < params.merge_below_separation {
        AuditLabel::ShouldMerge
    } else {
        AuditLabel::Mixed
    };

    ClusterAudit {
        cluster_id: cluster.id(),
        size,
        cohesion_mean,
        cohesion_median,
        separation_min,
        label,
    }
}
