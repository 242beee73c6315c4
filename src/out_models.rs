use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::blindspot::BlindspotResult;
use crate::cluster::{Cluster, ClusterState};
use crate::models::{ArticleId, ClusterId, Lean, TopicId};
use crate::stats::CorroborationMetrics;

fn is_zero(n: &usize) -> bool {
    *n == 0
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeanDistribution {
    pub left: usize,
    pub center: usize,
    pub right: usize,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub unknown: usize,
}

/// Cluster as exposed to presentation/API collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterRecord {
    pub cluster_id: ClusterId,
    pub title_hint: String,
    pub first_seen: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub member_ids: Vec<ArticleId>,
    pub lean_distribution: LeanDistribution,
    pub metrics: CorroborationMetrics,
    pub blindspot: Option<BlindspotResult>,
    pub topic_ids: Vec<TopicId>,
    #[serde(flatten)]
    pub status: ClusterState,
    #[serde(default)]
    pub low_confidence: bool,
}

impl ClusterRecord {
    pub fn from_cluster(c: &Cluster, blindspot: Option<BlindspotResult>) -> Self {
        let count = |l: Lean| c.lean_tally().get(&l).copied().unwrap_or(0);
        Self {
            cluster_id: c.id(),
            title_hint: c.title_hint().to_string(),
            first_seen: c.first_seen(),
            last_updated: c.last_updated(),
            member_ids: c.member_ids(),
            lean_distribution: LeanDistribution {
                left: count(Lean::Left),
                center: count(Lean::Center),
                right: count(Lean::Right),
                unknown: count(Lean::Unknown),
            },
            metrics: c.metrics().clone(),
            blindspot,
            topic_ids: c.topic_ids().iter().cloned().collect(),
            status: c.state(),
            low_confidence: c.is_low_confidence(),
        }
    }
}
