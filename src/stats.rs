//! Corroboration metrics. Everything here is a pure function of a cluster's
//! current members; nothing is carried over from earlier recomputes.

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::cluster::Cluster;
use crate::models::{Article, Lean};
use crate::similarity::mean_pairwise_cosine;

/// Members considered for the recent-similarity figure.
pub const RECENT_MEMBERS: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CorroborationMetrics {
    pub num_sources: usize,
    pub distinct_domain_count: usize,
    pub lean_entropy: f64,
    pub time_span_hours: f64,
    /// `None` with fewer than two embedded recent members.
    pub top5_similarity_mean: Option<f32>,
}

pub fn lean_tally(members: &[Arc<Article>]) -> BTreeMap<Lean, usize> {
    let mut tally = BTreeMap::new();
    for m in members {
        *tally.entry(m.source_lean).or_insert(0) += 1;
    }
    tally
}

pub fn distinct_domains(members: &[Arc<Article>]) -> BTreeSet<String> {
    members.iter().map(|m| m.domain.clone()).collect()
}

/// Base-2 Shannon entropy of the tally; zero-count categories contribute 0.
pub fn shannon_entropy(tally: &BTreeMap<Lean, usize>) -> f64 {
    let total: usize = tally.values().sum();
    debug_assert!(total > 0, "entropy requested for an empty lean tally");
    if total == 0 {
        return 0.0;
    }
    let total = total as f64;
    let h: f64 = tally
        .values()
        .filter(|&&n| n > 0)
        .map(|&n| {
            let p = n as f64 / total;
            -p * p.log2()
        })
        .sum();
    // a single category yields -1 * log2(1) = -0.0
    h.max(0.0)
}

/// Mean pairwise cosine over the most recently published members.
pub fn recent_similarity(members: &[Arc<Article>]) -> Option<f32> {
    let recent: Vec<&[f32]> = members
        .iter()
        .enumerate()
        .sorted_by(|(ia, a), (ib, b)| a.published_at.cmp(&b.published_at).then(ia.cmp(ib)))
        .rev()
        .take(RECENT_MEMBERS)
        .filter_map(|(_, m)| m.embedding.as_deref())
        .collect();
    mean_pairwise_cosine(&recent)
}

pub fn recompute(cluster: &Cluster) -> CorroborationMetrics {
    let members = cluster.members();
    let tally = lean_tally(members);
    let first = members.iter().map(|m| m.published_at).min();
    let last = members.iter().map(|m| m.published_at).max();
    let time_span_hours = match (first, last) {
        (Some(f), Some(l)) => (l - f).num_milliseconds() as f64 / 3_600_000.0,
        _ => 0.0,
    };

    CorroborationMetrics {
        num_sources: members.len(),
        distinct_domain_count: distinct_domains(members).len(),
        lean_entropy: shannon_entropy(&tally),
        time_span_hours,
        top5_similarity_mean: recent_similarity(members),
    }
}

/// Recompute and store metrics on the cluster. The only writer of
/// `Cluster::metrics`.
pub fn refresh(cluster: &mut Cluster) {
    let m = recompute(cluster);
    cluster.set_metrics(m);
}
