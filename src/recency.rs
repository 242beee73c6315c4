//! Time-bucketed index of cluster centroids.
//!
//! Readers take a shared lock only long enough to copy `Arc` handles of the
//! candidate centroids, then score them without holding the lock. A writer
//! replaces a centroid by swapping its `Arc`, so a concurrent reader sees
//! either the old or the new vector, never a partial one.

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::debug;

use crate::models::ClusterId;
use crate::similarity::cosine_similarity;

/// Similarities closer than this are treated as equal; the smaller id wins.
pub const SIM_TIE_EPS: f32 = 1e-6;

/// Above this many candidates, scoring is spread over the rayon pool.
const PAR_SCORE_MIN: usize = 256;

/// Start of the window ending at `now`, clamped to the earliest representable time.
pub fn window_start(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    now.checked_sub_signed(window).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[derive(Debug, Clone)]
pub struct Candidate {
    pub cluster_id: ClusterId,
    pub similarity: f32,
}

#[derive(Debug, Clone)]
struct Entry {
    centroid: Arc<Vec<f32>>,
    last_updated: DateTime<Utc>,
    bucket: i64,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<ClusterId, Entry>,
    buckets: BTreeMap<i64, BTreeSet<ClusterId>>,
}

pub struct RecencyIndex {
    bucket_ms: i64,
    inner: RwLock<Inner>,
}

impl RecencyIndex {
    pub fn new(bucket: Duration) -> Self {
        Self {
            bucket_ms: bucket.num_milliseconds().max(1),
            inner: RwLock::new(Inner::default()),
        }
    }

    fn bucket_of(&self, t: DateTime<Utc>) -> i64 {
        t.timestamp_millis().div_euclid(self.bucket_ms)
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: ClusterId) -> bool {
        self.inner.read().entries.contains_key(&id)
    }

    pub fn upsert(&self, id: ClusterId, centroid: Vec<f32>, last_updated: DateTime<Utc>) {
        let bucket = self.bucket_of(last_updated);
        let mut inner = self.inner.write();
        let old_bucket = inner.entries.get(&id).map(|e| e.bucket);
        if let Some(old_bucket) = old_bucket.filter(|b| *b != bucket) {
            if let Some(ids) = inner.buckets.get_mut(&old_bucket) {
                ids.remove(&id);
                if ids.is_empty() {
                    inner.buckets.remove(&old_bucket);
                }
            }
        }
        inner.buckets.entry(bucket).or_default().insert(id);
        inner.entries.insert(
            id,
            Entry {
                centroid: Arc::new(centroid),
                last_updated,
                bucket,
            },
        );
    }

    pub fn remove(&self, id: ClusterId) {
        let mut inner = self.inner.write();
        if let Some(old) = inner.entries.remove(&id) {
            if let Some(ids) = inner.buckets.get_mut(&old.bucket) {
                ids.remove(&id);
                if ids.is_empty() {
                    inner.buckets.remove(&old.bucket);
                }
            }
        }
    }

    /// Centroids of clusters with `last_updated >= cutoff`, ordered by id.
    pub fn active_since(&self, cutoff: DateTime<Utc>) -> Vec<(ClusterId, Arc<Vec<f32>>)> {
        let inner = self.inner.read();
        let mut out: Vec<(ClusterId, Arc<Vec<f32>>)> = inner
            .buckets
            .range(self.bucket_of(cutoff)..)
            .flat_map(|(_, ids)| ids.iter())
            .filter_map(|id| {
                inner
                    .entries
                    .get(id)
                    .filter(|e| e.last_updated >= cutoff)
                    .map(|e| (*id, Arc::clone(&e.centroid)))
            })
            .collect();
        out.sort_by_key(|(id, _)| *id);
        out
    }

    /// Up to `k` nearest centroids among clusters active within `window`
    /// of `now`, best first.
    pub fn nearest(&self, query: &[f32], now: DateTime<Utc>, window: Duration, k: usize) -> Vec<Candidate> {
        let pool = self.active_since(window_start(now, window));
        let scored: Vec<Candidate> = if pool.len() >= PAR_SCORE_MIN {
            pool.par_iter()
                .map(|(id, c)| Candidate { cluster_id: *id, similarity: cosine_similarity(query, c) })
                .collect()
        } else {
            pool.iter()
                .map(|(id, c)| Candidate { cluster_id: *id, similarity: cosine_similarity(query, c) })
                .collect()
        };
        debug!("Recency lookup - pool={}, window_hours={}", scored.len(), window.num_hours());
        rank(scored, k)
    }

    /// Drop clusters idle since before `cutoff`; returns their ids.
    pub fn prune(&self, cutoff: DateTime<Utc>) -> Vec<ClusterId> {
        let mut inner = self.inner.write();
        let stale: Vec<ClusterId> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.last_updated < cutoff)
            .map(|(id, _)| *id)
            .collect();
        for id in &stale {
            if let Some(e) = inner.entries.remove(id) {
                if let Some(ids) = inner.buckets.get_mut(&e.bucket) {
                    ids.remove(id);
                    if ids.is_empty() {
                        inner.buckets.remove(&e.bucket);
                    }
                }
            }
        }
        let mut stale = stale;
        stale.sort();
        stale
    }
}

/// Select the best `k` candidates. `scored` must be ordered by id so the
/// tolerance-based tie-break always resolves toward the smaller id.
fn rank(mut scored: Vec<Candidate>, k: usize) -> Vec<Candidate> {
    let mut out = Vec::with_capacity(k);
    while out.len() < k && !scored.is_empty() {
        let mut best = 0usize;
        for (i, c) in scored.iter().enumerate().skip(1) {
            let b = &scored[best];
            if c.similarity > b.similarity + SIM_TIE_EPS
                || ((c.similarity - b.similarity).abs() <= SIM_TIE_EPS && c.cluster_id < b.cluster_id)
            {
                best = i;
            }
        }
        out.push(scored.remove(best));
    }
    out
}
