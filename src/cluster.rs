//! Online event clustering.
//!
//! Clusters live in an arena keyed by `ClusterId`; all cross references
//! (merge redirects, topic links) are ids, never pointers. Each cluster sits
//! behind its own mutex so assignments to different clusters run in
//! parallel while two articles bound for the same cluster are serialised.
//!
//! Articles are expected in non-decreasing `published_at` order. An article
//! that arrives late is compared against centroids that already moved on
//! without it; the result can differ from in-order processing, which is
//! accepted. Duplicate clusters created that way (or by racing writers) are
//! folded together by `merge_pass`.

use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::models::{Article, ArticleId, ClusterId, Lean, TopicId};
use crate::recency::{window_start, RecencyIndex};
use crate::similarity::{cosine_similarity, signature_overlap};
use crate::stats::{self, CorroborationMetrics};
use crate::topics::TopicLinker;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum ClusterState {
    /// Receiving members within the recency window.
    Open,
    /// Outside the window; read-only.
    Dormant,
    /// Superseded; lookups follow the redirect.
    Merged { into: ClusterId },
}

#[derive(Debug, Clone)]
pub struct Cluster {
    id: ClusterId,
    state: ClusterState,
    centroid: Vec<f32>,
    embedded_count: usize,
    members: Vec<Arc<Article>>,
    first_seen: DateTime<Utc>,
    last_updated: DateTime<Utc>,
    lean_tally: BTreeMap<Lean, usize>,
    distinct_domains: BTreeSet<String>,
    topic_ids: BTreeSet<TopicId>,
    signature: BTreeSet<String>,
    low_confidence: bool,
    title_override: Option<String>,
    metrics: CorroborationMetrics,
}

impl Cluster {
    fn seed(id: ClusterId, article: Arc<Article>) -> Self {
        let embedding = article.embedding.clone();
        let mut c = Self {
            id,
            state: ClusterState::Open,
            embedded_count: usize::from(embedding.is_some()),
            centroid: embedding.unwrap_or_default(),
            first_seen: article.published_at,
            last_updated: article.published_at,
            lean_tally: BTreeMap::from([(article.source_lean, 1)]),
            distinct_domains: BTreeSet::from([article.domain.clone()]),
            topic_ids: BTreeSet::new(),
            signature: article.signature.clone(),
            low_confidence: !article.is_embedded(),
            title_override: None,
            metrics: CorroborationMetrics::default(),
            members: vec![article],
        };
        stats::refresh(&mut c);
        c
    }

    pub fn id(&self) -> ClusterId {
        self.id
    }

    pub fn state(&self) -> ClusterState {
        self.state
    }

    pub fn centroid(&self) -> &[f32] {
        &self.centroid
    }

    pub fn members(&self) -> &[Arc<Article>] {
        &self.members
    }

    /// In discovery order.
    pub fn member_ids(&self) -> Vec<ArticleId> {
        self.members.iter().map(|m| m.id.clone()).collect()
    }

    pub fn first_seen(&self) -> DateTime<Utc> {
        self.first_seen
    }

    pub fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }

    pub fn time_span(&self) -> Duration {
        self.last_updated - self.first_seen
    }

    pub fn lean_tally(&self) -> &BTreeMap<Lean, usize> {
        &self.lean_tally
    }

    pub fn distinct_domains(&self) -> &BTreeSet<String> {
        &self.distinct_domains
    }

    pub fn topic_ids(&self) -> &BTreeSet<TopicId> {
        &self.topic_ids
    }

    pub fn signature(&self) -> &BTreeSet<String> {
        &self.signature
    }

    /// Set for unclustered singletons whose text could not be embedded.
    pub fn is_low_confidence(&self) -> bool {
        self.low_confidence
    }

    pub fn metrics(&self) -> &CorroborationMetrics {
        &self.metrics
    }

    /// Summarizer title if one was stored, else the first member's title.
    pub fn title_hint(&self) -> &str {
        self.title_override
            .as_deref()
            .or_else(|| self.members.first().map(|m| m.title.as_str()))
            .unwrap_or("")
    }

    pub(crate) fn set_metrics(&mut self, m: CorroborationMetrics) {
        self.metrics = m;
    }

    pub(crate) fn set_title_override(&mut self, title: String) {
        self.title_override = Some(title);
    }

    fn add_member(&mut self, article: Arc<Article>) {
        if let Some(e) = article.embedding.as_deref() {
            if self.embedded_count == 0 || self.centroid.len() != e.len() {
                self.centroid = e.to_vec();
                self.embedded_count = 1;
            } else {
                self.embedded_count += 1;
                let n = self.embedded_count as f32;
                for (c, x) in self.centroid.iter_mut().zip(e) {
                    *c += (x - *c) / n;
                }
            }
        }
        self.first_seen = self.first_seen.min(article.published_at);
        self.last_updated = self.last_updated.max(article.published_at);
        *self.lean_tally.entry(article.source_lean).or_insert(0) += 1;
        self.distinct_domains.insert(article.domain.clone());
        self.signature.extend(article.signature.iter().cloned());
        self.members.push(article);
    }

    fn absorb(&mut self, other: &Cluster) {
        let (n1, n2) = (self.embedded_count as f32, other.embedded_count as f32);
        if other.embedded_count > 0 {
            if self.embedded_count == 0 || self.centroid.len() != other.centroid.len() {
                self.centroid = other.centroid.clone();
            } else {
                for (c, x) in self.centroid.iter_mut().zip(&other.centroid) {
                    *c = (*c * n1 + x * n2) / (n1 + n2);
                }
            }
            self.embedded_count += other.embedded_count;
        }
        self.first_seen = self.first_seen.min(other.first_seen);
        self.last_updated = self.last_updated.max(other.last_updated);
        for (lean, n) in &other.lean_tally {
            *self.lean_tally.entry(*lean).or_insert(0) += n;
        }
        self.distinct_domains.extend(other.distinct_domains.iter().cloned());
        self.topic_ids.extend(other.topic_ids.iter().cloned());
        self.signature.extend(other.signature.iter().cloned());
        self.members.extend(other.members.iter().cloned());
        self.low_confidence = self.low_confidence && other.low_confidence;
    }
}

/// Arena of clusters addressed by id.
#[derive(Default)]
pub struct ClusterStore {
    clusters: RwLock<BTreeMap<ClusterId, Arc<Mutex<Cluster>>>>,
    next_id: AtomicU64,
}

impl ClusterStore {
    fn allocate(&self) -> ClusterId {
        ClusterId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn insert(&self, cluster: Cluster) -> Arc<Mutex<Cluster>> {
        let id = cluster.id;
        let handle = Arc::new(Mutex::new(cluster));
        self.clusters.write().insert(id, Arc::clone(&handle));
        handle
    }

    fn handle(&self, id: ClusterId) -> Option<Arc<Mutex<Cluster>>> {
        self.clusters.read().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.clusters.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ids(&self) -> Vec<ClusterId> {
        self.clusters.read().keys().copied().collect()
    }

    /// Follow merge redirects to the live cluster.
    pub fn resolve(&self, mut id: ClusterId) -> Option<ClusterId> {
        loop {
            let handle = self.handle(id)?;
            let state = handle.lock().state;
            match state {
                ClusterState::Merged { into } => id = into,
                _ => return Some(id),
            }
        }
    }

    pub fn snapshot(&self, id: ClusterId) -> Option<Cluster> {
        self.handle(id).map(|h| h.lock().clone())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ClustererParams {
    pub assign_threshold: f32,
    pub merge_band: f32,
    pub merge_lexical_floor: f32,
    pub recency_window: Duration,
    pub index_bucket: Duration,
}

impl From<&EngineConfig> for ClustererParams {
    fn from(cfg: &EngineConfig) -> Self {
        Self {
            assign_threshold: cfg.assign_threshold,
            merge_band: cfg.merge_band,
            merge_lexical_floor: cfg.merge_lexical_floor,
            recency_window: cfg.recency_window(),
            index_bucket: cfg.index_bucket(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Decision {
    Assigned { similarity: f32 },
    /// Joined through the merge band after the lexical check passed.
    LexicalAssigned { similarity: f32, overlap: f32 },
    Created,
    /// No embedding: persisted as an unclustered singleton.
    Unclustered,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Assignment {
    pub cluster_id: ClusterId,
    pub decision: Decision,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Merged { survivor: ClusterId, absorbed: ClusterId },
    /// Both ids resolved to the same cluster.
    SameCluster(ClusterId),
    Missing,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergePassReport {
    pub merged: usize,
    pub dormant: usize,
}

pub struct IncrementalClusterer {
    params: ClustererParams,
    store: ClusterStore,
    index: RecencyIndex,
    linker: TopicLinker,
    pending_merges: Mutex<Vec<(ClusterId, ClusterId)>>,
}

impl IncrementalClusterer {
    pub fn new(params: ClustererParams, linker: TopicLinker) -> Self {
        Self {
            index: RecencyIndex::new(params.index_bucket),
            params,
            store: ClusterStore::default(),
            linker,
            pending_merges: Mutex::new(Vec::new()),
        }
    }

    pub fn params(&self) -> &ClustererParams {
        &self.params
    }

    pub fn store(&self) -> &ClusterStore {
        &self.store
    }

    pub fn index(&self) -> &RecencyIndex {
        &self.index
    }

    pub fn pending_merges(&self) -> Vec<(ClusterId, ClusterId)> {
        self.pending_merges.lock().clone()
    }

    /// Place one article. Creates or mutates at most one cluster.
    pub fn assign(&self, article: Arc<Article>) -> Assignment {
        let Some(embedding) = article.embedding.clone() else {
            let id = self.create(article, false);
            return Assignment { cluster_id: id, decision: Decision::Unclustered };
        };

        let p = self.params;
        let candidates = self.index.nearest(&embedding, article.published_at, p.recency_window, 2);

        if let Some(best) = candidates.first() {
            if best.similarity >= p.assign_threshold {
                if let Some(id) = self.join(best.cluster_id, Arc::clone(&article)) {
                    debug!("Assignment - article={}, cluster={}, similarity={:.4}", article.id, id, best.similarity);
                    return Assignment { cluster_id: id, decision: Decision::Assigned { similarity: best.similarity } };
                }
            } else if best.similarity >= p.assign_threshold - p.merge_band {
                let overlap = self.lexical_overlap(best.cluster_id, &article);
                if overlap >= p.merge_lexical_floor {
                    if let Some(id) = self.join(best.cluster_id, Arc::clone(&article)) {
                        if let Some(second) = candidates.get(1) {
                            self.consider_bridge(id, second.cluster_id, second.similarity, &article);
                        }
                        debug!(
                            "Lexical assignment - article={}, cluster={}, similarity={:.4}, overlap={:.3}",
                            article.id, id, best.similarity, overlap
                        );
                        return Assignment {
                            cluster_id: id,
                            decision: Decision::LexicalAssigned { similarity: best.similarity, overlap },
                        };
                    }
                } else {
                    debug!(
                        "Merge band miss - article={}, cluster={}, similarity={:.4}, overlap={:.3}",
                        article.id, best.cluster_id, best.similarity, overlap
                    );
                }
            }
        }

        let id = self.create(article, true);
        Assignment { cluster_id: id, decision: Decision::Created }
    }

    fn create(&self, article: Arc<Article>, indexed: bool) -> ClusterId {
        let id = self.store.allocate();
        let mut cluster = Cluster::seed(id, Arc::clone(&article));
        cluster.topic_ids = self.linker.link(&cluster, &article.entities);
        if indexed {
            self.index.upsert(id, cluster.centroid.clone(), cluster.last_updated);
        } else {
            warn!("Unclustered singleton - article={}, cluster={}, reason=no embedding", article.id, id);
        }
        debug!("Cluster created - article={}, cluster={}", article.id, id);
        self.store.insert(cluster);
        id
    }

    /// Append to the live cluster behind `id`; `None` when it went dormant.
    fn join(&self, id: ClusterId, article: Arc<Article>) -> Option<ClusterId> {
        let mut id = id;
        loop {
            let handle = self.store.handle(id)?;
            let mut cluster = handle.lock();
            match cluster.state {
                ClusterState::Merged { into } => {
                    id = into;
                    continue;
                }
                ClusterState::Dormant => return None,
                ClusterState::Open => {}
            }
            let topics = self.linker.link(&cluster, &article.entities);
            cluster.add_member(article);
            cluster.topic_ids = topics;
            stats::refresh(&mut cluster);
            self.index.upsert(id, cluster.centroid.clone(), cluster.last_updated);
            return Some(id);
        }
    }

    fn lexical_overlap(&self, id: ClusterId, article: &Article) -> f32 {
        self.store
            .resolve(id)
            .and_then(|id| self.store.handle(id))
            .map(|h| signature_overlap(&article.signature, &h.lock().signature))
            .unwrap_or(0.0)
    }

    /// Queue a merge when the article sits in the band of a second cluster too.
    fn consider_bridge(&self, joined: ClusterId, other: ClusterId, similarity: f32, article: &Article) {
        let p = self.params;
        if similarity < p.assign_threshold - p.merge_band {
            return;
        }
        if self.store.resolve(other) == Some(joined) {
            return;
        }
        if self.lexical_overlap(other, article) < p.merge_lexical_floor {
            return;
        }
        let pair = (joined.min(other), joined.max(other));
        let mut pending = self.pending_merges.lock();
        if !pending.contains(&pair) {
            debug!("Merge candidate queued - a={}, b={}, via_article={}", pair.0, pair.1, article.id);
            pending.push(pair);
        }
    }

    /// Union two clusters. The smaller id survives and the other becomes
    /// `Merged` with a redirect. Merging a cluster into itself is a no-op.
    pub fn merge(&self, a: ClusterId, b: ClusterId) -> MergeOutcome {
        loop {
            let (Some(a), Some(b)) = (self.store.resolve(a), self.store.resolve(b)) else {
                return MergeOutcome::Missing;
            };
            if a == b {
                warn!("Merge skipped - cluster={} merged into itself", a);
                return MergeOutcome::SameCluster(a);
            }
            let (keep_id, lose_id) = (a.min(b), a.max(b));
            let (Some(keep_h), Some(lose_h)) = (self.store.handle(keep_id), self.store.handle(lose_id)) else {
                return MergeOutcome::Missing;
            };
            // lock in id order
            let mut keep = keep_h.lock();
            let mut lose = lose_h.lock();
            if matches!(keep.state, ClusterState::Merged { .. }) || matches!(lose.state, ClusterState::Merged { .. }) {
                // lost a race with another merge; resolve again
                continue;
            }

            let either_open = keep.state == ClusterState::Open || lose.state == ClusterState::Open;
            keep.absorb(&lose);
            keep.state = if either_open { ClusterState::Open } else { ClusterState::Dormant };
            stats::refresh(&mut keep);
            lose.state = ClusterState::Merged { into: keep_id };

            self.index.remove(lose_id);
            if keep.state == ClusterState::Open && keep.embedded_count > 0 {
                self.index.upsert(keep_id, keep.centroid.clone(), keep.last_updated);
            }
            info!(
                "Clusters merged - survivor={}, absorbed={}, members={}",
                keep_id,
                lose_id,
                keep.members.len()
            );
            return MergeOutcome::Merged { survivor: keep_id, absorbed: lose_id };
        }
    }

    fn centroid_of(&self, id: ClusterId) -> Option<Vec<f32>> {
        let id = self.store.resolve(id)?;
        self.store.handle(id).map(|h| h.lock().centroid.clone())
    }

    /// Off the hot path: fold queued candidates and near-duplicate open
    /// clusters together, then retire clusters idle beyond the window.
    pub fn merge_pass(&self, now: DateTime<Utc>) -> MergePassReport {
        let start = std::time::Instant::now();
        let p = self.params;
        let cutoff = window_start(now, p.recency_window);
        let mut report = MergePassReport::default();

        let queued = std::mem::take(&mut *self.pending_merges.lock());
        for (a, b) in queued {
            if let MergeOutcome::Merged { .. } = self.merge(a, b) {
                report.merged += 1;
            }
        }

        let active = self.index.active_since(cutoff);
        let n = active.len();
        let pairs: Vec<(ClusterId, ClusterId)> = (0..n)
            .into_par_iter()
            .flat_map_iter(|i| {
                let active = &active;
                ((i + 1)..n).filter_map(move |j| {
                    (cosine_similarity(&active[i].1, &active[j].1) >= p.assign_threshold)
                        .then(|| (active[i].0, active[j].0))
                })
            })
            .collect();

        for (a, b) in pairs {
            // earlier merges may have moved either centroid
            let (Some(ca), Some(cb)) = (self.centroid_of(a), self.centroid_of(b)) else {
                continue;
            };
            if cosine_similarity(&ca, &cb) < p.assign_threshold {
                continue;
            }
            if let MergeOutcome::Merged { .. } = self.merge(a, b) {
                report.merged += 1;
            }
        }

        for id in self.index.prune(cutoff) {
            if self.retire(id) {
                report.dormant += 1;
            }
        }

        info!(
            "Merge pass completed - duration={:.3}s, merged={}, dormant={}, open={}",
            start.elapsed().as_secs_f32(),
            report.merged,
            report.dormant,
            self.index.len()
        );
        report
    }

    /// Mark an open cluster dormant. The index entry is dropped under the
    /// cluster lock, so a join that re-indexed it after pruning cannot leave
    /// a dormant cluster behind in the index.
    fn retire(&self, id: ClusterId) -> bool {
        let Some(h) = self.store.handle(id) else {
            return false;
        };
        let mut c = h.lock();
        if c.state != ClusterState::Open {
            return false;
        }
        c.state = ClusterState::Dormant;
        self.index.remove(id);
        true
    }

    pub fn snapshot(&self, id: ClusterId) -> Option<Cluster> {
        self.store.snapshot(id)
    }

    /// Store a summarizer title on the live cluster behind `id`.
    pub fn set_title(&self, id: ClusterId, title: String) -> Option<ClusterId> {
        let id = self.store.resolve(id)?;
        let handle = self.store.handle(id)?;
        handle.lock().set_title_override(title);
        Some(id)
    }

    /// Every non-merged cluster, ordered by id.
    pub fn live_clusters(&self) -> Vec<Cluster> {
        self.store
            .ids()
            .into_iter()
            .filter_map(|id| self.store.snapshot(id))
            .filter(|c| !matches!(c.state, ClusterState::Merged { .. }))
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::TopicConfig;
    use chrono::TimeZone;

    pub(crate) fn at(hours: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, 18, 8, 0, 0).unwrap() + Duration::hours(hours)
    }

    pub(crate) fn article(id: &str, hours: i64, lean: Lean, domain: &str, embedding: Option<Vec<f32>>) -> Article {
        Article {
            id: id.to_string(),
            published_at: at(hours),
            source_id: domain.to_string(),
            source_lean: lean,
            source_confidence: 1.0,
            title: format!("title {}", id),
            canonical_text: format!("text {}", id),
            embedding,
            entities: BTreeSet::new(),
            signature: BTreeSet::new(),
            domain: domain.to_string(),
            country: None,
        }
    }

    pub(crate) fn clusterer() -> IncrementalClusterer {
        IncrementalClusterer::new(ClustererParams::from(&EngineConfig::default()), TopicLinker::new(&TopicConfig::default()))
    }

    pub(crate) fn feed(c: &IncrementalClusterer, a: Article) -> Assignment {
        c.assign(Arc::new(a))
    }

    #[test]
    fn first_article_creates_cluster() {
        let c = clusterer();
        let r = feed(&c, article("a", 0, Lean::Left, "x.com", Some(vec![1.0, 0.0, 0.0])));
        assert_eq!(r.decision, Decision::Created);
        let cl = c.snapshot(r.cluster_id).unwrap();
        assert_eq!(cl.metrics().num_sources, 1);
        assert_eq!(cl.state(), ClusterState::Open);
    }

    #[test]
    fn similar_article_joins_and_updates_mean() {
        let c = clusterer();
        let a = feed(&c, article("a", 0, Lean::Left, "x.com", Some(vec![1.0, 0.0, 0.0])));
        let b = feed(&c, article("b", 1, Lean::Right, "y.com", Some(vec![0.9, 0.43589, 0.0])));
        assert_eq!(a.cluster_id, b.cluster_id);
        assert!(matches!(b.decision, Decision::Assigned { .. }));
        let cl = c.snapshot(a.cluster_id).unwrap();
        assert!((cl.centroid()[0] - 0.95).abs() < 1e-5);
        assert!((cl.centroid()[1] - 0.217945).abs() < 1e-5);
        assert_eq!(cl.member_ids(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(cl.last_updated(), at(1));
    }

    #[test]
    fn dissimilar_article_creates_new_cluster() {
        let c = clusterer();
        let a = feed(&c, article("a", 0, Lean::Left, "x.com", Some(vec![1.0, 0.0])));
        let b = feed(&c, article("b", 0, Lean::Left, "x.com", Some(vec![0.0, 1.0])));
        assert_ne!(a.cluster_id, b.cluster_id);
        assert_eq!(b.decision, Decision::Created);
    }

    #[test]
    fn out_of_window_creates_new_cluster() {
        let c = clusterer();
        let a = feed(&c, article("a", 0, Lean::Left, "x.com", Some(vec![1.0, 0.0])));
        let b = feed(&c, article("b", 73, Lean::Left, "x.com", Some(vec![1.0, 0.0])));
        assert_ne!(a.cluster_id, b.cluster_id);
    }

    #[test]
    fn tie_prefers_smaller_id() {
        let c = clusterer();
        let a = feed(&c, article("a", 0, Lean::Left, "x.com", Some(vec![1.0, 0.0])));
        let b = feed(&c, article("b", 0, Lean::Left, "x.com", Some(vec![0.0, 1.0])));
        // equidistant from both
        let r = feed(&c, article("c", 1, Lean::Left, "x.com", Some(vec![1.0, 1.0])));
        assert!(a.cluster_id < b.cluster_id);
        // 0.707 is below the threshold, so it becomes its own cluster
        assert_eq!(r.decision, Decision::Created);

        let c = IncrementalClusterer::new(
            ClustererParams { assign_threshold: 0.7, ..ClustererParams::from(&EngineConfig::default()) },
            TopicLinker::new(&TopicConfig::default()),
        );
        let a = feed(&c, article("a", 0, Lean::Left, "x.com", Some(vec![1.0, 0.0])));
        let _b = feed(&c, article("b", 0, Lean::Left, "x.com", Some(vec![0.0, 1.0])));
        let r = feed(&c, article("c", 1, Lean::Left, "x.com", Some(vec![1.0, 1.0])));
        assert_eq!(r.cluster_id, a.cluster_id);
    }

    #[test]
    fn unembedded_article_is_unclustered_singleton() {
        let c = clusterer();
        let r = feed(&c, article("a", 0, Lean::Center, "x.com", None));
        assert_eq!(r.decision, Decision::Unclustered);
        let cl = c.snapshot(r.cluster_id).unwrap();
        assert!(cl.is_low_confidence());
        assert!(!c.index().contains(r.cluster_id));
        assert!(cl.metrics().top5_similarity_mean.is_none());
    }

    #[test]
    fn merge_band_requires_lexical_overlap() {
        let c = clusterer();
        let mut a = article("a", 0, Lean::Left, "x.com", Some(vec![1.0, 0.0]));
        a.signature = ["quake", "chile", "santiago"].iter().map(|s| s.to_string()).collect();
        let first = feed(&c, a);

        // cos ~= 0.78: inside the band below 0.82
        let e = vec![0.78, 0.6258];
        let mut b = article("b", 1, Lean::Right, "y.com", Some(e.clone()));
        b.signature = ["quake", "chile"].iter().map(|s| s.to_string()).collect();
        let r = feed(&c, b);
        assert_eq!(r.cluster_id, first.cluster_id);
        assert!(matches!(r.decision, Decision::LexicalAssigned { .. }));

        let mut d = article("d", 2, Lean::Right, "z.com", Some(vec![0.78, -0.6258]));
        d.signature = ["election", "results"].iter().map(|s| s.to_string()).collect();
        let r = feed(&c, d);
        assert_eq!(r.decision, Decision::Created);
    }

    #[test]
    fn self_merge_is_noop() {
        let c = clusterer();
        let a = feed(&c, article("a", 0, Lean::Left, "x.com", Some(vec![1.0, 0.0])));
        assert_eq!(c.merge(a.cluster_id, a.cluster_id), MergeOutcome::SameCluster(a.cluster_id));
        assert_eq!(c.snapshot(a.cluster_id).unwrap().metrics().num_sources, 1);
    }

    #[test]
    fn merge_unions_members_and_redirects() {
        let c = clusterer();
        let a = feed(&c, article("a", 0, Lean::Left, "x.com", Some(vec![1.0, 0.0])));
        let b = feed(&c, article("b", 1, Lean::Right, "y.com", Some(vec![0.0, 1.0])));
        let b2 = feed(&c, article("b2", 2, Lean::Right, "z.com", Some(vec![0.0, 1.0])));
        assert_eq!(b.cluster_id, b2.cluster_id);

        let out = c.merge(b.cluster_id, a.cluster_id);
        assert_eq!(out, MergeOutcome::Merged { survivor: a.cluster_id, absorbed: b.cluster_id });
        // idempotent once merged
        assert_eq!(c.merge(a.cluster_id, b.cluster_id), MergeOutcome::SameCluster(a.cluster_id));

        let s = c.snapshot(a.cluster_id).unwrap();
        assert_eq!(s.metrics().num_sources, 3);
        assert!((s.centroid()[0] - 1.0 / 3.0).abs() < 1e-6);
        assert!((s.centroid()[1] - 2.0 / 3.0).abs() < 1e-6);
        assert_eq!(s.lean_tally().values().sum::<usize>(), 3);
        assert_eq!(c.store().resolve(b.cluster_id), Some(a.cluster_id));
        assert_eq!(
            c.snapshot(b.cluster_id).unwrap().state(),
            ClusterState::Merged { into: a.cluster_id }
        );
        assert!(!c.index().contains(b.cluster_id));
        assert_eq!(c.live_clusters().len(), 1);
    }

    fn with_signature(mut a: Article, words: &[&str]) -> Article {
        a.signature = words.iter().map(|s| s.to_string()).collect();
        a
    }

    #[test]
    fn bridging_article_queues_merge_for_next_pass() {
        let c = clusterer();
        let north = feed(
            &c,
            with_signature(article("n", 0, Lean::Left, "x.com", Some(vec![0.79, 0.6131])), &["quake", "chile", "santiago"]),
        );
        let south = feed(
            &c,
            with_signature(article("s", 0, Lean::Right, "y.com", Some(vec![0.79, -0.6131])), &["quake", "chile", "valparaiso"]),
        );
        assert_eq!(south.decision, Decision::Created);
        assert!(c.pending_merges().is_empty());

        // cos ~= 0.79 to both: inside the band of each, overlapping both signatures
        let bridge = feed(
            &c,
            with_signature(article("b", 0, Lean::Center, "z.com", Some(vec![1.0, 0.0])), &["quake", "chile", "rescue", "teams"]),
        );
        assert_eq!(bridge.cluster_id, north.cluster_id);
        assert!(matches!(bridge.decision, Decision::LexicalAssigned { .. }));
        assert_eq!(c.pending_merges(), vec![(north.cluster_id, south.cluster_id)]);

        let report = c.merge_pass(at(0));
        assert_eq!(report, MergePassReport { merged: 1, dormant: 0 });
        assert!(c.pending_merges().is_empty());
        assert_eq!(c.store().resolve(south.cluster_id), Some(north.cluster_id));
        let live = c.live_clusters();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].metrics().num_sources, 3);
    }

    #[test]
    fn retired_cluster_leaves_index_even_if_rejoined_after_prune() {
        let c = clusterer();
        let a = feed(&c, article("a", 0, Lean::Left, "x.com", Some(vec![1.0, 0.0])));
        assert_eq!(c.index().prune(at(100)), vec![a.cluster_id]);
        // a join that raced the prune puts the cluster back
        c.index().upsert(a.cluster_id, vec![1.0, 0.0], at(0));

        assert!(c.retire(a.cluster_id));
        assert!(!c.index().contains(a.cluster_id));
        assert_eq!(c.snapshot(a.cluster_id).unwrap().state(), ClusterState::Dormant);
        assert!(!c.retire(a.cluster_id));

        let late = feed(&c, article("late", 1, Lean::Left, "x.com", Some(vec![1.0, 0.0])));
        assert_ne!(late.cluster_id, a.cluster_id);
        assert_eq!(late.decision, Decision::Created);
    }

    #[test]
    fn merge_pass_folds_duplicates_and_retires_idle() {
        let c = clusterer();
        let a = feed(&c, article("a", 0, Lean::Left, "x.com", Some(vec![1.0, 0.0])));
        let old = feed(&c, article("old", 0, Lean::Left, "x.com", Some(vec![0.0, 1.0])));
        // simulate a duplicate left behind by a racing writer
        let dup_id = c.store.allocate();
        let dup = Cluster::seed(dup_id, Arc::new(article("dup", 1, Lean::Right, "y.com", Some(vec![1.0, 0.01]))));
        c.index.upsert(dup_id, dup.centroid.clone(), dup.last_updated);
        c.store.insert(dup);
        let late = feed(&c, article("late", 80, Lean::Left, "x.com", Some(vec![1.0, 0.0])));

        let report = c.merge_pass(at(80));
        // `a` and `dup` are both idle past the window at t=80, so only
        // dormancy applies to them
        assert_eq!(report.merged, 0);
        assert_eq!(c.snapshot(old.cluster_id).unwrap().state(), ClusterState::Dormant);
        assert_eq!(c.snapshot(a.cluster_id).unwrap().state(), ClusterState::Dormant);
        assert_eq!(c.snapshot(late.cluster_id).unwrap().state(), ClusterState::Open);

        let c2 = clusterer();
        let a = feed(&c2, article("a", 0, Lean::Left, "x.com", Some(vec![1.0, 0.0])));
        let dup_id = c2.store.allocate();
        let dup = Cluster::seed(dup_id, Arc::new(article("dup", 1, Lean::Right, "y.com", Some(vec![1.0, 0.01]))));
        c2.index.upsert(dup_id, dup.centroid.clone(), dup.last_updated);
        c2.store.insert(dup);
        let report = c2.merge_pass(at(2));
        assert_eq!(report.merged, 1);
        assert_eq!(c2.snapshot(a.cluster_id).unwrap().metrics().num_sources, 2);
    }

    #[test]
    fn concurrent_assignments_to_one_cluster_are_serialised() {
        let c = Arc::new(clusterer());
        let seed = feed(&c, article("seed", 0, Lean::Left, "x.com", Some(vec![1.0, 0.0])));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let c = Arc::clone(&c);
                std::thread::spawn(move || {
                    for i in 0..25 {
                        let y = ((t * 25 + i) % 5) as f32 * 0.01;
                        c.assign(Arc::new(article(&format!("t{}-{}", t, i), 1, Lean::Right, "y.com", Some(vec![1.0, y]))));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let cl = c.snapshot(seed.cluster_id).unwrap();
        assert_eq!(cl.metrics().num_sources, 201);
        assert_eq!(cl.lean_tally().values().sum::<usize>(), 201);

        let n = cl.members().len() as f32;
        let mean_y: f32 = cl.members().iter().map(|m| m.embedding.as_ref().unwrap()[1]).sum::<f32>() / n;
        assert!((cl.centroid()[0] - 1.0).abs() < 1e-4);
        assert!((cl.centroid()[1] - mean_y).abs() < 1e-4);
    }

    #[test]
    fn centroid_tracks_mean_over_many_assignments() {
        let c = clusterer();
        let mut ids = BTreeSet::new();
        for i in 0..40 {
            let jitter = (i % 7) as f32 * 0.02;
            let r = feed(&c, article(&format!("a{}", i), i / 4, Lean::Center, "x.com", Some(vec![1.0, jitter, 0.1])));
            ids.insert(r.cluster_id);
        }
        for id in ids {
            let cl = c.snapshot(id).unwrap();
            let n = cl.members().len() as f32;
            for d in 0..3 {
                let mean: f32 = cl.members().iter().map(|m| m.embedding.as_ref().unwrap()[d]).sum::<f32>() / n;
                assert!((cl.centroid()[d] - mean).abs() < 1e-4);
            }
        }
    }
}
