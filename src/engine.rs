//! Normalizer -> embedder -> clusterer -> statistics -> {blindspot, topics},
//! plus the bias-profile stream feeding personal priors back in.

use anyhow::Result;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::api_types::{RawArticle, RawInteraction};
use crate::audit::{self, AuditParams, ClusterAudit};
use crate::blindspot::{self, BaselinePrior, BlindspotParams, BlindspotResult};
use crate::cluster::{Cluster, ClustererParams, Decision, IncrementalClusterer, MergeOutcome, MergePassReport};
use crate::config::EngineConfig;
use crate::embed::{embed_bounded, EmbedFailure, Embedder};
use crate::error::{EngineError, EngineResult};
use crate::models::{Article, ArticleId, ClusterId};
use crate::normalize::{canonical_text, normalize_domain, signature};
use crate::out_models::ClusterRecord;
use crate::profile::{BiasProfileAggregator, UserBiasProfile};
use crate::recency::window_start;
use crate::titles::TitleProvider;
use crate::topics::TopicLinker;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum IngestDecision {
    Assigned { similarity: f32 },
    LexicalAssigned { similarity: f32, overlap: f32 },
    Created,
    /// Empty canonical text; stored as an unclustered singleton.
    Unembeddable,
    /// Embedder timed out or failed; stored as a singleton.
    EmbedFailed { reason: EmbedFailureKind },
    /// Article id already ingested; nothing changed.
    Duplicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbedFailureKind {
    Timeout,
    Error,
    Malformed,
}

impl From<EmbedFailure> for EmbedFailureKind {
    fn from(f: EmbedFailure) -> Self {
        match f {
            EmbedFailure::Timeout => Self::Timeout,
            EmbedFailure::Error => Self::Error,
            EmbedFailure::Malformed => Self::Malformed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestOutcome {
    pub article_id: ArticleId,
    pub cluster_id: ClusterId,
    pub decision: IngestDecision,
}

pub struct Engine {
    cfg: EngineConfig,
    embedder: Arc<dyn Embedder>,
    clusterer: IncrementalClusterer,
    profiles: BiasProfileAggregator,
    blindspot: BlindspotParams,
    global_prior: BaselinePrior,
    articles: RwLock<HashMap<ArticleId, Arc<Article>>>,
    /// Filled once the article is placed; empty while its ingest is in flight.
    placements: RwLock<HashMap<ArticleId, Arc<OnceCell<ClusterId>>>>,
}

impl Engine {
    pub fn new(cfg: EngineConfig, embedder: Arc<dyn Embedder>) -> EngineResult<Self> {
        cfg.validate()?;
        Ok(Self {
            clusterer: IncrementalClusterer::new(ClustererParams::from(&cfg), TopicLinker::new(&cfg.topics)),
            profiles: BiasProfileAggregator::from_config(&cfg),
            blindspot: BlindspotParams::from(&cfg),
            global_prior: BaselinePrior::global(&cfg.global_prior),
            embedder,
            articles: RwLock::new(HashMap::new()),
            placements: RwLock::new(HashMap::new()),
            cfg,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    pub fn clusterer(&self) -> &IncrementalClusterer {
        &self.clusterer
    }

    pub fn global_prior(&self) -> &BaselinePrior {
        &self.global_prior
    }

    /// Normalise, embed and place one article. Never fails: embedding and
    /// text problems degrade to a singleton cluster.
    ///
    /// The article id is reserved before the embedding call, so a concurrent
    /// ingest of the same id waits for the first placement and reports
    /// `Duplicate` instead of joining a second time.
    pub async fn ingest(&self, raw: RawArticle) -> IngestOutcome {
        let article_id = raw.id.clone();
        let cell = {
            let mut placements = self.placements.write();
            Arc::clone(placements.entry(article_id.clone()).or_default())
        };

        let mut decision = IngestDecision::Duplicate;
        let slot = &mut decision;
        let placed = *cell
            .get_or_init(move || async move {
                let (cluster_id, d) = self.place(raw).await;
                *slot = d;
                cluster_id
            })
            .await;

        if decision == IngestDecision::Duplicate {
            let cluster_id = self.clusterer.store().resolve(placed).unwrap_or(placed);
            warn!("Duplicate article ignored - article={}, cluster={}", article_id, cluster_id);
            return IngestOutcome { article_id, cluster_id, decision };
        }
        IngestOutcome { article_id, cluster_id: placed, decision }
    }

    async fn place(&self, raw: RawArticle) -> (ClusterId, IngestDecision) {
        let text = canonical_text(&raw.title, &raw.excerpt, &raw.body_text, self.cfg.body_char_budget);
        let (embedding, failure) = if text.is_empty() {
            warn!("Unembeddable article - article={}, reason=empty canonical text", raw.id);
            (None, None)
        } else {
            match embed_bounded(self.embedder.as_ref(), &text, self.cfg.embed_timeout()).await {
                Ok(v) => (Some(v), None),
                Err(f) => (None, Some(f)),
            }
        };

        let entities: BTreeSet<String> = raw
            .entities
            .iter()
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty())
            .collect();
        let article = Arc::new(Article {
            signature: signature(&raw.title, &raw.excerpt, &entities),
            id: raw.id,
            published_at: raw.published_at,
            source_id: raw.source_id,
            source_lean: raw.source_lean,
            source_confidence: raw.source_confidence.clamp(0.0, 1.0),
            title: raw.title.trim().to_string(),
            canonical_text: text,
            embedding,
            entities,
            domain: normalize_domain(&raw.domain),
            country: raw.country,
        });

        self.articles.write().insert(article.id.clone(), Arc::clone(&article));
        let assignment = self.clusterer.assign(Arc::clone(&article));

        let decision = match (assignment.decision, failure) {
            (Decision::Assigned { similarity }, _) => IngestDecision::Assigned { similarity },
            (Decision::LexicalAssigned { similarity, overlap }, _) => IngestDecision::LexicalAssigned { similarity, overlap },
            (Decision::Created, _) => IngestDecision::Created,
            (Decision::Unclustered, Some(f)) => IngestDecision::EmbedFailed { reason: f.into() },
            (Decision::Unclustered, None) => IngestDecision::Unembeddable,
        };
        debug!("Article ingested - article={}, cluster={}, decision={:?}", article.id, assignment.cluster_id, decision);
        (assignment.cluster_id, decision)
    }

    pub fn article(&self, id: &str) -> Option<Arc<Article>> {
        self.articles.read().get(id).cloned()
    }

    /// Live cluster currently holding the article, following merges.
    pub fn placement(&self, article_id: &str) -> Option<ClusterId> {
        let id = self.placements.read().get(article_id).and_then(|c| c.get().copied())?;
        self.clusterer.store().resolve(id)
    }

    pub fn record_article(&self, user_id: &str, article: &Article) {
        self.profiles.record(user_id, article);
    }

    /// `false` when the article was never ingested.
    pub fn record_interaction(&self, interaction: &RawInteraction) -> bool {
        let Some(article) = self.article(&interaction.article_id) else {
            warn!("Interaction for unknown article - user={}, article={}", interaction.user_id, interaction.article_id);
            return false;
        };
        let at = interaction.at.unwrap_or(article.published_at);
        self.profiles.record_at(&interaction.user_id, article.source_lean, at);
        true
    }

    pub fn profile(&self, user_id: &str) -> BaselinePrior {
        self.profiles.profile(user_id)
    }

    pub fn user_profile(&self, user_id: &str) -> Option<Arc<UserBiasProfile>> {
        self.profiles.snapshot(user_id)
    }

    pub fn users(&self) -> Vec<String> {
        self.profiles.users()
    }

    pub fn cluster(&self, id: ClusterId) -> EngineResult<Cluster> {
        let live = self.clusterer.store().resolve(id).ok_or(EngineError::UnknownCluster(id))?;
        self.clusterer.snapshot(live).ok_or(EngineError::UnknownCluster(id))
    }

    pub fn score(&self, id: ClusterId, prior: &BaselinePrior) -> EngineResult<BlindspotResult> {
        Ok(blindspot::score(&self.cluster(id)?, prior, &self.blindspot))
    }

    fn to_record(&self, c: &Cluster, prior: &BaselinePrior) -> ClusterRecord {
        let bs = (!c.is_low_confidence()).then(|| blindspot::score(c, prior, &self.blindspot));
        ClusterRecord::from_cluster(c, bs)
    }

    /// Outbound record scored against `prior`, or the global prior.
    pub fn record(&self, id: ClusterId, prior: Option<&BaselinePrior>) -> EngineResult<ClusterRecord> {
        let c = self.cluster(id)?;
        Ok(self.to_record(&c, prior.unwrap_or(&self.global_prior)))
    }

    pub fn records(&self, prior: Option<&BaselinePrior>) -> Vec<ClusterRecord> {
        let prior = prior.unwrap_or(&self.global_prior);
        self.clusterer
            .live_clusters()
            .iter()
            .map(|c| self.to_record(c, prior))
            .collect()
    }

    pub fn merge(&self, a: ClusterId, b: ClusterId) -> MergeOutcome {
        self.clusterer.merge(a, b)
    }

    pub fn merge_pass(&self, now: DateTime<Utc>) -> MergePassReport {
        self.clusterer.merge_pass(now)
    }

    pub fn audit(&self, id: ClusterId, params: &AuditParams) -> EngineResult<ClusterAudit> {
        let c = self.cluster(id)?;
        let others = self
            .clusterer
            .index()
            .active_since(window_start(c.last_updated(), self.cfg.recency_window()));
        Ok(audit::audit(&c, &others, params))
    }

    /// Ask `provider` for an event title and store it as the title hint.
    pub async fn summarize_title(&self, id: ClusterId, provider: &dyn TitleProvider) -> Result<String> {
        let c = self.cluster(id)?;
        let headlines: Vec<String> = c.members().iter().map(|m| m.title.clone()).filter(|t| !t.is_empty()).collect();
        let title = provider.title(&headlines).await?;
        self.clusterer.set_title(c.id(), title.clone());
        debug!("Title stored - cluster={}, provider={}, title={}", c.id(), provider.name(), title);
        Ok(title)
    }
}
