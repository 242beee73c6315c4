use anyhow::{Context, Result};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::api_types::{RawArticle, RawInteraction};
use crate::engine::{Engine, IngestDecision};
use crate::ingest::order_for_ingest;
use crate::out_models::ClusterRecord;
use crate::render::render_report_markdown;
use crate::titles::TitleProvider;
use crate::topics::group_by_topic;

const TITLE_BATCH_SIZE: usize = 12;

#[derive(Debug, Default)]
pub struct RunSummary {
    pub articles: usize,
    pub clusters: usize,
    pub flagged: usize,
    pub merged: usize,
    pub decisions: BTreeMap<&'static str, usize>,
}

fn decision_key(d: &IngestDecision) -> &'static str {
    match d {
        IngestDecision::Assigned { .. } => "assigned",
        IngestDecision::LexicalAssigned { .. } => "lexical_assigned",
        IngestDecision::Created => "created",
        IngestDecision::Unembeddable => "unembeddable",
        IngestDecision::EmbedFailed { .. } => "embed_failed",
        IngestDecision::Duplicate => "duplicate",
    }
}

pub async fn run_batch(
    engine: &Engine,
    articles: Vec<RawArticle>,
    interactions: &[RawInteraction],
    user: Option<&str>,
    titler: &dyn TitleProvider,
    output_dir: &Path,
) -> Result<RunSummary> {
    let pipeline_start = std::time::Instant::now();
    let mut summary = RunSummary::default();

    // 1) ingest in publication order
    let articles = order_for_ingest(articles);
    let total = articles.len();
    let latest = articles.last().map(|a| a.published_at);
    let ingest_start = std::time::Instant::now();
    for (i, raw) in articles.into_iter().enumerate() {
        if i % 100 == 0 && i > 0 {
            let pct = (i as f32 / total as f32 * 100.0) as u32;
            info!("Ingest progress - processed={}/{} ({}%), clusters={}", i, total, pct, engine.clusterer().store().len());
        }
        let outcome = engine.ingest(raw).await;
        *summary.decisions.entry(decision_key(&outcome.decision)).or_insert(0) += 1;
    }
    summary.articles = total;
    info!(
        "Ingest completed - duration={:.2}s, articles={}, decisions={:?}",
        ingest_start.elapsed().as_secs_f32(),
        total,
        summary.decisions
    );

    // 2) merge pass anchored at the newest article
    if let Some(now) = latest {
        summary.merged = engine.merge_pass(now).merged;
    }

    // 3) interactions -> bias profiles
    let mut unknown = 0usize;
    for it in interactions {
        if !engine.record_interaction(it) {
            unknown += 1;
        }
    }
    if unknown > 0 {
        warn!("Interactions skipped - unknown_articles={}", unknown);
    }
    debug!("Profiles updated - users={}, interactions={}", engine.users().len(), interactions.len() - unknown);

    // 4) titles for corroborated clusters, in parallel batches
    let to_title: Vec<_> = engine
        .records(None)
        .into_iter()
        .filter(|r| r.metrics.num_sources >= 2)
        .map(|r| r.cluster_id)
        .collect();
    for batch in to_title.chunks(TITLE_BATCH_SIZE) {
        let tasks = batch.iter().map(|id| engine.summarize_title(*id, titler));
        for (id, res) in batch.iter().zip(futures::future::join_all(tasks).await) {
            if let Err(e) = res {
                warn!("Title generation failed - cluster={}, error={}", id, e);
            }
        }
    }
    debug!("Titles generated - clusters={}, provider={}", to_title.len(), titler.name());

    // 5) records scored against the chosen prior
    let prior = match user {
        Some(u) => engine.profile(u),
        None => engine.global_prior().clone(),
    };
    let records: Vec<ClusterRecord> = engine.records(Some(&prior));
    summary.clusters = records.len();
    summary.flagged = records
        .iter()
        .filter(|r| r.blindspot.as_ref().is_some_and(|b| b.flagged))
        .count();

    // 6) persist
    std::fs::create_dir_all(output_dir).with_context(|| format!("create {}", output_dir.display()))?;
    std::fs::write(output_dir.join("clusters.json"), serde_json::to_vec_pretty(&records)?)?;
    std::fs::write(output_dir.join("topics.json"), serde_json::to_vec_pretty(&group_by_topic(&records))?)?;

    let profiles: Vec<_> = engine
        .users()
        .into_iter()
        .filter_map(|u| {
            let snap = engine.user_profile(&u)?;
            Some(json!({ "profile": *snap, "prior": engine.profile(&u) }))
        })
        .collect();
    std::fs::write(output_dir.join("profiles.json"), serde_json::to_vec_pretty(&profiles)?)?;

    let md = render_report_markdown(&records, prior.source(), summary.merged);
    std::fs::write(output_dir.join("report.md"), md.as_bytes())?;
    debug!("Wrote clusters.json, topics.json, profiles.json, report.md");

    info!(
        "Pipeline completed successfully - total_duration={:.2}s, articles={}, clusters={}, flagged={}, merged={}",
        pipeline_start.elapsed().as_secs_f32(),
        summary.articles,
        summary.clusters,
        summary.flagged,
        summary.merged
    );
    Ok(summary)
}
