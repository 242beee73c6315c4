use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info};

use crate::api_types::{RawArticle, RawInteraction};

/// Read a JSON array, or one JSON object per line.
fn load_records<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    let trimmed = raw.trim_start();
    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed).with_context(|| format!("Decoding JSON array in {}", path.display()));
    }
    raw.lines()
        .enumerate()
        .filter(|(_, l)| !l.trim().is_empty())
        .map(|(i, l)| {
            serde_json::from_str(l).with_context(|| format!("Decoding line {} of {}", i + 1, path.display()))
        })
        .collect()
}

pub fn load_articles(path: &Path) -> Result<Vec<RawArticle>> {
    let start = std::time::Instant::now();
    let articles: Vec<RawArticle> = load_records(path)?;
    info!(
        "Articles loaded - path={}, duration={:.2}s, articles={}",
        path.display(),
        start.elapsed().as_secs_f32(),
        articles.len()
    );
    Ok(articles)
}

pub fn load_interactions(path: &Path) -> Result<Vec<RawInteraction>> {
    let interactions: Vec<RawInteraction> = load_records(path)?;
    info!("Interactions loaded - path={}, interactions={}", path.display(), interactions.len());
    Ok(interactions)
}

/// Drop repeated ids (first wins) and sort by publication time, keeping
/// input order among equal timestamps.
pub fn order_for_ingest(mut articles: Vec<RawArticle>) -> Vec<RawArticle> {
    let before = articles.len();
    let mut seen: HashSet<String> = HashSet::new();
    articles.retain(|a| seen.insert(a.id.clone()));
    let removed = before - articles.len();
    if removed > 0 {
        info!("Deduplication - removed={} duplicates, retained={} unique articles", removed, articles.len());
    } else {
        debug!("Deduplication - no duplicates found, retained={} articles", articles.len());
    }
    articles.sort_by_key(|a| a.published_at);
    articles
}
