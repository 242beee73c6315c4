use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::Lean;

fn full_confidence() -> f32 {
    1.0
}

/// Article as delivered by the ingestion collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawArticle {
    pub id: String,
    pub published_at: DateTime<Utc>,
    pub source_id: String,
    #[serde(default)]
    pub source_lean: Lean,
    #[serde(default = "full_confidence")]
    pub source_confidence: f32,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub excerpt: String,
    #[serde(default)]
    pub body_text: String,
    pub domain: String,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub entities: Vec<String>,
}

/// A user consuming an article, input to the bias profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawInteraction {
    pub user_id: String,
    pub article_id: String,
    /// Defaults to the article's publication time.
    #[serde(default)]
    pub at: Option<DateTime<Utc>>,
}
