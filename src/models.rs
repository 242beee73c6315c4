use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

pub type ArticleId = String;
pub type UserId = String;
pub type TopicId = String;

/// Stable arena address of a cluster. Issued in increasing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterId(pub u64);

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

/// Political lean of a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Lean {
    Left,
    Center,
    Right,
    #[default]
    #[serde(other)]
    Unknown,
}

impl Lean {
    pub const ALL: [Lean; 4] = [Lean::Left, Lean::Center, Lean::Right, Lean::Unknown];
    /// Categories a baseline prior is defined over.
    pub const KNOWN: [Lean; 3] = [Lean::Left, Lean::Center, Lean::Right];

    /// Position in `KNOWN`, `None` for `Unknown`.
    pub fn known_index(self) -> Option<usize> {
        match self {
            Lean::Left => Some(0),
            Lean::Center => Some(1),
            Lean::Right => Some(2),
            Lean::Unknown => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Lean::Left => "left",
            Lean::Center => "center",
            Lean::Right => "right",
            Lean::Unknown => "unknown",
        }
    }
}

/// Ingested article. Built once by the engine and shared behind `Arc`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub id: ArticleId,
    pub published_at: DateTime<Utc>,
    pub source_id: String,
    pub source_lean: Lean,
    pub source_confidence: f32,
    pub title: String,
    /// Empty when the raw fields could not be normalised.
    pub canonical_text: String,
    /// `None` when the text was unembeddable or the embedder failed.
    pub embedding: Option<Vec<f32>>,
    pub entities: BTreeSet<String>,
    /// Significant tokens and entities used by the lexical merge check.
    pub signature: BTreeSet<String>,
    pub domain: String,
    pub country: Option<String>,
}

impl Article {
    pub fn is_embedded(&self) -> bool {
        self.embedding.is_some()
    }
}
