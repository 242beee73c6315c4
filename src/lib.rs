//! Online event clustering for news articles: groups incoming stories into
//! events, scores how well each event is corroborated across sources, and
//! flags coverage that skews away from a reader's baseline.

pub mod api_types;
pub mod audit;
pub mod blindspot;
pub mod cluster;
pub mod config;
pub mod embed;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod models;
pub mod normalize;
pub mod orchestrator;
pub mod out_models;
pub mod profile;
pub mod prompts;
pub mod recency;
pub mod render;
pub mod similarity;
pub mod stats;
pub mod titles;
pub mod topics;

pub use engine::{Engine, IngestDecision, IngestOutcome};
pub use error::{EngineError, EngineResult};
