use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

use crate::error::{EngineError, EngineResult};

/// Divergence used by the blindspot scorer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SkewMeasure {
    /// Kullback-Leibler divergence in bits.
    #[default]
    Kl,
    /// Largest absolute per-category probability gap.
    MaxDeviation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TitleProviderKind {
    #[default]
    Keyword,
    Model,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriorConfig {
    pub left: f64,
    pub center: f64,
    pub right: f64,
}

impl Default for PriorConfig {
    fn default() -> Self {
        Self {
            left: 1.0 / 3.0,
            center: 1.0 / 3.0,
            right: 1.0 / 3.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicConfig {
    /// Entity alias (normalised) -> topic id.
    pub aliases: BTreeMap<String, String>,
    /// Entities missing from `aliases` become their own topic id.
    pub passthrough_unknown: bool,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            aliases: BTreeMap::new(),
            passthrough_unknown: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TitleConfig {
    pub provider: TitleProviderKind,
    /// Path to an awful_aj config.yaml, required for `provider: model`.
    pub model_config: Option<String>,
    pub template: String,
}

impl Default for TitleConfig {
    fn default() -> Self {
        Self {
            provider: TitleProviderKind::Keyword,
            model_config: None,
            template: "news_event_title".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub assign_threshold: f32,
    pub merge_band: f32,
    pub merge_lexical_floor: f32,
    pub recency_window_hours: f64,
    pub index_bucket_hours: f64,
    pub skew_threshold: f64,
    pub skew_measure: SkewMeasure,
    pub min_sources_for_flagging: usize,
    pub bias_smoothing_constant: f64,
    /// `None` keeps every interaction at weight 1.
    pub bias_half_life_hours: Option<f64>,
    pub embed_timeout_ms: u64,
    pub body_char_budget: usize,
    pub embedding_dim: usize,
    pub global_prior: PriorConfig,
    pub topics: TopicConfig,
    pub titles: TitleConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            assign_threshold: 0.82,
            merge_band: 0.07,
            merge_lexical_floor: 0.35,
            recency_window_hours: 72.0,
            index_bucket_hours: 6.0,
            skew_threshold: 0.5,
            skew_measure: SkewMeasure::Kl,
            min_sources_for_flagging: 3,
            bias_smoothing_constant: 1.0,
            bias_half_life_hours: None,
            embed_timeout_ms: 5_000,
            body_char_budget: 1_500,
            embedding_dim: 256,
            global_prior: PriorConfig::default(),
            topics: TopicConfig::default(),
            titles: TitleConfig::default(),
        }
    }
}

/// Upper bound for any configured span: 100 years.
const MAX_SPAN_HOURS: f64 = 100.0 * 365.25 * 24.0;

fn hours(h: f64) -> Duration {
    Duration::milliseconds((h * 3_600_000.0).round() as i64)
}

impl EngineConfig {
    pub fn load(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let shown = path.display().to_string();
        let raw = std::fs::read_to_string(path).map_err(|source| EngineError::ConfigIo {
            path: shown.clone(),
            source,
        })?;
        let cfg: EngineConfig = serde_yaml::from_str(&raw).map_err(|source| EngineError::ConfigParse {
            path: shown.clone(),
            source,
        })?;
        cfg.validate()?;
        debug!("Config loaded - path={}, assign_threshold={}, window_hours={}", shown, cfg.assign_threshold, cfg.recency_window_hours);
        Ok(cfg)
    }

    pub fn validate(&self) -> EngineResult<()> {
        let unit = |name: &str, v: f32| {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(EngineError::InvalidConfig(format!("{} must be within [0, 1], got {}", name, v)))
            }
        };
        unit("assign_threshold", self.assign_threshold)?;
        unit("merge_band", self.merge_band)?;
        unit("merge_lexical_floor", self.merge_lexical_floor)?;

        let span = |name: &str, h: f64| {
            if h > 0.0 && h <= MAX_SPAN_HOURS {
                Ok(())
            } else {
                Err(EngineError::InvalidConfig(format!(
                    "{} must be within (0, {}], got {}",
                    name, MAX_SPAN_HOURS, h
                )))
            }
        };
        span("recency_window_hours", self.recency_window_hours)?;
        span("index_bucket_hours", self.index_bucket_hours)?;
        if !(self.skew_threshold >= 0.0) {
            return Err(EngineError::InvalidConfig("skew_threshold must be non-negative".into()));
        }
        if !(self.bias_smoothing_constant >= 0.0) {
            return Err(EngineError::InvalidConfig("bias_smoothing_constant must be non-negative".into()));
        }
        if let Some(h) = self.bias_half_life_hours {
            span("bias_half_life_hours", h)?;
        }
        if self.embedding_dim == 0 {
            return Err(EngineError::InvalidConfig("embedding_dim must be non-zero".into()));
        }
        let p = &self.global_prior;
        if [p.left, p.center, p.right].iter().any(|&x| !(x > 0.0)) {
            return Err(EngineError::InvalidConfig(
                "global_prior must give every lean a positive mass".into(),
            ));
        }
        if self.titles.provider == TitleProviderKind::Model && self.titles.model_config.is_none() {
            return Err(EngineError::InvalidConfig("titles.model_config is required for provider=model".into()));
        }
        Ok(())
    }

    pub fn recency_window(&self) -> Duration {
        hours(self.recency_window_hours)
    }

    pub fn index_bucket(&self) -> Duration {
        hours(self.index_bucket_hours)
    }

    pub fn bias_half_life(&self) -> Option<Duration> {
        self.bias_half_life_hours.map(hours)
    }

    pub fn embed_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.embed_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let cfg = EngineConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.recency_window(), Duration::hours(72));
        assert!(cfg.bias_half_life().is_none());
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "assign_threshold: 0.9\nskew_measure: max_deviation\ntopics:\n  aliases:\n    usa: united-states").unwrap();
        let cfg = EngineConfig::load(f.path()).unwrap();
        assert_eq!(cfg.assign_threshold, 0.9);
        assert_eq!(cfg.skew_measure, SkewMeasure::MaxDeviation);
        assert_eq!(cfg.min_sources_for_flagging, 3);
        assert!(cfg.topics.passthrough_unknown);
        assert_eq!(cfg.topics.aliases.get("usa").map(String::as_str), Some("united-states"));
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let cfg = EngineConfig {
            assign_threshold: 1.5,
            ..EngineConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(EngineError::InvalidConfig(_))));
    }

    #[test]
    fn rejects_zero_prior_mass() {
        let mut cfg = EngineConfig::default();
        cfg.global_prior.right = 0.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn model_titles_need_a_config_path() {
        let mut cfg = EngineConfig::default();
        cfg.titles.provider = TitleProviderKind::Model;
        assert!(cfg.validate().is_err());
        cfg.titles.model_config = Some("config.yaml".into());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_spans_beyond_a_century() {
        let cfg = EngineConfig { recency_window_hours: 1e10, ..EngineConfig::default() };
        assert!(matches!(cfg.validate(), Err(EngineError::InvalidConfig(_))));
        let cfg = EngineConfig { index_bucket_hours: f64::INFINITY, ..EngineConfig::default() };
        assert!(cfg.validate().is_err());
        let cfg = EngineConfig { bias_half_life_hours: Some(1e12), ..EngineConfig::default() };
        assert!(cfg.validate().is_err());
        let cfg = EngineConfig { recency_window_hours: MAX_SPAN_HOURS, ..EngineConfig::default() };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn loads_and_logs_from_file() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "recency_window_hours: 48").unwrap();
        let cfg = EngineConfig::load(f.path()).unwrap();
        assert_eq!(cfg.recency_window(), Duration::hours(48));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = EngineConfig::load("/definitely/not/here.yaml").unwrap_err();
        assert!(matches!(err, EngineError::ConfigIo { .. }));
    }
}
