//! Event title capability. The clustering core only sees `TitleProvider`;
//! which implementation backs it is a config decision.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use awful_aj::{api::ask, config, config::AwfulJadeConfig, template, template::ChatTemplate};
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;
use tracing::{debug, info, warn};

use crate::config::{TitleConfig, TitleProviderKind};
use crate::prompts::user_event_title;
use crate::similarity::is_stop_word;

const FALLBACK_TITLE: &str = "Breaking News Update";

/// Title futures run on the caller's task and need not be `Send`.
#[async_trait(?Send)]
pub trait TitleProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// One headline for the event behind `headlines`.
    async fn title(&self, headlines: &[String]) -> Result<String>;
}

fn word_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b[a-zA-Z]{4,}\b").expect("static regex"))
}

fn artifact_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(keywords?|date|time|published|source|headline):.*").expect("static regex"))
}

/// Most frequent words of four letters or more, first occurrence breaks ties.
pub fn keywords(text: &str, n: usize) -> Vec<String> {
    let mut freq: HashMap<String, (usize, usize)> = HashMap::new();
    for (pos, m) in word_re().find_iter(text).enumerate() {
        let w = m.as_str().to_lowercase();
        if is_stop_word(&w) {
            continue;
        }
        freq.entry(w).or_insert((0, pos)).0 += 1;
    }
    let mut words: Vec<(String, (usize, usize))> = freq.into_iter().collect();
    words.sort_by(|a, b| b.1 .0.cmp(&a.1 .0).then(a.1 .1.cmp(&b.1 .1)));
    words.into_iter().take(n).map(|(w, _)| w).collect()
}

fn capitalize(w: &str) -> String {
    let mut cs = w.chars();
    match cs.next() {
        Some(f) => f.to_uppercase().chain(cs).collect(),
        None => String::new(),
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let head: String = s.chars().take(max - 3).collect();
    format!("{}...", head.trim_end())
}

/// Deterministic title built from frequent keywords; never fails.
#[derive(Debug, Clone, Default)]
pub struct KeywordTitler;

impl KeywordTitler {
    pub fn title_for(&self, headlines: &[String]) -> String {
        let kws = keywords(&headlines.join(" "), 3);
        if kws.is_empty() {
            return FALLBACK_TITLE.to_string();
        }
        let title = truncate_chars(&kws.iter().map(|w| capitalize(w)).collect::<Vec<_>>().join(" "), 50);
        if title.chars().count() < 10 {
            format!("{} News Update", title)
        } else {
            title
        }
    }
}

#[async_trait(?Send)]
impl TitleProvider for KeywordTitler {
    fn name(&self) -> &'static str {
        "keyword"
    }

    async fn title(&self, headlines: &[String]) -> Result<String> {
        Ok(self.title_for(headlines))
    }
}

/// Strip prompt echoes and enforce length; `None` if nothing usable is left.
pub fn clean_model_title(raw: &str) -> Option<String> {
    let first = raw.lines().map(str::trim).find(|l| !l.is_empty())?;
    let stripped = artifact_re().replace_all(first, "");
    let collapsed = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
    let title = collapsed.trim_matches(|c: char| c == '"' || c == '\'' || c == '*' || c == '#').trim();
    if title.chars().count() < 15 {
        return None;
    }
    Some(truncate_chars(title, 80))
}

/// Chat-model headline via awful_aj, keyword title on any failure.
pub struct ModelTitler {
    cfg: AwfulJadeConfig,
    tpl: ChatTemplate,
    fallback: KeywordTitler,
}

impl ModelTitler {
    pub async fn load(config_path: &str, template_name: &str) -> Result<Self> {
        let cfg = config::load_config(config_path).map_err(|e| anyhow!(e.to_string()))
            .with_context(|| format!("loading awful_aj config {}", config_path))?;
        let tpl = template::load_template(template_name)
            .await
            .map_err(|e| anyhow!(e.to_string()))
            .with_context(|| format!("loading template {}", template_name))?;
        debug!("Model titler ready - config={}, template={}", config_path, template_name);
        Ok(Self { cfg, tpl, fallback: KeywordTitler })
    }

    async fn ask_model(&self, headlines: &[String]) -> Result<String> {
        let start = std::time::Instant::now();
        let user = user_event_title(&serde_json::to_string(headlines)?);
        let answer = ask(&self.cfg, user, &self.tpl, None, None, false)
            .await
            .map_err(|e| anyhow!(e.to_string()))?;
        info!(
            "Title model call completed - duration={:.2}s, response_length={} chars",
            start.elapsed().as_secs_f32(),
            answer.len()
        );
        match clean_model_title(&answer) {
            Some(t) => Ok(t),
            None => bail!("model returned no usable title"),
        }
    }
}

#[async_trait(?Send)]
impl TitleProvider for ModelTitler {
    fn name(&self) -> &'static str {
        "model"
    }

    async fn title(&self, headlines: &[String]) -> Result<String> {
        match self.ask_model(headlines).await {
            Ok(t) => Ok(t),
            Err(e) => {
                warn!("Title model failed, using keyword fallback - error={}", e);
                Ok(self.fallback.title_for(headlines))
            }
        }
    }
}

pub async fn build_provider(cfg: &TitleConfig) -> Result<Box<dyn TitleProvider>> {
    match cfg.provider {
        TitleProviderKind::Keyword => Ok(Box::new(KeywordTitler)),
        TitleProviderKind::Model => {
            let path = cfg
                .model_config
                .as_deref()
                .ok_or_else(|| anyhow!("titles.model_config is required for provider=model"))?;
            Ok(Box::new(ModelTitler::load(path, &cfg.template).await?))
        }
    }
}
