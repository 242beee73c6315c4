//! Canonical event text for an article: title, excerpt and the leading part
//! of the body, with markup and whitespace collapsed.

use regex::Regex;
use std::collections::BTreeSet;
use std::sync::OnceLock;

use crate::similarity::{stemish_tokens, to_set};

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<[^>]*>").expect("static regex"))
}

fn entity_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"&(?:[a-zA-Z]+|#[0-9]+);").expect("static regex"))
}

/// Strip tags and HTML entities, collapse runs of whitespace.
pub fn collapse(s: &str) -> String {
    let no_tags = tag_re().replace_all(s, " ");
    let no_ents = entity_re().replace_all(&no_tags, " ");
    no_ents.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn take_chars(s: &str, budget: usize) -> &str {
    match s.char_indices().nth(budget) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Returns an empty string (the unembeddable sentinel) when the title and
/// excerpt are both blank after collapsing.
pub fn canonical_text(title: &str, excerpt: &str, body: &str, body_char_budget: usize) -> String {
    let title = collapse(title);
    let excerpt = collapse(excerpt);
    if title.is_empty() && excerpt.is_empty() {
        return String::new();
    }
    let body = collapse(body);
    let lead = take_chars(&body, body_char_budget);

    [title.as_str(), excerpt.as_str(), lead]
        .iter()
        .filter(|s| !s.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Tokens of title + excerpt plus the folded entity ids.
pub fn signature(title: &str, excerpt: &str, entities: &BTreeSet<String>) -> BTreeSet<String> {
    let mut sig = stemish_tokens(format!("{} {}", collapse(title), collapse(excerpt)));
    sig.extend(to_set(entities));
    sig
}

/// Lowercase host without a leading `www.` or any scheme/path.
pub fn normalize_domain(domain: &str) -> String {
    let d = domain.trim().to_lowercase();
    let d = d
        .strip_prefix("https://")
        .or_else(|| d.strip_prefix("http://"))
        .unwrap_or(&d);
    let d = d.split(['/', '?', '#']).next().unwrap_or("");
    d.strip_prefix("www.").unwrap_or(d).to_string()
}
