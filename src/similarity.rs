use std::collections::BTreeSet;
use unicode_normalization::UnicodeNormalization;

const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "with", "that", "this", "from", "have", "has", "are", "was", "were",
    "will", "into", "over", "under", "after", "before", "about", "your", "their", "them", "they",
    "you", "our", "but", "not", "out", "his", "her", "its", "had", "who", "what", "when", "where",
    "why", "how", "said", "says", "been", "also", "than", "more", "would", "could", "should",
];

pub fn is_stop_word(w: &str) -> bool {
    STOP_WORDS.contains(&w)
}

/// NFC + lowercase + trimmed, the canonical form for set comparisons.
pub fn fold(s: &str) -> String {
    s.trim().nfc().collect::<String>().to_lowercase()
}

pub fn to_set<T: AsRef<str>>(xs: impl IntoIterator<Item = T>) -> BTreeSet<String> {
    xs.into_iter()
        .map(|s| fold(s.as_ref()))
        .filter(|s| !s.is_empty())
        .collect()
}

/// Lowercased alphanumeric tokens of length >= 3, minus stop words.
pub fn stemish_tokens<S: AsRef<str>>(s: S) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    for t in s.as_ref().split(|c: char| !c.is_alphanumeric()) {
        if t.chars().count() >= 3 {
            let t = t.to_lowercase();
            if !is_stop_word(&t) {
                out.insert(t);
            }
        }
    }
    out
}

/// Overlap normalised by the smaller set, so a short title is not
/// penalised against a cluster that has accumulated many tokens.
pub fn signature_overlap(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let inter = a.intersection(b).count() as f32;
    inter / a.len().min(b.len()) as f32
}

/// Cosine similarity; 0.0 on dimension mismatch or zero norm.
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON { 0.0 } else { dot / denom }
}

/// Mean pairwise cosine over the given vectors; `None` below two vectors.
pub fn mean_pairwise_cosine(vs: &[&[f32]]) -> Option<f32> {
    if vs.len() < 2 {
        return None;
    }
    let mut sum = 0.0f32;
    let mut n = 0usize;
    for i in 0..vs.len() {
        for j in (i + 1)..vs.len() {
            sum += cosine_similarity(vs[i], vs[j]);
            n += 1;
        }
    }
    Some(sum / n as f32)
}
