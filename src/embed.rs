//! Embedding boundary. The engine never owns a model; it calls whatever
//! `Embedder` it was built with and bounds the call by a timeout.

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};
use xxhash_rust::xxh3::xxh3_64;

use crate::similarity::stemish_tokens;

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Why no vector came back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedFailure {
    Timeout,
    Error,
    /// Empty vector or non-finite components.
    Malformed,
}

/// Call the embedder with a deadline. Retries belong to the provider.
pub async fn embed_bounded(
    embedder: &dyn Embedder,
    text: &str,
    timeout: Duration,
) -> std::result::Result<Vec<f32>, EmbedFailure> {
    let start = std::time::Instant::now();
    match tokio::time::timeout(timeout, embedder.embed(text)).await {
        Err(_) => {
            warn!("Embedding timed out - timeout_ms={}, text_length={}", timeout.as_millis(), text.len());
            Err(EmbedFailure::Timeout)
        }
        Ok(Err(e)) => {
            warn!("Embedding failed - error={}", e);
            Err(EmbedFailure::Error)
        }
        Ok(Ok(v)) if v.is_empty() || v.iter().any(|x| !x.is_finite()) => {
            warn!("Embedding malformed - dim={}", v.len());
            Err(EmbedFailure::Malformed)
        }
        Ok(Ok(v)) => {
            debug!("Embedding completed - dim={}, duration_ms={}", v.len(), start.elapsed().as_millis());
            Ok(v)
        }
    }
}

/// Offline feature-hashing embedder: each significant token is hashed into
/// one of `dim` buckets with a hash-derived sign, then L2-normalised.
/// Used by the CLI when no model-backed embedder is wired in.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dim: usize,
}

impl HashingEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }

    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dim];
        for tok in stemish_tokens(text) {
            let h = xxh3_64(tok.as_bytes());
            let idx = (h % self.dim as u64) as usize;
            let sign = if (h >> 63) == 0 { 1.0 } else { -1.0 };
            v[idx] += sign;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in v.iter_mut() {
                *x /= norm;
            }
        }
        v
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let v = self.embed_sync(text);
        if v.iter().all(|x| *x == 0.0) {
            anyhow::bail!("no significant tokens to embed");
        }
        Ok(v)
    }
}
