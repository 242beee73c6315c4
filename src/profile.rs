//! Per-user running tally of consumed source leans.
//!
//! Writers for one user are serialised by that user's slot mutex; readers
//! never take it. Each update builds a fresh tally and swaps the `Arc`, so
//! a concurrent read sees the tally from before or after the update.
//!
//! Weighting: without a half-life every interaction adds 1. With a
//! half-life `h`, the tally is kept as of `last_updated`: a newer
//! interaction first decays the existing weights by `0.5^(dt/h)` and then
//! adds 1, while an older one is added with weight `0.5^(dt/h)`.

use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

use crate::blindspot::{BaselinePrior, PriorSource};
use crate::config::EngineConfig;
use crate::models::{Article, Lean, UserId};

#[derive(Debug, Clone, Serialize)]
pub struct UserBiasProfile {
    pub user_id: UserId,
    pub lean_tally: BTreeMap<Lean, f64>,
    pub last_updated: DateTime<Utc>,
    pub interactions: u64,
}

impl UserBiasProfile {
    fn known_counts(&self) -> [f64; 3] {
        let mut out = [0.0; 3];
        for (lean, w) in &self.lean_tally {
            if let Some(i) = lean.known_index() {
                out[i] += w;
            }
        }
        out
    }
}

struct Slot {
    write: Mutex<()>,
    current: RwLock<Arc<UserBiasProfile>>,
}

pub struct BiasProfileAggregator {
    slots: RwLock<HashMap<UserId, Arc<Slot>>>,
    half_life: Option<Duration>,
    smoothing: f64,
    global: BaselinePrior,
}

fn decay(dt: Duration, half_life: Duration) -> f64 {
    let ratio = dt.num_milliseconds() as f64 / half_life.num_milliseconds().max(1) as f64;
    0.5f64.powf(ratio)
}

impl BiasProfileAggregator {
    pub fn new(half_life: Option<Duration>, smoothing: f64, global: BaselinePrior) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            half_life,
            smoothing,
            global,
        }
    }

    pub fn from_config(cfg: &EngineConfig) -> Self {
        Self::new(cfg.bias_half_life(), cfg.bias_smoothing_constant, BaselinePrior::global(&cfg.global_prior))
    }

    fn slot(&self, user_id: &str, at: DateTime<Utc>) -> Arc<Slot> {
        if let Some(s) = self.slots.read().get(user_id) {
            return Arc::clone(s);
        }
        let mut slots = self.slots.write();
        Arc::clone(slots.entry(user_id.to_string()).or_insert_with(|| {
            debug!("Bias profile created - user={}", user_id);
            Arc::new(Slot {
                write: Mutex::new(()),
                current: RwLock::new(Arc::new(UserBiasProfile {
                    user_id: user_id.to_string(),
                    lean_tally: BTreeMap::new(),
                    last_updated: at,
                    interactions: 0,
                })),
            })
        }))
    }

    /// Record that `user_id` consumed `article`, timed at publication.
    pub fn record(&self, user_id: &str, article: &Article) {
        self.record_at(user_id, article.source_lean, article.published_at);
    }

    pub fn record_at(&self, user_id: &str, lean: Lean, at: DateTime<Utc>) {
        let slot = self.slot(user_id, at);
        let _writer = slot.write.lock();
        let prev = Arc::clone(&*slot.current.read());

        let mut next = UserBiasProfile::clone(&prev);
        let weight = match self.half_life {
            None => 1.0,
            Some(h) if at >= prev.last_updated => {
                let f = decay(at - prev.last_updated, h);
                for w in next.lean_tally.values_mut() {
                    *w *= f;
                }
                next.last_updated = at;
                1.0
            }
            Some(h) => decay(prev.last_updated - at, h),
        };
        if self.half_life.is_none() {
            next.last_updated = next.last_updated.max(at);
        }
        *next.lean_tally.entry(lean).or_insert(0.0) += weight;
        next.interactions += 1;

        *slot.current.write() = Arc::new(next);
    }

    pub fn snapshot(&self, user_id: &str) -> Option<Arc<UserBiasProfile>> {
        let slot = self.slots.read().get(user_id).cloned()?;
        let current = Arc::clone(&*slot.current.read());
        Some(current)
    }

    /// Smoothed personal prior, or the global baseline for an unseen user.
    pub fn profile(&self, user_id: &str) -> BaselinePrior {
        match self.snapshot(user_id) {
            Some(p) => BaselinePrior::smoothed(p.known_counts(), self.smoothing, PriorSource::Personal),
            None => self.global.clone(),
        }
    }

    pub fn users(&self) -> Vec<UserId> {
        let mut ids: Vec<UserId> = self.slots.read().keys().cloned().collect();
        ids.sort();
        ids
    }
}
