use regex::Regex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::OnceLock;

use crate::cluster::Cluster;
use crate::config::TopicConfig;
use crate::models::{ClusterId, TopicId};
use crate::out_models::ClusterRecord;
use crate::similarity::fold;

fn ws_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("static regex"))
}

/// Trim, collapse whitespace, fold case and drop trailing punctuation.
pub fn normalize_entity(name: &str) -> String {
    let collapsed = ws_re().replace_all(name.trim(), " ");
    fold(&collapsed)
        .trim_end_matches(['.', ',', ':', ';', '-'])
        .to_string()
}

/// Maps extracted entities onto the externally maintained topic vocabulary.
/// Performs no extraction itself.
#[derive(Debug, Clone)]
pub struct TopicLinker {
    aliases: HashMap<String, TopicId>,
    passthrough_unknown: bool,
}

impl TopicLinker {
    pub fn new(cfg: &TopicConfig) -> Self {
        Self {
            aliases: cfg
                .aliases
                .iter()
                .map(|(alias, topic)| (normalize_entity(alias), topic.clone()))
                .collect(),
            passthrough_unknown: cfg.passthrough_unknown,
        }
    }

    pub fn topic_for(&self, entity: &str) -> Option<TopicId> {
        let key = normalize_entity(entity);
        if key.is_empty() {
            return None;
        }
        match self.aliases.get(&key) {
            Some(t) => Some(t.clone()),
            None if self.passthrough_unknown => Some(key),
            None => None,
        }
    }

    /// The cluster's current topics plus those contributed by `entities`.
    pub fn link(&self, cluster: &Cluster, entities: &BTreeSet<String>) -> BTreeSet<TopicId> {
        let mut topics = cluster.topic_ids().clone();
        topics.extend(entities.iter().filter_map(|e| self.topic_for(e)));
        topics
    }
}

/// Topic -> clusters carrying it, for topic and timeline pages.
pub fn group_by_topic(records: &[ClusterRecord]) -> BTreeMap<TopicId, Vec<ClusterId>> {
    let mut out: BTreeMap<TopicId, Vec<ClusterId>> = BTreeMap::new();
    for r in records {
        for t in &r.topic_ids {
            out.entry(t.clone()).or_default().push(r.cluster_id);
        }
    }
    for ids in out.values_mut() {
        ids.sort();
        ids.dedup();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linker(passthrough: bool) -> TopicLinker {
        let mut cfg = TopicConfig { passthrough_unknown: passthrough, ..TopicConfig::default() };
        cfg.aliases.insert("U.S.".into(), "united-states".into());
        cfg.aliases.insert("USA".into(), "united-states".into());
        TopicLinker::new(&cfg)
    }

    #[test]
    fn entity_normalisation() {
        assert_eq!(normalize_entity("  United   Nations. "), "united nations");
        assert_eq!(normalize_entity("U.S."), "u.s");
    }

    #[test]
    fn aliases_resolve_to_one_topic() {
        let l = linker(false);
        assert_eq!(l.topic_for("usa").as_deref(), Some("united-states"));
        assert_eq!(l.topic_for("U.S.").as_deref(), Some("united-states"));
        assert_eq!(l.topic_for("Gaza"), None);
        assert_eq!(l.topic_for("   "), None);
    }

    #[test]
    fn passthrough_keeps_unknown_entities() {
        assert_eq!(linker(true).topic_for("Gaza").as_deref(), Some("gaza"));
    }
}
