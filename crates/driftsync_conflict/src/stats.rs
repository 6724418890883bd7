//! Statistics derived from the conflict history.

use crate::record::ConflictRecord;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Summary of the conflicts currently held in the history.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictStatistics {
    /// Records in the history.
    pub total: usize,
    /// Conflicts resolved since creation, including evicted ones.
    pub lifetime_total: u64,
    /// Records per strategy name.
    pub by_strategy: BTreeMap<String, usize>,
    /// Records per conflict kind.
    pub by_kind: BTreeMap<String, usize>,
    /// Records where a custom strategy fell back.
    pub fallbacks: usize,
    /// Mean confidence, `0.0` for an empty history.
    pub average_confidence: f64,
    /// Most frequent contexts with their counts.
    pub top_contexts: Vec<(String, usize)>,
    /// Newest records, newest first.
    pub recent: Vec<ConflictRecord>,
}

impl ConflictStatistics {
    /// Derives statistics from records given oldest first.
    pub fn from_records(
        records: &[ConflictRecord],
        lifetime_total: u64,
        top_contexts: usize,
        recent: usize,
    ) -> Self {
        let mut stats = Self {
            total: records.len(),
            lifetime_total,
            ..Self::default()
        };
        let mut contexts: HashMap<&str, usize> = HashMap::new();
        let mut confidence = 0.0;

        for record in records {
            *stats.by_strategy.entry(record.strategy.clone()).or_default() += 1;
            *stats.by_kind.entry(record.kind.to_string()).or_default() += 1;
            *contexts.entry(record.context.as_str()).or_default() += 1;
            if record.fell_back {
                stats.fallbacks += 1;
            }
            confidence += record.confidence;
        }

        if !records.is_empty() {
            stats.average_confidence = confidence / records.len() as f64;
        }

        let mut ranked: Vec<(String, usize)> = contexts
            .into_iter()
            .map(|(context, count)| (context.to_string(), count))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(top_contexts);
        stats.top_contexts = ranked;

        stats.recent = records.iter().rev().take(recent).cloned().collect();
        stats
    }
}
