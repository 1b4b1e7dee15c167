//! Cross-source reconciliation of a run's records.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use crate::article::{ArticleRecord, output_order};

/// Deduplicates by identity key and sorts into output order.
///
/// Among records sharing a key the more complete one wins; on a tie the
/// first one seen is kept.
#[must_use]
pub fn merge_records(records: Vec<ArticleRecord>) -> Vec<ArticleRecord> {
    let mut slots: Vec<ArticleRecord> = Vec::with_capacity(records.len());
    let mut by_key: HashMap<String, usize> = HashMap::with_capacity(records.len());

    for record in records {
        match by_key.entry(record.identity_key()) {
            Entry::Occupied(entry) => {
                let kept = &mut slots[*entry.get()];
                if record.completeness() > kept.completeness() {
                    *kept = record;
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(slots.len());
                slots.push(record);
            }
        }
    }

    slots.sort_by(output_order);
    slots
}
