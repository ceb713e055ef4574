use std::collections::HashSet;

use crate::record::OwnerRecord;

/// Build the ordered search queries for one record. Pure and deterministic;
/// an empty result means "nothing to search", never an error.
///
/// Owner cells frequently hold several names ("J Smith & M Smith Jr"), so
/// each cell is split before query shaping. Trust entities are skipped:
/// their registered names never lead to a personal mailbox.
pub fn plan(record: &OwnerRecord) -> Vec<String> {
    let mut queries = Vec::new();
    let mut seen = HashSet::new();

    for raw in &record.owner_names {
        for name in split_names(raw) {
            if name.to_lowercase().contains("trust") {
                continue;
            }
            let query = if record.is_corporate {
                format!("\"{}\" company contact email", name)
            } else {
                format!("\"{}\" email contact", name)
            };
            if seen.insert(query.clone()) {
                queries.push(query);
            }
        }
    }

    queries
}

/// Split a multi-owner cell on the separators seen in county rolls.
fn split_names(raw: &str) -> Vec<String> {
    raw.split(|c: char| matches!(c, '&' | '/' | ';' | ','))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
