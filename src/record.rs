use std::collections::BTreeMap;

/// One owner/entity row to be enriched. Created at ingestion, never mutated.
#[derive(Debug, Clone)]
pub struct OwnerRecord {
    /// Stable identifier from the input sheet (or a synthesized `row-N`).
    pub id: String,
    /// Raw owner-name cells, possibly holding several names each
    /// ("J Smith & M Smith").
    pub owner_names: Vec<String>,
    /// Set when the row describes a corporate entity rather than a person.
    pub is_corporate: bool,
    /// All other input columns, preserved verbatim for the export.
    pub extra: BTreeMap<String, String>,
}

impl OwnerRecord {
    pub fn new(id: impl Into<String>, owner_names: Vec<String>, is_corporate: bool) -> Self {
        OwnerRecord {
            id: id.into(),
            owner_names,
            is_corporate,
            extra: BTreeMap::new(),
        }
    }
}
