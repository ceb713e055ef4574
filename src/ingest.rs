use std::fs::File;
use std::path::Path;

use log::{error, info};

use crate::record::OwnerRecord;

/// Load owner records from a CSV sheet. Header matching is case-insensitive
/// and whitespace-tolerant since county exports rarely agree on casing.
/// Unrecognized columns ride along untouched into the final export.
pub fn load_records<P: AsRef<Path>>(filename: P) -> Vec<OwnerRecord> {
    let path = filename.as_ref();
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) => {
            error!("Could not open input file {:?}: {}", path, e);
            return Vec::new();
        }
    };

    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(file);

    let headers = match rdr.headers() {
        Ok(h) => h.clone(),
        Err(e) => {
            error!("Could not read CSV headers from {:?}: {}", path, e);
            return Vec::new();
        }
    };

    let mut id_idx = None;
    let mut owner_idx = Vec::new();
    let mut corp_idx = None;
    for (i, header) in headers.iter().enumerate() {
        let name = header.trim().to_lowercase();
        match name.as_str() {
            "id" => id_idx = Some(i),
            "owner 1" | "owner 2" | "owner" => owner_idx.push(i),
            "is corp?" | "is corp" | "corporate" => corp_idx = Some(i),
            _ => {}
        }
    }

    let mut records = Vec::new();
    for (row_idx, result) in rdr.records().enumerate() {
        let row = match result {
            Ok(r) => r,
            Err(e) => {
                error!("Error parsing CSV record: {}", e);
                continue;
            }
        };

        let id = id_idx
            .and_then(|i| row.get(i))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("row-{}", row_idx));

        let owner_names: Vec<String> = owner_idx
            .iter()
            .filter_map(|&i| row.get(i))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        let is_corporate = corp_idx
            .and_then(|i| row.get(i))
            .map(is_truthy)
            .unwrap_or(false);

        let mut record = OwnerRecord::new(id, owner_names, is_corporate);
        for (i, header) in headers.iter().enumerate() {
            if Some(i) == id_idx || Some(i) == corp_idx || owner_idx.contains(&i) {
                continue;
            }
            if let Some(value) = row.get(i) {
                record.extra.insert(header.to_string(), value.to_string());
            }
        }
        records.push(record);
    }

    info!("Loaded {} records from {:?}", records.len(), path);
    records
}

fn is_truthy(val: &str) -> bool {
    matches!(
        val.trim().to_lowercase().as_str(),
        "true" | "yes" | "y" | "1" | "t"
    )
}
