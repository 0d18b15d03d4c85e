//! Gene identifier cleanup
//!
//! Quantifications against GENCODE or Ensembl annotations carry versioned
//! IDs such as `ENSG00000141510.17`. Stripping the version makes them join
//! with other tables, but can collide when two versions of one gene exist
//! (e.g. PAR_Y copies), so the stripped IDs are disambiguated afterwards.

use std::collections::HashSet;

/// Remove the `.N` version suffix from an identifier
pub fn strip_version(id: &str) -> &str {
    match id.find('.') {
        Some(pos) if pos > 0 => &id[..pos],
        _ => id,
    }
}

/// Make identifiers unique as R's `make.unique(names, sep = ".")` does
///
/// The first occurrence keeps its name; later duplicates get `.1`, `.2`, ...
/// skipping any candidate that is already taken.
pub fn make_unique(ids: &[String]) -> Vec<String> {
    let mut taken: HashSet<String> = ids.iter().cloned().collect();
    let mut seen: HashSet<&str> = HashSet::with_capacity(ids.len());
    let mut counters: std::collections::HashMap<&str, usize> = std::collections::HashMap::new();
    let mut out = Vec::with_capacity(ids.len());

    for id in ids {
        if seen.insert(id.as_str()) {
            out.push(id.clone());
            continue;
        }
        let counter = counters.entry(id.as_str()).or_insert(0);
        let candidate = loop {
            *counter += 1;
            let candidate = format!("{}.{}", id, counter);
            if !taken.contains(&candidate) {
                break candidate;
            }
        };
        taken.insert(candidate.clone());
        out.push(candidate);
    }
    out
}

/// Strip versions and disambiguate the result
pub fn truncate_gene_ids(ids: &[String]) -> Vec<String> {
    let stripped: Vec<String> = ids.iter().map(|id| strip_version(id).to_string()).collect();
    let unique = make_unique(&stripped);
    let renamed = stripped.iter().zip(&unique).filter(|(a, b)| a != b).count();
    if renamed > 0 {
        log::warn!(
            "{} gene IDs collided after version truncation and were suffixed",
            renamed
        );
    }
    unique
}
