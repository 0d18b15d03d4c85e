//! Sample metadata table
//!
//! One row per sequencing run. Every column is held as text and treated as a
//! factor when it enters a design; the level order of each factor can be
//! set explicitly (the first level is the reference).

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::error::{AnalysisError, Result};

/// Sample metadata with factor level bookkeeping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleTable {
    sample_ids: Vec<String>,
    /// Column name and per-sample values, in file order
    columns: Vec<(String, Vec<String>)>,
    /// Explicit level order per column; absent means sorted unique values
    level_order: HashMap<String, Vec<String>>,
}

impl SampleTable {
    pub fn new(sample_ids: Vec<String>) -> Result<Self> {
        let mut seen = HashSet::new();
        for id in &sample_ids {
            if !seen.insert(id) {
                return Err(AnalysisError::InvalidMetadata {
                    reason: format!("duplicate sample ID '{}'", id),
                });
            }
        }
        Ok(Self {
            sample_ids,
            columns: Vec::new(),
            level_order: HashMap::new(),
        })
    }

    /// Add or replace a column
    pub fn add_column(&mut self, name: &str, values: Vec<String>) -> Result<()> {
        if values.len() != self.sample_ids.len() {
            return Err(AnalysisError::DimensionMismatch {
                expected: format!("{} values for column '{}'", self.sample_ids.len(), name),
                actual: format!("{} values", values.len()),
            });
        }
        match self.columns.iter_mut().find(|(n, _)| n == name) {
            Some((_, existing)) => *existing = values,
            None => self.columns.push((name.to_string(), values)),
        }
        self.level_order.remove(name);
        Ok(())
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    pub fn n_samples(&self) -> usize {
        self.sample_ids.len()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|(n, _)| n == name)
    }

    pub fn column(&self, name: &str) -> Option<&[String]> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_slice())
    }

    fn require_column(&self, name: &str) -> Result<&[String]> {
        self.column(name).ok_or_else(|| AnalysisError::InvalidMetadata {
            reason: format!(
                "column '{}' not found (available: {})",
                name,
                self.column_names().join(", ")
            ),
        })
    }

    /// Parse a column as numbers, for continuous covariates
    pub fn numeric_column(&self, name: &str) -> Result<Vec<f64>> {
        self.require_column(name)?
            .iter()
            .map(|v| {
                v.trim().parse::<f64>().map_err(|_| AnalysisError::InvalidMetadata {
                    reason: format!("column '{}' has non-numeric value '{}'", name, v),
                })
            })
            .collect()
    }

    /// Factor levels of a column; the first level is the reference
    pub fn levels(&self, name: &str) -> Result<Vec<String>> {
        let values = self.require_column(name)?;
        if let Some(order) = self.level_order.get(name) {
            return Ok(order.clone());
        }
        let mut unique: Vec<String> = values.to_vec();
        unique.sort();
        unique.dedup();
        Ok(unique)
    }

    /// Make `reference` the first level of a factor
    pub fn relevel(&mut self, name: &str, reference: &str) -> Result<()> {
        let mut levels = self.levels(name)?;
        let pos = levels.iter().position(|l| l == reference).ok_or_else(|| {
            AnalysisError::InvalidMetadata {
                reason: format!(
                    "reference level '{}' is not a level of '{}' ({})",
                    reference,
                    name,
                    levels.join(", ")
                ),
            }
        })?;
        let reference = levels.remove(pos);
        levels.insert(0, reference);
        self.level_order.insert(name.to_string(), levels);
        Ok(())
    }

    /// Set the full level order of a factor
    pub fn set_levels(&mut self, name: &str, order: &[String]) -> Result<()> {
        let values = self.require_column(name)?;
        let declared: HashSet<&String> = order.iter().collect();
        if declared.len() != order.len() {
            return Err(AnalysisError::InvalidMetadata {
                reason: format!("duplicate levels given for '{}'", name),
            });
        }
        if let Some(missing) = values.iter().find(|v| !declared.contains(v)) {
            return Err(AnalysisError::InvalidMetadata {
                reason: format!("value '{}' of '{}' is not among the given levels", missing, name),
            });
        }
        self.level_order.insert(name.to_string(), order.to_vec());
        Ok(())
    }

    /// Remove levels that no sample carries any more
    pub fn drop_levels(&mut self) {
        let columns = &self.columns;
        for (name, order) in self.level_order.iter_mut() {
            if let Some((_, values)) = columns.iter().find(|(n, _)| n == name) {
                let present: HashSet<&String> = values.iter().collect();
                order.retain(|l| present.contains(l));
            }
        }
    }

    /// Rows at the given indices, in that order
    pub fn subset(&self, indices: &[usize]) -> Self {
        let mut out = Self {
            sample_ids: indices.iter().map(|&i| self.sample_ids[i].clone()).collect(),
            columns: self
                .columns
                .iter()
                .map(|(n, v)| (n.clone(), indices.iter().map(|&i| v[i].clone()).collect()))
                .collect(),
            level_order: self.level_order.clone(),
        };
        out.drop_levels();
        out
    }

    /// Reorder or subset rows to match the given sample IDs
    pub fn select_samples(&self, ids: &[String]) -> Result<Self> {
        let indices = ids
            .iter()
            .map(|id| {
                self.sample_ids.iter().position(|s| s == id).ok_or_else(|| {
                    AnalysisError::InvalidMetadata {
                        reason: format!("sample '{}' not found in the sample table", id),
                    }
                })
            })
            .collect::<Result<Vec<usize>>>()?;
        Ok(self.subset(&indices))
    }

    /// Keep samples whose value in `column` is one of `keep`
    pub fn filter(&self, column: &str, keep: &[String]) -> Result<Self> {
        let values = self.require_column(column)?;
        let indices: Vec<usize> = values
            .iter()
            .enumerate()
            .filter(|(_, v)| keep.contains(v))
            .map(|(i, _)| i)
            .collect();
        if indices.is_empty() {
            return Err(AnalysisError::EmptyData {
                reason: format!("no samples have '{}' in [{}]", column, keep.join(", ")),
            });
        }
        Ok(self.subset(&indices))
    }

    /// Sample indices carrying a level
    pub fn samples_with_level(&self, column: &str, level: &str) -> Vec<usize> {
        self.column(column)
            .map(|values| {
                values
                    .iter()
                    .enumerate()
                    .filter(|(_, v)| v.as_str() == level)
                    .map(|(i, _)| i)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Per-sample group labels joining the given columns with ':'
    pub fn group_labels(&self, columns: &[String]) -> Result<Vec<String>> {
        let cols = columns
            .iter()
            .map(|c| self.require_column(c))
            .collect::<Result<Vec<_>>>()?;
        Ok((0..self.n_samples())
            .map(|i| cols.iter().map(|c| c[i].as_str()).collect::<Vec<_>>().join(":"))
            .collect())
    }

    /// Group labels ordered by factor levels, for legends
    pub fn group_order(&self, columns: &[String]) -> Result<Vec<String>> {
        let labels = self.group_labels(columns)?;
        if columns.len() == 1 {
            let levels = self.levels(&columns[0])?;
            return Ok(levels.into_iter().filter(|l| labels.contains(l)).collect());
        }
        let mut seen = Vec::new();
        for l in labels {
            if !seen.contains(&l) {
                seen.push(l);
            }
        }
        Ok(seen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> SampleTable {
        let mut t = SampleTable::new(vec!["r1".into(), "r2".into(), "r3".into(), "r4".into()]).unwrap();
        t.add_column(
            "treatment",
            vec!["vehicle".into(), "drug".into(), "vehicle".into(), "drug".into()],
        )
        .unwrap();
        t.add_column("subject", vec!["p1".into(), "p1".into(), "p2".into(), "p2".into()])
            .unwrap();
        t
    }

    #[test]
    fn test_default_levels_sorted() {
        let t = table();
        assert_eq!(t.levels("treatment").unwrap(), vec!["drug", "vehicle"]);
    }

    #[test]
    fn test_relevel_moves_reference_first() {
        let mut t = table();
        t.relevel("treatment", "vehicle").unwrap();
        assert_eq!(t.levels("treatment").unwrap(), vec!["vehicle", "drug"]);
        assert!(t.relevel("treatment", "placebo").is_err(), "unknown reference must fail");
    }

    #[test]
    fn test_set_levels_requires_cover() {
        let mut t = table();
        assert!(t.set_levels("subject", &["p1".into()]).is_err());
        t.set_levels("subject", &["p2".into(), "p1".into(), "p3".into()]).unwrap();
        let sub = t.subset(&[0, 1]);
        assert_eq!(sub.levels("subject").unwrap(), vec!["p1"], "unused levels are dropped");
    }

    #[test]
    fn test_select_and_filter() {
        let t = table();
        let sel = t.select_samples(&["r4".into(), "r1".into()]).unwrap();
        assert_eq!(sel.sample_ids(), &["r4".to_string(), "r1".to_string()]);
        assert_eq!(sel.column("treatment").unwrap(), &["drug".to_string(), "vehicle".to_string()]);

        let drug = t.filter("treatment", &["drug".into()]).unwrap();
        assert_eq!(drug.n_samples(), 2);
        assert!(t.filter("treatment", &["none".into()]).is_err());
    }

    #[test]
    fn test_group_labels() {
        let t = table();
        let labels = t.group_labels(&["treatment".into(), "subject".into()]).unwrap();
        assert_eq!(labels[0], "vehicle:p1");
    }

    #[test]
    fn test_duplicate_sample_ids_rejected() {
        assert!(SampleTable::new(vec!["a".into(), "a".into()]).is_err());
    }
}
