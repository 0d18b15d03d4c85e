//! Log fold change shrinkage
//!
//! - `normal`: ridge refit with a normal prior matched to the MLE spread
//! - `apeglm`: Cauchy prior on one coefficient, Laplace posterior SD and s-values

mod apeglm;
mod normal;

pub use apeglm::{prior_var, shrink_lfc_apeglm, svalues, ApeglmParams};
pub use normal::{estimate_beta_prior_var, shrink_lfc_normal, BETA_PRIOR_UPPER_QUANTILE};

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::data::DeDataSet;
use crate::error::{AnalysisError, Result};
use crate::io::DeResults;

/// Shrinkage estimator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShrinkageType {
    Normal,
    #[default]
    Apeglm,
}

impl FromStr for ShrinkageType {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "normal" => Ok(Self::Normal),
            "apeglm" => Ok(Self::Apeglm),
            _ => Err(AnalysisError::InvalidParameter {
                reason: format!("unknown shrinkage type '{}' (normal or apeglm)", s),
            }),
        }
    }
}

impl fmt::Display for ShrinkageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => write!(f, "normal"),
            Self::Apeglm => write!(f, "apeglm"),
        }
    }
}

/// Shrunken copy of a results table
///
/// p-values and padj are carried over from the MLE table. apeglm adds s-values.
pub fn lfc_shrink(dds: &DeDataSet, results: &DeResults, kind: ShrinkageType) -> Result<DeResults> {
    let mut shrunk = results.clone();
    match kind {
        ShrinkageType::Normal => {
            shrink_lfc_normal(dds, &mut shrunk)?;
        }
        ShrinkageType::Apeglm => {
            shrink_lfc_apeglm(dds, &mut shrunk, &ApeglmParams::default())?;
        }
    }
    log::info!("shrank {} with {}", results.contrast, kind);
    Ok(shrunk)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_shrinkage_type() {
        assert_eq!("Normal".parse::<ShrinkageType>().unwrap(), ShrinkageType::Normal);
        assert_eq!("apeglm".parse::<ShrinkageType>().unwrap(), ShrinkageType::Apeglm);
        assert!("ashr".parse::<ShrinkageType>().is_err());
        let json: ShrinkageType = serde_json::from_str("\"normal\"").unwrap();
        assert_eq!(json, ShrinkageType::Normal);
    }
}
