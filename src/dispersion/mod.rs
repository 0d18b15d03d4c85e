//! Dispersion estimation for negative binomial models

mod gene_wise;
mod map;
mod posterior;
mod trend;

pub use gene_wise::{estimate_gene_dispersions, max_dispersion};
pub use map::{estimate_map_dispersions, estimate_prior_variance, fit_map_dispersion, PriorVariance};
pub use posterior::{DispersionPosterior, LineSearch, LogNormalPrior};
pub use trend::{fit_dispersion_trend, fit_trend, DispersionTrend, TrendFitMethod};

use crate::data::DeDataSet;
use crate::error::{AnalysisError, Result};
use crate::glm::MIN_MU;

/// Configurable parameters for dispersion estimation
#[derive(Debug, Clone)]
pub struct DispersionParams {
    /// Smallest dispersion an estimate may take
    pub min_disp: f64,
    /// Change in log posterior that ends the line search
    pub disp_tol: f64,
    /// Initial step size of the line search
    pub kappa_0: f64,
    /// Maximum line search iterations
    pub maxit: usize,
    /// Gene-wise estimates this many SDs above the trend are not shrunk
    pub outlier_sd: f64,
    /// Floor on fitted means
    pub min_mu: f64,
}

impl Default for DispersionParams {
    fn default() -> Self {
        Self {
            min_disp: 1e-8,
            disp_tol: 1e-6,
            kappa_0: 1.0,
            maxit: 100,
            outlier_sd: 2.0,
            min_mu: MIN_MU,
        }
    }
}

/// Estimate gene-wise dispersions, fit the trend and shrink to MAP estimates
pub fn estimate_dispersions(dds: &mut DeDataSet, fit_type: TrendFitMethod, params: &DispersionParams) -> Result<()> {
    let design = dds.design_matrix()?;
    if design.nrows() <= design.ncols() {
        return Err(AnalysisError::InvalidDesign {
            reason: "the design has as many coefficients as samples, so there are no replicates \
                     to estimate dispersion"
                .to_string(),
        });
    }
    if !dds.has_normalization() {
        return Err(AnalysisError::SizeFactorError {
            reason: "size factors must be estimated before dispersions".to_string(),
        });
    }

    estimate_gene_dispersions(dds, params)?;
    fit_dispersion_trend(dds, fit_type, params)?;
    estimate_map_dispersions(dds, params)
}
