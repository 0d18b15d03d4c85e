//! Design formulas, model matrices and negative binomial GLM fitting

mod design;
mod fitting;
mod formula;
mod negative_binomial;

pub use design::{check_full_rank, contrast_vector, create_design_matrix, make_name, single_coefficient, DesignInfo};
pub use fitting::{
    default_lambda, fit_glm, fit_glm_matrix, fit_single_gene, linear_model_mu, unique_design_rows, GlmFit,
    GlmFitParams, GlmFits,
};
pub use formula::DesignFormula;
pub use negative_binomial::{nb_log_likelihood, nb_mean, nb_variance, nb_weight, MAX_LFC_BETA, MIN_MU};
