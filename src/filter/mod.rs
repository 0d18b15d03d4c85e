//! Outlier and low-count filtering of results

mod cooks;
mod independent;

pub use cooks::{
    calculate_cooks_distance, compute_cooks, default_cooks_cutoff, design_cells, filter_by_cooks, max_cooks,
    n_or_more_in_cell, robust_method_of_moments_disp, MIN_REPLICATES_FOR_COOKS,
};
pub use independent::{independent_filtering, FilterOutcome};
