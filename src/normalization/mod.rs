//! Normalization methods for RNA-seq count data

mod counts;
mod size_factors;

pub use counts::fpm;
pub use size_factors::{estimate_normalization_factors, estimate_size_factors, size_factors, SizeFactorMethod};
