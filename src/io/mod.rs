//! Input/output: sample tables, quantification files, count matrices and results

mod quant;
mod results;
mod samples;
pub mod tables;
mod tx2gene;

pub use quant::{locate_quant_file, read_quant, QuantFormat, QuantTable};
pub use results::{write_results, Contrast, DeResults, ResultsSummary};
pub use samples::read_sample_table;
pub use tables::{read_count_matrix, write_matrix};
pub use tx2gene::read_tx2gene;
