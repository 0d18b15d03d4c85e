//! Data structures for differential expression analysis

mod count_matrix;
mod dataset;
mod gene_ids;
mod samples;

pub use count_matrix::CountMatrix;
pub use dataset::DeDataSet;
pub use gene_ids::{make_unique, strip_version, truncate_gene_ids};
pub use samples::SampleTable;
