//! Error types for rnaseq_de

use thiserror::Error;

/// Main error type for the differential expression workflow
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Invalid count matrix: {reason}")]
    InvalidCountMatrix { reason: String },

    #[error("Invalid sample metadata: {reason}")]
    InvalidMetadata { reason: String },

    #[error("Invalid design: {reason}")]
    InvalidDesign { reason: String },

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: String, actual: String },

    #[error("Invalid quantification file {path}: {reason}")]
    InvalidQuantification { path: String, reason: String },

    #[error("Transcript-to-gene mapping failed: {reason}")]
    Tx2GeneMismatch { reason: String },

    #[error("Size factor estimation failed: {reason}")]
    SizeFactorError { reason: String },

    #[error("Dispersion estimation failed: {reason}")]
    DispersionError { reason: String },

    #[error("Model fitting did not converge: {reason}")]
    ConvergenceError { reason: String },

    #[error("Empty data: {reason}")]
    EmptyData { reason: String },

    #[error("Invalid contrast: {reason}")]
    InvalidContrast { reason: String },

    #[error("Invalid parameter: {reason}")]
    InvalidParameter { reason: String },

    #[error("Workflow configuration error: {reason}")]
    ConfigError { reason: String },

    #[error("Plot rendering failed: {reason}")]
    PlotError { reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias used throughout the crate
pub type Result<T> = std::result::Result<T, AnalysisError>;
