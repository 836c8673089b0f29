// error.rs - Crate-wide error type

use thiserror::Error;

/// Errors raised by the clustering core and its loaders
#[derive(Error, Debug)]
pub enum BapsError {
    /// Zero sequences or sites, or too few sequences to cluster
    #[error("Empty input: {message}")]
    EmptyInput { message: String },

    /// Prior policy tag that is not one of the supported policies
    #[error("Unknown prior type '{tag}'. Use: symmetric, optimise.symmetric, baps, hc")]
    UnknownPriorType { tag: String },

    /// Prior optimisation ran out of iterations
    #[error("Prior optimisation did not converge after {iterations} iterations: {message}")]
    NonConvergence { iterations: usize, message: String },

    /// Supplied tree is malformed or does not match the store
    #[error("Invalid tree: {message}")]
    InvalidTree { message: String },

    /// Site or sequence counts disagree between two inputs
    #[error("Mismatched dimensions: {message}")]
    MismatchedDimensions { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Delimited table could not be read or written
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Malformed FASTA, Newick, seed partition or cache content
    #[error("Parse error: {message}")]
    Parse { message: String },

    /// Invalid configuration values
    #[error("Configuration error: {message}")]
    Config { message: String },
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, BapsError>;

impl BapsError {
    pub fn empty_input(message: impl Into<String>) -> Self {
        Self::EmptyInput {
            message: message.into(),
        }
    }

    pub fn invalid_tree(message: impl Into<String>) -> Self {
        Self::InvalidTree {
            message: message.into(),
        }
    }

    pub fn mismatched(message: impl Into<String>) -> Self {
        Self::MismatchedDimensions {
            message: message.into(),
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}
