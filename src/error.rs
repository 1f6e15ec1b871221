use std::path::PathBuf;

use thiserror::Error;

use crate::clade::TaxonGroup;
use crate::NewickError;

/// Every way a batch can fail. None of these are recoverable: the first
/// error aborts the run so that no partial table reaches the figures.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File name does not follow `<prefix>transform-<token>_states-<digits>.<suffix>`.
    #[error("file name '{file}' does not match transform-<token>_states-<digits>.{suffix}")]
    FilenamePattern { file: String, suffix: String },

    /// A posterior predictive report header is not where it should be.
    #[error("{file}: line {line} should be '{expected}', found '{found}'")]
    Structure {
        file: String,
        line: usize,
        expected: String,
        found: String,
    },

    /// `location` is either `line N` or `file name`.
    #[error("{file}: {location}: cannot parse '{value}' as a number")]
    NumericParse {
        file: String,
        location: String,
        value: String,
    },

    #[error("{file}: {found} trees but burn-in is {burnin}; nothing left to summarise")]
    InsufficientSamples {
        file: String,
        found: usize,
        burnin: usize,
    },

    #[error("{file}: line {line}: {source}")]
    Newick {
        file: String,
        line: usize,
        #[source]
        source: NewickError,
    },

    /// NEXUS `translate` tables are not expanded.
    #[error("{file}: line {line}: NEXUS translate blocks are not supported")]
    NexusTranslate { file: String, line: usize },

    /// A post-burn-in tree (1-based position in the chain) has no tip from
    /// one of the ingroups, so its names do not match the taxon lists.
    #[error("{file}: tree {tree} has no {group:?} taxon; tip names do not match the taxon lists")]
    UnknownTaxa {
        file: String,
        tree: usize,
        group: TaxonGroup,
    },

    /// A hard-coded reference value the tables depend on is absent.
    #[error("missing reference {what} for {states} states")]
    MissingReference { what: &'static str, states: u32 },

    #[error("taxon '{0}' is assigned to more than one group")]
    OverlappingTaxon(String),

    #[error("two values for {transform} / {states} states / {statistic}")]
    DuplicateRecord {
        transform: String,
        states: u32,
        statistic: &'static str,
    },

    #[error("summary table '{path}': {message}")]
    SummaryTable { path: PathBuf, message: String },

    #[error("no {what} files found in '{dir}'")]
    NoInputs { dir: PathBuf, what: &'static str },

    #[error("cannot serialise report: {0}")]
    Json(#[from] serde_json::Error),

    #[error("cannot build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::Io {
            path: path.into(),
            source,
        }
    }
}
