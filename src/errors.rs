// src/errors.rs

use std::path::PathBuf;
use thiserror::Error;

/// Why a file failed format validation.
///
/// Batch operations match on these instead of bubbling a panic so that one
/// bad file never stops its siblings from being processed.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("empty file")]
    Empty,

    #[error("file not found")]
    NotFound,

    #[error("mixed or invalid FASTA (second line looks like FASTQ)")]
    MixedFasta,

    #[error("invalid FASTQ (third line does not start with '+')")]
    FastqSeparator,

    #[error("invalid FASTQ (too few lines for a record block)")]
    FastqTooFewLines,

    #[error("invalid FASTQ (non-blank line count is not a multiple of 4)")]
    FastqLineCount,

    #[error("unreadable: {0}")]
    Unreadable(#[from] std::io::Error),

    #[error("unknown format")]
    Unknown,
}

/// Caller errors on the quality cutoff engine.
#[derive(Debug, Error)]
pub enum QualityError {
    /// The batch had no non-empty score list. FASTA-only batches land here.
    #[error("quality batch is empty or contains no usable score lists")]
    EmptyBatch,

    #[error("no cutoff set; run analyze on a batch first")]
    CutoffUnset,
}

/// Top-level pipeline failures. Everything here aborts the run; per-file and
/// per-entry problems are logged and recovered long before they reach this.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not serialize record: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("could not write abundance matrix: {0}")]
    Csv(#[from] csv::Error),

    #[error("no valid sequence files found under '{}'", .0.display())]
    NoSamples(PathBuf),

    #[error("missing runtime dependency: {0}")]
    Preflight(String),
}
