//src/types.rs

use serde::{Deserialize, Serialize};

/// A single read or FASTA entry, as extracted from an input file.
#[derive(Debug, Clone)]
pub struct SequenceRecord {
    /// First whitespace-delimited token of the header line.
    pub id: String,
    /// Bases over the IUPAC nucleotide alphabet (case preserved).
    pub sequence: String,
    /// One score per base, present only for FASTQ input.
    pub quality: Option<Vec<u32>>,
    /// Sample this read belongs to.
    pub sample_name: String,
    /// Basename of the originating file.
    pub source_file: String,
}

impl SequenceRecord {
    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }
}

/// The persisted per-read artifact written under the cleaned-sequence area,
/// one JSON file per read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanedRecord {
    #[serde(rename = "ID")]
    pub id: String,
    pub sample_name: String,
    pub sequence: String,
    /// `None` for reads that came from FASTA input.
    pub quality: Option<Vec<u32>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub source_fastq: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub source_fasta: Option<String>,
    pub size: usize,
}

/// One entry of the unique-sequence catalog, persisted as one JSON file per
/// sequence. The metadata is that of the first occurrence; later duplicates
/// are absorbed silently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UniqueRecord {
    #[serde(rename = "ID")]
    pub id: String,
    pub sequence: String,
    pub size: usize,
    pub sample_name: String,
    /// Filled in by the taxonomy annotator; absent until then.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub taxonomy: Option<String>,
}

/// One row of the abundance matrix: identifying columns followed by one
/// occurrence count per sample, aligned with `AbundanceMatrix::sample_names`.
#[derive(Debug, Clone)]
pub struct AbundanceRow {
    pub taxonomy: String,
    pub id: String,
    pub sequence: String,
    pub counts: Vec<u64>,
}

/// Unique sequences x samples, with sample columns sorted by name.
#[derive(Debug, Clone)]
pub struct AbundanceMatrix {
    pub sample_names: Vec<String>,
    pub rows: Vec<AbundanceRow>,
}
