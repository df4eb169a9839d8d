// src/matrix.rs

use std::fs;
use std::path::{Path, PathBuf};

use ahash::AHashMap;
use rayon::prelude::*;

use crate::catalog::load_unique_records;
use crate::errors::PipelineError;
use crate::format::extract_sequences;
use crate::types::{AbundanceMatrix, AbundanceRow};

/// Multiset of exact sequence strings across every raw file in one sample
/// directory. Formats are re-detected per file; files that fail validation
/// are logged and contribute nothing.
fn index_raw_sequences(
    sample_dir: &Path,
    verify_compressed: bool,
) -> Result<AHashMap<String, u64>, PipelineError> {
    let mut files: Vec<PathBuf> = fs::read_dir(sample_dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .collect();
    files.sort();

    let mut counts: AHashMap<String, u64> = AHashMap::new();
    for file in files {
        match extract_sequences(&file, verify_compressed) {
            Ok(seqs) => {
                for seq in seqs {
                    *counts.entry(seq).or_insert(0) += 1;
                }
            }
            Err(reason) => {
                log::warn!("not counting '{}': {}", file.display(), reason);
            }
        }
    }
    Ok(counts)
}

/// Builds the unique-sequence x sample abundance matrix.
///
/// Counts come from the raw copies under `raw_root`, not the cleaned
/// records; a sequence absent from a sample scores 0. Rows follow catalog
/// artifact order, sample columns are sorted by name. The table is written
/// to `out_path` and also returned.
pub fn build_matrix(
    unique_root: &Path,
    raw_root: &Path,
    out_path: &Path,
    verify_compressed: bool,
) -> Result<AbundanceMatrix, PipelineError> {
    let records = load_unique_records(unique_root)?;

    let mut sample_dirs: Vec<(String, PathBuf)> = fs::read_dir(raw_root)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .map(|p| {
            let name = p
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            (name, p)
        })
        .collect();
    sample_dirs.sort_by(|a, b| a.0.cmp(&b.0));

    // Samples are independent; count them in parallel.
    let sample_counts: Vec<AHashMap<String, u64>> = sample_dirs
        .par_iter()
        .map(|(_, dir)| index_raw_sequences(dir, verify_compressed))
        .collect::<Result<_, _>>()?;

    let sample_names: Vec<String> = sample_dirs.into_iter().map(|(name, _)| name).collect();

    let rows: Vec<AbundanceRow> = records
        .iter()
        .map(|(_, record)| AbundanceRow {
            taxonomy: record
                .taxonomy
                .clone()
                .unwrap_or_else(|| "Unknown".to_string()),
            id: record.id.clone(),
            sequence: record.sequence.clone(),
            counts: sample_counts
                .iter()
                .map(|counts| counts.get(&record.sequence).copied().unwrap_or(0))
                .collect(),
        })
        .collect();

    let matrix = AbundanceMatrix { sample_names, rows };
    write_matrix_csv(&matrix, out_path)?;
    log::info!(
        "abundance matrix: {} row(s) x {} sample(s) -> '{}'",
        matrix.rows.len(),
        matrix.sample_names.len(),
        out_path.display()
    );
    Ok(matrix)
}

fn write_matrix_csv(matrix: &AbundanceMatrix, out_path: &Path) -> Result<(), PipelineError> {
    if let Some(parent) = out_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(out_path)?;

    let mut header = vec!["taxonomy".to_string(), "ID".to_string(), "sequence".to_string()];
    header.extend(matrix.sample_names.iter().cloned());
    writer.write_record(&header)?;

    for row in &matrix.rows {
        let mut fields = vec![row.taxonomy.clone(), row.id.clone(), row.sequence.clone()];
        fields.extend(row.counts.iter().map(|c| c.to_string()));
        writer.write_record(&fields)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{aggregate_unique, export_cleaned_records};

    fn seed_raw(raw_root: &Path, sample: &str, fasta_body: &str) {
        let dir = raw_root.join(sample);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("reads.fasta"), fasta_body).unwrap();
    }

    fn seed_catalog(root: &Path, reads: &[(&str, &str)]) -> PathBuf {
        let cleaned = root.join("cleaned");
        let ids: Vec<String> = reads.iter().map(|(id, _)| id.to_string()).collect();
        let seqs: Vec<String> = reads.iter().map(|(_, s)| s.to_string()).collect();
        export_cleaned_records(&cleaned, "a_sample", "reads.fasta", &ids, &seqs, None).unwrap();
        let unique = root.join("unique");
        aggregate_unique(&cleaned, &unique).unwrap();
        unique
    }

    #[test]
    fn counts_exact_occurrences_per_sample() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("raw");
        seed_raw(&raw, "a_sample", ">r1\nACGT\n>r2\nACGT\n>r3\nGGGG\n");
        seed_raw(&raw, "b_sample", ">x1\nTTTT\n");
        let unique = seed_catalog(dir.path(), &[("r1", "ACGT")]);

        let matrix = build_matrix(&unique, &raw, &dir.path().join("matrix.csv"), false).unwrap();

        assert_eq!(matrix.sample_names, vec!["a_sample", "b_sample"]);
        assert_eq!(matrix.rows.len(), 1);
        let row = &matrix.rows[0];
        assert_eq!(row.sequence, "ACGT");
        assert_eq!(row.counts, vec![2, 0]);
    }

    #[test]
    fn absent_sequences_are_zero_not_missing() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("raw");
        seed_raw(&raw, "only_sample", ">r1\nAAAA\n");
        let unique = seed_catalog(dir.path(), &[("r1", "AAAA"), ("r2", "CCCC")]);

        let matrix = build_matrix(&unique, &raw, &dir.path().join("matrix.csv"), false).unwrap();

        for row in &matrix.rows {
            assert_eq!(row.counts.len(), 1);
        }
        let cccc = matrix.rows.iter().find(|r| r.sequence == "CCCC").unwrap();
        assert_eq!(cccc.counts, vec![0]);
    }

    #[test]
    fn csv_export_has_identifying_columns_then_samples() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("raw");
        seed_raw(&raw, "s1", ">r1\nACGT\n");
        let unique = seed_catalog(dir.path(), &[("r1", "ACGT")]);

        let out = dir.path().join("matrix.csv");
        build_matrix(&unique, &raw, &out, false).unwrap();

        let contents = fs::read_to_string(&out).unwrap();
        let mut lines = contents.lines();
        assert_eq!(lines.next().unwrap(), "taxonomy,ID,sequence,s1");
        assert_eq!(lines.next().unwrap(), "Unknown,r1,ACGT,1");
    }
}
