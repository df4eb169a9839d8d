// src/catalog.rs

use std::fs;
use std::path::{Path, PathBuf};

use ahash::AHashMap;

use crate::errors::PipelineError;
use crate::types::{CleanedRecord, UniqueRecord};

/// Replaces every non-alphanumeric character so an arbitrary read id is
/// safe inside a file name.
pub fn sanitize_id(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect()
}

/// Writes one cleaned-record JSON per read under
/// `<cleaned_root>/<sample>/<sample>_<sanitized-id>_<idx>.json`.
///
/// `scores` is given for FASTQ-derived reads (parallel to `seqs`) and absent
/// for FASTA input. A record that fails to serialize or write is logged and
/// skipped; the count of records actually written comes back.
pub fn export_cleaned_records(
    cleaned_root: &Path,
    sample_name: &str,
    source_file: &str,
    ids: &[String],
    seqs: &[String],
    scores: Option<&[Vec<u32>]>,
) -> Result<usize, PipelineError> {
    let sample_dir = cleaned_root.join(sample_name);
    fs::create_dir_all(&sample_dir)?;

    let mut written = 0usize;
    for (idx, (id, seq)) in ids.iter().zip(seqs).enumerate() {
        let record = CleanedRecord {
            id: id.clone(),
            sample_name: sample_name.to_string(),
            sequence: seq.clone(),
            quality: scores.map(|qs| qs[idx].clone()),
            source_fastq: scores.is_some().then(|| source_file.to_string()),
            source_fasta: scores.is_none().then(|| source_file.to_string()),
            size: seq.len(),
        };
        let path = sample_dir.join(format!("{}_{}_{}.json", sample_name, sanitize_id(id), idx));
        match serde_json::to_string_pretty(&record) {
            Ok(json) => {
                if let Err(e) = fs::write(&path, json) {
                    log::error!("could not write '{}': {}", path.display(), e);
                } else {
                    written += 1;
                }
            }
            Err(e) => log::error!("could not serialize record '{}': {}", id, e),
        }
    }
    Ok(written)
}

/// Stage counts reported after aggregation, regardless of partial failures.
#[derive(Debug, Clone, Default)]
pub struct AggregateSummary {
    /// Cleaned-record files parsed, duplicates included.
    pub files_processed: usize,
    pub unique_found: usize,
    pub artifacts_written: usize,
}

/// Collects every `.json` under `dir`, recursing into subdirectories.
/// Entries are visited in name order so the walk does not depend on
/// filesystem iteration order.
fn collect_json_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), PipelineError> {
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .collect();
    entries.sort();
    for path in entries {
        if path.is_dir() {
            collect_json_files(&path, out)?;
        } else if path.extension().map(|e| e == "json").unwrap_or(false) {
            out.push(path);
        }
    }
    Ok(())
}

/// Merges all cleaned per-sample records under `cleaned_root` into the
/// unique-sequence catalog at `unique_root`, one JSON artifact per distinct
/// sequence string.
///
/// Uniqueness is exact string equality; the first occurrence's metadata is
/// retained and later occurrences only count toward `files_processed`.
/// Malformed records are logged and skipped.
pub fn aggregate_unique(
    cleaned_root: &Path,
    unique_root: &Path,
) -> Result<AggregateSummary, PipelineError> {
    fs::create_dir_all(unique_root)?;
    log::info!(
        "aggregating unique sequences from '{}'",
        cleaned_root.display()
    );

    let mut files = Vec::new();
    collect_json_files(cleaned_root, &mut files)?;

    // Insertion-ordered store: the Vec keeps first-seen order, the map is
    // the exact-match index into it.
    let mut ordered: Vec<UniqueRecord> = Vec::new();
    let mut index: AHashMap<String, usize> = AHashMap::new();
    let mut summary = AggregateSummary::default();

    for path in &files {
        let contents = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                log::warn!("could not read '{}': {}", path.display(), e);
                continue;
            }
        };
        let record: CleanedRecord = match serde_json::from_str(&contents) {
            Ok(r) => r,
            Err(e) => {
                log::warn!("'{}' is not a valid record, ignoring: {}", path.display(), e);
                continue;
            }
        };
        summary.files_processed += 1;

        if record.sequence.is_empty() || index.contains_key(&record.sequence) {
            continue;
        }
        index.insert(record.sequence.clone(), ordered.len());
        ordered.push(UniqueRecord {
            id: record.id,
            sequence: record.sequence,
            size: record.size,
            sample_name: record.sample_name,
            taxonomy: None,
        });
    }
    summary.unique_found = ordered.len();

    for (idx, record) in ordered.iter().enumerate() {
        let path = unique_root.join(format!("unique_{}_{}.json", sanitize_id(&record.id), idx));
        match serde_json::to_string_pretty(record) {
            Ok(json) => {
                if let Err(e) = fs::write(&path, json) {
                    log::error!("could not write '{}': {}", path.display(), e);
                } else {
                    summary.artifacts_written += 1;
                }
            }
            Err(e) => log::error!("could not serialize '{}': {}", record.id, e),
        }
    }

    log::info!(
        "processed {} record file(s), {} unique sequence(s), {} artifact(s) written",
        summary.files_processed,
        summary.unique_found,
        summary.artifacts_written
    );
    Ok(summary)
}

/// Loads the persisted catalog back, sorted by artifact file name. Artifacts
/// that fail to parse are logged and skipped.
pub fn load_unique_records(
    unique_root: &Path,
) -> Result<Vec<(PathBuf, UniqueRecord)>, PipelineError> {
    let mut paths: Vec<PathBuf> = fs::read_dir(unique_root)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().map(|e| e == "json").unwrap_or(false))
        .collect();
    paths.sort();

    let mut records = Vec::with_capacity(paths.len());
    for path in paths {
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<UniqueRecord>(&contents) {
                Ok(record) => records.push((path, record)),
                Err(e) => log::warn!("'{}' is not a valid artifact, ignoring: {}", path.display(), e),
            },
            Err(e) => log::warn!("could not read '{}': {}", path.display(), e),
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn export_sample(root: &Path, sample: &str, reads: &[(&str, &str)]) {
        let ids: Vec<String> = reads.iter().map(|(id, _)| id.to_string()).collect();
        let seqs: Vec<String> = reads.iter().map(|(_, s)| s.to_string()).collect();
        let scores: Vec<Vec<u32>> = seqs.iter().map(|s| vec![40; s.len()]).collect();
        export_cleaned_records(root, sample, "reads.fastq", &ids, &seqs, Some(&scores)).unwrap();
    }

    #[test]
    fn first_occurrence_wins_across_samples() {
        let dir = tempfile::tempdir().unwrap();
        let cleaned = dir.path().join("cleaned");
        // Sample walk order is name-sorted, so a_sample is seen first.
        export_sample(&cleaned, "a_sample", &[("r1", "ACGT"), ("r2", "GGGG")]);
        export_sample(&cleaned, "b_sample", &[("r9", "ACGT")]);

        let unique = dir.path().join("unique");
        let summary = aggregate_unique(&cleaned, &unique).unwrap();

        assert_eq!(summary.files_processed, 3);
        assert_eq!(summary.unique_found, 2);
        assert_eq!(summary.artifacts_written, 2);

        let records = load_unique_records(&unique).unwrap();
        let acgt = records
            .iter()
            .map(|(_, r)| r)
            .find(|r| r.sequence == "ACGT")
            .unwrap();
        assert_eq!(acgt.id, "r1");
        assert_eq!(acgt.sample_name, "a_sample");
    }

    #[test]
    fn aggregation_is_idempotent_by_content() {
        let dir = tempfile::tempdir().unwrap();
        let cleaned = dir.path().join("cleaned");
        export_sample(&cleaned, "s1", &[("r1", "ACGT"), ("r2", "TTTT"), ("r3", "ACGT")]);

        let first = dir.path().join("u1");
        let second = dir.path().join("u2");
        aggregate_unique(&cleaned, &first).unwrap();
        aggregate_unique(&cleaned, &second).unwrap();

        let seqs = |root: &Path| -> Vec<String> {
            let mut s: Vec<String> = load_unique_records(root)
                .unwrap()
                .into_iter()
                .map(|(_, r)| r.sequence)
                .collect();
            s.sort();
            s
        };
        assert_eq!(seqs(&first), seqs(&second));
        assert_eq!(seqs(&first), vec!["ACGT".to_string(), "TTTT".to_string()]);
    }

    #[test]
    fn malformed_records_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let cleaned = dir.path().join("cleaned").join("s1");
        fs::create_dir_all(&cleaned).unwrap();
        fs::write(cleaned.join("broken.json"), "{ not json").unwrap();
        export_sample(&dir.path().join("cleaned"), "s1", &[("r1", "ACGT")]);

        let summary =
            aggregate_unique(&dir.path().join("cleaned"), &dir.path().join("unique")).unwrap();
        assert_eq!(summary.files_processed, 1);
        assert_eq!(summary.unique_found, 1);
    }

    #[test]
    fn sanitize_replaces_non_alphanumerics() {
        assert_eq!(sanitize_id("r1/lane|2.x"), "r1_lane_2_x");
    }
}
