// src/lib.rs
pub mod catalog;
pub mod errors;
pub mod format;
pub mod matrix;
pub mod quality;
pub mod samples;
pub mod taxonomy;
pub mod types;

use std::path::{Path, PathBuf};

use crate::catalog::{aggregate_unique, export_cleaned_records, AggregateSummary};
use crate::errors::PipelineError;
use crate::format::{detect_format, extract_fasta, extract_fastq, SequenceFormat};
use crate::matrix::build_matrix;
use crate::quality::{gc_content, QualityCutoff, DEFAULT_THRESHOLDS};
use crate::samples::discover_samples;
use crate::taxonomy::{annotate_catalog, AnnotateSummary, TaxonomySearch};
use crate::types::AbundanceMatrix;

/// Locations and knobs for one pipeline run. The working area lives under
/// `assets_root`: raw copies, cleaned records, the unique catalog and the
/// exported matrix each get their own subtree.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// A sequence file, a directory of files, or a directory with one
    /// subdirectory per sample.
    pub input: PathBuf,
    pub assets_root: PathBuf,
    /// Candidate quality cutoffs, in tie-break order.
    pub thresholds: Vec<u32>,
    /// Re-scan compressed FASTQ input for the 4-line record-count check
    /// instead of accepting a tentative classification.
    pub verify_compressed_records: bool,
}

impl PipelineConfig {
    pub fn new<P: Into<PathBuf>, Q: Into<PathBuf>>(input: P, assets_root: Q) -> Self {
        Self {
            input: input.into(),
            assets_root: assets_root.into(),
            thresholds: DEFAULT_THRESHOLDS.to_vec(),
            verify_compressed_records: false,
        }
    }

    pub fn raw_root(&self) -> PathBuf {
        self.assets_root.join("raw")
    }

    pub fn cleaned_root(&self) -> PathBuf {
        self.assets_root.join("cleaned")
    }

    pub fn unique_root(&self) -> PathBuf {
        self.assets_root.join("unique")
    }

    pub fn matrix_path(&self) -> PathBuf {
        self.assets_root.join("abundance_matrix.csv")
    }
}

/// Per-sample read accounting after cleaning.
#[derive(Debug, Clone)]
pub struct SampleReadStats {
    pub sample: String,
    /// Reads extracted from the sample's raw files.
    pub reads_in: usize,
    /// Reads that survived quality filtering (all of them for FASTA input).
    pub reads_kept: usize,
    /// Mean length of the kept reads.
    pub mean_length: f64,
    /// Mean per-read GC percentage of the kept reads.
    pub gc_percent: f64,
}

/// Everything a run reports back, with the matrix itself included.
#[derive(Debug)]
pub struct PipelineSummary {
    pub sample_stats: Vec<SampleReadStats>,
    pub cleaned_records: usize,
    pub aggregate: AggregateSummary,
    pub annotate: AnnotateSummary,
    pub matrix: AbundanceMatrix,
    pub matrix_path: PathBuf,
}

fn stats_for(sample: &str, reads_in: usize, seqs: &[String]) -> SampleReadStats {
    let mean_length = if seqs.is_empty() {
        0.0
    } else {
        seqs.iter().map(|s| s.len() as f64).sum::<f64>() / seqs.len() as f64
    };
    let gc = gc_content(seqs);
    let gc_percent = if gc.is_empty() {
        0.0
    } else {
        gc.iter().sum::<f64>() / gc.len() as f64
    };
    SampleReadStats {
        sample: sample.to_string(),
        reads_in,
        reads_kept: seqs.len(),
        mean_length,
        gc_percent,
    }
}

/// Cleans one sample's files into per-read JSON records, returning the
/// sample's stats and how many records were written. Per-file problems are
/// logged and the remaining files continue.
fn clean_sample(
    sample: &samples::Sample,
    cleaned_root: &Path,
    thresholds: &[u32],
    verify_compressed: bool,
) -> Result<(SampleReadStats, usize), PipelineError> {
    let mut reads_in = 0usize;
    let mut kept_seqs: Vec<String> = Vec::new();
    let mut written = 0usize;

    for file in &sample.files {
        let source_file = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let format = match detect_format(file, verify_compressed) {
            Ok(f) => f,
            Err(reason) => {
                log::warn!("'{}': {}", file.display(), reason);
                continue;
            }
        };

        match format {
            SequenceFormat::Fastq { verified } => {
                if !verified {
                    log::debug!(
                        "'{}': compressed FASTQ accepted without record-count check",
                        file.display()
                    );
                }
                let (ids, seqs, scores) = match extract_fastq(file, &sample.name) {
                    Ok(triple) => triple,
                    Err(reason) => {
                        log::warn!("'{}': {}", file.display(), reason);
                        continue;
                    }
                };
                reads_in += ids.len();

                let mut cutter = QualityCutoff::new(thresholds.to_vec());
                let report = match cutter.analyze(&scores) {
                    Ok(report) => report,
                    Err(e) => {
                        // Caller error per the engine's contract; skip this
                        // file's cleaning entirely, emit nothing for it.
                        log::warn!("'{}': {}", file.display(), e);
                        continue;
                    }
                };
                for (thresh, pct) in &report.percent_per_cut {
                    log::debug!("  >= {}: {:.1}% of reads pass", thresh, pct);
                }

                let (seqs_cut, scores_cut) = match cutter.cut(&seqs, &scores) {
                    Ok(pair) => pair,
                    Err(e) => {
                        log::warn!("'{}': {}", file.display(), e);
                        continue;
                    }
                };
                // Filtering drops emptied reads but keeps input order, so
                // the surviving ids are the ones whose base/score pairs kept
                // at least one base.
                let mut ids_cut = Vec::with_capacity(seqs_cut.len());
                {
                    let cutoff = cutter.cutoff.unwrap_or(0);
                    for ((id, seq), read_scores) in ids.iter().zip(&seqs).zip(&scores) {
                        let survives = seq
                            .chars()
                            .zip(read_scores.iter())
                            .any(|(_, &s)| s >= cutoff);
                        if survives {
                            ids_cut.push(id.clone());
                        }
                    }
                }

                written += export_cleaned_records(
                    cleaned_root,
                    &sample.name,
                    &source_file,
                    &ids_cut,
                    &seqs_cut,
                    Some(&scores_cut),
                )?;
                kept_seqs.extend(seqs_cut);
            }
            SequenceFormat::Fasta => {
                let (ids, seqs) = match extract_fasta(file, &sample.name) {
                    Ok(pair) => pair,
                    Err(reason) => {
                        log::warn!("'{}': {}", file.display(), reason);
                        continue;
                    }
                };
                reads_in += ids.len();
                written +=
                    export_cleaned_records(cleaned_root, &sample.name, &source_file, &ids, &seqs, None)?;
                kept_seqs.extend(seqs);
            }
        }
    }

    let stats = stats_for(&sample.name, reads_in, &kept_seqs);
    log::info!(
        "sample '{}': {} read(s) in, {} kept, mean length {:.1}, GC {:.1}%",
        stats.sample,
        stats.reads_in,
        stats.reads_kept,
        stats.mean_length,
        stats.gc_percent
    );
    Ok((stats, written))
}

/// Runs the whole pipeline: discover and copy samples, quality-clean each
/// file, aggregate the unique-sequence catalog, annotate it via `search`,
/// and build the abundance matrix.
///
/// Stages run strictly in that order; within annotation and raw counting
/// the independent entries run in parallel. Per-file and per-entry failures
/// are logged and recovered, so a partial input still produces a matrix.
pub fn run_pipeline<S>(
    config: &PipelineConfig,
    search: &S,
) -> Result<PipelineSummary, PipelineError>
where
    S: TaxonomySearch + ?Sized,
{
    // 1. Discover samples and copy them into canonical raw storage
    let samples = discover_samples(&config.input, &config.raw_root(), config.verify_compressed_records)?;
    if samples.is_empty() {
        return Err(PipelineError::NoSamples(config.input.clone()));
    }

    // 2. Quality-clean every sample into per-read records
    let cleaned_root = config.cleaned_root();
    let mut sample_stats = Vec::with_capacity(samples.len());
    let mut cleaned_records = 0usize;
    for sample in &samples {
        let (stats, written) = clean_sample(
            sample,
            &cleaned_root,
            &config.thresholds,
            config.verify_compressed_records,
        )?;
        sample_stats.push(stats);
        cleaned_records += written;
    }

    // 3. Merge cleaned records into the unique-sequence catalog
    let unique_root = config.unique_root();
    let aggregate = aggregate_unique(&cleaned_root, &unique_root)?;

    // 4. Annotate each catalog entry
    let annotate = annotate_catalog(&unique_root, search)?;

    // 5. Count unique sequences across each sample's raw files
    let matrix_path = config.matrix_path();
    let matrix = build_matrix(
        &unique_root,
        &config.raw_root(),
        &matrix_path,
        config.verify_compressed_records,
    )?;

    Ok(PipelineSummary {
        sample_stats,
        cleaned_records,
        aggregate,
        annotate,
        matrix,
        matrix_path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    struct StubSearch;

    impl TaxonomySearch for StubSearch {
        fn search(&self, _sequence: &str) -> String {
            "Bacteria; Escherichia coli".to_string()
        }
    }

    #[test]
    fn pipeline_builds_matrix_from_mixed_samples() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input");

        // Sample A: FASTQ, 'I' scores (73) keep every base at any default cutoff
        let a = input.join("a_sample");
        fs::create_dir_all(&a).unwrap();
        fs::write(
            a.join("reads.fastq"),
            "@r1\nACGT\n+\nIIII\n@r2\nACGT\n+\nIIII\n@r3\nGGGG\n+\nIIII\n",
        )
        .unwrap();

        // Sample B: FASTA without any ACGT occurrence
        let b = input.join("b_sample");
        fs::create_dir_all(&b).unwrap();
        fs::write(b.join("reads.fasta"), ">x1\nTTTT\n>x2\nCCCC\n").unwrap();

        let config = PipelineConfig::new(&input, dir.path().join("assets"));
        let summary = run_pipeline(&config, &StubSearch).expect("pipeline failed");

        assert_eq!(summary.sample_stats.len(), 2);
        assert_eq!(summary.cleaned_records, 5);
        assert_eq!(summary.aggregate.unique_found, 4);
        assert_eq!(summary.annotate.entries, 4);

        let matrix = &summary.matrix;
        assert_eq!(matrix.sample_names, vec!["a_sample", "b_sample"]);

        let acgt = matrix.rows.iter().find(|r| r.sequence == "ACGT").unwrap();
        assert_eq!(acgt.counts, vec![2, 0]);
        assert_eq!(acgt.taxonomy, "Bacteria; Escherichia coli");

        let tttt = matrix.rows.iter().find(|r| r.sequence == "TTTT").unwrap();
        assert_eq!(tttt.counts, vec![0, 1]);

        assert!(summary.matrix_path.is_file());
        let exported = fs::read_to_string(&summary.matrix_path).unwrap();
        assert!(exported.starts_with("taxonomy,ID,sequence,a_sample,b_sample"));
    }

    #[test]
    fn pipeline_fails_fast_without_valid_input() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input");
        fs::create_dir_all(&input).unwrap();
        fs::write(input.join("junk.txt"), "nothing here").unwrap();

        let config = PipelineConfig::new(&input, dir.path().join("assets"));
        assert!(matches!(
            run_pipeline(&config, &StubSearch),
            Err(PipelineError::NoSamples(_))
        ));
    }

    #[test]
    fn a_bad_quality_batch_does_not_stop_its_sample_siblings() {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        use std::io::Write as _;

        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input");
        let s = input.join("s1");
        fs::create_dir_all(&s).unwrap();
        fs::write(s.join("good.fastq"), "@r1\nACGT\n+\nIIII\n").unwrap();

        // Tentatively valid (compressed, record count unchecked) but every
        // quality line is blank, so cutoff analysis rejects the batch and
        // the file contributes nothing.
        let f = fs::File::create(s.join("no_quals.fastq.gz")).unwrap();
        let mut enc = GzEncoder::new(f, Compression::default());
        enc.write_all(b"@q1\nGGGG\n+\n\n@q2\nCCCC\n+\n\n").unwrap();
        enc.finish().unwrap();

        let config = PipelineConfig::new(&input, dir.path().join("assets"));
        let summary = run_pipeline(&config, &StubSearch).expect("pipeline failed");
        assert_eq!(summary.aggregate.unique_found, 1);
        assert_eq!(summary.sample_stats[0].reads_kept, 1);
    }
}
