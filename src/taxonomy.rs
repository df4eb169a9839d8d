// src/taxonomy.rs

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::time::{Duration, Instant};

use rayon::prelude::*;

use crate::catalog::load_unique_records;
use crate::errors::PipelineError;

/// Maps a raw sequence to a classification string. Implementations never
/// fail outright: tool problems come back as sentinel strings so one bad
/// entry cannot abort a batch.
pub trait TaxonomySearch: Sync {
    fn search(&self, sequence: &str) -> String;
}

/// Keyword table for bucketing a hit description into a coarse taxon.
const TAXA_KEYWORDS: [(&str, [&str; 2]); 6] = [
    ("Bacteria", ["bacteria", "bacterial"]),
    ("Archaea", ["archaea", "archaeal"]),
    ("Fungi", ["fungi", "fungal"]),
    ("Virus", ["virus", "viral"]),
    ("Plant", ["plant", "plantae"]),
    ("Animal", ["animal", "animalia"]),
];

/// Reduces a hit's free-text description to a coarse label:
/// `"<Bucket>; <first two tokens>"` when a keyword matches,
/// `"Unknown; <first two tokens>"` when none does, bare `"Unknown"` when the
/// description is too short to name an organism.
pub fn classify_description(description: &str) -> String {
    if description.is_empty() {
        return "Unknown".to_string();
    }
    let lower = description.to_lowercase();
    let tokens: Vec<&str> = description.split_whitespace().collect();

    for (bucket, keywords) in TAXA_KEYWORDS {
        if keywords.iter().any(|k| lower.contains(k)) {
            if tokens.len() >= 2 {
                return format!("{}; {} {}", bucket, tokens[0], tokens[1]);
            }
            return bucket.to_string();
        }
    }
    if tokens.len() >= 2 {
        return format!("Unknown; {} {}", tokens[0], tokens[1]);
    }
    "Unknown".to_string()
}

/// The 13-column tabular layout requested from blastn: query id, hit id,
/// percent identity, alignment length, mismatches, gap opens, query/hit
/// start/end, e-value, bit score, hit description.
const BLAST_OUTFMT: &str =
    "6 qseqid sseqid pident length mismatch gapopen qstart qend sstart send evalue bitscore stitle";

/// Runs a child process, killing it if the deadline passes. `None` means
/// the deadline was hit. Output is tiny here (a handful of hit rows), so
/// polling before draining the pipes cannot deadlock.
fn run_with_timeout(mut cmd: Command, timeout: Duration) -> io::Result<Option<Output>> {
    let mut child = cmd.stdout(Stdio::piped()).stderr(Stdio::piped()).spawn()?;
    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait()? {
            Some(_) => return child.wait_with_output().map(Some),
            None => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Ok(None);
                }
                std::thread::sleep(Duration::from_millis(50));
            }
        }
    }
}

/// Local blastn search against a named nucleotide database. The query goes
/// through a temporary single-record FASTA file that is removed when the
/// search returns, whatever the outcome.
#[derive(Debug, Clone)]
pub struct BlastSearch {
    pub db_path: PathBuf,
    pub max_hits: usize,
    pub min_identity: f64,
    pub timeout: Duration,
    pub executable: String,
}

impl BlastSearch {
    pub fn new<P: Into<PathBuf>>(db_path: P) -> Self {
        Self {
            db_path: db_path.into(),
            max_hits: 5,
            min_identity: 80.0,
            timeout: Duration::from_secs(60),
            executable: "blastn".to_string(),
        }
    }

    /// Checks that blastn can be invoked at all. A missing binary aborts
    /// the run before any per-entry work starts.
    pub fn preflight(&self) -> Result<(), PipelineError> {
        Command::new(&self.executable)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|_| {
                PipelineError::Preflight(format!(
                    "'{}' not found. Install BLAST+ and ensure it is in your PATH",
                    self.executable
                ))
            })?;
        Ok(())
    }

    fn search_inner(&self, sequence: &str) -> io::Result<String> {
        let mut query = tempfile::Builder::new().suffix(".fasta").tempfile()?;
        write!(query, ">query_seq\n{}\n", sequence)?;
        query.flush()?;

        let mut cmd = Command::new(&self.executable);
        cmd.arg("-query")
            .arg(query.path())
            .arg("-db")
            .arg(&self.db_path)
            .arg("-outfmt")
            .arg(BLAST_OUTFMT)
            .arg("-max_target_seqs")
            .arg(self.max_hits.to_string())
            .arg("-perc_identity")
            .arg(self.min_identity.to_string());

        let output = match run_with_timeout(cmd, self.timeout)? {
            Some(output) => output,
            None => {
                return Ok(format!(
                    "Error: blastn timed out after {}s",
                    self.timeout.as_secs()
                ))
            }
        };

        if !output.status.success() {
            log::warn!(
                "blastn exited with {:?}: {}",
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            );
            return Ok("BLAST_Error".to_string());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let best = match stdout.lines().find(|l| !l.trim().is_empty()) {
            Some(line) => line,
            None => return Ok("No_hit".to_string()),
        };

        // blastn reports hits best-score first; the first row wins.
        let cols: Vec<&str> = best.split('\t').collect();
        if cols.len() < 13 {
            return Ok("Parse_Error".to_string());
        }
        let identity: f64 = cols[2].parse().unwrap_or(0.0);
        let label = classify_description(cols[12]);
        log::debug!("best hit at {:.1}% identity -> {}", identity, label);
        Ok(label)
    }
}

impl TaxonomySearch for BlastSearch {
    fn search(&self, sequence: &str) -> String {
        match self.search_inner(sequence) {
            Ok(label) => label,
            Err(e) => format!("Error: {}", e),
        }
    }
}

/// Stage counts reported after annotation.
#[derive(Debug, Clone, Default)]
pub struct AnnotateSummary {
    pub entries: usize,
    pub artifacts_rewritten: usize,
}

/// Runs `search` once per catalog entry and rewrites each artifact with the
/// `taxonomy` field filled in. Entries are independent, so the searches run
/// in parallel; a sentinel classification is stored like any other result.
pub fn annotate_catalog<S>(
    unique_root: &Path,
    search: &S,
) -> Result<AnnotateSummary, PipelineError>
where
    S: TaxonomySearch + ?Sized,
{
    let records = load_unique_records(unique_root)?;
    let entries = records.len();
    log::info!("annotating {} catalog entr(ies)", entries);

    let annotated: Vec<_> = records
        .into_par_iter()
        .map(|(path, mut record)| {
            record.taxonomy = Some(search.search(&record.sequence));
            (path, record)
        })
        .collect();

    let mut rewritten = 0usize;
    for (path, record) in annotated {
        match serde_json::to_string_pretty(&record) {
            Ok(json) => {
                if let Err(e) = fs::write(&path, json) {
                    log::error!("could not rewrite '{}': {}", path.display(), e);
                } else {
                    rewritten += 1;
                }
            }
            Err(e) => log::error!("could not serialize '{}': {}", record.id, e),
        }
    }

    log::info!("taxonomy added to {} artifact(s)", rewritten);
    Ok(AnnotateSummary {
        entries,
        artifacts_rewritten: rewritten,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{aggregate_unique, export_cleaned_records, load_unique_records};

    #[test]
    fn descriptions_bucket_by_keyword() {
        assert_eq!(
            classify_description("Escherichia coli bacterial strain K12"),
            "Bacteria; Escherichia coli"
        );
        assert_eq!(
            classify_description("Saccharomyces cerevisiae fungal isolate"),
            "Fungi; Saccharomyces cerevisiae"
        );
        assert_eq!(
            classify_description("Tobacco mosaic virus RNA"),
            "Virus; Tobacco mosaic"
        );
    }

    #[test]
    fn unmatched_descriptions_fall_back_to_unknown() {
        assert_eq!(
            classify_description("Uncultured organism clone"),
            "Unknown; Uncultured organism"
        );
        assert_eq!(classify_description("mystery"), "Unknown");
        assert_eq!(classify_description(""), "Unknown");
    }

    #[test]
    fn keyword_match_is_case_insensitive() {
        assert_eq!(
            classify_description("BACTERIA sp. nov."),
            "Bacteria; BACTERIA sp."
        );
    }

    #[test]
    fn timed_out_child_is_killed() {
        let mut cmd = Command::new("sleep");
        cmd.arg("5");
        let result = run_with_timeout(cmd, Duration::from_millis(100)).unwrap();
        assert!(result.is_none());
    }

    struct StubSearch;

    impl TaxonomySearch for StubSearch {
        fn search(&self, sequence: &str) -> String {
            format!("Bacteria; Stub organism [{}]", sequence.len())
        }
    }

    #[test]
    fn annotation_rewrites_every_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let cleaned = dir.path().join("cleaned");
        let unique = dir.path().join("unique");
        let ids = vec!["r1".to_string(), "r2".to_string()];
        let seqs = vec!["ACGT".to_string(), "GGCC".to_string()];
        export_cleaned_records(&cleaned, "s1", "reads.fasta", &ids, &seqs, None).unwrap();
        aggregate_unique(&cleaned, &unique).unwrap();

        let summary = annotate_catalog(&unique, &StubSearch).unwrap();
        assert_eq!(summary.entries, 2);
        assert_eq!(summary.artifacts_rewritten, 2);

        for (_, record) in load_unique_records(&unique).unwrap() {
            let taxonomy = record.taxonomy.expect("taxonomy missing after annotation");
            assert!(taxonomy.starts_with("Bacteria; Stub organism"));
        }
    }
}
