// src/samples.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::PipelineError;
use crate::format::detect_format;

/// Extensions considered sequence input, with or without a trailing ".gz".
const ACCEPTED_SUFFIXES: [&str; 8] = [
    ".fasta",
    ".fa",
    ".fastq",
    ".fq",
    ".fasta.gz",
    ".fa.gz",
    ".fastq.gz",
    ".fq.gz",
];

/// A named collection of raw input files. `files` point at the canonical
/// raw-storage copies; the sample is immutable once discovered.
#[derive(Debug, Clone)]
pub struct Sample {
    pub name: String,
    pub files: Vec<PathBuf>,
}

fn has_accepted_suffix(path: &Path) -> bool {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    ACCEPTED_SUFFIXES.iter().any(|suf| name.ends_with(suf))
}

/// File name with the recognized sequence suffix removed: "s1.fastq.gz"
/// names the sample "s1".
fn sample_stem(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let lower = name.to_lowercase();
    for suf in ACCEPTED_SUFFIXES {
        if lower.ends_with(suf) {
            return name[..name.len() - suf.len()].to_string();
        }
    }
    name
}

fn is_valid_input(path: &Path, verify_compressed: bool) -> bool {
    match detect_format(path, verify_compressed) {
        Ok(_) => true,
        Err(reason) => {
            log::warn!("skipping '{}': {}", path.display(), reason);
            false
        }
    }
}

fn accepted_files_in(dir: &Path, verify_compressed: bool) -> Result<Vec<PathBuf>, PipelineError> {
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && has_accepted_suffix(p))
        .collect();
    entries.sort();
    Ok(entries
        .into_iter()
        .filter(|p| is_valid_input(p, verify_compressed))
        .collect())
}

fn copy_into_raw(
    raw_root: &Path,
    sample: &str,
    files: &[PathBuf],
) -> Result<Vec<PathBuf>, PipelineError> {
    let dest_dir = raw_root.join(sample);
    fs::create_dir_all(&dest_dir)?;
    let mut copied = Vec::with_capacity(files.len());
    for file in files {
        let dest = dest_dir.join(file.file_name().unwrap_or_default());
        fs::copy(file, &dest)?;
        copied.push(dest);
    }
    Ok(copied)
}

/// Discovers samples from `input` and copies every valid file into
/// `<raw_root>/<sample>/`.
///
/// Grouping follows how the input was supplied: a single file becomes one
/// sample named by its stem; a directory of files becomes one sample named
/// by the directory; each subdirectory becomes a sample of its own. Files
/// failing format validation are logged and excluded. Samples come back
/// sorted by name.
pub fn discover_samples(
    input: &Path,
    raw_root: &Path,
    verify_compressed: bool,
) -> Result<Vec<Sample>, PipelineError> {
    let mut samples = Vec::new();

    if input.is_file() {
        if has_accepted_suffix(input) && is_valid_input(input, verify_compressed) {
            let name = sample_stem(input);
            let files = copy_into_raw(raw_root, &name, &[input.to_path_buf()])?;
            samples.push(Sample { name, files });
        }
    } else if input.is_dir() {
        let direct = accepted_files_in(input, verify_compressed)?;
        if !direct.is_empty() {
            let name = input
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "sample".to_string());
            let files = copy_into_raw(raw_root, &name, &direct)?;
            samples.push(Sample { name, files });
        }

        let mut subdirs: Vec<PathBuf> = fs::read_dir(input)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        subdirs.sort();
        for subdir in subdirs {
            let in_sub = accepted_files_in(&subdir, verify_compressed)?;
            if in_sub.is_empty() {
                continue;
            }
            let name = subdir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let files = copy_into_raw(raw_root, &name, &in_sub)?;
            samples.push(Sample { name, files });
        }
    }

    samples.sort_by(|a, b| a.name.cmp(&b.name));
    for sample in &samples {
        log::info!("sample '{}': {} file(s)", sample.name, sample.files.len());
    }
    Ok(samples)
}
