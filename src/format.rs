// src/format.rs

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use flate2::read::MultiGzDecoder;

use crate::errors::FormatError;
use crate::types::SequenceRecord;

/// Detected format of a sequence file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceFormat {
    Fasta,
    /// `verified` is false when the whole-stream record-count check was
    /// skipped (compressed input with verification disabled).
    Fastq { verified: bool },
}

impl SequenceFormat {
    pub fn is_fastq(&self) -> bool {
        matches!(self, SequenceFormat::Fastq { .. })
    }
}

fn is_gzipped(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("gz"))
        .unwrap_or(false)
}

/// Opens a sequence file for line reading, decompressing transparently if
/// the path ends with ".gz".
pub fn open_reader(path: &Path) -> io::Result<Box<dyn BufRead>> {
    let f = File::open(path)?;
    if is_gzipped(path) {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(f))))
    } else {
        Ok(Box::new(BufReader::new(f)))
    }
}

fn open_for_detection(path: &Path) -> Result<Box<dyn BufRead>, FormatError> {
    match File::open(path) {
        Ok(f) => {
            if is_gzipped(path) {
                Ok(Box::new(BufReader::new(MultiGzDecoder::new(f))))
            } else {
                Ok(Box::new(BufReader::new(f)))
            }
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(FormatError::NotFound),
        Err(e) => Err(FormatError::Unreadable(e)),
    }
}

/// Classifies a file as FASTA or FASTQ by inspecting up to the first 5
/// non-blank lines, after transparent decompression.
///
/// FASTQ classification normally re-scans the stream to check that the
/// non-blank line count is a multiple of 4. For compressed input that
/// re-scan only runs when `verify_compressed` is set; otherwise the result
/// is `Fastq { verified: false }`.
pub fn detect_format(path: &Path, verify_compressed: bool) -> Result<SequenceFormat, FormatError> {
    let reader = open_for_detection(path)?;

    let mut head: Vec<String> = Vec::with_capacity(5);
    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if !line.is_empty() {
            head.push(line.to_string());
        }
        if head.len() == 5 {
            break;
        }
    }

    if head.is_empty() {
        return Err(FormatError::Empty);
    }

    if head[0].starts_with('>') {
        if head.len() > 1 && (head[1].starts_with('+') || head[1].starts_with('@')) {
            return Err(FormatError::MixedFasta);
        }
        return Ok(SequenceFormat::Fasta);
    }

    if head[0].starts_with('@') {
        if head.len() < 4 {
            return Err(FormatError::FastqTooFewLines);
        }
        if !head[2].starts_with('+') {
            return Err(FormatError::FastqSeparator);
        }
        if is_gzipped(path) && !verify_compressed {
            // Re-scanning a compressed stream means a second full decode;
            // callers opt in via `verify_compressed`.
            return Ok(SequenceFormat::Fastq { verified: false });
        }
        let reader = open_for_detection(path)?;
        let mut non_blank = 0usize;
        for line in reader.lines() {
            if !line?.trim().is_empty() {
                non_blank += 1;
            }
        }
        if non_blank % 4 != 0 {
            return Err(FormatError::FastqLineCount);
        }
        return Ok(SequenceFormat::Fastq { verified: true });
    }

    Err(FormatError::Unknown)
}

fn basename(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Reads one line, returning `None` at EOF. A read failure mid-stream is
/// logged and also ends the stream; validation has already classified the
/// file, so this only trips on e.g. truncated gzip members.
fn read_line(reader: &mut dyn BufRead, buf: &mut String, path: &str) -> Option<String> {
    buf.clear();
    match reader.read_line(buf) {
        Ok(0) => None,
        Ok(_) => Some(buf.trim_end().to_string()),
        Err(e) => {
            log::warn!("read error in '{}': {}", path, e);
            None
        }
    }
}

/// Lazy iterator over FASTQ records: 4 lines per record, quality decoded as
/// one code-point ordinal per character. A truncated trailing block is never
/// emitted.
pub struct FastqRecords {
    reader: Box<dyn BufRead>,
    sample_name: String,
    source_file: String,
    buf: String,
}

impl FastqRecords {
    pub fn new(reader: Box<dyn BufRead>, sample_name: &str, source_file: &str) -> Self {
        Self {
            reader,
            sample_name: sample_name.to_string(),
            source_file: source_file.to_string(),
            buf: String::new(),
        }
    }

    pub fn from_path(path: &Path, sample_name: &str) -> io::Result<Self> {
        let reader = open_reader(path)?;
        Ok(Self::new(reader, sample_name, &basename(path)))
    }
}

impl Iterator for FastqRecords {
    type Item = SequenceRecord;

    fn next(&mut self) -> Option<SequenceRecord> {
        // 1) header, skipping blanks and anything that is not a record start
        let header = loop {
            let line = read_line(&mut *self.reader, &mut self.buf, &self.source_file)?;
            if line.starts_with('@') {
                break line;
            }
        };

        // 2) sequence, 3) separator, 4) quality; EOF in any of them means a
        // partial record, which is dropped.
        let seq = read_line(&mut *self.reader, &mut self.buf, &self.source_file)?;
        let _plus = read_line(&mut *self.reader, &mut self.buf, &self.source_file)?;
        let qual = read_line(&mut *self.reader, &mut self.buf, &self.source_file)?;

        let id = header[1..]
            .split_whitespace()
            .next()
            .unwrap_or("")
            .to_string();
        let scores: Vec<u32> = qual.chars().map(|c| c as u32).collect();

        Some(SequenceRecord {
            id,
            sequence: seq,
            quality: Some(scores),
            sample_name: self.sample_name.clone(),
            source_file: self.source_file.clone(),
        })
    }
}

/// Lazy iterator over FASTA records, accumulating multi-line sequence blocks
/// between header lines. Headers with no body are skipped.
pub struct FastaRecords {
    reader: Box<dyn BufRead>,
    sample_name: String,
    source_file: String,
    buf: String,
    pending_header: Option<String>,
    done: bool,
}

impl FastaRecords {
    pub fn new(reader: Box<dyn BufRead>, sample_name: &str, source_file: &str) -> Self {
        Self {
            reader,
            sample_name: sample_name.to_string(),
            source_file: source_file.to_string(),
            buf: String::new(),
            pending_header: None,
            done: false,
        }
    }

    pub fn from_path(path: &Path, sample_name: &str) -> io::Result<Self> {
        let reader = open_reader(path)?;
        Ok(Self::new(reader, sample_name, &basename(path)))
    }

    fn record(&self, header: String, body: String) -> SequenceRecord {
        let id = header[1..]
            .split_whitespace()
            .next()
            .unwrap_or("")
            .to_string();
        SequenceRecord {
            id,
            sequence: body,
            quality: None,
            sample_name: self.sample_name.clone(),
            source_file: self.source_file.clone(),
        }
    }
}

impl Iterator for FastaRecords {
    type Item = SequenceRecord;

    fn next(&mut self) -> Option<SequenceRecord> {
        if self.done {
            return None;
        }

        // Find the record's header, either stashed from the previous call or
        // further down the stream.
        let mut header = loop {
            match self.pending_header.take() {
                Some(h) => break h,
                None => {
                    let line = read_line(&mut *self.reader, &mut self.buf, &self.source_file);
                    match line {
                        Some(l) if l.trim().starts_with('>') => {
                            self.pending_header = Some(l.trim().to_string());
                        }
                        Some(_) => continue,
                        None => {
                            self.done = true;
                            return None;
                        }
                    }
                }
            }
        };

        // Accumulate body lines until the next header or EOF. Bodiless
        // headers are skipped rather than emitted.
        let mut body = String::new();
        loop {
            match read_line(&mut *self.reader, &mut self.buf, &self.source_file) {
                Some(line) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    if line.starts_with('>') {
                        if body.is_empty() {
                            header = line.to_string();
                            continue;
                        }
                        self.pending_header = Some(line.to_string());
                        return Some(self.record(header, body));
                    }
                    body.push_str(line);
                }
                None => {
                    self.done = true;
                    if body.is_empty() {
                        return None;
                    }
                    return Some(self.record(header, body));
                }
            }
        }
    }
}

/// Extracts ids, sequences and per-base scores from a FASTQ file as three
/// parallel vectors, the shape the quality cutoff engine consumes.
pub fn extract_fastq(
    path: &Path,
    sample_name: &str,
) -> Result<(Vec<String>, Vec<String>, Vec<Vec<u32>>), FormatError> {
    let records = FastqRecords::from_path(path, sample_name)?;
    let mut ids = Vec::new();
    let mut seqs = Vec::new();
    let mut scores = Vec::new();
    for rec in records {
        ids.push(rec.id);
        seqs.push(rec.sequence);
        scores.push(rec.quality.unwrap_or_default());
    }
    Ok((ids, seqs, scores))
}

/// Extracts ids and sequences from a FASTA file as two parallel vectors.
pub fn extract_fasta(
    path: &Path,
    sample_name: &str,
) -> Result<(Vec<String>, Vec<String>), FormatError> {
    let records = FastaRecords::from_path(path, sample_name)?;
    let mut ids = Vec::new();
    let mut seqs = Vec::new();
    for rec in records {
        ids.push(rec.id);
        seqs.push(rec.sequence);
    }
    Ok((ids, seqs))
}

/// Re-detects the format of `path` and yields only its sequence strings,
/// ignoring quality. This is the raw-counting path of the matrix builder.
pub fn extract_sequences(path: &Path, verify_compressed: bool) -> Result<Vec<String>, FormatError> {
    let format = detect_format(path, verify_compressed)?;
    let seqs = match format {
        SequenceFormat::Fasta => FastaRecords::from_path(path, "")?
            .map(|r| r.sequence)
            .collect(),
        SequenceFormat::Fastq { .. } => FastqRecords::from_path(path, "")?
            .map(|r| r.sequence)
            .collect(),
    };
    Ok(seqs)
}

/// Converts a validated input file into `out_dir`: FASTA is copied through
/// (decompressed), FASTQ is rewritten dropping separator and quality lines
/// with the `@` marker swapped for `>`. Validation failures are returned
/// unchanged so callers can report the parser's reason.
pub fn convert_to_fasta(
    input: &Path,
    out_dir: &Path,
    verify_compressed: bool,
) -> Result<PathBuf, FormatError> {
    let format = detect_format(input, verify_compressed)?;

    std::fs::create_dir_all(out_dir)?;
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "converted".to_string());
    let out_path = out_dir.join(format!("{}.fasta", stem));

    let mut reader = open_reader(input)?;
    let out = File::create(&out_path)?;
    let mut writer = BufWriter::new(out);

    match format {
        SequenceFormat::Fasta => {
            io::copy(&mut reader, &mut writer)?;
        }
        SequenceFormat::Fastq { .. } => {
            let mut buf = String::new();
            loop {
                buf.clear();
                if reader.read_line(&mut buf)? == 0 {
                    break;
                }
                let id_line = buf.trim_end().to_string();

                buf.clear();
                if reader.read_line(&mut buf)? == 0 {
                    break;
                }
                let seq_line = buf.trim_end().to_string();

                // separator and quality lines are discarded
                buf.clear();
                if reader.read_line(&mut buf)? == 0 {
                    break;
                }
                buf.clear();
                reader.read_line(&mut buf)?;

                writeln!(writer, ">{}", id_line.trim_start_matches('@'))?;
                writeln!(writer, "{}", seq_line)?;
            }
        }
    }
    writer.flush()?;

    log::info!("converted '{}' -> '{}'", input.display(), out_path.display());
    Ok(out_path)
}
