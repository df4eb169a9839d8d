// src/quality.rs

use crate::errors::QualityError;

/// Default candidate cutoffs, in preference order for tie-breaking.
pub const DEFAULT_THRESHOLDS: [u32; 4] = [10, 15, 20, 30];

/// What `analyze` reports back: the fraction of reads passing each candidate
/// threshold and the cutoff that was selected. Advisory output; filtering
/// only needs the stored cutoff.
#[derive(Debug, Clone)]
pub struct CutoffReport {
    /// (threshold, percent of reads whose every base meets it), in the
    /// candidate list's order.
    pub percent_per_cut: Vec<(u32, f64)>,
    pub suggested_cut: u32,
}

/// Selects a single quality cutoff for one batch of reads and filters bases
/// below it. One instance analyzes exactly one batch; reuse across batches
/// is the caller's call, not a re-analysis.
#[derive(Debug, Clone)]
pub struct QualityCutoff {
    pub thresholds: Vec<u32>,
    pub cutoff: Option<u32>,
}

impl Default for QualityCutoff {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLDS.to_vec())
    }
}

impl QualityCutoff {
    pub fn new(thresholds: Vec<u32>) -> Self {
        Self {
            thresholds,
            cutoff: None,
        }
    }

    /// Scores each candidate threshold against the batch and stores the one
    /// closest to the mean of all base scores. Ties go to the earlier
    /// candidate in the list.
    ///
    /// Fails on an empty batch or one with no non-empty score list, which
    /// signals a caller error (FASTA-only input must not reach this).
    pub fn analyze(&mut self, quality_scores: &[Vec<u32>]) -> Result<CutoffReport, QualityError> {
        let usable: Vec<&Vec<u32>> = quality_scores.iter().filter(|q| !q.is_empty()).collect();
        if usable.is_empty() {
            return Err(QualityError::EmptyBatch);
        }

        let mut percent_per_cut = Vec::with_capacity(self.thresholds.len());
        for &thresh in &self.thresholds {
            let passes = usable
                .iter()
                .filter(|q| q.iter().all(|&s| s >= thresh))
                .count();
            let percent = 100.0 * passes as f64 / usable.len() as f64;
            percent_per_cut.push((thresh, percent));
        }

        let total: u64 = usable.iter().map(|q| q.iter().map(|&s| s as u64).sum::<u64>()).sum();
        let base_count: u64 = usable.iter().map(|q| q.len() as u64).sum();
        let mean_score = total as f64 / base_count as f64;

        let mut best = self.thresholds[0];
        let mut best_dist = (mean_score - best as f64).abs();
        for &thresh in &self.thresholds[1..] {
            let dist = (mean_score - thresh as f64).abs();
            if dist < best_dist {
                best = thresh;
                best_dist = dist;
            }
        }

        self.cutoff = Some(best);
        log::debug!(
            "quality batch: {} reads, mean score {:.2}, cutoff {}",
            usable.len(),
            mean_score,
            best
        );

        Ok(CutoffReport {
            percent_per_cut,
            suggested_cut: best,
        })
    }

    /// Removes every base scoring below the cutoff, per base rather than as
    /// an end-trim, so a read can lose internal bases and come out as a
    /// shorter composite. Reads left empty are dropped; survivors keep
    /// their input order.
    pub fn cut(
        &self,
        seqs: &[String],
        quality_scores: &[Vec<u32>],
    ) -> Result<(Vec<String>, Vec<Vec<u32>>), QualityError> {
        let cutoff = self.cutoff.ok_or(QualityError::CutoffUnset)?;

        let mut seqs_kept = Vec::new();
        let mut scores_kept = Vec::new();
        for (seq, scores) in seqs.iter().zip(quality_scores) {
            let mut new_seq = String::with_capacity(seq.len());
            let mut new_scores = Vec::with_capacity(scores.len());
            for (base, &score) in seq.chars().zip(scores) {
                if score >= cutoff {
                    new_seq.push(base);
                    new_scores.push(score);
                }
            }
            if !new_seq.is_empty() {
                seqs_kept.push(new_seq);
                scores_kept.push(new_scores);
            }
        }
        Ok((seqs_kept, scores_kept))
    }
}

/// Per-read GC percentage; an empty read scores 0.
pub fn gc_content(sequences: &[String]) -> Vec<f64> {
    sequences
        .iter()
        .map(|s| {
            if s.is_empty() {
                return 0.0;
            }
            let gc = s
                .chars()
                .filter(|c| matches!(c.to_ascii_uppercase(), 'G' | 'C'))
                .count();
            100.0 * gc as f64 / s.len() as f64
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gc_content_is_per_read() {
        let seqs = vec!["GGCC".to_string(), "atgc".to_string(), String::new()];
        let gc = gc_content(&seqs);
        assert!((gc[0] - 100.0).abs() < 1e-9);
        assert!((gc[1] - 50.0).abs() < 1e-9);
        assert!((gc[2] - 0.0).abs() < 1e-9);
    }

    #[test]
    fn uniform_batch_picks_nearest_threshold_with_list_order_tiebreak() {
        // Every base at 25: |25-20| == |25-30|, and 20 comes first.
        let batch = vec![vec![25; 10], vec![25; 8], vec![25; 12]];
        let mut cutter = QualityCutoff::default();
        let report = cutter.analyze(&batch).unwrap();

        assert_eq!(report.suggested_cut, 20);
        assert_eq!(cutter.cutoff, Some(20));
    }

    #[test]
    fn pass_percentages_are_per_read_not_per_base() {
        let batch = vec![vec![30, 30, 30], vec![30, 5, 30]];
        let mut cutter = QualityCutoff::default();
        let report = cutter.analyze(&batch).unwrap();

        // Only the first read has every base >= 10.
        let (thresh, pct) = report.percent_per_cut[0];
        assert_eq!(thresh, 10);
        assert!((pct - 50.0).abs() < 1e-9);
    }

    #[test]
    fn cut_removes_internal_low_quality_bases() {
        let seqs = vec!["ACGT".to_string()];
        let scores = vec![vec![5, 25, 25, 5]];
        let cutter = QualityCutoff {
            thresholds: DEFAULT_THRESHOLDS.to_vec(),
            cutoff: Some(20),
        };

        let (seqs_kept, scores_kept) = cutter.cut(&seqs, &scores).unwrap();
        assert_eq!(seqs_kept, vec!["CG".to_string()]);
        assert_eq!(scores_kept, vec![vec![25, 25]]);
    }

    #[test]
    fn emptied_reads_are_dropped_in_order() {
        let seqs = vec!["AA".to_string(), "CC".to_string(), "GG".to_string()];
        let scores = vec![vec![5, 5], vec![30, 30], vec![30, 5]];
        let cutter = QualityCutoff {
            thresholds: DEFAULT_THRESHOLDS.to_vec(),
            cutoff: Some(20),
        };

        let (seqs_kept, _) = cutter.cut(&seqs, &scores).unwrap();
        assert_eq!(seqs_kept, vec!["CC".to_string(), "G".to_string()]);
    }

    #[test]
    fn analyze_rejects_fasta_style_batches() {
        let mut cutter = QualityCutoff::default();
        assert!(matches!(
            cutter.analyze(&[]),
            Err(QualityError::EmptyBatch)
        ));
        assert!(matches!(
            cutter.analyze(&[vec![], vec![]]),
            Err(QualityError::EmptyBatch)
        ));
    }

    #[test]
    fn cut_requires_prior_analysis() {
        let cutter = QualityCutoff::default();
        assert!(matches!(
            cutter.cut(&[], &[]),
            Err(QualityError::CutoffUnset)
        ));
    }
}
