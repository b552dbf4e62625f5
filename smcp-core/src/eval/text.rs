//! Text generation metrics: corpus BLEU-4, ROUGE-1/2/L and perplexity.

use super::{MetricReport, f_score, ratio};
use crate::error::{SmcpError, ValidationError};
use crate::inference::backends::{Prediction, canonical_number};
use crate::types::Domain;
use std::collections::HashMap;

const BLEU_MAX_N: usize = 4;

/// Lowercase whitespace tokenization shared by every text metric.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split_whitespace().map(str::to_lowercase).collect()
}

pub fn compute(
    predictions: &[Prediction],
    targets: &[String],
    token_probabilities: Option<&[Vec<f64>]>,
) -> Result<MetricReport, SmcpError> {
    let candidates = predictions
        .iter()
        .enumerate()
        .map(|(i, p)| predicted_text(i + 1, p).map(|t| tokenize(&t)))
        .collect::<Result<Vec<_>, _>>()?;
    let references: Vec<Vec<String>> = targets.iter().map(|t| tokenize(t)).collect();

    let mut report = MetricReport::default();

    let bleu = corpus_bleu(&candidates, &references);
    if bleu == 0.0 {
        report.flag("bleu: an n-gram order has no matches; reported as 0");
    }
    report.insert("bleu", bleu);

    let rows = candidates.len().max(1) as f64;
    let (mut r1, mut r2, mut rl) = (0.0, 0.0, 0.0);
    for (cand, reference) in candidates.iter().zip(&references) {
        r1 += rouge_n(cand, reference, 1);
        r2 += rouge_n(cand, reference, 2);
        rl += rouge_l(cand, reference);
    }
    let (r1, r2, rl) = (r1 / rows, r2 / rows, rl / rows);
    report.insert("rouge1", r1);
    report.insert("rouge2", r2);
    report.insert("rouge_l", rl);
    report.insert("rouge", (r1 + r2 + rl) / 3.0);

    match token_probabilities {
        Some(distribution) => {
            let value = perplexity(distribution);
            if value.is_infinite() {
                report.flag("perplexity: a reference token received zero probability");
            }
            report.insert("perplexity", value);
        }
        None => report.flag("perplexity: model exposes no token distribution; not reported"),
    }

    Ok(report)
}

fn predicted_text(row: usize, prediction: &Prediction) -> Result<String, SmcpError> {
    match prediction {
        Prediction::Text(s) | Prediction::Label(s) => Ok(s.clone()),
        Prediction::Value(v) => Ok(canonical_number(*v)),
        Prediction::Mask(_) => Err(ValidationError::IncompatiblePrediction {
            row,
            domain: Domain::Text,
            found: prediction.kind().to_string(),
        }
        .into()),
    }
}

fn ngram_counts(tokens: &[String], n: usize) -> HashMap<&[String], usize> {
    let mut counts = HashMap::new();
    if n > 0 && tokens.len() >= n {
        for gram in tokens.windows(n) {
            *counts.entry(gram).or_insert(0) += 1;
        }
    }
    counts
}

/// Matches of candidate n-grams, each clipped by its reference count.
fn clipped_overlap(cand: &[String], reference: &[String], n: usize) -> usize {
    let ref_counts = ngram_counts(reference, n);
    ngram_counts(cand, n)
        .into_iter()
        .map(|(gram, count)| count.min(ref_counts.get(gram).copied().unwrap_or(0)))
        .sum()
}

/// Corpus BLEU-4 on a 0-1 scale, without smoothing.
pub fn corpus_bleu(candidates: &[Vec<String>], references: &[Vec<String>]) -> f64 {
    let cand_len: usize = candidates.iter().map(Vec::len).sum();
    let ref_len: usize = references.iter().map(Vec::len).sum();
    if cand_len == 0 {
        return 0.0;
    }

    let mut log_precision = 0.0;
    for n in 1..=BLEU_MAX_N {
        let matches: usize = candidates
            .iter()
            .zip(references)
            .map(|(c, r)| clipped_overlap(c, r, n))
            .sum();
        let total: usize = candidates.iter().map(|c| c.len().saturating_sub(n - 1)).sum();
        if matches == 0 || total == 0 {
            return 0.0;
        }
        log_precision += (matches as f64 / total as f64).ln() / BLEU_MAX_N as f64;
    }

    let brevity_penalty = if cand_len > ref_len {
        1.0
    } else {
        (1.0 - ref_len as f64 / cand_len as f64).exp()
    };
    brevity_penalty * log_precision.exp()
}

/// ROUGE-N F1 of one candidate against one reference.
pub fn rouge_n(cand: &[String], reference: &[String], n: usize) -> f64 {
    let overlap = clipped_overlap(cand, reference, n) as f64;
    let cand_total = cand.len().saturating_sub(n - 1) as f64;
    let ref_total = reference.len().saturating_sub(n - 1) as f64;
    f_score(ratio(overlap, cand_total), ratio(overlap, ref_total))
}

/// ROUGE-L F1 from the longest common subsequence.
pub fn rouge_l(cand: &[String], reference: &[String]) -> f64 {
    let lcs = lcs_len(cand, reference) as f64;
    f_score(
        ratio(lcs, cand.len() as f64),
        ratio(lcs, reference.len() as f64),
    )
}

fn lcs_len(a: &[String], b: &[String]) -> usize {
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];
    for x in a {
        for (j, y) in b.iter().enumerate() {
            curr[j + 1] = if x == y {
                prev[j] + 1
            } else {
                prev[j + 1].max(curr[j])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// `exp(-mean ln p)` over every reference token.
pub fn perplexity(distribution: &[Vec<f64>]) -> f64 {
    let mut log_sum = 0.0;
    let mut count = 0usize;
    for p in distribution.iter().flatten() {
        if *p <= 0.0 {
            return f64::INFINITY;
        }
        log_sum += p.ln();
        count += 1;
    }
    if count == 0 {
        return f64::INFINITY;
    }
    (-log_sum / count as f64).exp()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(values: &[&str]) -> Vec<Prediction> {
        values.iter().map(|v| Prediction::Text(v.to_string())).collect()
    }

    fn targets(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_tokenize_lowercases() {
        assert_eq!(tokenize("  The Cat\tsat "), vec!["the", "cat", "sat"]);
    }

    #[test]
    fn test_identical_text_scores_one() {
        let report = compute(
            &texts(&["the cat sat on the mat"]),
            &targets(&["The cat sat on the mat"]),
            Some(&[vec![1.0; 6]]),
        )
        .unwrap();
        assert!((report.get("bleu").unwrap() - 1.0).abs() < 1e-12);
        assert!((report.get("rouge").unwrap() - 1.0).abs() < 1e-12);
        assert_eq!(report.get("perplexity"), Some(1.0));
        assert!(report.flags.is_empty());
    }

    #[test]
    fn test_short_candidate_bleu_zero_flagged() {
        let report = compute(&texts(&["cat sat"]), &targets(&["the cat sat down"]), None).unwrap();
        assert_eq!(report.get("bleu"), Some(0.0));
        assert!(report.flags.iter().any(|f| f.starts_with("bleu")));
        assert!(report.get("perplexity").is_none());
        assert!(report.flags.iter().any(|f| f.starts_with("perplexity")));
    }

    #[test]
    fn test_rouge_partial_overlap() {
        let cand = tokenize("the cat sat");
        let reference = tokenize("the cat ran");
        assert!((rouge_n(&cand, &reference, 1) - 2.0 / 3.0).abs() < 1e-12);
        assert!((rouge_n(&cand, &reference, 2) - 0.5).abs() < 1e-12);
        assert!((rouge_l(&cand, &reference) - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_perplexity() {
        assert!((perplexity(&[vec![0.5, 0.5], vec![0.5]]) - 2.0).abs() < 1e-12);
        assert_eq!(perplexity(&[vec![0.5, 0.0]]), f64::INFINITY);
    }

    #[test]
    fn test_brevity_penalty() {
        let cand = vec![tokenize("a b c d")];
        let reference = vec![tokenize("a b c d e f g h")];
        let bleu = corpus_bleu(&cand, &reference);
        assert!((bleu - (-1.0f64).exp()).abs() < 1e-12);
    }
}
