use std::collections::HashMap;

const BLEU_MAX_N: usize = 4;

pub fn edit_distance<T: PartialEq>(a: &[T], b: &[T]) -> usize {
    let mut prev = (0..=b.len()).collect::<Vec<_>>();
    let mut curr = vec![0; b.len() + 1];
    for (i, x) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, y) in b.iter().enumerate() {
            let substitute = prev[j] + usize::from(x != y);
            curr[j + 1] = substitute.min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

fn error_rate<T: PartialEq>(pairs: impl Iterator<Item = (Vec<T>, Vec<T>)>) -> f64 {
    let (errors, total) = pairs.fold((0usize, 0usize), |(errors, total), (pred, reference)| {
        (errors + edit_distance(&pred, &reference), total + reference.len())
    });
    errors as f64 / total.max(1) as f64
}

/// Total character edits over total reference characters.
pub fn char_error_rate(predicted: &[String], expected: &[String]) -> f64 {
    error_rate(
        predicted
            .iter()
            .zip(expected)
            .map(|(p, e)| (p.chars().collect(), e.chars().collect())),
    )
}

pub fn word_error_rate(predicted: &[String], expected: &[String]) -> f64 {
    error_rate(
        predicted
            .iter()
            .zip(expected)
            .map(|(p, e)| (p.split_whitespace().collect(), e.split_whitespace().collect())),
    )
}

fn ngram_counts<'t, 'w>(tokens: &'t [&'w str], n: usize) -> HashMap<&'t [&'w str], usize> {
    let mut counts = HashMap::new();
    for gram in tokens.windows(n) {
        *counts.entry(gram).or_insert(0) += 1;
    }
    counts
}

/// Corpus BLEU-4 with uniform weights, no smoothing and a brevity penalty;
/// one reference per prediction.
pub fn bleu_score(predicted: &[String], expected: &[String]) -> f64 {
    let mut matches = [0usize; BLEU_MAX_N];
    let mut possible = [0usize; BLEU_MAX_N];
    let mut pred_len = 0usize;
    let mut ref_len = 0usize;

    for (pred, reference) in predicted.iter().zip(expected) {
        let pred = pred.split_whitespace().collect::<Vec<_>>();
        let reference = reference.split_whitespace().collect::<Vec<_>>();
        pred_len += pred.len();
        ref_len += reference.len();

        for n in 1..=BLEU_MAX_N {
            let pred_counts = ngram_counts(&pred, n);
            let ref_counts = ngram_counts(&reference, n);
            matches[n - 1] += pred_counts
                .iter()
                .map(|(gram, count)| (*count).min(ref_counts.get(gram).copied().unwrap_or(0)))
                .sum::<usize>();
            possible[n - 1] += pred.len().saturating_sub(n - 1);
        }
    }

    if matches.iter().any(|&m| m == 0) {
        return 0.0;
    }
    let log_precision = matches
        .iter()
        .zip(&possible)
        .map(|(&m, &p)| (m as f64 / p as f64).ln())
        .sum::<f64>()
        / BLEU_MAX_N as f64;
    let brevity_penalty = if pred_len > ref_len {
        1.0
    } else {
        (1.0 - ref_len as f64 / pred_len as f64).exp()
    };
    brevity_penalty * log_precision.exp()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorpusMetrics {
    pub cer: f64,
    pub wer: f64,
    pub bleu: f64,
}

impl CorpusMetrics {
    pub fn compute(predicted: &[String], expected: &[String]) -> Self {
        Self {
            cer: char_error_rate(predicted, expected),
            wer: word_error_rate(predicted, expected),
            bleu: bleu_score(predicted, expected),
        }
    }
}
