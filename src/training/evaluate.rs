//! Ranking and threshold metrics for held-out orders.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::{info, warn};

pub const DEFAULT_THRESHOLD: f64 = 0.5;
const F1_EPS: f64 = 1e-6;

/// Why a metric fell back to a default instead of being computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricStatus {
    /// Only one class present: ROC AUC and AP reported as 0.
    RankingUndefined,
    /// No positives: threshold fixed at 0.5.
    ThresholdDefaulted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalReport {
    pub loss: f64,
    pub roc_auc: f64,
    pub average_precision: f64,
    /// Operating threshold maximizing F1 on the precision-recall curve
    pub threshold: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub positives: usize,
    pub negatives: usize,
    #[serde(default)]
    pub status: Vec<MetricStatus>,
}

impl EvalReport {
    pub fn is_degraded(&self) -> bool {
        !self.status.is_empty()
    }
}

/// One point of the precision-recall curve.
#[derive(Debug, Clone, Copy, PartialEq)]
struct PrPoint {
    threshold: f64,
    precision: f64,
    recall: f64,
}

pub fn evaluate(probabilities: &[f32], labels: &[u8], loss: f64) -> EvalReport {
    let scores: Vec<f64> = probabilities.iter().map(|&p| p as f64).collect();
    let positives = labels.iter().filter(|&&y| y == 1).count();
    let negatives = labels.len() - positives;
    let mut status = Vec::new();

    let (roc_auc, average_precision) = if positives == 0 || negatives == 0 {
        warn!(
            positives = positives,
            negatives = negatives,
            "Only one class present, ranking metrics undefined"
        );
        status.push(MetricStatus::RankingUndefined);
        (0.0, 0.0)
    } else {
        (roc_auc(&scores, labels), average_precision(&scores, labels))
    };

    let threshold = if positives == 0 {
        warn!("No positive examples, using the default threshold");
        status.push(MetricStatus::ThresholdDefaulted);
        DEFAULT_THRESHOLD
    } else {
        best_f1_threshold(&pr_curve(&scores, labels))
    };

    let (precision, recall, f1) = confusion_at(&scores, labels, threshold);

    info!(
        loss = loss,
        roc_auc = roc_auc,
        average_precision = average_precision,
        threshold = threshold,
        f1 = f1,
        "Evaluation complete"
    );

    EvalReport {
        loss,
        roc_auc,
        average_precision,
        threshold,
        precision,
        recall,
        f1,
        positives,
        negatives,
        status,
    }
}

/// Rank-based ROC AUC; tied scores share their average rank.
pub fn roc_auc(scores: &[f64], labels: &[u8]) -> f64 {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].partial_cmp(&scores[b]).unwrap_or(Ordering::Equal));

    let mut ranks = vec![0.0; scores.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        // Ranks are 1-based.
        let avg = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            ranks[idx] = avg;
        }
        i = j + 1;
    }

    let pos = labels.iter().filter(|&&y| y == 1).count() as f64;
    let neg = labels.len() as f64 - pos;
    if pos == 0.0 || neg == 0.0 {
        return 0.0;
    }
    let rank_sum: f64 = ranks
        .iter()
        .zip(labels)
        .filter(|&(_, &y)| y == 1)
        .map(|(r, _)| r)
        .sum();
    (rank_sum - pos * (pos + 1.0) / 2.0) / (pos * neg)
}

/// Step-wise average precision: sum of `(R_k - R_{k-1}) * P_k`.
pub fn average_precision(scores: &[f64], labels: &[u8]) -> f64 {
    let curve = pr_curve(scores, labels);
    let mut prev_recall = 0.0;
    let mut ap = 0.0;
    // Curve is ascending in threshold, so walk it from the top.
    for point in curve.iter().rev() {
        ap += (point.recall - prev_recall) * point.precision;
        prev_recall = point.recall;
    }
    ap
}

/// Points at every distinct score, ascending in threshold, cut at the
/// highest threshold that already reaches full recall.
fn pr_curve(scores: &[f64], labels: &[u8]) -> Vec<PrPoint> {
    let total_pos = labels.iter().filter(|&&y| y == 1).count();
    if total_pos == 0 {
        return Vec::new();
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].partial_cmp(&scores[a]).unwrap_or(Ordering::Equal));

    let mut points = Vec::new();
    let (mut tp, mut fp) = (0usize, 0usize);
    for (k, &idx) in order.iter().enumerate() {
        if labels[idx] == 1 {
            tp += 1;
        } else {
            fp += 1;
        }
        let last_of_tie = order
            .get(k + 1)
            .map_or(true, |&next| scores[next] != scores[idx]);
        if !last_of_tie {
            continue;
        }
        points.push(PrPoint {
            threshold: scores[idx],
            precision: tp as f64 / (tp + fp) as f64,
            recall: tp as f64 / total_pos as f64,
        });
        if tp == total_pos {
            break;
        }
    }
    points.reverse();
    points
}

fn f1(precision: f64, recall: f64) -> f64 {
    2.0 * precision * recall / (precision + recall + F1_EPS)
}

/// First maximizer in ascending threshold order.
fn best_f1_threshold(curve: &[PrPoint]) -> f64 {
    let mut best: Option<(f64, f64)> = None;
    for point in curve {
        let score = f1(point.precision, point.recall);
        if best.map_or(true, |(_, b)| score > b) {
            best = Some((point.threshold, score));
        }
    }
    best.map(|(t, _)| t).unwrap_or(DEFAULT_THRESHOLD)
}

/// Precision, recall and F1 with `score >= threshold` flagged as fraud.
fn confusion_at(scores: &[f64], labels: &[u8], threshold: f64) -> (f64, f64, f64) {
    let (mut tp, mut fp, mut fn_) = (0usize, 0usize, 0usize);
    for (&s, &y) in scores.iter().zip(labels) {
        match (s >= threshold, y == 1) {
            (true, true) => tp += 1,
            (true, false) => fp += 1,
            (false, true) => fn_ += 1,
            (false, false) => {}
        }
    }
    let precision = if tp + fp == 0 {
        0.0
    } else {
        tp as f64 / (tp + fp) as f64
    };
    let recall = if tp + fn_ == 0 {
        0.0
    } else {
        tp as f64 / (tp + fn_) as f64
    };
    (precision, recall, f1(precision, recall))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_class_reports_zero() {
        let report = evaluate(&[0.1, 0.4, 0.9], &[0, 0, 0], 0.3);

        assert_eq!(report.roc_auc, 0.0);
        assert_eq!(report.average_precision, 0.0);
        assert_eq!(report.threshold, DEFAULT_THRESHOLD);
        assert!(report.status.contains(&MetricStatus::RankingUndefined));
        assert!(report.status.contains(&MetricStatus::ThresholdDefaulted));
        assert_eq!(report.loss, 0.3);
    }

    #[test]
    fn test_all_positive_keeps_threshold_search() {
        let report = evaluate(&[0.2, 0.8], &[1, 1], 0.1);
        assert_eq!(report.status, vec![MetricStatus::RankingUndefined]);
        assert!((report.threshold - 0.2).abs() < 1e-6);
        assert_eq!(report.recall, 1.0);
    }

    #[test]
    fn test_roc_auc_known_values() {
        let labels = [0, 0, 1, 1];
        assert_eq!(roc_auc(&[0.1, 0.4, 0.35, 0.8], &labels), 0.75);
        assert_eq!(roc_auc(&[0.1, 0.2, 0.3, 0.4], &labels), 1.0);
        // Ties count half.
        assert_eq!(roc_auc(&[0.5, 0.5, 0.5, 0.5], &labels), 0.5);
    }

    #[test]
    fn test_average_precision_known_value() {
        let ap = average_precision(&[0.1, 0.4, 0.35, 0.8], &[0, 0, 1, 1]);
        assert!((ap - 0.8333333).abs() < 1e-6);
    }

    #[test]
    fn test_pr_curve_truncated_at_full_recall() {
        let curve = pr_curve(&[0.1, 0.4, 0.35, 0.8], &[0, 0, 1, 1]);
        let thresholds: Vec<f64> = curve.iter().map(|p| p.threshold).collect();
        assert_eq!(thresholds, vec![0.35, 0.4, 0.8]);
        assert_eq!(curve[0].recall, 1.0);
    }

    #[test]
    fn test_threshold_is_first_f1_maximizer() {
        // F1 at 0.8 = 2/3 with eps; at 0.35 = 0.8.
        let report = evaluate(&[0.1, 0.4, 0.35, 0.8], &[0, 0, 1, 1], 0.0);
        assert!((report.threshold - 0.35).abs() < 1e-6);
        assert!((report.precision - 2.0 / 3.0).abs() < 1e-6);
        assert_eq!(report.recall, 1.0);
        assert!(report.status.is_empty());
    }
}
