//! Screens user text for personally identifiable information.
//!
//! Token predictions from a [`TokenClassifier`] are merged into entity spans and
//! filtered by confidence. A message with any surviving span is rejected as-is;
//! nothing is redacted automatically.

use crate::config::{validate_threshold, PiiConfig};
use crate::error::RagError;
use crate::models::PiiFinding;
use crate::traits::{TokenClassifier, TokenPrediction};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct PiiScreening {
    pub is_safe: bool,
    /// Always the original message.
    pub text: String,
    pub findings: Vec<PiiFinding>,
}

impl PiiScreening {
    /// Tells the user which entities caused a rejection.
    pub fn rejection_message(&self) -> Option<String> {
        if self.is_safe {
            return None;
        }
        let described = self
            .findings
            .iter()
            .map(|finding| {
                format!(
                    "{} ({}, {:.2})",
                    finding.text, finding.category, finding.confidence
                )
            })
            .collect::<Vec<_>>()
            .join(", ");
        Some(format!(
            "Potential PII detected in your message. Please remove personal information such as: {described}"
        ))
    }
}

#[derive(Debug, Clone, PartialEq)]
struct EntitySpan {
    start: usize,
    end: usize,
    category: String,
    confidence: f32,
}

#[derive(Clone)]
pub struct PiiDetector {
    classifier: Arc<dyn TokenClassifier>,
    merge_gap_chars: usize,
    categories: Vec<String>,
}

impl PiiDetector {
    pub fn new(classifier: Arc<dyn TokenClassifier>, config: &PiiConfig) -> Self {
        Self {
            classifier,
            merge_gap_chars: config.merge_gap_chars,
            categories: config
                .categories
                .iter()
                .map(|category| normalize_category(category).to_ascii_uppercase())
                .collect(),
        }
    }

    pub async fn screen(&self, text: &str, threshold: f32) -> Result<PiiScreening, RagError> {
        validate_threshold(threshold)?;

        if text.trim().is_empty() {
            return Ok(PiiScreening {
                is_safe: true,
                text: text.to_string(),
                findings: Vec::new(),
            });
        }

        let predictions = self.classifier.classify(text).await.map_err(|error| {
            warn!(%error, "pii classifier call failed");
            RagError::DetectorUnavailable(error.to_string())
        })?;

        let findings: Vec<PiiFinding> = merge_spans(predictions, self.merge_gap_chars)
            .into_iter()
            .filter(|span| self.counts_as_pii(&span.category))
            .filter(|span| span.confidence >= threshold)
            .map(|span| PiiFinding {
                text: char_slice(text, span.start, span.end),
                category: span.category,
                confidence: span.confidence,
                start: span.start,
                end: span.end,
            })
            .collect();

        debug!(
            findings = findings.len(),
            categories = ?findings.iter().map(|f| f.category.as_str()).collect::<Vec<_>>(),
            threshold,
            "pii screening finished"
        );

        Ok(PiiScreening {
            is_safe: findings.is_empty(),
            text: text.to_string(),
            findings,
        })
    }

    fn counts_as_pii(&self, category: &str) -> bool {
        self.categories.is_empty()
            || self
                .categories
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(category))
    }
}

/// Strips BIO/BILOU prefixes such as `B-` and `I-`.
fn normalize_category(label: &str) -> &str {
    match label.split_once('-') {
        Some((prefix, rest)) if matches!(prefix, "B" | "I" | "E" | "S" | "L" | "U") => rest,
        _ => label,
    }
}

/// Joins adjacent tokens of the same category. A merged span is only as
/// confident as its weakest token.
fn merge_spans(mut predictions: Vec<TokenPrediction>, gap: usize) -> Vec<EntitySpan> {
    predictions.sort_by(|left, right| {
        left.start
            .cmp(&right.start)
            .then_with(|| left.end.cmp(&right.end))
    });

    let mut spans: Vec<EntitySpan> = Vec::new();
    for prediction in predictions {
        let category = normalize_category(&prediction.category);
        if category.is_empty() || category == "O" || prediction.end <= prediction.start {
            continue;
        }

        match spans.last_mut() {
            Some(last) if last.category == category && prediction.start <= last.end + gap => {
                last.end = last.end.max(prediction.end);
                last.confidence = last.confidence.min(prediction.confidence);
            }
            _ => spans.push(EntitySpan {
                start: prediction.start,
                end: prediction.end,
                category: category.to_string(),
                confidence: prediction.confidence,
            }),
        }
    }

    spans
}

fn char_slice(text: &str, start: usize, end: usize) -> String {
    text.chars().skip(start).take(end.saturating_sub(start)).collect()
}
