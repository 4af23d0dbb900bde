//! Lexical relevance and grounding checks.
//!
//! Texts are reduced to term-frequency vectors over lowercase word tokens
//! with common stopwords removed. Relevancy is the cosine similarity of two
//! such vectors; faithfulness is the share of response sentences whose terms
//! mostly appear in the context.

use agentprobe_core::errors::ValidatorError;
use agentprobe_core::model::ValidationType;
use agentprobe_core::validator_api::{ValidationRequest, Validator, Verdict};
use async_trait::async_trait;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use crate::params;

const EPSILON: f64 = 1e-6;
const DEFAULT_THRESHOLD: f64 = 0.7;
/// A sentence counts as supported when at least this share of its terms occur in the context.
const SUPPORT_RATIO: f64 = 0.5;

const STOPWORDS: &[&str] = &[
    "a", "about", "after", "all", "also", "an", "and", "any", "are", "as", "at", "be", "been",
    "but", "by", "can", "could", "did", "do", "does", "for", "from", "had", "has", "have", "he",
    "her", "his", "how", "i", "if", "in", "into", "is", "it", "its", "just", "me", "my", "no",
    "not", "of", "on", "or", "our", "she", "so", "than", "that", "the", "their", "them", "then",
    "there", "these", "they", "this", "to", "too", "us", "was", "we", "were", "what", "when",
    "where", "which", "who", "why", "will", "with", "would", "you", "your",
];

fn word_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[\p{L}\p{N}]+").expect("valid pattern"))
}

fn sentence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^.!?\n]+").expect("valid pattern"))
}

/// Lowercase content terms of `text`, stopwords dropped.
pub fn tokenize(text: &str) -> Vec<String> {
    word_re()
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .filter(|w| !STOPWORDS.contains(&w.as_str()))
        .collect()
}

pub fn term_frequencies(text: &str) -> BTreeMap<String, f64> {
    let mut tf = BTreeMap::new();
    for t in tokenize(text) {
        *tf.entry(t).or_insert(0.0) += 1.0;
    }
    tf
}

/// Cosine similarity of two sparse vectors; 0.0 when either is empty.
pub fn cosine_similarity(a: &BTreeMap<String, f64>, b: &BTreeMap<String, f64>) -> f64 {
    let dot: f64 = a
        .iter()
        .filter_map(|(k, x)| b.get(k).map(|y| x * y))
        .sum();
    let na = a.values().map(|x| x * x).sum::<f64>().sqrt();
    let nb = b.values().map(|y| y * y).sum::<f64>().sqrt();
    let denom = na * nb;
    if denom == 0.0 {
        return 0.0;
    }
    (dot / denom).clamp(0.0, 1.0)
}

/// Inline `context` parameter followed by any scraped page text.
fn gather_context(req: &ValidationRequest) -> String {
    let mut parts = params::text_list(&req.parameters, "context");
    if let Some(scraped) = req.scraped_content.as_deref() {
        if !scraped.trim().is_empty() {
            parts.push(scraped.to_string());
        }
    }
    parts.join("\n")
}

fn judge(score: f64, threshold: f64, details: serde_json::Value) -> Verdict {
    // Scores within EPSILON of the threshold pass.
    let passed = score + EPSILON >= threshold;
    let mut details = details;
    details["score"] = serde_json::json!(score);
    details["threshold"] = serde_json::json!(threshold);
    details["epsilon"] = serde_json::json!(EPSILON);
    Verdict {
        passed,
        score,
        details,
    }
}

pub struct AnswerRelevancyValidator;

#[async_trait]
impl Validator for AnswerRelevancyValidator {
    fn kind(&self) -> ValidationType {
        ValidationType::AnswerRelevancy
    }

    async fn evaluate(&self, req: &ValidationRequest) -> Result<Verdict, ValidatorError> {
        let threshold = params::threshold(&req.parameters, DEFAULT_THRESHOLD)?;
        let question = term_frequencies(&req.user_input);
        let answer = term_frequencies(&req.response);
        let score = cosine_similarity(&question, &answer);

        Ok(judge(
            score,
            threshold,
            serde_json::json!({
                "input_terms": question.len(),
                "response_terms": answer.len(),
            }),
        ))
    }
}

pub struct ContextualRelevancyValidator;

#[async_trait]
impl Validator for ContextualRelevancyValidator {
    fn kind(&self) -> ValidationType {
        ValidationType::ContextualRelevancy
    }

    async fn evaluate(&self, req: &ValidationRequest) -> Result<Verdict, ValidatorError> {
        let threshold = params::threshold(&req.parameters, DEFAULT_THRESHOLD)?;
        let context = gather_context(req);
        if context.trim().is_empty() {
            return Ok(Verdict::fail(0.0, "no context available"));
        }

        let ctx = term_frequencies(&context);
        let answer = term_frequencies(&req.response);
        let score = cosine_similarity(&answer, &ctx);

        Ok(judge(
            score,
            threshold,
            serde_json::json!({
                "context_terms": ctx.len(),
                "response_terms": answer.len(),
            }),
        ))
    }
}

pub struct FaithfulnessValidator;

#[async_trait]
impl Validator for FaithfulnessValidator {
    fn kind(&self) -> ValidationType {
        ValidationType::Faithfulness
    }

    async fn evaluate(&self, req: &ValidationRequest) -> Result<Verdict, ValidatorError> {
        let threshold = params::threshold(&req.parameters, DEFAULT_THRESHOLD)?;
        let context = gather_context(req);
        if context.trim().is_empty() {
            return Ok(Verdict::fail(0.0, "no context available"));
        }

        let vocabulary: BTreeSet<String> = tokenize(&context).into_iter().collect();
        let mut checked = 0usize;
        let mut unsupported = Vec::new();

        for sentence in sentence_re().find_iter(&req.response) {
            let terms = tokenize(sentence.as_str());
            if terms.is_empty() {
                continue;
            }
            checked += 1;
            let known = terms.iter().filter(|t| vocabulary.contains(*t)).count();
            if (known as f64) / (terms.len() as f64) + EPSILON < SUPPORT_RATIO {
                unsupported.push(sentence.as_str().trim().to_string());
            }
        }

        if checked == 0 {
            return Ok(Verdict::fail(0.0, "response has no checkable statements"));
        }

        let supported = checked - unsupported.len();
        let score = supported as f64 / checked as f64;

        Ok(judge(
            score,
            threshold,
            serde_json::json!({
                "sentences": checked,
                "supported": supported,
                "unsupported": unsupported,
            }),
        ))
    }
}
