//! Answer verification and confidence scoring.
//!
//! The verification agent cross-checks the answer draft against the
//! evidence and assigns a confidence in `[0, 1]`. A model judgement is
//! multiplied by three deterministic heuristics; if the model call fails
//! the confidence degrades but the answer is still returned.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{EngineError, Result};
use crate::llm::LlmClient;
use crate::response::QueryContext;
use crate::understanding::tokenize;

/// Answers shorter than this get a length penalty.
const SHORT_ANSWER_CHARS: usize = 50;

/// Multiplier for short answers.
const LENGTH_PENALTY: f32 = 0.8;

/// Multiplier when the answer carries a citation marker.
const CITATION_BONUS: f32 = 1.05;

/// Model judgement assumed when the response parses but carries no
/// `Confidence:` line.
const DEFAULT_JUDGEMENT: f32 = 0.7;

/// The fourth cognitive stage: score how well the answer is grounded.
pub struct VerificationAgent {
    llm: Arc<LlmClient>,
    threshold: f32,
}

impl VerificationAgent {
    /// Create the agent with the configured confidence threshold.
    pub fn new(llm: Arc<LlmClient>, threshold: f32) -> Self {
        Self { llm, threshold }
    }

    /// Score `ctx.answer` against `ctx.evidence` and write `confidence`
    /// and `verified` back onto the context.
    ///
    /// Model failure is non-fatal: the confidence defaults to
    /// `min(0.5 × overlap, 0.7)` with `verified = false`.
    pub async fn execute(&self, ctx: &mut QueryContext) -> Result<()> {
        let answer = ctx
            .answer
            .as_deref()
            .ok_or_else(|| EngineError::Pipeline("verification requires an answer draft".into()))?;

        let context_text: String = ctx
            .evidence
            .iter()
            .take(3)
            .map(|r| r.text.chars().take(1000).collect::<String>())
            .collect::<Vec<_>>()
            .join("\n");

        let overlap = evidence_overlap(answer, &context_text);

        let confidence = match self.judge(&ctx.user_query, answer, &context_text).await {
            Some(judgement) => {
                let mut confidence = judgement;
                if answer.len() < SHORT_ANSWER_CHARS {
                    confidence *= LENGTH_PENALTY;
                }
                confidence *= overlap;
                if answer.contains("Source") || answer.contains("Page") {
                    confidence *= CITATION_BONUS;
                }
                confidence.clamp(0.0, 1.0)
            }
            None => (0.5 * overlap).min(self.threshold),
        };

        ctx.confidence = confidence;
        ctx.verified = confidence >= self.threshold;

        debug!(confidence, verified = ctx.verified, overlap, "verification complete");
        Ok(())
    }

    /// Ask the model whether the answer is supported by the context.
    ///
    /// Returns `None` on any model failure; returns the default judgement
    /// when the model answers but gives no usable number.
    async fn judge(&self, query: &str, answer: &str, context_text: &str) -> Option<f32> {
        let prompt = format!(
            "Verify whether the answer is supported by the context.\n\n\
             Context:\n{context_text}\n\n\
             Question: {query}\n\
             Answer: {answer}\n\n\
             Is this answer supported by the context? Respond in this format:\n\
             Confidence: [a number between 0.0 and 1.0]\n\
             Issues: [list issues or \"None\"]"
        );

        match self.llm.generate(&prompt, 200, 0.3).await {
            Ok(text) => Some(parse_confidence(&text).unwrap_or(DEFAULT_JUDGEMENT)),
            Err(e) => {
                warn!(kind = ?e.kind, error = %e.message, "verification model call failed");
                None
            }
        }
    }
}

/// Share of answer tokens that also appear in the evidence, in `[0, 1]`.
fn evidence_overlap(answer: &str, context_text: &str) -> f32 {
    let answer_tokens: Vec<String> = tokenize(answer);
    if answer_tokens.is_empty() {
        return 0.0;
    }
    let context_tokens: HashSet<String> = tokenize(context_text).into_iter().collect();
    let shared = answer_tokens.iter().filter(|t| context_tokens.contains(*t)).count();
    (shared as f32 / answer_tokens.len() as f32).clamp(0.0, 1.0)
}

/// Pull the number off a `Confidence:` line.
fn parse_confidence(text: &str) -> Option<f32> {
    for line in text.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("Confidence:") {
            let cleaned: String = rest
                .trim()
                .trim_start_matches('[')
                .trim_end_matches(']')
                .chars()
                .take_while(|c| c.is_ascii_digit() || *c == '.')
                .collect();
            if let Ok(value) = cleaned.parse::<f32>() {
                return Some(value.clamp(0.0, 1.0));
            }
        }
    }
    None
}
