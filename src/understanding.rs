//! Query understanding: intent, type, keywords, casual short-circuit.
//!
//! Classification is rule-based and deterministic. The model may optionally
//! be asked to disambiguate the type tag, but its failure always falls back
//! to the rule result, and it is never consulted for casual queries.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::Result;
use crate::llm::LlmClient;
use crate::response::{QueryContext, QueryType};

/// Maximum number of keywords extracted from a query.
const MAX_KEYWORDS: usize = 8;

/// Short greeting / thanks / small-talk fragments that mark a casual query.
const CASUAL_PATTERNS: &[&str] = &[
    "hello",
    "hi there",
    "hey",
    "how are you",
    "what's up",
    "good morning",
    "good evening",
    "good night",
    "thanks",
    "thank you",
    "bye",
    "goodbye",
    "see you",
    "salam",
    "mersi",
    "سلام",
    "ممنون",
    "خداحافظ",
];

const STOPWORDS: &[&str] = &[
    "the", "a", "an", "is", "are", "was", "were", "be", "been", "being", "have", "has", "had",
    "do", "does", "did", "will", "would", "could", "should", "may", "might", "must", "shall",
    "can", "need", "ought", "used", "to", "of", "in", "for", "on", "with", "at", "by", "from",
    "as", "into", "through", "during", "before", "after", "above", "below", "between", "under",
    "again", "further", "then", "once", "what", "which", "who", "whom", "this", "that", "these",
    "those", "am", "or", "and", "but", "if", "because", "until", "while", "about", "against",
    "how", "where", "when", "why", "their", "there", "here", "them", "they", "your", "please",
];

/// Measurement and unit tokens that push a question toward `numerical` and
/// enable the table boost in retrieval.
pub(crate) const UNIT_TOKENS: &[&str] = &[
    "mm", "cm", "km", "kg", "mg", "hz", "khz", "mhz", "ghz", "db", "kv", "mv", "kw", "mw",
    "percent", "celsius", "kelvin", "watts", "volts", "amps", "amperes", "seconds", "minutes",
    "hours", "degrees", "meters", "grams", "newtons", "pascals", "joules", "bytes", "kb", "mb",
    "gb",
];

const QUESTION_STARTERS: &[&str] =
    &["what", "how", "when", "who", "which", "why", "where", "is", "are", "does", "do", "can"];

/// Lowercase word tokens with punctuation stripped, order preserved.
pub(crate) fn tokenize(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|w| {
            w.chars()
                .filter(|c| c.is_alphanumeric() || *c == '.' || *c == '%')
                .collect::<String>()
                .trim_matches('.')
                .to_lowercase()
        })
        .filter(|w| !w.is_empty())
        .collect()
}

/// Whether the query carries a unit/measurement token.
pub(crate) fn has_unit_token(tokens: &[String]) -> bool {
    tokens.iter().any(|t| UNIT_TOKENS.contains(&t.as_str()))
}

fn is_stopword(token: &str) -> bool {
    STOPWORDS.contains(&token)
}

fn is_question_form(query: &str, tokens: &[String]) -> bool {
    query.trim_end().ends_with('?')
        || tokens.first().is_some_and(|t| QUESTION_STARTERS.contains(&t.as_str()))
}

/// Decide whether the query is casual small talk.
///
/// Earlier rules win: a short greeting pattern, or fewer than 3 tokens with
/// no domain term, short-circuits the whole pipeline.
fn is_casual(normalized: &str, tokens: &[String]) -> bool {
    if tokens.len() < 3 {
        let has_domain_term =
            tokens.iter().any(|t| t.chars().count() >= 4 && !is_stopword(t.as_str()));
        if !has_domain_term {
            return true;
        }
    }
    // A greeting buried in a long domain question is not casual.
    tokens.len() <= 5 && CASUAL_PATTERNS.iter().any(|p| normalized.contains(p))
}

fn classify(normalized: &str, tokens: &[String]) -> QueryType {
    let has_token = |t: &str| tokens.iter().any(|tok| tok == t);

    if has_token("compare") || has_token("vs") || has_token("versus") || has_token("contrast") {
        return QueryType::Comparison;
    }
    if normalized.contains("list all") || has_token("every") || has_token("each") {
        return QueryType::Extraction;
    }
    let has_numeral = tokens.iter().any(|t| t.chars().any(|c| c.is_ascii_digit()));
    if (has_numeral || has_unit_token(tokens)) && is_question_form(normalized, tokens) {
        return QueryType::Numerical;
    }
    if has_token("why") || has_token("how") {
        return QueryType::Analytical;
    }
    if has_token("what") || has_token("when") || has_token("who") {
        return QueryType::Factual;
    }
    QueryType::Research
}

fn intent_for(normalized: &str, query_type: QueryType) -> String {
    if normalized.contains("report")
        || normalized.contains("summary")
        || normalized.contains("summarize")
    {
        return "report_generation".to_string();
    }
    match query_type {
        QueryType::Comparison => "comparison",
        QueryType::Extraction => "data_extraction",
        QueryType::Analytical => "analysis",
        QueryType::Factual => "factual_lookup",
        QueryType::Numerical => "numerical_lookup",
        _ => "research",
    }
    .to_string()
}

fn extract_keywords(tokens: &[String]) -> Vec<String> {
    let mut keywords: Vec<String> = Vec::new();
    for token in tokens {
        if token.chars().count() >= 4 && !is_stopword(token.as_str()) && !keywords.contains(token) {
            keywords.push(token.clone());
            if keywords.len() == MAX_KEYWORDS {
                break;
            }
        }
    }
    keywords
}

/// The first cognitive stage: classify the query and extract keywords.
pub struct UnderstandingAgent {
    llm: Arc<LlmClient>,
    llm_classification: bool,
}

impl UnderstandingAgent {
    /// Create the agent. `llm_classification` enables the optional
    /// model-assisted disambiguation pass.
    pub fn new(llm: Arc<LlmClient>, llm_classification: bool) -> Self {
        Self { llm, llm_classification }
    }

    /// Analyze `ctx.user_query` and write intent, type, and keywords back
    /// onto the context.
    pub async fn execute(&self, ctx: &mut QueryContext) -> Result<()> {
        let normalized = ctx.user_query.trim().to_lowercase();
        let tokens = tokenize(&normalized);

        if is_casual(&normalized, &tokens) {
            ctx.query_type = QueryType::Casual;
            ctx.intent = "casual".to_string();
            debug!(query = %ctx.user_query, "casual query, short-circuiting");
            return Ok(());
        }

        let mut query_type = classify(&normalized, &tokens);

        if self.llm_classification {
            if let Some(refined) = self.disambiguate(&ctx.user_query).await {
                query_type = refined;
            }
        }

        ctx.query_type = query_type;
        ctx.intent = intent_for(&normalized, query_type);
        ctx.keywords = extract_keywords(&tokens);

        debug!(
            query_type = ?ctx.query_type,
            intent = %ctx.intent,
            keyword_count = ctx.keywords.len(),
            "query understood"
        );
        Ok(())
    }

    /// Ask the model to pick a type tag. Any failure keeps the rule result.
    async fn disambiguate(&self, query: &str) -> Option<QueryType> {
        let prompt = format!(
            "Classify this question as exactly one of: comparison, extraction, \
             numerical, analytical, factual, research.\n\n\
             Question: {query}\n\n\
             Answer with the single category word and a short justification."
        );
        match self.llm.generate(&prompt, 100, 0.3).await {
            Ok(text) => {
                let lower = text.to_lowercase();
                for (tag, query_type) in [
                    ("comparison", QueryType::Comparison),
                    ("extraction", QueryType::Extraction),
                    ("numerical", QueryType::Numerical),
                    ("analytical", QueryType::Analytical),
                    ("factual", QueryType::Factual),
                    ("research", QueryType::Research),
                ] {
                    if lower.contains(tag) {
                        return Some(query_type);
                    }
                }
                None
            }
            Err(e) => {
                warn!(error = %e, "type disambiguation failed, keeping rule-based tag");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify_str(query: &str) -> QueryType {
        let normalized = query.trim().to_lowercase();
        let tokens = tokenize(&normalized);
        classify(&normalized, &tokens)
    }

    fn casual_str(query: &str) -> bool {
        let normalized = query.trim().to_lowercase();
        let tokens = tokenize(&normalized);
        is_casual(&normalized, &tokens)
    }

    #[test]
    fn greetings_are_casual() {
        assert!(casual_str("Hi there"));
        assert!(casual_str("hello"));
        assert!(casual_str("thanks a lot!"));
        assert!(casual_str("سلام"));
    }

    #[test]
    fn short_domain_queries_are_not_casual() {
        assert!(!casual_str("attitude control"));
        assert!(!casual_str("thermal budget"));
    }

    #[test]
    fn long_queries_with_greeting_words_are_not_casual() {
        assert!(!casual_str("hello, what is the pointing error requirement for the AOCS subsystem?"));
    }

    #[test]
    fn comparators_win_over_question_words() {
        assert_eq!(classify_str("what is better, option A versus option B?"), QueryType::Comparison);
        assert_eq!(classify_str("compare the two control modes"), QueryType::Comparison);
    }

    #[test]
    fn enumerators_classify_as_extraction() {
        assert_eq!(classify_str("list all the verification requirements"), QueryType::Extraction);
        assert_eq!(classify_str("name each operating mode of the system"), QueryType::Extraction);
    }

    #[test]
    fn units_in_question_form_classify_as_numerical() {
        assert_eq!(classify_str("what is the mass budget in kg?"), QueryType::Numerical);
        assert_eq!(classify_str("how many watts does the payload draw"), QueryType::Numerical);
    }

    #[test]
    fn question_words_classify_as_expected() {
        assert_eq!(classify_str("why does the filter diverge during eclipse"), QueryType::Analytical);
        assert_eq!(classify_str("how is momentum dumping performed"), QueryType::Analytical);
        assert_eq!(classify_str("what is the design justification file"), QueryType::Factual);
        assert_eq!(classify_str("summarize the requirements baseline"), QueryType::Research);
    }

    #[test]
    fn keywords_preserve_order_and_cap_at_eight() {
        let tokens = tokenize(
            "describe solar array deployment sequence timing margins thermal battery power telemetry",
        );
        let keywords = extract_keywords(&tokens);
        assert_eq!(keywords.len(), 8);
        assert_eq!(keywords[0], "describe");
        assert_eq!(keywords[1], "solar");
    }

    #[test]
    fn keywords_skip_stopwords_and_short_tokens(){
        let tokens = tokenize("what is the purpose of the Design Justification File?");
        let keywords = extract_keywords(&tokens);
        assert_eq!(keywords, vec!["purpose", "design", "justification", "file"]);
    }

    #[test]
    fn report_wording_sets_report_intent() {
        assert_eq!(
            intent_for("create a comprehensive report about aocs", QueryType::Research),
            "report_generation"
        );
    }
}
