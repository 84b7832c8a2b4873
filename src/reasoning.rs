//! Answer generation with a multi-level fallback ladder.
//!
//! The reasoning agent builds a grounded prompt under the model's context
//! budget and degrades through progressively cheaper strategies when the
//! model misbehaves:
//!
//! - Level 0: full prompt over the in-budget evidence.
//! - Level 1 (`simplified_reasoning`): minimal prompt, top-2 chunks.
//! - Level 2 (`direct_extraction`): sentence matching, no model call.
//! - Level 3 (`graceful_fallback`): fixed apology listing the sources.
//!
//! The first level to produce a valid answer wins; later levels are not
//! attempted. Every failure lands in the structured failure log.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::document::{ChunkKind, SearchResult};
use crate::error::{EngineError, Result};
use crate::faillog::FailureLog;
use crate::llm::LlmClient;
use crate::response::{FallbackLevel, ImageRef, QueryContext, Source};

/// Character budget for the simplified-reasoning context.
const SIMPLIFIED_CONTEXT_CHARS: usize = 2000;

/// Maximum sentences returned by direct extraction.
const MAX_EXTRACTED_SENTENCES: usize = 5;

/// Minimum sentence length considered by direct extraction.
const MIN_SENTENCE_CHARS: usize = 30;

const SYSTEM_DIRECTIVE: &str = "You are a careful research assistant answering questions about uploaded documents.\n\
Answer ONLY from the context below. If the context does not contain the answer, \
say \"The answer is not in the provided context.\" Do not invent facts. \
Cite the source filename and page number for every key fact, in the form \
(Source: filename, Page: N).";

/// Estimate the token count of a text as `ceil(words × 1.3)`.
pub(crate) fn estimate_tokens(text: &str) -> usize {
    (text.split_whitespace().count() as f32 * 1.3).ceil() as usize
}

/// The third cognitive stage: produce a grounded, cited answer draft.
pub struct ReasoningAgent {
    llm: Arc<LlmClient>,
    faillog: Arc<FailureLog>,
    context_window: usize,
    token_reserve: usize,
    chunk_token_cap: usize,
    max_answer_tokens: u32,
}

impl ReasoningAgent {
    /// Create the agent with the prompt-budget parameters.
    pub fn new(
        llm: Arc<LlmClient>,
        faillog: Arc<FailureLog>,
        context_window: usize,
        token_reserve: usize,
        chunk_token_cap: usize,
        max_answer_tokens: u32,
    ) -> Self {
        Self { llm, faillog, context_window, token_reserve, chunk_token_cap, max_answer_tokens }
    }

    /// Run the fallback ladder over the given evidence slice and write the
    /// answer draft, citations, and image references onto the context.
    ///
    /// The slice is the orchestrator's (possibly re-sliced) view of the
    /// evidence set; the agent consumes a budget-limited prefix of it.
    pub async fn execute(&self, ctx: &mut QueryContext, slice: &[SearchResult]) -> Result<()> {
        if slice.is_empty() {
            return Err(EngineError::Pipeline("reasoning requires a non-empty evidence slice".into()));
        }

        ctx.images = collect_images(slice);

        let (answer, fallback, used) = self.run_ladder(ctx, slice).await;

        let cited: &[SearchResult] =
            if fallback.is_some() { &slice[..slice.len().min(3)] } else { &slice[..used] };
        let citations = unique_citations(cited);
        let answer = append_sources_block(answer, &citations);

        info!(
            fallback = fallback.map(|f| f.as_str()).unwrap_or("none"),
            answer_chars = answer.len(),
            evidence_used = used,
            "reasoning complete"
        );

        ctx.answer = Some(answer);
        ctx.fallback_used = fallback;
        ctx.evidence_used = used;
        ctx.sources = citations;
        Ok(())
    }

    /// Try each level in order; the first valid answer wins.
    async fn run_ladder(
        &self,
        ctx: &mut QueryContext,
        slice: &[SearchResult],
    ) -> (String, Option<FallbackLevel>, usize) {
        let query = ctx.user_query.clone();

        match self.full_reasoning(ctx, slice, &query).await {
            Some((answer, used)) => return (answer, None, used),
            None => debug!("full reasoning failed, descending to simplified"),
        }

        if let Some(answer) = self.simplified_reasoning(&query, slice).await {
            return (answer, Some(FallbackLevel::SimplifiedReasoning), slice.len().min(2));
        }

        if let Some(answer) = self.direct_extraction(&query, &ctx.keywords, slice) {
            return (answer, Some(FallbackLevel::DirectExtraction), slice.len().min(3));
        }

        (graceful_message(slice), Some(FallbackLevel::GracefulFallback), slice.len().min(3))
    }

    /// Level 0: full prompt over the in-budget evidence.
    async fn full_reasoning(
        &self,
        ctx: &mut QueryContext,
        slice: &[SearchResult],
        query: &str,
    ) -> Option<(String, usize)> {
        let (context_text, used, truncated) = self.build_context(slice);
        if truncated {
            ctx.truncated = true;
        }

        let prompt = format!("{SYSTEM_DIRECTIVE}\n\n{context_text}\nQuestion: {query}\n\nAnswer:");

        // The budget fill keeps the evidence inside the window, but an
        // oversized query or directive can still blow it. Never send an
        // over-budget prompt.
        let estimated = estimate_tokens(&prompt);
        if used == 0 || estimated > self.context_window {
            self.faillog
                .record(
                    "context_overflow",
                    &format!(
                        "prompt estimated at {estimated} tokens against a {} token window",
                        self.context_window
                    ),
                    "level 0",
                    query,
                    context_text.len(),
                    prompt.len(),
                )
                .await;
            return None;
        }

        let use_images = !ctx.images.is_empty() && self.llm.multimodal_health().await;
        let result = if use_images {
            let paths: Vec<String> = ctx.images.iter().map(|i| i.path.clone()).collect();
            self.llm.generate_with_images(&prompt, &paths, self.max_answer_tokens, 0.1).await
        } else {
            self.llm.generate(&prompt, self.max_answer_tokens, 0.1).await
        };

        match result {
            Ok(answer) => Some((answer, used)),
            Err(e) => {
                warn!(kind = ?e.kind, error = %e.message, "full reasoning model call failed");
                self.faillog
                    .record(
                        &format!("{:?}", e.kind).to_lowercase(),
                        &e.message,
                        "level 0",
                        query,
                        context_text.len(),
                        prompt.len(),
                    )
                    .await;
                None
            }
        }
    }

    /// Level 1: minimal prompt over at most the top-2 chunks.
    async fn simplified_reasoning(&self, query: &str, slice: &[SearchResult]) -> Option<String> {
        let mut context = String::new();
        for result in slice.iter().take(2) {
            let remaining = SIMPLIFIED_CONTEXT_CHARS.saturating_sub(context.len());
            if remaining == 0 {
                break;
            }
            let text: String = result.text.chars().take(remaining).collect();
            context.push_str(&text);
            context.push('\n');
        }

        let prompt = format!("Context: {context}\n\nQuestion: {query}\n\nAnswer:");

        match self.llm.generate(&prompt, self.max_answer_tokens, 0.1).await {
            Ok(answer) => Some(answer),
            Err(e) => {
                warn!(kind = ?e.kind, error = %e.message, "simplified reasoning failed");
                self.faillog
                    .record(
                        &format!("{:?}", e.kind).to_lowercase(),
                        &e.message,
                        "level 1",
                        query,
                        context.len(),
                        prompt.len(),
                    )
                    .await;
                None
            }
        }
    }

    /// Level 2: rank evidence sentences by keyword overlap. No model call.
    fn direct_extraction(
        &self,
        query: &str,
        keywords: &[String],
        slice: &[SearchResult],
    ) -> Option<String> {
        let keywords: Vec<String> = if keywords.is_empty() {
            crate::understanding::tokenize(query)
                .into_iter()
                .filter(|t| t.chars().count() >= 4)
                .collect()
        } else {
            keywords.to_vec()
        };
        if keywords.is_empty() {
            return None;
        }

        let mut ranked: Vec<(usize, String)> = Vec::new();
        for result in slice.iter().take(3) {
            let flat = result.text.replace('\n', " ");
            for sentence in flat.split('.') {
                let sentence = sentence.trim();
                if sentence.len() < MIN_SENTENCE_CHARS {
                    continue;
                }
                let lower = sentence.to_lowercase();
                let overlap = keywords.iter().filter(|kw| lower.contains(kw.as_str())).count();
                if overlap == 0 {
                    continue;
                }
                let tagged = format!(
                    "{sentence}. (Source: {}, Page: {})",
                    result.metadata.filename,
                    result.metadata.page + 1
                );
                ranked.push((overlap, tagged));
            }
        }
        if ranked.is_empty() {
            return None;
        }

        ranked.sort_by(|a, b| b.0.cmp(&a.0));
        let sentences: Vec<String> =
            ranked.into_iter().take(MAX_EXTRACTED_SENTENCES).map(|(_, s)| s).collect();

        Some(format!(
            "Based on the documents, I found the following relevant information:\n\n{}",
            sentences.join("\n\n")
        ))
    }

    /// Fill the evidence portion of the prompt in fused-score order.
    ///
    /// Returns the formatted context, how many chunks were included, and
    /// whether any chunk was truncated to fit its per-chunk cap.
    fn build_context(&self, slice: &[SearchResult]) -> (String, usize, bool) {
        let budget = self.context_window.saturating_sub(self.token_reserve);
        let mut blocks: Vec<String> = Vec::new();
        let mut spent = 0usize;
        let mut truncated = false;

        for result in slice {
            let (text, was_truncated) = truncate_chunk(&result.text, self.chunk_token_cap);
            truncated |= was_truncated;

            let page = result.metadata.page + 1;
            let header = match result.metadata.kind {
                ChunkKind::Table => {
                    format!("--- TABLE from {} (Page {page}) ---", result.metadata.filename)
                }
                _ => format!("--- DOCUMENT: {} (Page {page}) ---", result.metadata.filename),
            };
            let block = format!("{header}\n{text}\n");

            let cost = estimate_tokens(&block);
            if spent + cost > budget {
                break;
            }
            spent += cost;
            blocks.push(block);
        }

        let used = blocks.len();
        (blocks.join("\n"), used, truncated)
    }
}

/// Truncate a chunk to roughly `cap` estimated tokens, keeping the leading
/// and trailing sentences.
fn truncate_chunk(text: &str, cap: usize) -> (String, bool) {
    if estimate_tokens(text) <= cap {
        return (text.to_string(), false);
    }

    let flat = text.replace('\n', " ");
    let sentences: Vec<&str> =
        flat.split('.').map(str::trim).filter(|s| !s.is_empty()).collect();

    if sentences.len() <= 1 {
        // No sentence structure to keep; fall back to word-level head+tail.
        let words: Vec<&str> = flat.split_whitespace().collect();
        let keep = ((cap as f32 / 1.3) as usize / 2).max(1);
        let head = words[..keep.min(words.len())].join(" ");
        let tail = words[words.len().saturating_sub(keep)..].join(" ");
        return (format!("{head} ... {tail}"), true);
    }

    let half = cap / 2;
    let mut head: Vec<&str> = Vec::new();
    let mut head_spent = 0usize;
    for sentence in &sentences {
        let cost = estimate_tokens(sentence);
        if head_spent + cost > half {
            break;
        }
        head_spent += cost;
        head.push(sentence);
    }

    let mut tail: Vec<&str> = Vec::new();
    let mut tail_spent = 0usize;
    for sentence in sentences.iter().rev() {
        let cost = estimate_tokens(sentence);
        if tail_spent + cost > half {
            break;
        }
        tail_spent += cost;
        tail.insert(0, sentence);
    }

    // Overlapping head/tail would mean the text fit after all; guard the
    // degenerate split instead of duplicating sentences.
    let taken = head.len() + tail.len();
    if taken >= sentences.len() {
        return (sentences.join(". ") + ".", true);
    }

    (format!("{}. ... {}.", head.join(". "), tail.join(". ")), true)
}

/// Image references from the top-3 evidence entries, deduplicated by path.
fn collect_images(slice: &[SearchResult]) -> Vec<ImageRef> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut images = Vec::new();
    for result in slice.iter().take(3) {
        if !result.metadata.has_image {
            continue;
        }
        if let Some(path) = &result.metadata.image_path {
            if seen.insert(path.as_str()) {
                images.push(ImageRef {
                    path: path.clone(),
                    page: result.metadata.page + 1,
                    filename: result.metadata.filename.clone(),
                });
            }
        }
    }
    images
}

/// Unique `(filename, 1-based page)` pairs in evidence order.
fn unique_citations(slice: &[SearchResult]) -> Vec<Source> {
    let mut seen: HashSet<(String, u32)> = HashSet::new();
    let mut citations = Vec::new();
    for result in slice {
        let key = (result.metadata.filename.clone(), result.metadata.page + 1);
        if seen.insert(key.clone()) {
            citations.push(Source { filename: key.0, page: key.1 });
        }
    }
    citations
}

fn append_sources_block(answer: String, citations: &[Source]) -> String {
    if citations.is_empty() {
        return answer;
    }
    let list: Vec<String> =
        citations.iter().map(|c| format!("- {} (Page {})", c.filename, c.page)).collect();
    format!("{answer}\n\n**Sources:**\n{}", list.join("\n"))
}

/// Level 3: a fixed apology listing the evidence sources.
fn graceful_message(slice: &[SearchResult]) -> String {
    let sources: Vec<String> = unique_citations(&slice[..slice.len().min(3)])
        .into_iter()
        .map(|c| format!("{} (Page {})", c.filename, c.page))
        .collect();

    format!(
        "I found potentially relevant material but could not produce an answer this time. \
         The closest sections are from: {}.\n\n\
         Please try:\n\
         1. Rephrasing your question more specifically\n\
         2. Asking about a smaller topic\n\
         3. Requesting information from a specific page or section",
        sources.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::ChunkMetadata;

    fn result(filename: &str, page: u32, chunk_index: u32, text: &str) -> SearchResult {
        SearchResult {
            text: text.to_string(),
            metadata: ChunkMetadata::text(filename, page, chunk_index),
            score: 0.9,
            sources: vec![],
        }
    }

    #[test]
    fn token_estimate_rounds_up() {
        assert_eq!(estimate_tokens("one two three"), 4); // 3 * 1.3 = 3.9
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn truncate_keeps_leading_and_trailing_sentences() {
        let text = "First sentence about the design. Second filler sentence that goes on for a while. \
                    Third filler sentence with more padding words inside it. \
                    Fourth filler sentence continuing the padding theme here. \
                    Last sentence holds the conclusion.";
        let (out, truncated) = truncate_chunk(text, 20);
        assert!(truncated);
        assert!(out.starts_with("First sentence about the design."));
        assert!(out.ends_with("Last sentence holds the conclusion."));
        assert!(out.contains("..."));
    }

    #[test]
    fn short_chunks_pass_untouched() {
        let (out, truncated) = truncate_chunk("short text", 100);
        assert_eq!(out, "short text");
        assert!(!truncated);
    }

    #[test]
    fn citations_are_unique_and_one_based() {
        let slice = vec![
            result("a.pdf", 0, 0, "x"),
            result("a.pdf", 0, 1, "y"),
            result("b.pdf", 4, 0, "z"),
        ];
        let citations = unique_citations(&slice);
        assert_eq!(
            citations,
            vec![
                Source { filename: "a.pdf".into(), page: 1 },
                Source { filename: "b.pdf".into(), page: 5 },
            ]
        );
    }

    #[test]
    fn images_come_from_top_three_deduplicated() {
        let mut with_image = result("a.pdf", 2, 0, "x");
        with_image.metadata.has_image = true;
        with_image.metadata.image_path = Some("/static/images/fig1.png".into());
        let mut duplicate = result("a.pdf", 2, 1, "y");
        duplicate.metadata.has_image = true;
        duplicate.metadata.image_path = Some("/static/images/fig1.png".into());
        let mut too_far = result("b.pdf", 0, 0, "z");
        too_far.metadata.has_image = true;
        too_far.metadata.image_path = Some("/static/images/fig2.png".into());

        let slice = vec![with_image, duplicate, result("c.pdf", 0, 0, "w"), too_far];
        let images = collect_images(&slice);
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].path, "/static/images/fig1.png");
        assert_eq!(images[0].page, 3);
    }

    #[test]
    fn context_fill_respects_the_token_budget() {
        let faillog = Arc::new(FailureLog::new());
        let transport: Arc<dyn crate::llm::LlmTransport> = Arc::new(NoopTransport);
        let llm = Arc::new(LlmClient::new(
            transport,
            2,
            3,
            std::time::Duration::from_secs(30),
            5 * 1024 * 1024,
        ));
        let agent = ReasoningAgent::new(llm, faillog, 2048, 800, 512, 600);

        let big = "requirement verification word ".repeat(400);
        let slice: Vec<SearchResult> =
            (0..12).map(|i| result("bulk.pdf", 0, i, &big)).collect();

        let (context_text, used, truncated) = agent.build_context(&slice);
        assert!(truncated);
        assert!(used > 0);
        assert!(estimate_tokens(&context_text) <= 2048 - 800);
    }

    struct NoopTransport;

    #[async_trait::async_trait]
    impl crate::llm::LlmTransport for NoopTransport {
        async fn complete(
            &self,
            _request: &crate::llm::CompletionRequest,
        ) -> std::result::Result<String, crate::llm::LlmError> {
            Ok("unused in these tests, present for construction".to_string())
        }

        async fn health(&self) -> bool {
            true
        }
    }

    #[test]
    fn sources_block_is_appended() {
        let citations = vec![Source { filename: "spec.pdf".into(), page: 7 }];
        let out = append_sources_block("An answer.".into(), &citations);
        assert!(out.contains("**Sources:**"));
        assert!(out.contains("- spec.pdf (Page 7)"));
    }
}
