//! Inbound query translation.
//!
//! The engine translates non-English queries to English before the pipeline
//! runs. No provider is bundled; callers plug implementations of
//! [`Translator`] into the chain, which always ends in a verbatim
//! passthrough so translation can never fail the query.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::Result;

/// A pluggable translation provider.
#[async_trait]
pub trait Translator: Send + Sync {
    /// Translate `text` into the `dst` language.
    ///
    /// Returns the translated text and the detected source language tag.
    /// `src` is an optional caller hint.
    async fn translate(
        &self,
        text: &str,
        src: Option<&str>,
        dst: &str,
    ) -> Result<(String, String)>;

    /// Provider name for logging.
    fn name(&self) -> &str;
}

/// Whether the text needs translation before the pipeline runs.
///
/// True when the text contains a non-Latin script (Arabic-range blocks are
/// checked explicitly) or when more than 30% of its characters fall above
/// U+00FF.
pub fn needs_translation(text: &str) -> bool {
    if text.chars().any(is_arabic_script) {
        return true;
    }
    let total = text.chars().count();
    if total == 0 {
        return false;
    }
    let high = text.chars().filter(|&c| c as u32 > 0xFF).count();
    high * 10 > total * 3
}

/// Best-effort language guess from the script alone.
///
/// Used when every provider in the chain failed and nothing detected the
/// source language.
pub fn guess_language(text: &str) -> &'static str {
    if text.chars().any(is_arabic_script) {
        "fa"
    } else if text.chars().any(|c| ('\u{0400}'..='\u{04FF}').contains(&c)) {
        "ru"
    } else if text.chars().any(|c| {
        ('\u{4E00}'..='\u{9FFF}').contains(&c) || ('\u{3040}'..='\u{30FF}').contains(&c)
    }) {
        "zh"
    } else {
        "en"
    }
}

fn is_arabic_script(c: char) -> bool {
    matches!(c,
        '\u{0600}'..='\u{06FF}'
        | '\u{0750}'..='\u{077F}'
        | '\u{FB50}'..='\u{FDFF}'
        | '\u{FE70}'..='\u{FEFF}')
}

/// An ordered chain of translation providers with verbatim fallback.
///
/// Providers are tried in order; the first success wins. If every provider
/// fails the original text passes through unchanged and the language is
/// guessed from the script, so a dead translation service degrades the
/// answer quality but never the pipeline.
#[derive(Default, Clone)]
pub struct TranslatorChain {
    providers: Vec<Arc<dyn Translator>>,
}

impl TranslatorChain {
    /// Create an empty chain (verbatim passthrough only).
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a provider to the chain.
    pub fn with_provider(mut self, provider: Arc<dyn Translator>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Translate the text to English, falling through the chain.
    ///
    /// Returns `(text, detected_language)`. Never fails.
    pub async fn translate_to_english(&self, text: &str, hint: Option<&str>) -> (String, String) {
        for provider in &self.providers {
            match provider.translate(text, hint, "en").await {
                Ok((translated, detected)) => {
                    debug!(provider = provider.name(), language = %detected, "query translated");
                    return (translated, detected);
                }
                Err(e) => {
                    warn!(provider = provider.name(), error = %e, "translation provider failed");
                }
            }
        }
        let language = hint.map(str::to_string).unwrap_or_else(|| guess_language(text).to_string());
        (text.to_string(), language)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;

    struct FailingTranslator;

    #[async_trait]
    impl Translator for FailingTranslator {
        async fn translate(
            &self,
            _text: &str,
            _src: Option<&str>,
            _dst: &str,
        ) -> Result<(String, String)> {
            Err(EngineError::Translation {
                provider: "failing".to_string(),
                message: "service down".to_string(),
            })
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    struct FixedTranslator;

    #[async_trait]
    impl Translator for FixedTranslator {
        async fn translate(
            &self,
            _text: &str,
            _src: Option<&str>,
            _dst: &str,
        ) -> Result<(String, String)> {
            Ok(("what is attitude control".to_string(), "fa".to_string()))
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    #[test]
    fn ascii_queries_do_not_need_translation() {
        assert!(!needs_translation("What is the purpose of the Design Justification File?"));
    }

    #[test]
    fn arabic_script_needs_translation() {
        assert!(needs_translation("کنترل موقعیت چیست؟"));
        assert_eq!(guess_language("کنترل موقعیت چیست؟"), "fa");
    }

    #[test]
    fn accented_latin_stays_put() {
        // A stray accent is not a non-Latin script.
        assert!(!needs_translation("what is the r\u{00E9}sum\u{00E9} of section 3?"));
    }

    #[tokio::test]
    async fn chain_falls_through_to_working_provider() {
        let chain = TranslatorChain::new()
            .with_provider(Arc::new(FailingTranslator))
            .with_provider(Arc::new(FixedTranslator));
        let (text, language) = chain.translate_to_english("کنترل موقعیت چیست؟", None).await;
        assert_eq!(text, "what is attitude control");
        assert_eq!(language, "fa");
    }

    #[tokio::test]
    async fn empty_chain_passes_through_verbatim() {
        let chain = TranslatorChain::new();
        let (text, language) = chain.translate_to_english("کنترل موقعیت چیست؟", None).await;
        assert_eq!(text, "کنترل موقعیت چیست؟");
        assert_eq!(language, "fa");
    }
}
