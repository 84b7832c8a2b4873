//! Artifact detection and HTML report rendering.
//!
//! A response gets an artifact when the query asks for one (keyword or
//! intent) or when the answer is long and structured enough to deserve a
//! document view. Rendering is a deterministic markdown-to-HTML pass
//! wrapped in a styled shell; no model is involved.

use crate::response::{Artifact, ArtifactKind};

/// Answers longer than this with structural features auto-trigger a report.
const AUTO_REPORT_CHARS: usize = 1500;

/// Query phrasings that ask for a derived document.
const ARTIFACT_KEYWORDS: &[&str] = &[
    "create report",
    "create a report",
    "generate report",
    "generate a report",
    "generate summary",
    "generate a summary",
    "create a summary",
    "comprehensive analysis",
    "comprehensive report",
    "list all",
    "show all",
    "extract all",
    "compare",
    "contrast",
    "summarize",
];

/// Intents that warrant an artifact regardless of query wording.
const ARTIFACT_INTENTS: &[&str] =
    &["report_generation", "data_extraction", "comparison", "analysis"];

/// Decide whether the response merits an artifact, and build it.
pub fn detect(query: &str, answer: &str, intent: &str) -> Option<Artifact> {
    let query_lower = query.to_lowercase();

    let keyword_hit = ARTIFACT_KEYWORDS.iter().any(|kw| query_lower.contains(kw));
    let intent_hit = ARTIFACT_INTENTS.contains(&intent);
    let long_structured = answer.len() > AUTO_REPORT_CHARS && has_structure(answer);

    if !keyword_hit && !intent_hit && !long_structured {
        return None;
    }

    let kind = if intent == "data_extraction"
        || query_lower.contains("extract all")
        || query_lower.contains("list all")
    {
        ArtifactKind::Data
    } else {
        ArtifactKind::Report
    };

    let title = match kind {
        ArtifactKind::Report => "Analysis Report",
        ArtifactKind::Data => "Extracted Data",
    };

    Some(Artifact { title: title.to_string(), kind, content: render_report(answer, query, title) })
}

/// Whether the answer carries headers, bullet lists, or a table marker.
fn has_structure(answer: &str) -> bool {
    answer.lines().any(|line| {
        let trimmed = line.trim_start();
        trimmed.starts_with('#')
            || trimmed.starts_with("- ")
            || trimmed.starts_with("* ")
            || trimmed.contains('|')
    })
}

/// Wrap converted markdown in the styled report shell.
///
/// The query is printed as the subtitle under the report title.
pub fn render_report(markdown: &str, query: &str, title: &str) -> String {
    let body = markdown_to_html(markdown);
    let query = escape_html(query);
    let title = escape_html(title);
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"UTF-8\">\n<style>\n\
         body {{ font-family: system-ui, sans-serif; padding: 2rem; max-width: 900px; margin: 0 auto; line-height: 1.6; }}\n\
         h1 {{ color: #1e293b; border-bottom: 3px solid #3b82f6; padding-bottom: 0.5rem; }}\n\
         h2, h3 {{ color: #334155; margin-top: 2rem; }}\n\
         p {{ color: #475569; margin: 1rem 0; }}\n\
         .subtitle {{ background: #f1f5f9; padding: 1rem; border-radius: 0.5rem; margin: 1.5rem 0; }}\n\
         strong {{ color: #1e293b; }}\n\
         </style>\n</head>\n<body>\n\
         <h1>{title}</h1>\n\
         <div class=\"subtitle\"><strong>Query:</strong> {query}</div>\n\
         <div class=\"content\">\n{body}\n</div>\n\
         </body>\n</html>"
    )
}

/// Deterministic markdown-to-HTML conversion.
///
/// Handles headers, bold, italics, unordered and ordered lists, and
/// paragraphs. Anything else passes through as paragraph text.
pub fn markdown_to_html(markdown: &str) -> String {
    let mut html: Vec<String> = Vec::new();
    let mut paragraph: Vec<String> = Vec::new();
    let mut list_items: Vec<String> = Vec::new();
    let mut ordered = false;

    let flush_paragraph = |paragraph: &mut Vec<String>, html: &mut Vec<String>| {
        if !paragraph.is_empty() {
            html.push(format!("<p>{}</p>", paragraph.join(" ")));
            paragraph.clear();
        }
    };
    let flush_list = |list_items: &mut Vec<String>, html: &mut Vec<String>, ordered: bool| {
        if !list_items.is_empty() {
            let tag = if ordered { "ol" } else { "ul" };
            let items: Vec<String> =
                list_items.iter().map(|i| format!("<li>{i}</li>")).collect();
            html.push(format!("<{tag}>{}</{tag}>", items.join("")));
            list_items.clear();
        }
    };

    for line in markdown.lines() {
        let trimmed = line.trim();

        if trimmed.is_empty() {
            flush_paragraph(&mut paragraph, &mut html);
            flush_list(&mut list_items, &mut html, ordered);
            continue;
        }

        if let Some(text) = trimmed.strip_prefix("### ") {
            flush_paragraph(&mut paragraph, &mut html);
            flush_list(&mut list_items, &mut html, ordered);
            html.push(format!("<h4>{}</h4>", inline_markup(text)));
        } else if let Some(text) = trimmed.strip_prefix("## ") {
            flush_paragraph(&mut paragraph, &mut html);
            flush_list(&mut list_items, &mut html, ordered);
            html.push(format!("<h3>{}</h3>", inline_markup(text)));
        } else if let Some(text) = trimmed.strip_prefix("# ") {
            flush_paragraph(&mut paragraph, &mut html);
            flush_list(&mut list_items, &mut html, ordered);
            html.push(format!("<h2>{}</h2>", inline_markup(text)));
        } else if let Some(text) = trimmed.strip_prefix("- ").or_else(|| trimmed.strip_prefix("* ")) {
            flush_paragraph(&mut paragraph, &mut html);
            if ordered {
                flush_list(&mut list_items, &mut html, ordered);
            }
            ordered = false;
            list_items.push(inline_markup(text));
        } else if let Some(text) = strip_ordered_prefix(trimmed) {
            flush_paragraph(&mut paragraph, &mut html);
            if !ordered {
                flush_list(&mut list_items, &mut html, ordered);
            }
            ordered = true;
            list_items.push(inline_markup(text));
        } else {
            flush_list(&mut list_items, &mut html, ordered);
            paragraph.push(inline_markup(trimmed));
        }
    }
    flush_paragraph(&mut paragraph, &mut html);
    flush_list(&mut list_items, &mut html, ordered);

    html.join("\n")
}

/// Strip a `1. ` style ordered-list prefix, if present.
fn strip_ordered_prefix(line: &str) -> Option<&str> {
    let dot = line.find(". ")?;
    if dot > 0 && line[..dot].chars().all(|c| c.is_ascii_digit()) {
        Some(&line[dot + 2..])
    } else {
        None
    }
}

/// Escape HTML, then convert `**bold**` and `*italic*` spans.
fn inline_markup(text: &str) -> String {
    let escaped = escape_html(text);
    let bolded = replace_pairs(&escaped, "**", "<strong>", "</strong>");
    replace_pairs(&bolded, "*", "<em>", "</em>")
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// Replace paired occurrences of `delim` with open/close tags.
///
/// An unpaired trailing delimiter is left as-is.
fn replace_pairs(text: &str, delim: &str, open: &str, close: &str) -> String {
    let parts: Vec<&str> = text.split(delim).collect();
    if parts.len() < 3 {
        return text.to_string();
    }
    let mut out = String::new();
    let pairs = (parts.len() - 1) / 2;
    for (i, part) in parts.iter().enumerate() {
        out.push_str(part);
        if i < parts.len() - 1 {
            if i < pairs * 2 {
                out.push_str(if i % 2 == 0 { open } else { close });
            } else {
                out.push_str(delim);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_keyword_triggers_artifact() {
        let artifact = detect("Create a comprehensive report about AOCS", "short answer", "research");
        let artifact = artifact.unwrap();
        assert_eq!(artifact.kind, ArtifactKind::Report);
        assert!(artifact.content.contains("<h1>"));
        assert!(artifact.content.contains("Create a comprehensive report about AOCS"));
    }

    #[test]
    fn extraction_intent_produces_data_artifact() {
        let artifact = detect("list all interface requirements", "some answer", "data_extraction");
        assert_eq!(artifact.unwrap().kind, ArtifactKind::Data);
    }

    #[test]
    fn plain_short_answers_get_no_artifact() {
        assert!(detect("what is the pointing budget", "42 arcsec.", "factual_lookup").is_none());
    }

    #[test]
    fn long_structured_answers_auto_trigger() {
        let answer = format!("# Findings\n\n- first\n- second\n\n{}", "padding ".repeat(300));
        assert!(detect("tell me about the findings", &answer, "research").is_some());
    }

    #[test]
    fn long_unstructured_answers_do_not_trigger() {
        let answer = "padding ".repeat(300);
        assert!(detect("tell me everything", &answer, "research").is_none());
    }

    #[test]
    fn markdown_headers_and_lists_convert() {
        let html = markdown_to_html("# Title\n\nSome **bold** text.\n\n- one\n- two\n\n1. first\n2. second");
        assert!(html.contains("<h2>Title</h2>"));
        assert!(html.contains("<strong>bold</strong>"));
        assert!(html.contains("<ul><li>one</li><li>two</li></ul>"));
        assert!(html.contains("<ol><li>first</li><li>second</li></ol>"));
    }

    #[test]
    fn html_in_answers_is_escaped() {
        let html = markdown_to_html("watch out for <script> tags & things");
        assert!(html.contains("&lt;script&gt;"));
        assert!(html.contains("&amp;"));
    }

    #[test]
    fn unpaired_asterisks_are_preserved() {
        assert_eq!(inline_markup("2 * 3 is six"), "2 * 3 is six");
        assert_eq!(inline_markup("**bold** and *em*"), "<strong>bold</strong> and <em>em</em>");
    }
}
