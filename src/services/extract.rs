// src/services/extract.rs

//! Readable-text extraction from HTML.
//!
//! The primary extractor scores container elements the way readability-style
//! tools do and returns the text of the best one. When no container stands
//! out, the fallback returns all document text minus scripts and styles.

use std::collections::HashMap;

use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};

use crate::error::{AppError, Result};
use crate::utils::normalize_whitespace;

/// Elements never treated as readable content by the primary extractor.
const NON_CONTENT_TAGS: &[&str] = &[
    "script", "style", "noscript", "template", "svg", "iframe", "nav", "header", "footer",
    "aside", "form", "button", "select",
];

/// Elements stripped by the fallback extractor.
const FALLBACK_SKIP_TAGS: &[&str] = &["script", "style"];

/// Paragraphs shorter than this do not contribute to a container's score.
const MIN_PARAGRAPH_CHARS: usize = 25;

/// Primary result shorter than this is discarded in favour of the fallback.
const MIN_ARTICLE_CHARS: usize = 140;

/// Extracts readable text from raw HTML.
#[derive(Debug, Clone)]
pub struct ContentExtractor {
    paragraph_sel: Selector,
    link_sel: Selector,
    unlikely: Regex,
    likely: Regex,
}

impl ContentExtractor {
    pub fn new() -> Result<Self> {
        Ok(Self {
            paragraph_sel: parse_selector("p, pre")?,
            link_sel: parse_selector("a")?,
            unlikely: parse_regex(
                r"(?i)comment|footer|sidebar|nav|menu|share|social|banner|cookie|promo|related|advert|popup|subscribe",
            )?,
            likely: parse_regex(r"(?i)article|body|content|entry|main|post|text|story")?,
        })
    }

    /// Extract text, trying the primary extractor first.
    pub fn extract(&self, html: &str) -> Option<String> {
        let document = Html::parse_document(html);
        if let Some(text) = self.extract_readable(&document) {
            return Some(text);
        }
        log::debug!("Readable extraction found no main content, using plain-text fallback");
        extract_plain_text(&document)
    }

    /// Readability-style extraction of the main content block.
    pub fn extract_readable(&self, document: &Html) -> Option<String> {
        let mut scores = HashMap::new();

        for paragraph in document.select(&self.paragraph_sel) {
            let text = element_text(paragraph, NON_CONTENT_TAGS);
            let chars = text.chars().count();
            if chars < MIN_PARAGRAPH_CHARS {
                continue;
            }
            let commas = text.matches(',').count() as f64;
            let score = 1.0 + commas + (chars / 100).min(3) as f64;

            let parent = paragraph.parent().and_then(ElementRef::wrap);
            let grandparent = parent
                .and_then(|p| p.parent())
                .and_then(ElementRef::wrap);

            for (ancestor, share) in [(parent, 1.0), (grandparent, 0.5)] {
                let Some(ancestor) = ancestor else { continue };
                if is_inside_non_content(ancestor) {
                    continue;
                }
                let entry = scores
                    .entry(ancestor.id())
                    .or_insert_with(|| (ancestor, self.initial_score(ancestor)));
                entry.1 += score * share;
            }
        }

        let (best, _) = scores
            .into_values()
            .map(|(element, score)| (element, score * (1.0 - self.link_density(element))))
            .max_by(|a, b| a.1.total_cmp(&b.1))?;

        let text = element_text(best, NON_CONTENT_TAGS);
        (text.chars().count() >= MIN_ARTICLE_CHARS).then_some(text)
    }

    /// Tag bonus plus class/id weight.
    fn initial_score(&self, element: ElementRef) -> f64 {
        let tag_score = match element.value().name() {
            "article" | "main" => 10.0,
            "div" => 5.0,
            "section" | "pre" | "td" | "blockquote" => 3.0,
            "address" | "ol" | "ul" | "dl" | "dd" | "dt" | "li" => -3.0,
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "th" => -5.0,
            _ => 0.0,
        };
        let role_score = if element.value().attr("role") == Some("main") {
            10.0
        } else {
            0.0
        };
        tag_score + role_score + self.class_weight(element)
    }

    fn class_weight(&self, element: ElementRef) -> f64 {
        ["class", "id"]
            .iter()
            .filter_map(|attr| element.value().attr(attr))
            .map(|value| {
                let mut weight = 0.0;
                if self.unlikely.is_match(value) {
                    weight -= 25.0;
                }
                if self.likely.is_match(value) {
                    weight += 25.0;
                }
                weight
            })
            .sum()
    }

    /// Share of the element's text that sits inside links.
    fn link_density(&self, element: ElementRef) -> f64 {
        let total = element_text(element, NON_CONTENT_TAGS).chars().count();
        if total == 0 {
            return 1.0;
        }
        let linked: usize = element
            .select(&self.link_sel)
            .map(|a| element_text(a, NON_CONTENT_TAGS).chars().count())
            .sum();
        (linked as f64 / total as f64).min(1.0)
    }
}

/// Generic HTML-to-text: all text except scripts and styles, whitespace collapsed.
pub fn extract_plain_text(document: &Html) -> Option<String> {
    let text = element_text(document.root_element(), FALLBACK_SKIP_TAGS);
    (!text.is_empty()).then_some(text)
}

/// Normalized text of an element, skipping the given subtrees.
fn element_text(element: ElementRef, skip: &[&str]) -> String {
    let mut out = String::new();
    collect_text(element, skip, &mut out);
    normalize_whitespace(&out)
}

fn collect_text(element: ElementRef, skip: &[&str], out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => {
                out.push_str(text);
                out.push(' ');
            }
            Node::Element(el) if !skip.contains(&el.name()) => {
                if let Some(child) = ElementRef::wrap(child) {
                    collect_text(child, skip, out);
                }
            }
            _ => {}
        }
    }
}

fn is_inside_non_content(element: ElementRef) -> bool {
    std::iter::once(element)
        .chain(element.ancestors().filter_map(ElementRef::wrap))
        .any(|el| NON_CONTENT_TAGS.contains(&el.value().name()))
}

fn parse_selector(s: &str) -> Result<Selector> {
    Selector::parse(s).map_err(|e| AppError::selector(s, format!("{e:?}")))
}

fn parse_regex(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| AppError::config(format!("invalid pattern {pattern}: {e}")))
}
