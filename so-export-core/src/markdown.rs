//! Render exported questions and articles as one Markdown document.
//!
//! Every item becomes a section opened by a single `# title` heading; all
//! other headings (from bodies or answers) sit at level two or below, so the
//! number of top-level headings equals the number of items. Image URLs are
//! collected while bodies are rendered and returned alongside the document.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use tracing::info;

use crate::error::StoreResult;
use crate::html::{html_to_markdown, HtmlOptions};
use crate::images::{
    html_image_urls, markdown_image_urls, rewrite_markdown_images, ImageRewrite, UrlList,
};
use crate::model::{owner_name, Answer, Article, Comment, Post, Question};
use crate::store::{read_items, write_atomically, write_lines};

#[derive(Debug, Clone, Default)]
pub struct ConvertOptions {
    /// Rewrite image URLs in the Markdown to local paths.
    pub image_rewrite: Option<ImageRewrite>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversion {
    pub markdown: String,
    /// Every image URL referenced by the items, first occurrence order.
    pub image_urls: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvertReport {
    pub items: usize,
    pub images: usize,
}

pub fn format_timestamp(timestamp: Option<i64>) -> String {
    match timestamp {
        Some(ts) => DateTime::<Utc>::from_timestamp(ts, 0)
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| ts.to_string()),
        None => "Unknown".to_string(),
    }
}

fn is_fence(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    if line.len() - trimmed.len() > 3 {
        return None;
    }
    if trimmed.starts_with("```") {
        Some("```")
    } else if trimmed.starts_with("~~~") {
        Some("~~~")
    } else {
        None
    }
}

/// Push every heading outside code fences down by `levels` (max 6).
///
/// Setext headings (a text line underlined with `=` or `-`) are rewritten as
/// ATX headings so they are demoted too.
pub fn demote_headings(markdown: &str, levels: usize) -> String {
    let mut fence: Option<&str> = None;
    let mut out: Vec<String> = Vec::new();
    let mut prev_text = false;

    for line in markdown.lines() {
        if let Some(open) = fence {
            if is_fence(line) == Some(open) {
                fence = None;
            }
            out.push(line.to_string());
            continue;
        }
        if let Some(marker) = is_fence(line) {
            fence = Some(marker);
            prev_text = false;
            out.push(line.to_string());
            continue;
        }

        if prev_text {
            if let Some(level) = setext_level(line) {
                if let Some(text) = out.pop() {
                    let level = (level + levels).min(6);
                    out.push(format!("{} {}", "#".repeat(level), text.trim()));
                }
                prev_text = false;
                continue;
            }
        }

        let trimmed = line.trim_start();
        let indent = line.len() - trimmed.len();
        let hashes = trimmed.chars().take_while(|c| *c == '#').count();
        let is_heading = (1..=6).contains(&hashes)
            && indent <= 3
            && trimmed[hashes..]
                .chars()
                .next()
                .map_or(true, char::is_whitespace);
        if is_heading {
            let level = (hashes + levels).min(6);
            out.push(format!("{}{}", "#".repeat(level), &trimmed[hashes..]));
            prev_text = false;
        } else {
            prev_text = indent <= 3 && is_paragraph_text(trimmed);
            out.push(line.to_string());
        }
    }
    out.join("\n")
}

/// Level of a setext underline (`===` is 1, `---` is 2).
fn setext_level(line: &str) -> Option<usize> {
    let trimmed = line.trim();
    if line.len() - line.trim_start().len() > 3 || trimmed.is_empty() {
        return None;
    }
    if trimmed.chars().all(|c| c == '=') {
        Some(1)
    } else if trimmed.chars().all(|c| c == '-') {
        Some(2)
    } else {
        None
    }
}

/// Whether a line can be the text of a setext heading.
fn is_paragraph_text(trimmed: &str) -> bool {
    !trimmed.is_empty()
        && !trimmed.starts_with('>')
        && !trimmed.starts_with("- ")
        && !trimmed.starts_with("* ")
        && !trimmed.starts_with("+ ")
        && !is_ordered_item(trimmed)
        && setext_level(trimmed).is_none()
}

fn is_ordered_item(trimmed: &str) -> bool {
    let digits = trimmed.chars().take_while(char::is_ascii_digit).count();
    digits > 0 && matches!(trimmed[digits..].chars().next(), Some('.' | ')'))
}

fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Shared state while rendering a document.
pub struct Renderer<'o> {
    options: &'o ConvertOptions,
    html: HtmlOptions,
    urls: UrlList,
}

impl<'o> Renderer<'o> {
    pub fn new(options: &'o ConvertOptions) -> Self {
        Self {
            options,
            html: HtmlOptions {
                heading_offset: 1,
                image_rewrite: options.image_rewrite.clone(),
            },
            urls: UrlList::new(),
        }
    }

    /// Markdown for a body, preferring HTML and falling back to the raw Markdown.
    pub fn body(&mut self, html: Option<&str>, markdown: Option<&str>) -> String {
        match (html, markdown) {
            (Some(html), _) => {
                self.urls.extend(html_image_urls(html));
                html_to_markdown(html, &self.html)
            }
            (None, Some(markdown)) => {
                self.urls.extend(markdown_image_urls(markdown));
                let demoted = demote_headings(markdown.trim(), 1);
                match &self.options.image_rewrite {
                    Some(rewrite) => rewrite_markdown_images(&demoted, rewrite),
                    None => demoted,
                }
            }
            (None, None) => String::new(),
        }
    }

    fn comments(&mut self, comments: &[Comment], out: &mut String) {
        if comments.is_empty() {
            return;
        }
        out.push_str(&format!("**Comments ({}):**\n\n", comments.len()));
        for comment in comments {
            let text = self.body(comment.body.as_deref(), comment.body_markdown.as_deref());
            let mut lines = text.lines();
            out.push_str(&format!(
                "> **{}** ({}): {}\n",
                owner_name(comment.owner.as_ref()),
                format_timestamp(comment.creation_date),
                lines.next().unwrap_or("")
            ));
            for line in lines {
                if line.is_empty() {
                    out.push_str(">\n");
                } else {
                    out.push_str(&format!("> {line}\n"));
                }
            }
            out.push('\n');
        }
    }

    fn answer(&mut self, answer: &Answer, out: &mut String) {
        let accepted = if answer.is_accepted { " (Accepted)" } else { "" };
        out.push_str(&format!(
            "### Answer by {}{accepted}\n\n",
            owner_name(answer.owner.as_ref())
        ));
        out.push_str(&format!(
            "- **Created:** {}\n- **Score:** {}\n\n",
            format_timestamp(answer.creation_date),
            answer.score.unwrap_or(0)
        ));
        let body = self.body(answer.body.as_deref(), answer.body_markdown.as_deref());
        if !body.is_empty() {
            out.push_str(&body);
            out.push_str("\n\n");
        }
        self.comments(&answer.comments, out);
    }

    /// One item section, ending with a newline.
    pub fn item<P: RenderMarkdown>(&mut self, item: &P) -> String {
        let mut out = format!("# {}\n\n", single_line(&item.display_title()));
        for (label, value) in item.metadata() {
            out.push_str(&format!("- **{label}:** {value}\n"));
        }
        out.push('\n');

        let body = self.body(item.body(), item.body_markdown());
        if body.is_empty() {
            out.push_str("*No content*\n\n");
        } else {
            out.push_str(&body);
            out.push_str("\n\n");
        }
        self.comments(item.comments(), &mut out);
        item.render_tail(self, &mut out);

        while out.ends_with("\n\n") {
            out.pop();
        }
        out
    }
}

/// Per-kind parts of an item section.
pub trait RenderMarkdown: Post {
    /// Label/value lines shown under the title.
    fn metadata(&self) -> Vec<(&'static str, String)>;

    /// Content rendered after the item's comments.
    fn render_tail(&self, _renderer: &mut Renderer<'_>, _out: &mut String) {}
}

fn tag_list(tags: &[String]) -> String {
    if tags.is_empty() {
        "None".to_string()
    } else {
        tags.join(", ")
    }
}

impl RenderMarkdown for Question {
    fn metadata(&self) -> Vec<(&'static str, String)> {
        let status = if self.is_answered.unwrap_or(false) {
            "Answered"
        } else {
            "Unanswered"
        };
        vec![
            ("Tags", tag_list(self.tags())),
            ("Author", self.author().to_string()),
            ("Created", format_timestamp(self.creation_date)),
            ("Status", status.to_string()),
        ]
    }

    fn render_tail(&self, renderer: &mut Renderer<'_>, out: &mut String) {
        out.push_str(&format!("## Answers ({})\n\n", self.answers.len()));
        if self.answers.is_empty() {
            out.push_str("*No answers yet*\n\n");
        }
        for answer in &self.answers {
            renderer.answer(answer, out);
        }
    }
}

impl RenderMarkdown for Article {
    fn metadata(&self) -> Vec<(&'static str, String)> {
        vec![
            ("Tags", tag_list(self.tags())),
            ("Author", self.author().to_string()),
            ("Created", format_timestamp(self.creation_date)),
            ("Last Edited", format_timestamp(self.last_edit_date)),
            ("Views", self.view_count.unwrap_or(0).to_string()),
        ]
    }
}

/// Render `items` as one document, sections separated by `---`.
pub fn convert<P: RenderMarkdown>(items: &[P], options: &ConvertOptions) -> Conversion {
    let mut renderer = Renderer::new(options);
    let sections: Vec<String> = items.iter().map(|item| renderer.item(item)).collect();

    Conversion {
        markdown: sections.join("\n---\n\n"),
        image_urls: renderer.urls.into_vec(),
    }
}

/// Read items from `input`, write the document to `output` and the image
/// URL list to `image_list`.
pub fn convert_file<P: RenderMarkdown + DeserializeOwned>(
    input: &Path,
    output: &Path,
    image_list: &Path,
    options: &ConvertOptions,
) -> StoreResult<ConvertReport> {
    let items: Vec<P> = read_items(input)?;
    let conversion = convert(&items, options);

    write_atomically(output, conversion.markdown.as_bytes())?;
    write_lines(image_list, &conversion.image_urls)?;

    info!(
        kind = P::LABEL,
        items = items.len(),
        images = conversion.image_urls.len(),
        output = %output.display(),
        image_list = %image_list.display(),
        "Converted items to Markdown"
    );
    Ok(ConvertReport {
        items: items.len(),
        images: conversion.image_urls.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_render_in_utc() {
        assert_eq!(format_timestamp(Some(0)), "1970-01-01 00:00:00 UTC");
        assert_eq!(format_timestamp(Some(1_700_000_000)), "2023-11-14 22:13:20 UTC");
        assert_eq!(format_timestamp(None), "Unknown");
    }

    #[test]
    fn demotes_headings_outside_fences_only() {
        let md = "# Title\ntext #1\n```\n# shell comment\n```\n###### six\n#tag";
        assert_eq!(
            demote_headings(md, 1),
            "## Title\ntext #1\n```\n# shell comment\n```\n###### six\n#tag"
        );
    }

    #[test]
    fn setext_underlines_become_atx_headings() {
        let md = "Title\n===\n\n---\n- item\n---\n1. step\n---\n# Atx\n===";
        assert_eq!(
            demote_headings(md, 1),
            "## Title\n\n---\n- item\n---\n1. step\n---\n## Atx\n==="
        );
    }

    #[test]
    fn question_section_layout() {
        let q: Question = serde_json::from_str(
            r#"{
                "question_id": 1,
                "title": "How?",
                "body": "<h1>Context</h1><p>Body</p>",
                "tags": ["rust"],
                "owner": {"display_name": "ann"},
                "creation_date": 0,
                "is_answered": true,
                "comments": [{"comment_id": 3, "body": "nice", "owner": {"display_name": "bob"}, "creation_date": 60}],
                "answers": [{"answer_id": 2, "body": "<p>Like this</p>", "is_accepted": true, "score": 4}]
            }"#,
        )
        .unwrap();
        let out = convert(&[q], &ConvertOptions::default()).markdown;
        assert_eq!(
            out,
            "# How?\n\n\
             - **Tags:** rust\n\
             - **Author:** ann\n\
             - **Created:** 1970-01-01 00:00:00 UTC\n\
             - **Status:** Answered\n\n\
             ## Context\n\nBody\n\n\
             **Comments (1):**\n\n\
             > **bob** (1970-01-01 00:01:00 UTC): nice\n\n\
             ## Answers (1)\n\n\
             ### Answer by Unknown User (Accepted)\n\n\
             - **Created:** Unknown\n\
             - **Score:** 4\n\n\
             Like this\n"
        );
    }

    #[test]
    fn markdown_fallback_is_demoted_and_rewritten() {
        let a: Article = serde_json::from_str(
            r##"{"article_id": 9, "body_markdown": "# Intro\n![x](https://img.host/a.png)"}"##,
        )
        .unwrap();
        let options = ConvertOptions {
            image_rewrite: Some(ImageRewrite {
                prefix: "https://img.host/".into(),
                local_dir: "images".into(),
            }),
        };
        let conversion = convert(&[a], &options);
        assert!(conversion.markdown.starts_with("# Untitled Article\n"));
        assert!(conversion.markdown.contains("## Intro\n![x](images/a.png)"));
        assert_eq!(conversion.image_urls, vec!["https://img.host/a.png"]);
    }

    #[test]
    fn empty_input_renders_nothing() {
        let conversion = convert::<Question>(&[], &ConvertOptions::default());
        assert!(conversion.markdown.is_empty());
        assert!(conversion.image_urls.is_empty());
    }
}
