//! HTML to Markdown conversion for post bodies.
//!
//! Bodies coming from the API are HTML fragments rendered from Markdown, so
//! the element set is small: paragraphs, headings, lists, code, quotes,
//! links, images and the occasional table. Block elements become blocks
//! separated by a blank line; anything unknown renders its children.

use scraper::{ElementRef, Html, Node};

use crate::images::ImageRewrite;

#[derive(Debug, Clone, Default)]
pub struct HtmlOptions {
    /// Levels added to every heading found in the HTML (capped at 6).
    pub heading_offset: usize,
    pub image_rewrite: Option<ImageRewrite>,
}

pub fn html_to_markdown(html: &str, options: &HtmlOptions) -> String {
    let fragment = Html::parse_fragment(html);
    let converter = Converter { options };
    join_blocks(&converter.blocks(fragment.root_element()))
}

struct Converter<'o> {
    options: &'o HtmlOptions,
}

fn is_block(name: &str) -> bool {
    matches!(
        name,
        "p" | "div"
            | "section"
            | "article"
            | "aside"
            | "header"
            | "footer"
            | "main"
            | "nav"
            | "figure"
            | "figcaption"
            | "details"
            | "summary"
            | "address"
            | "dl"
            | "dt"
            | "dd"
            | "li"
            | "h1"
            | "h2"
            | "h3"
            | "h4"
            | "h5"
            | "h6"
            | "pre"
            | "ul"
            | "ol"
            | "blockquote"
            | "hr"
            | "table"
    )
}

fn is_list_block(block: &str) -> bool {
    let first = block.lines().next().unwrap_or("");
    if first.starts_with("- ") || first == "-" {
        return true;
    }
    let digits = first.chars().take_while(|c| c.is_ascii_digit()).count();
    digits > 0 && first[digits..].starts_with('.')
}

fn join_blocks(blocks: &[String]) -> String {
    blocks.join("\n\n")
}

/// Blocks of one list item; a nested list follows its text without a gap.
fn join_item_blocks(blocks: &[String]) -> String {
    let mut out = String::new();
    for (i, block) in blocks.iter().enumerate() {
        if i > 0 {
            out.push_str(if is_list_block(block) { "\n" } else { "\n\n" });
        }
        out.push_str(block);
    }
    out
}

fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_space = false;
    for c in text.chars() {
        if c.is_whitespace() {
            if !in_space {
                out.push(' ');
            }
            in_space = true;
        } else {
            in_space = false;
            if c == '<' {
                out.push_str("&lt;");
            } else {
                out.push(c);
            }
        }
    }
    out
}

/// Tidy accumulated inline text into a paragraph block.
fn finish_paragraph(inline: &str) -> Option<String> {
    let lines: Vec<String> = inline
        .split('\n')
        .map(|line| escape_line_start(line.trim()))
        .collect();
    let start = lines.iter().position(|l| !l.is_empty())?;
    let end = lines.iter().rposition(|l| !l.is_empty())?;
    Some(lines[start..=end].join("  \n"))
}

fn escape_line_start(line: &str) -> String {
    let underline = !line.is_empty()
        && (line.chars().all(|c| c == '=') || line.chars().all(|c| c == '-'));
    if underline || line.starts_with('#') || line.starts_with('>') {
        format!("\\{line}")
    } else {
        line.to_string()
    }
}

fn code_language(el: ElementRef<'_>) -> Option<String> {
    el.value().classes().find_map(|class| {
        class
            .strip_prefix("language-")
            .or_else(|| class.strip_prefix("lang-"))
            .filter(|lang| !lang.is_empty())
            .map(str::to_string)
    })
}

fn longest_run(text: &str, ch: char) -> usize {
    let mut longest = 0;
    let mut current = 0;
    for c in text.chars() {
        if c == ch {
            current += 1;
            longest = longest.max(current);
        } else {
            current = 0;
        }
    }
    longest
}

fn inline_code(code: &str) -> String {
    if code.is_empty() {
        return String::new();
    }
    let ticks = "`".repeat(longest_run(code, '`') + 1);
    if ticks.len() > 1 || code.starts_with(' ') || code.ends_with(' ') {
        format!("{ticks} {code} {ticks}")
    } else {
        format!("`{code}`")
    }
}

fn wrap_emphasis(inner: &str, marker: &str) -> String {
    let trimmed = inner.trim();
    if trimmed.is_empty() {
        return inner.to_string();
    }
    let lead = if inner.starts_with(' ') { " " } else { "" };
    let trail = if inner.ends_with(' ') { " " } else { "" };
    format!("{lead}{marker}{trimmed}{marker}{trail}")
}

impl Converter<'_> {
    fn blocks(&self, el: ElementRef<'_>) -> Vec<String> {
        let mut blocks = Vec::new();
        let mut inline = String::new();

        for child in el.children() {
            match child.value() {
                Node::Text(text) => inline.push_str(&collapse_whitespace(text)),
                Node::Element(element) => {
                    let Some(child_el) = ElementRef::wrap(child) else {
                        continue;
                    };
                    if is_block(element.name()) {
                        blocks.extend(finish_paragraph(&inline));
                        inline.clear();
                        blocks.extend(self.block(child_el));
                    } else {
                        inline.push_str(&self.inline(child_el));
                    }
                }
                _ => {}
            }
        }
        blocks.extend(finish_paragraph(&inline));
        blocks
    }

    fn block(&self, el: ElementRef<'_>) -> Vec<String> {
        let name = el.value().name();
        match name {
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                let level = name[1..].parse::<usize>().unwrap_or(1);
                let level = (level + self.options.heading_offset).min(6);
                let text = self.inline_children(el).replace('\n', " ");
                let text = text.trim();
                if text.is_empty() {
                    Vec::new()
                } else {
                    vec![format!("{} {}", "#".repeat(level), text)]
                }
            }
            "pre" => vec![self.code_block(el)],
            "ul" => self.list(el, false).into_iter().collect(),
            "ol" => self.list(el, true).into_iter().collect(),
            "blockquote" => {
                let inner = join_blocks(&self.blocks(el));
                if inner.is_empty() {
                    return Vec::new();
                }
                let quoted = inner
                    .lines()
                    .map(|line| {
                        if line.is_empty() {
                            ">".to_string()
                        } else {
                            format!("> {line}")
                        }
                    })
                    .collect::<Vec<_>>()
                    .join("\n");
                vec![quoted]
            }
            "hr" => vec!["---".to_string()],
            "table" => self.table(el).into_iter().collect(),
            _ => self.blocks(el),
        }
    }

    fn code_block(&self, pre: ElementRef<'_>) -> String {
        let code_child = pre
            .children()
            .filter_map(ElementRef::wrap)
            .find(|c| c.value().name() == "code");
        let language = code_language(pre)
            .or_else(|| code_child.and_then(code_language))
            .unwrap_or_default();

        let text: String = pre.text().collect();
        let text = text.trim_end_matches('\n');
        let fence = "`".repeat((longest_run(text, '`') + 1).max(3));
        format!("{fence}{language}\n{text}\n{fence}")
    }

    fn list(&self, list: ElementRef<'_>, ordered: bool) -> Option<String> {
        let mut number = list
            .value()
            .attr("start")
            .and_then(|s| s.trim().parse::<usize>().ok())
            .unwrap_or(1);
        let mut items = Vec::new();

        for child in list.children().filter_map(ElementRef::wrap) {
            let marker = if ordered {
                format!("{number}.")
            } else {
                "-".to_string()
            };
            let body = if child.value().name() == "li" {
                number += 1;
                join_item_blocks(&self.blocks(child))
            } else {
                // Nested lists placed directly inside a list.
                join_item_blocks(&self.block(child))
            };
            if body.is_empty() {
                continue;
            }

            let indent = " ".repeat(marker.len() + 1);
            let mut lines = body.lines();
            let mut item = format!("{marker} {}", lines.next().unwrap_or(""));
            for line in lines {
                item.push('\n');
                if !line.is_empty() {
                    item.push_str(&indent);
                    item.push_str(line);
                }
            }
            items.push(item);
        }

        if items.is_empty() {
            None
        } else {
            Some(items.join("\n"))
        }
    }

    fn table(&self, table: ElementRef<'_>) -> Option<String> {
        let rows: Vec<Vec<String>> = table
            .descendants()
            .filter_map(ElementRef::wrap)
            .filter(|e| e.value().name() == "tr")
            .map(|tr| {
                tr.children()
                    .filter_map(ElementRef::wrap)
                    .filter(|c| matches!(c.value().name(), "td" | "th"))
                    .map(|cell| {
                        self.inline_children(cell)
                            .replace('\n', " ")
                            .trim()
                            .replace('|', "\\|")
                    })
                    .collect()
            })
            .collect();

        let width = rows.iter().map(Vec::len).max().unwrap_or(0);
        if width == 0 {
            return None;
        }

        let render = |cells: &[String]| {
            let mut padded: Vec<&str> = cells.iter().map(String::as_str).collect();
            padded.resize(width, "");
            format!("| {} |", padded.join(" | "))
        };

        let mut lines = vec![render(&rows[0])];
        lines.push(format!("|{}", " --- |".repeat(width)));
        lines.extend(rows[1..].iter().map(|r| render(r)));
        Some(lines.join("\n"))
    }

    fn inline_children(&self, el: ElementRef<'_>) -> String {
        let mut out = String::new();
        for child in el.children() {
            match child.value() {
                Node::Text(text) => out.push_str(&collapse_whitespace(text)),
                Node::Element(_) => {
                    if let Some(child_el) = ElementRef::wrap(child) {
                        out.push_str(&self.inline(child_el));
                    }
                }
                _ => {}
            }
        }
        out
    }

    fn inline(&self, el: ElementRef<'_>) -> String {
        match el.value().name() {
            "strong" | "b" => wrap_emphasis(&self.inline_children(el), "**"),
            "em" | "i" => wrap_emphasis(&self.inline_children(el), "*"),
            "del" | "s" | "strike" => wrap_emphasis(&self.inline_children(el), "~~"),
            "code" | "kbd" | "tt" => inline_code(&el.text().collect::<String>()),
            "br" => "\n".to_string(),
            "img" => {
                let Some(src) = el.value().attr("src") else {
                    return String::new();
                };
                let src = self
                    .options
                    .image_rewrite
                    .as_ref()
                    .and_then(|r| r.apply(src))
                    .unwrap_or_else(|| src.to_string());
                let alt = el.value().attr("alt").unwrap_or("");
                format!("![{}]({})", collapse_whitespace(alt).trim(), src)
            }
            "a" => {
                let text = self.inline_children(el);
                match el.value().attr("href") {
                    None => text,
                    Some(href) if text.trim().is_empty() => format!("<{href}>"),
                    Some(href) => match el.value().attr("title") {
                        Some(title) => format!("[{}]({href} \"{title}\")", text.trim()),
                        None => format!("[{}]({href})", text.trim()),
                    },
                }
            }
            _ => self.inline_children(el),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn md(html: &str) -> String {
        html_to_markdown(html, &HtmlOptions::default())
    }

    #[test]
    fn paragraph_becomes_plain_line() {
        assert_eq!(md("<p>Hi</p>"), "Hi");
        assert_eq!(md("<p>one</p>\n<p>two</p>"), "one\n\ntwo");
    }

    #[test]
    fn inline_formatting() {
        assert_eq!(
            md("<p>Use <strong>bold</strong>, <em>it</em> and <code>x()</code>.</p>"),
            "Use **bold**, *it* and `x()`."
        );
        assert_eq!(
            md(r#"<p>See <a href="https://e.x/a">the docs</a></p>"#),
            "See [the docs](https://e.x/a)"
        );
        assert_eq!(md("<p>a<br>b</p>"), "a  \nb");
    }

    #[test]
    fn headings_are_offset() {
        let options = HtmlOptions {
            heading_offset: 1,
            ..Default::default()
        };
        assert_eq!(html_to_markdown("<h1>Top</h1>", &options), "## Top");
        assert_eq!(html_to_markdown("<h6>Deep</h6>", &options), "###### Deep");
    }

    #[test]
    fn code_block_keeps_text_and_language() {
        let html = "<pre class=\"lang-rust s-code-block\"><code>fn main() {\n    println!(\"&lt;hi&gt;\");\n}\n</code></pre>";
        assert_eq!(
            md(html),
            "```rust\nfn main() {\n    println!(\"<hi>\");\n}\n```"
        );
    }

    #[test]
    fn nested_lists() {
        let html = "<ul><li>a<ul><li>b</li></ul></li><li>c</li></ul><ol start=\"3\"><li>x</li><li>y</li></ol>";
        assert_eq!(md(html), "- a\n  - b\n- c\n\n3. x\n4. y");
    }

    #[test]
    fn blockquote_and_rule() {
        assert_eq!(md("<blockquote><p>q1</p><p>q2</p></blockquote><hr>"), "> q1\n>\n> q2\n\n---");
    }

    #[test]
    fn image_and_table() {
        assert_eq!(
            md(r#"<p><img src="https://i.x/a.png" alt="shot"></p>"#),
            "![shot](https://i.x/a.png)"
        );
        assert_eq!(
            md("<table><tr><th>k</th><th>v</th></tr><tr><td>a|b</td><td>1</td></tr></table>"),
            "| k | v |\n| --- | --- |\n| a\\|b | 1 |"
        );
    }

    #[test]
    fn stray_heading_markers_in_text_are_escaped() {
        assert_eq!(md("<p># not a heading</p>"), "\\# not a heading");
    }
}
