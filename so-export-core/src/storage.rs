//! Confluence storage-format (XHTML) page bodies for exported items.

use std::sync::LazyLock;

use regex::Regex;
use scraper::Html;

use crate::markdown::format_timestamp;
use crate::model::{owner_name, Answer, Article, Comment, Post, Question};

/// A serialized start tag. Attribute values are always double-quoted and
/// may contain a bare `>`.
static START_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<([A-Za-z][A-Za-z0-9:-]*)((?:\s+[^\s=/>"]+(?:="[^"]*")?)*)\s*/?>"#)
        .expect("valid start tag regex")
});

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source",
    "track", "wbr",
];

/// Escape text for use inside XHTML content or attribute values.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// Normalise an HTML fragment into well-formed XHTML.
///
/// The fragment goes through an HTML parser, which balances tags and quotes
/// attributes; void elements are then self-closed and angle brackets in
/// attribute values escaped.
pub fn to_storage_xhtml(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let serialized = fragment.root_element().inner_html();
    START_TAG
        .replace_all(&serialized, |caps: &regex::Captures<'_>| {
            let name = &caps[1];
            let attrs = caps
                .get(2)
                .map_or("", |m| m.as_str())
                .replace('<', "&lt;")
                .replace('>', "&gt;");
            let close = if VOID_ELEMENTS.contains(&name.to_ascii_lowercase().as_str()) {
                "/"
            } else {
                ""
            };
            format!("<{name}{attrs}{close}>")
        })
        .into_owned()
}

/// Page title for an item: its display title with HTML entities decoded.
pub fn page_title<P: Post>(item: &P) -> String {
    let fragment = Html::parse_fragment(&item.display_title());
    let text: String = fragment.root_element().text().collect();
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn body_xhtml(html: Option<&str>, markdown: Option<&str>) -> String {
    match (html, markdown) {
        (Some(html), _) => to_storage_xhtml(html),
        (None, Some(markdown)) => format!("<pre>{}</pre>", escape(markdown)),
        (None, None) => "<p><em>No content</em></p>".to_string(),
    }
}

fn comments_xhtml(comments: &[Comment], out: &mut String) {
    if comments.is_empty() {
        return;
    }
    out.push_str(&format!("<h3>Comments ({})</h3>", comments.len()));
    for comment in comments {
        let text = match (&comment.body, &comment.body_markdown) {
            (Some(html), _) => to_storage_xhtml(html),
            (None, Some(markdown)) => escape(markdown),
            (None, None) => String::new(),
        };
        out.push_str(&format!(
            "<blockquote><p><strong>{}</strong> ({}): {}</p></blockquote>",
            escape(owner_name(comment.owner.as_ref())),
            format_timestamp(comment.creation_date),
            text
        ));
    }
}

fn answer_xhtml(answer: &Answer, out: &mut String) {
    let accepted = if answer.is_accepted { " (Accepted)" } else { "" };
    out.push_str(&format!(
        "<h3>Answer by {}{accepted}</h3>",
        escape(owner_name(answer.owner.as_ref()))
    ));
    out.push_str(&format!(
        "<p><em>Created: {} | Score: {}</em></p>",
        format_timestamp(answer.creation_date),
        answer.score.unwrap_or(0)
    ));
    out.push_str(&body_xhtml(
        answer.body.as_deref(),
        answer.body_markdown.as_deref(),
    ));
    comments_xhtml(&answer.comments, out);
    out.push_str("<hr/>");
}

fn header_xhtml<P: Post>(item: &P, extra: &[(&str, String)], out: &mut String) {
    if let Some(link) = item.link() {
        let link = escape(link);
        out.push_str(&format!(
            "<p><strong>Original link:</strong> <a href=\"{link}\">{link}</a></p>"
        ));
    }
    let mut fields = vec![
        format!("<strong>Author:</strong> {}", escape(item.author())),
        format!(
            "<strong>Created:</strong> {}",
            format_timestamp(item.creation_date())
        ),
    ];
    fields.extend(
        extra
            .iter()
            .map(|(label, value)| format!("<strong>{label}:</strong> {}", escape(value))),
    );
    out.push_str(&format!("<p>{}</p>", fields.join(" | ")));

    if !item.tags().is_empty() {
        out.push_str(&format!(
            "<p><strong>Tags:</strong> {}</p>",
            escape(&item.tags().join(", "))
        ));
    }
    out.push_str("<hr/>");
}

/// Items that can be published as a Confluence page.
pub trait StoragePage: Post {
    fn storage_body(&self) -> String;
}

impl StoragePage for Question {
    fn storage_body(&self) -> String {
        let answered = if self.is_answered.unwrap_or(false) {
            "Yes"
        } else {
            "No"
        };
        let mut out = String::new();
        header_xhtml(
            self,
            &[
                ("Views", self.view_count.unwrap_or(0).to_string()),
                ("Score", self.score.unwrap_or(0).to_string()),
                ("Answered", answered.to_string()),
            ],
            &mut out,
        );
        out.push_str("<h2>Question</h2>");
        out.push_str(&body_xhtml(self.body(), self.body_markdown()));
        comments_xhtml(&self.comments, &mut out);

        out.push_str(&format!("<h2>Answers ({})</h2>", self.answers.len()));
        if self.answers.is_empty() {
            out.push_str("<p><em>No answers yet</em></p>");
        }
        for answer in &self.answers {
            answer_xhtml(answer, &mut out);
        }
        out
    }
}

impl StoragePage for Article {
    fn storage_body(&self) -> String {
        let mut out = String::new();
        header_xhtml(
            self,
            &[
                ("Last edited", format_timestamp(self.last_edit_date)),
                ("Views", self.view_count.unwrap_or(0).to_string()),
            ],
            &mut out,
        );
        out.push_str(&body_xhtml(self.body(), self.body_markdown()));
        comments_xhtml(&self.comments, &mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn void_elements_are_self_closed() {
        assert_eq!(
            to_storage_xhtml(r#"<p>a<br>b</p><img src="x.png" alt=shot><hr>"#),
            r#"<p>a<br/>b</p><img src="x.png" alt="shot"/><hr/>"#
        );
    }

    #[test]
    fn angle_brackets_in_attribute_values_stay_inside_the_value() {
        assert_eq!(
            to_storage_xhtml(r#"<img alt="a > b" src="x"><a title="<br>" href="y">z</a>"#),
            r#"<img alt="a &gt; b" src="x"/><a title="&lt;br&gt;" href="y">z</a>"#
        );
    }

    #[test]
    fn unbalanced_markup_is_closed() {
        assert_eq!(to_storage_xhtml("<p><b>bold</p>"), "<p><b>bold</b></p>");
    }

    #[test]
    fn question_page_lists_answers_and_comments() {
        let q: Question = serde_json::from_str(
            r#"{
                "question_id": 1,
                "title": "T",
                "body": "<p>Q & A<br></p>",
                "link": "https://so.example/q/1",
                "tags": ["a", "b"],
                "comments": [{"comment_id": 5, "body": "c1", "owner": {"display_name": "x<y"}}],
                "answers": [{"answer_id": 2, "body": "<p>ans</p>", "is_accepted": true, "score": 7}]
            }"#,
        )
        .unwrap();
        let page = q.storage_body();
        assert!(page.contains(r#"<a href="https://so.example/q/1">"#));
        assert!(page.contains("<p>Q &amp; A<br/></p>"));
        assert!(page.contains("<strong>x&lt;y</strong>"));
        assert!(page.contains("<h2>Answers (1)</h2>"));
        assert!(page.contains("<h3>Answer by Unknown User (Accepted)</h3>"));
        assert!(page.contains("Score: 7"));
        assert!(page.contains("<strong>Tags:</strong> a, b"));
    }

    #[test]
    fn page_titles_are_decoded() {
        let q: Question =
            serde_json::from_str(r#"{"question_id": 1, "title": "Why &quot;x&quot; &amp; y?"}"#)
                .unwrap();
        assert_eq!(page_title(&q), "Why \"x\" & y?");
    }

    #[test]
    fn article_without_body_uses_markdown() {
        let a: Article =
            serde_json::from_str(r#"{"article_id": 4, "body_markdown": "x < y"}"#).unwrap();
        assert!(a.storage_body().contains("<pre>x &lt; y</pre>"));
    }
}
