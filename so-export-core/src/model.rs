//! API-shaped records for Stack Overflow for Teams content.
//!
//! Records are transient: fetched once per run, written to disk, read back by
//! the converter and importer. Fields the API returns but this crate does not
//! use are kept in `extra` so that JSON written by the exporter holds
//! everything the API sent.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Display name used when a record carries no owner.
pub const UNKNOWN_USER: &str = "Unknown User";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Owner {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    #[serde(alias = "id")]
    pub comment_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_markdown: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<Owner>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_date: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Comment {
    /// Make sure both `body` and `body_markdown` are present when either is.
    pub fn fill_missing_bodies(&mut self) {
        match (&self.body, &self.body_markdown) {
            (Some(body), None) => self.body_markdown = Some(body.clone()),
            (None, Some(markdown)) => self.body = Some(markdown.clone()),
            _ => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    #[serde(alias = "id")]
    pub answer_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_markdown: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<Owner>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_date: Option<i64>,
    #[serde(default)]
    pub is_accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<i64>,
    #[serde(default)]
    pub comments: Vec<Comment>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    #[serde(alias = "id")]
    pub question_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_markdown: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<Owner>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_date: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_edit_date: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_answered: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_count: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(default)]
    pub comments: Vec<Comment>,
    #[serde(default)]
    pub answers: Vec<Answer>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    #[serde(alias = "id")]
    pub article_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_markdown: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<Owner>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_date: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_edit_date: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_count: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(default)]
    pub comments: Vec<Comment>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Accessors shared by questions and articles.
pub trait Post {
    /// Singular noun used in headings, page titles and logs.
    const LABEL: &'static str;

    fn id(&self) -> i64;
    fn title(&self) -> Option<&str>;
    fn body(&self) -> Option<&str>;
    fn body_markdown(&self) -> Option<&str>;
    fn tags(&self) -> &[String];
    fn owner(&self) -> Option<&Owner>;
    fn creation_date(&self) -> Option<i64>;
    fn link(&self) -> Option<&str>;
    fn comments(&self) -> &[Comment];

    /// HTML bodies of the post and its answers; the same fields as
    /// [`Post::bodies_mut`] minus the Markdown ones.
    fn html_bodies(&self) -> Vec<&str>;

    /// Every body field (HTML and Markdown) of the post and its answers.
    fn bodies_mut(&mut self) -> Vec<&mut String>;

    fn display_title(&self) -> String {
        match self.title() {
            Some(title) if !title.trim().is_empty() => title.to_string(),
            _ => format!("Untitled {}", Self::LABEL),
        }
    }

    fn author(&self) -> &str {
        owner_name(self.owner())
    }
}

pub fn owner_name(owner: Option<&Owner>) -> &str {
    owner
        .and_then(|o| o.display_name.as_deref())
        .unwrap_or(UNKNOWN_USER)
}

impl Post for Question {
    const LABEL: &'static str = "Question";

    fn id(&self) -> i64 {
        self.question_id
    }
    fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }
    fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }
    fn body_markdown(&self) -> Option<&str> {
        self.body_markdown.as_deref()
    }
    fn tags(&self) -> &[String] {
        self.tags.as_deref().unwrap_or(&[])
    }
    fn owner(&self) -> Option<&Owner> {
        self.owner.as_ref()
    }
    fn creation_date(&self) -> Option<i64> {
        self.creation_date
    }
    fn link(&self) -> Option<&str> {
        self.link.as_deref()
    }
    fn comments(&self) -> &[Comment] {
        &self.comments
    }

    fn html_bodies(&self) -> Vec<&str> {
        let mut bodies: Vec<&str> = self.body.as_deref().into_iter().collect();
        bodies.extend(self.answers.iter().filter_map(|a| a.body.as_deref()));
        bodies
    }

    fn bodies_mut(&mut self) -> Vec<&mut String> {
        let mut bodies: Vec<&mut String> = Vec::new();
        bodies.extend(self.body.as_mut());
        bodies.extend(self.body_markdown.as_mut());
        for answer in &mut self.answers {
            bodies.extend(answer.body.as_mut());
            bodies.extend(answer.body_markdown.as_mut());
        }
        bodies
    }
}

impl Post for Article {
    const LABEL: &'static str = "Article";

    fn id(&self) -> i64 {
        self.article_id
    }
    fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }
    fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }
    fn body_markdown(&self) -> Option<&str> {
        self.body_markdown.as_deref()
    }
    fn tags(&self) -> &[String] {
        self.tags.as_deref().unwrap_or(&[])
    }
    fn owner(&self) -> Option<&Owner> {
        self.owner.as_ref()
    }
    fn creation_date(&self) -> Option<i64> {
        self.creation_date
    }
    fn link(&self) -> Option<&str> {
        self.link.as_deref()
    }
    fn comments(&self) -> &[Comment] {
        &self.comments
    }

    fn html_bodies(&self) -> Vec<&str> {
        self.body.as_deref().into_iter().collect()
    }

    fn bodies_mut(&mut self) -> Vec<&mut String> {
        let mut bodies: Vec<&mut String> = Vec::new();
        bodies.extend(self.body.as_mut());
        bodies.extend(self.body_markdown.as_mut());
        bodies
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn question_accepts_bare_id_and_keeps_unknown_fields() {
        let q: Question = serde_json::from_str(
            r#"{"id": 7, "title": "Q", "body": "<p>x</p>", "up_vote_count": 3}"#,
        )
        .unwrap();
        assert_eq!(q.question_id, 7);
        assert_eq!(q.extra.get("up_vote_count"), Some(&Value::from(3)));
        assert!(q.answers.is_empty());

        let back = serde_json::to_value(&q).unwrap();
        assert_eq!(back["up_vote_count"], 3);
        assert!(back.get("link").is_none(), "absent fields stay absent");
    }

    #[test]
    fn comment_bodies_are_filled_from_each_other() {
        let mut only_html: Comment =
            serde_json::from_str(r#"{"comment_id": 1, "body": "hi <code>x</code>"}"#).unwrap();
        only_html.fill_missing_bodies();
        assert_eq!(only_html.body_markdown.as_deref(), Some("hi <code>x</code>"));

        let mut only_md: Comment =
            serde_json::from_str(r#"{"comment_id": 2, "body_markdown": "hi `x`"}"#).unwrap();
        only_md.fill_missing_bodies();
        assert_eq!(only_md.body.as_deref(), Some("hi `x`"));
    }

    #[test]
    fn display_title_falls_back_to_label() {
        let a: Article = serde_json::from_str(r#"{"article_id": 3}"#).unwrap();
        assert_eq!(a.display_title(), "Untitled Article");
        assert_eq!(a.author(), UNKNOWN_USER);
    }

    #[test]
    fn question_html_bodies_cover_answers_not_comments() {
        let q: Question = serde_json::from_str(
            r#"{
                "question_id": 1,
                "body": "q",
                "comments": [{"comment_id": 10, "body": "qc"}],
                "answers": [{"answer_id": 2, "body": "a", "comments": [{"comment_id": 11, "body": "ac"}]}]
            }"#,
        )
        .unwrap();
        assert_eq!(q.html_bodies(), vec!["q", "a"]);
    }
}
