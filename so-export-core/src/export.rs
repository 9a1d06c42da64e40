//! Full exports: list every question or article, then enrich each one with
//! its details, answers and comments.

use tracing::{info, warn};

use crate::contract::Transport;
use crate::error::FetchResult;
use crate::fetch::{creation_order, pause, Fetcher};
use crate::model::{Answer, Article, Comment, Question};

/// Posts that carry comments, keyed by the API path segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentParent {
    Question,
    Answer,
    Article,
}

impl CommentParent {
    fn path_segment(self) -> &'static str {
        match self {
            CommentParent::Question => "questions",
            CommentParent::Answer => "answers",
            CommentParent::Article => "articles",
        }
    }
}

impl<T: Transport> Fetcher<T> {
    pub async fn list_questions(&self) -> FetchResult<Vec<Question>> {
        info!("Fetching questions");
        self.fetch_all("questions", &creation_order()).await
    }

    pub async fn list_articles(&self) -> FetchResult<Vec<Article>> {
        info!("Fetching articles");
        self.fetch_all("articles", &creation_order()).await
    }

    pub async fn fetch_comment(&self, comment_id: i64) -> FetchResult<Option<Comment>> {
        self.fetch_one(&format!("comments/{comment_id}"), &[]).await
    }

    /// All comments on a post, each re-fetched individually for full details.
    pub async fn fetch_comments(
        &self,
        parent: CommentParent,
        post_id: i64,
    ) -> FetchResult<Vec<Comment>> {
        let path = format!("{}/{post_id}/comments", parent.path_segment());
        let summaries: Vec<Comment> = self.fetch_all(&path, &creation_order()).await?;
        if summaries.is_empty() {
            return Ok(Vec::new());
        }
        info!(
            post_id,
            parent = parent.path_segment(),
            count = summaries.len(),
            "Fetching comment details"
        );

        let mut detailed = Vec::with_capacity(summaries.len());
        for (i, summary) in summaries.iter().enumerate() {
            if i > 0 {
                pause(self.config().comment_delay).await;
            }
            match self.fetch_comment(summary.comment_id).await? {
                Some(mut comment) => {
                    comment.fill_missing_bodies();
                    detailed.push(comment);
                }
                None => warn!(comment_id = summary.comment_id, "No details found for comment"),
            }
        }
        Ok(detailed)
    }

    pub async fn fetch_answers(&self, question_id: i64) -> FetchResult<Vec<Answer>> {
        self.fetch_all(&format!("questions/{question_id}/answers"), &creation_order())
            .await
    }

    /// A question with its comments, answers and the answers' comments.
    pub async fn fetch_question_details(&self, question_id: i64) -> FetchResult<Option<Question>> {
        let Some(mut question) = self
            .fetch_one::<Question>(&format!("questions/{question_id}"), &[])
            .await?
        else {
            warn!(question_id, "No details found for question");
            return Ok(None);
        };

        question.comments = self
            .fetch_comments(CommentParent::Question, question_id)
            .await?;
        question.answers = self.fetch_answers(question_id).await?;
        for answer in &mut question.answers {
            answer.comments = self
                .fetch_comments(CommentParent::Answer, answer.answer_id)
                .await?;
        }
        Ok(Some(question))
    }

    pub async fn fetch_article_details(&self, article_id: i64) -> FetchResult<Option<Article>> {
        let Some(mut article) = self
            .fetch_one::<Article>(&format!("articles/{article_id}"), &[])
            .await?
        else {
            warn!(article_id, "No details found for article");
            return Ok(None);
        };

        article.comments = self
            .fetch_comments(CommentParent::Article, article_id)
            .await?;
        Ok(Some(article))
    }

    pub async fn export_questions(&self) -> FetchResult<Vec<Question>> {
        let listed = self.list_questions().await?;
        info!(total = listed.len(), "Listed questions, fetching details");

        let mut detailed = Vec::with_capacity(listed.len());
        for (i, summary) in listed.iter().enumerate() {
            if i > 0 {
                pause(self.config().item_delay).await;
            }
            info!(
                question_id = summary.question_id,
                n = i + 1,
                of = listed.len(),
                "Processing question"
            );
            if let Some(question) = self.fetch_question_details(summary.question_id).await? {
                detailed.push(question);
            }
        }
        Ok(detailed)
    }

    pub async fn export_articles(&self) -> FetchResult<Vec<Article>> {
        let listed = self.list_articles().await?;
        info!(total = listed.len(), "Listed articles, fetching details");

        let mut detailed = Vec::with_capacity(listed.len());
        for (i, summary) in listed.iter().enumerate() {
            if i > 0 {
                pause(self.config().item_delay).await;
            }
            info!(
                article_id = summary.article_id,
                n = i + 1,
                of = listed.len(),
                "Processing article"
            );
            if let Some(article) = self.fetch_article_details(summary.article_id).await? {
                detailed.push(article);
            }
        }
        Ok(detailed)
    }
}
