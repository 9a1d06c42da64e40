//! # contract: the network seams of the exporter
//!
//! Two traits separate the pipeline logic from HTTP:
//! - [`Transport`] issues a single GET against the content API and hands back
//!   the raw status, rate-limit header and body. Pagination, retries and
//!   decoding live in [`crate::fetch`].
//! - [`Wiki`] covers the handful of Confluence REST calls the importer needs.
//!
//! Both are annotated for `mockall` so tests can script responses without a
//! server. The real implementations are [`crate::fetch::HttpTransport`] and
//! [`crate::confluence::ConfluenceClient`].

use async_trait::async_trait;

#[allow(unused_imports)]
use mockall::{automock, predicate::*};

use crate::error::{FetchResult, WikiResult};

/// Raw response from the content API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    /// Value of the `Backoff` header, in seconds.
    pub backoff_header: Option<u64>,
    pub body: String,
}

impl ApiResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            backoff_header: None,
            body: body.into(),
        }
    }
}

/// A single GET against the content API.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Request `path` (relative to the API base URL) with the given query pairs.
    async fn get(&self, path: &str, query: &[(String, String)]) -> FetchResult<ApiResponse>;
}

/// A Confluence page as returned by the content endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRef {
    pub id: String,
    pub title: String,
    pub version: Option<u64>,
    /// Relative web UI link (`_links.webui`), if reported.
    pub webui: Option<String>,
}

/// Everything needed to create a page under a parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPage {
    pub title: String,
    pub space_key: String,
    pub parent_id: String,
    /// Page body in storage format (XHTML).
    pub body: String,
}

/// Replacement body for an existing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageUpdate {
    pub id: String,
    pub title: String,
    pub body: String,
    /// Version the page will carry after the update.
    pub version: u64,
}

/// A file to attach to a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// The Confluence REST operations used by import and image upload.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Wiki: Send + Sync {
    /// Base URL of the wiki, used to build attachment download links.
    fn base_url(&self) -> String;

    /// Look up a page in `space_key` by exact title.
    async fn find_page(&self, title: &str, space_key: &str) -> WikiResult<Option<PageRef>>;

    /// Fetch a page with its current version.
    async fn get_page(&self, page_id: &str) -> WikiResult<PageRef>;

    async fn create_page(&self, page: NewPage) -> WikiResult<PageRef>;

    async fn update_page(&self, update: PageUpdate) -> WikiResult<()>;

    /// Id of an attachment named `filename` on the page, if one exists.
    async fn find_attachment(&self, page_id: &str, filename: &str) -> WikiResult<Option<String>>;

    /// Upload `attachment`, replacing the data of `existing` when given.
    async fn upload_attachment(
        &self,
        page_id: &str,
        attachment: Attachment,
        existing: Option<String>,
    ) -> WikiResult<()>;
}
