//! [`Wiki`] over the Confluence REST API (`/rest/api/content`), authenticated
//! with a personal access token.

use async_trait::async_trait;
use reqwest::{multipart, Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::json;
use snafu::ResultExt;
use tracing::{debug, error, info, warn};

use crate::contract::{Attachment, NewPage, PageRef, PageUpdate, Wiki};
use crate::error::{
    WikiClientBuildSnafu, WikiDecodeSnafu, WikiError, WikiHttpSnafu, WikiResult,
};

#[derive(Debug, Deserialize)]
struct Version {
    number: u64,
}

#[derive(Debug, Deserialize)]
struct Links {
    webui: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Content {
    id: String,
    #[serde(default)]
    title: String,
    version: Option<Version>,
    #[serde(rename = "_links")]
    links: Option<Links>,
}

impl From<Content> for PageRef {
    fn from(content: Content) -> Self {
        PageRef {
            id: content.id,
            title: content.title,
            version: content.version.map(|v| v.number),
            webui: content.links.and_then(|l| l.webui),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Results {
    #[serde(default = "Vec::new")]
    results: Vec<Content>,
}

pub struct ConfluenceClient {
    client: Client,
    base_url: String,
    token: String,
}

impl ConfluenceClient {
    pub fn new(base_url: &str, token: &str, insecure_skip_tls_verify: bool) -> WikiResult<Self> {
        if insecure_skip_tls_verify {
            warn!(base_url, "TLS certificate verification is disabled for Confluence");
        }
        let client = Client::builder()
            .user_agent(concat!("so-export/", env!("CARGO_PKG_VERSION")))
            .danger_accept_invalid_certs(insecure_skip_tls_verify)
            .build()
            .context(WikiClientBuildSnafu)?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    fn content_url(&self, rest: &str) -> String {
        format!("{}/rest/api/content{rest}", self.base_url)
    }

    /// Send an authenticated request and turn non-2xx answers into errors.
    async fn send(&self, url: &str, request: RequestBuilder) -> WikiResult<Response> {
        debug!(url, "Confluence request");
        let response = request
            .bearer_auth(&self.token)
            .header("Accept", "application/json")
            .send()
            .await
            .context(WikiHttpSnafu { url })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<Failed to decode response body>"));
        error!(status = %status, url, "Confluence API returned error. Response body: {body}");
        Err(WikiError::WikiStatus {
            url: url.to_string(),
            status: status.as_u16(),
            body,
        })
    }

    async fn content(&self, url: &str, request: RequestBuilder) -> WikiResult<Content> {
        self.send(url, request)
            .await?
            .json::<Content>()
            .await
            .context(WikiDecodeSnafu { url })
    }

    async fn results(&self, url: &str, request: RequestBuilder) -> WikiResult<Vec<Content>> {
        let results = self
            .send(url, request)
            .await?
            .json::<Results>()
            .await
            .context(WikiDecodeSnafu { url })?;
        Ok(results.results)
    }
}

#[async_trait]
impl Wiki for ConfluenceClient {
    fn base_url(&self) -> String {
        self.base_url.clone()
    }

    async fn find_page(&self, title: &str, space_key: &str) -> WikiResult<Option<PageRef>> {
        let url = self.content_url("");
        let request = self.client.get(&url).query(&[
            ("spaceKey", space_key),
            ("title", title),
            ("expand", "version"),
        ]);
        let found = self.results(&url, request).await?;
        Ok(found.into_iter().next().map(PageRef::from))
    }

    async fn get_page(&self, page_id: &str) -> WikiResult<PageRef> {
        let url = self.content_url(&format!("/{page_id}"));
        let request = self.client.get(&url).query(&[("expand", "version")]);
        Ok(self.content(&url, request).await?.into())
    }

    async fn create_page(&self, page: NewPage) -> WikiResult<PageRef> {
        let url = self.content_url("");
        let payload = json!({
            "type": "page",
            "title": page.title,
            "space": { "key": page.space_key },
            "ancestors": [{ "id": page.parent_id }],
            "body": {
                "storage": { "value": page.body, "representation": "storage" }
            }
        });
        let created: PageRef = self
            .content(&url, self.client.post(&url).json(&payload))
            .await?
            .into();
        info!(page_id = %created.id, title = %created.title, "Created Confluence page");
        Ok(created)
    }

    async fn update_page(&self, update: PageUpdate) -> WikiResult<()> {
        let url = self.content_url(&format!("/{}", update.id));
        let payload = json!({
            "id": update.id,
            "type": "page",
            "title": update.title,
            "version": { "number": update.version },
            "body": {
                "storage": { "value": update.body, "representation": "storage" }
            }
        });
        self.send(&url, self.client.put(&url).json(&payload)).await?;
        info!(page_id = %update.id, version = update.version, "Updated Confluence page");
        Ok(())
    }

    async fn find_attachment(&self, page_id: &str, filename: &str) -> WikiResult<Option<String>> {
        let url = self.content_url(&format!("/{page_id}/child/attachment"));
        let request = self.client.get(&url).query(&[("filename", filename)]);
        let found = self.results(&url, request).await?;
        Ok(found.into_iter().next().map(|c| c.id))
    }

    async fn upload_attachment(
        &self,
        page_id: &str,
        attachment: Attachment,
        existing: Option<String>,
    ) -> WikiResult<()> {
        let url = match &existing {
            Some(attachment_id) => {
                self.content_url(&format!("/{page_id}/child/attachment/{attachment_id}/data"))
            }
            None => self.content_url(&format!("/{page_id}/child/attachment")),
        };
        let filename = attachment.filename.clone();
        let part = multipart::Part::bytes(attachment.data)
            .file_name(attachment.filename)
            .mime_str(&attachment.mime_type)
            .context(WikiHttpSnafu { url: &url })?;
        let form = multipart::Form::new().part("file", part);

        let request = self
            .client
            .post(&url)
            .header("X-Atlassian-Token", "no-check")
            .multipart(form);
        self.send(&url, request).await?;
        info!(
            page_id,
            filename = %filename,
            replaced = existing.is_some(),
            "Uploaded attachment"
        );
        Ok(())
    }
}
