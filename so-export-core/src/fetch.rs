//! Paginated, rate-limit aware access to the Stack Overflow for Teams API.
//!
//! [`Fetcher`] drives a [`Transport`]: it adds the credentials and filter to
//! every request, walks `page=1..` until the API reports `has_more: false` (or
//! returns an empty page), and sleeps and retries the *same* request when the
//! API throttles it. All requests are issued one after another.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use snafu::ResultExt;
use tracing::{debug, error, info, warn};

use crate::contract::{ApiResponse, Transport};
use crate::error::{
    ApiSnafu, ClientBuildSnafu, DecodeSnafu, FetchError, FetchResult, HttpSnafu,
};

/// Filter that includes `body`, `body_markdown` and comment bodies.
pub const DEFAULT_FILTER: &str = "!-NjR7YBAGtXRbJN1ECErSn*8.E3y04xrL";

/// `error_id` the API uses for `throttle_violation`.
const THROTTLE_ERROR_ID: i64 = 502;

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub api_key: String,
    pub filter: Option<String>,
    /// Sent as `site=` on every request when set.
    pub site: Option<String>,
    pub page_size: u32,
    /// Pause between two pages of one listing.
    pub page_delay: Duration,
    /// Pause between two items while enriching.
    pub item_delay: Duration,
    /// Pause between two comment detail requests.
    pub comment_delay: Duration,
    /// Wait used when a throttled response carries no `Backoff` header.
    pub default_backoff: Duration,
    pub max_rate_limit_retries: u32,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            filter: Some(DEFAULT_FILTER.to_string()),
            site: None,
            page_size: 100,
            page_delay: Duration::from_secs(1),
            item_delay: Duration::from_millis(500),
            comment_delay: Duration::from_millis(200),
            default_backoff: Duration::from_secs(30),
            max_rate_limit_retries: 10,
        }
    }
}

/// The common response wrapper of the API.
#[derive(Debug, Deserialize)]
pub struct Page<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
    #[serde(default)]
    pub has_more: bool,
    /// Seconds the client must wait before hitting the same method again.
    #[serde(default)]
    pub backoff: Option<u64>,
    #[serde(default)]
    pub quota_remaining: Option<i64>,
    #[serde(default)]
    pub error_id: Option<i64>,
    #[serde(default)]
    pub error_name: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error_id: Option<i64>,
}

fn is_throttled(response: &ApiResponse) -> bool {
    if response.status == 429 {
        return true;
    }
    if (200..300).contains(&response.status) {
        return false;
    }
    serde_json::from_str::<ErrorEnvelope>(&response.body)
        .ok()
        .and_then(|e| e.error_id)
        == Some(THROTTLE_ERROR_ID)
}

pub(crate) async fn pause(duration: Duration) {
    if !duration.is_zero() {
        tokio::time::sleep(duration).await;
    }
}

pub struct Fetcher<T> {
    transport: T,
    config: FetchConfig,
}

impl<T: Transport> Fetcher<T> {
    pub fn new(transport: T, config: FetchConfig) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    fn query(&self, params: &[(&str, String)]) -> Vec<(String, String)> {
        let mut query: Vec<(String, String)> = params
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        if let Some(site) = &self.config.site {
            query.push(("site".into(), site.clone()));
        }
        if let Some(filter) = &self.config.filter {
            query.push(("filter".into(), filter.clone()));
        }
        query.push(("key".into(), self.config.api_key.clone()));
        query
    }

    /// Issue one request and decode its envelope, sleeping and retrying in
    /// place while the API reports throttling.
    pub async fn request<I: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> FetchResult<Page<I>> {
        let query = self.query(params);
        let mut retries = 0;

        loop {
            let response = self.transport.get(path, &query).await?;

            if is_throttled(&response) {
                if retries >= self.config.max_rate_limit_retries {
                    error!(path, retries, "Rate limit retries exhausted");
                    return Err(FetchError::RateLimited {
                        path: path.to_string(),
                        attempts: retries,
                    });
                }
                retries += 1;
                let wait = response
                    .backoff_header
                    .map(Duration::from_secs)
                    .unwrap_or(self.config.default_backoff);
                warn!(
                    path,
                    retry = retries,
                    wait_secs = wait.as_secs(),
                    "Rate limited, waiting before retrying"
                );
                pause(wait).await;
                continue;
            }

            if !(200..300).contains(&response.status) {
                error!(
                    path,
                    status = response.status,
                    body = %response.body,
                    "API request failed"
                );
                return Err(FetchError::Status {
                    path: path.to_string(),
                    status: response.status,
                    body: response.body,
                });
            }

            let page: Page<I> =
                serde_json::from_str(&response.body).context(DecodeSnafu { path })?;

            if let Some(error_id) = page.error_id {
                return ApiSnafu {
                    path,
                    error_id,
                    error_name: page.error_name.unwrap_or_default(),
                    message: page.error_message.unwrap_or_default(),
                }
                .fail();
            }

            if let Some(quota) = page.quota_remaining {
                debug!(path, quota_remaining = quota, "Quota");
            }

            if let Some(secs) = page.backoff {
                info!(path, backoff_secs = secs, "API requested backoff");
                pause(Duration::from_secs(secs)).await;
            }

            return Ok(page);
        }
    }

    /// Walk every page of a listing and return all items in API order.
    pub async fn fetch_all<I: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> FetchResult<Vec<I>> {
        let mut items = Vec::new();
        let mut page_no: u32 = 1;

        loop {
            let mut page_params = params.to_vec();
            page_params.push(("page", page_no.to_string()));
            page_params.push(("pagesize", self.config.page_size.to_string()));

            let page = self.request::<I>(path, &page_params).await?;
            let got = page.items.len();
            items.extend(page.items);
            info!(
                path,
                page = page_no,
                got,
                total = items.len(),
                "Fetched page"
            );

            if !page.has_more || got == 0 {
                break;
            }
            page_no += 1;
            pause(self.config.page_delay).await;
        }

        Ok(items)
    }

    /// Fetch a single record; `None` when the API returns no items.
    pub async fn fetch_one<I: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> FetchResult<Option<I>> {
        let page = self.request::<I>(path, params).await?;
        Ok(page.items.into_iter().next())
    }
}

/// Listing parameters used for every paginated collection.
pub fn creation_order() -> Vec<(&'static str, String)> {
    vec![("sort", "creation".into()), ("order", "asc".into())]
}

/// [`Transport`] over `reqwest`.
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: &str, insecure_skip_tls_verify: bool) -> FetchResult<Self> {
        if insecure_skip_tls_verify {
            warn!(base_url, "TLS certificate verification is disabled for the content API");
        }
        let client = Client::builder()
            .user_agent(concat!("so-export/", env!("CARGO_PKG_VERSION")))
            .gzip(true)
            .danger_accept_invalid_certs(insecure_skip_tls_verify)
            .build()
            .context(ClientBuildSnafu)?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, path: &str, query: &[(String, String)]) -> FetchResult<ApiResponse> {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        debug!(url = %url, "GET");

        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .context(HttpSnafu { url: &url })?;

        let status = response.status().as_u16();
        let backoff_header = response
            .headers()
            .get("Backoff")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let body = response.text().await.context(HttpSnafu { url: &url })?;

        Ok(ApiResponse {
            status,
            backoff_header,
            body,
        })
    }
}
