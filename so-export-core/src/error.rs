use std::path::PathBuf;

use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum FetchError {
    #[snafu(display("Failed to build HTTP client: {source}"))]
    ClientBuild { source: reqwest::Error },
    #[snafu(display("HTTP request to {url} failed: {source}"))]
    Http { url: String, source: reqwest::Error },
    #[snafu(display("API returned HTTP {status} for {path}: {body}"))]
    Status {
        path: String,
        status: u16,
        body: String,
    },
    #[snafu(display("API error {error_id} ({error_name}) for {path}: {message}"))]
    Api {
        path: String,
        error_id: i64,
        error_name: String,
        message: String,
    },
    #[snafu(display("Failed to decode API response for {path}: {source}"))]
    Decode {
        path: String,
        source: serde_json::Error,
    },
    #[snafu(display("Still rate limited on {path} after {attempts} retries"))]
    RateLimited { path: String, attempts: u32 },
}

pub type FetchResult<T> = std::result::Result<T, FetchError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StoreError {
    #[snafu(display("Failed to read {}: {source}", path.display()))]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Failed to parse JSON in {}: {source}", path.display()))]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[snafu(display("Failed to serialize JSON for {}: {source}", path.display()))]
    Serialize {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[snafu(display("Failed to write {}: {source}", path.display()))]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Failed to move temporary file onto {}: {source}", path.display()))]
    Persist {
        path: PathBuf,
        source: tempfile::PersistError,
    },
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum WikiError {
    #[snafu(display("Failed to build HTTP client: {source}"))]
    WikiClientBuild { source: reqwest::Error },
    #[snafu(display("Confluence request to {url} failed: {source}"))]
    WikiHttp { url: String, source: reqwest::Error },
    #[snafu(display("Confluence returned HTTP {status} for {url}: {body}"))]
    WikiStatus {
        url: String,
        status: u16,
        body: String,
    },
    #[snafu(display("Failed to decode Confluence response from {url}: {source}"))]
    WikiDecode { url: String, source: reqwest::Error },
    #[snafu(display("Failed to read image {}: {source}", path.display()))]
    ImageRead {
        path: PathBuf,
        source: std::io::Error,
    },
}

pub type WikiResult<T> = std::result::Result<T, WikiError>;
