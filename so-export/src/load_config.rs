//! `load_config` module: loads the YAML configuration and resolves the secrets
//! (API key, Confluence token) from the environment or key files.
//!
//! Every section and key is optional. Missing keys take the defaults below,
//! which reproduce the file names the tool has always used
//! (`stackoverflow_questions.json`, `client_key.txt`, `pat.txt`, ...).
//!
//! # Secrets
//! - `SO_CLIENT_KEY` overrides the contents of `api.key_file`.
//! - `CONFLUENCE_PAT` overrides the contents of `confluence.pat_file`.
//!
//! Key files are read lazily, only by the commands that need them.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use so_export_core::fetch::{FetchConfig, DEFAULT_FILTER};
use so_export_core::images::ImageRewrite;
use so_export_core::import::PageTarget;
use tracing::{debug, error, info};

pub const DEFAULT_CONFIG_PATH: &str = "so-export.yaml";
pub const API_KEY_ENV: &str = "SO_CLIENT_KEY";
pub const PAT_ENV: &str = "CONFLUENCE_PAT";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub api: ApiSection,
    pub output: OutputSection,
    pub confluence: ConfluenceSection,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ApiSection {
    /// e.g. `https://yourteam.stackenterprise.co/api/2.3`
    pub base_url: String,
    pub key_file: PathBuf,
    pub site: Option<String>,
    pub filter: Option<String>,
    pub page_size: u32,
    pub page_delay_ms: u64,
    pub item_delay_ms: u64,
    pub comment_delay_ms: u64,
    pub default_backoff_secs: u64,
    pub max_rate_limit_retries: u32,
    pub insecure_skip_tls_verify: bool,
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            key_file: PathBuf::from("client_key.txt"),
            site: None,
            filter: Some(DEFAULT_FILTER.to_string()),
            page_size: 100,
            page_delay_ms: 1000,
            item_delay_ms: 500,
            comment_delay_ms: 200,
            default_backoff_secs: 30,
            max_rate_limit_retries: 10,
            insecure_skip_tls_verify: false,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct OutputSection {
    pub questions_json: PathBuf,
    pub articles_json: PathBuf,
    pub questions_markdown: PathBuf,
    pub articles_markdown: PathBuf,
    pub image_urls: PathBuf,
    /// Image URLs starting with this prefix are rewritten to `local_image_dir`.
    pub image_url_prefix: Option<String>,
    pub local_image_dir: String,
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            questions_json: PathBuf::from("stackoverflow_questions.json"),
            articles_json: PathBuf::from("stackoverflow_articles.json"),
            questions_markdown: PathBuf::from("stackoverflow_export.md"),
            articles_markdown: PathBuf::from("stackoverflow_articles.md"),
            image_urls: PathBuf::from("image_urls.txt"),
            image_url_prefix: None,
            local_image_dir: "images".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ConfluenceSection {
    /// e.g. `https://wiki.example.com` (including any context path)
    pub base_url: String,
    pub pat_file: PathBuf,
    pub space_key: String,
    pub parent_page_id: String,
    /// Host of the externally hosted images to move into attachments.
    pub image_domain: String,
    pub questions_images_dir: PathBuf,
    pub articles_images_dir: PathBuf,
    pub insecure_skip_tls_verify: bool,
}

impl Default for ConfluenceSection {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            pat_file: PathBuf::from("pat.txt"),
            space_key: String::new(),
            parent_page_id: String::new(),
            image_domain: String::new(),
            questions_images_dir: PathBuf::from("question-images"),
            articles_images_dir: PathBuf::from("article-images"),
            insecure_skip_tls_verify: false,
        }
    }
}

/// Read a secret from `env_var`, falling back to the trimmed contents of `file`.
pub fn read_secret(env_var: &str, file: &Path) -> Result<String> {
    if let Ok(value) = env::var(env_var) {
        let value = value.trim().to_string();
        if !value.is_empty() {
            debug!(env_var, "Using secret from environment");
            return Ok(value);
        }
    }
    let content = fs::read_to_string(file).map_err(|e| {
        error!(error = ?e, path = ?file, env_var, "Failed to read secret file");
        anyhow::anyhow!(
            "Failed to read {}: {e} (set {env_var} or create the file)",
            file.display()
        )
    })?;
    let value = content.trim().to_string();
    if value.is_empty() {
        bail!("{} is empty", file.display());
    }
    info!(path = ?file, "Read secret from file");
    Ok(value)
}

impl CliConfig {
    pub fn trace_loaded(&self) {
        info!(
            api_base_url = %self.api.base_url,
            confluence_base_url = %self.confluence.base_url,
            questions_json = %self.output.questions_json.display(),
            articles_json = %self.output.articles_json.display(),
            "Loaded Config"
        );
        debug!(?self, "Config loaded (full debug)");
    }

    /// Fetch settings with the API key resolved.
    pub fn fetch_config(&self) -> Result<FetchConfig> {
        if self.api.base_url.trim().is_empty() {
            bail!("api.base_url must be set in the configuration");
        }
        let api_key = read_secret(API_KEY_ENV, &self.api.key_file)?;
        Ok(FetchConfig {
            api_key,
            filter: self.api.filter.clone().filter(|f| !f.is_empty()),
            site: self.api.site.clone().filter(|s| !s.is_empty()),
            page_size: self.api.page_size.clamp(1, 100),
            page_delay: Duration::from_millis(self.api.page_delay_ms),
            item_delay: Duration::from_millis(self.api.item_delay_ms),
            comment_delay: Duration::from_millis(self.api.comment_delay_ms),
            default_backoff: Duration::from_secs(self.api.default_backoff_secs),
            max_rate_limit_retries: self.api.max_rate_limit_retries,
        })
    }

    pub fn image_rewrite(&self) -> Option<ImageRewrite> {
        self.output
            .image_url_prefix
            .as_ref()
            .filter(|p| !p.is_empty())
            .map(|prefix| ImageRewrite {
                prefix: prefix.clone(),
                local_dir: self.output.local_image_dir.clone(),
            })
    }

    pub fn page_target(&self) -> Result<PageTarget> {
        let c = &self.confluence;
        if c.base_url.trim().is_empty() {
            bail!("confluence.base_url must be set in the configuration");
        }
        if c.space_key.trim().is_empty() || c.parent_page_id.trim().is_empty() {
            bail!("confluence.space_key and confluence.parent_page_id must be set");
        }
        Ok(PageTarget {
            space_key: c.space_key.clone(),
            parent_id: c.parent_page_id.clone(),
        })
    }

    pub fn confluence_token(&self) -> Result<String> {
        read_secret(PAT_ENV, &self.confluence.pat_file)
    }
}

/// Load the YAML config at `path`.
///
/// A missing file is only tolerated when `path` is the default location;
/// built-in defaults are used then.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<CliConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    if !path_ref.exists() && path_ref == Path::new(DEFAULT_CONFIG_PATH) {
        info!(config_path = ?path_ref, "No config file found, using defaults");
        return Ok(CliConfig::default());
    }

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => {
            info!(config_path = ?path_ref, "Config file read successfully");
            content
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow::anyhow!(
                "Failed to read config file {:?}: {}",
                path_ref,
                e
            ));
        }
    };

    if config_content.trim().is_empty() {
        return Ok(CliConfig::default());
    }

    let config: CliConfig = serde_yaml::from_str(&config_content)
        .map_err(|e| {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            e
        })
        .with_context(|| format!("Failed to parse config YAML {}", path_ref.display()))?;
    info!(config_path = ?path_ref, "Parsed config YAML successfully");
    Ok(config)
}
