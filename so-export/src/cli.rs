//! Command-line interface for so-export.
//!
//! Each subcommand is one stage of the pipeline and they only share files:
//! `export` writes the JSON, `convert` turns it into Markdown, `import` and
//! `upload-images` push it into Confluence. All domain logic lives in
//! [`so_export_core`]; this module loads configuration, wires the real HTTP
//! clients and reports a one-line summary on stdout.

use std::fmt;
use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::de::DeserializeOwned;
use serde::Serialize;
use so_export_core::confluence::ConfluenceClient;
use so_export_core::fetch::{Fetcher, HttpTransport};
use so_export_core::import::{import_items, list_image_files, upload_images};
use so_export_core::markdown::{convert_file, ConvertOptions, RenderMarkdown};
use so_export_core::model::{Article, Question};
use so_export_core::storage::StoragePage;
use so_export_core::store::{read_items, write_items};

use crate::load_config::{load_config, CliConfig, DEFAULT_CONFIG_PATH};

/// Export Stack Overflow for Teams content to JSON, Markdown and Confluence.
#[derive(Parser)]
#[clap(
    name = "so-export",
    version,
    about = "Export Stack Overflow for Teams questions and articles to JSON, Markdown and Confluence"
)]
pub struct Cli {
    /// Path to the YAML config file
    #[clap(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ContentKind {
    Questions,
    Articles,
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentKind::Questions => f.write_str("questions"),
            ContentKind::Articles => f.write_str("articles"),
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Fetch every question or article with answers and comments into a JSON file
    Export {
        #[clap(long, value_enum)]
        kind: ContentKind,
        /// JSON file to write (defaults to the configured path)
        #[clap(long)]
        output: Option<PathBuf>,
    },
    /// Convert an exported JSON file into Markdown plus an image URL list
    Convert {
        #[clap(long, value_enum)]
        kind: ContentKind,
        #[clap(long)]
        input: Option<PathBuf>,
        #[clap(long)]
        output: Option<PathBuf>,
        #[clap(long)]
        image_urls: Option<PathBuf>,
    },
    /// Create a Confluence page for every item that has none yet
    Import {
        #[clap(long, value_enum)]
        kind: ContentKind,
        #[clap(long)]
        input: Option<PathBuf>,
    },
    /// Attach local copies of external images to the pages and rewrite their URLs
    UploadImages {
        #[clap(long, value_enum)]
        kind: ContentKind,
        #[clap(long)]
        input: Option<PathBuf>,
        /// Folder holding the downloaded images (defaults to the configured one)
        #[clap(long)]
        images_dir: Option<PathBuf>,
    },
}

impl CliConfig {
    fn json_path(&self, kind: ContentKind) -> PathBuf {
        match kind {
            ContentKind::Questions => self.output.questions_json.clone(),
            ContentKind::Articles => self.output.articles_json.clone(),
        }
    }

    fn markdown_path(&self, kind: ContentKind) -> PathBuf {
        match kind {
            ContentKind::Questions => self.output.questions_markdown.clone(),
            ContentKind::Articles => self.output.articles_markdown.clone(),
        }
    }

    fn images_dir(&self, kind: ContentKind) -> PathBuf {
        match kind {
            ContentKind::Questions => self.confluence.questions_images_dir.clone(),
            ContentKind::Articles => self.confluence.articles_images_dir.clone(),
        }
    }

    fn confluence_client(&self) -> Result<ConfluenceClient> {
        let token = self.confluence_token()?;
        Ok(ConfluenceClient::new(
            &self.confluence.base_url,
            &token,
            self.confluence.insecure_skip_tls_verify,
        )?)
    }
}

async fn export(config: &CliConfig, kind: ContentKind, output: Option<PathBuf>) -> Result<()> {
    let fetch_config = config.fetch_config()?;
    let transport = HttpTransport::new(&config.api.base_url, config.api.insecure_skip_tls_verify)?;
    let fetcher = Fetcher::new(transport, fetch_config);
    let path = output.unwrap_or_else(|| config.json_path(kind));

    tracing::info!(command = "export", %kind, output = %path.display(), "Starting export");
    let count = match kind {
        ContentKind::Questions => {
            let items = fetcher.export_questions().await?;
            write_items(&path, &items)?;
            items.len()
        }
        ContentKind::Articles => {
            let items = fetcher.export_articles().await?;
            write_items(&path, &items)?;
            items.len()
        }
    };

    println!("Exported {count} {kind} to {}", path.display());
    Ok(())
}

fn convert<P: RenderMarkdown + DeserializeOwned>(
    config: &CliConfig,
    kind: ContentKind,
    input: Option<PathBuf>,
    output: Option<PathBuf>,
    image_urls: Option<PathBuf>,
) -> Result<()> {
    let input = input.unwrap_or_else(|| config.json_path(kind));
    let output = output.unwrap_or_else(|| config.markdown_path(kind));
    let image_urls = image_urls.unwrap_or_else(|| config.output.image_urls.clone());
    let options = ConvertOptions {
        image_rewrite: config.image_rewrite(),
    };

    let report = convert_file::<P>(&input, &output, &image_urls, &options)?;
    println!(
        "Converted {} {kind} to {} ({} image URLs in {})",
        report.items,
        output.display(),
        report.images,
        image_urls.display()
    );
    Ok(())
}

async fn import<P: StoragePage + DeserializeOwned>(
    config: &CliConfig,
    kind: ContentKind,
    input: Option<PathBuf>,
) -> Result<()> {
    let target = config.page_target()?;
    let input = input.unwrap_or_else(|| config.json_path(kind));
    let items: Vec<P> = read_items(&input)?;
    let wiki = config.confluence_client()?;

    let report = import_items(&wiki, &items, &target).await;
    println!(
        "Imported {kind}: {} created, {} skipped, {} failed",
        report.created, report.skipped, report.failed
    );
    if report.failed > 0 {
        bail!("{} of {} {kind} failed to import", report.failed, items.len());
    }
    Ok(())
}

async fn upload<P: StoragePage + Clone + DeserializeOwned + Serialize>(
    config: &CliConfig,
    kind: ContentKind,
    input: Option<PathBuf>,
    images_dir: Option<PathBuf>,
) -> Result<()> {
    let target = config.page_target()?;
    if config.confluence.image_domain.trim().is_empty() {
        bail!("confluence.image_domain must be set to upload images");
    }
    let input = input.unwrap_or_else(|| config.json_path(kind));
    let images_dir = images_dir.unwrap_or_else(|| config.images_dir(kind));

    let mut items: Vec<P> = read_items(&input)?;
    let local = list_image_files(&images_dir)?;
    if local.is_empty() {
        println!("No image files found in {}", images_dir.display());
        return Ok(());
    }
    let wiki = config.confluence_client()?;

    let report = upload_images(
        &wiki,
        &mut items,
        &local,
        &config.confluence.image_domain,
        &target,
    )
    .await;
    if report.changed() {
        write_items(&input, &items)?;
        tracing::info!(path = %input.display(), "Saved rewritten image URLs");
    } else {
        tracing::info!(path = %input.display(), "No items changed, JSON file left as is");
    }

    println!(
        "Uploaded {} images for {kind}: {} pages updated, {} failed",
        report.images_uploaded, report.pages_updated, report.failed
    );
    if report.failed > 0 {
        bail!("{} {kind} failed during image upload", report.failed);
    }
    Ok(())
}

/// Async CLI entrypoint for main() and integration tests.
pub async fn run(cli: Cli) -> Result<()> {
    tracing::info!("trace_initialised");

    let config = load_config(&cli.config)?;
    config.trace_loaded();

    match cli.command {
        Commands::Export { kind, output } => export(&config, kind, output).await,
        Commands::Convert {
            kind,
            input,
            output,
            image_urls,
        } => {
            tracing::info!(command = "convert", %kind, "Starting conversion");
            match kind {
                ContentKind::Questions => {
                    convert::<Question>(&config, kind, input, output, image_urls)
                }
                ContentKind::Articles => {
                    convert::<Article>(&config, kind, input, output, image_urls)
                }
            }
        }
        Commands::Import { kind, input } => {
            tracing::info!(command = "import", %kind, "Starting Confluence import");
            match kind {
                ContentKind::Questions => import::<Question>(&config, kind, input).await,
                ContentKind::Articles => import::<Article>(&config, kind, input).await,
            }
        }
        Commands::UploadImages {
            kind,
            input,
            images_dir,
        } => {
            tracing::info!(command = "upload-images", %kind, "Starting image upload");
            match kind {
                ContentKind::Questions => {
                    upload::<Question>(&config, kind, input, images_dir).await
                }
                ContentKind::Articles => upload::<Article>(&config, kind, input, images_dir).await,
            }
        }
    }
}
