//! Publishing exported items to Confluence.
//!
//! Both operations walk the items one at a time. A failure on one item is
//! logged and counted, and the walk continues with the next item.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use snafu::ResultExt;
use tracing::{error, info, warn};

use crate::contract::{Attachment, NewPage, PageRef, PageUpdate, Wiki};
use crate::error::{ImageReadSnafu, WikiResult};
use crate::images::{domain_images, is_image_file, mime_type, ImageRef};
use crate::storage::{page_title, StoragePage};

/// Where new pages are created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageTarget {
    pub space_key: String,
    pub parent_id: String,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImportReport {
    pub created: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImageUploadReport {
    /// Items that reference at least one image on the external domain.
    pub items_with_images: usize,
    pub pages_updated: usize,
    pub images_uploaded: usize,
    pub failed: usize,
}

impl ImageUploadReport {
    /// Whether any item had its bodies rewritten.
    pub fn changed(&self) -> bool {
        self.pages_updated > 0
    }
}

async fn create_page<W, P>(wiki: &W, item: &P, title: &str, target: &PageTarget) -> WikiResult<PageRef>
where
    W: Wiki + ?Sized,
    P: StoragePage,
{
    wiki.create_page(NewPage {
        title: title.to_string(),
        space_key: target.space_key.clone(),
        parent_id: target.parent_id.clone(),
        body: item.storage_body(),
    })
    .await
}

/// Create a page per item under the target parent, skipping titles that
/// already exist in the space.
pub async fn import_items<W, P>(wiki: &W, items: &[P], target: &PageTarget) -> ImportReport
where
    W: Wiki + ?Sized,
    P: StoragePage,
{
    let mut report = ImportReport::default();

    for (i, item) in items.iter().enumerate() {
        let title = page_title(item);
        info!(n = i + 1, of = items.len(), title = %title, "Importing {}", P::LABEL);

        let outcome = match wiki.find_page(&title, &target.space_key).await {
            Ok(Some(existing)) => {
                info!(page_id = %existing.id, title = %title, "Page already exists, skipping");
                report.skipped += 1;
                continue;
            }
            Ok(None) => create_page(wiki, item, &title, target).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(page) => {
                info!(page_id = %page.id, title = %title, "Created page");
                report.created += 1;
            }
            Err(e) => {
                error!(error = %e, title = %title, id = item.id(), "Failed to import item");
                report.failed += 1;
            }
        }
    }

    info!(
        created = report.created,
        skipped = report.skipped,
        failed = report.failed,
        "Import finished"
    );
    report
}

/// Image files in `dir` keyed by file name.
pub fn list_image_files(dir: &Path) -> WikiResult<BTreeMap<String, PathBuf>> {
    let mut images = BTreeMap::new();
    for entry in fs::read_dir(dir).context(ImageReadSnafu { path: dir })? {
        let entry = entry.context(ImageReadSnafu { path: dir })?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if is_image_file(name) {
            images.insert(name.to_string(), path.clone());
        }
    }
    info!(dir = %dir.display(), count = images.len(), "Found image files");
    Ok(images)
}

pub fn download_url(base_url: &str, page_id: &str, filename: &str) -> String {
    format!(
        "{}/download/attachments/{page_id}/{filename}",
        base_url.trim_end_matches('/')
    )
}

fn referenced_images<P: StoragePage>(item: &P, domain: &str) -> Vec<ImageRef> {
    let mut refs: Vec<ImageRef> = Vec::new();
    for body in item.html_bodies() {
        for image in domain_images(body, domain) {
            if !refs.contains(&image) {
                refs.push(image);
            }
        }
    }
    refs
}

/// Replace `old` in an HTML body, matching both its decoded and its
/// `&amp;`-escaped spelling.
fn replace_url(body: &str, old: &str, new: &str) -> String {
    let mut out = body.replace(old, new);
    if old.contains('&') {
        out = out.replace(&old.replace('&', "&amp;"), new);
    }
    out
}

/// Upload the images of one item and point its page and bodies at them.
///
/// `item` is only rewritten once the page update succeeded. Returns the number of attachments uploaded; zero means nothing changed.
async fn upload_item_images<W, P>(
    wiki: &W,
    item: &mut P,
    refs: &[ImageRef],
    local: &BTreeMap<String, PathBuf>,
    target: &PageTarget,
) -> WikiResult<usize>
where
    W: Wiki + ?Sized,
    P: StoragePage + Clone,
{
    let title = page_title(item);
    let page = match wiki.find_page(&title, &target.space_key).await? {
        Some(page) => page,
        None => {
            info!(title = %title, "No page for item yet, creating it");
            create_page(wiki, item, &title, target).await?
        }
    };

    let mut uploaded: HashMap<String, String> = HashMap::new();
    let mut replacements: Vec<(String, String)> = Vec::new();
    for image in refs {
        let Some(path) = local.get(&image.filename) else {
            warn!(filename = %image.filename, "Referenced image not found locally");
            continue;
        };
        if !uploaded.contains_key(&image.filename) {
            let data = fs::read(path).context(ImageReadSnafu { path })?;
            let existing = wiki.find_attachment(&page.id, &image.filename).await?;
            let attachment = Attachment {
                filename: image.filename.clone(),
                mime_type: mime_type(&image.filename)
                    .unwrap_or("application/octet-stream")
                    .to_string(),
                data,
            };
            wiki.upload_attachment(&page.id, attachment, existing).await?;
            uploaded.insert(
                image.filename.clone(),
                download_url(&wiki.base_url(), &page.id, &image.filename),
            );
        }
        if let Some(new_url) = uploaded.get(&image.filename) {
            replacements.push((image.url.clone(), new_url.clone()));
        }
    }

    if replacements.is_empty() {
        return Ok(0);
    }

    let mut rewritten = item.clone();
    for body in rewritten.bodies_mut() {
        for (old, new) in &replacements {
            *body = replace_url(body, old, new);
        }
    }

    let version = match page.version {
        Some(version) => version,
        None => wiki.get_page(&page.id).await?.version.unwrap_or(1),
    };
    wiki.update_page(PageUpdate {
        id: page.id.clone(),
        title,
        body: rewritten.storage_body(),
        version: version + 1,
    })
    .await?;

    *item = rewritten;
    Ok(uploaded.len())
}

/// Attach locally available images to each item's page and rewrite the
/// external image URLs in the page and in `items`.
pub async fn upload_images<W, P>(
    wiki: &W,
    items: &mut [P],
    local: &BTreeMap<String, PathBuf>,
    image_domain: &str,
    target: &PageTarget,
) -> ImageUploadReport
where
    W: Wiki + ?Sized,
    P: StoragePage + Clone,
{
    let mut report = ImageUploadReport::default();

    for item in items.iter_mut() {
        let refs = referenced_images(item, image_domain);
        if refs.is_empty() {
            continue;
        }
        report.items_with_images += 1;
        info!(
            id = item.id(),
            images = refs.len(),
            "Processing {} images",
            P::LABEL
        );

        match upload_item_images(wiki, item, &refs, local, target).await {
            Ok(0) => info!(id = item.id(), "No images uploaded for item"),
            Ok(count) => {
                report.images_uploaded += count;
                report.pages_updated += 1;
            }
            Err(e) => {
                error!(error = %e, id = item.id(), "Failed to upload images for item");
                report.failed += 1;
            }
        }
    }

    info!(
        items = report.items_with_images,
        pages_updated = report.pages_updated,
        images = report.images_uploaded,
        failed = report.failed,
        "Image upload finished"
    );
    report
}
