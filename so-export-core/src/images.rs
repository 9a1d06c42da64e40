//! Image URL discovery and rewriting in post bodies.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html};
use url::Url;

static MARKDOWN_IMAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"!\[([^\]]*)\]\(\s*<?([^)\s>]+)>?((?:\s+[^)]*)?)\)").expect("valid image regex")
});

/// Rewrites image URLs under `prefix` to paths under `local_dir`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRewrite {
    pub prefix: String,
    pub local_dir: String,
}

impl ImageRewrite {
    /// `Some(local path)` when `url` starts with the prefix.
    pub fn apply(&self, url: &str) -> Option<String> {
        if self.prefix.is_empty() {
            return None;
        }
        let rest = url.strip_prefix(&self.prefix)?;
        let dir = self.local_dir.trim_end_matches('/');
        let rest = rest.trim_start_matches('/');
        if dir.is_empty() {
            Some(rest.to_string())
        } else {
            Some(format!("{dir}/{rest}"))
        }
    }
}

fn elements(fragment: &Html) -> impl Iterator<Item = ElementRef<'_>> {
    fragment
        .root_element()
        .descendants()
        .filter_map(ElementRef::wrap)
}

/// `src` of every `<img>` in an HTML fragment, in document order.
pub fn html_image_urls(html: &str) -> Vec<String> {
    let fragment = Html::parse_fragment(html);
    elements(&fragment)
        .filter(|el| el.value().name() == "img")
        .filter_map(|el| el.value().attr("src"))
        .map(str::trim)
        .filter(|src| !src.is_empty())
        .map(str::to_string)
        .collect()
}

/// Targets of every `![alt](url)` in a Markdown text.
pub fn markdown_image_urls(markdown: &str) -> Vec<String> {
    MARKDOWN_IMAGE
        .captures_iter(markdown)
        .map(|caps| caps[2].to_string())
        .collect()
}

/// Rewrite the targets of Markdown images with `rewrite`.
pub fn rewrite_markdown_images(markdown: &str, rewrite: &ImageRewrite) -> String {
    MARKDOWN_IMAGE
        .replace_all(markdown, |caps: &regex::Captures<'_>| {
            match rewrite.apply(&caps[2]) {
                Some(local) => format!("![{}]({}{})", &caps[1], local, &caps[3]),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Collects URLs keeping the first occurrence of each.
#[derive(Debug, Default)]
pub struct UrlList {
    seen: HashSet<String>,
    urls: Vec<String>,
}

impl UrlList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend<I: IntoIterator<Item = String>>(&mut self, urls: I) {
        for url in urls {
            if self.seen.insert(url.clone()) {
                self.urls.push(url);
            }
        }
    }

    pub fn into_vec(self) -> Vec<String> {
        self.urls
    }
}

/// Last path segment of `raw` when its host contains `domain`.
pub fn domain_filename(raw: &str, domain: &str) -> Option<String> {
    if domain.is_empty() || !raw.contains(domain) {
        return None;
    }
    let url = Url::parse(raw).ok()?;
    let host = url.host_str()?;
    if !host.contains(domain) && !raw.contains(&format!("/{domain}")) {
        return None;
    }
    let name = url.path_segments()?.filter(|s| !s.is_empty()).last()?;
    Some(name.to_string())
}

/// An external image referenced from a body: its full URL and file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageRef {
    pub url: String,
    pub filename: String,
}

/// Images hosted on `domain` referenced by `<a href>` or `<img src>`.
pub fn domain_images(html: &str, domain: &str) -> Vec<ImageRef> {
    let fragment = Html::parse_fragment(html);
    let mut refs: Vec<ImageRef> = Vec::new();
    for el in elements(&fragment) {
        let attr = match el.value().name() {
            "a" => "href",
            "img" => "src",
            _ => continue,
        };
        let Some(url) = el.value().attr(attr) else {
            continue;
        };
        if let Some(filename) = domain_filename(url, domain) {
            let image = ImageRef {
                url: url.to_string(),
                filename,
            };
            if !refs.contains(&image) {
                refs.push(image);
            }
        }
    }
    refs
}

/// Whether `path` has one of the image extensions handled by the uploader.
pub fn is_image_file(name: &str) -> bool {
    mime_type(name).is_some()
}

pub fn mime_type(name: &str) -> Option<&'static str> {
    let ext = name.rsplit_once('.')?.1.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_html_and_markdown_images() {
        let html = r#"<p><img src="https://i.x/a.png"> and <img alt="no src"> <img src="https://i.x/b.png"></p>"#;
        assert_eq!(
            html_image_urls(html),
            vec!["https://i.x/a.png", "https://i.x/b.png"]
        );
        assert_eq!(
            markdown_image_urls("x ![a](https://i.x/c.png) y ![](https://i.x/d.png \"t\")"),
            vec!["https://i.x/c.png", "https://i.x/d.png"]
        );
    }

    #[test]
    fn url_list_keeps_first_occurrence() {
        let mut list = UrlList::new();
        list.extend(vec!["a".to_string(), "b".to_string(), "a".to_string()]);
        list.extend(vec!["c".to_string(), "b".to_string()]);
        assert_eq!(list.into_vec(), vec!["a", "b", "c"]);
    }

    #[test]
    fn rewrite_only_touches_prefixed_urls() {
        let rewrite = ImageRewrite {
            prefix: "https://i.x/".into(),
            local_dir: "images/".into(),
        };
        assert_eq!(rewrite.apply("https://i.x/a/b.png").as_deref(), Some("images/a/b.png"));
        assert_eq!(rewrite.apply("https://other/a.png"), None);
        assert_eq!(
            rewrite_markdown_images("![a](https://i.x/a.png) ![b](https://o/b.png)", &rewrite),
            "![a](images/a.png) ![b](https://o/b.png)"
        );
    }

    #[test]
    fn domain_images_from_links_and_imgs() {
        let html = r#"<a href="https://i.stack.imgur.com/abc.png"><img src="https://i.stack.imgur.com/abc.png"></a>
            <img src="https://elsewhere.org/x.png"><a href="https://i.stack.imgur.com/def.jpg?s=1">d</a>"#;
        let found = domain_images(html, "i.stack.imgur.com");
        assert_eq!(
            found.iter().map(|i| i.filename.as_str()).collect::<Vec<_>>(),
            vec!["abc.png", "def.jpg"]
        );
    }

    #[test]
    fn mime_types_by_extension() {
        assert_eq!(mime_type("a.PNG"), Some("image/png"));
        assert_eq!(mime_type("a.jpeg"), Some("image/jpeg"));
        assert!(!is_image_file("notes.txt"));
        assert!(!is_image_file("README"));
    }
}
