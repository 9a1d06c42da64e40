use std::fs;

use mockall::predicate::eq;
use tempfile::tempdir;

use so_export_core::contract::{MockWiki, NewPage, PageRef, PageUpdate};
use so_export_core::error::WikiError;
use so_export_core::import::{import_items, list_image_files, upload_images, PageTarget};
use so_export_core::model::{Article, Question};

fn target() -> PageTarget {
    PageTarget {
        space_key: "DOC".to_string(),
        parent_id: "100".to_string(),
    }
}

fn page(id: &str, title: &str, version: u64) -> PageRef {
    PageRef {
        id: id.to_string(),
        title: title.to_string(),
        version: Some(version),
        webui: None,
    }
}

fn server_error() -> WikiError {
    WikiError::WikiStatus {
        url: "https://wiki.example/rest/api/content".to_string(),
        status: 500,
        body: "boom".to_string(),
    }
}

#[test_log::test(tokio::test)]
async fn import_skips_existing_pages_and_continues_after_failures() {
    let items: Vec<Question> = serde_json::from_str(
        r#"[
            {"question_id": 1, "title": "Exists", "body": "<p>a</p>"},
            {"question_id": 2, "title": "Breaks", "body": "<p>b</p>"},
            {"question_id": 3, "title": "New &amp; shiny", "body": "<p>c<br>d</p>"}
        ]"#,
    )
    .unwrap();

    let mut wiki = MockWiki::new();
    wiki.expect_find_page()
        .returning(|title, _| match title {
            "Exists" => Ok(Some(page("1", "Exists", 3))),
            _ => Ok(None),
        });
    wiki.expect_create_page()
        .withf(|new: &NewPage| new.title == "Breaks")
        .times(1)
        .returning(|_| Err(server_error()));
    wiki.expect_create_page()
        .withf(|new: &NewPage| {
            new.title == "New & shiny"
                && new.space_key == "DOC"
                && new.parent_id == "100"
                && new.body.contains("<p>c<br/>d</p>")
        })
        .times(1)
        .returning(|new| Ok(page("3", &new.title, 1)));

    let report = import_items(&wiki, &items, &target()).await;
    assert_eq!(report.created, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.failed, 1);
}

#[test_log::test(tokio::test)]
async fn lookup_errors_count_as_failures() {
    let items: Vec<Article> =
        serde_json::from_str(r#"[{"article_id": 1, "title": "A"}]"#).unwrap();
    let mut wiki = MockWiki::new();
    wiki.expect_find_page().returning(|_, _| Err(server_error()));
    wiki.expect_create_page().never();

    let report = import_items(&wiki, &items, &target()).await;
    assert_eq!(report.failed, 1);
    assert_eq!(report.created, 0);
}

#[test]
fn image_listing_only_keeps_image_extensions() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("a.png"), b"png").unwrap();
    fs::write(dir.path().join("b.JPG"), b"jpg").unwrap();
    fs::write(dir.path().join("notes.txt"), b"txt").unwrap();
    fs::create_dir(dir.path().join("nested.gif")).unwrap();

    let images = list_image_files(dir.path()).unwrap();
    assert_eq!(images.keys().collect::<Vec<_>>(), vec!["a.png", "b.JPG"]);
}

#[test_log::test(tokio::test)]
async fn upload_images_attaches_files_and_rewrites_urls() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("shot.png"), b"\x89PNG").unwrap();
    let local = list_image_files(dir.path()).unwrap();

    let mut items: Vec<Question> = serde_json::from_str(
        r#"[
            {
                "question_id": 1,
                "title": "With image",
                "body": "<p><a href=\"https://images.example.com/shot.png\"><img src=\"https://images.example.com/shot.png\"></a></p>",
                "body_markdown": "[![](https://images.example.com/shot.png)](https://images.example.com/shot.png)",
                "answers": [{"answer_id": 2, "body": "<img src=\"https://images.example.com/missing.png\">"}]
            },
            {"question_id": 2, "title": "No images", "body": "<p>text</p>"}
        ]"#,
    )
    .unwrap();

    let mut wiki = MockWiki::new();
    wiki.expect_base_url()
        .return_const("https://wiki.example".to_string());
    wiki.expect_find_page()
        .with(eq("With image"), eq("DOC"))
        .times(1)
        .returning(|title, _| Ok(Some(page("42", title, 5))));
    wiki.expect_find_attachment()
        .with(eq("42"), eq("shot.png"))
        .times(1)
        .returning(|_, _| Ok(Some("att-7".to_string())));
    wiki.expect_upload_attachment()
        .withf(|page_id, attachment, existing| {
            page_id == "42"
                && attachment.filename == "shot.png"
                && attachment.mime_type == "image/png"
                && attachment.data == b"\x89PNG"
                && existing.as_deref() == Some("att-7")
        })
        .times(1)
        .returning(|_, _, _| Ok(()));
    wiki.expect_update_page()
        .withf(|update: &PageUpdate| {
            update.id == "42"
                && update.version == 6
                && update
                    .body
                    .contains("https://wiki.example/download/attachments/42/shot.png")
                && !update.body.contains("https://images.example.com/shot.png")
        })
        .times(1)
        .returning(|_| Ok(()));

    let report = upload_images(&wiki, &mut items, &local, "images.example.com", &target()).await;

    assert_eq!(report.items_with_images, 1);
    assert_eq!(report.pages_updated, 1);
    assert_eq!(report.images_uploaded, 1);
    assert_eq!(report.failed, 0);
    assert!(report.changed());

    let new_url = "https://wiki.example/download/attachments/42/shot.png";
    let question = &items[0];
    assert!(question.body.as_deref().unwrap().contains(new_url));
    assert!(!question.body_markdown.as_deref().unwrap().contains("images.example.com"));
    assert!(
        question.answers[0].body.as_deref().unwrap().contains("missing.png"),
        "images missing locally are left alone"
    );
}

#[test_log::test(tokio::test)]
async fn upload_images_creates_missing_page_first() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("a.gif"), b"GIF89a").unwrap();
    let local = list_image_files(dir.path()).unwrap();

    let mut items: Vec<Article> = serde_json::from_str(
        r#"[{"article_id": 9, "title": "Guide", "body": "<img src=\"https://images.example.com/a.gif\">"}]"#,
    )
    .unwrap();

    let mut wiki = MockWiki::new();
    wiki.expect_base_url()
        .return_const("https://wiki.example/".to_string());
    wiki.expect_find_page().returning(|_, _| Ok(None));
    wiki.expect_create_page()
        .times(1)
        .returning(|new| Ok(page("77", &new.title, 1)));
    wiki.expect_find_attachment().returning(|_, _| Ok(None));
    wiki.expect_upload_attachment()
        .withf(|_, attachment, existing| attachment.mime_type == "image/gif" && existing.is_none())
        .times(1)
        .returning(|_, _, _| Ok(()));
    wiki.expect_update_page()
        .withf(|update: &PageUpdate| update.id == "77" && update.version == 2)
        .times(1)
        .returning(|_| Ok(()));

    let report = upload_images(&wiki, &mut items, &local, "images.example.com", &target()).await;
    assert_eq!(report.pages_updated, 1);
    assert_eq!(
        items[0].body.as_deref(),
        Some("<img src=\"https://wiki.example/download/attachments/77/a.gif\">")
    );
}

#[test_log::test(tokio::test)]
async fn failed_upload_leaves_item_untouched() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("a.png"), b"png").unwrap();
    let local = list_image_files(dir.path()).unwrap();

    let body = "<img src=\"https://images.example.com/a.png\">";
    let mut items: Vec<Article> = vec![serde_json::from_value(serde_json::json!({
        "article_id": 1,
        "title": "T",
        "body": body
    }))
    .unwrap()];

    let mut wiki = MockWiki::new();
    wiki.expect_base_url()
        .return_const("https://wiki.example".to_string());
    wiki.expect_find_page()
        .returning(|title, _| Ok(Some(page("5", title, 1))));
    wiki.expect_find_attachment().returning(|_, _| Ok(None));
    wiki.expect_upload_attachment()
        .returning(|_, _, _| Err(server_error()));
    wiki.expect_update_page().never();

    let report = upload_images(&wiki, &mut items, &local, "images.example.com", &target()).await;
    assert_eq!(report.failed, 1);
    assert!(!report.changed());
    assert_eq!(items[0].body.as_deref(), Some(body));
}

#[test_log::test(tokio::test)]
async fn failed_page_update_keeps_original_urls_while_other_items_proceed() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("a.png"), b"png").unwrap();
    fs::write(dir.path().join("b.png"), b"png").unwrap();
    let local = list_image_files(dir.path()).unwrap();

    let body_a = "<img src=\"https://images.example.com/a.png\">";
    let mut items: Vec<Article> = serde_json::from_value(serde_json::json!([
        {"article_id": 1, "title": "A", "body": body_a},
        {"article_id": 2, "title": "B", "body": "<img src=\"https://images.example.com/b.png\">"}
    ]))
    .unwrap();

    let mut wiki = MockWiki::new();
    wiki.expect_base_url()
        .return_const("https://wiki.example".to_string());
    wiki.expect_find_page().returning(|title, _| match title {
        "A" => Ok(Some(page("1", title, 1))),
        _ => Ok(Some(page("2", title, 1))),
    });
    wiki.expect_find_attachment().returning(|_, _| Ok(None));
    wiki.expect_upload_attachment().returning(|_, _, _| Ok(()));
    wiki.expect_update_page()
        .withf(|update: &PageUpdate| update.id == "1")
        .times(1)
        .returning(|_| Err(server_error()));
    wiki.expect_update_page()
        .withf(|update: &PageUpdate| update.id == "2")
        .times(1)
        .returning(|_| Ok(()));

    let report = upload_images(&wiki, &mut items, &local, "images.example.com", &target()).await;
    assert_eq!(report.failed, 1);
    assert_eq!(report.pages_updated, 1);
    assert!(report.changed());

    assert_eq!(items[0].body.as_deref(), Some(body_a));
    assert_eq!(
        items[1].body.as_deref(),
        Some("<img src=\"https://wiki.example/download/attachments/2/b.png\">")
    );
}

#[test_log::test(tokio::test)]
async fn escaped_ampersands_in_image_urls_are_rewritten() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("q.png"), b"png").unwrap();
    let local = list_image_files(dir.path()).unwrap();

    let mut items: Vec<Article> = serde_json::from_value(serde_json::json!([{
        "article_id": 3,
        "title": "Query",
        "body": "<img src=\"https://images.example.com/q.png?a=1&amp;b=2\">"
    }]))
    .unwrap();

    let mut wiki = MockWiki::new();
    wiki.expect_base_url()
        .return_const("https://wiki.example".to_string());
    wiki.expect_find_page()
        .returning(|title, _| Ok(Some(page("8", title, 2))));
    wiki.expect_find_attachment().returning(|_, _| Ok(None));
    wiki.expect_upload_attachment().returning(|_, _, _| Ok(()));
    wiki.expect_update_page()
        .withf(|update: &PageUpdate| !update.body.contains("images.example.com"))
        .times(1)
        .returning(|_| Ok(()));

    let report = upload_images(&wiki, &mut items, &local, "images.example.com", &target()).await;
    assert_eq!(report.pages_updated, 1);
    assert_eq!(
        items[0].body.as_deref(),
        Some("<img src=\"https://wiki.example/download/attachments/8/q.png\">")
    );
}
