#![doc = "so-export-core: export Stack Overflow for Teams content to JSON, Markdown and Confluence."]

//! The pipeline is linear and every stage hands over through files:
//!
//! - [`fetch`] and [`export`] page through the content API and enrich each
//!   question or article with answers and comments.
//! - [`store`] reads and writes the JSON item files.
//! - [`markdown`] renders items as one Markdown document, using [`html`] for
//!   bodies and [`images`] for image URL discovery.
//! - [`storage`], [`confluence`] and [`import`] publish items as Confluence
//!   pages and move their images into page attachments.
//!
//! Network access goes through the traits in [`contract`], which are mocked
//! in tests.

pub mod confluence;
pub mod contract;
pub mod error;
pub mod export;
pub mod fetch;
pub mod html;
pub mod images;
pub mod import;
pub mod markdown;
pub mod model;
pub mod storage;
pub mod store;
