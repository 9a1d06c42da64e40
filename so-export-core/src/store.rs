use std::fs;
use std::io::Write;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use tracing::info;

use crate::error::{
    ParseSnafu, PersistSnafu, ReadSnafu, SerializeSnafu, StoreResult, WriteSnafu,
};

/// Accepted layouts of an items file: a bare array, or the API envelope.
#[derive(Deserialize)]
#[serde(untagged)]
enum ItemsFile<T> {
    Bare(Vec<T>),
    Enveloped { items: Vec<T> },
}

/// Read items from `path`, as written by [`write_items`] or as the raw API envelope.
pub fn read_items<T: DeserializeOwned>(path: &Path) -> StoreResult<Vec<T>> {
    let content = fs::read_to_string(path).context(ReadSnafu { path })?;
    let items = match serde_json::from_str::<ItemsFile<T>>(&content) {
        Ok(ItemsFile::Bare(items)) | Ok(ItemsFile::Enveloped { items }) => items,
        // Untagged enums swallow the underlying error; re-parse for a useful one.
        Err(_) => serde_json::from_str::<Vec<T>>(&content).context(ParseSnafu { path })?,
    };
    info!(path = %path.display(), count = items.len(), "Read items");
    Ok(items)
}

/// Pretty-print `items` to `path` with 4-space indentation.
///
/// The data is written to a temporary file next to `path` and moved into place.
pub fn write_items<T: Serialize>(path: &Path, items: &[T]) -> StoreResult<()> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    items.serialize(&mut ser).context(SerializeSnafu { path })?;
    buf.push(b'\n');

    write_atomically(path, &buf)?;
    info!(path = %path.display(), count = items.len(), "Wrote items");
    Ok(())
}

pub(crate) fn write_atomically(path: &Path, contents: &[u8]) -> StoreResult<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).context(WriteSnafu { path: dir })?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir).context(WriteSnafu { path })?;
    tmp.write_all(contents).context(WriteSnafu { path })?;
    tmp.persist(path).context(PersistSnafu { path })?;
    Ok(())
}

/// Write `lines` newline-terminated.
pub fn write_lines(path: &Path, lines: &[String]) -> StoreResult<()> {
    let mut out = String::new();
    for line in lines {
        out.push_str(line);
        out.push('\n');
    }
    write_atomically(path, out.as_bytes())
}
