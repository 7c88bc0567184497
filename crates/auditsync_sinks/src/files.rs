//! Whole-file outputs: rendered documents, audit JSON and media blobs.
//!
//! Same-named files are overwritten, so re-exporting an audit replaces its
//! previous files instead of duplicating them.

use crate::SinkResult;
use auditsync_model::sanitize_file_stem;
use anyhow::Context;
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

fn prepare_target(dir: &Path, file_name: String) -> SinkResult<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
    let path = dir.join(file_name);
    if path.is_file() {
        info!("Overwriting existing export at {}", path.display());
    }
    Ok(path)
}

/// Write a rendered report to `<dir>/<file_stem>.<extension>`.
pub fn write_document(
    dir: &Path,
    file_stem: &str,
    extension: &str,
    bytes: &[u8],
) -> SinkResult<PathBuf> {
    let path = prepare_target(dir, format!("{}.{}", file_stem, extension))?;
    fs::write(&path, bytes).with_context(|| format!("Failed to write {}", path.display()))?;
    debug!(path = %path.display(), bytes = bytes.len(), "Wrote document");
    Ok(path)
}

/// Write `value` as JSON with a four-space indent.
pub fn write_json(dir: &Path, file_stem: &str, value: &serde_json::Value) -> SinkResult<PathBuf> {
    let path = prepare_target(dir, format!("{}.json", file_stem))?;
    let file = File::create(&path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    let mut serializer =
        serde_json::Serializer::with_formatter(&mut writer, PrettyFormatter::with_indent(b"    "));
    value
        .serialize(&mut serializer)
        .with_context(|| format!("Failed to serialize {}", path.display()))?;
    writer
        .flush()
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

/// Stream a media blob to `<dir>/<media_id>.<extension>`. Both parts are
/// sanitized so the file always lands directly in `dir`.
pub fn write_media(
    dir: &Path,
    media_id: &str,
    extension: &str,
    content: &mut dyn Read,
) -> SinkResult<PathBuf> {
    let file_name = format!(
        "{}.{}",
        sanitize_file_stem(media_id),
        sanitize_file_stem(extension)
    );
    let path = prepare_target(dir, file_name)?;
    let mut file =
        File::create(&path).with_context(|| format!("Failed to create {}", path.display()))?;
    let bytes = io::copy(content, &mut file)
        .with_context(|| format!("Failed to write media {}", path.display()))?;
    debug!(path = %path.display(), bytes, "Saved media");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn json_uses_four_space_indent() {
        let dir = tempdir().unwrap();
        let path = write_json(dir.path(), "audit_1", &json!({"audit_id": "audit_1"})).unwrap();
        let content = fs::read_to_string(path).unwrap();
        assert_eq!(content, "{\n    \"audit_id\": \"audit_1\"\n}");
    }

    #[test]
    fn documents_overwrite_in_place() {
        let dir = tempdir().unwrap();
        write_document(dir.path(), "Site A_B", "pdf", b"first").unwrap();
        let path = write_document(dir.path(), "Site A_B", "pdf", b"second").unwrap();
        assert_eq!(path.file_name().unwrap(), "Site A_B.pdf");
        assert_eq!(fs::read(path).unwrap(), b"second");
    }

    #[test]
    fn media_is_streamed_to_disk() {
        let dir = tempdir().unwrap();
        let mut blob: &[u8] = b"\x89PNG";
        let media_dir = dir.path().join("media").join("audit_1");
        let path = write_media(&media_dir, "m1", "png", &mut blob).unwrap();
        assert_eq!(fs::read(path).unwrap(), b"\x89PNG");
    }

    #[test]
    fn hostile_media_id_cannot_leave_the_media_dir() {
        let dir = tempdir().unwrap();
        let media_dir = dir.path().join("media");
        let mut blob: &[u8] = b"x";
        let path = write_media(&media_dir, "../../escape", "png", &mut blob).unwrap();
        assert_eq!(path.parent(), Some(media_dir.as_path()));
        assert_eq!(path.file_name().unwrap(), ".._.._escape.png");
    }
}
