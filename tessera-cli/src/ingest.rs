//! Manifest ingestion: NDJSON streams, directory walks, and normalization
//! of YAML and front-matter documents into the JSON manifest form.

use anyhow::{Context, Result};
use std::io::BufRead;
use std::path::Path;
use tessera_core::Manifest;
use walkdir::WalkDir;

const FRONT_MATTER_DELIMITER: &str = "---";

/// Read newline-delimited JSON manifests; blank lines are ignored.
pub fn from_reader(reader: impl BufRead) -> Result<Vec<Manifest>> {
    let mut manifests = Vec::new();
    for (number, line) in reader.lines().enumerate() {
        let line = line.context("reading manifest stream")?;
        if line.trim().is_empty() {
            continue;
        }
        let source = format!("<stdin>:{}", number + 1);
        manifests.push(Manifest::from_slice(line.as_bytes(), &source)?);
    }
    Ok(manifests)
}

/// Walk a directory for manifest files, skipping hidden files and hidden
/// directories.
pub fn from_directory(dir: &Path) -> Result<Vec<Manifest>> {
    let mut manifests = Vec::new();
    let walker = WalkDir::new(dir)
        .into_iter()
        .filter_entry(|entry| !is_hidden(entry));
    for entry in walker {
        let entry = entry.with_context(|| format!("walking {}", dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let extension = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");
        if !matches!(extension, "yml" | "yaml" | "json" | "md" | "html") {
            continue;
        }
        manifests.push(from_file(entry.path())?);
    }
    tracing::debug!(dir = %dir.display(), count = manifests.len(), "loaded manifests");
    Ok(manifests)
}

/// Load one manifest file, normalizing YAML and front-matter forms.
pub fn from_file(path: &Path) -> Result<Manifest> {
    let raw = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let source = path.display().to_string();
    let text = std::str::from_utf8(&raw)
        .with_context(|| format!("{source}: manifest is not valid utf-8"))?;
    let value = if text.starts_with(FRONT_MATTER_DELIMITER) {
        front_matter_to_value(text).with_context(|| source.clone())?
    } else if matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yml") | Some("yaml")
    ) {
        serde_yaml::from_str(text).with_context(|| format!("{source}: yaml to json failure"))?
    } else {
        serde_json::from_str(text).with_context(|| source.clone())?
    };
    Ok(Manifest::from_value(value, &raw, &source)?)
}

/// Split a `---` framed preamble from its body. The preamble becomes the
/// manifest; the body content is assigned to `spec.body`, overwriting
/// whatever may be there.
fn front_matter_to_value(text: &str) -> Result<serde_json::Value> {
    let mut parts = text.splitn(3, FRONT_MATTER_DELIMITER);
    parts.next();
    let preamble = parts
        .next()
        .context("front-matter preamble is not terminated")?;
    let body = parts.next().unwrap_or("");
    let mut value: serde_json::Value =
        serde_yaml::from_str(preamble).context("front-matter is not valid yaml")?;
    let body = body.trim_start_matches('\n');
    if !body.is_empty() {
        let spec = value
            .as_object_mut()
            .context("front-matter must describe an object")?
            .entry("spec")
            .or_insert_with(|| serde_json::json!({}));
        spec.as_object_mut()
            .context("spec must be an object")?
            .insert("body".to_string(), serde_json::json!(body));
    }
    Ok(value)
}

fn is_hidden(entry: &walkdir::DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .map(|name| name.starts_with('.'))
            .unwrap_or(false)
}
