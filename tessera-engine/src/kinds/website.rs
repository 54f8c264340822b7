//! Textual website kinds: pages, domains, and taxonomies.

use crate::error::Result;
use serde::Deserialize;
use tessera_core::{Error, Manifest};

const DESCRIPTION_CLIP: usize = 50;

fn parse_spec<T: serde::de::DeserializeOwned>(manifest: &Manifest) -> Result<T> {
    serde_json::from_value(manifest.spec.clone())
        .map_err(|e| {
            Error::BadManifest {
                source_path: manifest.source().to_string(),
                reason: e.to_string(),
            }
            .into()
        })
}

fn bad(manifest: &Manifest, reason: &str) -> crate::error::EngineError {
    Error::BadManifest {
        source_path: manifest.source().to_string(),
        reason: reason.to_string(),
    }
    .into()
}

/// A single piece of content with its own output location.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PageSpec {
    pub title: String,
    pub description: String,
    pub href: String,
    pub body: String,
}

impl PageSpec {
    pub fn new(manifest: &Manifest) -> Result<Self> {
        let mut spec: PageSpec = parse_spec(manifest)?;
        // A missing description falls back to a clip of the body; a missing
        // body falls back to the description.
        if spec.description.is_empty() {
            spec.description = spec
                .body
                .chars()
                .take(DESCRIPTION_CLIP)
                .collect::<String>();
        }
        if spec.body.is_empty() {
            spec.body = spec.description.clone();
        }
        if spec.title.is_empty() {
            return Err(bad(manifest, "title must be defined"));
        }
        if spec.href.is_empty() {
            return Err(bad(manifest, "href must be defined"));
        }
        if spec.body.is_empty() {
            return Err(bad(manifest, "body must be defined"));
        }
        Ok(spec)
    }
}

/// The site root: owns the homepage body and scopes everything below it.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DomainSpec {
    pub title: String,
    pub description: String,
    pub author: String,
    pub href: String,
    pub body: String,
}

impl Default for DomainSpec {
    fn default() -> Self {
        DomainSpec {
            title: String::new(),
            description: String::new(),
            author: String::new(),
            href: default_index(),
            body: String::new(),
        }
    }
}

fn default_index() -> String {
    "index.html".to_string()
}

impl DomainSpec {
    pub fn new(manifest: &Manifest) -> Result<Self> {
        let spec: DomainSpec = parse_spec(manifest)?;
        if spec.title.is_empty() {
            return Err(bad(manifest, "title must be defined"));
        }
        if spec.description.is_empty() {
            return Err(bad(manifest, "description must be defined"));
        }
        if spec.author.is_empty() {
            return Err(bad(manifest, "author must be defined"));
        }
        Ok(spec)
    }
}

/// A grouping page (topic, category) that scopes the content related to it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaxonomySpec {
    pub title: String,
    pub title_fragment: Option<String>,
    pub href: String,
    pub plural: Option<String>,
    pub singular: Option<String>,
    pub description: String,
    pub body: String,
}

impl TaxonomySpec {
    pub fn new(manifest: &Manifest) -> Result<Self> {
        let spec: TaxonomySpec = parse_spec(manifest)?;
        if spec.title.is_empty() {
            return Err(bad(manifest, "title must be defined"));
        }
        if spec.href.is_empty() {
            return Err(bad(manifest, "href must be defined"));
        }
        Ok(spec)
    }

    /// The fragment contributed to descendant title chains.
    pub fn title_fragment(&self) -> &str {
        self.title_fragment.as_deref().unwrap_or(&self.title)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(spec: serde_json::Value) -> Manifest {
        let raw = serde_json::json!({
            "kind": "website", "group": "page", "version": "v1",
            "namespace": "post", "name": "sample",
            "meta": {"live": true},
            "spec": spec,
        });
        Manifest::from_slice(raw.to_string().as_bytes(), "sample.yml").unwrap()
    }

    #[test]
    fn test_page_description_defaults_to_clipped_body() {
        let long_body = "word ".repeat(20);
        let spec = PageSpec::new(&manifest(serde_json::json!({
            "title": "Post",
            "href": "/post.html",
            "body": long_body,
        })))
        .unwrap();
        assert_eq!(spec.description.chars().count(), DESCRIPTION_CLIP);
    }

    #[test]
    fn test_page_body_defaults_to_description() {
        let spec = PageSpec::new(&manifest(serde_json::json!({
            "title": "Post",
            "href": "/post.html",
            "description": "summary only",
        })))
        .unwrap();
        assert_eq!(spec.body, "summary only");
    }

    #[test]
    fn test_page_requires_href() {
        assert!(PageSpec::new(&manifest(serde_json::json!({
            "title": "Post",
            "body": "text",
        })))
        .is_err());
    }

    #[test]
    fn test_domain_requires_author() {
        assert!(DomainSpec::new(&manifest(serde_json::json!({
            "title": "Site",
            "description": "A site",
        })))
        .is_err());
    }

    #[test]
    fn test_domain_href_defaults_to_index() {
        let spec = DomainSpec::new(&manifest(serde_json::json!({
            "title": "Site",
            "description": "A site",
            "author": "someone",
        })))
        .unwrap();
        assert_eq!(spec.href, "index.html");
    }

    #[test]
    fn test_taxonomy_title_fragment_falls_back() {
        let spec = TaxonomySpec::new(&manifest(serde_json::json!({
            "title": "Testing",
            "href": "/topic/testing/index.html",
        })))
        .unwrap();
        assert_eq!(spec.title_fragment(), "Testing");
    }
}
