//! The template kind: a manifest whose body wraps other resources.

use crate::error::Result;
use serde::Deserialize;
use tessera_core::{Error, Manifest};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TemplateSpec {
    pub body: String,
}

impl TemplateSpec {
    pub fn new(manifest: &Manifest) -> Result<Self> {
        let spec: TemplateSpec = serde_json::from_value(manifest.spec.clone())
            .map_err(|e| Error::BadManifest {
                source_path: manifest.source().to_string(),
                reason: e.to_string(),
            })?;
        if spec.body.is_empty() {
            return Err(Error::BadManifest {
                source_path: manifest.source().to_string(),
                reason: "body must be defined".to_string(),
            }
            .into());
        }
        Ok(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_body() {
        let raw = serde_json::json!({
            "kind": "html", "group": "template", "version": "v1",
            "namespace": "default", "name": "layout",
            "meta": {"live": true},
            "spec": {},
        });
        let manifest =
            Manifest::from_slice(raw.to_string().as_bytes(), "layout.yml").unwrap();
        assert!(TemplateSpec::new(&manifest).is_err());
    }
}
