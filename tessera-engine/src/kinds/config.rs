//! The config data kind: structured values exposed to templates, never
//! rendered on their own.

use crate::error::Result;
use tessera_core::{Error, Manifest};

#[derive(Debug, Clone)]
pub struct DataSpec {
    pub value: serde_json::Value,
}

impl DataSpec {
    pub fn new(manifest: &Manifest) -> Result<Self> {
        if !manifest.spec.is_object() {
            return Err(Error::BadManifest {
                source_path: manifest.source().to_string(),
                reason: "spec must be defined as an object".to_string(),
            }
            .into());
        }
        Ok(DataSpec {
            value: manifest.spec.clone(),
        })
    }
}
