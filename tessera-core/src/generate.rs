//! Expansion of `generateManifests` declarations at ingest time.

use crate::error::{Error, Result};
use crate::manifest::Manifest;
use serde::Deserialize;

/// A declaration that expands into additional manifests by iterating a
/// numeric range and evaluating a text template once per step.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Generator {
    pub name: String,
    /// Inclusive `[lo, hi]` bounds for the iteration.
    pub range_over: [i64; 2],
    /// Extra bindings made available to the template.
    #[serde(default)]
    pub context: serde_json::Map<String, serde_json::Value>,
    /// Evaluated with `{count, parent, ...context}`; must produce one JSON
    /// manifest per step.
    pub template: String,
}

impl Generator {
    /// Produce one manifest per step of the range. Generated manifests flow
    /// through the regular constructor pipeline.
    pub fn expand(&self, parent: &Manifest) -> Result<Vec<Manifest>> {
        let [lo, hi] = self.range_over;
        if lo > hi {
            return Err(Error::BadManifest {
                source_path: parent.source().to_string(),
                reason: format!("generator {}: rangeOver is empty ({lo} > {hi})", self.name),
            });
        }
        let mut out = Vec::with_capacity((hi - lo + 1) as usize);
        for count in lo..=hi {
            let mut context = tera::Context::new();
            for (key, value) in &self.context {
                context.insert(key.as_str(), value);
            }
            context.insert("count", &count);
            context.insert("parent", &parent.id());
            let rendered = tera::Tera::one_off(&self.template, &context, false).map_err(
                |e| Error::BadManifest {
                    source_path: parent.source().to_string(),
                    reason: format!("generator {}[{count}]: {e}", self.name),
                },
            )?;
            let source = format!("{}#{}[{count}]", parent.source(), self.name);
            let manifest = Manifest::from_slice(rendered.as_bytes(), &source)?;
            if !manifest.generate.is_empty() {
                // Depth greater than one would allow generation cycles.
                return Err(Error::BadManifest {
                    source_path: source,
                    reason: "generated manifests cannot declare generators".to_string(),
                });
            }
            out.push(manifest);
        }
        Ok(out)
    }
}

/// Expand every generator declared by `manifests`, appending the generated
/// manifests after their parents.
pub fn expand_generated(manifests: Vec<Manifest>) -> Result<Vec<Manifest>> {
    let mut out = Vec::with_capacity(manifests.len());
    for manifest in manifests {
        let mut generated = Vec::new();
        for generator in &manifest.generate {
            let produced = generator.expand(&manifest)?;
            tracing::debug!(
                parent = %manifest.selector(),
                generator = %generator.name,
                count = produced.len(),
                "expanded manifest generator"
            );
            generated.extend(produced);
        }
        out.push(manifest);
        out.append(&mut generated);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const YEAR_TEMPLATE: &str = r#"{
        "kind": "website", "group": "page", "version": "v1",
        "namespace": "year", "name": "{{ count }}",
        "meta": {
            "live": true,
            "href": "/{{ count }}/index.html",
            "publishAt": {"year": {{ count }}, "month": 1, "day": 1}
        },
        "spec": {"title": "{{ count }}", "href": "/{{ count }}/index.html", "body": "{{ count }}"}
    }"#;

    fn parent_with(generator: serde_json::Value) -> Manifest {
        let raw = serde_json::json!({
            "kind": "website", "group": "domain", "version": "v1",
            "namespace": "site", "name": "root",
            "meta": {"live": true},
            "generateManifests": [generator],
        });
        Manifest::from_slice(raw.to_string().as_bytes(), "test").unwrap()
    }

    #[test]
    fn test_expands_inclusive_range() {
        let parent = parent_with(serde_json::json!({
            "name": "years",
            "rangeOver": [2007, 2020],
            "template": YEAR_TEMPLATE,
        }));
        let all = expand_generated(vec![parent]).unwrap();
        // The parent itself plus one manifest per year.
        assert_eq!(all.len(), 15);
        assert_eq!(all[1].id(), "website/page/v1/year/2007");
        assert_eq!(all[14].id(), "website/page/v1/year/2020");
        assert_eq!(all[1].meta.href.as_deref(), Some("/2007/index.html"));
    }

    #[test]
    fn test_context_bindings() {
        let parent = parent_with(serde_json::json!({
            "name": "labeled",
            "rangeOver": [1, 1],
            "context": {"label": "tag"},
            "template": r#"{
                "kind": "website", "group": "page", "version": "v1",
                "namespace": "{{ label }}", "name": "entry-{{ count }}",
                "meta": {"live": true},
                "spec": {"parent": "{{ parent }}"}
            }"#,
        }));
        let all = expand_generated(vec![parent]).unwrap();
        assert_eq!(all[1].id(), "website/page/v1/tag/entry-1");
        assert_eq!(
            all[1].spec["parent"],
            serde_json::json!("website/domain/v1/site/root")
        );
    }

    #[test]
    fn test_rejects_nested_generators() {
        let parent = parent_with(serde_json::json!({
            "name": "nested",
            "rangeOver": [1, 1],
            "template": r#"{
                "kind": "k", "group": "g", "version": "v",
                "namespace": "n", "name": "{{ count }}",
                "generateManifests": [{
                    "name": "inner", "rangeOver": [1, 1], "template": "{}"
                }]
            }"#,
        }));
        assert!(expand_generated(vec![parent]).is_err());
    }

    #[test]
    fn test_rejects_empty_range() {
        let parent = parent_with(serde_json::json!({
            "name": "empty",
            "rangeOver": [5, 1],
            "template": "{}",
        }));
        assert!(expand_generated(vec![parent]).is_err());
    }
}
