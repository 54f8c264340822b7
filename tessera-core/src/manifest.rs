//! The self-describing input record everything else is built from.

use crate::error::{Error, Result};
use crate::generate::Generator;
use crate::meta::Meta;
use crate::selector::Selector;
use chrono::format::StrftimeItems;
use chrono::NaiveDateTime;
use serde::Deserialize;
use std::cmp::Ordering;
use std::fmt;
use std::fmt::Write;

/// An indivisible input record: a selector, a metadata block, a typed spec
/// blob, and the digest of the raw bytes it was built from.
#[derive(Debug, Clone)]
pub struct Manifest {
    selector: Selector,
    pub meta: Meta,
    /// Interpreted by the concrete kind the selector names.
    pub spec: serde_json::Value,
    pub generate: Vec<Generator>,
    digest: [u8; 32],
    source: String,
}

/// The normative wire shape. Unknown fields are ignored.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Wire {
    kind: String,
    group: String,
    version: String,
    namespace: String,
    name: String,
    #[serde(default)]
    meta: Meta,
    #[serde(default)]
    spec: serde_json::Value,
    #[serde(default)]
    generate_manifests: Vec<Generator>,
}

impl Manifest {
    /// Build a manifest from an already-normalized JSON value plus the raw
    /// bytes it came from (hashed for the content digest) and a source
    /// identifier for diagnostics.
    pub fn from_value(
        value: serde_json::Value,
        raw: &[u8],
        source: &str,
    ) -> Result<Self> {
        let bad = |reason: String| Error::BadManifest {
            source_path: source.to_string(),
            reason,
        };
        let wire: Wire = serde_json::from_value(value).map_err(|e| bad(e.to_string()))?;
        let selector = Selector::parse(&format!(
            "{}/{}/{}/{}/{}",
            wire.kind, wire.group, wire.version, wire.namespace, wire.name
        ))?;
        let mut manifest = Manifest {
            selector,
            meta: wire.meta,
            spec: wire.spec,
            generate: wire.generate_manifests,
            digest: *blake3::hash(raw).as_bytes(),
            source: source.to_string(),
        };
        manifest.validate()?;
        manifest.expand_href_templates()?;
        Ok(manifest)
    }

    /// Build a manifest from raw JSON bytes.
    pub fn from_slice(raw: &[u8], source: &str) -> Result<Self> {
        let value = serde_json::from_slice(raw).map_err(|e| Error::BadManifest {
            source_path: source.to_string(),
            reason: e.to_string(),
        })?;
        Manifest::from_value(value, raw, source)
    }

    fn validate(&self) -> Result<()> {
        if self.selector.is_wildcard() {
            return Err(Error::BadManifest {
                source_path: self.source.clone(),
                reason: format!("{}: wildcard selector cannot name a manifest", self.selector),
            });
        }
        self.meta.validate()?;
        Ok(())
    }

    /// Resolve strftime escapes in `href`/`hrefPrefix` against `publishAt`.
    fn expand_href_templates(&mut self) -> Result<()> {
        let Some(instant) = self.meta.publish_at.and_then(|p| p.to_datetime()) else {
            return Ok(());
        };
        let source = self.source.clone();
        for field in [&mut self.meta.href_prefix, &mut self.meta.href] {
            let Some(template) = field.as_deref() else {
                continue;
            };
            if !template.contains('%') {
                continue;
            }
            let expanded =
                expand_strftime(template, &instant).map_err(|reason| Error::BadManifest {
                    source_path: source.clone(),
                    reason,
                })?;
            *field = Some(expanded);
        }
        Ok(())
    }

    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    pub fn id(&self) -> String {
        self.selector.id()
    }

    pub fn kgv(&self) -> String {
        self.selector.kgv()
    }

    pub fn kgvn(&self) -> String {
        self.selector.kgvn()
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Stable digest of the raw bytes the manifest was built from.
    pub fn digest(&self) -> &[u8; 32] {
        &self.digest
    }

    pub fn publish_time(&self) -> Option<NaiveDateTime> {
        self.meta.publish_at.and_then(|p| p.to_datetime())
    }

    /// Live manifests are eligible for lookups; the rest exist only to
    /// produce informative errors.
    pub fn is_live(&self, now: NaiveDateTime) -> bool {
        self.meta.live
            && match self.publish_time() {
                Some(instant) => instant <= now,
                None => true,
            }
    }

    /// Newest-first ordering: a later publish time is "less". Either side
    /// lacking a publish time falls back to lexicographic ID order.
    pub fn cmp_publish(&self, other: &Manifest) -> Ordering {
        match (self.publish_time(), other.publish_time()) {
            (Some(a), Some(b)) => b.cmp(&a).then_with(|| self.id().cmp(&other.id())),
            _ => self.id().cmp(&other.id()),
        }
    }

    /// Oldest-first ordering with the same ID fallback.
    pub fn cmp_publish_oldest_first(&self, other: &Manifest) -> Ordering {
        match (self.publish_time(), other.publish_time()) {
            (Some(a), Some(b)) => a.cmp(&b).then_with(|| self.id().cmp(&other.id())),
            _ => self.id().cmp(&other.id()),
        }
    }
}

impl fmt::Display for Manifest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.selector, self.source)
    }
}

fn expand_strftime(
    template: &str,
    instant: &NaiveDateTime,
) -> std::result::Result<String, String> {
    let mut expanded = String::with_capacity(template.len());
    write!(
        expanded,
        "{}",
        instant.format_with_items(StrftimeItems::new(template))
    )
    .map_err(|_| format!("invalid strftime escape in {template:?}"))?;
    Ok(expanded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn manifest(json: &str) -> Manifest {
        Manifest::from_slice(json.as_bytes(), "test").unwrap()
    }

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2020, 6, 15)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_parse_minimal() {
        let m = manifest(
            r#"{"kind":"website","group":"page","version":"v1","namespace":"post","name":"a"}"#,
        );
        assert_eq!(m.id(), "website/page/v1/post/a");
        assert!(!m.is_live(now()));
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let m = manifest(
            r#"{"kind":"k","group":"g","version":"v","namespace":"n","name":"a",
                "meta":{"live":true},"futureProof":42}"#,
        );
        assert!(m.is_live(now()));
    }

    #[test]
    fn test_rejects_wildcard_name() {
        let err = Manifest::from_slice(
            br#"{"kind":"k","group":"g","version":"v","namespace":"n","name":"*"}"#,
            "test",
        )
        .unwrap_err();
        assert!(matches!(err, Error::BadManifest { .. }));
    }

    #[test]
    fn test_future_publish_is_not_live() {
        let m = manifest(
            r#"{"kind":"k","group":"g","version":"v","namespace":"n","name":"a",
                "meta":{"live":true,"publishAt":{"year":2021,"month":1,"day":1}}}"#,
        );
        assert!(!m.is_live(now()));
        assert!(m.is_live(
            NaiveDate::from_ymd_opt(2021, 1, 2)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap()
        ));
    }

    #[test]
    fn test_ordering_newest_first_with_id_fallback() {
        let older = manifest(
            r#"{"kind":"k","group":"g","version":"v","namespace":"n","name":"older",
                "meta":{"publishAt":{"year":2010,"month":1,"day":1}}}"#,
        );
        let newer = manifest(
            r#"{"kind":"k","group":"g","version":"v","namespace":"n","name":"newer",
                "meta":{"publishAt":{"year":2012,"month":1,"day":1}}}"#,
        );
        let dateless = manifest(
            r#"{"kind":"k","group":"g","version":"v","namespace":"n","name":"aaa"}"#,
        );
        assert_eq!(newer.cmp_publish(&older), Ordering::Less);
        assert_eq!(older.cmp_publish(&newer), Ordering::Greater);
        // Without a publish time on one side, IDs decide.
        assert_eq!(dateless.cmp_publish(&newer), Ordering::Less);
    }

    #[test]
    fn test_strftime_href_expansion() {
        let m = manifest(
            r#"{"kind":"k","group":"g","version":"v","namespace":"n","name":"a",
                "meta":{
                    "publishAt":{"year":2010,"month":6,"day":20},
                    "hrefPrefix":"/%Y/%m",
                    "href":"/%Y/%m/%d/index.html"
                }}"#,
        );
        assert_eq!(m.meta.href_prefix.as_deref(), Some("/2010/06"));
        assert_eq!(m.meta.href.as_deref(), Some("/2010/06/20/index.html"));
    }

    #[test]
    fn test_invalid_strftime_escape() {
        let err = Manifest::from_slice(
            br#"{"kind":"k","group":"g","version":"v","namespace":"n","name":"a",
                "meta":{"publishAt":{"year":2010,"month":1,"day":1},"href":"/%Q/index.html"}}"#,
            "test",
        )
        .unwrap_err();
        assert!(matches!(err, Error::BadManifest { .. }));
    }

    #[test]
    fn test_digest_is_stable() {
        let raw = br#"{"kind":"k","group":"g","version":"v","namespace":"n","name":"a"}"#;
        let a = Manifest::from_slice(raw, "one").unwrap();
        let b = Manifest::from_slice(raw, "two").unwrap();
        assert_eq!(a.digest(), b.digest());
    }
}
