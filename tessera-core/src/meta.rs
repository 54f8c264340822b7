//! The metadata block carried by every manifest.

use crate::error::{Error, Result};
use crate::relation::{MatchExpr, Relation, SortOrder};
use crate::selector::Selector;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A deconstructed publication instant. The split form exists so manifests
/// can relate to each other by portions of their publication date.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishAt {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hours: u32,
    pub minutes: u32,
    pub seconds: u32,
}

impl PublishAt {
    /// A zero value means "no publication time".
    pub fn is_zero(&self) -> bool {
        self.year == 0
    }

    /// Convert to a concrete instant. Unset month/day clamp to the start of
    /// their range so `{year: 2010}` still orders and formats.
    pub fn to_datetime(&self) -> Option<NaiveDateTime> {
        if self.is_zero() {
            return None;
        }
        NaiveDate::from_ymd_opt(self.year, self.month.clamp(1, 12), self.day.clamp(1, 31))?
            .and_hms_opt(self.hours, self.minutes, self.seconds)
    }
}

/// A reference from one manifest to others that should be instantiated on
/// its behalf, either as an embed or as a child of the render hierarchy.
///
/// The target doubles as a relation: a wildcard selector can be narrowed by
/// `matchIfRelatedTo` and `matchExpression` exactly like a declared
/// relation.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderTarget {
    #[serde(default)]
    pub name: Option<String>,
    pub selector: Selector,
    #[serde(default)]
    pub match_if_related_to: Vec<Selector>,
    #[serde(default)]
    pub match_expression: Vec<MatchExpr>,
    /// Render targets keep shard order (newest first) unless told
    /// otherwise; bare relations default to oldest-first.
    #[serde(default = "default_target_order")]
    pub order: SortOrder,
    #[serde(default)]
    pub offset: usize,
    #[serde(default)]
    pub limit: usize,
    /// Overrides the templates the resolved manifests would otherwise be
    /// rendered with.
    #[serde(default)]
    pub render_templates: Option<Vec<Selector>>,
    #[serde(default)]
    pub navigation_scoped_by_parent: bool,
}

fn default_target_order() -> SortOrder {
    SortOrder::Desc
}

impl RenderTarget {
    /// The relation view of this target, used to resolve it against the
    /// index.
    pub fn relation(&self) -> Relation {
        Relation {
            selector: self.selector.clone(),
            match_if_related_to: self.match_if_related_to.clone(),
            match_expression: self.match_expression.clone(),
            order: self.order,
            offset: self.offset,
            limit: self.limit,
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.relation().validate()?;
        if let Some(templates) = &self.render_templates {
            for template in templates {
                if template.is_wildcard() {
                    return Err(Error::BadImport(format!(
                        "{template}: template selector cannot be wildcard"
                    )));
                }
            }
        }
        if self.name.is_some() && self.selector.is_wildcard() {
            return Err(Error::BadImport(format!(
                "{}: wildcard selectors cannot be aliased",
                self.selector
            )));
        }
        Ok(())
    }
}

/// Everything a manifest says about itself beyond its typed spec.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Meta {
    /// Backing data for asset kinds, addressed inside the source filesystem.
    pub file: Option<String>,
    /// Non-live manifests are refused by live lookups.
    pub live: bool,
    pub publish_at: Option<PublishAt>,
    /// Path prefix contributed to descendants' hrefs. May contain strftime
    /// escapes resolved against `publishAt`.
    pub href_prefix: Option<String>,
    /// The manifest's own output location. Same strftime treatment.
    pub href: Option<String>,
    pub title: Option<String>,
    pub title_base: Option<String>,
    /// Templates applied, innermost first, to produce textual output.
    pub render_templates: Vec<Selector>,
    /// Named dependencies injected into the template function table.
    pub embed: BTreeMap<String, RenderTarget>,
    /// Resources rendered independently with this manifest as their parent.
    pub render_as_child: Vec<RenderTarget>,
    pub relations: Vec<Relation>,
    /// Relations re-resolved per consumer at template time.
    pub dynamic_imports: Vec<RenderTarget>,
}

impl Meta {
    pub fn validate(&self) -> Result<()> {
        for template in &self.render_templates {
            if template.is_wildcard() {
                return Err(Error::BadImport(format!(
                    "{template}: template selector cannot be wildcard"
                )));
            }
        }
        for target in self.embed.values() {
            // Embed map keys are names by construction, so only the
            // template and relation rules apply here.
            target.relation().validate()?;
            if let Some(templates) = &target.render_templates {
                for template in templates {
                    if template.is_wildcard() {
                        return Err(Error::BadImport(format!(
                            "{template}: template selector cannot be wildcard"
                        )));
                    }
                }
            }
        }
        for target in &self.render_as_child {
            target.validate()?;
        }
        for relation in &self.relations {
            relation.validate()?;
        }
        for import in &self.dynamic_imports {
            if import.name.is_none() {
                return Err(Error::BadImport(format!(
                    "{}: dynamic imports must be named",
                    import.selector
                )));
            }
            import.relation().validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_at_zero() {
        assert!(PublishAt::default().is_zero());
        assert!(PublishAt::default().to_datetime().is_none());
    }

    #[test]
    fn test_publish_at_clamps_missing_month_and_day() {
        let publish = PublishAt {
            year: 2010,
            ..PublishAt::default()
        };
        let instant = publish.to_datetime().unwrap();
        assert_eq!(instant.format("%Y-%m-%d").to_string(), "2010-01-01");
    }

    #[test]
    fn test_meta_rejects_wildcard_template() {
        let meta: Meta = serde_json::from_str(
            r#"{"renderTemplates": ["html/template/v1/default/*"]}"#,
        )
        .unwrap();
        assert!(matches!(meta.validate(), Err(Error::BadImport(_))));
    }

    #[test]
    fn test_render_target_rejects_aliased_wildcard() {
        let target: RenderTarget = serde_json::from_str(
            r#"{"name": "posts", "selector": "website/page/v1/post/*"}"#,
        )
        .unwrap();
        assert!(matches!(target.validate(), Err(Error::BadImport(_))));
    }

    #[test]
    fn test_meta_defaults() {
        let meta: Meta = serde_json::from_str("{}").unwrap();
        assert!(!meta.live);
        assert!(meta.publish_at.is_none());
        assert!(meta.render_templates.is_empty());
        assert!(meta.embed.is_empty());
    }
}
