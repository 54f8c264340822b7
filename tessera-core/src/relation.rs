//! Declared linkages between manifests and the filtering that narrows them.

use crate::error::{Error, Result};
use crate::index::Index;
use crate::manifest::Manifest;
use crate::selector::Selector;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// How a resolved relation is ordered before windowing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// Oldest publish time first.
    #[default]
    Asc,
    /// Newest publish time first.
    Desc,
}

/// The enumerated match operators. The `*AsContext` variants take no values
/// and compare against the manifest the resolution is running for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    InYear,
    InMonth,
    OnDate,
    InSameMonthAsContext,
    OnSameDayAsContext,
}

/// One step of relation narrowing: `{key, operator, values}`.
///
/// `key` is accepted for wire compatibility but the operator alone carries
/// the semantics.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchExpr {
    #[serde(default)]
    pub key: Option<String>,
    pub operator: String,
    #[serde(default)]
    pub values: Vec<i64>,
}

impl MatchExpr {
    pub fn operator(&self) -> Result<Operator> {
        match self.operator.as_str() {
            "InYear" => Ok(Operator::InYear),
            "InMonth" => Ok(Operator::InMonth),
            "OnDate" => Ok(Operator::OnDate),
            "InSameMonthAsContext" => Ok(Operator::InSameMonthAsContext),
            "OnSameDayAsContext" => Ok(Operator::OnSameDayAsContext),
            other => Err(Error::BadRelation(format!(
                "{other} is not a supported operator"
            ))),
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self.operator()? {
            Operator::InYear | Operator::InMonth => {
                if self.values.is_empty() {
                    return Err(Error::BadRelation(format!(
                        "{} requires at least one value",
                        self.operator
                    )));
                }
            }
            Operator::OnDate => {
                if self.values.len() != 3 {
                    return Err(Error::BadRelation(
                        "OnDate requires a [year, month, day] triple".to_string(),
                    ));
                }
            }
            Operator::InSameMonthAsContext | Operator::OnSameDayAsContext => {
                if !self.values.is_empty() {
                    return Err(Error::BadRelation(format!(
                        "{} takes no values",
                        self.operator
                    )));
                }
            }
        }
        Ok(())
    }

    /// Whether `candidate` survives this narrowing step when resolving on
    /// behalf of `context`.
    pub fn matches(&self, candidate: &Manifest, context: &Manifest) -> Result<bool> {
        let published = candidate.meta.publish_at.unwrap_or_default();
        Ok(match self.operator()? {
            Operator::InYear => self.values.contains(&i64::from(published.year)),
            Operator::InMonth => self.values.contains(&i64::from(published.month)),
            Operator::OnDate => {
                i64::from(published.year) == self.values[0]
                    && i64::from(published.month) == self.values[1]
                    && i64::from(published.day) == self.values[2]
            }
            Operator::InSameMonthAsContext => {
                let anchor = context.meta.publish_at.unwrap_or_default();
                candidate.id() != context.id()
                    && !published.is_zero()
                    && !anchor.is_zero()
                    && published.month == anchor.month
            }
            Operator::OnSameDayAsContext => {
                let anchor = context.meta.publish_at.unwrap_or_default();
                candidate.id() != context.id()
                    && !published.is_zero()
                    && !anchor.is_zero()
                    && published.month == anchor.month
                    && published.day == anchor.day
            }
        })
    }
}

/// A declared relationship to one or many manifests.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relation {
    /// Points to the manifest(s) that are related.
    pub selector: Selector,
    /// Seeds for the candidate set; multiple entries are OR'd together.
    #[serde(default)]
    pub match_if_related_to: Vec<Selector>,
    /// Applied in order, each step narrowing the running set (AND).
    #[serde(default)]
    pub match_expression: Vec<MatchExpr>,
    #[serde(default)]
    pub order: SortOrder,
    #[serde(default)]
    pub offset: usize,
    /// Zero means unlimited.
    #[serde(default)]
    pub limit: usize,
}

impl Relation {
    pub fn validate(&self) -> Result<()> {
        for matcher in &self.match_expression {
            matcher.validate()?;
        }
        Ok(())
    }

    /// Turn the relation into the manifests it references.
    ///
    /// `context` is the manifest the resolution is running for; when
    /// `must_relate_to_context` is set the candidate seed is restricted to
    /// manifests already related to it.
    pub fn resolve(
        &self,
        index: &Index,
        context: &Manifest,
        must_relate_to_context: bool,
    ) -> Result<Vec<Arc<Manifest>>> {
        let mut matches: Vec<Arc<Manifest>> = if must_relate_to_context {
            index.find_many_with_relation(&self.selector, context.selector())?
        } else if self.match_if_related_to.is_empty() {
            index.find_many(&self.selector)?
        } else {
            Vec::new()
        };
        for related in &self.match_if_related_to {
            matches.extend(index.find_many_with_relation(&self.selector, related)?);
        }
        for matcher in &self.match_expression {
            // Narrowing never re-introduces elements; an empty running set
            // cannot grow back.
            if matches.is_empty() {
                break;
            }
            let mut filtered = Vec::with_capacity(matches.len());
            for candidate in matches {
                if matcher.matches(&candidate, context)? {
                    filtered.push(candidate);
                }
            }
            matches = filtered;
        }
        match self.order {
            SortOrder::Asc => matches.sort_by(|a, b| a.cmp_publish_oldest_first(b)),
            SortOrder::Desc => matches.sort_by(|a, b| a.cmp_publish(b)),
        }
        let start = self.offset.min(matches.len());
        let end = if self.limit == 0 {
            matches.len()
        } else {
            (start + self.limit).min(matches.len())
        };
        Ok(matches[start..end].to_vec())
    }
}
