//! The sharded, ordering-aware, relation-aware manifest store.

use crate::error::{Collision, Error, Result};
use crate::manifest::Manifest;
use crate::selector::Selector;
use chrono::NaiveDateTime;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

/// All manifests of one KGVN, addressable by ID and ordered by publish
/// time (newest first after collation).
#[derive(Debug, Default)]
struct Shard {
    by_id: HashMap<String, Arc<Manifest>>,
    ordered: Vec<Arc<Manifest>>,
    position: HashMap<String, usize>,
    month_day: HashMap<(u32, u32), Vec<Arc<Manifest>>>,
}

/// A two-phase store: manifests are inserted one by one, then `collate`
/// resolves every declared relation to a fixpoint and freezes shard
/// ordering. After collation the index is read-only; inserting again
/// invalidates the relation table and requires a fresh collate.
#[derive(Debug)]
pub struct Index {
    now: NaiveDateTime,
    live: HashMap<String, Arc<Manifest>>,
    not_live: HashMap<String, Arc<Manifest>>,
    shards: HashMap<String, Shard>,
    relations: HashMap<String, BTreeSet<String>>,
    collated: bool,
}

impl Index {
    /// An index that judges liveness against the current wall clock.
    pub fn new() -> Self {
        Index::at(chrono::Utc::now().naive_utc())
    }

    /// An index that judges liveness against a fixed instant.
    pub fn at(now: NaiveDateTime) -> Self {
        Index {
            now,
            live: HashMap::new(),
            not_live: HashMap::new(),
            shards: HashMap::new(),
            relations: HashMap::new(),
            collated: false,
        }
    }

    /// Add manifests. Non-live manifests are segregated so lookups can
    /// explain why a reference missed. Colliding IDs within the live set are
    /// aggregated into a single error listing every offending source.
    pub fn insert(&mut self, manifests: impl IntoIterator<Item = Manifest>) -> Result<()> {
        let mut collisions: Vec<Collision> = Vec::new();
        for manifest in manifests {
            let manifest = Arc::new(manifest);
            let id = manifest.id();
            if !manifest.is_live(self.now) {
                tracing::debug!(manifest = %id, "segregating non-live manifest");
                self.not_live.insert(id, manifest);
                continue;
            }
            if let Some(existing) = self.live.get(&id) {
                match collisions.iter_mut().find(|c| c.id == id) {
                    Some(collision) => collision.sources.push(manifest.source().to_string()),
                    None => collisions.push(Collision {
                        id,
                        sources: vec![
                            existing.source().to_string(),
                            manifest.source().to_string(),
                        ],
                    }),
                }
                continue;
            }
            self.insert_arc(manifest);
        }
        if !collisions.is_empty() {
            return Err(Error::DuplicateManifest { collisions });
        }
        Ok(())
    }

    fn insert_arc(&mut self, manifest: Arc<Manifest>) {
        let id = manifest.id();
        let shard = self.shards.entry(manifest.kgvn()).or_default();
        shard.by_id.insert(id.clone(), manifest.clone());
        shard.ordered.push(manifest.clone());
        self.live.insert(id, manifest);
        // Any mutation invalidates the relation table wholesale.
        self.relations.clear();
        self.collated = false;
    }

    /// Resolve every declared relation, embed, and child reference into the
    /// relation table, then freeze shard ordering.
    ///
    /// Resolution loops until the relation count stabilizes: a relation
    /// constrained by `matchIfRelatedTo` may only become satisfiable once an
    /// earlier pass has recorded the relations it depends on.
    pub fn collate(&mut self) -> Result<()> {
        loop {
            let before = self.relation_count();
            for (source, target) in self.relation_pairs()? {
                self.relations
                    .entry(source.clone())
                    .or_default()
                    .insert(target.clone());
                self.relations.entry(target).or_default().insert(source);
            }
            if self.relation_count() == before {
                break;
            }
        }
        self.freeze_shards();
        self.collated = true;
        tracing::debug!(
            manifests = self.live.len(),
            relations = self.relation_count(),
            "collated index"
        );
        Ok(())
    }

    fn relation_count(&self) -> usize {
        self.relations.values().map(BTreeSet::len).sum()
    }

    fn relation_pairs(&self) -> Result<Vec<(String, String)>> {
        let mut ids: Vec<&String> = self.live.keys().collect();
        ids.sort();
        let mut pairs = Vec::new();
        for id in ids {
            let manifest = &self.live[id];
            for relation in &manifest.meta.relations {
                for target in relation.resolve(self, manifest, false)? {
                    pairs.push((manifest.id(), target.id()));
                }
            }
            let references = manifest
                .meta
                .embed
                .values()
                .chain(manifest.meta.render_as_child.iter());
            for declared in references {
                for target in declared.relation().resolve(self, manifest, false)? {
                    pairs.push((manifest.id(), target.id()));
                }
            }
        }
        Ok(pairs)
    }

    fn freeze_shards(&mut self) {
        for shard in self.shards.values_mut() {
            shard.ordered.sort_by(|a, b| a.cmp_publish(b));
            shard.position.clear();
            shard.month_day.clear();
            for (position, manifest) in shard.ordered.iter().enumerate() {
                shard.position.insert(manifest.id(), position);
                if let Some(publish) = manifest.meta.publish_at.filter(|p| !p.is_zero()) {
                    shard
                        .month_day
                        .entry((publish.month, publish.day))
                        .or_default()
                        .push(manifest.clone());
                }
            }
        }
    }

    /// Find the unique live manifest for a selector.
    pub fn find_one(&self, selector: &Selector) -> Result<Arc<Manifest>> {
        let id = selector.id();
        if let Some(shard) = self.shards.get(&selector.kgvn()) {
            if let Some(manifest) = shard.by_id.get(&id) {
                return Ok(manifest.clone());
            }
        }
        if let Some(buried) = self.not_live.get(&id) {
            return Err(Error::NotLive {
                id,
                source_path: buried.source().to_string(),
            });
        }
        Err(Error::NotFound {
            id,
            index_digest: self.to_string(),
        })
    }

    /// Find every live manifest a selector references. Wildcards return a
    /// copy of their shard so caller-side sorting cannot corrupt it; a
    /// wildcard over an absent shard is an empty (not erroneous) result.
    pub fn find_many(&self, selector: &Selector) -> Result<Vec<Arc<Manifest>>> {
        if selector.is_wildcard() {
            return Ok(self
                .shards
                .get(&selector.kgvn())
                .map(|shard| shard.ordered.clone())
                .unwrap_or_default());
        }
        Ok(vec![self.find_one(selector)?])
    }

    /// Intersect `find_many(target)` with the relation set of each
    /// candidate against `must_relate_to`. A wildcard `must_relate_to` is
    /// satisfied by a relation to any manifest in its shard.
    pub fn find_many_with_relation(
        &self,
        target: &Selector,
        must_relate_to: &Selector,
    ) -> Result<Vec<Arc<Manifest>>> {
        let candidates = self.find_many(target)?;
        Ok(candidates
            .into_iter()
            .filter(|candidate| self.relates_to(candidate, must_relate_to))
            .collect())
    }

    fn relates_to(&self, candidate: &Manifest, selector: &Selector) -> bool {
        let Some(related) = self.relations.get(&candidate.id()) else {
            return false;
        };
        if selector.is_wildcard() {
            let Some(shard) = self.shards.get(&selector.kgvn()) else {
                return false;
            };
            related.iter().any(|id| shard.by_id.contains_key(id))
        } else {
            related.contains(&selector.id())
        }
    }

    /// The set of manifests related to `manifest`, in deterministic order.
    pub fn related(&self, manifest: &Manifest) -> Vec<Arc<Manifest>> {
        self.relations
            .get(&manifest.id())
            .map(|related| {
                related
                    .iter()
                    .filter_map(|id| self.live.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The next-newer manifest within the KGVN's publish ordering.
    pub fn next(&self, manifest: &Manifest) -> Option<Arc<Manifest>> {
        let shard = self.shards.get(&manifest.kgvn())?;
        let position = *shard.position.get(&manifest.id())?;
        position.checked_sub(1).map(|p| shard.ordered[p].clone())
    }

    /// The next-older manifest within the KGVN's publish ordering.
    pub fn prev(&self, manifest: &Manifest) -> Option<Arc<Manifest>> {
        let shard = self.shards.get(&manifest.kgvn())?;
        let position = *shard.position.get(&manifest.id())?;
        shard.ordered.get(position + 1).cloned()
    }

    /// Every manifest in the shard sharing `manifest`'s publish month/day,
    /// including `manifest` itself.
    pub fn same_month_day(&self, manifest: &Manifest) -> Vec<Arc<Manifest>> {
        let Some(publish) = manifest.meta.publish_at.filter(|p| !p.is_zero()) else {
            return Vec::new();
        };
        self.shards
            .get(&manifest.kgvn())
            .and_then(|shard| shard.month_day.get(&(publish.month, publish.day)))
            .cloned()
            .unwrap_or_default()
    }

    /// A sub-index whose universe is exactly the relation set of
    /// `manifest`, used for parent-scoped navigation.
    pub fn related_index(&self, manifest: &Manifest) -> Result<Index> {
        let universe = self
            .relations
            .get(&manifest.id())
            .cloned()
            .unwrap_or_default();
        let mut sub = Index::at(self.now);
        for id in &universe {
            if let Some(member) = self.live.get(id) {
                sub.insert_arc(member.clone());
            }
        }
        sub.relations.clear();
        for id in &universe {
            if let Some(related) = self.relations.get(id) {
                sub.relations
                    .insert(id.clone(), related.intersection(&universe).cloned().collect());
            }
        }
        sub.freeze_shards();
        sub.collated = true;
        Ok(sub)
    }

    pub fn is_collated(&self) -> bool {
        self.collated
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}

impl Default for Index {
    fn default() -> Self {
        Index::new()
    }
}

impl fmt::Display for Index {
    /// The shard/count table surfaced inside `NotFound` diagnostics.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:<45}COUNT", "INDEX SHARD")?;
        let mut keys: Vec<&String> = self.shards.keys().collect();
        keys.sort();
        for key in keys {
            writeln!(f, "{:<45}{}", key, self.shards[key].ordered.len())?;
        }
        Ok(())
    }
}
