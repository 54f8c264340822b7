//! The resource graph: manifests wrapped with their typed instances,
//! templates, embeds, and children, memoized by structural identity.

use crate::artifact::ArtifactCache;
use crate::error::{EngineError, Result};
use crate::factory::Factory;
use crate::kinds::Instance;
use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock, Weak};
use tessera_core::{Index, Manifest, Selector};
use tokio_util::sync::CancellationToken;

/// Filesystems and scratch space for one render run.
#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub source_dir: PathBuf,
    pub dest_dir: PathBuf,
    pub cache_dir: PathBuf,
}

/// State common to every node of one resource graph.
pub(crate) struct Shared {
    pub index: Arc<Index>,
    pub factory: Arc<Factory>,
    /// Memoized nodes keyed by cache id.
    pub resources: DashMap<String, Arc<Resource>>,
    /// Per-render template output cache: (parent, consumer, template) → output.
    pub outputs: DashMap<(String, String, String), String>,
    pub artifact: ArtifactCache,
    pub source_dir: PathBuf,
    pub dest_dir: PathBuf,
}

/// A named embed: the resources injected into a consumer's template
/// function table under one name.
pub struct Embed {
    pub name: String,
    pub wildcard: bool,
    pub members: Vec<Arc<Resource>>,
}

/// A graph node. Parent and root links are back-references only; interior
/// lists are shared between structural clones of the same node.
pub struct Resource {
    pub(crate) manifest: Arc<Manifest>,
    pub(crate) instance: Instance,
    name: String,
    cache_id: String,
    parent: Option<Weak<Resource>>,
    navigation_scoped_by_parent: bool,
    templates: Arc<OnceLock<Vec<Arc<Resource>>>>,
    embeds: Arc<OnceLock<Vec<Embed>>>,
    children: Arc<OnceLock<Vec<Arc<Resource>>>>,
    pub(crate) shared: Arc<Shared>,
}

impl Resource {
    /// Instantiate the graph rooted at `target`.
    pub fn build(
        target: &Selector,
        index: Arc<Index>,
        factory: Arc<Factory>,
        options: &RenderOptions,
    ) -> Result<Arc<Resource>> {
        let shared = Arc::new(Shared {
            index,
            factory,
            resources: DashMap::new(),
            outputs: DashMap::new(),
            artifact: ArtifactCache::new(options.cache_dir.clone()),
            source_dir: options.source_dir.clone(),
            dest_dir: options.dest_dir.clone(),
        });
        let manifest = shared.index.find_one(target)?;
        Self::construct(&shared, manifest, None, None, None, false)
    }

    fn construct(
        shared: &Arc<Shared>,
        manifest: Arc<Manifest>,
        name: Option<String>,
        template_override: Option<Vec<Selector>>,
        parent: Option<&Arc<Resource>>,
        navigation_scoped_by_parent: bool,
    ) -> Result<Arc<Resource>> {
        let template_selectors =
            template_override.unwrap_or_else(|| manifest.meta.render_templates.clone());
        let cache_id = cache_id(&manifest, &template_selectors);
        if let Some(hit) = shared.resources.get(&cache_id) {
            let cached = hit.value().clone();
            drop(hit);
            return Ok(cached.clone_with_parent(name, parent, navigation_scoped_by_parent));
        }
        let instance = shared.factory.instantiate(&manifest)?;
        let node = Arc::new(Resource {
            manifest: manifest.clone(),
            instance,
            name: name.unwrap_or_else(|| manifest.id()),
            cache_id: cache_id.clone(),
            parent: parent.map(Arc::downgrade),
            navigation_scoped_by_parent,
            templates: Arc::new(OnceLock::new()),
            embeds: Arc::new(OnceLock::new()),
            children: Arc::new(OnceLock::new()),
            shared: shared.clone(),
        });
        // Memoize before descending so cyclic references resolve to this
        // node instead of recursing forever.
        shared.resources.insert(cache_id, node.clone());

        let mut templates = Vec::with_capacity(template_selectors.len());
        for selector in &template_selectors {
            let found = shared.index.find_one(selector)?;
            // Templates are not themselves rendered through templates.
            templates.push(Self::construct(
                shared,
                found,
                None,
                Some(Vec::new()),
                Some(&node),
                false,
            )?);
        }
        let _ = node.templates.set(templates);

        let mut children = Vec::new();
        for target in &manifest.meta.render_as_child {
            for found in target.relation().resolve(&shared.index, &manifest, false)? {
                children.push(Self::construct(
                    shared,
                    found,
                    target.name.clone(),
                    target.render_templates.clone(),
                    Some(&node),
                    target.navigation_scoped_by_parent,
                )?);
            }
        }
        let _ = node.children.set(children);

        let mut embeds = Vec::new();
        for (embed_name, target) in &manifest.meta.embed {
            let wildcard = target.selector.is_wildcard();
            let mut members = Vec::new();
            for found in target.relation().resolve(&shared.index, &manifest, false)? {
                let member_name = if wildcard {
                    found.id()
                } else {
                    embed_name.clone()
                };
                members.push(Self::construct(
                    shared,
                    found,
                    Some(member_name),
                    target.render_templates.clone(),
                    Some(&node),
                    target.navigation_scoped_by_parent,
                )?);
            }
            embeds.push(Embed {
                name: embed_name.clone(),
                wildcard,
                members,
            });
        }
        let _ = node.embeds.set(embeds);

        Ok(node)
    }

    /// A structural clone: shares the interior lists, differs in parent and
    /// navigation scope.
    fn clone_with_parent(
        self: &Arc<Self>,
        name: Option<String>,
        parent: Option<&Arc<Resource>>,
        navigation_scoped_by_parent: bool,
    ) -> Arc<Resource> {
        Arc::new(Resource {
            manifest: self.manifest.clone(),
            instance: self.instance.clone(),
            name: name.unwrap_or_else(|| self.name.clone()),
            cache_id: self.cache_id.clone(),
            parent: parent.map(Arc::downgrade),
            navigation_scoped_by_parent,
            templates: self.templates.clone(),
            embeds: self.embeds.clone(),
            children: self.children.clone(),
            shared: self.shared.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cache_id(&self) -> &str {
        &self.cache_id
    }

    pub fn manifest(&self) -> &Arc<Manifest> {
        &self.manifest
    }

    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    pub fn parent(&self) -> Option<Arc<Resource>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    pub fn root(self: &Arc<Self>) -> Arc<Resource> {
        let mut cursor = self.clone();
        while let Some(parent) = cursor.parent() {
            cursor = parent;
        }
        cursor
    }

    pub fn templates(&self) -> &[Arc<Resource>] {
        self.templates.get().map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn children(&self) -> &[Arc<Resource>] {
        self.children.get().map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn embeds(&self) -> &[Embed] {
        self.embeds.get().map(Vec::as_slice).unwrap_or(&[])
    }

    fn own_href(&self) -> Result<&str> {
        self.manifest
            .meta
            .href
            .as_deref()
            .or_else(|| self.instance.href())
            .ok_or_else(|| EngineError::render(self.path_chain(), "does not define a href"))
    }

    /// Whether this resource produces a textual artifact of its own.
    /// Assets and templates never do, whatever their spec carries.
    pub fn is_content(&self) -> bool {
        self.instance.body().is_some()
            && !self.instance.is_template()
            && !self.instance.is_asset()
    }

    fn prefix_from(&self, start: Option<Arc<Resource>>) -> String {
        let mut segments: Vec<String> = Vec::new();
        if let Some(prefix) = self.manifest.meta.href_prefix.as_deref() {
            segments.push(prefix.to_string());
        }
        let mut cursor = start;
        while let Some(node) = cursor {
            if let Some(prefix) = node.manifest.meta.href_prefix.as_deref() {
                segments.insert(0, prefix.to_string());
            }
            cursor = node.parent();
        }
        segments.join("/")
    }

    /// The output location of this resource, scoped by every ancestor's
    /// `hrefPrefix`.
    pub fn href(self: &Arc<Self>) -> Result<String> {
        let own = self.own_href()?.to_string();
        Ok(join_href(&self.prefix_from(self.parent()), &own))
    }

    /// The canonical location: only the root's prefix applies, ignoring the
    /// resources that wrapped or scoped this one.
    pub fn href_canonical(self: &Arc<Self>) -> Result<String> {
        let own = self.own_href()?.to_string();
        let root = self.root();
        let start = if Arc::ptr_eq(&root, self) {
            None
        } else {
            Some(root)
        };
        Ok(join_href(&self.prefix_from(start), &own))
    }

    /// Title fragments joined walking the parent chain, with the root's
    /// `titleBase` as the final fragment.
    pub fn titles(self: &Arc<Self>) -> String {
        let mut fragments: Vec<String> = Vec::new();
        let mut cursor = Some(self.clone());
        while let Some(node) = cursor {
            let fragment = node
                .instance
                .title()
                .or(node.manifest.meta.title.as_deref());
            if let Some(fragment) = fragment {
                if !fragment.is_empty() {
                    fragments.push(fragment.to_string());
                }
            }
            cursor = node.parent();
        }
        let root = self.root();
        if let Some(base) = root.manifest.meta.title_base.as_deref() {
            if !base.is_empty() {
                fragments.push(base.to_string());
            }
        }
        fragments.join(" | ")
    }

    /// The next-newer resource in this manifest's shard; scoped to the
    /// parent's relations when `navigationScopedByParent` is set.
    pub fn next(self: &Arc<Self>) -> Result<Option<Arc<Resource>>> {
        self.navigate(true)
    }

    /// The next-older resource, same scoping rules.
    pub fn prev(self: &Arc<Self>) -> Result<Option<Arc<Resource>>> {
        self.navigate(false)
    }

    fn navigate(self: &Arc<Self>, forward: bool) -> Result<Option<Arc<Resource>>> {
        let found = if self.navigation_scoped_by_parent {
            match self.parent() {
                Some(parent) => {
                    let scoped = self.shared.index.related_index(&parent.manifest)?;
                    if forward {
                        scoped.next(&self.manifest)
                    } else {
                        scoped.prev(&self.manifest)
                    }
                }
                None => None,
            }
        } else if forward {
            self.shared.index.next(&self.manifest)
        } else {
            self.shared.index.prev(&self.manifest)
        };
        let parent = self.parent();
        match found {
            Some(manifest) => Ok(Some(Self::construct(
                &self.shared,
                manifest,
                None,
                None,
                parent.as_ref(),
                false,
            )?)),
            None => Ok(None),
        }
    }

    /// Resources related to this one matching `target`. An unmatched
    /// selector is an empty result, not an error.
    pub fn related(self: &Arc<Self>, target: &Selector) -> Result<Vec<Arc<Resource>>> {
        let Ok(matches) = self
            .shared
            .index
            .find_many_with_relation(target, self.manifest.selector())
        else {
            return Ok(Vec::new());
        };
        matches
            .into_iter()
            .map(|manifest| {
                Self::construct(&self.shared, manifest, None, None, Some(self), false)
            })
            .collect()
    }

    /// Build resources for manifests resolved at template time (dynamic
    /// imports and navigation helpers share this path).
    pub(crate) fn adopt(
        self: &Arc<Self>,
        manifest: Arc<Manifest>,
    ) -> Result<Arc<Resource>> {
        Self::construct(&self.shared, manifest, None, None, Some(self), false)
    }

    /// The resource names from the root down to this node, for diagnostics.
    pub fn path_chain(&self) -> String {
        let mut names = vec![self.name.clone()];
        let mut cursor = self.parent();
        while let Some(node) = cursor {
            names.push(node.name.clone());
            cursor = node.parent();
        }
        names.reverse();
        names.join(" -> ")
    }

    /// Render this resource's subtree with bounded concurrency.
    pub async fn render(
        self: &Arc<Self>,
        concurrency: usize,
        cancel: CancellationToken,
    ) -> Result<()> {
        crate::scheduler::render(self.clone(), concurrency, cancel).await
    }
}

impl std::fmt::Display for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.name != self.manifest.id() {
            write!(f, "{} ({})", self.manifest.selector(), self.name)
        } else {
            f.write_str(&self.name)
        }
    }
}

/// Structural identity of a node: the manifest (id and content digest),
/// the chosen templates, and the declared children and embeds. Stable
/// under identical inputs.
fn cache_id(manifest: &Manifest, templates: &[Selector]) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(manifest.id().as_bytes());
    hasher.update(manifest.digest());
    for template in templates {
        hasher.update(template.id().as_bytes());
    }
    for child in &manifest.meta.render_as_child {
        hasher.update(child.selector.id().as_bytes());
    }
    for (name, embed) in &manifest.meta.embed {
        hasher.update(name.as_bytes());
        hasher.update(embed.selector.id().as_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

fn join_href(prefix: &str, href: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    parts.extend(prefix.split('/').filter(|segment| !segment.is_empty()));
    parts.extend(href.split('/').filter(|segment| !segment.is_empty()));
    format!("/{}", parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::default_factory;
    use tessera_core::Manifest;

    fn options(root: &std::path::Path) -> RenderOptions {
        RenderOptions {
            source_dir: root.join("assets"),
            dest_dir: root.join("dist"),
            cache_dir: root.join(".cache"),
        }
    }

    fn graph(manifests: Vec<serde_json::Value>, target: &str) -> Arc<Resource> {
        let mut index = Index::new();
        index
            .insert(
                manifests
                    .into_iter()
                    .map(|raw| {
                        Manifest::from_slice(raw.to_string().as_bytes(), "test").unwrap()
                    })
                    .collect::<Vec<_>>(),
            )
            .unwrap();
        index.collate().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        Resource::build(
            &Selector::parse(target).unwrap(),
            Arc::new(index),
            Arc::new(default_factory()),
            &options(scratch.path()),
        )
        .unwrap()
    }

    fn post(name: &str) -> serde_json::Value {
        serde_json::json!({
            "kind": "website", "group": "page", "version": "v1",
            "namespace": "post", "name": name,
            "meta": {"live": true},
            "spec": {
                "title": format!("Post {name}"),
                "href": format!("/{name}.html"),
                "body": format!("body of {name}"),
            },
        })
    }

    #[test]
    fn test_href_scoped_by_parent_chain() {
        let root = graph(
            vec![
                serde_json::json!({
                    "kind": "website", "group": "domain", "version": "v1",
                    "namespace": "site", "name": "main",
                    "meta": {
                        "live": true,
                        "renderAsChild": [
                            {"selector": "website/taxonomy/v1/topic/testing"},
                        ],
                    },
                    "spec": {
                        "title": "Home",
                        "description": "A site",
                        "author": "someone",
                        "body": "welcome",
                    },
                }),
                serde_json::json!({
                    "kind": "website", "group": "taxonomy", "version": "v1",
                    "namespace": "topic", "name": "testing",
                    "meta": {
                        "live": true,
                        "hrefPrefix": "/topic/testing",
                        "renderAsChild": [{"selector": "website/page/v1/post/a"}],
                    },
                    "spec": {"title": "Testing", "href": "/index.html"},
                }),
                post("a"),
            ],
            "website/domain/v1/site/main",
        );
        let topic = root.children()[0].clone();
        let child = topic.children()[0].clone();
        // The scoped href collects every ancestor prefix; the canonical one
        // only the root's.
        assert_eq!(child.href().unwrap(), "/topic/testing/a.html");
        assert_eq!(child.href_canonical().unwrap(), "/a.html");
        assert_eq!(topic.href().unwrap(), "/topic/testing/index.html");
    }

    #[test]
    fn test_titles_walk_parent_chain() {
        let root = graph(
            vec![
                serde_json::json!({
                    "kind": "website", "group": "domain", "version": "v1",
                    "namespace": "site", "name": "main",
                    "meta": {
                        "live": true,
                        "titleBase": "example.com",
                        "renderAsChild": [{"selector": "website/page/v1/post/a"}],
                    },
                    "spec": {
                        "title": "Home",
                        "description": "A site",
                        "author": "someone",
                        "body": "welcome",
                    },
                }),
                post("a"),
            ],
            "website/domain/v1/site/main",
        );
        let child = root.children()[0].clone();
        assert_eq!(child.titles(), "Post a | Home | example.com");
    }

    #[test]
    fn test_repeat_requests_share_structure() {
        let root = graph(
            vec![
                serde_json::json!({
                    "kind": "website", "group": "domain", "version": "v1",
                    "namespace": "site", "name": "main",
                    "meta": {
                        "live": true,
                        "embed": {"latest": {"selector": "website/page/v1/post/a"}},
                        "renderAsChild": [{"selector": "website/page/v1/post/a"}],
                    },
                    "spec": {
                        "title": "Home",
                        "description": "A site",
                        "author": "someone",
                        "body": "welcome",
                    },
                }),
                post("a"),
            ],
            "website/domain/v1/site/main",
        );
        let child = &root.children()[0];
        let embedded = &root.embeds()[0].members[0];
        // One structural identity, two handles with their own names.
        assert_eq!(child.cache_id(), embedded.cache_id());
        assert_eq!(embedded.name(), "latest");
        assert!(Arc::ptr_eq(
            &child.parent().unwrap(),
            &embedded.parent().unwrap()
        ));
    }

    #[test]
    fn test_cache_id_stable_and_input_sensitive() {
        let a = Manifest::from_slice(post("a").to_string().as_bytes(), "x").unwrap();
        let same = Manifest::from_slice(post("a").to_string().as_bytes(), "y").unwrap();
        let other = Manifest::from_slice(post("b").to_string().as_bytes(), "x").unwrap();
        assert_eq!(cache_id(&a, &[]), cache_id(&same, &[]));
        assert_ne!(cache_id(&a, &[]), cache_id(&other, &[]));
        let template = Selector::parse("html/template/v1/default/layout").unwrap();
        assert_ne!(cache_id(&a, &[]), cache_id(&a, std::slice::from_ref(&template)));
    }

    #[test]
    fn test_self_referential_child_terminates() {
        let root = graph(
            vec![serde_json::json!({
                "kind": "website", "group": "taxonomy", "version": "v1",
                "namespace": "topic", "name": "loop",
                "meta": {
                    "live": true,
                    "renderAsChild": [
                        {"selector": "website/taxonomy/v1/topic/loop"},
                    ],
                },
                "spec": {"title": "Loop", "href": "/loop/index.html"},
            })],
            "website/taxonomy/v1/topic/loop",
        );
        // The cycle resolves to a structural clone of the same node.
        let child = &root.children()[0];
        assert_eq!(child.cache_id(), root.cache_id());
    }
}
