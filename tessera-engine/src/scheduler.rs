//! Bounded-parallel rendering of a resource subtree.
//!
//! Each node fans out four independent sub-operations: its own binary
//! instance, every child subtree, every embed's binary instance, and its
//! own textual output. Permits from the shared semaphore wrap individual
//! units of work and are never held across recursion, so fan-out larger
//! than the concurrency cap cannot deadlock.

use crate::artifact::ArtifactCache;
use crate::error::{EngineError, Result};
use crate::kinds::AssetContext;
use crate::resource::Resource;
use dashmap::DashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_CONCURRENCY: usize = 10;

struct Scheduler {
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    /// Cache ids whose render has started; the graph may be cyclic, each
    /// node renders at most once.
    started: DashSet<String>,
}

/// Render `root` and everything below it with at most `concurrency`
/// concurrent units of work. The first non-cancellation error wins;
/// siblings observe the flipped token and short-circuit.
pub async fn render(
    root: Arc<Resource>,
    concurrency: usize,
    cancel: CancellationToken,
) -> Result<()> {
    let concurrency = concurrency.max(1);
    let scheduler = Arc::new(Scheduler {
        semaphore: Arc::new(Semaphore::new(concurrency)),
        cancel,
        started: DashSet::new(),
    });
    tracing::info!(root = %root, concurrency, "rendering");
    scheduler.node(root).await
}

impl Scheduler {
    fn node(
        self: Arc<Self>,
        resource: Arc<Resource>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> {
        Box::pin(async move {
            if self.cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            if !self.started.insert(resource.cache_id().to_string()) {
                return Ok(());
            }
            let mut tasks: JoinSet<Result<()>> = JoinSet::new();
            {
                let scheduler = self.clone();
                let resource = resource.clone();
                tasks.spawn(async move { scheduler.instance(resource).await });
            }
            for child in resource.children() {
                tasks.spawn(self.clone().node(child.clone()));
            }
            for embed in resource.embeds() {
                // Embed instances render, but never their subtrees.
                for member in &embed.members {
                    let scheduler = self.clone();
                    let member = member.clone();
                    tasks.spawn(async move { scheduler.instance(member).await });
                }
            }
            {
                let scheduler = self.clone();
                let resource = resource.clone();
                tasks.spawn(async move { scheduler.content(resource).await });
            }
            self.join(tasks).await
        })
    }

    async fn join(&self, mut tasks: JoinSet<Result<()>>) -> Result<()> {
        let mut first: Option<EngineError> = None;
        let mut saw_cancelled = false;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    if error.is_cancelled() {
                        saw_cancelled = true;
                    } else if first.is_none() {
                        // First error wins; flip the token so siblings stop
                        // at their next suspension point.
                        self.cancel.cancel();
                        first = Some(error);
                    }
                }
                Err(join_error) => {
                    if first.is_none() {
                        self.cancel.cancel();
                        first = Some(EngineError::render("render worker", join_error));
                    }
                }
            }
        }
        match first {
            Some(error) => Err(error),
            None if saw_cancelled || self.cancel.is_cancelled() => {
                Err(EngineError::Cancelled)
            }
            None => Ok(()),
        }
    }

    /// Render the binary form of a resource, if it has one.
    async fn instance(&self, resource: Arc<Resource>) -> Result<()> {
        if !resource.instance().is_asset() {
            return Ok(());
        }
        // Assets land under the root's prefix; their own prefix is applied
        // by the writer, so do not double it when the asset is the root.
        let root = resource.root();
        let root_prefix = if Arc::ptr_eq(&root, &resource) {
            ""
        } else {
            root.manifest().meta.href_prefix.as_deref().unwrap_or("")
        };
        let dest_dir = crate::kinds::asset::join_rooted(&resource.shared.dest_dir, root_prefix);
        let context = AssetContext {
            source_dir: resource.shared.source_dir.clone(),
            dest_dir,
            semaphore: self.semaphore.clone(),
            cancel: self.cancel.clone(),
        };
        resource
            .instance()
            .render_asset(resource.manifest(), &context)
            .await
            .map_err(|error| match error {
                EngineError::Cancelled => EngineError::Cancelled,
                EngineError::Render { reason, .. } => EngineError::Render {
                    chain: resource.path_chain(),
                    reason,
                },
                other => other,
            })
    }

    /// Render the textual output of a resource through the artifact cache.
    async fn content(&self, resource: Arc<Resource>) -> Result<()> {
        if !resource.is_content() {
            return Ok(());
        }
        let chain = resource.path_chain();
        let href = resource.href()?;
        let out_path = crate::kinds::asset::join_rooted(&resource.shared.dest_dir, &href);
        let cache: &ArtifactCache = &resource.shared.artifact;

        let cached = cache.read_verified(resource.cache_id()).await;
        let current = tokio::fs::read(&out_path).await.ok();
        match (&cached, &current) {
            (Some(entry), Some(existing)) if entry == existing => {
                tracing::debug!(resource = %resource, "artifact current, skipping");
                return Ok(());
            }
            (Some(entry), _) => {
                // The cache holds a verified copy; restore it instead of
                // re-rendering.
                tracing::debug!(resource = %resource, "restoring artifact from cache");
                write_output(&out_path, entry, &chain).await?;
                return Ok(());
            }
            _ => {}
        }

        let permit = self.acquire().await?;
        tracing::debug!(resource = %resource, href = %href, "rendering content");
        let body = resource.content()?;
        drop(permit);

        if self.cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        write_output(&out_path, body.as_bytes(), &chain).await?;
        cache
            .record(resource.cache_id(), body.as_bytes())
            .await
            .map_err(|e| EngineError::render(&chain, e))?;
        Ok(())
    }

    async fn acquire(&self) -> Result<tokio::sync::OwnedSemaphorePermit> {
        if self.cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        tokio::select! {
            permit = self.semaphore.clone().acquire_owned() => {
                permit.map_err(|_| EngineError::Cancelled)
            }
            _ = self.cancel.cancelled() => Err(EngineError::Cancelled),
        }
    }
}

/// Write an artifact, creating parent directories and removing the partial
/// file if the write fails midway.
async fn write_output(path: &std::path::Path, content: &[u8], chain: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| EngineError::render(chain, e))?;
    }
    if let Err(error) = tokio::fs::write(path, content).await {
        let _ = tokio::fs::remove_file(path).await;
        return Err(EngineError::render(chain, error));
    }
    Ok(())
}
