//! The typed kinds the factory can produce, as a tagged sum plus the
//! capability surface the engine dispatches on.

pub mod asset;
pub mod config;
pub mod template;
pub mod website;

use crate::error::Result;
pub use asset::{AssetContext, AudioSpec, ImageSpec};
pub use config::DataSpec;
pub use template::TemplateSpec;
pub use website::{DomainSpec, PageSpec, TaxonomySpec};

use tessera_core::Manifest;

pub const KGV_JPEG: &str = "asset/jpeg/v1";
pub const KGV_PNG: &str = "asset/png/v1";
pub const KGV_GIF: &str = "asset/gif/v1";
pub const KGV_MPEG: &str = "asset/mpeg/v1";
pub const KGV_PAGE: &str = "website/page/v1";
pub const KGV_DOMAIN: &str = "website/domain/v1";
pub const KGV_TAXONOMY: &str = "website/taxonomy/v1";
pub const KGV_TEMPLATE: &str = "html/template/v1";
pub const KGV_DATA: &str = "config/data/v1";

/// One concrete, validated instance of a manifest's spec.
///
/// Capabilities are exposed as methods rather than downcasts: a kind is
/// "content" when `body()` is present, "linkable" when `href()` is, and so
/// on. Kinds may implement any subset.
#[derive(Debug, Clone)]
pub enum Instance {
    Jpeg(ImageSpec),
    Png(ImageSpec),
    Gif(ImageSpec),
    Mpeg(AudioSpec),
    Page(PageSpec),
    Domain(DomainSpec),
    Taxonomy(TaxonomySpec),
    Template(TemplateSpec),
    Data(DataSpec),
}

impl Instance {
    /// The template body of a content-bearing kind. Asset kinds never have
    /// one; their output is binary only.
    pub fn body(&self) -> Option<&str> {
        match self {
            Instance::Page(spec) => Some(&spec.body),
            Instance::Domain(spec) => Some(&spec.body),
            Instance::Taxonomy(spec) => Some(&spec.body),
            Instance::Template(spec) => Some(&spec.body),
            Instance::Jpeg(_)
            | Instance::Png(_)
            | Instance::Gif(_)
            | Instance::Mpeg(_)
            | Instance::Data(_) => None,
        }
    }

    pub fn href(&self) -> Option<&str> {
        match self {
            Instance::Page(spec) => Some(&spec.href),
            Instance::Domain(spec) => Some(&spec.href),
            Instance::Taxonomy(spec) => Some(&spec.href),
            Instance::Jpeg(spec) | Instance::Png(spec) | Instance::Gif(spec) => {
                spec.href.as_deref()
            }
            _ => None,
        }
    }

    /// The fragment this kind contributes to a joined title chain.
    pub fn title(&self) -> Option<&str> {
        match self {
            Instance::Page(spec) => Some(&spec.title),
            Instance::Domain(spec) => Some(&spec.title),
            Instance::Taxonomy(spec) => Some(spec.title_fragment()),
            Instance::Jpeg(spec) | Instance::Png(spec) | Instance::Gif(spec) => {
                Some(&spec.title)
            }
            Instance::Mpeg(spec) => Some(&spec.title),
            Instance::Template(_) | Instance::Data(_) => None,
        }
    }

    /// Whether this kind produces binary output.
    pub fn is_asset(&self) -> bool {
        matches!(
            self,
            Instance::Jpeg(_) | Instance::Png(_) | Instance::Gif(_) | Instance::Mpeg(_)
        )
    }

    /// Whether this kind is a wrap template (never rendered on its own).
    pub fn is_template(&self) -> bool {
        matches!(self, Instance::Template(_))
    }

    /// Write the binary form of this instance, if it has one.
    pub async fn render_asset(&self, manifest: &Manifest, ctx: &AssetContext) -> Result<()> {
        match self {
            Instance::Jpeg(spec) => asset::render_jpeg(spec, manifest, ctx).await,
            Instance::Png(spec) | Instance::Gif(spec) => {
                asset::render_raw(&spec.widths, manifest, ctx).await
            }
            Instance::Mpeg(spec) => asset::render_raw(&spec.widths, manifest, ctx).await,
            _ => Ok(()),
        }
    }
}
