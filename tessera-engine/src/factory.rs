//! The registry mapping kind/group/version to typed-instance constructors.

use crate::error::{EngineError, Result};
use crate::kinds::{
    AudioSpec, DataSpec, DomainSpec, ImageSpec, Instance, PageSpec, TaxonomySpec,
    TemplateSpec, KGV_DATA, KGV_DOMAIN, KGV_GIF, KGV_JPEG, KGV_MPEG, KGV_PAGE, KGV_PNG,
    KGV_TAXONOMY, KGV_TEMPLATE,
};
use std::fmt;
use tessera_core::Manifest;

type Constructor = Box<dyn Fn(&Manifest) -> Result<Instance> + Send + Sync>;

struct Handler {
    kgv: String,
    new: Constructor,
}

/// A registry of `{KGV → constructor}`. Constructors parse the manifest's
/// spec into the kind-specific form and run its validation.
pub struct Factory {
    handlers: Vec<Handler>,
}

impl Factory {
    pub fn new() -> Self {
        Factory {
            handlers: Vec::new(),
        }
    }

    pub fn register<F>(&mut self, kgv: impl Into<String>, new: F)
    where
        F: Fn(&Manifest) -> Result<Instance> + Send + Sync + 'static,
    {
        self.handlers.push(Handler {
            kgv: kgv.into(),
            new: Box::new(new),
        });
    }

    /// Build the typed instance for a manifest. The most recently
    /// registered handler for a KGV wins.
    pub fn instantiate(&self, manifest: &Manifest) -> Result<Instance> {
        let kgv = manifest.kgv();
        let handler = self
            .handlers
            .iter()
            .rev()
            .find(|handler| handler.kgv == kgv)
            .ok_or(EngineError::UnknownKind { kgv })?;
        (handler.new)(manifest)
    }
}

impl Default for Factory {
    fn default() -> Self {
        Factory::new()
    }
}

impl fmt::Display for Factory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for handler in &self.handlers {
            writeln!(f, "{}", handler.kgv)?;
        }
        Ok(())
    }
}

/// The factory covering every built-in kind.
pub fn default_factory() -> Factory {
    let mut factory = Factory::new();
    factory.register(KGV_JPEG, |m| Ok(Instance::Jpeg(ImageSpec::new(m)?)));
    factory.register(KGV_PNG, |m| Ok(Instance::Png(ImageSpec::new(m)?)));
    factory.register(KGV_GIF, |m| Ok(Instance::Gif(ImageSpec::new(m)?)));
    factory.register(KGV_MPEG, |m| Ok(Instance::Mpeg(AudioSpec::new(m)?)));
    factory.register(KGV_PAGE, |m| Ok(Instance::Page(PageSpec::new(m)?)));
    factory.register(KGV_DOMAIN, |m| Ok(Instance::Domain(DomainSpec::new(m)?)));
    factory.register(KGV_TAXONOMY, |m| {
        Ok(Instance::Taxonomy(TaxonomySpec::new(m)?))
    });
    factory.register(KGV_TEMPLATE, |m| {
        Ok(Instance::Template(TemplateSpec::new(m)?))
    });
    factory.register(KGV_DATA, |m| Ok(Instance::Data(DataSpec::new(m)?)));
    factory
}
