//! # tessera-engine
//!
//! The render engine of the tessera static-site generator. A collated
//! manifest index goes in; a tree of rendered artifacts comes out:
//!
//! 1. The [`factory`] turns manifests into typed instances with
//!    capability flags (asset, content, linkable, titled).
//! 2. [`resource`] instantiates the graph rooted at a selected manifest,
//!    memoized by structural identity.
//! 3. [`template`] assembles textual output through nested wrap templates
//!    around a `yield` slot.
//! 4. [`scheduler`] walks the graph with bounded parallelism and
//!    cooperative cancellation, short-circuiting unchanged artifacts via
//!    the content-addressed [`artifact`] cache.

pub mod artifact;
pub mod error;
pub mod factory;
pub mod kinds;
pub mod resource;
pub mod scheduler;
pub mod template;

pub use artifact::ArtifactCache;
pub use error::{EngineError, Result};
pub use factory::{default_factory, Factory};
pub use kinds::Instance;
pub use resource::{RenderOptions, Resource};
pub use scheduler::DEFAULT_CONCURRENCY;
