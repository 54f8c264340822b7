//! # tessera-core
//!
//! The manifest layer of the tessera static-site generator: self-describing
//! input records identified by composite keys, a sharded index over them,
//! and the relation algebra that turns wildcard selectors into concrete
//! manifest sets.
//!
//! Everything here is offline and single-run: manifests are ingested,
//! generators expand, the index collates once, and from then on the store is
//! read-only for the render engine built on top of it.

pub mod error;
pub mod generate;
pub mod index;
pub mod manifest;
pub mod meta;
pub mod relation;
pub mod selector;

pub use error::{Collision, Error, Result};
pub use generate::{expand_generated, Generator};
pub use index::Index;
pub use manifest::Manifest;
pub use meta::{Meta, PublishAt, RenderTarget};
pub use relation::{MatchExpr, Operator, Relation, SortOrder};
pub use selector::Selector;
