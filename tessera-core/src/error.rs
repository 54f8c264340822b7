use std::fmt;

/// Failure kinds shared by every stage that touches manifests, from parsing
/// a selector string through collating the index.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unsupported selector: {0}")]
    BadSelector(String),

    #[error("{source_path}: {reason}")]
    BadManifest { source_path: String, reason: String },

    #[error("{}", render_collisions(.collisions))]
    DuplicateManifest { collisions: Vec<Collision> },

    #[error("{id} not found\n{index_digest}")]
    NotFound { id: String, index_digest: String },

    #[error("{id} must be \"live\" to be used ({source_path})")]
    NotLive { id: String, source_path: String },

    #[error("{0}")]
    BadImport(String),

    #[error("{0}")]
    BadRelation(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// One identifier claimed by more than one live manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collision {
    pub id: String,
    pub sources: Vec<String>,
}

impl fmt::Display for Collision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} declared by {}", self.id, self.sources.join(", "))
    }
}

fn render_collisions(collisions: &[Collision]) -> String {
    let lines: Vec<String> = collisions.iter().map(|c| c.to_string()).collect();
    format!("duplicate manifests:\n{}", lines.join("\n"))
}
