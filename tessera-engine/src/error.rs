/// Failures surfaced while instantiating or rendering the resource graph.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Core(#[from] tessera_core::Error),

    #[error("{kgv}: no registered constructor")]
    UnknownKind { kgv: String },

    /// Template evaluation or I/O failure, tagged with the chain of
    /// resources that led to it.
    #[error("{chain}: {reason}")]
    Render { chain: String, reason: String },

    #[error("render cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    /// Wrap a failure with the resource path chain it occurred under.
    pub fn render(chain: impl AsRef<str>, reason: impl ToString) -> Self {
        EngineError::Render {
            chain: chain.as_ref().to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, EngineError::Cancelled)
    }
}
