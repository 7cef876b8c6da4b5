use thiserror::Error;

/// Failures a node raises on purpose, as opposed to plumbing errors that
/// travel as plain `anyhow` context.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("{0} is required")]
    MissingInput(&'static str),

    #[error("{entity} \"{query}\" not found")]
    NotFound { entity: &'static str, query: String },

    #[error("Multiple {entity} found for \"{query}\": {}. Please be more specific.", .candidates.join(", "))]
    Ambiguous {
        entity: &'static str,
        query: String,
        candidates: Vec<String>,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{0}")]
    Session(String),
}
