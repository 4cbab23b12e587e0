use thiserror::Error;

/// Errors surfaced while loading, reading, building or searching a shard.
#[derive(Debug, Error)]
pub enum ShardError {
    /// Structural problems: unknown version, section count mismatch, broken
    /// index tables. Always fatal to a load.
    #[error("{what}: {detail}")]
    Format { what: &'static str, detail: String },

    #[error("{section}: malformed JSON: {source}")]
    Json {
        section: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A section whose bytes cannot be decoded as the expected element type.
    #[error("{section}: {detail}")]
    Encoding { section: &'static str, detail: String },

    #[error("read out of bounds: off={off} sz={sz} len={len}")]
    OutOfBounds { off: u32, sz: u32, len: usize },

    #[error("query: {0}")]
    Query(String),

    #[error("build: {0}")]
    Build(String),
}

impl ShardError {
    pub(crate) fn format(what: &'static str, detail: impl Into<String>) -> Self {
        ShardError::Format {
            what,
            detail: detail.into(),
        }
    }

    pub(crate) fn encoding(section: &'static str, detail: impl Into<String>) -> Self {
        ShardError::Encoding {
            section,
            detail: detail.into(),
        }
    }
}

impl From<regex::Error> for ShardError {
    fn from(e: regex::Error) -> Self {
        ShardError::Query(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ShardError>;
