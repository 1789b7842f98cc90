use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrackerError {
    /// Generation output was not a well-formed JSON object
    #[error("Parse error: {0}")]
    Parse(String),

    /// Provider call failed or returned unusable output
    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl TrackerError {
    /// Fold any provider-side error into a generation failure.
    pub fn into_generation(self) -> Self {
        match self {
            TrackerError::Generation(_) => self,
            other => TrackerError::Generation(other.to_string()),
        }
    }

    pub fn is_parse_failure(&self) -> bool {
        matches!(self, TrackerError::Parse(_))
    }

    pub fn is_generation_failure(&self) -> bool {
        matches!(self, TrackerError::Generation(_))
    }
}

pub type Result<T> = std::result::Result<T, TrackerError>;
