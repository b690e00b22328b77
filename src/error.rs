use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transport error on {mirror}: {message}")]
    Transport { mirror: String, message: String },

    #[error("Malformed dataset: {0}")]
    Format(String),

    #[error("Decode failure: {0}")]
    Decode(String),

    #[error("No mirror could serve platform {identifier} after {attempts} attempt(s)")]
    SourceUnreachable { identifier: String, attempts: usize },

    #[error("Platform {identifier} is missing required field {field}")]
    MissingRequiredField { identifier: String, field: String },

    #[error("Cycle at profile index {index} could not be processed: {message}")]
    CycleProcessing { index: usize, message: String },

    #[error("Persistence failed: {message}")]
    Persistence { message: String },

    #[error("Validation failed: {}", errors.join("; "))]
    ValidationFailed { errors: Vec<String> },
}

impl IngestError {
    pub fn transport(mirror: impl Into<String>, message: impl Into<String>) -> Self {
        IngestError::Transport {
            mirror: mirror.into(),
            message: message.into(),
        }
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        IngestError::Persistence {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;
