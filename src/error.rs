use std::fmt;
use thiserror::Error;

/// Pipeline stage names used when a fatal error is reported to the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Resolve,
    Download,
    Normalize,
    Enrich,
    Aggregate,
    Load,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Resolve => "resolve",
            Stage::Download => "download",
            Stage::Normalize => "normalize",
            Stage::Enrich => "enrich",
            Stage::Aggregate => "aggregate",
            Stage::Load => "load",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("source unavailable at {url}: {reason}")]
    UnavailableSource { url: String, reason: String },

    #[error("no dated period directory found in listing at {url}")]
    NoPeriodFound { url: String },

    #[error("no expense archives could be obtained from {url}")]
    NoArchives { url: String },

    #[error("registry unavailable: {0}")]
    RegistryUnavailable(String),

    #[error("failed to load table {table}: {source}")]
    Load {
        table: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("run lock {path} is held by run {holder}; remove it if that run is no longer active")]
    CacheLocked { path: String, holder: String },

    #[error("HTTP transport error for {url}: {message}")]
    Transport { url: String, message: String },

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("spreadsheet error: {0}")]
    Spreadsheet(String),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("{stage} stage failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<PipelineError>,
    },
}

impl PipelineError {
    /// Wraps a fatal error with the name of the stage it aborted.
    pub fn in_stage(self, stage: Stage) -> Self {
        match self {
            already @ PipelineError::Stage { .. } => already,
            other => PipelineError::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
