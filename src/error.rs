use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Unknown source: {0}")]
    UnknownSource(String),

    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("Generation unavailable after retries: {0}")]
    GenerationUnavailable(String),

    #[error("Generation rejected: {0}")]
    GenerationRejected(String),

    #[error("Write error: {0}")]
    Write(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
