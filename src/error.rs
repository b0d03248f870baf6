// Scheduler Error Types
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("chat endpoint returned status {status}: {body}")]
    UpstreamStatus { status: u16, body: String },

    #[error("Invalid task: {0}")]
    InvalidTask(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
