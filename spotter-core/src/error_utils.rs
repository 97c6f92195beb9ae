use crate::error::*;
use tracing::{error, warn};

pub trait ErrorExt {
    fn log_error(&self) -> &Self;
    fn log_warn(&self) -> &Self;
    /// Whether the pipeline can contain this error and keep running.
    /// Classification errors are recorded per-post; cache corruption degrades
    /// to an empty cache. Everything else aborts the run.
    fn is_recoverable(&self) -> bool;
    fn error_code(&self) -> &'static str;
}

impl ErrorExt for CoreError {
    fn log_error(&self) -> &Self {
        error!("CoreError [{}]: {}", self.error_code(), self);
        self
    }

    fn log_warn(&self) -> &Self {
        warn!("CoreError [{}]: {}", self.error_code(), self);
        self
    }

    fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CoreError::Classification(_) | CoreError::Cache(_)
        )
    }

    fn error_code(&self) -> &'static str {
        match self {
            CoreError::RedditApi(_) => "REDDIT_API",
            CoreError::Classification(_) => "CLASSIFICATION",
            CoreError::Cache(_) => "CACHE",
            CoreError::Config(_) => "CONFIG",
            CoreError::Io(_) => "IO",
            CoreError::Serialization(_) => "SERIALIZATION",
            CoreError::Network(_) => "NETWORK",
            CoreError::InvalidInput { .. } => "INVALID_INPUT",
        }
    }
}
