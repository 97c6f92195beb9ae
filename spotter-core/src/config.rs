use crate::error::{ConfigError, CoreError};
use std::path::PathBuf;
use tracing::info;

/// Phrase searched for on Reddit.
pub const SEARCH_PHRASE: &str = "how do I";
/// Maximum number of posts fetched per run.
pub const SEARCH_LIMIT: u32 = 100;
/// Search result ordering.
pub const SEARCH_SORT: &str = "new";
/// Classifier calls allowed in flight at once.
pub const DEFAULT_CONCURRENCY: usize = 4;

const DEFAULT_DATA_DIR: &str = "./reddit_data";

/// Runtime configuration, read once at startup and passed by reference into
/// the clients. Credentials stay optional here: each mode demands only the
/// ones it actually uses, via the accessor methods.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub reddit_client_id: Option<String>,
    pub reddit_client_secret: Option<String>,
    pub openai_api_key: Option<String>,
    pub data_dir: PathBuf,
    pub concurrency: usize,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            reddit_client_id: non_empty_var("REDDIT_CLIENT_ID"),
            reddit_client_secret: non_empty_var("REDDIT_CLIENT_SECRET"),
            openai_api_key: non_empty_var("OPENAI_API_KEY"),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    pub fn with_data_dir(mut self, dir: PathBuf) -> Self {
        self.data_dir = dir;
        self
    }

    pub fn reddit_credentials(&self) -> Result<(&str, &str), CoreError> {
        let id = self.reddit_client_id.as_deref().ok_or_else(|| {
            ConfigError::MissingEnvironmentVariable {
                var_name: "REDDIT_CLIENT_ID".to_string(),
            }
        })?;
        let secret = self.reddit_client_secret.as_deref().ok_or_else(|| {
            ConfigError::MissingEnvironmentVariable {
                var_name: "REDDIT_CLIENT_SECRET".to_string(),
            }
        })?;
        Ok((id, secret))
    }

    pub fn openai_api_key(&self) -> Result<&str, CoreError> {
        Ok(self.openai_api_key.as_deref().ok_or_else(|| {
            ConfigError::MissingEnvironmentVariable {
                var_name: "OPENAI_API_KEY".to_string(),
            }
        })?)
    }

    pub fn raw_dir(&self) -> PathBuf {
        self.data_dir.join("raw")
    }

    pub fn analyzed_dir(&self) -> PathBuf {
        self.data_dir.join("analyzed")
    }

    pub fn cache_path(&self) -> PathBuf {
        self.data_dir.join("cache.json")
    }

    pub fn log_redacted(&self) {
        info!(
            "Config: data_dir={}, concurrency={}, reddit_credentials={}, openai_api_key={}",
            self.data_dir.display(),
            self.concurrency,
            redact(self.reddit_client_id.as_deref()),
            redact(self.openai_api_key.as_deref()),
        );
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn redact(value: Option<&str>) -> &'static str {
    if value.is_some() {
        "set"
    } else {
        "unset"
    }
}
