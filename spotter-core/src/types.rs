use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A Reddit submission as returned by the search endpoint.
///
/// Field names follow Reddit's wire format so that raw capture files
/// deserialize directly, without a mapping layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditPost {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub selftext: String,
    pub author: String,
    pub created_utc: f64,
    pub subreddit: String,
    pub permalink: String,
    pub url: String,
    pub score: i64,
    pub over_18: bool,
}

/// The structured judgment produced by one classifier call.
///
/// `post_id` records which post triggered the call. It is traceability
/// metadata only and never participates in cache keying, so syndicated or
/// reposted content shares a single classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub post_id: String,
    pub is_question: bool,
    pub confidence_score: f64,
    /// Reserved for a later categorization pass; always empty for now.
    #[serde(default)]
    pub category: String,
    pub reasoning: String,
}

/// A classification plus storage metadata, as persisted in the cache file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    #[serde(flatten)]
    pub classification: Classification,
    pub cached_at: DateTime<Utc>,
}

/// Outcome of attempting to classify one post. A failed classifier call is
/// recorded here rather than aborting the batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AnalysisOutcome {
    Classified {
        #[serde(flatten)]
        classification: Classification,
    },
    Failed {
        error: String,
    },
    Skipped {
        reason: String,
    },
}

impl AnalysisOutcome {
    pub fn is_classified(&self) -> bool {
        matches!(self, AnalysisOutcome::Classified { .. })
    }
}

/// A post merged with its classification outcome. Written to the analyzed
/// output file and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzedPost {
    #[serde(flatten)]
    pub post: RedditPost,
    pub analysis: AnalysisOutcome,
}

/// Aggregate counters for one pipeline execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub hits: usize,
    pub misses: usize,
    pub failures: usize,
    pub skipped: usize,
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} posts: {} cache hits, {} fresh calls, {} failures, {} skipped",
            self.total, self.hits, self.misses, self.failures, self.skipped
        )
    }
}
