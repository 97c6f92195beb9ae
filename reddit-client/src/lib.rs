use reqwest::Client;
use serde::{Deserialize, Serialize};
use spotter_core::{CoreError, RedditApiError, RedditPost};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

const REDDIT_TOKEN_URL: &str = "https://www.reddit.com/api/v1/access_token";
const REDDIT_API_BASE: &str = "https://oauth.reddit.com";
const USER_AGENT: &str = "ProblemSpotter:v1.0 (by /u/problemspotter)";

/// Token lifetime safety margin; re-authenticate this long before expiry.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditListing<T> {
    pub kind: String,
    pub data: RedditListingData<T>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditListingData<T> {
    pub children: Vec<RedditListingChild<T>>,
    pub after: Option<String>,
    pub before: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditListingChild<T> {
    pub kind: String,
    pub data: T,
}

/// The subset of Reddit's submission payload the pipeline consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditPostData {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub selftext: String,
    #[serde(default)]
    pub author: String,
    pub subreddit: String,
    pub permalink: String,
    pub url: String,
    pub created_utc: f64,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub over_18: bool,
}

impl From<RedditPostData> for RedditPost {
    fn from(data: RedditPostData) -> Self {
        Self {
            id: data.id,
            title: data.title,
            selftext: data.selftext,
            author: data.author,
            created_utc: data.created_utc,
            subreddit: data.subreddit,
            permalink: data.permalink,
            url: data.url,
            score: data.score,
            over_18: data.over_18,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug)]
struct AccessToken {
    value: String,
    expires_at: Instant,
}

impl AccessToken {
    fn is_valid(&self) -> bool {
        Instant::now() + TOKEN_EXPIRY_MARGIN < self.expires_at
    }
}

/// Read-only Reddit search client using app-only (client credentials) OAuth2.
#[derive(Debug)]
pub struct RedditClient {
    http_client: Client,
    client_id: String,
    client_secret: String,
    user_agent: String,
    token: Mutex<Option<AccessToken>>,
}

impl RedditClient {
    pub fn new(client_id: String, client_secret: String) -> Result<Self, CoreError> {
        let http_client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http_client,
            client_id,
            client_secret,
            user_agent: USER_AGENT.to_string(),
            token: Mutex::new(None),
        })
    }

    async fn access_token(&self) -> Result<String, CoreError> {
        let mut token = self.token.lock().await;
        if let Some(existing) = token.as_ref() {
            if existing.is_valid() {
                return Ok(existing.value.clone());
            }
            debug!("Reddit access token near expiry, re-authenticating");
        }

        info!("Requesting Reddit app-only access token");
        let response = self
            .http_client
            .post(REDDIT_TOKEN_URL)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .header("User-Agent", &self.user_agent)
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| {
                error!("Token request failed: {}", e);
                if e.is_timeout() {
                    CoreError::RedditApi(RedditApiError::RequestTimeout)
                } else {
                    CoreError::Network(e)
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            error!("Token request rejected with status {}", status);
            return Err(CoreError::RedditApi(RedditApiError::AuthenticationFailed {
                reason: format!("token endpoint returned {status}"),
            }));
        }

        let parsed: TokenResponse = response.json().await.map_err(|e| {
            error!("Failed to parse token response: {}", e);
            CoreError::RedditApi(RedditApiError::InvalidResponse {
                details: "Failed to parse access token response".to_string(),
            })
        })?;

        let fresh = AccessToken {
            value: parsed.access_token.clone(),
            expires_at: Instant::now() + Duration::from_secs(parsed.expires_in),
        };
        *token = Some(fresh);
        Ok(parsed.access_token)
    }

    /// Search all of Reddit for posts containing `phrase`, newest first.
    /// NSFW submissions are filtered out before the posts reach the pipeline.
    pub async fn search_posts(
        &self,
        phrase: &str,
        sort: &str,
        limit: u32,
    ) -> Result<Vec<RedditPost>, CoreError> {
        let access_token = self.access_token().await?;
        let url = format!("{REDDIT_API_BASE}/search");
        let limit_str = limit.to_string();
        let params = [
            ("q", phrase),
            ("sort", sort),
            ("limit", limit_str.as_str()),
            ("type", "link"),
            ("raw_json", "1"),
        ];

        info!("Searching Reddit for \"{}\" (limit {})", phrase, limit);
        let response = self
            .http_client
            .get(&url)
            .bearer_auth(&access_token)
            .header("User-Agent", &self.user_agent)
            .query(&params)
            .send()
            .await
            .map_err(|e| {
                error!("Search request failed: {}", e);
                if e.is_timeout() {
                    CoreError::RedditApi(RedditApiError::RequestTimeout)
                } else {
                    CoreError::Network(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            error!("Search request failed with status {}", status);
            return Err(match status.as_u16() {
                429 => {
                    let retry_after = response
                        .headers()
                        .get("retry-after")
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.parse::<u64>().ok())
                        .unwrap_or(60);
                    warn!("Rate limited, retry after {} seconds", retry_after);
                    CoreError::RedditApi(RedditApiError::RateLimitExceeded { retry_after })
                }
                401 => CoreError::RedditApi(RedditApiError::AuthenticationFailed {
                    reason: "access token rejected".to_string(),
                }),
                403 => CoreError::RedditApi(RedditApiError::Forbidden {
                    resource: "/search".to_string(),
                }),
                code if status.is_server_error() => {
                    CoreError::RedditApi(RedditApiError::ServerError { status_code: code })
                }
                code => CoreError::RedditApi(RedditApiError::InvalidResponse {
                    details: format!("unexpected status {code}"),
                }),
            });
        }

        let listing: RedditListing<RedditPostData> = response.json().await.map_err(|e| {
            error!("Failed to parse search results: {}", e);
            CoreError::RedditApi(RedditApiError::InvalidResponse {
                details: "Failed to parse search results".to_string(),
            })
        })?;

        let total = listing.data.children.len();
        let posts: Vec<RedditPost> = listing
            .data
            .children
            .into_iter()
            .map(|child| child.data)
            .filter(|post| !post.over_18)
            .map(RedditPost::from)
            .collect();

        info!(
            "Retrieved {} posts ({} filtered as NSFW)",
            posts.len(),
            total - posts.len()
        );
        Ok(posts)
    }
}
