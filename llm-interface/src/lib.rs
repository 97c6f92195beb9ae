use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use spotter_core::{Classification, ClassificationError, CoreError};
use std::time::Duration;
use tracing::{debug, error};

const OPENAI_API_BASE: &str = "https://api.openai.com/v1";
const OPENAI_MODEL: &str = "gpt-4o";
/// Zero temperature keeps responses deterministic for identical content.
const TEMPERATURE: f64 = 0.0;

const SYSTEM_PROMPT: &str = "\
You are analyzing Reddit posts to identify genuine user challenges or problems.
Your task is to determine if a post is asking a real \"how-to\" question or
seeking help with a specific problem.

A genuine question or problem:
1. Contains a specific request for information or help
2. Is phrased as a genuine question (not rhetorical)
3. Describes a challenge the user is facing
4. Seeks actionable advice or instructions

Respond with a JSON object with the following fields:
- is_question: boolean (true if it's a genuine question/problem, false otherwise)
- confidence_score: float between 0 and 1
- category: string (leave empty for now)
- reasoning: brief explanation for your decision";

/// Single-method seam over the external model call, so the pipeline can run
/// against a test double without network access.
#[async_trait]
pub trait PostClassifier: Send + Sync {
    async fn classify(
        &self,
        post_id: &str,
        title: &str,
        body: &str,
    ) -> Result<Classification, CoreError>;
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f64,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

/// The shape the model is instructed to return. Deserialization failing on a
/// missing required field is the response-format enforcement.
#[derive(Debug, Deserialize)]
struct RawJudgment {
    is_question: bool,
    confidence_score: f64,
    #[serde(default)]
    category: String,
    reasoning: String,
}

pub struct OpenAiClassifier {
    api_key: String,
    http_client: Client,
    model: String,
}

impl OpenAiClassifier {
    pub fn new(api_key: &str) -> Result<Self, CoreError> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;

        Ok(Self {
            api_key: api_key.to_string(),
            http_client,
            model: OPENAI_MODEL.to_string(),
        })
    }

    fn build_request(&self, title: &str, body: &str) -> ChatRequest {
        let user_prompt = format!(
            "Please analyze this Reddit post to determine if it contains a genuine \
             question or problem:\n\nTitle: {title}\nContent: {body}"
        );

        ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt,
                },
            ],
            temperature: TEMPERATURE,
            response_format: ResponseFormat {
                format_type: "json_object",
            },
        }
    }
}

#[async_trait]
impl PostClassifier for OpenAiClassifier {
    async fn classify(
        &self,
        post_id: &str,
        title: &str,
        body: &str,
    ) -> Result<Classification, CoreError> {
        let url = format!("{OPENAI_API_BASE}/chat/completions");
        let request = self.build_request(title, body);

        debug!("Classifying post {} with {}", post_id, self.model);
        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!("Classifier request failed for {}: {}", post_id, e);
                if e.is_timeout() {
                    CoreError::Classification(ClassificationError::RequestTimeout)
                } else {
                    CoreError::Classification(ClassificationError::RequestFailed {
                        message: e.to_string(),
                    })
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            error!("Classifier returned status {} for {}", status, post_id);
            return Err(match status.as_u16() {
                401 => CoreError::Classification(ClassificationError::AuthenticationFailed),
                429 => {
                    let retry_after = response
                        .headers()
                        .get("retry-after")
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.parse::<u64>().ok())
                        .unwrap_or(60);
                    CoreError::Classification(ClassificationError::RateLimitExceeded {
                        retry_after,
                    })
                }
                code => CoreError::Classification(ClassificationError::ServiceUnavailable {
                    status_code: code,
                }),
            });
        }

        let chat: ChatResponse = response.json().await.map_err(|e| {
            error!("Failed to parse classifier response envelope: {}", e);
            CoreError::Classification(ClassificationError::InvalidResponseFormat {
                details: "unparseable response envelope".to_string(),
            })
        })?;

        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| {
                CoreError::Classification(ClassificationError::InvalidResponseFormat {
                    details: "response contained no choices".to_string(),
                })
            })?;

        let judgment: RawJudgment = serde_json::from_str(&content).map_err(|e| {
            error!("Classifier returned malformed judgment: {}", e);
            CoreError::Classification(ClassificationError::InvalidResponseFormat {
                details: format!("malformed judgment object: {e}"),
            })
        })?;

        Ok(Classification {
            post_id: post_id.to_string(),
            is_question: judgment.is_question,
            confidence_score: clamp_confidence(judgment.confidence_score),
            category: judgment.category,
            reasoning: judgment.reasoning,
        })
    }
}

/// Models occasionally return confidence just outside [0, 1]; clamp rather
/// than reject so a usable judgment is not discarded over rounding.
fn clamp_confidence(value: f64) -> f64 {
    value.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_clamping() {
        assert_eq!(clamp_confidence(0.5), 0.5);
        assert_eq!(clamp_confidence(1.2), 1.0);
        assert_eq!(clamp_confidence(-0.1), 0.0);
        assert_eq!(clamp_confidence(0.0), 0.0);
        assert_eq!(clamp_confidence(1.0), 1.0);
    }

    #[test]
    fn test_request_demands_json_object() {
        let classifier = OpenAiClassifier::new("test-key").unwrap();
        let request = classifier.build_request("How do I fix my bike?", "");

        assert_eq!(request.model, OPENAI_MODEL);
        assert_eq!(request.temperature, 0.0);
        assert_eq!(request.response_format.format_type, "json_object");
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[0].role, "system");
        assert!(request.messages[1]
            .content
            .contains("Title: How do I fix my bike?"));
    }

    #[test]
    fn test_judgment_parsing_requires_fields() {
        let complete = r#"{
            "is_question": true,
            "confidence_score": 0.9,
            "category": "",
            "reasoning": "Asks for repair help"
        }"#;
        let judgment: RawJudgment = serde_json::from_str(complete).unwrap();
        assert!(judgment.is_question);

        // category is optional, everything else is not
        let no_category = r#"{
            "is_question": false,
            "confidence_score": 0.4,
            "reasoning": "Rhetorical"
        }"#;
        let judgment: RawJudgment = serde_json::from_str(no_category).unwrap();
        assert_eq!(judgment.category, "");

        let missing_reasoning = r#"{"is_question": true, "confidence_score": 0.9}"#;
        assert!(serde_json::from_str::<RawJudgment>(missing_reasoning).is_err());
    }
}
