use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::prompt::analysis_prompt;
use super::{ArticleAnalysis, ClassifyError, Classifier};
use crate::http::read_limited_bytes;

const CLASSIFY_TIMEOUT: Duration = Duration::from_secs(60);

const MAX_RESPONSE_SIZE: usize = 1024 * 1024; // 1MB

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Removes a surrounding Markdown code fence, if any.
fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Classifier backed by any OpenAI-compatible `/chat/completions` endpoint.
pub struct ChatCompletionsClassifier {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<SecretString>,
    model: String,
}

impl ChatCompletionsClassifier {
    pub fn new(
        client: reqwest::Client,
        endpoint: String,
        api_key: Option<SecretString>,
        model: String,
    ) -> Self {
        Self {
            client,
            endpoint,
            api_key,
            model,
        }
    }
}

#[async_trait]
impl Classifier for ChatCompletionsClassifier {
    async fn classify(&self, title: &str, body: &str) -> Result<ArticleAnalysis, ClassifyError> {
        let prompt = analysis_prompt(title, body);
        let request = ChatRequest {
            model: &self.model,
            messages: vec![Message {
                role: "user",
                content: &prompt,
            }],
            temperature: 0.0,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let mut builder = self.client.post(&self.endpoint).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key.expose_secret());
        }

        let bytes = tokio::time::timeout(CLASSIFY_TIMEOUT, async {
            let response = builder.send().await?;
            if !response.status().is_success() {
                return Err(ClassifyError::HttpStatus(response.status().as_u16()));
            }
            read_limited_bytes(response, MAX_RESPONSE_SIZE)
                .await
                .map_err(|e| ClassifyError::MalformedResponse(e.to_string()))
        })
        .await
        .map_err(|_| ClassifyError::Timeout)??;

        let response: ChatResponse = serde_json::from_slice(&bytes)
            .map_err(|e| ClassifyError::MalformedResponse(e.to_string()))?;
        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ClassifyError::MalformedResponse("no message content".to_string()))?;

        let analysis: ArticleAnalysis = serde_json::from_str(strip_code_fence(&content))
            .map_err(|e| ClassifyError::Validation(e.to_string()))?;
        analysis.validate()?;

        tracing::debug!(
            model = %self.model,
            language = %analysis.language,
            relevance = analysis.relevance.as_str(),
            "Classified article"
        );
        Ok(analysis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{Completeness, Relevance};
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn classifier(server: &MockServer) -> ChatCompletionsClassifier {
        ChatCompletionsClassifier::new(
            reqwest::Client::new(),
            format!("{}/v1/chat/completions", server.uri()),
            Some(SecretString::from("llm-key")),
            "test-model".into(),
        )
    }

    fn completion(content: &str) -> serde_json::Value {
        json!({ "choices": [{ "message": { "role": "assistant", "content": content } }] })
    }

    #[test]
    fn test_strip_code_fence() {
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("```\n{}\n```"), "{}");
        assert_eq!(strip_code_fence("  {} "), "{}");
    }

    #[tokio::test]
    async fn test_classify_parses_analysis() {
        let server = MockServer::start().await;
        let content = json!({
            "language": "en",
            "location": "USA",
            "completeness": "COMPLETE",
            "relevance": "RELEVANT",
            "summary": {
                "headline": "Port strike ends",
                "entities": ["ILA"],
                "event": "Workers ratified a contract.",
                "context": "Largest stoppage in decades."
            }
        })
        .to_string();
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer llm-key"))
            .and(body_partial_json(json!({
                "model": "test-model",
                "temperature": 0.0,
                "response_format": { "type": "json_object" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion(&content)))
            .expect(1)
            .mount(&server)
            .await;

        let analysis = classifier(&server)
            .classify("Port strike ends", "Workers voted.")
            .await
            .unwrap();

        assert_eq!(analysis.completeness, Completeness::Complete);
        assert_eq!(analysis.relevance, Relevance::Relevant);
        assert_eq!(analysis.summary.unwrap().entities, vec!["ILA".to_string()]);
    }

    #[tokio::test]
    async fn test_fenced_content_is_accepted() {
        let server = MockServer::start().await;
        let content = "```json\n{\"language\":\"de\",\"location\":\"DEU\",\"completeness\":\"PARTIAL_USELESS\",\"relevance\":\"NOT_RELEVANT\"}\n```";
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion(content)))
            .mount(&server)
            .await;

        let analysis = classifier(&server).classify("T", "B").await.unwrap();
        assert_eq!(analysis.language, "de");
        assert_eq!(analysis.summary, None);
    }

    #[tokio::test]
    async fn test_invalid_language_fails_validation() {
        let server = MockServer::start().await;
        let content = r#"{"language":"english","location":"USA","completeness":"COMPLETE","relevance":"RELEVANT"}"#;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion(content)))
            .mount(&server)
            .await;

        let err = classifier(&server).classify("T", "B").await.unwrap_err();
        assert!(matches!(err, ClassifyError::Validation(_)));
    }

    #[tokio::test]
    async fn test_http_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let err = classifier(&server).classify("T", "B").await.unwrap_err();
        assert!(matches!(err, ClassifyError::HttpStatus(429)));
    }

    #[tokio::test]
    async fn test_empty_choices_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
            .mount(&server)
            .await;

        let err = classifier(&server).classify("T", "B").await.unwrap_err();
        assert!(matches!(err, ClassifyError::MalformedResponse(_)));
    }
}
