use crate::error::{PipelineError, Result};
use crate::prompt::GenerationRequest;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai/v1";

/// Sentinel credential that short-circuits to a canned reply, for offline
/// runs and tests.
pub const DUMMY_API_KEY: &str = "dummy-api-key";

/// Explicit client configuration, injected at construction instead of read
/// ad hoc inside generation logic.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub retry_attempts: u32,
    pub retry_base_delay: Duration,
    pub timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            model: "llama-3.3-70b-versatile".to_string(),
            temperature: 0.1,
            max_tokens: 2000,
            retry_attempts: 3,
            retry_base_delay: Duration::from_secs(2),
            timeout: Duration::from_secs(60),
        }
    }
}

/// Provider-reported token counters for one completion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Raw model output plus the usage counters that came with it.
#[derive(Debug, Clone)]
pub struct Completion {
    pub content: String,
    pub usage: Option<TokenUsage>,
}

/// Client for the chat-completions endpoint.
///
/// The API key is held opaquely and never logged. One network call per
/// attempt, each bounded by `config.timeout`; no caching across calls.
pub struct GenerationClient {
    api_key: String,
    base_url: String,
    config: ClientConfig,
    http: reqwest::Client,
}

impl GenerationClient {
    pub fn new(api_key: String, config: ClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| PipelineError::GenerationRejected(format!("HTTP client setup failed: {}", e)))?;
        Ok(Self {
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            config,
            http,
        })
    }

    /// Point the client at a different endpoint, e.g. a local stand-in
    /// server.
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    /// Minimal round-trip confirming the credential works, before any
    /// batch processing starts. The dummy credential always verifies.
    pub async fn verify(&self) -> Result<()> {
        if self.api_key == DUMMY_API_KEY {
            return Ok(());
        }
        let request = GenerationRequest {
            system_prompt: "You are a helpful assistant.".to_string(),
            user_prompt: "Hello".to_string(),
        };
        self.call_once(&request).await.map(|_| ())
    }

    /// One generation round-trip with bounded retries.
    ///
    /// Transient failures (429, 5xx, connect/timeout) back off exponentially
    /// up to `retry_attempts`; exhaustion surfaces the last cause as
    /// `GenerationUnavailable`. Auth and invalid-request failures are not
    /// retried and surface as `GenerationRejected`.
    pub async fn generate(&self, request: &GenerationRequest) -> Result<Completion> {
        if self.api_key == DUMMY_API_KEY {
            return Ok(Completion {
                content: dummy_reply(),
                usage: None,
            });
        }

        let mut last_error = String::new();
        for attempt in 1..=self.config.retry_attempts {
            match self.call_once(request).await {
                Ok(completion) => return Ok(completion),
                Err(PipelineError::GenerationRejected(msg)) => {
                    return Err(PipelineError::GenerationRejected(msg));
                }
                Err(e) => {
                    last_error = e.to_string();
                    if attempt < self.config.retry_attempts {
                        let delay = self.config.retry_base_delay * 2u32.pow(attempt - 1);
                        warn!(
                            "Generation attempt {}/{} failed ({}), retrying in {:?}",
                            attempt, self.config.retry_attempts, last_error, delay
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        Err(PipelineError::GenerationUnavailable(last_error))
    }

    async fn call_once(&self, request: &GenerationRequest) -> Result<Completion> {
        let body = serde_json::json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": request.system_prompt},
                {"role": "user", "content": request.user_prompt}
            ],
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens
        });

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                // Connect errors and timeouts are transient
                PipelineError::GenerationUnavailable(format!("Request failed: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body_text));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| PipelineError::GenerationUnavailable(format!("Failed to parse response body: {}", e)))?;

        let content = response_json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| {
                PipelineError::GenerationUnavailable("No content in model response".to_string())
            })?
            .trim()
            .to_string();

        let usage = serde_json::from_value::<TokenUsage>(response_json["usage"].clone()).ok();
        if let Some(u) = &usage {
            info!(
                "Completion received: {} prompt + {} completion tokens",
                u.prompt_tokens, u.completion_tokens
            );
        }

        Ok(Completion { content, usage })
    }
}

/// Map an HTTP error status onto the retryable/non-retryable taxonomy.
fn classify_status(status: reqwest::StatusCode, body: &str) -> PipelineError {
    if is_retryable(status) {
        PipelineError::GenerationUnavailable(format!("HTTP {}: {}", status, body))
    } else {
        PipelineError::GenerationRejected(format!("HTTP {}: {}", status, body))
    }
}

/// 429 and 5xx are transient; everything else (auth, invalid request) is
/// final.
fn is_retryable(status: reqwest::StatusCode) -> bool {
    status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn dummy_reply() -> String {
    r#"{
  "target_source": "sales_dw",
  "sql": "SELECT DISTINCT region FROM sales;",
  "assumptions": "Dummy mode reply, no model was called.",
  "confidence": 0.9
}"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    /// Tiny fixed-script HTTP server: answers each connection with the next
    /// canned response, reading the full request first.
    async fn serve_responses(listener: TcpListener, responses: Vec<String>) {
        for response in responses {
            let (mut socket, _) = listener.accept().await.unwrap();
            read_full_request(&mut socket).await;
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
        }
    }

    async fn read_full_request(socket: &mut TcpStream) {
        let mut buf = Vec::new();
        let mut tmp = [0u8; 4096];
        loop {
            let n = socket.read(&mut tmp).await.unwrap();
            if n == 0 {
                return;
            }
            buf.extend_from_slice(&tmp[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                let headers = String::from_utf8_lossy(&buf[..pos]);
                let content_length = headers
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        if name.eq_ignore_ascii_case("content-length") {
                            value.trim().parse::<usize>().ok()
                        } else {
                            None
                        }
                    })
                    .unwrap_or(0);
                if buf.len() >= pos + 4 + content_length {
                    return;
                }
            }
        }
    }

    fn rate_limited_response() -> String {
        "HTTP/1.1 429 Too Many Requests\r\ncontent-length: 12\r\nconnection: close\r\n\r\nrate limited".to_string()
    }

    fn error_response(status_line: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
            status_line,
            body.len(),
            body
        )
    }

    fn success_response(content: &str) -> String {
        let body = serde_json::json!({
            "choices": [{"message": {"content": content}}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        })
        .to_string();
        format!(
            "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
            body.len(),
            body
        )
    }

    fn fast_retry_config() -> ClientConfig {
        ClientConfig {
            retry_base_delay: Duration::from_millis(10),
            timeout: Duration::from_secs(5),
            ..ClientConfig::default()
        }
    }

    fn test_request() -> GenerationRequest {
        GenerationRequest {
            system_prompt: "system".to_string(),
            user_prompt: "user".to_string(),
        }
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(is_retryable(reqwest::StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable(reqwest::StatusCode::INTERNAL_SERVER_ERROR));
        assert!(is_retryable(reqwest::StatusCode::SERVICE_UNAVAILABLE));
        assert!(!is_retryable(reqwest::StatusCode::UNAUTHORIZED));
        assert!(!is_retryable(reqwest::StatusCode::FORBIDDEN));
        assert!(!is_retryable(reqwest::StatusCode::BAD_REQUEST));
    }

    #[test]
    fn test_classify_status_splits_taxonomy() {
        let unavailable = classify_status(reqwest::StatusCode::TOO_MANY_REQUESTS, "rate limited");
        assert!(matches!(unavailable, PipelineError::GenerationUnavailable(_)));

        let rejected = classify_status(reqwest::StatusCode::UNAUTHORIZED, "bad key");
        assert!(matches!(rejected, PipelineError::GenerationRejected(_)));
    }

    #[tokio::test]
    async fn test_dummy_key_short_circuits_without_network() {
        let client = GenerationClient::new(DUMMY_API_KEY.to_string(), ClientConfig::default()).unwrap();
        let completion = client.generate(&test_request()).await.unwrap();
        assert!(completion.content.contains("sales_dw"));
        assert!(completion.usage.is_none());
    }

    #[tokio::test]
    async fn test_rate_limited_twice_succeeds_on_third_attempt() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let server = tokio::spawn(serve_responses(
            listener,
            vec![
                rate_limited_response(),
                rate_limited_response(),
                success_response("{\"target_source\": \"sales_dw\", \"sql\": \"SELECT 1;\", \"assumptions\": \"ok\", \"confidence\": 0.9}"),
            ],
        ));

        let client = GenerationClient::new("test-key".to_string(), fast_retry_config())
            .unwrap()
            .with_base_url(base_url);
        let completion = client.generate(&test_request()).await.unwrap();

        assert!(completion.content.contains("SELECT 1;"));
        assert_eq!(completion.usage.unwrap().total_tokens, 15);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_retries_exhausted_surfaces_unavailable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let server = tokio::spawn(serve_responses(
            listener,
            vec![
                rate_limited_response(),
                rate_limited_response(),
                rate_limited_response(),
            ],
        ));

        let client = GenerationClient::new("test-key".to_string(), fast_retry_config())
            .unwrap()
            .with_base_url(base_url);
        let err = client.generate(&test_request()).await.unwrap_err();

        assert!(matches!(err, PipelineError::GenerationUnavailable(msg) if msg.contains("429")));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_auth_failure_fails_immediately_without_retry() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        // Only one response is scripted: a retry would hit a closed listener
        // and surface as unavailable instead of rejected
        let server = tokio::spawn(serve_responses(
            listener,
            vec![error_response("401 Unauthorized", "invalid api key")],
        ));

        let client = GenerationClient::new("bad-key".to_string(), fast_retry_config())
            .unwrap()
            .with_base_url(base_url);
        let err = client.generate(&test_request()).await.unwrap_err();

        assert!(matches!(err, PipelineError::GenerationRejected(msg) if msg.contains("401")));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_verify_accepts_dummy_key_and_rejects_bad_key() {
        let client = GenerationClient::new(DUMMY_API_KEY.to_string(), ClientConfig::default()).unwrap();
        assert!(client.verify().await.is_ok());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let server = tokio::spawn(serve_responses(
            listener,
            vec![error_response("401 Unauthorized", "invalid api key")],
        ));

        let client = GenerationClient::new("bad-key".to_string(), fast_retry_config())
            .unwrap()
            .with_base_url(base_url);
        let err = client.verify().await.unwrap_err();
        assert!(matches!(err, PipelineError::GenerationRejected(_)));
        server.await.unwrap();
    }
}
