use async_trait::async_trait;
use config::AiConfig;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

const SYSTEM_PROMPT: &str = "Eres un asistente que reescribe notas en español de forma clara, concisa y académica.\n\
Respeta el significado original. Mantén el idioma español. Corrige gramática y mejora la cohesión.";
const REWRITE_INSTRUCTION: &str =
    "Reescribe el contenido anterior mejorándolo. Devuelve solo el texto reescrito, sin explicaciones.";

#[derive(Debug, Error)]
pub enum ImproveError {
    #[error("missing API key; set `ai.api_key` in the config file")]
    MissingApiKey,
    #[error("authentication with the text service failed ({status}); check the API key: {detail}")]
    Authentication { status: u16, detail: String },
    #[error("usage quota or rate limit exceeded (429): {detail}")]
    RateLimited { detail: String },
    #[error("text service temporarily unavailable ({status}); try again later: {detail}")]
    ServerUnavailable { status: u16, detail: String },
    #[error("text service error ({status}): {detail}")]
    Api { status: u16, detail: String },
    #[error("text service returned no content")]
    EmptyResponse,
    #[error("request to text service failed: {0}")]
    Transport(#[from] reqwest::Error),
}

#[async_trait]
pub trait TextImprover: Send + Sync {
    /// Returns a rewritten version of `content`.
    async fn improve(&self, content: &str, category: Option<&str>) -> Result<String, ImproveError>;
}

#[derive(Debug, Clone)]
pub struct OpenAiTextImprover {
    http: Client,
    settings: AiConfig,
}

impl OpenAiTextImprover {
    pub fn new(settings: AiConfig) -> Self {
        Self {
            http: Client::new(),
            settings,
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.settings.base_url.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl TextImprover for OpenAiTextImprover {
    async fn improve(&self, content: &str, category: Option<&str>) -> Result<String, ImproveError> {
        let api_key = self
            .settings
            .api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or(ImproveError::MissingApiKey)?;

        let payload = ChatRequest {
            model: self.settings.model.clone(),
            messages: build_messages(content, category),
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
        };

        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), model = %self.settings.model, "text improvement request failed");
            return Err(classify_failure(status, &body));
        }

        let output: ChatResponse = response.json().await?;
        let improved = extract_content(output)?;
        debug!(model = %self.settings.model, chars = improved.chars().count(), "text improved");
        Ok(improved)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    content: Option<String>,
}

pub fn build_messages(content: &str, category: Option<&str>) -> Vec<ChatMessage> {
    let mut parts = Vec::new();
    if let Some(category) = category.filter(|c| !c.trim().is_empty()) {
        parts.push(format!("Categoría: {category}"));
    }
    parts.push(format!("Contenido original:\n{content}"));
    parts.push(REWRITE_INSTRUCTION.to_string());

    vec![
        ChatMessage {
            role: "system",
            content: SYSTEM_PROMPT.to_string(),
        },
        ChatMessage {
            role: "user",
            content: parts.join("\n\n"),
        },
    ]
}

/// Maps a non-success response to an error, preferring the provider's
/// `error.message` as detail.
pub fn classify_failure(status: StatusCode, body: &str) -> ImproveError {
    let detail = failure_detail(status, body);
    let code = status.as_u16();
    match code {
        401 | 403 => ImproveError::Authentication {
            status: code,
            detail,
        },
        429 => ImproveError::RateLimited { detail },
        500..=599 => ImproveError::ServerUnavailable {
            status: code,
            detail,
        },
        _ => ImproveError::Api {
            status: code,
            detail,
        },
    }
}

fn failure_detail(status: StatusCode, body: &str) -> String {
    let detail = match serde_json::from_str::<Value>(body) {
        Ok(json) => json
            .pointer("/error/message")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .unwrap_or_else(|| json.to_string()),
        Err(_) => body.trim().to_string(),
    };
    if detail.is_empty() {
        status.canonical_reason().unwrap_or_default().to_string()
    } else {
        detail
    }
}

fn extract_content(output: ChatResponse) -> Result<String, ImproveError> {
    output
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .map(|content| content.trim().to_string())
        .filter(|content| !content.is_empty())
        .ok_or(ImproveError::EmptyResponse)
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    use super::*;

    /// Serves exactly one HTTP response and hands back the raw request.
    async fn serve_once(status_line: &'static str, body: String) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.expect("bind");
        let addr = listener.local_addr().expect("local addr");

        let join = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.expect("accept");
            let mut request = Vec::new();
            let mut buffer = [0_u8; 4096];
            loop {
                let read = stream.read(&mut buffer).await.expect("read request");
                if read == 0 {
                    break;
                }
                request.extend_from_slice(&buffer[..read]);
                if request_complete(&request) {
                    break;
                }
            }

            let response = format!(
                "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            stream
                .write_all(response.as_bytes())
                .await
                .expect("write response");
            stream.shutdown().await.ok();
            String::from_utf8_lossy(&request).into_owned()
        });

        (format!("http://{addr}/v1"), join)
    }

    fn request_complete(request: &[u8]) -> bool {
        let text = String::from_utf8_lossy(request);
        let Some(header_end) = text.find("\r\n\r\n") else {
            return false;
        };
        let content_length = text[..header_end]
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())
                    .flatten()
            })
            .unwrap_or(0);
        request.len() >= header_end + 4 + content_length
    }

    fn settings(base_url: String) -> AiConfig {
        AiConfig {
            enabled: true,
            base_url,
            api_key: Some("sk-test".to_string()),
            ..AiConfig::default()
        }
    }

    #[test]
    fn builds_prompt_with_category() {
        let messages = build_messages("texto", Some("Teología"));
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
        assert_eq!(
            messages[1].content,
            format!("Categoría: Teología\n\nContenido original:\ntexto\n\n{REWRITE_INSTRUCTION}")
        );

        let without = build_messages("texto", None);
        assert!(without[1].content.starts_with("Contenido original:"));
    }

    #[test]
    fn classifies_failures_by_status() {
        let body = r#"{"error":{"message":"bad key"}}"#;
        assert!(matches!(
            classify_failure(StatusCode::UNAUTHORIZED, body),
            ImproveError::Authentication { status: 401, ref detail } if detail == "bad key"
        ));
        assert!(matches!(
            classify_failure(StatusCode::FORBIDDEN, body),
            ImproveError::Authentication { status: 403, .. }
        ));
        assert!(matches!(
            classify_failure(StatusCode::TOO_MANY_REQUESTS, "slow down"),
            ImproveError::RateLimited { ref detail } if detail == "slow down"
        ));
        assert!(matches!(
            classify_failure(StatusCode::BAD_GATEWAY, ""),
            ImproveError::ServerUnavailable { status: 502, ref detail } if detail == "Bad Gateway"
        ));
        assert!(matches!(
            classify_failure(StatusCode::BAD_REQUEST, r#"{"other":1}"#),
            ImproveError::Api { status: 400, ref detail } if detail == r#"{"other":1}"#
        ));
    }

    #[test]
    fn empty_completion_is_an_error() {
        let output: ChatResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"content":"   "}}]}"#).expect("json");
        assert!(matches!(
            extract_content(output),
            Err(ImproveError::EmptyResponse)
        ));

        let output: ChatResponse = serde_json::from_str(r#"{"choices":[]}"#).expect("json");
        assert!(matches!(
            extract_content(output),
            Err(ImproveError::EmptyResponse)
        ));
    }

    #[tokio::test]
    async fn missing_api_key_fails_before_request() {
        let improver = OpenAiTextImprover::new(AiConfig::default());
        let err = improver.improve("x", None).await.expect_err("must fail");
        assert!(matches!(err, ImproveError::MissingApiKey));
    }

    #[tokio::test]
    async fn improves_text_through_chat_completions() {
        let body = r#"{"choices":[{"message":{"content":"  Texto mejorado.  "}}]}"#.to_string();
        let (base_url, server) = serve_once("200 OK", body).await;
        let improver = OpenAiTextImprover::new(settings(base_url));

        let improved = improver
            .improve("texto malo", Some("Filosofía"))
            .await
            .expect("improve");
        assert_eq!(improved, "Texto mejorado.");

        let request = server.await.expect("server task");
        assert!(request.starts_with("POST /v1/chat/completions"));
        assert!(request.contains("Bearer sk-test"));
        assert!(request.contains("\"model\":\"gpt-4o-mini\""));
        assert!(request.contains("texto malo"));
    }

    #[tokio::test]
    async fn surfaces_rate_limit_from_server() {
        let body = r#"{"error":{"message":"quota exceeded"}}"#.to_string();
        let (base_url, server) = serve_once("429 Too Many Requests", body).await;
        let improver = OpenAiTextImprover::new(settings(base_url));

        let err = improver.improve("x", None).await.expect_err("must fail");
        assert!(
            matches!(err, ImproveError::RateLimited { ref detail } if detail == "quota exceeded"),
            "unexpected: {err}"
        );
        server.await.expect("server task");
    }
}
