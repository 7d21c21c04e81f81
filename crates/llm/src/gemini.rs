//! Gemini `generateContent` backend, via Google AI Studio or Vertex AI.

use std::time::Duration;

use async_trait::async_trait;
use envoy_common::{EnvoyError, Result};
use serde::{Deserialize, Serialize};

use crate::client::{LlmClient, LlmRequest, LlmResponse, ResponseFormat, Role, TokenUsage};

const AI_STUDIO_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Where requests are sent and how they authenticate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeminiEndpoint {
    /// Google AI Studio, authenticated with an API key header.
    AiStudio { base_url: String },
    /// Vertex AI, authenticated with an OAuth bearer token.
    Vertex { project: String, location: String },
}

impl GeminiEndpoint {
    pub fn ai_studio() -> Self {
        Self::AiStudio {
            base_url: AI_STUDIO_BASE_URL.to_string(),
        }
    }

    fn generate_url(&self, model: &str) -> String {
        match self {
            Self::AiStudio { base_url } => format!(
                "{}/models/{}:generateContent",
                base_url.trim_end_matches('/'),
                model
            ),
            Self::Vertex { project, location } => format!(
                "https://{location}-aiplatform.googleapis.com/v1/projects/{project}/locations/{location}/publishers/google/models/{model}:generateContent"
            ),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    generation_config: GenerationConfig,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct GeminiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct GeminiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Serialize, Default)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<&'static str>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    usage_metadata: Option<GeminiUsage>,
    model_version: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsage {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}

pub struct GeminiClient {
    endpoint: GeminiEndpoint,
    model: String,
    credential: String,
    http_client: reqwest::Client,
}

impl GeminiClient {
    pub fn new(
        endpoint: GeminiEndpoint,
        model: String,
        credential: String,
        timeout: Option<Duration>,
    ) -> Self {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Self {
            endpoint,
            model,
            credential,
            http_client: builder.build().unwrap_or_default(),
        }
    }

    fn role_to_string(role: &Role) -> &'static str {
        match role {
            // system messages go in systemInstruction
            Role::System => "user",
            Role::User => "user",
            Role::Assistant => "model",
        }
    }

    fn build_body(request: &LlmRequest) -> GenerateContentRequest {
        let contents = request
            .messages
            .iter()
            .map(|msg| GeminiContent {
                role: Some(Self::role_to_string(&msg.role).to_string()),
                parts: vec![GeminiPart {
                    text: Some(msg.content.clone()),
                }],
            })
            .collect();

        GenerateContentRequest {
            contents,
            system_instruction: request.system_prompt.as_ref().map(|system| GeminiContent {
                role: None,
                parts: vec![GeminiPart {
                    text: Some(system.clone()),
                }],
            }),
            generation_config: GenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_tokens,
                response_mime_type: match request.response_format {
                    ResponseFormat::Json => Some("application/json"),
                    ResponseFormat::Text => None,
                },
            },
        }
    }
}

#[async_trait]
impl LlmClient for GeminiClient {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
        let url = self.endpoint.generate_url(&self.model);
        let body = Self::build_body(&request);

        let http_req = self.http_client.post(&url).json(&body);
        let http_req = match self.endpoint {
            GeminiEndpoint::AiStudio { .. } => http_req.header("x-goog-api-key", &self.credential),
            GeminiEndpoint::Vertex { .. } => http_req.bearer_auth(&self.credential),
        };

        let response = http_req
            .send()
            .await
            .map_err(|e| EnvoyError::Connection(format!("Gemini request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(EnvoyError::Generation(format!(
                "Gemini API error {status}: {body_text}"
            )));
        }

        let parsed: GenerateContentResponse = response.json().await.map_err(|e| {
            EnvoyError::Generation(format!("Failed to parse Gemini response: {e}"))
        })?;

        let candidate = parsed
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| EnvoyError::Generation("No candidates in Gemini response".to_string()))?;

        let content = candidate
            .content
            .map(|c| {
                c.parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        Ok(LlmResponse {
            content,
            model: parsed.model_version.unwrap_or_else(|| self.model.clone()),
            usage: parsed.usage_metadata.map(|u| TokenUsage {
                prompt_tokens: u.prompt_token_count,
                completion_tokens: u.candidates_token_count,
            }),
            finish_reason: candidate.finish_reason,
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ChatMessage;

    #[test]
    fn ai_studio_url() {
        let url = GeminiEndpoint::ai_studio().generate_url("gemini-2.0-flash-exp");
        assert_eq!(
            url,
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash-exp:generateContent"
        );
    }

    #[test]
    fn vertex_url_embeds_project_and_location() {
        let endpoint = GeminiEndpoint::Vertex {
            project: "acme".into(),
            location: "us-central1".into(),
        };
        assert_eq!(
            endpoint.generate_url("gemini-2.0-flash-exp"),
            "https://us-central1-aiplatform.googleapis.com/v1/projects/acme/locations/us-central1/publishers/google/models/gemini-2.0-flash-exp:generateContent"
        );
    }

    #[test]
    fn json_request_sets_mime_type_and_limits() {
        let request = LlmRequest::json_prompt("Verify this", 0.1, 500);
        let json = serde_json::to_value(GeminiClient::build_body(&request)).unwrap();

        assert_eq!(json["generationConfig"]["responseMimeType"], "application/json");
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 500);
        let temperature = json["generationConfig"]["temperature"].as_f64().unwrap();
        assert!((temperature - 0.1).abs() < 1e-6);
        assert_eq!(json["contents"][0]["role"], "user");
        assert_eq!(json["contents"][0]["parts"][0]["text"], "Verify this");
        assert!(json.get("systemInstruction").is_none());
    }

    #[test]
    fn assistant_turns_map_to_model_role() {
        let request = LlmRequest {
            system_prompt: Some("Be terse.".into()),
            messages: vec![
                ChatMessage::user("Hi"),
                ChatMessage {
                    role: Role::Assistant,
                    content: "Hello".into(),
                },
            ],
            ..Default::default()
        };
        let json = serde_json::to_value(GeminiClient::build_body(&request)).unwrap();

        assert_eq!(json["contents"][1]["role"], "model");
        assert_eq!(json["systemInstruction"]["parts"][0]["text"], "Be terse.");
        assert!(json["generationConfig"].get("responseMimeType").is_none());
    }

    #[tokio::test]
    async fn parses_candidate_text_from_local_server() {
        use axum::{routing::post, Json, Router};

        let app = Router::new().route(
            "/models/{model}",
            post(|| async {
                Json(serde_json::json!({
                    "candidates": [{
                        "content": {"role": "model", "parts": [{"text": "{\"is_safe\":"}, {"text": "true}"}]},
                        "finishReason": "STOP"
                    }],
                    "usageMetadata": {"promptTokenCount": 12, "candidatesTokenCount": 4}
                }))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client = GeminiClient::new(
            GeminiEndpoint::AiStudio {
                base_url: format!("http://{addr}"),
            },
            "gemini-test".into(),
            "key".into(),
            Some(Duration::from_secs(5)),
        );
        let response = client
            .complete(LlmRequest::json_prompt("x", 0.1, 10))
            .await
            .unwrap();

        assert_eq!(response.content, "{\"is_safe\":true}");
        assert_eq!(response.model, "gemini-test");
        assert_eq!(response.finish_reason.as_deref(), Some("STOP"));
        assert_eq!(response.usage.unwrap().completion_tokens, 4);
    }
}
