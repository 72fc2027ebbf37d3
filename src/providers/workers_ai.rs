use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::Value;

use crate::model::{ChunkStream, GenerateRequest, LanguageModel};
use crate::utils::sse;
use crate::{FableError, Result};

pub const DEFAULT_BASE_URL: &str = "https://api.cloudflare.com/client/v4";
pub const DEFAULT_MODEL: &str = "@cf/meta/llama-3.1-8b-instruct";

/// Cloudflare Workers AI REST client.
///
/// `POST {base}/accounts/{account}/ai/run/{model}` returns either a single
/// JSON envelope (`{"result":{"response":...},"success":true}`) or, with
/// `"stream": true`, an SSE body of `data: {"response":"<chunk>"}` events
/// terminated by `data: [DONE]`.
pub struct WorkersAi {
    http: reqwest::Client,
    base_url: String,
    account_id: String,
    api_token: String,
    model: String,
}

impl WorkersAi {
    pub fn new(account_id: impl Into<String>, api_token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            account_id: account_id.into(),
            api_token: api_token.into(),
            model: DEFAULT_MODEL.to_string(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn run_url(&self) -> String {
        format!(
            "{}/accounts/{}/ai/run/{}",
            self.base_url.trim_end_matches('/'),
            self.account_id,
            self.model
        )
    }

    fn request_body(request: &GenerateRequest, stream: bool) -> Value {
        serde_json::json!({
            "messages": request.messages,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "stream": stream,
        })
    }
}

impl std::fmt::Debug for WorkersAi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkersAi")
            .field("base_url", &self.base_url)
            .field("account_id", &self.account_id)
            .field("api_token", &"<redacted>")
            .field("model", &self.model)
            .finish()
    }
}

fn decode_stream_data(data: &str) -> Result<Option<String>> {
    let value: Value = serde_json::from_str(data).map_err(|err| {
        FableError::InvalidResponse(format!("malformed stream event: {err}"))
    })?;
    Ok(value
        .get("response")
        .and_then(Value::as_str)
        .map(str::to_string))
}

#[async_trait]
impl LanguageModel for WorkersAi {
    fn provider(&self) -> &str {
        "workers-ai"
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: GenerateRequest) -> Result<String> {
        let response = self
            .http
            .post(self.run_url())
            .bearer_auth(&self.api_token)
            .json(&Self::request_body(&request, false))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FableError::Api { status, body });
        }

        let envelope: Value = response.json().await?;
        envelope
            .get("result")
            .and_then(|result| result.get("response"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                FableError::InvalidResponse("missing result.response in completion".to_string())
            })
    }

    async fn stream(&self, request: GenerateRequest) -> Result<ChunkStream> {
        let response = self
            .http
            .post(self.run_url())
            .bearer_auth(&self.api_token)
            .header("Accept", "text/event-stream")
            .json(&Self::request_body(&request, true))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FableError::Api { status, body });
        }

        let chunks = sse::data_stream_from_response(response)
            .map(|event| event.and_then(|data| decode_stream_data(&data)))
            .filter_map(|item| async move {
                match item {
                    Ok(Some(text)) => Some(Ok(text)),
                    Ok(None) => None,
                    Err(err) => Some(Err(err)),
                }
            });

        Ok(Box::pin(chunks))
    }
}
