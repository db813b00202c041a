use async_trait::async_trait;
use anyhow::{Result, anyhow, Context};
use crate::config::GeminiConfig;
use crate::providers::traits::CompletionProvider;
use log::debug;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

pub const RCM_SYSTEM_MESSAGE: &str = "You are a Risk Control Matrix (RCM) analysis expert. \
    You assess control objectives, classify risks and propose practical controls. \
    When asked for JSON, respond with JSON only.";

/// Client for the Gemini `generateContent` and `embedContent` REST endpoints.
#[derive(Clone)]
pub struct GeminiProvider {
    api_key: String,
    system_message: String,
    client: Client,
    model: String,
    embedding_model: String,
    base_url: String,
    generation_config: Value,
}

impl GeminiProvider {
    pub fn new(config: &GeminiConfig, system_message: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            api_key: config.api_key.clone(),
            system_message,
            client,
            model: config.model.clone(),
            embedding_model: config.embedding_model.clone(),
            base_url: config.api_url.trim_end_matches('/').to_string(),
            generation_config: json!({
                "temperature": config.temperature,
                "topP": config.top_p,
                "topK": config.top_k,
                "maxOutputTokens": config.max_output_tokens,
            }),
        })
    }

    async fn post(&self, method: &str, model: &str, body: Value) -> Result<Value> {
        let url = format!("{}/models/{}:{}", self.base_url, model, method);
        debug!("POST {}", url);

        let response = self.client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Gemini {} request failed", method))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<Value>(&error_text)
                .ok()
                .and_then(|v| v["error"]["message"].as_str().map(|s| s.to_string()))
                .unwrap_or(error_text);
            return Err(anyhow!("Gemini API error ({}): {}", status, message));
        }

        let response_json: Value = response.json().await?;
        if let Some(error) = response_json.get("error") {
            return Err(anyhow!("Gemini API returned error: {}", error));
        }
        Ok(response_json)
    }
}

#[async_trait]
impl CompletionProvider for GeminiProvider {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let response_json = self
            .post(
                "generateContent",
                &self.model,
                json!({
                    "contents": [{
                        "role": "user",
                        "parts": [{
                            "text": format!("{}\n{}", self.system_message, prompt)
                        }]
                    }],
                    "generationConfig": self.generation_config,
                }),
            )
            .await?;

        if let Some(reason) = response_json["promptFeedback"]["blockReason"].as_str() {
            return Err(anyhow!("Prompt blocked by Gemini: {}", reason));
        }

        let parts = response_json["candidates"][0]["content"]["parts"]
            .as_array()
            .ok_or_else(|| anyhow!("Invalid response format"))?;
        let text: String = parts
            .iter()
            .filter_map(|part| part["text"].as_str())
            .collect();

        if text.is_empty() {
            return Err(anyhow!("Gemini returned an empty response"));
        }
        Ok(text)
    }

    async fn generate_embedding(&self, text: &str) -> Result<Vec<f32>> {
        let response_json = self
            .post(
                "embedContent",
                &self.embedding_model,
                json!({
                    "model": format!("models/{}", self.embedding_model),
                    "content": { "parts": [{ "text": text }] },
                }),
            )
            .await?;

        let values = response_json["embedding"]["values"]
            .as_array()
            .ok_or_else(|| anyhow!("Invalid embedding response format"))?;
        values
            .iter()
            .map(|v| v.as_f64().map(|f| f as f32).ok_or_else(|| anyhow!("Non-numeric embedding value")))
            .collect()
    }

    async fn get_model_info(&self) -> Result<String> {
        Ok(self.model.clone())
    }
}
