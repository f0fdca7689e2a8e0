use crate::truncate;
use anyhow::Error;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, instrument};

/// Envelope every generation function answers with.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<FunctionError>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default)]
    pub message: String,
}

impl FunctionResponse {
    pub fn ok(data: Value) -> Self {
        FunctionResponse {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        FunctionResponse {
            success: false,
            data: None,
            error: Some(FunctionError {
                code: None,
                message: message.into(),
            }),
        }
    }

    /// The error message, or the whole response when it carries none.
    pub fn error_message(&self) -> String {
        match &self.error {
            Some(error) if !error.message.is_empty() => error.message.clone(),
            _ => serde_json::to_string(self).unwrap_or_else(|_| format!("{self:?}")),
        }
    }
}

/// Invokes a named generation function with a JSON payload.
#[async_trait]
pub trait Functions: Send + Sync {
    async fn invoke(&self, name: &str, payload: Value) -> Result<FunctionResponse, Error>;
}

/// HTTP client for functions served under `{base_url}/{name}`.
pub struct FunctionClient {
    http: Client,
    base_url: String,
    service_key: String,
}

impl FunctionClient {
    pub fn new(base_url: &str, service_key: &str, timeout: Duration) -> Result<Self, Error> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key: service_key.to_string(),
        })
    }
}

#[async_trait]
impl Functions for FunctionClient {
    #[instrument(name = "functions.invoke", skip(self, payload))]
    async fn invoke(&self, function: &str, payload: Value) -> Result<FunctionResponse, Error> {
        let url = format!("{}/{}", self.base_url, function);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.service_key)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        debug!(status = status.as_u16(), "Function responded");

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Ok(FunctionResponse::failed(format!(
                "Rate limit exceeded (HTTP 429): {}",
                truncate(&body, 200)
            )));
        }
        if !status.is_success() {
            return Ok(FunctionResponse::failed(format!(
                "HTTP {}: {}",
                status.as_u16(),
                truncate(&body, 200)
            )));
        }

        Ok(serde_json::from_str(&body)?)
    }
}
