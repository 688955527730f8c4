//! HubClient 的 HTTP 实现（reqwest）
//!
//! 所有请求带超时与 User-Agent；每次请求输出结构化日志（端点、状态码、耗时、响应长度）。

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use crate::config::HubSection;
use crate::core::AgentError;
use crate::hub::{HubClient, HubReply};

const USER_AGENT: &str = concat!("sleuth/", env!("CARGO_PKG_VERSION"));

pub struct HttpHub {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpHub {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, timeout_secs: u64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    pub fn from_config(section: &HubSection) -> Self {
        Self::new(&section.base_url, &section.api_key, section.timeout_secs)
    }

    async fn post_json(&self, url: &str, body: serde_json::Value) -> Result<String, AgentError> {
        let start = Instant::now();
        let resp = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::ToolTransient(format!("POST {}: {}", url, e)))?;
        let status = resp.status();
        // 校验方对错误答案可能返回 4xx + JSON，响应体仍需交给调用方判定
        let text = resp
            .text()
            .await
            .map_err(|e| AgentError::ToolTransient(format!("Read body: {}", e)))?;
        tracing::debug!(
            url = %url,
            status = status.as_u16(),
            duration_ms = start.elapsed().as_millis() as u64,
            len = text.len(),
            "hub post"
        );
        if status.is_server_error() {
            return Err(AgentError::ToolTransient(format!("HTTP {}: {}", status, url)));
        }
        Ok(text)
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, AgentError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AgentError::ToolTransient(format!("GET {}: {}", url, e)))?;
        if !resp.status().is_success() {
            return Err(AgentError::ToolTransient(format!(
                "HTTP {}: {}",
                resp.status(),
                url
            )));
        }
        Ok(resp)
    }
}

#[async_trait]
impl HubClient for HttpHub {
    async fn query(&self, endpoint: &str, query: &str) -> Result<HubReply, AgentError> {
        let url = self.url_for(endpoint);
        tracing::info!(endpoint = %endpoint, query = %query, "hub query");
        let body = self
            .post_json(&url, json!({ "apikey": self.api_key, "query": query }))
            .await?;
        let reply = HubReply::parse(&body);
        if !reply.is_ok() {
            return Err(AgentError::ToolTransient(format!(
                "{} returned code {}: {}",
                endpoint, reply.code, reply.message
            )));
        }
        Ok(reply)
    }

    async fn report(&self, task: &str, answer: serde_json::Value) -> Result<HubReply, AgentError> {
        let url = self.url_for("/report");
        tracing::info!(task = %task, answer = %answer, "hub report");
        let body = self
            .post_json(
                &url,
                json!({ "apikey": self.api_key, "task": task, "answer": answer }),
            )
            .await?;
        let reply = HubReply::parse(&body);
        tracing::info!(
            code = reply.code,
            message_len = reply.message.len(),
            hints = reply.hints.len(),
            "hub report reply"
        );
        Ok(reply)
    }

    async fn fetch_text(&self, url: &str) -> Result<String, AgentError> {
        let resp = self.get(url).await?;
        let mut body = resp
            .text()
            .await
            .map_err(|e| AgentError::ToolTransient(format!("Read body: {}", e)))?;
        if body.starts_with('\u{FEFF}') {
            body = body.trim_start_matches('\u{FEFF}').to_string();
        }
        Ok(body)
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, AgentError> {
        let resp = self.get(url).await?;
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| AgentError::ToolTransient(format!("Read body: {}", e)))?;
        Ok(bytes.to_vec())
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }

    fn api_key(&self) -> &str {
        &self.api_key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_for_relative_and_absolute() {
        let hub = HttpHub::new("https://hub.example/", "KEY", 5);
        assert_eq!(hub.url_for("/report"), "https://hub.example/report");
        assert_eq!(
            hub.url_for("/data/{apikey}/softo.json"),
            "https://hub.example/data/KEY/softo.json"
        );
        assert_eq!(hub.url_for("https://other.example/x"), "https://other.example/x");
    }
}
