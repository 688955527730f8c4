//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）；支持 DeepSeek、OpenAI、自建代理等。
//! 视觉描述同样走 chat/completions（图片以 base64 data URL 内联），
//! 语音转写走 /audio/transcriptions（multipart 上传）。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestMessageContentPartImageArgs, ChatCompletionRequestMessageContentPartTextArgs,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    ChatCompletionRequestUserMessageContentPart, CreateChatCompletionRequestArgs, ImageDetail,
    ImageUrlArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;

use crate::llm::{ImageInput, LlmClient, MediaAnalyzer, Message, Role};

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.total_tokens.fetch_add(prompt + completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }
}

fn resolve_api_key(api_key: Option<&str>) -> String {
    api_key
        .map(String::from)
        .or_else(|| std::env::var("OPENAI_API_KEY").ok())
        .unwrap_or_else(|| "sk-placeholder".to_string())
}

fn build_client(base_url: Option<&str>, api_key: &str) -> Client<OpenAIConfig> {
    let config = if let Some(url) = base_url {
        OpenAIConfig::new().with_api_base(url).with_api_key(api_key)
    } else {
        OpenAIConfig::new().with_api_key(api_key)
    };
    Client::with_config(config)
}

/// OpenAI 兼容客户端：持有 Client 与 model 名，complete 时转 Message 为 API 格式并取首条 content
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
    /// 累计 token 使用统计
    pub usage: TokenUsage,
}

impl OpenAiClient {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let api_key = resolve_api_key(api_key);
        Self {
            client: build_client(base_url, &api_key),
            model: model.to_string(),
            usage: TokenUsage::new(),
        }
    }

    fn to_openai_messages(
        &self,
        messages: &[Message],
    ) -> Result<Vec<ChatCompletionRequestMessage>, String> {
        messages
            .iter()
            .map(|m| {
                let msg = match m.role {
                    Role::System => ChatCompletionRequestSystemMessageArgs::default()
                        .content(m.content.clone())
                        .build()
                        .map_err(|e| e.to_string())?
                        .into(),
                    Role::User => ChatCompletionRequestUserMessageArgs::default()
                        .content(m.content.clone())
                        .build()
                        .map_err(|e| e.to_string())?
                        .into(),
                    Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                        .content(m.content.clone())
                        .build()
                        .map_err(|e| e.to_string())?
                        .into(),
                };
                Ok(msg)
            })
            .collect()
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }

    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(self.to_openai_messages(messages)?)
            .build()
            .map_err(|e| e.to_string())?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| e.to_string())?;

        if let Some(usage) = &response.usage {
            self.usage
                .add(usage.prompt_tokens as u64, usage.completion_tokens as u64);
        }

        let content = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();
        tracing::debug!(model = %self.model, len = content.len(), "llm completion");

        Ok(content)
    }
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// 视觉 + 转写：视觉模型走 async_openai，转写走 reqwest multipart
pub struct OpenAiMediaAnalyzer {
    client: Client<OpenAIConfig>,
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    vision_model: String,
    transcription_model: String,
}

impl OpenAiMediaAnalyzer {
    pub fn new(
        base_url: Option<&str>,
        vision_model: &str,
        transcription_model: &str,
        api_key: Option<&str>,
        timeout_secs: u64,
    ) -> Self {
        let api_key = resolve_api_key(api_key);
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            client: build_client(base_url, &api_key),
            http,
            base_url: base_url
                .unwrap_or(OPENAI_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key,
            vision_model: vision_model.to_string(),
            transcription_model: transcription_model.to_string(),
        }
    }
}

#[async_trait]
impl MediaAnalyzer for OpenAiMediaAnalyzer {
    async fn describe_images(&self, prompt: &str, images: &[ImageInput]) -> Result<String, String> {
        if images.is_empty() {
            return Err("No images provided for analysis".to_string());
        }
        let mut parts: Vec<ChatCompletionRequestUserMessageContentPart> =
            Vec::with_capacity(images.len() + 1);
        parts.push(
            ChatCompletionRequestMessageContentPartTextArgs::default()
                .text(prompt)
                .build()
                .map_err(|e| e.to_string())?
                .into(),
        );
        for image in images {
            let encoded = base64::engine::general_purpose::STANDARD.encode(&image.bytes);
            let image_url = ImageUrlArgs::default()
                .url(format!("data:{};base64,{}", image.mime, encoded))
                .detail(ImageDetail::Low)
                .build()
                .map_err(|e| e.to_string())?;
            parts.push(
                ChatCompletionRequestMessageContentPartImageArgs::default()
                    .image_url(image_url)
                    .build()
                    .map_err(|e| e.to_string())?
                    .into(),
            );
        }
        let user = ChatCompletionRequestUserMessageArgs::default()
            .content(parts)
            .build()
            .map_err(|e| e.to_string())?;
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.vision_model)
            .messages(vec![ChatCompletionRequestMessage::User(user)])
            .build()
            .map_err(|e| e.to_string())?;

        tracing::info!(images = images.len(), prompt_len = prompt.len(), "image analysis");
        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| e.to_string())?;
        response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .ok_or_else(|| "Vision model returned no choices".to_string())
    }

    async fn transcribe(&self, audio: Vec<u8>, filename: &str) -> Result<String, String> {
        let part = reqwest::multipart::Part::bytes(audio).file_name(filename.to_string());
        let form = reqwest::multipart::Form::new()
            .text("model", self.transcription_model.clone())
            .part("file", part);
        tracing::info!(file = %filename, "audio transcription");
        let resp = self
            .http
            .post(format!("{}/audio/transcriptions", self.base_url))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| format!("Request failed: {}", e))?;
        if !resp.status().is_success() {
            return Err(format!("HTTP {}", resp.status()));
        }
        let body: TranscriptionResponse = resp
            .json()
            .await
            .map_err(|e| format!("Read body: {}", e))?;
        Ok(body.text)
    }
}
