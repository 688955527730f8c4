//! 脚本化 LLM / 媒体分析客户端（用于测试，无需 API）
//!
//! ScriptedLlmClient 按顺序回放预设回复，脚本用尽后重复最后一条；同时记录每次收到的消息，
//! 便于断言 prompt 内容与调用次数。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{ImageInput, LlmClient, MediaAnalyzer, Message};

#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    responses: Vec<String>,
    cursor: AtomicUsize,
    received: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedLlmClient {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: responses.into_iter().map(Into::into).collect(),
            cursor: AtomicUsize::new(0),
            received: Mutex::new(Vec::new()),
        }
    }

    /// 每次都返回同一条回复
    pub fn repeating(response: impl Into<String>) -> Self {
        Self::new([response.into()])
    }

    /// 已被调用的次数
    pub fn calls(&self) -> usize {
        self.received.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// 第 n 次调用（0 起）收到的最后一条 user 消息
    pub fn user_prompt(&self, n: usize) -> Option<String> {
        let received = self.received.lock().ok()?;
        received.get(n).and_then(|msgs| {
            msgs.iter()
                .rev()
                .find(|m| matches!(m.role, crate::llm::Role::User))
                .map(|m| m.content.clone())
        })
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        if let Ok(mut received) = self.received.lock() {
            received.push(messages.to_vec());
        }
        let idx = self.cursor.fetch_add(1, Ordering::SeqCst);
        self.responses
            .get(idx)
            .or_else(|| self.responses.last())
            .cloned()
            .ok_or_else(|| "Scripted client has no responses".to_string())
    }
}

/// 固定回复的媒体分析器：统计调用次数，可配置为对某些文件名失败
#[derive(Debug, Default)]
pub struct StaticMediaAnalyzer {
    pub description: String,
    pub transcript: String,
    pub fail_on: Vec<String>,
    pub image_calls: AtomicUsize,
    pub audio_calls: AtomicUsize,
}

impl StaticMediaAnalyzer {
    pub fn new(description: impl Into<String>, transcript: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            transcript: transcript.into(),
            ..Self::default()
        }
    }
}

#[async_trait]
impl MediaAnalyzer for StaticMediaAnalyzer {
    async fn describe_images(&self, _prompt: &str, images: &[ImageInput]) -> Result<String, String> {
        self.image_calls.fetch_add(1, Ordering::SeqCst);
        if images.is_empty() {
            return Err("No images provided for analysis".to_string());
        }
        Ok(self.description.clone())
    }

    async fn transcribe(&self, _audio: Vec<u8>, filename: &str) -> Result<String, String> {
        self.audio_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_on.iter().any(|f| filename.contains(f.as_str())) {
            return Err(format!("transcription failed for {}", filename));
        }
        Ok(self.transcript.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_replays_then_repeats_last() {
        let client = ScriptedLlmClient::new(["a", "b"]);
        let msgs = vec![Message::user("hi")];
        assert_eq!(client.complete(&msgs).await.unwrap(), "a");
        assert_eq!(client.complete(&msgs).await.unwrap(), "b");
        assert_eq!(client.complete(&msgs).await.unwrap(), "b");
        assert_eq!(client.calls(), 3);
        assert_eq!(client.user_prompt(0).as_deref(), Some("hi"));
    }

    #[tokio::test]
    async fn test_scripted_empty_errors() {
        let client = ScriptedLlmClient::default();
        assert!(client.complete(&[Message::user("x")]).await.is_err());
    }
}
