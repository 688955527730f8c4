//! LLM 客户端抽象
//!
//! 文本补全（决策 Oracle、翻译）走 LlmClient；图片描述与音频转写走 MediaAnalyzer。

use async_trait::async_trait;

use crate::llm::Message;

/// LLM 客户端 trait：非流式完成
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, messages: &[Message]) -> Result<String, String>;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}

/// 待分析的一张图片（原始字节 + MIME 类型）
#[derive(Debug, Clone)]
pub struct ImageInput {
    pub bytes: Vec<u8>,
    pub mime: String,
}

impl ImageInput {
    pub fn new(bytes: Vec<u8>, mime: impl Into<String>) -> Self {
        Self {
            bytes,
            mime: mime.into(),
        }
    }

    /// 根据文件扩展名推断 MIME，未知时按 png 处理
    pub fn from_filename(bytes: Vec<u8>, filename: &str) -> Self {
        let lower = filename.to_lowercase();
        let mime = if lower.ends_with(".jpg") || lower.ends_with(".jpeg") {
            "image/jpeg"
        } else if lower.ends_with(".gif") {
            "image/gif"
        } else if lower.ends_with(".webp") {
            "image/webp"
        } else {
            "image/png"
        };
        Self::new(bytes, mime)
    }
}

/// 媒体分析：视觉描述与语音转写
#[async_trait]
pub trait MediaAnalyzer: Send + Sync {
    /// 对一张或多张图片生成描述
    async fn describe_images(&self, prompt: &str, images: &[ImageInput]) -> Result<String, String>;

    /// 转写一段音频
    async fn transcribe(&self, audio: Vec<u8>, filename: &str) -> Result<String, String>;
}
