//! LLM 层：客户端抽象与实现（OpenAI 兼容 / DeepSeek / 脚本化 Mock）

pub mod message;
pub mod mock;
pub mod openai;
pub mod traits;

use std::sync::Arc;

pub use message::{Message, Role};
pub use mock::{ScriptedLlmClient, StaticMediaAnalyzer};
pub use openai::{OpenAiClient, OpenAiMediaAnalyzer, TokenUsage};
pub use traits::{ImageInput, LlmClient, MediaAnalyzer};

use crate::config::LlmSection;

pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";

/// 按 [llm] 段创建决策用的文本客户端
///
/// - provider = "deepseek"：base_url 默认 DeepSeek，Key 优先 `DEEPSEEK_API_KEY`
/// - 其他：OpenAI 兼容端点，Key 取 `OPENAI_API_KEY`
pub fn create_llm_client(section: &LlmSection) -> Arc<dyn LlmClient> {
    if section.provider.eq_ignore_ascii_case("deepseek") {
        let api_key = std::env::var("DEEPSEEK_API_KEY").ok();
        let base_url = section.base_url.as_deref().unwrap_or(DEEPSEEK_BASE_URL);
        tracing::info!(provider = "deepseek", model = %section.model, "llm client");
        return Arc::new(OpenAiClient::new(
            Some(base_url),
            &section.model,
            api_key.as_deref(),
        ));
    }
    tracing::info!(provider = %section.provider, model = %section.model, "llm client");
    Arc::new(OpenAiClient::new(
        section.base_url.as_deref(),
        &section.model,
        None,
    ))
}

/// 视觉 / 转写客户端（DeepSeek 无视觉接口，始终走 OpenAI 兼容端点）
pub fn create_media_analyzer(section: &LlmSection) -> Arc<dyn MediaAnalyzer> {
    let base_url = section
        .media_base_url
        .as_deref()
        .or_else(|| {
            if section.provider.eq_ignore_ascii_case("deepseek") {
                None
            } else {
                section.base_url.as_deref()
            }
        });
    Arc::new(OpenAiMediaAnalyzer::new(
        base_url,
        &section.vision_model,
        &section.transcription_model,
        None,
        section.timeouts.request,
    ))
}
