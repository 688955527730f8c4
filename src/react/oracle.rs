//! Oracle：把目标与知识快照发给 LLM，取回一条原始决策文本
//!
//! system prompt 固定（领域工具说明 + JSON 格式约束）；user 文本每轮不同（目标 + 快照 + 可选强制作答提示）。
//! 解码交给各领域的 Toolset::decode。

use std::sync::Arc;

use crate::core::AgentError;
use crate::llm::{LlmClient, Message};

pub struct Oracle {
    llm: Arc<dyn LlmClient>,
    system_prompt: String,
}

impl Oracle {
    pub fn new(llm: Arc<dyn LlmClient>, system_prompt: impl Into<String>) -> Self {
        Self {
            llm,
            system_prompt: system_prompt.into(),
        }
    }

    /// 获取 LLM 累计 token 使用统计
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }

    /// 拼接本轮 user 文本
    pub fn compose(goal: &str, snapshot: &str, instruction: Option<&str>) -> String {
        let mut text = String::new();
        if let Some(instruction) = instruction {
            text.push_str(instruction);
            text.push_str("\n\n");
        }
        text.push_str("<goal>\n");
        text.push_str(goal.trim());
        text.push_str("\n</goal>\n\n<state>\n");
        text.push_str(snapshot);
        text.push_str("</state>\n\nBased on the current state, what should we do next?");
        text
    }

    pub async fn ask(&self, user_text: &str) -> Result<String, AgentError> {
        let messages = vec![
            Message::system(self.system_prompt.clone()),
            Message::user(user_text.to_string()),
        ];
        tracing::debug!(prompt_len = user_text.len(), "oracle request");
        let output = self
            .llm
            .complete(&messages)
            .await
            .map_err(AgentError::LlmError)?;
        tracing::debug!(output = %output, "oracle response");
        Ok(output)
    }
}
