//! Agent 错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：根据 AgentError 决定 SkipIteration（跳过本轮）或 Abort（终止整个 run）。

use thiserror::Error;

/// 运行过程中可能出现的错误（决策解析、工具调用、配置、引导数据等）
#[derive(Error, Debug)]
pub enum AgentError {
    /// Oracle 输出无法解析为 JSON 决策
    #[error("Oracle output could not be parsed: {0}")]
    OracleParse(String),

    /// 决策中的动作标签不在该领域的动作集合内
    #[error("Unknown action: {0}")]
    UnknownAction(String),

    /// 动作参数与声明的动作不匹配（如 DARKEN 未给文件名）
    #[error("Invalid parameters for {action}: {reason}")]
    InvalidParameters { action: String, reason: String },

    #[error("LLM error: {0}")]
    LlmError(String),

    /// 外部工具调用失败（网络、非 0 code 等），本轮放弃
    #[error("Tool call failed: {0}")]
    ToolTransient(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    /// 引导数据（笔记、问题集、初始报告）获取失败
    #[error("Bootstrap failed: {0}")]
    Bootstrap(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AgentError {
    pub fn invalid(action: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameters {
            action: action.into(),
            reason: reason.into(),
        }
    }
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 放弃本轮的分发结果（不合并状态），进入下一轮
    SkipIteration,
    /// 终止整个 run
    Abort,
}
