//! 错误恢复引擎
//!
//! 根据 AgentError 类型返回 RecoveryAction：工具侧的瞬时失败只跳过当前轮，
//! 决策解析失败与 LLM 失败直接终止，不做本地修复或重新提示。

use crate::core::{AgentError, RecoveryAction};

#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, err: &AgentError) -> RecoveryAction {
        match err {
            AgentError::ToolTransient(_) | AgentError::ToolTimeout(_) => {
                RecoveryAction::SkipIteration
            }
            // 本地文件读写失败（如下载的图片不可读）同样只影响当前工具调用
            AgentError::Io(_) => RecoveryAction::SkipIteration,
            AgentError::OracleParse(_)
            | AgentError::UnknownAction(_)
            | AgentError::InvalidParameters { .. }
            | AgentError::LlmError(_)
            | AgentError::Bootstrap(_)
            | AgentError::ConfigError(_) => RecoveryAction::Abort,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recovery_tool_failures_skip() {
        let engine = RecoveryEngine::new();
        let err = AgentError::ToolTransient("connection reset".to_string());
        assert_eq!(engine.handle(&err), RecoveryAction::SkipIteration);
        let err = AgentError::ToolTimeout("query".to_string());
        assert_eq!(engine.handle(&err), RecoveryAction::SkipIteration);
    }

    #[test]
    fn test_recovery_oracle_parse_aborts() {
        let engine = RecoveryEngine::new();
        let err = AgentError::OracleParse("expected value at line 1".to_string());
        assert_eq!(engine.handle(&err), RecoveryAction::Abort);
    }

    #[test]
    fn test_recovery_unknown_action_aborts() {
        let engine = RecoveryEngine::new();
        let err = AgentError::UnknownAction("teleport".to_string());
        assert_eq!(engine.handle(&err), RecoveryAction::Abort);
        let err = AgentError::invalid("DARKEN", "missing filename");
        assert_eq!(engine.handle(&err), RecoveryAction::Abort);
    }

    #[test]
    fn test_recovery_llm_error_aborts() {
        let engine = RecoveryEngine::new();
        let err = AgentError::LlmError("429 Too Many Requests".to_string());
        assert_eq!(engine.handle(&err), RecoveryAction::Abort);
    }
}
