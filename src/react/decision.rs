//! Decision：Oracle 的结构化输出
//!
//! 每个领域定义自己的封闭动作枚举（只携带该动作需要的参数），在 Oracle 响应边界一次性解码；
//! 未知动作与参数不符都在这里报错，不会静默落空。

use std::fmt::Debug;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::core::AgentError;

/// 领域动作需要提供给通用分发 / 历史记录的信息
pub trait ActionKind: Debug + Send + Sync {
    /// 动作标签（QUERY_PEOPLE / DARKEN / FETCH ...）
    fn tag(&self) -> &'static str;

    /// 单行描述，用于日志与历史
    fn describe(&self) -> String;

    /// 执行前就已知的候选答案（已规范化）；用于在调用校验方之前过滤已拒绝的答案
    fn submitted_answer(&self) -> Option<String> {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision<A> {
    pub action: A,
    pub rationale: String,
    pub candidate_answer: Option<String>,
}

impl<A> Decision<A> {
    pub fn new(action: A, rationale: impl Into<String>) -> Self {
        Self {
            action,
            rationale: rationale.into(),
            candidate_answer: None,
        }
    }

    pub fn with_candidate(mut self, candidate: Option<String>) -> Self {
        self.candidate_answer = candidate.filter(|c| !c.trim().is_empty());
        self
    }
}

/// 去掉包裹整段输出的 markdown 代码块（```json ... ```），不做其他容错
pub fn strip_fencing(output: &str) -> &str {
    let trimmed = output.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // 去掉语言标记所在的首行
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest.trim_start_matches("json"),
    };
    body.trim_end().trim_end_matches("```").trim()
}

/// 严格解析：去围栏后必须整体是一个 JSON 值
pub fn decode_json<T: DeserializeOwned>(output: &str) -> Result<T, AgentError> {
    let json_str = strip_fencing(output);
    serde_json::from_str(json_str)
        .map_err(|e| AgentError::OracleParse(format!("{}: {}", e, json_str)))
}
