//! 动作分发
//!
//! Toolset 是每个领域的工具插件：解码决策、判断是否已执行过、执行外部调用。
//! Dispatcher 在调用前做去重（已查询 / 已访问 / 已被拒绝的答案），对调用施加超时，
//! 输出结构化审计日志（JSON），并用 TerminationDetector 判定成功。
//! 它只读知识状态，合并由循环控制器完成。

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::time::timeout;

use crate::core::AgentError;
use crate::knowledge::{KnowledgeState, Registry};
use crate::react::{ActionKind, Decision, TerminationDetector};

/// 一次外部调用的结果
#[derive(Debug, Clone)]
pub struct ToolResult<O> {
    /// 原始文本响应，用于哨兵检测
    pub raw: String,
    pub output: O,
    /// 本次提交给校验方的候选答案（已规范化）
    pub submitted: Option<String>,
}

impl<O> ToolResult<O> {
    pub fn new(raw: impl Into<String>, output: O) -> Self {
        Self {
            raw: raw.into(),
            output,
            submitted: None,
        }
    }

    pub fn with_submitted(mut self, answer: impl Into<String>) -> Self {
        self.submitted = Some(answer.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    Continue,
    Success { answer: String },
}

#[derive(Debug)]
pub enum Dispatch<O> {
    /// 已执行过的动作：未发起任何外部调用
    Skipped { reason: String },
    Completed {
        result: ToolResult<O>,
        signal: Signal,
        /// 校验方未接受的候选答案
        rejected: Option<String>,
    },
}

/// 领域工具插件
#[async_trait]
pub trait Toolset: Send + Sync {
    type Action: ActionKind;
    type Output: Send + Sync;
    type Registry: Registry<Action = Self::Action, Output = Self::Output>;

    fn name(&self) -> &'static str;

    /// 本次 run 的目标文本（整个 run 不变）
    fn goal(&self) -> String;

    fn system_prompt(&self) -> String;

    /// 作答类动作的名字，用于强制作答提示
    fn answer_action(&self) -> &'static str;

    /// 获取引导数据并构建初始状态
    async fn bootstrap(&self) -> Result<KnowledgeState<Self::Registry>, AgentError>;

    fn decode(&self, raw: &str) -> Result<Decision<Self::Action>, AgentError>;

    /// 该动作是否受分发超时约束；自行管理外部调用超时的动作返回 false
    fn bounded(&self, _action: &Self::Action) -> bool {
        true
    }

    /// 若该动作对应的 key 已处理过，返回跳过原因
    fn skip_reason(&self, action: &Self::Action, registry: &Self::Registry) -> Option<String>;

    async fn invoke(
        &self,
        decision: &Decision<Self::Action>,
        registry: &Self::Registry,
    ) -> Result<ToolResult<Self::Output>, AgentError>;
}

pub struct Dispatcher {
    detector: TerminationDetector,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(detector: TerminationDetector, timeout_secs: u64) -> Self {
        Self {
            detector,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub fn detector(&self) -> &TerminationDetector {
        &self.detector
    }

    pub async fn dispatch<T: Toolset>(
        &self,
        toolset: &T,
        decision: &Decision<T::Action>,
        state: &KnowledgeState<T::Registry>,
    ) -> Result<Dispatch<T::Output>, AgentError> {
        let action = &decision.action;
        if let Some(answer) = action.submitted_answer() {
            if state.rejected().contains(&answer) {
                return Ok(Dispatch::Skipped {
                    reason: format!("answer {} was already rejected", answer),
                });
            }
        }
        if let Some(reason) = toolset.skip_reason(action, state.registry()) {
            return Ok(Dispatch::Skipped { reason });
        }

        let start = Instant::now();
        let invocation = toolset.invoke(decision, state.registry());
        let result = if toolset.bounded(action) {
            timeout(self.timeout, invocation).await
        } else {
            Ok(invocation.await)
        };

        let (ok, outcome): (bool, &str) = match &result {
            Ok(Ok(_)) => (true, "ok"),
            Ok(Err(_)) => (false, "error"),
            Err(_) => (false, "timeout"),
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "toolset": toolset.name(),
            "action": action.tag(),
            "target": action.describe(),
            "ok": ok,
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        let result = match result {
            Ok(Ok(r)) => r,
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(AgentError::ToolTimeout(action.describe())),
        };

        if self.detector.check(&result.raw) {
            let answer = result
                .submitted
                .clone()
                .or_else(|| decision.candidate_answer.clone())
                .unwrap_or_else(|| result.raw.clone());
            return Ok(Dispatch::Completed {
                result,
                signal: Signal::Success { answer },
                rejected: None,
            });
        }
        let rejected = result.submitted.clone();
        Ok(Dispatch::Completed {
            result,
            signal: Signal::Continue,
            rejected,
        })
    }
}
