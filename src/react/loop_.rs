//! 决策循环
//!
//! 每轮：快照 -> (第 K 轮附加强制作答提示) -> Oracle -> 解码 -> 分发 -> 合并 -> 判定。
//! 串行执行：下一轮的 prompt 依赖上一轮合并后的状态。
//! 成功立即返回；到达最大轮数返回 BudgetExhausted；工具失败跳过本轮；决策解析失败终止。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::AgentSection;
use crate::core::{AgentError, RecoveryAction, RecoveryEngine};
use crate::knowledge::{HistoryEntry, KnowledgeState};
use crate::llm::LlmClient;
use crate::react::{
    ActionKind, CommitmentPolicy, Dispatch, Dispatcher, Oracle, Signal, TerminationDetector,
    Toolset,
};

/// 循环参数
#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub max_iterations: usize,
    pub force_answer_every: usize,
    pub sentinel: String,
    pub history_window: usize,
    pub tool_timeout_secs: u64,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self::from(&AgentSection::default())
    }
}

impl From<&AgentSection> for LoopSettings {
    fn from(section: &AgentSection) -> Self {
        Self {
            max_iterations: section.max_iterations,
            force_answer_every: section.force_answer_every,
            sentinel: section.sentinel.clone(),
            history_window: section.history_window,
            tool_timeout_secs: section.tool_timeout_secs,
        }
    }
}

/// run 的结局
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    Success { answer: String, response: String },
    BudgetExhausted,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub task: String,
    pub status: RunStatus,
    pub iterations: usize,
    pub history: Vec<HistoryEntry>,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        matches!(self.status, RunStatus::Success { .. })
    }
}

/// 报告 + 最终知识状态（供调用方检查 / 测试比对）
pub struct RunOutcome<R> {
    pub report: RunReport,
    pub state: KnowledgeState<R>,
}

pub struct LoopController<T: Toolset> {
    toolset: T,
    oracle: Oracle,
    dispatcher: Dispatcher,
    recovery: RecoveryEngine,
    policy: CommitmentPolicy,
    settings: LoopSettings,
}

impl<T: Toolset> LoopController<T> {
    pub fn new(toolset: T, llm: Arc<dyn LlmClient>, settings: LoopSettings) -> Self {
        let oracle = Oracle::new(llm, toolset.system_prompt());
        let dispatcher = Dispatcher::new(
            TerminationDetector::new(settings.sentinel.clone()),
            settings.tool_timeout_secs,
        );
        Self {
            toolset,
            oracle,
            dispatcher,
            recovery: RecoveryEngine::new(),
            policy: CommitmentPolicy::new(settings.force_answer_every),
            settings,
        }
    }

    pub fn toolset(&self) -> &T {
        &self.toolset
    }

    /// 领域引导后运行
    pub async fn run(&self) -> Result<RunOutcome<T::Registry>, AgentError> {
        let state = self.toolset.bootstrap().await?;
        self.run_with(state).await
    }

    /// 从给定的初始状态运行
    pub async fn run_with(
        &self,
        state: KnowledgeState<T::Registry>,
    ) -> Result<RunOutcome<T::Registry>, AgentError> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("run", run_id = %run_id, task = self.toolset.name());
        self.drive(run_id, state.with_history_window(self.settings.history_window))
            .instrument(span)
            .await
    }

    async fn drive(
        &self,
        run_id: Uuid,
        mut state: KnowledgeState<T::Registry>,
    ) -> Result<RunOutcome<T::Registry>, AgentError> {
        let started_at = Utc::now();
        let goal = self.toolset.goal();
        let max = self.settings.max_iterations;
        tracing::info!(max_iterations = max, "run started");

        let mut status = RunStatus::BudgetExhausted;
        let mut iterations = 0;

        for iteration in 1..=max {
            iterations = iteration;
            let forced = self.policy.applies(iteration);
            let instruction =
                forced.then(|| CommitmentPolicy::instruction(self.toolset.answer_action()));
            if forced {
                tracing::info!(iteration, "forcing answer attempt");
            }

            let prompt = Oracle::compose(&goal, &state.snapshot(), instruction.as_deref());
            let raw = self.oracle.ask(&prompt).await?;
            let decision = match self.toolset.decode(&raw) {
                Ok(d) => d,
                Err(e) => {
                    tracing::error!(iteration, error = %e, raw = %raw, "undecodable decision");
                    return Err(e);
                }
            };
            tracing::info!(
                iteration,
                action = decision.action.tag(),
                target = %decision.action.describe(),
                rationale = %decision.rationale,
                "decision"
            );

            match self.dispatcher.dispatch(&self.toolset, &decision, &state).await {
                Ok(Dispatch::Skipped { reason }) => {
                    tracing::debug!(iteration, reason = %reason, "skipped");
                    state.record(
                        iteration,
                        format!("{} skipped: {}", decision.action.describe(), reason),
                        &decision.rationale,
                    );
                }
                Ok(Dispatch::Completed {
                    result,
                    signal,
                    rejected,
                }) => {
                    state.merge(
                        iteration,
                        &decision.action,
                        &result.output,
                        &decision.rationale,
                        rejected.as_deref(),
                    );
                    if let Signal::Success { answer } = signal {
                        tracing::info!(iteration, answer = %answer, "success sentinel observed");
                        status = RunStatus::Success {
                            answer,
                            response: result.raw,
                        };
                        break;
                    }
                    if let Some(answer) = rejected {
                        tracing::info!(iteration, answer = %answer, "answer rejected");
                    }
                }
                Err(e) => match self.recovery.handle(&e) {
                    RecoveryAction::SkipIteration => {
                        tracing::warn!(iteration, error = %e, "tool call failed, moving on");
                        state.record(
                            iteration,
                            format!("{} failed: {}", decision.action.describe(), e),
                            &decision.rationale,
                        );
                    }
                    RecoveryAction::Abort => return Err(e),
                },
            }

            if self.dispatcher.detector().exhausted(iteration, max) {
                tracing::warn!(iteration, "iteration budget exhausted");
            }
        }

        let (prompt_tokens, completion_tokens, _) = self.oracle.token_usage();
        let report = RunReport {
            run_id,
            task: self.toolset.name().to_string(),
            status,
            iterations,
            history: state.history().to_vec(),
            prompt_tokens,
            completion_tokens,
            started_at,
            finished_at: Utc::now(),
        };
        tracing::info!(
            iterations,
            success = report.is_success(),
            history = report.history.len(),
            "run finished"
        );
        Ok(RunOutcome { report, state })
    }
}
