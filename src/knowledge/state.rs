//! 知识状态：领域登记表 + 引导数据 + 历史 + 已拒绝答案
//!
//! 一次 run 内由循环控制器独占；merge 是唯一修改登记表的入口，snapshot 只读。

use std::fmt::Write as _;

use crate::knowledge::{HistoryEntry, RejectedAnswers};

/// 领域登记表：实体 / 图片 / 页面各自实现
pub trait Registry: Send + Sync {
    type Action;
    type Output;

    /// 把一次完成的工具调用合并进登记表，返回本轮叙述
    fn apply(&mut self, action: &Self::Action, output: &Self::Output) -> String;

    /// 确定性的文本渲染（同样的内容总是得到同样的文本）
    fn render(&self) -> String;
}

#[derive(Debug, Clone)]
pub struct KnowledgeState<R> {
    registry: R,
    seed: Vec<(String, String)>,
    history: Vec<HistoryEntry>,
    rejected: RejectedAnswers,
    history_window: usize,
}

impl<R: Registry> KnowledgeState<R> {
    pub fn new(registry: R) -> Self {
        Self {
            registry,
            seed: Vec::new(),
            history: Vec::new(),
            rejected: RejectedAnswers::new(),
            history_window: 30,
        }
    }

    pub fn with_history_window(mut self, window: usize) -> Self {
        self.history_window = window.max(1);
        self
    }

    /// 追加一段引导数据（下载的笔记、问题集等），只在 run 开始前调用
    pub fn with_seed(mut self, title: impl Into<String>, content: impl Into<String>) -> Self {
        self.seed.push((title.into(), content.into()));
        self
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    pub fn rejected(&self) -> &RejectedAnswers {
        &self.rejected
    }

    /// 合并一次完成的分发：更新登记表、记录被拒答案、追加一条历史
    pub fn merge(
        &mut self,
        iteration: usize,
        action: &R::Action,
        output: &R::Output,
        rationale: &str,
        rejected: Option<&str>,
    ) {
        let mut narrative = self.registry.apply(action, output);
        if let Some(answer) = rejected {
            if self.rejected.insert(answer) {
                let _ = write!(narrative, " | rejected: {}", answer);
            }
        }
        self.push_history(iteration, narrative, rationale);
    }

    /// 跳过或失败的轮次：只追加历史，不动登记表
    pub(crate) fn record(&mut self, iteration: usize, narrative: impl Into<String>, rationale: &str) {
        self.push_history(iteration, narrative.into(), rationale);
    }

    fn push_history(&mut self, iteration: usize, mut narrative: String, rationale: &str) {
        let rationale = rationale.trim();
        if !rationale.is_empty() {
            let _ = write!(narrative, " | reasoning: {}", rationale);
        }
        self.history.push(HistoryEntry {
            iteration,
            narrative,
        });
    }

    /// 渲染供 Oracle 使用的快照：引导数据、登记表、已拒绝答案、最近历史
    pub fn snapshot(&self) -> String {
        let mut out = String::new();
        for (title, content) in &self.seed {
            let _ = writeln!(out, "<{}>", title);
            let _ = writeln!(out, "{}", content.trim());
            let _ = writeln!(out, "</{}>\n", title);
        }

        out.push_str(&self.registry.render());
        if !out.ends_with('\n') {
            out.push('\n');
        }

        out.push_str("\nrejected_answers:\n");
        if self.rejected.is_empty() {
            out.push_str("  (none)\n");
        }
        for answer in self.rejected.iter() {
            let _ = writeln!(out, "  - {}", answer);
        }

        let start = self.history.len().saturating_sub(self.history_window);
        let _ = writeln!(
            out,
            "\nhistory (last {} of {}):",
            self.history.len() - start,
            self.history.len()
        );
        for entry in &self.history[start..] {
            let _ = writeln!(out, "  - step {}: {}", entry.iteration, entry.narrative);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 最小登记表：记录访问过的 key
    #[derive(Default)]
    struct Seen(Vec<String>);

    impl Registry for Seen {
        type Action = String;
        type Output = usize;

        fn apply(&mut self, action: &String, output: &usize) -> String {
            self.0.push(action.clone());
            format!("visited {} ({} items)", action, output)
        }

        fn render(&self) -> String {
            format!("seen: {:?}\n", self.0)
        }
    }

    #[test]
    fn test_merge_appends_one_history_entry() {
        let mut state = KnowledgeState::new(Seen::default());
        state.merge(1, &"A".to_string(), &3, "start here", None);
        assert_eq!(state.history().len(), 1);
        assert_eq!(state.history()[0].iteration, 1);
        assert!(state.history()[0].narrative.contains("visited A (3 items)"));
        assert!(state.history()[0].narrative.contains("reasoning: start here"));
        assert_eq!(state.registry().0, vec!["A".to_string()]);
    }

    #[test]
    fn test_rejected_only_grows() {
        let mut state = KnowledgeState::new(Seen::default());
        state.merge(1, &"A".to_string(), &0, "", Some("WARSAW"));
        state.merge(2, &"B".to_string(), &0, "", Some("WARSAW"));
        state.merge(3, &"C".to_string(), &0, "", Some("KRAKOW"));
        assert_eq!(state.rejected().len(), 2);
        assert!(state.rejected().contains("WARSAW"));
        assert!(state.rejected().contains("KRAKOW"));
    }

    #[test]
    fn test_snapshot_is_pure_and_deterministic() {
        let mut state = KnowledgeState::new(Seen::default()).with_seed("note", "Barbara left.");
        state.merge(1, &"A".to_string(), &1, "", Some("X"));
        let a = state.snapshot();
        let b = state.snapshot();
        assert_eq!(a, b);
        assert_eq!(state.history().len(), 1);
        assert!(a.contains("<note>\nBarbara left.\n</note>"));
        assert!(a.contains("  - X"));
        assert!(a.contains("step 1: visited A"));
    }

    #[test]
    fn test_snapshot_history_window() {
        let mut state = KnowledgeState::new(Seen::default()).with_history_window(2);
        for i in 1..=5 {
            state.record(i, format!("note {}", i), "");
        }
        let snap = state.snapshot();
        assert!(snap.contains("history (last 2 of 5)"));
        assert!(!snap.contains("note 3"));
        assert!(snap.contains("note 4"));
        assert!(snap.contains("note 5"));
        assert_eq!(state.history().len(), 5);
    }
}
