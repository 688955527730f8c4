//! 历史记录与已拒绝答案：都只增不减

use std::collections::BTreeSet;

use serde::Serialize;

/// 单轮叙述，创建后不再修改
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    pub iteration: usize,
    pub narrative: String,
}

/// 校验方判定错误的答案（已规范化），用于阻止重复提交
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RejectedAnswers(BTreeSet<String>);

impl RejectedAnswers {
    pub fn new() -> Self {
        Self::default()
    }

    /// 返回是否为新记录
    pub(crate) fn insert(&mut self, answer: impl Into<String>) -> bool {
        self.0.insert(answer.into())
    }

    pub fn contains(&self, answer: &str) -> bool {
        self.0.contains(answer)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.0.iter()
    }
}
