//! 终止判定与强制作答策略
//!
//! - 成功：工具原始响应中出现固定哨兵子串
//! - 预算：迭代序号到达上限
//! - 强制作答：第 K、2K、... 轮在 prompt 中要求给出答案（软提示，不在本地强制）

/// 强制作答提示的固定前缀，测试与日志按它识别
pub const FORCED_COMMITMENT_MARKER: &str = "IMPORTANT: You must use the";

#[derive(Debug, Clone)]
pub struct TerminationDetector {
    sentinel: String,
}

impl TerminationDetector {
    pub fn new(sentinel: impl Into<String>) -> Self {
        Self {
            sentinel: sentinel.into(),
        }
    }

    pub fn check(&self, raw: &str) -> bool {
        !self.sentinel.is_empty() && raw.contains(&self.sentinel)
    }

    /// iteration 为 1 起的序号
    pub fn exhausted(&self, iteration: usize, max_iterations: usize) -> bool {
        iteration >= max_iterations
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CommitmentPolicy {
    every: usize,
}

impl CommitmentPolicy {
    /// every = 0 关闭强制作答
    pub fn new(every: usize) -> Self {
        Self { every }
    }

    pub fn applies(&self, iteration: usize) -> bool {
        self.every > 0 && iteration % self.every == 0
    }

    pub fn instruction(answer_action: &str) -> String {
        format!(
            "{} '{}' action this turn - make your best guess based on the current information!",
            FORCED_COMMITMENT_MARKER, answer_action
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinel_substring() {
        let d = TerminationDetector::new("{{FLG:");
        assert!(d.check(r#"{"code":0,"message":"{{FLG:ELEKTRYKA}}"}"#));
        assert!(!d.check("FLG without braces"));
        assert!(!d.check(""));
    }

    #[test]
    fn test_empty_sentinel_never_matches() {
        let d = TerminationDetector::new("");
        assert!(!d.check("anything"));
    }

    #[test]
    fn test_budget() {
        let d = TerminationDetector::new("{{FLG:");
        assert!(!d.exhausted(199, 200));
        assert!(d.exhausted(200, 200));
    }

    #[test]
    fn test_policy_applies_iff_multiple() {
        let p = CommitmentPolicy::new(10);
        for i in 1..=45 {
            assert_eq!(p.applies(i), i % 10 == 0, "iteration {i}");
        }
        let off = CommitmentPolicy::new(0);
        assert!(!(1..=50).any(|i| off.applies(i)));
    }
}
