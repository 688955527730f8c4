//! Sleuth - 由 LLM 决策驱动的解谜循环
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型与恢复策略
//! - **domains**: 领域工具插件（实体图调查 / 图片修复识别 / 网站爬取问答）
//! - **enrich**: 页面媒体并发分析与内容哈希缓存
//! - **hub**: 任务服务客户端（关系查询、答案校验、数据下载）
//! - **knowledge**: 知识状态、规范化、历史与已拒绝答案
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / 脚本化 Mock）
//! - **react**: Oracle、决策、分发、终止判定、主循环

pub mod config;
pub mod core;
pub mod domains;
pub mod enrich;
pub mod hub;
pub mod knowledge;
pub mod llm;
pub mod observability;
pub mod react;

pub use react::{LoopController, LoopSettings, RunReport, RunStatus};
