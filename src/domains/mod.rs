//! 领域工具插件：实体图调查、图片修复识别、网站爬取问答

pub mod crawl;
pub mod graph;
pub mod photos;

pub use crawl::CrawlToolset;
pub use graph::GraphToolset;
pub use photos::PhotoToolset;

use schemars::JsonSchema;

/// 决策 JSON 的 schema，嵌入 system prompt 让 Oracle 按格式输出
pub(crate) fn decision_schema<T: JsonSchema>() -> String {
    let schema = schemars::schema_for!(T);
    serde_json::to_string_pretty(&schema).unwrap_or_else(|_| "{}".to_string())
}
