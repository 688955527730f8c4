//! 任务服务（hub）：关系查询、答案校验、数据下载

pub mod client;
pub mod http;

pub use client::{HubClient, HubReply};
pub use http::HttpHub;
