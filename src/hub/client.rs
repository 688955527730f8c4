//! 任务服务（hub）抽象
//!
//! 关系查询（/people、/places）、答案校验（/report）、以及数据下载都经过 HubClient；
//! 测试中用计数 stub 替换，生产中用 HttpHub。

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::AgentError;

/// hub 的统一回复：`{code, message, hints?}`，raw 保留完整响应体用于哨兵检测
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HubReply {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub hints: Vec<String>,
    #[serde(skip)]
    pub raw: String,
}

impl HubReply {
    /// 解析响应体；非 JSON 时把整段文本当作 message
    pub fn parse(body: &str) -> Self {
        match serde_json::from_str::<HubReply>(body) {
            Ok(mut reply) => {
                reply.raw = body.to_string();
                reply
            }
            Err(_) => Self {
                code: 0,
                message: body.to_string(),
                hints: Vec::new(),
                raw: body.to_string(),
            },
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == 0
    }
}

#[async_trait]
pub trait HubClient: Send + Sync {
    /// POST {base}{endpoint} `{apikey, query}`；code 非 0 视为失败
    async fn query(&self, endpoint: &str, query: &str) -> Result<HubReply, AgentError>;

    /// POST {base}/report `{apikey, task, answer}`；答案被拒时仍返回 Ok（由调用方判定）
    async fn report(&self, task: &str, answer: serde_json::Value) -> Result<HubReply, AgentError>;

    async fn fetch_text(&self, url: &str) -> Result<String, AgentError>;

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, AgentError>;

    fn base_url(&self) -> &str;

    fn api_key(&self) -> &str;

    /// 下载到本地文件（父目录不存在时创建）
    async fn download(&self, url: &str, dest: &Path) -> Result<(), AgentError> {
        let bytes = self.fetch_bytes(url).await?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(dest, bytes).await?;
        Ok(())
    }

    /// 相对路径拼到 base_url 之后，绝对 URL 原样返回
    fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        let path = path.replace("{apikey}", self.api_key());
        format!(
            "{}/{}",
            self.base_url().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}
