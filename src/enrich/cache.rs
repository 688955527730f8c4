//! 媒体分析结果的磁盘缓存
//!
//! key 为资源字节的 SHA-256（hex），加上分析类型前缀；写穿，不淘汰，不失效。

use std::path::PathBuf;

use sha2::{Digest, Sha256};

use crate::core::AgentError;

#[derive(Debug, Clone)]
pub struct AnalysisCache {
    dir: PathBuf,
}

impl AnalysisCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// 内容哈希：同样的字节总是得到同样的 key
    pub fn key(kind: &str, bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        format!("{}-{}", kind, hex::encode(hasher.finalize()))
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.txt", key))
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        tokio::fs::read_to_string(self.path_for(key)).await.ok()
    }

    pub async fn put(&self, key: &str, text: &str) -> Result<(), AgentError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(self.path_for(key), text).await?;
        Ok(())
    }
}
