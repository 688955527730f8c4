//! 页面媒体增强
//!
//! 发现页面引用的音频 / 图片，每个资源一个任务并发下载并分析（转写 / 描述），
//! Semaphore 限制并发，全部 join 后按发现顺序返回。单个资源失败只记日志并丢弃。

pub mod cache;

pub use cache::AnalysisCache;

use std::collections::BTreeSet;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use url::Url;

use crate::core::AgentError;
use crate::hub::HubClient;
use crate::llm::{ImageInput, MediaAnalyzer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MediaKind {
    Audio,
    Image,
}

impl MediaKind {
    fn label(self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Image => "image",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRef {
    pub kind: MediaKind,
    pub url: String,
}

/// 一个资源的分析结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaNote {
    pub kind: MediaKind,
    pub url: String,
    pub text: String,
}

impl MediaNote {
    pub fn render(&self) -> String {
        format!("[{} {}]\n{}", self.kind.label(), self.url, self.text.trim())
    }
}

fn audio_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"<(?:source|audio)[^>]*\ssrc="([^"]+)""#).expect("valid audio pattern")
    })
}

fn image_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#"<img[^>]*\ssrc="([^"]+)""#).expect("valid image pattern"))
}

/// 找出页面里的音频与图片，相对地址按页面 URL 解析；同一 URL 只保留一次
pub fn discover_media(html: &str, page: &Url) -> Vec<MediaRef> {
    let mut seen = BTreeSet::new();
    let mut refs = Vec::new();
    for (kind, pattern) in [
        (MediaKind::Audio, audio_pattern()),
        (MediaKind::Image, image_pattern()),
    ] {
        for cap in pattern.captures_iter(html) {
            let Ok(url) = page.join(&cap[1]) else {
                continue;
            };
            let url = url.to_string();
            if seen.insert(url.clone()) {
                refs.push(MediaRef { kind, url });
            }
        }
    }
    refs
}

#[derive(Clone)]
pub struct Enricher {
    hub: Arc<dyn HubClient>,
    analyzer: Arc<dyn MediaAnalyzer>,
    cache: Option<AnalysisCache>,
    limit: Arc<Semaphore>,
}

impl Enricher {
    pub fn new(
        hub: Arc<dyn HubClient>,
        analyzer: Arc<dyn MediaAnalyzer>,
        cache: Option<AnalysisCache>,
        max_concurrency: usize,
    ) -> Self {
        Self {
            hub,
            analyzer,
            cache,
            limit: Arc::new(Semaphore::new(max_concurrency.max(1))),
        }
    }

    /// 并发分析所有资源，返回成功的部分（保持输入顺序）
    pub async fn enrich(&self, refs: Vec<MediaRef>) -> Vec<MediaNote> {
        let mut results: Vec<Option<MediaNote>> = vec![None; refs.len()];
        let mut set = JoinSet::new();
        for (idx, media) in refs.into_iter().enumerate() {
            let worker = self.clone();
            set.spawn(async move {
                let outcome = worker.analyze(&media).await;
                (idx, media, outcome)
            });
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((idx, media, Ok(text))) => {
                    results[idx] = Some(MediaNote {
                        kind: media.kind,
                        url: media.url,
                        text,
                    });
                }
                Ok((_, media, Err(e))) => {
                    tracing::warn!(url = %media.url, error = %e, "media analysis failed, skipping");
                }
                Err(e) => tracing::warn!(error = %e, "media worker panicked"),
            }
        }
        results.into_iter().flatten().collect()
    }

    async fn analyze(&self, media: &MediaRef) -> Result<String, AgentError> {
        let _permit = self
            .limit
            .acquire()
            .await
            .map_err(|e| AgentError::ToolTransient(e.to_string()))?;
        let bytes = self.hub.fetch_bytes(&media.url).await?;
        let key = AnalysisCache::key(media.kind.label(), &bytes);
        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.get(&key).await {
                tracing::debug!(url = %media.url, "analysis cache hit");
                return Ok(hit);
            }
        }

        let filename = media.url.rsplit('/').next().unwrap_or("media");
        let text = match media.kind {
            MediaKind::Audio => self.analyzer.transcribe(bytes, filename).await,
            MediaKind::Image => {
                let image = ImageInput::from_filename(bytes, filename);
                self.analyzer
                    .describe_images("Describe everything visible in this image, including any text.", &[image])
                    .await
            }
        }
        .map_err(AgentError::ToolTransient)?;

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.put(&key, &text).await {
                tracing::warn!(url = %media.url, error = %e, "analysis cache write failed");
            }
        }
        Ok(text)
    }
}
