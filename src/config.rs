//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `SLEUTH__*` 覆盖（双下划线表示嵌套，如 `SLEUTH__HUB__API_KEY=...`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub hub: HubSection,
    pub agent: AgentSection,
    pub graph: GraphSection,
    pub photos: PhotosSection,
    pub crawl: CrawlSection,
    pub cache: CacheSection,
}

/// [app] 段：工作目录（下载的图片、笔记等）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub work_dir: PathBuf,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("/tmp/sleuth"),
        }
    }
}

/// [llm] 段：后端选择、模型与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：openai / deepseek
    pub provider: String,
    pub model: String,
    pub vision_model: String,
    pub transcription_model: String,
    pub base_url: Option<String>,
    /// 视觉 / 转写端点（未设置时按 provider 推断）
    pub media_base_url: Option<String>,
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o".to_string(),
            vision_model: "gpt-4o".to_string(),
            transcription_model: "whisper-1".to_string(),
            base_url: None,
            media_base_url: None,
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmTimeoutsSection {
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self { request: 60 }
    }
}

/// [hub] 段：任务服务（关系查询、报告校验、数据下载）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HubSection {
    pub base_url: String,
    pub api_key: String,
    pub timeout_secs: u64,
}

impl Default for HubSection {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            api_key: String::new(),
            timeout_secs: 30,
        }
    }
}

/// [agent] 段：循环控制参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub max_iterations: usize,
    /// 每 K 轮要求 Oracle 给出答案（0 表示关闭）
    pub force_answer_every: usize,
    pub sentinel: String,
    /// 快照中展示的最近历史条数
    pub history_window: usize,
    pub tool_timeout_secs: u64,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            force_answer_every: 10,
            sentinel: "{{FLG:".to_string(),
            history_window: 30,
            tool_timeout_secs: 60,
        }
    }
}

/// [graph] 段：人物 / 地点调查
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GraphSection {
    pub task: String,
    pub note_path: String,
    pub people_endpoint: String,
    pub places_endpoint: String,
    pub goal: String,
}

impl Default for GraphSection {
    fn default() -> Self {
        Self {
            task: "loop".to_string(),
            note_path: "/dane/barbara.txt".to_string(),
            people_endpoint: "/people".to_string(),
            places_endpoint: "/places".to_string(),
            goal: "Find the city where Barbara is currently staying.".to_string(),
        }
    }
}

/// [photos] 段：图片修复与人物描述
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PhotosSection {
    pub task: String,
    /// 图片下载路径前缀（拼在 hub.base_url 之后）
    pub image_path: String,
    pub goal: String,
    /// CHECK 提交前把描述翻译成该语言；为空则不翻译
    pub answer_language: Option<String>,
}

impl Default for PhotosSection {
    fn default() -> Self {
        Self {
            task: "photos".to_string(),
            image_path: "/dane/barbara/".to_string(),
            goal: "Given the images and what is known about them, identify Barbara and prepare her detailed description.".to_string(),
            answer_language: Some("Polish".to_string()),
        }
    }
}

/// [crawl] 段：网站爬取问答
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CrawlSection {
    pub task: String,
    /// 问题集路径，`{apikey}` 会被替换
    pub questions_path: String,
    pub start_url: String,
    pub enrich_media: bool,
    pub max_concurrency: usize,
    pub max_page_chars: usize,
}

impl Default for CrawlSection {
    fn default() -> Self {
        Self {
            task: "softo".to_string(),
            questions_path: "/data/{apikey}/softo.json".to_string(),
            start_url: "https://softo.ag3nts.org".to_string(),
            enrich_media: false,
            max_concurrency: 4,
            max_page_chars: 8000,
        }
    }
}

/// [cache] 段：媒体分析结果缓存目录
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub dir: PathBuf,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("/tmp/sleuth/cache"),
        }
    }
}

/// 从 config 目录加载配置，环境变量 SLEUTH__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 SLEUTH__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("SLEUTH")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.agent.max_iterations, 200);
        assert_eq!(cfg.agent.force_answer_every, 10);
        assert_eq!(cfg.agent.sentinel, "{{FLG:");
        assert_eq!(cfg.graph.people_endpoint, "/people");
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            "[agent]\nmax_iterations = 12\n\n[crawl]\nenrich_media = true\n",
        )
        .unwrap();
        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.agent.max_iterations, 12);
        assert!(cfg.crawl.enrich_media);
        // 未覆盖的键保留默认值
        assert_eq!(cfg.agent.history_window, 30);
    }
}
