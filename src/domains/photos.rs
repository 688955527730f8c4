//! 图片修复与人物描述
//!
//! 校验方持有一组照片，可以对单张照片执行 DARKEN / REPAIR / BRIGHTEN，回复里带出新生成的文件名。
//! 每种变换在一张图上最多占一个槽位，重复执行覆盖旧结果。
//! DESCRIBE 用视觉模型描述单张图；CHECK 汇总多张图生成描述并提交，回复里的 hints 进入下一轮提示。

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use schemars::JsonSchema;
use serde::Deserialize;

use crate::config::PhotosSection;
use crate::core::AgentError;
use crate::hub::{HubClient, HubReply};
use crate::knowledge::{KnowledgeState, Registry};
use crate::llm::{ImageInput, LlmClient, MediaAnalyzer, Message};
use crate::react::{decode_json, ActionKind, Decision, ToolResult, Toolset};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    Darken,
    Repair,
    Brighten,
}

impl Transform {
    pub fn command(self) -> &'static str {
        match self {
            Transform::Darken => "DARKEN",
            Transform::Repair => "REPAIR",
            Transform::Brighten => "BRIGHTEN",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhotoAction {
    Transform { kind: Transform, filename: String },
    Describe { filename: String },
    Check { filenames: Vec<String> },
    Reason,
}

impl PhotoAction {
    fn filenames(&self) -> Vec<&str> {
        match self {
            PhotoAction::Transform { filename, .. } | PhotoAction::Describe { filename } => {
                vec![filename.as_str()]
            }
            PhotoAction::Check { filenames } => filenames.iter().map(String::as_str).collect(),
            PhotoAction::Reason => Vec::new(),
        }
    }
}

impl ActionKind for PhotoAction {
    fn tag(&self) -> &'static str {
        match self {
            PhotoAction::Transform { kind, .. } => kind.command(),
            PhotoAction::Describe { .. } => "DESCRIBE",
            PhotoAction::Check { .. } => "CHECK",
            PhotoAction::Reason => "REASON",
        }
    }

    fn describe(&self) -> String {
        match self {
            PhotoAction::Reason => "REASON".to_string(),
            other => format!("{} {}", other.tag(), other.filenames().join(", ")),
        }
    }
}

/// Oracle 输出的原始 JSON
#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RawPhotoDecision {
    #[serde(default)]
    pub thinking: String,
    /// "DARKEN" | "REPAIR" | "BRIGHTEN" | "DESCRIBE" | "CHECK" | "REASON"
    pub next_tool: String,
    /// 变换与 DESCRIBE 恰好一个文件，CHECK 至少一个
    #[serde(default)]
    pub filenames: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaResource {
    pub filename: String,
    pub source_url: String,
    pub local_path: PathBuf,
    pub description: Option<String>,
    /// 变换槽位：指向变换生成的另一张图
    pub darkened: Option<String>,
    pub repaired: Option<String>,
    pub brightened: Option<String>,
}

impl MediaResource {
    pub fn new(filename: impl Into<String>, source_url: impl Into<String>, local_path: PathBuf) -> Self {
        Self {
            filename: filename.into(),
            source_url: source_url.into(),
            local_path,
            description: None,
            darkened: None,
            repaired: None,
            brightened: None,
        }
    }

    pub fn slot(&self, kind: Transform) -> Option<&str> {
        match kind {
            Transform::Darken => self.darkened.as_deref(),
            Transform::Repair => self.repaired.as_deref(),
            Transform::Brighten => self.brightened.as_deref(),
        }
    }

    fn slot_mut(&mut self, kind: Transform) -> &mut Option<String> {
        match kind {
            Transform::Darken => &mut self.darkened,
            Transform::Repair => &mut self.repaired,
            Transform::Brighten => &mut self.brightened,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhotoOutput {
    /// 变换后校验方回复的文本与其中出现的新图片
    Transformed {
        message: String,
        images: Vec<MediaResource>,
    },
    Described(String),
    Checked {
        description: String,
        message: String,
        hints: Vec<String>,
        images: Vec<MediaResource>,
    },
    Note,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhotoRegistry {
    images: BTreeMap<String, MediaResource>,
    hints: Vec<String>,
}

impl PhotoRegistry {
    pub fn new(images: Vec<MediaResource>, hints: Vec<String>) -> Self {
        let mut registry = Self {
            images: BTreeMap::new(),
            hints,
        };
        registry.add_images(images);
        registry
    }

    pub fn get(&self, filename: &str) -> Option<&MediaResource> {
        self.images.get(filename)
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn hints(&self) -> &[String] {
        &self.hints
    }

    /// 新发现的图片；已知文件名保留原记录（描述与槽位不丢）
    fn add_images(&mut self, images: Vec<MediaResource>) {
        for image in images {
            self.images.entry(image.filename.clone()).or_insert(image);
        }
    }
}

impl Registry for PhotoRegistry {
    type Action = PhotoAction;
    type Output = PhotoOutput;

    fn apply(&mut self, action: &PhotoAction, output: &PhotoOutput) -> String {
        match (action, output) {
            (PhotoAction::Transform { kind, filename }, PhotoOutput::Transformed { message, images }) => {
                let derived = images
                    .iter()
                    .find(|i| i.filename != *filename)
                    .map(|i| i.filename.clone());
                self.add_images(images.clone());
                if let Some(resource) = self.images.get_mut(filename) {
                    *resource.slot_mut(*kind) = derived.clone();
                }
                format!(
                    "{} {} -> {} ({})",
                    kind.command(),
                    filename,
                    derived.as_deref().unwrap_or("no new image"),
                    message.trim()
                )
            }
            (PhotoAction::Describe { filename }, PhotoOutput::Described(text)) => {
                if let Some(resource) = self.images.get_mut(filename) {
                    resource.description = Some(text.clone());
                }
                format!("DESCRIBE {}: {}", filename, text)
            }
            (
                PhotoAction::Check { filenames },
                PhotoOutput::Checked {
                    description,
                    message,
                    hints,
                    images,
                },
            ) => {
                self.add_images(images.clone());
                if !hints.is_empty() {
                    self.hints = hints.clone();
                }
                format!(
                    "CHECK {} -> {} | submitted: {} | hints: {}",
                    filenames.join(", "),
                    message.trim(),
                    description,
                    hints.join(", ")
                )
            }
            (action, _) => format!("analysis ({})", action.describe()),
        }
    }

    fn render(&self) -> String {
        let mut out = String::from("images:\n");
        if self.images.is_empty() {
            out.push_str("  (none)\n");
        }
        for image in self.images.values() {
            let _ = writeln!(out, "  - filename: {}", image.filename);
            for kind in [Transform::Darken, Transform::Repair, Transform::Brighten] {
                if let Some(derived) = image.slot(kind) {
                    let _ = writeln!(out, "    {}: {}", kind.command().to_lowercase(), derived);
                }
            }
            if let Some(description) = &image.description {
                let _ = writeln!(out, "    description: {}", description);
            }
        }
        let _ = writeln!(out, "hints: [{}]", self.hints.join(", "));
        out
    }
}

fn image_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"IMG_\d+(_[A-Z0-9]+)?").expect("valid image pattern"))
}

/// 从校验方回复中提取图片文件名（`IMG_123` / `IMG_123_ABC` -> `IMG_123-small.png`），保持出现顺序去重
pub fn extract_filenames(message: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    image_pattern()
        .find_iter(message)
        .map(|m| format!("{}-small.png", m.as_str()))
        .filter(|name| seen.insert(name.clone()))
        .collect()
}

/// Oracle 给出的文件名统一成登记表里的 key
fn canonical_filename(raw: &str) -> String {
    let raw = raw.trim();
    match image_pattern().find(raw) {
        Some(m) => format!("{}-small.png", m.as_str()),
        None => raw.to_string(),
    }
}

pub struct PhotoToolset {
    hub: Arc<dyn HubClient>,
    llm: Arc<dyn LlmClient>,
    analyzer: Arc<dyn MediaAnalyzer>,
    section: PhotosSection,
    work_dir: PathBuf,
}

impl PhotoToolset {
    pub fn new(
        hub: Arc<dyn HubClient>,
        llm: Arc<dyn LlmClient>,
        analyzer: Arc<dyn MediaAnalyzer>,
        section: PhotosSection,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            hub,
            llm,
            analyzer,
            section,
            work_dir: work_dir.into(),
        }
    }

    /// 下载回复里提到的图片；单张失败只记日志
    async fn collect_images(&self, message: &str) -> Vec<MediaResource> {
        let mut images = Vec::new();
        for filename in extract_filenames(message) {
            let url = self
                .hub
                .url_for(&format!("{}{}", self.section.image_path, filename));
            let local_path = self.work_dir.join("photos").join(&filename);
            match self.hub.download(&url, &local_path).await {
                Ok(()) => images.push(MediaResource::new(filename, url, local_path)),
                Err(e) => tracing::warn!(file = %filename, error = %e, "image download failed"),
            }
        }
        images
    }

    async fn load_images(
        &self,
        filenames: &[&str],
        registry: &PhotoRegistry,
    ) -> Result<Vec<ImageInput>, AgentError> {
        let mut inputs = Vec::with_capacity(filenames.len());
        for filename in filenames {
            let resource = registry
                .get(filename)
                .ok_or_else(|| AgentError::ToolTransient(format!("unknown image {}", filename)))?;
            let bytes = tokio::fs::read(&resource.local_path).await?;
            inputs.push(ImageInput::from_filename(bytes, filename));
        }
        Ok(inputs)
    }

    async fn translate(&self, text: &str) -> Result<String, AgentError> {
        let Some(language) = self.section.answer_language.as_deref().filter(|l| !l.is_empty()) else {
            return Ok(text.to_string());
        };
        let prompt = format!(
            "Translate the following text to {}, return only the translated text:\n{}",
            language, text
        );
        self.llm
            .complete(&[Message::user(prompt)])
            .await
            .map(|t| t.trim().to_string())
            .map_err(|e| AgentError::ToolTransient(format!("translation: {}", e)))
    }
}

#[async_trait]
impl Toolset for PhotoToolset {
    type Action = PhotoAction;
    type Output = PhotoOutput;
    type Registry = PhotoRegistry;

    fn name(&self) -> &'static str {
        "photos"
    }

    fn goal(&self) -> String {
        self.section.goal.clone()
    }

    fn system_prompt(&self) -> String {
        format!(
            r#"You are analyzing a set of photos to identify a person and prepare her detailed description.
Some photos are damaged, too dark or too bright. You have these tools:
- DARKEN - darken the image (exactly one filename)
- REPAIR - repair the image (exactly one filename)
- BRIGHTEN - brighten the image (exactly one filename)
- DESCRIBE - describe what is visible in the image (exactly one filename)
- CHECK - prepare a description from several images and submit it for verification (one or more filenames)
- REASON - think about what you know, no tool is called

Rules:
- Use only filenames listed in the state.
- A transform produces a new image; transforming the same image again replaces the previous result.
- Use the hints from the last verification to decide which images to improve or describe.

Return exactly one JSON object matching this schema, without markdown or any other text:
{}"#,
            super::decision_schema::<RawPhotoDecision>()
        )
    }

    fn answer_action(&self) -> &'static str {
        "CHECK"
    }

    async fn bootstrap(&self) -> Result<KnowledgeState<PhotoRegistry>, AgentError> {
        let reply = self
            .hub
            .report(&self.section.task, serde_json::Value::String("START".into()))
            .await
            .map_err(|e| AgentError::Bootstrap(format!("start report: {}", e)))?;
        let images = self.collect_images(&reply.message).await;
        if images.is_empty() {
            return Err(AgentError::Bootstrap(format!(
                "no images in start reply: {}",
                reply.message
            )));
        }
        tracing::info!(images = images.len(), "photos downloaded");
        Ok(KnowledgeState::new(PhotoRegistry::new(images, reply.hints.clone()))
            .with_seed("start_report", reply.message))
    }

    fn decode(&self, raw: &str) -> Result<Decision<PhotoAction>, AgentError> {
        let parsed: RawPhotoDecision = decode_json(raw)?;
        let tool = parsed.next_tool.trim().to_uppercase();
        let filenames: Vec<String> = parsed
            .filenames
            .iter()
            .map(|f| canonical_filename(f))
            .filter(|f| !f.is_empty())
            .collect();

        let single = |filenames: Vec<String>| -> Result<String, AgentError> {
            match <[String; 1]>::try_from(filenames) {
                Ok([filename]) => Ok(filename),
                Err(v) => Err(AgentError::invalid(
                    tool.clone(),
                    format!("expected exactly one filename, got {}", v.len()),
                )),
            }
        };

        let action = match tool.as_str() {
            "DARKEN" => PhotoAction::Transform {
                kind: Transform::Darken,
                filename: single(filenames)?,
            },
            "REPAIR" => PhotoAction::Transform {
                kind: Transform::Repair,
                filename: single(filenames)?,
            },
            "BRIGHTEN" => PhotoAction::Transform {
                kind: Transform::Brighten,
                filename: single(filenames)?,
            },
            "DESCRIBE" => PhotoAction::Describe {
                filename: single(filenames)?,
            },
            "CHECK" => {
                if filenames.is_empty() {
                    return Err(AgentError::invalid("CHECK", "no filenames"));
                }
                PhotoAction::Check { filenames }
            }
            "REASON" => PhotoAction::Reason,
            _ => return Err(AgentError::UnknownAction(parsed.next_tool)),
        };
        Ok(Decision::new(action, parsed.thinking))
    }

    fn skip_reason(&self, action: &PhotoAction, registry: &PhotoRegistry) -> Option<String> {
        let unknown: Vec<&str> = action
            .filenames()
            .into_iter()
            .filter(|f| registry.get(f).is_none())
            .collect();
        (!unknown.is_empty()).then(|| format!("unknown image {}", unknown.join(", ")))
    }

    async fn invoke(
        &self,
        decision: &Decision<PhotoAction>,
        registry: &PhotoRegistry,
    ) -> Result<ToolResult<PhotoOutput>, AgentError> {
        match &decision.action {
            PhotoAction::Transform { kind, filename } => {
                let command = format!("{} {}", kind.command(), filename);
                let reply = self
                    .hub
                    .report(&self.section.task, serde_json::Value::String(command))
                    .await?;
                let images = self.collect_images(&reply.message).await;
                Ok(ToolResult::new(
                    reply.raw,
                    PhotoOutput::Transformed {
                        message: reply.message,
                        images,
                    },
                ))
            }
            PhotoAction::Describe { filename } => {
                let inputs = self.load_images(&[filename.as_str()], registry).await?;
                let prompt = format!(
                    "Provide a detailed description of the person in the image, please focus on: {}",
                    registry.hints().join(", ")
                );
                let text = self
                    .analyzer
                    .describe_images(&prompt, &inputs)
                    .await
                    .map_err(AgentError::ToolTransient)?;
                Ok(ToolResult::new("", PhotoOutput::Described(text.trim().to_string())))
            }
            PhotoAction::Check { filenames } => {
                let names: Vec<&str> = filenames.iter().map(String::as_str).collect();
                let inputs = self.load_images(&names, registry).await?;
                let prompt = format!(
                    "Prepare a detailed description of the person, focus especially on distinctive features: {}",
                    registry.hints().join(", ")
                );
                let description = self
                    .analyzer
                    .describe_images(&prompt, &inputs)
                    .await
                    .map_err(AgentError::ToolTransient)?;
                let description = self.translate(description.trim()).await?;
                let reply: HubReply = self
                    .hub
                    .report(&self.section.task, serde_json::Value::String(description.clone()))
                    .await?;
                let images = self.collect_images(&reply.message).await;
                Ok(ToolResult::new(
                    reply.raw,
                    PhotoOutput::Checked {
                        description: description.clone(),
                        message: reply.message,
                        hints: reply.hints,
                        images,
                    },
                )
                .with_submitted(description))
            }
            PhotoAction::Reason => Ok(ToolResult::new("", PhotoOutput::Note)),
        }
    }
}
