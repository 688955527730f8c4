//! 网站爬取问答
//!
//! 从起始页出发逐页 FETCH，页面转成文本并提取链接；每个 URL 只访问一次。
//! ANSWER 把问题编号到答案的映射提交给校验方，未通过时校验方的回复写回快照。

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use schemars::JsonSchema;
use serde::Deserialize;
use url::Url;

use crate::config::CrawlSection;
use crate::core::AgentError;
use crate::enrich::{discover_media, Enricher};
use crate::hub::HubClient;
use crate::knowledge::{KnowledgeState, Registry};
use crate::react::{decode_json, ActionKind, Decision, ToolResult, Toolset};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrawlAction {
    Fetch { url: String },
    Answer { answers: BTreeMap<String, String> },
    Reason,
}

/// 答案映射的规范文本（key 有序），同时用于提交记录与已拒绝判定
pub fn answers_key(answers: &BTreeMap<String, String>) -> String {
    serde_json::to_string(answers).unwrap_or_default()
}

impl ActionKind for CrawlAction {
    fn tag(&self) -> &'static str {
        match self {
            CrawlAction::Fetch { .. } => "FETCH",
            CrawlAction::Answer { .. } => "ANSWER",
            CrawlAction::Reason => "REASON",
        }
    }

    fn describe(&self) -> String {
        match self {
            CrawlAction::Fetch { url } => format!("FETCH {}", url),
            CrawlAction::Answer { answers } => format!("ANSWER {}", answers_key(answers)),
            CrawlAction::Reason => "REASON".to_string(),
        }
    }

    fn submitted_answer(&self) -> Option<String> {
        match self {
            CrawlAction::Answer { answers } => Some(answers_key(answers)),
            _ => None,
        }
    }
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct RawCrawlParameters {
    /// FETCH：要下载的页面（可为相对地址）
    #[serde(default)]
    pub url: Option<String>,
    /// ANSWER：问题编号 -> 答案
    #[serde(default)]
    pub answer: Option<BTreeMap<String, String>>,
}

/// Oracle 输出的原始 JSON
#[derive(Debug, Deserialize, JsonSchema)]
pub struct RawCrawlDecision {
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub execution_plan: String,
    /// "FETCH" | "ANSWER" | "REASON"
    pub tool: String,
    /// 问题编号 -> 当前猜测的答案与理由
    #[serde(default)]
    pub possible_answers: Option<serde_json::Value>,
    #[serde(default)]
    pub parameters: RawCrawlParameters,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRecord {
    pub url: String,
    pub outbound_links: Vec<String>,
    pub visited: bool,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrawlOutput {
    Page {
        url: String,
        content: String,
        links: Vec<String>,
    },
    Verdict(String),
    Note,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SiteMap {
    questions: BTreeMap<String, String>,
    pages: BTreeMap<String, PageRecord>,
    latest: Option<String>,
    last_verdict: Option<String>,
}

impl SiteMap {
    pub fn new(questions: BTreeMap<String, String>, start_url: &str) -> Self {
        let mut map = Self {
            questions,
            ..Self::default()
        };
        map.discover(start_url);
        map
    }

    pub fn page(&self, url: &str) -> Option<&PageRecord> {
        self.pages.get(url)
    }

    pub fn is_visited(&self, url: &str) -> bool {
        self.page(url).map(|p| p.visited).unwrap_or(false)
    }

    pub fn last_verdict(&self) -> Option<&str> {
        self.last_verdict.as_deref()
    }

    fn discover(&mut self, url: &str) {
        self.pages
            .entry(url.to_string())
            .or_insert_with(|| PageRecord {
                url: url.to_string(),
                outbound_links: Vec::new(),
                visited: false,
                content: String::new(),
            });
    }
}

impl Registry for SiteMap {
    type Action = CrawlAction;
    type Output = CrawlOutput;

    fn apply(&mut self, action: &CrawlAction, output: &CrawlOutput) -> String {
        match (action, output) {
            (_, CrawlOutput::Page {
                url,
                content,
                links,
            }) => {
                for link in links {
                    self.discover(link);
                }
                self.pages.insert(
                    url.clone(),
                    PageRecord {
                        url: url.clone(),
                        outbound_links: links.clone(),
                        visited: true,
                        content: content.clone(),
                    },
                );
                self.latest = Some(url.clone());
                format!("fetched {} ({} links)", url, links.len())
            }
            (CrawlAction::Answer { answers }, CrawlOutput::Verdict(message)) => {
                self.last_verdict = Some(message.clone());
                format!("answered {} -> {}", answers_key(answers), message)
            }
            (action, _) => format!("analysis ({})", action.describe()),
        }
    }

    fn render(&self) -> String {
        let mut out = String::from("questions:\n");
        for (id, question) in &self.questions {
            let _ = writeln!(out, "  {}: {}", id, question);
        }
        out.push_str("pages:\n");
        for page in self.pages.values() {
            let _ = writeln!(
                out,
                "  - url: {}\n    visited: {}",
                page.url, page.visited
            );
            if !page.outbound_links.is_empty() {
                let _ = writeln!(out, "    links: [{}]", page.outbound_links.join(", "));
            }
        }
        if let Some(page) = self.latest.as_deref().and_then(|u| self.pages.get(u)) {
            let _ = writeln!(out, "latest_page: {}\n<content>\n{}\n</content>", page.url, page.content.trim());
        }
        if let Some(verdict) = &self.last_verdict {
            let _ = writeln!(out, "last_answer_result: {}", verdict);
        }
        out
    }
}

fn link_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#"<a[^>]*\shref="([^"]+)""#).expect("valid link pattern"))
}

/// 规范化页面地址：按 base 解析并去掉 fragment；只接受 http(s)
pub fn resolve_url(base: &Url, href: &str) -> Option<String> {
    let mut url = base.join(href.trim()).ok()?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return None;
    }
    url.set_fragment(None);
    Some(url.to_string())
}

/// 提取页面中的 `<a href>`，保持顺序去重
pub fn extract_links(html: &str, page: &Url) -> Vec<String> {
    let mut seen = BTreeSet::new();
    link_pattern()
        .captures_iter(html)
        .filter_map(|cap| resolve_url(page, &cap[1]))
        .filter(|url| seen.insert(url.clone()))
        .collect()
}

/// HTML 转文本并截断
pub fn page_text(html: &str, max_chars: usize) -> String {
    let text = match html2text::from_read(html.as_bytes(), 120) {
        Ok(text) if !text.trim().is_empty() => text,
        _ => html.to_string(),
    };
    text.chars().take(max_chars).collect()
}

pub struct CrawlToolset {
    hub: Arc<dyn HubClient>,
    enricher: Option<Enricher>,
    section: CrawlSection,
    start: Url,
    /// 带媒体增强时只对页面下载计时
    fetch_timeout: Duration,
}

impl CrawlToolset {
    pub fn new(
        hub: Arc<dyn HubClient>,
        enricher: Option<Enricher>,
        section: CrawlSection,
    ) -> Result<Self, AgentError> {
        let start = Url::parse(&section.start_url)
            .map_err(|e| AgentError::ConfigError(format!("crawl.start_url: {}", e)))?;
        Ok(Self {
            hub,
            enricher,
            section,
            start,
            fetch_timeout: Duration::from_secs(60),
        })
    }

    pub fn with_fetch_timeout(mut self, secs: u64) -> Self {
        self.fetch_timeout = Duration::from_secs(secs);
        self
    }

    fn start_url(&self) -> String {
        let mut url = self.start.clone();
        url.set_fragment(None);
        url.to_string()
    }
}

#[async_trait]
impl Toolset for CrawlToolset {
    type Action = CrawlAction;
    type Output = CrawlOutput;
    type Registry = SiteMap;

    fn name(&self) -> &'static str {
        "crawl"
    }

    fn goal(&self) -> String {
        format!(
            "Answer the questions based only on the content available on {}.",
            self.start_url()
        )
    }

    fn system_prompt(&self) -> String {
        format!(
            r#"Your job is to answer the questions from the user. You can use the following tools:
- FETCH - downloads the page at the given URL and adds its text and links to the state.
  Parameters: url
- ANSWER - submit answers for all questions at once.
  Parameters: answer, a map from question id ("01", "02", ...) to the answer
- REASON - think about what you know, no tool is called

RULES
- Answer only based on data available in the state, do not use your own knowledge.
- Use tools until you have answers to all the questions.
- Pages marked visited: true are already in the state; fetch unvisited links instead.
- Never repeat answers listed in rejected_answers.
- Keep possible_answers up to date with your current best guesses.

Return exactly one JSON object matching this schema, without markdown or any other text:
{}"#,
            super::decision_schema::<RawCrawlDecision>()
        )
    }

    fn answer_action(&self) -> &'static str {
        "ANSWER"
    }

    async fn bootstrap(&self) -> Result<KnowledgeState<SiteMap>, AgentError> {
        let url = self.hub.url_for(&self.section.questions_path);
        let body = self
            .hub
            .fetch_text(&url)
            .await
            .map_err(|e| AgentError::Bootstrap(format!("questions: {}", e)))?;
        let questions: BTreeMap<String, String> = serde_json::from_str(&body)
            .map_err(|e| AgentError::Bootstrap(format!("questions are not a JSON map: {}", e)))?;
        tracing::info!(questions = questions.len(), "question set downloaded");
        Ok(KnowledgeState::new(SiteMap::new(questions, &self.start_url())))
    }

    fn decode(&self, raw: &str) -> Result<Decision<CrawlAction>, AgentError> {
        let parsed: RawCrawlDecision = decode_json(raw)?;
        let action = match parsed.tool.trim().to_uppercase().as_str() {
            "FETCH" => {
                let href = parsed
                    .parameters
                    .url
                    .as_deref()
                    .filter(|u| !u.trim().is_empty())
                    .ok_or_else(|| AgentError::invalid("FETCH", "missing url"))?;
                let url = resolve_url(&self.start, href)
                    .ok_or_else(|| AgentError::invalid("FETCH", format!("bad url {}", href)))?;
                CrawlAction::Fetch { url }
            }
            "ANSWER" => {
                let answers: BTreeMap<String, String> = parsed
                    .parameters
                    .answer
                    .unwrap_or_default()
                    .into_iter()
                    .map(|(id, answer)| (id.trim().to_string(), answer.trim().to_string()))
                    .collect();
                if answers.is_empty() {
                    return Err(AgentError::invalid("ANSWER", "missing answer map"));
                }
                CrawlAction::Answer { answers }
            }
            "REASON" => CrawlAction::Reason,
            _ => return Err(AgentError::UnknownAction(parsed.tool)),
        };

        let mut rationale = parsed.reasoning.trim().to_string();
        if !parsed.execution_plan.trim().is_empty() {
            let _ = write!(rationale, " | plan: {}", parsed.execution_plan.trim());
        }
        if let Some(guesses) = parsed.possible_answers.filter(|v| !v.is_null()) {
            let _ = write!(rationale, " | possible answers: {}", guesses);
        }
        let candidate = action.submitted_answer();
        Ok(Decision::new(action, rationale).with_candidate(candidate))
    }

    /// 媒体增强的 worker 不受整体超时取消，页面保留成功的部分
    fn bounded(&self, action: &CrawlAction) -> bool {
        !(self.enricher.is_some() && matches!(action, CrawlAction::Fetch { .. }))
    }

    fn skip_reason(&self, action: &CrawlAction, registry: &SiteMap) -> Option<String> {
        match action {
            CrawlAction::Fetch { url } if registry.is_visited(url) => {
                Some(format!("{} was already visited", url))
            }
            _ => None,
        }
    }

    async fn invoke(
        &self,
        decision: &Decision<CrawlAction>,
        _registry: &SiteMap,
    ) -> Result<ToolResult<CrawlOutput>, AgentError> {
        match &decision.action {
            CrawlAction::Fetch { url } => {
                let html = tokio::time::timeout(self.fetch_timeout, self.hub.fetch_text(url))
                    .await
                    .map_err(|_| AgentError::ToolTimeout(decision.action.describe()))??;
                let page = Url::parse(url).map_err(|e| AgentError::invalid("FETCH", e.to_string()))?;
                let links = extract_links(&html, &page);
                let mut content = page_text(&html, self.section.max_page_chars);
                if let Some(enricher) = &self.enricher {
                    let media = discover_media(&html, &page);
                    if !media.is_empty() {
                        tracing::info!(url = %url, resources = media.len(), "enriching page media");
                        for note in enricher.enrich(media).await {
                            content.push_str("\n\n");
                            content.push_str(&note.render());
                        }
                    }
                }
                Ok(ToolResult::new(
                    html,
                    CrawlOutput::Page {
                        url: url.clone(),
                        content,
                        links,
                    },
                ))
            }
            CrawlAction::Answer { answers } => {
                let payload = serde_json::to_value(answers)
                    .map_err(|e| AgentError::invalid("ANSWER", e.to_string()))?;
                let reply = self.hub.report(&self.section.task, payload).await?;
                Ok(ToolResult::new(reply.raw, CrawlOutput::Verdict(reply.message))
                    .with_submitted(answers_key(answers)))
            }
            CrawlAction::Reason => Ok(ToolResult::new("", CrawlOutput::Note)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::HttpHub;

    fn toolset() -> CrawlToolset {
        CrawlToolset::new(
            Arc::new(HttpHub::new("http://hub", "k", 1)),
            None,
            CrawlSection {
                start_url: "https://site.test".into(),
                ..CrawlSection::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn test_extract_links_resolves_and_dedups() {
        let page = Url::parse("https://site.test/blog/").unwrap();
        let html = r##"<a href="/about">About</a> <a class="x" href="post-1#top">1</a>
            <a href="mailto:a@b.c">mail</a> <a href="https://site.test/about">again</a>"##;
        assert_eq!(
            extract_links(html, &page),
            vec![
                "https://site.test/about".to_string(),
                "https://site.test/blog/post-1".to_string(),
            ]
        );
    }

    #[test]
    fn test_page_text_truncates() {
        let text = page_text("<html><body><p>Hello world</p></body></html>", 5);
        assert_eq!(text, "Hello");
    }

    #[test]
    fn test_decode_fetch_resolves_relative() {
        let d = toolset()
            .decode(r#"{"reasoning":"need contact","execution_plan":"open portfolio","tool":"FETCH","parameters":{"url":"/portfolio"}}"#)
            .unwrap();
        assert_eq!(
            d.action,
            CrawlAction::Fetch {
                url: "https://site.test/portfolio".into()
            }
        );
        assert!(d.rationale.contains("plan: open portfolio"));
    }

    #[test]
    fn test_decode_answer_and_errors() {
        let ts = toolset();
        let d = ts
            .decode(r#"{"tool":"ANSWER","possible_answers":{"01":"x"},"parameters":{"answer":{"02":" b ","01":"a"}}}"#)
            .unwrap();
        assert_eq!(d.candidate_answer.as_deref(), Some(r#"{"01":"a","02":"b"}"#));
        assert!(d.rationale.contains("possible answers"));
        assert!(matches!(
            ts.decode(r#"{"tool":"FETCH","parameters":{}}"#),
            Err(AgentError::InvalidParameters { .. })
        ));
        assert!(matches!(
            ts.decode(r#"{"tool":"ANSWER"}"#),
            Err(AgentError::InvalidParameters { .. })
        ));
        assert!(matches!(
            ts.decode(r#"{"tool":"SEARCH"}"#),
            Err(AgentError::UnknownAction(_))
        ));
    }

    #[test]
    fn test_apply_page_marks_visited_and_discovers_links() {
        let ts = toolset();
        let mut map = SiteMap::new(BTreeMap::from([("01".into(), "Email?".into())]), "https://site.test/");
        let fetch = CrawlAction::Fetch {
            url: "https://site.test/".into(),
        };
        assert!(ts.skip_reason(&fetch, &map).is_none());
        map.apply(
            &fetch,
            &CrawlOutput::Page {
                url: "https://site.test/".into(),
                content: "Welcome".into(),
                links: vec!["https://site.test/contact".into()],
            },
        );
        assert!(ts.skip_reason(&fetch, &map).is_some());
        assert!(!map.is_visited("https://site.test/contact"));
        let rendered = map.render();
        assert!(rendered.contains("01: Email?"));
        assert!(rendered.contains("links: [https://site.test/contact]"));
        assert!(rendered.contains("Welcome"));

        map.apply(
            &CrawlAction::Answer {
                answers: BTreeMap::from([("01".into(), "a@b.c".into())]),
            },
            &CrawlOutput::Verdict("Answer for question 01 is incorrect".into()),
        );
        assert_eq!(map.last_verdict(), Some("Answer for question 01 is incorrect"));
    }
}
