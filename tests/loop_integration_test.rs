//! 主循环集成测试：脚本化 Oracle + 计数 hub stub，覆盖三个领域

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use sleuth::config::{CrawlSection, GraphSection, PhotosSection};
use sleuth::core::AgentError;
use sleuth::domains::{CrawlToolset, GraphToolset, PhotoToolset};
use sleuth::enrich::Enricher;
use sleuth::hub::{HubClient, HubReply};
use sleuth::knowledge::Registry;
use sleuth::llm::{ImageInput, LlmClient, MediaAnalyzer, ScriptedLlmClient, StaticMediaAnalyzer};
use sleuth::react::{LoopController, LoopSettings, RunStatus, FORCED_COMMITMENT_MARKER};

/// hub stub：按 (endpoint, query) 回复关系查询，按提交内容依次回放报告回复，统计调用次数
#[derive(Default)]
struct FakeHub {
    relations: HashMap<(String, String), String>,
    reports: Mutex<HashMap<String, VecDeque<String>>>,
    pages: HashMap<String, String>,
    query_calls: AtomicUsize,
    report_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
}

impl FakeHub {
    fn relation(mut self, endpoint: &str, query: &str, message: &str) -> Self {
        self.relations
            .insert((endpoint.to_string(), query.to_string()), message.to_string());
        self
    }

    fn report_reply(self, answer: &str, body: Value) -> Self {
        if let Ok(mut reports) = self.reports.lock() {
            reports
                .entry(answer.to_string())
                .or_default()
                .push_back(body.to_string());
        }
        self
    }

    fn page(mut self, url: &str, body: &str) -> Self {
        self.pages.insert(url.to_string(), body.to_string());
        self
    }
}

#[async_trait]
impl HubClient for FakeHub {
    async fn query(&self, endpoint: &str, query: &str) -> Result<HubReply, AgentError> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        match self.relations.get(&(endpoint.to_string(), query.to_string())) {
            Some(message) => Ok(HubReply::parse(
                &json!({"code": 0, "message": message}).to_string(),
            )),
            None => Err(AgentError::ToolTransient(format!("{} {}: code -200", endpoint, query))),
        }
    }

    async fn report(&self, _task: &str, answer: Value) -> Result<HubReply, AgentError> {
        self.report_calls.fetch_add(1, Ordering::SeqCst);
        let key = answer
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| answer.to_string());
        let body = self
            .reports
            .lock()
            .ok()
            .and_then(|mut r| r.get_mut(&key).and_then(|q| q.pop_front()))
            .unwrap_or_else(|| json!({"code": -300, "message": "Wrong answer"}).to_string());
        Ok(HubReply::parse(&body))
    }

    async fn fetch_text(&self, url: &str) -> Result<String, AgentError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.pages
            .get(url)
            .cloned()
            .ok_or_else(|| AgentError::ToolTransient(format!("404 {}", url)))
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, AgentError> {
        Ok(url.as_bytes().to_vec())
    }

    fn base_url(&self) -> &str {
        "http://hub"
    }

    fn api_key(&self) -> &str {
        "test-key"
    }
}

fn graph_hub() -> FakeHub {
    FakeHub::default()
        .page("http://hub/dane/barbara.txt", "Barbara was last seen in Kraków with Anna.")
        .relation("/people", "ANNA", "KRAKOW LUBLIN")
        .relation("/places", "KRAKOW", "Anna Rafał [**RESTRICTED DATA**]")
}

fn settings(max_iterations: usize) -> LoopSettings {
    LoopSettings {
        max_iterations,
        ..LoopSettings::default()
    }
}

fn graph_loop(
    hub: Arc<FakeHub>,
    llm: Arc<ScriptedLlmClient>,
    max_iterations: usize,
) -> LoopController<GraphToolset> {
    LoopController::new(
        GraphToolset::new(hub, GraphSection::default()),
        llm,
        settings(max_iterations),
    )
}

const REASON: &str = r#"{"action":"reason","reasoning":"thinking"}"#;

#[tokio::test]
async fn test_duplicate_query_skipped_without_hub_call() {
    let hub = Arc::new(graph_hub());
    let llm = Arc::new(ScriptedLlmClient::new([
        r#"{"action":"ask_people","query":"Anna","reasoning":"first"}"#,
        r#"{"action":"ask_people","query":"ANNA Nowak","reasoning":"again"}"#,
    ]));
    let outcome = graph_loop(hub.clone(), llm, 2).run().await.unwrap();

    assert_eq!(hub.query_calls.load(Ordering::SeqCst), 1);
    assert_eq!(outcome.report.history.len(), 2);
    assert!(outcome.report.history[1].narrative.contains("already queried"));
    assert_eq!(outcome.report.status, RunStatus::BudgetExhausted);
}

#[tokio::test]
async fn test_rejected_answer_never_resubmitted() {
    let hub = Arc::new(graph_hub());
    let llm = Arc::new(ScriptedLlmClient::repeating(
        r#"{"action":"answer","answer":"Warsaw","reasoning":"guess"}"#,
    ));
    let outcome = graph_loop(hub.clone(), llm, 3).run().await.unwrap();

    assert_eq!(hub.report_calls.load(Ordering::SeqCst), 1);
    assert!(outcome.state.rejected().contains("WARSAW"));
    assert_eq!(outcome.state.rejected().len(), 1);
    assert!(outcome.report.history[2].narrative.contains("already rejected"));
    assert!(!outcome.report.is_success());
}

#[tokio::test]
async fn test_sentinel_ends_run_and_stops_oracle() {
    let hub = Arc::new(graph_hub().report_reply("KRAKOW", json!({"code": 0, "message": "{{FLG:FOUND}}"})));
    let mut script = vec![REASON; 6];
    script.push(r#"{"action":"answer","answer":"Kraków","reasoning":"seen there"}"#);
    script.push(REASON);
    let llm = Arc::new(ScriptedLlmClient::new(script));
    let outcome = graph_loop(hub.clone(), llm.clone(), 200).run().await.unwrap();

    assert_eq!(outcome.report.iterations, 7);
    assert_eq!(llm.calls(), 7);
    assert_eq!(outcome.report.history.len(), 7);
    match &outcome.report.status {
        RunStatus::Success { answer, response } => {
            assert_eq!(answer, "KRAKOW");
            assert!(response.contains("{{FLG:FOUND}}"));
        }
        other => panic!("expected success, got {:?}", other),
    }
}

#[tokio::test]
async fn test_budget_exhaustion_and_forced_commitment() {
    let hub = Arc::new(graph_hub());
    let llm = Arc::new(ScriptedLlmClient::repeating(REASON));
    let outcome = graph_loop(hub, llm.clone(), 200).run().await.unwrap();

    assert_eq!(outcome.report.status, RunStatus::BudgetExhausted);
    assert_eq!(outcome.report.iterations, 200);
    assert_eq!(outcome.report.history.len(), 200);
    assert_eq!(llm.calls(), 200);
    for i in 1..=200 {
        let prompt = llm.user_prompt(i - 1).unwrap();
        assert_eq!(
            prompt.contains(FORCED_COMMITMENT_MARKER),
            i % 10 == 0,
            "iteration {}",
            i
        );
    }
    // 快照只保留最近 30 条历史
    let last = llm.user_prompt(199).unwrap();
    assert!(last.contains("history (last 30 of 199)"));
}

#[tokio::test]
async fn test_graph_golden_state() {
    let hub = Arc::new(graph_hub());
    let llm = Arc::new(ScriptedLlmClient::new([
        r#"{"action":"ask_people","query":"Anna","reasoning":"seen with Barbara"}"#,
        r#"{"action":"ask_places","query":"Kraków","reasoning":"last known place"}"#,
        r#"{"action":"ask_places","query":"Gdańsk","reasoning":"hunch"}"#,
        REASON,
    ]));
    let outcome = graph_loop(hub.clone(), llm.clone(), 4).run().await.unwrap();

    assert_eq!(
        outcome.state.registry().render(),
        "connections:\n  people_to_places:\n    ANNA: [KRAKOW, LUBLIN]\n  places_to_people:\n    KRAKOW: [ANNA, RAFAL]\ndiscovered_unqueried:\n  people: [RAFAL]\n  places: [LUBLIN]\n"
    );
    // 失败的查询只留历史，不写登记表
    assert!(outcome.report.history[2].narrative.contains("failed"));
    assert_eq!(hub.query_calls.load(Ordering::SeqCst), 3);
    // 引导笔记进入每轮快照
    assert!(llm.user_prompt(0).unwrap().contains("<note>\nBarbara was last seen"));
}

#[tokio::test]
async fn test_unknown_action_is_fatal() {
    let hub = Arc::new(graph_hub());
    let llm = Arc::new(ScriptedLlmClient::repeating(r#"{"action":"teleport"}"#));
    let err = graph_loop(hub.clone(), llm, 5).run().await.err().unwrap();
    assert!(matches!(err, AgentError::UnknownAction(_)));
    assert_eq!(hub.query_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_photos_transform_overwrite_then_check() {
    let work_dir = tempfile::tempdir().unwrap();
    let hub = Arc::new(
        FakeHub::default()
            .report_reply("START", json!({"code": 0, "message": "Photos: IMG_1.PNG IMG_2.PNG"}))
            .report_reply("DARKEN IMG_1-small.png", json!({"code": 0, "message": "Done: IMG_1_AAA.PNG"}))
            .report_reply("DARKEN IMG_1-small.png", json!({"code": 0, "message": "Done again: IMG_1_BBB.PNG"}))
            .report_reply("krótkie włosy", json!({"code": 0, "message": "{{FLG:BARBARA}}"})),
    );
    let oracle = Arc::new(ScriptedLlmClient::new([
        r#"{"thinking":"too bright","nextTool":"DARKEN","filenames":["IMG_1.PNG"]}"#,
        r#"{"thinking":"still bright","nextTool":"DARKEN","filenames":["IMG_1-small.png"]}"#,
        r#"{"thinking":"look","nextTool":"DESCRIBE","filenames":["IMG_1_BBB-small.png"]}"#,
        r#"{"thinking":"enough","nextTool":"CHECK","filenames":["IMG_1_BBB-small.png","IMG_2-small.png"]}"#,
    ]));
    let translator: Arc<dyn LlmClient> = Arc::new(ScriptedLlmClient::repeating("krótkie włosy"));
    let analyzer = Arc::new(StaticMediaAnalyzer::new("short hair", ""));
    let toolset = PhotoToolset::new(
        hub.clone(),
        translator,
        analyzer.clone(),
        PhotosSection::default(),
        work_dir.path(),
    );
    let outcome = LoopController::new(toolset, oracle, settings(10))
        .run()
        .await
        .unwrap();

    let registry = outcome.state.registry();
    let source = registry.get("IMG_1-small.png").unwrap();
    assert_eq!(source.darkened.as_deref(), Some("IMG_1_BBB-small.png"));
    assert_eq!(
        registry.get("IMG_1_BBB-small.png").unwrap().description.as_deref(),
        Some("short hair")
    );
    assert!(work_dir.path().join("photos").join("IMG_1_AAA-small.png").exists());
    assert_eq!(analyzer.image_calls.load(Ordering::SeqCst), 2);
    assert_eq!(
        outcome.report.status,
        RunStatus::Success {
            answer: "krótkie włosy".into(),
            response: json!({"code": 0, "message": "{{FLG:BARBARA}}"}).to_string(),
        }
    );
}

#[tokio::test]
async fn test_crawl_visits_once_and_feeds_back_verdict() {
    let hub = Arc::new(
        FakeHub::default()
            .page(
                "http://hub/data/test-key/softo.json",
                r#"{"01": "What is the contact email?"}"#,
            )
            .page(
                "https://site.test/",
                r#"<html><body><p>Welcome</p><a href="/contact">Contact</a></body></html>"#,
            )
            .page(
                "https://site.test/contact",
                r#"<html><body><p>Write to hello@site.test</p></body></html>"#,
            )
            .report_reply(
                r#"{"01":"hello@site.test"}"#,
                json!({"code": 0, "message": "{{FLG:CRAWLED}}"}),
            ),
    );
    let llm = Arc::new(ScriptedLlmClient::new([
        r#"{"reasoning":"start","tool":"FETCH","parameters":{"url":"https://site.test/"}}"#,
        r#"{"reasoning":"contact page","tool":"FETCH","parameters":{"url":"/contact"}}"#,
        r#"{"reasoning":"again","tool":"FETCH","parameters":{"url":"https://site.test/contact#form"}}"#,
        r#"{"reasoning":"guess","tool":"ANSWER","parameters":{"answer":{"01":"info@site.test"}}}"#,
        r#"{"reasoning":"fix","tool":"ANSWER","parameters":{"answer":{"01":"hello@site.test"}}}"#,
    ]));
    let toolset = CrawlToolset::new(
        hub.clone(),
        None,
        CrawlSection {
            start_url: "https://site.test".into(),
            ..CrawlSection::default()
        },
    )
    .unwrap();
    let outcome = LoopController::new(toolset, llm.clone(), settings(20))
        .run()
        .await
        .unwrap();

    assert!(outcome.report.is_success());
    assert_eq!(outcome.report.iterations, 5);
    // 问题集 + 两个页面
    assert_eq!(hub.fetch_calls.load(Ordering::SeqCst), 3);
    assert!(outcome.report.history[2].narrative.contains("already visited"));
    assert!(outcome
        .state
        .rejected()
        .contains(r#"{"01":"info@site.test"}"#));
    assert_eq!(outcome.state.registry().last_verdict(), Some("Wrong answer"));
    assert!(llm.user_prompt(4).unwrap().contains("last_answer_result: Wrong answer"));
}

/// 每次分析都要等待一段时间的媒体分析器
struct SlowAnalyzer {
    delay: std::time::Duration,
}

#[async_trait]
impl MediaAnalyzer for SlowAnalyzer {
    async fn describe_images(&self, _prompt: &str, _images: &[ImageInput]) -> Result<String, String> {
        tokio::time::sleep(self.delay).await;
        Ok("a red logo".to_string())
    }

    async fn transcribe(&self, _audio: Vec<u8>, _filename: &str) -> Result<String, String> {
        tokio::time::sleep(self.delay).await;
        Ok("spoken words".to_string())
    }
}

#[tokio::test]
async fn test_crawl_enrichment_outlives_tool_timeout() {
    let hub = Arc::new(
        FakeHub::default()
            .page(
                "http://hub/data/test-key/softo.json",
                r#"{"01": "What does the logo show?"}"#,
            )
            .page(
                "https://site.test/",
                r#"<html><body><p>Home</p><img src="/a.png"><img src="/b.png"></body></html>"#,
            ),
    );
    let analyzer = Arc::new(SlowAnalyzer {
        delay: std::time::Duration::from_millis(700),
    });
    let enricher = Enricher::new(hub.clone(), analyzer, None, 1);
    let llm = Arc::new(ScriptedLlmClient::new([
        r#"{"reasoning":"start","tool":"FETCH","parameters":{"url":"/"}}"#,
        r#"{"reasoning":"read it","tool":"REASON"}"#,
    ]));
    let toolset = CrawlToolset::new(
        hub.clone(),
        Some(enricher),
        CrawlSection {
            start_url: "https://site.test".into(),
            ..CrawlSection::default()
        },
    )
    .unwrap()
    .with_fetch_timeout(1);
    let outcome = LoopController::new(
        toolset,
        llm,
        LoopSettings {
            max_iterations: 2,
            tool_timeout_secs: 1,
            ..LoopSettings::default()
        },
    )
    .run()
    .await
    .unwrap();

    let registry = outcome.state.registry();
    assert!(registry.is_visited("https://site.test/"));
    let content = &registry.page("https://site.test/").unwrap().content;
    assert!(content.contains("[image https://site.test/a.png]"));
    assert!(content.contains("[image https://site.test/b.png]"));
    assert!(outcome.report.history[0].narrative.starts_with("fetched https://site.test/"));
}
