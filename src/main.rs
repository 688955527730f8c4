//! Sleuth - 解谜循环命令行
//!
//! 入口：初始化日志、加载配置、按子命令构建领域工具并运行主循环，最后把运行报告以 JSON 输出到 stdout。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use sleuth::config::{load_config, AppConfig};
use sleuth::domains::{CrawlToolset, GraphToolset, PhotoToolset};
use sleuth::enrich::{AnalysisCache, Enricher};
use sleuth::hub::{HttpHub, HubClient};
use sleuth::llm::{create_llm_client, create_media_analyzer};
use sleuth::react::{LoopController, LoopSettings, RunReport, Toolset};

#[derive(Debug, Parser)]
#[command(name = "sleuth", version, about = "LLM-driven puzzle solving loop")]
struct Cli {
    /// 额外的配置文件（覆盖 config/default.toml）
    #[arg(long, env = "SLEUTH_CONFIG")]
    config: Option<PathBuf>,

    /// 覆盖 agent.max_iterations
    #[arg(long, global = true)]
    max_iterations: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Investigate people and places to locate a person")]
    Graph,
    #[command(about = "Repair photos and submit a description of the person")]
    Photos,
    #[command(about = "Crawl a website and answer the question set")]
    Crawl {
        /// 对页面里的音频 / 图片做转写与描述
        #[arg(long)]
        enrich_media: bool,
    },
}

async fn run<T: Toolset>(toolset: T, config: &AppConfig, settings: LoopSettings) -> anyhow::Result<RunReport> {
    let llm = create_llm_client(&config.llm);
    let controller = LoopController::new(toolset, llm, settings);
    let outcome = controller.run().await.context("Run aborted")?;
    Ok(outcome.report)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    sleuth::observability::init();

    let cli = Cli::parse();
    let mut config = load_config(cli.config.clone()).context("Failed to load config")?;
    if let Some(max) = cli.max_iterations {
        config.agent.max_iterations = max;
    }
    std::fs::create_dir_all(&config.app.work_dir)
        .with_context(|| format!("Failed to create {}", config.app.work_dir.display()))?;

    let hub: Arc<dyn HubClient> = Arc::new(HttpHub::from_config(&config.hub));
    let settings = LoopSettings::from(&config.agent);

    let report = match cli.command {
        Command::Graph => {
            let toolset = GraphToolset::new(hub, config.graph.clone());
            run(toolset, &config, settings).await?
        }
        Command::Photos => {
            let toolset = PhotoToolset::new(
                hub,
                create_llm_client(&config.llm),
                create_media_analyzer(&config.llm),
                config.photos.clone(),
                config.app.work_dir.clone(),
            );
            run(toolset, &config, settings).await?
        }
        Command::Crawl { enrich_media } => {
            let section = config.crawl.clone();
            let enricher = (enrich_media || section.enrich_media).then(|| {
                Enricher::new(
                    hub.clone(),
                    create_media_analyzer(&config.llm),
                    Some(AnalysisCache::new(config.cache.dir.clone())),
                    section.max_concurrency,
                )
            });
            let toolset = CrawlToolset::new(hub, enricher, section)
                .context("Invalid crawl config")?
                .with_fetch_timeout(config.agent.tool_timeout_secs);
            run(toolset, &config, settings).await?
        }
    };

    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("Failed to serialize report")?
    );
    if !report.is_success() {
        anyhow::bail!(
            "{} finished without success after {} iterations",
            report.task,
            report.iterations
        );
    }
    Ok(())
}
