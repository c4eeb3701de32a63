//! `composition-scanner`: HTTP control plane for composition analysis.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use scanner_adapters::ollama::{OllamaAdapter, OllamaConfig};
use scanner_adapters::openai::{OpenAiAdapter, OpenAiConfig};
use scanner_adapters::traits::ModelAdapter;
use scanner_config::{OracleProvider, OracleSettings, ScannerConfig, StoreBackend};
use scanner_kernel::{
    AnalysisPipeline, AnalysisService, DirectoryCollector, SearchGenerator, ServerAssessor,
    TaskScheduler, ToolCollector,
};
use scanner_oracle::{
    GatewayConfig, LlmOracle, LlmOracleConfig, OracleGateway, ReasoningOracle, RuleBasedOracle,
};
use scanner_policy::Aggregator;
use scanner_server::{AppState, build_router};
use scanner_store::{
    AnalysisStore, AssessmentArchive, AssessmentStore, FileStore, VolatileStore,
};
use scanner_telemetry::tracing_support::init_tracing;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "composition-scanner", version, about)]
struct Args {
    /// Configuration file; defaults to `composition-scanner.toml` if present.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Overrides `server.bind`.
    #[arg(long)]
    bind: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut config =
        ScannerConfig::load(args.config.as_deref()).context("loading configuration")?;
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    init_tracing(&config.logging).context("initialising tracing")?;

    let oracle = build_oracle(&config.oracle)?;
    let descriptor = oracle.descriptor();
    let gateway = OracleGateway::new(
        oracle,
        GatewayConfig::new(config.oracle.timeout(), config.oracle.max_retries)?,
    );
    let (store, assessments) = build_stores(&config).await?;
    let pipeline = AnalysisPipeline::new(gateway.clone(), store)?
        .with_aggregator(Aggregator::new(config.scoring)?)
        .with_search(SearchGenerator::new(config.search.search_config())?)
        .with_scheduler(TaskScheduler::new(config.search.scheduler_config()?))
        .with_options(config.search.pipeline_options());
    let collector = build_collector(&config).await?;
    info!(
        servers = collector.servers().count(),
        oracle = %descriptor,
        "configured"
    );

    let collector: Arc<dyn ToolCollector> = Arc::new(collector);
    let mut service = AnalysisService::new(pipeline, Arc::clone(&collector));
    if let Some(root) = config.collection.submission_root() {
        service = service.with_declarations_root(root);
    }
    let assessor = ServerAssessor::new(gateway, collector, assessments);
    let state = AppState::new(service, assessor, descriptor.to_string());
    let router = build_router(state.clone());

    let listener = TcpListener::bind(config.server.bind)
        .await
        .with_context(|| format!("binding {}", config.server.bind))?;
    info!(addr = %config.server.bind, "composition-scanner listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(state.clone()))
        .await
        .context("serving")?;

    let grace = config.server.shutdown_grace();
    let (abandoned, unassessed) = tokio::join!(
        state.service().drain(grace),
        state.assessor().drain(grace)
    );
    if abandoned > 0 || unassessed > 0 {
        warn!(abandoned, unassessed, "stopped with work still in flight");
    }
    info!("composition-scanner stopped");
    Ok(())
}

fn build_oracle(settings: &OracleSettings) -> Result<Arc<dyn ReasoningOracle>> {
    let llm = LlmOracleConfig {
        temperature: settings.temperature,
        max_output_tokens: settings.max_output_tokens,
    };
    let adapter: Arc<dyn ModelAdapter> = match settings.provider {
        OracleProvider::RuleBased => return Ok(Arc::new(RuleBasedOracle::default())),
        OracleProvider::Openai => {
            let mut cfg = OpenAiConfig::from_env_var(&settings.model, &settings.api_key_env)
                .with_default_temperature(settings.temperature)
                .with_timeout(settings.timeout());
            if let Some(url) = &settings.base_url {
                cfg = cfg.with_base_url(url)?;
            }
            Arc::new(OpenAiAdapter::new(cfg)?)
        }
        OracleProvider::Ollama => {
            let mut cfg = OllamaConfig::new(&settings.model)
                .with_default_temperature(settings.temperature)
                .with_timeout(settings.timeout());
            if let Some(url) = &settings.base_url {
                cfg = cfg.with_base_url(url)?;
            }
            Arc::new(OllamaAdapter::new(cfg)?)
        }
    };
    Ok(Arc::new(LlmOracle::new(adapter, llm)?))
}

async fn build_stores(
    config: &ScannerConfig,
) -> Result<(Arc<dyn AnalysisStore>, Arc<dyn AssessmentStore>)> {
    Ok(match config.store.backend {
        StoreBackend::Memory => {
            warn!("using the in-memory store; results are lost on restart");
            let store = Arc::new(VolatileStore::new());
            let runs: Arc<dyn AnalysisStore> = Arc::clone(&store) as _;
            let assessments: Arc<dyn AssessmentStore> = store;
            (runs, assessments)
        }
        StoreBackend::File => {
            let runs = FileStore::open(&config.store.path)
                .await
                .with_context(|| format!("opening store at {}", config.store.path.display()))?;
            let assessments = AssessmentArchive::open(&config.store.assessments_path)
                .await
                .with_context(|| {
                    format!(
                        "opening assessment archive at {}",
                        config.store.assessments_path.display()
                    )
                })?;
            let runs: Arc<dyn AnalysisStore> = Arc::new(runs);
            let assessments: Arc<dyn AssessmentStore> = Arc::new(assessments);
            (runs, assessments)
        }
    })
}

async fn build_collector(config: &ScannerConfig) -> Result<DirectoryCollector> {
    let mut collector = DirectoryCollector::default();
    if let Some(dir) = &config.collection.declarations_dir {
        collector = collector.merge(
            DirectoryCollector::scan(dir)
                .await
                .with_context(|| format!("scanning {}", dir.display()))?,
        );
    }
    if let Some(path) = &config.collection.mcp_json {
        collector = collector.merge(DirectoryCollector::from_mcp_json(path).await?);
    }
    Ok(collector.merge(DirectoryCollector::new(config.server_sources()?)))
}

async fn shutdown_signal(state: AppState) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for ctrl-c; running until killed");
        std::future::pending::<()>().await;
    }
    state.begin_draining();
    info!(in_flight = state.service().registry().len(), "shutdown requested");
}
