// src/main.rs - Resolve one company name against the registry and print the JSON response
use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;

use company_match_lib::ai::{LoggingUsageSink, OllamaReasoning, ReasoningConfig, UsageSink};
use company_match_lib::matching::{MatchOrchestrator, SearchIndex};
use company_match_lib::models::{CompanyContext, CompanyRecord, MatchOptions, MatchRequest};
use company_match_lib::registry::{InMemoryRegistry, PgRegistry};
use company_match_lib::utils::db_connect::{connect, get_pool_status, DbSettings};
use company_match_lib::utils::env::load_env;
use company_match_lib::utils::matcher_config::MatcherConfig;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct ResolveArgs {
    /// Company name to resolve
    name: String,

    /// Industry hint
    #[arg(long)]
    industry: Option<String>,

    /// Region hint
    #[arg(long)]
    region: Option<String>,

    /// Size hint
    #[arg(long)]
    size: Option<String>,

    /// Bypass the exact-match cache lookup
    #[arg(long)]
    skip_cache: bool,

    /// Log the full resolution trace at info level
    #[arg(long)]
    debug: bool,

    /// Reasoning model override for this request
    #[arg(long)]
    model: Option<String>,

    /// Search a JSON array of company records in memory instead of PostgreSQL
    #[arg(long)]
    records: Option<PathBuf>,

    /// Upsert the --records file into PostgreSQL, then resolve against the database
    #[arg(long, requires = "records")]
    import: bool,

    /// Resolve without the reasoning service
    #[arg(long)]
    no_ai: bool,
}

async fn build_index(args: &ResolveArgs, config: &MatcherConfig) -> Result<Arc<dyn SearchIndex>> {
    match (&args.records, args.import) {
        (Some(path), false) => {
            let registry = InMemoryRegistry::from_json_file(path)?;
            Ok(Arc::new(registry))
        }
        (records, _) => {
            let settings = DbSettings::from_env(config.collaborator_timeout);
            settings.log_config();
            let pool = connect(&settings).await.context("Failed to connect to database")?;
            let (connections, idle) = get_pool_status(&pool);
            info!("Connected to registry database ({} connections, {} idle)", connections, idle);
            let registry = PgRegistry::new(pool);
            if let Some(path) = records {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                let parsed: Vec<CompanyRecord> = serde_json::from_str(&raw)
                    .with_context(|| format!("Failed to parse {}", path.display()))?;
                let imported = registry.import(&parsed).await?;
                info!("Imported {} company records from {}", imported, path.display());
            }
            Ok(Arc::new(registry))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    load_env();
    let args = ResolveArgs::parse();

    let mut config = MatcherConfig::from_env();
    if args.no_ai {
        config.ai_enabled = false;
    }
    config.validate().context("Invalid matcher configuration")?;
    config.log_config();

    let index = build_index(&args, &config).await?;
    let mut orchestrator = MatchOrchestrator::new(index, config.clone())?;

    let usage_sink = Arc::new(LoggingUsageSink::new());
    if config.ai_enabled {
        let reasoning_config = ReasoningConfig::from_env();
        reasoning_config.log_config();
        let service = OllamaReasoning::new(reasoning_config)?;
        if let Err(e) = service.test_connection().await {
            warn!("Reasoning service did not answer a test prompt: {:#}", e);
        }
        let sink: Arc<dyn UsageSink> = usage_sink.clone();
        orchestrator = orchestrator.with_reasoning(Arc::new(service), Some(sink));
    }

    let context = CompanyContext {
        industry: args.industry.clone(),
        region: args.region.clone(),
        size: args.size.clone(),
    };
    let request = MatchRequest {
        company_name: args.name.clone(),
        context: (!context.is_empty()).then_some(context),
        options: MatchOptions {
            debug: args.debug,
            skip_cache: args.skip_cache,
            model: args.model.clone(),
        },
    };

    let response = orchestrator.resolve(request).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);

    let stats = orchestrator.stats();
    info!(
        "📊 Resolver stats: {} fast path, {} cache hits, {}/{} escalations accepted, {} AI calls ({} failed)",
        stats.fast_path_hits,
        stats.cache_hits,
        stats.escalations_accepted,
        stats.escalations_attempted,
        stats.ai_calls,
        stats.ai_failures
    );
    if config.ai_enabled {
        info!("🤖 Reasoning tokens used: {}", usage_sink.total_tokens());
    }
    orchestrator.flush_cache_updates().await;
    Ok(())
}
