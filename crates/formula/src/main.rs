//! `formula`: per-function symbolic state summaries for smart contracts.

use std::{fs, path::PathBuf, sync::Arc};

use clap::{Parser, Subcommand};
use eyre::{Result, WrapErr};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use formula_config::{Config, Mode};
use formula_engine::{Engine, EngineSettings};
use formula_ir::ContractModel;
use formula_resolver::{
    ContractResolver, EtherscanResolver, LocalResolver, NullModelProvider,
};

#[derive(Parser)]
#[command(name = "formula", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Summarize the state effects of a contract's public functions.
    Summarize(SummarizeArgs),
}

#[derive(clap::Args)]
struct SummarizeArgs {
    /// Serialized contract model (JSON).
    #[arg(long, value_name = "PATH")]
    model: PathBuf,
    /// Restrict the analysis to one function.
    #[arg(long, value_name = "NAME")]
    function: Option<String>,
    /// Override the configured loop unrolling bound.
    #[arg(long, value_name = "N")]
    max_iter: Option<u32>,
    /// Enable implication-refined path constraints.
    #[arg(long)]
    refined: bool,
    /// Allow contract discovery through explorer APIs.
    #[arg(long)]
    online: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {
        Command::Summarize(args) => summarize(args),
    }
}

fn summarize(args: SummarizeArgs) -> Result<()> {
    let mut config = Config::load().wrap_err("loading configuration")?;
    if args.online {
        config.mode = Mode::Online;
    }
    if args.refined {
        config.refined = true;
    }
    if let Some(max_iter) = args.max_iter {
        config.max_iter = max_iter;
    }

    let json = fs::read_to_string(&args.model)
        .wrap_err_with(|| format!("reading model {}", args.model.display()))?;
    let model = Arc::new(ContractModel::from_json(&json).wrap_err("parsing contract model")?);
    info!(contract = %model.name, functions = model.functions.len(), "model loaded");

    let resolver = build_resolver(&config, &model)?;
    let settings = EngineSettings {
        refined: config.refined,
        max_iter: config.max_iter,
        offline: config.mode == Mode::Offline,
    };
    let engine = Engine::new(
        settings,
        Arc::new(formula_engine::solver::StructuralOracle),
        resolver,
    );

    let summaries = match &args.function {
        Some(name) => vec![engine.analyze_function(&model, name)?],
        None => engine.analyze_contract(&model),
    };
    for summary in &summaries {
        println!("{summary}");
    }
    Ok(())
}

fn build_resolver(
    config: &Config,
    model: &Arc<ContractModel>,
) -> Result<Arc<dyn ContractResolver>> {
    match config.mode {
        Mode::Offline => {
            let resolver = LocalResolver::new();
            let address = resolver.register(model.clone());
            info!(contract = %model.name, %address, "registered local model");
            Ok(Arc::new(resolver))
        }
        Mode::Online => {
            let Some(api_url) = config.chain_info.api_url.clone() else {
                warn!("online mode without chain_info.api_url, falling back to local resolution");
                let resolver = LocalResolver::new();
                resolver.register(model.clone());
                return Ok(Arc::new(resolver));
            };
            let resolver = EtherscanResolver::new(
                api_url,
                config.chain_info.api_key.clone(),
                Arc::new(NullModelProvider),
            )?;
            // locally supplied deployments seed the cache
            resolver.insert_cached(model.this_address(), model.clone());
            for (name, address) in &config.chain_info.addresses {
                if *name == model.name {
                    resolver.insert_cached(*address, model.clone());
                }
            }
            Ok(Arc::new(resolver))
        }
    }
}
