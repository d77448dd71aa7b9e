//! Warden - moderation list daemon

use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use warden::api::{rkey_from_uri, ApiClient, ListWriter, ProfileReader};
use warden::bootstrap;
use warden::cache::ProfileCache;
use warden::config::{Cli, Command, RunArgs};
use warden::firehose::{run_firehose, FirehoseConfig};
use warden::pipeline::PipelineContext;
use warden::registry::default_catalog;
use warden::supervisor::{Supervisor, SupervisorConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let verbose = matches!(&cli.command, Command::Run(args) if args.verbose);
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("warden={},info", default_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = cli.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    match cli.command.clone() {
        Command::Run(args) => run(&cli, &args).await,
        Command::RemoveUser { user, list } => remove_user(&cli, &user, &list).await,
        Command::DeleteList { list } => delete_list(&cli, &list).await,
    }
}

async fn run(cli: &Cli, args: &RunArgs) -> anyhow::Result<()> {
    info!("======================================");
    info!("  Warden - moderation list daemon");
    info!("======================================");
    info!("Data dir: {}", cli.data_dir.display());
    info!("API host: {} (public: {})", cli.api_host, cli.public_api_host);
    info!("Firehose: {}", cli.firehose_host);
    info!(
        "Workers: {} schedulers / {} resolvers / {} reconcilers",
        cli.num_schedulers, cli.num_resolvers, cli.num_reconcilers
    );
    info!(
        "Cache: {}h lifetime, expiry {}",
        cli.cache_hours,
        if args.cache_expire() { "on" } else { "off" }
    );
    info!("======================================");

    let cache = ProfileCache::open(
        cli.data_dir.join("cache.db"),
        cli.cache_hours,
        args.cache_expire(),
    )?;

    let bootstrap_file = cli.data_dir.join("cache.json.gz");
    if bootstrap_file.exists() {
        // A bad bootstrap file should not keep the daemon down.
        if let Err(e) = cache.import_gz(&bootstrap_file) {
            error!(file = %bootstrap_file.display(), error = %e, "cache bootstrap import failed");
        }
    }

    let api = ApiClient::login(&cli.api_host, &cli.public_api_host, &cli.credentials).await?;
    let registry = Arc::new(
        bootstrap::bootstrap_registry(&api, &cli.data_dir, default_catalog()).await?,
    );
    info!(lists = registry.len(), "registry bootstrapped");

    let ctx = Arc::new(PipelineContext::new(
        cache,
        Arc::clone(&registry),
        cli.default_domain.clone(),
    ));
    bootstrap::seed_schedule(&registry, &ctx.cache, &ctx.schedule, args.cache).await;

    let cancel = CancellationToken::new();
    let firehose = tokio::spawn(run_firehose(
        FirehoseConfig::new(cli.firehose_host.clone()),
        Arc::clone(&ctx.schedule),
        cancel.clone(),
    ));

    let supervisor = Supervisor::new(
        SupervisorConfig {
            num_schedulers: cli.num_schedulers,
            num_resolvers: cli.num_resolvers,
            num_reconcilers: cli.num_reconcilers,
            compaction_watermark: cli.compaction_watermark,
            auth_host: cli.api_host.clone(),
            public_host: cli.public_api_host.clone(),
            credentials_path: cli.credentials.clone(),
        },
        Arc::clone(&ctx),
        cancel.clone(),
    );

    supervisor.run().await?;
    let _ = firehose.await;
    Ok(())
}

async fn remove_user(cli: &Cli, user: &str, list_name: &str) -> anyhow::Result<()> {
    let api = ApiClient::login(&cli.api_host, &cli.public_api_host, &cli.credentials).await?;

    let profile = api
        .get_profile(user)
        .await
        .map_err(|e| anyhow::anyhow!("user {} not found: {}", user, e))?;

    let lists = api.list_my_lists().await?;
    let list = lists
        .iter()
        .find(|l| l.name == list_name)
        .ok_or_else(|| anyhow::anyhow!("list {} not found", list_name))?;

    let members = api.list_members(&list.uri).await?;
    let member = members
        .iter()
        .find(|m| m.did == profile.did)
        .ok_or_else(|| anyhow::anyhow!("{} is not a member of {}", user, list_name))?;

    api.delete_member(rkey_from_uri(&member.uri)).await?;
    info!(user, did = %profile.did, list = list_name, "removed from list");
    Ok(())
}

async fn delete_list(cli: &Cli, list_name: &str) -> anyhow::Result<()> {
    let api = ApiClient::login(&cli.api_host, &cli.public_api_host, &cli.credentials).await?;

    let lists = api.list_my_lists().await?;
    let list = lists
        .iter()
        .find(|l| l.name == list_name)
        .ok_or_else(|| anyhow::anyhow!("list {} not found", list_name))?;

    api.delete_list(rkey_from_uri(&list.uri)).await?;
    info!(list = list_name, uri = %list.uri, "deleted list");
    Ok(())
}
