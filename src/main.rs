use anyhow::Context as _;
use clap::{Args, Parser, Subcommand};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::Level;
use zengate::auth::MICRO_CENTS_PER_DOLLAR;
use zengate::logging::LogLevel;
use zengate::models::ModelRegistry;
use zengate::proxy::ReloadPolicy;
use zengate::server::ServeConfig;
use zengate::{app, logging, server, storage};

#[derive(Parser, Debug)]
#[command(
    name = "zengate",
    version,
    about = "Usage-metered gateway in front of hosted LLM providers"
)]
struct Cli {
    /// SQLite database; defaults to the user data directory.
    #[arg(long, global = true, env = "ZENGATE_DB")]
    db: Option<PathBuf>,
    #[arg(long, global = true, value_enum, default_value_t = LogLevel::Info)]
    log_level: LogLevel,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Serve(ServeArgs),
    /// Create or upgrade the database schema and exit.
    Migrate,
}

#[derive(Args, Debug)]
struct ServeArgs {
    #[arg(long, env = "ZENGATE_HOST", default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    host: IpAddr,
    #[arg(long, env = "ZENGATE_PORT", default_value_t = 3210)]
    port: u16,
    /// Model and provider table (JSON); defaults to `models.json` in the data directory.
    #[arg(long, env = "ZENGATE_MODELS")]
    models: Option<PathBuf>,
    /// Re-read the model table this often; 0 disables the background reload.
    #[arg(long, env = "ZENGATE_RELOAD_INTERVAL_SECS", default_value_t = 0)]
    reload_interval_secs: u64,
    /// Queue a balance reload when it drops below this many dollars.
    #[arg(long, env = "ZENGATE_RELOAD_TRIGGER", default_value_t = 5)]
    reload_trigger: i64,
    /// Dollars requested per reload.
    #[arg(long, env = "ZENGATE_RELOAD_AMOUNT", default_value_t = 20)]
    reload_amount: i64,
    /// Bearer token for `/api/models/reload`; unset leaves it disabled.
    #[arg(long, env = "ZENGATE_ADMIN_TOKEN", hide_env_values = true)]
    admin_token: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("build tokio runtime")?;
    runtime.block_on(async_main())
}

async fn async_main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let data_dir = app::default_data_dir()?;
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("create data directory {}", data_dir.display()))?;
    logging::init(&data_dir, cli.log_level)?;

    let db_path = cli.db.unwrap_or_else(|| app::db_path(&data_dir));
    storage::init_db(&db_path)
        .with_context(|| format!("initialise database {}", db_path.display()))?;

    match cli.command {
        Command::Serve(args) => {
            let models_path = args.models.unwrap_or_else(|| app::models_path(&data_dir));
            let models = ModelRegistry::from_file(models_path)?;
            let addr = SocketAddr::new(args.host, args.port);
            tracing::event!(
                Level::INFO,
                addr = %addr,
                db = %db_path.display(),
                "zengate listening"
            );

            server::serve(
                addr,
                ServeConfig {
                    db_path,
                    models: Arc::new(models),
                    reload: ReloadPolicy {
                        trigger: args.reload_trigger.saturating_mul(MICRO_CENTS_PER_DOLLAR),
                        amount: args.reload_amount.saturating_mul(MICRO_CENTS_PER_DOLLAR),
                    },
                    models_reload_interval: (args.reload_interval_secs > 0)
                        .then(|| Duration::from_secs(args.reload_interval_secs)),
                    admin_token: args.admin_token,
                },
            )
            .await
        }
        Command::Migrate => {
            println!("ok: {}", db_path.display());
            Ok(())
        }
    }
}
