use anyhow::{Context, Result};
use clap::Parser;
use core_api::ai::Dispatcher;
use core_api::api::{self, AppState};
use core_api::config::Config;
use core_api::employee::EmployeeDirectory;
use core_api::store::{PostgresStore, RedisStore};
use core_api::{export, logging};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(
    name = "core-api",
    version,
    about = "Core API for the Frida bot: Redis lookups, employee auth, logging and AI requests"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Run the HTTP server
    Serve {
        /// Path to config file
        #[arg(short, long, default_value = "core-api.toml", env = "CORE_API_CONFIG")]
        config: PathBuf,

        /// Listen host override
        #[arg(long)]
        host: Option<String>,

        /// Listen port override
        #[arg(long)]
        port: Option<u16>,
    },

    /// Dump every Redis user record to a JSON file
    ExportUsers {
        /// Path to config file
        #[arg(short, long, default_value = "core-api.toml", env = "CORE_API_CONFIG")]
        config: PathBuf,

        /// Output file
        #[arg(short, long, default_value = "users_data.json")]
        output: PathBuf,
    },

    /// Load and validate the config, then print the effective settings
    CheckConfig {
        /// Path to config file
        #[arg(short, long, default_value = "core-api.toml", env = "CORE_API_CONFIG")]
        config: PathBuf,
    },
}

fn load_config(path: &Path) -> Result<Config> {
    let config = Config::load_or_default(path)?;
    config.validate()?;
    logging::init(&config.logging.level, config.logging.file.as_deref())?;
    Ok(config)
}

async fn build_state(config: &Config) -> Result<AppState> {
    let redis = RedisStore::connect(&config.redis.url)
        .await
        .context("connecting to Redis")?;
    let postgres = PostgresStore::connect(&config.postgres).context("creating PostgreSQL pool")?;
    let employees = EmployeeDirectory::new(&config.employees)?;
    let dispatcher = Dispatcher::from_config(&config.ai)?;
    info!(models = ?dispatcher.models().collect::<Vec<_>>(), "AI models configured");

    Ok(AppState {
        json_store: Arc::new(redis),
        frida_store: Arc::new(postgres),
        employees: Arc::new(employees),
        dispatcher: Arc::new(dispatcher),
        redis: Arc::new(config.redis.clone()),
        export_dir: config.export.temp_dir.clone(),
        api_token: config.server.api_token.clone(),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve { config, host, port } => {
            let mut cfg = load_config(&config)?;
            if let Some(host) = host {
                cfg.server.host = host;
            }
            if let Some(port) = port {
                cfg.server.port = port;
            }
            let addr = cfg.server.socket_addr()?;
            let state = build_state(&cfg).await?;
            api::serve(addr, state).await?;
            Ok(())
        }
        Command::ExportUsers { config, output } => {
            let cfg = load_config(&config)?;
            let redis = RedisStore::connect(&cfg.redis.url)
                .await
                .context("connecting to Redis")?;
            let users = export::collect_users(&redis, &cfg.redis).await?;
            let contents = export::to_pretty_json(&users)?;
            std::fs::write(&output, contents)
                .with_context(|| format!("writing {}", output.display()))?;
            info!(records = users.len(), output = %output.display(), "users exported");
            Ok(())
        }
        Command::CheckConfig { config } => {
            let cfg = load_config(&config)?;
            let models: Vec<_> = cfg.ai.models.iter().map(|m| m.name.as_str()).collect();
            println!("listen:    {}", cfg.server.socket_addr()?);
            println!("auth:      {}", if cfg.server.api_token.is_some() { "bearer token" } else { "open" });
            println!("employees: {}", cfg.employees.base_url);
            println!("models:    {}", models.join(", "));
            println!("order:     {}", cfg.ai.order.join(", "));
            println!("temp dir:  {}", cfg.export.temp_dir.display());
            Ok(())
        }
    }
}
