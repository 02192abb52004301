mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value;
use sesh_core::{validate_session_id, IdGenerator, RandomIdGenerator, SessionRecord};
use sesh_store::module::OPT_PREFIX;
use sesh_store::{
    CacheSessionHandler, FileSessionHandler, ModuleRegistry, ModuleSessionHandler,
    RedisCacheClient, SaveHandler, SessionDriver,
};
use tracing_subscriber::EnvFilter;

use config::Config;

#[derive(Parser)]
#[command(name = "sesh", about = "Inspect and manage stored sessions")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Storage backend
    #[arg(long, env = "SESH_BACKEND", value_enum, default_value_t = Backend::File, global = true)]
    backend: Backend,

    /// Session directory (file backend)
    #[arg(long, env = "SESH_DIR", global = true)]
    dir: Option<PathBuf>,

    /// Key or file name prefix, overrides the config file
    #[arg(long, env = "SESH_PREFIX", global = true)]
    prefix: Option<String>,

    /// Config file (default: <config dir>/sesh/config.toml)
    #[arg(long, env = "SESH_CONFIG", global = true)]
    config: Option<PathBuf>,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    /// One file per session
    File,
    /// Redis server pool
    Redis,
    /// memcached session module over Redis
    Module,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an empty session and print its id
    New,

    /// Print a session's bags as JSON
    Get {
        /// Session id
        id: String,
    },

    /// Replace a session's bags with a JSON object
    Put {
        /// Session id
        id: String,
        /// JSON object mapping bag names to values
        json: String,
    },

    /// Delete a session
    Destroy {
        /// Session id
        id: String,
    },

    /// Remove sessions older than the given lifetime
    Gc {
        /// Maximum session lifetime in seconds
        #[arg(long, default_value_t = 1440)]
        max_lifetime: u64,
    },
}

fn build_handler(cli: &Cli, config: &Config) -> Result<Box<dyn SaveHandler>> {
    let handler: Box<dyn SaveHandler> = match cli.backend {
        Backend::File => {
            let dir = cli
                .dir
                .clone()
                .or_else(|| config.file.dir.clone())
                .unwrap_or_else(|| PathBuf::from("./sessions"));
            let prefix = cli
                .prefix
                .clone()
                .or_else(|| config.file.prefix.clone())
                .unwrap_or_default();
            Box::new(FileSessionHandler::new(dir).with_prefix(prefix))
        }
        Backend::Redis => {
            let mut pool = config.pool.clone();
            if let Some(prefix) = &cli.prefix {
                pool.prefix = prefix.clone();
            }
            Box::new(CacheSessionHandler::new(RedisCacheClient::new(), pool))
        }
        Backend::Module => {
            let mut registry = ModuleRegistry::new();
            registry.register_memcached(RedisCacheClient::new());
            let mut options = config.module.options.clone();
            if let Some(prefix) = &cli.prefix {
                options.insert(OPT_PREFIX.to_string(), prefix.clone());
            }
            let handler = ModuleSessionHandler::new(
                Arc::new(registry),
                config.module.save_path.as_deref(),
                &options,
            )?;
            Box::new(handler)
        }
    };
    Ok(handler)
}

fn parse_bags(id: &str, json: &str) -> Result<SessionRecord> {
    let value: Value = serde_json::from_str(json).context("session data is not valid JSON")?;
    let Value::Object(map) = value else {
        bail!("session data must be a JSON object of bags");
    };
    let mut record = SessionRecord::new(id);
    for (bag, contents) in map {
        record.set_bag(bag, contents);
    }
    Ok(record)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sesh=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    let mut driver = SessionDriver::new(build_handler(&cli, &config)?);

    match &cli.command {
        Commands::New => {
            let id = RandomIdGenerator.generate();
            let record = driver.start(&id).await?;
            if !driver.commit(&record).await? {
                bail!("store rejected the new session");
            }
            println!("{id}");
        }
        Commands::Get { id } => {
            validate_session_id(id)?;
            let record = driver.start(id).await?;
            println!("{}", serde_json::to_string_pretty(&record.bags)?);
        }
        Commands::Put { id, json } => {
            validate_session_id(id)?;
            let record = parse_bags(id, json)?;
            driver.handler_mut().open().await?;
            if !driver.commit(&record).await? {
                bail!("store rejected the write for session {id}");
            }
            tracing::info!("Stored session {id}");
        }
        Commands::Destroy { id } => {
            validate_session_id(id)?;
            driver.handler_mut().open().await?;
            if !driver.destroy(id).await {
                bail!("failed to destroy session {id}");
            }
            tracing::info!("Destroyed session {id}");
        }
        Commands::Gc { max_lifetime } => {
            if !driver.gc(Duration::from_secs(*max_lifetime)).await {
                bail!("garbage collection did not complete");
            }
            tracing::info!("Garbage collection finished");
        }
    }

    driver.finish().await;
    Ok(())
}
