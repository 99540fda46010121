use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use adlens_agents::tools::{
    FetchMetrics, GenerateImage, HttpAdsDataProvider, HttpImageGenerator, ListAccounts,
    RenderChart, RenderTable,
};
use adlens_agents::{OpenAiReasoner, Orchestrator, ReasoningEngine, ToolInvoker, ToolRegistry};
use adlens_auth::{CredentialService, HttpAccountDirectory, HttpTokenExchanger};
use adlens_config::{AppConfig, ConfigLoader};
use adlens_db::{CheckpointStore, CredentialStore, MemoryStore, PatternStore, SessionStore};
use adlens_gateway::{AppState, GatewayServer};
use clap::{Parser, Subcommand};
use tokio::sync::Mutex;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "adlens", version, about = "Conversational ads-analytics assistant backend")]
struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "adlens.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP gateway (the default when no command is given).
    Serve,
    /// Store an upstream ads credential for a user.
    Connect {
        #[arg(long)]
        user: String,
        #[arg(long)]
        access_token: String,
        #[arg(long)]
        refresh_token: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = ConfigLoader::load(&cli.config)?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Connect {
            user,
            access_token,
            refresh_token,
        } => connect(config, &user, &access_token, &refresh_token),
    }
}

fn open_credential_store(config: &AppConfig) -> anyhow::Result<CredentialStore> {
    Ok(if config.gateway.db_path.is_empty() {
        CredentialStore::in_memory()?
    } else {
        CredentialStore::open(Path::new(&config.gateway.db_path))?
    })
}

fn connect(
    config: AppConfig,
    user: &str,
    access_token: &str,
    refresh_token: &str,
) -> anyhow::Result<()> {
    let store = open_credential_store(&config)?;
    let id = store.insert_credential(user, "ads", access_token, refresh_token, None)?;
    info!("stored credential {id} for user '{user}'");
    println!("connected '{user}'");
    Ok(())
}

async fn serve(config: AppConfig) -> anyhow::Result<()> {
    let db_path = config.gateway.db_path.clone();
    let open_in_memory = db_path.is_empty();
    if open_in_memory {
        warn!("no database path configured, state will not survive a restart");
    }

    let sessions = Arc::new(Mutex::new(if open_in_memory {
        SessionStore::in_memory()?
    } else {
        SessionStore::open(Path::new(&db_path))?
    }));
    let checkpoints = Arc::new(Mutex::new(if open_in_memory {
        CheckpointStore::in_memory()?
    } else {
        CheckpointStore::open(Path::new(&db_path))?
    }));
    let memory = Arc::new(Mutex::new(if open_in_memory {
        MemoryStore::in_memory()?
    } else {
        MemoryStore::open(Path::new(&db_path))?
    }));
    let patterns = Arc::new(Mutex::new(if open_in_memory {
        PatternStore::in_memory()?
    } else {
        PatternStore::open(Path::new(&db_path))?
    }));
    let credential_store = Arc::new(Mutex::new(open_credential_store(&config)?));

    let api_key = std::env::var(&config.reasoning.api_key_env).unwrap_or_default();
    if api_key.is_empty() {
        warn!(
            "environment variable '{}' is not set; reasoning requests will fail",
            config.reasoning.api_key_env
        );
    }
    let reasoner: Arc<dyn ReasoningEngine> = Arc::new(OpenAiReasoner::new(
        api_key,
        config.reasoning.base_url.clone(),
        config.reasoning.model.clone(),
        config.reasoning.max_tokens,
    ));

    let credentials = Arc::new(CredentialService::new(
        credential_store,
        Arc::new(HttpTokenExchanger::new(config.ads_api.token_url.clone())),
        Arc::new(HttpAccountDirectory::new(config.ads_api.base_url.clone())),
        Duration::from_secs(config.ads_api.account_cache_ttl_secs),
    ));

    let data_provider = Arc::new(HttpAdsDataProvider::new(config.ads_api.base_url.clone()));

    let mut registry = ToolRegistry::new();
    registry.register(Box::new(ListAccounts::new(credentials.clone())));
    registry.register(Box::new(FetchMetrics::new(
        data_provider,
        credentials.clone(),
    )));
    registry.register(Box::new(RenderTable));
    registry.register(Box::new(RenderChart));
    registry.register(Box::new(GenerateImage::new(Arc::new(
        HttpImageGenerator::new(config.ads_api.base_url.clone()),
    ))));
    let registry = Arc::new(registry);

    let orchestrator = Arc::new(Orchestrator::new(
        reasoner.clone(),
        registry.clone(),
        ToolInvoker::new(registry, credentials.clone()),
        credentials,
        sessions.clone(),
        checkpoints,
        memory.clone(),
        patterns,
        config.orchestrator.clone(),
        config.memory.clone(),
    ));

    let state = Arc::new(AppState::new(
        config,
        orchestrator,
        reasoner,
        sessions,
        memory,
    ));

    GatewayServer::new(state).run().await?;
    Ok(())
}
