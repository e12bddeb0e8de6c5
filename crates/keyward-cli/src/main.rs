mod cli;
mod commands;
mod config;
mod observability;
mod output;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use keyward_auth::store::{KeyValueStore, MemoryStore};
use keyward_auth::{AuthConfig, Authority, StoreBackend};
use keyward_store_redis::{RedisStore, RedisStoreConfig};

use cli::{BackendArg, Cli, Commands};
use output::print_error;

#[tokio::main]
async fn main() {
    // .env is optional
    if let Err(e) = dotenvy::dotenv()
        && !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
    {
        eprintln!("Warning: Failed to load .env file: {e}");
    }

    if let Err(e) = run().await {
        print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    observability::init_tracing(&cli.log_level);

    let mut config = config::load_config(&cli.config)?;
    if let Some(backend) = cli.backend {
        config.store.backend = match backend {
            BackendArg::Memory => StoreBackend::Memory,
            BackendArg::Redis => StoreBackend::Redis,
        };
        config.validate()?;
    }

    if let Commands::CheckConfig = cli.command {
        return commands::check_config(&config);
    }

    let auth = Authority::new(&config, open_store(&config).await?)?;

    match &cli.command {
        Commands::CheckConfig => {}
        Commands::InitRoles => commands::init_roles(&auth).await?,
        Commands::Roles => commands::roles(&auth).await?,
        Commands::AssignRole(args) => commands::assign_role(&auth, &args.user, &args.role).await?,
        Commands::RemoveRole(args) => commands::remove_role(&auth, &args.user, &args.role).await?,
        Commands::Whois(args) => commands::whois(&auth, &args.user).await?,
        Commands::Sessions(args) => commands::sessions(&auth, &args.user).await?,
        Commands::RevokeSessions(args) => {
            commands::revoke_sessions(&auth, &args.user, args.except.as_deref()).await?;
        }
        Commands::Events(args) => commands::events(&auth, &args.user, args.limit).await?,
        Commands::CleanupSessions => commands::cleanup_sessions(&auth).await?,
        Commands::CleanupBlacklist(args) => commands::cleanup_blacklist(&auth, &args.user).await?,
        Commands::Reconcile => commands::reconcile(&auth).await?,
        Commands::RunCleanup(args) => commands::run_cleanup(&auth, args.interval.as_deref()).await?,
    }

    Ok(())
}

async fn open_store(config: &AuthConfig) -> Result<Arc<dyn KeyValueStore>> {
    Ok(match config.store.backend {
        StoreBackend::Memory => {
            tracing::warn!("Using the in-memory store; state ends with this process");
            Arc::new(MemoryStore::new())
        }
        StoreBackend::Redis => {
            let store = RedisStore::connect(&RedisStoreConfig::from(&config.store)).await?;
            Arc::new(store)
        }
    })
}
