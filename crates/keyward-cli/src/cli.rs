use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "keyward")]
#[command(about = "Keyward maintenance CLI: seed roles, sweep expired state, inspect users")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file path (missing file means defaults + environment)
    #[arg(short, long, global = true, env = "KEYWARD_CONFIG", default_value = "keyward.toml")]
    pub config: String,

    /// Store backend (overrides store.backend)
    #[arg(short, long, global = true)]
    pub backend: Option<BackendArg>,

    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum BackendArg {
    Memory,
    Redis,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate the configuration and print a summary
    CheckConfig,
    /// Create the built-in permissions and roles if missing
    InitRoles,
    /// List roles and their permissions
    Roles,
    /// Grant a role to a user
    AssignRole(RoleArgs),
    /// Take a role away from a user
    RemoveRole(RoleArgs),
    /// Show a user's effective roles and permissions
    Whois(UserArgs),
    /// List a user's live sessions
    Sessions(UserArgs),
    /// Destroy a user's sessions
    RevokeSessions(RevokeSessionsArgs),
    /// Show a user's recent auth events
    Events(EventsArgs),
    /// Destroy every expired session once
    CleanupSessions,
    /// Drop expired entries from a user's blacklist index
    CleanupBlacklist(UserArgs),
    /// Repair one-sided user/role memberships
    Reconcile,
    /// Run the session cleanup loop until interrupted
    RunCleanup(RunCleanupArgs),
}

#[derive(clap::Args)]
pub struct UserArgs {
    /// User id
    #[arg(short, long)]
    pub user: String,
}

#[derive(clap::Args)]
pub struct RoleArgs {
    /// User id
    #[arg(short, long)]
    pub user: String,
    /// Role name
    #[arg(short, long)]
    pub role: String,
}

#[derive(clap::Args)]
pub struct RevokeSessionsArgs {
    /// User id
    #[arg(short, long)]
    pub user: String,
    /// Session id to keep
    #[arg(long)]
    pub except: Option<String>,
}

#[derive(clap::Args)]
pub struct EventsArgs {
    /// User id
    #[arg(short, long)]
    pub user: String,
    /// Maximum number of events
    #[arg(short, long, default_value_t = 20)]
    pub limit: usize,
}

#[derive(clap::Args)]
pub struct RunCleanupArgs {
    /// Sweep period (e.g. 30s, 15m); defaults to session.cleanup_interval
    #[arg(long)]
    pub interval: Option<String>,
}
