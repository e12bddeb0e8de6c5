use std::time::Duration;

use anyhow::{Context, Result};
use colored::Colorize;
use keyward_auth::{AuthConfig, Authority, StoreBackend, parse_expiry};

use crate::output::{
    print_events, print_field, print_roles, print_sessions, print_success,
};

pub fn check_config(config: &AuthConfig) -> Result<()> {
    print_success("Configuration is valid");
    print_field("Store", format!("{:?}", config.store.backend).to_lowercase());
    if config.store.backend == StoreBackend::Redis {
        print_field("Redis", &config.store.redis_url);
    }
    print_field(
        "Access tokens",
        format!(
            "{} ({})",
            config.tokens.access.expires_in, config.tokens.access.algorithm
        ),
    );
    print_field(
        "Refresh tokens",
        format!(
            "{} ({})",
            config.tokens.refresh.expires_in, config.tokens.refresh.algorithm
        ),
    );
    print_field(
        "Sessions",
        format!(
            "ttl {}s, max {}, rolling {}",
            config.session.ttl.as_secs(),
            config.session.max_sessions,
            config.session.rolling
        ),
    );
    print_field("Default role", &config.rbac.default_role);
    Ok(())
}

pub async fn init_roles(auth: &Authority) -> Result<()> {
    let report = auth.roles.initialize_default_roles().await?;
    print_success(&format!(
        "Created {} permissions and {} roles",
        report.permissions_created, report.roles_created
    ));
    Ok(())
}

pub async fn roles(auth: &Authority) -> Result<()> {
    let roles = auth.roles.list_roles().await?;
    print_roles(&roles);
    Ok(())
}

pub async fn assign_role(auth: &Authority, user: &str, role: &str) -> Result<()> {
    auth.roles.assign_role_to_user(user, role).await?;
    print_success(&format!("Assigned {role} to {user}"));
    Ok(())
}

pub async fn remove_role(auth: &Authority, user: &str, role: &str) -> Result<()> {
    auth.roles.remove_role_from_user(user, role).await?;
    print_success(&format!("Removed {role} from {user}"));
    Ok(())
}

pub async fn whois(auth: &Authority, user: &str) -> Result<()> {
    let roles = auth.roles.user_role_names(user).await?;
    let permissions = auth.roles.user_permissions(user).await?;
    print_field("User", user);
    print_field("Roles", join_or_none(roles.iter()));
    print_field("Permissions", join_or_none(permissions.iter()));
    print_field("Live sessions", auth.sessions.session_count(user).await);
    Ok(())
}

fn join_or_none<'a>(items: impl Iterator<Item = &'a String>) -> String {
    let joined = items.map(String::as_str).collect::<Vec<_>>().join(", ");
    if joined.is_empty() {
        "(none)".to_string()
    } else {
        joined
    }
}

pub async fn sessions(auth: &Authority, user: &str) -> Result<()> {
    let sessions = auth.sessions.user_sessions(user).await;
    print_sessions(&sessions);
    Ok(())
}

pub async fn revoke_sessions(auth: &Authority, user: &str, except: Option<&str>) -> Result<()> {
    let destroyed = auth.sessions.destroy_all_user_sessions(user, except).await;
    print_success(&format!("Destroyed {destroyed} sessions of {user}"));
    Ok(())
}

pub async fn events(auth: &Authority, user: &str, limit: usize) -> Result<()> {
    let events = auth.sessions.user_events(user, limit).await;
    print_events(&events);
    Ok(())
}

pub async fn cleanup_sessions(auth: &Authority) -> Result<()> {
    let cleaned = auth.sessions.cleanup_expired().await;
    print_success(&format!("Removed {cleaned} expired sessions"));
    Ok(())
}

pub async fn cleanup_blacklist(auth: &Authority, user: &str) -> Result<()> {
    let removed = auth.tokens.cleanup_expired_blacklisted(user).await;
    print_success(&format!("Dropped {removed} expired blacklist entries for {user}"));
    Ok(())
}

pub async fn reconcile(auth: &Authority) -> Result<()> {
    let report = auth.roles.reconcile_memberships().await?;
    print_success(&format!(
        "Checked {} links: {} mirrors added, {} orphans removed",
        report.links_checked, report.mirrors_added, report.orphans_removed
    ));
    Ok(())
}

pub async fn run_cleanup(auth: &Authority, interval: Option<&str>) -> Result<()> {
    let interval: Duration = match interval {
        Some(raw) => parse_expiry(raw).with_context(|| format!("invalid interval '{raw}'"))?,
        None => auth.sessions.config().cleanup_interval,
    };
    anyhow::ensure!(!interval.is_zero(), "cleanup interval must be > 0");

    println!(
        "{} every {}s, Ctrl+C to stop",
        "Cleanup running".cyan(),
        interval.as_secs()
    );
    let task = auth.spawn_cleanup_task(interval);

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;
    task.abort();
    tracing::info!("Cleanup stopped");
    Ok(())
}
