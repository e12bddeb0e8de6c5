use colored::Colorize;
use keyward_auth::{AuthEvent, Role, Session};
use tabled::builder::Builder;
use tabled::settings::Style;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

pub fn print_success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

pub fn print_field(label: &str, value: impl std::fmt::Display) {
    println!("{}: {}", label.cyan(), value);
}

fn timestamp(at: OffsetDateTime) -> String {
    at.format(&Rfc3339).unwrap_or_else(|_| at.to_string())
}

pub fn print_roles(roles: &[Role]) {
    if roles.is_empty() {
        println!("No roles found.");
        return;
    }
    let mut builder = Builder::default();
    builder.push_record(["Name", "Active", "System", "Permissions"]);
    for role in roles {
        builder.push_record([
            role.name.clone(),
            role.is_active.to_string(),
            role.is_system.to_string(),
            role.permission_names().collect::<Vec<_>>().join(", "),
        ]);
    }
    println!("{}", builder.build().with(Style::rounded()));
}

pub fn print_sessions(sessions: &[Session]) {
    if sessions.is_empty() {
        println!("No live sessions.");
        return;
    }
    let mut builder = Builder::default();
    builder.push_record(["Session", "Device", "Created", "Last active", "Expires"]);
    for session in sessions {
        builder.push_record([
            session.session_id.clone(),
            session.device_id.clone().unwrap_or_else(|| "-".to_string()),
            timestamp(session.created_at),
            timestamp(session.last_active_at),
            timestamp(session.expires_at),
        ]);
    }
    println!("{}", builder.build().with(Style::rounded()));
    println!("Total: {}", sessions.len());
}

pub fn print_events(events: &[AuthEvent]) {
    if events.is_empty() {
        println!("No events recorded.");
        return;
    }
    let mut builder = Builder::default();
    builder.push_record(["Time", "Event", "Result", "Session", "IP"]);
    for event in events {
        let result = if event.success { "ok" } else { "failed" };
        builder.push_record([
            timestamp(event.timestamp),
            event.event_type.to_string(),
            result.to_string(),
            event.session_id.clone().unwrap_or_else(|| "-".to_string()),
            event.ip.clone().unwrap_or_else(|| "-".to_string()),
        ]);
    }
    println!("{}", builder.build().with(Style::rounded()));
}
