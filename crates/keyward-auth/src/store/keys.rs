//! Store key layout.
//!
//! | Key | Kind | TTL |
//! |-----|------|-----|
//! | `jwt:blacklist:{token}` | string | remaining token life |
//! | `blacklisted_tokens:{userId}` | set | - |
//! | `jwt:refresh:{userId}:{sessionId}` | string | refresh lifetime |
//! | `session:{sessionId}` | string (JSON) | session lifetime |
//! | `session:user:{userId}` | string (JSON list) | session lifetime |
//! | `auth:event:{userId}:{millis}` | string (JSON) | 24h |
//! | `role:{roleId}`, `permission:{permissionId}` | string (JSON) | - |
//! | `roles:all`, `permissions:all` | set | - |
//! | `roles:by_name`, `permissions:by_name` | hash | - |
//! | `user:{userId}:roles`, `role:{roleName}:users` | set | - |

pub const ROLES_ALL: &str = "roles:all";
pub const ROLES_BY_NAME: &str = "roles:by_name";
pub const PERMISSIONS_ALL: &str = "permissions:all";
pub const PERMISSIONS_BY_NAME: &str = "permissions:by_name";

/// Matches session records and per-user session lists alike.
pub const SESSION_PATTERN: &str = "session:*";
pub const USER_SESSIONS_PREFIX: &str = "session:user:";
pub const USER_ROLES_PATTERN: &str = "user:*:roles";
pub const ROLE_USERS_PATTERN: &str = "role:*:users";

pub fn blacklist(token: &str) -> String {
    format!("jwt:blacklist:{token}")
}

pub fn blacklist_index(user_id: &str) -> String {
    format!("blacklisted_tokens:{user_id}")
}

pub fn refresh(user_id: &str, session_id: &str) -> String {
    format!("jwt:refresh:{user_id}:{session_id}")
}

pub fn session(session_id: &str) -> String {
    format!("session:{session_id}")
}

pub fn user_sessions(user_id: &str) -> String {
    format!("{USER_SESSIONS_PREFIX}{user_id}")
}

pub fn auth_event(user_id: &str, timestamp_millis: i128) -> String {
    format!("auth:event:{user_id}:{timestamp_millis}")
}

/// Glob over one user's events. The id is escaped, so callers still have to
/// check matches with [`event_timestamp`].
pub fn auth_event_pattern(user_id: &str) -> String {
    format!("auth:event:{}:*", escape_glob(user_id))
}

/// Escapes Redis glob metacharacters so `raw` matches only itself.
pub fn escape_glob(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if matches!(ch, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

pub fn role(role_id: &str) -> String {
    format!("role:{role_id}")
}

pub fn permission(permission_id: &str) -> String {
    format!("permission:{permission_id}")
}

pub fn user_roles(user_id: &str) -> String {
    format!("user:{user_id}:roles")
}

pub fn role_users(role_name: &str) -> String {
    format!("role:{role_name}:users")
}

/// Extracts `{userId}` from a `user:{userId}:roles` key.
pub fn user_id_from_roles_key(key: &str) -> Option<&str> {
    key.strip_prefix("user:")?.strip_suffix(":roles")
}

/// Extracts `{roleName}` from a `role:{roleName}:users` key.
pub fn role_name_from_users_key(key: &str) -> Option<&str> {
    key.strip_prefix("role:")?.strip_suffix(":users")
}

/// Extracts the millisecond suffix of `user_id`'s event key.
///
/// `None` for keys of any other user, including ids that merely share a
/// prefix such as `u1` and `u1:evil`.
pub fn event_timestamp(user_id: &str, key: &str) -> Option<i128> {
    let millis = key
        .strip_prefix("auth:event:")?
        .strip_prefix(user_id)?
        .strip_prefix(':')?;
    if millis.is_empty() || !millis.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    millis.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_shapes() {
        assert_eq!(refresh("u1", "s1"), "jwt:refresh:u1:s1");
        assert_eq!(user_sessions("u1"), "session:user:u1");
        assert_eq!(auth_event("u1", 1700000000123), "auth:event:u1:1700000000123");
        assert_eq!(role_users("admin"), "role:admin:users");
    }

    #[test]
    fn test_key_parsing() {
        assert_eq!(user_id_from_roles_key("user:42:roles"), Some("42"));
        assert_eq!(user_id_from_roles_key("user:42"), None);
        assert_eq!(role_name_from_users_key("role:admin:users"), Some("admin"));
        assert_eq!(
            event_timestamp("u1", "auth:event:u1:1700000000123"),
            Some(1700000000123)
        );
        assert_eq!(event_timestamp("u1", "auth:event:u1:evil:1700000000123"), None);
        assert_eq!(event_timestamp("u1", "auth:event:u2:1700000000123"), None);
        assert_eq!(event_timestamp("u1", "auth:event:u1:"), None);
    }

    #[test]
    fn test_event_pattern_escapes_glob() {
        assert_eq!(auth_event_pattern("u1"), "auth:event:u1:*");
        assert_eq!(auth_event_pattern("*"), r"auth:event:\*:*");
        assert_eq!(auth_event_pattern("a?[b]"), r"auth:event:a\?\[b\]:*");
    }
}
