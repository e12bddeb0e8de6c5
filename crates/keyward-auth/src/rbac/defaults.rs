//! Built-in role taxonomy seeded by `initialize_default_roles`.

use super::types::{CreateRole, NewPermission};

pub const ROLE_USER: &str = "user";
pub const ROLE_MODERATOR: &str = "moderator";
pub const ROLE_ADMIN: &str = "admin";

/// `(resource, action, description)` of every built-in permission.
const PERMISSIONS: &[(&str, &str, &str)] = &[
    ("profile", "read", "Read own profile"),
    ("profile", "update", "Update own profile"),
    ("content", "read", "Read content"),
    ("content", "create", "Create content"),
    ("content", "update", "Edit own content"),
    ("content", "moderate", "Hide or restore any content"),
    ("content", "delete", "Delete any content"),
    ("users", "read", "List and view users"),
    ("users", "update", "Edit any user"),
    ("users", "delete", "Delete users"),
    ("roles", "read", "View roles and permissions"),
    ("roles", "manage", "Create, edit and assign roles"),
    ("sessions", "manage", "Revoke sessions of any user"),
];

const USER_PERMISSIONS: &[&str] = &[
    "profile:read",
    "profile:update",
    "content:read",
    "content:create",
    "content:update",
];

const MODERATOR_EXTRA: &[&str] = &["content:moderate", "content:delete", "users:read"];

/// Built-in permissions, all marked system.
pub fn default_permissions() -> Vec<NewPermission> {
    PERMISSIONS
        .iter()
        .map(|(resource, action, description)| {
            NewPermission::new(*resource, *action)
                .describe(*description)
                .system()
        })
        .collect()
}

/// Built-in roles, all marked system. `admin` holds every built-in
/// permission.
pub fn default_roles() -> Vec<CreateRole> {
    let admin: Vec<String> = default_permissions().into_iter().map(|p| p.name).collect();

    vec![
        CreateRole::new(ROLE_USER)
            .describe("Regular user")
            .with_permissions(USER_PERMISSIONS.iter().copied())
            .system(),
        CreateRole::new(ROLE_MODERATOR)
            .describe("Content moderator")
            .with_permissions(USER_PERMISSIONS.iter().chain(MODERATOR_EXTRA).copied())
            .system(),
        CreateRole::new(ROLE_ADMIN)
            .describe("Administrator")
            .with_permissions(admin)
            .system(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_roles_only_reference_known_permissions() {
        let known: HashSet<String> = default_permissions().into_iter().map(|p| p.name).collect();
        for role in default_roles() {
            for name in &role.permissions {
                assert!(known.contains(name), "{} references {name}", role.name);
            }
        }
    }

    #[test]
    fn test_taxonomy_is_nested() {
        let roles = default_roles();
        let names: Vec<_> = roles.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec![ROLE_USER, ROLE_MODERATOR, ROLE_ADMIN]);

        let user: HashSet<_> = roles[0].permissions.iter().collect();
        let moderator: HashSet<_> = roles[1].permissions.iter().collect();
        let admin: HashSet<_> = roles[2].permissions.iter().collect();
        assert!(user.is_subset(&moderator));
        assert!(moderator.is_subset(&admin));
        assert!(roles.iter().all(|r| r.is_system));
    }
}
