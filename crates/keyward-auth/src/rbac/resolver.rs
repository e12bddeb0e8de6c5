//! Role and permission resolution.
//!
//! Roles and permissions are JSON records indexed by id (`roles:all`,
//! `permissions:all`) and by name (`roles:by_name`, `permissions:by_name`).
//! A role embeds full copies of its permissions.
//!
//! `user_roles` and `role_permissions` read through injected
//! [`TimedCache`]s. Entries are dropped on every mutation that could change
//! them and otherwise expire on their TTL; reads never revalidate.

use std::collections::BTreeSet;
use std::sync::Arc;

use time::OffsetDateTime;
use uuid::Uuid;

use super::defaults::{default_permissions, default_roles};
use super::membership::{MembershipRelation, ReconcileReport};
use super::types::{CreateRole, NewPermission, Permission, Role, UpdateRole};
use crate::AuthResult;
use crate::cache::{LocalTimedCache, TimedCache};
use crate::config::RbacConfig;
use crate::error::AuthError;
use crate::store::{KeyValueStore, get_json, keys, set_json};

/// What `initialize_default_roles` created on this run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub permissions_created: usize,
    pub roles_created: usize,
}

/// Role/permission store with cached lookups.
pub struct RoleResolver {
    store: Arc<dyn KeyValueStore>,
    memberships: MembershipRelation,
    user_roles_cache: Arc<dyn TimedCache<Vec<Role>>>,
    role_permissions_cache: Arc<dyn TimedCache<Vec<Permission>>>,
    config: RbacConfig,
}

impl RoleResolver {
    /// Creates a resolver with local caches using `config.cache_ttl`.
    pub fn new(store: Arc<dyn KeyValueStore>, config: RbacConfig) -> Self {
        let user_roles_cache = Arc::new(LocalTimedCache::<Vec<Role>>::new(config.cache_ttl));
        let role_permissions_cache =
            Arc::new(LocalTimedCache::<Vec<Permission>>::new(config.cache_ttl));
        Self::with_caches(store, config, user_roles_cache, role_permissions_cache)
    }

    /// Creates a resolver with caller-provided caches.
    pub fn with_caches(
        store: Arc<dyn KeyValueStore>,
        config: RbacConfig,
        user_roles_cache: Arc<dyn TimedCache<Vec<Role>>>,
        role_permissions_cache: Arc<dyn TimedCache<Vec<Permission>>>,
    ) -> Self {
        if config.enable_hierarchy {
            tracing::warn!("Role hierarchy is enabled in config but is not evaluated");
        }
        Self {
            memberships: MembershipRelation::new(Arc::clone(&store)),
            store,
            user_roles_cache,
            role_permissions_cache,
            config,
        }
    }

    // ------------------------------------------------------------------------
    // Permissions
    // ------------------------------------------------------------------------

    /// # Errors
    ///
    /// `RoleMutation` if the name is empty or taken; `Storage` on store
    /// failure.
    pub async fn create_permission(&self, new: NewPermission) -> AuthResult<Permission> {
        if new.name.trim().is_empty() {
            return Err(AuthError::role_mutation("permission name cannot be empty"));
        }
        if self
            .store
            .hash_get(keys::PERMISSIONS_BY_NAME, &new.name)
            .await?
            .is_some()
        {
            return Err(AuthError::role_mutation(format!(
                "permission '{}' already exists",
                new.name
            )));
        }

        let now = OffsetDateTime::now_utc();
        let permission = Permission {
            id: Uuid::new_v4().to_string(),
            name: new.name,
            resource: new.resource,
            action: new.action,
            description: new.description,
            is_system: new.is_system,
            created_at: now,
            updated_at: now,
        };

        set_json(
            self.store.as_ref(),
            &keys::permission(&permission.id),
            &permission,
        )
        .await?;
        self.store
            .set_add(keys::PERMISSIONS_ALL, &permission.id)
            .await?;
        self.store
            .hash_set(keys::PERMISSIONS_BY_NAME, &permission.name, &permission.id)
            .await?;

        tracing::info!(permission = %permission.name, "Permission created");
        Ok(permission)
    }

    pub async fn get_permission(&self, id: &str) -> AuthResult<Option<Permission>> {
        Ok(get_json(self.store.as_ref(), &keys::permission(id)).await?)
    }

    pub async fn get_permission_by_name(&self, name: &str) -> AuthResult<Option<Permission>> {
        match self.store.hash_get(keys::PERMISSIONS_BY_NAME, name).await? {
            Some(id) => self.get_permission(&id).await,
            None => Ok(None),
        }
    }

    /// All permissions, sorted by name.
    pub async fn list_permissions(&self) -> AuthResult<Vec<Permission>> {
        let mut permissions = Vec::new();
        for id in self.store.set_members(keys::PERMISSIONS_ALL).await? {
            if let Some(permission) = self.get_permission(&id).await? {
                permissions.push(permission);
            }
        }
        permissions.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(permissions)
    }

    /// Deletes a permission and strips it from every role that embeds it.
    ///
    /// # Errors
    ///
    /// `NotFound` if absent; `RoleMutation` for system permissions.
    pub async fn delete_permission(&self, id: &str) -> AuthResult<()> {
        let permission = self
            .get_permission(id)
            .await?
            .ok_or_else(|| AuthError::not_found("Permission", id))?;
        if permission.is_system {
            return Err(AuthError::role_mutation(format!(
                "cannot delete system permission '{}'",
                permission.name
            )));
        }

        for mut role in self.list_roles().await? {
            let before = role.permissions.len();
            role.permissions.retain(|p| p.id != permission.id);
            if role.permissions.len() != before {
                role.updated_at = OffsetDateTime::now_utc();
                set_json(self.store.as_ref(), &keys::role(&role.id), &role).await?;
            }
        }

        self.store.delete(&keys::permission(id)).await?;
        self.store.set_remove(keys::PERMISSIONS_ALL, id).await?;
        self.store
            .hash_delete(keys::PERMISSIONS_BY_NAME, &permission.name)
            .await?;

        self.user_roles_cache.clear().await;
        self.role_permissions_cache.clear().await;

        tracing::info!(permission = %permission.name, "Permission deleted");
        Ok(())
    }

    async fn resolve_permissions(&self, names: &[String]) -> AuthResult<Vec<Permission>> {
        let mut seen = BTreeSet::new();
        let mut permissions = Vec::with_capacity(names.len());
        for name in names {
            if !seen.insert(name.as_str()) {
                continue;
            }
            let permission = self
                .get_permission_by_name(name)
                .await?
                .ok_or_else(|| AuthError::role_mutation(format!("unknown permission '{name}'")))?;
            permissions.push(permission);
        }
        Ok(permissions)
    }

    // ------------------------------------------------------------------------
    // Roles
    // ------------------------------------------------------------------------

    /// # Errors
    ///
    /// `RoleMutation` if the name is empty or taken or a permission name is
    /// unknown; `Storage` on store failure.
    pub async fn create_role(&self, new: CreateRole) -> AuthResult<Role> {
        if new.name.trim().is_empty() {
            return Err(AuthError::role_mutation("role name cannot be empty"));
        }
        if self
            .store
            .hash_get(keys::ROLES_BY_NAME, &new.name)
            .await?
            .is_some()
        {
            return Err(AuthError::role_mutation(format!(
                "role '{}' already exists",
                new.name
            )));
        }

        let permissions = self.resolve_permissions(&new.permissions).await?;
        let now = OffsetDateTime::now_utc();
        let role = Role {
            id: Uuid::new_v4().to_string(),
            name: new.name,
            description: new.description,
            permissions,
            is_system: new.is_system,
            is_active: true,
            created_at: now,
            updated_at: now,
        };

        set_json(self.store.as_ref(), &keys::role(&role.id), &role).await?;
        self.store.set_add(keys::ROLES_ALL, &role.id).await?;
        self.store
            .hash_set(keys::ROLES_BY_NAME, &role.name, &role.id)
            .await?;

        tracing::info!(role = %role.name, permissions = role.permissions.len(), "Role created");
        Ok(role)
    }

    pub async fn get_role(&self, id: &str) -> AuthResult<Option<Role>> {
        Ok(get_json(self.store.as_ref(), &keys::role(id)).await?)
    }

    pub async fn get_role_by_name(&self, name: &str) -> AuthResult<Option<Role>> {
        match self.store.hash_get(keys::ROLES_BY_NAME, name).await? {
            Some(id) => self.get_role(&id).await,
            None => Ok(None),
        }
    }

    /// All roles, sorted by name.
    pub async fn list_roles(&self) -> AuthResult<Vec<Role>> {
        let mut roles = Vec::new();
        for id in self.store.set_members(keys::ROLES_ALL).await? {
            if let Some(role) = self.get_role(&id).await? {
                roles.push(role);
            }
        }
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(roles)
    }

    /// Applies a partial update.
    ///
    /// # Errors
    ///
    /// `NotFound` if absent; `RoleMutation` if a permission name is unknown.
    pub async fn update_role(&self, id: &str, update: UpdateRole) -> AuthResult<Role> {
        let mut role = self
            .get_role(id)
            .await?
            .ok_or_else(|| AuthError::not_found("Role", id))?;

        if let Some(description) = update.description {
            role.description = Some(description);
        }
        if let Some(names) = update.permissions {
            role.permissions = self.resolve_permissions(&names).await?;
        }
        if let Some(active) = update.is_active {
            role.is_active = active;
        }
        role.updated_at = OffsetDateTime::now_utc();

        set_json(self.store.as_ref(), &keys::role(&role.id), &role).await?;
        self.invalidate_role(&role.name).await;

        tracing::info!(role = %role.name, active = role.is_active, "Role updated");
        Ok(role)
    }

    /// Deletes a role and every membership in it.
    ///
    /// # Errors
    ///
    /// `NotFound` if absent; `RoleMutation` for system roles.
    pub async fn delete_role(&self, id: &str) -> AuthResult<()> {
        let role = self
            .get_role(id)
            .await?
            .ok_or_else(|| AuthError::not_found("Role", id))?;
        if role.is_system {
            return Err(AuthError::role_mutation(format!(
                "cannot delete system role '{}'",
                role.name
            )));
        }

        let members = self.memberships.drop_role(&role.name).await?;
        self.store.delete(&keys::role(id)).await?;
        self.store.set_remove(keys::ROLES_ALL, id).await?;
        self.store
            .hash_delete(keys::ROLES_BY_NAME, &role.name)
            .await?;

        self.role_permissions_cache.invalidate(&role.name).await;
        for user_id in &members {
            self.user_roles_cache.invalidate(user_id).await;
        }

        tracing::info!(role = %role.name, members = members.len(), "Role deleted");
        Ok(())
    }

    async fn invalidate_role(&self, role_name: &str) {
        self.role_permissions_cache.invalidate(role_name).await;
        match self.memberships.users_of(role_name).await {
            Ok(users) => {
                for user_id in users {
                    self.user_roles_cache.invalidate(&user_id).await;
                }
            }
            Err(e) => {
                tracing::warn!(role = %role_name, error = %e, "Could not list role members; clearing user cache");
                self.user_roles_cache.clear().await;
            }
        }
    }

    // ------------------------------------------------------------------------
    // Memberships
    // ------------------------------------------------------------------------

    /// # Errors
    ///
    /// `NotFound` if the role does not exist; `RoleMutation` if the
    /// membership cannot be written.
    pub async fn assign_role_to_user(&self, user_id: &str, role_name: &str) -> AuthResult<()> {
        if self.get_role_by_name(role_name).await?.is_none() {
            return Err(AuthError::not_found("Role", role_name));
        }
        self.memberships.link(user_id, role_name).await?;
        self.user_roles_cache.invalidate(user_id).await;
        tracing::info!(user_id = %user_id, role = %role_name, "Role assigned");
        Ok(())
    }

    /// # Errors
    ///
    /// `RoleMutation` if the membership cannot be written.
    pub async fn remove_role_from_user(&self, user_id: &str, role_name: &str) -> AuthResult<()> {
        let result = self.memberships.unlink(user_id, role_name).await;
        self.user_roles_cache.invalidate(user_id).await;
        result?;
        tracing::info!(user_id = %user_id, role = %role_name, "Role removed");
        Ok(())
    }

    /// Assigns the configured default role.
    ///
    /// # Errors
    ///
    /// As [`assign_role_to_user`](Self::assign_role_to_user).
    pub async fn assign_default_role(&self, user_id: &str) -> AuthResult<()> {
        self.assign_role_to_user(user_id, &self.config.default_role)
            .await
    }

    /// Users holding a role.
    pub async fn role_users(&self, role_name: &str) -> AuthResult<Vec<String>> {
        let mut users = self.memberships.users_of(role_name).await?;
        users.sort();
        Ok(users)
    }

    /// Repairs one-sided memberships and drops all cached user roles.
    pub async fn reconcile_memberships(&self) -> AuthResult<ReconcileReport> {
        let report = self.memberships.reconcile().await?;
        if report.repaired() > 0 {
            self.user_roles_cache.clear().await;
        }
        Ok(report)
    }

    /// Drops expired entries from both lookup caches. Returns the count.
    pub fn cleanup_cache(&self) -> usize {
        self.user_roles_cache.cleanup_expired() + self.role_permissions_cache.cleanup_expired()
    }

    // ------------------------------------------------------------------------
    // Resolution
    // ------------------------------------------------------------------------

    /// Active roles of a user, sorted by name. Cached.
    pub async fn user_roles(&self, user_id: &str) -> AuthResult<Vec<Role>> {
        if let Some(roles) = self.user_roles_cache.get(user_id).await {
            return Ok(roles);
        }

        let mut roles = Vec::new();
        for name in self.memberships.roles_of(user_id).await? {
            match self.get_role_by_name(&name).await? {
                Some(role) if role.is_active => roles.push(role),
                Some(_) => {}
                None => tracing::debug!(user_id = %user_id, role = %name, "Assigned role no longer exists"),
            }
        }
        roles.sort_by(|a, b| a.name.cmp(&b.name));

        self.user_roles_cache
            .insert(user_id.to_string(), roles.clone())
            .await;
        Ok(roles)
    }

    /// Permissions embedded in a role; empty if the role does not exist.
    /// Cached.
    pub async fn role_permissions(&self, role_name: &str) -> AuthResult<Vec<Permission>> {
        if let Some(permissions) = self.role_permissions_cache.get(role_name).await {
            return Ok(permissions);
        }

        let permissions = self
            .get_role_by_name(role_name)
            .await?
            .map(|role| role.permissions)
            .unwrap_or_default();

        self.role_permissions_cache
            .insert(role_name.to_string(), permissions.clone())
            .await;
        Ok(permissions)
    }

    /// Names of every permission granted through the user's active roles.
    pub async fn user_permissions(&self, user_id: &str) -> AuthResult<BTreeSet<String>> {
        let mut names = BTreeSet::new();
        for role in self.user_roles(user_id).await? {
            for permission in self.role_permissions(&role.name).await? {
                names.insert(permission.name);
            }
        }
        Ok(names)
    }

    /// Names of the user's active roles.
    pub async fn user_role_names(&self, user_id: &str) -> AuthResult<BTreeSet<String>> {
        Ok(self
            .user_roles(user_id)
            .await?
            .into_iter()
            .map(|role| role.name)
            .collect())
    }

    pub async fn user_has_role(&self, user_id: &str, role_name: &str) -> AuthResult<bool> {
        Ok(self
            .user_roles(user_id)
            .await?
            .iter()
            .any(|role| role.name == role_name))
    }

    pub async fn user_has_permission(&self, user_id: &str, permission: &str) -> AuthResult<bool> {
        Ok(self.user_permissions(user_id).await?.contains(permission))
    }

    pub async fn user_has_any_role(&self, user_id: &str, role_names: &[&str]) -> AuthResult<bool> {
        let held = self.user_role_names(user_id).await?;
        Ok(role_names.iter().any(|name| held.contains(*name)))
    }

    /// `true` for an empty `permissions` list.
    pub async fn user_has_all_permissions(
        &self,
        user_id: &str,
        permissions: &[&str],
    ) -> AuthResult<bool> {
        let held = self.user_permissions(user_id).await?;
        Ok(permissions.iter().all(|name| held.contains(*name)))
    }

    // ------------------------------------------------------------------------
    // Seeding
    // ------------------------------------------------------------------------

    /// Creates the built-in permissions and the `user`, `moderator` and
    /// `admin` roles, skipping any that already exist.
    pub async fn initialize_default_roles(&self) -> AuthResult<SeedReport> {
        let mut report = SeedReport::default();

        for permission in default_permissions() {
            if self.get_permission_by_name(&permission.name).await?.is_none() {
                self.create_permission(permission).await?;
                report.permissions_created += 1;
            }
        }

        for role in default_roles() {
            if self.get_role_by_name(&role.name).await?.is_none() {
                self.create_role(role).await?;
                report.roles_created += 1;
            }
        }

        tracing::info!(
            permissions = report.permissions_created,
            roles = report.roles_created,
            "Default roles initialized"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rbac::defaults::{ROLE_ADMIN, ROLE_USER};
    use crate::store::MemoryStore;

    fn resolver() -> RoleResolver {
        RoleResolver::new(Arc::new(MemoryStore::new()), RbacConfig::default())
    }

    #[tokio::test]
    async fn test_seed_is_idempotent() {
        let resolver = resolver();
        let first = resolver.initialize_default_roles().await.unwrap();
        assert_eq!(first.roles_created, 3);
        assert!(first.permissions_created > 0);

        let second = resolver.initialize_default_roles().await.unwrap();
        assert_eq!(second, SeedReport::default());
        assert_eq!(resolver.list_roles().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_duplicate_and_unknown_names_rejected() {
        let resolver = resolver();
        resolver
            .create_permission(NewPermission::new("reports", "read"))
            .await
            .unwrap();

        let err = resolver
            .create_permission(NewPermission::new("reports", "read"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::RoleMutation { .. }));

        let err = resolver
            .create_role(CreateRole::new("analyst").with_permissions(["reports:write"]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("reports:write"));
    }

    #[tokio::test]
    async fn test_system_role_and_permission_protected() {
        let resolver = resolver();
        resolver.initialize_default_roles().await.unwrap();

        let admin = resolver.get_role_by_name(ROLE_ADMIN).await.unwrap().unwrap();
        let err = resolver.delete_role(&admin.id).await.unwrap_err();
        assert!(matches!(err, AuthError::RoleMutation { .. }));

        let perm = resolver
            .get_permission_by_name("users:delete")
            .await
            .unwrap()
            .unwrap();
        let err = resolver.delete_permission(&perm.id).await.unwrap_err();
        assert!(matches!(err, AuthError::RoleMutation { .. }));
    }

    #[tokio::test]
    async fn test_user_permissions_union() {
        let resolver = resolver();
        resolver.initialize_default_roles().await.unwrap();
        resolver.assign_default_role("u1").await.unwrap();

        assert!(resolver.user_has_role("u1", ROLE_USER).await.unwrap());
        assert!(resolver.user_has_permission("u1", "content:create").await.unwrap());
        assert!(!resolver.user_has_permission("u1", "users:delete").await.unwrap());
        assert!(
            resolver
                .user_has_any_role("u1", &["moderator", ROLE_USER])
                .await
                .unwrap()
        );
        assert!(
            resolver
                .user_has_all_permissions("u1", &["content:read", "profile:read"])
                .await
                .unwrap()
        );
        assert!(
            !resolver
                .user_has_all_permissions("u1", &["content:read", "roles:manage"])
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_assign_unknown_role() {
        let err = resolver()
            .assign_role_to_user("u1", "ghost")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_deactivated_role_grants_nothing() {
        let resolver = resolver();
        let perm = resolver
            .create_permission(NewPermission::new("reports", "read"))
            .await
            .unwrap();
        let role = resolver
            .create_role(CreateRole::new("analyst").with_permissions([perm.name.clone()]))
            .await
            .unwrap();
        resolver.assign_role_to_user("u1", "analyst").await.unwrap();
        assert!(resolver.user_has_permission("u1", "reports:read").await.unwrap());

        resolver
            .update_role(
                &role.id,
                UpdateRole {
                    is_active: Some(false),
                    ..UpdateRole::default()
                },
            )
            .await
            .unwrap();
        assert!(!resolver.user_has_permission("u1", "reports:read").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_permission_strips_roles() {
        let resolver = resolver();
        let perm = resolver
            .create_permission(NewPermission::new("reports", "read"))
            .await
            .unwrap();
        resolver
            .create_role(CreateRole::new("analyst").with_permissions([perm.name.clone()]))
            .await
            .unwrap();
        resolver.assign_role_to_user("u1", "analyst").await.unwrap();
        assert!(resolver.user_has_permission("u1", "reports:read").await.unwrap());

        resolver.delete_permission(&perm.id).await.unwrap();

        let role = resolver.get_role_by_name("analyst").await.unwrap().unwrap();
        assert!(role.permissions.is_empty());
        assert!(!resolver.user_has_permission("u1", "reports:read").await.unwrap());
        assert!(resolver.get_permission_by_name("reports:read").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_role_cleans_memberships() {
        let resolver = resolver();
        let role = resolver.create_role(CreateRole::new("temp")).await.unwrap();
        resolver.assign_role_to_user("u1", "temp").await.unwrap();
        assert!(resolver.user_has_role("u1", "temp").await.unwrap());

        resolver.delete_role(&role.id).await.unwrap();
        assert!(!resolver.user_has_role("u1", "temp").await.unwrap());
        assert!(resolver.role_users("temp").await.unwrap().is_empty());
        assert!(resolver.get_role_by_name("temp").await.unwrap().is_none());
    }
}
