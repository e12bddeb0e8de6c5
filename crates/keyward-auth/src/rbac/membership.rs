//! User/role membership kept as two mirrored sets.
//!
//! `user:{userId}:roles` is what authorization reads; `role:{roleName}:users`
//! answers "who has this role". The store has no multi-key transactions, so
//! each change is two writes. A failed write is retried once; if the second
//! write still fails, the first is undone. If even that fails, the link is
//! one-sided until [`MembershipRelation::reconcile`] runs.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use crate::AuthResult;
use crate::error::AuthError;
use crate::store::{KeyValueStore, StoreResult, keys};

/// Outcome of a reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// `(user, role)` pairs seen on either side.
    pub links_checked: usize,
    /// Missing role-side entries added for existing user-side grants.
    pub mirrors_added: usize,
    /// Role-side entries removed because the user side had no grant.
    pub orphans_removed: usize,
}

impl ReconcileReport {
    #[must_use]
    pub fn repaired(&self) -> usize {
        self.mirrors_added + self.orphans_removed
    }
}

/// Writes both sides of a user/role link.
#[derive(Clone)]
pub struct MembershipRelation {
    store: Arc<dyn KeyValueStore>,
}

async fn retry_once<T, F, Fut>(mut op: F) -> StoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StoreResult<T>>,
{
    match op().await {
        Ok(value) => Ok(value),
        Err(e) => {
            tracing::debug!(error = %e, "Membership write failed, retrying once");
            op().await
        }
    }
}

impl MembershipRelation {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Grants `role_name` to `user_id` on both sides.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::RoleMutation` if either side cannot be written
    /// after one retry. A grant added by this call is rolled back in that
    /// case; an existing grant is left in place.
    pub async fn link(&self, user_id: &str, role_name: &str) -> AuthResult<()> {
        let user_key = keys::user_roles(user_id);
        let role_key = keys::role_users(role_name);

        let newly_linked = retry_once(|| self.store.set_add(&user_key, role_name))
            .await
            .map_err(|e| AuthError::role_mutation(format!("assign '{role_name}': {e}")))?;

        if let Err(e) = retry_once(|| self.store.set_add(&role_key, user_id)).await {
            if newly_linked && let Err(undo) = self.store.set_remove(&user_key, role_name).await
            {
                tracing::error!(
                    user_id = %user_id,
                    role = %role_name,
                    error = %undo,
                    "Membership rollback failed; link is one-sided until reconciled"
                );
            }
            return Err(AuthError::role_mutation(format!(
                "assign '{role_name}': {e}"
            )));
        }
        Ok(())
    }

    /// Revokes `role_name` from `user_id` on both sides.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::RoleMutation` if either side cannot be written
    /// after one retry. The user side is restored in that case.
    pub async fn unlink(&self, user_id: &str, role_name: &str) -> AuthResult<()> {
        let user_key = keys::user_roles(user_id);
        let role_key = keys::role_users(role_name);

        let was_linked = retry_once(|| self.store.set_remove(&user_key, role_name))
            .await
            .map_err(|e| AuthError::role_mutation(format!("remove '{role_name}': {e}")))?;

        if let Err(e) = retry_once(|| self.store.set_remove(&role_key, user_id)).await {
            if was_linked && let Err(undo) = self.store.set_add(&user_key, role_name).await {
                tracing::error!(
                    user_id = %user_id,
                    role = %role_name,
                    error = %undo,
                    "Membership rollback failed; link is one-sided until reconciled"
                );
            }
            return Err(AuthError::role_mutation(format!(
                "remove '{role_name}': {e}"
            )));
        }
        Ok(())
    }

    pub async fn roles_of(&self, user_id: &str) -> AuthResult<Vec<String>> {
        Ok(self.store.set_members(&keys::user_roles(user_id)).await?)
    }

    pub async fn users_of(&self, role_name: &str) -> AuthResult<Vec<String>> {
        Ok(self.store.set_members(&keys::role_users(role_name)).await?)
    }

    /// Drops every link of a role from both sides.
    ///
    /// Returns the users that held it.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the role side cannot be read or deleted. Per-user
    /// failures are logged and left for reconciliation.
    pub async fn drop_role(&self, role_name: &str) -> AuthResult<Vec<String>> {
        let users = self.users_of(role_name).await?;
        for user_id in &users {
            if let Err(e) = self
                .store
                .set_remove(&keys::user_roles(user_id), role_name)
                .await
            {
                tracing::warn!(user_id = %user_id, role = %role_name, error = %e, "Failed to drop membership");
            }
        }
        self.store.delete(&keys::role_users(role_name)).await?;
        Ok(users)
    }

    /// Repairs one-sided links by scanning both key families.
    ///
    /// The user side is authoritative: a grant present there gets its
    /// role-side mirror added, and a role-side entry with no matching grant is
    /// removed. Effective permissions never change.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if a scan or write fails.
    pub async fn reconcile(&self) -> AuthResult<ReconcileReport> {
        let mut report = ReconcileReport::default();

        let mut user_side: HashMap<String, HashSet<String>> = HashMap::new();
        for key in self.store.keys(keys::USER_ROLES_PATTERN).await? {
            let Some(user_id) = keys::user_id_from_roles_key(&key) else {
                continue;
            };
            let roles = self.store.set_members(&key).await?;
            user_side.insert(user_id.to_string(), roles.into_iter().collect());
        }

        let mut role_side: HashMap<String, HashSet<String>> = HashMap::new();
        for key in self.store.keys(keys::ROLE_USERS_PATTERN).await? {
            let Some(role_name) = keys::role_name_from_users_key(&key) else {
                continue;
            };
            let users = self.store.set_members(&key).await?;
            role_side.insert(role_name.to_string(), users.into_iter().collect());
        }

        for (user_id, roles) in &user_side {
            for role_name in roles {
                report.links_checked += 1;
                let mirrored = role_side
                    .get(role_name)
                    .is_some_and(|users| users.contains(user_id));
                if !mirrored {
                    self.store
                        .set_add(&keys::role_users(role_name), user_id)
                        .await?;
                    report.mirrors_added += 1;
                }
            }
        }

        for (role_name, users) in &role_side {
            for user_id in users {
                let granted = user_side
                    .get(user_id)
                    .is_some_and(|roles| roles.contains(role_name));
                if !granted {
                    report.links_checked += 1;
                    self.store
                        .set_remove(&keys::role_users(role_name), user_id)
                        .await?;
                    report.orphans_removed += 1;
                }
            }
        }

        if report.repaired() > 0 {
            tracing::info!(
                checked = report.links_checked,
                added = report.mirrors_added,
                removed = report.orphans_removed,
                "Reconciled role memberships"
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_link_writes_both_sides() {
        let store = Arc::new(MemoryStore::new());
        let relation = MembershipRelation::new(store.clone());

        relation.link("u1", "admin").await.unwrap();
        assert_eq!(relation.roles_of("u1").await.unwrap(), vec!["admin"]);
        assert_eq!(relation.users_of("admin").await.unwrap(), vec!["u1"]);

        relation.unlink("u1", "admin").await.unwrap();
        assert!(relation.roles_of("u1").await.unwrap().is_empty());
        assert!(relation.users_of("admin").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_drop_role() {
        let store = Arc::new(MemoryStore::new());
        let relation = MembershipRelation::new(store.clone());
        relation.link("u1", "editor").await.unwrap();
        relation.link("u2", "editor").await.unwrap();
        relation.link("u2", "user").await.unwrap();

        let mut users = relation.drop_role("editor").await.unwrap();
        users.sort();
        assert_eq!(users, vec!["u1", "u2"]);
        assert!(relation.roles_of("u1").await.unwrap().is_empty());
        assert_eq!(relation.roles_of("u2").await.unwrap(), vec!["user"]);
    }

    #[tokio::test]
    async fn test_reconcile_repairs_both_directions() {
        let store = Arc::new(MemoryStore::new());
        let relation = MembershipRelation::new(store.clone());

        // Grant visible only on the user side.
        store.set_add(&keys::user_roles("u1"), "admin").await.unwrap();
        // Stale entry visible only on the role side.
        store.set_add(&keys::role_users("admin"), "u2").await.unwrap();
        relation.link("u3", "admin").await.unwrap();

        let report = relation.reconcile().await.unwrap();
        assert_eq!(report.mirrors_added, 1);
        assert_eq!(report.orphans_removed, 1);
        assert_eq!(report.links_checked, 3);

        let mut users = relation.users_of("admin").await.unwrap();
        users.sort();
        assert_eq!(users, vec!["u1", "u3"]);

        assert_eq!(relation.reconcile().await.unwrap().repaired(), 0);
    }
}
