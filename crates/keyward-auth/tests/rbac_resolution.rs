//! Role/permission resolution, cache invalidation and membership repair.

mod common;

use std::sync::Arc;
use std::time::Duration;

use keyward_auth::rbac::defaults::{ROLE_ADMIN, ROLE_MODERATOR, ROLE_USER};
use keyward_auth::store::{KeyValueStore, MemoryStore, keys};
use keyward_auth::{
    AuthError, CreateRole, MembershipRelation, NewPermission, RbacConfig, RoleResolver, UpdateRole,
};

use common::{FaultyStore, authority};

async fn seeded() -> RoleResolver {
    let resolver = RoleResolver::new(Arc::new(MemoryStore::new()), RbacConfig::default());
    resolver.initialize_default_roles().await.unwrap();
    resolver
}

#[tokio::test]
async fn default_roles_resolve_to_permissions() {
    let resolver = seeded().await;
    resolver.assign_role_to_user("alice", ROLE_USER).await.unwrap();
    resolver.assign_role_to_user("bob", ROLE_ADMIN).await.unwrap();

    assert!(resolver.user_has_permission("alice", "content:read").await.unwrap());
    assert!(!resolver.user_has_permission("alice", "users:delete").await.unwrap());
    assert!(resolver.user_has_permission("bob", "users:delete").await.unwrap());
    assert!(
        resolver
            .user_has_any_role("alice", &[ROLE_MODERATOR, ROLE_USER])
            .await
            .unwrap()
    );
    assert!(
        resolver
            .user_has_all_permissions("bob", &["roles:manage", "sessions:manage"])
            .await
            .unwrap()
    );
    assert_eq!(resolver.role_users(ROLE_ADMIN).await.unwrap(), vec!["bob"]);
}

#[tokio::test]
async fn removal_takes_effect_immediately() {
    let resolver = seeded().await;
    resolver.assign_role_to_user("alice", ROLE_MODERATOR).await.unwrap();
    assert!(resolver.user_has_permission("alice", "content:moderate").await.unwrap());

    resolver.remove_role_from_user("alice", ROLE_MODERATOR).await.unwrap();

    assert!(!resolver.user_has_permission("alice", "content:moderate").await.unwrap());
    assert!(!resolver.user_has_role("alice", ROLE_MODERATOR).await.unwrap());
}

#[tokio::test]
async fn role_update_invalidates_member_cache() {
    let resolver = seeded().await;
    let role = resolver
        .create_role(CreateRole::new("auditor").with_permissions(["users:read"]))
        .await
        .unwrap();
    resolver.assign_role_to_user("carol", "auditor").await.unwrap();
    assert!(resolver.user_has_permission("carol", "users:read").await.unwrap());

    resolver
        .update_role(
            &role.id,
            UpdateRole {
                permissions: Some(vec!["roles:read".to_string()]),
                ..UpdateRole::default()
            },
        )
        .await
        .unwrap();
    assert!(!resolver.user_has_permission("carol", "users:read").await.unwrap());
    assert!(resolver.user_has_permission("carol", "roles:read").await.unwrap());

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
    assert!(resolver.user_permissions("carol").await.unwrap().is_empty());
}

#[tokio::test]
async fn direct_store_changes_visible_after_cache_ttl() {
    let store = Arc::new(MemoryStore::new());
    let config = RbacConfig {
        cache_ttl: Duration::from_millis(100),
        ..RbacConfig::default()
    };
    let resolver = RoleResolver::new(store.clone(), config);
    resolver.initialize_default_roles().await.unwrap();
    resolver.assign_role_to_user("dave", ROLE_USER).await.unwrap();
    assert!(resolver.user_has_role("dave", ROLE_USER).await.unwrap());

    // Bypass the resolver so no invalidation happens.
    store
        .set_remove(&keys::user_roles("dave"), ROLE_USER)
        .await
        .unwrap();
    assert!(resolver.user_has_role("dave", ROLE_USER).await.unwrap());

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(!resolver.user_has_role("dave", ROLE_USER).await.unwrap());
}

#[tokio::test]
async fn delete_role_drops_memberships() {
    let resolver = seeded().await;
    let role = resolver.create_role(CreateRole::new("temp")).await.unwrap();
    resolver.assign_role_to_user("erin", "temp").await.unwrap();

    resolver.delete_role(&role.id).await.unwrap();

    assert!(resolver.get_role_by_name("temp").await.unwrap().is_none());
    assert!(!resolver.user_has_role("erin", "temp").await.unwrap());
    assert!(resolver.role_users("temp").await.unwrap().is_empty());
}

#[tokio::test]
async fn system_records_are_protected() {
    let resolver = seeded().await;
    let admin = resolver.get_role_by_name(ROLE_ADMIN).await.unwrap().unwrap();
    let err = resolver.delete_role(&admin.id).await.unwrap_err();
    assert!(matches!(err, AuthError::RoleMutation { .. }));

    let read = resolver
        .get_permission_by_name("content:read")
        .await
        .unwrap()
        .unwrap();
    let err = resolver.delete_permission(&read.id).await.unwrap_err();
    assert!(matches!(err, AuthError::RoleMutation { .. }));
}

#[tokio::test]
async fn deleting_permission_strips_it_from_roles() {
    let resolver = seeded().await;
    let permission = resolver
        .create_permission(NewPermission::new("reports", "export"))
        .await
        .unwrap();
    resolver
        .create_role(CreateRole::new("analyst").with_permissions(["reports:export"]))
        .await
        .unwrap();
    resolver.assign_role_to_user("frank", "analyst").await.unwrap();
    assert!(resolver.user_has_permission("frank", "reports:export").await.unwrap());

    resolver.delete_permission(&permission.id).await.unwrap();

    assert!(!resolver.user_has_permission("frank", "reports:export").await.unwrap());
    let analyst = resolver.get_role_by_name("analyst").await.unwrap().unwrap();
    assert!(analyst.permissions.is_empty());
}

#[tokio::test]
async fn assigning_unknown_role_fails() {
    let resolver = seeded().await;
    let err = resolver
        .assign_role_to_user("gina", "nonexistent")
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::NotFound { .. }));
}

#[tokio::test]
async fn default_role_comes_from_config() {
    let auth = authority();
    auth.roles.initialize_default_roles().await.unwrap();
    auth.roles.assign_default_role("hank").await.unwrap();
    assert!(auth.roles.user_has_role("hank", ROLE_USER).await.unwrap());
}

#[tokio::test]
async fn reconcile_repairs_one_sided_links() {
    let store = Arc::new(MemoryStore::new());
    let resolver = RoleResolver::new(store.clone(), RbacConfig::default());
    resolver.initialize_default_roles().await.unwrap();

    // Grant without mirror, and mirror without grant.
    store
        .set_add(&keys::user_roles("ivan"), ROLE_ADMIN)
        .await
        .unwrap();
    store
        .set_add(&keys::role_users(ROLE_MODERATOR), "judy")
        .await
        .unwrap();

    let report = resolver.reconcile_memberships().await.unwrap();
    assert_eq!(report.mirrors_added, 1);
    assert_eq!(report.orphans_removed, 1);

    assert_eq!(resolver.role_users(ROLE_ADMIN).await.unwrap(), vec!["ivan"]);
    assert!(resolver.role_users(ROLE_MODERATOR).await.unwrap().is_empty());

    let again = resolver.reconcile_memberships().await.unwrap();
    assert_eq!(again.repaired(), 0);
}

#[tokio::test]
async fn failed_relink_keeps_existing_grant() {
    let store = FaultyStore::new();
    let relation = MembershipRelation::new(store.clone());
    store.set_add(&keys::user_roles("alice"), "admin").await.unwrap();

    store.fail_writes_under(Some("role:"));
    let err = relation.link("alice", "admin").await.unwrap_err();
    assert!(matches!(err, AuthError::RoleMutation { .. }));
    store.fail_writes_under(None);

    assert_eq!(relation.roles_of("alice").await.unwrap(), vec!["admin"]);
}

#[tokio::test]
async fn failed_link_rolls_back_new_grant() {
    let store = FaultyStore::new();
    let relation = MembershipRelation::new(store.clone());

    store.fail_writes_under(Some("role:"));
    assert!(relation.link("alice", "admin").await.is_err());
    store.fail_writes_under(None);

    assert!(relation.roles_of("alice").await.unwrap().is_empty());
    assert!(relation.users_of("admin").await.unwrap().is_empty());
}
