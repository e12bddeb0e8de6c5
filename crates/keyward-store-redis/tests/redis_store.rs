//! Integration tests for the Redis store.
//!
//! **Requirements:** Docker running.
//!
//! Run with: cargo test -p keyward-store-redis --test redis_store -- --ignored

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use keyward_auth::store::{KeyTtl, KeyValueStore, StoreError};
use keyward_auth::{AccessGrant, AuthConfig, Authority, RefreshOptions};
use keyward_store_redis::{RedisStore, RedisStoreConfig};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::redis::Redis;
use tokio::sync::OnceCell;

// Shared Redis container for all tests
static SHARED_REDIS: OnceCell<(ContainerAsync<Redis>, String)> = OnceCell::const_new();

async fn get_redis_url() -> String {
    let (_, url) = SHARED_REDIS
        .get_or_init(|| async {
            let container = Redis::default()
                .start()
                .await
                .expect("start redis container");

            let host_port = container.get_host_port_ipv4(6379).await.expect("get port");
            let url = format!("redis://127.0.0.1:{host_port}");

            (container, url)
        })
        .await;

    url.clone()
}

async fn store() -> RedisStore {
    RedisStore::connect(&RedisStoreConfig::new(get_redis_url().await))
        .await
        .expect("connect to redis")
}

fn unique(prefix: &str) -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    format!("{prefix}:{}", COUNTER.fetch_add(1, Ordering::Relaxed))
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_bytes_and_ttl() {
    let store = store().await;
    let key = unique("test:bytes");

    assert_eq!(store.ttl(&key).await.unwrap(), KeyTtl::Missing);
    store.set(&key, b"v1").await.unwrap();
    assert_eq!(store.ttl(&key).await.unwrap(), KeyTtl::Persistent);
    assert_eq!(store.get(&key).await.unwrap(), Some(b"v1".to_vec()));

    assert!(store.expire(&key, Duration::from_millis(200)).await.unwrap());
    assert!(matches!(store.ttl(&key).await.unwrap(), KeyTtl::Expires(_)));

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!store.exists(&key).await.unwrap());
    assert!(!store.delete(&key).await.unwrap());
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_sets_and_hashes() {
    let store = store().await;
    let set = unique("test:set");
    let hash = unique("test:hash");

    assert!(store.set_add(&set, "a").await.unwrap());
    assert!(!store.set_add(&set, "a").await.unwrap());
    assert!(store.set_add(&set, "b").await.unwrap());
    let mut members = store.set_members(&set).await.unwrap();
    members.sort();
    assert_eq!(members, vec!["a", "b"]);
    assert!(store.set_remove(&set, "a").await.unwrap());

    store.hash_set(&hash, "f", "v").await.unwrap();
    assert_eq!(store.hash_get(&hash, "f").await.unwrap().as_deref(), Some("v"));
    assert!(store.hash_delete(&hash, "f").await.unwrap());
    assert_eq!(store.hash_get(&hash, "f").await.unwrap(), None);

    let err = store.get(&set).await.unwrap_err();
    assert!(matches!(err, StoreError::WrongType { .. }));
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_compare_and_swap() {
    let store = store().await;
    let key = unique("test:cas");
    let ttl = Duration::from_secs(60);

    assert!(!store.compare_and_swap(&key, b"old", b"new", ttl).await.unwrap());
    store.set(&key, b"old").await.unwrap();
    assert!(store.compare_and_swap(&key, b"old", b"new", ttl).await.unwrap());
    assert!(!store.compare_and_swap(&key, b"old", b"newer", ttl).await.unwrap());
    assert_eq!(store.get(&key).await.unwrap(), Some(b"new".to_vec()));
    assert!(matches!(store.ttl(&key).await.unwrap(), KeyTtl::Expires(_)));
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_keys_scan() {
    let store = store().await;
    let prefix = unique("test:scan");
    for i in 0..20 {
        store.set(&format!("{prefix}:{i}"), b"x").await.unwrap();
    }
    let keys = store.keys(&format!("{prefix}:*")).await.unwrap();
    assert_eq!(keys.len(), 20);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_refresh_rotation_over_redis() {
    let store = Arc::new(store().await);
    let config = AuthConfig::with_secrets("access", "refresh");
    let auth = Authority::new(&config, store).unwrap();

    let session = auth.sessions.create("redis-user", None, None).await.unwrap();
    let refresh = auth
        .tokens
        .issue_refresh("redis-user", &session.session_id)
        .await
        .unwrap();
    let grant = AccessGrant::new("redis-user", &session.session_id);

    let pair = auth
        .tokens
        .refresh_tokens(&refresh, &grant, RefreshOptions::default())
        .await
        .unwrap();
    assert!(
        auth.tokens
            .refresh_tokens(&refresh, &grant, RefreshOptions::default())
            .await
            .is_none()
    );

    let header = format!("Bearer {}", pair.access_token);
    let ctx = auth.gate.authenticate(Some(&header)).await.unwrap();
    assert_eq!(ctx.user_id(), "redis-user");
}
