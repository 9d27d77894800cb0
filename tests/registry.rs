mod common;

use common::{fixture, fixture_with, CountingMigrator};
use std::sync::Arc;
use tenanted_sdk::config::UNTENANTED_TENANT;
use tenanted_sdk::{ConnectionClass, CurrentTenant, Role, TenantContext, TenantError, TenantScope};

fn scope(tenant: &str, role: Role) -> TenantScope {
    TenantScope {
        tenant: CurrentTenant::Named(tenant.to_string()),
        role,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_access_opens_one_pool() {
    let migrator = Arc::new(CountingMigrator::default());
    let fx = fixture_with("", Some(migrator.clone()));

    let mut handles = Vec::new();
    for _ in 0..16 {
        let registry = fx.tenanted.registry.clone();
        let base = fx.base.clone();
        handles.push(tokio::spawn(TenantContext::with_tenant("foo", async move {
            registry.current_pool(&base).await
        })));
    }
    let mut pools = Vec::new();
    for handle in handles {
        pools.push(handle.await.unwrap().unwrap());
    }

    assert!(pools.iter().all(|pool| Arc::ptr_eq(pool, &pools[0])));
    assert_eq!(fx.tenanted.registry.pool_count(), 1);
    assert_eq!(migrator.calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unrelated_tenants_get_their_own_pools() {
    let fx = fixture("");
    let registry = &fx.tenanted.registry;
    let foo = registry.get_or_create_pool(&fx.base, &scope("foo", Role::Writing)).await.unwrap();
    let bar = registry.get_or_create_pool(&fx.base, &scope("bar", Role::Writing)).await.unwrap();
    assert!(!Arc::ptr_eq(&foo, &bar));
    assert_eq!(foo.tenant(), "foo");
    assert_eq!(bar.tag().to_string(), " [tenant=bar]");
    assert_eq!(registry.pool_count_for("primary"), 2);
}

#[tokio::test]
async fn shared_classes_use_the_owner_pool() {
    let fx = fixture("");
    let app = fx.tenanted.connection_class("ApplicationRecord", "primary").unwrap();
    let user = ConnectionClass::tenanted_with("User", &app);
    let post = ConnectionClass::tenanted_with("Post", &app);

    let (a, u, p) = TenantContext::with_tenant("foo", async {
        (
            app.connection_pool().await.unwrap(),
            user.connection_pool().await.unwrap(),
            post.connection_pool().await.unwrap(),
        )
    })
    .await;
    assert!(Arc::ptr_eq(&a, &u));
    assert!(Arc::ptr_eq(&a, &p));
    assert_eq!(fx.tenanted.registry.pool_count(), 1);
}

#[tokio::test]
async fn no_tenant_is_an_error() {
    let fx = fixture("");
    let app = fx.tenanted.connection_class("ApplicationRecord", "primary").unwrap();
    assert!(matches!(app.connection_pool().await, Err(TenantError::NoTenant(_))));
    let read = TenantContext::with_role(Role::Reading, app.connection_pool()).await;
    assert!(matches!(read, Err(TenantError::NoTenant(_))));
}

#[tokio::test]
async fn reading_role_gets_a_read_only_pool() {
    let fx = fixture("");
    let registry = &fx.tenanted.registry;
    let writer = registry.get_or_create_pool(&fx.base, &scope("foo", Role::Writing)).await.unwrap();
    let reader = registry.get_or_create_pool(&fx.base, &scope("foo", Role::Reading)).await.unwrap();
    assert!(!Arc::ptr_eq(&writer, &reader));
    assert!(registry.contains("primary", "foo", Role::Reading));

    writer.execute("INSERT INTO notes (body) VALUES ('w')").await.unwrap();
    assert!(reader.execute("INSERT INTO notes (body) VALUES ('r')").await.is_err());
}

#[tokio::test]
async fn untenanted_reads_when_enabled() {
    let fx = fixture(r#""untenanted_reads": true"#);
    let app = fx.tenanted.connection_class("ApplicationRecord", "primary").unwrap();

    let pool = TenantContext::with_role(Role::Reading, app.connection_pool()).await.unwrap();
    assert_eq!(pool.tenant(), UNTENANTED_TENANT);
    assert_eq!(pool.role(), Role::Reading);
    assert!(pool.execute("INSERT INTO notes (body) VALUES ('x')").await.is_err());

    assert!(matches!(app.connection_pool().await, Err(TenantError::NoTenant(_))));
    assert!(fx.base.tenants().await.is_empty());
}

#[tokio::test]
async fn idle_pools_are_evicted_least_recently_used_first() {
    let fx = fixture(r#""max_connection_pools": 2"#);
    let registry = &fx.tenanted.registry;

    drop(registry.get_or_create_pool(&fx.base, &scope("foo", Role::Writing)).await.unwrap());
    drop(registry.get_or_create_pool(&fx.base, &scope("bar", Role::Writing)).await.unwrap());
    // Touch foo so bar becomes the oldest.
    drop(registry.get_or_create_pool(&fx.base, &scope("foo", Role::Writing)).await.unwrap());

    let baz = registry.get_or_create_pool(&fx.base, &scope("baz", Role::Writing)).await.unwrap();
    assert_eq!(registry.pool_count_for("primary"), 2);
    assert!(registry.contains("primary", "foo", Role::Writing));
    assert!(!registry.contains("primary", "bar", Role::Writing));

    // Every pool is held: nothing can be evicted.
    let foo = registry.get_or_create_pool(&fx.base, &scope("foo", Role::Writing)).await.unwrap();
    let full = registry.get_or_create_pool(&fx.base, &scope("qux", Role::Writing)).await;
    assert!(matches!(full, Err(TenantError::PoolLimitReached { max: 2, .. })));
    assert_eq!(registry.pool_count_for("primary"), 2);

    drop((foo, baz));
    registry.get_or_create_pool(&fx.base, &scope("qux", Role::Writing)).await.unwrap();
    assert_eq!(registry.pool_count_for("primary"), 2);
}

#[tokio::test]
async fn clear_closes_everything() {
    let fx = fixture("");
    let pool = fx
        .tenanted
        .registry
        .get_or_create_pool(&fx.base, &scope("foo", Role::Writing))
        .await
        .unwrap();
    fx.tenanted.shutdown().await;
    assert!(pool.is_closed());
    assert_eq!(fx.tenanted.registry.pool_count(), 0);
}
