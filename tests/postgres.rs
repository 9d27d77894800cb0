//! Server adapters against a live PostgreSQL. Run with
//! `TENANTED_TEST_PG_HOST=localhost TENANTED_TEST_PG_USER=postgres cargo test -- --ignored`.

use std::sync::Arc;
use tenanted_sdk::{BaseConfig, DatabaseConfigurations, Tenanted};

fn configs(database_json: &str) -> DatabaseConfigurations {
    let host = std::env::var("TENANTED_TEST_PG_HOST").unwrap_or_else(|_| "localhost".into());
    let user = std::env::var("TENANTED_TEST_PG_USER").unwrap_or_else(|_| "postgres".into());
    let password = std::env::var("TENANTED_TEST_PG_PASSWORD").unwrap_or_default();
    let worker = uuid::Uuid::new_v4().simple().to_string();
    let migrations = std::env::temp_dir().join(format!("tenanted-pg-{}", worker)).join("migrate");
    std::fs::create_dir_all(&migrations).unwrap();
    std::fs::write(
        migrations.join("1_create_notes.sql"),
        "CREATE TABLE notes (id SERIAL PRIMARY KEY, body TEXT)",
    )
    .unwrap();
    let json = format!(
        r#"{{ "test": {{ "primary": {{
            "tenanted": true,
            "adapter": "postgresql",
            "host": "{host}",
            "username": "{user}",
            "password": "{password}",
            "migrations_path": "{migrations}",
            "dump_schema_after_migration": false,
            {database_json}
        }} }} }}"#,
        migrations = migrations.display()
    );
    DatabaseConfigurations::load_str(&json, "test")
        .unwrap()
        .with_test_worker(&worker[..8])
}

async fn round_trip(tenanted: &Tenanted, base: &Arc<BaseConfig>) {
    for tenant in ["foo", "bar", "baz"] {
        tenanted
            .lifecycle
            .create_tenant(base, tenant, |pool| async move {
                pool.execute("INSERT INTO notes (body) VALUES ('hi')").await?;
                Ok(())
            })
            .await
            .unwrap();
    }
    let mut tenants = base.tenants().await;
    tenants.sort();
    assert_eq!(tenants, vec!["bar", "baz", "foo"]);

    tenanted.lifecycle.destroy_tenant(base, "foo").await.unwrap();
    assert!(!tenanted.lifecycle.tenant_exist(base, "foo").await.unwrap());

    let dropped = tenanted.tasks("primary").unwrap().drop_all().await.unwrap();
    assert_eq!(dropped.len(), 2);
}

#[tokio::test]
#[ignore = "needs a PostgreSQL server"]
async fn database_per_tenant() {
    let tenanted = Tenanted::new(configs(r#""database": "tenanted_test_%{tenant}""#));
    let base = tenanted.base("primary").unwrap();
    assert_eq!(base.adapter().strategy_name(), "database");
    round_trip(&tenanted, &base).await;
}

#[tokio::test]
#[ignore = "needs a PostgreSQL server"]
async fn colocated_schemas() {
    let tenanted = Tenanted::new(configs(r#""database": "tenanted_test_colocated""#));
    let base = tenanted.base("primary").unwrap();
    assert_eq!(base.adapter().strategy_name(), "schema");
    round_trip(&tenanted, &base).await;
}
