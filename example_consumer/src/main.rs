//! Example consumer: a separate Rust project that uses tenanted-sdk as a dependency.
//!
//! Run from repo root: `cargo run -p example-consumer`
//! Or from this directory: `cargo run`
//!
//! Stores land in `example_consumer/storage/`, one SQLite file per tenant.

use tenanted_sdk::{ConnectionClass, DatabaseConfigurations, TenantContext, Tenanted};

const MANIFEST_DIR: &str = env!("CARGO_MANIFEST_DIR");

fn config_json() -> String {
    format!(
        r#"{{
            "development": {{
                "primary": {{
                    "tenanted": true,
                    "adapter": "sqlite3",
                    "database": "{dir}/storage/%{{tenant}}.sqlite3",
                    "db_dir": "{dir}/db",
                    "dump_schema_after_migration": false
                }}
            }}
        }}"#,
        dir = MANIFEST_DIR
    )
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("tenanted_sdk=info")),
        )
        .init();

    let configs = DatabaseConfigurations::load_str(&config_json(), "development")?;
    let tenanted = Tenanted::new(configs);
    let base = tenanted.base("primary")?;
    let registry = tenanted.registry.clone();
    let app = ConnectionClass::tenanted("ApplicationRecord", base.clone(), registry);
    let notes = ConnectionClass::tenanted_with("Note", &app);

    for tenant in ["acme", "globex"] {
        if !tenanted.lifecycle.tenant_exist(&base, tenant).await? {
            tenanted
                .lifecycle
                .create_tenant(&base, tenant, |pool| async move {
                    pool.run(|conn| async move {
                        sqlx::query("INSERT INTO notes (body) VALUES (?)")
                            .bind(format!("hello from {}", tenant))
                            .execute(conn)
                            .await?;
                        Ok(())
                    })
                    .await
                })
                .await?;
        }
    }

    for tenant in notes.tenants().await {
        let count: i64 = TenantContext::with_tenant(tenant.clone(), async {
            let pool = notes.connection_pool().await?;
            let count = pool.fetch_scalar::<i64>("SELECT COUNT(*) FROM notes").await?;
            Ok::<i64, Box<dyn std::error::Error>>(count)
        })
        .await?;
        tracing::info!("{} has {} note(s)", tenant, count);
    }

    tracing::info!("open pools: {}", tenanted.registry.pool_count());
    tenanted.shutdown().await;
    Ok(())
}
