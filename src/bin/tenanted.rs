//! `tenanted`: operational commands for tenanted databases.
//!
//! Reads the configuration from `--config` / `TENANTED_CONFIG` and the environment from
//! `--env` / `TENANTED_ENV`. Commands act on the primary tenanted database unless `--database`
//! names another one.

use clap::{Parser, Subcommand};
use tenanted_sdk::config::{config_path, current_env, DatabaseConfigurations};
use tenanted_sdk::{DatabaseTasks, Tenanted};

#[derive(Debug, Parser)]
#[command(name = "tenanted", version, about = "Manage per-tenant databases")]
struct Cli {
    /// Configuration file.
    #[arg(long, env = "TENANTED_CONFIG")]
    config: Option<String>,

    /// Environment section of the configuration file.
    #[arg(long, env = "TENANTED_ENV")]
    env: Option<String>,

    /// Logical database; defaults to the primary tenanted one.
    #[arg(long, short)]
    database: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List existing tenants.
    Tenants,
    /// Create a tenant and bring its store to the current schema.
    Create { tenant: String },
    /// Apply pending migrations to one tenant or to all of them.
    Migrate {
        #[arg(long)]
        tenant: Option<String>,
    },
    /// Revert the most recent migrations of one tenant or of all of them.
    Rollback {
        #[arg(long)]
        tenant: Option<String>,
        #[arg(long, default_value_t = 1)]
        steps: usize,
    },
    /// Drop one tenant's store, or every store (and the shared database under the schema strategy).
    Drop {
        #[arg(long)]
        tenant: Option<String>,
    },
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

    let cli = Cli::parse();
    let path = cli.config.clone().map(Into::into).unwrap_or_else(config_path);
    let env = cli.env.clone().unwrap_or_else(current_env);
    let configs = DatabaseConfigurations::load_file(&path, &env)?;
    let base = match &cli.database {
        Some(name) => configs.base(name)?,
        None => configs
            .primary()
            .ok_or_else(|| format!("no tenanted database in environment {:?}", env))?,
    };
    let tenanted = Tenanted::new(configs);
    let tasks = tenanted.tasks(base.name())?;

    let outcome = run(&tenanted, &tasks, cli.command).await;
    tenanted.shutdown().await;
    outcome
}

async fn run(
    tenanted: &Tenanted,
    tasks: &DatabaseTasks,
    command: Command,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Tenants => {
            for tenant in tasks.base().tenants().await {
                println!("{}", tenant);
            }
        }
        Command::Create { tenant } => {
            tenanted
                .lifecycle
                .create_tenant(tasks.base(), &tenant, |_pool| async { Ok(()) })
                .await?;
            println!("{}: created", tenant);
        }
        Command::Migrate { tenant: Some(tenant) } => {
            let report = tasks.migrate_tenant(&tenant).await?;
            println!("{}: {} migration(s) applied", tenant, report.applied.len());
        }
        Command::Migrate { tenant: None } => {
            for (tenant, report) in tasks.migrate_all().await? {
                println!("{}: {} migration(s) applied", tenant, report.applied.len());
            }
        }
        Command::Rollback { tenant: Some(tenant), steps } => {
            let reverted = tasks.rollback_tenant(&tenant, steps).await?;
            println!("{}: reverted {:?}", tenant, reverted);
        }
        Command::Rollback { tenant: None, steps } => {
            for (tenant, reverted) in tasks.rollback_all(steps).await? {
                println!("{}: reverted {:?}", tenant, reverted);
            }
        }
        Command::Drop { tenant: Some(tenant) } => {
            tasks.drop_tenant(&tenant).await?;
            println!("{}: dropped", tenant);
        }
        Command::Drop { tenant: None } => {
            let dropped = tasks.drop_all().await?;
            println!("dropped {} tenant(s)", dropped.len());
        }
    }
    Ok(())
}
