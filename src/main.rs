use clap::Parser;
use dbguard::connection::target_from_database_url;
use dbguard::{create_router, GuardConfig, GuardContext, TcpConnectionManager, TcpPoolOptions};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "dbguard")]
#[command(about = "dbguard - circuit breaking, auto-recovery and health reporting for a database connection", long_about = None)]
struct Args {
    /// Address for the HTTP API
    #[arg(short, long, default_value = "0.0.0.0:6790")]
    listen: String,

    /// Database host:port (defaults to the host in DATABASE_URL)
    #[arg(long)]
    database_addr: Option<String>,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Maximum sockets held open to the database
    #[arg(long, default_value_t = 10)]
    pool_size: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dbguard=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = GuardConfig::load(args.config.as_deref())?;

    let database_addr = match args.database_addr {
        Some(addr) => addr,
        None => {
            let url = std::env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("--database-addr not given and DATABASE_URL is not set"))?;
            target_from_database_url(&url)?
        }
    };
    tracing::info!("Guarding database at {}", database_addr);

    let manager = Arc::new(TcpConnectionManager::new(
        database_addr,
        TcpPoolOptions {
            max_size: args.pool_size,
            ..Default::default()
        },
    ));

    let context = Arc::new(GuardContext::new(config, manager));
    context.start_background();
    context.shutdown().register_signal_handlers();

    let initial = context.health().run_diagnostics().await;
    tracing::info!("Initial health: {}", initial.status);

    let app = create_router(context.clone());

    let listener = tokio::net::TcpListener::bind(&args.listen).await?;
    tracing::info!("Server listening on {}", args.listen);

    let shutdown = context.shutdown().clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.wait().await })
        .await?;

    // The shutdown sequence ends by exiting the process
    std::future::pending::<()>().await;
    Ok(())
}
