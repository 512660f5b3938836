use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use medq_core::{
    ChatClientConfig, ChatCompletionsClient, LlmBackend, MedqConfig, MemoryStore, PgStore, Store,
};
use sqlx::PgPool;
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

use medq_server::http::{start_http_server, HttpState};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "medq.toml")]
    config: String,

    /// Check database connectivity and exit.
    #[arg(long)]
    health: bool,

    /// Run on the in-memory store instead of PostgreSQL (demo data is always seeded).
    #[arg(long)]
    memory: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (production uses real env vars)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Load config
    let config = match MedqConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // Init logging; RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.service.log_level));
    fmt().with_env_filter(filter).init();

    let (store, pool): (Arc<dyn Store>, Option<PgPool>) = if args.memory {
        tracing::warn!("Using in-memory store; data is lost on exit");
        (Arc::new(MemoryStore::new()), None)
    } else {
        // Connect to DB
        let pool = match medq_core::db::create_pool(&config.database).await {
            Ok(p) => p,
            Err(e) => {
                eprintln!("Failed to connect to database: {}", e);
                std::process::exit(1);
            }
        };

        if args.health {
            match medq_core::db::health_check(&pool).await {
                Ok(v) => println!("✅ PostgreSQL connected: {}", v),
                Err(e) => {
                    println!("❌ PostgreSQL connection failed: {}", e);
                    std::process::exit(1);
                }
            }
            println!("✅ Medq DB health check passed");
            return Ok(());
        }

        medq_core::db::run_migrations(&pool)
            .await
            .context("Failed to apply database migrations")?;
        (Arc::new(PgStore::new(pool.clone())), Some(pool))
    };

    let llm: Arc<dyn LlmBackend> = Arc::new(
        ChatCompletionsClient::new(ChatClientConfig::from_settings(&config.llm))
            .context("Failed to build LLM client (set llm.api_key or DEEPSEEK_API_KEY)")?,
    );

    let state = Arc::new(HttpState::new(store, llm, &config, pool));

    if args.memory || config.service.seed_demo_data {
        if state.queries.seed_demo_data().await? {
            tracing::info!("Demo patient and doctor created");
        }
    }

    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    let addr = format!("{}:{}", config.http.host, config.http.port);
    start_http_server(state, &addr, tx.subscribe()).await?;

    Ok(())
}
