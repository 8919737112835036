use clap::{Parser, Subcommand};
use eyre::{Result, WrapErr};
use std::sync::Arc;

use prepgate::{
    cache::FeedbackCacheStore,
    config::Config,
    feedback::HttpFeedbackGenerator,
    mpesa::MpesaClient,
    payment::PaymentStore,
    server::{run_server, ServerConfig, ServerState},
};

#[derive(Parser)]
#[command(
    name = "prepgate",
    about = "Mock interview backend — transcript-hash feedback caching and M-Pesa payment gating."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Address to bind to
        #[arg(long)]
        bind: Option<String>,

        /// SQLite database URL
        #[arg(long, env = "PREPGATE_DATABASE_URL")]
        database_url: Option<String>,

        /// Rate limit in requests per minute per IP (0 = no limit)
        #[arg(long)]
        rate_limit: Option<u32>,

        /// Feedback cache TTL in seconds
        #[arg(long)]
        cache_ttl: Option<i64>,

        /// Price of one interview in shillings
        #[arg(long)]
        interview_cost: Option<i64>,

        /// AI feedback generator endpoint
        #[arg(long)]
        ai_endpoint: Option<String>,
    },

    /// Remove expired cache entries and mark overdue pending payments expired
    Cleanup {
        /// SQLite database URL
        #[arg(long, env = "PREPGATE_DATABASE_URL")]
        database_url: Option<String>,
    },

    /// Print today's cache hit/miss statistics
    Stats {
        /// SQLite database URL
        #[arg(long, env = "PREPGATE_DATABASE_URL")]
        database_url: Option<String>,
    },
}

const DEFAULT_DATABASE_URL: &str = "sqlite://prepgate.db";

fn cmd_serve(
    bind: Option<String>,
    database_url: Option<String>,
    rate_limit: Option<u32>,
    cache_ttl: Option<i64>,
    interview_cost: Option<i64>,
    ai_endpoint: Option<String>,
) -> Result<()> {
    let cfg = Config::load()?;

    let bind_str = bind
        .or(cfg.bind)
        .unwrap_or_else(|| "127.0.0.1:8080".to_string());
    let bind_addr = bind_str
        .parse()
        .wrap_err_with(|| format!("Invalid bind address: {}", bind_str))?;
    let database_url = database_url
        .or(cfg.database_url)
        .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());
    let ai_endpoint = ai_endpoint
        .or(cfg.ai_endpoint)
        .unwrap_or_else(|| "http://127.0.0.1:9090/generate".to_string());

    let defaults = ServerConfig::default();
    let config = ServerConfig {
        bind_addr,
        rate_limit_rpm: rate_limit.or(cfg.rate_limit_rpm).unwrap_or(defaults.rate_limit_rpm),
        allowed_origins: cfg.allowed_origins,
        api_keys: cfg.api_keys,
        cache_ttl_seconds: cache_ttl
            .or(cfg.cache_ttl_seconds)
            .unwrap_or(defaults.cache_ttl_seconds),
        interview_cost: interview_cost
            .or(cfg.interview_cost)
            .unwrap_or(defaults.interview_cost),
        generation_cost_usd: cfg
            .generation_cost_usd
            .unwrap_or(defaults.generation_cost_usd),
    };

    let mpesa = cfg.mpesa.map(MpesaClient::new);
    if mpesa.is_none() {
        tracing::warn!("no [mpesa] section in config; payment initiation will be unavailable");
    }

    tracing::info!("starting prepgate server");
    tracing::info!(%database_url, cache_ttl_seconds = config.cache_ttl_seconds, "configured");

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let pool = prepgate::db::connect(&database_url).await?;
        let generator = Arc::new(HttpFeedbackGenerator::new(&ai_endpoint));
        let state = Arc::new(ServerState::new(config, pool, generator, mpesa));
        run_server(state).await
    })?;

    Ok(())
}

fn cmd_cleanup(database_url: Option<String>) -> Result<()> {
    let cfg = Config::load()?;
    let database_url = database_url
        .or(cfg.database_url)
        .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let pool = prepgate::db::connect(&database_url).await?;
        let removed = FeedbackCacheStore::new(pool.clone())
            .cleanup_expired()
            .await?;
        let expired = PaymentStore::new(pool).expire_pending().await?;
        println!("Removed {} expired cache entries", removed);
        println!("Marked {} overdue pending payments expired", expired);
        Ok::<_, eyre::Report>(())
    })?;

    Ok(())
}

fn cmd_stats(database_url: Option<String>) -> Result<()> {
    let cfg = Config::load()?;
    let database_url = database_url
        .or(cfg.database_url)
        .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());
    let generation_cost_usd = cfg.generation_cost_usd.unwrap_or(0.02);

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let pool = prepgate::db::connect(&database_url).await?;
        let stats = FeedbackCacheStore::new(pool).stats().await?;

        println!("Feedback Cache Statistics ({})", stats.day);
        println!("=========================");
        println!("Hits:              {}", stats.hits);
        println!("Misses:            {}", stats.misses);
        println!("Hit rate:          {:.1}%", stats.hit_rate() * 100.0);
        println!(
            "Estimated savings: ${:.2}",
            stats.hits as f64 * generation_cost_usd
        );
        Ok::<_, eyre::Report>(())
    })?;

    Ok(())
}

fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "prepgate=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Serve {
            bind,
            database_url,
            rate_limit,
            cache_ttl,
            interview_cost,
            ai_endpoint,
        } => cmd_serve(
            bind,
            database_url,
            rate_limit,
            cache_ttl,
            interview_cost,
            ai_endpoint,
        ),
        Commands::Cleanup { database_url } => cmd_cleanup(database_url),
        Commands::Stats { database_url } => cmd_stats(database_url),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:?}");
        std::process::exit(1);
    }
}
