use clap::Parser;
use fnobot::api::{
    DataSource, FeatureServiceClient, OptionChainSource, TelegramNotifier, UnderlyingSource,
};
use fnobot::config::AppConfig;
use fnobot::db::PostgresSignalStore;
use fnobot::execution::{MonitorLoop, Scheduler, SignalEngine, SnapshotBuffer};
use fnobot::market::{MarketCalendar, MarketWindow};
use fnobot::notify::{LogNotifier, Notifier, SignalFormatter};
use fnobot::persistence::{MemorySignalStore, RedisSignalStore, SignalStore};
use fnobot::retry::RetryExecutor;
use fnobot::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fnobot", about = "Index options signal monitor")]
struct Args {
    /// Path to a settings file. Defaults to config/settings.toml if present.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the monitored underlying (e.g. NIFTY, BANKNIFTY).
    #[arg(long)]
    symbol: Option<String>,

    /// Validate the configuration and exit.
    #[arg(long, default_value_t = false)]
    check_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("❌ {}", e);
            std::process::exit(1);
        }
    };

    if args.check_config {
        tracing::info!("✅ Configuration is valid");
        return Ok(());
    }

    tracing::info!("🚀 FnO signal bot starting for {}", config.signals.symbol);
    log_configuration(&config);

    let window = MarketWindow::try_from(&config.market)?;
    let timezone = window.timezone;
    let calendar = MarketCalendar::new(window);
    let retry = RetryExecutor::new(config.retry.clone());
    let formatter = SignalFormatter::new(
        timezone,
        config.signals.pcr_bullish_max,
        config.signals.pcr_bearish_min,
    );

    let store = connect_store().await;
    let notifier = create_notifier()?;

    let mut engine = SignalEngine::new(&config.signals, calendar.clone(), store.clone());
    if let Err(e) = engine.warm_start().await {
        tracing::warn!("Warm start failed ({}), starting with empty state", e);
    }

    let feature_service = FeatureServiceClient::new(&config.scheduler.feature_service_url)?;
    let sources: Vec<Arc<dyn DataSource>> = vec![
        Arc::new(UnderlyingSource::new(feature_service.clone())),
        Arc::new(OptionChainSource::new(feature_service)),
    ];

    let buffer = SnapshotBuffer::new();
    let scheduler = Scheduler::new(
        &config.scheduler,
        config.signals.symbol.clone(),
        calendar,
        retry.clone(),
        sources,
        buffer.clone(),
        notifier.clone(),
        formatter.clone(),
    )
    .with_retention_store(store.clone());

    let monitor = MonitorLoop::new(
        &config.monitor,
        engine,
        Arc::new(buffer),
        notifier,
        formatter,
        retry,
    );

    tracing::info!("\n🔄 Spawning loops...");
    let cancel = CancellationToken::new();
    let scheduler_task = tokio::spawn(scheduler.run(cancel.clone()));
    let monitor_task = tokio::spawn(monitor.run(cancel.clone()));

    tracing::info!("✅ All loops spawned successfully");
    tracing::info!(
        "  🔄 Data fetch: every {}s",
        config.scheduler.fetch_interval_seconds
    );
    tracing::info!("  🔍 Monitor: every {}s", config.monitor.interval_seconds);
    tracing::info!("\nPress Ctrl+C to stop...\n");

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl+C: {}", e);
    }
    tracing::info!("\n⚠️  Received Ctrl+C, shutting down...");
    cancel.cancel();

    if let Err(e) = scheduler_task.await {
        tracing::error!("Scheduler task failed: {:?}", e);
    }
    if let Err(e) = monitor_task.await {
        tracing::error!("Monitor task failed: {:?}", e);
    }

    tracing::info!("👋 FnO signal bot stopped");
    Ok(())
}

fn setup_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("fnobot=info,fnobot::execution=debug"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_config(args: &Args) -> std::result::Result<AppConfig, fnobot::error::ConfigError> {
    let mut config = AppConfig::load(args.config.as_deref())?;
    if let Some(symbol) = &args.symbol {
        config.signals.symbol = symbol.to_uppercase();
        config.validate()?;
    }
    Ok(config)
}

fn log_configuration(config: &AppConfig) {
    let s = &config.signals;
    tracing::info!("\n📊 Configuration:");
    tracing::info!(
        "  Market: {}-{} {}",
        config.market.start_time,
        config.market.end_time,
        config.market.timezone
    );
    tracing::info!("  Confidence threshold: {:.2}", s.confidence_threshold);
    tracing::info!(
        "  PCR: bullish <= {} | bearish >= {}",
        s.pcr_bullish_max,
        s.pcr_bearish_min
    );
    tracing::info!("  Suppression: {:?}", s.mode);
    tracing::info!("  Max signals/hour: {}", s.max_signals_per_hour);
    tracing::info!("  Validity: {} min", s.validity_minutes);
}

/// Postgres if configured, then Redis, then in-process memory
async fn connect_store() -> Arc<dyn SignalStore> {
    if let Ok(database_url) = std::env::var("DATABASE_URL") {
        match PostgresSignalStore::new(&database_url).await {
            Ok(store) => {
                tracing::info!("Postgres signal history enabled");
                return Arc::new(store);
            }
            Err(e) => tracing::warn!("Failed to connect to Postgres ({}), trying Redis", e),
        }
    }

    let redis_url =
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
    match RedisSignalStore::new(&redis_url).await {
        Ok(store) => {
            tracing::info!("Redis signal history enabled at {}", redis_url);
            Arc::new(store)
        }
        Err(e) => {
            tracing::warn!(
                "Failed to connect to Redis ({}), signal history is in-memory only",
                e
            );
            Arc::new(MemorySignalStore::new())
        }
    }
}

fn create_notifier() -> Result<Arc<dyn Notifier>> {
    match TelegramNotifier::from_env() {
        Some(telegram) => {
            tracing::info!("📨 Telegram delivery enabled");
            Ok(Arc::new(telegram?))
        }
        None => {
            tracing::warn!("TELEGRAM_BOT_TOKEN/TELEGRAM_CHAT_ID not set, signals go to the log");
            Ok(Arc::new(LogNotifier))
        }
    }
}
