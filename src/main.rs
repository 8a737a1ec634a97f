use clap::Parser;
use ictbot::api::{Advisor, CotSentimentClient, OpenAiAdvisor, SentimentCache};
use ictbot::broker::{Broker, BrokerSession, Credentials, RestBridgeClient};
use ictbot::config::Settings;
use ictbot::db::{MemoryStore, PostgresStore, TradingStore};
use ictbot::execution::{Scheduler, TradeOrchestrator};
use ictbot::models::MoneyManagementLevel;
use ictbot::persistence::{CandleArchive, RedisCandleArchive};
use ictbot::risk::MoneyManagementLadder;
use ictbot::session::SessionClock;
use ictbot::Result;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "ictbot", about = "ICT signal fusion trading bot")]
struct Cli {
    /// Extra config file layered over config/default.toml
    #[arg(short, long)]
    config: Option<String>,

    /// Run a single cycle per account and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;

    tracing::info!("🚀 ictbot starting");

    if settings.accounts.is_empty() {
        return Err("No accounts configured (add [[accounts]] to the config)".into());
    }

    let store = connect_store(&settings).await;
    let levels = load_ladder(store.as_ref(), &settings).await;
    let archive = connect_archive(&settings).await;
    let sentiment = build_sentiment(&settings)?;
    let advisor = build_advisor(&settings);
    let broker: Arc<dyn Broker> = Arc::new(RestBridgeClient::new(&settings.broker.base_url));

    let clock = SessionClock::new(settings.trading.broker_utc_offset_hours);
    let now = Utc::now();
    let (hour, minute) = clock.local_time(now);

    tracing::info!("\n📊 Configuration:");
    tracing::info!("  Symbol: {} {}", settings.trading.symbol, settings.trading.timeframe);
    tracing::info!("  Interval: {}s", settings.trading.interval_secs);
    tracing::info!("  Broker time: {:02}:{:02}", hour, minute);
    match clock.classify(now) {
        Some(zone) => tracing::info!("  Active kill zone: {}", zone.name),
        None => tracing::info!("  Active kill zone: none"),
    }
    if let Some(next) = clock.time_to_next_zone(now) {
        tracing::info!("  Next kill zone: {} in {} min", next.name, next.minutes_until);
    }
    tracing::info!("  Ladder levels: {}", levels.len());
    tracing::info!("  Accounts: {}", settings.accounts.len());

    let mut orchestrators = Vec::with_capacity(settings.accounts.len());
    for account in &settings.accounts {
        let session = Arc::new(BrokerSession::new(
            account.account_id.clone(),
            broker.clone(),
            Credentials::from(account),
            &settings.broker,
        ));

        let mut orchestrator = TradeOrchestrator::new(
            account.account_id.clone(),
            account.initial_balance,
            &settings,
            session,
            MoneyManagementLadder::new(levels.clone())?,
            store.clone(),
        );
        if let Some(cache) = &sentiment {
            orchestrator = orchestrator.with_sentiment(cache.clone());
        }
        if let Some(advisor) = &advisor {
            orchestrator = orchestrator.with_advisor(advisor.clone());
        }
        if let Some(archive) = &archive {
            orchestrator = orchestrator.with_archive(archive.clone());
        }

        tracing::info!("    - {}", account.account_id);
        orchestrators.push(Arc::new(orchestrator));
    }

    if cli.once {
        for orchestrator in &orchestrators {
            orchestrator.tick().await;
        }
        tracing::info!("👋 Single cycle complete");
        return Ok(());
    }

    let scheduler = Arc::new(Scheduler::new(settings.trading.interval()));
    let mut tasks = Vec::with_capacity(orchestrators.len());

    for orchestrator in orchestrators {
        let scheduler = scheduler.clone();
        tasks.push(tokio::spawn(async move {
            let name = format!("Trading loop {}", orchestrator.account_id());
            scheduler
                .run(&name, || {
                    let orchestrator = orchestrator.clone();
                    async move { orchestrator.tick().await }
                })
                .await;
        }));
    }

    tracing::info!("✅ {} trading loop(s) spawned", tasks.len());
    tracing::info!("\nPress Ctrl+C to stop...\n");

    tokio::signal::ctrl_c().await?;
    tracing::info!("\n⚠️  Received Ctrl+C, shutting down...");
    scheduler.stop();

    // Let in-flight cycles finish
    for task in tasks {
        match tokio::time::timeout(settings.broker.request_timeout() * 2, task).await {
            Ok(Err(e)) => tracing::error!("Trading loop failed: {}", e),
            Err(_) => tracing::warn!("Trading loop did not stop in time"),
            Ok(Ok(())) => {}
        }
    }

    tracing::info!("👋 ictbot stopped");
    Ok(())
}

fn setup_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ictbot=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn connect_store(settings: &Settings) -> Arc<dyn TradingStore> {
    let Some(database_url) = &settings.storage.database_url else {
        tracing::warn!("No database configured, keeping signals and account state in memory");
        return Arc::new(MemoryStore::new());
    };

    match PostgresStore::connect(database_url).await {
        Ok(store) => {
            tracing::info!("Postgres persistence enabled");
            Arc::new(store)
        }
        Err(e) => {
            tracing::warn!(
                "Failed to connect to Postgres ({}), continuing with in-memory store",
                e
            );
            Arc::new(MemoryStore::new())
        }
    }
}

/// Stored ladder, seeded from config on first run
async fn load_ladder(store: &dyn TradingStore, settings: &Settings) -> Vec<MoneyManagementLevel> {
    match store.load_levels().await {
        Ok(levels) if !levels.is_empty() => {
            tracing::info!("Loaded {} ladder levels from store", levels.len());
            levels
        }
        Ok(_) => {
            let levels = settings.ladder_levels();
            if let Err(e) = store.save_levels(&levels).await {
                tracing::warn!("Failed to seed ladder levels: {}", e);
            }
            levels
        }
        Err(e) => {
            tracing::warn!("Failed to load ladder levels ({}), using configured ladder", e);
            settings.ladder_levels()
        }
    }
}

async fn connect_archive(settings: &Settings) -> Option<Arc<dyn CandleArchive>> {
    let redis_url = settings.storage.redis_url.as_ref()?;

    match RedisCandleArchive::connect(redis_url).await {
        Ok(archive) => Some(Arc::new(archive) as Arc<dyn CandleArchive>),
        Err(e) => {
            tracing::warn!("Failed to connect to Redis ({}), candle archive disabled", e);
            None
        }
    }
}

fn build_sentiment(settings: &Settings) -> Result<Option<Arc<SentimentCache>>> {
    if !settings.sentiment.enabled {
        return Ok(None);
    }

    let client = CotSentimentClient::new(
        settings.sentiment.base_url.clone(),
        settings.sentiment.api_key.clone(),
        settings.sentiment.requests_per_minute,
    )?;
    let ttl = Duration::from_secs(settings.sentiment.ttl_secs);

    tracing::info!("Sentiment feed enabled (cache TTL {:?})", ttl);
    Ok(Some(Arc::new(SentimentCache::new(Arc::new(client), ttl))))
}

fn build_advisor(settings: &Settings) -> Option<Arc<dyn Advisor>> {
    if !settings.advisor.enabled {
        return None;
    }

    let api_key = settings
        .advisor
        .api_key
        .clone()
        .or_else(|| std::env::var("OPENAI_API_KEY").ok());

    match api_key {
        Some(key) => {
            tracing::info!("Advisory commentary enabled ({})", settings.advisor.model);
            Some(Arc::new(OpenAiAdvisor::new(key, settings.advisor.model.clone())) as Arc<dyn Advisor>)
        }
        None => {
            tracing::warn!("Advisor enabled but no API key set, commentary disabled");
            None
        }
    }
}
