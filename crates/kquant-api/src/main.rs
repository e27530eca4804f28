//! 리스크 매니저 API 서버.

use kquant_api::{router, AppState};
use kquant_calendar::KrxCalendar;
use kquant_core::{init_logging, AppConfig, LogConfig};
use kquant_data::{
    CachedPriceSource, MemoryMarketDataReader, MemoryPortfolioStore, MemoryPriceSource,
    MemoryStockDirectory, PgMarketDataReader, PgPortfolioStore, PgStockDirectory, PortfolioStore,
    PriceCache, PriceSource, ScoreReader, StockDirectory,
};
use kquant_risk::{PositionMonitor, PositionSizer, RiskEngine};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = init_logging(LogConfig::from_env()) {
        eprintln!("failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    let config = match AppConfig::load_default() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Configuration error, refusing to start");
            std::process::exit(1);
        }
    };

    let calendar = Arc::new(KrxCalendar::with_default_holidays());

    let (store, reader_inner, directory, prices, db_pool, redis): (
        Arc<dyn PortfolioStore>,
        Arc<dyn kquant_data::MarketDataReader>,
        Arc<dyn StockDirectory>,
        Arc<dyn PriceSource>,
        Option<sqlx::PgPool>,
        Option<Arc<PriceCache>>,
    ) = if config.execution.paper_trading {
        info!("Paper trading mode: in-memory backends");
        (
            Arc::new(MemoryPortfolioStore::new()),
            Arc::new(MemoryMarketDataReader::new()),
            Arc::new(MemoryStockDirectory::new()),
            Arc::new(MemoryPriceSource::new()),
            None,
            None,
        )
    } else {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(config.database.max_connections)
            .acquire_timeout(Duration::from_secs(config.database.connection_timeout_secs))
            .connect(&config.database.url)
            .await?;
        let cache = Arc::new(
            PriceCache::connect(&config.redis.url, config.redis.price_cache_ttl_secs).await?,
        );
        (
            Arc::new(PgPortfolioStore::new(pool.clone())),
            Arc::new(PgMarketDataReader::new(pool.clone())),
            Arc::new(PgStockDirectory::new(pool.clone())),
            Arc::new(CachedPriceSource::new(cache.clone())),
            Some(pool),
            Some(cache),
        )
    };

    let reader = Arc::new(ScoreReader::with_max_age(
        reader_inner,
        calendar.clone(),
        chrono::Duration::hours(config.risk.require_recent_data_hours),
    ));

    let monitor = Arc::new(PositionMonitor::new(
        store.clone(),
        prices,
        reader,
        config.risk.clone(),
    ));
    let engine = Arc::new(RiskEngine::new(store.clone(), config.risk.clone()));

    let state = Arc::new(AppState {
        store,
        directory,
        calendar,
        monitor,
        engine,
        sizer: PositionSizer::new(config.risk.clone()),
        risk: config.risk.clone(),
        metrics: Some(kquant_api::metrics::setup_metrics_recorder()),
        db_pool,
        redis,
        started_at: chrono::Utc::now(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    });

    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!(%addr, "Risk manager API listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router(state)).await?;
    Ok(())
}
