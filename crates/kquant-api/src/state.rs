//! API 공유 상태.

use chrono::{DateTime, Utc};
use kquant_calendar::KrxCalendar;
use kquant_core::RiskSettings;
use kquant_data::{
    MemoryMarketDataReader, MemoryPortfolioStore, MemoryPriceSource, MemoryStockDirectory,
    PortfolioStore, PriceCache, PriceSource, ScoreReader, StockDirectory,
};
use kquant_risk::{PositionMonitor, PositionSizer, RiskEngine};
use metrics_exporter_prometheus::PrometheusHandle;
use sqlx::PgPool;
use std::sync::Arc;

/// 서비스 이름 (헬스체크 응답용).
pub const SERVICE_NAME: &str = "risk-manager";

/// API 공유 상태.
pub struct AppState {
    /// 포트폴리오 저장소
    pub store: Arc<dyn PortfolioStore>,
    /// 종목 마스터
    pub directory: Arc<dyn StockDirectory>,
    /// 시장 캘린더
    pub calendar: Arc<KrxCalendar>,
    /// 포지션 모니터
    pub monitor: Arc<PositionMonitor>,
    /// 리스크 엔진 (정지 플래그의 유일한 작성자)
    pub engine: Arc<RiskEngine>,
    /// 포지션 사이저
    pub sizer: PositionSizer,
    /// 리스크 설정
    pub risk: RiskSettings,
    /// Prometheus 핸들
    pub metrics: Option<PrometheusHandle>,
    /// DB 풀 (헬스체크용, 없으면 not_configured)
    pub db_pool: Option<PgPool>,
    /// Redis 캐시 (헬스체크용)
    pub redis: Option<Arc<PriceCache>>,
    /// 기동 시각
    pub started_at: DateTime<Utc>,
    /// 버전
    pub version: String,
}

impl AppState {
    /// 업타임(초)을 반환합니다.
    pub fn uptime_secs(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }

    /// DB 연결 상태를 확인합니다.
    pub async fn is_db_healthy(&self) -> bool {
        match &self.db_pool {
            Some(pool) => sqlx::query("SELECT 1").execute(pool).await.is_ok(),
            None => false,
        }
    }

    /// Redis 연결 상태를 확인합니다.
    pub async fn is_redis_healthy(&self) -> bool {
        match &self.redis {
            Some(redis) => redis.health_check().await.unwrap_or(false),
            None => false,
        }
    }
}

/// 인메모리 백엔드로 테스트 상태를 만듭니다.
pub fn create_test_state() -> AppState {
    let store: Arc<MemoryPortfolioStore> = Arc::new(MemoryPortfolioStore::new());
    let directory = Arc::new(MemoryStockDirectory::new());
    let calendar = Arc::new(KrxCalendar::with_default_holidays());
    let prices: Arc<dyn PriceSource> = Arc::new(MemoryPriceSource::new());
    let reader = Arc::new(ScoreReader::new(
        Arc::new(MemoryMarketDataReader::new()),
        calendar.clone(),
    ));
    let risk = RiskSettings::default();

    let monitor = Arc::new(PositionMonitor::new(
        store.clone(),
        prices,
        reader,
        risk.clone(),
    ));
    let engine = Arc::new(RiskEngine::new(store.clone(), risk.clone()));

    AppState {
        store,
        directory,
        calendar,
        monitor,
        engine,
        sizer: PositionSizer::new(risk.clone()),
        risk,
        metrics: None,
        db_pool: None,
        redis: None,
        started_at: Utc::now(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    }
}
