//! 설정 관리.
//!
//! 기본값 → TOML 파일 → 환경 변수(`KQUANT` 접두사, `__` 구분자) 순서로
//! 레이어링됩니다. 로드 직후 `validate()`가 실패하면 서비스는 기동을
//! 거부해야 합니다 (종료 코드 1).

use crate::error::{KquantError, KquantResult};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// 애플리케이션 설정.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    /// 서버 설정
    #[serde(default)]
    pub server: ServerConfig,
    /// 데이터베이스 설정
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Redis 설정
    #[serde(default)]
    pub redis: RedisSettings,
    /// 로깅 설정
    #[serde(default)]
    pub logging: LoggingConfig,
    /// 신호 생성 설정
    #[serde(default)]
    pub signal: SignalConfig,
    /// 리스크 관리 설정
    #[serde(default)]
    pub risk: RiskSettings,
    /// 실행(브로커) 설정
    #[serde(default)]
    pub execution: ExecutionConfig,
    /// 오케스트레이터 설정
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
}

/// 서버 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// 바인딩할 호스트
    pub host: String,
    /// 리스닝할 포트
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8090,
        }
    }
}

/// 데이터베이스 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// 연결 URL
    pub url: String,
    /// 최대 연결 수
    pub max_connections: u32,
    /// 연결 타임아웃 (초)
    pub connection_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost:5432/kquant".to_string(),
            max_connections: 10,
            connection_timeout_secs: 30,
        }
    }
}

/// Redis 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RedisSettings {
    /// 연결 URL
    pub url: String,
    /// 가격 캐시 TTL (초)
    pub price_cache_ttl_secs: u64,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379/0".to_string(),
            price_cache_ttl_secs: 3600,
        }
    }
}

/// 로깅 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// 로그 레벨
    pub level: String,
    /// 로그 형식 (pretty, json, compact)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

/// 신호 생성 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SignalConfig {
    /// 확신 점수 가중치: 가치
    pub weight_value: Decimal,
    /// 확신 점수 가중치: 모멘텀
    pub weight_momentum: Decimal,
    /// 확신 점수 가중치: 거래량
    pub weight_volume: Decimal,
    /// 확신 점수 가중치: 품질
    pub weight_quality: Decimal,
    /// 진입 최소 종합 점수
    pub min_composite_score: Decimal,
    /// 진입 최소 모멘텀 점수
    pub min_momentum_score: Decimal,
    /// 진입 최소 확신 점수
    pub min_conviction_score: Decimal,
    /// 지정가 주문 사용 여부
    pub use_limit_orders: bool,
    /// 지정가 할인율 (%)
    pub limit_order_discount_pct: Decimal,
    /// 종합 점수 악화 청산 임계값 (포인트)
    pub score_deterioration_threshold: Decimal,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            weight_value: dec!(0.30),
            weight_momentum: dec!(0.30),
            weight_volume: dec!(0.20),
            weight_quality: dec!(0.20),
            min_composite_score: dec!(60),
            min_momentum_score: dec!(50),
            min_conviction_score: dec!(60),
            use_limit_orders: true,
            limit_order_discount_pct: dec!(1.0),
            score_deterioration_threshold: dec!(20),
        }
    }
}

/// 리스크 관리 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RiskSettings {
    /// 거래당 리스크 허용치 (포트폴리오 대비 %)
    pub risk_tolerance_pct: Decimal,
    /// 최대 단일 포지션 크기 (%)
    pub max_position_size_pct: Decimal,
    /// 기본 손절 비율 (%)
    pub stop_loss_pct: Decimal,
    /// 기본 익절 비율 (%)
    pub take_profit_pct: Decimal,
    /// 트레일링 스톱 거리 (%)
    pub trailing_stop_distance_pct: Decimal,
    /// 기술 지표 기반 익절 사용 여부
    pub take_profit_use_technical: bool,
    /// 최대 동시 포지션 수
    pub max_positions: usize,
    /// 최대 단일 종목 집중도 (%)
    pub max_concentration_pct: Decimal,
    /// 최대 섹터 집중도 (%)
    pub max_sector_concentration_pct: Decimal,
    /// 데이터 최신성 요구 (시장 시간 기준, 시간)
    pub require_recent_data_hours: i64,
    /// 최소 데이터 품질 점수
    pub min_data_quality_score: Decimal,
    /// 비상 청산 손실 한도 (%, 초기 자본 대비)
    pub max_total_loss_pct: Decimal,
}

impl Default for RiskSettings {
    fn default() -> Self {
        Self {
            risk_tolerance_pct: dec!(2.0),
            max_position_size_pct: dec!(10.0),
            stop_loss_pct: dec!(10.0),
            take_profit_pct: dec!(20.0),
            trailing_stop_distance_pct: dec!(10.0),
            take_profit_use_technical: false,
            max_positions: 20,
            max_concentration_pct: dec!(30.0),
            max_sector_concentration_pct: dec!(40.0),
            require_recent_data_hours: 48,
            min_data_quality_score: dec!(75.0),
            max_total_loss_pct: dec!(28.0),
        }
    }
}

impl RiskSettings {
    /// 경고 임계값 (%): 손실 한도의 80%.
    pub fn warning_threshold_pct(&self) -> Decimal {
        self.max_total_loss_pct * dec!(0.8)
    }
}

/// 실행(브로커) 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExecutionConfig {
    /// 모의 투자 모드 여부
    pub paper_trading: bool,
    /// 슬리피지 시뮬레이션 사용 여부
    pub enable_slippage: bool,
    /// 기본 슬리피지 (bps)
    pub slippage_base_bps: Decimal,
    /// 거래량 충격 계수
    pub slippage_volume_factor: Decimal,
    /// 변동성 충격 계수
    pub slippage_volatility_factor: Decimal,
    /// 난수 시드 (테스트 재현용, None이면 비결정적)
    pub slippage_seed: Option<u64>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            paper_trading: true,
            enable_slippage: true,
            slippage_base_bps: dec!(5.0),
            slippage_volume_factor: dec!(0.5),
            slippage_volatility_factor: dec!(0.3),
            slippage_seed: None,
        }
    }
}

/// 오케스트레이터 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OrchestratorConfig {
    /// 사용자 ID
    pub user_id: String,
    /// 관리 표면 바인딩 호스트
    pub admin_host: String,
    /// 관리 표면 포트 (status / run-job)
    pub admin_port: u16,
    /// 데이터 수집 시각 (HH:MM, KST)
    pub data_collection_time: String,
    /// 지표 계산 시각 (HH:MM, KST)
    pub indicator_calculation_time: String,
    /// 관심종목 갱신 시각 (HH:MM, KST)
    pub watchlist_update_time: String,
    /// 신호 생성 시각 (HH:MM, KST)
    pub signal_generation_time: String,
    /// 포지션 모니터링 주기 (분)
    pub position_monitor_interval_min: u64,
    /// 리스크 점검 주기 (분)
    pub risk_check_interval_min: u64,
    /// 미스파이어 유예 시간 (초)
    pub misfire_grace_secs: u64,
    /// 종료 시 강제 취소 데드라인 (초)
    pub shutdown_deadline_secs: u64,
    /// 워커 풀 크기
    pub max_workers: usize,
    /// 외부 서비스 URL 레지스트리
    #[serde(default)]
    pub services: ServiceRegistry,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            user_id: "default".to_string(),
            admin_host: "127.0.0.1".to_string(),
            admin_port: 8091,
            data_collection_time: "16:00".to_string(),
            indicator_calculation_time: "17:00".to_string(),
            watchlist_update_time: "18:00".to_string(),
            signal_generation_time: "08:45".to_string(),
            position_monitor_interval_min: 15,
            risk_check_interval_min: 30,
            misfire_grace_secs: 300,
            shutdown_deadline_secs: 60,
            max_workers: 10,
            services: ServiceRegistry::default(),
        }
    }
}

/// 외부 협력 서비스 URL 레지스트리.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceRegistry {
    /// 데이터 수집기
    pub data_collector_url: String,
    /// 지표 계산기
    pub indicator_calculator_url: String,
    /// 관심종목 관리자
    pub watchlist_manager_url: String,
    /// 외부 호출 타임아웃 (초)
    pub call_timeout_secs: u64,
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self {
            data_collector_url: "http://localhost:8081".to_string(),
            indicator_calculator_url: "http://localhost:8082".to_string(),
            watchlist_manager_url: "http://localhost:8083".to_string(),
            call_timeout_secs: 30,
        }
    }
}

fn parse_hhmm(s: &str) -> KquantResult<(u32, u32)> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() != 2 {
        return Err(KquantError::Config(format!("invalid time: {:?}", s)));
    }
    let hour: u32 = parts[0]
        .parse()
        .map_err(|_| KquantError::Config(format!("invalid hour in {:?}", s)))?;
    let minute: u32 = parts[1]
        .parse()
        .map_err(|_| KquantError::Config(format!("invalid minute in {:?}", s)))?;
    if hour > 23 || minute > 59 {
        return Err(KquantError::Config(format!("time out of range: {:?}", s)));
    }
    Ok((hour, minute))
}

impl OrchestratorConfig {
    /// "HH:MM" 설정값을 (시, 분)으로 해석합니다.
    pub fn parse_time(s: &str) -> KquantResult<(u32, u32)> {
        parse_hhmm(s)
    }
}

impl AppConfig {
    /// 파일과 환경 변수에서 설정을 로드합니다.
    pub fn load<P: AsRef<Path>>(path: P) -> KquantResult<Self> {
        let builder = config::Config::builder()
            .add_source(config::File::from(path.as_ref()).required(false))
            .add_source(
                config::Environment::with_prefix("KQUANT")
                    .separator("__")
                    .try_parsing(true),
            );

        let cfg: AppConfig = builder
            .build()
            .map_err(|e| KquantError::Config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| KquantError::Config(e.to_string()))?;

        cfg.validate()?;
        Ok(cfg)
    }

    /// 기본 경로(`config/default.toml`)에서 설정을 로드합니다.
    pub fn load_default() -> KquantResult<Self> {
        Self::load("config/default.toml")
    }

    /// 교차 필드 검증.
    ///
    /// 실패하면 서비스는 기동을 거부해야 합니다.
    pub fn validate(&self) -> KquantResult<()> {
        let tolerance = dec!(0.000001);
        let weight_sum = self.signal.weight_value
            + self.signal.weight_momentum
            + self.signal.weight_volume
            + self.signal.weight_quality;
        if (weight_sum - Decimal::ONE).abs() > tolerance {
            return Err(KquantError::Config(format!(
                "conviction weights must sum to 1.0, got {}",
                weight_sum
            )));
        }

        for (name, pct) in [
            ("risk.risk_tolerance_pct", self.risk.risk_tolerance_pct),
            ("risk.max_position_size_pct", self.risk.max_position_size_pct),
            ("risk.stop_loss_pct", self.risk.stop_loss_pct),
            ("risk.take_profit_pct", self.risk.take_profit_pct),
            ("risk.trailing_stop_distance_pct", self.risk.trailing_stop_distance_pct),
            ("risk.max_concentration_pct", self.risk.max_concentration_pct),
            ("risk.max_sector_concentration_pct", self.risk.max_sector_concentration_pct),
            ("risk.max_total_loss_pct", self.risk.max_total_loss_pct),
        ] {
            if pct <= Decimal::ZERO || pct > Decimal::from(100) {
                return Err(KquantError::Config(format!(
                    "{} must be in (0, 100], got {}",
                    name, pct
                )));
            }
        }

        if self.risk.max_concentration_pct > self.risk.max_sector_concentration_pct {
            return Err(KquantError::Config(format!(
                "single-position concentration {} cannot exceed sector concentration {}",
                self.risk.max_concentration_pct, self.risk.max_sector_concentration_pct
            )));
        }

        if self.risk.max_positions == 0 {
            return Err(KquantError::Config("risk.max_positions must be > 0".to_string()));
        }

        if self.risk.require_recent_data_hours <= 0 {
            return Err(KquantError::Config(
                "risk.require_recent_data_hours must be > 0".to_string(),
            ));
        }

        for t in [
            &self.orchestrator.data_collection_time,
            &self.orchestrator.indicator_calculation_time,
            &self.orchestrator.watchlist_update_time,
            &self.orchestrator.signal_generation_time,
        ] {
            parse_hhmm(t)?;
        }

        if self.orchestrator.max_workers == 0 {
            return Err(KquantError::Config(
                "orchestrator.max_workers must be > 0".to_string(),
            ));
        }

        self.logging
            .format
            .parse::<crate::logging::LogFormat>()
            .map_err(KquantError::Config)?;

        Ok(())
    }
}
