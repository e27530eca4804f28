//! 파이프라인 스테이지.
//!
//! 각 스테이지는 감독 경계입니다: 내부 실패는 해당 스테이지 로그로
//! 국한되고 오케스트레이터는 다음 작업을 계속합니다. 스테이지는 종목/
//! 포지션 단위 안전 지점마다 취소 토큰을 확인합니다.

use crate::rate_limit::{RateLimitConfig, RateLimiter};
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::scheduler::{JobContext, JobRunner, StageError};
use async_trait::async_trait;
use kquant_core::{KquantError, KquantResult, Ticker};
use kquant_execution::OrderExecutor;
use kquant_risk::{RiskEngine, SignalValidator};
use kquant_signal::{EntryFilters, SignalGenerator};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// 진입 후보 공급자 (스크리너/관심종목은 외부 협력자).
#[async_trait]
pub trait CandidateSource: Send + Sync {
    /// 후보 종목 목록을 반환합니다.
    async fn candidates(&self) -> KquantResult<Vec<Ticker>>;
}

/// 인메모리 후보 공급자. 테스트/단일 실행용.
#[derive(Default)]
pub struct StaticCandidateSource {
    candidates: RwLock<Vec<Ticker>>,
}

impl StaticCandidateSource {
    /// 고정 후보 목록으로 생성합니다.
    pub fn new(candidates: Vec<Ticker>) -> Self {
        Self {
            candidates: RwLock::new(candidates),
        }
    }

    /// 후보 목록을 교체합니다.
    pub async fn replace(&self, candidates: Vec<Ticker>) {
        *self.candidates.write().await = candidates;
    }
}

#[async_trait]
impl CandidateSource for StaticCandidateSource {
    async fn candidates(&self) -> KquantResult<Vec<Ticker>> {
        Ok(self.candidates.read().await.clone())
    }
}

/// 관심종목 서비스에서 후보를 받아오는 공급자.
pub struct HttpCandidateSource {
    url: String,
    client: reqwest::Client,
}

impl HttpCandidateSource {
    /// 관심종목 엔드포인트로 공급자를 생성합니다.
    pub fn new(url: impl Into<String>, timeout: std::time::Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("HTTP client build");
        Self {
            url: url.into(),
            client,
        }
    }
}

#[async_trait]
impl CandidateSource for HttpCandidateSource {
    async fn candidates(&self) -> KquantResult<Vec<Ticker>> {
        let codes: Vec<String> = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| KquantError::Network(e.to_string()))?
            .json()
            .await
            .map_err(|e| KquantError::Serialization(e.to_string()))?;

        let mut tickers = Vec::with_capacity(codes.len());
        for code in codes {
            match Ticker::new(&code) {
                Ok(ticker) => tickers.push(ticker),
                Err(_) => warn!(%code, "Ignoring invalid ticker from watchlist"),
            }
        }
        Ok(tickers)
    }
}

/// 외부 서비스를 호출하는 스테이지 (데이터 수집, 지표 계산, 관심종목).
///
/// 백오프 재시도와 엔드포인트별 token bucket이 적용되고, 타임아웃은
/// 클라이언트에 설정되어 있습니다.
pub struct HttpStage {
    name: &'static str,
    url: String,
    client: reqwest::Client,
    retry: RetryPolicy,
    limiter: Arc<RateLimiter>,
    rate: RateLimitConfig,
}

impl HttpStage {
    /// 스테이지를 생성합니다. `limiter`는 프로세스 전역으로 공유합니다.
    pub fn new(
        name: &'static str,
        url: impl Into<String>,
        timeout: std::time::Duration,
        limiter: Arc<RateLimiter>,
        rate: RateLimitConfig,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("HTTP client build");
        Self {
            name,
            url: url.into(),
            client,
            retry: RetryPolicy::default(),
            limiter,
            rate,
        }
    }
}

#[async_trait]
impl JobRunner for HttpStage {
    async fn run(&self, ctx: JobContext) -> Result<(), StageError> {
        self.limiter.acquire(self.name, &self.rate).await;
        let response = retry_with_backoff(&self.retry, &ctx.cancel, self.name, || {
            let client = self.client.clone();
            let url = self.url.clone();
            async move {
                let result = client.post(&url).send().await;
                match result {
                    Ok(response) if response.status().is_success() => Ok(()),
                    Ok(response) if response.status().is_server_error() => Err(
                        KquantError::Network(format!("{}: {}", url, response.status())),
                    ),
                    Ok(response) => Err(KquantError::Internal(format!(
                        "{}: unexpected status {}",
                        url,
                        response.status()
                    ))),
                    Err(e) => Err(KquantError::Network(e.to_string())),
                }
            }
        })
        .await;

        match response {
            Ok(()) => {
                info!(stage = self.name, url = %self.url, "External stage complete");
                Ok(())
            }
            Err(e) => Err(StageError::from(e)),
        }
    }
}

/// 신호 생성 → 검증 → 실행 사이클 스테이지.
///
/// 청산을 먼저 처리해 현금을 확보한 뒤 진입을 처리합니다.
pub struct TradingCycleStage {
    user_id: String,
    generator: Arc<SignalGenerator>,
    validator: Arc<SignalValidator>,
    executor: Arc<OrderExecutor>,
    candidates: Arc<dyn CandidateSource>,
    filters: EntryFilters,
}

impl TradingCycleStage {
    /// 스테이지를 생성합니다.
    pub fn new(
        user_id: impl Into<String>,
        generator: Arc<SignalGenerator>,
        validator: Arc<SignalValidator>,
        executor: Arc<OrderExecutor>,
        candidates: Arc<dyn CandidateSource>,
        filters: EntryFilters,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            generator,
            validator,
            executor,
            candidates,
            filters,
        }
    }

    /// 한 사이클을 실행합니다: 청산 → 진입.
    pub async fn run_cycle(&self, ctx: &JobContext) -> Result<CycleSummary, StageError> {
        let mut summary = CycleSummary::default();

        // 1. 청산 신호
        let mut exits = self.generator.generate_exit_signals(&self.user_id).await?;
        summary.exit_signals = exits.len();
        for signal in exits.iter_mut() {
            if ctx.is_cancelled() {
                return Err(StageError::Cancelled);
            }
            let outcome = self.validator.validate(signal).await?;
            if !outcome.is_valid {
                continue;
            }
            match self.executor.submit_order(signal).await {
                Ok(trade) if trade.executed_quantity > 0 => summary.executed_exits += 1,
                Ok(_) => {}
                Err(e) => warn!(signal = %signal.signal_id, error = %e, "Exit execution failed"),
            }
        }

        // 2. 진입 신호
        let candidates = self.candidates.candidates().await?;
        let mut entries = self
            .generator
            .generate_entry_signals(&self.user_id, &candidates, &self.filters)
            .await?;
        summary.entry_signals = entries.len();
        for signal in entries.iter_mut() {
            if ctx.is_cancelled() {
                return Err(StageError::Cancelled);
            }
            let outcome = self.validator.validate(signal).await?;
            if !outcome.is_valid {
                continue;
            }
            match self.executor.submit_order(signal).await {
                Ok(trade) if trade.executed_quantity > 0 => summary.executed_entries += 1,
                Ok(_) => {}
                Err(e) => warn!(signal = %signal.signal_id, error = %e, "Entry execution failed"),
            }
        }

        Ok(summary)
    }
}

/// 사이클 실행 요약.
#[derive(Debug, Default)]
pub struct CycleSummary {
    /// 생성된 청산 신호 수
    pub exit_signals: usize,
    /// 실행된 청산 수
    pub executed_exits: usize,
    /// 생성된 진입 신호 수
    pub entry_signals: usize,
    /// 실행된 진입 수
    pub executed_entries: usize,
}

#[async_trait]
impl JobRunner for TradingCycleStage {
    async fn run(&self, ctx: JobContext) -> Result<(), StageError> {
        let summary = self.run_cycle(&ctx).await?;
        info!(
            user = %self.user_id,
            exits = summary.exit_signals,
            executed_exits = summary.executed_exits,
            entries = summary.entry_signals,
            executed_entries = summary.executed_entries,
            "Trading cycle complete"
        );
        Ok(())
    }
}

/// 포지션 모니터링 스테이지: 청산 트리거만 처리합니다.
pub struct MonitorStage {
    user_id: String,
    generator: Arc<SignalGenerator>,
    validator: Arc<SignalValidator>,
    executor: Arc<OrderExecutor>,
}

impl MonitorStage {
    /// 스테이지를 생성합니다.
    pub fn new(
        user_id: impl Into<String>,
        generator: Arc<SignalGenerator>,
        validator: Arc<SignalValidator>,
        executor: Arc<OrderExecutor>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            generator,
            validator,
            executor,
        }
    }
}

#[async_trait]
impl JobRunner for MonitorStage {
    async fn run(&self, ctx: JobContext) -> Result<(), StageError> {
        let mut exits = self.generator.generate_exit_signals(&self.user_id).await?;
        for signal in exits.iter_mut() {
            if ctx.is_cancelled() {
                return Err(StageError::Cancelled);
            }
            let outcome = self.validator.validate(signal).await?;
            if !outcome.is_valid {
                continue;
            }
            if let Err(e) = self.executor.submit_order(signal).await {
                warn!(signal = %signal.signal_id, error = %e, "Exit execution failed");
            }
        }
        Ok(())
    }
}

/// 리스크 점검 스테이지: 지표 집계 + 서킷 브레이커.
///
/// 브레이커가 발동하면 비상 청산 신호를 검증/실행 경로로 보냅니다.
pub struct RiskCheckStage {
    user_id: String,
    engine: Arc<RiskEngine>,
    validator: Arc<SignalValidator>,
    executor: Arc<OrderExecutor>,
}

impl RiskCheckStage {
    /// 스테이지를 생성합니다.
    pub fn new(
        user_id: impl Into<String>,
        engine: Arc<RiskEngine>,
        validator: Arc<SignalValidator>,
        executor: Arc<OrderExecutor>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            engine,
            validator,
            executor,
        }
    }
}

#[async_trait]
impl JobRunner for RiskCheckStage {
    async fn run(&self, ctx: JobContext) -> Result<(), StageError> {
        let outcome = self.engine.run_check(&self.user_id).await?;
        for warning in &outcome.warnings {
            warn!(user = %self.user_id, warning = %warning, "Risk warning");
        }

        if outcome.tripped {
            let mut signals = outcome.emergency_signals;
            info!(
                user = %self.user_id,
                positions = signals.len(),
                "Circuit breaker tripped, routing emergency liquidations"
            );
            for signal in signals.iter_mut() {
                if ctx.is_cancelled() {
                    return Err(StageError::Cancelled);
                }
                let validation = self.validator.validate(signal).await?;
                if !validation.is_valid {
                    warn!(signal = %signal.signal_id, "Emergency signal rejected");
                    continue;
                }
                if let Err(e) = self.executor.submit_order(signal).await {
                    warn!(signal = %signal.signal_id, error = %e, "Emergency execution failed");
                }
            }
        }
        Ok(())
    }
}
