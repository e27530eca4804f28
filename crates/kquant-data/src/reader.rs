//! 점수/지표 읽기 전용 뷰.
//!
//! 최신 종합 점수와 기술 지표 스냅샷을 조회하되, 시장 시간 기준
//! `max_data_age`(기본 48시간)보다 오래된 데이터는 없는 것으로
//! 취급합니다. 주말과 휴장일은 캘린더가 시간 계산에서 제외합니다.

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use kquant_calendar::KrxCalendar;
use kquant_core::{CompositeScore, FundamentalSnapshot, Stock, TechnicalSnapshot, Ticker};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// 최신 점수/지표를 조회하는 저수준 인터페이스.
///
/// 구현체는 DB 테이블(append-only) 위의 최신 행 조회입니다.
#[async_trait]
pub trait MarketDataReader: Send + Sync {
    /// 최신 종합 점수를 조회합니다.
    async fn latest_composite_score(&self, ticker: &Ticker) -> Result<Option<CompositeScore>>;

    /// 지정 시각 이전의 종합 점수를 조회합니다 (악화 판정 기준점).
    async fn composite_score_before(
        &self,
        ticker: &Ticker,
        before: DateTime<Utc>,
    ) -> Result<Option<CompositeScore>>;

    /// 최신 기술 지표 스냅샷을 조회합니다.
    async fn latest_technical(&self, ticker: &Ticker) -> Result<Option<TechnicalSnapshot>>;

    /// 최신 재무 지표 스냅샷을 조회합니다.
    async fn latest_fundamental(&self, ticker: &Ticker) -> Result<Option<FundamentalSnapshot>>;
}

/// 종목 마스터 조회 인터페이스 (섹터 집중도 검증용).
#[async_trait]
pub trait StockDirectory: Send + Sync {
    /// 종목 마스터를 조회합니다.
    async fn get_stock(&self, ticker: &Ticker) -> Result<Option<Stock>>;
}

/// staleness 판정이 적용된 점수 조회 결과.
#[derive(Debug, Clone)]
pub struct ScoreReading {
    /// 종합 점수
    pub score: CompositeScore,
    /// 기술 지표 (있으면)
    pub technical: Option<TechnicalSnapshot>,
    /// 데이터 품질 점수 [0,100] (채워진 입력 비율)
    pub data_quality_score: Decimal,
    /// 데이터 산출 시각
    pub as_of: DateTime<Utc>,
}

/// staleness 경계가 적용된 점수 리더.
pub struct ScoreReader {
    inner: Arc<dyn MarketDataReader>,
    calendar: Arc<KrxCalendar>,
    max_data_age: Duration,
}

impl ScoreReader {
    /// 기본 48 시장 시간 경계로 리더를 생성합니다.
    pub fn new(inner: Arc<dyn MarketDataReader>, calendar: Arc<KrxCalendar>) -> Self {
        Self::with_max_age(inner, calendar, Duration::hours(48))
    }

    /// 지정한 시장 시간 경계로 리더를 생성합니다.
    pub fn with_max_age(
        inner: Arc<dyn MarketDataReader>,
        calendar: Arc<KrxCalendar>,
        max_data_age: Duration,
    ) -> Self {
        Self {
            inner,
            calendar,
            max_data_age,
        }
    }

    /// 데이터가 아직 신선한지 판정합니다 (시장 시간 기준).
    pub fn is_fresh(&self, as_of: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        self.calendar.market_hours_between(as_of, now) <= self.max_data_age
    }

    /// 최신 점수를 staleness 판정과 함께 조회합니다.
    ///
    /// 경계를 넘은 데이터는 `None`으로 취급합니다.
    pub async fn read(&self, ticker: &Ticker) -> Result<Option<ScoreReading>> {
        self.read_at(ticker, Utc::now()).await
    }

    /// 기준 시각을 지정해 조회합니다. 스케줄러/테스트용.
    pub async fn read_at(
        &self,
        ticker: &Ticker,
        now: DateTime<Utc>,
    ) -> Result<Option<ScoreReading>> {
        let score = match self.inner.latest_composite_score(ticker).await? {
            Some(s) => s,
            None => return Ok(None),
        };

        if !self.is_fresh(score.computed_at, now) {
            tracing::debug!(
                ticker = %ticker,
                as_of = %score.computed_at,
                "Score is stale, treating as absent"
            );
            return Ok(None);
        }

        let technical = self.inner.latest_technical(ticker).await?;
        let data_quality_score = technical
            .as_ref()
            .map(|t| t.data_quality_score())
            .unwrap_or(Decimal::ZERO);

        Ok(Some(ScoreReading {
            as_of: score.computed_at,
            score,
            technical,
            data_quality_score,
        }))
    }

    /// 악화 판정 기준점 점수를 조회합니다 (staleness 미적용).
    pub async fn score_before(
        &self,
        ticker: &Ticker,
        before: DateTime<Utc>,
    ) -> Result<Option<CompositeScore>> {
        self.inner.composite_score_before(ticker, before).await
    }

    /// 최신 기술 지표를 조회합니다 (staleness 미적용).
    pub async fn latest_technical(&self, ticker: &Ticker) -> Result<Option<TechnicalSnapshot>> {
        self.inner.latest_technical(ticker).await
    }
}

/// 인메모리 시장 데이터 리더. 테스트용.
#[derive(Default)]
pub struct MemoryMarketDataReader {
    scores: RwLock<HashMap<Ticker, Vec<CompositeScore>>>,
    technicals: RwLock<HashMap<Ticker, TechnicalSnapshot>>,
    fundamentals: RwLock<HashMap<Ticker, FundamentalSnapshot>>,
}

impl MemoryMarketDataReader {
    /// 빈 리더를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 점수를 추가합니다 (시각 오름차순 유지).
    pub async fn push_score(&self, score: CompositeScore) {
        let mut scores = self.scores.write().await;
        let entry = scores.entry(score.ticker.clone()).or_default();
        entry.push(score);
        entry.sort_by_key(|s| s.computed_at);
    }

    /// 기술 지표를 설정합니다.
    pub async fn set_technical(&self, ticker: Ticker, snapshot: TechnicalSnapshot) {
        self.technicals.write().await.insert(ticker, snapshot);
    }

    /// 재무 지표를 설정합니다.
    pub async fn set_fundamental(&self, ticker: Ticker, snapshot: FundamentalSnapshot) {
        self.fundamentals.write().await.insert(ticker, snapshot);
    }
}

#[async_trait]
impl MarketDataReader for MemoryMarketDataReader {
    async fn latest_composite_score(&self, ticker: &Ticker) -> Result<Option<CompositeScore>> {
        let scores = self.scores.read().await;
        Ok(scores.get(ticker).and_then(|v| v.last().cloned()))
    }

    async fn composite_score_before(
        &self,
        ticker: &Ticker,
        before: DateTime<Utc>,
    ) -> Result<Option<CompositeScore>> {
        let scores = self.scores.read().await;
        Ok(scores.get(ticker).and_then(|v| {
            v.iter()
                .rev()
                .find(|s| s.computed_at <= before)
                .cloned()
        }))
    }

    async fn latest_technical(&self, ticker: &Ticker) -> Result<Option<TechnicalSnapshot>> {
        Ok(self.technicals.read().await.get(ticker).cloned())
    }

    async fn latest_fundamental(&self, ticker: &Ticker) -> Result<Option<FundamentalSnapshot>> {
        Ok(self.fundamentals.read().await.get(ticker).cloned())
    }
}

/// 인메모리 종목 마스터. 테스트용.
#[derive(Default)]
pub struct MemoryStockDirectory {
    stocks: RwLock<HashMap<Ticker, Stock>>,
}

impl MemoryStockDirectory {
    /// 빈 디렉토리를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 종목을 등록합니다.
    pub async fn insert(&self, stock: Stock) {
        self.stocks.write().await.insert(stock.ticker.clone(), stock);
    }
}

#[async_trait]
impl StockDirectory for MemoryStockDirectory {
    async fn get_stock(&self, ticker: &Ticker) -> Result<Option<Stock>> {
        Ok(self.stocks.read().await.get(ticker).cloned())
    }
}
