//! PostgreSQL 점수/지표 리더 및 종목 마스터.
//!
//! append-only 테이블(composite_scores, technical_snapshots,
//! fundamental_snapshots)의 최신 행을 읽는 단순 조회 구현입니다.

use crate::error::{DataError, Result};
use crate::reader::{MarketDataReader, StockDirectory};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use kquant_core::{
    CompositeScore, FundamentalSnapshot, Market, Stock, TechnicalSnapshot, Ticker,
};
use rust_decimal::Decimal;
use sqlx::{PgPool, Row};

/// PostgreSQL 시장 데이터 리더.
#[derive(Clone)]
pub struct PgMarketDataReader {
    pool: PgPool,
}

impl PgMarketDataReader {
    /// 연결 풀로 리더를 생성합니다.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ScoreRecord {
    ticker: String,
    date: NaiveDate,
    value_score: Decimal,
    growth_score: Decimal,
    quality_score: Decimal,
    momentum_score: Decimal,
    composite_score: Decimal,
    percentile_rank: Decimal,
    computed_at: DateTime<Utc>,
}

impl ScoreRecord {
    fn into_score(self) -> Result<CompositeScore> {
        Ok(CompositeScore {
            ticker: Ticker::new(self.ticker).map_err(DataError::from)?,
            date: self.date,
            value_score: self.value_score,
            growth_score: self.growth_score,
            quality_score: self.quality_score,
            momentum_score: self.momentum_score,
            composite_score: self.composite_score,
            percentile_rank: self.percentile_rank,
            computed_at: self.computed_at,
        })
    }
}

#[async_trait]
impl MarketDataReader for PgMarketDataReader {
    async fn latest_composite_score(&self, ticker: &Ticker) -> Result<Option<CompositeScore>> {
        let record = sqlx::query_as::<_, ScoreRecord>(
            "SELECT * FROM composite_scores WHERE ticker = $1 ORDER BY computed_at DESC LIMIT 1",
        )
        .bind(ticker.as_str())
        .fetch_optional(&self.pool)
        .await?;
        record.map(ScoreRecord::into_score).transpose()
    }

    async fn composite_score_before(
        &self,
        ticker: &Ticker,
        before: DateTime<Utc>,
    ) -> Result<Option<CompositeScore>> {
        let record = sqlx::query_as::<_, ScoreRecord>(
            "SELECT * FROM composite_scores \
             WHERE ticker = $1 AND computed_at <= $2 \
             ORDER BY computed_at DESC LIMIT 1",
        )
        .bind(ticker.as_str())
        .bind(before)
        .fetch_optional(&self.pool)
        .await?;
        record.map(ScoreRecord::into_score).transpose()
    }

    async fn latest_technical(&self, ticker: &Ticker) -> Result<Option<TechnicalSnapshot>> {
        let row = sqlx::query(
            "SELECT * FROM technical_snapshots WHERE ticker = $1 ORDER BY date DESC LIMIT 1",
        )
        .bind(ticker.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| {
            Ok(TechnicalSnapshot {
                date: r.try_get("date")?,
                rsi_14: r.try_get("rsi_14")?,
                macd: r.try_get("macd")?,
                macd_signal: r.try_get("macd_signal")?,
                macd_histogram: r.try_get("macd_histogram")?,
                sma_20: r.try_get("sma_20")?,
                sma_50: r.try_get("sma_50")?,
                bollinger_upper: r.try_get("bollinger_upper")?,
                bollinger_lower: r.try_get("bollinger_lower")?,
                atr_14: r.try_get("atr_14")?,
                volume_ma_20: r.try_get("volume_ma_20")?,
                volatility_30d: r.try_get("volatility_30d")?,
                computed_at: r.try_get("computed_at")?,
            })
        })
        .transpose()
    }

    async fn latest_fundamental(&self, ticker: &Ticker) -> Result<Option<FundamentalSnapshot>> {
        let row = sqlx::query(
            "SELECT * FROM fundamental_snapshots WHERE ticker = $1 ORDER BY date DESC LIMIT 1",
        )
        .bind(ticker.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| {
            Ok(FundamentalSnapshot {
                date: r.try_get("date")?,
                per: r.try_get("per")?,
                pbr: r.try_get("pbr")?,
                roe: r.try_get("roe")?,
                debt_ratio: r.try_get("debt_ratio")?,
                revenue_growth: r.try_get("revenue_growth")?,
                earnings_growth: r.try_get("earnings_growth")?,
            })
        })
        .transpose()
    }
}

/// PostgreSQL 종목 마스터.
#[derive(Clone)]
pub struct PgStockDirectory {
    pool: PgPool,
}

impl PgStockDirectory {
    /// 연결 풀로 디렉토리를 생성합니다.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StockDirectory for PgStockDirectory {
    async fn get_stock(&self, ticker: &Ticker) -> Result<Option<Stock>> {
        let row = sqlx::query("SELECT * FROM stocks WHERE ticker = $1")
            .bind(ticker.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| {
            let market: String = r.try_get("market")?;
            Ok(Stock {
                ticker: Ticker::new(r.try_get::<String, _>("ticker")?)
                    .map_err(DataError::from)?,
                name: r.try_get("name")?,
                name_en: r.try_get("name_en")?,
                market: market
                    .parse::<Market>()
                    .map_err(DataError::InvalidInput)?,
                sector: r.try_get("sector")?,
                industry: r.try_get("industry")?,
                listed_shares: r.try_get("listed_shares")?,
                is_active: r.try_get("is_active")?,
            })
        })
        .transpose()
    }
}
