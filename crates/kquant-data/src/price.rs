//! 가격 소스.
//!
//! 포지션 모니터와 실행기가 소비하는 현재가/거래량/변동성 조회
//! 인터페이스입니다. 실 구현은 외부 가격 수집 서비스(또는 Redis 캐시)
//! 위에 올라가고, 테스트는 인메모리 구현을 사용합니다.

use crate::error::Result;
use async_trait::async_trait;
use kquant_core::{Price, Ticker};
use rust_decimal::Decimal;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// 가격/유동성 조회 인터페이스.
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// 최신 체결가를 조회합니다.
    async fn latest_price(&self, ticker: &Ticker) -> Result<Option<Price>>;

    /// 최근 거래일의 거래량을 조회합니다 (거래량 점수 입력).
    async fn latest_volume(&self, ticker: &Ticker) -> Result<Option<Decimal>>;

    /// 최근 평균 일 거래량을 조회합니다 (슬리피지 모델 입력).
    async fn avg_daily_volume(&self, ticker: &Ticker) -> Result<Option<Decimal>>;

    /// 30일 연환산 변동성(%)을 조회합니다.
    async fn annualized_volatility(&self, ticker: &Ticker) -> Result<Option<Decimal>>;
}

/// 인메모리 가격 소스. 테스트/모의 투자용.
#[derive(Default)]
pub struct MemoryPriceSource {
    prices: RwLock<HashMap<Ticker, Price>>,
    latest_volumes: RwLock<HashMap<Ticker, Decimal>>,
    volumes: RwLock<HashMap<Ticker, Decimal>>,
    volatilities: RwLock<HashMap<Ticker, Decimal>>,
}

impl MemoryPriceSource {
    /// 빈 가격 소스를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 가격을 설정합니다.
    pub async fn set_price(&self, ticker: Ticker, price: Price) {
        self.prices.write().await.insert(ticker, price);
    }

    /// 최근 거래량을 설정합니다.
    pub async fn set_latest_volume(&self, ticker: Ticker, volume: Decimal) {
        self.latest_volumes.write().await.insert(ticker, volume);
    }

    /// 평균 거래량을 설정합니다.
    pub async fn set_avg_volume(&self, ticker: Ticker, volume: Decimal) {
        self.volumes.write().await.insert(ticker, volume);
    }

    /// 변동성을 설정합니다.
    pub async fn set_volatility(&self, ticker: Ticker, volatility: Decimal) {
        self.volatilities.write().await.insert(ticker, volatility);
    }
}

#[async_trait]
impl PriceSource for MemoryPriceSource {
    async fn latest_price(&self, ticker: &Ticker) -> Result<Option<Price>> {
        Ok(self.prices.read().await.get(ticker).copied())
    }

    async fn latest_volume(&self, ticker: &Ticker) -> Result<Option<Decimal>> {
        Ok(self.latest_volumes.read().await.get(ticker).copied())
    }

    async fn avg_daily_volume(&self, ticker: &Ticker) -> Result<Option<Decimal>> {
        Ok(self.volumes.read().await.get(ticker).copied())
    }

    async fn annualized_volatility(&self, ticker: &Ticker) -> Result<Option<Decimal>> {
        Ok(self.volatilities.read().await.get(ticker).copied())
    }
}

/// Redis 캐시를 읽는 가격 소스.
///
/// 외부 가격 수집기가 `price:latest:{ticker}`에 써 둔 최신가를
/// 소비합니다. 거래량/변동성은 지표 스냅샷의 몫이므로 여기서는
/// 제공하지 않습니다.
pub struct CachedPriceSource {
    cache: std::sync::Arc<crate::redis_cache::PriceCache>,
}

impl CachedPriceSource {
    /// 캐시로 가격 소스를 생성합니다.
    pub fn new(cache: std::sync::Arc<crate::redis_cache::PriceCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl PriceSource for CachedPriceSource {
    async fn latest_price(&self, ticker: &Ticker) -> Result<Option<Price>> {
        Ok(self
            .cache
            .get_cached_price(ticker)
            .await?
            .map(|entry| entry.price))
    }

    async fn latest_volume(&self, _ticker: &Ticker) -> Result<Option<Decimal>> {
        Ok(None)
    }

    async fn avg_daily_volume(&self, _ticker: &Ticker) -> Result<Option<Decimal>> {
        Ok(None)
    }

    async fn annualized_volatility(&self, _ticker: &Ticker) -> Result<Option<Decimal>> {
        Ok(None)
    }
}
