//! Redis 가격 캐시 및 이벤트 발행.
//!
//! Redis는 캐시와 알림 버스로만 사용합니다. 시스템 오브 레코드는 항상
//! 트랜잭션 저장소이며, 어떤 비즈니스 로직도 Redis 순서에 의존하지
//! 않습니다.
//!
//! 키/채널 규약:
//! - `price:latest:{ticker}` → JSON, TTL 1시간
//! - 채널 `stock:price:update` / `stock:price:significant_change` /
//!   `stock:price:alert`, 페이로드 `{event_type, ticker, timestamp, data}`

use crate::error::{DataError, Result};
use chrono::{DateTime, Utc};
use kquant_core::{Price, Ticker};
use redis::{aio::MultiplexedConnection, AsyncCommands, Client};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// 가격 갱신 채널.
pub const CHANNEL_PRICE_UPDATE: &str = "stock:price:update";
/// 급등락 채널.
pub const CHANNEL_SIGNIFICANT_CHANGE: &str = "stock:price:significant_change";
/// 알림 채널.
pub const CHANNEL_PRICE_ALERT: &str = "stock:price:alert";

/// 발행되는 가격 이벤트.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceEvent {
    /// 이벤트 유형
    pub event_type: String,
    /// 종목 코드
    pub ticker: String,
    /// 발생 시각
    pub timestamp: DateTime<Utc>,
    /// 이벤트 데이터
    pub data: Value,
}

impl PriceEvent {
    /// 가격 갱신 이벤트를 생성합니다.
    pub fn update(ticker: &Ticker, price: Price) -> Self {
        Self {
            event_type: "price_update".to_string(),
            ticker: ticker.to_string(),
            timestamp: Utc::now(),
            data: serde_json::json!({ "price": price }),
        }
    }

    /// 급등락 이벤트를 생성합니다.
    pub fn significant_change(ticker: &Ticker, price: Price, change_pct: rust_decimal::Decimal) -> Self {
        Self {
            event_type: "significant_change".to_string(),
            ticker: ticker.to_string(),
            timestamp: Utc::now(),
            data: serde_json::json!({ "price": price, "change_pct": change_pct }),
        }
    }
}

/// 캐시되는 최신 가격 엔트리.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedPrice {
    /// 종목 코드
    pub ticker: String,
    /// 가격
    pub price: Price,
    /// 캐시 시각
    pub cached_at: DateTime<Utc>,
}

/// Redis 가격 캐시.
#[derive(Clone)]
pub struct PriceCache {
    connection: Arc<RwLock<MultiplexedConnection>>,
    ttl_secs: u64,
}

impl PriceCache {
    /// Redis에 연결해 캐시를 생성합니다.
    pub async fn connect(url: &str, ttl_secs: u64) -> Result<Self> {
        info!("Connecting to Redis...");
        let client = Client::open(url).map_err(|e| DataError::Cache(e.to_string()))?;
        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| DataError::Cache(e.to_string()))?;
        info!("Redis connection established");

        Ok(Self {
            connection: Arc::new(RwLock::new(connection)),
            ttl_secs,
        })
    }

    /// Redis 상태를 확인합니다.
    pub async fn health_check(&self) -> Result<bool> {
        let mut conn = self.connection.write().await;
        let result: String = redis::cmd("PING")
            .query_async(&mut *conn)
            .await
            .map_err(|e| DataError::Cache(e.to_string()))?;
        Ok(result == "PONG")
    }

    fn price_key(ticker: &Ticker) -> String {
        format!("price:latest:{}", ticker)
    }

    /// 최신 가격을 캐시합니다 (TTL 적용).
    pub async fn cache_price(&self, ticker: &Ticker, price: Price) -> Result<()> {
        let entry = CachedPrice {
            ticker: ticker.to_string(),
            price,
            cached_at: Utc::now(),
        };
        let json = serde_json::to_string(&entry)
            .map_err(|e| DataError::Serialization(e.to_string()))?;

        let mut conn = self.connection.write().await;
        conn.set_ex::<_, _, ()>(Self::price_key(ticker), json, self.ttl_secs)
            .await
            .map_err(|e| DataError::Cache(e.to_string()))?;
        debug!(ticker = %ticker, %price, "Price cached");
        Ok(())
    }

    /// 캐시된 최신 가격을 조회합니다.
    pub async fn get_cached_price(&self, ticker: &Ticker) -> Result<Option<CachedPrice>> {
        let mut conn = self.connection.write().await;
        let json: Option<String> = conn
            .get(Self::price_key(ticker))
            .await
            .map_err(|e| DataError::Cache(e.to_string()))?;
        json.map(|j| {
            serde_json::from_str(&j).map_err(|e| DataError::Serialization(e.to_string()))
        })
        .transpose()
    }

    /// 이벤트를 채널에 발행합니다.
    pub async fn publish(&self, channel: &str, event: &PriceEvent) -> Result<()> {
        let payload = serde_json::to_string(event)
            .map_err(|e| DataError::Serialization(e.to_string()))?;
        let mut conn = self.connection.write().await;
        conn.publish::<_, _, ()>(channel, payload)
            .await
            .map_err(|e| DataError::Cache(e.to_string()))?;
        Ok(())
    }

    /// 가격 갱신을 캐시하고 이벤트를 발행합니다.
    ///
    /// 변화율이 `significant_change_pct` 이상이면 급등락 채널에도
    /// 발행합니다.
    pub async fn record_price(
        &self,
        ticker: &Ticker,
        price: Price,
        change_pct: Option<rust_decimal::Decimal>,
        significant_change_pct: rust_decimal::Decimal,
    ) -> Result<()> {
        self.cache_price(ticker, price).await?;
        self.publish(CHANNEL_PRICE_UPDATE, &PriceEvent::update(ticker, price))
            .await?;

        if let Some(change) = change_pct {
            if change.abs() >= significant_change_pct {
                self.publish(
                    CHANNEL_SIGNIFICANT_CHANGE,
                    &PriceEvent::significant_change(ticker, price, change),
                )
                .await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_price_key_format() {
        let ticker = Ticker::new("005930").unwrap();
        assert_eq!(PriceCache::price_key(&ticker), "price:latest:005930");
    }

    #[test]
    fn test_event_payload_shape() {
        let ticker = Ticker::new("005930").unwrap();
        let event = PriceEvent::update(&ticker, dec!(70000));
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["event_type"], "price_update");
        assert_eq!(json["ticker"], "005930");
        assert!(json["timestamp"].is_string());
        assert_eq!(json["data"]["price"], "70000");
    }
}
