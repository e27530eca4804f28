//! 모의 투자 브로커.
//!
//! 실제 돈 없이 현실적인 체결을 시뮬레이션합니다:
//! - 시장가: 슬리피지 모델이 적용된 가격으로 즉시 체결
//! - 지정가: 시장가가 유리하면 지정가로 체결, 아니면 접수 상태로 대기
//! - 가격 없음: 거부

use crate::broker::{Broker, BrokerExecution, BrokerFill, ExecutionStatus, OrderTicket};
use crate::slippage::SlippageModel;
use async_trait::async_trait;
use chrono::Utc;
use kquant_core::{KquantResult, OrderType, Price, Shares, Side, Ticker};
use kquant_data::{PortfolioStore, PriceSource};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// 모의 투자 브로커.
pub struct PaperBroker {
    prices: Arc<dyn PriceSource>,
    store: Arc<dyn PortfolioStore>,
    slippage: Option<Mutex<SlippageModel>>,
    orders: Mutex<HashMap<String, BrokerExecution>>,
}

impl PaperBroker {
    /// 브로커를 생성합니다. `slippage`가 `None`이면 기준가 그대로 체결합니다.
    pub fn new(
        prices: Arc<dyn PriceSource>,
        store: Arc<dyn PortfolioStore>,
        slippage: Option<SlippageModel>,
    ) -> Self {
        Self {
            prices,
            store,
            slippage: slippage.map(Mutex::new),
            orders: Mutex::new(HashMap::new()),
        }
    }

    async fn fill_price(
        &self,
        market_price: Price,
        quantity: Shares,
        side: Side,
        ticker: &Ticker,
    ) -> KquantResult<Price> {
        match &self.slippage {
            Some(slippage) => {
                let avg_volume = self.prices.avg_daily_volume(ticker).await?;
                let volatility = self.prices.annualized_volatility(ticker).await?;
                let mut model = slippage.lock().await;
                Ok(model.execution_price(market_price, quantity, side, avg_volume, volatility))
            }
            None => Ok(market_price),
        }
    }
}

#[async_trait]
impl Broker for PaperBroker {
    async fn submit_order(&self, ticket: &OrderTicket) -> KquantResult<BrokerExecution> {
        let market_price = match self.prices.latest_price(&ticket.ticker).await? {
            Some(p) => p,
            None => {
                let execution =
                    BrokerExecution::rejected(&ticket.order_id, "price not available");
                self.orders
                    .lock()
                    .await
                    .insert(ticket.order_id.clone(), execution.clone());
                return Ok(execution);
            }
        };

        let execution = match ticket.order_type {
            OrderType::Market | OrderType::StopLoss => {
                // 시장가: 슬리피지 적용 후 전량 즉시 체결
                let price = self
                    .fill_price(market_price, ticket.quantity, ticket.side, &ticket.ticker)
                    .await?;
                debug!(
                    order_id = %ticket.order_id,
                    market = %market_price,
                    executed = %price,
                    "Market order filled"
                );
                BrokerExecution {
                    order_id: ticket.order_id.clone(),
                    status: ExecutionStatus::Filled,
                    fills: vec![BrokerFill {
                        quantity: ticket.quantity,
                        price,
                        executed_at: Utc::now(),
                    }],
                    reason: None,
                }
            }
            OrderType::Limit => {
                let limit = ticket.limit_price.ok_or_else(|| {
                    kquant_core::KquantError::InvalidInput(
                        "limit order without limit price".to_string(),
                    )
                })?;
                let fillable = match ticket.side {
                    Side::Buy => market_price <= limit,
                    Side::Sell => market_price >= limit,
                };
                if fillable {
                    // 지정가가 유리하면 지정가로 체결 (슬리피지 없음)
                    BrokerExecution {
                        order_id: ticket.order_id.clone(),
                        status: ExecutionStatus::Filled,
                        fills: vec![BrokerFill {
                            quantity: ticket.quantity,
                            price: limit,
                            executed_at: Utc::now(),
                        }],
                        reason: None,
                    }
                } else {
                    info!(
                        order_id = %ticket.order_id,
                        market = %market_price,
                        limit = %limit,
                        "Limit order accepted, waiting for price"
                    );
                    BrokerExecution {
                        order_id: ticket.order_id.clone(),
                        status: ExecutionStatus::Accepted,
                        fills: Vec::new(),
                        reason: None,
                    }
                }
            }
        };

        self.orders
            .lock()
            .await
            .insert(ticket.order_id.clone(), execution.clone());
        Ok(execution)
    }

    async fn cancel_order(&self, order_id: &str) -> KquantResult<bool> {
        let mut orders = self.orders.lock().await;
        match orders.get_mut(order_id) {
            Some(execution) if execution.status == ExecutionStatus::Accepted => {
                execution.status = ExecutionStatus::Rejected;
                execution.reason = Some("cancelled".to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn query_order(&self, order_id: &str) -> KquantResult<Option<BrokerExecution>> {
        Ok(self.orders.lock().await.get(order_id).cloned())
    }

    async fn get_position(&self, user_id: &str, ticker: &Ticker) -> KquantResult<Option<Shares>> {
        Ok(self
            .store
            .get_position(user_id, ticker)
            .await
            .map_err(kquant_core::KquantError::from)?
            .map(|p| p.quantity))
    }

    async fn get_price(&self, ticker: &Ticker) -> KquantResult<Option<Price>> {
        self.prices
            .latest_price(ticker)
            .await
            .map_err(kquant_core::KquantError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kquant_data::{MemoryPortfolioStore, MemoryPriceSource};
    use rust_decimal_macros::dec;

    fn ticker() -> Ticker {
        Ticker::new("005930").unwrap()
    }

    async fn broker_with_price(price: Option<rust_decimal::Decimal>) -> PaperBroker {
        let prices = Arc::new(MemoryPriceSource::new());
        if let Some(p) = price {
            prices.set_price(ticker(), p).await;
        }
        let store = Arc::new(MemoryPortfolioStore::new());
        PaperBroker::new(prices, store, None)
    }

    fn market_buy(quantity: Shares) -> OrderTicket {
        OrderTicket {
            order_id: "ORD1".to_string(),
            user_id: "user1".to_string(),
            ticker: ticker(),
            side: Side::Buy,
            order_type: OrderType::Market,
            quantity,
            limit_price: None,
        }
    }

    #[tokio::test]
    async fn test_market_order_fills_immediately() {
        let broker = broker_with_price(Some(dec!(70000))).await;
        let execution = broker.submit_order(&market_buy(10)).await.unwrap();

        assert_eq!(execution.status, ExecutionStatus::Filled);
        assert_eq!(execution.fills.len(), 1);
        assert_eq!(execution.fills[0].price, dec!(70000)); // 슬리피지 없음
    }

    #[tokio::test]
    async fn test_no_price_rejected() {
        let broker = broker_with_price(None).await;
        let execution = broker.submit_order(&market_buy(10)).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Rejected);
    }

    #[tokio::test]
    async fn test_limit_buy_fills_when_favorable() {
        let broker = broker_with_price(Some(dec!(69000))).await;
        let mut ticket = market_buy(10);
        ticket.order_type = OrderType::Limit;
        ticket.limit_price = Some(dec!(69300));

        let execution = broker.submit_order(&ticket).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Filled);
        assert_eq!(execution.fills[0].price, dec!(69300)); // 지정가 체결
    }

    #[tokio::test]
    async fn test_limit_buy_rests_when_above_limit() {
        let broker = broker_with_price(Some(dec!(70000))).await;
        let mut ticket = market_buy(10);
        ticket.order_type = OrderType::Limit;
        ticket.limit_price = Some(dec!(69300));

        let execution = broker.submit_order(&ticket).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Accepted);
        assert!(execution.fills.is_empty());

        // 대기 주문은 취소 가능
        assert!(broker.cancel_order("ORD1").await.unwrap());
        let queried = broker.query_order("ORD1").await.unwrap().unwrap();
        assert_eq!(queried.status, ExecutionStatus::Rejected);
    }

    #[tokio::test]
    async fn test_slippage_applied_to_market_orders() {
        let prices = Arc::new(MemoryPriceSource::new());
        prices.set_price(ticker(), dec!(70000)).await;
        let store = Arc::new(MemoryPortfolioStore::new());
        let slippage = SlippageModel::new(dec!(5.0), dec!(0.5), dec!(0.3), Some(42));
        let broker = PaperBroker::new(prices, store, Some(slippage));

        let execution = broker.submit_order(&market_buy(10)).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Filled);
        assert!(execution.fills[0].price > dec!(70000)); // 매수는 불리하게
    }
}
