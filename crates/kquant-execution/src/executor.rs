//! 주문 실행기.
//!
//! 검증된 신호를 거래 기록으로 변환하고 생명주기를 진행시킵니다:
//! PENDING → SUBMITTED → ACCEPTED → (PARTIALLY_FILLED →) FILLED,
//! 또는 CANCELLED/REJECTED/EXPIRED/FAILED.
//!
//! 체결마다 KRX 수수료/세금을 적용하고, 거래 기록·현금·포지션 갱신을
//! 신호 ID(=주문 ID)를 멱등성 키로 하는 하나의 경로로 묶습니다. 같은
//! 신호로 재시도하면 기존 거래 기록이 그대로 반환되어 오케스트레이터
//! 재시작을 가로질러도 at-most-once가 보장됩니다.

use crate::broker::{Broker, ExecutionStatus, OrderTicket};
use chrono::Utc;
use kquant_core::{
    CommissionCalculator, Fill, KquantError, KquantResult, Market, RiskSettings, Side,
    SignalKind, Trade, TradeStatus, TradingSignal,
};
use kquant_data::{PortfolioStore, StockDirectory};
use kquant_risk::RiskEngine;
use std::sync::Arc;
use tracing::{info, warn};

/// 주문 실행기.
pub struct OrderExecutor {
    store: Arc<dyn PortfolioStore>,
    broker: Arc<dyn Broker>,
    directory: Arc<dyn StockDirectory>,
    risk_engine: Option<Arc<RiskEngine>>,
    risk: RiskSettings,
}

impl OrderExecutor {
    /// 실행기를 생성합니다.
    pub fn new(
        store: Arc<dyn PortfolioStore>,
        broker: Arc<dyn Broker>,
        directory: Arc<dyn StockDirectory>,
        risk: RiskSettings,
    ) -> Self {
        Self {
            store,
            broker,
            directory,
            risk_engine: None,
            risk,
        }
    }

    /// 체결 성공 시 리스크 점검을 수행할 엔진을 연결합니다.
    pub fn with_risk_engine(mut self, engine: Arc<RiskEngine>) -> Self {
        self.risk_engine = Some(engine);
        self
    }

    /// 검증된 신호를 실행합니다.
    ///
    /// 같은 `signal_id`로 다시 호출하면 기존 거래 기록을 반환하며 현금은
    /// 한 번만 움직입니다.
    pub async fn submit_order(&self, signal: &TradingSignal) -> KquantResult<Trade> {
        // 멱등성: 이미 처리된 신호면 기존 기록 반환
        if let Some(existing) = self.store.get_trade(&signal.signal_id).await? {
            info!(order_id = %signal.signal_id, "Duplicate submission, returning existing trade");
            return Ok(existing);
        }

        if !signal.is_valid {
            return Err(KquantError::Validation(format!(
                "signal {} failed validation: {:?}",
                signal.signal_id, signal.validation_warnings
            )));
        }
        if signal.recommended_shares <= 0 {
            return Err(KquantError::InvalidInput(format!(
                "signal {} has no quantity",
                signal.signal_id
            )));
        }

        let side = match signal.kind {
            SignalKind::EntryBuy => Side::Buy,
            SignalKind::ExitSell | SignalKind::EmergencyLiquidation => Side::Sell,
        };

        let mut trade = Trade::new(
            signal.signal_id.clone(),
            signal.user_id.clone(),
            signal.ticker.clone(),
            side,
            signal.order_type,
            signal.recommended_shares,
            signal.limit_price.or(Some(signal.current_price)),
        );
        if !signal.reasons.is_empty() {
            trade.reason = Some(signal.reasons.join("; "));
        }
        trade.strategy = Some(signal.kind.to_string());

        let calculator = self.calculator_for(&signal.ticker).await?;

        // 제출 전 기록: 재시작 시 중복 제출을 막는 첫 방어선
        trade.transition(TradeStatus::Submitted)?;
        self.store.record_trade(&trade).await?;

        let ticket = OrderTicket {
            order_id: trade.order_id.clone(),
            user_id: trade.user_id.clone(),
            ticker: trade.ticker.clone(),
            side,
            order_type: trade.order_type,
            quantity: trade.requested_quantity,
            limit_price: signal.limit_price,
        };

        let execution = match self.broker.submit_order(&ticket).await {
            Ok(execution) => execution,
            Err(e) => {
                trade.transition(TradeStatus::Accepted)?;
                trade.transition(TradeStatus::Failed)?;
                trade.reason = Some(format!("broker error: {}", e));
                self.store.record_trade(&trade).await?;
                return Ok(trade);
            }
        };

        trade.transition(TradeStatus::Accepted)?;

        match execution.status {
            ExecutionStatus::Rejected => {
                trade.transition(TradeStatus::Rejected)?;
                trade.reason = execution.reason.clone();
                warn!(order_id = %trade.order_id, reason = ?execution.reason, "Order rejected");
            }
            ExecutionStatus::Accepted => {
                // 체결 대기 (지정가): 기록만 남긴다
                info!(order_id = %trade.order_id, "Order accepted, awaiting fill");
            }
            ExecutionStatus::PartiallyFilled | ExecutionStatus::Filled => {
                for (index, fill) in execution.fills.iter().enumerate() {
                    let costs = match side {
                        Side::Buy => calculator.buy_costs(fill.quantity, fill.price),
                        Side::Sell => calculator.sell_costs(fill.quantity, fill.price),
                    };
                    let commission = costs.commission;
                    let tax = costs.transaction_tax + costs.agri_fish_tax;

                    trade.record_fill(fill.quantity, fill.price, commission, tax)?;

                    // 부분 체결도 같은 경로를 다시 타므로 체결 단위로
                    // 별도 원장 키를 쓴다
                    let store_fill = Fill {
                        order_id: format!("{}#{}", trade.order_id, index),
                        ticker: trade.ticker.clone(),
                        side,
                        quantity: fill.quantity,
                        price: fill.price,
                        commission,
                        tax,
                        executed_at: fill.executed_at,
                    };
                    let position = self.store.apply_fill(&trade.user_id, &store_fill).await?;

                    // 첫 매수 체결이면 손절/익절/트레일링 한도를 시드
                    if side == Side::Buy && position.trailing_stop_price.is_none() {
                        self.store
                            .initialize_limits(
                                &trade.user_id,
                                &trade.ticker,
                                self.risk.stop_loss_pct,
                                self.risk.take_profit_pct,
                                true,
                                self.risk.trailing_stop_distance_pct,
                            )
                            .await?;
                    }
                }

                info!(
                    order_id = %trade.order_id,
                    executed = trade.executed_quantity,
                    avg_price = ?trade.executed_price,
                    commission = %trade.commission,
                    tax = %trade.tax,
                    "Order executed"
                );
            }
        }

        self.store.record_trade(&trade).await?;

        // 체결 성공 시 리스크 점검 (서킷 브레이커 경로)
        if trade.executed_quantity > 0 {
            if let Some(engine) = &self.risk_engine {
                if let Err(e) = engine.run_check(&trade.user_id).await {
                    warn!(user = %trade.user_id, error = %e, "Post-fill risk check failed");
                }
            }
        }

        Ok(trade)
    }

    /// 신호 목록을 순서대로 실행합니다. 신호 단위 실패는 건너뜁니다.
    pub async fn submit_all(&self, signals: &[TradingSignal]) -> Vec<KquantResult<Trade>> {
        let mut results = Vec::with_capacity(signals.len());
        for signal in signals {
            let result = self.submit_order(signal).await;
            if let Err(e) = &result {
                warn!(signal_id = %signal.signal_id, error = %e, "Signal execution failed");
            }
            results.push(result);
        }
        results
    }

    /// 미체결 주문을 취소하고 기록을 갱신합니다.
    pub async fn cancel_order(&self, order_id: &str, reason: Option<String>) -> KquantResult<Trade> {
        let mut trade = self
            .store
            .get_trade(order_id)
            .await?
            .ok_or_else(|| KquantError::NotFound(format!("trade: {}", order_id)))?;

        if trade.status.is_terminal() {
            return Err(KquantError::Invariant(format!(
                "cannot cancel trade {} in terminal state {}",
                order_id, trade.status
            )));
        }

        self.broker.cancel_order(order_id).await?;
        trade.transition(TradeStatus::Cancelled)?;
        if let Some(reason) = reason {
            trade.reason = Some(reason);
        }
        self.store.record_trade(&trade).await?;
        Ok(trade)
    }

    async fn calculator_for(&self, ticker: &kquant_core::Ticker) -> KquantResult<CommissionCalculator> {
        let market = self
            .directory
            .get_stock(ticker)
            .await?
            .map(|s| s.market)
            .unwrap_or(Market::Kospi);
        Ok(CommissionCalculator::for_market(market))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paper::PaperBroker;
    use kquant_core::{OrderType, Stock, Ticker, Urgency};
    use kquant_data::{MemoryPortfolioStore, MemoryPriceSource, MemoryStockDirectory};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn ticker() -> Ticker {
        Ticker::new("005930").unwrap()
    }

    struct Harness {
        store: Arc<MemoryPortfolioStore>,
        prices: Arc<MemoryPriceSource>,
        executor: OrderExecutor,
    }

    async fn harness() -> Harness {
        let store = Arc::new(MemoryPortfolioStore::new());
        store.open_account("user1", dec!(100000000)).await.unwrap();

        let prices = Arc::new(MemoryPriceSource::new());
        prices.set_price(ticker(), dec!(70000)).await;

        let directory = Arc::new(MemoryStockDirectory::new());
        directory
            .insert(Stock::new(ticker(), "삼성전자", Market::Kospi))
            .await;

        let broker = Arc::new(PaperBroker::new(prices.clone(), store.clone(), None));
        let executor = OrderExecutor::new(
            store.clone(),
            broker,
            directory,
            RiskSettings::default(),
        );

        Harness {
            store,
            prices,
            executor,
        }
    }

    fn buy_signal(shares: i64) -> TradingSignal {
        let mut signal = TradingSignal::new(
            "ENTRY_005930_20260702_084501",
            "user1",
            SignalKind::EntryBuy,
            ticker(),
            dec!(70000),
        );
        signal.recommended_shares = shares;
        signal.position_value = dec!(70000) * Decimal::from(shares);
        signal.order_type = OrderType::Market;
        signal
    }

    #[tokio::test]
    async fn test_market_buy_full_lifecycle() {
        let h = harness().await;
        let trade = h.executor.submit_order(&buy_signal(10)).await.unwrap();

        assert_eq!(trade.status, TradeStatus::Filled);
        assert_eq!(trade.executed_quantity, 10);
        assert_eq!(trade.executed_price, Some(dec!(70000)));
        assert_eq!(trade.commission, dec!(105));
        assert_eq!(trade.tax, Decimal::ZERO); // 매수에는 세금 없음

        // 포지션 생성 + 한도 시드
        let position = h.store.get_position("user1", &ticker()).await.unwrap().unwrap();
        assert_eq!(position.quantity, 10);
        assert_eq!(position.stop_loss_price, Some(dec!(63000.00)));
        assert_eq!(position.take_profit_price, Some(dec!(84000.00)));
        assert!(position.trailing_stop_enabled);

        // 현금 = 1억 - 700,000 - 105
        assert_eq!(h.store.cash_balance("user1").await.unwrap(), dec!(99299895));
    }

    #[tokio::test]
    async fn test_duplicate_submission_is_idempotent() {
        let h = harness().await;
        let signal = buy_signal(10);

        let first = h.executor.submit_order(&signal).await.unwrap();
        let cash_after_first = h.store.cash_balance("user1").await.unwrap();

        // 같은 신호 ID 재제출: 같은 거래 반환, 현금 1회만 차감
        let second = h.executor.submit_order(&signal).await.unwrap();
        assert_eq!(first.order_id, second.order_id);
        assert_eq!(second.executed_quantity, 10);
        assert_eq!(h.store.cash_balance("user1").await.unwrap(), cash_after_first);

        let position = h.store.get_position("user1", &ticker()).await.unwrap().unwrap();
        assert_eq!(position.quantity, 10);
    }

    #[tokio::test]
    async fn test_sell_round_trip_accounting() {
        let h = harness().await;
        h.executor.submit_order(&buy_signal(10)).await.unwrap();

        // 75,000에 전량 매도
        h.prices.set_price(ticker(), dec!(75000)).await;
        let mut sell = TradingSignal::new(
            "EXIT_TAKE_PROFIT_005930_20260702_150001",
            "user1",
            SignalKind::ExitSell,
            ticker(),
            dec!(75000),
        );
        sell.recommended_shares = 10;
        sell.order_type = OrderType::Market;

        let trade = h.executor.submit_order(&sell).await.unwrap();
        assert_eq!(trade.status, TradeStatus::Filled);
        assert_eq!(trade.commission, dec!(113));
        assert_eq!(trade.tax, dec!(1984)); // 1,725 + 259

        // 실현 손익 = 50,000 - (113 + 1,984) = 47,903 (매수 수수료는 현금에 반영)
        let archived = h.store.archived_positions("user1").await;
        assert_eq!(archived[0].realized_pnl, dec!(47903));

        // 최종 현금 = 1억 - 700,105 + 750,000 - 2,097
        assert_eq!(h.store.cash_balance("user1").await.unwrap(), dec!(100047798));
    }

    #[tokio::test]
    async fn test_rejected_when_no_price() {
        let h = harness().await;
        let mut signal = buy_signal(10);
        signal.ticker = Ticker::new("000660").unwrap();
        signal.signal_id = "ENTRY_000660_20260702_084501".to_string();

        let trade = h.executor.submit_order(&signal).await.unwrap();
        assert_eq!(trade.status, TradeStatus::Rejected);
        assert_eq!(trade.executed_quantity, 0);
        // 현금은 움직이지 않는다
        assert_eq!(h.store.cash_balance("user1").await.unwrap(), dec!(100000000));
    }

    #[tokio::test]
    async fn test_invalid_signal_rejected_at_boundary() {
        let h = harness().await;
        let mut signal = buy_signal(10);
        signal.reject("trading halted");

        let result = h.executor.submit_order(&signal).await;
        assert!(matches!(result, Err(KquantError::Validation(_))));
    }

    #[tokio::test]
    async fn test_resting_limit_order_can_be_cancelled() {
        let h = harness().await;
        let mut signal = buy_signal(10);
        signal.order_type = OrderType::Limit;
        signal.limit_price = Some(dec!(69000)); // 시장가 70,000보다 불리 → 대기

        let trade = h.executor.submit_order(&signal).await.unwrap();
        assert_eq!(trade.status, TradeStatus::Accepted);

        let cancelled = h
            .executor
            .cancel_order(&trade.order_id, Some("end of day".to_string()))
            .await
            .unwrap();
        assert_eq!(cancelled.status, TradeStatus::Cancelled);
        assert!(cancelled.cancelled_at.is_some());

        // 종료 상태에서 재취소는 불변식 위반
        let again = h.executor.cancel_order(&trade.order_id, None).await;
        assert!(matches!(again, Err(KquantError::Invariant(_))));
    }

    #[tokio::test]
    async fn test_emergency_liquidation_executes_as_market_sell() {
        let h = harness().await;
        h.executor.submit_order(&buy_signal(10)).await.unwrap();
        h.prices.set_price(ticker(), dec!(50000)).await;

        let mut signal = TradingSignal::new(
            "EXIT_EMERGENCY_005930_20260702_103001",
            "user1",
            SignalKind::EmergencyLiquidation,
            ticker(),
            dec!(50000),
        );
        signal.recommended_shares = 10;
        signal.urgency = Urgency::Critical;
        signal.order_type = OrderType::Market;

        let trade = h.executor.submit_order(&signal).await.unwrap();
        assert_eq!(trade.status, TradeStatus::Filled);
        assert_eq!(trade.side, Side::Sell);

        let archived = h.store.archived_positions("user1").await;
        assert_eq!(archived.len(), 1);
    }
}
