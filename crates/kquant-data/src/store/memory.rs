//! 인메모리 포트폴리오 저장소.
//!
//! 모의 투자 실행과 테스트의 기본 백엔드입니다. 계좌 전체를 하나의
//! RwLock 아래 두므로 (사용자, 종목) 단위 변경이 자연스럽게 직렬화됩니다.

use super::{PortfolioSnapshot, PortfolioStore};
use crate::error::{DataError, Result};
use async_trait::async_trait;
use chrono::Utc;
use kquant_core::{Amount, Fill, Percent, Position, Price, RiskMetrics, Side, Ticker, Trade};
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct Account {
    cash_balance: Amount,
    initial_capital: Amount,
    positions: BTreeMap<Ticker, Position>,
    archived: Vec<Position>,
    applied_orders: HashSet<String>,
    metrics: Option<RiskMetrics>,
    halted: bool,
    halt_reason: Option<String>,
}

/// 인메모리 포트폴리오 저장소.
#[derive(Debug, Default)]
pub struct MemoryPortfolioStore {
    accounts: RwLock<HashMap<String, Account>>,
    trades: RwLock<BTreeMap<String, Trade>>,
}

impl MemoryPortfolioStore {
    /// 빈 저장소를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 보관된(전량 청산) 포지션 목록을 조회합니다. 실현 손익 검증용.
    pub async fn archived_positions(&self, user_id: &str) -> Vec<Position> {
        let accounts = self.accounts.read().await;
        accounts
            .get(user_id)
            .map(|a| a.archived.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl PortfolioStore for MemoryPortfolioStore {
    async fn open_account(&self, user_id: &str, initial_capital: Amount) -> Result<()> {
        let mut accounts = self.accounts.write().await;
        accounts.entry(user_id.to_string()).or_insert_with(|| Account {
            cash_balance: initial_capital,
            initial_capital,
            ..Default::default()
        });
        Ok(())
    }

    async fn get_position(&self, user_id: &str, ticker: &Ticker) -> Result<Option<Position>> {
        let accounts = self.accounts.read().await;
        Ok(accounts
            .get(user_id)
            .and_then(|a| a.positions.get(ticker))
            .cloned())
    }

    async fn list_positions(&self, user_id: &str) -> Result<Vec<Position>> {
        let accounts = self.accounts.read().await;
        Ok(accounts
            .get(user_id)
            .map(|a| a.positions.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn cash_balance(&self, user_id: &str) -> Result<Amount> {
        let accounts = self.accounts.read().await;
        accounts
            .get(user_id)
            .map(|a| a.cash_balance)
            .ok_or_else(|| DataError::NotFound(format!("account: {}", user_id)))
    }

    async fn snapshot(&self, user_id: &str) -> Result<PortfolioSnapshot> {
        let accounts = self.accounts.read().await;
        let account = accounts
            .get(user_id)
            .ok_or_else(|| DataError::NotFound(format!("account: {}", user_id)))?;
        Ok(PortfolioSnapshot {
            user_id: user_id.to_string(),
            cash_balance: account.cash_balance,
            initial_capital: account.initial_capital,
            positions: account.positions.values().cloned().collect(),
        })
    }

    async fn apply_fill(&self, user_id: &str, fill: &Fill) -> Result<Position> {
        let mut accounts = self.accounts.write().await;
        let account = accounts
            .get_mut(user_id)
            .ok_or_else(|| DataError::NotFound(format!("account: {}", user_id)))?;

        // 멱등성: 이미 반영된 주문이면 상태를 건드리지 않는다
        if account.applied_orders.contains(&fill.order_id) {
            tracing::debug!(order_id = %fill.order_id, "Fill already applied, skipping");
            return account
                .positions
                .get(&fill.ticker)
                .cloned()
                .or_else(|| {
                    account
                        .archived
                        .iter()
                        .rev()
                        .find(|p| p.ticker == fill.ticker)
                        .cloned()
                })
                .ok_or_else(|| DataError::NotFound(format!("position: {}", fill.ticker)));
        }

        let result = match fill.side {
            Side::Buy => {
                let required = fill.gross_amount() + fill.total_fees();
                if required > account.cash_balance {
                    return Err(DataError::InsufficientFunds(format!(
                        "need {} but have {}",
                        required, account.cash_balance
                    )));
                }
                account.cash_balance -= required;

                match account.positions.get_mut(&fill.ticker) {
                    Some(position) => {
                        position.apply_buy(fill.quantity, fill.price)?;
                        position.clone()
                    }
                    None => {
                        // 첫 매수 또는 보관 이후 재진입: 새 포지션 (새 평단/트레일링 기준)
                        let position = Position::open(
                            user_id,
                            fill.ticker.clone(),
                            fill.quantity,
                            fill.price,
                        )?;
                        account
                            .positions
                            .insert(fill.ticker.clone(), position.clone());
                        position
                    }
                }
            }
            Side::Sell => {
                let position = account.positions.get_mut(&fill.ticker).ok_or_else(|| {
                    DataError::NotFound(format!("position: {} for {}", fill.ticker, user_id))
                })?;
                position.apply_sell(fill.quantity, fill.price, fill.total_fees())?;
                account.cash_balance += fill.gross_amount() - fill.total_fees();

                let snapshot = position.clone();
                if !snapshot.is_open() {
                    // 전량 청산: 실현 손익을 보존한 채 보관
                    let archived = account
                        .positions
                        .remove(&fill.ticker)
                        .expect("position exists");
                    account.archived.push(archived);
                }
                snapshot
            }
        };

        account.applied_orders.insert(fill.order_id.clone());
        Ok(result)
    }

    async fn initialize_limits(
        &self,
        user_id: &str,
        ticker: &Ticker,
        stop_loss_pct: Percent,
        take_profit_pct: Percent,
        trailing_enabled: bool,
        trailing_distance_pct: Percent,
    ) -> Result<Position> {
        let mut accounts = self.accounts.write().await;
        let account = accounts
            .get_mut(user_id)
            .ok_or_else(|| DataError::NotFound(format!("account: {}", user_id)))?;
        let position = account
            .positions
            .get_mut(ticker)
            .ok_or_else(|| DataError::NotFound(format!("position: {}", ticker)))?;
        position.initialize_limits(
            stop_loss_pct,
            take_profit_pct,
            trailing_enabled,
            trailing_distance_pct,
        );
        Ok(position.clone())
    }

    async fn update_trailing(
        &self,
        user_id: &str,
        ticker: &Ticker,
        last_price: Price,
    ) -> Result<bool> {
        let mut accounts = self.accounts.write().await;
        let account = accounts
            .get_mut(user_id)
            .ok_or_else(|| DataError::NotFound(format!("account: {}", user_id)))?;
        let position = account
            .positions
            .get_mut(ticker)
            .ok_or_else(|| DataError::NotFound(format!("position: {}", ticker)))?;
        Ok(position.update_trailing(last_price)?)
    }

    async fn update_position_price(
        &self,
        user_id: &str,
        ticker: &Ticker,
        last_price: Price,
    ) -> Result<()> {
        let mut accounts = self.accounts.write().await;
        let account = accounts
            .get_mut(user_id)
            .ok_or_else(|| DataError::NotFound(format!("account: {}", user_id)))?;
        if let Some(position) = account.positions.get_mut(ticker) {
            position.update_price(last_price);
        }
        Ok(())
    }

    async fn set_halt(&self, user_id: &str, reason: &str) -> Result<()> {
        let mut accounts = self.accounts.write().await;
        let account = accounts
            .get_mut(user_id)
            .ok_or_else(|| DataError::NotFound(format!("account: {}", user_id)))?;
        account.halted = true;
        account.halt_reason = Some(reason.to_string());
        if let Some(metrics) = account.metrics.as_mut() {
            metrics.trading_halted = true;
            metrics.halt_reason = Some(reason.to_string());
            metrics.halt_started_at = Some(Utc::now());
        }
        tracing::warn!(user = user_id, reason, "Trading halted");
        Ok(())
    }

    async fn clear_halt(&self, user_id: &str) -> Result<()> {
        let mut accounts = self.accounts.write().await;
        let account = accounts
            .get_mut(user_id)
            .ok_or_else(|| DataError::NotFound(format!("account: {}", user_id)))?;
        account.halted = false;
        account.halt_reason = None;
        if let Some(metrics) = account.metrics.as_mut() {
            metrics.trading_halted = false;
            metrics.halt_reason = None;
            metrics.halt_started_at = None;
        }
        tracing::info!(user = user_id, "Trading halt cleared");
        Ok(())
    }

    async fn is_halted(&self, user_id: &str) -> Result<bool> {
        let accounts = self.accounts.read().await;
        Ok(accounts.get(user_id).map(|a| a.halted).unwrap_or(false))
    }

    async fn get_metrics(&self, user_id: &str) -> Result<Option<RiskMetrics>> {
        let accounts = self.accounts.read().await;
        Ok(accounts.get(user_id).and_then(|a| a.metrics.clone()))
    }

    async fn save_metrics(&self, metrics: &RiskMetrics) -> Result<()> {
        let mut accounts = self.accounts.write().await;
        let account = accounts
            .get_mut(&metrics.user_id)
            .ok_or_else(|| DataError::NotFound(format!("account: {}", metrics.user_id)))?;
        account.metrics = Some(metrics.clone());
        Ok(())
    }

    async fn record_trade(&self, trade: &Trade) -> Result<()> {
        let mut trades = self.trades.write().await;
        trades.insert(trade.order_id.clone(), trade.clone());
        Ok(())
    }

    async fn get_trade(&self, order_id: &str) -> Result<Option<Trade>> {
        let trades = self.trades.read().await;
        Ok(trades.get(order_id).cloned())
    }

    async fn recent_trades(&self, user_id: &str, limit: usize) -> Result<Vec<Trade>> {
        let trades = self.trades.read().await;
        let mut list: Vec<Trade> = trades
            .values()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        list.truncate(limit);
        Ok(list)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn ticker() -> Ticker {
        Ticker::new("005930").unwrap()
    }

    fn buy_fill(order_id: &str, quantity: i64, price: Decimal) -> Fill {
        Fill {
            order_id: order_id.to_string(),
            ticker: ticker(),
            side: Side::Buy,
            quantity,
            price,
            commission: dec!(105),
            tax: Decimal::ZERO,
            executed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_apply_fill_buy_then_sell() {
        let store = MemoryPortfolioStore::new();
        store.open_account("user1", dec!(10000000)).await.unwrap();

        let position = store
            .apply_fill("user1", &buy_fill("ORD1", 10, dec!(70000)))
            .await
            .unwrap();
        assert_eq!(position.quantity, 10);
        assert_eq!(position.avg_price, dec!(70000));

        // 현금 = 10,000,000 - 700,000 - 105
        assert_eq!(store.cash_balance("user1").await.unwrap(), dec!(9299895));

        let sell = Fill {
            order_id: "ORD2".to_string(),
            ticker: ticker(),
            side: Side::Sell,
            quantity: 10,
            price: dec!(75000),
            commission: dec!(113),
            tax: dec!(1984),
            executed_at: Utc::now(),
        };
        let position = store.apply_fill("user1", &sell).await.unwrap();
        assert!(!position.is_open());

        // 전량 청산 후 보관 포지션에 실현 손익 유지
        let archived = store.archived_positions("user1").await;
        assert_eq!(archived.len(), 1);
        assert_eq!(archived[0].realized_pnl, dec!(47903)); // 50000 - 113 - 1984
    }

    #[tokio::test]
    async fn test_apply_fill_is_idempotent() {
        let store = MemoryPortfolioStore::new();
        store.open_account("user1", dec!(10000000)).await.unwrap();

        let fill = buy_fill("ORD1", 10, dec!(70000));
        store.apply_fill("user1", &fill).await.unwrap();
        let cash_after_first = store.cash_balance("user1").await.unwrap();

        // 같은 주문 ID 재시도: 현금이 한 번만 차감되어야 한다
        let position = store.apply_fill("user1", &fill).await.unwrap();
        assert_eq!(position.quantity, 10);
        assert_eq!(store.cash_balance("user1").await.unwrap(), cash_after_first);
    }

    #[tokio::test]
    async fn test_insufficient_cash_rejected() {
        let store = MemoryPortfolioStore::new();
        store.open_account("user1", dec!(100000)).await.unwrap();

        let result = store
            .apply_fill("user1", &buy_fill("ORD1", 10, dec!(70000)))
            .await;
        assert!(matches!(result, Err(DataError::InsufficientFunds(_))));
    }

    #[tokio::test]
    async fn test_rebuy_after_full_exit_gets_fresh_baseline() {
        let store = MemoryPortfolioStore::new();
        store.open_account("user1", dec!(100000000)).await.unwrap();

        store
            .apply_fill("user1", &buy_fill("ORD1", 10, dec!(70000)))
            .await
            .unwrap();
        let sell = Fill {
            order_id: "ORD2".to_string(),
            ticker: ticker(),
            side: Side::Sell,
            quantity: 10,
            price: dec!(80000),
            commission: Decimal::ZERO,
            tax: Decimal::ZERO,
            executed_at: Utc::now(),
        };
        store.apply_fill("user1", &sell).await.unwrap();

        // 재진입: 새 평단/새 트레일링 기준
        let position = store
            .apply_fill("user1", &buy_fill("ORD3", 5, dec!(90000)))
            .await
            .unwrap();
        assert_eq!(position.avg_price, dec!(90000));
        assert_eq!(position.realized_pnl, Decimal::ZERO);
        assert!(position.trailing_stop_price.is_none());
    }

    #[tokio::test]
    async fn test_halt_flag_round_trip() {
        let store = MemoryPortfolioStore::new();
        store.open_account("user1", dec!(10000000)).await.unwrap();

        assert!(!store.is_halted("user1").await.unwrap());
        store.set_halt("user1", "loss limit breached").await.unwrap();
        assert!(store.is_halted("user1").await.unwrap());
        store.clear_halt("user1").await.unwrap();
        assert!(!store.is_halted("user1").await.unwrap());
    }

    #[tokio::test]
    async fn test_trailing_update_via_store() {
        let store = MemoryPortfolioStore::new();
        store.open_account("user1", dec!(10000000)).await.unwrap();
        store
            .apply_fill("user1", &buy_fill("ORD1", 10, dec!(70000)))
            .await
            .unwrap();
        store
            .initialize_limits("user1", &ticker(), dec!(10), dec!(20), true, dec!(10))
            .await
            .unwrap();

        assert!(store
            .update_trailing("user1", &ticker(), dec!(90000))
            .await
            .unwrap());
        let position = store.get_position("user1", &ticker()).await.unwrap().unwrap();
        assert_eq!(position.trailing_stop_price, Some(dec!(81000.00)));

        // 하락 시 스톱 유지
        assert!(!store
            .update_trailing("user1", &ticker(), dec!(80000))
            .await
            .unwrap());
    }
}
