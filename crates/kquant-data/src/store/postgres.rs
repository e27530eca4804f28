//! PostgreSQL 포트폴리오 저장소.
//!
//! 모든 쓰기는 SERIALIZABLE 트랜잭션으로 수행하고, 체결 반영은
//! `applied_orders` 원장 테이블로 멱등성을 보장합니다. 같은 (사용자,
//! 종목) 키에 대한 동시 체결은 행 잠금으로 직렬화됩니다.

use super::{PortfolioSnapshot, PortfolioStore};
use crate::error::{DataError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kquant_core::{
    Amount, Fill, OrderType, Percent, Position, Price, RiskMetrics, Side, Ticker, Trade,
    TradeStatus,
};
use rust_decimal::Decimal;
use sqlx::{postgres::PgRow, PgPool, Postgres, Row, Transaction};

/// PostgreSQL 포트폴리오 저장소.
#[derive(Clone)]
pub struct PgPortfolioStore {
    pool: PgPool,
}

/// positions 테이블 레코드.
#[derive(Debug, sqlx::FromRow)]
struct PositionRecord {
    user_id: String,
    ticker: String,
    quantity: i64,
    avg_price: Decimal,
    current_price: Decimal,
    current_value: Decimal,
    invested_amount: Decimal,
    realized_pnl: Decimal,
    unrealized_pnl: Decimal,
    unrealized_pnl_pct: Decimal,
    stop_loss_price: Option<Decimal>,
    stop_loss_pct: Option<Decimal>,
    take_profit_price: Option<Decimal>,
    take_profit_pct: Option<Decimal>,
    take_profit_use_technical: bool,
    trailing_stop_enabled: bool,
    trailing_stop_distance_pct: Option<Decimal>,
    trailing_stop_price: Option<Decimal>,
    highest_price_since_purchase: Option<Decimal>,
    first_purchase_at: DateTime<Utc>,
    last_transaction_at: DateTime<Utc>,
    archived_at: Option<DateTime<Utc>>,
}

impl PositionRecord {
    fn into_position(self) -> Result<Position> {
        Ok(Position {
            user_id: self.user_id,
            ticker: Ticker::new(self.ticker).map_err(DataError::from)?,
            quantity: self.quantity,
            avg_price: self.avg_price,
            current_price: self.current_price,
            current_value: self.current_value,
            invested_amount: self.invested_amount,
            realized_pnl: self.realized_pnl,
            unrealized_pnl: self.unrealized_pnl,
            unrealized_pnl_pct: self.unrealized_pnl_pct,
            stop_loss_price: self.stop_loss_price,
            stop_loss_pct: self.stop_loss_pct,
            take_profit_price: self.take_profit_price,
            take_profit_pct: self.take_profit_pct,
            take_profit_use_technical: self.take_profit_use_technical,
            trailing_stop_enabled: self.trailing_stop_enabled,
            trailing_stop_distance_pct: self.trailing_stop_distance_pct,
            trailing_stop_price: self.trailing_stop_price,
            highest_price_since_purchase: self.highest_price_since_purchase,
            first_purchase_at: self.first_purchase_at,
            last_transaction_at: self.last_transaction_at,
            archived_at: self.archived_at,
        })
    }
}

fn trade_from_row(row: &PgRow) -> Result<Trade> {
    let side: String = row.try_get("side")?;
    let order_type: String = row.try_get("order_type")?;
    let status: String = row.try_get("status")?;
    Ok(Trade {
        order_id: row.try_get("order_id")?,
        user_id: row.try_get("user_id")?,
        ticker: Ticker::new(row.try_get::<String, _>("ticker")?).map_err(DataError::from)?,
        side: match side.as_str() {
            "BUY" => Side::Buy,
            "SELL" => Side::Sell,
            other => return Err(DataError::Invariant(format!("unknown side: {}", other))),
        },
        order_type: match order_type.as_str() {
            "MARKET" => OrderType::Market,
            "LIMIT" => OrderType::Limit,
            "STOP_LOSS" => OrderType::StopLoss,
            other => return Err(DataError::Invariant(format!("unknown order type: {}", other))),
        },
        requested_quantity: row.try_get("requested_quantity")?,
        requested_price: row.try_get("requested_price")?,
        executed_quantity: row.try_get("executed_quantity")?,
        executed_price: row.try_get("executed_price")?,
        total_amount: row.try_get("total_amount")?,
        commission: row.try_get("commission")?,
        tax: row.try_get("tax")?,
        status: parse_status(&status)?,
        reason: row.try_get("reason")?,
        strategy: row.try_get("strategy")?,
        created_at: row.try_get("created_at")?,
        executed_at: row.try_get("executed_at")?,
        cancelled_at: row.try_get("cancelled_at")?,
    })
}

fn parse_status(s: &str) -> Result<TradeStatus> {
    match s {
        "PENDING" => Ok(TradeStatus::Pending),
        "SUBMITTED" => Ok(TradeStatus::Submitted),
        "ACCEPTED" => Ok(TradeStatus::Accepted),
        "PARTIALLY_FILLED" => Ok(TradeStatus::PartiallyFilled),
        "FILLED" => Ok(TradeStatus::Filled),
        "CANCELLED" => Ok(TradeStatus::Cancelled),
        "REJECTED" => Ok(TradeStatus::Rejected),
        "EXPIRED" => Ok(TradeStatus::Expired),
        "FAILED" => Ok(TradeStatus::Failed),
        other => Err(DataError::Invariant(format!("unknown trade status: {}", other))),
    }
}

const SELECT_POSITION: &str = "SELECT * FROM positions \
     WHERE user_id = $1 AND ticker = $2 AND archived_at IS NULL";

const SELECT_POSITION_FOR_UPDATE: &str = "SELECT * FROM positions \
     WHERE user_id = $1 AND ticker = $2 AND archived_at IS NULL FOR UPDATE";

impl PgPortfolioStore {
    /// 연결 풀로 저장소를 생성합니다.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn begin_serializable(&self) -> Result<Transaction<'_, Postgres>> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await?;
        Ok(tx)
    }

    async fn upsert_position(
        tx: &mut Transaction<'_, Postgres>,
        position: &Position,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO positions (
                user_id, ticker, quantity, avg_price, current_price, current_value,
                invested_amount, realized_pnl, unrealized_pnl, unrealized_pnl_pct,
                stop_loss_price, stop_loss_pct, take_profit_price, take_profit_pct,
                take_profit_use_technical, trailing_stop_enabled,
                trailing_stop_distance_pct, trailing_stop_price,
                highest_price_since_purchase, first_purchase_at, last_transaction_at,
                archived_at
             ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                $15, $16, $17, $18, $19, $20, $21, $22
             )
             ON CONFLICT (user_id, ticker) WHERE archived_at IS NULL DO UPDATE SET
                quantity = EXCLUDED.quantity,
                avg_price = EXCLUDED.avg_price,
                current_price = EXCLUDED.current_price,
                current_value = EXCLUDED.current_value,
                invested_amount = EXCLUDED.invested_amount,
                realized_pnl = EXCLUDED.realized_pnl,
                unrealized_pnl = EXCLUDED.unrealized_pnl,
                unrealized_pnl_pct = EXCLUDED.unrealized_pnl_pct,
                stop_loss_price = EXCLUDED.stop_loss_price,
                stop_loss_pct = EXCLUDED.stop_loss_pct,
                take_profit_price = EXCLUDED.take_profit_price,
                take_profit_pct = EXCLUDED.take_profit_pct,
                take_profit_use_technical = EXCLUDED.take_profit_use_technical,
                trailing_stop_enabled = EXCLUDED.trailing_stop_enabled,
                trailing_stop_distance_pct = EXCLUDED.trailing_stop_distance_pct,
                trailing_stop_price = EXCLUDED.trailing_stop_price,
                highest_price_since_purchase = EXCLUDED.highest_price_since_purchase,
                last_transaction_at = EXCLUDED.last_transaction_at,
                archived_at = EXCLUDED.archived_at",
        )
        .bind(&position.user_id)
        .bind(position.ticker.as_str())
        .bind(position.quantity)
        .bind(position.avg_price)
        .bind(position.current_price)
        .bind(position.current_value)
        .bind(position.invested_amount)
        .bind(position.realized_pnl)
        .bind(position.unrealized_pnl)
        .bind(position.unrealized_pnl_pct)
        .bind(position.stop_loss_price)
        .bind(position.stop_loss_pct)
        .bind(position.take_profit_price)
        .bind(position.take_profit_pct)
        .bind(position.take_profit_use_technical)
        .bind(position.trailing_stop_enabled)
        .bind(position.trailing_stop_distance_pct)
        .bind(position.trailing_stop_price)
        .bind(position.highest_price_since_purchase)
        .bind(position.first_purchase_at)
        .bind(position.last_transaction_at)
        .bind(position.archived_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn fetch_position_for_update(
        tx: &mut Transaction<'_, Postgres>,
        user_id: &str,
        ticker: &Ticker,
    ) -> Result<Option<Position>> {
        let record = sqlx::query_as::<_, PositionRecord>(SELECT_POSITION_FOR_UPDATE)
            .bind(user_id)
            .bind(ticker.as_str())
            .fetch_optional(&mut **tx)
            .await?;
        record.map(PositionRecord::into_position).transpose()
    }
}

#[async_trait]
impl PortfolioStore for PgPortfolioStore {
    async fn open_account(&self, user_id: &str, initial_capital: Amount) -> Result<()> {
        sqlx::query(
            "INSERT INTO accounts (user_id, cash_balance, initial_capital, trading_halted)
             VALUES ($1, $2, $2, FALSE)
             ON CONFLICT (user_id) DO NOTHING",
        )
        .bind(user_id)
        .bind(initial_capital)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_position(&self, user_id: &str, ticker: &Ticker) -> Result<Option<Position>> {
        let record = sqlx::query_as::<_, PositionRecord>(SELECT_POSITION)
            .bind(user_id)
            .bind(ticker.as_str())
            .fetch_optional(&self.pool)
            .await?;
        record.map(PositionRecord::into_position).transpose()
    }

    async fn list_positions(&self, user_id: &str) -> Result<Vec<Position>> {
        let records = sqlx::query_as::<_, PositionRecord>(
            "SELECT * FROM positions \
             WHERE user_id = $1 AND archived_at IS NULL ORDER BY ticker",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        records
            .into_iter()
            .map(PositionRecord::into_position)
            .collect()
    }

    async fn cash_balance(&self, user_id: &str) -> Result<Amount> {
        let row = sqlx::query("SELECT cash_balance FROM accounts WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DataError::NotFound(format!("account: {}", user_id)))?;
        Ok(row.try_get("cash_balance")?)
    }

    async fn snapshot(&self, user_id: &str) -> Result<PortfolioSnapshot> {
        // 현금과 포지션을 같은 트랜잭션에서 읽어 일관된 뷰를 만든다
        let mut tx = self.begin_serializable().await?;

        let account_row = sqlx::query(
            "SELECT cash_balance, initial_capital FROM accounts WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| DataError::NotFound(format!("account: {}", user_id)))?;

        let records = sqlx::query_as::<_, PositionRecord>(
            "SELECT * FROM positions \
             WHERE user_id = $1 AND archived_at IS NULL ORDER BY ticker",
        )
        .bind(user_id)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(PortfolioSnapshot {
            user_id: user_id.to_string(),
            cash_balance: account_row.try_get("cash_balance")?,
            initial_capital: account_row.try_get("initial_capital")?,
            positions: records
                .into_iter()
                .map(PositionRecord::into_position)
                .collect::<Result<Vec<_>>>()?,
        })
    }

    async fn apply_fill(&self, user_id: &str, fill: &Fill) -> Result<Position> {
        let mut tx = self.begin_serializable().await?;

        // 멱등성 원장: 이미 반영된 주문이면 상태를 바꾸지 않는다
        let inserted = sqlx::query(
            "INSERT INTO applied_orders (order_id, user_id, applied_at)
             VALUES ($1, $2, NOW())
             ON CONFLICT (order_id) DO NOTHING",
        )
        .bind(&fill.order_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            tracing::debug!(order_id = %fill.order_id, "Fill already applied, skipping");
            tx.commit().await?;
            return self
                .get_position(user_id, &fill.ticker)
                .await?
                .ok_or_else(|| DataError::NotFound(format!("position: {}", fill.ticker)));
        }

        let existing = Self::fetch_position_for_update(&mut tx, user_id, &fill.ticker).await?;

        let position = match fill.side {
            Side::Buy => {
                let required = fill.gross_amount() + fill.total_fees();
                let updated = sqlx::query(
                    "UPDATE accounts SET cash_balance = cash_balance - $1 \
                     WHERE user_id = $2 AND cash_balance >= $1",
                )
                .bind(required)
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
                if updated.rows_affected() == 0 {
                    return Err(DataError::InsufficientFunds(format!(
                        "cannot debit {} for {}",
                        required, user_id
                    )));
                }

                match existing {
                    Some(mut position) => {
                        position.apply_buy(fill.quantity, fill.price)?;
                        position
                    }
                    None => Position::open(user_id, fill.ticker.clone(), fill.quantity, fill.price)?,
                }
            }
            Side::Sell => {
                let mut position = existing.ok_or_else(|| {
                    DataError::NotFound(format!("position: {} for {}", fill.ticker, user_id))
                })?;
                position.apply_sell(fill.quantity, fill.price, fill.total_fees())?;

                sqlx::query(
                    "UPDATE accounts SET cash_balance = cash_balance + $1 WHERE user_id = $2",
                )
                .bind(fill.gross_amount() - fill.total_fees())
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
                position
            }
        };

        Self::upsert_position(&mut tx, &position).await?;
        tx.commit().await?;
        Ok(position)
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
        let mut tx = self.begin_serializable().await?;
        let mut position = Self::fetch_position_for_update(&mut tx, user_id, ticker)
            .await?
            .ok_or_else(|| DataError::NotFound(format!("position: {}", ticker)))?;
        position.initialize_limits(
            stop_loss_pct,
            take_profit_pct,
            trailing_enabled,
            trailing_distance_pct,
        );
        Self::upsert_position(&mut tx, &position).await?;
        tx.commit().await?;
        Ok(position)
    }

    async fn update_trailing(
        &self,
        user_id: &str,
        ticker: &Ticker,
        last_price: Price,
    ) -> Result<bool> {
        let mut tx = self.begin_serializable().await?;
        let mut position = Self::fetch_position_for_update(&mut tx, user_id, ticker)
            .await?
            .ok_or_else(|| DataError::NotFound(format!("position: {}", ticker)))?;
        let moved = position.update_trailing(last_price)?;
        if moved {
            Self::upsert_position(&mut tx, &position).await?;
        }
        tx.commit().await?;
        Ok(moved)
    }

    async fn update_position_price(
        &self,
        user_id: &str,
        ticker: &Ticker,
        last_price: Price,
    ) -> Result<()> {
        let mut tx = self.begin_serializable().await?;
        if let Some(mut position) =
            Self::fetch_position_for_update(&mut tx, user_id, ticker).await?
        {
            position.update_price(last_price);
            Self::upsert_position(&mut tx, &position).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn set_halt(&self, user_id: &str, reason: &str) -> Result<()> {
        sqlx::query(
            "UPDATE accounts SET trading_halted = TRUE, halt_reason = $2, halt_started_at = NOW()
             WHERE user_id = $1",
        )
        .bind(user_id)
        .bind(reason)
        .execute(&self.pool)
        .await?;
        tracing::warn!(user = user_id, reason, "Trading halted");
        Ok(())
    }

    async fn clear_halt(&self, user_id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE accounts SET trading_halted = FALSE, halt_reason = NULL, halt_started_at = NULL
             WHERE user_id = $1",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        tracing::info!(user = user_id, "Trading halt cleared");
        Ok(())
    }

    async fn is_halted(&self, user_id: &str) -> Result<bool> {
        let row = sqlx::query("SELECT trading_halted FROM accounts WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row
            .map(|r| r.try_get("trading_halted"))
            .transpose()?
            .unwrap_or(false))
    }

    async fn get_metrics(&self, user_id: &str) -> Result<Option<RiskMetrics>> {
        let row = sqlx::query(
            "SELECT * FROM risk_metrics WHERE user_id = $1 ORDER BY computed_at DESC LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| {
            Ok(RiskMetrics {
                user_id: r.try_get("user_id")?,
                total_value: r.try_get("total_value")?,
                cash_balance: r.try_get("cash_balance")?,
                invested_amount: r.try_get("invested_amount")?,
                peak_value: r.try_get("peak_value")?,
                initial_capital: r.try_get("initial_capital")?,
                realized_pnl: r.try_get("realized_pnl")?,
                unrealized_pnl: r.try_get("unrealized_pnl")?,
                daily_pnl: r.try_get("daily_pnl")?,
                current_drawdown: r.try_get("current_drawdown")?,
                max_drawdown: r.try_get("max_drawdown")?,
                drawdown_duration_days: r.try_get("drawdown_duration_days")?,
                position_count: r.try_get::<i64, _>("position_count")? as usize,
                largest_position_pct: r.try_get("largest_position_pct")?,
                total_loss_from_initial_pct: r.try_get("total_loss_from_initial_pct")?,
                trading_halted: r.try_get("trading_halted")?,
                halt_reason: r.try_get("halt_reason")?,
                halt_started_at: r.try_get("halt_started_at")?,
                computed_at: r.try_get("computed_at")?,
            })
        })
        .transpose()
    }

    async fn save_metrics(&self, metrics: &RiskMetrics) -> Result<()> {
        sqlx::query(
            "INSERT INTO risk_metrics (
                user_id, total_value, cash_balance, invested_amount, peak_value,
                initial_capital, realized_pnl, unrealized_pnl, daily_pnl,
                current_drawdown, max_drawdown, drawdown_duration_days,
                position_count, largest_position_pct, total_loss_from_initial_pct,
                trading_halted, halt_reason, halt_started_at, computed_at
             ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                $16, $17, $18, $19
             )",
        )
        .bind(&metrics.user_id)
        .bind(metrics.total_value)
        .bind(metrics.cash_balance)
        .bind(metrics.invested_amount)
        .bind(metrics.peak_value)
        .bind(metrics.initial_capital)
        .bind(metrics.realized_pnl)
        .bind(metrics.unrealized_pnl)
        .bind(metrics.daily_pnl)
        .bind(metrics.current_drawdown)
        .bind(metrics.max_drawdown)
        .bind(metrics.drawdown_duration_days)
        .bind(metrics.position_count as i64)
        .bind(metrics.largest_position_pct)
        .bind(metrics.total_loss_from_initial_pct)
        .bind(metrics.trading_halted)
        .bind(&metrics.halt_reason)
        .bind(metrics.halt_started_at)
        .bind(metrics.computed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_trade(&self, trade: &Trade) -> Result<()> {
        sqlx::query(
            "INSERT INTO trades (
                order_id, user_id, ticker, side, order_type, requested_quantity,
                requested_price, executed_quantity, executed_price, total_amount,
                commission, tax, status, reason, strategy, created_at, executed_at,
                cancelled_at
             ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                $16, $17, $18
             )
             ON CONFLICT (order_id) DO UPDATE SET
                executed_quantity = EXCLUDED.executed_quantity,
                executed_price = EXCLUDED.executed_price,
                total_amount = EXCLUDED.total_amount,
                commission = EXCLUDED.commission,
                tax = EXCLUDED.tax,
                status = EXCLUDED.status,
                executed_at = EXCLUDED.executed_at,
                cancelled_at = EXCLUDED.cancelled_at",
        )
        .bind(&trade.order_id)
        .bind(&trade.user_id)
        .bind(trade.ticker.as_str())
        .bind(trade.side.to_string())
        .bind(trade.order_type.to_string())
        .bind(trade.requested_quantity)
        .bind(trade.requested_price)
        .bind(trade.executed_quantity)
        .bind(trade.executed_price)
        .bind(trade.total_amount)
        .bind(trade.commission)
        .bind(trade.tax)
        .bind(trade.status.to_string())
        .bind(&trade.reason)
        .bind(&trade.strategy)
        .bind(trade.created_at)
        .bind(trade.executed_at)
        .bind(trade.cancelled_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_trade(&self, order_id: &str) -> Result<Option<Trade>> {
        let row = sqlx::query("SELECT * FROM trades WHERE order_id = $1")
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| trade_from_row(&r)).transpose()
    }

    async fn recent_trades(&self, user_id: &str, limit: usize) -> Result<Vec<Trade>> {
        let rows = sqlx::query(
            "SELECT * FROM trades WHERE user_id = $1 ORDER BY created_at DESC LIMIT $2",
        )
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(trade_from_row).collect()
    }
}
