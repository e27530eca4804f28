//! 리스크 엔진 / 서킷 브레이커.
//!
//! 주기(기본 30분)마다, 그리고 체결 성공 시마다:
//! 1. 포트폴리오 평가 금액 = Σ 포지션 평가액 + 현금 (일관 스냅샷 기준)
//! 2. peak_value / current_drawdown 갱신
//! 3. 초기 자본 대비 총 손실 계산
//! 4. 한도의 80%에서 경고
//! 5. 한도 도달 시: 정지 플래그 설정 + 포지션별 비상 청산 신호 발행
//!
//! 정지 플래그의 작성자는 이 엔진뿐이고, 해제는 명시적 운영자 조작
//! (`resume`)으로만 가능합니다.

use chrono::Utc;
use kquant_core::{
    KquantResult, OrderType, Position, RiskMetrics, RiskSettings, SignalKind, TradingSignal,
    Urgency, exit_order_id,
};
use kquant_data::{PortfolioSnapshot, PortfolioStore};
use rust_decimal::Decimal;
use std::sync::Arc;

/// 리스크 점검 결과.
#[derive(Debug)]
pub struct RiskCheckOutcome {
    /// 갱신된 지표
    pub metrics: RiskMetrics,
    /// 경고 목록
    pub warnings: Vec<String>,
    /// 이번 점검에서 서킷 브레이커가 발동했는지
    pub tripped: bool,
    /// 비상 청산 신호 (발동 시 포지션당 1건)
    pub emergency_signals: Vec<TradingSignal>,
}

/// 포지션별 비상 청산 신호를 생성합니다 (urgency=critical, 시장가 전량).
pub fn emergency_liquidation_signals(
    user_id: &str,
    positions: &[Position],
    reason: &str,
) -> Vec<TradingSignal> {
    let now = Utc::now();
    positions
        .iter()
        .filter(|p| p.is_open())
        .map(|position| {
            let mut signal = TradingSignal::new(
                exit_order_id("emergency", &position.ticker, now),
                user_id,
                SignalKind::EmergencyLiquidation,
                position.ticker.clone(),
                position.current_price,
            );
            signal.recommended_shares = position.quantity;
            signal.position_value = position.current_value;
            signal.urgency = Urgency::Critical;
            signal.order_type = OrderType::Market;
            signal.reasons.push(reason.to_string());
            signal
        })
        .collect()
}

/// 리스크 엔진.
pub struct RiskEngine {
    store: Arc<dyn PortfolioStore>,
    config: RiskSettings,
}

impl RiskEngine {
    /// 엔진을 생성합니다.
    pub fn new(store: Arc<dyn PortfolioStore>, config: RiskSettings) -> Self {
        Self { store, config }
    }

    /// 일관 스냅샷에서 리스크 지표를 계산합니다.
    ///
    /// peak_value는 실행 중 단조 비감소입니다 (이전 지표와 max).
    pub fn compute_metrics(
        &self,
        snapshot: &PortfolioSnapshot,
        previous: Option<&RiskMetrics>,
    ) -> RiskMetrics {
        let positions_value: Decimal = snapshot.positions.iter().map(|p| p.current_value).sum();
        let total_value = snapshot.cash_balance + positions_value;
        let invested: Decimal = snapshot.positions.iter().map(|p| p.invested_amount).sum();
        let unrealized: Decimal = snapshot.positions.iter().map(|p| p.unrealized_pnl).sum();
        let realized: Decimal = snapshot.positions.iter().map(|p| p.realized_pnl).sum();

        let prev_peak = previous
            .map(|m| m.peak_value)
            .unwrap_or(snapshot.initial_capital);
        let peak_value = prev_peak.max(total_value);

        let current_drawdown = if peak_value > Decimal::ZERO {
            ((peak_value - total_value) / peak_value * Decimal::from(100)).max(Decimal::ZERO)
        } else {
            Decimal::ZERO
        };
        let max_drawdown = previous
            .map(|m| m.max_drawdown)
            .unwrap_or(Decimal::ZERO)
            .max(current_drawdown);

        let drawdown_duration_days = match previous {
            Some(prev) if current_drawdown > Decimal::ZERO => {
                let days_since = (Utc::now() - prev.computed_at).num_days();
                prev.drawdown_duration_days + days_since.max(0)
            }
            _ => 0,
        };

        let total_loss_from_initial_pct = if snapshot.initial_capital > Decimal::ZERO {
            ((snapshot.initial_capital - total_value) / snapshot.initial_capital
                * Decimal::from(100))
            .max(Decimal::ZERO)
        } else {
            Decimal::ZERO
        };

        let largest_position_pct = if total_value > Decimal::ZERO {
            snapshot
                .positions
                .iter()
                .map(|p| p.current_value / total_value * Decimal::from(100))
                .max()
                .unwrap_or(Decimal::ZERO)
        } else {
            Decimal::ZERO
        };

        let daily_pnl = previous
            .filter(|m| m.computed_at.date_naive() == Utc::now().date_naive())
            .map(|m| total_value - m.total_value + m.daily_pnl)
            .unwrap_or(Decimal::ZERO);

        RiskMetrics {
            user_id: snapshot.user_id.clone(),
            total_value,
            cash_balance: snapshot.cash_balance,
            invested_amount: invested,
            peak_value,
            initial_capital: snapshot.initial_capital,
            realized_pnl: realized,
            unrealized_pnl: unrealized,
            daily_pnl,
            current_drawdown,
            max_drawdown,
            drawdown_duration_days,
            position_count: snapshot.positions.iter().filter(|p| p.is_open()).count(),
            largest_position_pct,
            total_loss_from_initial_pct,
            trading_halted: previous.map(|m| m.trading_halted).unwrap_or(false),
            halt_reason: previous.and_then(|m| m.halt_reason.clone()),
            halt_started_at: previous.and_then(|m| m.halt_started_at),
            computed_at: Utc::now(),
        }
    }

    /// 리스크 점검을 수행합니다.
    ///
    /// 지표를 재계산해 저장하고, 한도 도달 시 정지 플래그를 설정한 뒤
    /// 비상 청산 신호를 반환합니다. 이미 정지 중이면 재발동하지 않습니다.
    pub async fn run_check(&self, user_id: &str) -> KquantResult<RiskCheckOutcome> {
        let snapshot = self.store.snapshot(user_id).await?;
        let previous = self.store.get_metrics(user_id).await?;
        let mut metrics = self.compute_metrics(&snapshot, previous.as_ref());

        let mut warnings = Vec::new();
        let mut tripped = false;
        let mut emergency_signals = Vec::new();

        let loss = metrics.total_loss_from_initial_pct;
        let ceiling = self.config.max_total_loss_pct;

        if loss >= ceiling {
            if !metrics.trading_halted {
                let reason = format!(
                    "portfolio loss {:.2}% reached {:.2}% ceiling, halting trading",
                    loss, ceiling
                );
                tracing::error!(user = user_id, %reason, "Circuit breaker tripped");

                self.store.set_halt(user_id, &reason).await?;
                metrics.trading_halted = true;
                metrics.halt_reason = Some(reason.clone());
                metrics.halt_started_at = Some(Utc::now());
                warnings.push(reason.clone());

                emergency_signals =
                    emergency_liquidation_signals(user_id, &snapshot.positions, &reason);
                tripped = true;
            }
        } else if loss >= self.config.warning_threshold_pct() {
            let warning = format!(
                "portfolio loss {:.2}% approaching {:.2}% ceiling",
                loss, ceiling
            );
            tracing::warn!(user = user_id, %warning, "Risk warning");
            warnings.push(warning);
        }

        self.store.save_metrics(&metrics).await?;

        tracing::info!(
            user = user_id,
            total_value = %metrics.total_value,
            drawdown = %metrics.current_drawdown,
            loss = %metrics.total_loss_from_initial_pct,
            halted = metrics.trading_halted,
            "Risk check complete"
        );

        Ok(RiskCheckOutcome {
            metrics,
            warnings,
            tripped,
            emergency_signals,
        })
    }

    /// 운영자 조작: 거래 정지를 해제합니다.
    pub async fn resume(&self, user_id: &str) -> KquantResult<()> {
        self.store.clear_halt(user_id).await?;
        // 저장된 지표에도 해제를 반영한다
        if let Some(mut metrics) = self.store.get_metrics(user_id).await? {
            metrics.trading_halted = false;
            metrics.halt_reason = None;
            metrics.halt_started_at = None;
            self.store.save_metrics(&metrics).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kquant_core::{Fill, Side, Ticker};
    use kquant_data::MemoryPortfolioStore;
    use rust_decimal_macros::dec;

    fn ticker() -> Ticker {
        Ticker::new("005930").unwrap()
    }

    async fn store_with_position(
        initial: Decimal,
        quantity: i64,
        buy_price: Decimal,
        current_price: Decimal,
    ) -> Arc<MemoryPortfolioStore> {
        let store = Arc::new(MemoryPortfolioStore::new());
        store.open_account("user1", initial).await.unwrap();
        store
            .apply_fill(
                "user1",
                &Fill {
                    order_id: "SEED".to_string(),
                    ticker: ticker(),
                    side: Side::Buy,
                    quantity,
                    price: buy_price,
                    commission: Decimal::ZERO,
                    tax: Decimal::ZERO,
                    executed_at: Utc::now(),
                },
            )
            .await
            .unwrap();
        store
            .update_position_price("user1", &ticker(), current_price)
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_portfolio_value_identity() {
        // 불변식: total_value = cash + Σ position.current_value
        let store = store_with_position(dec!(10000000), 100, dec!(50000), dec!(55000)).await;
        let engine = RiskEngine::new(store.clone(), RiskSettings::default());

        let outcome = engine.run_check("user1").await.unwrap();
        let snapshot = store.snapshot("user1").await.unwrap();
        let expected = snapshot.cash_balance
            + snapshot
                .positions
                .iter()
                .map(|p| p.current_value)
                .sum::<Decimal>();
        assert_eq!(outcome.metrics.total_value, expected);
    }

    #[tokio::test]
    async fn test_circuit_breaker_trips_at_28_pct() {
        // 초기 자본 10,000,000 → 평가 7,200,000이면 손실 28%
        // 현금 5,000,000 + 포지션 100주 × 22,000 = 7,200,000
        let store = store_with_position(dec!(10000000), 100, dec!(50000), dec!(22000)).await;
        let engine = RiskEngine::new(store.clone(), RiskSettings::default());

        let outcome = engine.run_check("user1").await.unwrap();

        assert_eq!(outcome.metrics.total_loss_from_initial_pct, dec!(28));
        assert!(outcome.tripped);
        assert!(store.is_halted("user1").await.unwrap());

        // 포지션당 비상 청산 신호
        assert_eq!(outcome.emergency_signals.len(), 1);
        let signal = &outcome.emergency_signals[0];
        assert_eq!(signal.kind, SignalKind::EmergencyLiquidation);
        assert_eq!(signal.urgency, Urgency::Critical);
        assert_eq!(signal.order_type, OrderType::Market);
        assert_eq!(signal.recommended_shares, 100);
    }

    #[tokio::test]
    async fn test_no_retrip_while_halted() {
        let store = store_with_position(dec!(10000000), 100, dec!(50000), dec!(22000)).await;
        let engine = RiskEngine::new(store.clone(), RiskSettings::default());

        let first = engine.run_check("user1").await.unwrap();
        assert!(first.tripped);

        // 이미 정지 중: 재발동/재신호 없음
        let second = engine.run_check("user1").await.unwrap();
        assert!(!second.tripped);
        assert!(second.emergency_signals.is_empty());
        assert!(second.metrics.trading_halted);
    }

    #[tokio::test]
    async fn test_warning_at_80_pct_of_ceiling() {
        // 손실 24% (28%의 80% = 22.4% 초과, 한도 미만)
        // 현금 5,000,000 + 100 × 26,000 = 7,600,000 → 손실 24%
        let store = store_with_position(dec!(10000000), 100, dec!(50000), dec!(26000)).await;
        let engine = RiskEngine::new(store.clone(), RiskSettings::default());

        let outcome = engine.run_check("user1").await.unwrap();

        assert!(!outcome.tripped);
        assert!(!outcome.metrics.trading_halted);
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].contains("approaching"));
    }

    #[tokio::test]
    async fn test_peak_value_monotonic() {
        let store = store_with_position(dec!(10000000), 100, dec!(50000), dec!(60000)).await;
        let engine = RiskEngine::new(store.clone(), RiskSettings::default());

        // 상승: peak = 11,000,000
        let up = engine.run_check("user1").await.unwrap();
        assert_eq!(up.metrics.peak_value, dec!(11000000));

        // 하락해도 peak 유지
        store
            .update_position_price("user1", &ticker(), dec!(40000))
            .await
            .unwrap();
        let down = engine.run_check("user1").await.unwrap();
        assert_eq!(down.metrics.peak_value, dec!(11000000));
        assert!(down.metrics.current_drawdown > Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_resume_clears_halt() {
        let store = store_with_position(dec!(10000000), 100, dec!(50000), dec!(22000)).await;
        let engine = RiskEngine::new(store.clone(), RiskSettings::default());

        engine.run_check("user1").await.unwrap();
        assert!(store.is_halted("user1").await.unwrap());

        engine.resume("user1").await.unwrap();
        assert!(!store.is_halted("user1").await.unwrap());
        let metrics = store.get_metrics("user1").await.unwrap().unwrap();
        assert!(!metrics.trading_halted);
    }

    #[test]
    fn test_emergency_signals_skip_closed_positions() {
        let mut open = kquant_core::Position::open("user1", ticker(), 10, dec!(50000)).unwrap();
        open.update_price(dec!(40000));
        let mut closed =
            kquant_core::Position::open("user1", Ticker::new("000660").unwrap(), 10, dec!(50000))
                .unwrap();
        closed.apply_sell(10, dec!(45000), Decimal::ZERO).unwrap();

        let signals = emergency_liquidation_signals("user1", &[open, closed], "test");
        assert_eq!(signals.len(), 1);
    }
}
