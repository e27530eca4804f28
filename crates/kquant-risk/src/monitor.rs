//! 포지션 모니터.
//!
//! 장중 주기(기본 15분)로 모든 보유 포지션을 점검합니다:
//! 1. 최신 가격 조회 및 포지션 평가 갱신
//! 2. 트레일링 스톱 고점 갱신
//! 3. 우선순위대로 트리거 평가 — 먼저 발동한 것이 승리:
//!    손절 → 트레일링 스톱 → 익절(가격) → 익절(기술 지표 2개 이상)
//!
//! 트리거 평가는 틱 시작 시점의 포지션 스냅샷을 기준으로 수행해 찢어진
//! 읽기를 피합니다. 포지션당 청산 신호는 틱마다 최대 한 번 나갑니다.
//! 비상 청산 조건(총 손실 한도)이 걸려 있으면 개별 트리거 평가를
//! 건너뛰고 전 포지션 청산 신호를 냅니다.

use crate::breaker::emergency_liquidation_signals;
use chrono::Utc;
use kquant_core::{
    OrderType, Position, Price, RiskSettings, SignalKind, TechnicalSnapshot, TradingSignal,
    Urgency, exit_order_id,
};
use kquant_data::{PortfolioStore, PriceCache, PriceSource, ScoreReader};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// 청산 트리거 종류.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitTrigger {
    /// 손절
    StopLoss,
    /// 트레일링 스톱
    TrailingStop,
    /// 익절 (가격)
    TakeProfit,
    /// 익절 (기술 지표)
    TechnicalTakeProfit,
    /// 비상 청산
    EmergencyLiquidation,
}

impl ExitTrigger {
    /// 주문 ID에 쓰는 사유 문자열.
    pub fn reason_tag(&self) -> &'static str {
        match self {
            ExitTrigger::StopLoss => "stop_loss",
            ExitTrigger::TrailingStop => "trailing_stop",
            ExitTrigger::TakeProfit | ExitTrigger::TechnicalTakeProfit => "take_profit",
            ExitTrigger::EmergencyLiquidation => "emergency",
        }
    }
}

/// 모니터 틱 결과.
#[derive(Debug, Default)]
pub struct MonitorReport {
    /// 점검한 포지션 수
    pub positions_checked: usize,
    /// 생성된 청산 신호
    pub exit_signals: Vec<TradingSignal>,
    /// 갱신된 트레일링 스톱 수
    pub trailing_stops_updated: usize,
    /// 경고 목록
    pub warnings: Vec<String>,
    /// 비상 청산 발동 여부
    pub emergency_liquidation_triggered: bool,
}

/// 포지션 모니터.
pub struct PositionMonitor {
    store: Arc<dyn PortfolioStore>,
    prices: Arc<dyn PriceSource>,
    reader: Arc<ScoreReader>,
    cache: Option<Arc<PriceCache>>,
    config: RiskSettings,
    /// 급등락 이벤트 발행 임계값 (%)
    significant_change_pct: Decimal,
}

impl PositionMonitor {
    /// 모니터를 생성합니다.
    pub fn new(
        store: Arc<dyn PortfolioStore>,
        prices: Arc<dyn PriceSource>,
        reader: Arc<ScoreReader>,
        config: RiskSettings,
    ) -> Self {
        Self {
            store,
            prices,
            reader,
            cache: None,
            config,
            significant_change_pct: dec!(5.0),
        }
    }

    /// Redis 가격 캐시를 연결합니다 (이벤트 발행용, 선택).
    pub fn with_price_cache(mut self, cache: Arc<PriceCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// 한 사용자의 포지션을 일괄 점검합니다.
    pub async fn monitor_user(&self, user_id: &str) -> kquant_core::KquantResult<MonitorReport> {
        // 틱 시작 시점 스냅샷: 모든 트리거는 이 스냅샷 기준으로 평가
        let snapshot = self.store.snapshot(user_id).await?;
        let positions = snapshot.positions.clone();
        let mut report = MonitorReport {
            positions_checked: positions.len(),
            ..Default::default()
        };

        if positions.is_empty() {
            tracing::debug!(user = user_id, "No positions to monitor");
            return Ok(report);
        }

        // 총 손실 한도 초과 시 개별 트리거 평가를 생략하고 전량 청산
        if let Some(metrics) = self.store.get_metrics(user_id).await? {
            if metrics.total_loss_from_initial_pct >= self.config.max_total_loss_pct {
                let reason = format!(
                    "portfolio loss {}% at or above {}% ceiling",
                    metrics.total_loss_from_initial_pct, self.config.max_total_loss_pct
                );
                tracing::error!(user = user_id, %reason, "Emergency liquidation condition");
                report.emergency_liquidation_triggered = true;
                report.warnings.push(reason.clone());
                report.exit_signals = emergency_liquidation_signals(user_id, &positions, &reason);
                return Ok(report);
            }
        }

        // (사용자, 종목) 순서 보장: 스냅샷이 종목 코드 순으로 정렬되어 있음
        for position in &positions {
            let last_price = match self.prices.latest_price(&position.ticker).await {
                Ok(Some(price)) => price,
                Ok(None) => {
                    report
                        .warnings
                        .push(format!("no price for {}, skipped", position.ticker));
                    continue;
                }
                Err(e) => {
                    report
                        .warnings
                        .push(format!("price lookup failed for {}: {}", position.ticker, e));
                    continue;
                }
            };

            self.store
                .update_position_price(user_id, &position.ticker, last_price)
                .await?;
            if self
                .store
                .update_trailing(user_id, &position.ticker, last_price)
                .await?
            {
                report.trailing_stops_updated += 1;
            }

            self.publish_price(position, last_price).await;

            if let Some(signal) = self.evaluate_triggers(position, last_price).await? {
                report.exit_signals.push(signal);
            }
        }

        tracing::info!(
            user = user_id,
            checked = report.positions_checked,
            exits = report.exit_signals.len(),
            trailing_updated = report.trailing_stops_updated,
            "Position monitoring complete"
        );
        Ok(report)
    }

    /// 우선순위에 따라 트리거를 평가합니다. 첫 발동이 승리합니다.
    async fn evaluate_triggers(
        &self,
        position: &Position,
        last_price: Price,
    ) -> kquant_core::KquantResult<Option<TradingSignal>> {
        // 1. 손절
        if let Some(stop) = position.stop_loss_price {
            if last_price <= stop {
                let reason = format!(
                    "Stop-loss triggered: price {} <= stop {} (loss {}%)",
                    last_price, stop, position.unrealized_pnl_pct
                );
                return Ok(Some(self.exit_signal(
                    position,
                    last_price,
                    ExitTrigger::StopLoss,
                    stop,
                    reason,
                )));
            }
        }

        // 2. 트레일링 스톱
        if position.trailing_stop_enabled {
            if let Some(trailing) = position.trailing_stop_price {
                if last_price <= trailing {
                    let reason = format!(
                        "Trailing stop triggered: price {} <= trailing {} (peak {})",
                        last_price,
                        trailing,
                        position
                            .highest_price_since_purchase
                            .unwrap_or(position.avg_price)
                    );
                    return Ok(Some(self.exit_signal(
                        position,
                        last_price,
                        ExitTrigger::TrailingStop,
                        trailing,
                        reason,
                    )));
                }
            }
        }

        // 3. 익절 (가격)
        if let Some(target) = position.take_profit_price {
            if last_price >= target {
                let reason = format!(
                    "Take-profit triggered: price {} >= target {}",
                    last_price, target
                );
                return Ok(Some(self.exit_signal(
                    position,
                    last_price,
                    ExitTrigger::TakeProfit,
                    target,
                    reason,
                )));
            }
        }

        // 4. 익절 (기술 지표, 2개 이상 동시 성립)
        if position.take_profit_use_technical {
            if let Some(technical) = self.reader.latest_technical(&position.ticker).await? {
                if let Some(reason) = technical_take_profit(&technical, last_price) {
                    return Ok(Some(self.exit_signal(
                        position,
                        last_price,
                        ExitTrigger::TechnicalTakeProfit,
                        last_price,
                        reason,
                    )));
                }
            }
        }

        Ok(None)
    }

    fn exit_signal(
        &self,
        position: &Position,
        last_price: Price,
        trigger: ExitTrigger,
        trigger_price: Price,
        reason: String,
    ) -> TradingSignal {
        let now = Utc::now();
        let mut signal = TradingSignal::new(
            exit_order_id(trigger.reason_tag(), &position.ticker, now),
            position.user_id.clone(),
            SignalKind::ExitSell,
            position.ticker.clone(),
            last_price,
        );
        // 전량 청산 (부분 청산은 설정 확장)
        signal.recommended_shares = position.quantity;
        signal.position_value = last_price * Decimal::from(position.quantity);
        signal.target_price = Some(trigger_price);
        match trigger {
            ExitTrigger::StopLoss | ExitTrigger::TrailingStop => {
                signal.urgency = Urgency::High;
                signal.order_type = OrderType::Market;
            }
            ExitTrigger::TakeProfit => {
                signal.urgency = Urgency::Normal;
                signal.order_type = OrderType::Limit;
                signal.limit_price = Some(trigger_price);
            }
            ExitTrigger::TechnicalTakeProfit => {
                signal.urgency = Urgency::Normal;
                signal.order_type = OrderType::Market;
            }
            ExitTrigger::EmergencyLiquidation => {
                signal.urgency = Urgency::Critical;
                signal.order_type = OrderType::Market;
            }
        }
        signal.reasons.push(reason);
        signal
    }

    async fn publish_price(&self, position: &Position, last_price: Price) {
        if let Some(cache) = &self.cache {
            let change_pct = if position.current_price > Decimal::ZERO {
                Some(
                    (last_price - position.current_price) / position.current_price
                        * Decimal::from(100),
                )
            } else {
                None
            };
            if let Err(e) = cache
                .record_price(
                    &position.ticker,
                    last_price,
                    change_pct,
                    self.significant_change_pct,
                )
                .await
            {
                tracing::warn!(ticker = %position.ticker, error = %e, "Price event publish failed");
            }
        }
    }
}

/// 기술 지표 익절 판정: 아래 중 2개 이상이면 사유 문자열 반환.
/// {RSI>70, MACD 데드크로스, 가격>BB 상단, 가격 ≥ 1.1×SMA20}
fn technical_take_profit(technical: &TechnicalSnapshot, last_price: Price) -> Option<String> {
    let mut hits = Vec::new();

    if let Some(rsi) = technical.rsi_14 {
        if rsi > dec!(70) {
            hits.push(format!("RSI overbought ({})", rsi));
        }
    }
    if let (Some(macd), Some(signal_line), Some(histogram)) = (
        technical.macd,
        technical.macd_signal,
        technical.macd_histogram,
    ) {
        if macd < signal_line && histogram < Decimal::ZERO {
            hits.push("MACD bearish crossover".to_string());
        }
    }
    if let Some(upper) = technical.bollinger_upper {
        if last_price > upper {
            hits.push("price above upper Bollinger band".to_string());
        }
    }
    if let Some(sma_20) = technical.sma_20 {
        if sma_20 > Decimal::ZERO && last_price >= sma_20 * dec!(1.1) {
            hits.push("price 10%+ above SMA20".to_string());
        }
    }

    if hits.len() >= 2 {
        Some(format!("Technical take-profit: {}", hits.join(", ")))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use kquant_calendar::KrxCalendar;
    use kquant_core::{Fill, Side, Ticker};
    use kquant_data::{MemoryMarketDataReader, MemoryPortfolioStore, MemoryPriceSource};

    fn ticker() -> Ticker {
        Ticker::new("005930").unwrap()
    }

    struct Harness {
        store: Arc<MemoryPortfolioStore>,
        prices: Arc<MemoryPriceSource>,
        monitor: PositionMonitor,
    }

    async fn harness() -> Harness {
        let store = Arc::new(MemoryPortfolioStore::new());
        store.open_account("user1", dec!(10000000)).await.unwrap();

        let prices = Arc::new(MemoryPriceSource::new());
        let reader = Arc::new(ScoreReader::new(
            Arc::new(MemoryMarketDataReader::new()),
            Arc::new(KrxCalendar::with_default_holidays()),
        ));
        let monitor = PositionMonitor::new(
            store.clone(),
            prices.clone(),
            reader,
            RiskSettings::default(),
        );
        Harness {
            store,
            prices,
            monitor,
        }
    }

    async fn seed_position(h: &Harness, quantity: i64, price: Decimal) {
        h.store
            .apply_fill(
                "user1",
                &Fill {
                    order_id: format!("SEED_{}", price),
                    ticker: ticker(),
                    side: Side::Buy,
                    quantity,
                    price,
                    commission: Decimal::ZERO,
                    tax: Decimal::ZERO,
                    executed_at: Utc::now(),
                },
            )
            .await
            .unwrap();
        h.store
            .initialize_limits("user1", &ticker(), dec!(10), dec!(20), true, dec!(10))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_stop_loss_trigger() {
        let h = harness().await;
        seed_position(&h, 10, dec!(70000)).await;
        // 손절가 63,000 이하로 하락
        h.prices.set_price(ticker(), dec!(62000)).await;

        let report = h.monitor.monitor_user("user1").await.unwrap();
        assert_eq!(report.exit_signals.len(), 1);

        let signal = &report.exit_signals[0];
        assert_eq!(signal.urgency, Urgency::High);
        assert_eq!(signal.order_type, OrderType::Market);
        assert_eq!(signal.recommended_shares, 10);
        assert!(signal.signal_id.starts_with("EXIT_STOP_LOSS_005930_"));
    }

    #[tokio::test]
    async fn test_trailing_stop_sequence() {
        let h = harness().await;
        seed_position(&h, 10, dec!(70000)).await;
        // 이 시나리오는 트레일링만 본다: 가격 익절은 멀리 치워둔다
        h.store
            .initialize_limits("user1", &ticker(), dec!(10), dec!(100), true, dec!(10))
            .await
            .unwrap();

        // 상승: 90,000 → 고점 90,000, 트레일링 81,000으로 갱신. 트리거 없음
        h.prices.set_price(ticker(), dec!(90000)).await;
        let report = h.monitor.monitor_user("user1").await.unwrap();
        assert_eq!(report.trailing_stops_updated, 1);
        assert!(report.exit_signals.is_empty());

        // 트레일링(81,000) 위에서의 하락은 트리거 없음
        h.prices.set_price(ticker(), dec!(82000)).await;
        let report = h.monitor.monitor_user("user1").await.unwrap();
        assert!(report.exit_signals.is_empty());

        // 79,000 ≤ 81,000 → 트레일링 스톱 발동
        h.prices.set_price(ticker(), dec!(79000)).await;
        let report = h.monitor.monitor_user("user1").await.unwrap();
        assert_eq!(report.exit_signals.len(), 1);
        let signal = &report.exit_signals[0];
        assert_eq!(signal.urgency, Urgency::High);
        assert_eq!(signal.order_type, OrderType::Market);
        assert!(signal.signal_id.starts_with("EXIT_TRAILING_STOP_"));
    }

    #[tokio::test]
    async fn test_take_profit_limit_order() {
        let h = harness().await;
        seed_position(&h, 10, dec!(70000)).await;
        // 익절가 84,000 이상
        h.prices.set_price(ticker(), dec!(85000)).await;

        let report = h.monitor.monitor_user("user1").await.unwrap();
        assert_eq!(report.exit_signals.len(), 1);

        let signal = &report.exit_signals[0];
        assert_eq!(signal.urgency, Urgency::Normal);
        assert_eq!(signal.order_type, OrderType::Limit);
        assert_eq!(signal.limit_price, Some(dec!(84000.00)));
    }

    #[tokio::test]
    async fn test_one_exit_per_position_per_tick() {
        // 62,000은 손절(63,000)과 초기 트레일링 스톱(63,000)을 동시에
        // 만족하지만, 우선순위에 따라 손절 신호 하나만 나간다
        let h = harness().await;
        seed_position(&h, 10, dec!(70000)).await;
        h.prices.set_price(ticker(), dec!(62000)).await;

        let report = h.monitor.monitor_user("user1").await.unwrap();
        assert_eq!(report.exit_signals.len(), 1);
        assert!(report.exit_signals[0].signal_id.starts_with("EXIT_STOP_LOSS_"));
    }

    #[tokio::test]
    async fn test_missing_price_skips_position() {
        let h = harness().await;
        seed_position(&h, 10, dec!(70000)).await;
        // 가격 미설정

        let report = h.monitor.monitor_user("user1").await.unwrap();
        assert!(report.exit_signals.is_empty());
        assert_eq!(report.warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_emergency_liquidation_short_circuits() {
        let h = harness().await;
        seed_position(&h, 10, dec!(70000)).await;
        h.prices.set_price(ticker(), dec!(62000)).await;

        // 손실 28% 지표 저장
        let mut metrics = kquant_core::RiskMetrics::initial("user1", dec!(10000000));
        metrics.total_loss_from_initial_pct = dec!(28);
        h.store.save_metrics(&metrics).await.unwrap();

        let report = h.monitor.monitor_user("user1").await.unwrap();
        assert!(report.emergency_liquidation_triggered);
        assert_eq!(report.exit_signals.len(), 1);

        let signal = &report.exit_signals[0];
        assert_eq!(signal.kind, SignalKind::EmergencyLiquidation);
        assert_eq!(signal.urgency, Urgency::Critical);
        assert_eq!(signal.order_type, OrderType::Market);
    }

    #[test]
    fn test_technical_take_profit_needs_two() {
        let snapshot = TechnicalSnapshot {
            date: NaiveDate::from_ymd_opt(2026, 7, 1).unwrap(),
            rsi_14: Some(dec!(75)),
            ..Default::default()
        };
        // RSI 하나만으로는 부족
        assert!(technical_take_profit(&snapshot, dec!(70000)).is_none());

        let snapshot = TechnicalSnapshot {
            date: NaiveDate::from_ymd_opt(2026, 7, 1).unwrap(),
            rsi_14: Some(dec!(75)),
            bollinger_upper: Some(dec!(69000)),
            ..Default::default()
        };
        // RSI + BB 상단 돌파 → 발동
        let reason = technical_take_profit(&snapshot, dec!(70000)).unwrap();
        assert!(reason.contains("RSI"));
        assert!(reason.contains("Bollinger"));
    }

    #[test]
    fn test_technical_macd_and_sma() {
        let snapshot = TechnicalSnapshot {
            date: NaiveDate::from_ymd_opt(2026, 7, 1).unwrap(),
            macd: Some(dec!(-50)),
            macd_signal: Some(dec!(10)),
            macd_histogram: Some(dec!(-60)),
            sma_20: Some(dec!(60000)),
            ..Default::default()
        };
        // MACD 데드크로스 + 가격이 SMA20의 110% 이상
        let reason = technical_take_profit(&snapshot, dec!(70000)).unwrap();
        assert!(reason.contains("MACD"));
        assert!(reason.contains("SMA20"));
    }
}
