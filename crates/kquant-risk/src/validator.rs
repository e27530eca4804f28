//! 신호 검증기.
//!
//! 검증을 모두 통과한 신호만 실행으로 넘어갑니다:
//! - 데이터 최신성 (시장 시간 기준) 및 품질 점수
//! - 포지션 수 / 단일 종목 집중도 / 섹터 집중도 (매수만)
//! - 현금 가용성 (매수만, 예상 수수료 포함)
//! - 거래 정지 플래그 (매도와 비상 청산은 면제: 노출 축소 경로)
//! - 손실 한도 접근 시 매수 차단
//!
//! 거부 시 사유가 주석으로 남고, 크기/현금 검사를 통과할 수 있는 최대
//! 수량이 `suggested_quantity`로 제안됩니다.

use chrono::{DateTime, Utc};
use kquant_calendar::KrxCalendar;
use kquant_core::{
    pct_to_ratio, CommissionCalculator, KquantResult, Market, RiskSettings, Shares, SignalKind,
    TradingSignal,
};
use kquant_data::{PortfolioStore, StockDirectory};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;

/// 검증 결과.
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    /// 통과 여부
    pub is_valid: bool,
    /// 거부 사유
    pub reasons: Vec<String>,
    /// 경고 (통과해도 남음)
    pub warnings: Vec<String>,
    /// 제안 축소 수량 (거부 시)
    pub suggested_quantity: Option<Shares>,
}

impl ValidationOutcome {
    fn valid() -> Self {
        Self {
            is_valid: true,
            reasons: Vec::new(),
            warnings: Vec::new(),
            suggested_quantity: None,
        }
    }

    fn rejected(reason: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            reasons: vec![reason.into()],
            warnings: Vec::new(),
            suggested_quantity: None,
        }
    }

    fn add_reason(&mut self, reason: impl Into<String>) {
        self.is_valid = false;
        self.reasons.push(reason.into());
    }
}

/// 신호 검증기.
pub struct SignalValidator {
    store: Arc<dyn PortfolioStore>,
    directory: Arc<dyn StockDirectory>,
    calendar: Arc<KrxCalendar>,
    config: RiskSettings,
}

impl SignalValidator {
    /// 검증기를 생성합니다.
    pub fn new(
        store: Arc<dyn PortfolioStore>,
        directory: Arc<dyn StockDirectory>,
        calendar: Arc<KrxCalendar>,
        config: RiskSettings,
    ) -> Self {
        Self {
            store,
            directory,
            calendar,
            config,
        }
    }

    /// 신호를 검증하고 주석을 갱신합니다.
    pub async fn validate(&self, signal: &mut TradingSignal) -> KquantResult<ValidationOutcome> {
        let outcome = self.validate_at(signal, Utc::now()).await?;
        if !outcome.is_valid {
            signal.is_valid = false;
            signal.validation_warnings.extend(outcome.reasons.clone());
            signal.suggested_quantity = outcome.suggested_quantity;
            tracing::warn!(
                ticker = %signal.ticker,
                reasons = ?outcome.reasons,
                "Signal rejected"
            );
        } else if !outcome.warnings.is_empty() {
            signal.validation_warnings.extend(outcome.warnings.clone());
        }
        Ok(outcome)
    }

    /// 기준 시각을 지정해 검증합니다. 테스트/재현용.
    pub async fn validate_at(
        &self,
        signal: &TradingSignal,
        now: DateTime<Utc>,
    ) -> KquantResult<ValidationOutcome> {
        // 매도/비상 청산: 정지 여부와 무관하게 노출 축소는 항상 허용.
        // 보유 확인만 수행한다.
        if signal.kind.is_sell() {
            let position = self
                .store
                .get_position(&signal.user_id, &signal.ticker)
                .await?;
            return Ok(match position {
                Some(p) if p.quantity >= signal.recommended_shares => ValidationOutcome::valid(),
                Some(p) => ValidationOutcome::rejected(format!(
                    "sell quantity {} exceeds held {}",
                    signal.recommended_shares, p.quantity
                )),
                None => {
                    ValidationOutcome::rejected(format!("no position in {}", signal.ticker))
                }
            });
        }

        let mut outcome = ValidationOutcome::valid();

        // 거래 정지: 매수 차단
        if self.store.is_halted(&signal.user_id).await? {
            outcome.add_reason("trading halted");
        }

        // 데이터 최신성 (시장 시간 기준)
        match signal.data_as_of {
            Some(as_of) => {
                let age = self.calendar.market_hours_between(as_of, now);
                if age > chrono::Duration::hours(self.config.require_recent_data_hours) {
                    outcome.add_reason(format!(
                        "data is {} market-hours old (limit {})",
                        age.num_hours(),
                        self.config.require_recent_data_hours
                    ));
                }
            }
            None => outcome.add_reason("missing data timestamp"),
        }

        // 데이터 품질
        match signal.data_quality_score {
            Some(quality) if quality >= self.config.min_data_quality_score => {}
            Some(quality) => outcome.add_reason(format!(
                "data quality {} below {}",
                quality, self.config.min_data_quality_score
            )),
            None => outcome.add_reason("missing data quality score"),
        }

        let snapshot = self.store.snapshot(&signal.user_id).await?;
        let total_value: Decimal = snapshot.cash_balance
            + snapshot
                .positions
                .iter()
                .map(|p| p.current_value)
                .sum::<Decimal>();

        // 포지션 수 (이 주문 반영 후 기준)
        let already_held = snapshot
            .positions
            .iter()
            .any(|p| p.ticker == signal.ticker);
        let count_after = snapshot.positions.len() + usize::from(!already_held);
        if count_after > self.config.max_positions {
            outcome.add_reason(format!(
                "position count {} exceeds max {}",
                count_after, self.config.max_positions
            ));
        }

        // 단일 종목 집중도
        if total_value > Decimal::ZERO {
            let existing_value = snapshot
                .positions
                .iter()
                .filter(|p| p.ticker == signal.ticker)
                .map(|p| p.current_value)
                .sum::<Decimal>();
            let weight =
                (existing_value + signal.position_value) / total_value * Decimal::from(100);
            if weight > self.config.max_concentration_pct {
                outcome.add_reason(format!(
                    "position weight {:.1}% exceeds max {}%",
                    weight, self.config.max_concentration_pct
                ));
            }

            // 섹터 집중도
            if let Some(sector) = self.resolve_sector(signal).await? {
                let sector_values = self.sector_values(&snapshot.positions).await?;
                let current_sector_value =
                    sector_values.get(&sector).copied().unwrap_or(Decimal::ZERO);
                let sector_weight = (current_sector_value + signal.position_value) / total_value
                    * Decimal::from(100);
                if sector_weight > self.config.max_sector_concentration_pct {
                    outcome.add_reason(format!(
                        "sector {} weight {:.1}% exceeds max {}%",
                        sector, sector_weight, self.config.max_sector_concentration_pct
                    ));
                }
            }
        }

        // 현금 가용성 (예상 수수료 포함)
        let market = self
            .directory
            .get_stock(&signal.ticker)
            .await?
            .map(|s| s.market)
            .unwrap_or(Market::Kospi);
        let calculator = CommissionCalculator::for_market(market);
        let estimated = calculator.buy_costs(signal.recommended_shares, signal.current_price);
        if estimated.net_amount() > snapshot.cash_balance {
            outcome.add_reason(format!(
                "insufficient cash: need {} have {}",
                estimated.net_amount(),
                snapshot.cash_balance
            ));
        }

        // 손실 한도 접근 시 매수 차단
        if let Some(metrics) = self.store.get_metrics(&signal.user_id).await? {
            if metrics.total_loss_from_initial_pct >= self.config.max_total_loss_pct {
                outcome.add_reason(format!(
                    "total loss {}% at or above ceiling {}%",
                    metrics.total_loss_from_initial_pct, self.config.max_total_loss_pct
                ));
            } else if metrics.total_loss_from_initial_pct >= self.config.warning_threshold_pct() {
                outcome.warnings.push(format!(
                    "total loss {}% approaching ceiling {}%",
                    metrics.total_loss_from_initial_pct, self.config.max_total_loss_pct
                ));
            }
        }

        // 거부 시 크기/현금 검사를 통과할 최대 수량 제안
        if !outcome.is_valid && signal.current_price > Decimal::ZERO {
            let cash_cap = calculator
                .max_shares_for_cash(snapshot.cash_balance, signal.current_price);
            let concentration_cap = if total_value > Decimal::ZERO {
                ((total_value * pct_to_ratio(self.config.max_concentration_pct))
                    / signal.current_price)
                    .floor()
                    .to_i64()
                    .unwrap_or(0)
            } else {
                0
            };
            let suggested = cash_cap
                .min(concentration_cap)
                .min(signal.recommended_shares);
            if suggested > 0 && suggested < signal.recommended_shares {
                outcome.suggested_quantity = Some(suggested);
            }
        }

        Ok(outcome)
    }

    /// 신호 배치를 검증해 유효한 것만 반환합니다.
    pub async fn validate_batch(
        &self,
        signals: &mut [TradingSignal],
    ) -> KquantResult<Vec<TradingSignal>> {
        let mut valid = Vec::new();
        for signal in signals.iter_mut() {
            let outcome = self.validate(signal).await?;
            if outcome.is_valid {
                valid.push(signal.clone());
            }
        }
        tracing::info!(
            valid = valid.len(),
            total = signals.len(),
            "Batch validation complete"
        );
        Ok(valid)
    }

    /// 배치 검증 결과 요약: 거부 사유별 건수.
    pub fn rejection_summary(signals: &[TradingSignal]) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for signal in signals.iter().filter(|s| !s.is_valid) {
            for warning in &signal.validation_warnings {
                *counts.entry(warning.clone()).or_insert(0) += 1;
            }
        }
        counts
    }

    async fn resolve_sector(&self, signal: &TradingSignal) -> KquantResult<Option<String>> {
        if let Some(sector) = &signal.sector {
            return Ok(Some(sector.clone()));
        }
        Ok(self
            .directory
            .get_stock(&signal.ticker)
            .await?
            .and_then(|s| s.sector))
    }

    async fn sector_values(
        &self,
        positions: &[kquant_core::Position],
    ) -> KquantResult<HashMap<String, Decimal>> {
        let mut values: HashMap<String, Decimal> = HashMap::new();
        for position in positions {
            if let Some(stock) = self.directory.get_stock(&position.ticker).await? {
                if let Some(sector) = stock.sector {
                    *values.entry(sector).or_insert(Decimal::ZERO) += position.current_value;
                }
            }
        }
        Ok(values)
    }
}

/// 매수 외 신호가 정지 중에도 허용되는지 빠르게 판정합니다.
pub fn halt_exempt(kind: SignalKind) -> bool {
    kind.is_sell()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use kquant_core::{Fill, Side, Stock, Ticker, TradingSignal};
    use kquant_data::{MemoryPortfolioStore, MemoryStockDirectory};
    use rust_decimal_macros::dec;

    fn ticker(code: &str) -> Ticker {
        Ticker::new(code).unwrap()
    }

    async fn setup() -> (Arc<MemoryPortfolioStore>, Arc<MemoryStockDirectory>, SignalValidator) {
        let store = Arc::new(MemoryPortfolioStore::new());
        store.open_account("user1", dec!(100000000)).await.unwrap();

        let directory = Arc::new(MemoryStockDirectory::new());
        directory
            .insert(Stock::new(ticker("005930"), "삼성전자", Market::Kospi).with_sector("전기전자"))
            .await;
        directory
            .insert(Stock::new(ticker("000660"), "SK하이닉스", Market::Kospi).with_sector("전기전자"))
            .await;

        let validator = SignalValidator::new(
            store.clone(),
            directory.clone(),
            Arc::new(KrxCalendar::with_default_holidays()),
            RiskSettings::default(),
        );
        (store, directory, validator)
    }

    fn entry_signal(code: &str, shares: i64, price: Decimal) -> TradingSignal {
        let mut signal = TradingSignal::new(
            format!("ENTRY_{}_TEST", code),
            "user1",
            SignalKind::EntryBuy,
            ticker(code),
            price,
        );
        signal.recommended_shares = shares;
        signal.position_value = price * Decimal::from(shares);
        signal.data_as_of = Some(Utc::now());
        signal.data_quality_score = Some(dec!(100));
        signal
    }

    #[tokio::test]
    async fn test_valid_entry_passes() {
        let (_, _, validator) = setup().await;
        let mut signal = entry_signal("005930", 100, dec!(70000));
        let outcome = validator.validate(&mut signal).await.unwrap();
        assert!(outcome.is_valid, "{:?}", outcome.reasons);
    }

    #[tokio::test]
    async fn test_halted_blocks_buy_but_not_sell() {
        let (store, _, validator) = setup().await;
        // 매도 검증을 위한 보유 포지션
        store
            .apply_fill(
                "user1",
                &Fill {
                    order_id: "SEED".to_string(),
                    ticker: ticker("005930"),
                    side: Side::Buy,
                    quantity: 100,
                    price: dec!(70000),
                    commission: Decimal::ZERO,
                    tax: Decimal::ZERO,
                    executed_at: Utc::now(),
                },
            )
            .await
            .unwrap();

        store.set_halt("user1", "loss limit breached").await.unwrap();

        let mut buy = entry_signal("000660", 10, dec!(200000));
        let outcome = validator.validate(&mut buy).await.unwrap();
        assert!(!outcome.is_valid);
        assert!(outcome.reasons.iter().any(|r| r.contains("trading halted")));

        let mut sell = TradingSignal::new(
            "EXIT_STOP_LOSS_005930_TEST",
            "user1",
            SignalKind::ExitSell,
            ticker("005930"),
            dec!(65000),
        );
        sell.recommended_shares = 100;
        let outcome = validator.validate(&mut sell).await.unwrap();
        assert!(outcome.is_valid);
    }

    #[tokio::test]
    async fn test_stale_data_rejected() {
        let (_, _, validator) = setup().await;
        let mut signal = entry_signal("005930", 100, dec!(70000));
        signal.data_as_of = Some(Utc::now() - chrono::Duration::days(30));
        let outcome = validator.validate(&mut signal).await.unwrap();
        assert!(!outcome.is_valid);
    }

    #[tokio::test]
    async fn test_low_quality_rejected() {
        let (_, _, validator) = setup().await;
        let mut signal = entry_signal("005930", 100, dec!(70000));
        signal.data_quality_score = Some(dec!(50));
        let outcome = validator.validate(&mut signal).await.unwrap();
        assert!(!outcome.is_valid);
    }

    #[tokio::test]
    async fn test_insufficient_cash_suggests_quantity() {
        let (_, _, validator) = setup().await;
        // 1억 현금으로 70,000원짜리 2,000주(1.4억)는 불가
        let mut signal = entry_signal("005930", 2000, dec!(70000));
        let outcome = validator.validate(&mut signal).await.unwrap();

        assert!(!outcome.is_valid);
        let suggested = outcome.suggested_quantity.unwrap();
        assert!(suggested > 0 && suggested < 2000);
        // 제안 수량은 집중도 상한(30%)도 지켜야 함
        assert!(
            Decimal::from(suggested) * dec!(70000) <= dec!(100000000) * dec!(0.30)
        );
    }

    #[tokio::test]
    async fn test_concentration_limit() {
        let (_, _, validator) = setup().await;
        // 40%짜리 단일 포지션은 30% 한도 초과
        let mut signal = entry_signal("005930", 571, dec!(70000));
        let outcome = validator.validate(&mut signal).await.unwrap();
        assert!(!outcome.is_valid);
        assert!(outcome.reasons.iter().any(|r| r.contains("weight")));
    }

    #[tokio::test]
    async fn test_sector_concentration() {
        let (store, _, validator) = setup().await;
        // 같은 섹터에 이미 35% 보유
        store
            .apply_fill(
                "user1",
                &Fill {
                    order_id: "SEED".to_string(),
                    ticker: ticker("000660"),
                    side: Side::Buy,
                    quantity: 175,
                    price: dec!(200000),
                    commission: Decimal::ZERO,
                    tax: Decimal::ZERO,
                    executed_at: Utc::now(),
                },
            )
            .await
            .unwrap();

        // 같은 섹터 10% 추가 → 섹터 합계 45% > 40%
        let mut signal = entry_signal("005930", 142, dec!(70000));
        let outcome = validator.validate(&mut signal).await.unwrap();
        assert!(!outcome.is_valid);
        assert!(outcome.reasons.iter().any(|r| r.contains("sector")));
    }

    #[tokio::test]
    async fn test_sell_exempt_from_position_count() {
        let (store, _, validator) = setup().await;
        store
            .apply_fill(
                "user1",
                &Fill {
                    order_id: "SEED".to_string(),
                    ticker: ticker("005930"),
                    side: Side::Buy,
                    quantity: 10,
                    price: dec!(70000),
                    commission: Decimal::ZERO,
                    tax: Decimal::ZERO,
                    executed_at: Utc::now(),
                },
            )
            .await
            .unwrap();

        // 비상 청산은 어떤 한도와도 무관하게 통과
        let mut signal = TradingSignal::new(
            "EXIT_EMERGENCY_005930_TEST",
            "user1",
            SignalKind::EmergencyLiquidation,
            ticker("005930"),
            dec!(50000),
        );
        signal.recommended_shares = 10;
        let outcome = validator.validate(&mut signal).await.unwrap();
        assert!(outcome.is_valid);
    }
}
