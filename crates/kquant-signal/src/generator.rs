//! 매매 신호 생성기.
//!
//! **진입 경로**: 스크리너가 준 후보 종목 각각에 대해
//! 1. 최신 종합 점수 조회 (stale이면 건너뜀), 점수/모멘텀 필터
//! 2. 확신 점수 계산, 최소 확신 점수 필터
//! 3. 손절가/익절가 산출 (기본 −10% / +20%)
//! 4. 포지션 사이저 호출 (수량 0이면 건너뜀)
//! 5. 지정가 주문 구성 (기본 1% 할인) 또는 시장가
//!
//! 진입 신호는 입력 종목 순서대로 결정적으로 생성됩니다.
//!
//! **청산 경로**: 포지션 모니터의 트리거(손절/트레일링/익절)에
//! 펀더멘털 악화 판정을 더합니다. 청산 신호는 (사용자, 종목) 순서로
//! 나갑니다.

use crate::conviction::{ConvictionScorer, ConvictionWeights};
use chrono::{Duration, Utc};
use kquant_core::{
    entry_order_id, exit_order_id, pct_to_ratio, DecimalExt, KquantResult, OrderType, SignalConfig,
    SignalKind, SignalStrength, RiskSettings, TradingSignal, Ticker,
};
use kquant_data::{PortfolioStore, PriceSource, ScoreReader, StockDirectory};
use kquant_risk::{HistoricalStats, MonitorReport, PositionMonitor, PositionSizer, SizingMethod, SizingRequest};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

/// 진입 후보 필터.
#[derive(Debug, Clone)]
pub struct EntryFilters {
    /// 최소 종합 점수
    pub min_composite_score: Decimal,
    /// 최소 모멘텀 점수
    pub min_momentum_score: Decimal,
}

impl Default for EntryFilters {
    fn default() -> Self {
        Self {
            min_composite_score: dec!(60),
            min_momentum_score: dec!(50),
        }
    }
}

/// 매매 신호 생성기.
pub struct SignalGenerator {
    reader: Arc<ScoreReader>,
    prices: Arc<dyn PriceSource>,
    store: Arc<dyn PortfolioStore>,
    directory: Arc<dyn StockDirectory>,
    monitor: Arc<PositionMonitor>,
    scorer: ConvictionScorer,
    sizer: PositionSizer,
    config: SignalConfig,
    risk: RiskSettings,
}

impl SignalGenerator {
    /// 생성기를 구성합니다. 가중치 검증에 실패하면 에러입니다.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        reader: Arc<ScoreReader>,
        prices: Arc<dyn PriceSource>,
        store: Arc<dyn PortfolioStore>,
        directory: Arc<dyn StockDirectory>,
        monitor: Arc<PositionMonitor>,
        config: SignalConfig,
        risk: RiskSettings,
    ) -> KquantResult<Self> {
        let scorer = ConvictionScorer::new(ConvictionWeights::from_config(&config))?;
        let sizer = PositionSizer::new(risk.clone());
        Ok(Self {
            reader,
            prices,
            store,
            directory,
            monitor,
            scorer,
            sizer,
            config,
            risk,
        })
    }

    /// 진입 신호를 생성합니다 (입력 종목 순서 유지).
    pub async fn generate_entry_signals(
        &self,
        user_id: &str,
        candidates: &[Ticker],
        filters: &EntryFilters,
    ) -> KquantResult<Vec<TradingSignal>> {
        tracing::info!(
            user = user_id,
            candidates = candidates.len(),
            "Generating entry signals"
        );

        let snapshot = self.store.snapshot(user_id).await?;
        let portfolio_value: Decimal = snapshot.cash_balance
            + snapshot
                .positions
                .iter()
                .map(|p| p.current_value)
                .sum::<Decimal>();

        let stats = self.historical_stats(user_id).await?;

        let mut signals = Vec::new();
        for ticker in candidates {
            match self
                .entry_signal_for(user_id, ticker, filters, portfolio_value, snapshot.cash_balance, &stats)
                .await
            {
                Ok(Some(signal)) => signals.push(signal),
                Ok(None) => {}
                Err(e) if !e.is_critical() => {
                    // 종목 단위 장애는 건너뛰고 계속 진행한다
                    tracing::warn!(ticker = %ticker, error = %e, "Entry signal skipped");
                }
                Err(e) => return Err(e),
            }
        }

        tracing::info!(user = user_id, signals = signals.len(), "Entry signals generated");
        Ok(signals)
    }

    async fn entry_signal_for(
        &self,
        user_id: &str,
        ticker: &Ticker,
        filters: &EntryFilters,
        portfolio_value: Decimal,
        cash_balance: Decimal,
        stats: &HistoricalStats,
    ) -> KquantResult<Option<TradingSignal>> {
        // 1. 점수 조회 + 필터
        let reading = match self.reader.read(ticker).await? {
            Some(r) => r,
            None => {
                tracing::debug!(ticker = %ticker, "No fresh score, skipping");
                return Ok(None);
            }
        };
        if reading.score.composite_score < filters.min_composite_score {
            return Ok(None);
        }
        if reading.score.momentum_score < filters.min_momentum_score {
            return Ok(None);
        }

        let current_price = match self.prices.latest_price(ticker).await? {
            Some(p) if p > Decimal::ZERO => p,
            _ => {
                tracing::debug!(ticker = %ticker, "No price, skipping");
                return Ok(None);
            }
        };

        // 2. 확신 점수
        let volume_ratio = self.volume_ratio(ticker, &reading).await?;
        let conviction = self.scorer.score(&reading.score, volume_ratio);
        if conviction.total < self.config.min_conviction_score {
            tracing::debug!(
                ticker = %ticker,
                conviction = %conviction.total,
                "Conviction below minimum, skipping"
            );
            return Ok(None);
        }

        // 3. 손절가/익절가
        let stop_loss_price =
            (current_price * (Decimal::ONE - pct_to_ratio(self.risk.stop_loss_pct))).round_price();
        let take_profit_price =
            (current_price * (Decimal::ONE + pct_to_ratio(self.risk.take_profit_pct))).round_price();

        // 4. 포지션 사이징
        let sizing = self.sizer.calculate(&SizingRequest {
            portfolio_value,
            entry_price: current_price,
            stop_loss_price,
            method: SizingMethod::default(),
            cash_available: Some(cash_balance),
            conviction: Some(conviction.total),
            stats: Some(stats.clone()),
            volatility_pct: self.prices.annualized_volatility(ticker).await?,
        })?;
        if sizing.recommended_shares == 0 {
            tracing::debug!(ticker = %ticker, "Zero shares recommended, skipping");
            return Ok(None);
        }

        // 5. 주문 유형
        let now = Utc::now();
        let mut signal = TradingSignal::new(
            entry_order_id(ticker, now),
            user_id,
            SignalKind::EntryBuy,
            ticker.clone(),
            current_price,
        );
        if self.config.use_limit_orders {
            signal.order_type = OrderType::Limit;
            signal.limit_price = Some(
                (current_price
                    * (Decimal::ONE - pct_to_ratio(self.config.limit_order_discount_pct)))
                .round_price(),
            );
        } else {
            signal.order_type = OrderType::Market;
        }

        signal.target_price = Some(take_profit_price);
        signal.stop_loss_price = Some(stop_loss_price);
        signal.take_profit_price = Some(take_profit_price);
        signal.recommended_shares = sizing.recommended_shares;
        signal.position_value = sizing.position_value;
        signal.position_pct = sizing.position_pct;
        signal.conviction_score = Some(conviction.total);
        signal.data_quality_score = Some(reading.data_quality_score);
        signal.data_as_of = Some(reading.as_of);
        signal.sector = self
            .directory
            .get_stock(ticker)
            .await?
            .and_then(|s| s.sector);

        // 6. 강도/긴급도
        signal.strength = SignalStrength::from_conviction(conviction.total);
        signal.urgency = signal.strength.entry_urgency();

        let expected_return_pct = ((take_profit_price - current_price) / current_price
            * Decimal::from(100))
        .round_percent();
        let risk_pct =
            (current_price - stop_loss_price) / current_price * Decimal::from(100);
        signal.expected_return_pct = Some(expected_return_pct);
        signal.risk_reward_ratio = if risk_pct > Decimal::ZERO {
            Some((expected_return_pct / risk_pct).round_percent())
        } else {
            None
        };

        signal.reasons.push(format!(
            "Composite score: {}/100",
            reading.score.composite_score
        ));
        signal
            .reasons
            .push(format!("Conviction score: {}/100", conviction.total.round_price()));
        signal.reasons.extend(conviction.reasons.clone());

        tracing::info!(
            ticker = %ticker,
            conviction = %conviction.total,
            shares = sizing.recommended_shares,
            value = %sizing.position_value,
            "Entry signal generated"
        );
        Ok(Some(signal))
    }

    /// 청산 신호를 생성합니다: 모니터 트리거 + 펀더멘털 악화.
    ///
    /// (사용자, 종목) 순서가 유지됩니다.
    pub async fn generate_exit_signals(&self, user_id: &str) -> KquantResult<Vec<TradingSignal>> {
        let report: MonitorReport = self.monitor.monitor_user(user_id).await?;
        let mut signals = report.exit_signals;

        // 비상 청산이면 개별 판정은 생략
        if report.emergency_liquidation_triggered {
            return Ok(signals);
        }

        let triggered: Vec<Ticker> = signals.iter().map(|s| s.ticker.clone()).collect();
        let deteriorated = self.deterioration_exits(user_id, &triggered).await?;
        signals.extend(deteriorated);

        signals.sort_by(|a, b| a.ticker.cmp(&b.ticker));
        tracing::info!(user = user_id, exits = signals.len(), "Exit signals generated");
        Ok(signals)
    }

    /// 펀더멘털 악화 청산: 종합 점수가 기준점 대비 임계값 이상 하락했거나
    /// 품질/성장 점수가 바닥을 깬 포지션.
    async fn deterioration_exits(
        &self,
        user_id: &str,
        already_triggered: &[Ticker],
    ) -> KquantResult<Vec<TradingSignal>> {
        let positions = self.store.list_positions(user_id).await?;
        let baseline_cutoff = Utc::now() - Duration::days(30);
        let mut signals = Vec::new();

        for position in positions.iter().filter(|p| p.is_open()) {
            // 같은 틱에서 이미 트리거된 포지션은 건너뜀
            if already_triggered.contains(&position.ticker) {
                continue;
            }

            let reading = match self.reader.read(&position.ticker).await? {
                Some(r) => r,
                None => continue,
            };

            let mut reasons = Vec::new();

            if let Some(baseline) = self
                .reader
                .score_before(&position.ticker, baseline_cutoff)
                .await?
            {
                let drop = baseline.composite_score - reading.score.composite_score;
                if drop >= self.config.score_deterioration_threshold {
                    reasons.push(format!(
                        "Composite score dropped {} points (from {} to {})",
                        drop, baseline.composite_score, reading.score.composite_score
                    ));
                }
            }
            if reading.score.quality_score < dec!(40) {
                reasons.push(format!(
                    "Quality score deteriorated to {}",
                    reading.score.quality_score
                ));
            }
            if reading.score.growth_score < dec!(30) {
                reasons.push(format!(
                    "Growth score deteriorated to {}",
                    reading.score.growth_score
                ));
            }

            if reasons.is_empty() {
                continue;
            }

            let mut signal = TradingSignal::new(
                exit_order_id("fundamentals", &position.ticker, Utc::now()),
                user_id,
                SignalKind::ExitSell,
                position.ticker.clone(),
                position.current_price,
            );
            signal.recommended_shares = position.quantity;
            signal.position_value = position.current_value;
            signal.order_type = OrderType::Market;
            signal.strength = SignalStrength::Moderate;
            signal.reasons = reasons;
            tracing::info!(
                ticker = %position.ticker,
                reasons = ?signal.reasons,
                "Fundamental deterioration exit"
            );
            signals.push(signal);
        }

        Ok(signals)
    }

    async fn volume_ratio(
        &self,
        ticker: &Ticker,
        reading: &kquant_data::ScoreReading,
    ) -> KquantResult<Option<Decimal>> {
        let volume_ma = reading
            .technical
            .as_ref()
            .and_then(|t| t.volume_ma_20)
            .filter(|v| *v > Decimal::ZERO);
        let latest = self.prices.latest_volume(ticker).await?;
        Ok(match (latest, volume_ma) {
            (Some(latest), Some(ma)) => Some(latest / ma),
            _ => None,
        })
    }

    async fn historical_stats(&self, user_id: &str) -> KquantResult<HistoricalStats> {
        // 최근 체결 거래의 손익률로 Kelly 입력을 만든다.
        // 기록이 없으면 문서화된 기본값을 쓴다.
        let trades = self.store.recent_trades(user_id, 100).await?;
        let pnl_pcts: Vec<Decimal> = trades
            .iter()
            .filter(|t| t.is_filled() && t.side == kquant_core::Side::Sell)
            .filter_map(|t| {
                t.executed_price.map(|price| {
                    // 매도 기록만으로는 매수가를 모르므로 요청가 대비 근사
                    t.requested_price
                        .filter(|rp| *rp > Decimal::ZERO)
                        .map(|rp| (price - rp) / rp * Decimal::from(100))
                        .unwrap_or(Decimal::ZERO)
                })
            })
            .filter(|p| !p.is_zero())
            .collect();

        if pnl_pcts.is_empty() {
            Ok(HistoricalStats::default())
        } else {
            Ok(HistoricalStats::from_pnl_pcts(&pnl_pcts))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use kquant_calendar::KrxCalendar;
    use kquant_core::{CompositeScore, Fill, Market, Side, Stock, TechnicalSnapshot, Urgency};
    use kquant_data::{
        MemoryMarketDataReader, MemoryPortfolioStore, MemoryPriceSource, MemoryStockDirectory,
    };

    fn ticker(code: &str) -> Ticker {
        Ticker::new(code).unwrap()
    }

    struct Harness {
        reader_inner: Arc<MemoryMarketDataReader>,
        prices: Arc<MemoryPriceSource>,
        store: Arc<MemoryPortfolioStore>,
        generator: SignalGenerator,
    }

    async fn harness() -> Harness {
        let reader_inner = Arc::new(MemoryMarketDataReader::new());
        let calendar = Arc::new(KrxCalendar::with_default_holidays());
        let reader = Arc::new(ScoreReader::new(reader_inner.clone(), calendar));
        let prices = Arc::new(MemoryPriceSource::new());
        let store = Arc::new(MemoryPortfolioStore::new());
        store.open_account("user1", dec!(100000000)).await.unwrap();

        let directory = Arc::new(MemoryStockDirectory::new());
        directory
            .insert(Stock::new(ticker("005930"), "삼성전자", Market::Kospi).with_sector("전기전자"))
            .await;

        let monitor = Arc::new(PositionMonitor::new(
            store.clone(),
            prices.clone(),
            reader.clone(),
            RiskSettings::default(),
        ));

        let generator = SignalGenerator::new(
            reader,
            prices.clone(),
            store.clone(),
            directory,
            monitor,
            SignalConfig::default(),
            RiskSettings::default(),
        )
        .unwrap();

        Harness {
            reader_inner,
            prices,
            store,
            generator,
        }
    }

    fn composite(code: &str, composite_score: Decimal, momentum: Decimal) -> CompositeScore {
        CompositeScore {
            ticker: ticker(code),
            date: Utc::now().date_naive(),
            value_score: dec!(80),
            growth_score: dec!(60),
            quality_score: dec!(75),
            momentum_score: momentum,
            composite_score,
            percentile_rank: dec!(90),
            computed_at: Utc::now(),
        }
    }

    fn full_technical() -> TechnicalSnapshot {
        TechnicalSnapshot {
            date: Utc::now().date_naive(),
            rsi_14: Some(dec!(55)),
            macd: Some(dec!(100)),
            macd_signal: Some(dec!(80)),
            macd_histogram: Some(dec!(20)),
            sma_20: Some(dec!(69000)),
            sma_50: Some(dec!(67000)),
            bollinger_upper: Some(dec!(74000)),
            bollinger_lower: Some(dec!(64000)),
            atr_14: Some(dec!(1500)),
            volume_ma_20: Some(dec!(1000000)),
            volatility_30d: Some(dec!(20)),
            computed_at: Some(Utc::now()),
        }
    }

    async fn seed_candidate(h: &Harness, code: &str) {
        h.reader_inner
            .push_score(composite(code, dec!(75), dec!(80)))
            .await;
        h.reader_inner
            .set_technical(ticker(code), full_technical())
            .await;
        h.prices.set_price(ticker(code), dec!(70000)).await;
        h.prices
            .set_latest_volume(ticker(code), dec!(1600000))
            .await;
        h.prices.set_volatility(ticker(code), dec!(20)).await;
    }

    #[tokio::test]
    async fn test_entry_signal_generated() {
        let h = harness().await;
        seed_candidate(&h, "005930").await;

        let signals = h
            .generator
            .generate_entry_signals("user1", &[ticker("005930")], &EntryFilters::default())
            .await
            .unwrap();

        assert_eq!(signals.len(), 1);
        let signal = &signals[0];
        assert_eq!(signal.kind, SignalKind::EntryBuy);
        assert!(signal.signal_id.starts_with("ENTRY_005930_"));
        assert_eq!(signal.order_type, OrderType::Limit);
        // 1% 할인 지정가
        assert_eq!(signal.limit_price, Some(dec!(69300.00)));
        assert_eq!(signal.stop_loss_price, Some(dec!(63000.00)));
        assert_eq!(signal.take_profit_price, Some(dec!(84000.00)));
        assert!(signal.recommended_shares > 0);
        assert!(signal.conviction_score.unwrap() >= dec!(60));
        assert_eq!(signal.sector.as_deref(), Some("전기전자"));
        assert!(signal.expected_return_pct.unwrap() > dec!(19));
    }

    #[tokio::test]
    async fn test_low_composite_skipped() {
        let h = harness().await;
        seed_candidate(&h, "005930").await;
        // 더 낮은 점수로 덮어쓰기
        h.reader_inner
            .push_score(composite("005930", dec!(40), dec!(80)))
            .await;

        let signals = h
            .generator
            .generate_entry_signals("user1", &[ticker("005930")], &EntryFilters::default())
            .await
            .unwrap();
        assert!(signals.is_empty());
    }

    #[tokio::test]
    async fn test_low_momentum_skipped() {
        let h = harness().await;
        h.reader_inner
            .push_score(composite("005930", dec!(75), dec!(30)))
            .await;
        h.reader_inner
            .set_technical(ticker("005930"), full_technical())
            .await;
        h.prices.set_price(ticker("005930"), dec!(70000)).await;

        let signals = h
            .generator
            .generate_entry_signals("user1", &[ticker("005930")], &EntryFilters::default())
            .await
            .unwrap();
        assert!(signals.is_empty());
    }

    #[tokio::test]
    async fn test_missing_price_skipped() {
        let h = harness().await;
        h.reader_inner
            .push_score(composite("005930", dec!(75), dec!(80)))
            .await;
        // 가격 없음

        let signals = h
            .generator
            .generate_entry_signals("user1", &[ticker("005930")], &EntryFilters::default())
            .await
            .unwrap();
        assert!(signals.is_empty());
    }

    #[tokio::test]
    async fn test_input_order_preserved() {
        let h = harness().await;
        let directory_codes = ["005930", "000660", "035720"];
        for code in directory_codes {
            seed_candidate(&h, code).await;
        }

        let candidates: Vec<Ticker> =
            ["035720", "005930", "000660"].iter().map(|c| ticker(c)).collect();
        let signals = h
            .generator
            .generate_entry_signals("user1", &candidates, &EntryFilters::default())
            .await
            .unwrap();

        let order: Vec<String> = signals.iter().map(|s| s.ticker.to_string()).collect();
        assert_eq!(order, vec!["035720", "005930", "000660"]);
    }

    #[tokio::test]
    async fn test_market_order_mode() {
        let mut h = harness().await;
        seed_candidate(&h, "005930").await;

        // 시장가 모드로 재구성
        let mut config = SignalConfig::default();
        config.use_limit_orders = false;
        h.generator.config = config;

        let signals = h
            .generator
            .generate_entry_signals("user1", &[ticker("005930")], &EntryFilters::default())
            .await
            .unwrap();
        assert_eq!(signals[0].order_type, OrderType::Market);
        assert!(signals[0].limit_price.is_none());
    }

    #[tokio::test]
    async fn test_exit_signals_sorted_by_ticker() {
        let h = harness().await;
        for (code, price) in [("035720", dec!(50000)), ("005930", dec!(70000))] {
            h.store
                .apply_fill(
                    "user1",
                    &Fill {
                        order_id: format!("SEED_{}", code),
                        ticker: ticker(code),
                        side: Side::Buy,
                        quantity: 10,
                        price,
                        commission: Decimal::ZERO,
                        tax: Decimal::ZERO,
                        executed_at: Utc::now(),
                    },
                )
                .await
                .unwrap();
            h.store
                .initialize_limits("user1", &ticker(code), dec!(10), dec!(20), true, dec!(10))
                .await
                .unwrap();
        }
        // 둘 다 손절가 아래로
        h.prices.set_price(ticker("035720"), dec!(40000)).await;
        h.prices.set_price(ticker("005930"), dec!(60000)).await;

        let signals = h.generator.generate_exit_signals("user1").await.unwrap();
        assert_eq!(signals.len(), 2);
        assert_eq!(signals[0].ticker.to_string(), "005930");
        assert_eq!(signals[1].ticker.to_string(), "035720");
        assert!(signals.iter().all(|s| s.urgency == Urgency::High));
    }

    #[tokio::test]
    async fn test_fundamental_deterioration_exit() {
        let h = harness().await;
        h.store
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
        // 가격은 안정적 (트리거 없음)
        h.prices.set_price(ticker("005930"), dec!(71000)).await;

        // 40일 전 점수 85 → 오늘 60: 25포인트 하락 ≥ 임계값 20
        let mut old = composite("005930", dec!(85), dec!(80));
        old.computed_at = Utc::now() - Duration::days(40);
        old.date = old.computed_at.date_naive();
        h.reader_inner.push_score(old).await;
        h.reader_inner
            .push_score(composite("005930", dec!(60), dec!(80)))
            .await;
        h.reader_inner
            .set_technical(ticker("005930"), full_technical())
            .await;

        let signals = h.generator.generate_exit_signals("user1").await.unwrap();
        assert_eq!(signals.len(), 1);
        let signal = &signals[0];
        assert_eq!(signal.kind, SignalKind::ExitSell);
        assert!(signal.signal_id.starts_with("EXIT_FUNDAMENTALS_"));
        assert_eq!(signal.urgency, Urgency::Normal);
        assert!(signal.reasons[0].contains("dropped"));
    }
}
