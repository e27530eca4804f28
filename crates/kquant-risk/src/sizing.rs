//! 포지션 크기 계산.
//!
//! 다섯 가지 정책을 지원합니다:
//! - 고정 비율 (포트폴리오 대비 고정 %)
//! - 고정 리스크 (거래당 리스크 금액 / 주당 리스크)
//! - 변동성 조정 (30일 연환산 변동성에 반비례)
//! - Kelly (풀/하프/쿼터)
//!
//! 모든 결과는 최대 포지션 비율과 가용 현금으로 제한되고, 수량은 정수로
//! 내림합니다 (KRX는 소수 주식 불가). 확신 점수가 주어지면
//! `clamp((conviction − 60) / 40, 0, 1)` 비율로 축소되며, 60점 미만은
//! 수량 0이 됩니다.

use kquant_core::{
    pct_to_ratio, Amount, DecimalExt, KquantError, KquantResult, Percent, Price, RiskSettings,
    Shares,
};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// 사이징 방법.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizingMethod {
    /// 고정 비율
    FixedPercent,
    /// 고정 리스크
    FixedRisk,
    /// 변동성 조정
    VolatilityAdjusted,
    /// 풀 Kelly
    KellyFull,
    /// 하프 Kelly (기본)
    KellyHalf,
    /// 쿼터 Kelly
    KellyQuarter,
}

impl Default for SizingMethod {
    fn default() -> Self {
        // 보수적 기본값: 하프 Kelly
        SizingMethod::KellyHalf
    }
}

impl std::fmt::Display for SizingMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SizingMethod::FixedPercent => "fixed_percent",
            SizingMethod::FixedRisk => "fixed_risk",
            SizingMethod::VolatilityAdjusted => "volatility_adjusted",
            SizingMethod::KellyFull => "kelly_full",
            SizingMethod::KellyHalf => "kelly_half",
            SizingMethod::KellyQuarter => "kelly_quarter",
        };
        write!(f, "{}", s)
    }
}

/// Kelly 입력용 과거 성과 통계.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoricalStats {
    /// 승률 (0.0 ~ 1.0)
    pub win_rate: Decimal,
    /// 평균 수익률 (%)
    pub avg_win_pct: Percent,
    /// 평균 손실률 (%, 양수)
    pub avg_loss_pct: Percent,
    /// 프로핏 팩터
    pub profit_factor: Decimal,
    /// 표본 거래 수
    pub total_trades: usize,
}

impl Default for HistoricalStats {
    fn default() -> Self {
        // 거래 이력이 없을 때의 문서화된 기본값
        Self {
            win_rate: dec!(0.55),
            avg_win_pct: dec!(12.0),
            avg_loss_pct: dec!(8.0),
            profit_factor: dec!(1.65),
            total_trades: 0,
        }
    }
}

impl HistoricalStats {
    /// 거래별 손익률(%) 목록에서 통계를 계산합니다.
    pub fn from_pnl_pcts(pnl_pcts: &[Decimal]) -> Self {
        let wins: Vec<Decimal> = pnl_pcts.iter().copied().filter(|p| *p > Decimal::ZERO).collect();
        let losses: Vec<Decimal> = pnl_pcts
            .iter()
            .copied()
            .filter(|p| *p < Decimal::ZERO)
            .map(|p| p.abs())
            .collect();

        let total = wins.len() + losses.len();
        if total == 0 {
            return Self::default();
        }

        let win_rate = Decimal::from(wins.len()) / Decimal::from(total);
        let avg_win_pct = if wins.is_empty() {
            Self::default().avg_win_pct
        } else {
            wins.iter().sum::<Decimal>() / Decimal::from(wins.len())
        };
        let avg_loss_pct = if losses.is_empty() {
            Self::default().avg_loss_pct
        } else {
            losses.iter().sum::<Decimal>() / Decimal::from(losses.len())
        };

        let total_wins: Decimal = wins.iter().sum();
        let total_losses: Decimal = losses.iter().sum();
        let profit_factor = if total_losses > Decimal::ZERO {
            total_wins / total_losses
        } else {
            dec!(2.0)
        };

        Self {
            win_rate,
            avg_win_pct,
            avg_loss_pct,
            profit_factor,
            total_trades: total,
        }
    }
}

/// Kelly 비율을 계산합니다: f* = p − (1−p)/b, b = 평균수익/평균손실.
///
/// 기대값이 음수이거나 입력이 무의미하면 0을 반환합니다.
pub fn kelly_fraction(win_rate: Decimal, avg_win_pct: Percent, avg_loss_pct: Percent) -> Decimal {
    if win_rate <= Decimal::ZERO || win_rate >= Decimal::ONE {
        return Decimal::ZERO;
    }
    if avg_win_pct <= Decimal::ZERO || avg_loss_pct <= Decimal::ZERO {
        return Decimal::ZERO;
    }

    let b = avg_win_pct / avg_loss_pct;
    let kelly = win_rate - (Decimal::ONE - win_rate) / b;
    kelly.clamp(Decimal::ZERO, Decimal::ONE)
}

/// 사이징 요청.
#[derive(Debug, Clone)]
pub struct SizingRequest {
    /// 포트폴리오 총 평가 금액
    pub portfolio_value: Amount,
    /// 진입 가격
    pub entry_price: Price,
    /// 손절 가격
    pub stop_loss_price: Price,
    /// 사이징 방법
    pub method: SizingMethod,
    /// 가용 현금 (제한에 사용, 없으면 미적용)
    pub cash_available: Option<Amount>,
    /// 확신 점수 [0,100] (스케일링에 사용, 없으면 미적용)
    pub conviction: Option<Decimal>,
    /// 과거 성과 (Kelly 입력)
    pub stats: Option<HistoricalStats>,
    /// 30일 연환산 변동성 (%, 변동성 조정 입력)
    pub volatility_pct: Option<Percent>,
}

/// 사이징 결과.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizingResult {
    /// 권장 수량
    pub recommended_shares: Shares,
    /// 포지션 금액
    pub position_value: Amount,
    /// 포트폴리오 대비 비중 (%)
    pub position_pct: Percent,
    /// 사용한 방법
    pub method: SizingMethod,
    /// 적용된 Kelly 비율 (Kelly 계열일 때)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kelly_fraction: Option<Decimal>,
    /// 리스크 금액 (고정 리스크일 때)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_amount: Option<Amount>,
    /// 계산 노트
    pub notes: Vec<String>,
}

/// 포지션 사이저.
#[derive(Debug, Clone)]
pub struct PositionSizer {
    config: RiskSettings,
    /// 변동성 조정의 기준(중앙값) 변동성 (%)
    reference_volatility_pct: Percent,
}

impl PositionSizer {
    /// 리스크 설정으로 사이저를 생성합니다.
    pub fn new(config: RiskSettings) -> Self {
        Self {
            config,
            reference_volatility_pct: dec!(20.0),
        }
    }

    /// 기준 변동성을 변경합니다.
    pub fn with_reference_volatility(mut self, pct: Percent) -> Self {
        self.reference_volatility_pct = pct;
        self
    }

    /// 포지션 크기를 계산합니다.
    pub fn calculate(&self, request: &SizingRequest) -> KquantResult<SizingResult> {
        if request.portfolio_value <= Decimal::ZERO {
            return Err(KquantError::InvalidInput(
                "portfolio value must be positive".to_string(),
            ));
        }
        if request.entry_price <= Decimal::ZERO {
            return Err(KquantError::InvalidInput(
                "entry price must be positive".to_string(),
            ));
        }
        if request.stop_loss_price >= request.entry_price {
            return Err(KquantError::Validation(format!(
                "stop-loss {} must be below entry {}",
                request.stop_loss_price, request.entry_price
            )));
        }

        let mut notes = Vec::new();
        let mut kelly_used = None;
        let mut risk_amount = None;

        // 1단계: 방법별 기본 수량
        let mut shares: Shares = match request.method {
            SizingMethod::FixedPercent => {
                let fraction = pct_to_ratio(self.config.max_position_size_pct);
                self.shares_for_fraction(request, fraction)
            }
            SizingMethod::FixedRisk => {
                let risk = request.portfolio_value * pct_to_ratio(self.config.risk_tolerance_pct);
                let per_share_risk = request.entry_price - request.stop_loss_price;
                risk_amount = Some(risk);
                notes.push(format!(
                    "risk {} KRW at {} per share",
                    risk.round_krw(),
                    per_share_risk
                ));
                floor_shares(risk / per_share_risk)
            }
            SizingMethod::VolatilityAdjusted => {
                let fraction = match request.volatility_pct {
                    Some(vol) if vol > Decimal::ZERO => {
                        let adjusted_pct = (self.config.max_position_size_pct
                            * self.reference_volatility_pct
                            / vol)
                            .clamp(dec!(1.0), self.config.max_position_size_pct);
                        notes.push(format!(
                            "volatility {}% adjusted to {}%",
                            vol,
                            adjusted_pct.round_percent()
                        ));
                        pct_to_ratio(adjusted_pct)
                    }
                    _ => {
                        notes.push("volatility unavailable, using fixed percent".to_string());
                        pct_to_ratio(self.config.max_position_size_pct)
                    }
                };
                self.shares_for_fraction(request, fraction)
            }
            SizingMethod::KellyFull | SizingMethod::KellyHalf | SizingMethod::KellyQuarter => {
                match &request.stats {
                    Some(stats) => {
                        let multiplier = match request.method {
                            SizingMethod::KellyFull => Decimal::ONE,
                            SizingMethod::KellyHalf => dec!(0.5),
                            _ => dec!(0.25),
                        };
                        let full =
                            kelly_fraction(stats.win_rate, stats.avg_win_pct, stats.avg_loss_pct);
                        let max_fraction = pct_to_ratio(self.config.max_position_size_pct);
                        let fraction = (full * multiplier).clamp(Decimal::ZERO, max_fraction);
                        kelly_used = Some(fraction);
                        notes.push(format!(
                            "full Kelly {}, applied {}",
                            full.round_percent(),
                            fraction.round_percent()
                        ));
                        self.shares_for_fraction(request, fraction)
                    }
                    None => {
                        // Kelly 입력이 없으면 고정 리스크로 대체
                        notes.push("no historical stats, falling back to fixed risk".to_string());
                        let risk =
                            request.portfolio_value * pct_to_ratio(self.config.risk_tolerance_pct);
                        let per_share_risk = request.entry_price - request.stop_loss_price;
                        risk_amount = Some(risk);
                        floor_shares(risk / per_share_risk)
                    }
                }
            }
        };

        // 2단계: 최대 포지션 비율 상한
        let max_value = request.portfolio_value * pct_to_ratio(self.config.max_position_size_pct);
        let max_shares = floor_shares(max_value / request.entry_price);
        if shares > max_shares {
            notes.push(format!(
                "capped at {}% max position: {} -> {}",
                self.config.max_position_size_pct, shares, max_shares
            ));
            shares = max_shares;
        }

        // 3단계: 가용 현금 상한
        if let Some(cash) = request.cash_available {
            let affordable = floor_shares(cash / request.entry_price);
            if shares > affordable {
                notes.push(format!("capped by available cash: {} -> {}", shares, affordable));
                shares = affordable;
            }
        }

        // 4단계: 확신 점수 스케일링 (60점 미만은 0)
        if let Some(conviction) = request.conviction {
            let factor = ((conviction - dec!(60)) / dec!(40)).clamp(Decimal::ZERO, Decimal::ONE);
            if factor < Decimal::ONE {
                let scaled = floor_shares(Decimal::from(shares) * factor);
                notes.push(format!(
                    "conviction {} scales {} -> {}",
                    conviction, shares, scaled
                ));
                shares = scaled;
            }
        }

        let position_value = request.entry_price * Decimal::from(shares);
        let position_pct =
            (position_value / request.portfolio_value * Decimal::from(100)).round_percent();

        Ok(SizingResult {
            recommended_shares: shares,
            position_value,
            position_pct,
            method: request.method,
            kelly_fraction: kelly_used,
            risk_amount,
            notes,
        })
    }

    fn shares_for_fraction(&self, request: &SizingRequest, fraction: Decimal) -> Shares {
        floor_shares(request.portfolio_value * fraction / request.entry_price)
    }
}

fn floor_shares(value: Decimal) -> Shares {
    value.floor().to_i64().unwrap_or(0).max(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sizer() -> PositionSizer {
        PositionSizer::new(RiskSettings::default())
    }

    fn request(method: SizingMethod) -> SizingRequest {
        SizingRequest {
            portfolio_value: dec!(100000000),
            entry_price: dec!(70000),
            stop_loss_price: dec!(63000),
            method,
            cash_available: None,
            conviction: None,
            stats: None,
            volatility_pct: None,
        }
    }

    #[test]
    fn test_fixed_risk_with_cap() {
        // 1억 포트폴리오, 진입 70,000 / 손절 63,000, 리스크 2%
        // 주당 리스크 7,000 → 리스크 금액 2,000,000 → 285주
        // 10% 상한: 10,000,000 / 70,000 = 142주
        let result = sizer().calculate(&request(SizingMethod::FixedRisk)).unwrap();

        assert_eq!(result.recommended_shares, 142);
        assert_eq!(result.position_value, dec!(9940000));
        assert_eq!(result.position_pct, dec!(9.9400));
        assert_eq!(result.risk_amount, Some(dec!(2000000)));
    }

    #[test]
    fn test_fixed_percent() {
        let result = sizer().calculate(&request(SizingMethod::FixedPercent)).unwrap();
        // 10% of 100M = 10M → 142주
        assert_eq!(result.recommended_shares, 142);
    }

    #[test]
    fn test_sizing_cap_law() {
        // 모든 방법에서 권장 수량 × 진입가 ≤ 포트폴리오 × 최대 비율
        let max_value = dec!(10000000);
        for method in [
            SizingMethod::FixedPercent,
            SizingMethod::FixedRisk,
            SizingMethod::VolatilityAdjusted,
            SizingMethod::KellyFull,
            SizingMethod::KellyHalf,
            SizingMethod::KellyQuarter,
        ] {
            let mut req = request(method);
            req.stats = Some(HistoricalStats {
                win_rate: dec!(0.9),
                avg_win_pct: dec!(30),
                avg_loss_pct: dec!(3),
                profit_factor: dec!(9),
                total_trades: 100,
            });
            req.volatility_pct = Some(dec!(5)); // 저변동성 → 상한 도달
            let result = sizer().calculate(&req).unwrap();
            assert!(
                result.position_value <= max_value,
                "{} exceeded cap: {}",
                method,
                result.position_value
            );
        }
    }

    #[test]
    fn test_kelly_half_is_half_of_full() {
        let stats = HistoricalStats {
            win_rate: dec!(0.6),
            avg_win_pct: dec!(10),
            avg_loss_pct: dec!(10),
            profit_factor: dec!(1.5),
            total_trades: 50,
        };
        // b = 1, kelly = 0.6 - 0.4 = 0.2 → 풀 20%는 10% 상한에 걸리고
        // 하프 10%, 쿼터 5%
        let mut req = request(SizingMethod::KellyFull);
        req.stats = Some(stats.clone());
        let full = sizer().calculate(&req).unwrap();
        assert_eq!(full.kelly_fraction, Some(dec!(0.10))); // 상한 적용

        req.method = SizingMethod::KellyHalf;
        let half = sizer().calculate(&req).unwrap();
        assert_eq!(half.kelly_fraction, Some(dec!(0.10)));

        req.method = SizingMethod::KellyQuarter;
        let quarter = sizer().calculate(&req).unwrap();
        assert_eq!(quarter.kelly_fraction, Some(dec!(0.05)));
        assert!(quarter.recommended_shares < half.recommended_shares);
    }

    #[test]
    fn test_negative_expectancy_kelly_is_zero() {
        let mut req = request(SizingMethod::KellyHalf);
        req.stats = Some(HistoricalStats {
            win_rate: dec!(0.3),
            avg_win_pct: dec!(5),
            avg_loss_pct: dec!(10),
            profit_factor: dec!(0.5),
            total_trades: 50,
        });
        // kelly = 0.3 - 0.7/0.5 = 음수 → 0주
        let result = sizer().calculate(&req).unwrap();
        assert_eq!(result.recommended_shares, 0);
    }

    #[test]
    fn test_conviction_below_60_yields_zero() {
        for method in [
            SizingMethod::FixedPercent,
            SizingMethod::FixedRisk,
            SizingMethod::VolatilityAdjusted,
        ] {
            let mut req = request(method);
            req.conviction = Some(dec!(55));
            let result = sizer().calculate(&req).unwrap();
            assert_eq!(result.recommended_shares, 0, "method {}", method);
        }
    }

    #[test]
    fn test_conviction_scaling() {
        let mut req = request(SizingMethod::FixedPercent);
        req.conviction = Some(dec!(80)); // factor = 0.5
        let result = sizer().calculate(&req).unwrap();
        assert_eq!(result.recommended_shares, 71); // 142 * 0.5

        req.conviction = Some(dec!(100)); // factor = 1.0
        let result = sizer().calculate(&req).unwrap();
        assert_eq!(result.recommended_shares, 142);
    }

    #[test]
    fn test_cash_cap() {
        let mut req = request(SizingMethod::FixedPercent);
        req.cash_available = Some(dec!(1000000));
        let result = sizer().calculate(&req).unwrap();
        assert_eq!(result.recommended_shares, 14); // 1,000,000 / 70,000
    }

    #[test]
    fn test_volatility_adjusted() {
        let mut req = request(SizingMethod::VolatilityAdjusted);
        // 기준 변동성 20%의 두 배 → 비중 절반 (5%)
        req.volatility_pct = Some(dec!(40));
        let result = sizer().calculate(&req).unwrap();
        assert_eq!(result.recommended_shares, 71); // 5% of 100M / 70,000
    }

    #[test]
    fn test_stop_above_entry_rejected() {
        let mut req = request(SizingMethod::FixedRisk);
        req.stop_loss_price = dec!(71000);
        assert!(sizer().calculate(&req).is_err());
    }

    #[test]
    fn test_kelly_without_stats_falls_back() {
        let req = request(SizingMethod::KellyHalf);
        let result = sizer().calculate(&req).unwrap();
        // 고정 리스크 대체 경로 (2,000,000 / 7,000 = 285 → 상한 142)
        assert_eq!(result.recommended_shares, 142);
        assert!(result.kelly_fraction.is_none());
    }

    #[test]
    fn test_historical_stats_from_pnl() {
        let stats = HistoricalStats::from_pnl_pcts(&[
            dec!(15),
            dec!(-8),
            dec!(12),
            dec!(-5),
            dec!(20),
            dec!(-7),
        ]);
        assert_eq!(stats.win_rate, dec!(0.5));
        assert_eq!(stats.total_trades, 6);
        assert!(stats.avg_win_pct > stats.avg_loss_pct);
    }

    #[test]
    fn test_empty_history_uses_defaults() {
        let stats = HistoricalStats::from_pnl_pcts(&[]);
        assert_eq!(stats.win_rate, dec!(0.55));
        assert_eq!(stats.avg_win_pct, dec!(12.0));
    }
}
