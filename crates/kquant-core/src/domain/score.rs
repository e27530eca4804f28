//! 종합 점수 및 지표 스냅샷.
//!
//! 점수/지표 계산 자체는 외부 서비스의 몫이고, 여기서는 신호 파이프라인이
//! 읽기 전용으로 소비하는 형태만 정의합니다.

use crate::error::{KquantError, KquantResult};
use crate::types::{Price, Ticker};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// 종합 점수 허용 오차 (가중 합 검증용).
pub const SCORE_TOLERANCE: Decimal = dec!(0.000001);

/// (종목, 날짜) 단위의 종합 점수.
///
/// 불변식: composite는 네 개 하위 점수의 볼록 결합이어야 합니다
/// (가중치 합 1.0, 오차 1e-6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositeScore {
    /// 종목 코드
    pub ticker: Ticker,
    /// 산출 날짜
    pub date: NaiveDate,
    /// 가치 점수 [0,100]
    pub value_score: Decimal,
    /// 성장 점수 [0,100]
    pub growth_score: Decimal,
    /// 품질 점수 [0,100]
    pub quality_score: Decimal,
    /// 모멘텀 점수 [0,100]
    pub momentum_score: Decimal,
    /// 종합 점수 [0,100]
    pub composite_score: Decimal,
    /// 백분위 순위 [0,100]
    pub percentile_rank: Decimal,
    /// 산출 시각 (staleness 판단용)
    pub computed_at: DateTime<Utc>,
}

impl CompositeScore {
    /// 가중치 벡터에 대해 composite가 볼록 결합인지 검증합니다.
    pub fn verify_composite(&self, weights: &ScoreWeights) -> KquantResult<()> {
        weights.validate()?;
        let expected = self.value_score * weights.value
            + self.growth_score * weights.growth
            + self.quality_score * weights.quality
            + self.momentum_score * weights.momentum;
        if (expected - self.composite_score).abs() > SCORE_TOLERANCE {
            return Err(KquantError::Invariant(format!(
                "composite {} is not the weighted sum {} for {}",
                self.composite_score, expected, self.ticker
            )));
        }
        Ok(())
    }
}

/// 종합 점수 산출 가중치.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreWeights {
    /// 가치 가중치
    pub value: Decimal,
    /// 성장 가중치
    pub growth: Decimal,
    /// 품질 가중치
    pub quality: Decimal,
    /// 모멘텀 가중치
    pub momentum: Decimal,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            value: dec!(0.25),
            growth: dec!(0.25),
            quality: dec!(0.25),
            momentum: dec!(0.25),
        }
    }
}

impl ScoreWeights {
    /// 가중치 합이 1.0(오차 1e-6)인지 검증합니다.
    pub fn validate(&self) -> KquantResult<()> {
        let sum = self.value + self.growth + self.quality + self.momentum;
        if (sum - Decimal::ONE).abs() > SCORE_TOLERANCE {
            return Err(KquantError::Config(format!(
                "score weights must sum to 1.0, got {}",
                sum
            )));
        }
        Ok(())
    }
}

/// (종목, 날짜) 단위의 기술 지표 스냅샷.
///
/// 지표 수식 자체는 외부 계산기의 몫입니다. 필드가 `None`이면 해당 지표가
/// 계산되지 못한 것이고, 데이터 품질 점수에 반영됩니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TechnicalSnapshot {
    /// 산출 날짜
    pub date: NaiveDate,
    /// RSI(14)
    pub rsi_14: Option<Decimal>,
    /// MACD
    pub macd: Option<Decimal>,
    /// MACD 시그널
    pub macd_signal: Option<Decimal>,
    /// MACD 히스토그램
    pub macd_histogram: Option<Decimal>,
    /// 20일 단순이동평균
    pub sma_20: Option<Price>,
    /// 50일 단순이동평균
    pub sma_50: Option<Price>,
    /// 볼린저 밴드 상단
    pub bollinger_upper: Option<Price>,
    /// 볼린저 밴드 하단
    pub bollinger_lower: Option<Price>,
    /// ATR(14)
    pub atr_14: Option<Decimal>,
    /// 20일 평균 거래량
    pub volume_ma_20: Option<Decimal>,
    /// 30일 연환산 변동성 (%)
    pub volatility_30d: Option<Decimal>,
    /// 산출 시각
    pub computed_at: Option<DateTime<Utc>>,
}

impl TechnicalSnapshot {
    /// 채워진 지표 비율로 데이터 품질 점수 [0,100]를 계산합니다.
    pub fn data_quality_score(&self) -> Decimal {
        let fields: [bool; 11] = [
            self.rsi_14.is_some(),
            self.macd.is_some(),
            self.macd_signal.is_some(),
            self.macd_histogram.is_some(),
            self.sma_20.is_some(),
            self.sma_50.is_some(),
            self.bollinger_upper.is_some(),
            self.bollinger_lower.is_some(),
            self.atr_14.is_some(),
            self.volume_ma_20.is_some(),
            self.volatility_30d.is_some(),
        ];
        let filled = fields.iter().filter(|&&b| b).count();
        Decimal::from(filled * 100) / Decimal::from(fields.len())
    }
}

/// (종목, 날짜) 단위의 재무 지표 스냅샷 (읽기 전용 입력).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FundamentalSnapshot {
    /// 산출 날짜
    pub date: NaiveDate,
    /// PER
    pub per: Option<Decimal>,
    /// PBR
    pub pbr: Option<Decimal>,
    /// ROE (%)
    pub roe: Option<Decimal>,
    /// 부채비율 (%)
    pub debt_ratio: Option<Decimal>,
    /// 매출 성장률 (%)
    pub revenue_growth: Option<Decimal>,
    /// 이익 성장률 (%)
    pub earnings_growth: Option<Decimal>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn score(composite: Decimal) -> CompositeScore {
        CompositeScore {
            ticker: Ticker::new("005930").unwrap(),
            date: NaiveDate::from_ymd_opt(2026, 7, 1).unwrap(),
            value_score: dec!(80),
            growth_score: dec!(60),
            quality_score: dec!(70),
            momentum_score: dec!(50),
            composite_score: composite,
            percentile_rank: dec!(92),
            computed_at: Utc::now(),
        }
    }

    #[test]
    fn test_composite_is_convex_combination() {
        // 균등 가중: (80+60+70+50)/4 = 65
        let s = score(dec!(65));
        s.verify_composite(&ScoreWeights::default()).unwrap();
    }

    #[test]
    fn test_composite_mismatch_rejected() {
        let s = score(dec!(70));
        assert!(s.verify_composite(&ScoreWeights::default()).is_err());
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        let bad = ScoreWeights {
            value: dec!(0.5),
            growth: dec!(0.3),
            quality: dec!(0.3),
            momentum: dec!(0.1),
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_data_quality_score() {
        let empty = TechnicalSnapshot::default();
        assert_eq!(empty.data_quality_score(), Decimal::ZERO);

        let full = TechnicalSnapshot {
            date: NaiveDate::from_ymd_opt(2026, 7, 1).unwrap(),
            rsi_14: Some(dec!(55)),
            macd: Some(dec!(120)),
            macd_signal: Some(dec!(100)),
            macd_histogram: Some(dec!(20)),
            sma_20: Some(dec!(70000)),
            sma_50: Some(dec!(68000)),
            bollinger_upper: Some(dec!(74000)),
            bollinger_lower: Some(dec!(66000)),
            atr_14: Some(dec!(1500)),
            volume_ma_20: Some(dec!(1000000)),
            volatility_30d: Some(dec!(25)),
            computed_at: Some(Utc::now()),
        };
        assert_eq!(full.data_quality_score(), dec!(100));
    }
}
