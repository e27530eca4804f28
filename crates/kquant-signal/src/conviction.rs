//! 확신 점수 계산.
//!
//! 확신 점수는 네 가지 구성 요소의 가중 합입니다:
//! - 가치 (기본 30%): 종합 점수의 value_score
//! - 모멘텀 (기본 30%): 종합 점수의 momentum_score
//! - 거래량 (기본 20%): 20일 평균 대비 거래량 비율의 매핑
//! - 품질 (기본 20%): 종합 점수의 quality_score
//!
//! 거래량 비율 매핑: 1.5배 이상 → 100, 1.0~1.5배 → 50~100 선형,
//! 0.5~1.0배 → 0~50 선형, 0.5배 미만 → 0.
//!
//! 가중치는 설정값이며 합이 1.0(오차 1e-6)이어야 합니다.

use kquant_core::{CompositeScore, KquantError, KquantResult, SignalConfig};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// 확신 점수 가중치.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvictionWeights {
    /// 가치 가중치
    pub value: Decimal,
    /// 모멘텀 가중치
    pub momentum: Decimal,
    /// 거래량 가중치
    pub volume: Decimal,
    /// 품질 가중치
    pub quality: Decimal,
}

impl Default for ConvictionWeights {
    fn default() -> Self {
        Self {
            value: dec!(0.30),
            momentum: dec!(0.30),
            volume: dec!(0.20),
            quality: dec!(0.20),
        }
    }
}

impl ConvictionWeights {
    /// 신호 설정에서 가중치를 만듭니다.
    pub fn from_config(config: &SignalConfig) -> Self {
        Self {
            value: config.weight_value,
            momentum: config.weight_momentum,
            volume: config.weight_volume,
            quality: config.weight_quality,
        }
    }

    /// 가중치 합이 1.0(오차 1e-6)인지 검증합니다.
    pub fn validate(&self) -> KquantResult<()> {
        let sum = self.value + self.momentum + self.volume + self.quality;
        if (sum - Decimal::ONE).abs() > dec!(0.000001) {
            return Err(KquantError::Config(format!(
                "conviction weights must sum to 1.0, got {}",
                sum
            )));
        }
        Ok(())
    }
}

/// 확신 점수 명세.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvictionScore {
    /// 총점 [0,100]
    pub total: Decimal,
    /// 가치 구성 요소
    pub value_component: Decimal,
    /// 모멘텀 구성 요소
    pub momentum_component: Decimal,
    /// 거래량 구성 요소
    pub volume_component: Decimal,
    /// 품질 구성 요소
    pub quality_component: Decimal,
    /// 근거 목록 (임계값 기반)
    pub reasons: Vec<String>,
}

/// 확신 점수 계산기.
#[derive(Debug, Clone)]
pub struct ConvictionScorer {
    weights: ConvictionWeights,
}

impl ConvictionScorer {
    /// 가중치 검증을 거쳐 계산기를 생성합니다.
    pub fn new(weights: ConvictionWeights) -> KquantResult<Self> {
        weights.validate()?;
        Ok(Self { weights })
    }

    /// 기본 가중치로 생성합니다.
    pub fn with_defaults() -> Self {
        Self {
            weights: ConvictionWeights::default(),
        }
    }

    /// 확신 점수를 계산합니다.
    ///
    /// `volume_ratio`는 당일 거래량 / 20일 평균 거래량입니다.
    /// 비율을 모르면 `None`으로 주면 중립값(50)이 쓰입니다.
    pub fn score(
        &self,
        composite: &CompositeScore,
        volume_ratio: Option<Decimal>,
    ) -> ConvictionScore {
        let value_component = composite.value_score;
        let momentum_component = composite.momentum_score;
        let quality_component = composite.quality_score;
        let volume_component = volume_ratio.map(volume_score).unwrap_or(dec!(50));

        let total = value_component * self.weights.value
            + momentum_component * self.weights.momentum
            + volume_component * self.weights.volume
            + quality_component * self.weights.quality;

        let mut reasons = Vec::new();
        if value_component >= dec!(70) {
            reasons.push("Strong value opportunity".to_string());
        }
        if momentum_component >= dec!(70) {
            reasons.push("Strong positive momentum".to_string());
        }
        if volume_component >= dec!(70) {
            reasons.push("High volume support".to_string());
        }
        if quality_component >= dec!(70) {
            reasons.push("High quality fundamentals".to_string());
        }

        ConvictionScore {
            total,
            value_component,
            momentum_component,
            volume_component,
            quality_component,
            reasons,
        }
    }
}

/// 거래량 비율을 점수 [0,100]로 매핑합니다.
fn volume_score(ratio: Decimal) -> Decimal {
    if ratio >= dec!(1.5) {
        dec!(100)
    } else if ratio >= Decimal::ONE {
        // 1.0배 → 50, 1.5배 → 100
        dec!(50) + (ratio - Decimal::ONE) / dec!(0.5) * dec!(50)
    } else if ratio >= dec!(0.5) {
        // 0.5배 → 0, 1.0배 → 50
        (ratio - dec!(0.5)) / dec!(0.5) * dec!(50)
    } else {
        Decimal::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use kquant_core::Ticker;

    fn composite(value: Decimal, momentum: Decimal, quality: Decimal) -> CompositeScore {
        CompositeScore {
            ticker: Ticker::new("005930").unwrap(),
            date: NaiveDate::from_ymd_opt(2026, 7, 1).unwrap(),
            value_score: value,
            growth_score: dec!(50),
            quality_score: quality,
            momentum_score: momentum,
            composite_score: dec!(60),
            percentile_rank: dec!(80),
            computed_at: Utc::now(),
        }
    }

    #[test]
    fn test_volume_score_mapping() {
        assert_eq!(volume_score(dec!(2.0)), dec!(100));
        assert_eq!(volume_score(dec!(1.5)), dec!(100));
        assert_eq!(volume_score(dec!(1.25)), dec!(75));
        assert_eq!(volume_score(dec!(1.0)), dec!(50));
        assert_eq!(volume_score(dec!(0.75)), dec!(25));
        assert_eq!(volume_score(dec!(0.5)), dec!(0));
        assert_eq!(volume_score(dec!(0.3)), dec!(0));
    }

    #[test]
    fn test_weighted_combination() {
        let scorer = ConvictionScorer::with_defaults();
        let score = scorer.score(&composite(dec!(80), dec!(60), dec!(70)), Some(dec!(1.0)));

        // 0.3*80 + 0.3*60 + 0.2*50 + 0.2*70 = 24 + 18 + 10 + 14 = 66
        assert_eq!(score.total, dec!(66));
        assert_eq!(score.volume_component, dec!(50));
    }

    #[test]
    fn test_reasons_seeded_by_thresholds() {
        let scorer = ConvictionScorer::with_defaults();
        let score = scorer.score(&composite(dec!(75), dec!(90), dec!(30)), Some(dec!(1.8)));

        assert!(score.reasons.contains(&"Strong value opportunity".to_string()));
        assert!(score.reasons.contains(&"Strong positive momentum".to_string()));
        assert!(score.reasons.contains(&"High volume support".to_string()));
        assert!(!score.reasons.iter().any(|r| r.contains("quality")));
    }

    #[test]
    fn test_missing_volume_ratio_is_neutral() {
        let scorer = ConvictionScorer::with_defaults();
        let score = scorer.score(&composite(dec!(60), dec!(60), dec!(60)), None);
        assert_eq!(score.volume_component, dec!(50));
    }

    #[test]
    fn test_invalid_weights_rejected() {
        let weights = ConvictionWeights {
            value: dec!(0.5),
            momentum: dec!(0.3),
            volume: dec!(0.2),
            quality: dec!(0.2),
        };
        assert!(ConvictionScorer::new(weights).is_err());
    }
}
