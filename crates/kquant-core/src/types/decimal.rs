//! 정밀한 금융 계산을 위한 Decimal 유틸리티.
//!
//! 모든 금액과 퍼센트 값은 고정소수점(`rust_decimal::Decimal`)으로 다룹니다.
//! 이진 부동소수점은 금액 계산에 사용하지 않습니다. 수량(주식 수)은 정수입니다
//! (KRX는 소수 주식을 허용하지 않음).

use rust_decimal::Decimal;

/// 금융 정밀도를 위한 가격 타입 (KRW, 소수점 2자리).
pub type Price = Decimal;

/// 금액 타입 (KRW).
pub type Amount = Decimal;

/// 퍼센트 타입 (10.5 = 10.5%, 소수점 4자리).
pub type Percent = Decimal;

/// 주식 수량 타입 (정수 주).
pub type Shares = i64;

/// 가격 반올림 자리수 (원 단위 소수점 2자리).
pub const PRICE_SCALE: u32 = 2;

/// 퍼센트 반올림 자리수.
pub const PERCENT_SCALE: u32 = 4;

/// Decimal 연산을 위한 확장 트레이트.
pub trait DecimalExt {
    /// 지정된 소수점 자릿수로 반올림합니다 (0.5는 올림).
    fn round_half_up(&self, dp: u32) -> Decimal;

    /// 가격 자리수(소수점 2자리)로 반올림합니다.
    fn round_price(&self) -> Decimal;

    /// 퍼센트 자리수(소수점 4자리)로 반올림합니다.
    fn round_percent(&self) -> Decimal;

    /// 원 단위(정수)로 반올림합니다.
    fn round_krw(&self) -> Decimal;
}

impl DecimalExt for Decimal {
    fn round_half_up(&self, dp: u32) -> Decimal {
        self.round_dp_with_strategy(dp, rust_decimal::RoundingStrategy::MidpointAwayFromZero)
    }

    fn round_price(&self) -> Decimal {
        self.round_half_up(PRICE_SCALE)
    }

    fn round_percent(&self) -> Decimal {
        self.round_half_up(PERCENT_SCALE)
    }

    fn round_krw(&self) -> Decimal {
        self.round_half_up(0)
    }
}

/// 퍼센트 값을 비율로 변환합니다 (10.0% -> 0.10).
pub fn pct_to_ratio(pct: Decimal) -> Decimal {
    pct / Decimal::from(100)
}

/// 비율을 퍼센트 값으로 변환합니다 (0.10 -> 10.0%).
pub fn ratio_to_pct(ratio: Decimal) -> Decimal {
    ratio * Decimal::from(100)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_round_half_up() {
        assert_eq!(dec!(112.5).round_krw(), dec!(113));
        assert_eq!(dec!(258.75).round_krw(), dec!(259));
        assert_eq!(dec!(105.0).round_krw(), dec!(105));
        assert_eq!(dec!(6.8273).round_price(), dec!(6.83));
    }

    #[test]
    fn test_pct_conversion() {
        assert_eq!(pct_to_ratio(dec!(10)), dec!(0.1));
        assert_eq!(ratio_to_pct(dec!(0.0994)), dec!(9.94));
    }
}
