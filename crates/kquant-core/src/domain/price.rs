//! 일봉(OHLCV) 데이터.

use crate::error::{KquantError, KquantResult};
use crate::types::{Price, Ticker};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// (종목, 거래일) 단위의 일봉 레코드.
///
/// 불변식: low ≤ open, close ≤ high, volume ≥ 0. 거래일당 1건, 추가 전용.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceBar {
    /// 종목 코드
    pub ticker: Ticker,
    /// 거래일
    pub date: NaiveDate,
    /// 시가
    pub open: Price,
    /// 고가
    pub high: Price,
    /// 저가
    pub low: Price,
    /// 종가
    pub close: Price,
    /// 거래량
    pub volume: i64,
    /// 거래대금
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trading_value: Option<Decimal>,
    /// 수정 종가
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adjusted_close: Option<Price>,
    /// 전일 대비 등락률 (%)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_pct: Option<Decimal>,
}

impl PriceBar {
    /// 불변식 검증을 거쳐 일봉을 생성합니다.
    pub fn new(
        ticker: Ticker,
        date: NaiveDate,
        open: Price,
        high: Price,
        low: Price,
        close: Price,
        volume: i64,
    ) -> KquantResult<Self> {
        if low > open || low > close || high < open || high < close || low > high {
            return Err(KquantError::InvalidInput(format!(
                "invalid OHLC for {} on {}: o={} h={} l={} c={}",
                ticker, date, open, high, low, close
            )));
        }
        if volume < 0 {
            return Err(KquantError::InvalidInput(format!(
                "negative volume for {} on {}: {}",
                ticker, date, volume
            )));
        }

        Ok(Self {
            ticker,
            date,
            open,
            high,
            low,
            close,
            volume,
            trading_value: None,
            adjusted_close: None,
            change_pct: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn ticker() -> Ticker {
        Ticker::new("005930").unwrap()
    }

    #[test]
    fn test_valid_bar() {
        let bar = PriceBar::new(
            ticker(),
            NaiveDate::from_ymd_opt(2026, 7, 1).unwrap(),
            dec!(70000),
            dec!(71500),
            dec!(69800),
            dec!(71000),
            12_345_678,
        )
        .unwrap();
        assert_eq!(bar.close, dec!(71000));
    }

    #[test]
    fn test_ohlc_invariant_rejected() {
        // 고가가 종가보다 낮으면 거부
        let result = PriceBar::new(
            ticker(),
            NaiveDate::from_ymd_opt(2026, 7, 1).unwrap(),
            dec!(70000),
            dec!(70000),
            dec!(69800),
            dec!(71000),
            1000,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_negative_volume_rejected() {
        let result = PriceBar::new(
            ticker(),
            NaiveDate::from_ymd_opt(2026, 7, 1).unwrap(),
            dec!(70000),
            dec!(71500),
            dec!(69800),
            dec!(71000),
            -1,
        );
        assert!(result.is_err());
    }
}
