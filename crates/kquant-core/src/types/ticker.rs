//! 종목 코드 타입.
//!
//! 한국 시장의 종목 코드는 항상 0으로 채워진 6자리 문자열입니다
//! (예: 삼성전자 "005930"). 정수로 다루면 선행 0이 소실되므로
//! 검증된 newtype으로만 표현합니다.

use crate::error::{KquantError, KquantResult};
use serde::{Deserialize, Serialize};

/// 0으로 채워진 6자리 종목 코드.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Ticker(String);

impl Ticker {
    /// 검증을 거쳐 종목 코드를 생성합니다.
    ///
    /// 6자리 숫자 문자열만 허용됩니다.
    pub fn new(code: impl Into<String>) -> KquantResult<Self> {
        let code = code.into();
        if code.len() != 6 || !code.bytes().all(|b| b.is_ascii_digit()) {
            return Err(KquantError::InvalidInput(format!(
                "invalid ticker: {:?} (expected 6-digit code)",
                code
            )));
        }
        Ok(Self(code))
    }

    /// 문자열 슬라이스를 반환합니다.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Ticker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for Ticker {
    type Err = KquantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Ticker {
    type Error = KquantError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Ticker> for String {
    fn from(t: Ticker) -> Self {
        t.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_ticker() {
        let t = Ticker::new("005930").unwrap();
        assert_eq!(t.as_str(), "005930");
        assert_eq!(t.to_string(), "005930");
    }

    #[test]
    fn test_leading_zeros_preserved() {
        let t: Ticker = "000660".parse().unwrap();
        assert_eq!(t.as_str(), "000660");
    }

    #[test]
    fn test_invalid_tickers_rejected() {
        assert!(Ticker::new("5930").is_err()); // 자리수 부족
        assert!(Ticker::new("0059301").is_err()); // 자리수 초과
        assert!(Ticker::new("00593A").is_err()); // 숫자 아님
        assert!(Ticker::new("").is_err());
    }

    #[test]
    fn test_serde_round_trip() {
        let t = Ticker::new("035720").unwrap();
        let json = serde_json::to_string(&t).unwrap();
        assert_eq!(json, "\"035720\"");
        let back: Ticker = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t);
    }
}
