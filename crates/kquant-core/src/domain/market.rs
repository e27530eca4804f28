//! 시장 및 종목 마스터 정보.

use crate::types::Ticker;
use serde::{Deserialize, Serialize};

/// 한국 주식 시장 구분.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Market {
    /// 유가증권시장
    Kospi,
    /// 코스닥
    Kosdaq,
    /// 코넥스
    Konex,
}

impl std::fmt::Display for Market {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Market::Kospi => write!(f, "KOSPI"),
            Market::Kosdaq => write!(f, "KOSDAQ"),
            Market::Konex => write!(f, "KONEX"),
        }
    }
}

impl std::str::FromStr for Market {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "KOSPI" => Ok(Market::Kospi),
            "KOSDAQ" => Ok(Market::Kosdaq),
            "KONEX" => Ok(Market::Konex),
            _ => Err(format!("Unknown market: {}", s)),
        }
    }
}

/// 종목 마스터 레코드.
///
/// 유니버스 탐색 시 한 번 생성되고 주간 갱신에서만 수정됩니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stock {
    /// 종목 코드 (기본 키)
    pub ticker: Ticker,
    /// 한글 종목명
    pub name: String,
    /// 영문 종목명
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name_en: Option<String>,
    /// 시장 구분
    pub market: Market,
    /// 섹터
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sector: Option<String>,
    /// 업종
    #[serde(skip_serializing_if = "Option::is_none")]
    pub industry: Option<String>,
    /// 상장 주식 수
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listed_shares: Option<i64>,
    /// 거래 대상 여부
    pub is_active: bool,
}

impl Stock {
    /// 새 종목 마스터를 생성합니다.
    pub fn new(ticker: Ticker, name: impl Into<String>, market: Market) -> Self {
        Self {
            ticker,
            name: name.into(),
            name_en: None,
            market,
            sector: None,
            industry: None,
            listed_shares: None,
            is_active: true,
        }
    }

    /// 섹터를 설정합니다.
    pub fn with_sector(mut self, sector: impl Into<String>) -> Self {
        self.sector = Some(sector.into());
        self
    }
}
