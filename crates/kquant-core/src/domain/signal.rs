//! 매매 신호.
//!
//! 신호는 메모리 내에서만 존재하는 일시적 객체입니다. 검증을 통과해
//! 거래 기록(`Trade`)이 되기 전에는 영속화되지 않습니다.

use crate::domain::order::{OrderType, Urgency};
use crate::types::{Amount, Percent, Price, Shares, Ticker};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 신호 종류.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    /// 신규 매수 진입
    EntryBuy,
    /// 보유 포지션 청산
    ExitSell,
    /// 비상 전량 청산 (서킷 브레이커)
    EmergencyLiquidation,
}

impl SignalKind {
    /// 매도 방향 신호인지 확인합니다.
    pub fn is_sell(&self) -> bool {
        matches!(self, SignalKind::ExitSell | SignalKind::EmergencyLiquidation)
    }
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalKind::EntryBuy => write!(f, "entry_buy"),
            SignalKind::ExitSell => write!(f, "exit_sell"),
            SignalKind::EmergencyLiquidation => write!(f, "emergency_liquidation"),
        }
    }
}

/// 신호 강도 (확신 점수 사분위 기반).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalStrength {
    /// 약함
    Weak,
    /// 보통
    Moderate,
    /// 강함
    Strong,
    /// 매우 강함
    VeryStrong,
}

impl SignalStrength {
    /// 확신 점수로부터 강도를 판정합니다.
    pub fn from_conviction(conviction: Decimal) -> Self {
        if conviction >= dec!(85) {
            SignalStrength::VeryStrong
        } else if conviction >= dec!(75) {
            SignalStrength::Strong
        } else if conviction >= dec!(65) {
            SignalStrength::Moderate
        } else {
            SignalStrength::Weak
        }
    }

    /// 진입 신호의 긴급도를 도출합니다.
    pub fn entry_urgency(&self) -> Urgency {
        match self {
            SignalStrength::VeryStrong => Urgency::High,
            SignalStrength::Strong => Urgency::Normal,
            _ => Urgency::Low,
        }
    }
}

/// 매매 신호.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingSignal {
    /// 신호 ID (주문 ID로 사용되는 멱등성 키)
    pub signal_id: String,
    /// 내부 고유 ID
    pub uuid: Uuid,
    /// 사용자 ID
    pub user_id: String,
    /// 신호 종류
    pub kind: SignalKind,
    /// 종목 코드
    pub ticker: Ticker,
    /// 생성 시각
    pub generated_at: DateTime<Utc>,
    /// 현재가
    pub current_price: Price,
    /// 목표가
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_price: Option<Price>,
    /// 손절가
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_loss_price: Option<Price>,
    /// 익절가
    #[serde(skip_serializing_if = "Option::is_none")]
    pub take_profit_price: Option<Price>,
    /// 권장 수량
    pub recommended_shares: Shares,
    /// 포트폴리오 대비 비중 (%)
    pub position_pct: Percent,
    /// 포지션 금액
    pub position_value: Amount,
    /// 주문 유형
    pub order_type: OrderType,
    /// 지정가 (지정가 주문일 때)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<Price>,
    /// 확신 점수 [0,100]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conviction_score: Option<Decimal>,
    /// 종목 섹터 (집중도 검증용)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sector: Option<String>,
    /// 데이터 품질 점수 [0,100]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_quality_score: Option<Decimal>,
    /// 입력 데이터 산출 시각 (recency 검증용)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_as_of: Option<DateTime<Utc>>,
    /// 신호 강도
    pub strength: SignalStrength,
    /// 긴급도
    pub urgency: Urgency,
    /// 신호 근거 목록
    pub reasons: Vec<String>,
    /// 기대 수익률 (%)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_return_pct: Option<Percent>,
    /// 손익비
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_reward_ratio: Option<Decimal>,
    /// 검증 통과 여부
    pub is_valid: bool,
    /// 검증 경고/거부 사유
    pub validation_warnings: Vec<String>,
    /// 검증기가 제안한 축소 수량
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_quantity: Option<Shares>,
}

impl TradingSignal {
    /// 새 신호를 생성합니다.
    pub fn new(
        signal_id: impl Into<String>,
        user_id: impl Into<String>,
        kind: SignalKind,
        ticker: Ticker,
        current_price: Price,
    ) -> Self {
        Self {
            signal_id: signal_id.into(),
            uuid: Uuid::new_v4(),
            user_id: user_id.into(),
            kind,
            ticker,
            generated_at: Utc::now(),
            current_price,
            target_price: None,
            stop_loss_price: None,
            take_profit_price: None,
            recommended_shares: 0,
            position_pct: Decimal::ZERO,
            position_value: Decimal::ZERO,
            order_type: OrderType::Market,
            limit_price: None,
            conviction_score: None,
            sector: None,
            data_quality_score: None,
            data_as_of: None,
            strength: SignalStrength::Moderate,
            urgency: Urgency::Normal,
            reasons: Vec::new(),
            expected_return_pct: None,
            risk_reward_ratio: None,
            is_valid: true,
            validation_warnings: Vec::new(),
            suggested_quantity: None,
        }
    }

    /// 근거를 추가합니다.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reasons.push(reason.into());
        self
    }

    /// 검증 거부를 기록합니다.
    pub fn reject(&mut self, reason: impl Into<String>) {
        self.is_valid = false;
        self.validation_warnings.push(reason.into());
    }
}

/// 진입 주문 ID를 생성합니다: `ENTRY_{ticker}_{yyyyMMdd}_{HHmmss}`.
pub fn entry_order_id(ticker: &Ticker, at: DateTime<Utc>) -> String {
    format!("ENTRY_{}_{}", ticker, at.format("%Y%m%d_%H%M%S"))
}

/// 청산 주문 ID를 생성합니다: `EXIT_{reason}_{ticker}_{yyyyMMdd}_{HHmmss}`.
pub fn exit_order_id(reason: &str, ticker: &Ticker, at: DateTime<Utc>) -> String {
    format!(
        "EXIT_{}_{}_{}",
        reason.to_uppercase(),
        ticker,
        at.format("%Y%m%d_%H%M%S")
    )
}
