//! 거래(주문) 기록 및 생명주기 상태 머신.
//!
//! 상태 전이는 아래 DAG만 허용됩니다:
//!
//! ```text
//! PENDING → SUBMITTED → ACCEPTED ──► FILLED
//!                                ├─► PARTIALLY_FILLED → FILLED
//!                                ├─► CANCELLED
//!                                ├─► REJECTED
//!                                ├─► EXPIRED
//!                                └─► FAILED
//! ```
//!
//! 종료 상태에서의 전이 시도는 불변식 위반으로 실패합니다.

use crate::domain::order::{OrderType, Side};
use crate::error::{KquantError, KquantResult};
use crate::types::{Amount, Price, Shares, Ticker};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// 거래 상태.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeStatus {
    /// 생성됨 (아직 제출되지 않음)
    Pending,
    /// 브로커에 제출됨
    Submitted,
    /// 브로커가 접수함
    Accepted,
    /// 부분 체결됨
    PartiallyFilled,
    /// 전량 체결됨
    Filled,
    /// 취소됨
    Cancelled,
    /// 거부됨
    Rejected,
    /// 유효 기간 만료
    Expired,
    /// 실행 실패
    Failed,
}

impl TradeStatus {
    /// 종료 상태인지 확인합니다.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TradeStatus::Filled
                | TradeStatus::Cancelled
                | TradeStatus::Rejected
                | TradeStatus::Expired
                | TradeStatus::Failed
        )
    }

    /// 아직 활성 상태인지 확인합니다.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// 허용된 다음 상태인지 확인합니다.
    pub fn can_transition_to(&self, next: TradeStatus) -> bool {
        use TradeStatus::*;
        matches!(
            (*self, next),
            (Pending, Submitted)
                | (Submitted, Accepted)
                | (Accepted, Filled)
                | (Accepted, PartiallyFilled)
                | (Accepted, Cancelled)
                | (Accepted, Rejected)
                | (Accepted, Expired)
                | (Accepted, Failed)
                | (PartiallyFilled, PartiallyFilled)
                | (PartiallyFilled, Filled)
                | (PartiallyFilled, Cancelled)
        )
    }
}

impl std::fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TradeStatus::Pending => "PENDING",
            TradeStatus::Submitted => "SUBMITTED",
            TradeStatus::Accepted => "ACCEPTED",
            TradeStatus::PartiallyFilled => "PARTIALLY_FILLED",
            TradeStatus::Filled => "FILLED",
            TradeStatus::Cancelled => "CANCELLED",
            TradeStatus::Rejected => "REJECTED",
            TradeStatus::Expired => "EXPIRED",
            TradeStatus::Failed => "FAILED",
        };
        write!(f, "{}", s)
    }
}

/// 영속화되는 거래 기록.
///
/// `order_id`가 멱등성 키입니다 (예: `ENTRY_005930_20260702_084501`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    /// 주문 ID (고유, 멱등성 키)
    pub order_id: String,
    /// 사용자 ID
    pub user_id: String,
    /// 종목 코드
    pub ticker: Ticker,
    /// 매매 방향
    pub side: Side,
    /// 주문 유형
    pub order_type: OrderType,
    /// 요청 수량
    pub requested_quantity: Shares,
    /// 요청 가격 (시장가면 None)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_price: Option<Price>,
    /// 체결 수량 (단조 증가)
    pub executed_quantity: Shares,
    /// 평균 체결 가격
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executed_price: Option<Price>,
    /// 체결 금액 합계
    pub total_amount: Amount,
    /// 수수료 합계
    pub commission: Amount,
    /// 세금 합계 (거래세 + 농특세)
    pub tax: Amount,
    /// 현재 상태
    pub status: TradeStatus,
    /// 주문 사유
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// 주문을 생성한 전략
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
    /// 생성 시각
    pub created_at: DateTime<Utc>,
    /// 체결 완료 시각
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executed_at: Option<DateTime<Utc>>,
    /// 취소 시각
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Trade {
    /// 새 거래 기록을 생성합니다 (PENDING 상태).
    pub fn new(
        order_id: impl Into<String>,
        user_id: impl Into<String>,
        ticker: Ticker,
        side: Side,
        order_type: OrderType,
        requested_quantity: Shares,
        requested_price: Option<Price>,
    ) -> Self {
        Self {
            order_id: order_id.into(),
            user_id: user_id.into(),
            ticker,
            side,
            order_type,
            requested_quantity,
            requested_price,
            executed_quantity: 0,
            executed_price: None,
            total_amount: Decimal::ZERO,
            commission: Decimal::ZERO,
            tax: Decimal::ZERO,
            status: TradeStatus::Pending,
            reason: None,
            strategy: None,
            created_at: Utc::now(),
            executed_at: None,
            cancelled_at: None,
        }
    }

    /// 주문 사유를 설정합니다.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// 전략 이름을 설정합니다.
    pub fn with_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.strategy = Some(strategy.into());
        self
    }

    /// 상태를 전이합니다. DAG에 없는 전이는 실패합니다.
    pub fn transition(&mut self, next: TradeStatus) -> KquantResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(KquantError::Invariant(format!(
                "invalid trade transition {} -> {} for {}",
                self.status, next, self.order_id
            )));
        }
        self.status = next;
        match next {
            TradeStatus::Filled => self.executed_at = Some(Utc::now()),
            TradeStatus::Cancelled => self.cancelled_at = Some(Utc::now()),
            _ => {}
        }
        Ok(())
    }

    /// 체결을 기록합니다.
    ///
    /// 체결 수량 합계가 요청 수량을 초과하면 실패합니다. 전량 체결 시
    /// FILLED, 일부 체결 시 PARTIALLY_FILLED로 전이합니다.
    pub fn record_fill(
        &mut self,
        quantity: Shares,
        price: Price,
        commission: Amount,
        tax: Amount,
    ) -> KquantResult<()> {
        if quantity <= 0 {
            return Err(KquantError::InvalidInput(format!(
                "fill quantity must be positive: {}",
                quantity
            )));
        }
        if self.executed_quantity + quantity > self.requested_quantity {
            return Err(KquantError::Invariant(format!(
                "fill would exceed requested quantity for {}: {} + {} > {}",
                self.order_id, self.executed_quantity, quantity, self.requested_quantity
            )));
        }

        // 평균 체결 가격 갱신
        let fill_amount = price * Decimal::from(quantity);
        let prev_amount = self.total_amount;
        self.total_amount = prev_amount + fill_amount;
        self.executed_quantity += quantity;
        self.executed_price = Some(self.total_amount / Decimal::from(self.executed_quantity));
        self.commission += commission;
        self.tax += tax;

        if self.executed_quantity == self.requested_quantity {
            self.transition(TradeStatus::Filled)
        } else {
            self.transition(TradeStatus::PartiallyFilled)
        }
    }

    /// 남은 수량을 반환합니다.
    pub fn remaining_quantity(&self) -> Shares {
        self.requested_quantity - self.executed_quantity
    }

    /// 전량 체결 여부를 확인합니다.
    pub fn is_filled(&self) -> bool {
        self.status == TradeStatus::Filled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn new_trade() -> Trade {
        Trade::new(
            "ENTRY_005930_20260702_084501",
            "user1",
            Ticker::new("005930").unwrap(),
            Side::Buy,
            OrderType::Limit,
            100,
            Some(dec!(70000)),
        )
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut trade = new_trade();
        trade.transition(TradeStatus::Submitted).unwrap();
        trade.transition(TradeStatus::Accepted).unwrap();
        trade
            .record_fill(100, dec!(70000), dec!(105), Decimal::ZERO)
            .unwrap();
        assert!(trade.is_filled());
        assert!(trade.executed_at.is_some());
    }

    #[test]
    fn test_partial_fill_path() {
        let mut trade = new_trade();
        trade.transition(TradeStatus::Submitted).unwrap();
        trade.transition(TradeStatus::Accepted).unwrap();

        trade
            .record_fill(40, dec!(70000), dec!(42), Decimal::ZERO)
            .unwrap();
        assert_eq!(trade.status, TradeStatus::PartiallyFilled);
        assert_eq!(trade.remaining_quantity(), 60);

        trade
            .record_fill(60, dec!(70100), dec!(63), Decimal::ZERO)
            .unwrap();
        assert!(trade.is_filled());
        // 평균 체결가: (40*70000 + 60*70100) / 100 = 70060
        assert_eq!(trade.executed_price, Some(dec!(70060)));
    }

    #[test]
    fn test_overfill_rejected() {
        let mut trade = new_trade();
        trade.transition(TradeStatus::Submitted).unwrap();
        trade.transition(TradeStatus::Accepted).unwrap();
        let result = trade.record_fill(101, dec!(70000), Decimal::ZERO, Decimal::ZERO);
        assert!(matches!(result, Err(KquantError::Invariant(_))));
    }

    #[test]
    fn test_terminal_state_is_sticky() {
        let mut trade = new_trade();
        trade.transition(TradeStatus::Submitted).unwrap();
        trade.transition(TradeStatus::Accepted).unwrap();
        trade.transition(TradeStatus::Cancelled).unwrap();

        // 종료 상태에서 추가 전이 금지
        assert!(trade.transition(TradeStatus::Filled).is_err());
        assert!(trade.transition(TradeStatus::Submitted).is_err());
    }

    #[test]
    fn test_skipping_states_rejected() {
        let mut trade = new_trade();
        assert!(trade.transition(TradeStatus::Filled).is_err());
        assert!(trade.transition(TradeStatus::Accepted).is_err());
    }

    #[test]
    fn test_terminal_classification() {
        assert!(TradeStatus::Filled.is_terminal());
        assert!(TradeStatus::Rejected.is_terminal());
        assert!(TradeStatus::Expired.is_terminal());
        assert!(TradeStatus::Failed.is_terminal());
        assert!(TradeStatus::Cancelled.is_terminal());
        assert!(TradeStatus::PartiallyFilled.is_active());
        assert!(TradeStatus::Pending.is_active());
    }
}
