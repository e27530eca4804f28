//! 브로커 능력 인터페이스.
//!
//! 모의/실거래 브로커가 공유하는 좁은 인터페이스입니다. 슬리피지와
//! 수수료는 구현체에 합성되는 정책이지 인터페이스의 일부가 아닙니다.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kquant_core::{KquantResult, OrderType, Price, Shares, Side, Ticker};
use serde::{Deserialize, Serialize};

/// 브로커에 제출하는 주문 티켓.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderTicket {
    /// 주문 ID (멱등성 키)
    pub order_id: String,
    /// 사용자 ID
    pub user_id: String,
    /// 종목 코드
    pub ticker: Ticker,
    /// 매매 방향
    pub side: Side,
    /// 주문 유형
    pub order_type: OrderType,
    /// 수량
    pub quantity: Shares,
    /// 지정가 (지정가 주문)
    pub limit_price: Option<Price>,
}

/// 브로커 체결 단위.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerFill {
    /// 체결 수량
    pub quantity: Shares,
    /// 체결 가격
    pub price: Price,
    /// 체결 시각
    pub executed_at: DateTime<Utc>,
}

/// 제출 결과 상태.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// 접수됨 (체결 대기)
    Accepted,
    /// 일부 체결
    PartiallyFilled,
    /// 전량 체결
    Filled,
    /// 거부됨
    Rejected,
}

/// 브로커 실행 결과.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerExecution {
    /// 주문 ID
    pub order_id: String,
    /// 상태
    pub status: ExecutionStatus,
    /// 체결 목록
    pub fills: Vec<BrokerFill>,
    /// 거부/실패 사유
    pub reason: Option<String>,
}

impl BrokerExecution {
    /// 거부 결과를 생성합니다.
    pub fn rejected(order_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            order_id: order_id.into(),
            status: ExecutionStatus::Rejected,
            fills: Vec::new(),
            reason: Some(reason.into()),
        }
    }
}

/// 브로커 인터페이스.
#[async_trait]
pub trait Broker: Send + Sync {
    /// 주문을 제출합니다.
    async fn submit_order(&self, ticket: &OrderTicket) -> KquantResult<BrokerExecution>;

    /// 미체결 주문을 취소합니다.
    async fn cancel_order(&self, order_id: &str) -> KquantResult<bool>;

    /// 주문 상태를 조회합니다.
    async fn query_order(&self, order_id: &str) -> KquantResult<Option<BrokerExecution>>;

    /// 브로커 측 보유 수량을 조회합니다.
    async fn get_position(&self, user_id: &str, ticker: &Ticker) -> KquantResult<Option<Shares>>;

    /// 현재가를 조회합니다.
    async fn get_price(&self, ticker: &Ticker) -> KquantResult<Option<Price>>;
}
