//! 포트폴리오 저장소.
//!
//! (사용자, 종목) 단위 상태 변경은 전부 이 인터페이스의 트랜잭션을
//! 통과하며, 같은 키에 대한 동시 체결은 직렬화됩니다. 모든 쓰기는
//! 주문 ID를 멱등성 키로 사용해 재시도에 안전합니다.
//!
//! 거래 정지 플래그는 시스템 전체에서 유일한 공유 가변 상태입니다.
//! 쓰기는 리스크 엔진(서킷 브레이커)만 수행하고, 나머지는 읽기만 합니다.

mod memory;
mod postgres;

pub use memory::MemoryPortfolioStore;
pub use postgres::PgPortfolioStore;

use crate::error::Result;
use async_trait::async_trait;
use kquant_core::{Amount, Fill, Percent, Position, Price, RiskMetrics, Ticker, Trade};

/// 일관된 포트폴리오 스냅샷.
///
/// 현금과 포지션 목록을 하나의 트랜잭션 안에서 읽은 결과입니다.
/// 서킷 브레이커의 지표 집계는 반드시 이 스냅샷 위에서 수행합니다.
#[derive(Debug, Clone)]
pub struct PortfolioSnapshot {
    /// 사용자 ID
    pub user_id: String,
    /// 현금 잔고
    pub cash_balance: Amount,
    /// 초기 자본
    pub initial_capital: Amount,
    /// 열린 포지션 목록
    pub positions: Vec<Position>,
}

/// 포트폴리오 저장소 인터페이스.
#[async_trait]
pub trait PortfolioStore: Send + Sync {
    /// 계좌를 초기 자본으로 개설합니다. 이미 있으면 아무것도 하지 않습니다.
    async fn open_account(&self, user_id: &str, initial_capital: Amount) -> Result<()>;

    /// 포지션을 조회합니다 (보관된 포지션 제외).
    async fn get_position(&self, user_id: &str, ticker: &Ticker) -> Result<Option<Position>>;

    /// 열린 포지션 목록을 (종목 코드 순으로) 조회합니다.
    async fn list_positions(&self, user_id: &str) -> Result<Vec<Position>>;

    /// 현금 잔고를 조회합니다.
    async fn cash_balance(&self, user_id: &str) -> Result<Amount>;

    /// 현금과 포지션의 일관된 스냅샷을 조회합니다.
    async fn snapshot(&self, user_id: &str) -> Result<PortfolioSnapshot>;

    /// 체결을 트랜잭션으로 반영하고 갱신된 포지션을 반환합니다.
    ///
    /// BUY: 수량 증가, 평단 재계산, 현금 차감 (비용 포함).
    /// SELL: 수량 감소, 실현 손익 적립, 현금 입금 (비용 차감), 평단 유지.
    /// 전량 청산 시 포지션은 삭제되지 않고 보관됩니다.
    ///
    /// `fill.order_id`가 이미 반영된 경우 상태를 바꾸지 않고 현재
    /// 포지션을 반환합니다 (at-most-once).
    async fn apply_fill(&self, user_id: &str, fill: &Fill) -> Result<Position>;

    /// 손절/익절/트레일링 한도를 초기화합니다.
    async fn initialize_limits(
        &self,
        user_id: &str,
        ticker: &Ticker,
        stop_loss_pct: Percent,
        take_profit_pct: Percent,
        trailing_enabled: bool,
        trailing_distance_pct: Percent,
    ) -> Result<Position>;

    /// 트레일링 스톱을 갱신합니다. 스톱 가격이 올라갔으면 `true`.
    ///
    /// 트레일링 스톱 가격은 절대 내려가지 않습니다.
    async fn update_trailing(
        &self,
        user_id: &str,
        ticker: &Ticker,
        last_price: Price,
    ) -> Result<bool>;

    /// 포지션 현재가를 갱신합니다.
    async fn update_position_price(
        &self,
        user_id: &str,
        ticker: &Ticker,
        last_price: Price,
    ) -> Result<()>;

    /// 거래 정지 플래그를 설정합니다. 리스크 엔진 전용.
    async fn set_halt(&self, user_id: &str, reason: &str) -> Result<()>;

    /// 거래 정지 플래그를 해제합니다. 운영자 조작 전용.
    async fn clear_halt(&self, user_id: &str) -> Result<()>;

    /// 거래 정지 여부를 확인합니다.
    async fn is_halted(&self, user_id: &str) -> Result<bool>;

    /// 최신 리스크 지표를 조회합니다.
    async fn get_metrics(&self, user_id: &str) -> Result<Option<RiskMetrics>>;

    /// 리스크 지표를 저장합니다.
    async fn save_metrics(&self, metrics: &RiskMetrics) -> Result<()>;

    /// 거래 기록을 저장합니다 (order_id 기준 upsert).
    async fn record_trade(&self, trade: &Trade) -> Result<()>;

    /// 주문 ID로 거래 기록을 조회합니다.
    async fn get_trade(&self, order_id: &str) -> Result<Option<Trade>>;

    /// 최근 거래 기록을 조회합니다 (최신순, 최대 `limit`건).
    async fn recent_trades(&self, user_id: &str, limit: usize) -> Result<Vec<Trade>>;
}
