//! # KQuant Execution
//!
//! 주문 실행 서브시스템:
//! - `Broker`: 좁은 능력 인터페이스 (주문 제출/취소/조회, 포지션/가격 조회)
//! - `PaperBroker`: 슬리피지 모델이 적용된 모의 체결
//! - `OrderExecutor`: 검증된 신호 → 거래 기록 → 수수료/세금 → 포트폴리오
//!   갱신까지를 신호 ID 기준 at-most-once로 수행

pub mod broker;
pub mod executor;
pub mod paper;
pub mod slippage;

pub use broker::{Broker, BrokerExecution, BrokerFill, ExecutionStatus, OrderTicket};
pub use executor::OrderExecutor;
pub use paper::PaperBroker;
pub use slippage::SlippageModel;
