//! # KQuant Risk
//!
//! 리스크 관리 서브시스템:
//! - `PositionSizer`: 다섯 가지 사이징 정책 (고정 비율, 고정 리스크,
//!   변동성 조정, 풀/하프/쿼터 Kelly) + 확신 점수 스케일링
//! - `SignalValidator`: 실행 전 게이트 (데이터 최신성/품질, 포지션 수,
//!   집중도, 현금, 거래 정지 플래그)
//! - `PositionMonitor`: 주기적 포지션 감시 (손절/트레일링/익절 트리거)
//! - `RiskEngine`: 포트폴리오 지표 집계와 서킷 브레이커 (정지 플래그의
//!   유일한 작성자)

pub mod breaker;
pub mod monitor;
pub mod sizing;
pub mod validator;

pub use breaker::{emergency_liquidation_signals, RiskCheckOutcome, RiskEngine};
pub use monitor::{ExitTrigger, MonitorReport, PositionMonitor};
pub use sizing::{HistoricalStats, PositionSizer, SizingMethod, SizingRequest, SizingResult};
pub use validator::{SignalValidator, ValidationOutcome};
