//! # KQuant Signal
//!
//! 신호 생성 파이프라인:
//! - `ConvictionScorer`: 가치/모멘텀/거래량/품질 하위 점수의 가중 결합으로
//!   확신 점수 [0,100]를 산출
//! - `SignalGenerator`: 스크리닝된 후보를 진입 신호로, 보유 포지션을
//!   청산 신호로 변환 (모니터 트리거 + 펀더멘털 악화)

pub mod conviction;
pub mod generator;

pub use conviction::{ConvictionScore, ConvictionScorer, ConvictionWeights};
pub use generator::{EntryFilters, SignalGenerator};
