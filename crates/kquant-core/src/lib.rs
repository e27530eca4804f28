//! # KQuant Core
//!
//! 한국 주식(KOSPI/KOSDAQ/KONEX) 트레이딩 시스템의 핵심 도메인 모델을 제공합니다.
//!
//! 이 크레이트는 시스템 전반에서 사용되는 기본 타입을 제공합니다:
//! - 종목 코드 및 시장 유형 정의
//! - 일봉/점수 데이터 구조체
//! - 주문 및 체결 기록 (생명주기 상태 머신 포함)
//! - 포지션 및 포트폴리오 리스크 지표
//! - 매매 신호
//! - 수수료/세금 계산기
//! - 설정 관리 (로드 시점 검증)
//! - 로깅 인프라

pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod types;

pub use config::*;
pub use domain::*;
pub use error::*;
pub use logging::*;
pub use types::*;
