//! 트레이딩 시스템의 에러 타입.
//!
//! 이 모듈은 시스템 전반에서 사용되는 에러 분류를 정의합니다.
//! 분류별 처리 정책은 호출자가 `is_retryable` / `is_critical`로 판단합니다.

use thiserror::Error;

/// 핵심 트레이딩 에러.
#[derive(Debug, Error)]
pub enum KquantError {
    /// 설정 에러 (시작 시점에 치명적)
    #[error("설정 에러: {0}")]
    Config(String),

    /// 시장 캘린더 에러
    #[error("캘린더 에러: {0}")]
    Calendar(String),

    /// 데이터 소스/저장소 에러
    #[error("데이터 에러: {0}")]
    Data(String),

    /// 데이터 품질 문제 (오래된 점수, 누락 지표 등)
    #[error("데이터 품질 에러: {0}")]
    DataQuality(String),

    /// 주문 에러
    #[error("주문 에러: {0}")]
    Order(String),

    /// 포지션 에러
    #[error("포지션 에러: {0}")]
    Position(String),

    /// 리스크 관리 에러
    #[error("리스크 에러: {0}")]
    Risk(String),

    /// 신호 생성 에러
    #[error("신호 에러: {0}")]
    Signal(String),

    /// 검증 실패 (경계에서 거부)
    #[error("검증 실패: {0}")]
    Validation(String),

    /// 불변식 위반 (상태 손상 방지를 위해 작업 중단)
    #[error("불변식 위반: {0}")]
    Invariant(String),

    /// 네트워크 에러
    #[error("네트워크 에러: {0}")]
    Network(String),

    /// 요청 한도 초과
    #[error("요청 한도 초과: {0}")]
    RateLimit(String),

    /// 데이터베이스 에러
    #[error("데이터베이스 에러: {0}")]
    Database(String),

    /// 캐시 에러
    #[error("캐시 에러: {0}")]
    Cache(String),

    /// 직렬화 에러
    #[error("직렬화 에러: {0}")]
    Serialization(String),

    /// 잔고 부족
    #[error("잔고 부족: {0}")]
    InsufficientFunds(String),

    /// 잘못된 입력
    #[error("잘못된 입력: {0}")]
    InvalidInput(String),

    /// 찾을 수 없음
    #[error("찾을 수 없음: {0}")]
    NotFound(String),

    /// 내부 에러
    #[error("내부 에러: {0}")]
    Internal(String),
}

/// 트레이딩 작업을 위한 Result 타입.
pub type KquantResult<T> = Result<T, KquantError>;

impl KquantError {
    /// 재시도 가능한 에러인지 확인합니다.
    ///
    /// 일시적 외부 장애(네트워크, 한도 초과)만 재시도 대상입니다.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            KquantError::Network(_) | KquantError::RateLimit(_) | KquantError::Cache(_)
        )
    }

    /// 치명적인 에러인지 확인합니다.
    ///
    /// 설정 에러와 불변식 위반은 해당 작업을 계속할 수 없습니다.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            KquantError::Config(_) | KquantError::Invariant(_) | KquantError::InsufficientFunds(_)
        )
    }

    /// 해당 종목만 건너뛰고 계속 진행해도 되는 에러인지 확인합니다.
    pub fn is_skippable(&self) -> bool {
        matches!(
            self,
            KquantError::DataQuality(_) | KquantError::NotFound(_)
        )
    }
}

impl From<serde_json::Error> for KquantError {
    fn from(err: serde_json::Error) -> Self {
        KquantError::Serialization(err.to_string())
    }
}
