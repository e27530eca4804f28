//! 헬스 체크 엔드포인트.
//!
//! 로드밸런서/오케스트레이션(Kubernetes 등)에서 사용됩니다.

use crate::state::{AppState, SERVICE_NAME};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// 헬스 체크 응답.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// 전체 상태 ("healthy" | "degraded")
    pub status: String,
    /// 서비스 이름
    pub service: String,
    /// 버전
    pub version: String,
    /// 업타임 (초)
    pub uptime_secs: i64,
    /// 개별 컴포넌트 상태
    pub checks: ComponentChecks,
}

/// 개별 컴포넌트 상태.
#[derive(Debug, Serialize, Deserialize)]
pub struct ComponentChecks {
    /// 데이터베이스
    pub db: ComponentStatus,
    /// Redis
    pub redis: ComponentStatus,
}

/// 컴포넌트 상태.
#[derive(Debug, Serialize, Deserialize)]
pub struct ComponentStatus {
    /// "up" | "down" | "not_configured"
    pub status: String,
}

impl ComponentStatus {
    fn up() -> Self {
        Self {
            status: "up".to_string(),
        }
    }

    fn down() -> Self {
        Self {
            status: "down".to_string(),
        }
    }

    fn not_configured() -> Self {
        Self {
            status: "not_configured".to_string(),
        }
    }
}

/// GET /health
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut overall = "healthy";
    let mut status_code = StatusCode::OK;

    let db = if state.db_pool.is_some() {
        if state.is_db_healthy().await {
            ComponentStatus::up()
        } else {
            overall = "degraded";
            status_code = StatusCode::SERVICE_UNAVAILABLE;
            ComponentStatus::down()
        }
    } else {
        ComponentStatus::not_configured()
    };

    let redis = if state.redis.is_some() {
        if state.is_redis_healthy().await {
            ComponentStatus::up()
        } else {
            // Redis는 캐시일 뿐이므로 degraded로만 처리
            if overall == "healthy" {
                overall = "degraded";
            }
            ComponentStatus::down()
        }
    } else {
        ComponentStatus::not_configured()
    };

    let response = HealthResponse {
        status: overall.to_string(),
        service: SERVICE_NAME.to_string(),
        version: state.version.clone(),
        uptime_secs: state.uptime_secs(),
        checks: ComponentChecks { db, redis },
    };

    (status_code, Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::create_test_state;
    use axum::body::Body;
    use axum::http::Request;
    use axum::routing::get;
    use axum::Router;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_health_returns_service_identity() {
        let state = Arc::new(create_test_state());
        let app = Router::new()
            .route("/health", get(health_check))
            .with_state(state);

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let health: HealthResponse = serde_json::from_slice(&body).unwrap();

        assert_eq!(health.status, "healthy");
        assert_eq!(health.service, "risk-manager");
        assert_eq!(health.checks.db.status, "not_configured");
        assert_eq!(health.checks.redis.status, "not_configured");
    }
}
