//! # KQuant API
//!
//! 리스크 매니저 HTTP 서비스. 모든 서비스가 공유하는 표면을 노출합니다:
//! - `GET /health` — 상태 + db/redis 체크
//! - `GET /metrics` — Prometheus 텍스트
//!
//! 도메인 엔드포인트:
//! - `POST /portfolio/{user}/monitor`
//! - `PUT /portfolio/{user}/positions/{ticker}/limits`
//! - `POST /position-size/calculate`
//! - `GET /portfolio/{user}/is-trading-allowed`
//! - `POST /portfolio/{user}/resume-trading`

pub mod error;
pub mod metrics;
pub mod routes;
pub mod state;

pub use state::AppState;

use axum::routing::{get, post, put};
use axum::Router;
use std::sync::Arc;

/// 전체 라우터를 구성합니다.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/metrics", get(routes::metrics_endpoint))
        .route(
            "/portfolio/:user/monitor",
            post(routes::portfolio::monitor),
        )
        .route(
            "/portfolio/:user/positions/:ticker/limits",
            put(routes::portfolio::set_limits),
        )
        .route(
            "/portfolio/:user/is-trading-allowed",
            get(routes::portfolio::is_trading_allowed),
        )
        .route(
            "/portfolio/:user/resume-trading",
            post(routes::portfolio::resume_trading),
        )
        .route(
            "/position-size/calculate",
            post(routes::sizing::calculate),
        )
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}
