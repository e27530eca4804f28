//! 포트폴리오 운영 엔드포인트.

use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::Json;
use kquant_core::{Percent, Ticker};
use kquant_data::PortfolioStore;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// POST /portfolio/{user}/monitor 응답.
#[derive(Debug, Serialize, Deserialize)]
pub struct MonitorResponse {
    /// 점검한 포지션 수
    pub positions_checked: usize,
    /// 청산 신호 수
    pub exit_signals: usize,
    /// 갱신된 트레일링 스톱 수
    pub trailing_stops_updated: usize,
    /// 비상 청산 발동 여부
    pub emergency_liquidation_triggered: bool,
    /// 경고
    pub warnings: Vec<String>,
}

/// POST /portfolio/{user}/monitor
///
/// 포지션 모니터 1회 스윕을 실행합니다. 청산 신호 자체는 트레이딩
/// 엔진이 처리하므로 여기서는 요약만 반환합니다.
pub async fn monitor(
    State(state): State<Arc<AppState>>,
    Path(user): Path<String>,
) -> Result<Json<MonitorResponse>, ApiError> {
    let report = state.monitor.monitor_user(&user).await?;
    crate::metrics::record_monitor_tick(report.positions_checked, report.exit_signals.len());

    Ok(Json(MonitorResponse {
        positions_checked: report.positions_checked,
        exit_signals: report.exit_signals.len(),
        trailing_stops_updated: report.trailing_stops_updated,
        emergency_liquidation_triggered: report.emergency_liquidation_triggered,
        warnings: report.warnings,
    }))
}

/// PUT /portfolio/{user}/positions/{ticker}/limits 요청.
#[derive(Debug, Serialize, Deserialize)]
pub struct LimitsRequest {
    /// 손절 비율 (%)
    pub stop_loss_pct: Percent,
    /// 익절 비율 (%)
    pub take_profit_pct: Percent,
    /// 트레일링 스톱 사용 여부
    pub trailing_stop_enabled: bool,
    /// 트레일링 스톱 거리 (%)
    pub trailing_stop_distance_pct: Percent,
}

/// PUT /portfolio/{user}/positions/{ticker}/limits
pub async fn set_limits(
    State(state): State<Arc<AppState>>,
    Path((user, ticker)): Path<(String, String)>,
    Json(request): Json<LimitsRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let ticker = Ticker::new(ticker).map_err(|e| ApiError::bad_request(e.to_string()))?;

    for (name, pct) in [
        ("stop_loss_pct", request.stop_loss_pct),
        ("take_profit_pct", request.take_profit_pct),
        ("trailing_stop_distance_pct", request.trailing_stop_distance_pct),
    ] {
        if pct <= Decimal::ZERO || pct >= Decimal::from(100) {
            return Err(ApiError::bad_request(format!(
                "{} must be in (0, 100): {}",
                name, pct
            )));
        }
    }

    let position = state
        .store
        .initialize_limits(
            &user,
            &ticker,
            request.stop_loss_pct,
            request.take_profit_pct,
            request.trailing_stop_enabled,
            request.trailing_stop_distance_pct,
        )
        .await?;

    Ok(Json(serde_json::json!({
        "ticker": position.ticker,
        "stop_loss_price": position.stop_loss_price,
        "take_profit_price": position.take_profit_price,
        "trailing_stop_price": position.trailing_stop_price,
    })))
}

/// GET /portfolio/{user}/is-trading-allowed 응답.
#[derive(Debug, Serialize, Deserialize)]
pub struct TradingAllowedResponse {
    /// 사용자 ID
    pub user_id: String,
    /// 매수 허용 여부
    pub trading_allowed: bool,
    /// 정지 사유 (정지 중일 때)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub halt_reason: Option<String>,
}

/// GET /portfolio/{user}/is-trading-allowed
pub async fn is_trading_allowed(
    State(state): State<Arc<AppState>>,
    Path(user): Path<String>,
) -> Result<Json<TradingAllowedResponse>, ApiError> {
    let halted = state.store.is_halted(&user).await?;
    let halt_reason = if halted {
        state
            .store
            .get_metrics(&user)
            .await?
            .and_then(|m| m.halt_reason)
    } else {
        None
    };

    Ok(Json(TradingAllowedResponse {
        user_id: user,
        trading_allowed: !halted,
        halt_reason,
    }))
}

/// POST /portfolio/{user}/resume-trading
///
/// 정지 해제는 명시적 운영자 조작입니다.
pub async fn resume_trading(
    State(state): State<Arc<AppState>>,
    Path(user): Path<String>,
) -> Result<Json<TradingAllowedResponse>, ApiError> {
    state.engine.resume(&user).await?;
    tracing::info!(user = %user, "Trading resumed by operator");

    Ok(Json(TradingAllowedResponse {
        user_id: user,
        trading_allowed: true,
        halt_reason: None,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::create_test_state;
    use chrono::Utc;
    use kquant_core::{Fill, Side};
    use rust_decimal_macros::dec;

    async fn seeded_state() -> Arc<AppState> {
        let state = Arc::new(create_test_state());
        state
            .store
            .open_account("user1", dec!(10000000))
            .await
            .unwrap();
        state
            .store
            .apply_fill(
                "user1",
                &Fill {
                    order_id: "SEED".to_string(),
                    ticker: Ticker::new("005930").unwrap(),
                    side: Side::Buy,
                    quantity: 10,
                    price: dec!(70000),
                    commission: Decimal::ZERO,
                    tax: Decimal::ZERO,
                    executed_at: Utc::now(),
                },
            )
            .await
            .unwrap();
        state
    }

    #[tokio::test]
    async fn test_set_limits_and_trading_allowed() {
        let state = seeded_state().await;

        let response = set_limits(
            State(state.clone()),
            Path(("user1".to_string(), "005930".to_string())),
            Json(LimitsRequest {
                stop_loss_pct: dec!(10),
                take_profit_pct: dec!(20),
                trailing_stop_enabled: true,
                trailing_stop_distance_pct: dec!(10),
            }),
        )
        .await
        .unwrap();
        assert_eq!(response.0["stop_loss_price"], "63000.00");

        let allowed = is_trading_allowed(State(state.clone()), Path("user1".to_string()))
            .await
            .unwrap();
        assert!(allowed.0.trading_allowed);
    }

    #[tokio::test]
    async fn test_invalid_limit_pct_rejected() {
        let state = seeded_state().await;
        let result = set_limits(
            State(state),
            Path(("user1".to_string(), "005930".to_string())),
            Json(LimitsRequest {
                stop_loss_pct: dec!(0),
                take_profit_pct: dec!(20),
                trailing_stop_enabled: false,
                trailing_stop_distance_pct: dec!(10),
            }),
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_resume_after_halt() {
        let state = seeded_state().await;
        state.store.set_halt("user1", "test halt").await.unwrap();

        let before = is_trading_allowed(State(state.clone()), Path("user1".to_string()))
            .await
            .unwrap();
        assert!(!before.0.trading_allowed);

        resume_trading(State(state.clone()), Path("user1".to_string()))
            .await
            .unwrap();

        let after = is_trading_allowed(State(state), Path("user1".to_string()))
            .await
            .unwrap();
        assert!(after.0.trading_allowed);
    }

    #[tokio::test]
    async fn test_invalid_ticker_rejected() {
        let state = seeded_state().await;
        let result = set_limits(
            State(state),
            Path(("user1".to_string(), "SAMSUNG".to_string())),
            Json(LimitsRequest {
                stop_loss_pct: dec!(10),
                take_profit_pct: dec!(20),
                trailing_stop_enabled: true,
                trailing_stop_distance_pct: dec!(10),
            }),
        )
        .await;
        assert!(result.is_err());
    }
}
