//! 포지션 사이징 엔드포인트.

use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::State;
use axum::Json;
use kquant_core::{Amount, Percent, Price};
use kquant_risk::{HistoricalStats, SizingMethod, SizingRequest, SizingResult};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// POST /position-size/calculate 요청.
#[derive(Debug, Serialize, Deserialize)]
pub struct CalculateRequest {
    /// 포트폴리오 평가 금액
    pub portfolio_value: Amount,
    /// 진입 가격
    pub entry_price: Price,
    /// 손절 가격
    pub stop_loss_price: Price,
    /// 사이징 방법 (기본 half Kelly)
    #[serde(default)]
    pub method: SizingMethod,
    /// 가용 현금
    #[serde(default)]
    pub cash_available: Option<Amount>,
    /// 확신 점수 [0,100]
    #[serde(default)]
    pub conviction: Option<Decimal>,
    /// 승률 (0~1, Kelly 입력)
    #[serde(default)]
    pub win_rate: Option<Decimal>,
    /// 평균 수익률 (%, Kelly 입력)
    #[serde(default)]
    pub avg_win_pct: Option<Percent>,
    /// 평균 손실률 (%, Kelly 입력)
    #[serde(default)]
    pub avg_loss_pct: Option<Percent>,
    /// 30일 연환산 변동성 (%)
    #[serde(default)]
    pub volatility_pct: Option<Percent>,
}

/// POST /position-size/calculate
pub async fn calculate(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CalculateRequest>,
) -> Result<Json<SizingResult>, ApiError> {
    let stats = match (request.win_rate, request.avg_win_pct, request.avg_loss_pct) {
        (Some(win_rate), Some(avg_win_pct), Some(avg_loss_pct)) => Some(HistoricalStats {
            win_rate,
            avg_win_pct,
            avg_loss_pct,
            profit_factor: if avg_loss_pct > Decimal::ZERO {
                avg_win_pct / avg_loss_pct
            } else {
                Decimal::ONE
            },
            total_trades: 0,
        }),
        _ => None,
    };

    let result = state.sizer.calculate(&SizingRequest {
        portfolio_value: request.portfolio_value,
        entry_price: request.entry_price,
        stop_loss_price: request.stop_loss_price,
        method: request.method,
        cash_available: request.cash_available,
        conviction: request.conviction,
        stats,
        volatility_pct: request.volatility_pct,
    })?;

    Ok(Json(result))
}
