//! 포지션 및 포트폴리오 리스크 지표.

use crate::domain::order::Side;
use crate::error::{KquantError, KquantResult};
use crate::types::{pct_to_ratio, Amount, DecimalExt, Percent, Price, Shares, Ticker};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// (사용자, 종목) 단위의 보유 포지션.
///
/// 불변식:
/// - quantity > 0이면 avg_price > 0
/// - trailing_stop_price는 보유 중 단조 비감소
/// - highest_price_since_purchase ≥ avg_price (갱신 이후)
///
/// 첫 매수에서 생성되고, 체결/모니터 틱마다 수정되며, 전량 청산 시
/// 삭제되지 않고 보관(archive)되어 실현 손익이 유지됩니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    /// 사용자 ID
    pub user_id: String,
    /// 종목 코드
    pub ticker: Ticker,
    /// 보유 수량
    pub quantity: Shares,
    /// 평균 매수 단가
    pub avg_price: Price,
    /// 현재가
    pub current_price: Price,
    /// 평가 금액
    pub current_value: Amount,
    /// 투자 원금
    pub invested_amount: Amount,
    /// 실현 손익
    pub realized_pnl: Amount,
    /// 미실현 손익
    pub unrealized_pnl: Amount,
    /// 미실현 손익률 (%)
    pub unrealized_pnl_pct: Percent,
    /// 손절 가격
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_loss_price: Option<Price>,
    /// 손절 비율 (%)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_loss_pct: Option<Percent>,
    /// 익절 가격
    #[serde(skip_serializing_if = "Option::is_none")]
    pub take_profit_price: Option<Price>,
    /// 익절 비율 (%)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub take_profit_pct: Option<Percent>,
    /// 기술 지표 기반 익절 사용 여부
    pub take_profit_use_technical: bool,
    /// 트레일링 스톱 사용 여부
    pub trailing_stop_enabled: bool,
    /// 트레일링 스톱 거리 (%)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trailing_stop_distance_pct: Option<Percent>,
    /// 트레일링 스톱 가격 (단조 비감소)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trailing_stop_price: Option<Price>,
    /// 매수 이후 최고가
    #[serde(skip_serializing_if = "Option::is_none")]
    pub highest_price_since_purchase: Option<Price>,
    /// 최초 매수 시각
    pub first_purchase_at: DateTime<Utc>,
    /// 마지막 거래 시각
    pub last_transaction_at: DateTime<Utc>,
    /// 보관(전량 청산) 시각
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<DateTime<Utc>>,
}

impl Position {
    /// 첫 매수 체결로 새 포지션을 생성합니다.
    pub fn open(
        user_id: impl Into<String>,
        ticker: Ticker,
        quantity: Shares,
        price: Price,
    ) -> KquantResult<Self> {
        if quantity <= 0 {
            return Err(KquantError::InvalidInput(format!(
                "position quantity must be positive: {}",
                quantity
            )));
        }
        if price <= Decimal::ZERO {
            return Err(KquantError::InvalidInput(format!(
                "position price must be positive: {}",
                price
            )));
        }
        let now = Utc::now();
        let value = price * Decimal::from(quantity);
        Ok(Self {
            user_id: user_id.into(),
            ticker,
            quantity,
            avg_price: price,
            current_price: price,
            current_value: value,
            invested_amount: value,
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            unrealized_pnl_pct: Decimal::ZERO,
            stop_loss_price: None,
            stop_loss_pct: None,
            take_profit_price: None,
            take_profit_pct: None,
            take_profit_use_technical: false,
            trailing_stop_enabled: false,
            trailing_stop_distance_pct: None,
            trailing_stop_price: None,
            highest_price_since_purchase: None,
            first_purchase_at: now,
            last_transaction_at: now,
            archived_at: None,
        })
    }

    /// 포지션이 열려 있는지 확인합니다.
    pub fn is_open(&self) -> bool {
        self.quantity > 0 && self.archived_at.is_none()
    }

    /// 매수 체결을 반영합니다 (평균 단가 재계산).
    pub fn apply_buy(&mut self, quantity: Shares, price: Price) -> KquantResult<()> {
        if quantity <= 0 {
            return Err(KquantError::InvalidInput(
                "buy quantity must be positive".to_string(),
            ));
        }
        let old_qty = Decimal::from(self.quantity);
        let new_qty = Decimal::from(quantity);
        let total = self.avg_price * old_qty + price * new_qty;
        self.quantity += quantity;
        self.avg_price = (total / Decimal::from(self.quantity)).round_price();
        self.invested_amount = self.avg_price * Decimal::from(self.quantity);
        self.last_transaction_at = Utc::now();
        self.update_price(price);
        Ok(())
    }

    /// 매도 체결을 반영하고 실현 손익을 반환합니다.
    ///
    /// 평균 단가는 변경하지 않습니다. realized = (체결가 − 평단) × 수량 − 비용.
    pub fn apply_sell(&mut self, quantity: Shares, price: Price, fees: Amount) -> KquantResult<Amount> {
        if quantity <= 0 || quantity > self.quantity {
            return Err(KquantError::InvalidInput(format!(
                "invalid sell quantity {} (held: {})",
                quantity, self.quantity
            )));
        }
        let pnl = (price - self.avg_price) * Decimal::from(quantity) - fees;
        self.quantity -= quantity;
        self.realized_pnl += pnl;
        self.invested_amount = self.avg_price * Decimal::from(self.quantity);
        self.last_transaction_at = Utc::now();
        if self.quantity == 0 {
            // 전량 청산: 실현 손익을 보존한 채 보관
            self.archived_at = Some(Utc::now());
            self.unrealized_pnl = Decimal::ZERO;
            self.unrealized_pnl_pct = Decimal::ZERO;
            self.current_value = Decimal::ZERO;
        } else {
            self.update_price(price);
        }
        Ok(pnl)
    }

    /// 현재가를 갱신하고 평가 지표를 재계산합니다.
    pub fn update_price(&mut self, price: Price) {
        self.current_price = price;
        self.current_value = price * Decimal::from(self.quantity);
        self.unrealized_pnl = (price - self.avg_price) * Decimal::from(self.quantity);
        self.unrealized_pnl_pct = if self.avg_price.is_zero() {
            Decimal::ZERO
        } else {
            ((price - self.avg_price) / self.avg_price * Decimal::from(100)).round_percent()
        };
    }

    /// 손절/익절/트레일링 스톱 한도를 초기화합니다.
    ///
    /// 손절가와 익절가는 평균 단가 기준이며, 최고가는 평단으로,
    /// 트레일링 스톱 가격은 `평단 × (1 − 거리%)`로 시드됩니다.
    pub fn initialize_limits(
        &mut self,
        stop_loss_pct: Percent,
        take_profit_pct: Percent,
        trailing_enabled: bool,
        trailing_distance_pct: Percent,
    ) {
        let one = Decimal::ONE;
        self.stop_loss_price = Some((self.avg_price * (one - pct_to_ratio(stop_loss_pct))).round_price());
        self.stop_loss_pct = Some(stop_loss_pct);
        self.take_profit_price =
            Some((self.avg_price * (one + pct_to_ratio(take_profit_pct))).round_price());
        self.take_profit_pct = Some(take_profit_pct);
        self.trailing_stop_enabled = trailing_enabled;
        self.trailing_stop_distance_pct = Some(trailing_distance_pct);
        self.highest_price_since_purchase = Some(self.avg_price);
        self.trailing_stop_price =
            Some((self.avg_price * (one - pct_to_ratio(trailing_distance_pct))).round_price());
    }

    /// 최신 가격으로 트레일링 스톱을 갱신합니다.
    ///
    /// 최고가가 경신된 경우에만 트레일링 스톱이 위로 이동하며, 절대 내려가지
    /// 않습니다. 스톱 가격이 바뀌었으면 `true`를 반환합니다.
    pub fn update_trailing(&mut self, last_price: Price) -> KquantResult<bool> {
        if !self.trailing_stop_enabled || !self.is_open() {
            return Ok(false);
        }
        let distance = self
            .trailing_stop_distance_pct
            .ok_or_else(|| KquantError::Invariant("trailing enabled without distance".to_string()))?;

        let highest = self.highest_price_since_purchase.unwrap_or(self.avg_price);
        if last_price <= highest {
            return Ok(false);
        }

        self.highest_price_since_purchase = Some(last_price);
        let candidate = (last_price * (Decimal::ONE - pct_to_ratio(distance))).round_price();
        let old = self.trailing_stop_price.unwrap_or(Decimal::ZERO);
        if candidate > old {
            self.trailing_stop_price = Some(candidate);
            return Ok(true);
        }
        Ok(false)
    }
}

/// 포트폴리오 리스크 지표.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskMetrics {
    /// 사용자 ID
    pub user_id: String,
    /// 총 평가 금액 (현금 + 포지션)
    pub total_value: Amount,
    /// 현금 잔고
    pub cash_balance: Amount,
    /// 투자 원금 합계
    pub invested_amount: Amount,
    /// 최고 평가 금액 (실행 중 단조 비감소)
    pub peak_value: Amount,
    /// 초기 자본
    pub initial_capital: Amount,
    /// 실현 손익
    pub realized_pnl: Amount,
    /// 미실현 손익
    pub unrealized_pnl: Amount,
    /// 일일 손익
    pub daily_pnl: Amount,
    /// 현재 낙폭 (%)
    pub current_drawdown: Percent,
    /// 최대 낙폭 (%)
    pub max_drawdown: Percent,
    /// 낙폭 지속 일수
    pub drawdown_duration_days: i64,
    /// 보유 포지션 수
    pub position_count: usize,
    /// 최대 단일 포지션 비중 (%)
    pub largest_position_pct: Percent,
    /// 초기 자본 대비 총 손실 (%)
    pub total_loss_from_initial_pct: Percent,
    /// 거래 정지 여부
    pub trading_halted: bool,
    /// 정지 사유
    #[serde(skip_serializing_if = "Option::is_none")]
    pub halt_reason: Option<String>,
    /// 정지 시작 시각
    #[serde(skip_serializing_if = "Option::is_none")]
    pub halt_started_at: Option<DateTime<Utc>>,
    /// 산출 시각
    pub computed_at: DateTime<Utc>,
}

impl RiskMetrics {
    /// 초기 자본으로 빈 지표를 생성합니다.
    pub fn initial(user_id: impl Into<String>, initial_capital: Amount) -> Self {
        Self {
            user_id: user_id.into(),
            total_value: initial_capital,
            cash_balance: initial_capital,
            invested_amount: Decimal::ZERO,
            peak_value: initial_capital,
            initial_capital,
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            daily_pnl: Decimal::ZERO,
            current_drawdown: Decimal::ZERO,
            max_drawdown: Decimal::ZERO,
            drawdown_duration_days: 0,
            position_count: 0,
            largest_position_pct: Decimal::ZERO,
            total_loss_from_initial_pct: Decimal::ZERO,
            trading_halted: false,
            halt_reason: None,
            halt_started_at: None,
            computed_at: Utc::now(),
        }
    }
}

/// 체결 정보 (포트폴리오 저장소 입력).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    /// 주문 ID (멱등성 키)
    pub order_id: String,
    /// 종목 코드
    pub ticker: Ticker,
    /// 매매 방향
    pub side: Side,
    /// 체결 수량
    pub quantity: Shares,
    /// 체결 가격
    pub price: Price,
    /// 수수료
    pub commission: Amount,
    /// 세금
    pub tax: Amount,
    /// 체결 시각
    pub executed_at: DateTime<Utc>,
}

impl Fill {
    /// 체결 비용 합계를 반환합니다.
    pub fn total_fees(&self) -> Amount {
        self.commission + self.tax
    }

    /// 체결 금액(수수료 제외)을 반환합니다.
    pub fn gross_amount(&self) -> Amount {
        self.price * Decimal::from(self.quantity)
    }
}
