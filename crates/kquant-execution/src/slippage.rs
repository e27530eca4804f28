//! 모의 체결 슬리피지 모델.
//!
//! 슬리피지(bps) = 기본 bps
//!   + (주문 수량 / 평균 일 거래량) × 100 × 거래량 계수
//!   + 연환산 변동성 × 변동성 계수
//! 여기에 ±20% 균등 난수를 곱합니다. 시드를 고정하면 테스트가
//! 결정적으로 재현됩니다.
//!
//! 체결가 = 기준가 + 부호 × 기준가 × 슬리피지 bps / 10,000
//! (매수는 불리하게 위로, 매도는 아래로)

use kquant_core::{DecimalExt, ExecutionConfig, Price, Shares, Side};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// 슬리피지 모델.
#[derive(Debug)]
pub struct SlippageModel {
    /// 기본 슬리피지 (bps)
    base_bps: Decimal,
    /// 거래량 충격 계수
    volume_factor: Decimal,
    /// 변동성 충격 계수
    volatility_factor: Decimal,
    rng: StdRng,
}

impl SlippageModel {
    /// 실행 설정에서 모델을 생성합니다.
    pub fn from_config(config: &ExecutionConfig) -> Self {
        Self::new(
            config.slippage_base_bps,
            config.slippage_volume_factor,
            config.slippage_volatility_factor,
            config.slippage_seed,
        )
    }

    /// 모델을 생성합니다. `seed`가 있으면 결정적입니다.
    pub fn new(
        base_bps: Decimal,
        volume_factor: Decimal,
        volatility_factor: Decimal,
        seed: Option<u64>,
    ) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            base_bps,
            volume_factor,
            volatility_factor,
            rng,
        }
    }

    /// 슬리피지가 적용된 체결가를 계산합니다.
    pub fn execution_price(
        &mut self,
        price: Price,
        quantity: Shares,
        side: Side,
        avg_daily_volume: Option<Decimal>,
        annualized_volatility_pct: Option<Decimal>,
    ) -> Price {
        let mut bps = self.base_bps;

        if let Some(volume) = avg_daily_volume.filter(|v| *v > Decimal::ZERO) {
            bps += Decimal::from(quantity) / volume * Decimal::from(100) * self.volume_factor;
        }
        if let Some(volatility) = annualized_volatility_pct {
            bps += volatility * self.volatility_factor;
        }

        // ±20% 균등 난수
        let factor = self.rng.gen_range(0.8..=1.2);
        bps *= Decimal::from_f64(factor).unwrap_or(Decimal::ONE);

        let amount = price * bps / dec!(10000);
        let executed = match side {
            Side::Buy => price + amount,
            Side::Sell => price - amount,
        };
        executed.round_price()
    }
}
