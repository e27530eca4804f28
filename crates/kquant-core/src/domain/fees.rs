//! KRX 수수료/세금 계산기.
//!
//! 수수료율 카탈로그는 코드가 아닌 데이터입니다. 시장별 기본값:
//!
//! | 시장 | 위탁 수수료 (양방향) | 거래세 (매도) | 농특세 (거래세 대비, 매도) |
//! |---|---|---|---|
//! | KOSPI/KOSDAQ | 0.015% | 0.23% | 15% |
//! | KONEX | 0.015% | 0.10% | 15% |
//!
//! 모든 비용 구성 요소는 원 단위로 반올림(0.5 올림)합니다.

use crate::domain::market::Market;
use crate::types::{Amount, DecimalExt, Percent, Price, Shares};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// 시장별 수수료 구조.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeStructure {
    /// 위탁 수수료율 (%, 양방향)
    pub commission_rate: Percent,
    /// 최소 수수료 (KRW)
    pub min_commission: Amount,
    /// 증권거래세율 (%, 매도만)
    pub transaction_tax_rate: Percent,
    /// 농어촌특별세율 (거래세 대비 %, 매도만)
    pub agri_fish_tax_rate: Percent,
}

impl FeeStructure {
    /// 시장별 표준 수수료 구조를 반환합니다.
    pub fn standard(market: Market) -> Self {
        match market {
            Market::Kospi | Market::Kosdaq => Self {
                commission_rate: dec!(0.015),
                min_commission: Decimal::ZERO,
                transaction_tax_rate: dec!(0.23),
                agri_fish_tax_rate: dec!(15),
            },
            Market::Konex => Self {
                commission_rate: dec!(0.015),
                min_commission: Decimal::ZERO,
                transaction_tax_rate: dec!(0.10),
                agri_fish_tax_rate: dec!(15),
            },
        }
    }
}

/// 거래 비용 명세.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionCosts {
    /// 수량
    pub quantity: Shares,
    /// 단가
    pub price: Price,
    /// 매수 여부
    pub is_buy: bool,
    /// 체결 금액 (수량 × 단가)
    pub gross_amount: Amount,
    /// 위탁 수수료
    pub commission: Amount,
    /// 증권거래세
    pub transaction_tax: Amount,
    /// 농어촌특별세
    pub agri_fish_tax: Amount,
}

impl TransactionCosts {
    /// 비용 합계를 반환합니다.
    pub fn total_fees(&self) -> Amount {
        self.commission + self.transaction_tax + self.agri_fish_tax
    }

    /// 비용 반영 금액을 반환합니다.
    ///
    /// 매수: 체결 금액 + 비용 (필요 현금), 매도: 체결 금액 − 비용 (수령 현금).
    pub fn net_amount(&self) -> Amount {
        if self.is_buy {
            self.gross_amount + self.total_fees()
        } else {
            self.gross_amount - self.total_fees()
        }
    }

    /// 비용 포함 유효 단가를 반환합니다.
    pub fn effective_price(&self) -> Price {
        if self.quantity == 0 {
            return Decimal::ZERO;
        }
        self.net_amount() / Decimal::from(self.quantity)
    }
}

/// 왕복 거래 비용 요약.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundTripCosts {
    /// 매수 비용
    pub buy: TransactionCosts,
    /// 매도 비용
    pub sell: TransactionCosts,
    /// 총 비용
    pub total_fees: Amount,
    /// 세전 손익
    pub gross_pnl: Amount,
    /// 비용 차감 손익
    pub net_pnl: Amount,
    /// 비용 차감 손익률 (%, 매수 필요 현금 대비)
    pub net_pnl_pct: Percent,
    /// 손익분기 매도 단가
    pub breakeven_price: Price,
}

/// 한국 시장 거래 비용 계산기.
///
/// 신호 생성기가 손익분기 가격 계산에 쓰는 순수 함수 계산기이며,
/// 실행기가 체결 시 동일한 수치를 적용합니다.
#[derive(Debug, Clone)]
pub struct CommissionCalculator {
    fees: FeeStructure,
}

impl CommissionCalculator {
    /// 시장 표준 수수료로 계산기를 생성합니다.
    pub fn for_market(market: Market) -> Self {
        Self {
            fees: FeeStructure::standard(market),
        }
    }

    /// 사용자 정의 수수료 구조로 생성합니다.
    pub fn with_fees(fees: FeeStructure) -> Self {
        Self { fees }
    }

    /// 수수료 구조를 반환합니다.
    pub fn fees(&self) -> &FeeStructure {
        &self.fees
    }

    /// 매수 비용을 계산합니다. 매수에는 거래세가 없습니다.
    pub fn buy_costs(&self, quantity: Shares, price: Price) -> TransactionCosts {
        let gross = price * Decimal::from(quantity);
        TransactionCosts {
            quantity,
            price,
            is_buy: true,
            gross_amount: gross,
            commission: self.commission(gross),
            transaction_tax: Decimal::ZERO,
            agri_fish_tax: Decimal::ZERO,
        }
    }

    /// 매도 비용을 계산합니다.
    pub fn sell_costs(&self, quantity: Shares, price: Price) -> TransactionCosts {
        let gross = price * Decimal::from(quantity);
        let transaction_tax =
            (gross * self.fees.transaction_tax_rate / Decimal::from(100)).round_krw();
        let agri_fish_tax =
            (transaction_tax * self.fees.agri_fish_tax_rate / Decimal::from(100)).round_krw();
        TransactionCosts {
            quantity,
            price,
            is_buy: false,
            gross_amount: gross,
            commission: self.commission(gross),
            transaction_tax,
            agri_fish_tax,
        }
    }

    /// 왕복(매수 후 매도) 비용과 손익을 계산합니다.
    pub fn round_trip(&self, quantity: Shares, buy_price: Price, sell_price: Price) -> RoundTripCosts {
        let buy = self.buy_costs(quantity, buy_price);
        let sell = self.sell_costs(quantity, sell_price);
        let total_fees = buy.total_fees() + sell.total_fees();
        let gross_pnl = (sell_price - buy_price) * Decimal::from(quantity);
        let net_pnl = gross_pnl - total_fees;
        let buy_net = buy.net_amount();
        let net_pnl_pct = if buy_net > Decimal::ZERO {
            (net_pnl / buy_net * Decimal::from(100)).round_percent()
        } else {
            Decimal::ZERO
        };

        RoundTripCosts {
            total_fees,
            gross_pnl,
            net_pnl,
            net_pnl_pct,
            breakeven_price: self.breakeven_price(buy_price),
            buy,
            sell,
        }
    }

    /// 비용을 감안한 손익분기 매도 단가를 계산합니다.
    ///
    /// breakeven = 매수가 × (1 + 매수비율) / (1 − 매도비율)
    pub fn breakeven_price(&self, buy_price: Price) -> Price {
        let hundred = Decimal::from(100);
        let buy_pct = self.fees.commission_rate / hundred;
        let sell_commission_pct = self.fees.commission_rate / hundred;
        let sell_tax_pct = self.fees.transaction_tax_rate / hundred;
        let sell_agri_pct = sell_tax_pct * self.fees.agri_fish_tax_rate / hundred;
        let sell_total_pct = sell_commission_pct + sell_tax_pct + sell_agri_pct;

        (buy_price * (Decimal::ONE + buy_pct) / (Decimal::ONE - sell_total_pct)).round_price()
    }

    /// 가용 현금으로 살 수 있는 최대 수량을 계산합니다 (비용 포함).
    pub fn max_shares_for_cash(&self, available_cash: Amount, price: Price) -> Shares {
        if price <= Decimal::ZERO {
            return 0;
        }
        // 수수료를 근사 반영한 상한에서 시작해 실제 비용으로 보정
        let commission_ratio = self.fees.commission_rate / Decimal::from(100);
        let effective = price * (Decimal::ONE + commission_ratio);
        let mut shares = (available_cash / effective).trunc().to_i64().unwrap_or(0);

        while shares > 0 {
            let costs = self.buy_costs(shares, price);
            if costs.net_amount() <= available_cash {
                break;
            }
            shares -= 1;
        }
        shares.max(0)
    }

    fn commission(&self, gross: Amount) -> Amount {
        let commission = (gross * self.fees.commission_rate / Decimal::from(100)).round_krw();
        commission.max(self.fees.min_commission)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kospi_buy_costs() {
        let calc = CommissionCalculator::for_market(Market::Kospi);
        let costs = calc.buy_costs(10, dec!(70000));

        assert_eq!(costs.gross_amount, dec!(700000));
        assert_eq!(costs.commission, dec!(105));
        assert_eq!(costs.transaction_tax, Decimal::ZERO);
        assert_eq!(costs.net_amount(), dec!(700105));
    }

    #[test]
    fn test_kospi_sell_costs() {
        let calc = CommissionCalculator::for_market(Market::Kospi);
        let costs = calc.sell_costs(10, dec!(75000));

        assert_eq!(costs.commission, dec!(113)); // 112.5 → 113
        assert_eq!(costs.transaction_tax, dec!(1725));
        assert_eq!(costs.agri_fish_tax, dec!(259)); // 258.75 → 259
        assert_eq!(costs.total_fees(), dec!(2097));
    }

    #[test]
    fn test_round_trip_net_pnl() {
        // 매수 10주 @70,000 / 매도 10주 @75,000 (KOSPI)
        let calc = CommissionCalculator::for_market(Market::Kospi);
        let rt = calc.round_trip(10, dec!(70000), dec!(75000));

        assert_eq!(rt.buy.commission, dec!(105));
        assert_eq!(rt.sell.commission, dec!(113));
        assert_eq!(rt.sell.transaction_tax, dec!(1725));
        assert_eq!(rt.sell.agri_fish_tax, dec!(259));
        assert_eq!(rt.total_fees, dec!(2202));
        assert_eq!(rt.gross_pnl, dec!(50000));
        assert_eq!(rt.net_pnl, dec!(47798));
        assert_eq!(rt.net_pnl_pct, dec!(6.8273));
    }

    #[test]
    fn test_round_trip_law_same_price() {
        // 같은 가격으로 사고 팔면 순손익 = -왕복 비용
        let calc = CommissionCalculator::for_market(Market::Kospi);
        let rt = calc.round_trip(10, dec!(70000), dec!(70000));
        assert_eq!(rt.gross_pnl, Decimal::ZERO);
        assert_eq!(rt.net_pnl, -rt.total_fees);
    }

    #[test]
    fn test_konex_lower_tax() {
        let kospi = CommissionCalculator::for_market(Market::Kospi);
        let konex = CommissionCalculator::for_market(Market::Konex);

        let kospi_sell = kospi.sell_costs(100, dec!(10000));
        let konex_sell = konex.sell_costs(100, dec!(10000));

        assert_eq!(kospi_sell.transaction_tax, dec!(2300)); // 0.23%
        assert_eq!(konex_sell.transaction_tax, dec!(1000)); // 0.10%
        assert!(konex_sell.total_fees() < kospi_sell.total_fees());
    }

    #[test]
    fn test_breakeven_above_buy_price() {
        let calc = CommissionCalculator::for_market(Market::Kospi);
        let breakeven = calc.breakeven_price(dec!(70000));
        assert!(breakeven > dec!(70000));
        // 손익분기 가격으로 팔면 손익이 음수가 아니어야 함 (반올림 여유)
        let rt = calc.round_trip(100, dec!(70000), breakeven);
        assert!(rt.net_pnl.abs() < dec!(500));
    }

    #[test]
    fn test_max_shares_for_cash() {
        let calc = CommissionCalculator::for_market(Market::Kospi);
        let shares = calc.max_shares_for_cash(dec!(10000000), dec!(70000));

        // 10,000,000 / 70,000 = 142.8 → 비용 포함 142주
        assert_eq!(shares, 142);
        let costs = calc.buy_costs(shares, dec!(70000));
        assert!(costs.net_amount() <= dec!(10000000));

        // 한 주 더 사면 현금 초과
        let over = calc.buy_costs(shares + 1, dec!(70000));
        assert!(over.net_amount() > dec!(10000000));
    }
}
