//! # KQuant Calendar
//!
//! KRX(한국거래소) 시장 캘린더.
//!
//! 정규장은 평일 09:00–15:30 KST입니다. 휴장일 목록은 코드가 아닌
//! 데이터이며, 재컴파일 없이 `register_closure`로 추가 휴장일(선거일,
//! 연말 휴장 등)을 등록할 수 있습니다. KST는 UTC+9 고정이고 서머타임이
//! 없으므로 모든 비교는 고정 오프셋 벽시계로 수행합니다.

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use std::collections::BTreeSet;

mod holidays;

pub use holidays::default_holidays;

/// KST 고정 오프셋 (UTC+9).
pub fn kst() -> FixedOffset {
    FixedOffset::east_opt(9 * 3600).expect("valid KST offset")
}

/// UTC 시각을 KST로 투영합니다.
pub fn to_kst(t: DateTime<Utc>) -> DateTime<FixedOffset> {
    t.with_timezone(&kst())
}

/// 장 시작 시각 (KST).
pub fn market_open() -> NaiveTime {
    NaiveTime::from_hms_opt(9, 0, 0).expect("valid open time")
}

/// 장 마감 시각 (KST).
pub fn market_close() -> NaiveTime {
    NaiveTime::from_hms_opt(15, 30, 0).expect("valid close time")
}

/// 시장 상태.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketStatus {
    /// 거래 가능
    Open,
    /// 휴장 (휴일 또는 거래 시간 외)
    Closed,
}

impl std::fmt::Display for MarketStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MarketStatus::Open => write!(f, "Open"),
            MarketStatus::Closed => write!(f, "Closed"),
        }
    }
}

/// KRX 시장 캘린더.
///
/// 휴장일 집합과 09:00–15:30 세션 창으로 `is_open` / `next_open` /
/// `next_close`에 답합니다.
#[derive(Debug, Clone)]
pub struct KrxCalendar {
    holidays: BTreeSet<NaiveDate>,
}

impl Default for KrxCalendar {
    fn default() -> Self {
        Self::with_default_holidays()
    }
}

impl KrxCalendar {
    /// 내장 휴장일 테이블(2024–2026)로 캘린더를 생성합니다.
    ///
    /// 일요일과 겹치는 공휴일에는 대체공휴일 규칙이 적용됩니다.
    pub fn with_default_holidays() -> Self {
        let mut cal = Self {
            holidays: default_holidays(),
        };
        cal.apply_substitute_rule();
        cal
    }

    /// 빈 휴장일 테이블(주말만 휴장)로 생성합니다. 테스트용.
    pub fn weekends_only() -> Self {
        Self {
            holidays: BTreeSet::new(),
        }
    }

    /// 추가 휴장일을 등록합니다 (선거일, 연말 휴장 등).
    ///
    /// 등록 후 대체공휴일 규칙이 다시 적용됩니다.
    pub fn register_closure(&mut self, date: NaiveDate) {
        tracing::info!(%date, "Market closure registered");
        self.holidays.insert(date);
        self.apply_substitute_rule();
    }

    /// 일요일에 걸린 휴장일에 대해 다음 영업일(주말/기존 휴장일 제외)을
    /// 휴장 처리합니다. 연휴가 이어지면 다음 빈 평일까지 밀립니다.
    fn apply_substitute_rule(&mut self) {
        let mut substitutes = Vec::new();
        for &holiday in &self.holidays {
            if holiday.weekday() != Weekday::Sun {
                continue;
            }
            let mut candidate = holiday + Duration::days(1);
            loop {
                let is_weekend =
                    candidate.weekday() == Weekday::Sat || candidate.weekday() == Weekday::Sun;
                if !is_weekend && !self.holidays.contains(&candidate) {
                    substitutes.push(candidate);
                    break;
                }
                candidate += Duration::days(1);
            }
        }
        self.holidays.extend(substitutes);
    }

    /// 해당 날짜가 휴장일(주말 포함)인지 확인합니다.
    pub fn is_holiday(&self, date: NaiveDate) -> bool {
        if date.weekday() == Weekday::Sat || date.weekday() == Weekday::Sun {
            return true;
        }
        self.holidays.contains(&date)
    }

    /// 해당 날짜가 거래일인지 확인합니다.
    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        !self.is_holiday(date)
    }

    /// 주어진 시각에 시장이 열려 있는지 확인합니다.
    pub fn is_open(&self, at: DateTime<Utc>) -> bool {
        let local = to_kst(at);
        if self.is_holiday(local.date_naive()) {
            return false;
        }
        let t = local.time();
        market_open() <= t && t <= market_close()
    }

    /// 시장 상태를 반환합니다.
    pub fn status(&self, at: DateTime<Utc>) -> MarketStatus {
        if self.is_open(at) {
            MarketStatus::Open
        } else {
            MarketStatus::Closed
        }
    }

    /// 다음 개장 시각을 반환합니다 (엄격히 `after` 이후).
    pub fn next_open(&self, after: DateTime<Utc>) -> DateTime<Utc> {
        let local = to_kst(after);
        let mut date = local.date_naive();

        // 오늘 아직 개장 전이면 오늘 09:00
        if local.time() >= market_open() || self.is_holiday(date) {
            date += Duration::days(1);
        }
        // 연휴 대비 최대 60일 탐색
        for _ in 0..60 {
            if self.is_trading_day(date) {
                let open_local = kst()
                    .from_local_datetime(&date.and_time(market_open()))
                    .single()
                    .expect("KST has no ambiguous local times");
                return open_local.with_timezone(&Utc);
            }
            date += Duration::days(1);
        }
        unreachable!("no trading day found within 60 days");
    }

    /// 다음 폐장 시각을 반환합니다 (엄격히 `after` 이후).
    pub fn next_close(&self, after: DateTime<Utc>) -> DateTime<Utc> {
        let local = to_kst(after);
        let date = local.date_naive();

        if self.is_trading_day(date) && local.time() < market_close() {
            let close_local = kst()
                .from_local_datetime(&date.and_time(market_close()))
                .single()
                .expect("KST has no ambiguous local times");
            return close_local.with_timezone(&Utc);
        }
        // 다음 개장일의 폐장
        let open = self.next_open(after);
        let open_local = to_kst(open);
        let close_local = kst()
            .from_local_datetime(&open_local.date_naive().and_time(market_close()))
            .single()
            .expect("KST has no ambiguous local times");
        close_local.with_timezone(&Utc)
    }

    /// 두 시각 사이의 "시장 시간"을 계산합니다.
    ///
    /// 거래일의 벽시계 시간만 합산하고 주말/휴장일은 0으로 칩니다.
    /// 데이터 최신성(48 시장 시간) 판정에 사용됩니다.
    pub fn market_hours_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Duration {
        if to <= from {
            return Duration::zero();
        }
        let from_local = to_kst(from);
        let to_local = to_kst(to);

        let mut total = Duration::zero();
        let mut date = from_local.date_naive();
        let last = to_local.date_naive();

        while date <= last {
            if self.is_trading_day(date) {
                let day_start = kst()
                    .from_local_datetime(&date.and_time(NaiveTime::MIN))
                    .single()
                    .expect("KST has no ambiguous local times")
                    .with_timezone(&Utc);
                let day_end = day_start + Duration::days(1);
                let overlap_start = from.max(day_start);
                let overlap_end = to.min(day_end);
                if overlap_end > overlap_start {
                    total += overlap_end - overlap_start;
                }
            }
            date += Duration::days(1);
        }
        total
    }
}
