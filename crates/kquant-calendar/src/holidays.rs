//! KRX 휴장일 테이블 (2024–2026).
//!
//! 고정 공휴일, 음력 공휴일(설날/부처님오신날/추석), 연말 휴장일을
//! 포함합니다. 일요일과 겹치는 날의 대체공휴일은 여기 나열하지 않고
//! 캘린더가 규칙으로 파생합니다. 선거일 등 임시 휴장은
//! `KrxCalendar::register_closure`로 런타임에 등록합니다.

use chrono::NaiveDate;
use std::collections::BTreeSet;

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).expect("valid holiday date")
}

/// 내장 휴장일 목록을 반환합니다.
pub fn default_holidays() -> BTreeSet<NaiveDate> {
    let mut set = BTreeSet::new();

    for year in [2024, 2025, 2026] {
        // 고정 공휴일
        set.insert(d(year, 1, 1)); // 신정
        set.insert(d(year, 3, 1)); // 삼일절
        set.insert(d(year, 5, 1)); // 근로자의 날
        set.insert(d(year, 5, 5)); // 어린이날
        set.insert(d(year, 6, 6)); // 현충일
        set.insert(d(year, 8, 15)); // 광복절
        set.insert(d(year, 10, 3)); // 개천절
        set.insert(d(year, 10, 9)); // 한글날
        set.insert(d(year, 12, 25)); // 크리스마스
        set.insert(d(year, 12, 31)); // 연말 휴장
    }

    // 설날 연휴
    set.insert(d(2024, 2, 9));
    set.insert(d(2024, 2, 10));
    set.insert(d(2024, 2, 11));
    set.insert(d(2025, 1, 28));
    set.insert(d(2025, 1, 29));
    set.insert(d(2025, 1, 30));
    set.insert(d(2026, 2, 16));
    set.insert(d(2026, 2, 17));
    set.insert(d(2026, 2, 18));

    // 부처님오신날
    set.insert(d(2024, 5, 15));
    set.insert(d(2025, 5, 6)); // 5/5 어린이날과 겹쳐 대체 휴장
    set.insert(d(2026, 5, 24));

    // 추석 연휴
    set.insert(d(2024, 9, 16));
    set.insert(d(2024, 9, 17));
    set.insert(d(2024, 9, 18));
    set.insert(d(2025, 10, 5));
    set.insert(d(2025, 10, 6));
    set.insert(d(2025, 10, 7));
    set.insert(d(2026, 9, 24));
    set.insert(d(2026, 9, 25));
    set.insert(d(2026, 9, 26));

    // 국회의원 선거일
    set.insert(d(2024, 4, 10));

    set
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    #[test]
    fn test_table_not_empty() {
        let holidays = default_holidays();
        assert!(holidays.len() > 40);
    }

    #[test]
    fn test_chuseok_2025_in_table() {
        let holidays = default_holidays();
        assert!(holidays.contains(&d(2025, 10, 5)));
        assert!(holidays.contains(&d(2025, 10, 6)));
        assert!(holidays.contains(&d(2025, 10, 7)));
    }

    #[test]
    fn test_buddha_2026_is_sunday() {
        // 대체공휴일 규칙 검증의 전제: 2026 부처님오신날은 일요일
        assert_eq!(d(2026, 5, 24).weekday(), chrono::Weekday::Sun);
    }
}
