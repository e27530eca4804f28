//! 작업 트리거 모델.
//!
//! 발화 시각 계산은 KST 벽시계(naive datetime) 위의 순수 함수입니다.
//! 스케줄러 루프는 이 계산 결과만 소비하므로, 발화/미스파이어 규칙을
//! 런타임 시계 없이 그대로 검증할 수 있습니다.

use chrono::{Datelike, Duration, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

/// 인터벌 트리거의 실행 창 (KST).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SessionWindow {
    /// 창 시작 시각
    pub start: NaiveTime,
    /// 창 종료 시각 (포함)
    pub end: NaiveTime,
}

impl SessionWindow {
    /// KRX 정규장 창 (09:00–15:30).
    pub fn market_hours() -> Self {
        Self {
            start: NaiveTime::from_hms_opt(9, 0, 0).expect("valid time"),
            end: NaiveTime::from_hms_opt(15, 30, 0).expect("valid time"),
        }
    }

    fn contains(&self, t: NaiveTime) -> bool {
        self.start <= t && t <= self.end
    }
}

/// 작업 트리거.
#[derive(Debug, Clone)]
pub enum Trigger {
    /// 매일 지정 시각 (평일만)
    DailyAt {
        /// 시 (KST)
        hour: u32,
        /// 분
        minute: u32,
    },
    /// 고정 간격. 창이 있으면 창 안에서만, 캘린더 게이트는 실행 시점에
    /// 별도로 적용됩니다.
    Interval {
        /// 발화 간격
        every: Duration,
        /// 실행 창 (없으면 종일)
        window: Option<SessionWindow>,
    },
}

impl Trigger {
    /// `after` 이후의 다음 발화 시각을 계산합니다 (엄격히 이후).
    ///
    /// 인터벌 트리거는 하루의 기준점(창 시작 또는 자정)에 정렬된 격자에서
    /// 발화합니다. 예: 30분 간격은 :00/:30에, 09:00 창의 15분 간격은
    /// 09:00, 09:15, ...에 발화합니다.
    pub fn next_fire_after(&self, after: NaiveDateTime) -> NaiveDateTime {
        match self {
            Trigger::DailyAt { hour, minute } => {
                let fire_time = NaiveTime::from_hms_opt(*hour, *minute, 0).expect("valid time");
                let mut date = after.date();
                if after.time() >= fire_time {
                    date += Duration::days(1);
                }
                while is_weekend(date.weekday()) {
                    date += Duration::days(1);
                }
                date.and_time(fire_time)
            }
            Trigger::Interval { every, window } => {
                let every_secs = every.num_seconds().max(1);
                match window {
                    None => {
                        // 자정 정렬 격자
                        let midnight = after.date().and_time(NaiveTime::MIN);
                        let elapsed = (after - midnight).num_seconds();
                        let next_offset = (elapsed / every_secs + 1) * every_secs;
                        midnight + Duration::seconds(next_offset)
                    }
                    Some(window) => {
                        let mut date = after.date();
                        loop {
                            if !is_weekend(date.weekday()) {
                                let anchor = date.and_time(window.start);
                                let candidate = if after < anchor {
                                    anchor
                                } else {
                                    let elapsed = (after - anchor).num_seconds();
                                    anchor
                                        + Duration::seconds(
                                            (elapsed / every_secs + 1) * every_secs,
                                        )
                                };
                                if candidate.date() == date && window.contains(candidate.time()) {
                                    return candidate;
                                }
                            }
                            date += Duration::days(1);
                        }
                    }
                }
            }
        }
    }
}

fn is_weekend(weekday: Weekday) -> bool {
    weekday == Weekday::Sat || weekday == Weekday::Sun
}

/// 미스파이어 판정.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MisfireDecision {
    /// 정시 또는 유예 내: 실행
    Run,
    /// 유예 초과: 폐기
    Drop,
}

/// 예정 발화 시각과 현재 시각으로 미스파이어를 판정합니다.
pub fn misfire_decision(
    scheduled: NaiveDateTime,
    now: NaiveDateTime,
    grace: Duration,
) -> MisfireDecision {
    if now - scheduled <= grace {
        MisfireDecision::Run
    } else {
        MisfireDecision::Drop
    }
}

/// 작업 선언.
#[derive(Debug, Clone)]
pub struct JobSpec {
    /// 작업 ID
    pub id: &'static str,
    /// 표시 이름
    pub name: String,
    /// 트리거
    pub trigger: Trigger,
    /// 미스파이어 유예 시간
    pub grace: Duration,
    /// 다운타임 중 쌓인 발화 병합 여부
    pub coalesce: bool,
    /// 캘린더 게이트 (개장 시간에만 실행)
    pub calendar_gated: bool,
}

impl JobSpec {
    /// 기본값(유예 5분, coalesce, 게이트 없음)으로 작업을 선언합니다.
    pub fn new(id: &'static str, name: impl Into<String>, trigger: Trigger) -> Self {
        Self {
            id,
            name: name.into(),
            trigger,
            grace: Duration::minutes(5),
            coalesce: true,
            calendar_gated: false,
        }
    }

    /// 캘린더 게이트를 설정합니다.
    pub fn gated_by_calendar(mut self) -> Self {
        self.calendar_gated = true;
        self
    }

    /// 유예 시간을 설정합니다.
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }
}
