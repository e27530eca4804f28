//! 스케줄러 실행 루프.
//!
//! 제어 루프는 단일 태스크입니다. 작업 실행만 바운디드 워커 풀
//! (세마포어)로 나가고, 작업별 `max_instances = 1`이 적용됩니다.

use crate::job::{misfire_decision, JobSpec, MisfireDecision};
use chrono::{NaiveDateTime, Utc};
use kquant_calendar::{to_kst, KrxCalendar};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 스테이지 실행 에러.
#[derive(Debug, Error)]
pub enum StageError {
    /// 일시적 외부 장애 (재시도 대상)
    #[error("Transient failure: {0}")]
    Transient(String),

    /// 데이터 없음/오래됨 (이번 발화는 건너뜀)
    #[error("Data unavailable: {0}")]
    DataUnavailable(String),

    /// 스테이지 내부 실패 (해당 스테이지에 국한)
    #[error("Stage failed: {0}")]
    Failed(String),

    /// 취소됨
    #[error("Cancelled")]
    Cancelled,
}

impl From<kquant_core::KquantError> for StageError {
    fn from(err: kquant_core::KquantError) -> Self {
        if err.is_retryable() {
            StageError::Transient(err.to_string())
        } else {
            StageError::Failed(err.to_string())
        }
    }
}

/// 작업 실행 컨텍스트.
#[derive(Clone)]
pub struct JobContext {
    /// 협조적 취소 토큰. 스테이지는 자연스러운 안전 지점(종목 단위,
    /// 포지션 단위)마다 이 토큰을 확인해야 합니다.
    pub cancel: CancellationToken,
    /// 발화 시각
    pub fired_at: chrono::DateTime<Utc>,
}

impl JobContext {
    /// 취소 여부를 확인합니다 (안전 지점용).
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// 작업 실행기.
#[async_trait::async_trait]
pub trait JobRunner: Send + Sync {
    /// 작업을 실행합니다.
    async fn run(&self, ctx: JobContext) -> Result<(), StageError>;
}

/// 작업 상태 (운영 조회용).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    /// 작업 ID
    pub id: String,
    /// 표시 이름
    pub name: String,
    /// 다음 발화 시각 (KST)
    pub next_fire_kst: NaiveDateTime,
    /// 실행 중 여부
    pub in_flight: bool,
}

struct ScheduledJob {
    spec: JobSpec,
    runner: Arc<dyn JobRunner>,
    /// 다음 발화 시각. 관리 핸들이 루프 실행 중에도 읽을 수 있도록
    /// 공유 상태로 둔다.
    next_fire: Arc<RwLock<NaiveDateTime>>,
    in_flight: Arc<AtomicBool>,
}

/// 실행 중인 스케줄러를 조회/조작하는 핸들.
///
/// 데몬의 관리 HTTP 표면이 사용합니다. 루프와 상태를 공유하므로
/// 어느 시점에 읽어도 일관된 다음 발화 시각이 보입니다.
#[derive(Clone)]
pub struct SchedulerHandle {
    jobs: Arc<Vec<JobHandle>>,
    cancel: CancellationToken,
}

struct JobHandle {
    id: &'static str,
    name: String,
    runner: Arc<dyn JobRunner>,
    next_fire: Arc<RwLock<NaiveDateTime>>,
    in_flight: Arc<AtomicBool>,
}

impl SchedulerHandle {
    /// 작업 상태 목록을 반환합니다.
    pub async fn status(&self) -> Vec<JobStatus> {
        let mut statuses = Vec::with_capacity(self.jobs.len());
        for job in self.jobs.iter() {
            statuses.push(JobStatus {
                id: job.id.to_string(),
                name: job.name.clone(),
                next_fire_kst: *job.next_fire.read().await,
                in_flight: job.in_flight.load(Ordering::SeqCst),
            });
        }
        statuses
    }

    /// 작업을 즉시 실행합니다 (운영자 수동 트리거).
    ///
    /// 이미 실행 중인 작업은 `max_instances = 1` 규칙에 따라 거부합니다.
    pub async fn run_job_now(&self, job_id: &str) -> Result<(), StageError> {
        let job = self
            .jobs
            .iter()
            .find(|j| j.id == job_id)
            .ok_or_else(|| StageError::Failed(format!("unknown job: {}", job_id)))?;

        if job.in_flight.swap(true, Ordering::SeqCst) {
            return Err(StageError::Failed(format!("job already running: {}", job_id)));
        }
        info!(job = job_id, "Manual trigger");
        let result = job
            .runner
            .run(JobContext {
                cancel: self.cancel.clone(),
                fired_at: Utc::now(),
            })
            .await;
        job.in_flight.store(false, Ordering::SeqCst);
        result
    }
}

/// 협조적 스케줄러.
pub struct Scheduler {
    jobs: Vec<ScheduledJob>,
    calendar: Arc<KrxCalendar>,
    workers: Arc<Semaphore>,
    cancel: CancellationToken,
    shutdown_deadline: std::time::Duration,
}

impl Scheduler {
    /// 스케줄러를 생성합니다.
    pub fn new(
        calendar: Arc<KrxCalendar>,
        max_workers: usize,
        shutdown_deadline: std::time::Duration,
    ) -> Self {
        Self {
            jobs: Vec::new(),
            calendar,
            workers: Arc::new(Semaphore::new(max_workers)),
            cancel: CancellationToken::new(),
            shutdown_deadline,
        }
    }

    /// 작업을 등록합니다. 첫 발화는 현재 시각 이후로 계산됩니다.
    pub fn add_job(&mut self, spec: JobSpec, runner: Arc<dyn JobRunner>) {
        let now_kst = to_kst(Utc::now()).naive_local();
        let next_fire = spec.trigger.next_fire_after(now_kst);
        info!(job = spec.id, name = %spec.name, next = %next_fire, "Job scheduled");
        self.jobs.push(ScheduledJob {
            spec,
            runner,
            next_fire: Arc::new(RwLock::new(next_fire)),
            in_flight: Arc::new(AtomicBool::new(false)),
        });
    }

    /// 취소 토큰을 반환합니다 (외부 종료 신호 연결용).
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// 상태 조회/수동 트리거용 핸들을 반환합니다.
    ///
    /// 모든 작업을 등록한 뒤에 호출해야 합니다. 핸들은 루프가 도는
    /// 동안에도 유효합니다.
    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            jobs: Arc::new(
                self.jobs
                    .iter()
                    .map(|job| JobHandle {
                        id: job.spec.id,
                        name: job.spec.name.clone(),
                        runner: job.runner.clone(),
                        next_fire: job.next_fire.clone(),
                        in_flight: job.in_flight.clone(),
                    })
                    .collect(),
            ),
            cancel: self.cancel.clone(),
        }
    }

    /// 작업 상태 목록을 반환합니다.
    pub async fn status(&self) -> Vec<JobStatus> {
        self.handle().status().await
    }

    /// 작업을 즉시 실행합니다 (운영자 수동 트리거).
    pub async fn run_job_now(&self, job_id: &str) -> Result<(), StageError> {
        self.handle().run_job_now(job_id).await
    }

    /// 스케줄러 루프를 실행합니다. 취소 토큰이 내려올 때까지 돌고,
    /// 종료 시 실행 중 작업을 데드라인까지 기다린 뒤 강제 취소합니다.
    pub async fn run(&mut self) {
        info!(jobs = self.jobs.len(), "Scheduler started");
        let mut join_set: JoinSet<()> = JoinSet::new();

        loop {
            // 완료된 작업 정리
            while join_set.try_join_next().is_some() {}

            let now_kst = to_kst(Utc::now()).naive_local();

            // 발화 시각이 지난 작업 처리
            for job in self.jobs.iter() {
                let scheduled = *job.next_fire.read().await;
                if scheduled > now_kst {
                    continue;
                }

                let decision = misfire_decision(scheduled, now_kst, job.spec.grace);
                // coalesce: 다운타임 동안 몇 번이 쌓였든 다음 발화는
                // 현재 시각 기준으로 한 번만 다시 계산한다
                *job.next_fire.write().await = job.spec.trigger.next_fire_after(now_kst);

                match decision {
                    MisfireDecision::Drop => {
                        warn!(
                            job = job.spec.id,
                            scheduled = %scheduled,
                            "Missed firing dropped (past grace period)"
                        );
                        continue;
                    }
                    MisfireDecision::Run => {}
                }

                // max_instances = 1: 실행 중이면 이번 발화는 억제
                if job.in_flight.load(Ordering::SeqCst) {
                    debug!(job = job.spec.id, "Previous instance still running, suppressed");
                    continue;
                }

                // 캘린더 게이트
                if job.spec.calendar_gated && !self.calendar.is_open(Utc::now()) {
                    debug!(job = job.spec.id, "Market closed, skipped");
                    continue;
                }

                let runner = job.runner.clone();
                let in_flight = job.in_flight.clone();
                let workers = self.workers.clone();
                let cancel = self.cancel.clone();
                let job_id = job.spec.id;

                in_flight.store(true, Ordering::SeqCst);
                join_set.spawn(async move {
                    let _permit = match workers.acquire().await {
                        Ok(permit) => permit,
                        Err(_) => {
                            in_flight.store(false, Ordering::SeqCst);
                            return;
                        }
                    };
                    info!(job = job_id, "Job started");
                    let started = std::time::Instant::now();
                    let result = runner
                        .run(JobContext {
                            cancel,
                            fired_at: Utc::now(),
                        })
                        .await;
                    match result {
                        Ok(()) => info!(
                            job = job_id,
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "Job finished"
                        ),
                        // 작업 간 독립: 실패는 로그만 남긴다
                        Err(e) => error!(job = job_id, error = %e, "Job failed"),
                    }
                    in_flight.store(false, Ordering::SeqCst);
                });
            }

            // 다음 발화까지 대기 (최대 1분 단위로 재평가)
            let now_kst = to_kst(Utc::now()).naive_local();
            let mut earliest: Option<chrono::Duration> = None;
            for job in self.jobs.iter() {
                let until = *job.next_fire.read().await - now_kst;
                earliest = Some(earliest.map_or(until, |e| e.min(until)));
            }
            let sleep_duration = earliest
                .map(|d| d.to_std().unwrap_or(std::time::Duration::from_secs(1)))
                .unwrap_or(std::time::Duration::from_secs(60))
                .min(std::time::Duration::from_secs(60));

            tokio::select! {
                _ = tokio::time::sleep(sleep_duration) => {}
                _ = self.cancel.cancelled() => {
                    info!("Shutdown signal received, stopping scheduler");
                    break;
                }
            }
        }

        // 종료: 새 발화는 중단된 상태. 실행 중 작업을 데드라인까지 대기.
        let deadline = tokio::time::sleep(self.shutdown_deadline);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                joined = join_set.join_next() => {
                    if joined.is_none() {
                        break;
                    }
                }
                _ = &mut deadline => {
                    warn!(
                        remaining = join_set.len(),
                        "Shutdown deadline reached, force-cancelling jobs"
                    );
                    join_set.shutdown().await;
                    break;
                }
            }
        }
        info!("Scheduler stopped");
    }
}
