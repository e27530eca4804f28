//! 오케스트레이터 관리 HTTP 표면.
//!
//! 데몬과 같은 프로세스에서 서비스되는 작은 운영 인터페이스입니다:
//! - `GET /health` — 생존 확인
//! - `GET /jobs` — 작업 상태 (ID, 다음 발화 시각, 실행 중 여부)
//! - `POST /jobs/{id}/run` — 수동 트리거
//!
//! CLI의 `status` / `run-job` 서브커맨드가 이 표면을 호출합니다.

use crate::scheduler::{JobStatus, SchedulerHandle, StageError};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

/// GET /health 응답.
#[derive(Debug, Serialize, Deserialize)]
pub struct AdminHealth {
    /// 상태
    pub status: String,
    /// 서비스 이름
    pub service: String,
    /// 버전
    pub version: String,
}

/// POST /jobs/{id}/run 응답.
#[derive(Debug, Serialize, Deserialize)]
pub struct RunJobResponse {
    /// 작업 ID
    pub job_id: String,
    /// 실행 결과 ("ok")
    pub result: String,
}

/// 관리 라우터를 구성합니다.
pub fn admin_router(handle: SchedulerHandle) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/jobs", get(list_jobs))
        .route("/jobs/:id/run", post(run_job))
        .with_state(handle)
}

async fn health() -> Json<AdminHealth> {
    Json(AdminHealth {
        status: "healthy".to_string(),
        service: "orchestrator".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn list_jobs(State(handle): State<SchedulerHandle>) -> Json<Vec<JobStatus>> {
    Json(handle.status().await)
}

async fn run_job(
    State(handle): State<SchedulerHandle>,
    Path(job_id): Path<String>,
) -> Result<Json<RunJobResponse>, (StatusCode, String)> {
    match handle.run_job_now(&job_id).await {
        Ok(()) => Ok(Json(RunJobResponse {
            job_id,
            result: "ok".to_string(),
        })),
        Err(StageError::Failed(message)) if message.starts_with("unknown job") => {
            Err((StatusCode::NOT_FOUND, message))
        }
        Err(StageError::Failed(message)) if message.starts_with("job already running") => {
            Err((StatusCode::CONFLICT, message))
        }
        Err(e) => Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobSpec, Trigger};
    use crate::scheduler::{JobContext, JobRunner, Scheduler};
    use axum::body::Body;
    use axum::http::Request;
    use kquant_calendar::KrxCalendar;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tower::ServiceExt;

    struct CountingJob {
        runs: Arc<AtomicU32>,
    }

    #[async_trait::async_trait]
    impl JobRunner for CountingJob {
        async fn run(&self, _ctx: JobContext) -> Result<(), StageError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn scheduler_with_job(runs: Arc<AtomicU32>) -> Scheduler {
        let mut scheduler = Scheduler::new(
            Arc::new(KrxCalendar::with_default_holidays()),
            4,
            std::time::Duration::from_secs(1),
        );
        scheduler.add_job(
            JobSpec::new(
                "risk_checks",
                "Risk Limit Checks",
                Trigger::Interval {
                    every: chrono::Duration::minutes(30),
                    window: None,
                },
            ),
            Arc::new(CountingJob { runs }),
        );
        scheduler
    }

    #[tokio::test]
    async fn test_list_jobs_endpoint() {
        let scheduler = scheduler_with_job(Arc::new(AtomicU32::new(0)));
        let app = admin_router(scheduler.handle());

        let response = app
            .oneshot(Request::builder().uri("/jobs").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let jobs: Vec<JobStatus> = serde_json::from_slice(&body).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, "risk_checks");
        assert!(!jobs[0].in_flight);
    }

    #[tokio::test]
    async fn test_run_job_endpoint() {
        let runs = Arc::new(AtomicU32::new(0));
        let scheduler = scheduler_with_job(runs.clone());
        let app = admin_router(scheduler.handle());

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/jobs/risk_checks/run")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_unknown_job_is_404() {
        let scheduler = scheduler_with_job(Arc::new(AtomicU32::new(0)));
        let app = admin_router(scheduler.handle());

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/jobs/nope/run")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
