//! 트레이딩 오케스트레이터 CLI.
//!
//! 종료 코드: 0 성공, 1 설정 에러, 2 런타임 에러, 3 데이터 없음.

use chrono::Duration as ChronoDuration;
use clap::{Parser, Subcommand};
use kquant_calendar::KrxCalendar;
use kquant_core::{init_logging, AppConfig, LogConfig, LogFormat, Ticker};
use kquant_data::{
    CachedPriceSource, MemoryMarketDataReader, MemoryPortfolioStore, MemoryPriceSource,
    MemoryStockDirectory, PgMarketDataReader, PgPortfolioStore, PgStockDirectory,
    PortfolioStore, PriceCache, PriceSource, ScoreReader, StockDirectory,
};
use kquant_execution::{OrderExecutor, PaperBroker, SlippageModel};
use kquant_orchestrator::{
    admin_router, HttpCandidateSource, HttpStage, JobSpec, JobStatus, MonitorStage,
    RateLimitConfig, RateLimiter, RiskCheckStage, RunJobResponse, Scheduler, SessionWindow,
    StageError, StaticCandidateSource, TradingCycleStage, Trigger,
};
use kquant_risk::{PositionMonitor, RiskEngine, SignalValidator};
use kquant_signal::{EntryFilters, SignalGenerator};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "kquant-orchestrator")]
#[command(about = "KQuant trading system orchestrator", long_about = None)]
#[command(version)]
struct Cli {
    /// 설정 파일 경로
    #[arg(long, default_value = "config/default.toml")]
    config: String,

    /// 로그 레벨 (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 데몬 모드: 전체 파이프라인을 스케줄에 따라 실행
    Run,

    /// 한 번의 트레이딩 사이클 실행 (청산 → 진입)
    RunCycle {
        /// 후보 종목 (쉼표 구분, 예: "005930,000660")
        #[arg(long)]
        tickers: Option<String>,
    },

    /// 진입 신호 생성만 수행 (실행 없음)
    GenerateSignals {
        /// 후보 종목 (쉼표 구분)
        #[arg(long)]
        tickers: String,
    },

    /// 포지션 모니터링 1회 실행
    MonitorPositions,

    /// 리스크 점검 1회 실행
    RiskCheck,

    /// 거래 정지 해제 (운영자 전용)
    ResumeTrading,

    /// 실행 중인 데몬의 작업 스케줄 조회
    Status,

    /// 실행 중인 데몬의 작업을 즉시 실행
    RunJob {
        /// 작업 ID (예: "signal_generation", "risk_checks")
        job_id: String,
    },
}

/// 조립된 서비스 그래프.
struct AppContext {
    config: AppConfig,
    calendar: Arc<KrxCalendar>,
    generator: Arc<SignalGenerator>,
    validator: Arc<SignalValidator>,
    executor: Arc<OrderExecutor>,
    engine: Arc<RiskEngine>,
}

impl AppContext {
    /// 설정으로 서비스 그래프를 조립합니다.
    ///
    /// 모의 투자 모드에서는 인메모리 저장소를, 그 외에는 PostgreSQL과
    /// Redis를 사용합니다. 브로커는 실계좌 연동 전까지 항상 모의
    /// 브로커입니다.
    async fn build(config: AppConfig) -> anyhow::Result<Self> {
        let calendar = Arc::new(KrxCalendar::with_default_holidays());

        let (store, reader_inner, directory, prices): (
            Arc<dyn PortfolioStore>,
            Arc<dyn kquant_data::MarketDataReader>,
            Arc<dyn StockDirectory>,
            Arc<dyn PriceSource>,
        ) = if config.execution.paper_trading {
            info!("Paper trading mode: in-memory portfolio store");
            let store = Arc::new(MemoryPortfolioStore::new());
            store
                .open_account(&config.orchestrator.user_id, Decimal::from(10_000_000))
                .await?;
            (
                store,
                Arc::new(MemoryMarketDataReader::new()),
                Arc::new(MemoryStockDirectory::new()),
                Arc::new(MemoryPriceSource::new()),
            )
        } else {
            info!("Connecting to PostgreSQL...");
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(config.database.max_connections)
                .acquire_timeout(Duration::from_secs(config.database.connection_timeout_secs))
                .connect(&config.database.url)
                .await?;
            let cache = Arc::new(
                PriceCache::connect(&config.redis.url, config.redis.price_cache_ttl_secs).await?,
            );
            (
                Arc::new(PgPortfolioStore::new(pool.clone())),
                Arc::new(PgMarketDataReader::new(pool.clone())),
                Arc::new(PgStockDirectory::new(pool)),
                Arc::new(CachedPriceSource::new(cache)),
            )
        };

        let reader = Arc::new(ScoreReader::with_max_age(
            reader_inner,
            calendar.clone(),
            ChronoDuration::hours(config.risk.require_recent_data_hours),
        ));

        let monitor = Arc::new(PositionMonitor::new(
            store.clone(),
            prices.clone(),
            reader.clone(),
            config.risk.clone(),
        ));

        let generator = Arc::new(SignalGenerator::new(
            reader,
            prices.clone(),
            store.clone(),
            directory.clone(),
            monitor,
            config.signal.clone(),
            config.risk.clone(),
        )?);

        let validator = Arc::new(SignalValidator::new(
            store.clone(),
            directory.clone(),
            calendar.clone(),
            config.risk.clone(),
        ));

        let engine = Arc::new(RiskEngine::new(store.clone(), config.risk.clone()));

        let slippage = if config.execution.enable_slippage {
            Some(SlippageModel::from_config(&config.execution))
        } else {
            None
        };
        let broker = Arc::new(PaperBroker::new(prices, store.clone(), slippage));

        let executor = Arc::new(
            OrderExecutor::new(store.clone(), broker, directory, config.risk.clone())
                .with_risk_engine(engine.clone()),
        );

        Ok(Self {
            config,
            calendar,
            generator,
            validator,
            executor,
            engine,
        })
    }

    fn user_id(&self) -> &str {
        &self.config.orchestrator.user_id
    }
}

fn parse_tickers(raw: &str) -> anyhow::Result<Vec<Ticker>> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| Ticker::new(s).map_err(Into::into))
        .collect()
}

async fn run_daemon(ctx: AppContext) -> anyhow::Result<()> {
    let orchestrator = &ctx.config.orchestrator;
    let timeout = Duration::from_secs(orchestrator.services.call_timeout_secs);

    let mut scheduler = Scheduler::new(
        ctx.calendar.clone(),
        orchestrator.max_workers,
        Duration::from_secs(orchestrator.shutdown_deadline_secs),
    );
    let grace = ChronoDuration::seconds(orchestrator.misfire_grace_secs as i64);
    let limiter = Arc::new(RateLimiter::new());

    // 외부 협력자 스테이지: 데이터 수집 → 지표 계산 → 관심종목 갱신.
    // 시간 순서가 곧 의존 순서다 (DAG로 표현하지 않는다).
    let (h, m) = kquant_core::OrchestratorConfig::parse_time(&orchestrator.data_collection_time)?;
    scheduler.add_job(
        JobSpec::new(
            "data_collection",
            "Daily Data Collection",
            Trigger::DailyAt { hour: h, minute: m },
        )
        .with_grace(grace),
        Arc::new(HttpStage::new(
            "data_collection",
            format!("{}/collect", orchestrator.services.data_collector_url),
            timeout,
            limiter.clone(),
            RateLimitConfig::per_second(1.0),
        )),
    );

    let (h, m) =
        kquant_core::OrchestratorConfig::parse_time(&orchestrator.indicator_calculation_time)?;
    scheduler.add_job(
        JobSpec::new(
            "indicator_calculation",
            "Daily Indicator Calculation",
            Trigger::DailyAt { hour: h, minute: m },
        )
        .with_grace(grace),
        Arc::new(HttpStage::new(
            "indicator_calculation",
            format!("{}/calculate", orchestrator.services.indicator_calculator_url),
            timeout,
            limiter.clone(),
            RateLimitConfig::per_second(0.5),
        )),
    );

    let (h, m) = kquant_core::OrchestratorConfig::parse_time(&orchestrator.watchlist_update_time)?;
    scheduler.add_job(
        JobSpec::new(
            "watchlist_update",
            "Daily Watchlist Update",
            Trigger::DailyAt { hour: h, minute: m },
        )
        .with_grace(grace),
        Arc::new(HttpStage::new(
            "watchlist_update",
            format!("{}/update", orchestrator.services.watchlist_manager_url),
            timeout,
            limiter.clone(),
            RateLimitConfig::per_second(1.0),
        )),
    );

    // 신호 생성 (개장 전): 관심종목 서비스에서 후보를 받는다
    let candidates = Arc::new(HttpCandidateSource::new(
        format!("{}/watchlist", orchestrator.services.watchlist_manager_url),
        timeout,
    ));
    let (h, m) = kquant_core::OrchestratorConfig::parse_time(&orchestrator.signal_generation_time)?;
    scheduler.add_job(
        JobSpec::new(
            "signal_generation",
            "Daily Signal Generation",
            Trigger::DailyAt { hour: h, minute: m },
        )
        .with_grace(grace),
        Arc::new(TradingCycleStage::new(
            ctx.user_id(),
            ctx.generator.clone(),
            ctx.validator.clone(),
            ctx.executor.clone(),
            candidates,
            EntryFilters {
                min_composite_score: ctx.config.signal.min_composite_score,
                min_momentum_score: ctx.config.signal.min_momentum_score,
            },
        )),
    );

    // 포지션 모니터링 (장중, 캘린더 게이트)
    scheduler.add_job(
        JobSpec::new(
            "position_monitoring",
            "Position Monitoring",
            Trigger::Interval {
                every: ChronoDuration::minutes(orchestrator.position_monitor_interval_min as i64),
                window: Some(SessionWindow::market_hours()),
            },
        )
        .with_grace(grace)
        .gated_by_calendar(),
        Arc::new(MonitorStage::new(
            ctx.user_id(),
            ctx.generator.clone(),
            ctx.validator.clone(),
            ctx.executor.clone(),
        )),
    );

    // 리스크 점검 (게이트 없음)
    scheduler.add_job(
        JobSpec::new(
            "risk_checks",
            "Risk Limit Checks",
            Trigger::Interval {
                every: ChronoDuration::minutes(orchestrator.risk_check_interval_min as i64),
                window: None,
            },
        )
        .with_grace(grace),
        Arc::new(RiskCheckStage::new(
            ctx.user_id(),
            ctx.engine.clone(),
            ctx.validator.clone(),
            ctx.executor.clone(),
        )),
    );

    for status in scheduler.status().await {
        info!(job = %status.id, next = %status.next_fire_kst, "Scheduled");
    }

    // 관리 표면: status / run-job 서브커맨드가 호출한다
    let admin_addr = format!("{}:{}", orchestrator.admin_host, orchestrator.admin_port);
    let listener = tokio::net::TcpListener::bind(&admin_addr).await?;
    info!(addr = %admin_addr, "Admin surface listening");
    let admin_cancel = scheduler.cancel_token();
    let admin_app = admin_router(scheduler.handle());
    let admin_server = tokio::spawn(async move {
        axum::serve(listener, admin_app)
            .with_graceful_shutdown(admin_cancel.cancelled_owned())
            .await
    });

    // 종료 신호 연결
    let cancel = scheduler.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, initiating shutdown");
            cancel.cancel();
        }
    });

    scheduler.run().await;
    if let Ok(Err(e)) = admin_server.await {
        error!(error = %e, "Admin surface exited with error");
    }
    Ok(())
}

/// 실행 중인 데몬의 관리 표면 기본 URL.
fn admin_base_url(config: &AppConfig) -> String {
    format!(
        "http://{}:{}",
        config.orchestrator.admin_host, config.orchestrator.admin_port
    )
}

fn admin_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .expect("HTTP client build")
}

fn exit_code_for(e: &StageError) -> i32 {
    match e {
        StageError::DataUnavailable(_) => 3,
        _ => 2,
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_config = LogConfig::new(&cli.log_level).with_format(LogFormat::Pretty);
    if let Err(e) = init_logging(log_config) {
        eprintln!("failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    // 설정 에러는 기동 거부 (종료 코드 1)
    let config = match AppConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Configuration error, refusing to start");
            std::process::exit(1);
        }
    };

    let ctx = match AppContext::build(config).await {
        Ok(ctx) => ctx,
        Err(e) => {
            error!(error = %e, "Failed to build service graph");
            std::process::exit(2);
        }
    };

    let result: Result<(), i32> = match cli.command {
        Commands::Run => run_daemon(ctx).await.map_err(|e| {
            error!(error = %e, "Daemon failed");
            2
        }),
        Commands::RunCycle { tickers } => {
            let candidates = match tickers.as_deref().map(parse_tickers).transpose() {
                Ok(parsed) => parsed.unwrap_or_default(),
                Err(e) => {
                    error!(error = %e, "Invalid tickers");
                    std::process::exit(1);
                }
            };
            let stage = TradingCycleStage::new(
                ctx.user_id(),
                ctx.generator.clone(),
                ctx.validator.clone(),
                ctx.executor.clone(),
                Arc::new(StaticCandidateSource::new(candidates)),
                EntryFilters::default(),
            );
            let job_ctx = kquant_orchestrator::JobContext {
                cancel: tokio_util::sync::CancellationToken::new(),
                fired_at: chrono::Utc::now(),
            };
            match stage.run_cycle(&job_ctx).await {
                Ok(summary) => {
                    info!(
                        exits = summary.exit_signals,
                        executed_exits = summary.executed_exits,
                        entries = summary.entry_signals,
                        executed_entries = summary.executed_entries,
                        "Cycle complete"
                    );
                    Ok(())
                }
                Err(e) => {
                    error!(error = %e, "Cycle failed");
                    Err(exit_code_for(&e))
                }
            }
        }
        Commands::GenerateSignals { tickers } => {
            let candidates = match parse_tickers(&tickers) {
                Ok(parsed) => parsed,
                Err(e) => {
                    error!(error = %e, "Invalid tickers");
                    std::process::exit(1);
                }
            };
            match ctx
                .generator
                .generate_entry_signals(ctx.user_id(), &candidates, &EntryFilters::default())
                .await
            {
                Ok(signals) if signals.is_empty() => {
                    info!("No signals generated");
                    Err(3)
                }
                Ok(signals) => {
                    for signal in &signals {
                        println!(
                            "{} {} x{} @ {} (conviction {})",
                            signal.signal_id,
                            signal.ticker,
                            signal.recommended_shares,
                            signal.current_price,
                            signal
                                .conviction_score
                                .map(|c| c.to_string())
                                .unwrap_or_else(|| "-".to_string()),
                        );
                    }
                    Ok(())
                }
                Err(e) => {
                    error!(error = %e, "Signal generation failed");
                    Err(2)
                }
            }
        }
        Commands::MonitorPositions => {
            let stage = MonitorStage::new(
                ctx.user_id(),
                ctx.generator.clone(),
                ctx.validator.clone(),
                ctx.executor.clone(),
            );
            let job_ctx = kquant_orchestrator::JobContext {
                cancel: tokio_util::sync::CancellationToken::new(),
                fired_at: chrono::Utc::now(),
            };
            use kquant_orchestrator::JobRunner;
            stage.run(job_ctx).await.map_err(|e| {
                error!(error = %e, "Monitoring failed");
                exit_code_for(&e)
            })
        }
        Commands::RiskCheck => match ctx.engine.run_check(ctx.user_id()).await {
            Ok(outcome) => {
                println!(
                    "total_value={} loss={}% halted={}",
                    outcome.metrics.total_value,
                    outcome.metrics.total_loss_from_initial_pct,
                    outcome.metrics.trading_halted
                );
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Risk check failed");
                Err(2)
            }
        },
        Commands::ResumeTrading => match ctx.engine.resume(ctx.user_id()).await {
            Ok(()) => {
                info!(user = ctx.user_id(), "Trading resumed");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Resume failed");
                Err(2)
            }
        },
        Commands::Status => {
            let url = format!("{}/jobs", admin_base_url(&ctx.config));
            match admin_client().get(&url).send().await {
                Ok(response) if response.status().is_success() => {
                    match response.json::<Vec<JobStatus>>().await {
                        Ok(jobs) => {
                            for job in jobs {
                                println!(
                                    "{:<22} {:<28} next: {}  in_flight: {}",
                                    job.id, job.name, job.next_fire_kst, job.in_flight
                                );
                            }
                            Ok(())
                        }
                        Err(e) => {
                            error!(error = %e, "Malformed status response");
                            Err(2)
                        }
                    }
                }
                Ok(response) => {
                    error!(status = %response.status(), "Status query rejected");
                    Err(2)
                }
                Err(e) => {
                    error!(error = %e, url = %url, "Daemon unreachable (is `run` active?)");
                    Err(2)
                }
            }
        }
        Commands::RunJob { job_id } => {
            let url = format!("{}/jobs/{}/run", admin_base_url(&ctx.config), job_id);
            match admin_client().post(&url).send().await {
                Ok(response) if response.status().is_success() => {
                    match response.json::<RunJobResponse>().await {
                        Ok(run) => {
                            info!(job = %run.job_id, "Job triggered");
                            Ok(())
                        }
                        Err(e) => {
                            error!(error = %e, "Malformed run-job response");
                            Err(2)
                        }
                    }
                }
                Ok(response) => {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    error!(status = %status, %body, "Manual trigger rejected");
                    Err(2)
                }
                Err(e) => {
                    error!(error = %e, url = %url, "Daemon unreachable (is `run` active?)");
                    Err(2)
                }
            }
        }
    };

    if let Err(code) = result {
        std::process::exit(code);
    }
}
