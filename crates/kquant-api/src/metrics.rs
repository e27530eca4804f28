//! Prometheus 메트릭 설정.
//!
//! `/metrics` 엔드포인트로 노출되는 레코더를 설치합니다.

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

/// Prometheus 메트릭 레코더를 설치하고 핸들을 반환합니다.
///
/// 프로세스당 한 번만 호출해야 합니다.
pub fn setup_metrics_recorder() -> PrometheusHandle {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("http_request_duration_seconds".to_string()),
            &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0],
        )
        .expect("histogram buckets")
        .install_recorder()
        .expect("Prometheus recorder install")
}

/// HTTP 요청 카운터를 증가시킵니다.
pub fn record_http_request(method: &str, path: &str, status: u16) {
    counter!(
        "http_requests_total",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// 모니터 틱 결과를 기록합니다.
pub fn record_monitor_tick(positions: usize, exits: usize) {
    counter!("position_monitor_ticks_total").increment(1);
    histogram!("position_monitor_positions").record(positions as f64);
    if exits > 0 {
        counter!("position_monitor_exit_signals_total").increment(exits as u64);
    }
}

/// 서킷 브레이커 발동을 기록합니다.
pub fn record_circuit_breaker_trip(user: &str) {
    counter!("circuit_breaker_trips_total", "user" => user.to_string()).increment(1);
}
