use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, GaugeVec, Opts, Registry, TextEncoder};
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::metrics::{MetricKind, ServiceMetrics};

/// One gauge per metric kind, labelled by database service name, in an
/// owned registry. A database acquires its label children on the first
/// successful poll; until then it exposes no samples at all.
pub struct DbaasGauges {
    registry: Registry,
    gauges: Vec<GaugeVec>,
}

impl DbaasGauges {
    pub fn new() -> Result<DbaasGauges, prometheus::Error> {
        let registry = Registry::new();
        let mut gauges = Vec::with_capacity(MetricKind::ALL.len());
        for kind in MetricKind::ALL {
            let gauge = GaugeVec::new(Opts::new(kind.gauge_name(), kind.help()), &["database"])?;
            registry.register(Box::new(gauge.clone()))?;
            gauges.push(gauge);
        }
        Ok(DbaasGauges { registry, gauges })
    }

    /// Overwrite every gauge for `database` with freshly fetched samples.
    pub fn record(&self, database: &str, metrics: &ServiceMetrics) {
        for kind in MetricKind::ALL {
            self.gauges[kind as usize]
                .with_label_values(&[database])
                .set(metrics.get(kind));
        }
    }

    /// Render the registry in the Prometheus text exposition format.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

/// Serve `GET /metrics` on the given listener until the process exits.
pub async fn serve(gauges: Arc<DbaasGauges>, listener: TcpListener) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("metrics endpoint listening on http://{addr}/metrics");
    }
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(gauges);
    axum::serve(listener, app).await
}

async fn metrics_handler(State(gauges): State<Arc<DbaasGauges>>) -> Response {
    match gauges.render() {
        Ok(body) => ([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], body).into_response(),
        Err(error) => {
            error!(%error, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to encode metrics").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gauges_register_all_nine_metrics() {
        let gauges = DbaasGauges::new().unwrap();
        gauges.record("pg-prod", &ServiceMetrics::constant(1.0));

        let output = gauges.render().unwrap();
        for kind in MetricKind::ALL {
            let line = format!("{}{{database=\"pg-prod\"}} 1", kind.gauge_name());
            assert!(
                output.lines().any(|l| l == line),
                "missing `{line}` in:\n{output}"
            );
            assert!(output.contains(&format!("# TYPE {} gauge", kind.gauge_name())));
        }
    }

    #[test]
    fn record_overwrites_previous_values() {
        let gauges = DbaasGauges::new().unwrap();
        gauges.record("pg-prod", &ServiceMetrics::constant(1.0));
        gauges.record("pg-prod", &ServiceMetrics::constant(4.0));

        let output = gauges.render().unwrap();
        assert!(output
            .lines()
            .any(|l| l == r#"dbaas_cpu_usage{database="pg-prod"} 4"#));
        assert!(!output.contains(r#"dbaas_cpu_usage{database="pg-prod"} 1"#));
    }

    #[test]
    fn unwritten_series_expose_no_samples() {
        let gauges = DbaasGauges::new().unwrap();
        assert!(!gauges.render().unwrap().contains("database="));
    }

    #[test]
    fn databases_are_labelled_independently() {
        let gauges = DbaasGauges::new().unwrap();
        gauges.record("pg-prod", &ServiceMetrics::constant(1.5));
        gauges.record("mysql-staging", &ServiceMetrics::constant(2.5));

        let output = gauges.render().unwrap();
        assert!(output
            .lines()
            .any(|l| l == r#"dbaas_disk_usage{database="pg-prod"} 1.5"#));
        assert!(output
            .lines()
            .any(|l| l == r#"dbaas_disk_usage{database="mysql-staging"} 2.5"#));
    }
}
