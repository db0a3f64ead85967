use std::sync::Arc;
use std::time::Duration;

use tokio::time;
use tracing::{error, info};

use crate::dbaas::MetricsSource;
use crate::exporter::DbaasGauges;

/// Polls every configured database on a fixed interval and publishes the
/// latest samples through the gauge registry.
pub struct Poller<S> {
    source: S,
    gauges: Arc<DbaasGauges>,
    databases: Vec<String>,
    interval: Duration,
}

impl<S: MetricsSource> Poller<S> {
    pub fn new(
        source: S,
        gauges: Arc<DbaasGauges>,
        databases: Vec<String>,
        interval: Duration,
    ) -> Poller<S> {
        Poller {
            source,
            gauges,
            databases,
            interval,
        }
    }

    /// Poll each database once, in list order. Gauges for a database are
    /// only touched after its fetch and extraction fully succeeded; a
    /// failure leaves the previous values in place and never interrupts
    /// the rest of the cycle.
    pub async fn poll_cycle(&self) {
        for database in &self.databases {
            match self.source.fetch_metrics(database).await {
                Ok(metrics) => {
                    self.gauges.record(database, &metrics);
                    info!(database = %database, "metrics scraped");
                }
                Err(error) => {
                    error!(database = %database, %error, "failed to fetch metrics");
                }
            }
        }
    }

    /// Run poll cycles forever. The interval's first tick completes
    /// immediately, so the first cycle starts right away.
    pub async fn run(self) {
        let mut interval = time::interval(self.interval);
        loop {
            interval.tick().await;
            self.poll_cycle().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dbaas::FetchError;
    use crate::metrics::{MetricKind, ServiceMetrics, ShapeError};
    use async_trait::async_trait;
    use reqwest::StatusCode;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    /// Scripted source: per database, a queue of responses consumed one
    /// per cycle.
    struct StubSource {
        responses: Mutex<HashMap<String, VecDeque<Result<ServiceMetrics, FetchError>>>>,
    }

    impl StubSource {
        fn new() -> StubSource {
            StubSource {
                responses: Mutex::new(HashMap::new()),
            }
        }

        fn push(&self, database: &str, response: Result<ServiceMetrics, FetchError>) {
            self.responses
                .lock()
                .unwrap()
                .entry(database.to_string())
                .or_default()
                .push_back(response);
        }
    }

    #[async_trait]
    impl MetricsSource for &StubSource {
        async fn fetch_metrics(&self, database: &str) -> Result<ServiceMetrics, FetchError> {
            self.responses
                .lock()
                .unwrap()
                .get_mut(database)
                .and_then(VecDeque::pop_front)
                .unwrap_or(Err(FetchError::Status(StatusCode::NOT_FOUND)))
        }
    }

    fn gauge_line(output: &str, kind: MetricKind, database: &str, value: &str) -> bool {
        let line = format!("{}{{database=\"{database}\"}} {value}", kind.gauge_name());
        output.lines().any(|l| l == line)
    }

    #[tokio::test]
    async fn successful_cycle_updates_all_gauges() {
        let source = StubSource::new();
        source.push("pg-prod", Ok(ServiceMetrics::constant(2.5)));
        let gauges = Arc::new(DbaasGauges::new().unwrap());
        let poller = Poller::new(
            &source,
            gauges.clone(),
            vec!["pg-prod".to_string()],
            Duration::from_secs(30),
        );

        poller.poll_cycle().await;

        let output = gauges.render().unwrap();
        for kind in MetricKind::ALL {
            assert!(gauge_line(&output, kind, "pg-prod", "2.5"), "{output}");
        }
    }

    #[tokio::test]
    async fn values_are_overwritten_not_accumulated() {
        let source = StubSource::new();
        source.push("pg-prod", Ok(ServiceMetrics::constant(1.0)));
        source.push("pg-prod", Ok(ServiceMetrics::constant(4.0)));
        let gauges = Arc::new(DbaasGauges::new().unwrap());
        let poller = Poller::new(
            &source,
            gauges.clone(),
            vec!["pg-prod".to_string()],
            Duration::from_secs(30),
        );

        poller.poll_cycle().await;
        poller.poll_cycle().await;

        let output = gauges.render().unwrap();
        assert!(gauge_line(&output, MetricKind::CpuUsage, "pg-prod", "4"));
        assert!(!gauge_line(&output, MetricKind::CpuUsage, "pg-prod", "1"));
    }

    #[tokio::test]
    async fn one_failing_database_does_not_abort_the_cycle() {
        let source = StubSource::new();
        source.push("db-a", Ok(ServiceMetrics::constant(1.0)));
        source.push(
            "db-b",
            Err(FetchError::Status(StatusCode::INTERNAL_SERVER_ERROR)),
        );
        source.push("db-c", Ok(ServiceMetrics::constant(3.0)));
        let gauges = Arc::new(DbaasGauges::new().unwrap());
        let poller = Poller::new(
            &source,
            gauges.clone(),
            vec!["db-a".to_string(), "db-b".to_string(), "db-c".to_string()],
            Duration::from_secs(30),
        );

        poller.poll_cycle().await;

        let output = gauges.render().unwrap();
        assert!(gauge_line(&output, MetricKind::DiskUsage, "db-a", "1"));
        assert!(gauge_line(&output, MetricKind::DiskUsage, "db-c", "3"));
        assert!(!output.contains("db-b"));
    }

    #[tokio::test]
    async fn failure_leaves_previous_values_stale() {
        let source = StubSource::new();
        source.push("pg-prod", Ok(ServiceMetrics::constant(1.0)));
        source.push(
            "pg-prod",
            Err(FetchError::Status(StatusCode::INTERNAL_SERVER_ERROR)),
        );
        let gauges = Arc::new(DbaasGauges::new().unwrap());
        let poller = Poller::new(
            &source,
            gauges.clone(),
            vec!["pg-prod".to_string()],
            Duration::from_secs(30),
        );

        poller.poll_cycle().await;
        poller.poll_cycle().await;

        let output = gauges.render().unwrap();
        for kind in MetricKind::ALL {
            assert!(gauge_line(&output, kind, "pg-prod", "1"), "{output}");
        }
    }

    #[tokio::test]
    async fn shape_failure_updates_nothing_for_that_database() {
        let source = StubSource::new();
        source.push(
            "pg-prod",
            Err(FetchError::Shape(ShapeError::MissingMetric("cpu_usage"))),
        );
        let gauges = Arc::new(DbaasGauges::new().unwrap());
        let poller = Poller::new(
            &source,
            gauges.clone(),
            vec!["pg-prod".to_string()],
            Duration::from_secs(30),
        );

        poller.poll_cycle().await;

        assert!(!gauges.render().unwrap().contains("pg-prod"));
    }
}
