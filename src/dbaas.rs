use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{InvalidHeaderValue, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use thiserror::Error;
use url::Url;

use crate::auth::ExoscaleV2Auth;
use crate::config::Config;
use crate::metrics::{MetricsResponse, ServiceMetrics, ShapeError};

/// Fixed request body; the API returns the trailing hour of samples.
const METRICS_REQUEST_BODY: &str = r#"{"period":"hour"}"#;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected status {0}")]
    Status(StatusCode),
    #[error("invalid service url: {0}")]
    Url(#[from] url::ParseError),
    #[error("authorization header could not be encoded: {0}")]
    Auth(#[from] InvalidHeaderValue),
    #[error(transparent)]
    Shape(#[from] ShapeError),
}

/// Source of metric samples for one database service. The poll cycle only
/// sees this trait, so it can run against a stub in tests.
#[async_trait]
pub trait MetricsSource {
    async fn fetch_metrics(&self, database: &str) -> Result<ServiceMetrics, FetchError>;
}

/// HTTP client for the provider's DBaaS service metrics API.
pub struct DbaasClient {
    http: Client,
    base_url: String,
    auth: ExoscaleV2Auth,
}

impl DbaasClient {
    pub fn new(config: &Config) -> Result<DbaasClient, reqwest::Error> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout))
            .build()?;
        Ok(DbaasClient {
            http,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            auth: ExoscaleV2Auth::new(&config.api_key, &config.api_secret),
        })
    }

    fn service_url(&self, database: &str) -> Result<Url, url::ParseError> {
        Url::parse(&format!("{}/{}", self.base_url, database))
    }
}

#[async_trait]
impl MetricsSource for DbaasClient {
    async fn fetch_metrics(&self, database: &str) -> Result<ServiceMetrics, FetchError> {
        let mut request = self
            .http
            .post(self.service_url(database)?)
            .header(CONTENT_TYPE, "application/json")
            .body(METRICS_REQUEST_BODY)
            .build()?;
        self.auth.sign(&mut request)?;

        let response = self.http.execute(request).await?;
        if response.status() != StatusCode::OK {
            return Err(FetchError::Status(response.status()));
        }

        let payload: MetricsResponse = response.json().await?;
        Ok(ServiceMetrics::from_response(&payload)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base_url: &str) -> DbaasClient {
        let config = Config {
            api_base_url: base_url.to_string(),
            api_key: "EXOtest".to_string(),
            api_secret: "top-secret".to_string(),
            databases: vec!["test-db".to_string()],
            ..Config::default()
        };
        DbaasClient::new(&config).unwrap()
    }

    #[test]
    fn service_url_appends_database_name() {
        let url = client("https://api.example.com/v2/dbaas-service-metrics")
            .service_url("pg-prod")
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.example.com/v2/dbaas-service-metrics/pg-prod"
        );
    }

    #[test]
    fn service_url_tolerates_trailing_slash_in_base() {
        let url = client("https://api.example.com/v2/dbaas-service-metrics/")
            .service_url("pg-prod")
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.example.com/v2/dbaas-service-metrics/pg-prod"
        );
    }
}
