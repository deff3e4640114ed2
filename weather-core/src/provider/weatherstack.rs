use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::{
    error::FetchError,
    model::Reading,
    provider::{ProviderId, WeatherProvider, truncate_body},
};

pub const DEFAULT_ENDPOINT: &str = "http://api.weatherstack.com/current";

const ID: ProviderId = ProviderId::WeatherStack;

/// weatherstack.com current conditions. Reports whole degrees and km/h natively.
#[derive(Debug, Clone)]
pub struct WeatherStackProvider {
    api_key: String,
    endpoint: String,
    http: Client,
}

impl WeatherStackProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            http: Client::new(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[derive(Debug, Deserialize)]
struct WsError {
    #[serde(default)]
    code: i64,
}

#[derive(Debug, Deserialize)]
struct WsCurrent {
    temperature: i32,
    wind_speed: i32,
}

#[derive(Debug, Deserialize)]
struct WsResponse {
    #[serde(default)]
    error: Option<WsError>,
    #[serde(default)]
    current: Option<WsCurrent>,
}

/// Weatherstack answers 200 even on failure and flags it with `error.code > 0`.
pub(crate) fn parse_reading(body: &str) -> Result<Reading, FetchError> {
    let parsed: WsResponse = serde_json::from_str(body)
        .map_err(|source| FetchError::Decode { provider: ID, source })?;

    if let Some(error) = parsed.error.filter(|e| e.code > 0) {
        return Err(FetchError::Provider {
            provider: ID,
            code: error.code,
        });
    }

    let current = parsed
        .current
        .ok_or(FetchError::Incomplete { provider: ID })?;

    Ok(Reading::new(current.temperature, current.wind_speed))
}

#[async_trait]
impl WeatherProvider for WeatherStackProvider {
    fn id(&self) -> ProviderId {
        ID
    }

    async fn fetch(&self, location: &str, deadline: Duration) -> Result<Reading, FetchError> {
        let res = self
            .http
            .get(&self.endpoint)
            .query(&[("access_key", self.api_key.as_str()), ("query", location)])
            .timeout(deadline)
            .send()
            .await
            .map_err(|source| FetchError::Transport { provider: ID, source })?;

        let status = res.status();
        let body = res
            .text()
            .await
            .map_err(|source| FetchError::Transport { provider: ID, source })?;

        if !status.is_success() {
            return Err(FetchError::Status {
                provider: ID,
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }

        parse_reading(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_current_conditions() {
        let body = r#"{"request":{"type":"City"},"current":{"temperature":5,"wind_speed":36,"humidity":80}}"#;

        let reading = parse_reading(body).unwrap();
        assert_eq!(reading, Reading::new(5, 36));
    }

    #[test]
    fn error_code_in_ok_body_is_a_failure() {
        let body = r#"{"success":false,"error":{"code":615,"type":"request_failed"}}"#;

        let err = parse_reading(body).unwrap_err();
        assert!(matches!(err, FetchError::Provider { code: 615, .. }));
    }

    #[test]
    fn missing_current_block_is_incomplete() {
        let err = parse_reading("{}").unwrap_err();
        assert!(matches!(err, FetchError::Incomplete { .. }));
    }

    #[test]
    fn malformed_json_is_a_decode_error() {
        let err = parse_reading("<html>").unwrap_err();
        assert!(matches!(err, FetchError::Decode { .. }));
        assert_eq!(err.provider(), ProviderId::WeatherStack);
    }
}
