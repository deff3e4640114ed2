use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::{
    error::FetchError,
    model::Reading,
    provider::{ProviderId, WeatherProvider, truncate_body},
};

pub const DEFAULT_ENDPOINT: &str = "http://api.openweathermap.org/data/2.5/weather";
pub const DEFAULT_COUNTRY: &str = "AU";

const ID: ProviderId = ProviderId::OpenWeather;

const MPS_TO_KMH: f64 = 3.6;

#[derive(Debug, Clone)]
pub struct OpenWeatherProvider {
    api_key: String,
    endpoint: String,
    country: String,
    http: Client,
}

impl OpenWeatherProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            country: DEFAULT_COUNTRY.to_string(),
            http: Client::new(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Country code appended to every location query.
    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.country = country.into();
        self
    }
}

#[derive(Debug, Deserialize)]
struct OwMain {
    temp: f64,
}

#[derive(Debug, Deserialize)]
struct OwWind {
    speed: f64,
}

#[derive(Debug, Deserialize)]
struct OwCurrentResponse {
    main: Option<OwMain>,
    wind: Option<OwWind>,
}

/// Metric units give Celsius and m/s; both are truncated to whole numbers.
pub(crate) fn parse_reading(body: &str) -> Result<Reading, FetchError> {
    let parsed: OwCurrentResponse = serde_json::from_str(body)
        .map_err(|source| FetchError::Decode { provider: ID, source })?;

    let (Some(main), Some(wind)) = (parsed.main, parsed.wind) else {
        return Err(FetchError::Incomplete { provider: ID });
    };

    Ok(Reading::new(
        main.temp as i32,
        (wind.speed * MPS_TO_KMH) as i32,
    ))
}

#[async_trait]
impl WeatherProvider for OpenWeatherProvider {
    fn id(&self) -> ProviderId {
        ID
    }

    async fn fetch(&self, location: &str, deadline: Duration) -> Result<Reading, FetchError> {
        let query = format!("{location},{}", self.country);

        let res = self
            .http
            .get(&self.endpoint)
            .query(&[
                ("appid", self.api_key.as_str()),
                ("q", query.as_str()),
                ("units", "metric"),
            ])
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
    fn converts_wind_speed_to_kmh() {
        let body = r#"{"name":"Melbourne","main":{"temp":5.0,"humidity":70},"wind":{"speed":10.0,"deg":200}}"#;

        let reading = parse_reading(body).unwrap();
        assert_eq!(reading, Reading::new(5, 36));
    }

    #[test]
    fn truncates_fractional_values() {
        let body = r#"{"main":{"temp":18.9},"wind":{"speed":4.1}}"#;

        let reading = parse_reading(body).unwrap();
        // 4.1 m/s = 14.76 km/h
        assert_eq!(reading, Reading::new(18, 14));
    }

    #[test]
    fn missing_blocks_are_incomplete() {
        let err = parse_reading(r#"{"cod":"404","message":"city not found"}"#).unwrap_err();
        assert!(matches!(err, FetchError::Incomplete { .. }));
    }
}
