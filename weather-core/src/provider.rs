use crate::{
    Config, FetchError, Reading,
    provider::{openweather::OpenWeatherProvider, weatherstack::WeatherStackProvider},
};
use async_trait::async_trait;
use std::{convert::TryFrom, fmt::Debug, time::Duration};

pub mod openweather;
pub mod weatherstack;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderId {
    WeatherStack,
    OpenWeather,
}

impl ProviderId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::WeatherStack => "weatherstack",
            ProviderId::OpenWeather => "openweather",
        }
    }

    pub const fn all() -> &'static [ProviderId] {
        &[ProviderId::WeatherStack, ProviderId::OpenWeather]
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for ProviderId {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let lower = value.to_lowercase();

        match lower.as_str() {
            "weatherstack" => Ok(ProviderId::WeatherStack),
            "openweather" => Ok(ProviderId::OpenWeather),
            _ => Err(anyhow::anyhow!(
                "Unknown provider '{value}'. Supported providers: weatherstack, openweather."
            )),
        }
    }
}

/// An upstream weather API that reports current conditions for a location.
#[async_trait]
pub trait WeatherProvider: Send + Sync + Debug {
    fn id(&self) -> ProviderId;

    /// Fetch and normalize current conditions. Implementations should give up
    /// once `deadline` has passed; callers enforce it regardless.
    async fn fetch(&self, location: &str, deadline: Duration) -> Result<Reading, FetchError>;
}

/// Construct a provider from config and explicit ProviderId.
pub fn provider_from_config(
    id: ProviderId,
    config: &Config,
) -> anyhow::Result<Box<dyn WeatherProvider>> {
    let api_key = config.provider_api_key(id).ok_or_else(|| {
        anyhow::anyhow!(
            "No API key configured for provider '{id}'.\n\
                 Hint: run `weather configure {id}` and enter your API key."
        )
    })?;
    let settings = config.provider_config(id);
    let endpoint = settings.and_then(|cfg| cfg.endpoint.clone());

    let boxed: Box<dyn WeatherProvider> = match id {
        ProviderId::WeatherStack => {
            let mut provider = WeatherStackProvider::new(api_key.to_owned());
            if let Some(endpoint) = endpoint {
                provider = provider.with_endpoint(endpoint);
            }
            Box::new(provider)
        }
        ProviderId::OpenWeather => {
            let mut provider = OpenWeatherProvider::new(api_key.to_owned());
            if let Some(endpoint) = endpoint {
                provider = provider.with_endpoint(endpoint);
            }
            if let Some(country) = settings.and_then(|cfg| cfg.country.clone()) {
                provider = provider.with_country(country);
            }
            Box::new(provider)
        }
    };

    Ok(boxed)
}

pub(crate) fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    match body.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn provider_id_as_str_roundtrip() {
        for id in ProviderId::all() {
            let s = id.as_str();
            let parsed = ProviderId::try_from(s).expect("roundtrip should succeed");
            assert_eq!(*id, parsed);
        }
    }

    #[test]
    fn provider_id_is_case_insensitive() {
        assert_eq!(ProviderId::try_from("WeatherStack").unwrap(), ProviderId::WeatherStack);
    }

    #[test]
    fn unknown_provider_error() {
        let err = ProviderId::try_from("doesnotexist").unwrap_err();
        assert!(err.to_string().contains("Unknown provider"));
    }

    #[test]
    fn provider_from_config_errors_when_missing_api_key() {
        let cfg = Config::default();
        let err = provider_from_config(ProviderId::OpenWeather, &cfg).unwrap_err();
        assert!(err.to_string().contains("No API key configured for provider"));
        assert!(err.to_string().contains("weather configure openweather"));
    }

    #[test]
    fn provider_from_config_works_when_configured() {
        let mut cfg = Config::default();
        cfg.upsert_provider_api_key(ProviderId::WeatherStack, "KEY".to_string());

        let provider = provider_from_config(ProviderId::WeatherStack, &cfg).unwrap();
        assert_eq!(provider.id(), ProviderId::WeatherStack);
    }

    #[test]
    fn truncate_body_respects_char_boundaries() {
        let long = "é".repeat(300);
        let truncated = truncate_body(&long);

        assert!(truncated.ends_with("..."));
        assert_eq!(truncated.chars().count(), 203);
        assert_eq!(truncate_body("short"), "short");
    }
}
