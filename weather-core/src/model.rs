use serde::{Deserialize, Serialize};

/// Location used when the caller does not name one.
pub const DEFAULT_LOCATION: &str = "Melbourne";

pub const MESSAGE_SUCCESS: &str = "Request successful";
pub const MESSAGE_SUCCESS_CACHED: &str = "Request successful (cached)";
pub const MESSAGE_STALE: &str = "Request failure (cache is stale)";
pub const MESSAGE_NOT_FOUND: &str = "Location could not be found";

/// Current conditions normalized to whole degrees Celsius and whole km/h.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reading {
    #[serde(rename = "temperature_degrees")]
    pub temperature_c: i32,
    #[serde(rename = "wind_speed")]
    pub wind_speed_kmh: i32,
}

impl Reading {
    pub fn new(temperature_c: i32, wind_speed_kmh: i32) -> Self {
        Self { temperature_c, wind_speed_kmh }
    }
}

/// Position of an upstream in the fallback chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Upstream {
    Primary,
    Failover,
}

impl Upstream {
    pub fn as_str(&self) -> &'static str {
        match self {
            Upstream::Primary => "primary",
            Upstream::Failover => "failover",
        }
    }
}

impl std::fmt::Display for Upstream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the answer to a single lookup came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupOutcome {
    FreshCacheHit(Reading),
    LiveSuccess { reading: Reading, source: Upstream },
    /// Both upstreams failed; this is the last value ever fetched for the
    /// location and may be arbitrarily old.
    StaleFallback(Reading),
    NotFound,
}

impl LookupOutcome {
    pub fn reading(&self) -> Option<Reading> {
        match self {
            LookupOutcome::FreshCacheHit(reading)
            | LookupOutcome::LiveSuccess { reading, .. }
            | LookupOutcome::StaleFallback(reading) => Some(*reading),
            LookupOutcome::NotFound => None,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, LookupOutcome::StaleFallback(_))
    }
}

/// JSON body returned to callers of the inbound query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeatherPayload {
    pub status: u16,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Reading>,
}

impl From<LookupOutcome> for WeatherPayload {
    fn from(outcome: LookupOutcome) -> Self {
        let (status, message) = match outcome {
            LookupOutcome::FreshCacheHit(_) => (200, MESSAGE_SUCCESS_CACHED),
            LookupOutcome::LiveSuccess { .. } => (200, MESSAGE_SUCCESS),
            LookupOutcome::StaleFallback(_) => (200, MESSAGE_STALE),
            LookupOutcome::NotFound => (404, MESSAGE_NOT_FOUND),
        };

        Self {
            status,
            message: message.to_string(),
            data: outcome.reading(),
        }
    }
}

/// Apply the default location when the caller omitted one or sent a blank value.
pub fn resolve_location(city: Option<&str>) -> String {
    match city.map(str::trim) {
        Some(city) if !city.is_empty() => city.to_string(),
        _ => DEFAULT_LOCATION.to_string(),
    }
}
